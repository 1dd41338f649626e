//! Contract surface for the external agent orchestrator.
//!
//! The orchestration wrapper itself lives outside this crate; these value
//! types define the request/response shape it exchanges with the engine.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// A request handed to the external agent runner.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentRequest {
    /// Prompt text describing the task.
    pub prompt: String,
    /// Upper bound on conversation turns.
    pub max_turns: u32,
    /// Wall-clock timeout in seconds.
    pub timeout_seconds: u64,
    /// Free-form context forwarded verbatim.
    #[serde(default)]
    pub context: HashMap<String, serde_json::Value>,
}

/// The agent runner's reply.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentResponse {
    pub success: bool,
    pub output: String,
    /// Turns actually consumed.
    pub turns_used: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

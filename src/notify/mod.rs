//! Notification backends for watch alerts.
//!
//! Delivery targets:
//! - `ntfy`: HTTP POST to an ntfy push server
//! - console: formatted terminal output
//! - multi: concurrent fan-out with a per-backend success vector
//!
//! Transport failures degrade to a `false` result from the affected backend
//! only; they are logged and never retried inline.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};

/// HTTP timeout for push deliveries (seconds).
const NTFY_TIMEOUT_SECS: u64 = 30;

/// Notification priority, mapped onto ntfy's 1-5 scale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationPriority {
    Low = 1,
    Medium = 2,
    Default = 3,
    High = 4,
    Urgent = 5,
}

impl NotificationPriority {
    pub fn as_ntfy(self) -> u8 {
        self as u8
    }
}

/// A notification destined for one or more backends.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub title: String,
    pub message: String,
    pub priority: NotificationPriority,
    pub timestamp: DateTime<Utc>,
    pub tags: Vec<String>,
    pub data: Option<HashMap<String, serde_json::Value>>,
}

impl Notification {
    pub fn new(title: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            message: message.into(),
            priority: NotificationPriority::Default,
            timestamp: Utc::now(),
            tags: Vec::new(),
            data: None,
        }
    }

    #[must_use]
    pub fn priority(mut self, priority: NotificationPriority) -> Self {
        self.priority = priority;
        self
    }

    #[must_use]
    pub fn tags<I: IntoIterator<Item = S>, S: Into<String>>(mut self, tags: I) -> Self {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn data(mut self, data: HashMap<String, serde_json::Value>) -> Self {
        self.data = Some(data);
        self
    }
}

/// A delivery target.
#[async_trait]
pub trait NotificationBackend: Send + Sync {
    /// Deliver the notification. Returns true on success; transport errors
    /// return false instead of propagating.
    async fn send(&self, notification: &Notification) -> bool;

    /// Backend name for logging.
    fn name(&self) -> &'static str;
}

/// Push notifications via an ntfy server.
pub struct NtfyBackend {
    topic: String,
    server: String,
    auth_token: Option<String>,
    client: reqwest::Client,
}

impl NtfyBackend {
    pub fn new(topic: impl Into<String>) -> Self {
        Self::with_server(topic, "https://ntfy.sh")
    }

    pub fn with_server(topic: impl Into<String>, server: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(NTFY_TIMEOUT_SECS))
            .build()
            .unwrap_or_default();
        Self {
            topic: topic.into(),
            server: server.into().trim_end_matches('/').to_string(),
            auth_token: None,
            client,
        }
    }

    #[must_use]
    pub fn auth_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = Some(token.into());
        self
    }
}

#[async_trait]
impl NotificationBackend for NtfyBackend {
    async fn send(&self, notification: &Notification) -> bool {
        let url = format!("{}/{}", self.server, self.topic);

        let mut request = self
            .client
            .post(&url)
            .header("Title", notification.title.clone())
            .header("Priority", notification.priority.as_ntfy().to_string())
            .body(notification.message.clone());

        if !notification.tags.is_empty() {
            request = request.header("Tags", notification.tags.join(","));
        }
        if let Some(token) = &self.auth_token {
            request = request.header("Authorization", format!("Bearer {token}"));
        }
        if let Some(data) = &notification.data {
            match serde_json::to_string(data) {
                Ok(json) => request = request.header("X-Data", json),
                Err(e) => warn!("alert payload not serializable, omitting X-Data: {e}"),
            }
        }

        match request.send().await {
            Ok(response) if response.status().is_success() => {
                debug!("notification delivered to {}", url);
                true
            }
            Ok(response) => {
                warn!("ntfy returned {} for {}", response.status(), url);
                false
            }
            Err(e) => {
                error!("ntfy delivery failed: {e}");
                false
            }
        }
    }

    fn name(&self) -> &'static str {
        "ntfy"
    }
}

/// Terminal output backend.
pub struct ConsoleBackend;

#[async_trait]
impl NotificationBackend for ConsoleBackend {
    async fn send(&self, notification: &Notification) -> bool {
        let stamp = notification.timestamp.format("%H:%M:%S");
        println!();
        println!("{}", "=".repeat(50));
        println!("[{:?}] {}", notification.priority, notification.title);
        println!("{}", "=".repeat(50));
        println!("{}", notification.message);
        if !notification.tags.is_empty() {
            println!("Tags: {}", notification.tags.join(", "));
        }
        println!("[{stamp}]");
        true
    }

    fn name(&self) -> &'static str {
        "console"
    }
}

/// Concurrent fan-out to every configured backend.
pub struct MultiNotifier {
    backends: Vec<Box<dyn NotificationBackend>>,
}

impl MultiNotifier {
    pub fn new(backends: Vec<Box<dyn NotificationBackend>>) -> Self {
        Self { backends }
    }

    /// Build a notifier from watch-config target strings: `"console"` or
    /// `"ntfy:<topic>"`. Unrecognized targets are skipped with a warning.
    pub fn from_targets(targets: &[String]) -> Self {
        let mut backends: Vec<Box<dyn NotificationBackend>> = Vec::new();
        for target in targets {
            if target == "console" {
                backends.push(Box::new(ConsoleBackend));
            } else if let Some(topic) = target.strip_prefix("ntfy:") {
                backends.push(Box::new(NtfyBackend::new(topic)));
            } else {
                warn!("unknown notification target '{target}'");
            }
        }
        Self::new(backends)
    }

    pub fn add_backend(&mut self, backend: Box<dyn NotificationBackend>) {
        self.backends.push(backend);
    }

    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }

    /// Deliver to all backends concurrently; one success flag per backend.
    pub async fn send(&self, notification: &Notification) -> Vec<bool> {
        if self.backends.is_empty() {
            warn!("no notification backends configured");
            return Vec::new();
        }
        futures::future::join_all(self.backends.iter().map(|b| b.send(notification))).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct RecordingBackend {
        succeed: bool,
        sent: std::sync::atomic::AtomicU32,
    }

    #[async_trait]
    impl NotificationBackend for RecordingBackend {
        async fn send(&self, _notification: &Notification) -> bool {
            self.sent.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            self.succeed
        }

        fn name(&self) -> &'static str {
            "recording"
        }
    }

    #[tokio::test]
    async fn multi_backend_returns_per_backend_results() {
        let ok = Box::new(RecordingBackend {
            succeed: true,
            sent: 0.into(),
        });
        let fail = Box::new(RecordingBackend {
            succeed: false,
            sent: 0.into(),
        });
        let notifier = MultiNotifier::new(vec![ok, fail]);

        let results = notifier.send(&Notification::new("t", "m")).await;
        assert_eq!(results, vec![true, false]);
    }

    #[tokio::test]
    async fn empty_notifier_returns_no_results() {
        let notifier = MultiNotifier::new(Vec::new());
        assert!(notifier.send(&Notification::new("t", "m")).await.is_empty());
    }

    #[test]
    fn targets_parse_console_and_ntfy() {
        let notifier = MultiNotifier::from_targets(&[
            "console".to_string(),
            "ntfy:rf-alerts".to_string(),
            "carrier-pigeon".to_string(),
        ]);
        assert_eq!(notifier.backends.len(), 2);
    }

    #[test]
    fn priority_maps_to_ntfy_scale() {
        assert_eq!(NotificationPriority::Low.as_ntfy(), 1);
        assert_eq!(NotificationPriority::Urgent.as_ntfy(), 5);
    }
}

//! The spectrum watch engine.
//!
//! A watch is a supervisor task owning all mutable state: baseline,
//! cooldown table, alert history, and the tuner. Blocking tuner+FFT work is
//! dispatched to the blocking pool so the supervisor stays responsive to
//! control messages (`pause`, `resume`, `stop`, `snapshot`) arriving over a
//! bounded channel.
//!
//! State machine:
//!
//! ```text
//! idle -> baseline -> watching <-> alerting
//!            |            |
//!            v            v
//!          paused       paused
//!            |            |
//!            v            v
//!         stopped      stopped
//! ```
//!
//! An error inside one iteration is recorded on the state and the loop
//! continues after the scan interval; only an explicit stop ends the watch.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use super::config::{
    is_emergency_frequency, notable_frequency, Alert, AlertCondition, AlertConditionType,
    WatchConfig, WatchState, WatchStatus,
};
use crate::baseline::SpectrumBaseline;
use crate::device::Tuner;
use crate::notify::{MultiNotifier, Notification, NotificationPriority};
use crate::observability::{AuditLogger, ComplianceStatus};
use crate::scanner::{ScanResult, SpectrumScanner};

/// Alerts retained in the persisted history.
const ALERT_HISTORY_LIMIT: usize = 100;

/// Control messages accepted by a running watch.
#[derive(Debug)]
pub enum WatchCommand {
    Pause,
    Resume,
    Stop,
    Snapshot(oneshot::Sender<WatchSnapshot>),
}

/// Point-in-time view of a running watch.
#[derive(Debug, Clone, Serialize)]
pub struct WatchSnapshot {
    pub watch_id: String,
    pub name: String,
    pub state: WatchState,
    pub stable_signals: usize,
    pub baseline_progress: String,
}

/// Handle for controlling a spawned watch.
#[derive(Clone)]
pub struct WatchHandle {
    tx: mpsc::Sender<WatchCommand>,
}

impl WatchHandle {
    pub async fn pause(&self) -> bool {
        self.tx.send(WatchCommand::Pause).await.is_ok()
    }

    pub async fn resume(&self) -> bool {
        self.tx.send(WatchCommand::Resume).await.is_ok()
    }

    pub async fn stop(&self) -> bool {
        self.tx.send(WatchCommand::Stop).await.is_ok()
    }

    /// Current snapshot, or `None` if the watch has exited.
    pub async fn status(&self) -> Option<WatchSnapshot> {
        let (tx, rx) = oneshot::channel();
        if self.tx.send(WatchCommand::Snapshot(tx)).await.is_err() {
            return None;
        }
        rx.await.ok()
    }
}

/// Persisted watch document: config, counters, baseline, recent alerts.
#[derive(Serialize, Deserialize)]
struct WatchDocument {
    config: WatchConfig,
    state: WatchState,
    baseline: SpectrumBaseline,
    alert_history: Vec<Alert>,
}

enum Flow {
    Continue,
    Stop,
}

/// Continuous spectrum monitor with baseline learning and alerting.
pub struct SpectrumWatch {
    config: WatchConfig,
    state: WatchState,
    baseline: SpectrumBaseline,
    scanner: SpectrumScanner,
    tuner: Option<Box<dyn Tuner + Send>>,
    notifier: MultiNotifier,
    audit: AuditLogger,
    state_dir: PathBuf,
    cooldowns: HashMap<String, DateTime<Utc>>,
    alert_history: Vec<Alert>,
    commands: mpsc::Receiver<WatchCommand>,
}

fn default_state_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".rf-sentinel")
        .join("watches")
}

impl SpectrumWatch {
    /// Build a watch and its control handle.
    pub fn new(config: WatchConfig, tuner: Box<dyn Tuner + Send>) -> (Self, WatchHandle) {
        let (tx, rx) = mpsc::channel(8);
        let baseline = SpectrumBaseline::new(
            crate::config::FREQUENCY_TOLERANCE_HZ,
            config.baseline_scans,
        );
        let scanner = SpectrumScanner::with_threshold(config.threshold_db);
        let notifier = MultiNotifier::from_targets(&config.notifications);
        let state_dir = default_state_dir();
        let audit = AuditLogger::new(state_dir.join("watch_audit.jsonl"));

        let watch = Self {
            config,
            state: WatchState::default(),
            baseline,
            scanner,
            tuner: Some(tuner),
            notifier,
            audit,
            state_dir,
            cooldowns: HashMap::new(),
            alert_history: Vec::new(),
            commands: rx,
        };
        (watch, WatchHandle { tx })
    }

    /// Override the notification fan-out (tests, custom backends).
    #[must_use]
    pub fn with_notifier(mut self, notifier: MultiNotifier) -> Self {
        self.notifier = notifier;
        self
    }

    /// Override the state directory.
    #[must_use]
    pub fn with_state_dir(mut self, dir: PathBuf) -> Self {
        self.audit = AuditLogger::new(dir.join("watch_audit.jsonl"));
        self.state_dir = dir;
        self
    }

    /// Restore config, baseline, and counters from a persisted document.
    /// Runtime status starts over at `idle`.
    pub fn load(
        watch_id: &str,
        state_dir: Option<PathBuf>,
        tuner: Box<dyn Tuner + Send>,
    ) -> Option<(Self, WatchHandle)> {
        let dir = state_dir.unwrap_or_else(default_state_dir);
        let path = dir.join(format!("{watch_id}.json"));
        let content = std::fs::read_to_string(&path).ok()?;
        let doc: WatchDocument = match serde_json::from_str(&content) {
            Ok(doc) => doc,
            Err(e) => {
                error!("failed to load watch state {}: {e}", path.display());
                return None;
            }
        };

        let (mut watch, handle) = Self::new(doc.config, tuner);
        watch = watch.with_state_dir(dir);
        watch.baseline = doc.baseline;
        watch.alert_history = doc.alert_history;
        watch.state.baseline_established = doc.state.baseline_established;
        watch.state.baseline_scans_completed = doc.state.baseline_scans_completed;
        watch.state.scans_completed = doc.state.scans_completed;
        watch.state.alerts_sent = doc.state.alerts_sent;

        info!("loaded watch state: {watch_id}");
        Some((watch, handle))
    }

    pub fn state(&self) -> &WatchState {
        &self.state
    }

    pub fn baseline(&self) -> &SpectrumBaseline {
        &self.baseline
    }

    /// Run the watch until stopped. Returns the final state.
    pub async fn run(mut self) -> WatchState {
        if !self.config.enabled {
            info!("watch {} is disabled", self.config.watch_id);
            self.state.status = WatchStatus::Stopped;
            return self.state;
        }

        // Resume into watching when a restored baseline is already complete
        self.state.status = if self.baseline.established {
            self.state.baseline_established = true;
            WatchStatus::Watching
        } else {
            WatchStatus::Baseline
        };
        self.state.started_at = Some(Utc::now());

        self.audit.log_operation(
            &format!("watch_{}", self.config.watch_id),
            "watch_started",
            serde_json::json!({
                "name": self.config.name,
                "bands": self.config.bands,
                "conditions": self.config.alert_conditions.iter()
                    .map(|c| c.condition_type.as_str()).collect::<Vec<_>>(),
            }),
            None,
            None,
            ComplianceStatus::Ok,
            Vec::new(),
        );
        info!("starting watch: {}", self.config.name);

        self.notifier
            .send(
                &Notification::new(
                    format!("Watch Started: {}", self.config.name),
                    format!(
                        "Establishing baseline ({} scans)...",
                        self.config.baseline_scans
                    ),
                )
                .priority(NotificationPriority::Low)
                .tags(["sdr", "watch", "start"]),
            )
            .await;

        loop {
            if matches!(self.drain_commands().await, Flow::Stop) {
                break;
            }

            if self.state.status == WatchStatus::Paused {
                tokio::time::sleep(Duration::from_secs(1)).await;
                continue;
            }

            let ranges = self.config.frequency_ranges();
            if ranges.is_empty() {
                error!("no frequency ranges configured");
                self.state.error = Some("no frequency ranges configured".to_string());
                tokio::time::sleep(Duration::from_secs_f64(self.config.scan_interval_seconds))
                    .await;
                continue;
            }

            for (start_hz, end_hz) in ranges {
                if self.state.status == WatchStatus::Stopped {
                    break;
                }

                match self.execute_scan(start_hz, end_hz).await {
                    Ok(result) => {
                        if self.state.status == WatchStatus::Baseline {
                            self.process_baseline_scan(&result).await;
                        } else {
                            let alerts = self.check_alerts(&result);
                            for alert in alerts {
                                self.send_alert(alert).await;
                            }
                        }
                    }
                    Err(e) => {
                        // One bad iteration never stops the watch
                        error!("scan error: {e}");
                        self.state.error = Some(e);
                    }
                }
            }

            if self.state.status == WatchStatus::Stopped {
                break;
            }

            // Interruptible inter-iteration sleep
            tokio::select! {
                () = tokio::time::sleep(Duration::from_secs_f64(self.config.scan_interval_seconds)) => {}
                cmd = self.commands.recv() => {
                    match cmd {
                        Some(cmd) => {
                            if matches!(self.handle_command(cmd).await, Flow::Stop) {
                                break;
                            }
                        }
                        None => break,
                    }
                }
            }
        }

        self.shutdown().await;
        self.state
    }

    async fn drain_commands(&mut self) -> Flow {
        while let Ok(cmd) = self.commands.try_recv() {
            if matches!(self.handle_command(cmd).await, Flow::Stop) {
                return Flow::Stop;
            }
        }
        Flow::Continue
    }

    async fn handle_command(&mut self, cmd: WatchCommand) -> Flow {
        match cmd {
            WatchCommand::Pause => {
                if matches!(
                    self.state.status,
                    WatchStatus::Baseline | WatchStatus::Watching
                ) {
                    self.state.status = WatchStatus::Paused;
                    info!("watch paused");
                }
                Flow::Continue
            }
            WatchCommand::Resume => {
                if self.state.status == WatchStatus::Paused {
                    self.state.status = if self.baseline.established {
                        WatchStatus::Watching
                    } else {
                        WatchStatus::Baseline
                    };
                    info!("watch resumed");
                }
                Flow::Continue
            }
            WatchCommand::Stop => {
                self.state.status = WatchStatus::Stopped;
                Flow::Stop
            }
            WatchCommand::Snapshot(reply) => {
                let snapshot = WatchSnapshot {
                    watch_id: self.config.watch_id.clone(),
                    name: self.config.name.clone(),
                    state: self.state.clone(),
                    stable_signals: self.baseline.get_baseline_signals().len(),
                    baseline_progress: format!(
                        "{}/{}",
                        self.baseline.scan_count, self.config.baseline_scans
                    ),
                };
                let _ = reply.send(snapshot);
                Flow::Continue
            }
        }
    }

    /// Run one scan on the blocking pool, keeping the supervisor free.
    async fn execute_scan(&mut self, start_hz: f64, end_hz: f64) -> Result<ScanResult, String> {
        let mut tuner = self
            .tuner
            .take()
            .ok_or_else(|| "tuner unavailable".to_string())?;
        let scanner = self.scanner.clone();
        let dwell = self.config.dwell_time_ms;

        let joined = tokio::task::spawn_blocking(move || {
            let result = scanner.scan(tuner.as_mut(), start_hz, end_hz, None, dwell);
            (tuner, result)
        })
        .await;

        match joined {
            Ok((tuner, result)) => {
                self.tuner = Some(tuner);
                let result = result.map_err(|e| e.to_string())?;
                self.state.scans_completed += 1;
                self.state.last_scan_time = Some(Utc::now());
                Ok(result)
            }
            Err(e) => Err(format!("scan worker panicked: {e}")),
        }
    }

    async fn process_baseline_scan(&mut self, result: &ScanResult) {
        self.baseline.add_scan(result);
        self.state.baseline_scans_completed = self.baseline.scan_count;

        info!(
            "baseline scan {}/{}: {} signals",
            self.baseline.scan_count,
            self.config.baseline_scans,
            result.peaks.len()
        );

        if self.baseline.established {
            self.state.status = WatchStatus::Watching;
            self.state.baseline_established = true;
            let stable = self.baseline.get_baseline_signals().len();

            self.audit.log_operation(
                &format!("watch_{}", self.config.watch_id),
                "baseline_established",
                serde_json::json!({
                    "scans": self.baseline.scan_count,
                    "stable_signals": stable,
                }),
                None,
                None,
                ComplianceStatus::Ok,
                Vec::new(),
            );

            self.notifier
                .send(
                    &Notification::new(
                        "Baseline Established",
                        format!("Tracking {stable} signals. Now watching..."),
                    )
                    .tags(["sdr", "baseline"]),
                )
                .await;

            self.save_state();
            info!("baseline established: {stable} stable signals");
        }
    }

    /// Evaluate every configured condition against a scan, honoring
    /// per-condition cooldowns.
    pub fn check_alerts(&mut self, result: &ScanResult) -> Vec<Alert> {
        let now = Utc::now();
        let mut alerts = Vec::new();

        for condition in self.config.alert_conditions.clone() {
            let key = condition.cooldown_key();
            if let Some(last) = self.cooldowns.get(&key) {
                if (now - *last).num_seconds() < condition.cooldown_seconds as i64 {
                    debug!("condition {key} in cooldown");
                    continue;
                }
            }

            let triggered = self.evaluate_condition(&condition, result);
            if !triggered.is_empty() {
                self.cooldowns.insert(key, now);
                alerts.extend(triggered);
            }
        }

        alerts
    }

    fn evaluate_condition(&self, condition: &AlertCondition, result: &ScanResult) -> Vec<Alert> {
        match condition.condition_type {
            AlertConditionType::NewSignal => self.check_new_signals(condition, result),
            AlertConditionType::ThresholdBreach => self.check_threshold_breach(condition, result),
            AlertConditionType::BandActivity => {
                self.check_band_activity(condition, result).into_iter().collect()
            }
            AlertConditionType::SignalLoss => self.check_signal_loss(condition, result),
        }
    }

    fn check_new_signals(&self, condition: &AlertCondition, result: &ScanResult) -> Vec<Alert> {
        let mut alerts = Vec::new();
        for peak in &result.peaks {
            if condition
                .threshold_db
                .is_some_and(|threshold| peak.power_db < threshold)
            {
                continue;
            }
            if condition.frequency_hz.is_some_and(|f| {
                (peak.frequency_hz - f).abs() > condition.frequency_tolerance_hz
            }) {
                continue;
            }
            if !self.baseline.is_new_signal(peak) {
                continue;
            }

            let mut message = format!(
                "New signal at {:.3} MHz ({:.1} dB)",
                peak.frequency_hz / 1e6,
                peak.power_db
            );
            if let Some(label) = notable_frequency(peak.frequency_hz) {
                message.push_str(" - ");
                message.push_str(label);
            }

            alerts.push(Alert::new(
                &self.config.watch_id,
                condition,
                peak.frequency_hz,
                peak.power_db,
                message,
            ));
        }
        alerts
    }

    fn check_threshold_breach(&self, condition: &AlertCondition, result: &ScanResult) -> Vec<Alert> {
        let Some(threshold) = condition.threshold_db else {
            return Vec::new();
        };
        result
            .peaks
            .iter()
            .filter(|peak| peak.power_db > threshold)
            .map(|peak| {
                Alert::new(
                    &self.config.watch_id,
                    condition,
                    peak.frequency_hz,
                    peak.power_db,
                    format!(
                        "Threshold breach at {:.3} MHz: {:.1} dB > {threshold} dB",
                        peak.frequency_hz / 1e6,
                        peak.power_db
                    ),
                )
            })
            .collect()
    }

    fn check_band_activity(&self, condition: &AlertCondition, result: &ScanResult) -> Option<Alert> {
        let limit = condition.activity_change_percent?;
        let change = self.baseline.get_activity_change(result, None);
        if change.abs() <= limit {
            return None;
        }
        let direction = if change > 0.0 { "increased" } else { "decreased" };
        Some(Alert::new(
            &self.config.watch_id,
            condition,
            result.start_freq_hz,
            result.noise_floor_db,
            format!(
                "Band activity {direction} by {:.1}% (threshold: {limit}%)",
                change.abs()
            ),
        ))
    }

    fn check_signal_loss(&self, condition: &AlertCondition, result: &ScanResult) -> Vec<Alert> {
        self.baseline
            .get_missing_signals(result)
            .into_iter()
            .filter(|(freq, _)| {
                !condition
                    .frequency_hz
                    .is_some_and(|f| (freq - f).abs() > condition.frequency_tolerance_hz)
            })
            .map(|(freq, last_power)| {
                let mut message =
                    format!("Signal lost at {:.3} MHz (was {last_power:.1} dB)", freq / 1e6);
                if let Some(label) = notable_frequency(freq) {
                    message.push_str(" - ");
                    message.push_str(label);
                }
                Alert::new(&self.config.watch_id, condition, freq, last_power, message)
            })
            .collect()
    }

    /// Deliver an alert to every backend; `notified` is set when any
    /// backend succeeds.
    pub async fn send_alert(&mut self, mut alert: Alert) {
        self.state.status = WatchStatus::Alerting;

        let priority = if is_emergency_frequency(alert.frequency_hz) {
            NotificationPriority::Urgent
        } else {
            NotificationPriority::High
        };

        let title = format!(
            "RF Alert: {}",
            alert
                .condition
                .condition_type
                .as_str()
                .replace('_', " ")
        );
        let data: Option<HashMap<String, serde_json::Value>> = serde_json::to_value(&alert)
            .ok()
            .and_then(|v| match v {
                serde_json::Value::Object(map) => Some(map.into_iter().collect()),
                _ => None,
            });

        let mut notification = Notification::new(title, alert.message.clone())
            .priority(priority)
            .tags([
                "sdr",
                "alert",
                alert.condition.condition_type.as_str(),
            ]);
        if let Some(data) = data {
            notification = notification.data(data);
        }

        let results = self.notifier.send(&notification).await;
        alert.notified = results.iter().any(|ok| *ok);

        self.audit.log_operation(
            &format!("watch_{}", self.config.watch_id),
            "alert_triggered",
            serde_json::json!({
                "alert_id": alert.alert_id,
                "condition_type": alert.condition.condition_type.as_str(),
                "frequency_mhz": alert.frequency_hz / 1e6,
                "power_db": alert.power_db,
            }),
            None,
            None,
            ComplianceStatus::Ok,
            Vec::new(),
        );

        warn!("ALERT: {}", alert.message);
        self.state.alerts_sent += 1;
        self.alert_history.push(alert);
        if self.alert_history.len() > ALERT_HISTORY_LIMIT {
            let excess = self.alert_history.len() - ALERT_HISTORY_LIMIT;
            self.alert_history.drain(..excess);
        }
        self.save_state();

        self.state.status = WatchStatus::Watching;
    }

    fn save_state(&self) {
        if let Err(e) = std::fs::create_dir_all(&self.state_dir) {
            warn!("cannot create state dir {}: {e}", self.state_dir.display());
            return;
        }
        let path = self.state_dir.join(format!("{}.json", self.config.watch_id));

        let doc = WatchDocument {
            config: self.config.clone(),
            state: self.state.clone(),
            baseline: self.baseline.clone(),
            alert_history: self
                .alert_history
                .iter()
                .rev()
                .take(ALERT_HISTORY_LIMIT)
                .rev()
                .cloned()
                .collect(),
        };

        match serde_json::to_string_pretty(&doc) {
            Ok(json) => {
                if let Err(e) = std::fs::write(&path, json) {
                    warn!("failed to save watch state: {e}");
                } else {
                    debug!("state saved to {}", path.display());
                }
            }
            Err(e) => warn!("failed to serialize watch state: {e}"),
        }
    }

    async fn shutdown(&mut self) {
        self.state.status = WatchStatus::Stopped;
        self.save_state();

        self.audit.log_operation(
            &format!("watch_{}", self.config.watch_id),
            "watch_stopped",
            serde_json::json!({
                "scans_completed": self.state.scans_completed,
                "alerts_sent": self.state.alerts_sent,
            }),
            None,
            None,
            ComplianceStatus::Ok,
            Vec::new(),
        );

        self.notifier
            .send(
                &Notification::new(
                    format!("Watch Stopped: {}", self.config.name),
                    format!(
                        "Scans: {}, Alerts: {}",
                        self.state.scans_completed, self.state.alerts_sent
                    ),
                )
                .priority(NotificationPriority::Low)
                .tags(["sdr", "watch", "stop"]),
            )
            .await;

        info!(
            "watch stopped: {} scans, {} alerts",
            self.state.scans_completed, self.state.alerts_sent
        );
    }
}

//! Public control surface of the engine.
//!
//! [`EngineController`] owns the event store, the active configuration,
//! and the lifecycle of the single monitor task.
//!
//! # Concurrency
//!
//! - `start` and `stop` serialize on one async mutex (the lifecycle gate).
//! - `status` and `events` never take the gate. Engine state is published
//!   through a [`watch`] channel and read without waiting on the loop.
//! - `configure` publishes a new [`ActiveConfig`] through a second
//!   [`watch`] channel; the loop picks it up at its next tick boundary.
//!   A targets change rescopes the store first, so the loop's batches
//!   from the old scope are refused.
//! - Ticks run on the blocking pool, so none of the above waits on
//!   filesystem or `git` work.
//! - `analyze` and `scan` run on the caller's task and write no events.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use vigil_types::{EngineStatus, InterventionEvent, RepositorySnapshot, ScanResult, ScenarioKind};

use crate::clock::{SystemClock, TimeSource};
use crate::config::{ConfigChange, ConfigError, EngineConfig};
use crate::inspector::{GitCli, RefReader, RepositoryError, RepositoryInspector};
use crate::monitor::{ActiveConfig, Monitor, TickCallback, TickSummary, run_monitor};
use crate::scanner::{ScanError, StyleScanner};
use crate::store::EventStore;

/// Lifecycle errors returned by [`EngineController::start`] and
/// [`EngineController::stop`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum EngineError {
    /// `start` was called while the loop is starting or running.
    #[error("engine is already running")]
    AlreadyRunning,

    /// `stop` was called while the engine is stopped.
    #[error("engine is not running")]
    NotRunning,
}

/// Engine lifecycle state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EngineState {
    /// Lifecycle status.
    pub status: EngineStatus,
    /// When the current (or last) run started.
    pub started_at: Option<DateTime<Utc>>,
    /// Ticks completed in the current (or last) run.
    pub tick_count: u64,
    /// Most recent target failure from the last tick, or a loop failure.
    pub last_error: Option<String>,
}

impl Default for EngineState {
    fn default() -> Self {
        Self {
            status: EngineStatus::Stopped,
            started_at: None,
            tick_count: 0,
            last_error: None,
        }
    }
}

/// Answer to [`EngineController::status`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusReport {
    /// Lifecycle state.
    #[serde(flatten)]
    pub state: EngineState,
    /// Events currently retained.
    pub event_count: usize,
    /// Retained events per scenario.
    pub scenario_counts: BTreeMap<ScenarioKind, usize>,
}

/// State shared between the controller and the monitor task.
#[derive(Debug)]
struct EngineShared {
    state: watch::Sender<EngineState>,
}

impl EngineShared {
    fn advance(&self) -> EngineStatus {
        let mut reached = EngineStatus::Stopped;
        self.state.send_modify(|s| {
            s.status = s.status.next();
            reached = s.status;
        });
        reached
    }
}

impl TickCallback for EngineShared {
    fn on_tick(&self, summary: &TickSummary) {
        self.state.send_modify(|s| {
            s.tick_count = summary.tick;
            s.last_error.clone_from(&summary.last_error);
        });
    }
}

#[derive(Debug, Default)]
struct Lifecycle {
    task: Option<JoinHandle<()>>,
    cancel: Option<CancellationToken>,
}

/// Start, stop, query, and reconfigure the intervention engine.
#[derive(Debug)]
pub struct EngineController {
    shared: Arc<EngineShared>,
    store: Arc<EventStore>,
    config_tx: watch::Sender<Arc<ActiveConfig>>,
    config_gate: Mutex<()>,
    gate: Mutex<Lifecycle>,
    clock: Arc<dyn TimeSource>,
    inspector: RepositoryInspector,
    scanner: StyleScanner,
}

impl EngineController {
    /// Create a stopped engine using the wall clock and the `git` CLI.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] if `config` fails validation.
    pub fn new(config: EngineConfig) -> Result<Self, ConfigError> {
        Self::with_parts(
            config,
            Arc::new(SystemClock::new()),
            Arc::new(GitCli::new()),
        )
    }

    /// Create a stopped engine with an explicit time source and ref reader.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] if `config` fails validation.
    pub fn with_parts(
        config: EngineConfig,
        clock: Arc<dyn TimeSource>,
        refs: Arc<dyn RefReader>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let store = Arc::new(EventStore::new(config.max_events));
        let active = ActiveConfig::new(config)?;
        let (config_tx, _) = watch::channel(Arc::new(active));
        let (state, _) = watch::channel(EngineState::default());

        Ok(Self {
            shared: Arc::new(EngineShared { state }),
            store,
            config_tx,
            config_gate: Mutex::new(()),
            gate: Mutex::new(Lifecycle::default()),
            inspector: RepositoryInspector::new(Arc::clone(&clock), refs),
            scanner: StyleScanner::new(Arc::clone(&clock)),
            clock,
        })
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Spawn the monitor loop.
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// [`EngineError::AlreadyRunning`] if a loop is starting or running.
    pub async fn start(&self) -> Result<(), EngineError> {
        let mut lifecycle = self.gate.lock().await;
        if self.shared.state.borrow().status.is_active() {
            return Err(EngineError::AlreadyRunning);
        }

        let started_at = self.clock.now();
        self.shared.state.send_modify(|s| {
            s.status = s.status.next();
            s.started_at = Some(started_at);
            s.tick_count = 0;
            s.last_error = None;
        });

        let cancel = CancellationToken::new();
        let monitor = Monitor::new(
            self.inspector.clone(),
            self.scanner.clone(),
            Arc::clone(&self.clock),
        );
        let callback: Arc<dyn TickCallback> = self.shared.clone();
        let task = tokio::spawn(run_monitor(
            monitor,
            self.config_tx.subscribe(),
            Arc::clone(&self.store),
            callback,
            cancel.clone(),
        ));
        lifecycle.task = Some(task);
        lifecycle.cancel = Some(cancel);

        let status = self.shared.advance();
        info!(%status, started_at = %started_at, "Engine started");
        Ok(())
    }

    /// Cancel the monitor loop and wait for it to exit.
    ///
    /// The loop finishes the target it is evaluating, then exits.
    ///
    /// # Errors
    ///
    /// [`EngineError::NotRunning`] if the engine is stopped.
    pub async fn stop(&self) -> Result<(), EngineError> {
        let mut lifecycle = self.gate.lock().await;
        if self.shared.state.borrow().status == EngineStatus::Stopped {
            return Err(EngineError::NotRunning);
        }

        self.shared.advance();
        if let Some(cancel) = lifecycle.cancel.take() {
            cancel.cancel();
        }
        if let Some(task) = lifecycle.task.take() {
            if let Err(e) = task.await {
                warn!(error = %e, "Monitor task ended abnormally");
                let message = format!("monitor task failed: {e}");
                self.shared
                    .state
                    .send_modify(|s| s.last_error = Some(message));
            }
        }
        let status = self.shared.advance();

        let state = self.shared.state.borrow().clone();
        info!(%status, ticks = state.tick_count, "Engine stopped");
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    /// Current lifecycle state plus event store counts.
    pub async fn status(&self) -> StatusReport {
        let state = self.shared.state.borrow().clone();
        let scenario_counts = self.store.counts_by_scenario().await;
        let event_count = scenario_counts
            .values()
            .fold(0_usize, |acc, n| acc.saturating_add(*n));
        StatusReport {
            state,
            event_count,
            scenario_counts,
        }
    }

    /// The `limit` most recent events, oldest first.
    pub async fn events(&self, limit: usize) -> Vec<InterventionEvent> {
        self.store.tail(limit).await
    }

    /// A copy of the active configuration.
    pub fn config(&self) -> EngineConfig {
        self.config_tx.borrow().config.clone()
    }

    // -----------------------------------------------------------------------
    // Manual operations
    // -----------------------------------------------------------------------

    /// Inspect a repository now, on the caller's task. No event is written.
    ///
    /// # Errors
    ///
    /// See [`RepositoryInspector::inspect`].
    pub fn analyze(&self, path: &Path) -> Result<RepositorySnapshot, RepositoryError> {
        let active = self.active();
        self.inspector.inspect(path, &active.config)
    }

    /// Scan one file now with the active rules. No event is written.
    ///
    /// # Errors
    ///
    /// See [`StyleScanner::scan`].
    pub fn scan(&self, path: &Path) -> Result<ScanResult, ScanError> {
        let active = self.active();
        self.scanner
            .scan(path, &active.rules, active.config.max_file_bytes)
    }

    // -----------------------------------------------------------------------
    // Configuration
    // -----------------------------------------------------------------------

    /// Change one configuration option.
    ///
    /// The change is validated in full before anything is published; a
    /// rejected value leaves the engine untouched. A running loop sees the
    /// new configuration at its next tick boundary. Replacing `targets`
    /// clears the event store and the loop's per-target history; changing
    /// `max_events` resizes the store.
    ///
    /// # Errors
    ///
    /// [`ConfigError::UnknownOption`] or [`ConfigError::InvalidValue`].
    pub async fn configure(&self, key: &str, value: &str) -> Result<(), ConfigError> {
        let _guard = self.config_gate.lock().await;
        let current = self.active();
        let (next, change) = current.config.with_option(key, value)?;
        let epoch = if change == ConfigChange::Targets {
            current.scope_epoch.saturating_add(1)
        } else {
            current.scope_epoch
        };
        let active = ActiveConfig::with_epoch(next, epoch)?;

        // The store moves to the new scope before the loop can observe it,
        // so any batch still carrying the old epoch is refused.
        match change {
            ConfigChange::Targets => self.store.rescope(epoch).await,
            ConfigChange::Capacity(capacity) => self.store.set_capacity(capacity).await,
            ConfigChange::Cadence | ConfigChange::Scanning | ConfigChange::Thresholds => {}
        }
        self.config_tx.send_replace(Arc::new(active));

        info!(key, value, "Configuration updated");
        Ok(())
    }

    fn active(&self) -> Arc<ActiveConfig> {
        self.config_tx.borrow().clone()
    }
}

impl Drop for EngineController {
    fn drop(&mut self) {
        if let Some(cancel) = self.gate.get_mut().cancel.take() {
            cancel.cancel();
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::TimeZone;

    use super::*;
    use crate::clock::ManualClock;
    use crate::inspector::StubRefReader;

    fn controller() -> EngineController {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2026, 7, 1, 0, 0, 0).unwrap(),
        ));
        EngineController::with_parts(
            EngineConfig::default(),
            clock,
            Arc::new(StubRefReader::default()),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn starts_stopped() {
        let engine = controller();
        let status = engine.status().await;
        assert_eq!(status.state.status, EngineStatus::Stopped);
        assert_eq!(status.event_count, 0);
        assert_eq!(status.scenario_counts.len(), ScenarioKind::ALL.len());
    }

    #[tokio::test]
    async fn stop_when_stopped_is_rejected() {
        let engine = controller();
        assert_eq!(engine.stop().await, Err(EngineError::NotRunning));
    }

    #[tokio::test]
    async fn start_twice_is_rejected() {
        let engine = controller();
        engine.start().await.unwrap();
        assert_eq!(engine.start().await, Err(EngineError::AlreadyRunning));
        engine.stop().await.unwrap();
        assert_eq!(engine.status().await.state.status, EngineStatus::Stopped);
    }

    #[tokio::test]
    async fn rejected_configuration_leaves_engine_untouched() {
        let engine = controller();
        let before = engine.config();
        assert!(matches!(
            engine.configure("max_events", "lots").await,
            Err(ConfigError::InvalidValue { .. })
        ));
        assert!(matches!(
            engine.configure("auto_push", "true").await,
            Err(ConfigError::UnknownOption { .. })
        ));
        assert_eq!(engine.config(), before);
    }

    #[tokio::test]
    async fn configure_resizes_store() {
        let engine = controller();
        engine.configure("max_events", "5").await.unwrap();
        assert_eq!(engine.store.capacity().await, 5);
        assert_eq!(engine.config().max_events, 5);
    }

    #[test]
    fn invalid_initial_config_is_rejected() {
        let config = EngineConfig {
            poll_interval_seconds: 0,
            ..EngineConfig::default()
        };
        assert!(EngineController::new(config).is_err());
    }

    #[test]
    fn status_report_serializes_flat() {
        let report = StatusReport {
            state: EngineState::default(),
            event_count: 0,
            scenario_counts: BTreeMap::from([(ScenarioKind::CleanState, 2)]),
        };
        let value = serde_json::to_value(&report).unwrap();
        assert_eq!(value["status"], "stopped");
        assert_eq!(value["scenario_counts"]["clean_state"], 2);
    }
}

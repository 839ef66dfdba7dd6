//! The intervention loop.
//!
//! [`Monitor::run_tick`] evaluates every enabled target once and returns
//! the drafts that should become events. [`run_monitor`] wraps it in the
//! long-running task: tick, append, report, sleep, until cancelled.
//! Ticks do filesystem and `git` work, so the task hands each one to the
//! blocking pool and owns the [`Monitor`] only between ticks.
//!
//! # Tick
//!
//! 1. Snapshot the active configuration (changes land only here).
//! 2. For each enabled target, unless cancelled:
//!    - repository: inspect, classify ref state, and only if nothing
//!      outranks style, check the directory layout and style-scan the
//!      uncommitted files;
//!    - files: expand the glob and scan every match.
//! 3. Any inspection or scan error, or a panic, replaces that target's
//!    classification with a scan failure. Other targets are unaffected.
//! 4. Pass each classification through the [`EdgeTracker`]; only
//!    transitions become drafts.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use vigil_types::{
    FailureKind, FileViolations, Finding, InterventionEvent, MonitorTarget, TargetKind,
};

use crate::clock::TimeSource;
use crate::config::{ConfigError, EngineConfig};
use crate::inspector::RepositoryInspector;
use crate::scanner::{RuleSet, StyleScanner};
use crate::scenario::{Classification, EdgeTracker, classify_repository, classify_style};
use crate::store::{EventDraft, EventStore};

/// A validated configuration together with its compiled rule set.
///
/// Published to the loop as one unit, so a tick never sees rules from one
/// configuration and thresholds from another.
#[derive(Debug, Clone)]
pub struct ActiveConfig {
    /// The configuration values.
    pub config: EngineConfig,
    /// Style rules compiled from `config`.
    pub rules: RuleSet,
    /// Bumped whenever the target list is replaced. The loop forgets its
    /// per-target history when it sees a new epoch.
    pub scope_epoch: u64,
}

impl ActiveConfig {
    /// Compile `config` into an active configuration at epoch zero.
    pub fn new(config: EngineConfig) -> Result<Self, ConfigError> {
        Self::with_epoch(config, 0)
    }

    /// Compile `config` into an active configuration at `scope_epoch`.
    pub fn with_epoch(config: EngineConfig, scope_epoch: u64) -> Result<Self, ConfigError> {
        let rules = RuleSet::compile(&config)?;
        Ok(Self {
            config,
            rules,
            scope_epoch,
        })
    }

    /// Seconds to sleep after a tick.
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.config.poll_interval_seconds)
    }
}

/// Result of one tick.
#[derive(Debug, Clone, Default)]
pub struct TickOutcome {
    /// Transitions to append, in target order.
    pub drafts: Vec<EventDraft>,
    /// Number of targets evaluated.
    pub evaluated: usize,
    /// Message of the last scan failure seen this tick, emitted or not.
    pub last_error: Option<String>,
    /// Whether the tick stopped early because of cancellation.
    pub cancelled: bool,
}

/// Evaluates targets and tracks per-target scenario history.
#[derive(Debug)]
pub struct Monitor {
    inspector: RepositoryInspector,
    scanner: StyleScanner,
    clock: Arc<dyn TimeSource>,
    tracker: EdgeTracker,
    epoch: u64,
}

impl Monitor {
    /// Create a monitor with no history.
    pub fn new(
        inspector: RepositoryInspector,
        scanner: StyleScanner,
        clock: Arc<dyn TimeSource>,
    ) -> Self {
        Self {
            inspector,
            scanner,
            clock,
            tracker: EdgeTracker::new(),
            epoch: 0,
        }
    }

    /// Evaluate every enabled target once.
    ///
    /// Checks `cancel` before each target and returns what it has so far
    /// when it fires.
    pub fn run_tick(&mut self, active: &ActiveConfig, cancel: &CancellationToken) -> TickOutcome {
        if active.scope_epoch != self.epoch {
            debug!(
                from = self.epoch,
                to = active.scope_epoch,
                "Target scope changed, forgetting history"
            );
            self.tracker.reset();
            self.epoch = active.scope_epoch;
        }

        let targets: Vec<&MonitorTarget> = active.config.enabled_targets().collect();
        // Disabled or removed targets start fresh when they come back.
        self.tracker
            .retain(|source| targets.iter().any(|t| t.path == source));

        let mut outcome = TickOutcome::default();
        for target in targets {
            if cancel.is_cancelled() {
                outcome.cancelled = true;
                break;
            }

            let classification = catch_unwind(AssertUnwindSafe(|| self.evaluate(target, active)))
                .unwrap_or_else(|_| {
                    warn!(source = %target.path, "Target evaluation panicked");
                    Classification::scan_failure(
                        FailureKind::Internal,
                        "evaluation aborted unexpectedly",
                    )
                });
            outcome.evaluated = outcome.evaluated.saturating_add(1);

            if let Finding::ScanFailure { message, .. } = &classification.finding {
                outcome.last_error = Some(format!("{}: {message}", target.path));
            }

            debug!(
                source = %target.path,
                scenario = %classification.kind(),
                "Target classified"
            );

            if let Some(emit) = self.tracker.observe(&target.path, classification) {
                outcome.drafts.push(EventDraft {
                    timestamp: self.clock.now(),
                    finding: emit.finding,
                    source: target.path.clone(),
                    severity: emit.severity,
                    confidence: emit.confidence,
                });
            }
        }
        outcome
    }

    fn evaluate(&self, target: &MonitorTarget, active: &ActiveConfig) -> Classification {
        match target.kind {
            TargetKind::Repo => self.evaluate_repository(Path::new(&target.path), active),
            TargetKind::File => self.evaluate_files(&target.path, active),
        }
    }

    fn evaluate_repository(&self, root: &Path, active: &ActiveConfig) -> Classification {
        let config = &active.config;
        let snapshot = match self.inspector.inspect(root, config) {
            Ok(snapshot) => snapshot,
            Err(e) => return Classification::scan_failure(e.kind(), e.to_string()),
        };

        if let Some(classification) = classify_repository(&snapshot, &config.scenario_thresholds) {
            return classification;
        }

        let mut files = active.rules.check_layout(root);
        for rel in &snapshot.uncommitted_files {
            let path = root.join(rel);
            // Deleted files show up as changes too.
            if !has_extension(&path, &config.scan_extensions) || !path.is_file() {
                continue;
            }
            match self.scanner.scan(&path, &active.rules, config.max_file_bytes) {
                Ok(result) => files.push(FileViolations {
                    path: rel.clone(),
                    violations: result.violations,
                }),
                Err(e) => return Classification::scan_failure(e.kind(), e.to_string()),
            }
        }
        classify_style(files, &config.scenario_thresholds)
    }

    fn evaluate_files(&self, pattern: &str, active: &ActiveConfig) -> Classification {
        let entries = match glob::glob(pattern) {
            Ok(entries) => entries,
            Err(e) => {
                return Classification::scan_failure(
                    FailureKind::InvalidTarget,
                    format!("invalid pattern {pattern}: {e}"),
                );
            }
        };

        let mut matched: Vec<PathBuf> = Vec::new();
        for entry in entries {
            match entry {
                Ok(path) if path.is_file() => matched.push(path),
                Ok(_) => {}
                Err(e) => {
                    return Classification::scan_failure(FailureKind::Unreadable, e.to_string());
                }
            }
        }
        if matched.is_empty() {
            return Classification::scan_failure(
                FailureKind::NotFound,
                format!("no files match {pattern}"),
            );
        }

        let mut files = Vec::with_capacity(matched.len());
        for path in matched {
            match self
                .scanner
                .scan(&path, &active.rules, active.config.max_file_bytes)
            {
                Ok(result) => files.push(FileViolations {
                    path: result.path,
                    violations: result.violations,
                }),
                Err(e) => return Classification::scan_failure(e.kind(), e.to_string()),
            }
        }
        classify_style(files, &active.config.scenario_thresholds)
    }
}

fn has_extension(path: &Path, extensions: &[String]) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| extensions.iter().any(|e| e.trim_start_matches('.') == ext))
}

// ---------------------------------------------------------------------------
// Loop task
// ---------------------------------------------------------------------------

/// Per-tick report handed to a [`TickCallback`].
#[derive(Debug, Clone)]
pub struct TickSummary {
    /// 1-based tick number since the loop started.
    pub tick: u64,
    /// Targets evaluated this tick.
    pub evaluated: usize,
    /// Events appended this tick.
    pub emitted: Vec<InterventionEvent>,
    /// Last scan failure of the tick, if any.
    pub last_error: Option<String>,
}

/// Callback invoked after each tick's events have been appended.
pub trait TickCallback: Send + Sync {
    /// Called once per completed (or cancelled) tick.
    fn on_tick(&self, summary: &TickSummary);
}

/// A tick callback that does nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpCallback;

impl TickCallback for NoOpCallback {
    fn on_tick(&self, _summary: &TickSummary) {}
}

/// Run the intervention loop until `cancel` fires.
///
/// The first tick starts immediately. Configuration is re-read from
/// `config_rx` at every tick boundary, so a new cadence applies to the
/// sleep that follows the next tick, never to the one in progress. The
/// sleep is interrupted only by cancellation.
///
/// Each tick's drafts are appended as one batch stamped with the tick's
/// scope epoch; the store refuses the batch if the targets were replaced
/// in the meantime.
pub async fn run_monitor(
    mut monitor: Monitor,
    mut config_rx: watch::Receiver<Arc<ActiveConfig>>,
    store: Arc<EventStore>,
    callback: Arc<dyn TickCallback>,
    cancel: CancellationToken,
) {
    let mut tick: u64 = 0;
    info!("Monitor loop starting");

    loop {
        if cancel.is_cancelled() {
            break;
        }

        let active: Arc<ActiveConfig> = config_rx.borrow_and_update().clone();
        tick = tick.saturating_add(1);

        let (returned, outcome) =
            match tick_on_blocking_pool(monitor, Arc::clone(&active), cancel.clone()).await {
                Ok(pair) => pair,
                Err(e) => {
                    error!(error = %e, "Monitor tick aborted, stopping loop");
                    callback.on_tick(&TickSummary {
                        tick,
                        evaluated: 0,
                        emitted: Vec::new(),
                        last_error: Some(format!("monitor tick aborted: {e}")),
                    });
                    break;
                }
            };
        monitor = returned;

        let drafted = outcome.drafts.len();
        let emitted = store
            .append_batch(active.scope_epoch, outcome.drafts)
            .await
            .unwrap_or_else(|| {
                debug!(dropped = drafted, "Scope changed during tick");
                Vec::new()
            });
        for event in &emitted {
            info!(
                id = %event.id,
                scenario = %event.scenario(),
                source = %event.source,
                severity = ?event.severity,
                "Intervention event"
            );
        }

        callback.on_tick(&TickSummary {
            tick,
            evaluated: outcome.evaluated,
            emitted,
            last_error: outcome.last_error,
        });

        if outcome.cancelled {
            break;
        }

        tokio::select! {
            () = cancel.cancelled() => break,
            () = tokio::time::sleep(active.poll_interval()) => {}
        }
    }

    info!(ticks = tick, "Monitor loop stopped");
}

/// Run one tick on tokio's blocking pool and hand the monitor back.
async fn tick_on_blocking_pool(
    mut monitor: Monitor,
    active: Arc<ActiveConfig>,
    cancel: CancellationToken,
) -> Result<(Monitor, TickOutcome), JoinError> {
    tokio::task::spawn_blocking(move || {
        let outcome = monitor.run_tick(&active, &cancel);
        (monitor, outcome)
    })
    .await
}

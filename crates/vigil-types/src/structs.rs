//! Core record types: targets, snapshots, scan results, and events.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::enums::{FailureKind, ScenarioKind, Severity, TargetKind};
use crate::ids::EventId;

// ---------------------------------------------------------------------------
// Targets
// ---------------------------------------------------------------------------

/// A repository or file glob under watch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonitorTarget {
    /// Repository root, file path, or glob pattern.
    pub path: String,
    /// Whether `path` names a repository or files.
    pub kind: TargetKind,
    /// Disabled targets stay configured but are skipped every tick.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

impl MonitorTarget {
    /// Create an enabled repository target.
    pub fn repo(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            kind: TargetKind::Repo,
            enabled: true,
        }
    }

    /// Create an enabled file (or glob) target.
    pub fn file(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            kind: TargetKind::File,
            enabled: true,
        }
    }
}

const fn default_enabled() -> bool {
    true
}

// ---------------------------------------------------------------------------
// Inspection and scanning results
// ---------------------------------------------------------------------------

/// Point-in-time view of one repository's working tree.
///
/// Produced and discarded every tick; only the events derived from it are
/// retained.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositorySnapshot {
    /// Modified, staged, or untracked paths, relative to the repository root.
    pub uncommitted_files: Vec<String>,
    /// Number of entries in `uncommitted_files`.
    pub uncommitted_file_count: usize,
    /// When `HEAD` was committed; `None` for a repository without commits.
    pub last_commit_at: Option<DateTime<Utc>>,
    /// Seconds between `last_commit_at` and the inspection instant.
    pub last_commit_age_seconds: Option<i64>,
    /// Whether any working-tree file contains a complete conflict block.
    pub has_conflict_markers: bool,
    /// Files containing conflict blocks, relative to the repository root.
    pub conflicted_files: Vec<String>,
}

/// A single style rule hit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Violation {
    /// 1-based line number.
    pub line: usize,
    /// 1-based column, counted in characters.
    pub column: usize,
    /// Id of the rule that fired.
    pub rule_id: String,
    /// Human-readable explanation.
    pub message: String,
}

/// Outcome of scanning one file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanResult {
    /// The scanned file.
    pub path: String,
    /// Violations ordered by line, then rule id, then column.
    pub violations: Vec<Violation>,
    /// Number of rules that were applied.
    pub rule_count: usize,
    /// Wall time spent scanning, in milliseconds.
    pub elapsed_ms: u64,
}

impl ScanResult {
    /// A clean result is not an error: it means no rule fired.
    pub fn is_clean(&self) -> bool {
        self.violations.is_empty()
    }
}

/// The violations found in one file of a multi-file target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileViolations {
    /// File path as it was scanned.
    pub path: String,
    /// Violations in reported order.
    pub violations: Vec<Violation>,
}

// ---------------------------------------------------------------------------
// Findings and events
// ---------------------------------------------------------------------------

/// A classified scenario together with its scenario-specific payload.
///
/// Serialized adjacently tagged, so a finding contributes a `scenario`
/// field and a `payload` field to whatever record embeds it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "scenario", content = "payload", rename_all = "snake_case")]
pub enum Finding {
    /// Conflict markers found in the working tree.
    MergeConflict {
        /// Files containing conflict blocks.
        conflicted_files: Vec<String>,
    },
    /// Uncommitted work has been sitting longer than the drift threshold.
    UncommittedDrift {
        /// The uncommitted paths.
        uncommitted_files: Vec<String>,
        /// Seconds since the last commit.
        last_commit_age_seconds: i64,
    },
    /// Nothing committed or pending for longer than the stale threshold.
    StaleBranch {
        /// Seconds since the last commit.
        last_commit_age_seconds: i64,
    },
    /// Style rules fired on one or more files.
    StyleViolation {
        /// Total violations across all files.
        violation_count: usize,
        /// Per-file violations.
        files: Vec<FileViolations>,
    },
    /// No findings.
    CleanState {
        /// The scenario this clean state resolves, when there was one.
        resolved: Option<ScenarioKind>,
    },
    /// The target could not be evaluated this tick.
    ScanFailure {
        /// Error category.
        error_kind: FailureKind,
        /// Error detail.
        message: String,
    },
}

impl Finding {
    /// The scenario kind this finding belongs to.
    pub const fn kind(&self) -> ScenarioKind {
        match self {
            Self::MergeConflict { .. } => ScenarioKind::MergeConflict,
            Self::UncommittedDrift { .. } => ScenarioKind::UncommittedDrift,
            Self::StaleBranch { .. } => ScenarioKind::StaleBranch,
            Self::StyleViolation { .. } => ScenarioKind::StyleViolation,
            Self::CleanState { .. } => ScenarioKind::CleanState,
            Self::ScanFailure { .. } => ScenarioKind::ScanFailure,
        }
    }
}

/// An immutable intervention record.
///
/// Only the event store constructs these, assigning `id` on append.
/// Serializes to `{id, timestamp, scenario, payload, source, severity,
/// confidence}` with the timestamp in RFC 3339 UTC (`Z` suffix).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterventionEvent {
    /// Monotonic sequence number.
    pub id: EventId,
    /// When the finding was classified.
    pub timestamp: DateTime<Utc>,
    /// Scenario kind and payload.
    #[serde(flatten)]
    pub finding: Finding,
    /// The target path (repository root, file, or glob) that produced it.
    pub source: String,
    /// Urgency.
    pub severity: Severity,
    /// Classifier confidence in `0.0..=1.0`, when meaningful.
    pub confidence: Option<f64>,
}

impl InterventionEvent {
    /// Shorthand for `self.finding.kind()`.
    pub const fn scenario(&self) -> ScenarioKind {
        self.finding.kind()
    }
}

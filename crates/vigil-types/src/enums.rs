//! Enumeration types for the Vigil intervention engine.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Scenarios
// ---------------------------------------------------------------------------

/// The six classified intervention conditions.
///
/// Declaration order is the classification precedence for repository
/// targets: a merge conflict outranks drift, drift outranks a stale
/// branch, and so on. [`ScanFailure`](Self::ScanFailure) sits outside the
/// precedence chain because it replaces classification entirely.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScenarioKind {
    /// Unresolved merge-conflict markers in the working tree.
    MergeConflict,
    /// Uncommitted changes older than the drift threshold.
    UncommittedDrift,
    /// No uncommitted work and no commit for longer than the stale threshold.
    StaleBranch,
    /// Style rules reported at least one violation.
    StyleViolation,
    /// Nothing to report.
    CleanState,
    /// The target could not be inspected or scanned.
    ScanFailure,
}

impl ScenarioKind {
    /// Every scenario kind, in precedence order.
    pub const ALL: [Self; 6] = [
        Self::MergeConflict,
        Self::UncommittedDrift,
        Self::StaleBranch,
        Self::StyleViolation,
        Self::CleanState,
        Self::ScanFailure,
    ];

    /// Stable snake-case name, identical to the serialized form.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::MergeConflict => "merge_conflict",
            Self::UncommittedDrift => "uncommitted_drift",
            Self::StaleBranch => "stale_branch",
            Self::StyleViolation => "style_violation",
            Self::CleanState => "clean_state",
            Self::ScanFailure => "scan_failure",
        }
    }
}

impl core::fmt::Display for ScenarioKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How urgently a host should react to an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Informational; no action expected.
    Info,
    /// Something is off but not blocking.
    Warn,
    /// Immediate attention required.
    Critical,
}

/// Why a target could not be evaluated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The path is not a repository root, or a glob matched nothing.
    NotFound,
    /// Permission or I/O failure while reading.
    Unreadable,
    /// A file exceeded the configured scan ceiling.
    TooLarge,
    /// The target definition itself is malformed (e.g. a bad glob).
    InvalidTarget,
    /// Evaluation aborted unexpectedly.
    Internal,
}

// ---------------------------------------------------------------------------
// Targets and engine lifecycle
// ---------------------------------------------------------------------------

/// What a monitor target points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetKind {
    /// A git repository root.
    Repo,
    /// A file path or glob pattern.
    File,
}

/// Lifecycle status of the engine.
///
/// Statuses form the closed cycle
/// `Stopped -> Starting -> Running -> Stopping -> Stopped`; see
/// [`EngineStatus::next`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineStatus {
    /// No loop is running.
    Stopped,
    /// The loop is being spawned.
    Starting,
    /// The loop is ticking.
    Running,
    /// The loop has been asked to exit and is finishing its current step.
    Stopping,
}

impl EngineStatus {
    /// The only status this one may transition to.
    #[must_use]
    pub const fn next(self) -> Self {
        match self {
            Self::Stopped => Self::Starting,
            Self::Starting => Self::Running,
            Self::Running => Self::Stopping,
            Self::Stopping => Self::Stopped,
        }
    }

    /// Whether a loop exists or is being created.
    pub const fn is_active(self) -> bool {
        matches!(self, Self::Starting | Self::Running)
    }
}

impl core::fmt::Display for EngineStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let name = match self {
            Self::Stopped => "stopped",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Stopping => "stopping",
        };
        f.write_str(name)
    }
}

//! Scenario classification and edge triggering.
//!
//! Classification is a pure function of a target's evaluation results.
//! For repositories the precedence is fixed: merge conflict, uncommitted
//! drift, stale branch, style violation, clean state. The first match
//! wins. Style scanning is only worth doing when nothing above it
//! matched, so classification is split in two:
//! [`classify_repository`] decides the ref-state scenarios and
//! [`classify_style`] decides between a style violation and a clean state.
//!
//! [`EdgeTracker`] turns a stream of per-tick classifications into a
//! stream of transitions: a target only produces an event when its
//! scenario differs from the last one emitted for it.

use std::collections::BTreeMap;

use vigil_types::{
    FailureKind, FileViolations, Finding, RepositorySnapshot, ScenarioKind, Severity,
};

use crate::config::ScenarioThresholds;

/// Lower bound for the confidence of a time-based scenario that has just
/// crossed its threshold.
const OVERDUE_BASE_CONFIDENCE: f64 = 0.5;

/// A classified finding with its urgency.
#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    /// Scenario kind and payload.
    pub finding: Finding,
    /// Urgency.
    pub severity: Severity,
    /// Classifier confidence in `0.0..=1.0`; `None` for failures.
    pub confidence: Option<f64>,
}

impl Classification {
    /// Shorthand for `self.finding.kind()`.
    pub const fn kind(&self) -> ScenarioKind {
        self.finding.kind()
    }

    /// A failure that replaced classification for this tick.
    pub fn scan_failure(error_kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            finding: Finding::ScanFailure {
                error_kind,
                message: message.into(),
            },
            severity: Severity::Warn,
            confidence: None,
        }
    }

    fn clean() -> Self {
        Self {
            finding: Finding::CleanState { resolved: None },
            severity: Severity::Info,
            confidence: Some(1.0),
        }
    }
}

/// Classify the ref-state scenarios of a repository snapshot.
///
/// Returns `None` when no conflict, drift, or stale condition holds; the
/// caller then decides between style and clean with [`classify_style`].
/// Ages are compared strictly: a commit exactly `drift_after_seconds` old
/// is not drift. A repository without commits is never drifting or stale.
pub fn classify_repository(
    snapshot: &RepositorySnapshot,
    thresholds: &ScenarioThresholds,
) -> Option<Classification> {
    if snapshot.has_conflict_markers {
        return Some(Classification {
            finding: Finding::MergeConflict {
                conflicted_files: snapshot.conflicted_files.clone(),
            },
            severity: Severity::Critical,
            confidence: Some(1.0),
        });
    }

    let age = snapshot.last_commit_age_seconds?;

    if snapshot.uncommitted_file_count > 0 && age > thresholds.drift_after_seconds {
        return Some(Classification {
            finding: Finding::UncommittedDrift {
                uncommitted_files: snapshot.uncommitted_files.clone(),
                last_commit_age_seconds: age,
            },
            severity: Severity::Warn,
            confidence: Some(overdue_confidence(age, thresholds.drift_after_seconds)),
        });
    }

    if snapshot.uncommitted_file_count == 0 && age > thresholds.stale_after_seconds {
        return Some(Classification {
            finding: Finding::StaleBranch {
                last_commit_age_seconds: age,
            },
            severity: Severity::Info,
            confidence: Some(overdue_confidence(age, thresholds.stale_after_seconds)),
        });
    }

    None
}

/// Classify style results: a violation when any file has one, otherwise a
/// clean state.
///
/// Files without violations are dropped from the payload. Severity becomes
/// critical once the total reaches `style_critical_count`.
pub fn classify_style(files: Vec<FileViolations>, thresholds: &ScenarioThresholds) -> Classification {
    let files: Vec<FileViolations> = files
        .into_iter()
        .filter(|f| !f.violations.is_empty())
        .collect();
    let violation_count = files
        .iter()
        .fold(0_usize, |acc, f| acc.saturating_add(f.violations.len()));

    if violation_count == 0 {
        return Classification::clean();
    }

    let severity = if violation_count < thresholds.style_critical_count {
        Severity::Warn
    } else {
        Severity::Critical
    };
    Classification {
        finding: Finding::StyleViolation {
            violation_count,
            files,
        },
        severity,
        confidence: Some(1.0),
    }
}

/// Confidence for a time-based scenario: 0.5 right past the threshold,
/// rising linearly to 1.0 at twice the threshold.
#[allow(clippy::cast_precision_loss)]
fn overdue_confidence(age: i64, threshold: i64) -> f64 {
    if threshold <= 0 {
        return 1.0;
    }
    let overshoot = (age as f64 / threshold as f64) - 1.0;
    OVERDUE_BASE_CONFIDENCE + (1.0 - OVERDUE_BASE_CONFIDENCE) * overshoot.clamp(0.0, 1.0)
}

// ---------------------------------------------------------------------------
// Edge triggering
// ---------------------------------------------------------------------------

/// Remembers the last scenario emitted for each target.
///
/// Comparison is by scenario kind only: a drift event whose file list grew
/// is still the same drift and stays silent.
#[derive(Debug, Clone, Default)]
pub struct EdgeTracker {
    last: BTreeMap<String, ScenarioKind>,
}

impl EdgeTracker {
    /// Create a tracker with no history.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `classification` for `source` and return it if it should be
    /// emitted.
    ///
    /// The first observation of a target always emits. A clean state that
    /// follows another scenario names that scenario in `resolved`.
    pub fn observe(&mut self, source: &str, mut classification: Classification) -> Option<Classification> {
        let kind = classification.kind();
        match self.last.insert(source.to_owned(), kind) {
            Some(previous) if previous == kind => None,
            Some(previous) => {
                if let Finding::CleanState { resolved } = &mut classification.finding {
                    *resolved = Some(previous);
                }
                Some(classification)
            }
            None => Some(classification),
        }
    }

    /// The last scenario emitted for `source`.
    #[cfg(test)]
    fn last(&self, source: &str) -> Option<ScenarioKind> {
        self.last.get(source).copied()
    }

    /// Forget every target for which `keep` returns false.
    pub fn retain(&mut self, mut keep: impl FnMut(&str) -> bool) {
        self.last.retain(|source, _| keep(source));
    }

    /// Forget every target.
    pub fn reset(&mut self) {
        self.last.clear();
    }

    /// Number of remembered targets.
    #[cfg(test)]
    fn len(&self) -> usize {
        self.last.len()
    }

    /// Whether no target is remembered.
    #[cfg(test)]
    fn is_empty(&self) -> bool {
        self.last.is_empty()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use vigil_types::Violation;

    use super::*;

    fn snapshot(uncommitted: usize, age: Option<i64>, conflicts: &[&str]) -> RepositorySnapshot {
        let uncommitted_files: Vec<String> = (0..uncommitted).map(|i| format!("f{i}.py")).collect();
        RepositorySnapshot {
            uncommitted_file_count: uncommitted_files.len(),
            uncommitted_files,
            last_commit_at: None,
            last_commit_age_seconds: age,
            has_conflict_markers: !conflicts.is_empty(),
            conflicted_files: conflicts.iter().map(|s| (*s).to_owned()).collect(),
        }
    }

    fn file_with(n: usize) -> FileViolations {
        FileViolations {
            path: "a.py".to_owned(),
            violations: (0..n)
                .map(|i| Violation {
                    line: i.saturating_add(1),
                    column: 1,
                    rule_id: "trailing_whitespace".to_owned(),
                    message: "trailing whitespace".to_owned(),
                })
                .collect(),
        }
    }

    #[test]
    fn conflict_outranks_everything() {
        let t = ScenarioThresholds::default();
        let snap = snapshot(3, Some(t.stale_after_seconds * 2), &["src/lib.rs"]);
        let c = classify_repository(&snap, &t).unwrap();
        assert_eq!(c.kind(), ScenarioKind::MergeConflict);
        assert_eq!(c.severity, Severity::Critical);
    }

    #[test]
    fn drift_requires_strictly_older_commit() {
        let t = ScenarioThresholds::default();
        assert!(classify_repository(&snapshot(1, Some(t.drift_after_seconds), &[]), &t).is_none());
        let c = classify_repository(&snapshot(1, Some(t.drift_after_seconds + 1), &[]), &t).unwrap();
        assert_eq!(c.kind(), ScenarioKind::UncommittedDrift);
        assert_eq!(c.severity, Severity::Warn);
        let confidence = c.confidence.unwrap();
        assert!((0.5..=1.0).contains(&confidence));
    }

    #[test]
    fn stale_only_without_uncommitted_work() {
        let t = ScenarioThresholds::default();
        let old = Some(t.stale_after_seconds + 10);
        let stale = classify_repository(&snapshot(0, old, &[]), &t).unwrap();
        assert_eq!(stale.kind(), ScenarioKind::StaleBranch);
        // With pending work the same age is drift, not stale.
        let drift = classify_repository(&snapshot(2, old, &[]), &t).unwrap();
        assert_eq!(drift.kind(), ScenarioKind::UncommittedDrift);
    }

    #[test]
    fn no_commits_never_time_out() {
        let t = ScenarioThresholds::default();
        assert!(classify_repository(&snapshot(5, None, &[]), &t).is_none());
    }

    #[test]
    fn overdue_confidence_saturates() {
        assert!((overdue_confidence(100, 100) - 0.5).abs() < f64::EPSILON);
        assert!((overdue_confidence(150, 100) - 0.75).abs() < f64::EPSILON);
        assert!((overdue_confidence(1000, 100) - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn style_severity_escalates_at_ceiling() {
        let t = ScenarioThresholds {
            style_critical_count: 3,
            ..ScenarioThresholds::default()
        };
        assert_eq!(classify_style(vec![file_with(2)], &t).severity, Severity::Warn);
        assert_eq!(classify_style(vec![file_with(3)], &t).severity, Severity::Critical);
    }

    #[test]
    fn no_violations_is_clean() {
        let t = ScenarioThresholds::default();
        let c = classify_style(vec![file_with(0)], &t);
        assert_eq!(c.kind(), ScenarioKind::CleanState);
        assert_eq!(c.severity, Severity::Info);
    }

    #[test]
    fn style_payload_drops_clean_files() {
        let t = ScenarioThresholds::default();
        let c = classify_style(vec![file_with(0), file_with(2)], &t);
        match c.finding {
            Finding::StyleViolation {
                violation_count,
                files,
            } => {
                assert_eq!(violation_count, 2);
                assert_eq!(files.len(), 1);
            }
            other => assert_eq!(other.kind(), ScenarioKind::StyleViolation),
        }
    }

    #[test]
    fn tracker_emits_only_on_change() {
        let t = ScenarioThresholds::default();
        let mut tracker = EdgeTracker::new();
        let conflict = classify_repository(&snapshot(0, None, &["a"]), &t).unwrap();

        assert!(tracker.observe("/repo", conflict.clone()).is_some());
        for _ in 0..5 {
            assert!(tracker.observe("/repo", conflict.clone()).is_none());
        }

        let resolved = tracker.observe("/repo", classify_style(Vec::new(), &t)).unwrap();
        assert_eq!(
            resolved.finding,
            Finding::CleanState {
                resolved: Some(ScenarioKind::MergeConflict)
            }
        );
        assert!(tracker.observe("/repo", classify_style(Vec::new(), &t)).is_none());
    }

    #[test]
    fn first_observation_of_clean_target_emits() {
        let t = ScenarioThresholds::default();
        let mut tracker = EdgeTracker::new();
        let first = tracker.observe("/new", classify_style(Vec::new(), &t)).unwrap();
        assert_eq!(first.finding, Finding::CleanState { resolved: None });
    }

    #[test]
    fn retain_and_reset_forget_targets() {
        let t = ScenarioThresholds::default();
        let mut tracker = EdgeTracker::new();
        tracker.observe("/a", classify_style(Vec::new(), &t));
        tracker.observe("/b", classify_style(Vec::new(), &t));
        tracker.retain(|s| s == "/a");
        assert_eq!(tracker.len(), 1);
        assert_eq!(tracker.last("/a"), Some(ScenarioKind::CleanState));
        tracker.reset();
        assert!(tracker.is_empty());
    }
}

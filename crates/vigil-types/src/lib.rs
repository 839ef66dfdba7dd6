//! Shared type definitions for the Vigil intervention engine.
//!
//! This crate is the single source of truth for the records that flow
//! between the monitor loop, the event store, and the host platform that
//! consumes intervention events.
//!
//! # Modules
//!
//! - [`ids`] -- Monotonic event identifier
//! - [`enums`] -- Scenario kinds, severities, target kinds, engine status
//! - [`structs`] -- Events, findings, snapshots, and scan results

pub mod enums;
pub mod ids;
pub mod structs;

// Re-export all public types at crate root for convenience.
pub use enums::{EngineStatus, FailureKind, ScenarioKind, Severity, TargetKind};
pub use ids::EventId;
pub use structs::{
    FileViolations, Finding, InterventionEvent, MonitorTarget, RepositorySnapshot, ScanResult,
    Violation,
};

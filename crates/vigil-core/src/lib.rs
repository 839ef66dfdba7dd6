//! Repository inspection, style scanning, and the intervention loop.
//!
//! This crate watches local git repositories and source files, classifies
//! what it sees into one of six scenarios, and records the transitions as
//! intervention events for a host platform to act on.
//!
//! # Modules
//!
//! - [`clock`] -- [`TimeSource`] trait, wall and manual clocks.
//! - [`config`] -- Configuration loading from `vigil-config.yaml` and
//!   key/value reconfiguration.
//! - [`inspector`] -- Read-only repository snapshots and the [`RefReader`]
//!   seam over `git`.
//! - [`scanner`] -- The fixed style rule catalogue and file scanner.
//! - [`store`] -- Bounded, insertion-ordered event log.
//! - [`scenario`] -- Scenario precedence and edge triggering.
//! - [`monitor`] -- Per-tick evaluation and the loop task.
//! - [`controller`] -- [`EngineController`], the public control surface.
//!
//! [`TimeSource`]: clock::TimeSource
//! [`RefReader`]: inspector::RefReader
//! [`EngineController`]: controller::EngineController

pub mod clock;
pub mod config;
pub mod controller;
pub mod inspector;
pub mod monitor;
pub mod scanner;
pub mod scenario;
pub mod store;

pub use controller::{EngineController, EngineError, EngineState, StatusReport};

//! Error types for the Vigil host binary.
//!
//! [`HostError`] is the top-level error type that wraps every failure mode
//! during startup, the run, and shutdown.

/// Top-level error for the host binary.
///
/// Each variant wraps a specific subsystem error, providing a single
/// error type that `main` can propagate with `?`.
#[derive(Debug, thiserror::Error)]
pub enum HostError {
    /// Configuration loading or validation failed.
    #[error("config error: {source}")]
    Config {
        /// The underlying config error.
        #[from]
        source: vigil_core::config::ConfigError,
    },

    /// Starting or stopping the engine failed.
    #[error("engine error: {source}")]
    Engine {
        /// The underlying lifecycle error.
        #[from]
        source: vigil_core::EngineError,
    },

    /// Waiting for the shutdown signal failed.
    #[error("signal error: {source}")]
    Signal {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// The final status could not be rendered.
    #[error("status error: {source}")]
    Status {
        /// The underlying serialization error.
        #[from]
        source: serde_json::Error,
    },
}

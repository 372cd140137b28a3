//! # Pipeline Error Types
//!
//! Error types for catalog fetch, rendering glue, dispatch and configuration.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                     Pipeline Error Categories                           │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │  Configuration  │  │   Source        │  │     Dispatch            │ │
//! │  │   (FATAL)       │  │  (recovered)    │  │   (per-terminal)        │ │
//! │  │                 │  │                 │  │                         │ │
//! │  │  InvalidConfig  │  │  no variants:   │  │  Unreachable            │ │
//! │  │  ConfigLoad     │  │  sources report │  │  TransferFailed         │ │
//! │  │  UnknownSource  │  │  zero products  │  │  PhaseTimeout           │ │
//! │  │                 │  │  with a reason  │  │  (recorded, never       │ │
//! │  │                 │  │                 │  │   propagated)           │ │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────┘ │
//! │                                                                         │
//! │  Only configuration faults are fatal to a cycle. Data-level and        │
//! │  network-level faults are caught, recorded in the delivery history,    │
//! │  and surfaced through the log surface.                                 │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use thiserror::Error;

use pricenet_core::CoreError;

/// Result type alias for pipeline operations.
pub type PipelineResult<T> = Result<T, PipelineError>;

/// Pipeline error type.
#[derive(Debug, Error)]
pub enum PipelineError {
    // =========================================================================
    // Configuration Errors (fatal)
    // =========================================================================
    /// Invalid pipeline configuration.
    #[error("Invalid pipeline configuration: {0}")]
    InvalidConfig(String),

    /// Failed to load the config document.
    #[error("Failed to load config: {0}")]
    ConfigLoadFailed(String),

    // =========================================================================
    // Dispatch Errors (per-terminal, recorded not propagated)
    // =========================================================================
    /// Terminal reachability probe failed.
    #[error("Terminal unreachable: {0}")]
    Unreachable(String),

    /// Transfer to a reachable terminal failed.
    #[error("Transfer failed: {0}")]
    TransferFailed(String),

    /// The whole dispatch phase hit its deadline.
    #[error("Dispatch phase timed out after {0} seconds")]
    PhaseTimeout(u64),

    // =========================================================================
    // Downstream
    // =========================================================================
    /// History export or other file I/O failed.
    #[error("I/O error: {0}")]
    Io(String),
}

// =============================================================================
// Error Conversions
// =============================================================================

impl From<CoreError> for PipelineError {
    fn from(err: CoreError) -> Self {
        // Layout and field errors can only come from configuration.
        PipelineError::InvalidConfig(err.to_string())
    }
}

impl From<std::io::Error> for PipelineError {
    fn from(err: std::io::Error) -> Self {
        PipelineError::Io(err.to_string())
    }
}

impl From<toml::de::Error> for PipelineError {
    fn from(err: toml::de::Error) -> Self {
        PipelineError::ConfigLoadFailed(err.to_string())
    }
}

impl From<serde_json::Error> for PipelineError {
    fn from(err: serde_json::Error) -> Self {
        PipelineError::Io(err.to_string())
    }
}

// =============================================================================
// Error Categorization
// =============================================================================

impl PipelineError {
    /// Returns true if this error is a configuration fault.
    ///
    /// Configuration faults are the only class fatal to a cycle; everything
    /// else is recorded and the pipeline carries on.
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            PipelineError::InvalidConfig(_) | PipelineError::ConfigLoadFailed(_)
        )
    }

    /// Returns true if this error is scoped to a single terminal's attempt.
    pub fn is_terminal_error(&self) -> bool {
        matches!(
            self,
            PipelineError::Unreachable(_) | PipelineError::TransferFailed(_)
        )
    }
}

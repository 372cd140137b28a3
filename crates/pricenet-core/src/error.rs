//! # Error Types
//!
//! Domain-specific error types for pricenet-core.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  pricenet-core errors (this file)                                      │
//! │  └── CoreError        - Domain rule violations                         │
//! │                                                                         │
//! │  pricenet-registry errors (separate crate)                             │
//! │  └── RegistryError    - Database operation failures                    │
//! │                                                                         │
//! │  pricenet-pipeline errors (separate crate)                             │
//! │  └── PipelineError    - Source / dispatch / config failures            │
//! │                                                                         │
//! │  Flow: CoreError → RegistryError / PipelineError → log surface         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use thiserror::Error;

/// Domain logic errors.
///
/// These represent rule violations inside the pure core. I/O-level failures
/// live in the registry and pipeline crates.
#[derive(Debug, Error)]
pub enum CoreError {
    /// An identifier was empty after normalization.
    ///
    /// Raised at write boundaries: an agent or device reported with a
    /// blank/whitespace-only identifier can never become a registry key.
    #[error("Empty identifier after normalization: {0:?}")]
    EmptyIdentifier(String),

    /// A render layout referenced a field the product model does not have.
    #[error("Unknown price file field: {0:?}")]
    UnknownField(String),

    /// A render layout was structurally unusable.
    #[error("Invalid render layout: {0}")]
    InvalidLayout(String),

    /// A delimited line did not match the configured layout.
    #[error("Row has {actual} fields, layout expects {expected}")]
    FieldCountMismatch { expected: usize, actual: usize },

    /// A price value could not be interpreted.
    #[error("Unparseable price value: {0:?}")]
    InvalidPrice(String),
}

/// Result type alias for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

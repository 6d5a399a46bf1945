//! Structured error types for host operations.

use thiserror::Error;

/// Errors reported by the [`Loader`](crate::loader::Loader) and its control
/// surface.
///
/// Every failure in this crate is reported to the caller; none of these
/// conditions terminate the process. Plugin errors (constructor and
/// initialization failures) are caught at the loader boundary and carried
/// here as strings rather than propagated as panics.
#[derive(Debug, Error)]
pub enum HostError {
    #[error("a component named '{name}' is already loaded")]
    DuplicateName { name: String },

    #[error("no component type '{type_name}' is registered")]
    UnknownType { type_name: String },

    #[error("failed to construct component of type '{type_name}': {reason}")]
    InstantiationFailed { type_name: String, reason: String },

    #[error("component '{name}' failed to initialize: {reason}")]
    InitializationFailed { name: String, reason: String },

    #[error("no component named '{name}' is loaded")]
    NotFound { name: String },

    #[error("control server error: {0}")]
    Control(#[from] crate::control::ControlServerError),
}

pub type Result<T> = std::result::Result<T, HostError>;

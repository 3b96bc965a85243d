//! Central error types for the pipeline (thiserror-based).
//!
//! Only failures that surface synchronously to the caller live here.
//! Fatal hardware error events and contract violations are not values:
//! the first aborts the process, the second panics.

use thiserror::Error;

use crate::buffer::BufferId;
use crate::types::{Command, ComponentRole, PortIndex};

/// Top-level pipeline error.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Component error: {0}")]
    Component(#[from] ComponentError),

    #[error("Render target error: {0}")]
    Surface(#[from] SurfaceError),

    #[error("Buffer pool error: {0}")]
    Pool(#[from] PoolError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Byte stream error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors reported synchronously by a hardware component.
#[derive(Error, Debug)]
pub enum ComponentError {
    #[error("Component {name} unavailable: {reason}")]
    Unavailable { name: String, reason: String },

    #[error("{role} rejected command {command}: {reason}")]
    CommandRejected {
        role: ComponentRole,
        command: Command,
        reason: String,
    },

    #[error("{role} parameter {param} failed: {reason}")]
    Parameter {
        role: ComponentRole,
        param: String,
        reason: String,
    },

    #[error("{role} returned an unexpected parameter block, expected {expected}")]
    UnexpectedParameter {
        role: ComponentRole,
        expected: &'static str,
    },

    #[error("{role} buffer operation on {port} failed: {reason}")]
    Buffer {
        role: ComponentRole,
        port: PortIndex,
        reason: String,
    },

    #[error("Tunnel setup failed: {0}")]
    Tunnel(String),
}

/// Errors from the render-target collaborator.
#[derive(Error, Debug)]
pub enum SurfaceError {
    #[error("Render target image creation failed ({width}x{height}): {reason}")]
    CreateFailed {
        width: u32,
        height: u32,
        reason: String,
    },
}

/// Buffer pool bookkeeping violations.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum PoolError {
    #[error("Buffer identity {id} out of range (pool holds {count} buffers)")]
    OutOfRange { id: BufferId, count: usize },

    #[error("Buffer {0} is not in flight")]
    NotInFlight(BufferId),
}

/// Invalid configuration values.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("{field} must be non-zero")]
    Zero { field: &'static str },

    #[error("Input buffer size {size} is below the minimum chunk size {min_chunk}")]
    BufferTooSmall { size: usize, min_chunk: usize },

    #[error("Component name for the {0} must not be empty")]
    EmptyComponentName(ComponentRole),
}

/// Convenience Result type for pipeline operations.
pub type PipelineResult<T> = Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn component_error_converts_into_pipeline_error() {
        let err: PipelineError = ComponentError::Tunnel("no route".into()).into();
        assert!(matches!(err, PipelineError::Component(_)));
        assert_eq!(err.to_string(), "Component error: Tunnel setup failed: no route");
    }

    #[test]
    fn command_rejection_message() {
        let err = ComponentError::CommandRejected {
            role: ComponentRole::Decoder,
            command: Command::PortEnable(PortIndex(320)),
            reason: "bad state".into(),
        };
        assert_eq!(
            err.to_string(),
            "decoder rejected command PortEnable(320): bad state"
        );
    }

    #[test]
    fn pool_error_message() {
        assert_eq!(
            PoolError::NotInFlight(BufferId(1)).to_string(),
            "Buffer #1 is not in flight"
        );
    }
}

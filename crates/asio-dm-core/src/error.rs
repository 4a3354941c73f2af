//! Error types for ASIO-DM core.

use std::path::PathBuf;

use thiserror::Error;

use crate::driver::DriverState;

/// Core error type for ASIO-DM operations.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Invalid CLSID: {0}")]
    InvalidClsid(String),

    #[error("Driver module not found: {0}")]
    DriverPathMissing(PathBuf),

    #[error("Invalid state transition: {from:?} -> {to:?}")]
    InvalidTransition { from: DriverState, to: DriverState },

    #[error("Original future() pointer already captured at {0:#018x}")]
    OriginalAlreadyCaptured(usize),
}

/// Result type alias for ASIO-DM core operations.
pub type CoreResult<T> = std::result::Result<T, CoreError>;

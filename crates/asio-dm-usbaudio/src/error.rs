//! USB audio error types.

use std::path::PathBuf;

use asio_dm_core::FailureKind;
use thiserror::Error;

use crate::api::ApiStatus;

/// USB audio error type.
#[derive(Debug, Error)]
pub enum UsbAudioError {
    #[error("Driver module does not follow the vendor naming convention: {0}")]
    NamingConvention(String),

    #[error("Control API library not found: {0}")]
    ApiLibraryMissing(PathBuf),

    #[error("Failed to load control API library {path}: {reason}")]
    LoadFailed { path: PathBuf, reason: String },

    #[error("Control API entry point not found: {0}")]
    EntryPointMissing(&'static str),

    #[error("{call} failed with status {status}")]
    Api { call: &'static str, status: ApiStatus },

    #[error("No device is open")]
    DeviceNotOpen,

    #[error("Device properties too short: {0} bytes")]
    PropertiesTruncated(usize),
}

impl UsbAudioError {
    /// Classify the error for status reporting.
    #[must_use]
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::NamingConvention(_) => FailureKind::ClassificationFailure,
            _ => FailureKind::ResourceUnavailable,
        }
    }
}

/// Result type for USB audio operations.
pub type UsbAudioResult<T> = Result<T, UsbAudioError>;

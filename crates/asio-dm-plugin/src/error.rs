//! Plugin error types.

use asio_dm_core::FailureKind;
use asio_dm_usbaudio::UsbAudioError;
use thiserror::Error;

/// Why a vendor probe rejected a driver.
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("Driver module does not follow the vendor naming convention: {0}")]
    NamingConvention(String),

    #[error(transparent)]
    UsbAudio(#[from] UsbAudioError),
}

impl ProbeError {
    /// Classify the rejection for status reporting.
    #[must_use]
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::NamingConvention(_) => FailureKind::ClassificationFailure,
            Self::UsbAudio(e) => e.kind(),
        }
    }
}

/// Result type for vendor probes.
pub type ProbeResult<T> = Result<T, ProbeError>;

//! Hook engine error types.

use std::path::PathBuf;

use asio_dm_core::{Clsid, CoreError, FailureKind};
use thiserror::Error;

/// Hook engine error type.
#[derive(Debug, Error)]
pub enum HookError {
    #[error("Driver is not supported: {0}")]
    Unsupported(FailureKind),

    #[error("Failed to load driver module {path}: {reason}")]
    ModuleLoad { path: PathBuf, reason: String },

    #[error("Driver module does not export {0}")]
    EntryPointMissing(&'static str),

    #[error("DllGetClassObject failed for {clsid}: {code:#010x}")]
    FactoryFailed { clsid: Clsid, code: i32 },

    #[error("CreateInstance failed for {clsid}: {code:#010x}")]
    InstanceFailed { clsid: Clsid, code: i32 },

    #[error("Dispatch table looks corrupt: {0}")]
    AbiCorruption(&'static str),

    #[error("Failed to allocate executable memory: {0}")]
    AllocationFailed(String),

    #[error("Failed to change page protection at {address:#018x}: {reason}")]
    ProtectionFailed { address: usize, reason: String },

    #[error(transparent)]
    Core(#[from] CoreError),
}

impl HookError {
    /// Classify the error for status reporting.
    #[must_use]
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::Unsupported(kind) => *kind,
            Self::ModuleLoad { .. }
            | Self::EntryPointMissing(_)
            | Self::FactoryFailed { .. }
            | Self::InstanceFailed { .. } => FailureKind::ResourceUnavailable,
            Self::AbiCorruption(_) | Self::ProtectionFailed { .. } => FailureKind::AbiCorruption,
            Self::AllocationFailed(_) => FailureKind::AllocationFailure,
            Self::Core(CoreError::OriginalAlreadyCaptured(_)) => FailureKind::AbiCorruption,
            Self::Core(_) => FailureKind::ResourceUnavailable,
        }
    }
}

/// Result type for hook engine operations.
pub type HookResult<T> = Result<T, HookError>;

//! Driver descriptors, records and the per-driver lifecycle.

use std::fmt;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::clsid::Clsid;
use crate::error::{CoreError, CoreResult};

/// One ASIO driver as found in the system registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriverDescriptor {
    /// Display name, e.g. "Audient USB Audio ASIO Driver"
    name: String,
    /// Class id used for both the factory and the interface
    clsid: Clsid,
    /// Lower-cased path of the driver module
    path: PathBuf,
}

impl DriverDescriptor {
    /// Create a descriptor from raw registry values.
    ///
    /// The path is lower-cased and must exist on disk.
    ///
    /// # Errors
    /// Returns an error if the clsid cannot be parsed or the module is missing.
    pub fn new(name: impl Into<String>, clsid: &str, path: impl AsRef<Path>) -> CoreResult<Self> {
        let clsid = clsid.parse()?;
        let path = PathBuf::from(path.as_ref().to_string_lossy().to_lowercase());
        if !path.is_file() {
            return Err(CoreError::DriverPathMissing(path));
        }
        Ok(Self { name: name.into(), clsid, path })
    }

    /// Get the display name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the class id.
    #[must_use]
    pub fn clsid(&self) -> Clsid {
        self.clsid
    }

    /// Get the lower-cased module path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Get the module file name, e.g. "audientusbaudioasio_x64.dll".
    #[must_use]
    pub fn file_name(&self) -> Option<&str> {
        self.path.file_name().and_then(|n| n.to_str())
    }
}

/// Lifecycle of a driver. Transitions only go forward out of `Unknown`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DriverState {
    /// Not (yet) patched; final for unsupported drivers
    #[default]
    Unknown,
    /// `future()` replaced by the emulating handler
    PatchOk,
    /// A patch attempt failed
    PatchFail,
    /// The driver answers `kAsioCanInputMonitor` itself
    Native,
}

impl DriverState {
    /// Human-readable description used in status lines.
    #[must_use]
    pub fn description(self) -> &'static str {
        match self {
            Self::Unknown => "Not supported",
            Self::PatchOk => "Patched OK",
            Self::PatchFail => "Failed to patch",
            Self::Native => "Native kAsioCanInputMonitor support",
        }
    }

    /// Whether the state is final.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Unknown)
    }
}

/// Vendor family a driver was classified as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum VendorTag {
    /// Not classified, unsupported
    #[default]
    Unknown,
    /// Thesycon USB audio class drivers (Audient and others)
    Thesycon,
    /// ASIO4ALL, debug passthrough only
    Asio4All,
}

impl fmt::Display for VendorTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Unknown => "",
            Self::Thesycon => "Thesycon",
            Self::Asio4All => "Asio4All",
        })
    }
}

/// Why a driver ended up unsupported or unpatched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    /// No vendor probe accepted the driver
    ClassificationFailure,
    /// A module, device or API entry point is missing
    ResourceUnavailable,
    /// The dispatch table pointer or slot is null or implausible
    AbiCorruption,
    /// Executable memory for the trampoline could not be obtained
    AllocationFailure,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::ClassificationFailure => "classification failure",
            Self::ResourceUnavailable => "resource unavailable",
            Self::AbiCorruption => "ABI corruption",
            Self::AllocationFailure => "allocation failure",
        })
    }
}

/// Addresses captured while hooking a driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PatchRecord {
    /// Handle of the driver module, kept loaded once patched
    pub module: Option<usize>,
    /// The driver's own `future()`; the only way back to unmodified behavior
    future_original: Option<usize>,
    /// Address of the generated trampoline
    pub trampoline: Option<usize>,
    /// Address of the patched dispatch table slot
    pub slot: Option<usize>,
}

impl PatchRecord {
    /// The captured original `future()` address.
    #[must_use]
    pub fn future_original(&self) -> Option<usize> {
        self.future_original
    }
}

/// Everything known about one driver.
#[derive(Debug, Clone)]
pub struct DriverRecord {
    descriptor: DriverDescriptor,
    vendor: VendorTag,
    state: DriverState,
    failure: Option<FailureKind>,
    patch: PatchRecord,
}

impl DriverRecord {
    /// Create an unclassified record.
    #[must_use]
    pub fn new(descriptor: DriverDescriptor) -> Self {
        Self {
            descriptor,
            vendor: VendorTag::Unknown,
            state: DriverState::Unknown,
            failure: None,
            patch: PatchRecord::default(),
        }
    }

    /// Create a record already tagged with a vendor.
    #[must_use]
    pub fn classified(descriptor: DriverDescriptor, vendor: VendorTag) -> Self {
        Self { vendor, ..Self::new(descriptor) }
    }

    /// Create an unsupported record with the reason classification failed.
    #[must_use]
    pub fn unsupported(descriptor: DriverDescriptor, failure: FailureKind) -> Self {
        Self { failure: Some(failure), ..Self::new(descriptor) }
    }

    #[must_use]
    pub fn descriptor(&self) -> &DriverDescriptor {
        &self.descriptor
    }

    #[must_use]
    pub fn name(&self) -> &str {
        self.descriptor.name()
    }

    #[must_use]
    pub fn vendor(&self) -> VendorTag {
        self.vendor
    }

    #[must_use]
    pub fn state(&self) -> DriverState {
        self.state
    }

    #[must_use]
    pub fn failure(&self) -> Option<FailureKind> {
        self.failure
    }

    #[must_use]
    pub fn patch(&self) -> &PatchRecord {
        &self.patch
    }

    pub fn patch_mut(&mut self) -> &mut PatchRecord {
        &mut self.patch
    }

    /// Move to a terminal state.
    ///
    /// # Errors
    /// Returns an error if the record already left `Unknown`.
    pub fn transition(&mut self, to: DriverState) -> CoreResult<()> {
        if self.state.is_terminal() || !to.is_terminal() {
            return Err(CoreError::InvalidTransition { from: self.state, to });
        }
        debug!(driver = %self.name(), from = ?self.state, ?to, "Driver state transition");
        self.state = to;
        Ok(())
    }

    /// Record why the driver failed.
    pub fn set_failure(&mut self, failure: FailureKind) {
        self.failure = Some(failure);
    }

    /// Capture the original `future()` pointer. It is never overwritten.
    ///
    /// # Errors
    /// Returns an error if a different pointer was captured before.
    pub fn capture_original(&mut self, address: usize) -> CoreResult<usize> {
        match self.patch.future_original {
            Some(existing) if existing != address => {
                Err(CoreError::OriginalAlreadyCaptured(existing))
            }
            Some(existing) => Ok(existing),
            None => {
                self.patch.future_original = Some(address);
                Ok(address)
            }
        }
    }

    /// One-line status, e.g. "Audient USB Audio ASIO Driver = Patched OK (Thesycon)".
    #[must_use]
    pub fn info(&self) -> String {
        format!("{} = {} ({})", self.name(), self.state.description(), self.vendor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::lowercase_tempdir;
    use assert_matches::assert_matches;
    use tempfile::TempDir;

    const CLSID: &str = "{E7E92954-EA17-433A-9142-EE419BE4875C}";

    fn descriptor(dir: &TempDir) -> DriverDescriptor {
        let path = dir.path().join("audientusbaudioasio_x64.dll");
        std::fs::write(&path, b"MZ").expect("Failed to write module");
        DriverDescriptor::new("Audient USB Audio ASIO Driver", CLSID, &path)
            .expect("Failed to build descriptor")
    }

    #[test]
    fn test_descriptor_lowercases_path() {
        let dir = lowercase_tempdir();
        std::fs::write(dir.path().join("asio4all64.dll"), b"MZ").expect("Failed to write module");

        let d = DriverDescriptor::new("ASIO4ALL v2", CLSID, dir.path().join("asio4all64.dll"))
            .expect("Failed to build descriptor");
        assert_eq!(d.file_name(), Some("asio4all64.dll"));
        assert_eq!(d.path().to_string_lossy(), d.path().to_string_lossy().to_lowercase());
    }

    #[test]
    fn test_descriptor_requires_existing_module() {
        let dir = lowercase_tempdir();
        let result = DriverDescriptor::new("Ghost", CLSID, dir.path().join("ghost.dll"));
        assert_matches!(result, Err(CoreError::DriverPathMissing(_)));
    }

    #[test]
    fn test_descriptor_requires_valid_clsid() {
        let dir = lowercase_tempdir();
        std::fs::write(dir.path().join("x.dll"), b"MZ").expect("Failed to write module");
        let result = DriverDescriptor::new("X", "not-a-clsid", dir.path().join("x.dll"));
        assert_matches!(result, Err(CoreError::InvalidClsid(_)));
    }

    #[test]
    fn test_state_only_moves_forward() {
        let dir = lowercase_tempdir();
        let mut record = DriverRecord::classified(descriptor(&dir), VendorTag::Thesycon);

        assert_matches!(
            record.transition(DriverState::Unknown),
            Err(CoreError::InvalidTransition { .. })
        );
        record.transition(DriverState::PatchOk).expect("first transition");
        assert_matches!(
            record.transition(DriverState::PatchFail),
            Err(CoreError::InvalidTransition { from: DriverState::PatchOk, .. })
        );
        assert_eq!(record.state(), DriverState::PatchOk);
    }

    #[test]
    fn test_original_is_write_once() {
        let dir = lowercase_tempdir();
        let mut record = DriverRecord::classified(descriptor(&dir), VendorTag::Thesycon);

        assert_eq!(record.capture_original(0x1000).ok(), Some(0x1000));
        assert_eq!(record.capture_original(0x1000).ok(), Some(0x1000));
        assert_matches!(
            record.capture_original(0x2000),
            Err(CoreError::OriginalAlreadyCaptured(0x1000))
        );
        assert_eq!(record.patch().future_original(), Some(0x1000));
    }

    #[test]
    fn test_info_line() {
        let dir = lowercase_tempdir();
        let mut record = DriverRecord::classified(descriptor(&dir), VendorTag::Thesycon);
        record.transition(DriverState::PatchOk).expect("transition");
        assert_eq!(record.info(), "Audient USB Audio ASIO Driver = Patched OK (Thesycon)");

        let unsupported =
            DriverRecord::unsupported(descriptor(&dir), FailureKind::ClassificationFailure);
        assert_eq!(unsupported.info(), "Audient USB Audio ASIO Driver = Not supported ()");
    }
}

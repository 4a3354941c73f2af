//! Vendor families the activator knows how to drive.

use asio_dm_core::asio::status;
use asio_dm_core::{DriverDescriptor, InputMonitor, MonitorEmulator, VendorTag};
use asio_dm_usbaudio::{ApiLoader, SystemApiLoader, ThesyconDriver};
use tracing::{debug, info};

use crate::error::{ProbeError, ProbeResult};

/// A classified driver with its vendor-specific state.
#[derive(Debug, Default)]
pub enum VendorDriver {
    /// No family matched; only reported, never emulated
    #[default]
    Unknown,
    /// Thesycon USB audio class driver
    Thesycon(ThesyconDriver),
    /// ASIO4ALL, hooked for debugging only
    Asio4All(PassthroughDriver),
}

impl MonitorEmulator for VendorDriver {
    fn vendor(&self) -> VendorTag {
        match self {
            Self::Unknown => VendorTag::Unknown,
            Self::Thesycon(driver) => driver.vendor(),
            Self::Asio4All(driver) => driver.vendor(),
        }
    }

    fn emulate_monitor(&self, request: &InputMonitor) -> i32 {
        match self {
            Self::Unknown => status::NOT_PRESENT,
            Self::Thesycon(driver) => driver.emulate_monitor(request),
            Self::Asio4All(driver) => driver.emulate_monitor(request),
        }
    }
}

/// ASIO4ALL stand-in: proves the hook works on a machine without vendor hardware.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PassthroughDriver;

impl PassthroughDriver {
    /// Module name of the 64-bit ASIO4ALL driver.
    pub const MODULE_NAME: &'static str = "asio4all64.dll";

    /// Accept the driver if it is ASIO4ALL.
    ///
    /// # Errors
    /// Returns an error if the module is not `asio4all64.dll`.
    pub fn try_adopt(descriptor: &DriverDescriptor) -> ProbeResult<Self> {
        match descriptor.file_name() {
            Some(Self::MODULE_NAME) => Ok(Self),
            other => Err(ProbeError::NamingConvention(other.unwrap_or_default().to_string())),
        }
    }
}

impl MonitorEmulator for PassthroughDriver {
    fn vendor(&self) -> VendorTag {
        VendorTag::Asio4All
    }

    fn emulate_monitor(&self, request: &InputMonitor) -> i32 {
        info!(
            input = request.input,
            output = request.output,
            gain = request.gain,
            state = request.state,
            pan = request.pan,
            "Asio4All set input monitor"
        );
        status::NOT_PRESENT
    }
}

/// Checks whether a driver belongs to one vendor family.
pub trait VendorProbe: Send + Sync {
    /// The family this probe recognizes.
    fn vendor(&self) -> VendorTag;

    /// Build the vendor driver, releasing everything it opened on failure.
    ///
    /// # Errors
    /// Returns why the driver does not belong to the family.
    fn try_adopt(&self, descriptor: &DriverDescriptor) -> ProbeResult<VendorDriver>;
}

/// Probe for Thesycon drivers, loading their companion control library.
pub struct ThesyconProbe {
    loader: Box<dyn ApiLoader>,
}

impl ThesyconProbe {
    pub fn new(loader: impl ApiLoader + 'static) -> Self {
        Self { loader: Box::new(loader) }
    }
}

impl Default for ThesyconProbe {
    fn default() -> Self {
        Self::new(SystemApiLoader)
    }
}

impl VendorProbe for ThesyconProbe {
    fn vendor(&self) -> VendorTag {
        VendorTag::Thesycon
    }

    fn try_adopt(&self, descriptor: &DriverDescriptor) -> ProbeResult<VendorDriver> {
        let driver = ThesyconDriver::try_adopt(descriptor, self.loader.as_ref())?;
        Ok(VendorDriver::Thesycon(driver))
    }
}

/// Probe for ASIO4ALL.
#[derive(Debug, Clone, Copy, Default)]
pub struct Asio4AllProbe;

impl VendorProbe for Asio4AllProbe {
    fn vendor(&self) -> VendorTag {
        VendorTag::Asio4All
    }

    fn try_adopt(&self, descriptor: &DriverDescriptor) -> ProbeResult<VendorDriver> {
        debug!(path = %descriptor.path().display(), "Checking for ASIO4ALL");
        PassthroughDriver::try_adopt(descriptor).map(VendorDriver::Asio4All)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use asio_dm_core::FailureKind;
    use asio_dm_core::testing::lowercase_tempdir;
    use tempfile::TempDir;

    const CLSID: &str = "{232685C6-6548-49D8-846D-4141A3EF7560}";

    fn descriptor(dir: &TempDir, file: &str) -> DriverDescriptor {
        let path = dir.path().join(file);
        std::fs::write(&path, b"MZ").expect("Failed to write module");
        DriverDescriptor::new("ASIO4ALL v2", CLSID, &path).expect("Failed to build descriptor")
    }

    #[test]
    fn test_asio4all_is_recognized_by_name() {
        let dir = lowercase_tempdir();
        let driver = Asio4AllProbe.try_adopt(&descriptor(&dir, "asio4all64.dll")).expect("adopted");
        assert_eq!(driver.vendor(), VendorTag::Asio4All);
    }

    #[test]
    fn test_other_modules_are_not_asio4all() {
        let dir = lowercase_tempdir();
        let err = Asio4AllProbe
            .try_adopt(&descriptor(&dir, "realtekasio.dll"))
            .expect_err("not asio4all");
        assert_matches!(&err, ProbeError::NamingConvention(name) if name == "realtekasio.dll");
        assert_eq!(err.kind(), FailureKind::ClassificationFailure);
    }

    #[test]
    fn test_passthrough_answers_not_present() {
        let request = InputMonitor { input: 0, state: 1, gain: 0x7FFF_FFFF, ..Default::default() };
        assert_eq!(PassthroughDriver.emulate_monitor(&request), status::NOT_PRESENT);
        assert_eq!(VendorDriver::Unknown.emulate_monitor(&request), status::NOT_PRESENT);
        assert_eq!(VendorDriver::Unknown.vendor(), VendorTag::Unknown);
    }

    #[test]
    fn test_thesycon_without_companion_is_resource_unavailable() {
        let dir = lowercase_tempdir();
        let err = ThesyconProbe::default()
            .try_adopt(&descriptor(&dir, "audientusbaudioasio_x64.dll"))
            .expect_err("no companion library");
        assert_eq!(err.kind(), FailureKind::ResourceUnavailable);
    }

    #[test]
    fn test_thesycon_rejects_foreign_names() {
        let dir = lowercase_tempdir();
        let err = ThesyconProbe::default()
            .try_adopt(&descriptor(&dir, "asio4all64.dll"))
            .expect_err("not thesycon");
        assert_eq!(err.kind(), FailureKind::ClassificationFailure);
    }
}

//! The seam between the hook engine and vendor protocols.

use crate::asio::InputMonitor;
use crate::driver::VendorTag;

/// A vendor family able to fake `kAsioSetInputMonitor`.
///
/// Implementations are called from whatever thread the host uses for
/// `future()`, after initialization has finished.
pub trait MonitorEmulator: Send + Sync {
    /// The vendor family this emulator belongs to.
    fn vendor(&self) -> VendorTag;

    /// Handle one `kAsioSetInputMonitor` request.
    ///
    /// Returns an ASIO status code ([`status::SUCCESS`](crate::asio::status::SUCCESS)
    /// or [`status::NOT_PRESENT`](crate::asio::status::NOT_PRESENT)).
    fn emulate_monitor(&self, request: &InputMonitor) -> i32;
}

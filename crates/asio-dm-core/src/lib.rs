//! ASIO-DM Core - Driver records, ASIO ABI types and shared errors.
//!
//! This crate contains the domain model shared by the vendor protocols,
//! the hook engine and the plugin: the bit-exact pieces of the ASIO binary
//! interface, the per-driver record with its lifecycle state machine, and
//! the `MonitorEmulator` seam that vendor families implement.

pub mod asio;
pub mod clsid;
pub mod driver;
pub mod emulation;
pub mod error;
#[cfg(any(test, feature = "test-support"))]
pub mod testing;

pub use asio::{FutureFn, InputMonitor};
pub use clsid::Clsid;
pub use driver::{DriverDescriptor, DriverRecord, DriverState, FailureKind, PatchRecord, VendorTag};
pub use emulation::MonitorEmulator;
pub use error::{CoreError, CoreResult};

//! The parts of the ASIO binary interface the activator relies on.
//!
//! Everything here is fixed by the ASIO SDK and shared by every driver and
//! host, so the values and layouts must stay bit-exact.

use std::ffi::c_void;

/// `ASIOError` result codes returned from `future()`.
pub mod status {
    /// `ASE_SUCCESS`: the `future()` call succeeded.
    pub const SUCCESS: i32 = 0x3f48_47a0;
    /// `ASE_NotPresent`: the feature or hardware is not present.
    pub const NOT_PRESENT: i32 = -1000;
}

/// `future()` selectors used by the monitoring feature.
pub mod selector {
    /// `kAsioSetInputMonitor`: `params` points at an [`InputMonitor`](super::InputMonitor).
    pub const SET_INPUT_MONITOR: i32 = 3;
    /// `kAsioCanInputMonitor`: capability query, `params` is null.
    pub const CAN_INPUT_MONITOR: i32 = 9;
}

/// Zero-based dispatch table index of `IASIO::future()`.
///
/// `IUnknown` contributes three methods and `future()` is the twentieth
/// `IASIO` method, making it the 23rd entry overall.
pub const FUTURE_SLOT: usize = 22;

/// Signature of `IASIO::future(long selector, void* params)` including the
/// implicit `this` pointer.
pub type FutureFn = unsafe extern "system" fn(*mut c_void, i32, *mut c_void) -> i32;

/// `ASIOInputMonitor` as passed with [`selector::SET_INPUT_MONITOR`].
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct InputMonitor {
    /// Input index, -1 means all inputs
    pub input: i32,
    /// Output index
    pub output: i32,
    /// Gain 0..0x7fffffff (-inf to +12 dB)
    pub gain: i32,
    /// Non-zero to switch monitoring on
    pub state: i32,
    /// Pan 0..0x7fffffff (left to right)
    pub pan: i32,
}

impl InputMonitor {
    /// Whether the request switches monitoring on.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.state != 0
    }

    /// Whether the request addresses every input at once.
    #[must_use]
    pub fn targets_all_inputs(&self) -> bool {
        self.input < 0
    }
}

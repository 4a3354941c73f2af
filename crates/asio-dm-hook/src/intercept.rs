//! The replacement `future()` handler.
//!
//! Every patched driver gets its own [`Interception`] context, bound into a
//! trampoline. The handler answers the two monitoring selectors itself and
//! forwards everything else to the driver's original `future()`.

#![allow(unsafe_code)]

use std::ffi::c_void;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use asio_dm_core::asio::{selector, status};
use asio_dm_core::{FutureFn, InputMonitor, MonitorEmulator};
use tracing::{error, trace};

/// Per-driver state bound into a trampoline. Immutable once published.
pub struct Interception {
    original: FutureFn,
    emulator: Arc<dyn MonitorEmulator>,
}

impl std::fmt::Debug for Interception {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Interception")
            .field("original", &(self.original as *const ()))
            .field("vendor", &self.emulator.vendor())
            .finish()
    }
}

impl Interception {
    #[must_use]
    pub fn new(original: FutureFn, emulator: Arc<dyn MonitorEmulator>) -> Self {
        Self { original, emulator }
    }

    /// Move the context to the heap for the rest of the process and return its address.
    #[must_use]
    pub fn into_context(self) -> usize {
        Box::into_raw(Box::new(self)) as usize
    }

    /// Free a context that was never published to a trampoline.
    ///
    /// # Safety
    /// `context` must come from [`Interception::into_context`] and nothing
    /// may reference it anymore.
    pub(crate) unsafe fn reclaim(context: usize) {
        // SAFETY: per the caller, this is the sole owner of a boxed context.
        drop(unsafe { Box::from_raw(context as *mut Self) });
    }

    fn dispatch(&self, this: *mut c_void, selector: i32, params: *mut c_void) -> i32 {
        match selector {
            selector::CAN_INPUT_MONITOR => status::SUCCESS,
            selector::SET_INPUT_MONITOR => {
                if params.is_null() {
                    return status::NOT_PRESENT;
                }
                // SAFETY: the host passes an ASIOInputMonitor with this selector.
                let request = unsafe { params.cast::<InputMonitor>().read_unaligned() };
                trace!(?request, vendor = %self.emulator.vendor(), "kAsioSetInputMonitor");
                self.emulator.emulate_monitor(&request)
            }
            // SAFETY: the original entry of the same driver, called with the host's arguments.
            _ => unsafe { (self.original)(this, selector, params) },
        }
    }
}

/// Address of [`on_intercepted_call`] for embedding into trampolines.
#[must_use]
pub fn handler_address() -> usize {
    on_intercepted_call as *const () as usize
}

/// Entry point reached through a trampoline in place of `IASIO::future()`.
///
/// Panics never unwind into the host; they are answered `ASE_NotPresent`.
///
/// # Safety
/// `context` must be null or come from [`Interception::into_context`], and
/// the remaining arguments must be what the host passed to `future()`.
pub unsafe extern "system" fn on_intercepted_call(
    context: *const Interception,
    this: *mut c_void,
    selector: i32,
    params: *mut c_void,
) -> i32 {
    // SAFETY: null or a leaked, never-freed context per the caller.
    let Some(interception) = (unsafe { context.as_ref() }) else {
        return status::NOT_PRESENT;
    };
    catch_unwind(AssertUnwindSafe(|| interception.dispatch(this, selector, params)))
        .unwrap_or_else(|_| {
            error!(selector, "Panic in future() handler");
            status::NOT_PRESENT
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use asio_dm_core::VendorTag;
    use std::sync::Mutex;

    struct RecordingEmulator {
        requests: Mutex<Vec<InputMonitor>>,
    }

    impl MonitorEmulator for RecordingEmulator {
        fn vendor(&self) -> VendorTag {
            VendorTag::Thesycon
        }

        fn emulate_monitor(&self, request: &InputMonitor) -> i32 {
            self.requests.lock().unwrap().push(*request);
            status::SUCCESS
        }
    }

    struct PanickingEmulator;

    impl MonitorEmulator for PanickingEmulator {
        fn vendor(&self) -> VendorTag {
            VendorTag::Thesycon
        }

        fn emulate_monitor(&self, _request: &InputMonitor) -> i32 {
            panic!("device exploded");
        }
    }

    /// A driver's `future()`: echoes the selector and flags the params pointer.
    unsafe extern "system" fn echo_future(
        _this: *mut c_void,
        selector: i32,
        params: *mut c_void,
    ) -> i32 {
        selector.wrapping_mul(10).wrapping_add(i32::from(!params.is_null()))
    }

    fn recording() -> (Arc<RecordingEmulator>, Interception) {
        let emulator = Arc::new(RecordingEmulator { requests: Mutex::new(Vec::new()) });
        let interception = Interception::new(echo_future, emulator.clone());
        (emulator, interception)
    }

    #[test]
    fn test_can_input_monitor_is_answered() {
        let (_, interception) = recording();
        let result = unsafe {
            on_intercepted_call(
                &raw const interception,
                std::ptr::null_mut(),
                selector::CAN_INPUT_MONITOR,
                std::ptr::null_mut(),
            )
        };
        assert_eq!(result, status::SUCCESS);
    }

    #[test]
    fn test_set_input_monitor_is_delegated() {
        let (emulator, interception) = recording();
        let mut request = InputMonitor { input: 1, output: 0, gain: 0x7FFF_FFFF, state: 1, pan: 0 };

        let result = unsafe {
            on_intercepted_call(
                &raw const interception,
                std::ptr::null_mut(),
                selector::SET_INPUT_MONITOR,
                (&raw mut request).cast(),
            )
        };

        assert_eq!(result, status::SUCCESS);
        assert_eq!(emulator.requests.lock().unwrap().as_slice(), &[request]);
    }

    #[test]
    fn test_set_input_monitor_without_params() {
        let (emulator, interception) = recording();
        let result = unsafe {
            on_intercepted_call(
                &raw const interception,
                std::ptr::null_mut(),
                selector::SET_INPUT_MONITOR,
                std::ptr::null_mut(),
            )
        };
        assert_eq!(result, status::NOT_PRESENT);
        assert!(emulator.requests.lock().unwrap().is_empty());
    }

    #[test]
    fn test_missing_context() {
        let result = unsafe {
            on_intercepted_call(
                std::ptr::null(),
                std::ptr::null_mut(),
                selector::CAN_INPUT_MONITOR,
                std::ptr::null_mut(),
            )
        };
        assert_eq!(result, status::NOT_PRESENT);
    }

    #[test]
    fn test_other_selectors_are_forwarded_unchanged() {
        let (emulator, interception) = recording();
        let mut payload = 0u64;
        let this = 0x1000 as *mut c_void;

        for selector in [1, 2, 4, 5, 8, 10, 0x2311_1961, -1] {
            for params in [std::ptr::null_mut(), (&raw mut payload).cast::<c_void>()] {
                let direct = unsafe { echo_future(this, selector, params) };
                let hooked =
                    unsafe { on_intercepted_call(&raw const interception, this, selector, params) };
                assert_eq!(hooked, direct, "selector {selector}");
            }
        }
        assert!(emulator.requests.lock().unwrap().is_empty());
    }

    #[test]
    fn test_panic_does_not_escape() {
        let interception = Interception::new(echo_future, Arc::new(PanickingEmulator));
        let mut request =
            InputMonitor { input: 0, state: 1, gain: 0x7FFF_FFFF, ..Default::default() };
        let result = unsafe {
            on_intercepted_call(
                &raw const interception,
                std::ptr::null_mut(),
                selector::SET_INPUT_MONITOR,
                (&raw mut request).cast(),
            )
        };
        assert_eq!(result, status::NOT_PRESENT);
    }

    #[test]
    fn test_context_round_trip() {
        let (_, interception) = recording();
        let context = interception.into_context();
        let result = unsafe {
            on_intercepted_call(
                context as *const Interception,
                std::ptr::null_mut(),
                7,
                std::ptr::null_mut(),
            )
        };
        assert_eq!(result, 70);
        unsafe { Interception::reclaim(context) };
    }
}

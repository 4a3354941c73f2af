//! The per-driver patch state machine.

#![allow(unsafe_code)]

use std::sync::Arc;

use asio_dm_core::asio::{selector, status};
use asio_dm_core::{DriverRecord, DriverState, FailureKind, FutureFn, MonitorEmulator, VendorTag};
use tracing::{debug, info, warn};

use crate::error::{HookError, HookResult};
use crate::intercept::{Interception, handler_address};
use crate::memory::{CodeMemory, VirtualMemory};
use crate::module::{ModuleLoader, SystemModuleLoader, instantiate};
use crate::trampoline;
use crate::vtable;

/// Installs the `future()` interception into classified drivers.
pub struct HookEngine {
    loader: Box<dyn ModuleLoader>,
    memory: Box<dyn CodeMemory>,
}

impl std::fmt::Debug for HookEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HookEngine").finish_non_exhaustive()
    }
}

impl HookEngine {
    pub fn new(loader: impl ModuleLoader + 'static, memory: impl CodeMemory + 'static) -> Self {
        Self { loader: Box::new(loader), memory: Box::new(memory) }
    }

    /// The engine acting on the current process.
    #[must_use]
    pub fn system(restore_protection: bool) -> Self {
        Self::new(SystemModuleLoader, VirtualMemory::new(restore_protection))
    }

    /// Patch one driver and return its final state.
    ///
    /// Records already in a terminal state are returned as they are. Any
    /// failure ends in [`DriverState::PatchFail`] with the failure kind
    /// stored on the record, and never affects other drivers.
    pub fn patch(
        &self,
        record: &mut DriverRecord,
        emulator: Arc<dyn MonitorEmulator>,
    ) -> DriverState {
        if record.state().is_terminal() {
            debug!(driver = %record.name(), state = ?record.state(), "Driver already handled");
            return record.state();
        }

        let to = match self.try_patch(record, emulator) {
            Ok(state) => state,
            Err(e) => {
                let kind = e.kind();
                warn!(driver = %record.name(), error = %e, %kind, "Failed to patch driver");
                record.set_failure(kind);
                DriverState::PatchFail
            }
        };

        if let Err(e) = record.transition(to) {
            warn!(driver = %record.name(), error = %e, "Unexpected driver state");
        }
        debug!(driver = %record.name(), state = ?record.state(), "Patch attempt finished");
        record.state()
    }

    fn try_patch(
        &self,
        record: &mut DriverRecord,
        emulator: Arc<dyn MonitorEmulator>,
    ) -> HookResult<DriverState> {
        if record.vendor() == VendorTag::Unknown {
            return Err(HookError::Unsupported(
                record.failure().unwrap_or(FailureKind::ClassificationFailure),
            ));
        }

        let descriptor = record.descriptor().clone();
        let module = self.loader.load(descriptor.path())?;
        let instance = instantiate(module.as_ref(), descriptor.clsid())?;

        // SAFETY: `instance` is a live IASIO object of a loaded module.
        let slot = unsafe { vtable::locate_future(instance.as_ptr()) }?;
        let original = record.capture_original(slot.value)?;
        debug!(
            driver = %record.name(),
            slot = format_args!("{:#018x}", slot.address),
            original = format_args!("{original:#018x}"),
            "Located future()"
        );

        // SAFETY: non-null entry read from the driver's own dispatch table.
        let future = unsafe { as_future(original) };
        // SAFETY: the driver's future() on its own instance, with no parameters.
        let answer =
            unsafe { future(instance.as_ptr(), selector::CAN_INPUT_MONITOR, std::ptr::null_mut()) };
        if answer == status::SUCCESS {
            info!(driver = %record.name(), "Driver supports input monitoring natively");
            return Ok(DriverState::Native);
        }

        // The dispatch table belongs to the module, not to the instance.
        drop(instance);

        let trampoline = self.trampoline(record, emulator)?;
        // SAFETY: the slot lies in the dispatch table of `module`, which stays
        // loaded below for the rest of the process.
        unsafe { self.memory.write_pointer(slot.address, trampoline) }?;

        let patch = record.patch_mut();
        patch.slot = Some(slot.address);
        patch.module = Some(module.retain());
        info!(
            driver = %record.name(),
            slot = format_args!("{:#018x}", slot.address),
            trampoline = format_args!("{trampoline:#018x}"),
            "future() patched"
        );
        Ok(DriverState::PatchOk)
    }

    /// Return the driver's trampoline, generating it on first use.
    ///
    /// # Errors
    /// Returns an error if the original `future()` has not been captured yet
    /// or executable memory cannot be allocated.
    pub fn trampoline(
        &self,
        record: &mut DriverRecord,
        emulator: Arc<dyn MonitorEmulator>,
    ) -> HookResult<usize> {
        if let Some(address) = record.patch().trampoline {
            return Ok(address);
        }
        let original = record
            .patch()
            .future_original()
            .ok_or(HookError::AbiCorruption("original future() not captured"))?;

        // SAFETY: captured from a dispatch table and checked for null.
        let future = unsafe { as_future(original) };
        let context = Interception::new(future, emulator).into_context();
        let code = trampoline::encode(context, handler_address());

        match self.memory.allocate_executable(&code) {
            Ok(address) => {
                debug!(
                    driver = %record.name(),
                    trampoline = format_args!("{address:#018x}"),
                    context = format_args!("{context:#018x}"),
                    "Trampoline generated"
                );
                record.patch_mut().trampoline = Some(address);
                Ok(address)
            }
            Err(e) => {
                // SAFETY: the context was never published.
                unsafe { Interception::reclaim(context) };
                Err(e)
            }
        }
    }
}

/// # Safety
/// `address` must be a non-null `future()` implementation.
unsafe fn as_future(address: usize) -> FutureFn {
    // SAFETY: same size; validity per the caller.
    unsafe { std::mem::transmute::<usize, FutureFn>(address) }
}

//! Executable memory for trampolines and guarded dispatch table writes.

#![allow(unsafe_code)]

use crate::error::HookResult;

/// Process memory operations needed to install a hook.
pub trait CodeMemory: Send + Sync {
    /// Copy `code` into a fresh executable allocation and return its address.
    ///
    /// The allocation is never freed.
    ///
    /// # Errors
    /// Returns an error if memory cannot be allocated or made executable.
    fn allocate_executable(&self, code: &[u8]) -> HookResult<usize>;

    /// Store `value` into the pointer-sized `slot` with one atomic write,
    /// even when the page holding it is read-only.
    ///
    /// # Safety
    /// `slot` must be a valid, aligned, pointer-sized location that stays
    /// mapped for the rest of the process.
    ///
    /// # Errors
    /// Returns an error if the page cannot be made writable.
    unsafe fn write_pointer(&self, slot: usize, value: usize) -> HookResult<()>;
}

/// The real process memory, through the Win32 virtual memory API.
#[derive(Debug, Clone, Copy)]
pub struct VirtualMemory {
    restore_protection: bool,
}

impl VirtualMemory {
    /// Create the memory backend.
    ///
    /// With `restore_protection` set, a patched slot's page gets its prior
    /// protection back after the write; otherwise it stays writable.
    #[must_use]
    pub fn new(restore_protection: bool) -> Self {
        Self { restore_protection }
    }
}

impl Default for VirtualMemory {
    fn default() -> Self {
        Self::new(true)
    }
}

#[cfg(windows)]
impl CodeMemory for VirtualMemory {
    fn allocate_executable(&self, code: &[u8]) -> HookResult<usize> {
        use windows::Win32::System::Diagnostics::Debug::FlushInstructionCache;
        use windows::Win32::System::Memory::{
            MEM_COMMIT, MEM_RELEASE, MEM_RESERVE, PAGE_EXECUTE_READ, PAGE_PROTECTION_FLAGS,
            PAGE_READWRITE, VirtualAlloc, VirtualFree, VirtualProtect,
        };
        use windows::Win32::System::Threading::GetCurrentProcess;

        use crate::error::HookError;

        // SAFETY: a fresh private allocation, no existing memory is affected.
        let base =
            unsafe { VirtualAlloc(None, code.len(), MEM_COMMIT | MEM_RESERVE, PAGE_READWRITE) };
        if base.is_null() {
            return Err(HookError::AllocationFailed(windows::core::Error::from_win32().to_string()));
        }

        // SAFETY: `base` is writable and at least `code.len()` bytes long.
        unsafe { std::ptr::copy_nonoverlapping(code.as_ptr(), base.cast::<u8>(), code.len()) };

        let mut old = PAGE_PROTECTION_FLAGS(0);
        // SAFETY: `base` is our own allocation of `code.len()` bytes.
        let protected =
            unsafe { VirtualProtect(base, code.len(), PAGE_EXECUTE_READ, &raw mut old) };
        if let Err(e) = protected {
            // SAFETY: nothing points into the allocation yet.
            if let Err(free_err) = unsafe { VirtualFree(base, 0, MEM_RELEASE) } {
                tracing::debug!(error = %free_err, "VirtualFree failed");
            }
            return Err(HookError::AllocationFailed(e.to_string()));
        }

        // SAFETY: flushes a range of our own process.
        let flushed =
            unsafe { FlushInstructionCache(GetCurrentProcess(), Some(base), code.len()) };
        if let Err(e) = flushed {
            tracing::debug!(error = %e, "FlushInstructionCache failed");
        }

        tracing::debug!(
            address = format_args!("{:#018x}", base as usize),
            len = code.len(),
            "Trampoline allocated"
        );
        Ok(base as usize)
    }

    unsafe fn write_pointer(&self, slot: usize, value: usize) -> HookResult<()> {
        use std::ffi::c_void;
        use std::sync::atomic::{AtomicUsize, Ordering};

        use windows::Win32::System::Memory::{
            PAGE_EXECUTE_READWRITE, PAGE_PROTECTION_FLAGS, VirtualProtect,
        };

        use crate::error::HookError;

        let size = std::mem::size_of::<usize>();
        let mut old = PAGE_PROTECTION_FLAGS(0);
        // SAFETY: the caller guarantees `slot` is mapped.
        unsafe { VirtualProtect(slot as *const c_void, size, PAGE_EXECUTE_READWRITE, &raw mut old) }
            .map_err(|e| HookError::ProtectionFailed { address: slot, reason: e.to_string() })?;

        // SAFETY: aligned and mapped per the caller, writable after the call above.
        unsafe { AtomicUsize::from_ptr(slot as *mut usize) }.store(value, Ordering::SeqCst);

        if self.restore_protection {
            let mut replaced = PAGE_PROTECTION_FLAGS(0);
            // SAFETY: same range as above.
            let restored =
                unsafe { VirtualProtect(slot as *const c_void, size, old, &raw mut replaced) };
            if let Err(e) = restored {
                tracing::warn!(
                    slot = format_args!("{slot:#018x}"),
                    error = %e,
                    "Failed to restore page protection, slot stays writable"
                );
            }
        }
        Ok(())
    }
}

#[cfg(not(windows))]
impl CodeMemory for VirtualMemory {
    fn allocate_executable(&self, _code: &[u8]) -> HookResult<usize> {
        Err(crate::error::HookError::AllocationFailed(
            "executable memory is only supported on Windows".to_string(),
        ))
    }

    unsafe fn write_pointer(&self, slot: usize, _value: usize) -> HookResult<()> {
        Err(crate::error::HookError::ProtectionFailed {
            address: slot,
            reason: "page protection is only supported on Windows".to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_restores_protection_by_default() {
        assert!(VirtualMemory::default().restore_protection);
        assert!(!VirtualMemory::new(false).restore_protection);
    }

    #[cfg(not(windows))]
    #[test]
    fn test_unavailable_off_windows() {
        use asio_dm_core::FailureKind;

        let memory = VirtualMemory::default();
        let err = memory.allocate_executable(&[0xC3]).expect_err("must fail");
        assert_eq!(err.kind(), FailureKind::AllocationFailure);

        let mut slot = 0usize;
        // SAFETY: `slot` is a live local.
        let result = unsafe { memory.write_pointer((&raw mut slot) as usize, 1) };
        assert!(result.is_err());
        assert_eq!(slot, 0);
    }
}

//! Reading the `future()` entry of a live `IASIO` dispatch table.

#![allow(unsafe_code)]

use std::ffi::c_void;

use asio_dm_core::asio::FUTURE_SLOT;

use crate::error::{HookError, HookResult};

/// Where `future()` lives in a dispatch table and what it currently holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FutureSlot {
    /// Address of the table entry
    pub address: usize,
    /// Function pointer stored in it
    pub value: usize,
}

/// Locate slot 22 of the object's dispatch table.
///
/// # Safety
/// `instance` must be null or point at a live COM object whose first word is
/// its dispatch table, and that table must hold at least `FUTURE_SLOT + 1`
/// entries.
///
/// # Errors
/// Returns [`HookError::AbiCorruption`] if the object or table pointer is
/// null or misaligned, or the slot is empty.
pub unsafe fn locate_future(instance: *mut c_void) -> HookResult<FutureSlot> {
    let object = instance.cast::<*const usize>();
    if object.is_null() {
        return Err(HookError::AbiCorruption("null driver instance"));
    }
    if !object.is_aligned() {
        return Err(HookError::AbiCorruption("misaligned driver instance"));
    }

    // SAFETY: non-null and aligned, live per the caller.
    let table = unsafe { object.read() };
    if table.is_null() {
        return Err(HookError::AbiCorruption("null dispatch table"));
    }
    if !table.is_aligned() {
        return Err(HookError::AbiCorruption("misaligned dispatch table"));
    }

    // SAFETY: the table holds at least FUTURE_SLOT + 1 entries per the caller.
    let slot = unsafe { table.add(FUTURE_SLOT) };
    // SAFETY: inside the table, aligned because the table is.
    let value = unsafe { slot.read_volatile() };
    if value == 0 {
        return Err(HookError::AbiCorruption("null future() slot"));
    }

    Ok(FutureSlot { address: slot as usize, value })
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[repr(C)]
    struct Object {
        table: *const usize,
    }

    #[test]
    fn test_locates_slot_22() {
        let mut table = [0usize; FUTURE_SLOT + 1];
        table[FUTURE_SLOT] = 0xDEAD_BEEF;
        let mut object = Object { table: table.as_ptr() };

        let slot = unsafe { locate_future((&raw mut object).cast()) }.expect("valid table");
        assert_eq!(slot.value, 0xDEAD_BEEF);
        assert_eq!(slot.address, (&raw const table[FUTURE_SLOT]) as usize);
    }

    #[test]
    fn test_rejects_null_instance() {
        assert_matches!(
            unsafe { locate_future(std::ptr::null_mut()) },
            Err(HookError::AbiCorruption("null driver instance"))
        );
    }

    #[test]
    fn test_rejects_null_table() {
        let mut object = Object { table: std::ptr::null() };
        assert_matches!(
            unsafe { locate_future((&raw mut object).cast()) },
            Err(HookError::AbiCorruption("null dispatch table"))
        );
    }

    #[test]
    fn test_rejects_misaligned_table() {
        let table = [0usize; FUTURE_SLOT + 2];
        let misaligned = (table.as_ptr() as usize + 1) as *const usize;
        let mut object = Object { table: misaligned };
        assert_matches!(
            unsafe { locate_future((&raw mut object).cast()) },
            Err(HookError::AbiCorruption("misaligned dispatch table"))
        );
    }

    #[test]
    fn test_rejects_empty_slot() {
        let table = [0usize; FUTURE_SLOT + 1];
        let mut object = Object { table: table.as_ptr() };
        assert_matches!(
            unsafe { locate_future((&raw mut object).cast()) },
            Err(HookError::AbiCorruption("null future() slot"))
        );
    }
}

//! Keeps the plugin mapped until the host process exits.

use anyhow::Result;

/// Pin the module containing this code and return its base address.
///
/// Patched dispatch tables point at trampolines that jump into this module,
/// so it must outlive any `ExitDll` or `FreeLibrary` the host issues.
///
/// # Errors
/// Returns an error if the loader refuses to pin the module.
#[cfg(windows)]
#[allow(unsafe_code)]
pub fn pin_self() -> Result<usize> {
    use anyhow::Context;
    use windows::Win32::Foundation::HMODULE;
    use windows::Win32::System::LibraryLoader::{
        GET_MODULE_HANDLE_EX_FLAG_FROM_ADDRESS, GET_MODULE_HANDLE_EX_FLAG_PIN, GetModuleHandleExW,
    };
    use windows::core::PCWSTR;

    let address = pin_self as *const () as *const u16;
    let mut module = HMODULE::default();
    // SAFETY: with FROM_ADDRESS the name argument is an address inside the
    // module, not a string; `module` is a valid out pointer.
    unsafe {
        GetModuleHandleExW(
            GET_MODULE_HANDLE_EX_FLAG_PIN | GET_MODULE_HANDLE_EX_FLAG_FROM_ADDRESS,
            PCWSTR(address),
            &raw mut module,
        )
    }
    .context("Failed to pin plugin module")?;

    let base = module.0 as usize;
    tracing::debug!(base = format_args!("{base:#x}"), "Plugin module pinned");
    Ok(base)
}

/// Pinning is only meaningful for a Windows DLL.
///
/// # Errors
/// Always fails off Windows.
#[cfg(not(windows))]
pub fn pin_self() -> Result<usize> {
    anyhow::bail!("Module pinning is not supported on this platform")
}

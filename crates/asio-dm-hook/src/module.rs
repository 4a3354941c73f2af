//! Loading driver modules and instantiating their `IASIO` object.
//!
//! The hook engine only sees these traits. [`SystemModuleLoader`] implements
//! them with `LoadLibraryW`, `DllGetClassObject` and `IClassFactory`; tests
//! substitute in-process fake objects.

#![allow(unsafe_code)]

use std::ffi::c_void;
use std::path::Path;

use asio_dm_core::Clsid;

use crate::error::HookResult;

/// A live driver object. Dropping it releases the reference.
pub trait DriverInstance {
    /// The interface pointer; its first word is the dispatch table.
    fn as_ptr(&self) -> *mut c_void;
}

/// A loaded driver module. Dropping it unloads the module.
pub trait DriverModule {
    /// Base address of the module.
    fn handle(&self) -> usize;

    /// Create the driver object for `clsid`, using the clsid as interface id too.
    ///
    /// The class factory is released before returning.
    ///
    /// # Errors
    /// Returns an error if the module has no `DllGetClassObject`, or the
    /// factory or the instance cannot be obtained.
    fn create_instance(&self, clsid: Clsid) -> HookResult<Box<dyn DriverInstance>>;

    /// Keep the module loaded for the rest of the process.
    fn retain(self: Box<Self>) -> usize;
}

/// Opens driver modules.
pub trait ModuleLoader: Send + Sync {
    /// Load the module at `path`.
    ///
    /// # Errors
    /// Returns an error if the module cannot be loaded.
    fn load(&self, path: &Path) -> HookResult<Box<dyn DriverModule>>;
}

/// Loads modules into the current process.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemModuleLoader;

#[cfg(windows)]
mod system {
    use std::ffi::c_void;
    use std::mem::ManuallyDrop;
    use std::path::Path;

    use asio_dm_core::Clsid;
    use tracing::debug;
    use widestring::U16CString;
    use windows::Win32::Foundation::{FreeLibrary, HMODULE};
    use windows::Win32::System::Com::IClassFactory;
    use windows::Win32::System::LibraryLoader::{GetProcAddress, LoadLibraryW};
    use windows::core::{GUID, HRESULT, IUnknown, Interface, PCWSTR, s};

    use super::{DriverInstance, DriverModule, ModuleLoader, SystemModuleLoader};
    use crate::error::{HookError, HookResult};

    type DllGetClassObjectFn =
        unsafe extern "system" fn(*const GUID, *const GUID, *mut *mut c_void) -> HRESULT;

    struct ComInstance(IUnknown);

    impl DriverInstance for ComInstance {
        fn as_ptr(&self) -> *mut c_void {
            self.0.as_raw()
        }
    }

    struct LibraryModule(HMODULE);

    impl Drop for LibraryModule {
        fn drop(&mut self) {
            // SAFETY: loaded by us and freed exactly once.
            if let Err(e) = unsafe { FreeLibrary(self.0) } {
                debug!(error = %e, "FreeLibrary failed for driver module");
            }
        }
    }

    impl DriverModule for LibraryModule {
        fn handle(&self) -> usize {
            self.0.0 as usize
        }

        fn create_instance(&self, clsid: Clsid) -> HookResult<Box<dyn DriverInstance>> {
            // SAFETY: the module is loaded for the lifetime of `self`.
            let entry = unsafe { GetProcAddress(self.0, s!("DllGetClassObject")) }
                .ok_or(HookError::EntryPointMissing("DllGetClassObject"))?;
            // SAFETY: DllGetClassObject has this signature in every COM server.
            let get_class_object: DllGetClassObjectFn = unsafe { std::mem::transmute(entry) };

            let guid = GUID::from_u128(clsid.to_u128());
            let mut raw: *mut c_void = std::ptr::null_mut();
            // SAFETY: both GUIDs outlive the call, `raw` is a valid out pointer.
            let hr = unsafe {
                get_class_object(&raw const guid, &raw const IClassFactory::IID, &raw mut raw)
            };
            if hr.is_err() || raw.is_null() {
                return Err(HookError::FactoryFailed { clsid, code: hr.0 });
            }
            // SAFETY: a referenced IClassFactory, released when `factory` drops.
            let factory = unsafe { IClassFactory::from_raw(raw) };

            let mut object: *mut c_void = std::ptr::null_mut();
            // ASIO drivers expect their own clsid as the interface id.
            // SAFETY: `factory` is live, the out pointer is valid.
            let hr = unsafe {
                (factory.vtable().CreateInstance)(
                    factory.as_raw(),
                    std::ptr::null_mut(),
                    &raw const guid,
                    &raw mut object,
                )
            };
            if hr.is_err() || object.is_null() {
                return Err(HookError::InstanceFailed { clsid, code: hr.0 });
            }
            // SAFETY: every COM object starts with the IUnknown methods.
            Ok(Box::new(ComInstance(unsafe { IUnknown::from_raw(object) })))
        }

        fn retain(self: Box<Self>) -> usize {
            let module = ManuallyDrop::new(*self);
            module.0.0 as usize
        }
    }

    impl ModuleLoader for SystemModuleLoader {
        fn load(&self, path: &Path) -> HookResult<Box<dyn DriverModule>> {
            let load_failed =
                |reason: String| HookError::ModuleLoad { path: path.to_path_buf(), reason };

            let wide = U16CString::from_os_str(path.as_os_str())
                .map_err(|e| load_failed(e.to_string()))?;
            // SAFETY: `wide` is NUL-terminated and outlives the call.
            let handle = unsafe { LoadLibraryW(PCWSTR(wide.as_ptr())) }
                .map_err(|e| load_failed(e.to_string()))?;
            debug!(path = %path.display(), "Driver module loaded");
            Ok(Box::new(LibraryModule(handle)))
        }
    }
}

#[cfg(not(windows))]
impl ModuleLoader for SystemModuleLoader {
    fn load(&self, path: &Path) -> HookResult<Box<dyn DriverModule>> {
        Err(crate::error::HookError::ModuleLoad {
            path: path.to_path_buf(),
            reason: "driver modules can only be loaded on Windows".to_string(),
        })
    }
}

/// Create a driver instance through `module`, tagging the clsid in logs.
pub(crate) fn instantiate(
    module: &dyn DriverModule,
    clsid: Clsid,
) -> HookResult<Box<dyn DriverInstance>> {
    let instance = module.create_instance(clsid)?;
    tracing::debug!(
        %clsid,
        module = format_args!("{:#018x}", module.handle()),
        instance = ?instance.as_ptr(),
        "Driver instance created"
    );
    Ok(instance)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(not(windows))]
    #[test]
    fn test_system_loader_unavailable_off_windows() {
        use asio_dm_core::FailureKind;

        let err = SystemModuleLoader
            .load(Path::new("c:/program files/audient/audientusbaudioasio_x64.dll"))
            .err()
            .expect("must fail");
        assert_eq!(err.kind(), FailureKind::ResourceUnavailable);
    }
}

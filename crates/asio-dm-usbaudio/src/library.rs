//! The vendor control library loaded from disk.

#![allow(unsafe_code)]

use std::ffi::{CStr, c_void};
use std::path::Path;
use std::time::Duration;

use tracing::debug;
use widestring::U16CString;
use windows::Win32::Foundation::{FreeLibrary, HMODULE};
use windows::Win32::System::LibraryLoader::{GetProcAddress, LoadLibraryW};
use windows::core::{PCSTR, PCWSTR};

use crate::api::{
    ApiStatus, ControlRequest, DeviceHandle, DeviceProperties, PROPERTIES_SIZE, UsbAudioApi,
};
use crate::error::{UsbAudioError, UsbAudioResult};

type EnumerateDevicesFn = unsafe extern "system" fn() -> u32;
type GetDeviceCountFn = unsafe extern "system" fn() -> u32;
type OpenDeviceByIndexFn = unsafe extern "system" fn(u32, *mut *mut c_void) -> u32;
type CloseDeviceFn = unsafe extern "system" fn(*mut c_void) -> u32;
type GetDevicePropertiesFn = unsafe extern "system" fn(*mut c_void, *mut c_void) -> u32;
type AudioControlRequestFn = unsafe extern "system" fn(
    *mut c_void, // device handle
    u8,          // entity id
    u8,          // request
    u8,          // control selector
    u8,          // channel or mixer control
    *mut c_void, // parameter block
    u32,         // parameter block length
    *mut u32,    // bytes transferred
    u32,         // timeout in milliseconds
) -> u32;

/// Frees the library when dropped.
struct Module(HMODULE);

// SAFETY: a module handle is a process-wide base address, not tied to a thread.
unsafe impl Send for Module {}
// SAFETY: see above; the handle is never mutated.
unsafe impl Sync for Module {}

impl Drop for Module {
    fn drop(&mut self) {
        // SAFETY: the handle came from LoadLibraryW and is released once.
        if let Err(e) = unsafe { FreeLibrary(self.0) } {
            debug!(error = %e, "FreeLibrary failed for control API");
        }
    }
}

/// `<vendor>usbaudioapi_x64.dll` with all entry points resolved.
pub(crate) struct TusbAudioLibrary {
    enumerate_devices: EnumerateDevicesFn,
    get_device_count: GetDeviceCountFn,
    open_device_by_index: OpenDeviceByIndexFn,
    /// Missing from some older libraries; handles then live until unload.
    close_device: Option<CloseDeviceFn>,
    get_device_properties: GetDevicePropertiesFn,
    control_request_get: AudioControlRequestFn,
    control_request_set: AudioControlRequestFn,
    // Declared last so the entry points above never outlive it.
    _module: Module,
}

/// Resolve one export as a typed function pointer.
///
/// # Safety
/// `F` must be an `extern "system"` function pointer type matching the export.
unsafe fn resolve<F: Copy>(module: HMODULE, name: &'static CStr) -> UsbAudioResult<F> {
    let entry_name = name.to_str().unwrap_or("<non-utf8>");
    // SAFETY: `name` is NUL-terminated and `module` is loaded.
    let proc = unsafe { GetProcAddress(module, PCSTR(name.as_ptr().cast())) }
        .ok_or(UsbAudioError::EntryPointMissing(entry_name))?;
    // SAFETY: both sides are plain function pointers; the caller vouches for `F`.
    Ok(unsafe { std::mem::transmute_copy(&proc) })
}

impl TusbAudioLibrary {
    /// Load the library and resolve every entry point used.
    pub(crate) fn load(path: &Path) -> UsbAudioResult<Self> {
        let load_failed =
            |reason: String| UsbAudioError::LoadFailed { path: path.to_path_buf(), reason };

        let wide =
            U16CString::from_os_str(path.as_os_str()).map_err(|e| load_failed(e.to_string()))?;
        // SAFETY: `wide` is NUL-terminated and outlives the call.
        let handle = unsafe { LoadLibraryW(PCWSTR(wide.as_ptr())) }
            .map_err(|e| load_failed(e.to_string()))?;
        let module = Module(handle);
        debug!(path = %path.display(), "Control API library loaded");

        // SAFETY: the signatures match the vendor's published API.
        unsafe {
            Ok(Self {
                enumerate_devices: resolve(module.0, c"TUSBAUDIO_EnumerateDevices")?,
                get_device_count: resolve(module.0, c"TUSBAUDIO_GetDeviceCount")?,
                open_device_by_index: resolve(module.0, c"TUSBAUDIO_OpenDeviceByIndex")?,
                close_device: resolve(module.0, c"TUSBAUDIO_CloseDevice").ok(),
                get_device_properties: resolve(module.0, c"TUSBAUDIO_GetDeviceProperties")?,
                control_request_get: resolve(module.0, c"TUSBAUDIO_AudioControlRequestGet")?,
                control_request_set: resolve(module.0, c"TUSBAUDIO_AudioControlRequestSet")?,
                _module: module,
            })
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn control(
        &self,
        entry: AudioControlRequestFn,
        call: &'static str,
        device: DeviceHandle,
        request: ControlRequest,
        buf: *mut c_void,
        len: usize,
        timeout: Duration,
    ) -> UsbAudioResult<()> {
        let len = u32::try_from(len).unwrap_or(u32::MAX);
        let timeout = u32::try_from(timeout.as_millis()).unwrap_or(u32::MAX);
        // SAFETY: `buf` is valid for `len` bytes for the duration of the call.
        let status = unsafe {
            entry(
                device.0 as *mut c_void,
                request.entity_id,
                request.request,
                request.control_selector,
                request.channel_or_mixer_control,
                buf,
                len,
                std::ptr::null_mut(),
                timeout,
            )
        };
        ApiStatus(status).check(call)
    }
}

impl UsbAudioApi for TusbAudioLibrary {
    fn enumerate_devices(&self) -> ApiStatus {
        // SAFETY: resolved from the loaded library, takes no arguments.
        ApiStatus(unsafe { (self.enumerate_devices)() })
    }

    fn device_count(&self) -> u32 {
        // SAFETY: resolved from the loaded library, takes no arguments.
        unsafe { (self.get_device_count)() }
    }

    fn open_device_by_index(&self, index: u32) -> UsbAudioResult<DeviceHandle> {
        let mut handle: *mut c_void = std::ptr::null_mut();
        // SAFETY: `handle` is a valid out pointer.
        let status = unsafe { (self.open_device_by_index)(index, &raw mut handle) };
        ApiStatus(status).check("TUSBAUDIO_OpenDeviceByIndex")?;
        Ok(DeviceHandle(handle as usize))
    }

    fn close_device(&self, device: DeviceHandle) -> ApiStatus {
        let Some(close) = self.close_device else {
            debug!(?device, "TUSBAUDIO_CloseDevice not exported, handle left open");
            return ApiStatus::SUCCESS;
        };
        // SAFETY: `device` came from TUSBAUDIO_OpenDeviceByIndex and is closed once.
        ApiStatus(unsafe { close(device.0 as *mut c_void) })
    }

    fn device_properties(&self, device: DeviceHandle) -> UsbAudioResult<DeviceProperties> {
        let mut raw = vec![0u8; PROPERTIES_SIZE];
        // SAFETY: `raw` is larger than the properties structure.
        let status = unsafe {
            (self.get_device_properties)(device.0 as *mut c_void, raw.as_mut_ptr().cast())
        };
        ApiStatus(status).check("TUSBAUDIO_GetDeviceProperties")?;
        DeviceProperties::from_raw(&raw)
    }

    fn control_get(
        &self,
        device: DeviceHandle,
        request: ControlRequest,
        buf: &mut [u8],
        timeout: Duration,
    ) -> UsbAudioResult<()> {
        self.control(
            self.control_request_get,
            "TUSBAUDIO_AudioControlRequestGet",
            device,
            request,
            buf.as_mut_ptr().cast(),
            buf.len(),
            timeout,
        )
    }

    fn control_set(
        &self,
        device: DeviceHandle,
        request: ControlRequest,
        buf: &[u8],
        timeout: Duration,
    ) -> UsbAudioResult<()> {
        // The API takes a non-const pointer but only reads it for SET requests.
        self.control(
            self.control_request_set,
            "TUSBAUDIO_AudioControlRequestSet",
            device,
            request,
            buf.as_ptr().cast_mut().cast(),
            buf.len(),
            timeout,
        )
    }
}

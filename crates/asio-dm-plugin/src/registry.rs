//! Discovery of installed ASIO drivers.

use asio_dm_core::DriverDescriptor;

/// Source of installed drivers.
pub trait DriverDiscovery {
    /// Every usable driver. Broken entries are skipped, not reported.
    fn discover(&self) -> Vec<DriverDescriptor>;
}

/// Drivers registered under `HKLM\Software\ASIO`.
#[derive(Debug, Clone, Copy, Default)]
pub struct AsioRegistry;

#[cfg(windows)]
mod system {
    #![allow(unsafe_code)]

    use anyhow::{Context, Result};
    use asio_dm_core::DriverDescriptor;
    use tracing::{debug, warn};
    use widestring::{U16CStr, U16CString};
    use windows::Win32::Foundation::{ERROR_NO_MORE_ITEMS, WIN32_ERROR};
    use windows::Win32::System::Registry::{
        HKEY, HKEY_CLASSES_ROOT, HKEY_LOCAL_MACHINE, KEY_READ, RRF_RT_REG_SZ, RegCloseKey,
        RegEnumKeyExW, RegGetValueW, RegOpenKeyExW,
    };
    use windows::core::{PCWSTR, PWSTR};

    use super::{AsioRegistry, DriverDiscovery};

    const ASIO_KEY: &str = "Software\\ASIO";

    /// Longest key name the registry allows, plus the terminator.
    const MAX_KEY_LEN: usize = 256;

    /// Longest value read; module paths and clsids are far shorter.
    const MAX_VALUE_LEN: usize = 1024;

    struct Key(HKEY);

    impl Drop for Key {
        fn drop(&mut self) {
            // SAFETY: opened by us and closed once.
            let status = unsafe { RegCloseKey(self.0) };
            if status.is_err() {
                debug!(?status, "RegCloseKey failed");
            }
        }
    }

    fn wide(text: &str) -> Result<U16CString> {
        U16CString::from_str(text).with_context(|| format!("Invalid registry name: {text}"))
    }

    fn check(status: WIN32_ERROR, what: &str) -> Result<()> {
        status.ok().with_context(|| what.to_string())
    }

    fn open(parent: HKEY, path: &str) -> Result<Key> {
        let path_w = wide(path)?;
        let mut key = HKEY::default();
        // SAFETY: `path_w` is NUL-terminated, `key` is a valid out pointer.
        let status =
            unsafe { RegOpenKeyExW(parent, PCWSTR(path_w.as_ptr()), 0, KEY_READ, &raw mut key) };
        check(status, &format!("Failed to open {path}"))?;
        Ok(Key(key))
    }

    fn subkeys(parent: HKEY, path: &str) -> Result<Vec<String>> {
        let key = open(parent, path)?;
        let mut names = Vec::new();
        for index in 0u32.. {
            let mut name = [0u16; MAX_KEY_LEN];
            let mut len = MAX_KEY_LEN as u32;
            // SAFETY: `name` holds `len` characters.
            let status = unsafe {
                RegEnumKeyExW(
                    key.0,
                    index,
                    PWSTR(name.as_mut_ptr()),
                    &raw mut len,
                    None,
                    PWSTR::null(),
                    None,
                    None,
                )
            };
            if status == ERROR_NO_MORE_ITEMS {
                break;
            }
            check(status, &format!("Failed to enumerate {path}"))?;
            names.push(String::from_utf16_lossy(&name[..len as usize]));
        }
        Ok(names)
    }

    /// Read a string value; `value` of `None` is the key's default value.
    fn read_string(root: HKEY, path: &str, value: Option<&str>) -> Result<String> {
        let path_w = wide(path)?;
        let value_w = value.map(wide).transpose()?;
        let mut data = vec![0u16; MAX_VALUE_LEN];
        let mut size = (MAX_VALUE_LEN * 2) as u32;
        // SAFETY: both names are NUL-terminated, `data` holds `size` bytes.
        let status = unsafe {
            RegGetValueW(
                root,
                PCWSTR(path_w.as_ptr()),
                value_w.as_ref().map_or(PCWSTR::null(), |v| PCWSTR(v.as_ptr())),
                RRF_RT_REG_SZ,
                None,
                Some(data.as_mut_ptr().cast()),
                Some(&raw mut size),
            )
        };
        check(status, &format!("Failed to read {path}\\{}", value.unwrap_or("(default)")))?;
        Ok(U16CStr::from_slice_truncate(&data)
            .map(U16CStr::to_string_lossy)
            .unwrap_or_default())
    }

    fn describe(name: &str) -> Result<DriverDescriptor> {
        let clsid =
            read_string(HKEY_LOCAL_MACHINE, &format!("{ASIO_KEY}\\{name}"), Some("CLSID"))?;
        let server = format!("CLSID\\{clsid}\\InProcServer32");
        let path = read_string(HKEY_CLASSES_ROOT, &server, None)?;
        debug!(driver = name, %clsid, %path, "Registered ASIO driver");
        Ok(DriverDescriptor::new(name, &clsid, path)?)
    }

    impl DriverDiscovery for AsioRegistry {
        fn discover(&self) -> Vec<DriverDescriptor> {
            let names = match subkeys(HKEY_LOCAL_MACHINE, ASIO_KEY) {
                Ok(names) => names,
                Err(e) => {
                    warn!(error = format_args!("{e:#}"), "No ASIO drivers registered");
                    return Vec::new();
                }
            };

            names
                .iter()
                .filter_map(|name| match describe(name) {
                    Ok(descriptor) => Some(descriptor),
                    Err(e) => {
                        warn!(
                            driver = %name,
                            error = format_args!("{e:#}"),
                            "Skipping ASIO driver"
                        );
                        None
                    }
                })
                .collect()
        }
    }
}

#[cfg(not(windows))]
impl DriverDiscovery for AsioRegistry {
    fn discover(&self) -> Vec<DriverDescriptor> {
        tracing::debug!("No ASIO registry on this platform");
        Vec::new()
    }
}

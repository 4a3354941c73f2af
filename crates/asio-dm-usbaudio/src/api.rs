//! The Thesycon `TUSBAUDIO_*` control API.
//!
//! The API lives in a companion library shipped with each vendor's driver.
//! [`UsbAudioApi`] is the narrow subset the activator needs; on Windows it is
//! backed by the dynamically loaded library, in tests by fakes.

use std::fmt;
use std::path::Path;
use std::time::Duration;

use widestring::U16CStr;

use crate::error::{UsbAudioError, UsbAudioResult};

/// Size of `TUsbAudioDeviceProperties` as filled by `TUSBAUDIO_GetDeviceProperties`.
pub const PROPERTIES_SIZE: usize = 2048;

/// Byte offset of the UTF-16 product string inside the properties block.
const PRODUCT_NAME_OFFSET: usize = 524;

/// Timeout for the cheap request used to check the device still answers.
pub const LIVENESS_TIMEOUT: Duration = Duration::from_millis(2000);

/// Timeout for mixer gain reads and writes.
pub const CONTROL_TIMEOUT: Duration = Duration::from_millis(10_000);

/// `TUSBAUDIO_STATUS` value returned by every API call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ApiStatus(pub u32);

impl ApiStatus {
    pub const SUCCESS: Self = Self(0);

    #[must_use]
    pub fn is_success(self) -> bool {
        self == Self::SUCCESS
    }

    /// Turn a raw status into a result, naming the call for diagnostics.
    ///
    /// # Errors
    /// Returns [`UsbAudioError::Api`] for any non-zero status.
    pub fn check(self, call: &'static str) -> UsbAudioResult<()> {
        if self.is_success() { Ok(()) } else { Err(UsbAudioError::Api { call, status: self }) }
    }
}

impl fmt::Display for ApiStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#010x}", self.0)
    }
}

/// Opaque `TUSBAUDIO_HANDLE` of an opened device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DeviceHandle(pub usize);

/// Addressing of one USB Audio Class control request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlRequest {
    pub entity_id: u8,
    pub request: u8,
    pub control_selector: u8,
    /// Channel number, or mixer control number for mixer units
    pub channel_or_mixer_control: u8,
}

impl ControlRequest {
    /// Mixer unit of the Thesycon firmware that owns the monitor mix.
    pub const MIXER_UNIT: u8 = 0x3C;
    /// `CUR` attribute.
    pub const REQUEST_CUR: u8 = 0x01;
    /// `MU_MIXER_CONTROL` selector.
    pub const MIXER_CONTROL: u8 = 0x01;

    /// The gain of one mixer crosspoint.
    #[must_use]
    pub const fn mixer_gain(control: u8) -> Self {
        Self {
            entity_id: Self::MIXER_UNIT,
            request: Self::REQUEST_CUR,
            control_selector: Self::MIXER_CONTROL,
            channel_or_mixer_control: control,
        }
    }
}

/// Identity of an opened device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceProperties {
    /// USB vendor id in the low 32 bits, product id in the high 32 bits
    pub model: u64,
    /// Product string, e.g. "Audient iD14"
    pub product: String,
}

impl DeviceProperties {
    /// Decode a raw `TUsbAudioDeviceProperties` block.
    ///
    /// # Errors
    /// Returns an error if the block is too short to hold the model id.
    pub fn from_raw(raw: &[u8]) -> UsbAudioResult<Self> {
        let model_bytes: [u8; 8] = raw
            .get(..8)
            .and_then(|b| b.try_into().ok())
            .ok_or(UsbAudioError::PropertiesTruncated(raw.len()))?;

        let name_units: Vec<u16> = raw
            .get(PRODUCT_NAME_OFFSET..)
            .unwrap_or_default()
            .chunks_exact(2)
            .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
            .collect();
        let product = U16CStr::from_slice_truncate(&name_units)
            .map(U16CStr::to_string_lossy)
            .unwrap_or_else(|_| String::from_utf16_lossy(&name_units));

        Ok(Self { model: u64::from_le_bytes(model_bytes), product })
    }

    /// USB vendor id.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn vendor_id(&self) -> u16 {
        self.model as u16
    }

    /// USB product id.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn product_id(&self) -> u16 {
        (self.model >> 32) as u16
    }
}

/// The subset of the Thesycon control API used for monitoring emulation.
#[cfg_attr(test, mockall::automock)]
pub trait UsbAudioApi {
    /// `TUSBAUDIO_EnumerateDevices`: rescan attached devices.
    fn enumerate_devices(&self) -> ApiStatus;

    /// `TUSBAUDIO_GetDeviceCount`.
    fn device_count(&self) -> u32;

    /// `TUSBAUDIO_OpenDeviceByIndex`.
    fn open_device_by_index(&self, index: u32) -> UsbAudioResult<DeviceHandle>;

    /// `TUSBAUDIO_CloseDevice`. The handle is invalid afterwards.
    fn close_device(&self, device: DeviceHandle) -> ApiStatus;

    /// `TUSBAUDIO_GetDeviceProperties`.
    fn device_properties(&self, device: DeviceHandle) -> UsbAudioResult<DeviceProperties>;

    /// `TUSBAUDIO_AudioControlRequestGet`.
    fn control_get(
        &self,
        device: DeviceHandle,
        request: ControlRequest,
        buf: &mut [u8],
        timeout: Duration,
    ) -> UsbAudioResult<()>;

    /// `TUSBAUDIO_AudioControlRequestSet`.
    fn control_set(
        &self,
        device: DeviceHandle,
        request: ControlRequest,
        buf: &[u8],
        timeout: Duration,
    ) -> UsbAudioResult<()>;
}

/// A loaded control API, usable from any host thread.
pub type SharedApi = Box<dyn UsbAudioApi + Send + Sync>;

/// Opens the companion control library found next to a driver.
pub trait ApiLoader: Send + Sync {
    /// Load the library and resolve every entry point.
    ///
    /// # Errors
    /// Returns an error if the library cannot be loaded or an entry point is missing.
    fn load(&self, path: &Path) -> UsbAudioResult<SharedApi>;
}

/// Loads the real vendor library.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemApiLoader;

impl ApiLoader for SystemApiLoader {
    #[cfg(windows)]
    fn load(&self, path: &Path) -> UsbAudioResult<SharedApi> {
        Ok(Box::new(crate::library::TusbAudioLibrary::load(path)?))
    }

    #[cfg(not(windows))]
    fn load(&self, path: &Path) -> UsbAudioResult<SharedApi> {
        Err(UsbAudioError::LoadFailed {
            path: path.to_path_buf(),
            reason: "the vendor control API is only available on Windows".to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn raw_properties(model: u64, name: &str) -> Vec<u8> {
        let mut raw = vec![0u8; PROPERTIES_SIZE];
        raw[..8].copy_from_slice(&model.to_le_bytes());
        for (i, unit) in name.encode_utf16().enumerate() {
            let at = PRODUCT_NAME_OFFSET + i * 2;
            raw[at..at + 2].copy_from_slice(&unit.to_le_bytes());
        }
        raw
    }

    #[test]
    fn test_properties_decode_model_and_name() {
        let props = DeviceProperties::from_raw(&raw_properties(0x08_0000_2708, "Audient iD14"))
            .expect("Failed to decode");
        assert_eq!(props.model, 0x08_0000_2708);
        assert_eq!(props.product, "Audient iD14");
        assert_eq!(props.vendor_id(), 0x2708);
        assert_eq!(props.product_id(), 0x0008);
    }

    #[test]
    fn test_product_id_comes_from_high_word() {
        let evo = DeviceProperties { model: 0x0A_0000_2708, product: String::new() };
        assert_eq!(evo.vendor_id(), 0x2708);
        assert_eq!(evo.product_id(), 0x000A);

        let other = DeviceProperties { model: 0x0000_1234_0000_0D8C, product: String::new() };
        assert_eq!(other.vendor_id(), 0x0D8C);
        assert_eq!(other.product_id(), 0x1234);
    }

    #[test]
    fn test_properties_without_name() {
        let props = DeviceProperties::from_raw(&0x06_0000_2708_u64.to_le_bytes())
            .expect("Model alone is enough");
        assert_eq!(props.model, 0x06_0000_2708);
        assert!(props.product.is_empty());
    }

    #[test]
    fn test_properties_too_short() {
        assert_matches!(
            DeviceProperties::from_raw(&[0u8; 4]),
            Err(UsbAudioError::PropertiesTruncated(4))
        );
    }

    #[test]
    fn test_status_check() {
        assert!(ApiStatus::SUCCESS.check("TUSBAUDIO_GetDeviceCount").is_ok());
        assert_matches!(
            ApiStatus(0xEE00_0005).check("TUSBAUDIO_OpenDeviceByIndex"),
            Err(UsbAudioError::Api {
                call: "TUSBAUDIO_OpenDeviceByIndex",
                status: ApiStatus(0xEE00_0005),
            })
        );
        assert_eq!(ApiStatus(0xEE00_0005).to_string(), "0xee000005");
    }

    #[test]
    fn test_mixer_gain_request() {
        let request = ControlRequest::mixer_gain(7);
        assert_eq!(request.entity_id, 0x3C);
        assert_eq!(request.request, 0x01);
        assert_eq!(request.control_selector, 0x01);
        assert_eq!(request.channel_or_mixer_control, 7);
    }
}

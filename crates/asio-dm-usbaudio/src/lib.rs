//! ASIO-DM USB audio - Thesycon USB audio class drivers.
//!
//! Drivers built on the Thesycon USB audio stack (Audient iD and EVO series
//! among others) ship a companion control library next to the ASIO module,
//! `<vendor>usbaudioapi_x64.dll`. Its audio-control requests reach the
//! device's internal mixer directly, which is enough to fake a direct
//! monitoring switch by muting and restoring an input's mixer gain.

pub mod api;
pub mod device;
pub mod driver;
pub mod error;
#[cfg(windows)]
mod library;

pub use api::{
    ApiLoader, ApiStatus, ControlRequest, DeviceHandle, DeviceProperties, SystemApiLoader,
    UsbAudioApi,
};
pub use device::{VolPair, control_index, mixer_width};
pub use driver::ThesyconDriver;
pub use error::{UsbAudioError, UsbAudioResult};

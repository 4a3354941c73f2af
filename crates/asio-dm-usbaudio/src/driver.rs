//! Thesycon driver probing and monitoring emulation.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use asio_dm_core::asio::status;
use asio_dm_core::{DriverDescriptor, InputMonitor, MonitorEmulator, VendorTag};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::api::{
    ApiLoader, CONTROL_TIMEOUT, ControlRequest, DeviceHandle, LIVENESS_TIMEOUT, SharedApi,
    UsbAudioApi,
};
use crate::device::{AUDIENT_VID, VolPair, control_index, mixer_width};
use crate::error::{UsbAudioError, UsbAudioResult};

/// File name suffix of Thesycon ASIO modules, `<vendor>usbaudioasio_x64.dll`.
pub const ASIO_MODULE_SUFFIX: &str = "usbaudioasio_x64.dll";

/// File name suffix of the companion control library.
pub const API_MODULE_SUFFIX: &str = "usbaudioapi_x64.dll";

/// Requested gains at or below this are treated as "monitoring off".
pub const AUDIBLE_GAIN_THRESHOLD: i32 = 100;

/// Mutable per-driver state touched from `future()`.
#[derive(Debug, Default)]
struct Session {
    device_index: u32,
    /// `None` after a failed reopen
    device: Option<DeviceHandle>,
    /// Last gain seen on each input while it was not muted
    last_audible: HashMap<u8, VolPair>,
}

/// A driver confirmed to be built on the Thesycon USB audio stack.
pub struct ThesyconDriver {
    api: SharedApi,
    api_path: PathBuf,
    model: u64,
    product: String,
    session: Mutex<Session>,
}

impl std::fmt::Debug for ThesyconDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThesyconDriver")
            .field("api_path", &self.api_path)
            .field("model", &format_args!("{:#012x}", self.model))
            .field("product", &self.product)
            .finish_non_exhaustive()
    }
}

/// Path of the control library belonging to a Thesycon ASIO module.
///
/// # Errors
/// Returns an error if the module name does not follow the naming convention.
pub fn companion_api_path(asio_path: &Path) -> UsbAudioResult<PathBuf> {
    let file_name = asio_path.file_name().and_then(|n| n.to_str()).unwrap_or_default();
    let vendor = file_name
        .strip_suffix(ASIO_MODULE_SUFFIX)
        .ok_or_else(|| UsbAudioError::NamingConvention(file_name.to_string()))?;
    Ok(asio_path.with_file_name(format!("{vendor}{API_MODULE_SUFFIX}")))
}

fn close_device(api: &dyn UsbAudioApi, device: DeviceHandle) {
    let status = api.close_device(device);
    if status.is_success() {
        debug!(?device, "Device closed");
    } else {
        warn!(?device, %status, "Failed to close device");
    }
}

/// A device handle that is closed on drop unless released.
struct OpenDevice<'a> {
    api: &'a dyn UsbAudioApi,
    handle: DeviceHandle,
    armed: bool,
}

impl<'a> OpenDevice<'a> {
    fn open(api: &'a dyn UsbAudioApi, index: u32) -> UsbAudioResult<Self> {
        let handle = api.open_device_by_index(index)?;
        Ok(Self { api, handle, armed: true })
    }

    fn release(mut self) -> DeviceHandle {
        self.armed = false;
        self.handle
    }
}

impl Drop for OpenDevice<'_> {
    fn drop(&mut self) {
        if self.armed {
            close_device(self.api, self.handle);
        }
    }
}

impl ThesyconDriver {
    /// Check whether a driver belongs to the Thesycon family and open its device.
    ///
    /// Nothing is left open when the probe fails: device 0 is closed and
    /// the control library is released together with the error.
    ///
    /// # Errors
    /// Returns an error if the naming convention does not match, the control
    /// library is missing or incomplete, or device 0 cannot be opened and queried.
    pub fn try_adopt(
        descriptor: &DriverDescriptor,
        loader: &dyn ApiLoader,
    ) -> UsbAudioResult<Self> {
        debug!(driver = %descriptor.name(), "Trying to adopt driver as Thesycon");

        let api_path = companion_api_path(descriptor.path())?;
        if !api_path.is_file() {
            return Err(UsbAudioError::ApiLibraryMissing(api_path));
        }
        let api = loader.load(&api_path)?;

        let enumerated = api.enumerate_devices();
        let count = api.device_count();
        debug!(status = %enumerated, count, "Enumerated USB audio devices");

        let device = OpenDevice::open(api.as_ref(), 0)?;
        let properties = api.device_properties(device.handle)?;
        let device = device.release();

        if properties.vendor_id() != AUDIENT_VID {
            debug!(
                vid = format_args!("{:#06x}", properties.vendor_id()),
                "Not an Audient device, using default mixer layout"
            );
        }
        info!(
            driver = %descriptor.name(),
            product = %properties.product,
            model = format_args!("{:#012x}", properties.model),
            mixer_width = mixer_width(properties.model),
            "Driver adopted as Thesycon"
        );

        Ok(Self {
            api,
            api_path,
            model: properties.model,
            product: properties.product,
            session: Mutex::new(Session {
                device_index: 0,
                device: Some(device),
                last_audible: HashMap::new(),
            }),
        })
    }

    /// Device model id (VID in the low 32 bits, PID in the high 32 bits).
    #[must_use]
    pub fn model(&self) -> u64 {
        self.model
    }

    /// Product name reported by the device.
    #[must_use]
    pub fn product(&self) -> &str {
        &self.product
    }

    /// Path of the loaded control library.
    #[must_use]
    pub fn api_path(&self) -> &Path {
        &self.api_path
    }

    /// Whether the opened handle still answers control requests.
    fn is_alive(&self, session: &Session) -> bool {
        let Some(device) = session.device else {
            return false;
        };
        let mut buf = [0u8; 2];
        let alive = self
            .api
            .control_get(device, ControlRequest::mixer_gain(0), &mut buf, LIVENESS_TIMEOUT)
            .is_ok();
        debug!(alive, "Device liveness check");
        alive
    }

    fn reopen(&self, session: &mut Session) {
        if let Some(stale) = session.device.take() {
            close_device(self.api.as_ref(), stale);
        }
        match self.api.open_device_by_index(session.device_index) {
            Ok(device) => {
                debug!(index = session.device_index, ?device, "Device reopened");
                session.device = Some(device);
            }
            Err(e) => warn!(index = session.device_index, error = %e, "Failed to reopen device"),
        }
    }

    fn read_gain(&self, session: &Session, left: u8) -> UsbAudioResult<VolPair> {
        let device = session.device.ok_or(UsbAudioError::DeviceNotOpen)?;
        let mut l = [0u8; 2];
        let mut r = [0u8; 2];
        let right = left + 1;
        self.api.control_get(device, ControlRequest::mixer_gain(left), &mut l, CONTROL_TIMEOUT)?;
        self.api.control_get(device, ControlRequest::mixer_gain(right), &mut r, CONTROL_TIMEOUT)?;
        Ok(VolPair { left: i16::from_le_bytes(l), right: i16::from_le_bytes(r) })
    }

    fn write_gain(&self, session: &Session, left: u8, gain: VolPair) -> UsbAudioResult<()> {
        let device = session.device.ok_or(UsbAudioError::DeviceNotOpen)?;
        let l = self.api.control_set(
            device,
            ControlRequest::mixer_gain(left),
            &gain.left.to_le_bytes(),
            CONTROL_TIMEOUT,
        );
        let r = self.api.control_set(
            device,
            ControlRequest::mixer_gain(left + 1),
            &gain.right.to_le_bytes(),
            CONTROL_TIMEOUT,
        );
        l.and(r)
    }
}

impl Drop for ThesyconDriver {
    fn drop(&mut self) {
        if let Some(device) = self.session.get_mut().device.take() {
            close_device(self.api.as_ref(), device);
        }
    }
}

impl MonitorEmulator for ThesyconDriver {
    fn vendor(&self) -> VendorTag {
        VendorTag::Thesycon
    }

    /// Mute or restore an input in the hardware mixer.
    ///
    /// Always answers `ASE_SUCCESS`: the vendor drivers never surface
    /// hardware I/O errors from `future()`, so neither does the emulation.
    ///
    /// Not reentrant. A call made from inside the control API on the same
    /// thread would block on the session lock forever; the vendor library
    /// never calls back into the ASIO driver.
    fn emulate_monitor(&self, request: &InputMonitor) -> i32 {
        debug!(
            input = request.input,
            output = request.output,
            gain = request.gain,
            pan = request.pan,
            state = request.state,
            "Thesycon set input monitor"
        );

        if request.targets_all_inputs() {
            warn!("Monitoring all inputs at once is not emulated");
            return status::SUCCESS;
        }
        let Some((channel, left)) = u8::try_from(request.input)
            .ok()
            .and_then(|channel| Some((channel, control_index(self.model, channel)?)))
        else {
            warn!(input = request.input, "Input has no mixer control");
            return status::SUCCESS;
        };

        // ASIO hosts call future() from one thread per driver; seeing
        // contention here means that assumption does not hold.
        let mut session = self.session.try_lock().unwrap_or_else(|| {
            warn!(channel, "Concurrent future() calls into one driver");
            self.session.lock()
        });

        if !self.is_alive(&session) {
            self.reopen(&mut session);
        }

        match self.read_gain(&session, left) {
            Ok(current) if !current.is_muted() => {
                session.last_audible.insert(channel, current);
            }
            Ok(_) => {}
            Err(e) => debug!(channel, error = %e, "Failed to read mixer gain"),
        }

        let target = if request.is_enabled() && request.gain > AUDIBLE_GAIN_THRESHOLD {
            session.last_audible.get(&channel).copied().unwrap_or_default()
        } else {
            VolPair::MUTED
        };

        match self.write_gain(&session, left, target) {
            Ok(()) => debug!(channel, left = target.left, right = target.right, "Mixer gain set"),
            Err(e) => warn!(channel, error = %e, "Failed to set mixer gain"),
        }

        status::SUCCESS
    }
}

//! ASIO-DM - Direct monitoring activator loaded as a DAW plugin.
//!
//! On init the plugin enumerates the installed ASIO drivers, classifies
//! each one by vendor family and patches the `future()` entry of every
//! supported driver, so a host that asks for input monitoring gets it from
//! the interface's hardware mixer.

pub mod classifier;
pub mod config;
pub mod entry;
pub mod error;
pub mod logging;
pub mod manager;
pub mod pin;
pub mod registry;
pub mod vendor;

pub use classifier::{ClassifiedDriver, Classifier};
pub use config::Config;
pub use entry::{CCLModuleMain, ExitDll, InitDll};
pub use error::{ProbeError, ProbeResult};
pub use manager::{DriverManager, Summary};
pub use registry::{AsioRegistry, DriverDiscovery};
pub use vendor::{PassthroughDriver, VendorDriver, VendorProbe};

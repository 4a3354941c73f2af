//! Promotes discovered drivers to a vendor family.

use std::sync::Arc;

use asio_dm_core::{DriverDescriptor, DriverRecord, FailureKind, MonitorEmulator};
use tracing::{debug, info};

use crate::config::DriversConfig;
use crate::vendor::{Asio4AllProbe, ThesyconProbe, VendorDriver, VendorProbe};

/// A driver record together with the vendor state its hook will use.
#[derive(Debug)]
pub struct ClassifiedDriver {
    pub record: DriverRecord,
    pub driver: Arc<VendorDriver>,
}

/// Runs vendor probes in priority order.
pub struct Classifier {
    probes: Vec<Box<dyn VendorProbe>>,
}

impl Classifier {
    /// Create a classifier trying `probes` first to last.
    #[must_use]
    pub fn new(probes: Vec<Box<dyn VendorProbe>>) -> Self {
        Self { probes }
    }

    /// The probes for the running system: Thesycon, then ASIO4ALL if enabled.
    #[must_use]
    pub fn from_config(config: &DriversConfig) -> Self {
        let mut probes: Vec<Box<dyn VendorProbe>> = vec![Box::new(ThesyconProbe::default())];
        if config.debug_passthrough {
            probes.push(Box::new(Asio4AllProbe));
        }
        Self::new(probes)
    }

    /// Classify one driver. The first accepting probe wins.
    ///
    /// Without a match the record stays `Unknown` and carries the most
    /// specific reason: `ResourceUnavailable` if some family recognized the
    /// driver but could not open what it needs.
    #[must_use]
    pub fn classify(&self, descriptor: DriverDescriptor) -> ClassifiedDriver {
        let mut failure = FailureKind::ClassificationFailure;

        for probe in &self.probes {
            match probe.try_adopt(&descriptor) {
                Ok(driver) => {
                    info!(
                        driver = %descriptor.name(),
                        vendor = %driver.vendor(),
                        "Driver classified"
                    );
                    let record = DriverRecord::classified(descriptor, driver.vendor());
                    return ClassifiedDriver { record, driver: Arc::new(driver) };
                }
                Err(e) => {
                    debug!(
                        driver = %descriptor.name(),
                        vendor = %probe.vendor(),
                        error = %e,
                        "Vendor family rejected driver"
                    );
                    if e.kind() == FailureKind::ResourceUnavailable {
                        failure = FailureKind::ResourceUnavailable;
                    }
                }
            }
        }

        info!(driver = %descriptor.name(), reason = %failure, "Driver not supported");
        ClassifiedDriver {
            record: DriverRecord::unsupported(descriptor, failure),
            driver: Arc::new(VendorDriver::Unknown),
        }
    }
}

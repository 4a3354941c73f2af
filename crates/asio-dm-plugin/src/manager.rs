//! Owns every driver record for the lifetime of the process.

use std::fmt;
use std::sync::Arc;

use asio_dm_core::{DriverRecord, DriverState, MonitorEmulator};
use asio_dm_hook::HookEngine;
use tracing::info;

use crate::classifier::{ClassifiedDriver, Classifier};
use crate::registry::DriverDiscovery;

/// Number of drivers in each final state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Summary {
    pub unsupported: usize,
    pub patched: usize,
    pub failed: usize,
    pub native: usize,
}

impl Summary {
    #[must_use]
    pub fn total(&self) -> usize {
        self.unsupported + self.patched + self.failed + self.native
    }
}

impl fmt::Display for Summary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} drivers: {} patched, {} native, {} failed, {} not supported",
            self.total(),
            self.patched,
            self.native,
            self.failed,
            self.unsupported
        )
    }
}

/// All drivers found at startup, classified and patched.
///
/// Hooks are never removed: a host may call into a patched dispatch table
/// at any time until it exits.
#[derive(Debug, Default)]
pub struct DriverManager {
    drivers: Vec<ClassifiedDriver>,
}

impl DriverManager {
    /// Discover, classify and patch every driver, once, in order.
    #[must_use]
    pub fn initialize(
        discovery: &dyn DriverDiscovery,
        classifier: &Classifier,
        engine: &HookEngine,
    ) -> Self {
        let descriptors = discovery.discover();
        info!(count = descriptors.len(), "ASIO drivers found");

        let drivers = descriptors
            .into_iter()
            .map(|descriptor| {
                let ClassifiedDriver { mut record, driver } = classifier.classify(descriptor);
                engine.patch(&mut record, Arc::clone(&driver) as Arc<dyn MonitorEmulator>);
                ClassifiedDriver { record, driver }
            })
            .collect();

        let manager = Self { drivers };
        for line in manager.status_lines() {
            info!("{line}");
        }
        info!(summary = %manager.summary(), "Drivers initialized");
        manager
    }

    /// Every driver record, in discovery order.
    pub fn records(&self) -> impl Iterator<Item = &DriverRecord> {
        self.drivers.iter().map(|d| &d.record)
    }

    /// One status line per driver, e.g.
    /// "Audient USB Audio ASIO Driver = Patched OK (Thesycon)".
    #[must_use]
    pub fn status_lines(&self) -> Vec<String> {
        self.records().map(DriverRecord::info).collect()
    }

    #[must_use]
    pub fn summary(&self) -> Summary {
        self.records().fold(Summary::default(), |mut summary, record| {
            match record.state() {
                DriverState::Unknown => summary.unsupported += 1,
                DriverState::PatchOk => summary.patched += 1,
                DriverState::PatchFail => summary.failed += 1,
                DriverState::Native => summary.native += 1,
            }
            summary
        })
    }
}

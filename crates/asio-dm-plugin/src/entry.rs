//! Entry points called by the host DAW.
//!
//! Cubase calls `InitDll`/`ExitDll`, Studio One calls `CCLModuleMain`.
//! Everything runs on the host's calling thread and reports only 1 or 0.

#![allow(unsafe_code)]

use std::ffi::c_void;
use std::panic::{self, AssertUnwindSafe};
use std::sync::OnceLock;

use anyhow::{Context, Result};
use asio_dm_hook::HookEngine;
use tracing::{error, info, warn};

use crate::classifier::Classifier;
use crate::config::{self, Config};
use crate::logging;
use crate::manager::DriverManager;
use crate::pin::pin_self;
use crate::registry::AsioRegistry;

/// Studio One reason codes.
const REASON_INIT: i32 = 1;
const REASON_CLEANUP: i32 = 2;

const CUBASE: &str = "Cubase";
const STUDIO_ONE: &str = "Studio One";

static MANAGER: OnceLock<DriverManager> = OnceLock::new();

/// The drivers handled by this process, once initialized.
#[must_use]
pub fn manager() -> Option<&'static DriverManager> {
    MANAGER.get()
}

fn config_or_default() -> (Config, Option<anyhow::Error>) {
    match config::load_config() {
        Ok(config) => (config, None),
        Err(e) => (Config::default(), Some(e)),
    }
}

/// Install the subscriber, then report what happened before it existed.
fn start_logging(config: &Config, config_error: Option<anyhow::Error>, host: &str) {
    logging::init(&config.logging.level);
    info!(host, "Hello");
    if let Some(e) = config_error {
        warn!(error = format_args!("{e:#}"), "Invalid configuration, using defaults");
    }
}

fn initialize(host: &str) -> Result<()> {
    let (config, config_error) = config_or_default();
    start_logging(&config, config_error, host);

    initialize_in(&MANAGER, pin_self, || {
        let classifier = Classifier::from_config(&config.drivers);
        let engine = HookEngine::system(config.patching.restore_page_protection);
        DriverManager::initialize(&AsioRegistry, &classifier, &engine)
    })?;
    Ok(())
}

/// Pin, then run the pipeline once. Later calls return the first result.
fn initialize_in<'a>(
    cell: &'a OnceLock<DriverManager>,
    pin: impl FnOnce() -> Result<usize>,
    build: impl FnOnce() -> DriverManager,
) -> Result<&'a DriverManager> {
    if let Some(manager) = cell.get() {
        info!("Already initialized");
        return Ok(manager);
    }
    pin().context("Cannot stay loaded while drivers are patched")?;
    Ok(cell.get_or_init(build))
}

/// Map an initialization attempt to the host's 1/0 convention.
fn guarded(init: impl FnOnce() -> Result<()>) -> i32 {
    match panic::catch_unwind(AssertUnwindSafe(init)) {
        Ok(Ok(())) => 1,
        Ok(Err(e)) => {
            error!(error = format_args!("{e:#}"), "Initialization failed");
            0
        }
        Err(_) => {
            error!("Initialization panicked");
            0
        }
    }
}

fn init_dll(host: &str) -> i32 {
    guarded(|| initialize(host))
}

/// Hooks stay installed until the process exits.
fn cleanup(host: &str) -> i32 {
    match manager() {
        Some(manager) => info!(host, summary = %manager.summary(), "Bye"),
        None => info!(host, "Bye"),
    }
    1
}

fn module_main(reason: i32) -> i32 {
    match reason {
        REASON_INIT => init_dll(STUDIO_ONE),
        REASON_CLEANUP => cleanup(STUDIO_ONE),
        other => {
            info!(reason = other, "Ignoring module call");
            0
        }
    }
}

/// Cubase initialization.
#[unsafe(no_mangle)]
pub extern "C" fn InitDll() -> i32 {
    init_dll(CUBASE)
}

/// Cubase cleanup.
#[unsafe(no_mangle)]
pub extern "C" fn ExitDll() -> i32 {
    cleanup(CUBASE)
}

/// Studio One initialization and cleanup.
#[allow(non_snake_case)]
#[unsafe(no_mangle)]
pub extern "C" fn CCLModuleMain(
    _module: *mut c_void,
    reason: i32,
    _context: *mut c_void,
    _extra: *mut c_void,
) -> i32 {
    module_main(reason)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn test_pipeline_runs_once() {
        let cell = OnceLock::new();
        let builds = Cell::new(0);
        let build = || {
            builds.set(builds.get() + 1);
            DriverManager::default()
        };

        initialize_in(&cell, || Ok(0x1000), build).expect("first init");
        initialize_in(&cell, || panic!("pinned twice"), build).expect("second init");

        assert_eq!(builds.get(), 1);
        assert!(cell.get().is_some());
    }

    #[test]
    fn test_pin_failure_skips_pipeline() {
        let cell = OnceLock::new();
        let err = initialize_in(
            &cell,
            || anyhow::bail!("loader said no"),
            || panic!("must not build"),
        )
        .expect_err("pin failed");
        assert!(format!("{err:#}").contains("loader said no"));
        assert!(cell.get().is_none());
    }

    #[test]
    fn test_guarded_results() {
        assert_eq!(guarded(|| Ok(())), 1);
        assert_eq!(guarded(|| anyhow::bail!("no drivers")), 0);
        assert_eq!(guarded(|| panic!("boom")), 0);
    }

    #[test]
    fn test_greeting_is_logged_after_subscriber_install() {
        start_logging(&Config::default(), Some(anyhow::anyhow!("bad toml")), "Test host");
        assert!(tracing::dispatcher::has_been_set());
        assert!(tracing::enabled!(tracing::Level::INFO));
    }

    #[test]
    fn test_cleanup_without_manager() {
        assert!(manager().is_none());
        assert_eq!(cleanup(CUBASE), 1);
    }

    #[test]
    fn test_module_main_reasons() {
        assert_eq!(module_main(REASON_CLEANUP), 1);
        assert_eq!(module_main(0), 0);
        assert_eq!(module_main(3), 0);
        assert_eq!(ExitDll(), 1);
    }
}

//! ASIO-DM Hook - `future()` interception for live `IASIO` instances.
//!
//! The engine loads a driver module, creates its `IASIO` object, reads slot
//! 22 of the dispatch table and, unless the driver already answers
//! `kAsioCanInputMonitor`, replaces the slot with a generated trampoline
//! that binds a per-driver [`Interception`] context to the shared handler.
//!
//! Patched drivers stay patched until the process exits.

pub mod engine;
pub mod error;
pub mod intercept;
pub mod memory;
pub mod module;
pub mod trampoline;
pub mod vtable;

pub use engine::HookEngine;
pub use error::{HookError, HookResult};
pub use intercept::{Interception, on_intercepted_call};
pub use memory::{CodeMemory, VirtualMemory};
pub use module::{DriverInstance, DriverModule, ModuleLoader, SystemModuleLoader};

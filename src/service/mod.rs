//! Windows Service support for sessionrun
//!
//! This module provides Windows Service functionality, allowing sessionrun to
//! run as a background service managed by the Windows Service Control Manager.

#[cfg(all(windows, feature = "service"))]
mod runner;

#[cfg(all(windows, feature = "service"))]
pub mod installer;

pub mod config;
pub mod eventlog;

#[cfg(all(windows, feature = "service"))]
pub use runner::run_service;

/// Service name used for registration and as the event log source
pub const SERVICE_NAME: &str = "sessionrun";

/// Service display name shown in services.msc
pub const SERVICE_DISPLAY_NAME: &str = "Session Run";

/// Service description
pub const SERVICE_DESCRIPTION: &str =
    "Periodically launches a configured program into the interactive console session";

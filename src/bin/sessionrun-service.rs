//! sessionrun Windows Service executable
//!
//! This binary is designed to be run by the Windows Service Control Manager.
//! Do not run this directly - use the service installer instead.
//!
//! To install the service:
//!   sessionrun service install
//!
//! To start the service:
//!   sessionrun service start
//!   or: sc start sessionrun
//!
//! To stop the service:
//!   sessionrun service stop
//!   or: sc stop sessionrun
//!
//! To uninstall the service:
//!   sessionrun service uninstall

#[cfg(windows)]
fn main() -> Result<(), Box<dyn std::error::Error>> {
    // This binary should only be started by the Windows Service Control Manager
    sessionrun::service::run_service().map_err(|e| {
        eprintln!("Failed to run service: {}", e);
        e
    })?;
    Ok(())
}

#[cfg(not(windows))]
fn main() {
    eprintln!("sessionrun-service only runs on Windows");
    std::process::exit(1);
}

//! Registering and controlling the service with the Service Control Manager

use crate::service::{SERVICE_DESCRIPTION, SERVICE_DISPLAY_NAME, SERVICE_NAME};
use std::ffi::{OsStr, OsString};
use std::path::PathBuf;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{info, warn};
use windows_service::{
    service::{
        ServiceAccess, ServiceErrorControl, ServiceInfo, ServiceStartType, ServiceState,
        ServiceType,
    },
    service_manager::{ServiceManager, ServiceManagerAccess},
};

/// Service binary expected next to the CLI
const SERVICE_BINARY: &str = "sessionrun-service.exe";

/// How long uninstall waits for a running service to stop
const STOP_TIMEOUT: Duration = Duration::from_secs(30);

fn service_binary_path() -> std::io::Result<PathBuf> {
    Ok(std::env::current_exe()?.with_file_name(SERVICE_BINARY))
}

/// Install the service as an auto-start LocalSystem service
///
/// LocalSystem is required: the console-user launch needs `SeTcbPrivilege`.
pub fn install() -> crate::Result<()> {
    let executable_path = service_binary_path()?;
    let manager = ServiceManager::local_computer(
        None::<&str>,
        ServiceManagerAccess::CONNECT | ServiceManagerAccess::CREATE_SERVICE,
    )?;

    let service_info = ServiceInfo {
        name: OsString::from(SERVICE_NAME),
        display_name: OsString::from(SERVICE_DISPLAY_NAME),
        service_type: ServiceType::OWN_PROCESS,
        start_type: ServiceStartType::AutoStart,
        error_control: ServiceErrorControl::Normal,
        executable_path,
        launch_arguments: vec![],
        dependencies: vec![],
        account_name: None, // LocalSystem
        account_password: None,
    };

    let service = manager.create_service(&service_info, ServiceAccess::CHANGE_CONFIG)?;
    service.set_description(SERVICE_DESCRIPTION)?;

    info!(
        "Installed service '{}' ({})",
        SERVICE_NAME,
        service_info.executable_path.display()
    );
    Ok(())
}

/// Stop the service if it is running, then delete it
pub fn uninstall() -> crate::Result<()> {
    let manager = ServiceManager::local_computer(None::<&str>, ServiceManagerAccess::CONNECT)?;
    let service = manager.open_service(
        SERVICE_NAME,
        ServiceAccess::QUERY_STATUS | ServiceAccess::STOP | ServiceAccess::DELETE,
    )?;

    if service.query_status()?.current_state != ServiceState::Stopped {
        service.stop()?;
        let deadline = Instant::now() + STOP_TIMEOUT;
        while service.query_status()?.current_state != ServiceState::Stopped {
            if Instant::now() >= deadline {
                warn!("Service did not stop within {:?}, deleting anyway", STOP_TIMEOUT);
                break;
            }
            thread::sleep(Duration::from_millis(250));
        }
    }

    // Deletion completes once the last handle to the service closes
    service.delete()?;
    info!("Uninstalled service '{}'", SERVICE_NAME);
    Ok(())
}

/// Ask the SCM to start the service
pub fn start() -> crate::Result<()> {
    let manager = ServiceManager::local_computer(None::<&str>, ServiceManagerAccess::CONNECT)?;
    let service = manager.open_service(SERVICE_NAME, ServiceAccess::START)?;
    service.start(&[] as &[&OsStr])?;
    info!("Start requested for '{}'", SERVICE_NAME);
    Ok(())
}

/// Ask the SCM to stop the service
pub fn stop() -> crate::Result<()> {
    let manager = ServiceManager::local_computer(None::<&str>, ServiceManagerAccess::CONNECT)?;
    let service = manager.open_service(SERVICE_NAME, ServiceAccess::STOP)?;
    let status = service.stop()?;
    info!("Stop requested for '{}' ({:?})", SERVICE_NAME, status.current_state);
    Ok(())
}

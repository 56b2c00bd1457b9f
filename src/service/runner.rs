//! Windows Service runner implementation

use crate::service::config::ServiceConfig;
use crate::service::eventlog::EventLogLayer;
use crate::service::{SERVICE_DISPLAY_NAME, SERVICE_NAME};
use crate::session::windows::Win32SessionApi;
use crate::session::SessionLauncher;
use crate::worker::{StopContext, WorkerLoop};
use std::ffi::OsString;
use std::time::Duration;
use tracing::{error, info};
use windows_service::{
    define_windows_service,
    service::{
        ServiceControl, ServiceControlAccept, ServiceExitCode, ServiceState, ServiceStatus,
        ServiceType,
    },
    service_control_handler::{self, ServiceControlHandlerResult, ServiceStatusHandle},
    service_dispatcher,
};

const SERVICE_TYPE: ServiceType = ServiceType::OWN_PROCESS;

/// Service-specific exit code for unusable configuration or a fatal worker error
const EXIT_WORKER_FAILED: u32 = 1;

/// Run the Windows service
///
/// This is the main entry point called from the service binary.
/// It registers with the Service Control Manager and starts the service dispatcher.
pub fn run_service() -> Result<(), windows_service::Error> {
    service_dispatcher::start(SERVICE_NAME, ffi_service_main)
}

// Generate the Windows service entry point
define_windows_service!(ffi_service_main, service_main);

/// Service main function called by the Windows Service Control Manager
fn service_main(arguments: Vec<OsString>) {
    if let Err(e) = run_service_main(arguments) {
        error!("Service error: {}", e);
    }
}

fn status(state: ServiceState, accept: ServiceControlAccept, exit_code: ServiceExitCode) -> ServiceStatus {
    let wait_hint = match state {
        ServiceState::StartPending | ServiceState::StopPending => Duration::from_secs(10),
        _ => Duration::default(),
    };
    ServiceStatus {
        service_type: SERVICE_TYPE,
        current_state: state,
        controls_accepted: accept,
        exit_code,
        checkpoint: 0,
        wait_hint,
        process_id: None,
    }
}

fn running_controls() -> ServiceControlAccept {
    ServiceControlAccept::STOP | ServiceControlAccept::SHUTDOWN | ServiceControlAccept::PAUSE_CONTINUE
}

fn report_stopped(handle: &ServiceStatusHandle, exit_code: ServiceExitCode) -> Result<(), windows_service::Error> {
    handle.set_service_status(status(
        ServiceState::Stopped,
        ServiceControlAccept::empty(),
        exit_code,
    ))
}

fn run_service_main(_arguments: Vec<OsString>) -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration; defaults only apply when no config file exists
    let (config, config_error) = match ServiceConfig::load_default() {
        Ok(config) => (config, None),
        Err(e) => (ServiceConfig::default(), Some(e)),
    };

    // Initialize logging
    init_logging(&config);

    info!("Starting {} service", SERVICE_DISPLAY_NAME);

    let context = StopContext::new();
    let handler_context = context.clone();

    // Register service control handler
    let status_handle = service_control_handler::register(
        SERVICE_NAME,
        move |control_event| -> ServiceControlHandlerResult {
            match control_event {
                ServiceControl::Stop | ServiceControl::Shutdown => {
                    info!("Received stop/shutdown signal");
                    handler_context.request_stop();
                    ServiceControlHandlerResult::NoError
                }
                ServiceControl::Pause => {
                    info!("Received pause signal");
                    handler_context.pause();
                    ServiceControlHandlerResult::NoError
                }
                ServiceControl::Continue => {
                    info!("Received continue signal");
                    handler_context.resume();
                    ServiceControlHandlerResult::NoError
                }
                ServiceControl::Interrogate => ServiceControlHandlerResult::NoError,
                _ => ServiceControlHandlerResult::NotImplemented,
            }
        },
    )?;

    // Report service starting
    status_handle.set_service_status(status(
        ServiceState::StartPending,
        ServiceControlAccept::empty(),
        ServiceExitCode::Win32(0),
    ))?;

    if let Some(e) = config_error {
        error!("Failed to load configuration: {}", e);
        report_stopped(&status_handle, ServiceExitCode::ServiceSpecific(EXIT_WORKER_FAILED))?;
        return Err(e.into());
    }

    let settings = match config.to_worker_settings() {
        Ok(settings) => settings,
        Err(e) => {
            error!("Invalid configuration: {}", e);
            report_stopped(&status_handle, ServiceExitCode::ServiceSpecific(EXIT_WORKER_FAILED))?;
            return Err(e.into());
        }
    };

    let launcher = SessionLauncher::new(Win32SessionApi).with_desktop(config.desktop.clone());
    let worker = match WorkerLoop::new(launcher, settings, context.clone()).spawn() {
        Ok(handle) => handle,
        Err(e) => {
            error!("Failed to start worker thread: {}", e);
            report_stopped(&status_handle, ServiceExitCode::Win32(1))?;
            return Err(e.into());
        }
    };

    // Report service running
    status_handle.set_service_status(status(
        ServiceState::Running,
        running_controls(),
        ServiceExitCode::Win32(0),
    ))?;

    // Main service loop: mirror pause and stop requests to the SCM until the worker exits
    let mut reported = ServiceState::Running;
    while !context.wait_stopped_timeout(Duration::from_millis(100)) {
        let wanted = if context.is_stop_requested() {
            ServiceState::StopPending
        } else if context.is_paused() {
            ServiceState::Paused
        } else {
            ServiceState::Running
        };

        if wanted != reported {
            let accept = if wanted == ServiceState::StopPending {
                ServiceControlAccept::empty()
            } else {
                running_controls()
            };
            status_handle.set_service_status(status(wanted, accept, ServiceExitCode::Win32(0)))?;
            reported = wanted;
        }
    }

    let exit_code = match worker.join() {
        Ok(Ok(report)) => {
            info!(
                "Worker finished: {} launched, {} failed",
                report.launched, report.failed
            );
            ServiceExitCode::Win32(0)
        }
        Ok(Err(e)) => {
            error!("Worker stopped on fatal error: {}", e);
            ServiceExitCode::ServiceSpecific(EXIT_WORKER_FAILED)
        }
        Err(_) => {
            error!("Worker thread panicked");
            ServiceExitCode::ServiceSpecific(EXIT_WORKER_FAILED)
        }
    };

    // Report service stopped
    report_stopped(&status_handle, exit_code)?;

    info!("Service stopped");
    Ok(())
}

/// Initialize logging for service mode
fn init_logging(config: &ServiceConfig) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let event_log = match EventLogLayer::register(SERVICE_NAME) {
        Ok(layer) => Some(layer),
        Err(e) => {
            eprintln!("Warning: Failed to register event source: {}", e);
            None
        }
    };

    // Services have no console, so without a log file only the event log receives output
    let file_layer = if config.log_file.is_empty() {
        None
    } else {
        match std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&config.log_file)
        {
            Ok(file) => Some(fmt::layer().with_writer(file).with_ansi(false)),
            Err(e) => {
                eprintln!("Warning: Failed to open log file: {}", e);
                None
            }
        }
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(event_log)
        .with(file_layer)
        .init();
}

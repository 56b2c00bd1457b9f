//! sessionrun - launch programs into the interactive console session

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use sessionrun::config::{Args, Command, ConfigAction, ServiceAction};
use sessionrun::service::config::ServiceConfig;

fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    init_logging(&args)?;

    // Execute command
    match args.command {
        Command::Launch {
            as_service,
            desktop,
            path,
            args,
        } => cmd_launch(as_service, desktop, path, args),
        Command::Run { config } => cmd_run(config),
        Command::Config { action } => cmd_config(action),
        Command::Service { action } => cmd_service(action),
    }
}

fn init_logging(args: &Args) -> Result<()> {
    let level = args.log_level();

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.to_string()));

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false);

    if let Some(log_file) = &args.log {
        let file = std::fs::File::create(log_file)?;
        subscriber.with_writer(file).with_ansi(false).init();
    } else {
        subscriber.init();
    }

    Ok(())
}

/// Join CLI arguments into one command-line string that `CommandLineToArgvW`
/// splits back into the same arguments
fn join_args(args: &[String]) -> String {
    args.iter()
        .map(|a| quote_arg(a))
        .collect::<Vec<_>>()
        .join(" ")
}

fn quote_arg(arg: &str) -> String {
    if !arg.is_empty() && !arg.contains(|c: char| c == ' ' || c == '\t' || c == '\n' || c == '"') {
        return arg.to_string();
    }

    let mut quoted = String::with_capacity(arg.len() + 2);
    quoted.push('"');
    let mut backslashes = 0;
    for c in arg.chars() {
        match c {
            '\\' => backslashes += 1,
            '"' => {
                // Backslashes before a quote are doubled, plus one to escape it
                quoted.extend(std::iter::repeat('\\').take(backslashes * 2 + 1));
                quoted.push('"');
                backslashes = 0;
            }
            _ => {
                quoted.extend(std::iter::repeat('\\').take(backslashes));
                quoted.push(c);
                backslashes = 0;
            }
        }
    }
    // Trailing backslashes precede the closing quote
    quoted.extend(std::iter::repeat('\\').take(backslashes * 2));
    quoted.push('"');
    quoted
}

/// Launch a program once
#[cfg(windows)]
fn cmd_launch(as_service: bool, desktop: String, path: String, args: Vec<String>) -> Result<()> {
    use sessionrun::session::windows::Win32SessionApi;
    use sessionrun::session::{LaunchTarget, SessionLauncher};

    let target = LaunchTarget::new(path, join_args(&args))?;
    let launcher = SessionLauncher::new(Win32SessionApi).with_desktop(desktop);

    let pid = if as_service {
        launcher.launch_as_service(&target)?
    } else {
        launcher.launch_as_console_user(&target)?
    };

    println!("Started {} (pid {})", target, pid);
    Ok(())
}

#[cfg(not(windows))]
fn cmd_launch(_as_service: bool, _desktop: String, path: String, args: Vec<String>) -> Result<()> {
    // Still validate so typos are reported the same way everywhere
    let target = sessionrun::session::LaunchTarget::new(path, join_args(&args))?;
    anyhow::bail!("cannot launch {}: console sessions are only available on Windows", target)
}

fn load_config(path: Option<PathBuf>) -> Result<ServiceConfig> {
    let config = match path {
        Some(path) => ServiceConfig::load(path)?,
        None => ServiceConfig::load_default()?,
    };
    Ok(config)
}

/// Run the launch loop in the foreground
#[cfg(windows)]
fn cmd_run(config: Option<PathBuf>) -> Result<()> {
    use sessionrun::session::windows::Win32SessionApi;
    use sessionrun::session::SessionLauncher;
    use sessionrun::worker::WorkerLoop;

    let config = load_config(config)?;
    let settings = config.to_worker_settings()?;
    let launcher = SessionLauncher::new(Win32SessionApi).with_desktop(config.desktop.clone());

    let worker = WorkerLoop::new(launcher, settings, Default::default());
    let ctx = worker.context().clone();

    // Setup Ctrl+C handler
    let handler_ctx = ctx.clone();
    ctrlc::set_handler(move || {
        println!("\nReceived Ctrl+C, stopping...");
        handler_ctx.request_stop();
    })?;

    println!(
        "Launching {} every {}s. Press Ctrl+C to stop.\n",
        config.target.path, config.interval_secs
    );

    let handle = worker.spawn()?;
    let outcome = handle
        .join()
        .map_err(|_| anyhow::anyhow!("worker thread panicked"))?;

    let report = outcome?;
    println!(
        "Stopped. {} launched, {} failed, {} skipped while paused.",
        report.launched, report.failed, report.skipped
    );

    Ok(())
}

#[cfg(not(windows))]
fn cmd_run(config: Option<PathBuf>) -> Result<()> {
    let config = load_config(config)?;
    config.validate()?;
    anyhow::bail!("the launch loop only runs on Windows")
}

/// Print or validate configuration
fn cmd_config(action: ConfigAction) -> Result<()> {
    match action {
        ConfigAction::Sample => {
            print!("{}", ServiceConfig::sample_config());
        }
        ConfigAction::Check { path } => {
            let path = match path.or_else(ServiceConfig::default_path) {
                Some(path) => path,
                None => {
                    println!("No configuration file found, defaults apply.");
                    return Ok(());
                }
            };

            let config = ServiceConfig::load(&path)?;
            println!("Configuration OK: {}\n", path.display());
            println!("  Interval:  {}s", config.interval_secs);
            println!("  Desktop:   {}", config.desktop);
            println!("  Target:    {}", config.target.to_launch_target()?);
            match &config.startup_target {
                Some(startup) => println!("  Startup:   {}", startup.to_launch_target()?),
                None => println!("  Startup:   (none)"),
            }
            println!("  Log level: {}", config.log_level);
            if !config.log_file.is_empty() {
                println!("  Log file:  {}", config.log_file);
            }
        }
    }

    Ok(())
}

/// Manage the Windows service
#[cfg(all(windows, feature = "service"))]
fn cmd_service(action: ServiceAction) -> Result<()> {
    use sessionrun::service::installer;
    use sessionrun::service::SERVICE_NAME;

    match action {
        ServiceAction::Install => {
            installer::install()?;
            println!("Service '{}' installed.", SERVICE_NAME);
        }
        ServiceAction::Uninstall => {
            installer::uninstall()?;
            println!("Service '{}' removed.", SERVICE_NAME);
        }
        ServiceAction::Start => {
            installer::start()?;
            println!("Service '{}' started.", SERVICE_NAME);
        }
        ServiceAction::Stop => {
            installer::stop()?;
            println!("Service '{}' stopped.", SERVICE_NAME);
        }
    }

    Ok(())
}

#[cfg(not(all(windows, feature = "service")))]
fn cmd_service(action: ServiceAction) -> Result<()> {
    anyhow::bail!(
        "cannot {:?} the service: this build has no service support (rebuild on Windows with --features service)",
        action
    )
}

//! CLI argument parsing using clap

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// sessionrun - launch programs into the interactive console session
///
/// Runs a worker that periodically starts a program on the logged-on user's
/// desktop, either directly or as a Windows service
#[derive(Parser, Debug)]
#[command(name = "sessionrun")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Command,

    /// Verbose output (can be repeated for more verbosity)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Quiet mode - only show errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Log output to file
    #[arg(long, global = true)]
    pub log: Option<String>,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Launch a program into the console session once
    Launch {
        /// Run under the service's own identity instead of the console user's
        #[arg(long)]
        as_service: bool,

        /// Desktop to attach the process to
        #[arg(long, default_value = crate::session::DEFAULT_DESKTOP)]
        desktop: String,

        /// Absolute path of the executable
        path: String,

        /// Arguments passed to the executable
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },

    /// Run the launch loop in the foreground until Ctrl+C
    Run {
        /// Configuration file (default: sessionrun.toml next to the executable,
        /// then %PROGRAMDATA%\sessionrun\config.toml)
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Inspect configuration files
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Manage the Windows service
    Service {
        #[command(subcommand)]
        action: ServiceAction,
    },
}

/// `config` subcommands
#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Print a sample configuration file
    Sample,

    /// Load and validate a configuration file
    Check {
        /// File to check (default: the same lookup the service uses)
        path: Option<PathBuf>,
    },
}

/// `service` subcommands
#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceAction {
    /// Register the service with the Service Control Manager
    Install,
    /// Stop and remove the service
    Uninstall,
    /// Start the installed service
    Start,
    /// Stop the running service
    Stop,
}

impl Args {
    /// Get the log level based on verbose/quiet flags
    pub fn log_level(&self) -> tracing::Level {
        if self.quiet {
            tracing::Level::ERROR
        } else {
            match self.verbose {
                0 => tracing::Level::INFO,
                1 => tracing::Level::DEBUG,
                _ => tracing::Level::TRACE,
            }
        }
    }
}

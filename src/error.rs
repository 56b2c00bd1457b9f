//! Unified error types for sessionrun

use std::fmt;
use thiserror::Error;

/// A single failed OS call and the Win32 error code it reported
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{call} failed (os error {code})")]
pub struct OsError {
    /// Name of the API that failed
    pub call: &'static str,
    /// Win32 error code (`GetLastError`)
    pub code: u32,
}

impl OsError {
    pub fn new(call: &'static str, code: u32) -> Self {
        Self { call, code }
    }
}

/// Result type for raw OS calls behind [`crate::session::SessionApi`]
pub type OsResult<T> = std::result::Result<T, OsError>;

/// Resource-acquisition steps of the launch sequences, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaunchStep {
    OpenProcessToken,
    LookupPrivilege,
    EnablePrivilege,
    QueryUserToken,
    DuplicateToken,
    SetTokenSession,
    CreateEnvironment,
}

impl fmt::Display for LaunchStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LaunchStep::OpenProcessToken => "open process token",
            LaunchStep::LookupPrivilege => "lookup privilege",
            LaunchStep::EnablePrivilege => "enable privilege",
            LaunchStep::QueryUserToken => "query user token",
            LaunchStep::DuplicateToken => "duplicate token",
            LaunchStep::SetTokenSession => "set token session",
            LaunchStep::CreateEnvironment => "create environment block",
        };
        f.write_str(name)
    }
}

/// Error returned by the session launchers
#[derive(Error, Debug)]
pub enum LaunchError {
    /// The configured target failed validation before any OS call
    #[error("Invalid launch target: {0}")]
    InvalidTarget(String),

    /// A token, privilege, session or environment call failed
    #[error("Failed to {step}: {source}")]
    Acquire {
        step: LaunchStep,
        #[source]
        source: OsError,
    },

    /// No session is attached to the physical console
    #[error("No active console session")]
    NoActiveSession,

    /// Process creation itself failed
    #[error("Process creation failed in session {session_id}: {source}")]
    Spawn {
        session_id: u32,
        #[source]
        source: OsError,
    },

    /// The process token could not be returned to its previous privilege set
    #[error("Failed to restore process privileges: {source}")]
    PrivilegeRestore {
        /// Process id if the launch itself had succeeded
        launched: Option<u32>,
        #[source]
        source: OsError,
    },
}

impl LaunchError {
    pub(crate) fn acquire(step: LaunchStep, source: OsError) -> Self {
        Self::Acquire { step, source }
    }

    /// A fatal error leaves the service in a state it must not keep running in
    pub fn is_fatal(&self) -> bool {
        matches!(self, LaunchError::PrivilegeRestore { .. })
    }

    /// Win32 error code behind this failure, if any
    pub fn os_code(&self) -> Option<u32> {
        match self {
            LaunchError::Acquire { source, .. }
            | LaunchError::Spawn { source, .. }
            | LaunchError::PrivilegeRestore { source, .. } => Some(source.code),
            LaunchError::InvalidTarget(_) | LaunchError::NoActiveSession => None,
        }
    }

    /// The acquisition step that failed, for `Acquire` errors
    pub fn step(&self) -> Option<LaunchStep> {
        match self {
            LaunchError::Acquire { step, .. } => Some(*step),
            _ => None,
        }
    }
}

/// Main error type for sessionrun operations
#[derive(Error, Debug)]
pub enum SessionRunError {
    /// Configuration could not be loaded or is invalid
    #[error(transparent)]
    Config(#[from] crate::service::config::ConfigError),

    /// A launch failed
    #[error(transparent)]
    Launch(#[from] LaunchError),

    /// Worker thread could not be spawned or joined
    #[error("Worker thread error: {0}")]
    Worker(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Service Control Manager error
    #[cfg(all(windows, feature = "service"))]
    #[error("Service control error: {0}")]
    Service(#[from] windows_service::Error),
}

/// Result type alias for sessionrun operations
pub type Result<T> = std::result::Result<T, SessionRunError>;

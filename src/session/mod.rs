//! Launching processes into the interactive console session
//!
//! A service runs in session 0, which has no interactive desktop. To show
//! anything to the logged-on user, a process has to be created with a token
//! whose session id is the console session. [`SessionLauncher`] implements two
//! ways of doing that on top of the [`SessionApi`] trait, which wraps every
//! OS call involved so the sequences can be exercised without Windows.

mod launcher;
mod privilege;
mod target;

#[cfg(windows)]
pub mod windows;

#[cfg(test)]
pub(crate) mod mock;

pub use launcher::SessionLauncher;
pub use privilege::PrivilegeGuard;
pub use target::LaunchTarget;

use crate::error::OsResult;

/// Desktop of the interactive window station
pub const DEFAULT_DESKTOP: &str = "WinSta0\\Default";

/// Access requested when opening or duplicating a token
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenAccess {
    /// `TOKEN_ALL_ACCESS`
    All,
    /// `TOKEN_ADJUST_PRIVILEGES | TOKEN_QUERY`
    AdjustPrivileges,
    /// `MAXIMUM_ALLOWED`
    MaximumAllowed,
}

/// Privileges the launchers know how to enable
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrivilegeName {
    /// `SeTcbPrivilege`, "act as part of the operating system"
    Tcb,
}

impl PrivilegeName {
    pub fn as_str(&self) -> &'static str {
        match self {
            PrivilegeName::Tcb => "SeTcbPrivilege",
        }
    }
}

/// How the new process presents itself
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowMode {
    /// Shown window in a new console at normal priority
    Visible,
    /// No window and no console
    Hidden,
}

/// Everything process creation needs besides the token and environment
#[derive(Debug, Clone, Copy)]
pub struct ProcessRequest<'a> {
    pub target: &'a LaunchTarget,
    pub desktop: &'a str,
    pub window: WindowMode,
}

/// The OS calls used by the launch sequences
///
/// Handle types release themselves on drop, so an implementation only has to
/// hand out owned values. Each method maps to one OS call.
pub trait SessionApi {
    /// Access token handle
    type Token;
    /// Locally unique privilege identifier
    type Privilege: Copy;
    /// Privilege attributes recorded before an adjustment
    type PrivilegeSnapshot;
    /// Environment block built for a token
    type Environment;
    /// Process and primary thread handles of a created process
    type Process;

    fn open_process_token(&self, access: TokenAccess) -> OsResult<Self::Token>;

    /// Duplicate `token` as a primary token
    fn duplicate_primary(&self, token: &Self::Token, access: TokenAccess)
        -> OsResult<Self::Token>;

    fn set_token_session(&self, token: &Self::Token, session_id: u32) -> OsResult<()>;

    /// Session attached to the physical console, `None` when there is none
    fn active_console_session(&self) -> Option<u32>;

    /// Primary token of the user logged on to `session_id`
    fn query_user_token(&self, session_id: u32) -> OsResult<Self::Token>;

    fn lookup_privilege(&self, name: PrivilegeName) -> OsResult<Self::Privilege>;

    /// Enable `privilege` on `token`, returning the attributes it replaced
    fn enable_privilege(
        &self,
        token: &Self::Token,
        privilege: Self::Privilege,
    ) -> OsResult<Self::PrivilegeSnapshot>;

    fn restore_privileges(
        &self,
        token: &Self::Token,
        snapshot: &Self::PrivilegeSnapshot,
    ) -> OsResult<()>;

    fn create_environment(&self, token: &Self::Token, inherit: bool)
        -> OsResult<Self::Environment>;

    fn create_process(
        &self,
        token: &Self::Token,
        environment: &Self::Environment,
        request: &ProcessRequest<'_>,
    ) -> OsResult<Self::Process>;

    fn process_id(&self, process: &Self::Process) -> u32;
}

//! The two console-session launch sequences

use super::{
    LaunchTarget, PrivilegeGuard, PrivilegeName, ProcessRequest, SessionApi, TokenAccess,
    WindowMode, DEFAULT_DESKTOP,
};
use crate::error::{LaunchError, LaunchStep};
use tracing::{debug, error, info};

/// Starts processes in the active console session
///
/// Every handle acquired during a launch is owned by a local binding and is
/// released when the call returns, whichever step it returns from.
pub struct SessionLauncher<A> {
    api: A,
    desktop: String,
}

impl<A: SessionApi> SessionLauncher<A> {
    pub fn new(api: A) -> Self {
        Self {
            api,
            desktop: DEFAULT_DESKTOP.to_string(),
        }
    }

    /// Use a desktop other than `WinSta0\Default`
    pub fn with_desktop(mut self, desktop: impl Into<String>) -> Self {
        self.desktop = desktop.into();
        self
    }

    pub fn api(&self) -> &A {
        &self.api
    }

    pub fn desktop(&self) -> &str {
        &self.desktop
    }

    /// Launch `target` in the console session under the service's own identity
    ///
    /// The process token is duplicated and the copy is moved into the console
    /// session, so the new process runs as the service account but shows up
    /// on the user's desktop in a new console window. Acquisition failures are
    /// returned without being logged here.
    pub fn launch_as_service(&self, target: &LaunchTarget) -> Result<u32, LaunchError> {
        let process_token = self
            .api
            .open_process_token(TokenAccess::All)
            .map_err(|e| LaunchError::acquire(LaunchStep::OpenProcessToken, e))?;

        let token = self
            .api
            .duplicate_primary(&process_token, TokenAccess::All)
            .map_err(|e| LaunchError::acquire(LaunchStep::DuplicateToken, e))?;

        let session_id = self
            .api
            .active_console_session()
            .ok_or(LaunchError::NoActiveSession)?;
        self.api
            .set_token_session(&token, session_id)
            .map_err(|e| LaunchError::acquire(LaunchStep::SetTokenSession, e))?;

        let environment = self
            .api
            .create_environment(&token, false)
            .map_err(|e| LaunchError::acquire(LaunchStep::CreateEnvironment, e))?;

        let request = ProcessRequest {
            target,
            desktop: &self.desktop,
            window: WindowMode::Visible,
        };
        match self.api.create_process(&token, &environment, &request) {
            Ok(process) => {
                let pid = self.api.process_id(&process);
                debug!(pid, session_id, "Started {} as service", target);
                Ok(pid)
            }
            Err(source) => {
                error!(
                    session_id,
                    code = source.code,
                    "CreateProcessAsUser failed for {}",
                    target
                );
                Err(LaunchError::Spawn { session_id, source })
            }
        }
    }

    /// Launch `target` as the user logged on to the console session
    ///
    /// Requires `SeTcbPrivilege`, which is enabled on the process token for
    /// the duration of the call and restored before returning. A failed
    /// restoration is reported as [`LaunchError::PrivilegeRestore`] even when
    /// the process was started.
    pub fn launch_as_console_user(&self, target: &LaunchTarget) -> Result<u32, LaunchError> {
        let process_token = self
            .api
            .open_process_token(TokenAccess::AdjustPrivileges)
            .map_err(|e| log_step(LaunchError::acquire(LaunchStep::OpenProcessToken, e)))?;

        let guard = PrivilegeGuard::enable(&self.api, &process_token, PrivilegeName::Tcb)
            .map_err(log_step)?;

        let launched = self.launch_elevated(target);

        if let Err(source) = guard.restore() {
            error!(code = source.code, "Process token left elevated: {}", source);
            return Err(LaunchError::PrivilegeRestore {
                launched: launched.ok(),
                source,
            });
        }

        let pid = launched?;
        info!(pid, "Launched {} as console user", target);
        Ok(pid)
    }

    /// Steps that run while the process token holds `SeTcbPrivilege`
    fn launch_elevated(&self, target: &LaunchTarget) -> Result<u32, LaunchError> {
        let session_id = match self.api.active_console_session() {
            Some(id) => id,
            None => {
                error!("No active console session, nothing to launch into");
                return Err(LaunchError::NoActiveSession);
            }
        };

        let user_token = self.api.query_user_token(session_id).map_err(|e| {
            error!(session_id, code = e.code, "WTSQueryUserToken failed");
            LaunchError::acquire(LaunchStep::QueryUserToken, e)
        })?;

        let token = self
            .api
            .duplicate_primary(&user_token, TokenAccess::MaximumAllowed)
            .map_err(|e| log_step(LaunchError::acquire(LaunchStep::DuplicateToken, e)))?;

        let environment = self
            .api
            .create_environment(&token, true)
            .map_err(|e| log_step(LaunchError::acquire(LaunchStep::CreateEnvironment, e)))?;

        let request = ProcessRequest {
            target,
            desktop: &self.desktop,
            window: WindowMode::Hidden,
        };
        let process = self
            .api
            .create_process(&token, &environment, &request)
            .map_err(|source| {
                error!(
                    session_id,
                    code = source.code,
                    "CreateProcessAsUser failed for {}",
                    target
                );
                LaunchError::Spawn { session_id, source }
            })?;

        Ok(self.api.process_id(&process))
    }
}

fn log_step(err: LaunchError) -> LaunchError {
    if let LaunchError::Acquire { step, source } = &err {
        error!(step = %step, code = source.code, "Console-user launch failed: {}", err);
    }
    err
}

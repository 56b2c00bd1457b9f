//! Scoped privilege elevation

use super::{PrivilegeName, SessionApi};
use crate::error::{LaunchError, LaunchStep, OsResult};
use tracing::{debug, error};

/// Keeps one privilege enabled on a token until restored or dropped
///
/// Normal exits call [`PrivilegeGuard::restore`] so a failed restoration can
/// be reported. `Drop` restores as well, which covers unwinding; there the
/// failure can only be logged.
pub struct PrivilegeGuard<'a, A: SessionApi> {
    api: &'a A,
    token: &'a A::Token,
    name: PrivilegeName,
    snapshot: Option<A::PrivilegeSnapshot>,
}

impl<'a, A: SessionApi> PrivilegeGuard<'a, A> {
    /// Look up `name` and enable it on `token`
    pub fn enable(api: &'a A, token: &'a A::Token, name: PrivilegeName) -> Result<Self, LaunchError> {
        let privilege = api
            .lookup_privilege(name)
            .map_err(|e| LaunchError::acquire(LaunchStep::LookupPrivilege, e))?;
        let snapshot = api
            .enable_privilege(token, privilege)
            .map_err(|e| LaunchError::acquire(LaunchStep::EnablePrivilege, e))?;

        debug!("Enabled {}", name.as_str());
        Ok(Self {
            api,
            token,
            name,
            snapshot: Some(snapshot),
        })
    }

    /// Put the previous attributes back
    pub fn restore(mut self) -> OsResult<()> {
        match self.snapshot.take() {
            Some(snapshot) => self.restore_from(&snapshot),
            None => Ok(()),
        }
    }

    fn restore_from(&self, snapshot: &A::PrivilegeSnapshot) -> OsResult<()> {
        self.api.restore_privileges(self.token, snapshot)?;
        debug!("Restored {}", self.name.as_str());
        Ok(())
    }
}

impl<A: SessionApi> Drop for PrivilegeGuard<'_, A> {
    fn drop(&mut self) {
        if let Some(snapshot) = self.snapshot.take() {
            if let Err(e) = self.restore_from(&snapshot) {
                error!("Failed to restore {} on drop: {}", self.name.as_str(), e);
            }
        }
    }
}

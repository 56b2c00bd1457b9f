//! Instrumented in-memory `SessionApi` for tests
//!
//! Every handle it hands out is counted when created and again when dropped,
//! so tests can assert that a launch released exactly what it acquired.

use super::{PrivilegeName, ProcessRequest, SessionApi, TokenAccess, WindowMode};
use crate::error::{OsError, OsResult};
use parking_lot::Mutex;
use std::sync::Arc;

const ERROR_FILE_NOT_FOUND: u32 = 2;
const ERROR_ACCESS_DENIED: u32 = 5;
const ERROR_NO_TOKEN: u32 = 1008;
const ERROR_PRIVILEGE_NOT_HELD: u32 = 1314;

/// OS call to fail
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Fail {
    OpenProcessToken,
    DuplicateToken,
    SetTokenSession,
    QueryUserToken,
    LookupPrivilege,
    EnablePrivilege,
    RestorePrivileges,
    CreateEnvironment,
    CreateProcess,
}

/// Recorded OS call
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Call {
    OpenProcessToken(TokenAccess),
    DuplicateToken(TokenAccess),
    SetTokenSession(u32),
    ActiveConsoleSession,
    QueryUserToken(u32),
    LookupPrivilege(PrivilegeName),
    EnablePrivilege,
    RestorePrivileges,
    CreateEnvironment { inherit: bool },
    CreateProcess {
        path: String,
        command_line: String,
        desktop: String,
        window: WindowMode,
    },
}

#[derive(Default)]
struct Ledger {
    calls: Vec<Call>,
    opened: usize,
    released: usize,
    tcb_enabled: bool,
    restores: usize,
    next_pid: u32,
}

#[derive(Clone)]
pub(crate) struct MockSessionApi {
    ledger: Arc<Mutex<Ledger>>,
    fail: Option<Fail>,
    console_session: Option<u32>,
    missing_executable: Option<String>,
}

/// Token, environment block, process or thread handle
pub(crate) struct MockHandle {
    ledger: Arc<Mutex<Ledger>>,
}

impl Drop for MockHandle {
    fn drop(&mut self) {
        self.ledger.lock().released += 1;
    }
}

pub(crate) struct MockProcess {
    pid: u32,
    _process: MockHandle,
    _thread: MockHandle,
}

#[derive(Debug)]
pub(crate) struct MockSnapshot {
    was_enabled: bool,
}

impl MockSessionApi {
    /// Console session 1 with a logged-on user and nothing failing
    pub(crate) fn new() -> Self {
        Self {
            ledger: Arc::new(Mutex::new(Ledger {
                next_pid: 4100,
                ..Ledger::default()
            })),
            fail: None,
            console_session: Some(1),
            missing_executable: None,
        }
    }

    pub(crate) fn failing(mut self, fail: Fail) -> Self {
        self.fail = Some(fail);
        self
    }

    pub(crate) fn without_console_session(mut self) -> Self {
        self.console_session = None;
        self
    }

    pub(crate) fn missing_executable(mut self, path: &str) -> Self {
        self.missing_executable = Some(path.to_string());
        self
    }

    pub(crate) fn calls(&self) -> Vec<Call> {
        self.ledger.lock().calls.clone()
    }

    pub(crate) fn called(&self, matches: impl Fn(&Call) -> bool) -> bool {
        self.ledger.lock().calls.iter().any(matches)
    }

    pub(crate) fn process_launches(&self) -> usize {
        self.ledger
            .lock()
            .calls
            .iter()
            .filter(|c| matches!(c, Call::CreateProcess { .. }))
            .count()
    }

    pub(crate) fn opened(&self) -> usize {
        self.ledger.lock().opened
    }

    /// Handles created but not yet dropped
    pub(crate) fn outstanding(&self) -> usize {
        let ledger = self.ledger.lock();
        ledger.opened - ledger.released
    }

    pub(crate) fn tcb_enabled(&self) -> bool {
        self.ledger.lock().tcb_enabled
    }

    pub(crate) fn restore_calls(&self) -> usize {
        self.ledger.lock().restores
    }

    fn record(&self, call: Call) {
        self.ledger.lock().calls.push(call);
    }

    fn check(&self, fail: Fail, call: &'static str, code: u32) -> OsResult<()> {
        if self.fail == Some(fail) {
            Err(OsError::new(call, code))
        } else {
            Ok(())
        }
    }

    fn handle(&self) -> MockHandle {
        self.ledger.lock().opened += 1;
        MockHandle {
            ledger: self.ledger.clone(),
        }
    }
}

impl SessionApi for MockSessionApi {
    type Token = MockHandle;
    type Privilege = PrivilegeName;
    type PrivilegeSnapshot = MockSnapshot;
    type Environment = MockHandle;
    type Process = MockProcess;

    fn open_process_token(&self, access: TokenAccess) -> OsResult<MockHandle> {
        self.record(Call::OpenProcessToken(access));
        self.check(Fail::OpenProcessToken, "OpenProcessToken", ERROR_ACCESS_DENIED)?;
        Ok(self.handle())
    }

    fn duplicate_primary(&self, _token: &MockHandle, access: TokenAccess) -> OsResult<MockHandle> {
        self.record(Call::DuplicateToken(access));
        self.check(Fail::DuplicateToken, "DuplicateTokenEx", ERROR_ACCESS_DENIED)?;
        Ok(self.handle())
    }

    fn set_token_session(&self, _token: &MockHandle, session_id: u32) -> OsResult<()> {
        self.record(Call::SetTokenSession(session_id));
        self.check(Fail::SetTokenSession, "SetTokenInformation", ERROR_PRIVILEGE_NOT_HELD)
    }

    fn active_console_session(&self) -> Option<u32> {
        self.record(Call::ActiveConsoleSession);
        self.console_session
    }

    fn query_user_token(&self, session_id: u32) -> OsResult<MockHandle> {
        self.record(Call::QueryUserToken(session_id));
        self.check(Fail::QueryUserToken, "WTSQueryUserToken", ERROR_NO_TOKEN)?;
        if !self.tcb_enabled() {
            return Err(OsError::new("WTSQueryUserToken", ERROR_PRIVILEGE_NOT_HELD));
        }
        Ok(self.handle())
    }

    fn lookup_privilege(&self, name: PrivilegeName) -> OsResult<PrivilegeName> {
        self.record(Call::LookupPrivilege(name));
        self.check(Fail::LookupPrivilege, "LookupPrivilegeValueW", ERROR_ACCESS_DENIED)?;
        Ok(name)
    }

    fn enable_privilege(&self, _token: &MockHandle, _privilege: PrivilegeName) -> OsResult<MockSnapshot> {
        self.record(Call::EnablePrivilege);
        self.check(Fail::EnablePrivilege, "AdjustTokenPrivileges", ERROR_PRIVILEGE_NOT_HELD)?;
        let mut ledger = self.ledger.lock();
        let was_enabled = ledger.tcb_enabled;
        ledger.tcb_enabled = true;
        Ok(MockSnapshot { was_enabled })
    }

    fn restore_privileges(&self, _token: &MockHandle, snapshot: &MockSnapshot) -> OsResult<()> {
        self.record(Call::RestorePrivileges);
        self.ledger.lock().restores += 1;
        self.check(Fail::RestorePrivileges, "AdjustTokenPrivileges", ERROR_ACCESS_DENIED)?;
        self.ledger.lock().tcb_enabled = snapshot.was_enabled;
        Ok(())
    }

    fn create_environment(&self, _token: &MockHandle, inherit: bool) -> OsResult<MockHandle> {
        self.record(Call::CreateEnvironment { inherit });
        self.check(Fail::CreateEnvironment, "CreateEnvironmentBlock", ERROR_ACCESS_DENIED)?;
        Ok(self.handle())
    }

    fn create_process(
        &self,
        _token: &MockHandle,
        _environment: &MockHandle,
        request: &ProcessRequest<'_>,
    ) -> OsResult<MockProcess> {
        self.record(Call::CreateProcess {
            path: request.target.path().to_string(),
            command_line: request.target.command_line(),
            desktop: request.desktop.to_string(),
            window: request.window,
        });
        self.check(Fail::CreateProcess, "CreateProcessAsUserW", ERROR_ACCESS_DENIED)?;
        if self.missing_executable.as_deref() == Some(request.target.path()) {
            return Err(OsError::new("CreateProcessAsUserW", ERROR_FILE_NOT_FOUND));
        }

        let pid = {
            let mut ledger = self.ledger.lock();
            ledger.next_pid += 4;
            ledger.next_pid
        };
        Ok(MockProcess {
            pid,
            _process: self.handle(),
            _thread: self.handle(),
        })
    }

    fn process_id(&self, process: &MockProcess) -> u32 {
        process.pid
    }
}

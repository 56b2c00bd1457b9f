//! Win32 implementation of [`SessionApi`]

use super::{PrivilegeName, ProcessRequest, SessionApi, TokenAccess, WindowMode};
use crate::error::{OsError, OsResult};
use std::ffi::{c_void, OsStr};
use std::os::windows::ffi::OsStrExt;
use tracing::warn;
use windows::core::{PCWSTR, PWSTR};
use windows::Win32::Foundation::{CloseHandle, GetLastError, ERROR_NOT_ALL_ASSIGNED, HANDLE, LUID};
use windows::Win32::Security::{
    AdjustTokenPrivileges, DuplicateTokenEx, LookupPrivilegeValueW, SecurityIdentification,
    SetTokenInformation, TokenPrimary, TokenSessionId, LUID_AND_ATTRIBUTES, SE_PRIVILEGE_ENABLED,
    TOKEN_ACCESS_MASK, TOKEN_ADJUST_PRIVILEGES, TOKEN_ALL_ACCESS, TOKEN_PRIVILEGES, TOKEN_QUERY,
};
use windows::Win32::System::Environment::{CreateEnvironmentBlock, DestroyEnvironmentBlock};
use windows::Win32::System::RemoteDesktop::{WTSGetActiveConsoleSessionId, WTSQueryUserToken};
use windows::Win32::System::Threading::{
    CreateProcessAsUserW, GetCurrentProcess, OpenProcessToken, CREATE_NEW_CONSOLE,
    CREATE_NO_WINDOW, CREATE_UNICODE_ENVIRONMENT, NORMAL_PRIORITY_CLASS, PROCESS_CREATION_FLAGS,
    PROCESS_INFORMATION, STARTF_USESHOWWINDOW, STARTUPINFOW,
};
use windows::Win32::UI::WindowsAndMessaging::SW_SHOW;

/// Returned by `WTSGetActiveConsoleSessionId` when no session is attached
const NO_CONSOLE_SESSION: u32 = 0xFFFF_FFFF;

const MAXIMUM_ALLOWED: TOKEN_ACCESS_MASK = TOKEN_ACCESS_MASK(0x0200_0000);

/// Launch-sequence calls backed by advapi32, wtsapi32, userenv and kernel32
#[derive(Debug, Clone, Copy, Default)]
pub struct Win32SessionApi;

/// Access token closed on drop
#[derive(Debug)]
pub struct OwnedToken(HANDLE);

impl Drop for OwnedToken {
    fn drop(&mut self) {
        // SAFETY: the handle was returned by a token API and is owned by this value.
        if let Err(e) = unsafe { CloseHandle(self.0) } {
            warn!("CloseHandle on token failed: {}", e);
        }
    }
}

/// Environment block destroyed on drop
#[derive(Debug)]
pub struct EnvironmentBlock(*mut c_void);

impl Drop for EnvironmentBlock {
    fn drop(&mut self) {
        // SAFETY: the block was allocated by CreateEnvironmentBlock and is owned by this value.
        if let Err(e) = unsafe { DestroyEnvironmentBlock(self.0) } {
            warn!("DestroyEnvironmentBlock failed: {}", e);
        }
    }
}

/// Process and thread handles of a created process, closed on drop
#[derive(Debug)]
pub struct ProcessHandles {
    process: HANDLE,
    thread: HANDLE,
    pid: u32,
}

impl Drop for ProcessHandles {
    fn drop(&mut self) {
        // SAFETY: both handles come from CreateProcessAsUserW and are owned by this value.
        if let Err(e) = unsafe { CloseHandle(self.thread) } {
            warn!(pid = self.pid, "CloseHandle on thread failed: {}", e);
        }
        // SAFETY: as above.
        if let Err(e) = unsafe { CloseHandle(self.process) } {
            warn!(pid = self.pid, "CloseHandle on process failed: {}", e);
        }
    }
}

/// Previous state reported by `AdjustTokenPrivileges`
pub struct PreviousPrivileges(TOKEN_PRIVILEGES);

fn os_error(call: &'static str, err: windows::core::Error) -> OsError {
    // HRESULT_FROM_WIN32 wraps Win32 codes as 0x8007xxxx
    let hr = err.code().0 as u32;
    let code = if hr & 0xFFFF_0000 == 0x8007_0000 {
        hr & 0xFFFF
    } else {
        hr
    };
    OsError::new(call, code)
}

fn to_wide(s: &str) -> Vec<u16> {
    OsStr::new(s).encode_wide().chain(std::iter::once(0)).collect()
}

fn access_mask(access: TokenAccess) -> TOKEN_ACCESS_MASK {
    match access {
        TokenAccess::All => TOKEN_ALL_ACCESS,
        TokenAccess::AdjustPrivileges => TOKEN_ADJUST_PRIVILEGES | TOKEN_QUERY,
        TokenAccess::MaximumAllowed => MAXIMUM_ALLOWED,
    }
}

fn creation_flags(window: WindowMode) -> PROCESS_CREATION_FLAGS {
    match window {
        WindowMode::Visible => CREATE_UNICODE_ENVIRONMENT | CREATE_NEW_CONSOLE | NORMAL_PRIORITY_CLASS,
        WindowMode::Hidden => CREATE_UNICODE_ENVIRONMENT | CREATE_NO_WINDOW,
    }
}

impl SessionApi for Win32SessionApi {
    type Token = OwnedToken;
    type Privilege = LUID;
    type PrivilegeSnapshot = PreviousPrivileges;
    type Environment = EnvironmentBlock;
    type Process = ProcessHandles;

    fn open_process_token(&self, access: TokenAccess) -> OsResult<OwnedToken> {
        let mut handle = HANDLE::default();
        // SAFETY: the pseudo handle from GetCurrentProcess needs no closing; `handle` is a valid out pointer.
        unsafe { OpenProcessToken(GetCurrentProcess(), access_mask(access), &mut handle) }
            .map_err(|e| os_error("OpenProcessToken", e))?;
        Ok(OwnedToken(handle))
    }

    fn duplicate_primary(&self, token: &OwnedToken, access: TokenAccess) -> OsResult<OwnedToken> {
        let mut handle = HANDLE::default();
        // SAFETY: `token` is a live token handle; `handle` is a valid out pointer.
        unsafe {
            DuplicateTokenEx(
                token.0,
                access_mask(access),
                None,
                SecurityIdentification,
                TokenPrimary,
                &mut handle,
            )
        }
        .map_err(|e| os_error("DuplicateTokenEx", e))?;
        Ok(OwnedToken(handle))
    }

    fn set_token_session(&self, token: &OwnedToken, session_id: u32) -> OsResult<()> {
        // SAFETY: the buffer is a u32 living for the duration of the call, as TokenSessionId expects.
        unsafe {
            SetTokenInformation(
                token.0,
                TokenSessionId,
                &session_id as *const u32 as *const c_void,
                std::mem::size_of::<u32>() as u32,
            )
        }
        .map_err(|e| os_error("SetTokenInformation", e))
    }

    fn active_console_session(&self) -> Option<u32> {
        // SAFETY: no arguments, no preconditions.
        match unsafe { WTSGetActiveConsoleSessionId() } {
            NO_CONSOLE_SESSION => None,
            id => Some(id),
        }
    }

    fn query_user_token(&self, session_id: u32) -> OsResult<OwnedToken> {
        let mut handle = HANDLE::default();
        // SAFETY: `handle` is a valid out pointer; the caller must hold SeTcbPrivilege.
        unsafe { WTSQueryUserToken(session_id, &mut handle) }
            .map_err(|e| os_error("WTSQueryUserToken", e))?;
        Ok(OwnedToken(handle))
    }

    fn lookup_privilege(&self, name: PrivilegeName) -> OsResult<LUID> {
        let name = to_wide(name.as_str());
        let mut luid = LUID::default();
        // SAFETY: `name` is NUL terminated and outlives the call; `luid` is a valid out pointer.
        unsafe { LookupPrivilegeValueW(PCWSTR::null(), PCWSTR(name.as_ptr()), &mut luid) }
            .map_err(|e| os_error("LookupPrivilegeValueW", e))?;
        Ok(luid)
    }

    fn enable_privilege(&self, token: &OwnedToken, privilege: LUID) -> OsResult<PreviousPrivileges> {
        let new_state = TOKEN_PRIVILEGES {
            PrivilegeCount: 1,
            Privileges: [LUID_AND_ATTRIBUTES {
                Luid: privilege,
                Attributes: SE_PRIVILEGE_ENABLED,
            }],
        };
        let mut previous = TOKEN_PRIVILEGES::default();
        let mut returned = 0u32;

        // SAFETY: both TOKEN_PRIVILEGES buffers are sized for one entry and live across the call.
        unsafe {
            AdjustTokenPrivileges(
                token.0,
                false,
                Some(&new_state),
                std::mem::size_of::<TOKEN_PRIVILEGES>() as u32,
                Some(&mut previous),
                Some(&mut returned),
            )
        }
        .map_err(|e| os_error("AdjustTokenPrivileges", e))?;

        // Succeeds without enabling anything when the token lacks the privilege
        // SAFETY: reads the calling thread's last-error value.
        if unsafe { GetLastError() } == ERROR_NOT_ALL_ASSIGNED {
            return Err(OsError::new("AdjustTokenPrivileges", ERROR_NOT_ALL_ASSIGNED.0));
        }

        Ok(PreviousPrivileges(previous))
    }

    fn restore_privileges(&self, token: &OwnedToken, snapshot: &PreviousPrivileges) -> OsResult<()> {
        // Nothing changed if the privilege was already enabled
        if snapshot.0.PrivilegeCount == 0 {
            return Ok(());
        }

        // SAFETY: the snapshot is the buffer AdjustTokenPrivileges filled in earlier.
        unsafe {
            AdjustTokenPrivileges(
                token.0,
                false,
                Some(&snapshot.0),
                std::mem::size_of::<TOKEN_PRIVILEGES>() as u32,
                None,
                None,
            )
        }
        .map_err(|e| os_error("AdjustTokenPrivileges", e))
    }

    fn create_environment(&self, token: &OwnedToken, inherit: bool) -> OsResult<EnvironmentBlock> {
        let mut block: *mut c_void = std::ptr::null_mut();
        // SAFETY: `block` is a valid out pointer; `token` is a live primary token.
        unsafe { CreateEnvironmentBlock(&mut block, token.0, inherit) }
            .map_err(|e| os_error("CreateEnvironmentBlock", e))?;
        if block.is_null() {
            return Err(OsError::new("CreateEnvironmentBlock", 0));
        }
        Ok(EnvironmentBlock(block))
    }

    fn create_process(
        &self,
        token: &OwnedToken,
        environment: &EnvironmentBlock,
        request: &ProcessRequest<'_>,
    ) -> OsResult<ProcessHandles> {
        let application = to_wide(request.target.path());
        let mut command_line = to_wide(&request.target.command_line());
        let mut desktop = to_wide(request.desktop);

        let mut startup_info = STARTUPINFOW {
            cb: std::mem::size_of::<STARTUPINFOW>() as u32,
            lpDesktop: PWSTR(desktop.as_mut_ptr()),
            ..Default::default()
        };
        if request.window == WindowMode::Visible {
            startup_info.dwFlags = STARTF_USESHOWWINDOW;
            startup_info.wShowWindow = SW_SHOW.0 as u16;
        }

        let mut process_info = PROCESS_INFORMATION::default();

        // SAFETY: every wide string is NUL terminated and outlives the call; the command
        // line buffer is writable as CreateProcessAsUserW requires.
        unsafe {
            CreateProcessAsUserW(
                token.0,
                PCWSTR(application.as_ptr()),
                PWSTR(command_line.as_mut_ptr()),
                None,
                None,
                false,
                creation_flags(request.window),
                Some(environment.0 as *const c_void),
                PCWSTR::null(),
                &startup_info,
                &mut process_info,
            )
        }
        .map_err(|e| os_error("CreateProcessAsUserW", e))?;

        Ok(ProcessHandles {
            process: process_info.hProcess,
            thread: process_info.hThread,
            pid: process_info.dwProcessId,
        })
    }

    fn process_id(&self, process: &ProcessHandles) -> u32 {
        process.pid
    }
}

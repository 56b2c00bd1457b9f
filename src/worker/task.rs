//! Fixed-interval launch loop

use super::{StopContext, WorkerState};
use crate::error::LaunchError;
use crate::session::{LaunchTarget, SessionApi, SessionLauncher};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Default period between launches
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(20);

/// What the worker launches and how often
#[derive(Debug, Clone)]
pub struct WorkerSettings {
    /// Period between console-user launches
    pub interval: Duration,
    /// Launched as the console user on every interval
    pub target: LaunchTarget,
    /// Launched once as the service identity when the worker starts
    pub startup_target: Option<LaunchTarget>,
}

/// Counters reported when the loop exits
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerReport {
    pub launched: u32,
    pub failed: u32,
    pub skipped: u32,
}

/// Marks the context stopped even if the loop unwinds
struct StoppedOnDrop(StopContext);

impl Drop for StoppedOnDrop {
    fn drop(&mut self) {
        if self.0.mark_stopped() {
            debug!("Worker stopped");
        }
    }
}

/// Repeatedly launches the target into the console session until stopped
pub struct WorkerLoop<A> {
    launcher: SessionLauncher<A>,
    settings: WorkerSettings,
    context: StopContext,
}

impl<A: SessionApi> WorkerLoop<A> {
    pub fn new(launcher: SessionLauncher<A>, settings: WorkerSettings, context: StopContext) -> Self {
        Self {
            launcher,
            settings,
            context,
        }
    }

    pub fn context(&self) -> &StopContext {
        &self.context
    }

    /// Run on the calling thread until a stop is requested
    ///
    /// Launch failures are logged and the loop carries on. Only a fatal error
    /// ends it early, and that error is returned.
    pub fn run(self) -> Result<WorkerReport, LaunchError> {
        let _stopped = StoppedOnDrop(self.context.clone());
        let mut report = WorkerReport::default();

        info!(
            "Worker started: launching {} every {:?}",
            self.settings.target, self.settings.interval
        );

        if let Some(target) = &self.settings.startup_target {
            match self.launcher.launch_as_service(target) {
                Ok(pid) => info!(pid, "Startup launch of {} succeeded", target),
                Err(e) => warn!("Startup launch of {} failed: {}", target, e),
            }
        }

        while !self.context.is_stop_requested() {
            if self.context.sleep(self.settings.interval) {
                break;
            }

            if self.context.is_paused() {
                debug!("Worker paused, skipping launch");
                report.skipped += 1;
                continue;
            }

            match self.launcher.launch_as_console_user(&self.settings.target) {
                Ok(_) => report.launched += 1,
                Err(e) if e.is_fatal() => {
                    error!("Stopping worker: {}", e);
                    return Err(e);
                }
                Err(e) => {
                    warn!("Launch of {} failed: {}", self.settings.target, e);
                    report.failed += 1;
                }
            }
        }

        debug_assert_ne!(self.context.state(), WorkerState::Running);
        info!(
            "Worker exiting: {} launched, {} failed, {} skipped",
            report.launched, report.failed, report.skipped
        );
        Ok(report)
    }
}

impl<A: SessionApi + Send + 'static> WorkerLoop<A> {
    /// Run on a dedicated `session-worker` thread
    pub fn spawn(self) -> std::io::Result<JoinHandle<Result<WorkerReport, LaunchError>>> {
        thread::Builder::new()
            .name("session-worker".into())
            .spawn(move || self.run())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::mock::{Call, Fail, MockSessionApi};
    use std::time::Instant;

    fn settings(interval_ms: u64) -> WorkerSettings {
        WorkerSettings {
            interval: Duration::from_millis(interval_ms),
            target: LaunchTarget::new("C:\\Windows\\System32\\notepad.exe", "").unwrap(),
            startup_target: None,
        }
    }

    fn worker(api: &MockSessionApi, settings: WorkerSettings) -> WorkerLoop<MockSessionApi> {
        WorkerLoop::new(SessionLauncher::new(api.clone()), settings, StopContext::new())
    }

    fn wait_for(mut condition: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !condition() {
            assert!(Instant::now() < deadline, "condition not reached in time");
            thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn test_launches_until_stopped() {
        let api = MockSessionApi::new();
        let worker = worker(&api, settings(10));
        let ctx = worker.context().clone();
        let handle = worker.spawn().unwrap();

        wait_for(|| api.process_launches() >= 3);
        ctx.request_stop();
        assert!(ctx.wait_stopped_timeout(Duration::from_secs(5)));

        let report = handle.join().unwrap().unwrap();
        assert!(report.launched >= 3);
        assert_eq!(report.failed, 0);
        assert_eq!(api.outstanding(), 0);
    }

    #[test]
    fn test_stop_during_sleep_prevents_next_launch() {
        let api = MockSessionApi::new();
        let worker = worker(&api, settings(60_000));
        let ctx = worker.context().clone();
        let handle = worker.spawn().unwrap();

        thread::sleep(Duration::from_millis(20));
        ctx.request_stop();

        assert!(ctx.wait_stopped_timeout(Duration::from_secs(5)));
        let report = handle.join().unwrap().unwrap();
        assert_eq!(report, WorkerReport::default());
        assert_eq!(api.process_launches(), 0);
        assert_eq!(ctx.state(), WorkerState::Stopped);
    }

    #[test]
    fn test_huge_interval_still_stops_cleanly() {
        let api = MockSessionApi::new();
        let mut settings = settings(0);
        settings.interval = Duration::MAX;
        let worker = worker(&api, settings);
        let ctx = worker.context().clone();
        let handle = worker.spawn().unwrap();

        thread::sleep(Duration::from_millis(20));
        ctx.request_stop();

        assert!(ctx.wait_stopped_timeout(Duration::from_secs(5)));
        assert_eq!(handle.join().unwrap().unwrap(), WorkerReport::default());
        assert_eq!(api.process_launches(), 0);
    }

    #[test]
    fn test_failures_do_not_stop_the_loop() {
        let api = MockSessionApi::new().failing(Fail::CreateProcess);
        let worker = worker(&api, settings(5));
        let ctx = worker.context().clone();
        let handle = worker.spawn().unwrap();

        wait_for(|| api.process_launches() >= 3);
        assert_eq!(ctx.state(), WorkerState::Running);
        ctx.request_stop();

        let report = handle.join().unwrap().unwrap();
        assert_eq!(report.launched, 0);
        assert!(report.failed >= 3);
        assert!(!api.tcb_enabled());
    }

    #[test]
    fn test_fatal_error_ends_the_loop() {
        let api = MockSessionApi::new().failing(Fail::RestorePrivileges);
        let worker = worker(&api, settings(5));
        let ctx = worker.context().clone();

        let err = worker.spawn().unwrap().join().unwrap().unwrap_err();

        assert!(err.is_fatal());
        assert_eq!(api.process_launches(), 1);
        assert_eq!(ctx.state(), WorkerState::Stopped);
    }

    #[test]
    fn test_paused_worker_skips_launches() {
        let api = MockSessionApi::new();
        let worker = worker(&api, settings(5));
        let ctx = worker.context().clone();
        ctx.pause();
        let handle = worker.spawn().unwrap();

        thread::sleep(Duration::from_millis(60));
        assert_eq!(api.process_launches(), 0);

        ctx.resume();
        wait_for(|| api.process_launches() >= 1);
        ctx.request_stop();

        let report = handle.join().unwrap().unwrap();
        assert!(report.skipped >= 1);
        assert!(report.launched >= 1);
    }

    #[test]
    fn test_startup_target_uses_service_identity() {
        let api = MockSessionApi::new();
        let mut settings = settings(60_000);
        settings.startup_target =
            Some(LaunchTarget::new("C:\\tools\\tray.exe", "").unwrap());
        let worker = worker(&api, settings);
        let ctx = worker.context().clone();
        let handle = worker.spawn().unwrap();

        wait_for(|| api.process_launches() == 1);
        ctx.request_stop();
        handle.join().unwrap().unwrap();

        assert_eq!(api.calls()[0], Call::OpenProcessToken(crate::session::TokenAccess::All));
        assert!(!api.called(|c| *c == Call::EnablePrivilege));
    }

    #[test]
    fn test_stopped_is_signalled_when_worker_panics() {
        struct Panicking;
        impl SessionApi for Panicking {
            type Token = ();
            type Privilege = ();
            type PrivilegeSnapshot = ();
            type Environment = ();
            type Process = ();

            fn open_process_token(&self, _: crate::session::TokenAccess) -> crate::error::OsResult<()> {
                panic!("token API unavailable");
            }
            fn duplicate_primary(&self, _: &(), _: crate::session::TokenAccess) -> crate::error::OsResult<()> {
                unreachable!()
            }
            fn set_token_session(&self, _: &(), _: u32) -> crate::error::OsResult<()> {
                unreachable!()
            }
            fn active_console_session(&self) -> Option<u32> {
                unreachable!()
            }
            fn query_user_token(&self, _: u32) -> crate::error::OsResult<()> {
                unreachable!()
            }
            fn lookup_privilege(&self, _: crate::session::PrivilegeName) -> crate::error::OsResult<()> {
                unreachable!()
            }
            fn enable_privilege(&self, _: &(), _: ()) -> crate::error::OsResult<()> {
                unreachable!()
            }
            fn restore_privileges(&self, _: &(), _: &()) -> crate::error::OsResult<()> {
                unreachable!()
            }
            fn create_environment(&self, _: &(), _: bool) -> crate::error::OsResult<()> {
                unreachable!()
            }
            fn create_process(
                &self,
                _: &(),
                _: &(),
                _: &crate::session::ProcessRequest<'_>,
            ) -> crate::error::OsResult<()> {
                unreachable!()
            }
            fn process_id(&self, _: &()) -> u32 {
                unreachable!()
            }
        }

        let context = StopContext::new();
        let worker = WorkerLoop::new(SessionLauncher::new(Panicking), settings(1), context.clone());

        assert!(worker.spawn().unwrap().join().is_err());
        assert!(context.wait_stopped_timeout(Duration::from_secs(1)));
    }
}

//! Forwarding `tracing` events to the Windows Application event log

use std::fmt::{self, Write as _};
use tracing::field::{Field, Visit};
use tracing::{Event, Level};

/// Event log entry type for a tracing level
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Information,
    Warning,
    Error,
}

impl EventKind {
    /// DEBUG and TRACE are not written to the event log
    pub fn from_level(level: &Level) -> Option<Self> {
        match *level {
            Level::ERROR => Some(EventKind::Error),
            Level::WARN => Some(EventKind::Warning),
            Level::INFO => Some(EventKind::Information),
            _ => None,
        }
    }
}

/// Collects an event's message followed by its fields as `key=value`
#[derive(Default)]
struct MessageVisitor {
    message: String,
    fields: String,
}

impl Visit for MessageVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message.push_str(value);
        } else {
            let _ = write!(self.fields, " {}={}", field.name(), value);
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            let _ = write!(self.message, "{:?}", value);
        } else {
            let _ = write!(self.fields, " {}={:?}", field.name(), value);
        }
    }
}

/// Render an event as a single event-log line
pub fn format_event(event: &Event<'_>) -> String {
    let mut visitor = MessageVisitor::default();
    event.record(&mut visitor);
    visitor.message + &visitor.fields
}

#[cfg(windows)]
pub use self::win32::EventLogLayer;

#[cfg(windows)]
mod win32 {
    use super::{format_event, EventKind};
    use std::ffi::OsStr;
    use std::os::windows::ffi::OsStrExt;
    use tracing::{Event, Subscriber};
    use tracing_subscriber::layer::{Context, Layer};
    use windows::core::PCWSTR;
    use windows::Win32::Foundation::{HANDLE, PSID};
    use windows::Win32::System::EventLog::{
        DeregisterEventSource, RegisterEventSourceW, ReportEventW, EVENTLOG_ERROR_TYPE,
        EVENTLOG_INFORMATION_TYPE, EVENTLOG_WARNING_TYPE, REPORT_EVENT_TYPE,
    };

    fn to_wide(s: &str) -> Vec<u16> {
        OsStr::new(s).encode_wide().chain(std::iter::once(0)).collect()
    }

    fn event_type(kind: EventKind) -> REPORT_EVENT_TYPE {
        match kind {
            EventKind::Information => EVENTLOG_INFORMATION_TYPE,
            EventKind::Warning => EVENTLOG_WARNING_TYPE,
            EventKind::Error => EVENTLOG_ERROR_TYPE,
        }
    }

    /// Layer writing INFO and above to the Application log under a source name
    pub struct EventLogLayer {
        // Raw handle value so the layer is Send + Sync
        source: isize,
    }

    impl EventLogLayer {
        pub fn register(source_name: &str) -> windows::core::Result<Self> {
            let name = to_wide(source_name);
            // SAFETY: `name` is NUL terminated and outlives the call.
            let handle = unsafe { RegisterEventSourceW(PCWSTR::null(), PCWSTR(name.as_ptr())) }?;
            Ok(Self {
                source: handle.0 as isize,
            })
        }

        fn handle(&self) -> HANDLE {
            HANDLE(self.source as *mut _)
        }
    }

    impl Drop for EventLogLayer {
        fn drop(&mut self) {
            // SAFETY: the handle came from RegisterEventSourceW and is owned by this layer.
            let _ = unsafe { DeregisterEventSource(self.handle()) };
        }
    }

    impl<S: Subscriber> Layer<S> for EventLogLayer {
        fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
            let Some(kind) = EventKind::from_level(event.metadata().level()) else {
                return;
            };

            let text = to_wide(&format_event(event));
            let strings = [PCWSTR(text.as_ptr())];
            // SAFETY: `strings` points at one NUL-terminated buffer alive for the call.
            let _ = unsafe {
                ReportEventW(
                    self.handle(),
                    event_type(kind),
                    0,
                    0,
                    PSID::default(),
                    0,
                    Some(&strings[..]),
                    None,
                )
            };
        }
    }
}

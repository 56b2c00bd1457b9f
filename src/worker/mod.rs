//! Background worker driving periodic console-user launches

mod context;
mod task;

pub use context::{StopContext, WorkerState};
pub use task::{WorkerLoop, WorkerReport, WorkerSettings, DEFAULT_INTERVAL};

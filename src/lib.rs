//! sessionrun - launch programs into the interactive console session
//!
//! A Windows service runs in session 0 and cannot show anything to the
//! logged-on user. This crate hosts a worker that periodically starts a
//! configured program in the active console session, either as the service
//! account or as the console user.

pub mod config;
pub mod error;
pub mod service;
pub mod session;
pub mod worker;

#[cfg(test)]
pub(crate) mod test_support;

pub use error::{LaunchError, Result, SessionRunError};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

//! Validated executable and argument string for a launch

use crate::error::LaunchError;
use std::fmt;

/// An executable to start and the arguments to pass it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchTarget {
    path: String,
    args: String,
}

impl LaunchTarget {
    /// Validate and build a target
    ///
    /// The path must be absolute: a drive path (`C:\...`), a UNC path
    /// (`\\server\share\...`) or a native absolute path. Neither value may
    /// contain NUL characters since both are handed to the OS as C strings.
    /// The file is not required to exist; that is the OS's call to make.
    pub fn new(path: impl Into<String>, args: impl Into<String>) -> Result<Self, LaunchError> {
        let path = path.into();
        let args = args.into();

        if path.trim().is_empty() {
            return Err(LaunchError::InvalidTarget("executable path is empty".into()));
        }
        if path.contains('\0') || args.contains('\0') {
            return Err(LaunchError::InvalidTarget(format!(
                "'{}' contains a NUL character",
                path.escape_debug()
            )));
        }
        if !is_absolute(&path) {
            return Err(LaunchError::InvalidTarget(format!(
                "'{}' is not an absolute path",
                path
            )));
        }

        Ok(Self { path, args })
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn args(&self) -> &str {
        &self.args
    }

    /// Command line with the quoted executable as argv[0]
    pub fn command_line(&self) -> String {
        let args = self.args.trim();
        if args.is_empty() {
            format!("\"{}\"", self.path)
        } else {
            format!("\"{}\" {}", self.path, args)
        }
    }
}

impl fmt::Display for LaunchTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.command_line())
    }
}

fn is_absolute(path: &str) -> bool {
    let bytes = path.as_bytes();
    let drive = bytes.len() >= 3
        && bytes[0].is_ascii_alphabetic()
        && bytes[1] == b':'
        && (bytes[2] == b'\\' || bytes[2] == b'/');
    let unc = path.starts_with("\\\\");

    drive || unc || std::path::Path::new(path).is_absolute()
}

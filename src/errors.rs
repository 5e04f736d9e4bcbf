//! Launch failure taxonomy and exit-code mapping.
//!
//! Mapping guide:
//! - io::ErrorKind::NotFound maps to exit code 127 (command not found).
//! - A docker run rejected by the daemon keeps docker's own exit code (125).
//! - Everything else maps to 1.

use std::fmt;
use std::io;

/// One failure class per launch stage. Every variant aborts the whole
/// launch; no partial session is left registered under a name.
#[derive(Debug)]
pub enum LaunchError {
    /// Engine unreachable: the binary is missing entirely, or the daemon
    /// never answered within the bounded start-and-poll budget.
    RuntimeUnavailable { detail: String, engine_missing: bool },
    /// SSH agent unreachable or the resolved key file does not exist.
    CredentialUnavailable(String),
    /// Two launches raced to the same session name; surfaced after one
    /// re-allocation attempt already failed.
    NameCollision(String),
    /// The runtime rejected the composed invocation; docker's diagnostic
    /// has already been written to the caller's stderr.
    LaunchFailure { detail: String, code: Option<i32> },
    Io(io::Error),
}

impl fmt::Display for LaunchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LaunchError::RuntimeUnavailable { detail, .. } => {
                write!(f, "agent-sandbox: container engine unavailable: {detail}")
            }
            LaunchError::CredentialUnavailable(msg) => {
                write!(f, "agent-sandbox: credential forwarding failed: {msg}")
            }
            LaunchError::NameCollision(name) => {
                write!(
                    f,
                    "agent-sandbox: session name {name} was taken by a concurrent launch (retried once); rerun to allocate a fresh name"
                )
            }
            LaunchError::LaunchFailure { detail, .. } => {
                write!(f, "agent-sandbox: docker refused the session: {detail}")
            }
            LaunchError::Io(e) => write!(f, "agent-sandbox: {e}"),
        }
    }
}

impl From<io::Error> for LaunchError {
    fn from(e: io::Error) -> Self {
        LaunchError::Io(e)
    }
}

/// Map an io::Error to a process exit code:
/// - 127 for NotFound (command not found)
/// - 1 for all other errors
pub fn exit_code_for_io_error(e: &io::Error) -> u8 {
    if e.kind() == io::ErrorKind::NotFound {
        127
    } else {
        1
    }
}

/// Convert a LaunchError to the process exit code (parity with the
/// io::Error mapping; docker run failures keep docker's own code).
pub fn exit_code_for_launch_error(e: &LaunchError) -> u8 {
    match e {
        LaunchError::RuntimeUnavailable { engine_missing, .. } => {
            if *engine_missing {
                127
            } else {
                1
            }
        }
        LaunchError::CredentialUnavailable(_) | LaunchError::NameCollision(_) => 1,
        LaunchError::LaunchFailure { code, .. } => match code {
            Some(c) if *c > 0 && *c <= 255 => *c as u8,
            _ => 1,
        },
        LaunchError::Io(ioe) => exit_code_for_io_error(ioe),
    }
}

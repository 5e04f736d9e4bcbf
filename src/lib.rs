//! agent-sandbox: host-side launcher for an isolated coding-assistant
//! session inside Docker.
//!
//! One launch runs five stages in order, each rebuilt from scratch per
//! invocation (the process persists no state of its own):
//! 1. [`runtime::ensure_ready`] probes the engine and starts it if needed.
//! 2. [`invocation::normalize`] turns raw CLI tokens into a canonical spec.
//! 3. [`credentials::prepare`] resolves and forwards host credentials.
//! 4. [`session::allocate`] picks a collision-free session name.
//! 5. [`launch::launch`] composes and executes `docker run`, propagating
//!    the session's exit code unchanged.

pub mod color;
pub mod credentials;
pub mod errors;
pub mod invocation;
pub mod launch;
pub mod runtime;
pub mod session;

pub use color::{
    color_enabled_stderr, log_error_stderr, log_info_stderr, log_warn_stderr, paint, set_color_mode,
    ColorMode,
};
pub use credentials::{prepare, CredentialBundle, ForwardStrategy, Mount};
pub use errors::{exit_code_for_io_error, exit_code_for_launch_error, LaunchError};
pub use invocation::{normalize, InvocationSpec, ResourceLimits};
pub use launch::{build_run_command, default_image, launch, LaunchOptions};
pub use runtime::{container_runtime_path, engine_ready, ensure_ready, RuntimeState};
pub use session::{allocate, first_free_suffix, SessionIdentity, SESSION_BASE};

/// Join argv words into one shell-safe preview line, quoting each.
pub fn shell_join(args: &[String]) -> String {
    args.iter()
        .map(|a| shell_escape(a))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Quote a single word for a POSIX shell preview.
pub fn shell_escape(s: &str) -> String {
    if s.is_empty() {
        "''".to_string()
    } else if s
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || "-_=./:@".contains(c))
    {
        s.to_string()
    } else {
        let escaped = s.replace('\'', "'\"'\"'");
        format!("'{}'", escaped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shell_escape_passes_safe_words() {
        assert_eq!(shell_escape("--cpus=2"), "--cpus=2");
        assert_eq!(shell_escape("/home/u/.ssh/id_rsa"), "/home/u/.ssh/id_rsa");
    }

    #[test]
    fn shell_escape_quotes_spaces_and_quotes() {
        assert_eq!(shell_escape("fix the bug"), "'fix the bug'");
        assert_eq!(shell_escape("it's"), "'it'\"'\"'s'");
        assert_eq!(shell_escape(""), "''");
    }

    #[test]
    fn shell_join_renders_one_line() {
        let parts = vec![
            "docker".to_string(),
            "run".to_string(),
            "-p".to_string(),
            "fix the bug".to_string(),
        ];
        assert_eq!(shell_join(&parts), "docker run -p 'fix the bug'");
    }
}

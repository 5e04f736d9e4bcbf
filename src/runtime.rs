#![allow(clippy::module_name_repetitions)]
//! Container engine discovery and readiness probing.
//!
//! The probe runs once per launch and gates everything else: locate the
//! `docker` binary, query the daemon, kick a best-effort engine start when
//! the daemon is down, and poll within a bounded budget. VM-backed engines
//! (colima, Docker Desktop) get a longer budget than a native daemon.

use std::env;
use std::io;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::time::Duration;

use which::which;

use crate::errors::LaunchError;

/// Derived fresh on every launch; never persisted.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum RuntimeState {
    Unavailable,
    Starting,
    Ready,
}

/// Polling budget for one readiness wait.
#[derive(Copy, Clone, Debug)]
pub struct ProbeBudget {
    pub attempts: u32,
    pub interval: Duration,
}

/// VM-backed engines boot a whole guest before the daemon answers.
pub const VM_BUDGET: ProbeBudget = ProbeBudget {
    attempts: 30,
    interval: Duration::from_secs(2),
};

/// A native daemon either starts within seconds or not at all.
pub const NATIVE_BUDGET: ProbeBudget = ProbeBudget {
    attempts: 20,
    interval: Duration::from_secs(1),
};

pub fn container_runtime_path() -> io::Result<PathBuf> {
    // Allow tests or callers to explicitly disable Docker detection to avoid hard failures
    if env::var("AGENT_SANDBOX_SKIP_DOCKER").ok().as_deref() == Some("1") {
        return Err(io::Error::new(
            io::ErrorKind::NotFound,
            "Docker disabled by environment override.",
        ));
    }

    if let Ok(p) = which("docker") {
        return Ok(p);
    }
    Err(io::Error::new(
        io::ErrorKind::NotFound,
        "Docker is required but was not found in PATH.",
    ))
}

/// One lightweight status query: `docker info` with silenced output.
pub fn engine_ready() -> bool {
    let Ok(docker) = container_runtime_path() else {
        return false;
    };
    Command::new(docker)
        .arg("info")
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

/// Which start action applies on this host, probed by what is on PATH and
/// on disk rather than by target_os.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum EngineStarter {
    Colima,
    DockerDesktop,
    Systemd,
}

impl EngineStarter {
    pub fn vm_backed(self) -> bool {
        matches!(self, EngineStarter::Colima | EngineStarter::DockerDesktop)
    }
}

pub fn detect_starter() -> Option<EngineStarter> {
    if which("colima").is_ok() {
        return Some(EngineStarter::Colima);
    }
    if which("open").is_ok() {
        if let Some(h) = home::home_dir() {
            if h.join("Library/Containers/com.docker.docker").is_dir()
                || h.join(".docker/run").is_dir()
            {
                return Some(EngineStarter::DockerDesktop);
            }
        }
    }
    if which("systemctl").is_ok() {
        return Some(EngineStarter::Systemd);
    }
    None
}

/// Best-effort engine start. A failed or missing starter is forgone, not
/// fatal; the poll loop decides the outcome.
fn try_start_engine(starter: EngineStarter) -> bool {
    let (bin, args): (&str, &[&str]) = match starter {
        EngineStarter::Colima => ("colima", &["start"]),
        EngineStarter::DockerDesktop => ("open", &["-a", "Docker"]),
        EngineStarter::Systemd => ("systemctl", &["start", "docker"]),
    };
    Command::new(bin)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

/// Fixed-interval poll loop over an injected status query. Returns Ready as
/// soon as the query succeeds, Unavailable after exactly `attempts` failed
/// queries.
pub fn wait_until_ready<F: FnMut() -> bool>(
    mut status: F,
    attempts: u32,
    interval: Duration,
) -> RuntimeState {
    for i in 0..attempts {
        if status() {
            return RuntimeState::Ready;
        }
        if i + 1 < attempts && !interval.is_zero() {
            std::thread::sleep(interval);
        }
    }
    RuntimeState::Unavailable
}

/// Probe the engine, starting it if necessary, within the platform budget.
pub fn ensure_ready() -> Result<RuntimeState, LaunchError> {
    if let Err(e) = container_runtime_path() {
        return Err(LaunchError::RuntimeUnavailable {
            detail: format!("docker not found in PATH ({e}); install Docker (or colima) and rerun"),
            engine_missing: true,
        });
    }

    if engine_ready() {
        return Ok(RuntimeState::Ready);
    }

    let starter = detect_starter();
    let use_err = crate::color_enabled_stderr();
    match starter {
        Some(s) => {
            crate::log_info_stderr(
                use_err,
                &format!("agent-sandbox: engine not running; attempting start via {s:?}"),
            );
            // Outcome is decided by the poll loop, not by the starter.
            let _ = try_start_engine(s);
        }
        None => {
            crate::log_warn_stderr(
                use_err,
                "agent-sandbox: engine not running and no starter tool found; waiting for it to come up",
            );
        }
    }

    let budget = match starter {
        Some(s) if s.vm_backed() => VM_BUDGET,
        _ => NATIVE_BUDGET,
    };

    match wait_until_ready(engine_ready, budget.attempts, budget.interval) {
        RuntimeState::Ready => Ok(RuntimeState::Ready),
        _ => Err(LaunchError::RuntimeUnavailable {
            detail: format!(
                "engine did not become ready within {}s; start it manually (colima start / systemctl start docker) and rerun",
                u64::from(budget.attempts) * budget.interval.as_secs().max(1)
            ),
            engine_missing: false,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ready_after_k_polls_counts_exactly() {
        let mut polls = 0u32;
        let state = wait_until_ready(
            || {
                polls += 1;
                polls >= 4
            },
            10,
            Duration::ZERO,
        );
        assert_eq!(state, RuntimeState::Ready);
        assert_eq!(polls, 4);
    }

    #[test]
    fn never_ready_stops_at_the_bound() {
        let mut polls = 0u32;
        let state = wait_until_ready(
            || {
                polls += 1;
                false
            },
            7,
            Duration::ZERO,
        );
        assert_eq!(state, RuntimeState::Unavailable);
        assert_eq!(polls, 7);
    }

    #[test]
    fn immediately_ready_polls_once() {
        let mut polls = 0u32;
        let state = wait_until_ready(
            || {
                polls += 1;
                true
            },
            30,
            Duration::ZERO,
        );
        assert_eq!(state, RuntimeState::Ready);
        assert_eq!(polls, 1);
    }

    #[test]
    fn vm_budget_outlasts_native_budget() {
        let vm = u64::from(VM_BUDGET.attempts) * VM_BUDGET.interval.as_secs();
        let native = u64::from(NATIVE_BUDGET.attempts) * NATIVE_BUDGET.interval.as_secs();
        assert!(vm > native);
    }
}

#![allow(clippy::module_name_repetitions)]
//! `docker run` assembly, preview rendering, and synchronous execution.
//!
//! The launcher is the terminal consumer: it composes the probed runtime,
//! the allocated identity, the credential bundle, and the normalized
//! invocation into one `docker run`, executes it with inherited stdio, and
//! propagates the session's exit code unchanged.

use std::env;
use std::ffi::OsString;
use std::fs;
use std::io;
use std::path::PathBuf;
use std::process::Command;

use crate::credentials::{config_dir, CredentialBundle, Mount};
use crate::errors::LaunchError;
use crate::invocation::InvocationSpec;
use crate::runtime::container_runtime_path;
use crate::session::{allocate, SessionIdentity};

/// In-container session account and home; the persistent config dir is
/// mounted over the home so tool state survives sessions.
pub const SESSION_USER: &str = "agent";
pub const SESSION_HOME: &str = "/home/agent";
/// Server-configuration file the entrypoint reads (shipped via the config
/// dir mount).
pub const MCP_CONFIG_PATH: &str = "/home/agent/.mcp.json";
/// Entrypoint contract flags.
pub const PERMISSION_BYPASS_FLAG: &str = "--dangerously-skip-permissions";
pub const IDE_FLAG: &str = "--ide";

#[derive(Clone, Debug)]
pub struct LaunchOptions {
    pub image: String,
    pub verbose: bool,
}

/// Image reference for the session container.
pub fn default_image() -> String {
    image_or_default(env::var("AGENT_SANDBOX_IMAGE").ok())
}

fn image_or_default(overridden: Option<String>) -> String {
    match overridden {
        Some(img) if !img.trim().is_empty() => img,
        _ => "agent-sandbox:latest".to_string(),
    }
}

/// Host IDE-settings directory, mounted read-only when present.
fn ide_settings_dir() -> Option<PathBuf> {
    if let Ok(dir) = env::var("AGENT_SANDBOX_IDE_DIR") {
        let p = PathBuf::from(dir.trim());
        if p.is_absolute() && p.is_dir() {
            return Some(p);
        }
        return None;
    }
    let p = home::home_dir()?.join(".claude/ide");
    if p.is_dir() {
        Some(p)
    } else {
        None
    }
}

fn push_env_kv(args: &mut Vec<OsString>, key: &str, val: &str) {
    args.push(OsString::from("-e"));
    args.push(OsString::from(format!("{key}={val}")));
}

fn push_volume(args: &mut Vec<OsString>, mount: &Mount) {
    args.push(OsString::from("-v"));
    args.push(OsString::from(mount.volume_arg()));
}

/// Build the full `docker run` command for one session, plus a shell-quoted
/// preview line for `--verbose`/`--dry-run` output.
pub fn build_run_command(
    identity: &SessionIdentity,
    bundle: &CredentialBundle,
    spec: &InvocationSpec,
    opts: &LaunchOptions,
) -> io::Result<(Command, String)> {
    let docker = container_runtime_path()?;

    // TTY flags
    let tty_flags: Vec<&str> = if atty::is(atty::Stream::Stdin) || atty::is(atty::Stream::Stdout) {
        vec!["-it"]
    } else {
        vec!["-i"]
    };

    // Current working directory mounted at its own host path, so paths the
    // assistant reports match what the user sees on the host.
    let pwd = {
        let p = env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        fs::canonicalize(&p).unwrap_or(p)
    };

    let cfg = config_dir()?;
    fs::create_dir_all(&cfg)?;

    let mut args: Vec<OsString> = Vec::new();
    args.push(OsString::from("run"));
    // Ephemeral session: the engine reclaims name and state on exit, also
    // when the launcher dies abnormally.
    args.push(OsString::from("--rm"));
    for f in &tty_flags {
        args.push(OsString::from(*f));
    }
    args.push(OsString::from("--name"));
    args.push(OsString::from(identity.name()));

    // Resource limits from the normalized invocation.
    args.push(OsString::from("--cpus"));
    args.push(OsString::from(spec.limits.cpus.clone()));
    args.push(OsString::from("--memory"));
    args.push(OsString::from(spec.limits.memory.clone()));

    if let Some(gid) = bundle.group_add {
        args.push(OsString::from("--group-add"));
        args.push(OsString::from(gid.to_string()));
    }

    // Persistent config dir read-write over the session home.
    push_volume(
        &mut args,
        &Mount {
            source: cfg,
            target: SESSION_HOME.to_string(),
            read_only: false,
        },
    );

    // IDE settings read-only, when the host has them.
    let ide_dir = ide_settings_dir();
    if let Some(dir) = &ide_dir {
        push_volume(
            &mut args,
            &Mount {
                source: dir.clone(),
                target: format!("{SESSION_HOME}/.claude/ide"),
                read_only: true,
            },
        );
    }

    // Workspace at its own host path.
    push_volume(
        &mut args,
        &Mount {
            source: pwd.clone(),
            target: pwd.display().to_string(),
            read_only: false,
        },
    );
    args.push(OsString::from("-w"));
    args.push(OsString::from(pwd.as_os_str()));

    // Forwarded credentials: socket mounts and agent env.
    for m in &bundle.mounts {
        push_volume(&mut args, m);
    }
    push_env_kv(&mut args, "HOME", SESSION_HOME);
    push_env_kv(&mut args, "USER", SESSION_USER);
    for (k, v) in &bundle.env {
        push_env_kv(&mut args, k, v);
    }

    args.push(OsString::from(opts.image.clone()));

    // Entrypoint contract: bypass flag, IDE flag when settings are mounted,
    // server config path, then the normalized pass-through and prompt.
    args.push(OsString::from(PERMISSION_BYPASS_FLAG));
    if ide_dir.is_some() {
        args.push(OsString::from(IDE_FLAG));
    }
    args.push(OsString::from("--mcp-config"));
    args.push(OsString::from(MCP_CONFIG_PATH));
    for a in spec.entry_args() {
        args.push(OsString::from(a));
    }

    let preview = {
        let mut parts: Vec<String> = vec![docker.display().to_string()];
        parts.extend(args.iter().map(|a| a.to_string_lossy().to_string()));
        crate::shell_join(&parts)
    };

    let mut cmd = Command::new(docker);
    cmd.args(&args);
    Ok((cmd, preview))
}

fn run_once(
    identity: &SessionIdentity,
    bundle: &CredentialBundle,
    spec: &InvocationSpec,
    opts: &LaunchOptions,
) -> Result<i32, LaunchError> {
    let (mut cmd, preview) = build_run_command(identity, bundle, spec, opts)?;
    if opts.verbose {
        let use_err = crate::color_enabled_stderr();
        crate::log_info_stderr(use_err, &format!("agent-sandbox: docker: {preview}"));
    }
    let status = cmd.status().map_err(LaunchError::Io)?;
    Ok(status.code().unwrap_or(1))
}

/// Whether a failed `docker run` was a name-collision race: the daemon
/// refused the invocation (125) and the name is now held by someone else.
fn lost_name_race(identity: &SessionIdentity, code: i32) -> bool {
    if code != 125 {
        return false;
    }
    crate::session::list_session_names(&identity.base)
        .map(|names| names.contains(&identity.name()))
        .unwrap_or(false)
}

/// Retry discipline for a lost name race: exactly one re-allocation and
/// re-run, then surface the collision. Generic over the runner, the race
/// detector, and the allocator so the discipline is testable without an
/// engine; `launch` wires in the real ones.
fn launch_with<Run, Lost, Realloc>(
    identity: SessionIdentity,
    mut run: Run,
    mut lost_race: Lost,
    realloc: Realloc,
) -> Result<i32, LaunchError>
where
    Run: FnMut(&SessionIdentity) -> Result<i32, LaunchError>,
    Lost: FnMut(&SessionIdentity, i32) -> bool,
    Realloc: FnOnce(&str) -> Result<SessionIdentity, LaunchError>,
{
    let code = run(&identity)?;
    if !lost_race(&identity, code) {
        return Ok(code);
    }

    let use_err = crate::color_enabled_stderr();
    crate::log_warn_stderr(
        use_err,
        &format!(
            "agent-sandbox: name {} was taken by a concurrent launch; re-allocating once",
            identity.name()
        ),
    );
    let retry = realloc(&identity.base)?;
    let code = run(&retry)?;
    if lost_race(&retry, code) {
        return Err(LaunchError::NameCollision(retry.name()));
    }
    Ok(code)
}

/// Execute the session synchronously, retrying exactly once with a fresh
/// identity if a concurrent launch won the allocated name. The returned
/// code is the session's own exit code, propagated unchanged.
pub fn launch(
    identity: SessionIdentity,
    bundle: &CredentialBundle,
    spec: &InvocationSpec,
    opts: &LaunchOptions,
) -> Result<i32, LaunchError> {
    launch_with(
        identity,
        |id| run_once(id, bundle, spec, opts),
        lost_name_race,
        allocate,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(suffix: u32) -> SessionIdentity {
        SessionIdentity {
            base: "sandbox".to_string(),
            suffix,
        }
    }

    #[test]
    fn image_override_wins_over_default() {
        assert_eq!(
            image_or_default(Some("registry.local/sandbox:dev".to_string())),
            "registry.local/sandbox:dev"
        );
    }

    #[test]
    fn blank_or_missing_image_falls_back() {
        assert_eq!(image_or_default(Some("  ".to_string())), "agent-sandbox:latest");
        assert_eq!(image_or_default(None), "agent-sandbox:latest");
    }

    #[test]
    fn non_125_exit_is_never_a_name_race() {
        assert!(!lost_name_race(&id(0), 0));
        assert!(!lost_name_race(&id(0), 1));
        assert!(!lost_name_race(&id(0), 130));
    }

    #[test]
    fn clean_run_never_reallocates() {
        let mut runs: Vec<String> = Vec::new();
        let code = launch_with(
            id(0),
            |i| {
                runs.push(i.name());
                Ok(7)
            },
            |_, _| false,
            |_| panic!("re-allocation on a clean run"),
        )
        .unwrap();
        assert_eq!(code, 7);
        assert_eq!(runs, vec!["sandbox-0"]);
    }

    #[test]
    fn lost_race_reallocates_exactly_once_then_succeeds() {
        let mut runs: Vec<String> = Vec::new();
        let code = launch_with(
            id(0),
            |i| {
                runs.push(i.name());
                if i.suffix == 0 {
                    Ok(125)
                } else {
                    Ok(0)
                }
            },
            |i, code| code == 125 && i.suffix == 0,
            |base| {
                Ok(SessionIdentity {
                    base: base.to_string(),
                    suffix: 1,
                })
            },
        )
        .unwrap();
        assert_eq!(code, 0);
        assert_eq!(runs, vec!["sandbox-0", "sandbox-1"]);
    }

    #[test]
    fn second_lost_race_surfaces_collision_without_a_third_attempt() {
        let mut runs = 0u32;
        let err = launch_with(
            id(0),
            |_| {
                runs += 1;
                Ok(125)
            },
            |_, code| code == 125,
            |base| {
                Ok(SessionIdentity {
                    base: base.to_string(),
                    suffix: 1,
                })
            },
        )
        .unwrap_err();
        assert_eq!(runs, 2, "exactly one retry after the first loss");
        match err {
            LaunchError::NameCollision(name) => assert_eq!(name, "sandbox-1"),
            other => panic!("expected NameCollision, got {other:?}"),
        }
    }

    #[test]
    fn failed_reallocation_aborts_the_retry() {
        let mut runs = 0u32;
        let err = launch_with(
            id(0),
            |_| {
                runs += 1;
                Ok(125)
            },
            |_, code| code == 125,
            |_| {
                Err(LaunchError::LaunchFailure {
                    detail: "docker ps failed: daemon gone".to_string(),
                    code: Some(1),
                })
            },
        )
        .unwrap_err();
        assert_eq!(runs, 1);
        assert!(matches!(err, LaunchError::LaunchFailure { .. }));
    }
}

#![allow(clippy::module_name_repetitions)]
//! Host credential forwarding: SSH agent socket, key registration, and the
//! copied git identity.
//!
//! The forwarding mechanism differs by engine flavor, so it is a strategy
//! picked once per launch by a capability probe (which socket paths exist,
//! which engine state dirs exist) rather than by target_os checks. That
//! keeps the selection testable with a fake probe.

use std::env;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use crate::errors::LaunchError;

/// Key name used when neither `--ssh-key` nor the env override is set.
pub const DEFAULT_KEY_NAME: &str = "id_rsa";
/// Environment override for the default key name.
pub const SSH_KEY_ENV: &str = "AGENT_SANDBOX_SSH_KEY";
/// Well-known agent socket path that VM-backed engines (Docker Desktop,
/// colima with ssh-agent forwarding) expose inside containers.
pub const VM_AGENT_SOCKET: &str = "/run/host-services/ssh-auth.sock";

/// One bind mount of the final invocation.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Mount {
    pub source: PathBuf,
    pub target: String,
    pub read_only: bool,
}

impl Mount {
    /// Render as a docker `-v` value.
    pub fn volume_arg(&self) -> String {
        if self.read_only {
            format!("{}:{}:ro", self.source.display(), self.target)
        } else {
            format!("{}:{}", self.source.display(), self.target)
        }
    }
}

/// Everything the launcher must add to the invocation so git and ssh work
/// inside the session. Socket mounts are not read-only: connecting to a
/// unix socket requires write access on the node.
#[derive(Clone, Debug, Default)]
pub struct CredentialBundle {
    pub mounts: Vec<Mount>,
    pub env: Vec<(String, String)>,
    pub group_add: Option<u32>,
}

/// Host facts the strategy selection depends on, injectable for tests.
pub trait CapabilityProbe {
    fn path_exists(&self, p: &Path) -> bool;
    fn env_var(&self, key: &str) -> Option<String>;
}

/// Probe backed by the real host.
pub struct HostProbe;

impl CapabilityProbe for HostProbe {
    fn path_exists(&self, p: &Path) -> bool {
        p.exists()
    }
    fn env_var(&self, key: &str) -> Option<String> {
        env::var(key).ok().filter(|v| !v.is_empty())
    }
}

/// How the host agent socket reaches the session.
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum ForwardStrategy {
    /// Engine-mediated well-known socket; the engine's VM owns the real
    /// forwarding, the host never sees the node.
    VmSocket,
    /// Native daemon: bind-mount the host agent socket at its own path.
    HostSocket(PathBuf),
}

/// Pick the forwarding mechanism from observed host state. Fails when no
/// agent socket is advertised at all: a session without agent access would
/// fail git pushes opaquely later, which is worse than failing here.
pub fn select_forward_strategy(
    probe: &dyn CapabilityProbe,
    home: &Path,
) -> Result<ForwardStrategy, LaunchError> {
    let sock = probe.env_var("SSH_AUTH_SOCK").ok_or_else(|| {
        LaunchError::CredentialUnavailable(
            "SSH_AUTH_SOCK is not set; start ssh-agent and add your key".to_string(),
        )
    })?;

    let vm_backed = probe.path_exists(&home.join(".colima"))
        || probe.path_exists(&home.join(".docker/run/docker.sock"))
        || probe.path_exists(&home.join("Library/Containers/com.docker.docker"));
    if vm_backed {
        Ok(ForwardStrategy::VmSocket)
    } else {
        Ok(ForwardStrategy::HostSocket(PathBuf::from(sock)))
    }
}

/// Resolve which private key to register. Explicit request wins over the
/// env default, which wins over the hardcoded name; bare names resolve
/// under `~/.ssh/`, absolute paths are used verbatim.
pub fn resolve_ssh_key(
    requested: Option<&str>,
    env_default: Option<&str>,
    home: &Path,
) -> PathBuf {
    let pick = |name: &str| -> PathBuf {
        let p = Path::new(name);
        if p.is_absolute() {
            p.to_path_buf()
        } else {
            home.join(".ssh").join(name)
        }
    };
    match (requested, env_default) {
        (Some(r), _) => pick(r),
        (None, Some(e)) => pick(e),
        (None, None) => pick(DEFAULT_KEY_NAME),
    }
}

/// Host-side persistent configuration directory; the one path whose
/// contents outlive individual sessions.
pub fn config_dir() -> io::Result<PathBuf> {
    let home = home::home_dir()
        .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "cannot determine home directory"))?;
    Ok(home.join(".agent-sandbox"))
}

fn register_key_with_agent(key: &Path) -> Result<(), LaunchError> {
    let status = Command::new("ssh-add")
        .arg(key)
        .stdin(Stdio::inherit())
        .stdout(Stdio::null())
        .stderr(Stdio::inherit())
        .status()
        .map_err(|e| {
            LaunchError::CredentialUnavailable(format!("cannot run ssh-add: {e}"))
        })?;
    if !status.success() {
        return Err(LaunchError::CredentialUnavailable(format!(
            "ssh-add {} failed; is the agent running and the key passphrase correct?",
            key.display()
        )));
    }
    Ok(())
}

/// Copy the host git identity into the config dir, overwriting the previous
/// copy. Concurrent launches race here last-write-wins, which is benign:
/// the content is normally identical.
fn copy_git_identity(home: &Path, cfg: &Path) -> io::Result<()> {
    let src = home.join(".gitconfig");
    if src.is_file() {
        fs::copy(&src, cfg.join(".gitconfig"))?;
    } else {
        let use_err = crate::color_enabled_stderr();
        crate::log_warn_stderr(
            use_err,
            "agent-sandbox: warning: no ~/.gitconfig on host; commits inside the session will lack an identity",
        );
    }
    Ok(())
}

/// Seed a default server configuration on first use. Later launches leave
/// the file alone; the in-container tool owns its content from then on.
fn seed_server_config(cfg: &Path) -> io::Result<()> {
    let path = cfg.join(".mcp.json");
    if !path.exists() {
        let default = serde_json::json!({ "mcpServers": {} });
        fs::write(&path, format!("{default:#}\n"))?;
    }
    Ok(())
}

/// Group owning the agent socket node, when it is not the caller's own
/// primary group. Discovered per launch: the gid differs across hosts.
#[cfg(unix)]
fn socket_supplementary_gid(sock: &Path) -> Option<u32> {
    let st = nix::sys::stat::stat(sock).ok()?;
    let gid = st.st_gid;
    if gid == u32::from(nix::unistd::getgid()) {
        None
    } else {
        Some(gid)
    }
}

#[cfg(not(unix))]
fn socket_supplementary_gid(_sock: &Path) -> Option<u32> {
    None
}

/// Build the credential bundle for this launch. With `register` false
/// (dry-run) the key is resolved and the strategy picked, but nothing is
/// registered or copied.
pub fn prepare(requested_key: Option<&str>, register: bool) -> Result<CredentialBundle, LaunchError> {
    let home = home::home_dir().ok_or_else(|| {
        LaunchError::CredentialUnavailable("cannot determine home directory".to_string())
    })?;

    let env_default = env::var(SSH_KEY_ENV).ok().filter(|v| !v.is_empty());
    let key = resolve_ssh_key(requested_key, env_default.as_deref(), &home);
    if !key.is_file() {
        if register {
            return Err(LaunchError::CredentialUnavailable(format!(
                "ssh key not found: {}",
                key.display()
            )));
        }
        let use_err = crate::color_enabled_stderr();
        crate::log_warn_stderr(
            use_err,
            &format!("agent-sandbox: warning: ssh key not found: {}", key.display()),
        );
    }

    let strategy = select_forward_strategy(&HostProbe, &home)?;

    let cfg = config_dir().map_err(LaunchError::Io)?;
    fs::create_dir_all(&cfg)?;
    if register {
        register_key_with_agent(&key)?;
        copy_git_identity(&home, &cfg)?;
        seed_server_config(&cfg)?;
    }

    let mut bundle = CredentialBundle::default();
    match strategy {
        ForwardStrategy::VmSocket => {
            bundle.mounts.push(Mount {
                source: PathBuf::from(VM_AGENT_SOCKET),
                target: VM_AGENT_SOCKET.to_string(),
                read_only: false,
            });
            bundle
                .env
                .push(("SSH_AUTH_SOCK".to_string(), VM_AGENT_SOCKET.to_string()));
        }
        ForwardStrategy::HostSocket(sock) => {
            bundle.group_add = socket_supplementary_gid(&sock);
            let target = sock.display().to_string();
            bundle.mounts.push(Mount {
                source: sock,
                target: target.clone(),
                read_only: false,
            });
            bundle.env.push(("SSH_AUTH_SOCK".to_string(), target));
        }
    }
    Ok(bundle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    struct FakeProbe {
        paths: Vec<PathBuf>,
        env: HashMap<String, String>,
    }

    impl CapabilityProbe for FakeProbe {
        fn path_exists(&self, p: &Path) -> bool {
            self.paths.iter().any(|x| x == p)
        }
        fn env_var(&self, key: &str) -> Option<String> {
            self.env.get(key).cloned()
        }
    }

    fn probe_with_agent(paths: Vec<PathBuf>) -> FakeProbe {
        let mut env = HashMap::new();
        env.insert(
            "SSH_AUTH_SOCK".to_string(),
            "/tmp/agent.1234/sock".to_string(),
        );
        FakeProbe { paths, env }
    }

    #[test]
    fn explicit_key_wins_over_env_default() {
        let home = Path::new("/home/u");
        let p = resolve_ssh_key(Some("custom"), Some("from_env"), home);
        assert_eq!(p, Path::new("/home/u/.ssh/custom"));
    }

    #[test]
    fn env_default_wins_over_hardcoded() {
        let home = Path::new("/home/u");
        let p = resolve_ssh_key(None, Some("work_key"), home);
        assert_eq!(p, Path::new("/home/u/.ssh/work_key"));
    }

    #[test]
    fn hardcoded_default_used_last() {
        let home = Path::new("/home/u");
        let p = resolve_ssh_key(None, None, home);
        assert_eq!(p, Path::new("/home/u/.ssh/id_rsa"));
    }

    #[test]
    fn absolute_request_is_used_verbatim() {
        let home = Path::new("/home/u");
        let p = resolve_ssh_key(Some("/keys/deploy_ed25519"), None, home);
        assert_eq!(p, Path::new("/keys/deploy_ed25519"));
    }

    #[test]
    fn colima_state_dir_selects_vm_socket() {
        let home = Path::new("/home/u");
        let probe = probe_with_agent(vec![home.join(".colima")]);
        let s = select_forward_strategy(&probe, home).unwrap();
        assert_eq!(s, ForwardStrategy::VmSocket);
    }

    #[test]
    fn bare_daemon_reuses_host_socket_path() {
        let home = Path::new("/home/u");
        let probe = probe_with_agent(vec![]);
        let s = select_forward_strategy(&probe, home).unwrap();
        assert_eq!(
            s,
            ForwardStrategy::HostSocket(PathBuf::from("/tmp/agent.1234/sock"))
        );
    }

    #[test]
    fn missing_agent_socket_is_fatal() {
        let home = Path::new("/home/u");
        let probe = FakeProbe {
            paths: vec![],
            env: HashMap::new(),
        };
        let err = select_forward_strategy(&probe, home).unwrap_err();
        assert!(matches!(err, LaunchError::CredentialUnavailable(_)));
    }

    #[test]
    fn socket_mount_is_not_read_only() {
        let m = Mount {
            source: PathBuf::from("/tmp/agent.sock"),
            target: "/tmp/agent.sock".to_string(),
            read_only: false,
        };
        assert_eq!(m.volume_arg(), "/tmp/agent.sock:/tmp/agent.sock");
    }

    #[test]
    fn server_config_seeded_only_on_first_use() {
        let dir = tempfile::tempdir().unwrap();
        seed_server_config(dir.path()).unwrap();
        let p = dir.path().join(".mcp.json");
        assert!(std::fs::read_to_string(&p).unwrap().contains("mcpServers"));

        std::fs::write(&p, "{\"mcpServers\":{\"files\":{}}}").unwrap();
        seed_server_config(dir.path()).unwrap();
        assert!(std::fs::read_to_string(&p).unwrap().contains("files"));
    }

    #[test]
    fn read_only_mount_renders_ro_suffix() {
        let m = Mount {
            source: PathBuf::from("/home/u/.claude/ide"),
            target: "/home/agent/.claude/ide".to_string(),
            read_only: true,
        };
        assert_eq!(
            m.volume_arg(),
            "/home/u/.claude/ide:/home/agent/.claude/ide:ro"
        );
    }
}

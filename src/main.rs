use std::process::{Command, ExitCode};

use clap::Parser;

use agent_sandbox::{
    allocate, build_run_command, color_enabled_stderr, credentials, default_image, engine_ready,
    ensure_ready, exit_code_for_launch_error, launch, log_error_stderr, log_info_stderr,
    log_warn_stderr, normalize, set_color_mode, ColorMode, LaunchError, LaunchOptions,
    SessionIdentity, SESSION_BASE,
};

#[derive(Parser, Debug)]
#[command(
    name = "agent-sandbox",
    version,
    about = "Run an isolated AI coding-assistant session inside Docker with the current directory mounted and host credentials forwarded."
)]
struct Cli {
    /// Override the session image (full ref). Defaults to AGENT_SANDBOX_IMAGE or agent-sandbox:latest
    #[arg(long)]
    image: Option<String>,

    /// Print detailed execution info
    #[arg(long)]
    verbose: bool,

    /// Prepare and print what would run, but do not execute
    #[arg(long)]
    dry_run: bool,

    /// Colorize stderr diagnostics: auto|always|never
    #[arg(long, value_enum)]
    color: Option<ColorMode>,

    /// Session arguments: --ssh-key/--cpus/--memory are handled here, any
    /// other flag passes through to the entrypoint, bare text becomes the
    /// prompt. A leading `doctor` runs diagnostics instead.
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    args: Vec<String>,
}

fn run_doctor() -> ExitCode {
    let version = env!("CARGO_PKG_VERSION");
    eprintln!("agent-sandbox doctor");
    eprintln!("  version: v{}", version);
    eprintln!(
        "  build: {} ({}, {})",
        env!("AGENT_SANDBOX_BUILD_DATE"),
        env!("AGENT_SANDBOX_BUILD_TARGET"),
        env!("AGENT_SANDBOX_BUILD_PROFILE")
    );
    eprintln!("  rustc: {}", env!("AGENT_SANDBOX_BUILD_RUSTC"));
    eprintln!("  host: {} / {}", std::env::consts::OS, std::env::consts::ARCH);

    match agent_sandbox::container_runtime_path() {
        Ok(p) => {
            eprintln!("  docker: {}", p.display());
            if let Ok(out) = Command::new(&p).arg("--version").output() {
                let s = String::from_utf8_lossy(&out.stdout).trim().to_string();
                if !s.is_empty() {
                    eprintln!("  docker --version: {}", s);
                }
            }
            eprintln!(
                "  engine ready: {}",
                if engine_ready() { "yes" } else { "no" }
            );
        }
        Err(e) => {
            eprintln!("  docker: not found ({e})");
        }
    }

    match agent_sandbox::runtime::detect_starter() {
        Some(s) => eprintln!("  engine starter: {s:?}"),
        None => eprintln!("  engine starter: none found"),
    }

    let agent_sock = std::env::var("SSH_AUTH_SOCK").unwrap_or_default();
    if agent_sock.is_empty() {
        eprintln!("  ssh agent: SSH_AUTH_SOCK not set");
    } else {
        eprintln!("  ssh agent: {agent_sock}");
    }

    if let Some(home) = home::home_dir() {
        let env_default = std::env::var(credentials::SSH_KEY_ENV)
            .ok()
            .filter(|v| !v.is_empty());
        let key = credentials::resolve_ssh_key(None, env_default.as_deref(), &home);
        eprintln!(
            "  ssh key: {} ({})",
            key.display(),
            if key.is_file() { "present" } else { "missing" }
        );
    }

    match credentials::config_dir() {
        Ok(d) => eprintln!(
            "  config dir: {} ({})",
            d.display(),
            if d.is_dir() { "exists" } else { "will be created" }
        ),
        Err(e) => eprintln!("  config dir: unresolvable ({e})"),
    }

    eprintln!("  image: {}", default_image());
    eprintln!("doctor: completed diagnostics.");
    ExitCode::from(0)
}

fn fail(e: &LaunchError) -> ExitCode {
    let use_err = color_enabled_stderr();
    log_error_stderr(use_err, &e.to_string());
    ExitCode::from(exit_code_for_launch_error(e))
}

fn main() -> ExitCode {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();
    if let Some(mode) = cli.color {
        set_color_mode(mode);
    }

    if cli.args.first().map(String::as_str) == Some("doctor") {
        return run_doctor();
    }

    let spec = normalize(&cli.args);
    let opts = LaunchOptions {
        image: cli.image.unwrap_or_else(default_image),
        verbose: cli.verbose,
    };

    if cli.dry_run {
        return dry_run(&spec, &opts);
    }

    if let Err(e) = ensure_ready() {
        return fail(&e);
    }

    let bundle = match agent_sandbox::prepare(spec.ssh_key.as_deref(), true) {
        Ok(b) => b,
        Err(e) => return fail(&e),
    };

    let identity = match allocate(SESSION_BASE) {
        Ok(id) => id,
        Err(e) => return fail(&e),
    };

    if cli.verbose {
        let use_err = color_enabled_stderr();
        log_info_stderr(use_err, &format!("agent-sandbox: session: {}", identity.name()));
        log_info_stderr(use_err, &format!("agent-sandbox: image: {}", opts.image));
    }

    match launch(identity, &bundle, &spec, &opts) {
        // The session's own exit code, propagated unchanged.
        Ok(code) => ExitCode::from(u8::try_from(code).unwrap_or(1)),
        Err(e) => fail(&e),
    }
}

/// Build and print the invocation without executing it. No side effects
/// beyond config-dir creation: the key is resolved but not registered, the
/// git identity is not copied.
fn dry_run(spec: &agent_sandbox::InvocationSpec, opts: &LaunchOptions) -> ExitCode {
    if let Err(e) = agent_sandbox::container_runtime_path() {
        return fail(&LaunchError::RuntimeUnavailable {
            detail: format!("docker not found in PATH ({e}); install Docker (or colima) and rerun"),
            engine_missing: true,
        });
    }

    let bundle = match agent_sandbox::prepare(spec.ssh_key.as_deref(), false) {
        Ok(b) => b,
        Err(e) => return fail(&e),
    };

    let use_err = color_enabled_stderr();
    let identity = if engine_ready() {
        match allocate(SESSION_BASE) {
            Ok(id) => id,
            Err(e) => return fail(&e),
        }
    } else {
        log_warn_stderr(
            use_err,
            "agent-sandbox: engine not running; previewing with the first session name",
        );
        SessionIdentity {
            base: SESSION_BASE.to_string(),
            suffix: 0,
        }
    };

    match build_run_command(&identity, &bundle, spec, opts) {
        Ok((_cmd, preview)) => {
            log_info_stderr(use_err, &format!("agent-sandbox: docker: {preview}"));
            log_info_stderr(use_err, "agent-sandbox: dry-run requested; not executing Docker.");
            ExitCode::from(0)
        }
        Err(e) => fail(&LaunchError::Io(e)),
    }
}

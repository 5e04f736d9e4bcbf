use std::process::Command;

// Preview assembly end to end, without executing Docker. Skips when the
// host has no docker binary or no reachable agent socket, like the other
// environment-dependent tests.

#[test]
fn test_dry_run_previews_full_invocation() {
    if agent_sandbox::container_runtime_path().is_err() {
        eprintln!("skipping: docker not found in PATH");
        return;
    }
    if std::env::var("SSH_AUTH_SOCK").ok().filter(|v| !v.is_empty()).is_none() {
        eprintln!("skipping: SSH_AUTH_SOCK not set");
        return;
    }

    let home = tempfile::tempdir().expect("tempdir");
    let bin = env!("CARGO_BIN_EXE_agent-sandbox");
    let out = Command::new(bin)
        .args([
            "--dry-run",
            "--cpus",
            "2",
            "--model",
            "sonnet",
            "fix",
            "the",
            "bug",
        ])
        .env("HOME", home.path())
        .env("NO_COLOR", "1")
        .output()
        .expect("failed to run agent-sandbox --dry-run");

    let err = String::from_utf8_lossy(&out.stderr);
    assert!(
        out.status.success(),
        "dry-run exited non-zero: {:?}\nstderr:\n{}",
        out.status.code(),
        err
    );

    assert!(
        err.contains("agent-sandbox: docker:"),
        "expected docker preview in stderr, got:\n{}",
        err
    );
    assert!(err.contains("--name sandbox-"), "missing session name:\n{}", err);
    assert!(err.contains("--cpus 2"), "missing cpu override:\n{}", err);
    assert!(err.contains("--memory 4g"), "missing default memory limit:\n{}", err);
    assert!(
        err.contains("--dangerously-skip-permissions"),
        "missing permission-bypass flag:\n{}",
        err
    );
    assert!(err.contains("--mcp-config"), "missing server config path:\n{}", err);
    assert!(
        err.contains("--model sonnet"),
        "missing pass-through flag and value:\n{}",
        err
    );
    assert!(
        err.contains("-p 'fix the bug'"),
        "missing synthesized prompt pair:\n{}",
        err
    );
    assert!(
        err.contains("dry-run requested; not executing Docker."),
        "missing dry-run notice:\n{}",
        err
    );

    // Config dir creation is the one permitted dry-run side effect.
    assert!(home.path().join(".agent-sandbox").is_dir());
}

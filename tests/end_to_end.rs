//! End-to-end scenarios from spec.md §8, driven against the real `ocimon`
//! binary rather than in-process, mirroring the teacher's own
//! `tests/common.rs` `Sut` (spawn the compiled server binary, point it at a
//! throwaway directory, inspect what it left on disk). Terminal-mode
//! scenarios (spec.md §8 scenario 3, 5) aren't exercised here — driving a
//! real pty client over the attach socket needs a pty-aware test harness
//! this crate doesn't carry, and the underlying pieces (pty install,
//! resize, scrollback replay) are already covered by `src/endpoints.rs`,
//! `src/stream/` and `src/control.rs` unit tests.

use std::{fs, path::Path, process::Command};
use tempfile::tempdir;

fn write_bundle(dir: &Path, json: &str) {
    fs::write(dir.join("config.json"), json).expect("write config.json");
}

/// Run the compiled `ocimon` binary to completion against `bundle_dir`,
/// namespacing every socket/log/state file it creates under
/// `socket_dir/<cid>/`.
fn run_ocimon(cid: &str, bundle_dir: &Path, socket_dir: &Path) -> std::process::ExitStatus {
    Command::new(env!("CARGO_BIN_EXE_ocimon"))
        .env("OCIMON_CID", cid)
        .env("OCIMON_BUNDLE", bundle_dir)
        .env("OCIMON_SOCKET_DIR_PATH", socket_dir)
        .env("OCIMON_LOG_FORMAT", "kubernetes")
        .env("RUST_LOG", "off")
        .status()
        .expect("run ocimon binary")
}

/// Scenario 1: `cwd="/"`, `args=["/bin/true"]`, no terminal, no hooks →
/// state reaches `stopped`, the log file exists and is empty, both sockets
/// are removed.
#[test]
fn bin_true_reaches_stopped_with_empty_log_and_removed_sockets() {
    let bundle = tempdir().expect("bundle tempdir");
    write_bundle(
        bundle.path(),
        r#"{
            "ociVersion": "1.0.2",
            "process": { "cwd": "/", "args": ["/bin/true"] }
        }"#,
    );
    let sockets = tempdir().expect("socket tempdir");

    let status = run_ocimon("scenario1", bundle.path(), sockets.path());
    assert!(status.success(), "ocimon exited with {:?}", status);

    let instance_dir = sockets.path().join("scenario1");
    let log_path = instance_dir.join("scenario1.log");
    assert!(log_path.exists(), "log file should exist");
    assert!(
        fs::read(&log_path).expect("read log").is_empty(),
        "/bin/true produces no output"
    );

    assert!(!instance_dir.join("attach.sock").exists());
    assert!(!instance_dir.join("control.sock").exists());

    let state: serde_json::Value = serde_json::from_slice(
        &fs::read(instance_dir.join("state.json")).expect("read state.json"),
    )
    .expect("parse state.json");
    assert_eq!(state["status"], "stopped");
    assert!(state["annotations"]["io.ociruntime.attach-socket"]
        .as_str()
        .expect("attach-socket annotation present")
        .ends_with("attach.sock"));
}

/// Scenario 2: `cwd="/"`, `args=["/bin/sh","-c","echo hi"]`, pipe mode →
/// log contains one `stdout` record with payload `hi\n`.
#[test]
fn bin_sh_echo_logs_one_stdout_record() {
    let bundle = tempdir().expect("bundle tempdir");
    write_bundle(
        bundle.path(),
        r#"{
            "ociVersion": "1.0.2",
            "process": { "cwd": "/", "args": ["/bin/sh", "-c", "echo hi"] }
        }"#,
    );
    let sockets = tempdir().expect("socket tempdir");

    let status = run_ocimon("scenario2", bundle.path(), sockets.path());
    assert!(status.success(), "ocimon exited with {:?}", status);

    let log_path = sockets.path().join("scenario2").join("scenario2.log");
    let logged = fs::read_to_string(&log_path).expect("read log");
    assert_eq!(logged.lines().count(), 1, "exactly one stdout chunk: {:?}", logged);
    assert!(logged.contains("stdoutF hi"), "log record: {:?}", logged);
}

/// Scenario 4: a `prestart` hook returning nonzero aborts before `created`
/// is ever published — no sockets, no state file, caller sees the hook
/// error (nonzero exit).
#[test]
fn failing_prestart_hook_leaves_no_sockets_or_state() {
    let bundle = tempdir().expect("bundle tempdir");
    write_bundle(
        bundle.path(),
        r#"{
            "ociVersion": "1.0.2",
            "process": { "cwd": "/", "args": ["/bin/true"] },
            "hooks": { "prestart": [{ "path": "/bin/false" }] }
        }"#,
    );
    let sockets = tempdir().expect("socket tempdir");

    let status = run_ocimon("scenario4", bundle.path(), sockets.path());
    assert!(!status.success(), "hook failure must surface as a nonzero exit");

    let instance_dir = sockets.path().join("scenario4");
    assert!(!instance_dir.join("state.json").exists());
    assert!(!instance_dir.join("attach.sock").exists());
    assert!(!instance_dir.join("control.sock").exists());
}

/// Boundary behavior (spec.md §8): empty args is rejected before any fd
/// manipulation or fork — the bundle never even reaches a forked Launcher.
#[test]
fn empty_args_is_rejected_up_front() {
    let bundle = tempdir().expect("bundle tempdir");
    write_bundle(
        bundle.path(),
        r#"{
            "ociVersion": "1.0.2",
            "process": { "cwd": "/", "args": [] }
        }"#,
    );
    let sockets = tempdir().expect("socket tempdir");

    let status = run_ocimon("scenario-empty-args", bundle.path(), sockets.path());
    assert!(!status.success());
    assert!(!sockets.path().join("scenario-empty-args").join("state.json").exists());
}

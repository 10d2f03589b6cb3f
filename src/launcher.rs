//! Component 4.A — the Launcher (spec.md §4.A).
//!
//! Runs entirely in the forked child, before any `tokio` runtime from the
//! parent could be assumed valid. Every step here uses blocking syscalls
//! directly; the one async call (security configuration) spins up its own
//! single-threaded runtime rather than inheriting anything from the parent,
//! matching how a forked child can never safely assume a multi-threaded
//! runtime survived the fork intact.

use crate::{
    endpoints::StreamEndpoints,
    error::LauncherError,
    handshake::{HandshakeSocket, READY, START},
    process_spec::{find_path_env, ProcessSpec},
    rlimit::apply_rlimits,
    security::SecurityConfigurator,
};
use nix::{
    sys::{
        signal::Signal,
        signalfd::{SfdFlags, SigSet, SignalFd},
        wait::{waitpid, WaitPidFlag, WaitStatus},
    },
    unistd::{chdir, dup2, execve, read, setsid, write},
};
use std::{ffi::CString, os::unix::io::RawFd, path::Path, process};

/// Entry point for the forked child. Never returns: it either replaces the
/// process image via `exec`, parks in the empty-process signal loop, or
/// calls [`process::exit`] after reporting a failure through the handshake
/// channel.
pub fn run(
    launcher_sock: HandshakeSocket,
    spec: &ProcessSpec,
    endpoints: &StreamEndpoints,
    security: &dyn SecurityConfigurator,
) -> ! {
    match try_run(&launcher_sock, spec, endpoints, security) {
        Ok(()) => unreachable!("try_run only returns on error; success execs or parks"),
        Err(e) => {
            log::error!("launcher setup failed: {}", e);
            // Best effort: if the handshake is still open the Supervisor
            // sees this byte instead of a bare EOF (spec.md §4.A.8, §7.3).
            let _ = write(launcher_sock.raw_fd(), &[READY]);
            process::exit(1)
        }
    }
}

fn try_run(
    launcher_sock: &HandshakeSocket,
    spec: &ProcessSpec,
    endpoints: &StreamEndpoints,
    security: &dyn SecurityConfigurator,
) -> Result<(), LauncherError> {
    chdir(spec.cwd()).map_err(|e| LauncherError::Chdir {
        path: spec.cwd().display().to_string(),
        source: std::io::Error::new(std::io::ErrorKind::Other, e),
    })?;

    apply_rlimits(spec.rlimits())?;

    if spec.empty_process() {
        if !spec.pure_exec() {
            blocking_send(launcher_sock, READY)?;
            blocking_expect(launcher_sock, START)?;
        }
        nix::unistd::close(launcher_sock.raw_fd())
            .unwrap_or_else(|e| log::warn!("failed to close handshake fd: {}", e));

        run_security_blocking(security)?;

        empty_process_signal_loop();
    }

    install_fds(endpoints)?;

    if !spec.pure_exec() {
        blocking_send(launcher_sock, READY)?;
        blocking_expect(launcher_sock, START)?;
    }

    run_security_blocking(security)?;

    let path = resolve_binary(spec)?;
    let c_path = CString::new(path.as_bytes()).map_err(|_| LauncherError::Exec {
        path: path.clone(),
        source: std::io::Error::new(std::io::ErrorKind::InvalidInput, "argv0 contains an interior NUL byte"),
    })?;
    let c_args: Vec<CString> = spec
        .args()
        .iter()
        .map(|a| CString::new(a.as_bytes()).unwrap_or_default())
        .collect();
    let c_env: Vec<CString> = spec
        .env()
        .iter()
        .map(|kv| CString::new(kv.as_bytes()).unwrap_or_default())
        .collect();

    // `execve`, not `execvp`: the payload's environment must be exactly
    // `spec.env()` (spec.md §4.A.8 "replace the process image with
    // `args[0], args, env`"), not whatever this process inherited.
    let exec_err = execve(&c_path, &c_args, &c_env).unwrap_err();
    // Reaching here means exec failed; inform the Supervisor it must skip
    // poststart before surfacing the error (spec.md §4.A.8, §9 Open
    // Question 2 — this second byte is advisory and may race exec success
    // on other paths, but here exec has definitely not succeeded).
    if !spec.pure_exec() {
        let _ = write(launcher_sock.raw_fd(), &[READY]);
    }
    Err(LauncherError::Exec {
        path,
        source: std::io::Error::new(std::io::ErrorKind::Other, exec_err),
    })
}

/// Park until terminated: reap children on `SIGCHLD`, exit 0 on
/// `SIGINT`/`SIGTERM` (spec.md §4.A.3). Never returns.
fn empty_process_signal_loop() -> ! {
    let mut mask = SigSet::empty();
    mask.add(Signal::SIGCHLD);
    mask.add(Signal::SIGINT);
    mask.add(Signal::SIGTERM);
    mask.thread_block().expect("block signals for signalfd");

    let mut sfd = SignalFd::with_flags(&mask, SfdFlags::empty()).expect("create signalfd");

    loop {
        match sfd.read_signal() {
            Ok(Some(info)) => match Signal::from_c_int(info.ssi_signo as i32) {
                Ok(Signal::SIGCHLD) => reap_all_nonblocking(),
                Ok(Signal::SIGINT) | Ok(Signal::SIGTERM) => process::exit(0),
                _ => {}
            },
            Ok(None) => continue,
            Err(nix::Error::Sys(nix::errno::Errno::EINTR)) => continue,
            Err(e) => {
                log::error!("signalfd read failed: {}", e);
                process::exit(1)
            }
        }
    }
}

fn reap_all_nonblocking() {
    loop {
        match waitpid(None, Some(WaitPidFlag::WNOHANG)) {
            Ok(WaitStatus::StillAlive) | Err(_) => break,
            Ok(_) => continue,
        }
    }
}

fn run_security_blocking(security: &dyn SecurityConfigurator) -> Result<(), LauncherError> {
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|e| LauncherError::Security(e.to_string()))?;
    rt.block_on(security.apply())
        .map_err(|e| LauncherError::Security(e.to_string()))
}

/// Install fds onto 0/1/2 and close whatever this process no longer needs
/// (spec.md §4.A.5), exactly one branch of which runs per container.
fn install_fds(endpoints: &StreamEndpoints) -> Result<(), LauncherError> {
    match endpoints {
        StreamEndpoints::Terminal { master_fd, slave_fd } => {
            dup_onto(*slave_fd, 0)?;
            dup_onto(*slave_fd, 1)?;
            dup_onto(*slave_fd, 2)?;
            close_fd(*master_fd)?;
            close_fd(*slave_fd)?;
            setsid().map_err(|e| LauncherError::Fd(format!("setsid: {}", e)))?;
            set_controlling_terminal(0)?;
        }
        StreamEndpoints::Pipes { stdout, stderr } => {
            dup_onto(stdout.write_fd, 1)?;
            dup_onto(stderr.write_fd, 2)?;
            close_fd(stdout.read_fd)?;
            close_fd(stdout.write_fd)?;
            close_fd(stderr.read_fd)?;
            close_fd(stderr.write_fd)?;
            close_fd(0)?;
        }
    }
    Ok(())
}

fn set_controlling_terminal(fd: RawFd) -> Result<(), LauncherError> {
    let ret = unsafe { libc::ioctl(fd, libc::TIOCSCTTY as _, 0) };
    if ret != 0 {
        return Err(LauncherError::Fd(format!(
            "ioctl(TIOCSCTTY): {}",
            std::io::Error::last_os_error()
        )));
    }
    Ok(())
}

fn dup_onto(src: RawFd, dst: RawFd) -> Result<(), LauncherError> {
    if src == dst {
        return Ok(());
    }
    dup2(src, dst)
        .map(|_| ())
        .map_err(|e| LauncherError::Fd(format!("dup2({}, {}): {}", src, dst, e)))
}

fn close_fd(fd: RawFd) -> Result<(), LauncherError> {
    nix::unistd::close(fd).map_err(|e| LauncherError::Fd(format!("close({}): {}", fd, e)))
}

/// Resolve the payload binary against `PATH` when it isn't already
/// absolute, using the first `PATH=` entry in the process's env
/// (spec.md §4.A.4).
fn resolve_binary(spec: &ProcessSpec) -> Result<String, LauncherError> {
    let argv0 = spec
        .args()
        .first()
        .ok_or_else(|| LauncherError::PathResolution("".into(), which::Error::CannotFindBinaryPath))?;

    if Path::new(argv0).is_absolute() {
        return Ok(argv0.clone());
    }

    let path_env = find_path_env(spec.env());
    let resolved = match path_env {
        Some(paths) => which::which_in(argv0, Some(paths), spec.cwd()),
        None => which::which(argv0),
    }
    .map_err(|e| LauncherError::PathResolution(argv0.clone(), e))?;

    Ok(resolved.display().to_string())
}

fn blocking_send(sock: &HandshakeSocket, byte: u8) -> Result<(), LauncherError> {
    write(sock.raw_fd(), &[byte])
        .map(|_| ())
        .map_err(|e| LauncherError::Fd(format!("handshake write: {}", e)))
}

fn blocking_expect(sock: &HandshakeSocket, expected: u8) -> Result<(), LauncherError> {
    let mut buf = [0u8; 1];
    let n = read(sock.raw_fd(), &mut buf)
        .map_err(|e| LauncherError::Fd(format!("handshake read: {}", e)))?;
    if n == 0 {
        return Err(LauncherError::Fd("handshake channel closed before start".into()));
    }
    if buf[0] != expected {
        return Err(LauncherError::Fd(format!(
            "unexpected handshake byte {:#x}, expected {:#x}",
            buf[0], expected
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process_spec::ProcessSpecBuilder;
    use std::path::PathBuf;

    #[test]
    fn resolve_binary_passes_through_absolute_path() {
        let spec = ProcessSpecBuilder::default()
            .cwd(PathBuf::from("/"))
            .args(vec!["/bin/true".to_string()])
            .env(Vec::<String>::new())
            .validate()
            .expect("validate");
        assert_eq!(resolve_binary(&spec).expect("resolve"), "/bin/true");
    }

    #[test]
    fn resolve_binary_uses_explicit_path_env() {
        let spec = ProcessSpecBuilder::default()
            .cwd(PathBuf::from("/"))
            .args(vec!["true".to_string()])
            .env(vec!["PATH=/usr/bin:/bin".to_string()])
            .validate()
            .expect("validate");
        let resolved = resolve_binary(&spec).expect("resolve");
        assert!(resolved.ends_with("/true"));
    }
}

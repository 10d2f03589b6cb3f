//! Stream Endpoints (spec.md §3): the pty pair or pipe pair connecting the
//! payload's stdio to the Supervisor.
//!
//! Created before `fork()` so both the Launcher and the Supervisor inherit
//! every fd through the fork and only need to close the half they don't
//! own, rather than passing descriptors across the handshake socket.

use crate::error::SupervisorError;
use nix::{
    pty::{openpty, Winsize},
    unistd::{close, pipe},
};
use std::os::unix::io::RawFd;

/// One end-to-end read/write pipe, e.g. `output_pipe` or `error_pipe`
/// (spec.md §3). The write end belongs to the Launcher until exec; the
/// read end belongs to the Supervisor for the container's lifetime.
#[derive(Clone, Copy, Debug)]
pub struct PipeEnds {
    pub read_fd: RawFd,
    pub write_fd: RawFd,
}

impl PipeEnds {
    fn create() -> Result<Self, SupervisorError> {
        let (read_fd, write_fd) = pipe().map_err(|e| SupervisorError::Socket {
            path: "pipe()".into(),
            source: std::io::Error::new(std::io::ErrorKind::Other, e),
        })?;
        Ok(Self { read_fd, write_fd })
    }

    /// Close both ends. Used by whichever side (Launcher or Supervisor)
    /// doesn't own this pair after the split below.
    pub fn close_both(&self) -> Result<(), SupervisorError> {
        close_fd(self.read_fd)?;
        close_fd(self.write_fd)
    }
}

/// The stream endpoints for one container's payload, chosen once at
/// creation based on [`crate::process_spec::ProcessSpec::terminal`]
/// (spec.md §3).
#[derive(Clone, Copy, Debug)]
pub enum StreamEndpoints {
    Terminal { master_fd: RawFd, slave_fd: RawFd },
    Pipes { stdout: PipeEnds, stderr: PipeEnds },
}

impl StreamEndpoints {
    pub fn create(terminal: bool) -> Result<Self, SupervisorError> {
        if terminal {
            let pty = openpty(None, None).map_err(|e| SupervisorError::Socket {
                path: "openpty()".into(),
                source: std::io::Error::new(std::io::ErrorKind::Other, e),
            })?;
            Ok(StreamEndpoints::Terminal {
                master_fd: pty.master,
                slave_fd: pty.slave,
            })
        } else {
            Ok(StreamEndpoints::Pipes {
                stdout: PipeEnds::create()?,
                stderr: PipeEnds::create()?,
            })
        }
    }

    /// Close the half of the endpoints the Supervisor doesn't own, after
    /// `fork()` (spec.md §3 ownership invariant): the pty slave in
    /// terminal mode, both pipe write ends otherwise.
    pub fn close_launcher_half(&self) -> Result<(), SupervisorError> {
        match self {
            StreamEndpoints::Terminal { slave_fd, .. } => close_fd(*slave_fd),
            StreamEndpoints::Pipes { stdout, stderr } => {
                close_fd(stdout.write_fd)?;
                close_fd(stderr.write_fd)
            }
        }
    }

    /// Apply a new window size to the pty master. A no-op (per spec.md
    /// §4.E) when no terminal is held.
    pub fn resize(&self, width: u16, height: u16) -> Result<(), SupervisorError> {
        match self {
            StreamEndpoints::Terminal { master_fd, .. } => {
                let ws = Winsize {
                    ws_row: height,
                    ws_col: width,
                    ws_xpixel: 0,
                    ws_ypixel: 0,
                };
                let ret = unsafe { libc::ioctl(*master_fd, libc::TIOCSWINSZ, &ws) };
                if ret != 0 {
                    return Err(SupervisorError::Socket {
                        path: "ioctl(TIOCSWINSZ)".into(),
                        source: std::io::Error::last_os_error(),
                    });
                }
                Ok(())
            }
            StreamEndpoints::Pipes { .. } => Ok(()),
        }
    }
}

fn close_fd(fd: RawFd) -> Result<(), SupervisorError> {
    close(fd).map_err(|e| SupervisorError::Socket {
        path: format!("close(fd={})", fd),
        source: std::io::Error::new(std::io::ErrorKind::Other, e),
    })
}

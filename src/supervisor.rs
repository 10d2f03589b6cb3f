//! Component 4.B — the Supervisor (spec.md §4.B).
//!
//! Runs in the original (privileged) process after `fork()`. Drives the
//! create/start handshake from the other side, creates the attach/control
//! sockets and publishes their paths as state annotations, persists
//! [`ContainerState`], runs lifecycle hooks, spawns the stream multiplexer
//! and control server, and reaps the payload on exit.

use crate::{
    control::{serve as serve_control, ControlHandler},
    endpoints::StreamEndpoints,
    error::{ControlError, Result, StreamError, SupervisorError},
    handshake::{HandshakeChannel, READY, START},
    hooks::{run_phase, HookRunner},
    instance::InstanceLocator,
    logger::{formatter_for, LogFormatter, ReopenableWriter, Stream as LogStream},
    process_spec::ProcessSpec,
    state::{ContainerState, Status, ANNOTATION_ATTACH_SOCKET, ANNOTATION_CONTROL_SOCKET},
    stream::StreamMux,
};
use nix::{
    sys::{
        signal::{kill, Signal},
        wait::{waitpid, WaitStatus},
    },
    unistd::Pid,
};
use std::{path::PathBuf, sync::Arc};
use tokio::{
    net::UnixListener,
    sync::{mpsc, Mutex},
    task::JoinHandle,
};

pub struct Supervisor {
    state: Mutex<ContainerState>,
    spec: ProcessSpec,
    instance: Box<dyn InstanceLocator>,
    handshake: Mutex<HandshakeChannel>,
    child_pid: Pid,
    hook_runner: Box<dyn HookRunner>,
    endpoints: StreamEndpoints,
    log_path: PathBuf,
    log_format: String,
    logger: Mutex<Option<Arc<Mutex<ReopenableWriter>>>>,
    stream_mux: StreamMux,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Supervisor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: impl Into<String>,
        bundle: impl Into<String>,
        spec: ProcessSpec,
        instance: Box<dyn InstanceLocator>,
        handshake: HandshakeChannel,
        child_pid: Pid,
        hook_runner: Box<dyn HookRunner>,
        endpoints: StreamEndpoints,
        log_path: PathBuf,
        log_format: String,
    ) -> Self {
        Self {
            state: Mutex::new(ContainerState::new(id, bundle)),
            spec,
            instance,
            handshake: Mutex::new(handshake),
            child_pid,
            hook_runner,
            endpoints,
            log_path,
            log_format,
            logger: Mutex::new(None),
            stream_mux: StreamMux::new(),
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Drives the container from `creating` through `created` (spec.md
    /// §4.B.1, §5), cleaning up after itself on any failure: a setup error
    /// leaves no partially-created sockets behind, and SIGKILLs the payload
    /// so a Launcher parked (possibly still `SIGSTOP`ped) behind a `START`
    /// that will never arrive doesn't linger as a stopped orphan process
    /// (spec.md §7.2 — SIGKILL reaches a stopped process without needing a
    /// `SIGCONT` first).
    pub async fn pre_start(
        &self,
        pidfile: Option<&std::path::Path>,
        fatal_sink: mpsc::UnboundedSender<SupervisorFatal>,
    ) -> Result<()> {
        match self.try_pre_start(pidfile, fatal_sink).await {
            Ok(()) => Ok(()),
            Err(e) => {
                let _ = kill(self.child_pid, Signal::SIGKILL);
                let _ = std::fs::remove_file(self.instance.attach_socket());
                let _ = std::fs::remove_file(self.instance.control_socket());
                Err(e)
            }
        }
    }

    async fn try_pre_start(
        &self,
        pidfile: Option<&std::path::Path>,
        fatal_sink: mpsc::UnboundedSender<SupervisorFatal>,
    ) -> Result<()> {
        self.instance.ensure()?;

        // Pin the payload even if the Launcher is in pure-exec mode and
        // never signals at all (spec.md §4.B.1 "belt-and-suspenders").
        kill(self.child_pid, Signal::SIGSTOP)
            .map_err(|e| SupervisorError::State(format!("SIGSTOP {}: {}", self.child_pid, e)))?;

        if !self.spec.pure_exec() {
            self.handshake.lock().await.expect(READY).await?;
        }

        let mut state = self.state.lock().await;
        state.set_pid(Some(self.child_pid.as_raw()));

        run_phase(self.hook_runner.as_ref(), &self.spec.hooks().prestart, &state).await?;

        let attach_listener = UnixListener::bind(self.instance.attach_socket()).map_err(|e| SupervisorError::Socket {
            path: self.instance.attach_socket().display().to_string(),
            source: e,
        })?;
        let control_listener = UnixListener::bind(self.instance.control_socket()).map_err(|e| SupervisorError::Socket {
            path: self.instance.control_socket().display().to_string(),
            source: e,
        })?;
        state.annotations_mut().insert(
            ANNOTATION_ATTACH_SOCKET.to_string(),
            self.instance.attach_socket().display().to_string(),
        );
        state.annotations_mut().insert(
            ANNOTATION_CONTROL_SOCKET.to_string(),
            self.instance.control_socket().display().to_string(),
        );

        let formatter: Arc<dyn LogFormatter> = formatter_for(&self.log_format)
            .ok_or_else(|| SupervisorError::Logger(format!("unknown log format {:?}", self.log_format)))?
            .into();
        let logger = Arc::new(Mutex::new(ReopenableWriter::open(&self.log_path)?));
        *self.logger.lock().await = Some(logger.clone());

        let (stream_fatal_tx, mut stream_fatal_rx) = mpsc::unbounded_channel();
        let (control_fatal_tx, mut control_fatal_rx) = mpsc::unbounded_channel();

        let mut tasks = Vec::new();
        match &self.endpoints {
            StreamEndpoints::Terminal { master_fd, .. } => {
                let (stdin_tx, stdin_rx) = mpsc::channel(64);
                tasks.push(
                    self.stream_mux
                        .spawn_attach_listener(attach_listener, Some(stdin_tx), stream_fatal_tx.clone()),
                );
                tasks.push(self.stream_mux.spawn_copy_pump(
                    *master_fd,
                    LogStream::Stdout,
                    true,
                    logger.clone(),
                    formatter.clone(),
                ).into_unit());
                tasks.push(self.stream_mux.spawn_stdin_pump(*master_fd, stdin_rx));
            }
            StreamEndpoints::Pipes { stdout, stderr } => {
                tasks.push(
                    self.stream_mux
                        .spawn_attach_listener(attach_listener, None, stream_fatal_tx.clone()),
                );
                tasks.push(self.stream_mux.spawn_copy_pump(
                    stdout.read_fd,
                    LogStream::Stdout,
                    false,
                    logger.clone(),
                    formatter.clone(),
                ).into_unit());
                tasks.push(self.stream_mux.spawn_copy_pump(
                    stderr.read_fd,
                    LogStream::Stderr,
                    false,
                    logger.clone(),
                    formatter,
                ).into_unit());
            }
        }

        let control_handler = LoggerControlHandler {
            endpoints: self.endpoints,
            logger: logger.clone(),
        };
        tasks.push(tokio::spawn(serve_control(control_listener, control_handler, control_fatal_tx)));

        let fatal_sink_for_stream = fatal_sink.clone();
        tasks.push(tokio::spawn(async move {
            if let Some(e) = stream_fatal_rx.recv().await {
                let _ = fatal_sink_for_stream.send(SupervisorFatal::Stream(e));
            }
        }));
        tasks.push(tokio::spawn(async move {
            if let Some(e) = control_fatal_rx.recv().await {
                let _ = fatal_sink.send(SupervisorFatal::Control(e));
            }
        }));

        *self.tasks.lock().await = tasks;

        if let Some(path) = pidfile {
            std::fs::write(path, self.child_pid.as_raw().to_string()).map_err(|e| SupervisorError::PidFile {
                path: path.display().to_string(),
                source: e,
            })?;
        }

        state.advance(Status::Created)?;
        state.persist(&self.instance.state_file())?;
        drop(state);

        if !self.spec.pure_exec() {
            self.handshake.lock().await.send(START).await?;
        }
        Ok(())
    }

    /// Completes the start transition: detects the advisory post-exec
    /// failure byte (spec.md §9 Open Question 2) and, absent it, advances
    /// to `running` and fires `poststart` hooks.
    pub async fn post_start(&self) -> Result<()> {
        let exec_failed = if self.spec.pure_exec() {
            false
        } else {
            self.handshake.lock().await.try_read_byte().await?.is_some()
        };

        let mut state = self.state.lock().await;
        if exec_failed {
            log::warn!("payload exec failed; skipping poststart hooks");
            return Ok(());
        }

        state.advance(Status::Running)?;
        state.persist(&self.instance.state_file())?;

        run_phase(self.hook_runner.as_ref(), &self.spec.hooks().poststart, &state)
            .await
            .map_err(Into::into)
    }

    /// Send `signal` to the payload process.
    pub fn signal(&self, signal: Signal) -> Result<()> {
        kill(self.child_pid, signal)
            .map_err(|e| SupervisorError::State(format!("kill {}: {}", self.child_pid, e)).into())
    }

    /// Ask the payload to terminate (spec.md §4.B `stop`). Reaping and the
    /// `stopped`/`poststop` transition happen in [`Supervisor::reap`].
    pub fn stop(&self) -> Result<()> {
        self.signal(Signal::SIGTERM)
    }

    /// Block (on a blocking thread) until the payload exits, then advance
    /// to `stopped`, persist, run `poststop` hooks, and abort the
    /// background tasks (spec.md §3 lifecycle: sockets closed on
    /// teardown). Safe to call concurrently with [`Supervisor::signal`].
    pub async fn reap(self: &Arc<Self>) -> Result<WaitStatus> {
        let pid = self.child_pid;
        let this = self.clone();
        let status = tokio::task::spawn_blocking(move || loop {
            match waitpid(pid, None) {
                Ok(status) => break Ok(status),
                Err(nix::Error::Sys(nix::errno::Errno::EINTR)) => continue,
                Err(e) => break Err(e),
            }
        })
        .await
        .map_err(|e| SupervisorError::State(format!("reap join: {}", e)))?
        .map_err(|e| SupervisorError::State(format!("waitpid: {}", e)))?;

        let mut state = this.state.lock().await;
        state.advance(Status::Stopped)?;
        state.persist(&this.instance.state_file())?;

        run_phase(this.hook_runner.as_ref(), &this.spec.hooks().poststop, &state).await?;
        drop(state);

        for task in this.tasks.lock().await.drain(..) {
            task.abort();
        }
        let _ = std::fs::remove_file(this.instance.attach_socket());
        let _ = std::fs::remove_file(this.instance.control_socket());

        Ok(status)
    }

    pub async fn snapshot_state(&self) -> ContainerState {
        self.state.lock().await.clone()
    }
}

/// Fatal background errors surfaced from the Supervisor's spawned tasks
/// (spec.md §7.5).
#[derive(Debug, thiserror::Error)]
pub enum SupervisorFatal {
    #[error(transparent)]
    Stream(#[from] StreamError),
    #[error(transparent)]
    Control(#[from] ControlError),
}

struct LoggerControlHandler {
    endpoints: StreamEndpoints,
    logger: Arc<Mutex<ReopenableWriter>>,
}

#[async_trait::async_trait]
impl ControlHandler for LoggerControlHandler {
    async fn resize_console(&self, width: u16, height: u16) -> std::result::Result<(), ControlError> {
        self.endpoints
            .resize(width, height)
            .map_err(|e| ControlError::Io(std::io::Error::new(std::io::ErrorKind::Other, e.to_string())))
    }

    async fn reopen_log(&self) -> std::result::Result<(), ControlError> {
        self.logger
            .lock()
            .await
            .reopen()
            .map_err(|e| ControlError::Io(std::io::Error::new(std::io::ErrorKind::Other, e.to_string())))
    }
}

/// Adapts a fallible `JoinHandle` to the unit-returning kind `pre_start`
/// collects, logging a task's error instead of dropping it silently.
trait IntoUnitHandle {
    fn into_unit(self) -> JoinHandle<()>;
}

impl IntoUnitHandle for JoinHandle<Result<(), StreamError>> {
    fn into_unit(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            match self.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => log::error!("stream pump ended with error: {}", e),
                Err(e) => log::error!("stream pump task panicked: {}", e),
            }
        })
    }
}

//! Wires `Config` into a running container instance (spec.md §1, §4).
//!
//! Mirrors the shape of a typical runtime-monitor driver: parse
//! configuration, stand up the stream endpoints, fork, then drive the
//! lifecycle to completion while handling termination signals. Kept
//! separate from `main.rs` so it can be exercised directly by tests built
//! against a real bundle directory.

use crate::{
    bundle::BundleConfig,
    config::Config,
    endpoints::StreamEndpoints,
    instance::InstanceDir,
    security::NoopSecurityConfigurator,
    spawn::{spawn, Spawned},
    supervisor::{Supervisor, SupervisorFatal},
};
use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::{
    signal::unix::{signal, SignalKind},
    sync::mpsc,
};

pub async fn run(config: Config) -> Result<()> {
    init_logging(&config)?;

    let bundle_dir = config
        .bundle()
        .clone()
        .context("--bundle is required to locate config.json")?;
    let bundle = BundleConfig::load(&bundle_dir).context("load bundle config.json")?;

    let spec = bundle
        .into_process_spec_builder(false, config.sync(), config.terminal())
        .validate()
        .context("validate process spec")?;

    let instance = InstanceDir::new(config.socket_dir_path(), config.cid().clone());
    instance.ensure().context("create instance directory")?;

    let endpoints = StreamEndpoints::create(spec.terminal()).context("create stream endpoints")?;
    let security = NoopSecurityConfigurator;

    let spawned = unsafe {
        spawn(move |launcher_sock| crate::launcher::run(launcher_sock, &spec, &endpoints, &security))
    }
    .context("fork")?;

    let Spawned::Supervisor {
        child_pid,
        supervisor_handshake,
    } = spawned;

    // The Supervisor owns the other half of every fd pair once it exists
    // on this side of the fork (spec.md §3 ownership invariant).
    endpoints
        .close_launcher_half()
        .context("close the Launcher's half of the stream endpoints")?;

    let handshake = supervisor_handshake.into_async()?;
    // The spec consumed by the launcher closure above can't be reused on
    // this side of the fork (it's moved into the closure); reparse the
    // bundle for the Supervisor's own copy of the hook lists.
    let spec = reparsed_spec(&bundle_dir, &config)?;

    let log_path = config
        .log_path()
        .clone()
        .unwrap_or_else(|| instance.default_log_path());

    let supervisor = Arc::new(Supervisor::new(
        config.cid().clone(),
        bundle_dir.display().to_string(),
        spec,
        Box::new(instance),
        handshake,
        child_pid,
        Box::new(crate::hooks::ProcessHookRunner),
        endpoints,
        log_path,
        config.log_format().clone(),
    ));

    let (fatal_tx, mut fatal_rx) = mpsc::unbounded_channel::<SupervisorFatal>();

    supervisor
        .pre_start(config.container_pidfile().as_deref(), fatal_tx)
        .await
        .context("pre_start")?;
    supervisor.post_start().await.context("post_start")?;

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    tokio::select! {
        result = supervisor.reap() => {
            result.context("reap payload")?;
        }
        _ = sigterm.recv() => {
            supervisor.stop().context("forward SIGTERM")?;
            supervisor.reap().await.context("reap payload")?;
        }
        _ = sigint.recv() => {
            supervisor.signal(nix::sys::signal::Signal::SIGINT).context("forward SIGINT")?;
            supervisor.reap().await.context("reap payload")?;
        }
        Some(fatal) = fatal_rx.recv() => {
            log::error!("fatal background error: {}", fatal);
            supervisor.stop().context("stop after fatal background error")?;
            supervisor.reap().await.context("reap payload")?;
        }
    }

    Ok(())
}

/// The Supervisor needs its own `ProcessSpec` (for hook lists) after the
/// fork; the original is consumed by the closure handed to `spawn`
/// (it must never alias the Launcher's copy across the fork boundary).
fn reparsed_spec(bundle_dir: &std::path::Path, config: &Config) -> Result<crate::process_spec::ProcessSpec> {
    let bundle = BundleConfig::load(bundle_dir)?;
    Ok(bundle
        .into_process_spec_builder(false, config.sync(), config.terminal())
        .validate()?)
}

fn init_logging(config: &Config) -> Result<()> {
    env_logger::Builder::new()
        .filter_level(config.log_level())
        .try_init()
        .context("init env logger")
}

//! Rlimit application for the Launcher (spec.md §4.A.2).

use crate::{error::LauncherError, process_spec::RlimitSpec};
use nix::sys::resource::{setrlimit, Resource};
use std::collections::HashSet;

/// Map an OCI rlimit type name (e.g. `RLIMIT_NOFILE`) onto the platform
/// resource constant. Kept as an explicit table rather than relying on a
/// `FromStr` impl so unsupported names fail with a clear message instead of
/// a generic parse error.
fn resource_for(name: &str) -> Option<Resource> {
    Some(match name {
        "RLIMIT_CPU" => Resource::RLIMIT_CPU,
        "RLIMIT_FSIZE" => Resource::RLIMIT_FSIZE,
        "RLIMIT_DATA" => Resource::RLIMIT_DATA,
        "RLIMIT_STACK" => Resource::RLIMIT_STACK,
        "RLIMIT_CORE" => Resource::RLIMIT_CORE,
        "RLIMIT_RSS" => Resource::RLIMIT_RSS,
        "RLIMIT_NPROC" => Resource::RLIMIT_NPROC,
        "RLIMIT_NOFILE" => Resource::RLIMIT_NOFILE,
        "RLIMIT_MEMLOCK" => Resource::RLIMIT_MEMLOCK,
        "RLIMIT_AS" => Resource::RLIMIT_AS,
        "RLIMIT_LOCKS" => Resource::RLIMIT_LOCKS,
        "RLIMIT_SIGPENDING" => Resource::RLIMIT_SIGPENDING,
        "RLIMIT_MSGQUEUE" => Resource::RLIMIT_MSGQUEUE,
        "RLIMIT_NICE" => Resource::RLIMIT_NICE,
        "RLIMIT_RTPRIO" => Resource::RLIMIT_RTPRIO,
        _ => return None,
    })
}

/// Apply each rlimit in order. A repeated type is a bug by this point (the
/// caller already validated uniqueness via
/// [`crate::process_spec::ProcessSpecBuilder::validate`]), but the Launcher
/// re-checks defensively since it may run in a separate process image from
/// whatever validated the spec.
pub fn apply_rlimits(rlimits: &[RlimitSpec]) -> Result<(), LauncherError> {
    let mut seen = HashSet::new();
    for rlimit in rlimits {
        if !seen.insert(rlimit.typ.clone()) {
            return Err(LauncherError::Rlimit(format!(
                "{} was already set",
                rlimit.typ
            )));
        }

        let resource = resource_for(&rlimit.typ)
            .ok_or_else(|| LauncherError::Rlimit(format!("unknown rlimit type {}", rlimit.typ)))?;

        setrlimit(resource, rlimit.soft, rlimit.hard)
            .map_err(|e| LauncherError::Rlimit(format!("{}: {}", rlimit.typ, e)))?;
    }
    Ok(())
}

//! Delegated security configuration (spec.md §1, §4.A.7).
//!
//! Capabilities, seccomp, no-new-privs, LSM labels and uid/gid mapping are
//! explicitly out of scope for this crate — they are applied by whatever
//! security configurator the surrounding runtime plugs in. This module only
//! defines the seam.

use async_trait::async_trait;
use std::fmt;

/// Applied by the Launcher immediately before exec (spec.md §4.A.7).
#[async_trait]
pub trait SecurityConfigurator: Send + Sync {
    async fn apply(&self) -> Result<(), SecurityError>;
}

#[derive(Debug)]
pub struct SecurityError(pub String);

impl fmt::Display for SecurityError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for SecurityError {}

/// Applies nothing. Used for the empty-process branch and for testing,
/// and as the default when no real configurator is plugged in — matching
/// how `sandbox::Pod`'s default trait methods are no-ops until a concrete
/// implementation overrides them.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopSecurityConfigurator;

#[async_trait]
impl SecurityConfigurator for NoopSecurityConfigurator {
    async fn apply(&self) -> Result<(), SecurityError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn noop_always_succeeds() {
        assert!(NoopSecurityConfigurator.apply().await.is_ok());
    }
}

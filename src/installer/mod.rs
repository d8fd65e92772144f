//! Component installers
//!
//! A [`Component`] is one OS-level dependency a node needs. Installing goes
//! through [`install_component`], which enforces the shared contract:
//!
//! 1. Probe the live system. A component that is already present, including
//!    one that existed before nodeadm ever ran, is left alone and the tracker
//!    is not touched.
//! 2. Otherwise install it, and only once that has fully succeeded record it
//!    in the tracker. Retryable failures (see [`Error::is_retryable`]) are
//!    retried with a fresh fetch deadline per attempt.
//!
//! [`uninstall_component`] is the mirror image: remove the component if it is
//! present, then drop it from the tracker.
//!
//! Failures are wrapped with the component's identity and returned; nothing
//! is logged and discarded at this layer.

mod iptables;
mod signing_helper;

pub use iptables::{DistroPackages, Iptables, IptablesSource, IPTABLES_BINARY};
pub use signing_helper::SigningHelper;

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use tracing::{debug, info};

use crate::artifact::{ComponentId, FetchContext};
use crate::host::Host;
use crate::retry::{retry_if, RetryConfig};
use crate::tracker::Tracker;
use crate::{Error, Result};

/// One installable OS-level dependency
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Component: Send + Sync {
    /// Stable identifier recorded in the tracker
    fn id(&self) -> ComponentId;

    /// Whether the component is present on the machine right now
    async fn is_present(&self, host: &Host) -> Result<bool>;

    /// Obtain and install the component
    async fn install(&self, host: &Host, ctx: &FetchContext) -> Result<()>;

    /// Remove the component
    async fn uninstall(&self, host: &Host, ctx: &FetchContext) -> Result<()>;
}

/// What [`install_component`] did
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InstallOutcome {
    /// The component was installed and recorded
    Installed,
    /// The component was already present; nothing changed
    AlreadyPresent,
}

/// Install `component` unless the machine already has it, in a single attempt
pub async fn install_component(
    component: &dyn Component,
    tracker: &mut Tracker,
    host: &Host,
    ctx: &FetchContext,
) -> Result<InstallOutcome> {
    install_component_with_retry(component, tracker, host, ctx, &RetryConfig::never()).await
}

/// Install `component` unless the machine already has it, retrying
/// transient failures according to `retry`
pub async fn install_component_with_retry(
    component: &dyn Component,
    tracker: &mut Tracker,
    host: &Host,
    ctx: &FetchContext,
    retry: &RetryConfig,
) -> Result<InstallOutcome> {
    let id = component.id();

    let present = component
        .is_present(host)
        .await
        .map_err(|e| wrap(e, |e| Error::install(id.clone(), e)))?;
    if present {
        debug!(component = %id, "Component already present, skipping install");
        return Ok(InstallOutcome::AlreadyPresent);
    }

    info!(component = %id, "Installing component");
    let operation = format!("install {}", id);
    retry_if(retry, &operation, ctx.cancel_token(), Error::is_retryable, || {
        let attempt = ctx.renewed();
        async move { component.install(host, &attempt).await }
    })
    .await
    .map_err(|e| wrap(e, |e| Error::install(id.clone(), e)))?;
    tracker.add(id.clone())?;
    info!(component = %id, "Component installed");
    Ok(InstallOutcome::Installed)
}

/// Remove `component` if present and forget it in the tracker
pub async fn uninstall_component(
    component: &dyn Component,
    tracker: &mut Tracker,
    host: &Host,
    ctx: &FetchContext,
) -> Result<()> {
    let id = component.id();

    let present = component
        .is_present(host)
        .await
        .map_err(|e| wrap(e, |e| Error::uninstall(id.clone(), e)))?;
    if present {
        info!(component = %id, "Uninstalling component");
        component
            .uninstall(host, ctx)
            .await
            .map_err(|e| wrap(e, |e| Error::uninstall(id.clone(), e)))?;
    } else {
        debug!(component = %id, "Component not present, nothing to remove");
    }

    tracker.remove(&id)
}

/// Cancellation passes through unwrapped so callers can tell it apart
fn wrap(err: Error, with: impl FnOnce(Error) -> Error) -> Error {
    match err {
        Error::Cancelled => Error::Cancelled,
        other => with(other),
    }
}

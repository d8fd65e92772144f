//! iptables, required by kubelet and kube-proxy for service networking

use std::sync::Arc;

use async_trait::async_trait;

use super::Component;
use crate::artifact::{ComponentId, FetchContext, Package};
use crate::host::Host;
use crate::Result;

/// Executable whose presence means iptables is installed
pub const IPTABLES_BINARY: &str = "iptables";

/// Where the iptables package comes from
pub trait IptablesSource: Send + Sync {
    /// Package reference the package manager installs and removes
    fn iptables(&self) -> Package;
}

/// The distribution's own repositories
#[derive(Clone, Copy, Debug, Default)]
pub struct DistroPackages;

impl IptablesSource for DistroPackages {
    fn iptables(&self) -> Package {
        Package::new("iptables")
    }
}

/// iptables component installer
#[derive(Clone)]
pub struct Iptables {
    source: Arc<dyn IptablesSource>,
}

impl Iptables {
    /// Installer that resolves the package through `source`
    pub fn new(source: Arc<dyn IptablesSource>) -> Self {
        Self { source }
    }
}

impl Default for Iptables {
    fn default() -> Self {
        Self::new(Arc::new(DistroPackages))
    }
}

#[async_trait]
impl Component for Iptables {
    fn id(&self) -> ComponentId {
        ComponentId::Iptables
    }

    async fn is_present(&self, host: &Host) -> Result<bool> {
        Ok(host.probe.resolve(IPTABLES_BINARY).is_some())
    }

    async fn install(&self, host: &Host, _ctx: &FetchContext) -> Result<()> {
        host.packages.install(&self.source.iptables()).await
    }

    async fn uninstall(&self, host: &Host, _ctx: &FetchContext) -> Result<()> {
        host.packages.uninstall(&self.source.iptables()).await
    }
}

//! EC2 node provider

use async_trait::async_trait;
use tracing::info;

use super::{KubeletConfig, Lifecycle};
use crate::config::NodeConfig;
use crate::host::Host;
use crate::installer::{Component, Iptables};
use crate::Result;

/// An instance running inside the cloud
///
/// Credentials come from the instance profile, so the only component the
/// node needs is iptables.
#[derive(Debug)]
pub struct Ec2Node {
    config: NodeConfig,
    host: Host,
}

impl Ec2Node {
    /// Create a provider for `config` on `host`
    pub fn new(config: NodeConfig, host: Host) -> Self {
        Self { config, host }
    }
}

#[async_trait]
impl Lifecycle for Ec2Node {
    fn name(&self) -> &'static str {
        "ec2"
    }

    fn node_config(&self) -> &NodeConfig {
        &self.config
    }

    fn host(&self) -> &Host {
        &self.host
    }

    fn components(&self) -> Vec<Box<dyn Component>> {
        vec![Box::new(Iptables::default())]
    }

    async fn validate(&self) -> Result<()> {
        self.config.validate()
    }

    async fn configure(&self) -> Result<()> {
        let path = KubeletConfig::new()
            .write(&self.host.paths.kubelet_dir)
            .await?;
        info!(path = %path.display(), "Wrote kubelet config");
        Ok(())
    }
}

//! Node providers
//!
//! A node provider owns everything that differs between node kinds: which
//! components the node needs, how its identity is validated, and which files
//! it writes before the kubelet starts. Providers implement [`Lifecycle`].
//!
//! # Supported Providers
//!
//! - [`Ec2Node`] - instances inside the cloud, identified by their instance profile
//! - [`HybridNode`] - machines outside the cloud, identified by an X.509 certificate
//!
//! [`NodeProvider::new`] loads the configuration and picks exactly one of them.

mod ec2;
mod hybrid;
mod kubelet;

pub use ec2::Ec2Node;
pub use hybrid::{HybridNode, DEFAULT_AWS_PROFILE};
pub use kubelet::{KubeletConfig, KUBELET_CONFIG_FILE, KUBELET_UNIT};

use std::os::unix::fs::PermissionsExt;
use std::path::Path;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::artifact::{ComponentId, FetchContext};
use crate::config::{build_config_provider, ConfigProvider, NodeConfig, NodeKind};
use crate::host::Host;
use crate::installer::{install_component_with_retry, uninstall_component, Component};
use crate::retry::RetryConfig;
use crate::tracker::Tracker;
use crate::Result;

/// Operations every node kind supports
#[async_trait]
pub trait Lifecycle: Send + Sync {
    /// Short name used in logs
    fn name(&self) -> &'static str;

    /// The configuration the provider was built from
    fn node_config(&self) -> &NodeConfig;

    /// The machine being bootstrapped
    fn host(&self) -> &Host;

    /// Components this node kind needs, in install order
    fn components(&self) -> Vec<Box<dyn Component>>;

    /// Check node-kind specific prerequisites before anything is changed
    async fn validate(&self) -> Result<()>;

    /// Write the node's configuration files
    async fn configure(&self) -> Result<()>;

    /// Start the kubelet so the node registers with the cluster
    async fn join(&self) -> Result<()> {
        info!(provider = self.name(), "Starting kubelet");
        self.host().services.enable_now(KUBELET_UNIT).await
    }

    /// Install every component in order, stopping at the first failure
    async fn install(
        &self,
        tracker: &mut Tracker,
        ctx: &FetchContext,
        retry: &RetryConfig,
    ) -> Result<()> {
        for component in self.components() {
            install_component_with_retry(component.as_ref(), tracker, self.host(), ctx, retry)
                .await?;
        }
        Ok(())
    }

    /// Uninstall tracked components in reverse install order
    ///
    /// Components nodeadm did not install are left alone. Every tracked
    /// component is attempted; the first failure is returned.
    async fn uninstall(&self, tracker: &mut Tracker, ctx: &FetchContext) -> Result<()> {
        let tracked = tracker.components().to_vec();
        self.uninstall_components(tracker, ctx, &tracked).await
    }

    /// Uninstall the tracked components listed in `only`, in reverse install order
    ///
    /// Tracked components outside `only` stay installed and recorded.
    async fn uninstall_components(
        &self,
        tracker: &mut Tracker,
        ctx: &FetchContext,
        only: &[ComponentId],
    ) -> Result<()> {
        let mut first_error = None;
        for component in self.components().into_iter().rev() {
            let id = component.id();
            if !only.contains(&id) || !tracker.has(&id) {
                debug!(component = %id, "Component not selected for removal, leaving it");
                continue;
            }
            if let Err(e) = uninstall_component(component.as_ref(), tracker, self.host(), ctx).await
            {
                warn!(component = %id, error = %e, "Uninstall failed");
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

/// The provider selected for this node
#[derive(Debug)]
pub enum NodeProvider {
    /// Node inside the cloud
    Ec2(Ec2Node),
    /// Node outside the cloud
    Hybrid(HybridNode),
}

impl NodeProvider {
    /// Load configuration from `locator` and build the matching provider
    pub fn new(locator: &str, host: Host) -> Result<Self> {
        info!(config_source = locator, "Loading configuration");
        let source = build_config_provider(locator)?;
        Self::from_config_provider(source.as_ref(), host)
    }

    /// Build the provider from an already constructed configuration source
    pub fn from_config_provider(source: &dyn ConfigProvider, host: Host) -> Result<Self> {
        Self::from_config(source.provide()?, host)
    }

    /// Classify `config` and construct exactly one provider
    pub fn from_config(config: NodeConfig, host: Host) -> Result<Self> {
        config.validate()?;
        match config.kind() {
            NodeKind::Hybrid => {
                info!("Setting up hybrid node provider");
                Ok(Self::Hybrid(HybridNode::new(config, host)))
            }
            NodeKind::Ec2 => {
                info!("Setting up EC2 node provider");
                Ok(Self::Ec2(Ec2Node::new(config, host)))
            }
        }
    }

    /// Which kind of node this is
    pub fn kind(&self) -> NodeKind {
        match self {
            NodeProvider::Ec2(_) => NodeKind::Ec2,
            NodeProvider::Hybrid(_) => NodeKind::Hybrid,
        }
    }

    fn inner(&self) -> &dyn Lifecycle {
        match self {
            NodeProvider::Ec2(node) => node,
            NodeProvider::Hybrid(node) => node,
        }
    }
}

#[async_trait]
impl Lifecycle for NodeProvider {
    fn name(&self) -> &'static str {
        self.inner().name()
    }

    fn node_config(&self) -> &NodeConfig {
        self.inner().node_config()
    }

    fn host(&self) -> &Host {
        self.inner().host()
    }

    fn components(&self) -> Vec<Box<dyn Component>> {
        self.inner().components()
    }

    async fn validate(&self) -> Result<()> {
        self.inner().validate().await
    }

    async fn configure(&self) -> Result<()> {
        self.inner().configure().await
    }

    async fn join(&self) -> Result<()> {
        self.inner().join().await
    }

    async fn install(
        &self,
        tracker: &mut Tracker,
        ctx: &FetchContext,
        retry: &RetryConfig,
    ) -> Result<()> {
        self.inner().install(tracker, ctx, retry).await
    }

    async fn uninstall(&self, tracker: &mut Tracker, ctx: &FetchContext) -> Result<()> {
        self.inner().uninstall(tracker, ctx).await
    }

    async fn uninstall_components(
        &self,
        tracker: &mut Tracker,
        ctx: &FetchContext,
        only: &[ComponentId],
    ) -> Result<()> {
        self.inner().uninstall_components(tracker, ctx, only).await
    }
}

/// Replace `path` with `content` via a sibling temp file
pub(crate) async fn write_atomic(path: &Path, content: &[u8], mode: u32) -> Result<()> {
    if let Some(dir) = path.parent() {
        tokio::fs::create_dir_all(dir).await?;
    }
    let tmp = path.with_extension("tmp");
    tokio::fs::write(&tmp, content).await?;
    tokio::fs::set_permissions(&tmp, std::fs::Permissions::from_mode(mode)).await?;
    if let Err(e) = tokio::fs::rename(&tmp, path).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(e.into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::artifact::Platform;
    use crate::config::fixtures::{hybrid_config, EC2_CONFIG};
    use crate::config::MockConfigProvider;
    use crate::host::fake;
    use crate::installer::IPTABLES_BINARY;
    use crate::Error;

    fn ctx() -> FetchContext {
        FetchContext::with_timeout(Duration::from_secs(5))
    }

    // ==========================================================================
    // Story: The configuration decides the provider
    // ==========================================================================

    #[test]
    fn config_without_hybrid_block_builds_ec2_provider() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (host, _) = fake::host(dir.path(), Platform::new("x86_64", "linux"));

        let mut source = MockConfigProvider::new();
        source
            .expect_provide()
            .times(1)
            .returning(|| NodeConfig::from_yaml(EC2_CONFIG));

        let provider = NodeProvider::from_config_provider(&source, host).expect("provider");
        assert_eq!(provider.kind(), NodeKind::Ec2);
        assert_eq!(provider.name(), "ec2");
        assert_eq!(
            provider
                .components()
                .iter()
                .map(|c| c.id())
                .collect::<Vec<_>>(),
            vec![ComponentId::Iptables]
        );
    }

    #[test]
    fn config_with_hybrid_block_builds_hybrid_provider() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (host, _) = fake::host(dir.path(), Platform::new("x86_64", "linux"));
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, hybrid_config("/pki/cert.pem", "/pki/key.pem")).expect("write");

        let provider =
            NodeProvider::new(&format!("file://{}", path.display()), host).expect("provider");
        assert_eq!(provider.kind(), NodeKind::Hybrid);
        assert_eq!(provider.name(), "hybrid");
        assert_eq!(
            provider
                .components()
                .iter()
                .map(|c| c.id())
                .collect::<Vec<_>>(),
            vec![ComponentId::Iptables, ComponentId::SigningHelper]
        );
    }

    #[test]
    fn failures_before_construction_return_no_provider() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (host, _) = fake::host(dir.path(), Platform::new("x86_64", "linux"));

        let err = NodeProvider::new("imds://latest/user-data", host.clone()).unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));

        let mut source = MockConfigProvider::new();
        source
            .expect_provide()
            .returning(|| Err(Error::configuration("failed to parse NodeConfig: bad")));
        let err = NodeProvider::from_config_provider(&source, host.clone()).unwrap_err();
        assert!(err.to_string().contains("failed to parse NodeConfig"));

        let mut config = NodeConfig::from_yaml(EC2_CONFIG).expect("parse");
        config.spec.cluster.region = String::new();
        assert!(NodeProvider::from_config(config, host).is_err());
    }

    // ==========================================================================
    // Story: Uninstall only touches what nodeadm installed
    // ==========================================================================

    #[tokio::test]
    async fn uninstall_skips_components_that_were_preexisting() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (host, system) = fake::host(dir.path(), Platform::new("x86_64", "linux"));
        system.preinstall(IPTABLES_BINARY);
        let mut tracker = Tracker::load(dir.path().join("tracker")).expect("tracker");

        let provider = NodeProvider::from_config(
            NodeConfig::from_yaml(EC2_CONFIG).expect("parse"),
            host,
        )
        .expect("provider");

        provider
            .install(&mut tracker, &ctx(), &RetryConfig::never())
            .await
            .expect("install");
        assert!(tracker.components().is_empty());

        provider.uninstall(&mut tracker, &ctx()).await.expect("uninstall");
        assert!(system.has_binary(IPTABLES_BINARY));
        assert_eq!(system.uninstalls(), 0);
    }

    #[tokio::test]
    async fn selective_uninstall_leaves_unlisted_components_tracked() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (host, system) = fake::host(dir.path(), Platform::new("x86_64", "linux"));
        let mut tracker = Tracker::load(dir.path().join("tracker")).expect("tracker");
        let provider = NodeProvider::from_config(
            NodeConfig::from_yaml(EC2_CONFIG).expect("parse"),
            host,
        )
        .expect("provider");

        provider
            .install(&mut tracker, &ctx(), &RetryConfig::never())
            .await
            .expect("install");
        provider
            .uninstall_components(&mut tracker, &ctx(), &[])
            .await
            .expect("nothing selected");

        assert!(system.has_binary(IPTABLES_BINARY));
        assert_eq!(system.uninstalls(), 0);
        assert!(tracker.has(&ComponentId::Iptables));

        provider
            .uninstall_components(&mut tracker, &ctx(), &[ComponentId::Iptables])
            .await
            .expect("iptables selected");
        assert!(!system.has_binary(IPTABLES_BINARY));
        assert!(!tracker.has(&ComponentId::Iptables));
    }

    #[tokio::test]
    async fn join_starts_kubelet() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (host, system) = fake::host(dir.path(), Platform::new("x86_64", "linux"));
        let provider = NodeProvider::from_config(
            NodeConfig::from_yaml(EC2_CONFIG).expect("parse"),
            host,
        )
        .expect("provider");

        provider.join().await.expect("join");
        assert_eq!(system.started(), vec![KUBELET_UNIT.to_string()]);
    }

    #[tokio::test]
    async fn atomic_write_replaces_content_and_sets_mode() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("nested/dir/file");

        write_atomic(&path, b"first", 0o600).await.expect("write");
        write_atomic(&path, b"second", 0o600).await.expect("rewrite");

        assert_eq!(std::fs::read(&path).expect("read"), b"second");
        let mode = std::fs::metadata(&path).expect("meta").permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
        assert!(!path.with_extension("tmp").exists());
    }
}

//! Kubelet configuration file

use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::config::NodeConfig;
use crate::{Error, Result};

/// File name inside the kubelet directory
pub const KUBELET_CONFIG_FILE: &str = "config.json";

/// Systemd unit started by `join`
pub const KUBELET_UNIT: &str = "kubelet";

/// Cluster CA bundle the kubelet authenticates clients against
pub const CLIENT_CA_FILE: &str = "/etc/kubernetes/pki/ca.crt";

/// The subset of `KubeletConfiguration` nodeadm manages
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KubeletConfig {
    kind: &'static str,
    api_version: &'static str,
    address: &'static str,
    authentication: Authentication,
    authorization: Authorization,
    cgroup_driver: &'static str,
    cluster_domain: &'static str,
    #[serde(rename = "providerID", skip_serializing_if = "Option::is_none")]
    provider_id: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
struct Authentication {
    anonymous: Toggle,
    webhook: Toggle,
    x509: X509Auth,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
struct X509Auth {
    #[serde(rename = "clientCAFile")]
    client_ca_file: &'static str,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
struct Toggle {
    enabled: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
struct Authorization {
    mode: &'static str,
}

impl KubeletConfig {
    /// Configuration shared by every node kind
    pub fn new() -> Self {
        Self {
            kind: "KubeletConfiguration",
            api_version: "kubelet.config.k8s.io/v1beta1",
            address: "0.0.0.0",
            authentication: Authentication {
                anonymous: Toggle { enabled: false },
                webhook: Toggle { enabled: true },
                x509: X509Auth {
                    client_ca_file: CLIENT_CA_FILE,
                },
            },
            authorization: Authorization { mode: "Webhook" },
            cgroup_driver: "systemd",
            cluster_domain: "cluster.local",
            provider_id: None,
        }
    }

    /// Hybrid nodes have no cloud provider to assign their ID
    pub fn with_hybrid_provider_id(mut self, config: &NodeConfig, node_name: &str) -> Self {
        self.provider_id = Some(format!(
            "eks-hybrid:///{}/{}/{}",
            config.spec.cluster.region, config.spec.cluster.name, node_name
        ));
        self
    }

    /// Provider ID, if one is set
    pub fn provider_id(&self) -> Option<&str> {
        self.provider_id.as_deref()
    }

    /// Write the configuration into `kubelet_dir`
    pub async fn write(&self, kubelet_dir: &Path) -> Result<PathBuf> {
        let path = kubelet_dir.join(KUBELET_CONFIG_FILE);
        let content = serde_json::to_vec_pretty(self)
            .map_err(|e| Error::configuration(format!("failed to encode kubelet config: {}", e)))?;
        super::write_atomic(&path, &content, 0o644).await?;
        Ok(path)
    }
}

impl Default for KubeletConfig {
    fn default() -> Self {
        Self::new()
    }
}

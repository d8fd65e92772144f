//! Node configuration
//!
//! A node is described by a `NodeConfig` YAML document:
//!
//! ```yaml
//! apiVersion: node.eks.aws/v1alpha1
//! kind: NodeConfig
//! spec:
//!   cluster:
//!     name: my-cluster
//!     region: us-west-2
//!   hybrid:
//!     iamRolesAnywhere:
//!       nodeName: edge-01
//!       trustAnchorArn: arn:aws:rolesanywhere:us-west-2:123456789012:trust-anchor/abc
//!       profileArn: arn:aws:rolesanywhere:us-west-2:123456789012:profile/def
//!       roleArn: arn:aws:iam::123456789012:role/hybrid-node
//!       certificatePath: /etc/iam/pki/server.pem
//!       privateKeyPath: /etc/iam/pki/server.key
//! ```
//!
//! The presence of `spec.hybrid` is what classifies a node as hybrid.

use std::path::PathBuf;

#[cfg(test)]
use mockall::automock;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{Error, Result};

/// Expected `apiVersion`
pub const API_VERSION: &str = "node.eks.aws/v1alpha1";

/// Expected `kind`
pub const KIND: &str = "NodeConfig";

/// Parsed node description
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeConfig {
    /// Schema version
    pub api_version: String,
    /// Document kind
    pub kind: String,
    /// Node specification
    pub spec: NodeSpec,
}

/// Node specification
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeSpec {
    /// Cluster the node joins
    pub cluster: ClusterDetails,
    /// Hybrid settings; absent for EC2 nodes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hybrid: Option<HybridOptions>,
}

/// Target cluster
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterDetails {
    /// Cluster name
    pub name: String,
    /// AWS region of the cluster
    pub region: String,
}

/// Settings only hybrid nodes carry
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HybridOptions {
    /// Certificate-based identity
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iam_roles_anywhere: Option<IamRolesAnywhere>,
}

/// IAM Roles Anywhere identity of a hybrid node
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IamRolesAnywhere {
    /// Kubernetes node name; also the credential session name
    pub node_name: String,
    /// Trust anchor ARN
    pub trust_anchor_arn: String,
    /// Profile ARN
    pub profile_arn: String,
    /// Role to assume
    pub role_arn: String,
    /// PEM client certificate
    #[serde(default = "default_certificate_path")]
    pub certificate_path: PathBuf,
    /// PEM private key for the certificate
    #[serde(default = "default_private_key_path")]
    pub private_key_path: PathBuf,
}

fn default_certificate_path() -> PathBuf {
    PathBuf::from("/etc/iam/pki/server.pem")
}

fn default_private_key_path() -> PathBuf {
    PathBuf::from("/etc/iam/pki/server.key")
}

/// Closed classification of a node
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NodeKind {
    /// Instance inside the cloud, identified by its instance profile
    Ec2,
    /// Machine outside the cloud, identified by an X.509 certificate
    Hybrid,
}

impl std::fmt::Display for NodeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NodeKind::Ec2 => f.write_str("ec2"),
            NodeKind::Hybrid => f.write_str("hybrid"),
        }
    }
}

impl NodeConfig {
    /// Parse a YAML document
    pub fn from_yaml(content: &str) -> Result<Self> {
        serde_yaml::from_str(content)
            .map_err(|e| Error::configuration(format!("failed to parse NodeConfig: {}", e)))
    }

    /// Whether this node lives outside the cloud
    pub fn is_hybrid_node(&self) -> bool {
        self.spec.hybrid.is_some()
    }

    /// Classification used to pick the provider variant
    pub fn kind(&self) -> NodeKind {
        if self.is_hybrid_node() {
            NodeKind::Hybrid
        } else {
            NodeKind::Ec2
        }
    }

    /// IAM Roles Anywhere settings, if configured
    pub fn iam_roles_anywhere(&self) -> Option<&IamRolesAnywhere> {
        self.spec
            .hybrid
            .as_ref()
            .and_then(|h| h.iam_roles_anywhere.as_ref())
    }

    /// Check the fields every node needs
    pub fn validate(&self) -> Result<()> {
        if self.api_version != API_VERSION {
            return Err(Error::configuration(format!(
                "unsupported apiVersion '{}', expected '{}'",
                self.api_version, API_VERSION
            )));
        }
        if self.kind != KIND {
            return Err(Error::configuration(format!(
                "unsupported kind '{}', expected '{}'",
                self.kind, KIND
            )));
        }
        if self.spec.cluster.name.trim().is_empty() {
            return Err(Error::configuration("spec.cluster.name is required"));
        }
        if self.spec.cluster.region.trim().is_empty() {
            return Err(Error::configuration("spec.cluster.region is required"));
        }
        Ok(())
    }
}

/// Yields the node's configuration
#[cfg_attr(test, automock)]
pub trait ConfigProvider: Send + Sync {
    /// Load and parse the configuration
    fn provide(&self) -> Result<NodeConfig>;
}

/// Configuration read from a local file
#[derive(Clone, Debug)]
pub struct FileConfigProvider {
    path: PathBuf,
}

impl FileConfigProvider {
    /// Provider for the file at `path`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl ConfigProvider for FileConfigProvider {
    fn provide(&self) -> Result<NodeConfig> {
        debug!(path = %self.path.display(), "Reading node configuration");
        let content = std::fs::read_to_string(&self.path).map_err(|e| {
            Error::configuration(format!(
                "failed to read config file {}: {}",
                self.path.display(),
                e
            ))
        })?;
        NodeConfig::from_yaml(&content)
    }
}

/// Build the provider for a configuration locator
///
/// Accepts `file:///path/to/config.yaml` or a bare path. Other schemes are
/// rejected.
pub fn build_config_provider(locator: &str) -> Result<Box<dyn ConfigProvider>> {
    if let Some(path) = locator.strip_prefix("file://") {
        if path.is_empty() {
            return Err(Error::configuration("file:// config source has no path"));
        }
        return Ok(Box::new(FileConfigProvider::new(path)));
    }
    if let Some((scheme, _)) = locator.split_once("://") {
        return Err(Error::configuration(format!(
            "unsupported config source scheme '{}'",
            scheme
        )));
    }
    if locator.trim().is_empty() {
        return Err(Error::configuration("config source is empty"));
    }
    Ok(Box::new(FileConfigProvider::new(locator)))
}


#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;

    #[test]
    fn ec2_document_classifies_as_ec2() {
        let config = NodeConfig::from_yaml(EC2_CONFIG).expect("parse");
        config.validate().expect("valid");
        assert!(!config.is_hybrid_node());
        assert_eq!(config.kind(), NodeKind::Ec2);
        assert!(config.iam_roles_anywhere().is_none());
    }

    #[test]
    fn hybrid_document_classifies_as_hybrid() {
        let config =
            NodeConfig::from_yaml(&hybrid_config("/pki/cert.pem", "/pki/key.pem")).expect("parse");
        config.validate().expect("valid");
        assert!(config.is_hybrid_node());
        assert_eq!(config.kind(), NodeKind::Hybrid);

        let ira = config.iam_roles_anywhere().expect("roles anywhere");
        assert_eq!(ira.node_name, "edge-01");
        assert_eq!(ira.certificate_path, PathBuf::from("/pki/cert.pem"));
    }

    #[test]
    fn certificate_paths_have_defaults() {
        let doc = r#"
apiVersion: node.eks.aws/v1alpha1
kind: NodeConfig
spec:
  cluster: {name: c, region: r}
  hybrid:
    iamRolesAnywhere:
      nodeName: n
      trustAnchorArn: ta
      profileArn: p
      roleArn: r
"#;
        let config = NodeConfig::from_yaml(doc).expect("parse");
        let ira = config.iam_roles_anywhere().expect("roles anywhere");
        assert_eq!(ira.certificate_path, PathBuf::from("/etc/iam/pki/server.pem"));
        assert_eq!(ira.private_key_path, PathBuf::from("/etc/iam/pki/server.key"));
    }

    #[test]
    fn invalid_yaml_is_configuration_error() {
        let err = NodeConfig::from_yaml("spec: [").unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn wrong_kind_and_missing_cluster_name_are_rejected() {
        let mut config = NodeConfig::from_yaml(EC2_CONFIG).expect("parse");
        config.kind = "Pod".to_string();
        assert!(config.validate().unwrap_err().to_string().contains("kind"));

        let mut config = NodeConfig::from_yaml(EC2_CONFIG).expect("parse");
        config.spec.cluster.name = " ".to_string();
        assert!(config
            .validate()
            .unwrap_err()
            .to_string()
            .contains("spec.cluster.name"));
    }

    #[test]
    fn file_locators_read_from_disk() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, EC2_CONFIG).expect("write");

        let bare = build_config_provider(path.to_str().expect("utf8")).expect("bare path");
        assert_eq!(bare.provide().expect("provide").spec.cluster.name, "my-cluster");

        let url = format!("file://{}", path.display());
        let with_scheme = build_config_provider(&url).expect("file url");
        assert_eq!(with_scheme.provide().expect("provide").kind(), NodeKind::Ec2);
    }

    #[test]
    fn unknown_schemes_and_missing_files_are_configuration_errors() {
        assert!(matches!(
            build_config_provider("imds://user-data"),
            Err(Error::Configuration(_))
        ));
        assert!(matches!(
            build_config_provider("file://"),
            Err(Error::Configuration(_))
        ));

        let provider = build_config_provider("/nonexistent/nodeadm/config.yaml").expect("path");
        let err = provider.provide().unwrap_err();
        assert!(err.to_string().contains("/nonexistent/nodeadm/config.yaml"));
    }
}

//! Hybrid node provider
//!
//! Hybrid nodes run outside the cloud and have no instance profile. They
//! authenticate with IAM Roles Anywhere: the signing helper turns the node's
//! X.509 certificate into temporary credentials, and the AWS shared config
//! points the SDKs at it through `credential_process`.

use std::path::Path;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use tracing::{debug, info};
use x509_parser::pem::parse_x509_pem;

use super::{write_atomic, KubeletConfig, Lifecycle};
use crate::artifact::Source;
use crate::config::{IamRolesAnywhere, NodeConfig};
use crate::host::Host;
use crate::installer::{Component, Iptables, SigningHelper};
use crate::signing_helper::SigningHelperSource;
use crate::{Error, Result};

/// Profile written to the AWS shared config
pub const DEFAULT_AWS_PROFILE: &str = "default";

/// A machine outside the cloud joining with IAM Roles Anywhere credentials
pub struct HybridNode {
    config: NodeConfig,
    host: Host,
    signing_helper: Arc<dyn Source>,
    aws_profile: String,
}

impl std::fmt::Debug for HybridNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HybridNode")
            .field("cluster", &self.config.spec.cluster.name)
            .field("aws_profile", &self.aws_profile)
            .finish_non_exhaustive()
    }
}

impl HybridNode {
    /// Create a provider for `config` on `host`, downloading the signing
    /// helper from the official release channel
    pub fn new(config: NodeConfig, host: Host) -> Self {
        let signing_helper = Arc::new(SigningHelperSource::new(
            host.http.clone(),
            host.platform.clone(),
        ));
        Self {
            config,
            host,
            signing_helper,
            aws_profile: DEFAULT_AWS_PROFILE.to_string(),
        }
    }

    /// Download the signing helper from `source` instead
    pub fn with_signing_helper_source(mut self, source: Arc<dyn Source>) -> Self {
        self.signing_helper = source;
        self
    }

    /// Write credentials under `profile` instead of the default profile
    pub fn with_aws_profile(mut self, profile: impl Into<String>) -> Self {
        self.aws_profile = profile.into();
        self
    }

    fn roles_anywhere(&self) -> Result<&IamRolesAnywhere> {
        self.config.iam_roles_anywhere().ok_or_else(|| {
            Error::validation("hybrid nodes require spec.hybrid.iamRolesAnywhere")
        })
    }

    /// Contents of the AWS shared config for this node
    pub fn aws_config(&self) -> Result<String> {
        let ira = self.roles_anywhere()?;
        let helper = SigningHelper::resolved_path(&self.host);
        let section = if self.aws_profile == DEFAULT_AWS_PROFILE {
            format!("[{}]", DEFAULT_AWS_PROFILE)
        } else {
            format!("[profile {}]", self.aws_profile)
        };
        Ok(format!(
            "{section}\n\
             region = {region}\n\
             credential_process = {helper} credential-process \
             --certificate {cert} \
             --private-key {key} \
             --trust-anchor-arn {trust_anchor} \
             --profile-arn {profile} \
             --role-arn {role} \
             --role-session-name {session}\n",
            region = self.config.spec.cluster.region,
            helper = helper.display(),
            cert = ira.certificate_path.display(),
            key = ira.private_key_path.display(),
            trust_anchor = ira.trust_anchor_arn,
            profile = ira.profile_arn,
            role = ira.role_arn,
            session = ira.node_name,
        ))
    }
}

#[async_trait]
impl Lifecycle for HybridNode {
    fn name(&self) -> &'static str {
        "hybrid"
    }

    fn node_config(&self) -> &NodeConfig {
        &self.config
    }

    fn host(&self) -> &Host {
        &self.host
    }

    fn components(&self) -> Vec<Box<dyn Component>> {
        vec![
            Box::new(Iptables::default()),
            Box::new(SigningHelper::new(self.signing_helper.clone())),
        ]
    }

    async fn validate(&self) -> Result<()> {
        self.config.validate()?;
        let ira = self.roles_anywhere()?;

        for (field, value) in [
            ("nodeName", &ira.node_name),
            ("trustAnchorArn", &ira.trust_anchor_arn),
            ("profileArn", &ira.profile_arn),
            ("roleArn", &ira.role_arn),
        ] {
            if value.trim().is_empty() {
                return Err(Error::validation(format!(
                    "spec.hybrid.iamRolesAnywhere.{} is required",
                    field
                )));
            }
        }

        validate_certificate(&ira.certificate_path).await?;
        if !tokio::fs::try_exists(&ira.private_key_path).await? {
            return Err(Error::validation(format!(
                "private key {} not found",
                ira.private_key_path.display()
            )));
        }
        debug!(node = %ira.node_name, "Hybrid node identity validated");
        Ok(())
    }

    async fn configure(&self) -> Result<()> {
        let ira = self.roles_anywhere()?;

        let aws_config = self.aws_config()?;
        write_atomic(&self.host.paths.aws_config, aws_config.as_bytes(), 0o600).await?;
        info!(
            path = %self.host.paths.aws_config.display(),
            profile = %self.aws_profile,
            "Wrote AWS config"
        );

        let path = KubeletConfig::new()
            .with_hybrid_provider_id(&self.config, &ira.node_name)
            .write(&self.host.paths.kubelet_dir)
            .await?;
        info!(path = %path.display(), "Wrote kubelet config");
        Ok(())
    }
}

/// Reject certificates that are unreadable, unparseable, or outside their
/// validity window
async fn validate_certificate(path: &Path) -> Result<()> {
    let pem_bytes = tokio::fs::read(path).await.map_err(|e| {
        Error::validation(format!(
            "failed to read certificate {}: {}",
            path.display(),
            e
        ))
    })?;

    let (_, pem) = parse_x509_pem(&pem_bytes).map_err(|e| {
        Error::validation(format!(
            "certificate {} is not PEM: {}",
            path.display(),
            e
        ))
    })?;
    let cert = pem.parse_x509().map_err(|e| {
        Error::validation(format!(
            "certificate {} is not X.509: {}",
            path.display(),
            e
        ))
    })?;

    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or_default();
    let not_before = cert.validity().not_before.timestamp();
    let not_after = cert.validity().not_after.timestamp();

    if now < not_before {
        return Err(Error::validation(format!(
            "certificate {} is not yet valid",
            path.display()
        )));
    }
    if now > not_after {
        return Err(Error::validation(format!(
            "certificate {} expired",
            path.display()
        )));
    }
    Ok(())
}

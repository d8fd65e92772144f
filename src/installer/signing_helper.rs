//! Signing helper binary installer

use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use super::Component;
use crate::artifact::{ComponentId, FetchContext, Source};
use crate::host::Host;
use crate::signing_helper::SIGNING_HELPER_BINARY;
use crate::Result;

/// Installs `aws_signing_helper` into the host's binary directory
#[derive(Clone)]
pub struct SigningHelper {
    source: Arc<dyn Source>,
}

impl SigningHelper {
    /// Installer that downloads the binary from `source`
    pub fn new(source: Arc<dyn Source>) -> Self {
        Self { source }
    }

    /// Where nodeadm installs the binary on `host`
    pub fn install_path(host: &Host) -> PathBuf {
        host.paths.bin_dir.join(SIGNING_HELPER_BINARY)
    }

    /// The binary found on `PATH`, else the install location
    pub fn resolved_path(host: &Host) -> PathBuf {
        host.probe
            .resolve(SIGNING_HELPER_BINARY)
            .unwrap_or_else(|| Self::install_path(host))
    }
}

#[async_trait]
impl Component for SigningHelper {
    fn id(&self) -> ComponentId {
        ComponentId::SigningHelper
    }

    async fn is_present(&self, host: &Host) -> Result<bool> {
        if host.probe.resolve(SIGNING_HELPER_BINARY).is_some() {
            return Ok(true);
        }
        Ok(tokio::fs::try_exists(Self::install_path(host)).await?)
    }

    async fn install(&self, host: &Host, ctx: &FetchContext) -> Result<()> {
        let artifact = self.source.fetch(ctx).await?;
        if !artifact.is_verified() {
            warn!(origin = %artifact.origin(), "Installing signing helper without checksum verification");
        }
        let bytes = artifact.into_bytes(ctx).await?;

        let path = Self::install_path(host);
        if let Some(dir) = path.parent() {
            tokio::fs::create_dir_all(dir).await?;
        }
        let tmp = path.with_extension("download");
        tokio::fs::write(&tmp, &bytes).await?;
        tokio::fs::set_permissions(&tmp, std::fs::Permissions::from_mode(0o755)).await?;
        if let Err(e) = tokio::fs::rename(&tmp, &path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        Ok(())
    }

    async fn uninstall(&self, host: &Host, _ctx: &FetchContext) -> Result<()> {
        match tokio::fs::remove_file(Self::install_path(host)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

//! IAM Roles Anywhere signing helper source
//!
//! The signing helper (`aws_signing_helper`) exchanges the node's X.509
//! client certificate for temporary AWS credentials. Hybrid nodes download a
//! pinned release of it from the official release channel:
//!
//! ```text
//! https://rolesanywhere.amazonaws.com/releases/<version>/<ARCH>/<OS>/aws_signing_helper
//! ```
//!
//! Releases are not published with checksums, so the artifact is handed back
//! explicitly unverified.

use async_trait::async_trait;
use tracing::info;

use crate::artifact::{
    fetch_url, Artifact, CapabilityTable, ComponentId, FetchContext, Platform, PlatformSupport,
    Source,
};
use crate::Result;

/// Pinned signing helper release
pub const SIGNING_HELPER_VERSION: &str = "1.2.0";

/// File name of the signing helper binary
pub const SIGNING_HELPER_BINARY: &str = "aws_signing_helper";

/// Official release channel
pub const DEFAULT_RELEASE_BASE_URL: &str = "https://rolesanywhere.amazonaws.com";

/// Platforms the pinned release is published for
pub const SUPPORTED_PLATFORMS: CapabilityTable = CapabilityTable::new(
    ComponentId::SigningHelper,
    &[PlatformSupport {
        arch: "x86_64",
        os: "linux",
        arch_label: "X86_64",
        os_label: "Linux",
    }],
);

/// Downloads the pinned signing helper release for one platform
#[derive(Clone, Debug)]
pub struct SigningHelperSource {
    client: reqwest::Client,
    base_url: String,
    version: String,
    platform: Platform,
}

impl SigningHelperSource {
    /// Source for the official release channel on `platform`
    pub fn new(client: reqwest::Client, platform: Platform) -> Self {
        Self {
            client,
            base_url: DEFAULT_RELEASE_BASE_URL.to_string(),
            version: SIGNING_HELPER_VERSION.to_string(),
            platform,
        }
    }

    /// Override the release channel (mirrors, tests)
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Release version this source downloads
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Download URL for this platform
    ///
    /// Fails with `UnsupportedPlatform` for any platform outside
    /// [`SUPPORTED_PLATFORMS`].
    pub fn download_url(&self) -> Result<String> {
        let entry = SUPPORTED_PLATFORMS.resolve(&self.platform)?;
        Ok(format!(
            "{}/releases/{}/{}/{}/{}",
            self.base_url, self.version, entry.arch_label, entry.os_label, SIGNING_HELPER_BINARY
        ))
    }
}

#[async_trait]
impl Source for SigningHelperSource {
    async fn fetch(&self, ctx: &FetchContext) -> Result<Artifact> {
        let url = self.download_url()?;
        info!(url = %url, version = %self.version, "Downloading signing helper");
        let body = fetch_url(&self.client, &url, ctx).await?;
        Ok(Artifact::unverified(url, body))
    }
}

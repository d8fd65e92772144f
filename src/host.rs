//! Side-effecting host collaborators
//!
//! Everything that touches the machine outside of plain file writes under
//! the configured roots goes through [`Host`]: the OS package manager, binary
//! resolution on `PATH`, and the service manager. Tests substitute fakes.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use tracing::info;

use crate::artifact::{default_client, PackageManager, Platform, SystemPackageManager};
use crate::exec::run_command;
use crate::Result;

/// Resolves executables the way a shell would
#[cfg_attr(test, automock)]
pub trait BinaryProbe: Send + Sync {
    /// Full path of `name` if it is resolvable
    fn resolve(&self, name: &str) -> Option<PathBuf>;
}

/// Looks executables up on `PATH`
#[derive(Clone, Copy, Debug, Default)]
pub struct PathProbe;

impl BinaryProbe for PathProbe {
    fn resolve(&self, name: &str) -> Option<PathBuf> {
        which::which(name).ok()
    }
}

/// Starts node daemons
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ServiceManager: Send + Sync {
    /// Reload unit files, then enable and start `unit`
    async fn enable_now(&self, unit: &str) -> Result<()>;
}

/// Service manager backed by `systemctl`
#[derive(Clone, Copy, Debug, Default)]
pub struct Systemd;

#[async_trait]
impl ServiceManager for Systemd {
    async fn enable_now(&self, unit: &str) -> Result<()> {
        info!(unit, "Enabling and starting unit");
        run_command("systemctl", &["daemon-reload"], &[]).await?;
        run_command("systemctl", &["enable", "--now", unit], &[]).await?;
        Ok(())
    }
}

/// Filesystem locations nodeadm writes to
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HostPaths {
    /// Directory for downloaded binaries
    pub bin_dir: PathBuf,
    /// AWS shared config file used by hybrid nodes
    pub aws_config: PathBuf,
    /// Directory holding the kubelet configuration
    pub kubelet_dir: PathBuf,
}

impl Default for HostPaths {
    fn default() -> Self {
        Self {
            bin_dir: PathBuf::from("/usr/local/bin"),
            aws_config: PathBuf::from("/root/.aws/config"),
            kubelet_dir: PathBuf::from("/etc/kubernetes/kubelet"),
        }
    }
}

impl HostPaths {
    /// All paths relocated under `root` (used for chroots and tests)
    pub fn under(root: &Path) -> Self {
        let defaults = Self::default();
        let rebase = |p: &Path| root.join(p.strip_prefix("/").unwrap_or(p));
        Self {
            bin_dir: rebase(&defaults.bin_dir),
            aws_config: rebase(&defaults.aws_config),
            kubelet_dir: rebase(&defaults.kubelet_dir),
        }
    }
}

/// The machine being bootstrapped
#[derive(Clone)]
pub struct Host {
    /// OS package manager
    pub packages: Arc<dyn PackageManager>,
    /// Executable lookup
    pub probe: Arc<dyn BinaryProbe>,
    /// Daemon control
    pub services: Arc<dyn ServiceManager>,
    /// HTTP client for artifact downloads
    pub http: reqwest::Client,
    /// Detected platform
    pub platform: Platform,
    /// Write locations
    pub paths: HostPaths,
}

impl std::fmt::Debug for Host {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Host")
            .field("platform", &self.platform)
            .field("paths", &self.paths)
            .finish_non_exhaustive()
    }
}

impl Host {
    /// The real machine: detected package manager, `PATH`, systemd
    pub fn system() -> Result<Self> {
        Ok(Self {
            packages: Arc::new(SystemPackageManager::detect()?),
            probe: Arc::new(PathProbe),
            services: Arc::new(Systemd),
            http: default_client()?,
            platform: Platform::current(),
            paths: HostPaths::default(),
        })
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paths_can_be_rebased_under_a_root() {
        let paths = HostPaths::under(Path::new("/tmp/root"));
        assert_eq!(paths.bin_dir, PathBuf::from("/tmp/root/usr/local/bin"));
        assert_eq!(paths.aws_config, PathBuf::from("/tmp/root/root/.aws/config"));
        assert_eq!(paths.kubelet_dir, PathBuf::from("/tmp/root/etc/kubernetes/kubelet"));
    }

    #[test]
    fn path_probe_finds_sh_but_not_nonsense() {
        assert!(PathProbe.resolve("sh").is_some());
        assert!(PathProbe.resolve("nodeadm-definitely-not-a-program").is_none());
    }

    #[tokio::test]
    async fn fake_system_links_packages_and_binaries() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (host, system) = fake::host(dir.path(), Platform::new("x86_64", "linux"));

        assert!(host.probe.resolve("iptables").is_none());
        host.packages
            .install(&crate::artifact::Package::new("iptables"))
            .await
            .expect("install");
        assert!(host.probe.resolve("iptables").is_some());
        assert_eq!(system.installs(), 1);
    }
}

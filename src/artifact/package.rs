//! OS package manager boundary
//!
//! Package payloads are fetched and installed by the distribution's own
//! package manager, so the artifact handed across this boundary is a
//! [`Package`] reference rather than a byte stream.

use std::fmt;
use std::path::PathBuf;

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use tracing::info;

use crate::exec::run_command;
use crate::{Error, Result};

/// Package manager families nodeadm knows how to drive
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PackageManagerKind {
    /// Debian / Ubuntu
    Apt,
    /// Fedora / RHEL 8+
    Dnf,
    /// Amazon Linux 2 / RHEL 7
    Yum,
}

impl PackageManagerKind {
    /// Executable that implements this family
    pub fn binary(self) -> &'static str {
        match self {
            PackageManagerKind::Apt => "apt-get",
            PackageManagerKind::Dnf => "dnf",
            PackageManagerKind::Yum => "yum",
        }
    }

    const DETECTION_ORDER: [PackageManagerKind; 3] = [
        PackageManagerKind::Apt,
        PackageManagerKind::Dnf,
        PackageManagerKind::Yum,
    ];
}

impl fmt::Display for PackageManagerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.binary())
    }
}

/// Reference to an OS package, resolvable by the package manager
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Package {
    /// Package name in the distribution's repositories
    pub name: String,
}

impl Package {
    /// Reference a package by name
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

/// Installs and removes OS packages
///
/// This trait abstracts the global, side-effecting package manager so that
/// installer sequencing can be tested without touching the machine.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait PackageManager: Send + Sync {
    /// Install `package`; returns once the package manager reports success
    async fn install(&self, package: &Package) -> Result<()>;

    /// Remove `package`
    async fn uninstall(&self, package: &Package) -> Result<()>;
}

/// Package manager backed by the host's `apt-get`, `dnf` or `yum`
#[derive(Clone, Debug)]
pub struct SystemPackageManager {
    kind: PackageManagerKind,
    binary: PathBuf,
}

impl SystemPackageManager {
    /// Detect the first supported package manager on `PATH`
    pub fn detect() -> Result<Self> {
        for kind in PackageManagerKind::DETECTION_ORDER {
            if let Ok(binary) = which::which(kind.binary()) {
                return Ok(Self { kind, binary });
            }
        }
        Err(Error::configuration(
            "no supported package manager found (tried apt-get, dnf, yum)",
        ))
    }

    /// Use a specific package manager binary
    pub fn new(kind: PackageManagerKind, binary: impl Into<PathBuf>) -> Self {
        Self {
            kind,
            binary: binary.into(),
        }
    }

    /// Detected family
    pub fn kind(&self) -> PackageManagerKind {
        self.kind
    }

    fn envs(&self) -> &'static [(&'static str, &'static str)] {
        match self.kind {
            PackageManagerKind::Apt => &[("DEBIAN_FRONTEND", "noninteractive")],
            PackageManagerKind::Dnf | PackageManagerKind::Yum => &[],
        }
    }

    async fn run(&self, verb: &str, package: &Package) -> Result<()> {
        let binary = self.binary.to_string_lossy();
        run_command(&binary, &[verb, "-y", &package.name], self.envs()).await?;
        Ok(())
    }
}

#[async_trait]
impl PackageManager for SystemPackageManager {
    async fn install(&self, package: &Package) -> Result<()> {
        info!(package = %package.name, manager = %self.kind, "Installing package");
        self.run("install", package).await
    }

    async fn uninstall(&self, package: &Package) -> Result<()> {
        info!(package = %package.name, manager = %self.kind, "Removing package");
        self.run("remove", package).await
    }
}

//! Host platform detection and per-component capability tables

use std::fmt;

use crate::artifact::ComponentId;
use crate::{Error, Result};

/// CPU architecture and operating system of the host, as reported by Rust's
/// `std::env::consts` (`"x86_64"`, `"aarch64"`, `"linux"`, ...)
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Platform {
    /// CPU architecture
    pub arch: String,
    /// Operating system
    pub os: String,
}

impl Platform {
    /// Create a platform from explicit arch and os names
    pub fn new(arch: impl Into<String>, os: impl Into<String>) -> Self {
        Self {
            arch: arch.into(),
            os: os.into(),
        }
    }

    /// The platform this process is running on
    pub fn current() -> Self {
        Self::new(std::env::consts::ARCH, std::env::consts::OS)
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.os, self.arch)
    }
}

/// One supported (arch, os) pair and the labels a release channel uses for it
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PlatformSupport {
    /// Architecture as detected on the host
    pub arch: &'static str,
    /// Operating system as detected on the host
    pub os: &'static str,
    /// Architecture segment in release URLs
    pub arch_label: &'static str,
    /// Operating system segment in release URLs
    pub os_label: &'static str,
}

/// Declared platform support for one component
///
/// Anything not listed is unsupported; lookups never touch the network.
#[derive(Clone, Debug)]
pub struct CapabilityTable {
    component: ComponentId,
    entries: &'static [PlatformSupport],
}

impl CapabilityTable {
    /// Build a table for `component` from its supported entries
    pub const fn new(component: ComponentId, entries: &'static [PlatformSupport]) -> Self {
        Self { component, entries }
    }

    /// Find the entry for `platform`, or fail with `UnsupportedPlatform`
    pub fn resolve(&self, platform: &Platform) -> Result<&'static PlatformSupport> {
        self.entries
            .iter()
            .find(|e| e.arch == platform.arch && e.os == platform.os)
            .ok_or_else(|| Error::UnsupportedPlatform {
                component: self.component.clone(),
                arch: platform.arch.clone(),
                os: platform.os.clone(),
            })
    }

    /// Whether `platform` appears in the table
    pub fn supports(&self, platform: &Platform) -> bool {
        self.resolve(platform).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TABLE: CapabilityTable = CapabilityTable::new(
        ComponentId::SigningHelper,
        &[
            PlatformSupport {
                arch: "x86_64",
                os: "linux",
                arch_label: "X86_64",
                os_label: "Linux",
            },
            PlatformSupport {
                arch: "aarch64",
                os: "linux",
                arch_label: "Aarch64",
                os_label: "Linux",
            },
        ],
    );

    #[test]
    fn listed_platforms_resolve_to_their_labels() {
        let entry = TABLE
            .resolve(&Platform::new("aarch64", "linux"))
            .expect("aarch64 is listed");
        assert_eq!(entry.arch_label, "Aarch64");
        assert_eq!(entry.os_label, "Linux");
    }

    #[test]
    fn unlisted_os_is_unsupported_even_for_known_arch() {
        let err = TABLE
            .resolve(&Platform::new("x86_64", "macos"))
            .unwrap_err();
        match err {
            Error::UnsupportedPlatform { arch, os, component } => {
                assert_eq!(arch, "x86_64");
                assert_eq!(os, "macos");
                assert_eq!(component, ComponentId::SigningHelper);
            }
            other => panic!("Expected UnsupportedPlatform, got {other:?}"),
        }
    }

    #[test]
    fn current_platform_uses_std_consts() {
        let platform = Platform::current();
        assert_eq!(platform.arch, std::env::consts::ARCH);
        assert_eq!(platform.to_string(), format!("{}/{}", std::env::consts::OS, std::env::consts::ARCH));
    }
}

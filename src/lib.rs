//! nodeadm - node bootstrap engine for managed Kubernetes
//!
//! nodeadm prepares a machine to join a managed Kubernetes control plane. It
//! installs the OS-level components the node needs, writes the node's
//! configuration, and starts the kubelet. Two kinds of node are supported:
//! instances running inside the cloud (EC2) and machines outside it (hybrid),
//! which authenticate with X.509 certificates through IAM Roles Anywhere.
//!
//! # Modules
//!
//! - [`config`] - NodeConfig documents and where they are loaded from
//! - [`node`] - Node providers (EC2, hybrid) and the factory that picks one
//! - [`install`] - Orchestrates validate, install, configure, join
//! - [`installer`] - Component installers and their shared contract
//! - [`artifact`] - Artifact sources, checksums, packages, platforms
//! - [`signing_helper`] - Release source for the IAM Roles Anywhere signing helper
//! - [`tracker`] - Durable ledger of components nodeadm installed
//! - [`host`] - Package manager, binary probe, and service manager seams
//! - [`retry`] - Exponential backoff for transient failures
//! - [`error`] - Error types

#![deny(missing_docs)]

pub mod artifact;
pub mod config;
pub mod error;
pub mod exec;
pub mod host;
pub mod install;
pub mod installer;
pub mod node;
pub mod retry;
pub mod signing_helper;
pub mod tracker;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

// =============================================================================
// Default Configuration Constants
// =============================================================================

/// Default configuration source
pub const DEFAULT_CONFIG_SOURCE: &str = "file:///etc/nodeadm/config.yaml";

/// Default deadline for a single artifact fetch, body included
pub const DEFAULT_FETCH_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(120);

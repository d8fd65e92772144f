//! Node bootstrap orchestration
//!
//! This module drives one node through its bootstrap:
//!
//! 1. Validate the node's prerequisites (nothing is changed yet)
//! 2. Install the provider's components, retrying transient fetch failures
//! 3. Write the node's configuration files
//! 4. Start the kubelet
//!
//! If any step after validation fails and `rollback_on_failure` is set, the
//! components this run installed are uninstalled in reverse order. Components
//! recorded by earlier runs are kept.
//!
//! # Example
//!
//! ```no_run
//! use nodeadm::host::Host;
//! use nodeadm::install::{InstallConfig, Installer};
//! use nodeadm::node::NodeProvider;
//! use nodeadm::tracker::{Tracker, DEFAULT_TRACKER_PATH};
//!
//! # async fn bootstrap() -> nodeadm::Result<()> {
//! let provider = NodeProvider::new("file:///etc/nodeadm/config.yaml", Host::system()?)?;
//! let tracker = Tracker::load(DEFAULT_TRACKER_PATH)?;
//! let mut installer = Installer::new(InstallConfig::default(), provider, tracker);
//! installer.run().await?;
//! # Ok(())
//! # }
//! ```

use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::artifact::{ComponentId, FetchContext};
use crate::node::Lifecycle;
use crate::retry::RetryConfig;
use crate::tracker::Tracker;
use crate::{Error, Result, DEFAULT_FETCH_TIMEOUT};

/// Configuration for the node installer
#[derive(Debug, Clone)]
pub struct InstallConfig {
    /// Deadline for each fetch attempt, body included
    pub fetch_timeout: Duration,
    /// Retry policy for transient fetch failures
    pub retry: RetryConfig,
    /// Uninstall tracked components if bootstrap fails after validation
    pub rollback_on_failure: bool,
}

impl Default for InstallConfig {
    fn default() -> Self {
        Self {
            fetch_timeout: DEFAULT_FETCH_TIMEOUT,
            retry: RetryConfig {
                max_attempts: 3,
                initial_delay: Duration::from_secs(1),
                max_delay: Duration::from_secs(10),
                backoff_multiplier: 2.0,
            },
            rollback_on_failure: false,
        }
    }
}

/// What a successful bootstrap did
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallReport {
    /// Provider that ran
    pub provider: &'static str,
    /// Components newly installed by this run
    pub installed: Vec<ComponentId>,
    /// Wall-clock time of the run
    pub duration: Duration,
}

/// The node installer
#[derive(Debug)]
pub struct Installer<P> {
    config: InstallConfig,
    provider: P,
    tracker: Tracker,
    cancel: CancellationToken,
}

impl<P: Lifecycle> Installer<P> {
    /// Create a new installer for `provider`, recording into `tracker`
    pub fn new(config: InstallConfig, provider: P, tracker: Tracker) -> Self {
        Self {
            config,
            provider,
            tracker,
            cancel: CancellationToken::new(),
        }
    }

    /// Token that aborts in-flight fetches when cancelled
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// The installation ledger
    pub fn tracker(&self) -> &Tracker {
        &self.tracker
    }

    /// The node provider
    pub fn provider(&self) -> &P {
        &self.provider
    }

    fn fetch_context(&self) -> FetchContext {
        FetchContext::new(self.cancel.clone(), self.config.fetch_timeout)
    }

    /// Run the bootstrap
    pub async fn run(&mut self) -> Result<InstallReport> {
        let start = Instant::now();
        let name = self.provider.name();
        let before = self.tracker.components().to_vec();
        info!(provider = name, "Starting node bootstrap");

        self.provider.validate().await?;

        if let Err(err) = self.apply().await {
            if !self.config.rollback_on_failure {
                return Err(err);
            }
            warn!(provider = name, error = %err, "Bootstrap failed, rolling back");
            if let Err(rollback) = self.rollback(&before).await {
                error!(provider = name, error = %rollback, "Rollback failed");
                return Err(Error::rollback_failed(err, rollback));
            }
            return Err(err);
        }

        let installed: Vec<ComponentId> = self
            .tracker
            .components()
            .iter()
            .filter(|id| !before.contains(id))
            .cloned()
            .collect();
        let duration = start.elapsed();
        debug!(
            provider = name,
            installed = installed.len(),
            duration_ms = duration.as_millis() as u64,
            "Bootstrap steps finished"
        );

        Ok(InstallReport {
            provider: name,
            installed,
            duration,
        })
    }

    async fn apply(&mut self) -> Result<()> {
        let ctx = self.fetch_context();
        self.provider
            .install(&mut self.tracker, &ctx, &self.config.retry)
            .await?;
        self.provider.configure().await?;
        self.provider.join().await
    }

    /// Uninstall what was tracked now but not in `before`
    async fn rollback(&mut self, before: &[ComponentId]) -> Result<()> {
        let installed: Vec<ComponentId> = self
            .tracker
            .components()
            .iter()
            .filter(|id| !before.contains(id))
            .cloned()
            .collect();
        // A cancelled run must still be able to undo its installs
        let ctx = FetchContext::with_timeout(self.config.fetch_timeout);
        self.provider
            .uninstall_components(&mut self.tracker, &ctx, &installed)
            .await
    }

    /// Configure and join a node whose components are already installed
    pub async fn init(&mut self) -> Result<()> {
        let name = self.provider.name();
        info!(provider = name, "Initializing node");
        self.provider.validate().await?;
        self.provider.configure().await?;
        self.provider.join().await?;
        info!(provider = name, "Node initialized");
        Ok(())
    }

    /// Remove every tracked component of the provider in reverse order
    pub async fn uninstall(&mut self) -> Result<()> {
        let name = self.provider.name();
        info!(provider = name, "Uninstalling node components");
        let ctx = self.fetch_context();
        self.provider.uninstall(&mut self.tracker, &ctx).await?;
        info!(provider = name, "Node components uninstalled");
        Ok(())
    }
}

//! nodeadm - bootstrap a node into a managed Kubernetes cluster

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use nodeadm::host::Host;
use nodeadm::install::{InstallConfig, Installer};
use nodeadm::node::{Lifecycle, NodeProvider};
use nodeadm::retry::RetryConfig;
use nodeadm::tracker::{Tracker, DEFAULT_TRACKER_PATH};
use nodeadm::{DEFAULT_CONFIG_SOURCE, DEFAULT_FETCH_TIMEOUT};

/// nodeadm - join EC2 and hybrid nodes to a managed Kubernetes cluster
#[derive(Parser, Debug)]
#[command(name = "nodeadm", version, about, long_about = None)]
struct Cli {
    /// Where the NodeConfig is read from (file:// URL or path)
    #[arg(
        short = 'c',
        long = "config-source",
        env = "NODEADM_CONFIG",
        default_value = DEFAULT_CONFIG_SOURCE,
        global = true
    )]
    config_source: String,

    /// Installation ledger file
    #[arg(
        long,
        env = "NODEADM_TRACKER",
        default_value = DEFAULT_TRACKER_PATH,
        global = true
    )]
    tracker: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Install components, write configuration, and start the kubelet
    Install(InstallArgs),

    /// Write configuration and start the kubelet on an already installed node
    Init,

    /// Remove the components nodeadm installed
    Uninstall,
}

/// Install mode arguments
#[derive(Parser, Debug)]
struct InstallArgs {
    /// Uninstall already-installed components if a later step fails
    #[arg(long)]
    rollback_on_failure: bool,

    /// Deadline for each download in seconds
    #[arg(long, default_value_t = DEFAULT_FETCH_TIMEOUT.as_secs())]
    fetch_timeout_secs: u64,

    /// Attempts per download for transient failures
    #[arg(long, default_value = "3")]
    max_attempts: u32,
}

impl InstallArgs {
    fn install_config(&self) -> InstallConfig {
        let defaults = InstallConfig::default();
        InstallConfig {
            fetch_timeout: Duration::from_secs(self.fetch_timeout_secs),
            retry: RetryConfig {
                max_attempts: self.max_attempts.max(1),
                ..defaults.retry
            },
            rollback_on_failure: self.rollback_on_failure,
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    let host = Host::system()?;
    let provider = NodeProvider::new(&cli.config_source, host)?;
    let tracker = Tracker::load(&cli.tracker)?;
    info!(
        provider = provider.name(),
        tracker = %cli.tracker.display(),
        "Node provider ready"
    );

    match cli.command {
        Commands::Install(args) => run_install(args, provider, tracker).await,
        Commands::Init => {
            let mut installer = Installer::new(InstallConfig::default(), provider, tracker);
            installer.init().await?;
            Ok(())
        }
        Commands::Uninstall => {
            let mut installer = Installer::new(InstallConfig::default(), provider, tracker);
            installer.uninstall().await?;
            Ok(())
        }
    }
}

/// Run the installer, aborting in-flight downloads on Ctrl-C
async fn run_install(
    args: InstallArgs,
    provider: NodeProvider,
    tracker: Tracker,
) -> anyhow::Result<()> {
    let mut installer = Installer::new(args.install_config(), provider, tracker);

    let cancel = installer.cancel_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, cancelling");
            cancel.cancel();
        }
    });

    let report = installer
        .run()
        .await
        .map_err(|e| anyhow::anyhow!("Node bootstrap failed: {}", e))?;

    println!(
        "Node bootstrap complete ({} node, {} component(s) installed, {:?})",
        report.provider,
        report.installed.len(),
        report.duration
    );
    Ok(())
}

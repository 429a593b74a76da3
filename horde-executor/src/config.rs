//! Executor configuration
//!
//! Everything the executor needs to find its miner and run one job. Values
//! come from the environment and are passed explicitly to the components
//! that use them.

use std::path::PathBuf;
use std::time::Duration;

/// Executor configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Miner base address (e.g., "ws://miner:8000")
    pub miner_address: String,

    /// Token identifying the job on the miner's executor interface
    pub executor_token: String,

    /// Port announced for the streaming listener
    pub streaming_port: u16,

    /// Timeout applied when the initial job request carries none
    pub job_timeout: Duration,

    /// Base directory for per-job volume and output directories
    pub workspace_base: PathBuf,

    /// Whether machine specs are sent ahead of a successful result
    pub send_machine_specs: bool,

    /// Name or path of the podman executable
    pub podman_binary: String,
}

impl Config {
    /// Creates a new configuration with defaults
    pub fn new(miner_address: String, executor_token: String) -> Self {
        Self {
            miner_address,
            executor_token,
            streaming_port: 8443,
            job_timeout: Duration::from_secs(300),
            workspace_base: std::env::temp_dir().join("horde-executor"),
            send_machine_specs: true,
            podman_binary: "podman".to_string(),
        }
    }

    /// Creates configuration from environment variables
    ///
    /// Expected environment variables:
    /// - MINER_ADDRESS (required)
    /// - EXECUTOR_TOKEN (required)
    /// - STREAMING_PORT (optional, default: 8443)
    /// - JOB_TIMEOUT (optional, seconds, default: 300)
    /// - WORKSPACE_BASE (optional, default: <tmp>/horde-executor)
    /// - SEND_MACHINE_SPECS (optional, default: true)
    /// - PODMAN_BINARY (optional, default: podman)
    pub fn from_env() -> anyhow::Result<Self> {
        let miner_address = std::env::var("MINER_ADDRESS")
            .map_err(|_| anyhow::anyhow!("MINER_ADDRESS environment variable not set"))?;

        let executor_token = std::env::var("EXECUTOR_TOKEN")
            .map_err(|_| anyhow::anyhow!("EXECUTOR_TOKEN environment variable not set"))?;

        let mut config = Self::new(miner_address, executor_token);

        if let Some(port) = std::env::var("STREAMING_PORT")
            .ok()
            .and_then(|s| s.parse::<u16>().ok())
        {
            config.streaming_port = port;
        }

        if let Some(timeout) = std::env::var("JOB_TIMEOUT")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
        {
            config.job_timeout = Duration::from_secs(timeout);
        }

        if let Ok(base) = std::env::var("WORKSPACE_BASE") {
            config.workspace_base = PathBuf::from(base);
        }

        if let Some(send) = std::env::var("SEND_MACHINE_SPECS")
            .ok()
            .and_then(|s| s.parse::<bool>().ok())
        {
            config.send_machine_specs = send;
        }

        if let Ok(binary) = std::env::var("PODMAN_BINARY") {
            config.podman_binary = binary;
        }

        Ok(config)
    }

    /// Validates the configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.executor_token.is_empty() {
            anyhow::bail!("executor_token cannot be empty");
        }

        if !self.miner_address.starts_with("ws://") && !self.miner_address.starts_with("wss://") {
            anyhow::bail!("miner_address must start with ws:// or wss://");
        }

        if self.job_timeout.as_secs() == 0 {
            anyhow::bail!("job_timeout must be greater than 0");
        }

        if self.streaming_port == 0 {
            anyhow::bail!("streaming_port must be greater than 0");
        }

        Ok(())
    }
}

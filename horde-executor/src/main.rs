//! Horde Executor
//!
//! An ephemeral worker that runs exactly one job for the miner that spawned it.
//!
//! Architecture:
//! - Configuration: miner address, token and limits from the environment
//! - Transport: WebSocket channel to the miner's executor interface
//! - Handshake / client: exactly-once intake of the job specification and
//!   payload, plus every status and result message sent back
//! - Engine: runs the workload in a podman container
//! - Job driver: sequences the above for the single job

mod client;
mod config;
mod engine;
mod error;
mod handshake;
mod job;
mod transport;

use anyhow::{Context, Result};
use horde_core::protocol::executor_interface_url;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::client::MinerClient;
use crate::config::Config;
use crate::engine::PodmanEngine;
use crate::job::JobDriver;
use crate::transport::WsTransport;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "horde_executor=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Horde Executor");

    let config = Config::from_env()?;
    config.validate()?;
    info!(
        "Loaded configuration: miner_address={}, job_timeout={:?}",
        config.miner_address, config.job_timeout
    );

    let url = executor_interface_url(&config.miner_address, &config.executor_token);
    let transport = WsTransport::connect(&url)
        .await
        .context("Failed to connect to miner")?;
    info!("Connected to {}", transport.url());

    let client = Arc::new(MinerClient::new(
        Arc::new(transport),
        config.streaming_port,
    ));

    let mut inbound = {
        let client = Arc::clone(&client);
        tokio::spawn(async move { client.run().await })
    };

    let engine = Arc::new(PodmanEngine::new(
        config.podman_binary.clone(),
        config.workspace_base.clone(),
    ));
    let driver = JobDriver::new(
        Arc::clone(&client),
        engine,
        config.job_timeout,
        config.send_machine_specs,
    );

    tokio::select! {
        outcome = driver.run() => {
            outcome.context("Job session failed")?;
        }
        reader = &mut inbound => {
            match reader {
                Ok(Ok(())) => anyhow::bail!("Miner closed the connection before the job completed"),
                Ok(Err(e)) => return Err(e).context("Miner connection failed"),
                Err(e) => anyhow::bail!("Inbound message task failed: {}", e),
            }
        }
    }

    inbound.abort();
    info!("Job session finished");
    Ok(())
}

//! Notifier worker - one Manager task per configured queue.
//!
//! Loads configuration, binds a delivery channel to every queue, spawns the
//! Managers, and stops them all on SIGINT/SIGTERM via a shared cancellation
//! token.

use anyhow::{bail, Context, Result};
use reqwest::Client;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use notifier::{Config, Manager, Sender};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize structured JSON logging
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().json().flatten_event(true))
        .init();

    info!("worker_starting");

    let config = Config::from_env().context("Failed to parse configuration")?;

    if config.queues.is_empty() {
        bail!("no queue bindings configured, set NOTIFICATION_QUEUES");
    }

    info!(
        broker_host = %config.mq_host,
        queue_count = config.queues.len(),
        "config_loaded"
    );

    // One HTTP client shared by all SMS senders
    let client = Client::builder()
        .build()
        .context("Failed to create HTTP client")?;

    let shutdown = CancellationToken::new();

    let mut handles = Vec::with_capacity(config.queues.len());
    for binding in &config.queues {
        let sender = Sender::from_config(binding.channel, &config, &client).with_context(|| {
            format!(
                "Failed to build {} sender for queue {}",
                binding.channel.as_str(),
                binding.queue
            )
        })?;

        info!(
            queue = %binding.queue,
            channel = binding.channel.as_str(),
            "manager_spawning"
        );

        let manager = Manager::new(binding.queue.clone(), sender);
        let queue = binding.queue.clone();
        let config = config.clone();
        let token = shutdown.clone();

        handles.push(tokio::spawn(async move {
            let result = manager.start(&config, token).await;
            (queue, result)
        }));
    }

    // Cancel all managers on SIGINT/SIGTERM
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        signal_token.cancel();
    });

    let mut failed = false;
    for handle in handles {
        match handle.await {
            Ok((queue, Ok(()))) => info!(queue = %queue, "manager_stopped"),
            Ok((queue, Err(e))) => {
                error!(queue = %queue, error = %e, "manager_failed");
                failed = true;
            }
            Err(e) => {
                error!(error = %e, "manager_task_panicked");
                failed = true;
            }
        }
    }

    if failed {
        bail!("one or more queue managers failed");
    }

    info!("worker_shutdown_complete");
    Ok(())
}

/// Resolve when the process receives SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT"),
        _ = terminate => info!("Received SIGTERM"),
    }
}

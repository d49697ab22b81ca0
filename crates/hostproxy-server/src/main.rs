//! Host storage proxy.
//!
//! Hosts every configured (group, version) endpoint over local IPC until a
//! shutdown signal arrives or any endpoint fails.

mod cli;

use anyhow::{bail, Context, Result};
use clap::Parser;
use cli::Args;
use hostproxy_apis::{register_all, Backends, CommandRunner, PowerShell};
use hostproxy_core::{Coordinator, EndpointRegistry, LocalSocketProvisioner};
use std::future::Future;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.debug, args.json_logs);

    let config = args.into_config()?;
    info!("Starting host proxy");
    info!(
        "Path roots: {} and {}",
        config.roots.kubelet().display(),
        config.roots.plugin().display()
    );

    let runner: Arc<dyn CommandRunner> = Arc::new(PowerShell::default());
    let backends = Backends::host(config.roots.clone(), runner);

    let mut registry = EndpointRegistry::new();
    register_all(&mut registry, &backends, |group| config.hosts_group(group))?;

    let provisioner = Arc::new(LocalSocketProvisioner::new(&config.socket_dir));
    let coordinator = Arc::new(
        Coordinator::new(registry.into_descriptors(), provisioner).on_listening(|addresses| {
            for address in addresses {
                info!("Listening on {}", address);
            }
        }),
    );

    coordinator
        .start()
        .await
        .context("failed to start endpoints")?;

    let signals = {
        let coordinator = coordinator.clone();
        tokio::spawn(async move {
            wait_for_shutdown(shutdown_signal()).await;
            info!("Shutdown signal received, stopping endpoints");
            if let Err(e) = coordinator.stop() {
                warn!("Stop request ignored: {}", e);
            }
        })
    };

    let failures = coordinator.wait().await?;
    signals.abort();

    if !failures.is_empty() {
        for failure in &failures {
            error!("Endpoint failed: {}", failure);
        }
        bail!("{} endpoint(s) failed", failures.len());
    }

    info!("Host proxy stopped");
    Ok(())
}

fn init_logging(debug: bool, json: bool) {
    let filter = if debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false);

    if json {
        builder.json().init();
    } else {
        builder.compact().init();
    }
}

/// Resolves once `signal` fires.
///
/// A handler that fails to install never resolves, so the endpoints keep
/// serving until one of them fails.
async fn wait_for_shutdown(signal: impl Future<Output = std::io::Result<()>>) {
    if let Err(e) = signal.await {
        warn!("Failed to listen for shutdown signals: {}", e);
        std::future::pending::<()>().await;
    }
}

/// Resolves on Ctrl-C, or SIGTERM where the platform has it.
async fn shutdown_signal() -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut terminate = signal(SignalKind::terminate())?;
        tokio::select! {
            result = tokio::signal::ctrl_c() => result,
            _ = terminate.recv() => Ok(()),
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_signal_resolves_shutdown() {
        let waited = tokio::time::timeout(
            Duration::from_secs(1),
            wait_for_shutdown(async { Ok::<(), std::io::Error>(()) }),
        )
        .await;
        assert!(waited.is_ok());
    }

    #[tokio::test]
    async fn test_failed_signal_handler_keeps_serving() {
        let failing = async { Err::<(), _>(std::io::Error::other("no signal handler")) };
        let waited = tokio::time::timeout(Duration::from_millis(50), wait_for_shutdown(failing)).await;
        assert!(waited.is_err());
    }
}

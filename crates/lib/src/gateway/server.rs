//! Gateway runtime: wires config, backend, router, WhatsApp supervisor and the status endpoint.

use crate::backend::HttpBackend;
use crate::channels::{FileCredentialStore, WhatsAppChannel, WhatsAppOutbound};
use crate::config::{self, Config, Overrides, TriggerWords};
use crate::gateway::status::{serve_status, StatusState};
use crate::router::Router;
use crate::supervisor::{Backoff, Supervisor, SupervisorExit};
use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::sync::watch;

/// Run the router until shutdown (Ctrl+C / SIGTERM) or until the WhatsApp device is logged out.
/// Fails at startup when the trigger words are missing or ambiguous, and returns an error after
/// a logout since the stored credentials are no longer usable. `overrides` carries the
/// command-line URLs, which take precedence over env and config.
pub async fn run_gateway(config: Config, overrides: Overrides) -> Result<()> {
    let triggers = TriggerWords::resolve(&config).context("invalid trigger configuration")?;
    log::info!(
        "trigger word {:?}, end trigger word {:?}",
        triggers.trigger(),
        triggers.end_trigger()
    );

    let backend_url = config::resolve_backend_url(&config, &overrides);
    let backend = HttpBackend::new(Some(backend_url), config.backend.timeout())
        .context("building backend client")?;
    log::info!("backend at {}", backend.base_url());

    let outbound = WhatsAppOutbound::new(config.transport.send_wait());
    let router = Arc::new(Router::new(
        triggers,
        Arc::new(backend),
        Arc::new(outbound.clone()),
        config.backend.timeout(),
    ));

    let auth_dir = config::resolve_auth_dir(&config);
    let credentials = Arc::new(FileCredentialStore::new(auth_dir.clone()));
    let channel = WhatsAppChannel::new(config::resolve_bridge_url(&config, &overrides), outbound);
    let supervisor = Supervisor::new(
        channel,
        credentials,
        Arc::clone(&router),
        Backoff::from_config(&config.reconnect),
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let status_task = if config.status.enabled {
        let bind_addr = format!("{}:{}", config.status.bind.trim(), config.status.port);
        let listener = tokio::net::TcpListener::bind(&bind_addr)
            .await
            .with_context(|| format!("binding status endpoint to {}", bind_addr))?;
        log::info!("status endpoint listening on {}", bind_addr);
        let state = StatusState::new(supervisor.subscribe(), Arc::clone(&router));
        let stop = wait_for_shutdown(shutdown_rx.clone());
        Some(tokio::spawn(async move {
            if let Err(e) = serve_status(listener, state, stop).await {
                log::warn!("{:#}", e);
            }
        }))
    } else {
        None
    };

    {
        let shutdown_tx = shutdown_tx.clone();
        tokio::spawn(async move {
            shutdown_signal().await;
            let _ = shutdown_tx.send(true);
        });
    }

    let exit = supervisor.run(shutdown_rx).await;
    let _ = shutdown_tx.send(true);
    if let Some(task) = status_task {
        let _ = task.await;
    }

    match exit {
        SupervisorExit::Shutdown => {
            log::info!("gateway stopped");
            Ok(())
        }
        SupervisorExit::LoggedOut => anyhow::bail!(
            "WhatsApp session logged out; delete {} and run again to pair a device",
            auth_dir.display()
        ),
    }
}

async fn wait_for_shutdown(mut shutdown: watch::Receiver<bool>) {
    while !*shutdown.borrow() {
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}

/// Future that completes when the process should shut down (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            log::warn!("failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                log::warn!("failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    log::info!("shutdown signal received, stopping WhatsApp session and status endpoint");
}

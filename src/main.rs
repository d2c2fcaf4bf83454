use std::sync::Arc;

use anyhow::Result;
use tokio::signal;
use tokio::sync::broadcast;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use ngsild_bridge_service::broker::BrokerClient;
use ngsild_bridge_service::config::Settings;
use ngsild_bridge_service::ingress::{notification_channel, payload_channel};
use ngsild_bridge_service::net;
use ngsild_bridge_service::reconciler::Reconciler;
use ngsild_bridge_service::server::{create_app, AppState};
use ngsild_bridge_service::subscription::SubscriptionManager;
use ngsild_bridge_service::tasks::IngressTask;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    init_tracing();

    // Load configuration
    let settings = Settings::new()?;
    tracing::info!(broker_url = %settings.broker_url(), "Configuration loaded");

    let client = Arc::new(
        BrokerClient::new(settings.broker_url(), settings.subscription.context.clone())
            .with_tenant(settings.broker.project_name.clone()),
    );

    let (shutdown_tx, _) = broadcast::channel(1);

    // Inserter path: agent payloads flow through the ingress channel into
    // the reconciler. The sender half is the surface agents feed.
    let (payload_tx, payload_source) = payload_channel(64);
    let reconciler = Arc::new(Reconciler::new(client.clone(), settings.entity.clone()));
    let ingress_task = IngressTask::new(payload_source, reconciler, shutdown_tx.subscribe());
    let ingress_handle = tokio::spawn(ingress_task.run());

    // Subscriber path: subscription manager owns the notify server on a
    // dynamically discovered binding.
    let binding = net::discover_binding()?;
    tracing::info!(local_ip = %binding.local_ip, port = binding.port, "Notify binding resolved");

    let manager = SubscriptionManager::new(
        client.clone(),
        settings.subscription.clone(),
        settings.broker.project_name.clone(),
    );
    let (sink, mut downstream_rx) = notification_channel(64);
    let state = AppState::new(
        settings.subscription.watched_attributes.clone(),
        Arc::new(sink),
        manager.active_count_handle(),
    );
    let app = create_app(state);
    let manager_handle = tokio::spawn(manager.run(binding, app, shutdown_tx.subscribe()));

    // Downstream consumer of filtered notifications
    let downstream_handle = tokio::spawn(async move {
        while let Some(notification) = downstream_rx.recv().await {
            tracing::info!(payload = %notification, "Notification forwarded downstream");
        }
    });

    // Block until SIGINT/SIGTERM, then fan the shutdown signal out
    shutdown_signal_handler(shutdown_tx).await;

    tracing::info!("Waiting for background tasks to finish...");
    drop(payload_tx);
    if let Ok(Err(e)) = tokio::join!(ingress_handle, manager_handle).1 {
        tracing::error!(error = %e, "Subscription manager failed");
    }
    let _ = downstream_handle.await;

    tracing::info!("Bridge shutdown complete");
    Ok(())
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

async fn shutdown_signal_handler(shutdown_tx: broadcast::Sender<()>) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            tracing::info!("Received terminate signal, initiating graceful shutdown");
        }
    }

    let _ = shutdown_tx.send(());
}

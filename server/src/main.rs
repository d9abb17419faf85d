// Daemon entry point: one process hosting the trigger poller and the
// HTTP trigger surface.

mod handlers;
mod routes;
mod runner;
mod state;

use engine::config::Settings;
use engine::coordinator::ExecutionCoordinator;
use engine::dispatcher::EventDispatcher;
use engine::notify::LogNotifier;
use engine::poller::TriggerPoller;
use engine::store::{JobStore, MemoryJobStore};
use engine::telemetry;
use std::sync::Arc;
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings = Settings::load().unwrap_or_else(|e| {
        eprintln!("No configuration loaded ({}), using defaults", e);
        Settings::default()
    });
    settings
        .validate()
        .map_err(|e| anyhow::anyhow!("Invalid configuration: {}", e))?;

    telemetry::init_logging(
        &settings.observability.log_level,
        settings.observability.tracing_endpoint.as_deref(),
    )?;
    telemetry::init_metrics(settings.observability.metrics_port)?;

    info!("Starting trigger engine");

    // The reference in-memory store; a persistent JobStore implementation
    // plugs in here without touching anything below.
    let store: Arc<dyn JobStore> = Arc::new(MemoryJobStore::new());
    let script_runner = Arc::new(runner::ProcessRunner::default());
    let notifier = Arc::new(LogNotifier);

    let coordinator = ExecutionCoordinator::new(
        Arc::clone(&store),
        script_runner,
        notifier,
        settings.engine.coordinator_settings(),
    );
    let dispatcher = Arc::new(EventDispatcher::new(
        Arc::clone(&store),
        coordinator.clone(),
    ));
    let poller = Arc::new(TriggerPoller::new(
        settings.engine.poller_settings(),
        Arc::clone(&store),
        coordinator.clone(),
    ));

    let poller_task = {
        let poller = Arc::clone(&poller);
        tokio::spawn(async move { poller.start().await })
    };
    info!(
        poll_interval_seconds = settings.engine.poll_interval_seconds,
        "Trigger poller started"
    );

    let app_state = state::AppState::new(store, coordinator, dispatcher);
    let app = routes::create_router(app_state);

    let addr = format!("{}:{}", settings.server.host, settings.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(addr = %addr, "HTTP trigger surface listening");

    let shutdown_poller = Arc::clone(&poller);
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "Failed to listen for Ctrl+C");
            }
            info!("Received Ctrl+C signal, initiating graceful shutdown");
            shutdown_poller.stop();
        })
        .await?;

    if let Err(e) = poller_task.await {
        error!(error = %e, "Poller task ended abnormally");
    }
    telemetry::shutdown_tracer();
    info!("Trigger engine stopped");
    Ok(())
}

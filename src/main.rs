use notification_relay::{
    api::{build_router, AppState},
    config::Config,
    relay::Relay,
    scheduler::{drain_job, init_scheduler_metrics, SchedulerService},
    telemetry::init_tracing,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::load().unwrap_or_else(|e| {
        eprintln!("Failed to load configuration: {}", e);
        eprintln!("Using default configuration");
        Config::default()
    });

    init_tracing(&config.observability);

    tracing::info!("Starting notification-relay v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!(
        backend = ?config.queue.backend,
        queue = %config.queue.queue_name,
        "Queue configuration"
    );

    let relay = Relay::from_config(&config)?;

    match relay.client.ensure_queue(&config.queue.queue_name).await {
        Ok(_) => tracing::info!("Queue '{}' ready", config.queue.queue_name),
        Err(e) => tracing::warn!(
            error = %e,
            "Queue not reachable at startup; drains will retry on schedule"
        ),
    }

    init_scheduler_metrics();
    let mut scheduler = SchedulerService::new(config.scheduler.clone()).await?;
    if config.drainer.enabled {
        scheduler
            .add_job(drain_job(relay.drainer.clone(), config.drainer.schedule.clone()))
            .await?;
        tracing::info!(schedule = %config.drainer.schedule, "Drain job scheduled");
    } else {
        tracing::info!("Drain job disabled in configuration");
    }
    scheduler.start().await?;

    let http_handle = if config.observability.prometheus_enabled {
        let state = AppState::new(relay.client.clone(), relay.producer.clone())
            .with_drainer(relay.drainer.clone());
        let app = build_router(state);
        let listener = tokio::net::TcpListener::bind(&config.observability.metrics_addr).await?;

        tracing::info!(
            "HTTP server listening on http://{}",
            config.observability.metrics_addr
        );

        Some(tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                tracing::error!("HTTP server error: {}", e);
            }
        }))
    } else {
        None
    };

    tracing::info!("Press Ctrl+C to shutdown");
    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown signal received");

    scheduler.shutdown().await?;
    if let Some(handle) = http_handle {
        handle.abort();
    }
    if let Err(e) = relay.client.close().await {
        tracing::warn!(error = %e, "Failed to close queue connection");
    }

    tracing::info!("Shutdown complete");
    Ok(())
}

use std::sync::Arc;

use anyhow::Result;
use tokio::{net::TcpListener, signal, sync::oneshot};
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use irrigation_service::{
    actuation::{mqtt, MqttPublisher},
    api::{self, AppState},
    config::Config,
    inference::HttpInferenceClient,
    ingest::{Dispatcher, IngestionCoordinator},
    realtime::{Broadcaster, ProfileFilter, StaticProfileDirectory},
    store::{self, MemoryReadingStore, PgReadingStore, ReadingStore},
    telemetry,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env (ignore error if file absent; env vars may be set externally)
    let _ = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .init();

    let config = Config::from_env()?;

    let store: Arc<dyn ReadingStore> = match &config.database_url {
        Some(url) => {
            let pool = store::postgres::create_pool(url).await?;
            store::postgres::run_migrations(&pool).await?;
            info!("Database ready");
            Arc::new(PgReadingStore::new(pool))
        }
        None => {
            warn!("DATABASE_URL not set; readings are kept in memory only");
            Arc::new(MemoryReadingStore::new())
        }
    };

    let directory = Arc::new(StaticProfileDirectory::new(config.observer_devices.clone()));
    let broadcaster = Broadcaster::new(
        Arc::new(ProfileFilter::new(directory.clone())),
        config.observer_queue_capacity,
    );

    let (client, eventloop) = mqtt::connect(&config);
    let publisher = Arc::new(MqttPublisher::new(client.clone(), config.control_topic.clone()));
    let inference = Arc::new(HttpInferenceClient::new(
        config.inference_url.clone(),
        config.inference_timeout,
    )?);

    let coordinator = Arc::new(IngestionCoordinator::new(
        inference,
        store.clone(),
        broadcaster.clone(),
        publisher.clone(),
        config.inference_timeout,
    ));
    let dispatcher = Dispatcher::new(coordinator, config.lane_idle_timeout);

    let (stop_intake, intake_stopped) = oneshot::channel();
    let intake = tokio::spawn(telemetry::intake::run(
        eventloop,
        client,
        config.telemetry_topic.clone(),
        dispatcher,
        intake_stopped,
    ));
    info!(
        broker = %format!("{}:{}", config.mqtt_host, config.mqtt_port),
        inference_url = %config.inference_url,
        "Ingestion pipeline started"
    );

    let state = AppState {
        store,
        broadcaster,
        directory,
        publisher,
    };

    let addr = format!("{}:{}", config.server_host, config.server_port);
    let listener = TcpListener::bind(&addr).await?;
    info!(addr = %addr, "HTTP server listening");

    axum::serve(listener, api::router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Queued readings are drained, and their commands published, before the
    // MQTT connection closes.
    let _ = stop_intake.send(());
    if let Err(e) = intake.await {
        warn!(error = %e, "Telemetry intake ended abnormally");
    }
    info!("Shutdown complete");

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}

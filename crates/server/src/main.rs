//! pushlab worker entry point.

use std::sync::Arc;

use pushlab_common::{Config, LogFormat, LoggingConfig};
use pushlab_core::NotificationProcessor;
use pushlab_core::apns::{ApnsClientFactory, PushClientCache, Sender};
use pushlab_db::repositories::{
    ApnsCredentialRepository, DeviceRepository, NotificationRepository,
};
use pushlab_queue::{Dispatcher, DispatcherSettings, MessageQueue, RedisQueue};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Waits for a shutdown signal (SIGINT or SIGTERM).
///
/// On Unix systems, this listens for both SIGINT (Ctrl+C) and SIGTERM.
/// On Windows, this only listens for Ctrl+C.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("Received SIGINT, initiating graceful shutdown...");
        },
        () = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown...");
        },
    }
}

fn init_tracing(logging: &LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));
    let registry = tracing_subscriber::registry().with(filter);

    match logging.format {
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json())
            .init(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration
    let config = Config::load()?;

    init_tracing(&config.logging);
    info!(
        queue = %config.queue.queue_name,
        consumer = %config.queue.consumer_name,
        "Starting pushlab worker..."
    );

    // Connect to database
    let db = Arc::new(pushlab_db::init(&config.database).await?);
    pushlab_db::migrate(&db).await?;

    // Connect to the work queue; the first attempt is not retried
    let shutdown = CancellationToken::new();
    let queue = Arc::new(RedisQueue::connect(&config.queue, &shutdown).await?);

    // Delivery pipeline
    let devices = Arc::new(DeviceRepository::new(db.clone()));
    let credentials = Arc::new(ApnsCredentialRepository::new(db.clone()));
    let notifications = Arc::new(NotificationRepository::new(db.clone()));

    let cache = Arc::new(PushClientCache::new(Arc::new(ApnsClientFactory::new(
        config.apns.request_timeout(),
    ))));
    let sender = Arc::new(Sender::new(cache.clone()));
    let processor = NotificationProcessor::new(
        devices,
        credentials,
        notifications.clone(),
        notifications,
        sender,
        config.apns.max_send_retries,
    );

    let message_queue: Arc<dyn MessageQueue> = queue.clone();
    let dispatcher = Dispatcher::new(
        message_queue,
        Arc::new(processor),
        DispatcherSettings::from(&config.queue),
    );

    let mut running = {
        let shutdown = shutdown.clone();
        tokio::spawn(async move { dispatcher.run(shutdown).await })
    };

    let finished = tokio::select! {
        () = shutdown_signal() => {
            shutdown.cancel();
            running.await
        }
        finished = &mut running => {
            warn!("Dispatcher stopped before shutdown was requested");
            shutdown.cancel();
            finished
        }
    };

    match finished {
        Ok(stats) => info!(
            acked = stats.acked,
            requeued = stats.requeued,
            dead_lettered = stats.dead_lettered,
            "Dispatcher drained"
        ),
        Err(e) => error!(error = %e, "Dispatcher task failed"),
    }

    cache.close().await;
    queue.close().await;

    info!("Worker shutdown complete");
    Ok(())
}

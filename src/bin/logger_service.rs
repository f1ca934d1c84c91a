// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! Logger service: archives every log event and raises alerts for
//! error and critical ones.

use rabbitmq_pipeline::{
    backoff::{retry_forever, BackoffPolicy, TracingRetryObserver},
    channel::ConnectionManager,
    config::Configs,
    errors::AmqpError,
    fanout::{AlertConsumer, ArchiveConsumer, TracingAlertNotifier},
    logging,
    store::{LogStore, SqliteLogStore},
    subscriber::RabbitMQSubscriber,
    supervisor::supervise,
    topology::{PipelineTopology, ALL_LOGS_QUEUE, CRITICAL_ERRORS_QUEUE},
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

const SERVICE_NAME: &str = "LoggerService";
const STORE_POOL_SIZE: u32 = 4;

#[tokio::main]
async fn main() -> eyre::Result<()> {
    logging::init_tracing();

    let cfg = Configs::from_env(SERVICE_NAME)?;
    let topology = PipelineTopology::new(&cfg.work.queue_name);
    let manager = ConnectionManager::new(&cfg.app.name, cfg.rabbitmq.clone());

    let token = CancellationToken::new();
    let signal = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown requested");
            signal.cancel();
        }
    });

    let store = Arc::new(SqliteLogStore::open(&cfg.database.path, STORE_POOL_SIZE)?);
    match retry_forever(
        "log store schema",
        &BackoffPolicy::default(),
        &TracingRetryObserver,
        &token,
        || store.ensure_schema(),
    )
    .await
    {
        Ok(()) => info!(path = %cfg.database.path, "log store ready"),
        Err(AmqpError::Cancelled) => return Ok(()),
        Err(err) => return Err(err.into()),
    }

    let archive = Arc::new(ArchiveConsumer::new(store.clone()).with_shutdown(token.clone()));
    let alerts = Arc::new(AlertConsumer::new(Arc::new(TracingAlertNotifier)));

    let result = supervise(&manager, &topology, &token, |session| {
        RabbitMQSubscriber::new(session.channel(), &cfg.app.name)
            .with_prefetch(cfg.work.max_batch_size)
            .register(ALL_LOGS_QUEUE, archive.clone())
            .register(CRITICAL_ERRORS_QUEUE, alerts.clone())
    })
    .await;

    store.close();
    info!("logger service stopped");
    Ok(result?)
}

// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! Work consumer: processes the work queue and dead-letters rejected items.

use rabbitmq_pipeline::{
    channel::ConnectionManager,
    config::Configs,
    log_publisher::LogPublisher,
    logging,
    publisher::RabbitMQPublisher,
    subscriber::RabbitMQSubscriber,
    supervisor::supervise,
    topology::PipelineTopology,
    work::{RejectContaining, WorkConsumer},
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

const SERVICE_NAME: &str = "ConsumerService";

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

    info!(queue = %cfg.work.queue_name, prefetch = cfg.work.max_batch_size, "consumer starting");

    supervise(&manager, &topology, &token, |session| {
        let events = LogPublisher::new(RabbitMQPublisher::new(session.channel()), SERVICE_NAME);
        let handler = WorkConsumer::new(RejectContaining::default()).with_events(Arc::new(events));

        RabbitMQSubscriber::new(session.channel(), &cfg.app.name)
            .with_prefetch(cfg.work.max_batch_size)
            .register(&cfg.work.queue_name, Arc::new(handler))
    })
    .await?;

    info!("consumer stopped");
    Ok(())
}

// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! Producer: publishes a work item every second and a log event for each.

use rabbitmq_pipeline::{
    channel::{ConnectionManager, Session},
    config::Configs,
    errors::AmqpError,
    log_publisher::{EventLogger, LogPublisher},
    log_record::Severity,
    logging,
    publisher::RabbitMQPublisher,
    topology::PipelineTopology,
    work::WorkDispatcher,
};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

const SERVICE_NAME: &str = "ProducerService";

struct Wiring {
    session: Session,
    dispatcher: WorkDispatcher,
    logs: LogPublisher,
}

async fn connect(
    manager: &ConnectionManager,
    topology: &PipelineTopology,
    token: &CancellationToken,
) -> Result<Wiring, AmqpError> {
    loop {
        let session = manager.acquire(token).await?;

        match topology.declare(session.channel()).await {
            Ok(()) => {
                let publisher = RabbitMQPublisher::new(session.channel());
                return Ok(Wiring {
                    dispatcher: WorkDispatcher::new(publisher.clone(), topology.work_queue()),
                    logs: LogPublisher::new(publisher, SERVICE_NAME),
                    session,
                });
            }
            Err(err) if session.connection_alive() => {
                session.close().await;
                return Err(err);
            }
            Err(err) => {
                warn!(error = err.to_string(), "connection dropped while declaring, reconnecting");
                session.close().await;
            }
        }
    }
}

/// Waits `delay` unless shutdown comes first.
async fn pause(token: &CancellationToken, delay: Duration) {
    tokio::select! {
        _ = token.cancelled() => {}
        _ = tokio::time::sleep(delay) => {}
    }
}

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

    info!("producer starting");
    let mut wiring = match connect(&manager, &topology, &token).await {
        Ok(wiring) => wiring,
        Err(AmqpError::Cancelled) => return Ok(()),
        Err(err) => return Err(err.into()),
    };

    let mut counter: u64 = 0;
    while !token.is_cancelled() {
        counter += 1;
        let msg = format!("Task #{counter}");

        // The same item is retried after a reconnect, so nothing is lost.
        while let Err(err) = wiring.dispatcher.publish(msg.as_bytes()).await {
            error!(error = err.to_string(), "failure to send work item");
            pause(&token, Duration::from_secs(5)).await;
            wiring.session.close().await;
            wiring = match connect(&manager, &topology, &token).await {
                Ok(wiring) => wiring,
                Err(AmqpError::Cancelled) => return Ok(()),
                Err(err) => return Err(err.into()),
            };
        }
        info!(%msg, "sent");

        wiring
            .logs
            .log(&format!("{msg} created"), Severity::Info, None)
            .await;

        if counter % 10 == 0 {
            let detail = format!("Simulated error at #{counter}");
            error!(%detail, "producer error");
            wiring
                .logs
                .log("Producer Error", Severity::Error, Some(detail))
                .await;
            pause(&token, Duration::from_secs(5)).await;
        } else {
            pause(&token, Duration::from_secs(1)).await;
        }
    }

    wiring.session.close().await;
    info!("producer stopped");
    Ok(())
}

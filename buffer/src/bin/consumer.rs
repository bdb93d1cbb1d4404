use std::sync::Arc;

use buffer::broker;
use buffer::consumer::throttle::{ProcessingThrottle, ThrottleSettings};
use buffer::consumer::{ConsumerConfig, ConsumerContext, FlavourWorkerManager, forward};
use buffer::schedule::ScheduleManager;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let debug = common::env::var_bool("DEBUG", false);
    common::logger::init_tracing("carbonrouter-consumer", !debug);

    let config = ConsumerConfig::from_env();
    common::metrics::spawn(config.metrics_port);

    let schedule = Arc::new(ScheduleManager::from_env());
    schedule.load_once().await;
    tokio::spawn(schedule.clone().watch_forever());
    tokio::spawn(schedule.clone().expiry_guard());

    let connection = broker::connect(&config.rabbitmq_url).await;
    let listen_channel = connection.create_channel().await?;
    let publish_channel = connection.create_channel().await?;

    let throttle = if config.throttle_enabled {
        let throttle = ProcessingThrottle::new(
            schedule.clone(),
            ThrottleSettings {
                per_queue_concurrency: config.concurrency_per_queue,
                refresh_seconds: config.throttle_refresh_seconds,
                exponent: config.throttle_exponent,
                min_inflight: config.throttle_min_inflight,
            },
        );
        let _refresher = throttle.clone().start();
        tracing::info!(
            refresh_s = config.throttle_refresh_seconds,
            exponent = config.throttle_exponent,
            "consumer-side throttling enabled"
        );
        Some(throttle)
    } else {
        tracing::info!("consumer-side throttling disabled");
        None
    };

    let target_base_url = config.target_base_url();
    tracing::info!(target = %target_base_url, "forwarding to target service");

    let ctx = Arc::new(ConsumerContext {
        listen_channel,
        publish_channel,
        http: forward::build_client(),
        schedule,
        throttle,
        target_base_url,
        config,
    });

    let manager = Arc::new(FlavourWorkerManager::new(ctx));
    manager.sync_from_schedule().await;
    tokio::spawn(manager.clone().reconcile_loop());

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutdown signal received");
    Ok(())
}

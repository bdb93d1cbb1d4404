use std::sync::Arc;

use engine::api;
use engine::registry::SchedulerRegistry;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let is_production = std::env::var("APP_ENV").unwrap_or_default() == "production";
    common::logger::init_tracing("decision-engine", is_production);

    let metrics_port = common::env::var_u16("METRICS_PORT", 8001);
    common::metrics::spawn(metrics_port);

    let registry = Arc::new(SchedulerRegistry::from_env());
    registry.ensure_default();

    let http_port = common::env::var_u16("HTTP_PORT", 80);
    let serve = api::serve(registry, http_port);

    tokio::select! {
        result = serve => result?,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutdown signal received");
        }
    }

    Ok(())
}

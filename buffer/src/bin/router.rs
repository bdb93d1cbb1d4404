use std::sync::Arc;

use axum::Router as AxumRouter;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, Method, Uri};
use axum::response::Response;

use buffer::router::{Router, RouterConfig};
use buffer::schedule::ScheduleManager;

async fn proxy(
    State(router): State<Arc<Router>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    router.handle(method, uri, headers, body).await
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let debug = common::env::var_bool("DEBUG", false);
    common::logger::init_tracing("carbonrouter-router", !debug);

    let config = RouterConfig::from_env();
    common::metrics::spawn(config.metrics_port);

    let schedule = Arc::new(ScheduleManager::from_env());
    schedule.load_once().await;
    tokio::spawn(schedule.clone().watch_forever());
    tokio::spawn(schedule.clone().expiry_guard());

    let router = Router::connect(&config, schedule).await?;

    // every verb on every path funnels through the proxy
    let app = AxumRouter::new().fallback(proxy).with_state(router);
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], config.http_port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, namespace = %config.namespace, service = %config.service, "router listening");

    tokio::select! {
        result = axum::serve(listener, app) => result?,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutdown signal received");
        }
    }

    Ok(())
}

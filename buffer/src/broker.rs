//! AMQP plumbing shared by the router and consumer.
//!
//! Topology declarations are idempotent so they can be replayed on every
//! reconnect. The connect helper retries forever with a capped backoff;
//! downstream loops re-enter it whenever the broker drops them.

use std::time::Duration;

use lapin::options::{ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions};
use lapin::types::{AMQPValue, FieldTable, ShortString};
use lapin::{Channel, Connection, ConnectionProperties, ExchangeKind};
use tracing::{info, warn};

/// RabbitMQ's direct-reply pseudo-queue; consumed (no-ack) before
/// publishing with `reply_to` pointing at it.
pub const REPLY_TO_QUEUE: &str = "amq.rabbitmq.reply-to";

const RECONNECT_MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Connects to the broker, retrying until it succeeds.
pub async fn connect(url: &str) -> Connection {
    let mut backoff = Duration::from_secs(1);
    loop {
        match Connection::connect(url, ConnectionProperties::default()).await {
            Ok(connection) => {
                info!("broker connection established");
                return connection;
            }
            Err(e) => {
                warn!(error = %e, backoff_s = backoff.as_secs(), "broker connect failed; retrying");
                tokio::time::sleep(backoff).await;
                backoff = (backoff * 2).min(RECONNECT_MAX_BACKOFF);
            }
        }
    }
}

/// Durable headers exchange `<namespace>.<service>`.
pub async fn declare_headers_exchange(channel: &Channel, name: &str) -> lapin::Result<()> {
    channel
        .exchange_declare(
            name,
            ExchangeKind::Headers,
            ExchangeDeclareOptions {
                durable: true,
                ..ExchangeDeclareOptions::default()
            },
            FieldTable::default(),
        )
        .await
}

/// Durable queue `<prefix>.queue.<flavour>` bound with an all-match on
/// `{q_type: queue, flavour}`.
pub async fn declare_flavour_queue(
    channel: &Channel,
    exchange: &str,
    prefix: &str,
    flavour: &str,
) -> lapin::Result<String> {
    let queue_name = format!("{prefix}.queue.{flavour}");
    channel
        .queue_declare(
            &queue_name,
            QueueDeclareOptions {
                durable: true,
                ..QueueDeclareOptions::default()
            },
            FieldTable::default(),
        )
        .await?;

    let mut arguments = FieldTable::default();
    arguments.insert(
        ShortString::from("x-match"),
        AMQPValue::LongString("all".into()),
    );
    arguments.insert(
        ShortString::from("q_type"),
        AMQPValue::LongString("queue".into()),
    );
    arguments.insert(
        ShortString::from("flavour"),
        AMQPValue::LongString(flavour.into()),
    );

    channel
        .queue_bind(
            &queue_name,
            exchange,
            "",
            QueueBindOptions::default(),
            arguments,
        )
        .await?;

    Ok(queue_name)
}

/// Builds the routing headers attached to every published request.
pub fn publish_headers(flavour: &str, namespace: &str, service: &str) -> FieldTable {
    let mut headers = FieldTable::default();
    headers.insert(
        ShortString::from("q_type"),
        AMQPValue::LongString("queue".into()),
    );
    headers.insert(
        ShortString::from("flavour"),
        AMQPValue::LongString(flavour.into()),
    );
    headers.insert(
        ShortString::from("namespace"),
        AMQPValue::LongString(namespace.into()),
    );
    headers.insert(
        ShortString::from("service"),
        AMQPValue::LongString(service.into()),
    );
    headers
}

/// Reads a string-valued header from delivery properties.
pub fn header_str(headers: Option<&FieldTable>, key: &str) -> Option<String> {
    let (_, value) = headers?
        .inner()
        .iter()
        .find(|(name, _)| name.as_str() == key)?;
    match value {
        AMQPValue::LongString(s) => Some(s.to_string()),
        AMQPValue::ShortString(s) => Some(s.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn publish_headers_carry_the_routing_tuple() {
        let headers = publish_headers("precision-50", "default", "svc");
        assert_eq!(
            header_str(Some(&headers), "flavour").as_deref(),
            Some("precision-50")
        );
        assert_eq!(
            header_str(Some(&headers), "q_type").as_deref(),
            Some("queue")
        );
        assert_eq!(header_str(Some(&headers), "missing"), None);
        assert_eq!(header_str(None, "flavour"), None);
    }
}

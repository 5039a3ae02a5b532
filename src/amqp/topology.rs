use tracing::{error, warn};

use super::driver::{AmqpChannel, ArgumentValue, QueueArguments};
use super::options::AmqpOptions;
use crate::utils::BrokerError;

pub const X_DEAD_LETTER_EXCHANGE: &str = "x-dead-letter-exchange";
pub const X_MESSAGE_TTL: &str = "x-message-ttl";
pub const X_DEAD_LETTER_ROUTING_KEY: &str = "x-dead-letter-routing-key";

/// Arguments attached to the primary queue when dead-lettering is set up.
pub fn dead_letter_arguments(options: &AmqpOptions) -> QueueArguments {
    QueueArguments::from([
        (
            X_DEAD_LETTER_EXCHANGE.to_string(),
            ArgumentValue::Str(options.dead_letter_exchange.clone()),
        ),
        (
            X_MESSAGE_TTL.to_string(),
            ArgumentValue::Int(i64::from(options.queue_ttl_ms)),
        ),
        (
            X_DEAD_LETTER_ROUTING_KEY.to_string(),
            ArgumentValue::Str(options.dead_letter_routing_key.clone()),
        ),
    ])
}

/// Declare the dead-letter pair (when configured) and the primary
/// exchange, queue and binding.
///
/// A dead-letter failure is logged and the primary queue is declared
/// without its arguments. A primary failure fails the whole declaration.
pub async fn declare<Ch: AmqpChannel>(channel: &Ch, options: &AmqpOptions) -> Result<(), BrokerError> {
    let host = &options.host_name;

    let arguments = if options.dead_letter_configured() {
        match declare_dead_letter(channel, options).await {
            Ok(()) => dead_letter_arguments(options),
            Err(e) => {
                error!("[{host}]: Error while creating dead letter exchange: {e}");
                QueueArguments::new()
            }
        }
    } else {
        warn!("[{host}]: Dead letter exchange not configured");
        QueueArguments::new()
    };

    let primary = async {
        channel
            .exchange_declare(&options.exchange, &options.exchange_type, options.durable)
            .await?;
        channel
            .queue_declare(&options.queue_name, options.durable, &arguments)
            .await?;
        channel
            .queue_bind(&options.queue_name, &options.exchange, &options.routing_key)
            .await
    };

    primary.await.map_err(|e| {
        error!("[{host}]: Error while creating queue: {e}");
        BrokerError::Topology(e.to_string())
    })
}

async fn declare_dead_letter<Ch: AmqpChannel>(
    channel: &Ch,
    options: &AmqpOptions,
) -> Result<(), BrokerError> {
    channel
        .exchange_declare(
            &options.dead_letter_exchange,
            &options.exchange_type,
            options.durable,
        )
        .await?;
    channel
        .queue_declare(
            &options.dead_letter_queue_name,
            options.durable,
            &QueueArguments::new(),
        )
        .await?;
    channel
        .queue_bind(
            &options.dead_letter_queue_name,
            &options.dead_letter_exchange,
            &options.dead_letter_routing_key,
        )
        .await
}

use std::sync::Arc;

use futures::StreamExt;
use lapin::message::Delivery;
use lapin::options::{
    BasicAckOptions, BasicConsumeOptions, BasicQosOptions, BasicRejectOptions, QueueDeclareOptions,
};
use lapin::types::FieldTable;
use lapin::Channel;
use tracing::{debug, error, info};

use crate::error::{AppError, Result};
use crate::models::VisitMessage;
use crate::services::filter::filter_relevant;
use crate::services::rabbitmq::{timed, RabbitMqManager, RECONNECT_DELAY};

const CONSUMER_TAG: &str = "visits-consumer";

/// Terminal outcome for one delivery. Every message is either acknowledged
/// or permanently rejected; nothing is ever requeued.
#[derive(Debug, PartialEq)]
pub(crate) enum Disposition {
    Ack {
        visitor_id: String,
        matches: usize,
    },
    RejectNoMatch {
        visitor_id: String,
    },
    RejectUnparsable {
        error: String,
    },
}

/// Decide the fate of a delivery body: unparsable payloads and payloads
/// without a qualifying flight URL are rejected, the rest acknowledged.
pub(crate) fn classify(payload: &[u8]) -> Disposition {
    let message: VisitMessage = match serde_json::from_slice(payload) {
        Ok(message) => message,
        Err(e) => {
            return Disposition::RejectUnparsable {
                error: e.to_string(),
            }
        }
    };

    let matches = filter_relevant(&message.action_details);
    if matches.is_empty() {
        Disposition::RejectNoMatch {
            visitor_id: message.visitor_id,
        }
    } else {
        Disposition::Ack {
            visitor_id: message.visitor_id,
            matches: matches.len(),
        }
    }
}

/// Consumes the visits queue and acknowledges only messages that still carry
/// a qualifying flight URL.
pub struct VisitConsumer {
    broker: Arc<RabbitMqManager>,
}

impl VisitConsumer {
    pub fn new(broker: Arc<RabbitMqManager>) -> Self {
        Self { broker }
    }

    /// Long-running task: waits for an active channel, subscribes, and
    /// re-subscribes whenever the channel or the consume stream dies.
    pub async fn run(self) {
        loop {
            let Some(channel) = self.broker.channel().await else {
                debug!("RabbitMQ channel not available, waiting");
                tokio::time::sleep(RECONNECT_DELAY).await;
                continue;
            };

            if let Err(e) = self.consume(&channel).await {
                error!(error = %e, "consumer stream lost, requesting reconnect");
                self.broker.request_reconnect();
                tokio::time::sleep(RECONNECT_DELAY).await;
            }
        }
    }

    async fn consume(&self, channel: &Channel) -> Result<()> {
        let queue = self.broker.queue();

        timed(
            "declare queue",
            channel.queue_declare(
                queue,
                QueueDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            ),
        )
        .await?;

        // One unacknowledged delivery at a time.
        timed("set qos", channel.basic_qos(1, BasicQosOptions::default())).await?;

        let mut consumer = timed(
            "start consumer",
            channel.basic_consume(
                queue,
                CONSUMER_TAG,
                BasicConsumeOptions::default(),
                FieldTable::default(),
            ),
        )
        .await?;

        info!(queue = %queue, "consuming from queue");

        while let Some(delivery) = consumer.next().await {
            let delivery = delivery?;
            self.handle(delivery).await;
        }

        Err(AppError::Broker("consume stream ended".to_string()))
    }

    async fn handle(&self, delivery: Delivery) {
        match classify(&delivery.data) {
            Disposition::Ack {
                visitor_id,
                matches,
            } => {
                info!(%visitor_id, matches, "processed message with qualifying flight URLs");
                if let Err(e) = delivery.acker.ack(BasicAckOptions::default()).await {
                    error!(error = %e, %visitor_id, "failed to ack message");
                }
            }
            Disposition::RejectNoMatch { visitor_id } => {
                debug!(%visitor_id, "skipping message, no qualifying flight URL");
                self.reject(&delivery).await;
            }
            Disposition::RejectUnparsable { error } => {
                error!(%error, "error processing message payload");
                self.reject(&delivery).await;
            }
        }
    }

    async fn reject(&self, delivery: &Delivery) {
        if let Err(e) = delivery
            .acker
            .reject(BasicRejectOptions { requeue: false })
            .await
        {
            error!(error = %e, "failed to reject message");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_qualifying_message_is_acknowledged_with_match_count() {
        let payload = br#"{
            "visitorId": "v1",
            "userId": "u1",
            "actionDetails": [
                {"url": "https://www.karnaval.ir/domestic-flights/123"},
                {"url": "https://www.karnaval.ir/hotels"},
                {"url": "https://www.karnaval.ir/domestic-flights/456"}
            ]
        }"#;

        assert_eq!(
            classify(payload),
            Disposition::Ack {
                visitor_id: "v1".to_string(),
                matches: 2,
            }
        );
    }

    #[test]
    fn test_message_without_qualifying_url_is_rejected() {
        let payload = br#"{
            "visitorId": "v2",
            "actionDetails": [{"url": "https://other.example.com/x"}]
        }"#;

        assert_eq!(
            classify(payload),
            Disposition::RejectNoMatch {
                visitor_id: "v2".to_string(),
            }
        );
    }

    #[test]
    fn test_message_without_action_details_is_rejected() {
        let payload = br#"{"visitorId": "v3"}"#;

        assert_eq!(
            classify(payload),
            Disposition::RejectNoMatch {
                visitor_id: "v3".to_string(),
            }
        );
    }

    #[test]
    fn test_unparsable_payload_is_rejected_not_acknowledged() {
        let dispositions = [
            classify(b"not json"),
            classify(br#"{"actionDetails": []}"#), // missing visitorId
            classify(b""),
        ];

        for disposition in dispositions {
            assert!(
                matches!(disposition, Disposition::RejectUnparsable { .. }),
                "expected unparsable rejection, got {disposition:?}"
            );
        }
    }

    #[test]
    fn test_non_string_url_does_not_qualify() {
        let payload = br#"{
            "visitorId": "v4",
            "actionDetails": [{"url": 42}]
        }"#;

        assert_eq!(
            classify(payload),
            Disposition::RejectNoMatch {
                visitor_id: "v4".to_string(),
            }
        );
    }
}

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use lapin::options::{
    BasicPublishOptions, ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions,
};
use lapin::types::FieldTable;
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties, ExchangeKind};
use once_cell::sync::OnceCell;
use tokio::sync::{Mutex, Notify, RwLock};
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::config::RabbitMqConfig;
use crate::error::{AppError, Result};

/// Delay between connect attempts. Retries continue at this fixed cadence
/// with no cap and no backoff growth.
pub(crate) const RECONNECT_DELAY: Duration = Duration::from_secs(5);

const DEFAULT_CHANNEL_OP_TIMEOUT_MS: u64 = 5_000;

/// AMQP deliveries with this mode survive a broker restart.
const DELIVERY_MODE_PERSISTENT: u8 = 2;

const REPLY_SUCCESS: u16 = 200;

fn channel_op_timeout() -> Duration {
    static TIMEOUT: OnceCell<Duration> = OnceCell::new();
    *TIMEOUT.get_or_init(|| {
        let ms = std::env::var("RABBITMQ_OP_TIMEOUT_MS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(DEFAULT_CHANNEL_OP_TIMEOUT_MS)
            .max(500);
        Duration::from_millis(ms)
    })
}

/// Run one channel operation under the configured deadline.
pub(crate) async fn timed<F, T>(op: &'static str, future: F) -> Result<T>
where
    F: Future<Output = lapin::Result<T>>,
{
    match timeout(channel_op_timeout(), future).await {
        Ok(result) => result.map_err(|e| AppError::Broker(format!("{op}: {e}"))),
        Err(_) => Err(AppError::Broker(format!("{op}: timed out"))),
    }
}

/// Owns the single logical RabbitMQ connection and channel shared by the
/// publishing pipeline and the consumer.
///
/// State machine: Disconnected -> Connecting -> Connected; any error or close
/// event drops back to Disconnected and re-enters Connecting after cleanup.
/// There is no terminal state.
pub struct RabbitMqManager {
    config: RabbitMqConfig,
    connection: Mutex<Option<Connection>>,
    channel: RwLock<Option<Channel>>,
    /// Single-flight guard: at most one connect sequence runs at a time.
    connecting: AtomicBool,
    reconnect: Arc<Notify>,
}

impl RabbitMqManager {
    pub fn new(config: RabbitMqConfig) -> Self {
        Self {
            config,
            connection: Mutex::new(None),
            channel: RwLock::new(None),
            connecting: AtomicBool::new(false),
            reconnect: Arc::new(Notify::new()),
        }
    }

    /// Supervision loop: connect once, then reconnect whenever an error or
    /// close notification arrives. Runs for the life of the process.
    pub async fn run(self: Arc<Self>) {
        self.connect().await;

        loop {
            self.reconnect.notified().await;
            warn!("RabbitMQ connection lost, reconnecting");
            self.cleanup().await;
            self.connect().await;
        }
    }

    /// Establish the connection, open a channel and assert the topology.
    /// Failures are never raised to the caller; each one is logged and the
    /// whole sequence is retried after a fixed delay until it succeeds.
    pub async fn connect(&self) {
        if self.connecting.swap(true, Ordering::SeqCst) {
            debug!("connect already in flight, skipping");
            return;
        }

        loop {
            match self.try_connect().await {
                Ok(()) => break,
                Err(e) => {
                    error!(error = %e, "failed to initialize RabbitMQ, retrying in {}s", RECONNECT_DELAY.as_secs());
                    tokio::time::sleep(RECONNECT_DELAY).await;
                }
            }
        }

        self.connecting.store(false, Ordering::SeqCst);
    }

    async fn try_connect(&self) -> Result<()> {
        let connection = timed(
            "connect",
            Connection::connect(&self.config.url, ConnectionProperties::default()),
        )
        .await?;
        info!("connected to RabbitMQ");

        let reconnect = Arc::clone(&self.reconnect);
        connection.on_error(move |error| {
            error!(%error, "RabbitMQ connection error");
            reconnect.notify_one();
        });

        let channel = timed("create channel", connection.create_channel()).await?;
        debug!("created RabbitMQ channel");

        timed(
            "declare exchange",
            channel.exchange_declare(
                &self.config.exchange,
                ExchangeKind::Direct,
                ExchangeDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            ),
        )
        .await?;

        timed(
            "declare queue",
            channel.queue_declare(
                &self.config.queue,
                QueueDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            ),
        )
        .await?;

        timed(
            "bind queue",
            channel.queue_bind(
                &self.config.queue,
                &self.config.exchange,
                "",
                QueueBindOptions::default(),
                FieldTable::default(),
            ),
        )
        .await?;

        *self.connection.lock().await = Some(connection);
        *self.channel.write().await = Some(channel);

        info!(
            exchange = %self.config.exchange,
            queue = %self.config.queue,
            "RabbitMQ topology asserted"
        );
        Ok(())
    }

    /// Close channel then connection, swallowing secondary errors, and clear
    /// both handles.
    pub async fn cleanup(&self) {
        let channel = self.channel.write().await.take();
        if let Some(channel) = channel {
            match timeout(channel_op_timeout(), channel.close(REPLY_SUCCESS, "cleanup")).await {
                Ok(Err(e)) => debug!(error = %e, "error closing channel during cleanup"),
                Err(_) => debug!("channel close timed out during cleanup"),
                _ => {}
            }
        }

        let connection = self.connection.lock().await.take();
        if let Some(connection) = connection {
            match timeout(
                channel_op_timeout(),
                connection.close(REPLY_SUCCESS, "cleanup"),
            )
            .await
            {
                Ok(Err(e)) => debug!(error = %e, "error closing connection during cleanup"),
                Err(_) => debug!("connection close timed out during cleanup"),
                _ => {}
            }
        }
    }

    /// The active channel, or `None` while the broker is unavailable.
    /// Callers treat `None` as "skip this turn", never as fatal.
    pub async fn channel(&self) -> Option<Channel> {
        self.channel
            .read()
            .await
            .as_ref()
            .filter(|ch| ch.status().connected())
            .cloned()
    }

    /// Ask the supervision loop to tear the connection down and rebuild it.
    /// Used by clients that observe a dead channel or consume stream.
    pub fn request_reconnect(&self) {
        self.reconnect.notify_one();
    }

    pub fn queue(&self) -> &str {
        &self.config.queue
    }

    /// Publish a persistent message to the exchange with the empty routing
    /// key. Fails fast when no channel is active.
    pub async fn publish(&self, payload: &[u8]) -> Result<()> {
        let Some(channel) = self.channel().await else {
            return Err(AppError::Broker("channel not available".to_string()));
        };

        timed("publish", async {
            channel
                .basic_publish(
                    &self.config.exchange,
                    "",
                    BasicPublishOptions::default(),
                    payload,
                    BasicProperties::default().with_delivery_mode(DELIVERY_MODE_PERSISTENT),
                )
                .await?
                .await?;
            Ok(())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_channel_is_none_before_connect() {
        let manager = RabbitMqManager::new(RabbitMqConfig {
            url: "amqp://localhost:5672".to_string(),
            exchange: "test_exchange".to_string(),
            queue: "test_queue".to_string(),
        });

        assert!(manager.channel().await.is_none());
    }

    #[tokio::test]
    async fn test_publish_without_channel_fails_fast() {
        let manager = RabbitMqManager::new(RabbitMqConfig {
            url: "amqp://localhost:5672".to_string(),
            exchange: "test_exchange".to_string(),
            queue: "test_queue".to_string(),
        });

        let err = manager.publish(b"{}").await.unwrap_err();
        assert!(err.to_string().contains("channel not available"));
    }

    #[tokio::test]
    async fn test_single_flight_guard_rejects_reentrant_connect() {
        let manager = RabbitMqManager::new(RabbitMqConfig {
            url: "amqp://localhost:5672".to_string(),
            exchange: "test_exchange".to_string(),
            queue: "test_queue".to_string(),
        });

        // Simulate a connect sequence already in flight; a second caller must
        // return immediately instead of racing it.
        manager.connecting.store(true, Ordering::SeqCst);
        manager.connect().await;
        assert!(manager.connecting.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timed_maps_deadline_to_broker_error() {
        let result = timed("never", async {
            std::future::pending::<lapin::Result<()>>().await
        })
        .await;

        let err = result.unwrap_err();
        assert!(err.to_string().contains("never: timed out"));
    }
}

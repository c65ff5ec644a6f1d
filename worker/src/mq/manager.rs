//! Per-queue orchestration: connect, consume, dispatch, requeue.
//!
//! One Manager owns one queue end to end: its broker connection, its
//! channel, its consumer stream, and the Sender bound to the queue at
//! startup. Managers never share state; all coordination with the rest of
//! the process happens through the cancellation token.

use std::future::Future;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use lapin::{
    options::{
        BasicAckOptions, BasicConsumeOptions, BasicNackOptions, QueueDeclareOptions,
    },
    types::FieldTable,
    Connection, ConnectionProperties,
};
use rand::Rng;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::Config;
use crate::mq::{Consumer, Producer};
use crate::notify::Sender;

/// Pause between loop iterations. A fixed self-imposed rate limit, not
/// failure backoff.
const LOOP_THROTTLE: Duration = Duration::from_millis(200);

/// Backoff settings for dialing the broker.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_attempts: config.connect_max_attempts.max(1),
            base_delay: Duration::from_millis(config.connect_base_delay_ms),
            max_delay: Duration::from_millis(config.connect_max_delay_ms),
        }
    }

    /// Exponential delay for a 1-based attempt number, capped at
    /// `max_delay`. Jitter is added by the caller.
    fn backoff_delay(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(20);
        let delay_ms = self
            .base_delay
            .as_millis()
            .saturating_mul(1u128 << shift)
            .min(self.max_delay.as_millis());
        Duration::from_millis(delay_ms as u64)
    }
}

/// Dial until success, with capped exponential backoff and jitter.
///
/// Gives up after the policy's attempt ceiling so a persistently broken
/// broker configuration surfaces as an error instead of a live hang.
/// Backoff sleeps race the cancellation token.
pub async fn retry_connect<T, E, F, Fut>(
    policy: &RetryPolicy,
    shutdown: &CancellationToken,
    mut dial: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<T, E>>,
    E: std::fmt::Display,
{
    for attempt in 1..=policy.max_attempts {
        match dial().await {
            Ok(value) => return Ok(value),
            Err(e) => {
                warn!(
                    attempt = attempt,
                    max_attempts = policy.max_attempts,
                    error = %e,
                    "broker_dial_failed"
                );
            }
        }

        if attempt == policy.max_attempts {
            break;
        }

        let delay = policy.backoff_delay(attempt);
        let jitter_ms = rand::thread_rng().gen_range(0..=delay.as_millis() as u64 / 2);
        tokio::select! {
            _ = shutdown.cancelled() => bail!("shutdown requested while dialing broker"),
            _ = sleep(delay + Duration::from_millis(jitter_ms)) => {}
        }
    }

    bail!("gave up dialing broker after {} attempts", policy.max_attempts)
}

/// Owns the lifecycle of a single queue's processing pipeline.
pub struct Manager {
    queue: String,
    sender: Sender,
}

impl Manager {
    pub fn new(queue: String, sender: Sender) -> Self {
        Self { queue, sender }
    }

    /// Dial the broker and run the processing loop until cancellation, the
    /// consumer stream closing, or a fatal startup failure.
    pub async fn start(self, config: &Config, shutdown: CancellationToken) -> Result<()> {
        let url = config.amqp_url();
        let policy = RetryPolicy::from_config(config);

        info!(queue = %self.queue, "manager_connecting");

        let connection = retry_connect(&policy, &shutdown, || {
            Connection::connect(&url, ConnectionProperties::default())
        })
        .await
        .with_context(|| format!("Failed to connect to RabbitMQ for queue {}", self.queue))?;

        info!(queue = %self.queue, "rabbitmq_connected");

        let result = self.work(&connection, &shutdown).await;

        if let Err(e) = connection.close(200, "worker stopping").await {
            warn!(queue = %self.queue, error = %e, "rabbitmq_connection_close_error");
        }

        result
    }

    /// Set up channel, queue, and consumer, then run the processing loop.
    ///
    /// Failures here are startup preconditions (configuration or
    /// environment) and propagate as fatal.
    async fn work(&self, connection: &Connection, shutdown: &CancellationToken) -> Result<()> {
        let channel = connection
            .create_channel()
            .await
            .context("Failed to create channel")?;

        info!(queue = %self.queue, "rabbitmq_channel_created");

        // Non-durable, non-exclusive, non-auto-delete, matching the
        // upstream producers' declaration.
        channel
            .queue_declare(
                &self.queue,
                QueueDeclareOptions::default(),
                FieldTable::default(),
            )
            .await
            .with_context(|| format!("Failed to declare queue {}", self.queue))?;

        info!(queue = %self.queue, "rabbitmq_queue_declared");

        // Manual acknowledgement: a delivery is only settled once we have
        // either delivered it, dropped it, or republished its successor.
        let deliveries = channel
            .basic_consume(
                &self.queue,
                "notifier",
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await
            .with_context(|| format!("Failed to consume from queue {}", self.queue))?;

        info!(queue = %self.queue, "rabbitmq_consumer_started");

        let mut consumer = Consumer::new(self.queue.clone(), deliveries);
        let producer = Producer::new(self.queue.clone(), channel.clone());

        loop {
            let delivery = tokio::select! {
                _ = shutdown.cancelled() => {
                    info!(queue = %self.queue, "manager_stopping");
                    break;
                }
                delivery = consumer.next_delivery() => match delivery {
                    Some(delivery) => delivery,
                    None => break,
                }
            };

            let delivery_tag = delivery.delivery_tag;

            match consumer.decode(&delivery.data) {
                Some(mut message) => {
                    let requeue = self.sender.send(&mut message).await;

                    if requeue {
                        match producer.produce(&message).await {
                            Ok(()) => self.ack(&channel, delivery_tag).await,
                            Err(e) => {
                                warn!(
                                    queue = %self.queue,
                                    error = %e,
                                    "message_requeue_failed"
                                );
                                // Let the broker keep the original delivery
                                // rather than losing the message.
                                self.nack(&channel, delivery_tag, true).await;
                            }
                        }
                    } else {
                        self.ack(&channel, delivery_tag).await;
                    }
                }
                None => {
                    // Malformed payload: settle it without requeue so it
                    // does not circulate.
                    self.nack(&channel, delivery_tag, false).await;
                }
            }

            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!(queue = %self.queue, "manager_stopping");
                    break;
                }
                _ = sleep(LOOP_THROTTLE) => {}
            }
        }

        Ok(())
    }

    async fn ack(&self, channel: &lapin::Channel, delivery_tag: u64) {
        if let Err(e) = channel
            .basic_ack(delivery_tag, BasicAckOptions::default())
            .await
        {
            warn!(
                queue = %self.queue,
                delivery_tag = delivery_tag,
                error = %e,
                "rabbitmq_ack_failed"
            );
        }
    }

    async fn nack(&self, channel: &lapin::Channel, delivery_tag: u64, requeue: bool) {
        if let Err(e) = channel
            .basic_nack(
                delivery_tag,
                BasicNackOptions {
                    requeue,
                    ..Default::default()
                },
            )
            .await
        {
            warn!(
                queue = %self.queue,
                delivery_tag = delivery_tag,
                error = %e,
                "rabbitmq_nack_failed"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    fn policy(max_attempts: u32, base_ms: u64, max_ms: u64) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay: Duration::from_millis(base_ms),
            max_delay: Duration::from_millis(max_ms),
        }
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = policy(10, 500, 4_000);
        assert_eq!(policy.backoff_delay(1), Duration::from_millis(500));
        assert_eq!(policy.backoff_delay(2), Duration::from_millis(1_000));
        assert_eq!(policy.backoff_delay(3), Duration::from_millis(2_000));
        assert_eq!(policy.backoff_delay(4), Duration::from_millis(4_000));
        assert_eq!(policy.backoff_delay(5), Duration::from_millis(4_000));
        // No overflow on absurd attempt numbers.
        assert_eq!(policy.backoff_delay(u32::MAX), Duration::from_millis(4_000));
    }

    #[tokio::test]
    async fn test_retry_connect_succeeds_after_failures() {
        let attempts = Cell::new(0u32);
        let shutdown = CancellationToken::new();

        let result = retry_connect(&policy(10, 1, 2), &shutdown, || {
            attempts.set(attempts.get() + 1);
            let n = attempts.get();
            async move {
                if n <= 3 {
                    Err("connection refused")
                } else {
                    Ok(n)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 4);
        assert_eq!(attempts.get(), 4);
    }

    #[tokio::test]
    async fn test_retry_connect_gives_up_at_ceiling() {
        let attempts = Cell::new(0u32);
        let shutdown = CancellationToken::new();

        let result: Result<u32> = retry_connect(&policy(3, 1, 2), &shutdown, || {
            attempts.set(attempts.get() + 1);
            async { Err("connection refused") }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(attempts.get(), 3);
    }

    #[tokio::test]
    async fn test_retry_connect_stops_on_cancellation() {
        let shutdown = CancellationToken::new();
        shutdown.cancel();

        // First dial still runs; the backoff sleep observes the token.
        let result: Result<u32> = retry_connect(&policy(10, 60_000, 60_000), &shutdown, || async {
            Err("connection refused")
        })
        .await;

        assert!(result.is_err());
    }
}

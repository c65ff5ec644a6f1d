//! Producing side of a queue: republish a Message onto its queue of origin.

use anyhow::{Context, Result};
use lapin::{options::BasicPublishOptions, BasicProperties, Channel};
use tracing::{info, warn};

use crate::notify::Message;

/// Republishes messages to the default exchange under the queue's own name.
pub struct Producer {
    queue: String,
    channel: Channel,
}

impl Producer {
    pub fn new(queue: String, channel: Channel) -> Self {
        Self { queue, channel }
    }

    /// Return a message to the queue for another delivery attempt.
    ///
    /// An encode failure abandons the requeue and the message is lost; that
    /// is logged here and not escalated. A publish failure propagates so the
    /// Manager can decide what to do with the original delivery.
    pub async fn produce(&self, message: &Message) -> Result<()> {
        info!(
            queue = %self.queue,
            recipient = %message.recipient,
            retry_count = message.retry_count,
            "message_requeue_attempt"
        );

        let body = match serde_json::to_vec(message) {
            Ok(body) => body,
            Err(e) => {
                warn!(
                    queue = %self.queue,
                    error = %e,
                    "message_encode_failed"
                );
                return Ok(());
            }
        };

        self.channel
            .basic_publish(
                "",
                &self.queue,
                BasicPublishOptions::default(),
                &body,
                BasicProperties::default().with_content_type("application/json".into()),
            )
            .await
            .with_context(|| format!("Failed to publish to queue {}", self.queue))?
            .await
            .with_context(|| format!("Failed to confirm publish to queue {}", self.queue))?;

        info!(
            queue = %self.queue,
            body_length = body.len(),
            "message_requeued"
        );

        Ok(())
    }
}

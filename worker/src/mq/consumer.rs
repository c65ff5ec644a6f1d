//! Consuming side of a queue: pull one delivery, decode it into a Message.

use futures::StreamExt;
use lapin::message::Delivery;
use tracing::{error, info, warn};

use crate::notify::Message;

/// Wraps the broker's delivery stream for one queue.
pub struct Consumer {
    queue: String,
    deliveries: lapin::Consumer,
}

impl Consumer {
    pub fn new(queue: String, deliveries: lapin::Consumer) -> Self {
        Self { queue, deliveries }
    }

    /// Block until the next delivery arrives.
    ///
    /// Transport-level delivery errors are logged and skipped; `None` means
    /// the stream has closed and the Manager should stop.
    pub async fn next_delivery(&mut self) -> Option<Delivery> {
        loop {
            match self.deliveries.next().await {
                Some(Ok(delivery)) => return Some(delivery),
                Some(Err(e)) => {
                    error!(queue = %self.queue, error = %e, "rabbitmq_delivery_error");
                }
                None => {
                    warn!(queue = %self.queue, "rabbitmq_consumer_closed");
                    return None;
                }
            }
        }
    }

    /// Decode a delivery body into a Message.
    pub fn decode(&self, body: &[u8]) -> Option<Message> {
        decode_message(&self.queue, body)
    }
}

/// Decode a raw delivery body.
///
/// A malformed payload is logged and dropped (`None`) rather than failing
/// the loop; the loop's availability wins over strict validation.
pub fn decode_message(queue: &str, body: &[u8]) -> Option<Message> {
    match serde_json::from_slice::<Message>(body) {
        Ok(message) => {
            info!(
                queue = %queue,
                recipient = %message.recipient,
                retry_count = message.retry_count,
                "message_consumed"
            );
            Some(message)
        }
        Err(e) => {
            warn!(
                queue = %queue,
                error = %e,
                body_preview = %String::from_utf8_lossy(&body[..body.len().min(200)]),
                "message_decode_failed"
            );
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_well_formed() {
        let body = br#"{"recipient":"a@b.com","subject":"Hi","body":"<p>x</p>","retry_count":1}"#;
        let message = decode_message("email_notifications", body).unwrap();
        assert_eq!(message.recipient, "a@b.com");
        assert_eq!(message.subject, "Hi");
        assert_eq!(message.retry_count, 1.0);
    }

    #[test]
    fn test_decode_malformed_is_dropped() {
        assert!(decode_message("email_notifications", b"not json at all").is_none());
        assert!(decode_message("email_notifications", br#"{"recipient": 7}"#).is_none());
    }

    #[test]
    fn test_decode_empty_object() {
        // All fields default; retry budget is spent from the start.
        let message = decode_message("sms_notifications", b"{}").unwrap();
        assert!(!message.has_budget());
    }
}

//! Notifier - queue-driven notification worker.
//!
//! Drains notification messages from named RabbitMQ queues and dispatches
//! them to delivery channels (email over SMTP, SMS over an HTTP gateway),
//! returning failed deliveries to their queue while the retry budget
//! carried inside each message lasts.
//!
//! ## Architecture
//!
//! ```text
//! queue ──> Manager ──> Consumer ──> Sender ──> (requeue?) ──> Producer
//! ```
//!
//! One Manager task per configured queue; the channel (email/SMS) is bound
//! to each queue once at startup.

pub mod config;
pub mod mq;
pub mod notify;

// Re-export commonly used types
pub use config::{Config, ConfigError, QueueBinding};
pub use mq::{Consumer, Manager, Producer, RetryPolicy};
pub use notify::{ChannelKind, Message, Sender};

//! Notification model and delivery channels.
//!
//! This module provides:
//! - The [`Message`] carried on every queue
//! - The [`Sender`] capability with its email and SMS variants

pub mod email;
pub mod message;
pub mod sender;
pub mod sms;

pub use email::{EmailSender, SmtpEmailSender};
pub use message::Message;
pub use sender::{ChannelKind, Sender};
pub use sms::SmsSender;

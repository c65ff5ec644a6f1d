//! The delivery capability handed to each queue Manager.

use anyhow::Result;
use reqwest::Client;

use crate::config::Config;
use crate::notify::email::SmtpEmailSender;
use crate::notify::sms::SmsSender;
use crate::notify::Message;

/// The delivery channels this worker knows about.
///
/// A closed set: binding a queue to a new channel means adding a variant
/// here and extending the exhaustive matches below.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelKind {
    Email,
    Sms,
}

impl ChannelKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelKind::Email => "email",
            ChannelKind::Sms => "sms",
        }
    }
}

/// A concrete delivery strategy, selected once at startup per queue.
pub enum Sender {
    Email(SmtpEmailSender),
    Sms(SmsSender),
}

impl Sender {
    /// Build the sender for a channel from configuration.
    pub fn from_config(channel: ChannelKind, config: &Config, client: &Client) -> Result<Self> {
        Ok(match channel {
            ChannelKind::Email => Sender::Email(SmtpEmailSender::from_config(config)?),
            ChannelKind::Sms => Sender::Sms(SmsSender::new(
                client.clone(),
                config.sms_api_id.clone(),
                config.sms_gateway_url.clone(),
            )),
        })
    }

    /// Attempt delivery of one message.
    ///
    /// Returns true when the message should be returned to its queue for
    /// another attempt. The email variant decrements `retry_count` before
    /// trying; the SMS variant leaves it untouched.
    pub async fn send(&self, message: &mut Message) -> bool {
        match self {
            Sender::Email(sender) => sender.send(message).await,
            Sender::Sms(sender) => sender.send(message).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_kind_labels() {
        assert_eq!(ChannelKind::Email.as_str(), "email");
        assert_eq!(ChannelKind::Sms.as_str(), "sms");
    }
}

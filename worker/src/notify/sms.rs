//! SMS delivery through the sms.ru HTTP gateway.

use reqwest::Client;
use tracing::{info, warn};
use url::Url;

use crate::notify::Message;

/// SMS sender calling the gateway with a GET request.
///
/// Unlike the email channel this one never inspects or decrements
/// `retry_count`; budget enforcement for SMS is an upstream concern.
pub struct SmsSender {
    client: Client,
    api_id: String,
    gateway: String,
}

impl SmsSender {
    pub fn new(client: Client, api_id: String, gateway: String) -> Self {
        Self {
            client,
            api_id,
            gateway,
        }
    }

    /// Attempt delivery; true means the message should be requeued.
    pub async fn send(&self, message: &Message) -> bool {
        info!(recipient = %message.recipient, "sms_send_attempt");

        let url = match self.build_url(message) {
            Ok(url) => url,
            Err(e) => {
                warn!(error = %e, gateway = %self.gateway, "sms_url_invalid");
                return true;
            }
        };

        match self.client.get(url).send().await {
            Ok(response) => {
                let status = response.status();
                if status.as_u16() == 200 {
                    info!(recipient = %message.recipient, "sms_sent");
                    false
                } else {
                    warn!(
                        recipient = %message.recipient,
                        status = status.as_u16(),
                        "sms_send_failed"
                    );
                    true
                }
            }
            Err(e) => {
                warn!(recipient = %message.recipient, error = %e, "sms_request_failed");
                true
            }
        }
    }

    fn build_url(&self, message: &Message) -> Result<Url, url::ParseError> {
        let mut url = Url::parse(&self.gateway)?;
        url.query_pairs_mut()
            .append_pair("api_id", &self.api_id)
            .append_pair("to", &message.recipient)
            .append_pair("msg", &message.body)
            .append_pair("json", "1");
        Ok(url)
    }
}

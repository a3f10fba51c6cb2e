use std::sync::Arc;

use async_trait::async_trait;
use log::*;
use reqwest::{
    header::{HeaderMap, HeaderValue},
    Client,
};
use serde::Serialize;

use crate::{
    config::SmsGatewayConfig,
    notifications::{MessageChannel, MessageSender, NotificationError, OutboundMessage},
};

/// Writes messages to the log. Used in development and wherever no gateway has been configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConsoleSender;

#[async_trait]
impl MessageSender for ConsoleSender {
    async fn send(&self, message: &OutboundMessage) -> Result<(), NotificationError> {
        match &message.subject {
            Some(subject) => info!("📨️ [{}] To: {} Subject: {subject}\n{}", message.channel, message.to, message.body),
            None => info!("📨️ [{}] To: {}\n{}", message.channel, message.to, message.body),
        }
        Ok(())
    }
}

#[derive(Debug, Serialize)]
struct SmsRequest<'a> {
    to: &'a str,
    message: &'a str,
    from: &'a str,
}

/// Posts SMS messages to an HTTP gateway as `{to, message, from}` JSON.
#[derive(Clone)]
pub struct HttpSmsSender {
    url: String,
    sender_id: String,
    client: Arc<Client>,
}

impl HttpSmsSender {
    pub fn new(config: &SmsGatewayConfig) -> Result<Self, NotificationError> {
        let mut headers = HeaderMap::with_capacity(2);
        let val = HeaderValue::from_str(config.api_key.reveal().as_str())
            .map_err(|e| NotificationError::Initialization(e.to_string()))?;
        headers.insert("X-Api-Key", val);
        headers.insert("Content-Type", HeaderValue::from_static("application/json"));
        let client = Client::builder()
            .default_headers(headers)
            .build()
            .map_err(|e| NotificationError::Initialization(e.to_string()))?;
        Ok(Self { url: config.url.clone(), sender_id: config.sender_id.clone(), client: Arc::new(client) })
    }
}

#[async_trait]
impl MessageSender for HttpSmsSender {
    async fn send(&self, message: &OutboundMessage) -> Result<(), NotificationError> {
        if message.channel != MessageChannel::Sms {
            return Err(NotificationError::UnsupportedChannel(message.channel));
        }
        let body = SmsRequest { to: &message.to, message: &message.body, from: &self.sender_id };
        trace!("📨️ Posting SMS for {} to {}", message.to, self.url);
        let response = self
            .client
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .map_err(|e| NotificationError::Transport(e.to_string()))?;
        if response.status().is_success() {
            debug!("📨️ SMS gateway accepted the message for {}. {}", message.to, response.status());
            Ok(())
        } else {
            let status = response.status().as_u16();
            let message = response.text().await.map_err(|e| NotificationError::Transport(e.to_string()))?;
            Err(NotificationError::Rejected { status, message })
        }
    }
}

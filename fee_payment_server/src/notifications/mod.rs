//! Outbound payment confirmations.
//!
//! Notifications are a side effect of a committed allocation. They are sent from the `PaymentAllocatedEvent` hook, so
//! a failure here is logged and retried but can never touch the financial records.
mod dispatcher;
mod senders;

use std::fmt::Display;

use async_trait::async_trait;
pub use dispatcher::{compose_confirmation, DispatchSummary, NotificationDispatcher};
pub use senders::{ConsoleSender, HttpSmsSender};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageChannel {
    Sms,
    Email,
}

impl Display for MessageChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MessageChannel::Sms => write!(f, "SMS"),
            MessageChannel::Email => write!(f, "email"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub channel: MessageChannel,
    /// Phone number or email address
    pub to: String,
    pub subject: Option<String>,
    pub body: String,
}

impl OutboundMessage {
    pub fn sms<S: Into<String>>(to: S, body: String) -> Self {
        Self { channel: MessageChannel::Sms, to: to.into(), subject: None, body }
    }

    pub fn email<S: Into<String>>(to: S, subject: String, body: String) -> Self {
        Self { channel: MessageChannel::Email, to: to.into(), subject: Some(subject), body }
    }
}

#[derive(Debug, Clone, Error)]
pub enum NotificationError {
    #[error("Could not initialize the message sender. {0}")]
    Initialization(String),
    #[error("The message could not be delivered to the gateway. {0}")]
    Transport(String),
    #[error("The gateway rejected the message with status {status}. {message}")]
    Rejected { status: u16, message: String },
    #[error("This sender does not handle {0} messages")]
    UnsupportedChannel(MessageChannel),
}

/// An outbound message collaborator. No delivery guarantee is assumed: `Ok` only means the gateway accepted the
/// message.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MessageSender: Send + Sync {
    async fn send(&self, message: &OutboundMessage) -> Result<(), NotificationError>;
}

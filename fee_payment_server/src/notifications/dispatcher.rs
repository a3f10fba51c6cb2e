use std::sync::Arc;

use fee_payment_engine::events::{EventHooks, PaymentAllocatedEvent};
use futures::FutureExt;
use log::*;

use crate::{
    config::NotificationConfig,
    helpers::Backoff,
    notifications::{ConsoleSender, HttpSmsSender, MessageChannel, MessageSender, NotificationError, OutboundMessage},
};

/// The confirmation text sent to the payer after a successful allocation.
pub fn compose_confirmation(event: &PaymentAllocatedEvent, school_name: &str) -> String {
    let currency = event.payment.currency.as_str();
    let student = &event.student;
    let mut text = format!(
        "{school_name}: Payment of {} received for {} ({}). Ref {}. Outstanding fee balance: {}.",
        event.payment.amount.with_currency(currency),
        student.full_name,
        student.admission_no,
        event.payment.txid,
        event.outstanding_balance.with_currency(currency),
    );
    if event.credit_generated.is_positive() {
        text.push_str(&format!(" {} has been kept as credit.", event.credit_generated.with_currency(currency)));
    }
    text
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchSummary {
    pub delivered: usize,
    pub failed: usize,
}

/// Sends payment confirmations to the student's contacts. Every message is retried with bounded backoff; failures are
/// logged and reported in the [`DispatchSummary`] but go no further.
#[derive(Clone)]
pub struct NotificationDispatcher {
    sms: Option<Arc<dyn MessageSender>>,
    email: Option<Arc<dyn MessageSender>>,
    backoff: Backoff,
    school_name: String,
}

impl NotificationDispatcher {
    pub fn new(school_name: &str, backoff: Backoff) -> Self {
        Self { sms: None, email: None, backoff, school_name: school_name.to_string() }
    }

    pub fn with_sms_sender(mut self, sender: Arc<dyn MessageSender>) -> Self {
        self.sms = Some(sender);
        self
    }

    pub fn with_email_sender(mut self, sender: Arc<dyn MessageSender>) -> Self {
        self.email = Some(sender);
        self
    }

    /// Builds the dispatcher the server runs with. SMS goes through the HTTP gateway when one is configured and to the
    /// log otherwise. Email always goes to the log.
    pub fn from_config(config: &NotificationConfig) -> Result<Self, NotificationError> {
        let backoff = Backoff::new(config.max_attempts, config.base_delay, config.max_delay);
        let sms: Arc<dyn MessageSender> = match &config.sms_gateway {
            Some(gateway) => Arc::new(HttpSmsSender::new(gateway)?),
            None => Arc::new(ConsoleSender),
        };
        Ok(Self::new(&config.school_name, backoff).with_sms_sender(sms).with_email_sender(Arc::new(ConsoleSender)))
    }

    pub fn messages_for(&self, event: &PaymentAllocatedEvent) -> Vec<OutboundMessage> {
        let body = compose_confirmation(event, &self.school_name);
        let mut messages = Vec::with_capacity(2);
        if let Some(phone) = event.student.phone.as_deref().filter(|p| !p.trim().is_empty()) {
            messages.push(OutboundMessage::sms(phone.trim(), body.clone()));
        }
        if let Some(email) = event.student.email.as_deref().filter(|e| !e.trim().is_empty()) {
            let subject = format!("{} fee payment receipt {}", self.school_name, event.payment.txid);
            messages.push(OutboundMessage::email(email.trim(), subject, body));
        }
        messages
    }

    pub async fn dispatch(&self, event: &PaymentAllocatedEvent) -> DispatchSummary {
        let mut summary = DispatchSummary::default();
        let messages = self.messages_for(event);
        if messages.is_empty() {
            debug!(
                "📨️ Student {} has no contact details. No confirmation for payment {}.",
                event.student.admission_no, event.payment.txid
            );
            return summary;
        }
        for message in &messages {
            let sender = match message.channel {
                MessageChannel::Sms => self.sms.as_deref(),
                MessageChannel::Email => self.email.as_deref(),
            };
            let Some(sender) = sender else {
                debug!("📨️ No {} sender is configured. Skipping the message to {}.", message.channel, message.to);
                continue;
            };
            let label = format!("{} confirmation for payment {}", message.channel, event.payment.txid);
            match self.backoff.retry(&label, move || sender.send(message)).await {
                Ok(()) => {
                    info!("📨️ Sent {label} to {}", message.to);
                    summary.delivered += 1;
                },
                Err(e) => {
                    error!("📨️ Could not send {label} to {}. {e}", message.to);
                    summary.failed += 1;
                },
            }
        }
        summary
    }

    /// Subscribes the dispatcher to allocation events. Unmatched and failed payments are only logged, for operators.
    pub fn install(self, hooks: &mut EventHooks) {
        let dispatcher = Arc::new(self);
        hooks.on_payment_allocated(move |event| {
            let dispatcher = Arc::clone(&dispatcher);
            async move {
                let summary = dispatcher.dispatch(&event).await;
                trace!("📨️ Notifications for payment {}: {summary:?}", event.payment.txid);
            }
            .boxed()
        });
        hooks.on_payment_unmatched(|event| {
            async move {
                warn!(
                    "📨️ Payment {} of {} could not be matched ({}). It is waiting in the unmatched queue.",
                    event.payment.txid,
                    event.payment.amount.with_currency(&event.payment.currency),
                    event.failure.reason
                );
            }
            .boxed()
        });
        hooks.on_payment_failed(|event| {
            async move {
                warn!("📨️ Payment {} failed and needs manual remediation. {}", event.payment.txid, event.reason());
            }
            .boxed()
        });
    }
}

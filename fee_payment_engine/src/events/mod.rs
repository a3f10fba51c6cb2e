//! Payment lifecycle events.
//!
//! Side effects that must never hold up (or roll back) a financial write, such as payer notifications, hang off these
//! events. Producers are handed to the flow API; handlers run on their own tasks.
mod channel;
mod event_types;
mod hooks;

pub use channel::{EventHandler, EventProducer, Handler};
pub use event_types::*;
pub use hooks::{EventHandlers, EventHooks, EventProducers};

//! Notification sender implementations.

mod logging;
mod memory;
mod webhook;

pub use logging::LoggingSender;
pub use memory::InMemorySender;
pub use webhook::WebhookSender;

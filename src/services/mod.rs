//! Services module for business logic and integrations

pub mod intent_lifecycle;
pub mod notification;
pub mod webhook_processor;

pub use intent_lifecycle::{IntentLifecycleManager, LifecycleConfig, LifecycleError};
pub use notification::NotificationService;
pub use webhook_processor::{WebhookOutcome, WebhookProcessor, WebhookProcessorError};

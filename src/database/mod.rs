pub mod error;
pub mod intent_store;
#[cfg(feature = "database")]
pub mod payment_intent_repository;

pub use intent_store::{IntentStore, MemoryIntentStore, StoreError, StoreResult};
#[cfg(feature = "database")]
pub use payment_intent_repository::PaymentIntentRepository;

#[cfg(feature = "database")]
pub use self::pool::*;

#[cfg(feature = "database")]
mod pool;

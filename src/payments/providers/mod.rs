//! Concrete payment gateway implementations.

pub mod paystack;

pub use paystack::{PaystackConfig, PaystackGateway};

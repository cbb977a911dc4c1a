//! Payment gateway abstraction and shared payment types.

pub mod error;
pub mod gateway;
pub mod providers;
pub mod reference;
pub mod types;
pub mod utils;

pub use error::{PaymentError, PaymentResult};
pub use gateway::PaymentGateway;
pub use providers::{PaystackConfig, PaystackGateway};
pub use reference::{ReferenceGenerator, TimestampReferenceGenerator};
pub use types::{
    AuthorizeOptions, AuthorizeResponse, GatewayEvent, GatewayStatus, IntentEvent, IntentMutation,
    IntentState, Metadata, NewIntent, PaymentIntent, VerifyResponse,
};

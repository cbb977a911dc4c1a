use chrono::{DateTime, Utc};
use uuid::Uuid;

pub const REFERENCE_PREFIX: &str = "TKT";

/// Source of intent references.
///
/// References must be unique across the store; the lifecycle manager retries
/// on collision, so implementations only need to be collision-resistant.
pub trait ReferenceGenerator: Send + Sync {
    fn generate(&self, now: DateTime<Utc>) -> String;
}

/// `TKT-<yyyymmddHHMMSSmmm>-<16 hex chars>`, timestamp in UTC.
#[derive(Debug, Clone, Copy, Default)]
pub struct TimestampReferenceGenerator;

impl ReferenceGenerator for TimestampReferenceGenerator {
    fn generate(&self, now: DateTime<Utc>) -> String {
        let entropy = Uuid::new_v4().simple().to_string();
        format!(
            "{}-{}-{}",
            REFERENCE_PREFIX,
            now.format("%Y%m%d%H%M%S%3f"),
            &entropy[..16]
        )
    }
}

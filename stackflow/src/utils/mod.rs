//! Utility functions for identifiers, timestamps, backoff and naming rules.

pub mod backoff;
pub mod validation;

pub use backoff::{BackoffConfig, BackoffStrategy, JitterStrategy};
pub use validation::{is_valid_image_tag, is_valid_repository, validate_unit_name};

use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Represents a timestamp that can be serialized/deserialized.
pub type Timestamp = DateTime<Utc>;

/// Returns the current UTC timestamp.
#[must_use]
pub fn now_utc() -> Timestamp {
    Utc::now()
}

/// Returns the current UTC time as an ISO 8601 formatted string.
#[must_use]
pub fn iso_timestamp() -> String {
    Utc::now().format("%Y-%m-%dT%H:%M:%S%.6f+00:00").to_string()
}

/// Generates a time-ordered identifier for a pipeline run.
#[must_use]
pub fn generate_run_id() -> Uuid {
    Uuid::now_v7()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_ids_are_v7_and_unique() {
        let a = generate_run_id();
        let b = generate_run_id();
        assert_eq!(a.get_version_num(), 7);
        assert_ne!(a, b);
    }

    #[test]
    fn test_iso_timestamp_format() {
        let ts = iso_timestamp();
        assert!(ts.contains('T'));
        assert!(ts.ends_with("+00:00"));
    }
}

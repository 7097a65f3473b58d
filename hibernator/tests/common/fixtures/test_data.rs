//! Common test data and constants

use chrono::{DateTime, Utc};

/// Parse an RFC 3339 instant
pub fn utc(value: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(value)
        .expect("valid RFC 3339 timestamp")
        .with_timezone(&Utc)
}

/// Instants around a Mon-Fri 20:00-06:00 UTC window
pub mod instants {
    /// Monday, inside the off-hours window
    pub const MONDAY_NIGHT: &str = "2024-01-08T21:00:00Z";
    /// Tuesday, after the window closed
    pub const TUESDAY_MORNING: &str = "2024-01-09T07:00:00Z";
    /// Tuesday, inside the next window
    pub const TUESDAY_NIGHT: &str = "2024-01-09T21:00:00Z";
    /// Monday, before the window opens
    pub const MONDAY_NOON: &str = "2024-01-08T12:00:00Z";
}

pub mod namespaces {
    pub const DEFAULT: &str = "default";
    pub const STAGING: &str = "staging";
}

pub mod plans {
    pub const NIGHTLY: &str = "nightly";
    pub const WEEKEND: &str = "weekend";
}

pub mod targets {
    pub const DATABASE: &str = "database";
    pub const API: &str = "api";
    pub const WORKERS: &str = "workers";
    pub const CACHE: &str = "cache";
}

pub mod executors {
    pub const MOCK: &str = "mock";
    pub const UNREGISTERED: &str = "unregistered";
}

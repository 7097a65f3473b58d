//! Central repository for limits, intervals and well-known keys
//!
//! Constants are grouped by the component that owns them.

use std::time::Duration;

/// Restore point storage limits
pub mod restore {
    /// Maximum serialized size of one target's restore payload (900 KiB)
    pub const MAX_TARGET_PAYLOAD_BYTES: usize = 900 * 1024;

    /// Document name prefix: `restore-<plan>` holds markers,
    /// `restore-<plan>.<target>` holds one target's payload
    pub const DOCUMENT_PREFIX: &str = "restore-";

    /// Key of the serialized payload inside a target document
    pub const PAYLOAD_KEY: &str = "payload";

    /// Key prefix of the per-target "restored" markers
    pub const RESTORED_MARKER_PREFIX: &str = "restored-";
}

/// Document store limits
pub mod store {
    /// Backing document ceiling (1 MiB)
    pub const MAX_DOCUMENT_BYTES: usize = 1024 * 1024;

    /// Read-modify-write attempts before a conflict is surfaced
    pub const CONFLICT_RETRY_ATTEMPTS: u32 = 10;

    /// Pause between conflicting attempts, multiplied by the attempt number
    pub const CONFLICT_BACKOFF_MILLIS: u64 = 5;
}

/// Plan resource constants
pub mod plan {
    /// Document name prefix for plan documents
    pub const DOCUMENT_PREFIX: &str = "plan-";

    /// Number of cycle summaries kept in status
    pub const EXECUTION_HISTORY_LIMIT: usize = 10;

    /// Default per-target retries when a plan does not set one
    pub const DEFAULT_RETRIES: u32 = 3;

    /// Largest accepted `behavior.retries`
    pub const MAX_RETRIES: u32 = 20;

    /// First automatic re-entry of a failed cycle waits this long, doubling each time
    pub const AUTO_RETRY_BASE_BACKOFF_SECONDS: i64 = 60;

    /// Ceiling of the automatic retry backoff (30 minutes)
    pub const AUTO_RETRY_MAX_BACKOFF_SECONDS: i64 = 30 * 60;
}

/// Annotation keys understood by the controller
pub mod annotations {
    pub const SUSPEND_UNTIL: &str = "hibernator.io/suspend-until";
    pub const SUSPEND_REASON: &str = "hibernator.io/suspend-reason";
    pub const RETRY_NOW: &str = "hibernator.io/retry-now";
    pub const RETRY_FORCE: &str = "hibernator.io/retry-force";
}

/// Schedule evaluation constants
pub mod schedule {
    /// Days scanned ahead when searching for the next trigger (one week plus slack)
    pub const LOOKAHEAD_DAYS: i64 = 8;

    /// Default number of events returned by a schedule preview
    pub const DEFAULT_PREVIEW_EVENTS: usize = 6;
}

/// Default configuration values
pub mod defaults {
    use super::Duration;

    /// Default reconciliation interval in seconds
    pub const RECONCILE_INTERVAL_SECONDS: u64 = 30;

    /// Default namespace for plans and restore data
    pub const NAMESPACE: &str = "default";

    /// Default SQLite database path
    pub const DATABASE_PATH: &str = "data/hibernator.db";

    /// Default timeout for HTTP executor calls in seconds
    pub const EXECUTOR_TIMEOUT_SECONDS: u64 = 300;

    /// Connect timeout for HTTP executor calls
    pub const EXECUTOR_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
}

//! API usage reporting from the `Sforce-Limit-Info` response header.
//!
//! Usage is only recorded, never enforced.

use std::sync::{PoisonError, RwLock};

use serde::{Deserialize, Serialize};

/// Response header carrying the org's API usage counter.
pub const LIMIT_INFO_HEADER: &str = "Sforce-Limit-Info";

/// The last seen API usage. Both fields are `None` until a response carries
/// the header.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub used: Option<u64>,
    pub limit: Option<u64>,
}

/// Per-client usage counter, updated as a side effect of successful requests.
#[derive(Debug, Default)]
pub struct UsageTracker {
    current: RwLock<Usage>,
}

impl UsageTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// The most recently recorded usage.
    pub fn usage(&self) -> Usage {
        *self.current.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record a header value. Returns whether the counter changed.
    ///
    /// A missing or unparsable header leaves the counter untouched.
    pub fn record(&self, header: Option<&str>) -> bool {
        let Some(parsed) = header.and_then(parse_limit_info) else {
            return false;
        };
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = parsed;
        tracing::trace!(used = ?parsed.used, limit = ?parsed.limit, "api usage updated");
        true
    }
}

/// Parse `123/15000` or `api-usage=123/15000`.
///
/// Only the first comma-separated segment counts.
pub fn parse_limit_info(value: &str) -> Option<Usage> {
    let segment = value.split(',').next()?.trim();
    let counts = segment
        .split_once('=')
        .map_or(segment, |(_, rest)| rest)
        .trim();

    let mut fields = counts.split('/');
    let used = fields.next()?.trim().parse().ok()?;
    let limit = fields.next()?.trim().parse().ok()?;

    Some(Usage {
        used: Some(used),
        limit: Some(limit),
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

//! Freshness policy: is a decoded code recent enough to trust?

use chrono::{DateTime, Utc};
use std::time::Duration;

pub const DEFAULT_FRESHNESS_THRESHOLD: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    Accept,
    Reject { age: Duration },
}

impl Freshness {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accept)
    }
}

/// Accept iff `now - captured_at <= threshold`.
///
/// A `captured_at` in the future (clock skew between devices) counts as age zero.
pub fn validate(captured_at: DateTime<Utc>, now: DateTime<Utc>, threshold: Duration) -> Freshness {
    let age = (now - captured_at).to_std().unwrap_or(Duration::ZERO);
    if age <= threshold {
        Freshness::Accept
    } else {
        Freshness::Reject { age }
    }
}

use std::time::{SystemTime, UNIX_EPOCH};

use tree::Attributes;

use crate::attrs;

const ATTO_PER_NANO: u64 = 1_000_000_000;

/// A point in time as carried by validated leaves and message headers:
/// whole seconds since the epoch plus an attosecond fraction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct Timestamp {
    pub sec: u64,
    pub frac: u64,
}

impl Timestamp {
    pub fn new(sec: u64, frac: u64) -> Self {
        Timestamp { sec, frac }
    }

    pub fn now() -> Self {
        let elapsed = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        Timestamp {
            sec: elapsed.as_secs(),
            frac: u64::from(elapsed.subsec_nanos()) * ATTO_PER_NANO,
        }
    }

    /// Stamp an attribute map. Existing timestamp attributes are replaced
    /// only when `force` is set.
    pub fn apply(&self, attributes: &mut Attributes, force: bool) {
        if force || !attributes.has(attrs::TS_SEC) {
            attributes.set(attrs::TS_SEC, self.sec);
            attributes.set(attrs::TS_FRAC, self.frac);
        }
    }

    pub fn from_attributes(attributes: &Attributes) -> Option<Timestamp> {
        Some(Timestamp {
            sec: attributes.get_as::<u64>(attrs::TS_SEC).ok()?,
            frac: attributes.get_as::<u64>(attrs::TS_FRAC).ok()?,
        })
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{:018}", self.sec, self.frac)
    }
}

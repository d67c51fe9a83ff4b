use crate::error::{Error, StoreErrorKind};
use serde::{Deserialize, Serialize};

/// Default number of messages returned when the caller sets no limit.
pub const DEFAULT_MESSAGE_LIMIT: usize = 24;

/// Selects a window of a topic's message history. `since` is inclusive,
/// `before` is exclusive; zero means unbounded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MessageQuery {
    pub since: i64,
    pub before: i64,
    pub limit: usize,
}

impl MessageQuery {
    pub fn matches(&self, seq_id: i64) -> bool {
        seq_id >= self.since && (self.before <= 0 || seq_id < self.before)
    }

    pub fn effective_limit(&self) -> usize {
        if self.limit == 0 {
            DEFAULT_MESSAGE_LIMIT
        } else {
            self.limit
        }
    }
}

/// Range of message ids, `low` inclusive and `hi` exclusive. A zero `hi`
/// addresses the single message `low`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelRange {
    pub low: i64,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub hi: i64,
}

fn is_zero(value: &i64) -> bool {
    *value == 0
}

impl DelRange {
    pub fn validate(&self) -> Result<(), Error> {
        if self.low <= 0 || (self.hi != 0 && self.hi <= self.low) {
            return Err(Error::new(StoreErrorKind::InvalidQueryTerm));
        }
        Ok(())
    }

    pub fn contains(&self, seq_id: i64) -> bool {
        if self.hi == 0 {
            seq_id == self.low
        } else {
            seq_id >= self.low && seq_id < self.hi
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_id_range_contains_only_low() {
        let range = DelRange { low: 5, hi: 0 };
        assert!(range.contains(5));
        assert!(!range.contains(6));
    }

    #[test]
    fn inverted_range_is_invalid() {
        assert!(DelRange { low: 5, hi: 3 }.validate().is_err());
        assert!(DelRange { low: 0, hi: 0 }.validate().is_err());
        assert!(DelRange { low: 1, hi: 4 }.validate().is_ok());
    }

    #[test]
    fn window_is_half_open() {
        let query = MessageQuery {
            since: 2,
            before: 4,
            limit: 0,
        };
        assert!(!query.matches(1));
        assert!(query.matches(2));
        assert!(query.matches(3));
        assert!(!query.matches(4));
        assert_eq!(query.effective_limit(), DEFAULT_MESSAGE_LIMIT);
    }
}

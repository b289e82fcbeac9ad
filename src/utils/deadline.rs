// src/utils/deadline.rs
use std::time::{Duration, Instant};

use crate::errors::DedupError;

/// Wall-clock limit for a run. Checked between phases and inside the
/// parallel loops, so an expired run stops doing work instead of being abandoned.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Deadline {
    at: Option<Instant>,
}

impl Deadline {
    pub fn none() -> Self {
        Self { at: None }
    }

    pub fn after(limit: Duration) -> Self {
        Self {
            at: Instant::now().checked_add(limit),
        }
    }

    pub fn at(instant: Instant) -> Self {
        Self { at: Some(instant) }
    }

    /// `RUN_TIMEOUT_SECS` turned into a deadline starting now.
    pub fn from_timeout_secs(secs: Option<u64>) -> Self {
        secs.map(|s| Self::after(Duration::from_secs(s)))
            .unwrap_or_default()
    }

    pub fn is_set(&self) -> bool {
        self.at.is_some()
    }

    pub fn expired(&self) -> bool {
        self.at.map_or(false, |at| Instant::now() >= at)
    }

    pub fn check(&self, phase: &str) -> Result<(), DedupError> {
        if self.expired() {
            return Err(DedupError::DeadlineExceeded {
                phase: phase.to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deadline_states() {
        assert!(!Deadline::none().expired());
        assert!(Deadline::none().check("scoring").is_ok());
        assert!(!Deadline::from_timeout_secs(None).is_set());
        assert!(!Deadline::from_timeout_secs(Some(3600)).expired());

        let past = Deadline::at(Instant::now());
        assert!(past.expired());
        assert_eq!(
            past.check("clustering"),
            Err(DedupError::DeadlineExceeded {
                phase: "clustering".to_string()
            })
        );
    }
}

//! Operation deadlines
//!
//! All I/O-bearing operations accept a [`Deadline`]; exceeding it fails with
//! `Timeout` and never partially advances a ref. A deadline is a plain value,
//! cheap to copy and pass down a call chain.

use crate::error::{ChronError, ChronResult};
use std::time::{Duration, Instant};

/// Point in time after which an operation must abort
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deadline(Option<Instant>);

impl Deadline {
    /// No deadline; the operation may run indefinitely.
    pub fn none() -> Self {
        Deadline(None)
    }

    /// Deadline `timeout` from now.
    pub fn after(timeout: Duration) -> Self {
        Deadline(Some(Instant::now() + timeout))
    }

    /// Check whether the deadline has passed.
    pub fn expired(&self) -> bool {
        match self.0 {
            Some(at) => Instant::now() >= at,
            None => false,
        }
    }

    /// Error with `Timeout { operation }` if the deadline has passed.
    ///
    /// Call this at every suspension point (WAL fsync, object writes, ref
    /// CAS, reader refresh, remote I/O).
    pub fn check(&self, operation: &str) -> ChronResult<()> {
        if self.expired() {
            Err(ChronError::timeout(operation))
        } else {
            Ok(())
        }
    }

    /// Time remaining, if a deadline is set.
    pub fn remaining(&self) -> Option<Duration> {
        self.0.map(|at| at.saturating_duration_since(Instant::now()))
    }
}

impl Default for Deadline {
    fn default() -> Self {
        Deadline::none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_none_never_expires() {
        let d = Deadline::none();
        assert!(!d.expired());
        assert!(d.check("anything").is_ok());
        assert!(d.remaining().is_none());
    }

    #[test]
    fn test_future_deadline_not_expired() {
        let d = Deadline::after(Duration::from_secs(60));
        assert!(!d.expired());
        assert!(d.check("op").is_ok());
        assert!(d.remaining().unwrap() > Duration::from_secs(30));
    }

    #[test]
    fn test_past_deadline_expired() {
        let d = Deadline::after(Duration::from_millis(0));
        std::thread::sleep(Duration::from_millis(2));
        assert!(d.expired());
        let err = d.check("commit apply").unwrap_err();
        assert!(matches!(err, ChronError::Timeout { .. }));
        assert!(err.to_string().contains("commit apply"));
    }
}

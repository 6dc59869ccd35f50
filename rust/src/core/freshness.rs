// Push-vs-poll tie-break shared by every keyed entity the core mirrors.

use std::collections::HashMap;

use crate::error::SyncError;

/// Where an update came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    Push,
    /// A poll response; `issued_at` is the push sequence observed when the poll was sent.
    Poll { issued_at: u64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stamp {
    pub origin: Origin,
    pub revision: Option<u64>,
}

impl Stamp {
    pub fn push(revision: Option<u64>) -> Self {
        Self {
            origin: Origin::Push,
            revision,
        }
    }

    pub fn poll(issued_at: u64, revision: Option<u64>) -> Self {
        Self {
            origin: Origin::Poll { issued_at },
            revision,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct Mark {
    revision: Option<u64>,
    last_push: u64,
}

/// Per-key revision and push-sequence bookkeeping.
///
/// Pushes advance a local sequence. A poll captures that sequence when it is
/// issued and loses to any push applied to the same key afterwards. Explicit
/// revisions must be strictly increasing; updates without one tie with "now".
#[derive(Debug, Default)]
pub struct Freshness {
    push_seq: u64,
    marks: HashMap<String, Mark>,
}

impl Freshness {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sequence to stamp on a poll about to be dispatched.
    pub fn issue_poll(&self) -> u64 {
        self.push_seq
    }

    /// Checks an update against the key's mark and records it when admitted.
    pub fn admit(&mut self, key: &str, stamp: Stamp) -> Result<(), SyncError> {
        let mark = self.marks.get(key).copied().unwrap_or_default();

        if let Origin::Poll { issued_at } = stamp.origin {
            if mark.last_push > issued_at {
                return Err(SyncError::stale(key, "push applied after poll was issued"));
            }
        }
        if let (Some(incoming), Some(current)) = (stamp.revision, mark.revision) {
            if incoming <= current {
                return Err(SyncError::stale(
                    key,
                    format!("revision {incoming} not newer than {current}"),
                ));
            }
        }

        let mut next = mark;
        if stamp.origin == Origin::Push {
            self.push_seq += 1;
            next.last_push = self.push_seq;
        }
        if stamp.revision.is_some() {
            next.revision = stamp.revision;
        }
        self.marks.insert(key.to_string(), next);
        Ok(())
    }

    #[cfg(test)]
    pub fn revision(&self, key: &str) -> Option<u64> {
        self.marks.get(key).and_then(|m| m.revision)
    }

    /// True when a push for `key` was applied after a poll issued at `issued_at`.
    pub fn pushed_since(&self, key: &str, issued_at: u64) -> bool {
        self.marks
            .get(key)
            .map(|m| m.last_push > issued_at)
            .unwrap_or(false)
    }

    /// Drops the mark for a key that no longer exists.
    pub fn forget(&mut self, key: &str) {
        self.marks.remove(key);
    }

    pub fn clear(&mut self) {
        self.marks.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn increasing_revisions_apply_and_repeats_are_stale() {
        let mut f = Freshness::new();
        assert!(f.admit("A1", Stamp::push(Some(1))).is_ok());
        assert!(f.admit("A1", Stamp::push(Some(2))).is_ok());
        assert!(matches!(
            f.admit("A1", Stamp::push(Some(2))),
            Err(SyncError::StaleData { .. })
        ));
        assert!(f.admit("A1", Stamp::push(Some(1))).is_err());
        assert_eq!(f.revision("A1"), Some(2));
    }

    #[test]
    fn poll_issued_before_push_loses() {
        let mut f = Freshness::new();
        let issued = f.issue_poll();
        f.admit("A1", Stamp::push(Some(1))).unwrap();
        assert!(f.admit("A1", Stamp::poll(issued, None)).is_err());
        assert!(f.pushed_since("A1", issued));
    }

    #[test]
    fn poll_with_older_revision_loses_even_if_issued_later() {
        let mut f = Freshness::new();
        f.admit("A1", Stamp::push(Some(1))).unwrap();
        let issued = f.issue_poll();
        assert!(f.admit("A1", Stamp::poll(issued, Some(0))).is_err());
    }

    #[test]
    fn poll_without_revision_issued_after_push_applies() {
        let mut f = Freshness::new();
        f.admit("A1", Stamp::push(Some(4))).unwrap();
        let issued = f.issue_poll();
        assert!(f.admit("A1", Stamp::poll(issued, None)).is_ok());
        // Revision is kept for later comparisons.
        assert_eq!(f.revision("A1"), Some(4));
    }

    #[test]
    fn pushes_on_other_keys_do_not_block_a_poll() {
        let mut f = Freshness::new();
        let issued = f.issue_poll();
        f.admit("A2", Stamp::push(None)).unwrap();
        assert!(f.admit("A1", Stamp::poll(issued, None)).is_ok());
    }
}

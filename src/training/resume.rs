//! Loop Resumption Tracker
//!
//! Records, per sub-loop of an epoch, whether it finished or where it
//! stopped. Sub-loops must be invoked in the same order on every run;
//! a mismatch is logged but not corrected.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tracing::{debug, warn};

/// One pass over a dataset within an epoch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubLoop {
    Train,
    TestNormal,
    TestSmoothed,
}

impl std::fmt::Display for SubLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SubLoop::Train => write!(f, "train"),
            SubLoop::TestNormal => write!(f, "test_normal"),
            SubLoop::TestSmoothed => write!(f, "test_smoothed"),
        }
    }
}

/// Persisted state of one sub-loop invocation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoopRecord {
    pub sub_loop: SubLoop,
    pub last_index: usize,
    pub completed: bool,
}

/// Per-epoch sub-loop completion history
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoopResumptionTracker {
    records: Vec<LoopRecord>,
    /// Working queue built on the first `decide` of a run, never persisted
    #[serde(skip)]
    pending: Option<VecDeque<usize>>,
}

impl LoopResumptionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starting index for `sub_loop`, or `None` if it already completed this epoch
    pub fn decide(&mut self, sub_loop: SubLoop) -> Option<usize> {
        let records = &self.records;
        let pending = self
            .pending
            .get_or_insert_with(|| (0..records.len()).collect());

        let Some(&head) = pending.front() else {
            return Some(0);
        };
        let record = &self.records[head];
        if record.sub_loop != sub_loop {
            warn!(
                "Resumption order mismatch: expected {}, history holds {} at position {}",
                sub_loop, record.sub_loop, head
            );
        }

        if record.completed {
            pending.pop_front();
            debug!("Skipping {}: already completed this epoch", sub_loop);
            None
        } else {
            debug!("Resuming {} at index {}", sub_loop, record.last_index);
            Some(record.last_index)
        }
    }

    /// Record how a sub-loop stopped
    pub fn imprint(&mut self, sub_loop: SubLoop, last_index: usize, completed: bool) {
        let resumed = self
            .pending
            .as_ref()
            .and_then(|pending| pending.front().copied())
            .filter(|&head| !self.records[head].completed);

        match resumed {
            Some(head) => {
                if let Some(pending) = self.pending.as_mut() {
                    pending.pop_front();
                }
                let record = &mut self.records[head];
                record.sub_loop = sub_loop;
                record.last_index = last_index;
                record.completed = completed;
            }
            None => self.records.push(LoopRecord {
                sub_loop,
                last_index,
                completed,
            }),
        }
    }

    /// Discard all history once an epoch fully completes
    pub fn clear(&mut self) {
        self.records.clear();
        self.pending = None;
    }

    pub fn records(&self) -> &[LoopRecord] {
        &self.records
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reload(tracker: &LoopResumptionTracker) -> LoopResumptionTracker {
        let json = serde_json::to_string(tracker).unwrap();
        serde_json::from_str(&json).unwrap()
    }

    #[test]
    fn test_fresh_tracker_starts_at_zero() {
        let mut tracker = LoopResumptionTracker::new();
        assert_eq!(tracker.decide(SubLoop::Train), Some(0));
        assert_eq!(tracker.decide(SubLoop::TestNormal), Some(0));
    }

    #[test]
    fn test_incomplete_resumes_at_last_index() {
        let mut tracker = LoopResumptionTracker::new();
        assert_eq!(tracker.decide(SubLoop::Train), Some(0));
        tracker.imprint(SubLoop::Train, 6, false);

        let mut resumed = reload(&tracker);
        assert_eq!(resumed.decide(SubLoop::Train), Some(6));
        resumed.imprint(SubLoop::Train, 10, true);
        assert_eq!(resumed.decide(SubLoop::TestNormal), Some(0));
        assert_eq!(resumed.records().len(), 2);
        assert!(resumed.records()[0].completed);
    }

    #[test]
    fn test_completed_loop_is_skipped_and_next_starts_fresh() {
        let mut tracker = LoopResumptionTracker::new();
        tracker.decide(SubLoop::Train);
        tracker.imprint(SubLoop::Train, 10, true);
        tracker.decide(SubLoop::TestNormal);
        tracker.imprint(SubLoop::TestNormal, 3, false);

        let mut resumed = reload(&tracker);
        assert_eq!(resumed.decide(SubLoop::Train), None);
        assert_eq!(resumed.decide(SubLoop::TestNormal), Some(3));
        resumed.imprint(SubLoop::TestNormal, 5, true);
        assert_eq!(resumed.decide(SubLoop::TestSmoothed), Some(0));
    }

    #[test]
    fn test_interrupted_twice_in_same_loop() {
        let mut tracker = LoopResumptionTracker::new();
        tracker.decide(SubLoop::Train);
        tracker.imprint(SubLoop::Train, 2, false);

        let mut second = reload(&tracker);
        assert_eq!(second.decide(SubLoop::Train), Some(2));
        second.imprint(SubLoop::Train, 7, false);
        assert_eq!(second.records().len(), 1);

        let mut third = reload(&second);
        assert_eq!(third.decide(SubLoop::Train), Some(7));
    }

    #[test]
    fn test_clear_restarts_every_loop() {
        let mut tracker = LoopResumptionTracker::new();
        tracker.decide(SubLoop::Train);
        tracker.imprint(SubLoop::Train, 10, true);
        tracker.clear();
        assert!(tracker.is_empty());
        assert_eq!(tracker.decide(SubLoop::Train), Some(0));
        assert_eq!(tracker.decide(SubLoop::TestNormal), Some(0));
        assert_eq!(tracker.decide(SubLoop::TestSmoothed), Some(0));
    }

    #[test]
    fn test_pending_queue_not_serialized() {
        let mut tracker = LoopResumptionTracker::new();
        tracker.decide(SubLoop::Train);
        tracker.imprint(SubLoop::Train, 4, false);
        let json = serde_json::to_value(&tracker).unwrap();
        assert!(json.get("pending").is_none());
        assert_eq!(json["records"][0]["sub_loop"], "train");
    }
}

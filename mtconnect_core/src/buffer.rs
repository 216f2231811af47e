// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The checkpointed ring buffer of observations.
//!
//! A power-of-two circular store assigns monotonically increasing sequence
//! numbers. One mutex (the *sequence lock*) covers the slots, the counters,
//! and the `latest`/`first`/periodic checkpoints; observations themselves are
//! immutable, so readers drop the lock before serializing. Periodic
//! checkpoints every `checkpoint_freq` sequences bound the cost of
//! current-at-sequence queries to a replay of at most `checkpoint_freq`
//! slots.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use crate::checkpoint::Checkpoint;
use crate::device_model::data_item::DataItem;
use crate::observation::Observation;
use crate::observer::ChangeObserver;

/// Result of a sample-range query, snapshotted under the sequence lock.
#[derive(Debug)]
pub struct RangeResult {
    /// The matching observations, in sequence order.
    pub observations: Vec<Arc<Observation>>,
    /// The first sequence *not* included; a continuation starts here.
    pub end_sequence: u64,
    /// True when the scan reached the newest observation.
    pub at_end: bool,
    /// Oldest retained sequence at snapshot time.
    pub first_sequence: u64,
    /// Next sequence to be assigned at snapshot time.
    pub next_sequence: u64,
}

struct Inner {
    slots: Box<[Option<Arc<Observation>>]>,
    next_seq: u64,
    latest: Checkpoint,
    first: Checkpoint,
    periodic: Vec<Checkpoint>,
}

impl Inner {
    fn first_seq(&self, capacity: u64) -> u64 {
        if self.next_seq > capacity {
            self.next_seq - capacity
        } else {
            1
        }
    }
}

/// Fixed-capacity circular store of observations indexed by sequence number.
pub struct ObservationBuffer {
    capacity: u64,
    mask: u64,
    checkpoint_freq: u64,
    inner: Mutex<Inner>,
}

impl ObservationBuffer {
    /// Create a buffer of capacity `2^size_exponent` with periodic
    /// checkpoints every `checkpoint_freq` slots.
    ///
    /// # Panics
    /// Panics if `size_exponent` does not fit in memory terms (`>= 32`) or
    /// `checkpoint_freq` is zero.
    #[must_use]
    pub fn new(size_exponent: u32, checkpoint_freq: u64) -> Self {
        assert!(size_exponent < 32, "buffer size exponent out of range");
        assert!(checkpoint_freq > 0, "checkpoint frequency must be nonzero");
        let capacity: u64 = 1 << size_exponent;
        let checkpoint_count = usize::try_from(capacity / checkpoint_freq + 1).unwrap();
        let slots = (0..capacity).map(|_| None).collect();
        Self {
            capacity,
            mask: capacity - 1,
            checkpoint_freq,
            inner: Mutex::new(Inner {
                slots,
                next_seq: 1,
                latest: Checkpoint::new(),
                first: Checkpoint::new(),
                periodic: vec![Checkpoint::new(); checkpoint_count],
            }),
        }
    }

    /// Number of slots.
    #[must_use]
    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    /// Oldest retained sequence.
    ///
    /// # Panics
    /// Panics if the sequence lock is poisoned.
    #[must_use]
    pub fn first_sequence(&self) -> u64 {
        let inner = self.inner.lock().unwrap();
        inner.first_seq(self.capacity)
    }

    /// Next sequence to be assigned.
    ///
    /// # Panics
    /// Panics if the sequence lock is poisoned.
    #[must_use]
    pub fn next_sequence(&self) -> u64 {
        self.inner.lock().unwrap().next_seq
    }

    /// `(first, next)` sequence bounds in one lock acquisition.
    ///
    /// # Panics
    /// Panics if the sequence lock is poisoned.
    #[must_use]
    pub fn sequence_bounds(&self) -> (u64, u64) {
        let inner = self.inner.lock().unwrap();
        (inner.first_seq(self.capacity), inner.next_seq)
    }

    /// Append a value for a data item, assigning the next sequence number.
    ///
    /// Updates the `latest` checkpoint, materializes the periodic checkpoint
    /// when the slot index crosses a checkpoint boundary, folds the
    /// observation about to be overwritten into the `first` checkpoint, and
    /// wakes observers subscribed to the data item. Reset-trigger stripping
    /// and unit conversion happen inside observation construction, so
    /// `value` is the wire value as received.
    ///
    /// # Panics
    /// Panics if the sequence lock is poisoned.
    pub fn append(&self, data_item: &Arc<DataItem>, value: &str, time: &str) -> u64 {
        let mut inner = self.inner.lock().unwrap();

        let seq = inner.next_seq;
        inner.next_seq += 1;
        let observation = Arc::new(Observation::new(data_item.clone(), seq, time, value));

        let index = (seq & self.mask) as usize;
        inner.slots[index] = Some(observation.clone());
        inner.latest.add(&observation);

        // Seed the first checkpoint with the very first observation.
        if seq == 1 {
            inner.first.add(&observation);
        }

        // Periodic checkpoint at every checkpoint_freq-th slot position.
        let position = seq & self.mask;
        if position % self.checkpoint_freq == 0 {
            let checkpoint_index = usize::try_from(position / self.checkpoint_freq).unwrap();
            let Inner {
                latest, periodic, ..
            } = &mut *inner;
            periodic[checkpoint_index].copy_from(latest);
        }

        // The slot of the *next* sequence still holds the observation that
        // the next append will overwrite; fold it into `first` so `first`
        // stays valid at the oldest retained sequence.
        let next_index = (inner.next_seq & self.mask) as usize;
        if let Some(oldest) = inner.slots[next_index].clone() {
            inner.first.add(&oldest);
        }

        drop(inner);
        data_item.signal_observers(seq);
        seq
    }

    /// O(1) fetch by sequence number; `None` outside `[first, next)`.
    ///
    /// # Panics
    /// Panics if the sequence lock is poisoned.
    #[must_use]
    pub fn get(&self, sequence: u64) -> Option<Arc<Observation>> {
        let inner = self.inner.lock().unwrap();
        if sequence < inner.first_seq(self.capacity) || sequence >= inner.next_seq {
            return None;
        }
        inner.slots[(sequence & self.mask) as usize].clone()
    }

    /// Snapshot of the latest observation per data item, optionally filtered.
    ///
    /// # Panics
    /// Panics if the sequence lock is poisoned.
    #[must_use]
    pub fn latest(&self, filter: Option<&HashSet<String>>) -> Vec<Arc<Observation>> {
        self.inner.lock().unwrap().latest.observations(filter)
    }

    /// The latest observation of one data item.
    ///
    /// # Panics
    /// Panics if the sequence lock is poisoned.
    #[must_use]
    pub fn latest_for(&self, data_item_id: &str) -> Option<Arc<Observation>> {
        self.inner
            .lock()
            .unwrap()
            .latest
            .get(data_item_id)
            .cloned()
    }

    /// For each filtered data item, the observation with the largest
    /// sequence `<= at`. `at` is clamped to the retained range.
    ///
    /// Replays forward from the nearest usable periodic checkpoint, falling
    /// back to the `first` checkpoint when the nearest one predates the
    /// oldest retained sequence.
    ///
    /// # Panics
    /// Panics if the sequence lock is poisoned.
    #[must_use]
    pub fn current_at(&self, filter: &HashSet<String>, at: u64) -> Vec<Arc<Observation>> {
        let inner = self.inner.lock().unwrap();
        if inner.next_seq == 1 {
            return Vec::new();
        }
        let first_seq = inner.first_seq(self.capacity);
        let last = inner.next_seq - 1;
        let at = at.clamp(first_seq, last);

        let position = at & self.mask;
        let checkpoint_index = position / self.checkpoint_freq;
        let closest = checkpoint_index * self.checkpoint_freq;
        // The sequence at which periodic[checkpoint_index] was last written.
        let checkpoint_seq = at - (position - closest);

        let (mut replay, start) = if checkpoint_seq >= 1 && checkpoint_seq >= first_seq {
            let base = &inner.periodic[usize::try_from(checkpoint_index).unwrap()];
            (base.filtered_copy(Some(filter)), checkpoint_seq + 1)
        } else {
            // `first` is inclusive of the oldest retained sequence.
            (inner.first.filtered_copy(Some(filter)), first_seq + 1)
        };

        for seq in start..=at {
            if let Some(observation) = &inner.slots[(seq & self.mask) as usize] {
                replay.add(observation);
            }
        }
        replay.observations(None)
    }

    /// Up to `count` observations whose data item is in `filter`, starting at
    /// `max(start, first)`. See [`RangeResult`] for the continuation fields.
    ///
    /// # Panics
    /// Panics if the sequence lock is poisoned.
    #[must_use]
    pub fn range(&self, filter: &HashSet<String>, start: u64, count: usize) -> RangeResult {
        self.range_with_reset(filter, start, count, None)
    }

    /// [`range`](Self::range), additionally resetting `observer` before the
    /// sequence lock is released so no append between the scan and the reset
    /// can be missed by a subsequent wait.
    ///
    /// # Panics
    /// Panics if the sequence lock is poisoned.
    #[must_use]
    pub fn range_with_reset(
        &self,
        filter: &HashSet<String>,
        start: u64,
        count: usize,
        observer: Option<&ChangeObserver>,
    ) -> RangeResult {
        let inner = self.inner.lock().unwrap();
        let first_seq = inner.first_seq(self.capacity);
        let next_seq = inner.next_seq;

        let mut observations = Vec::new();
        let mut seq = start.max(first_seq);
        while observations.len() < count && seq < next_seq {
            if let Some(observation) = &inner.slots[(seq & self.mask) as usize] {
                if filter.contains(observation.data_item().id()) {
                    observations.push(observation.clone());
                }
            }
            seq += 1;
        }

        if let Some(observer) = observer {
            observer.reset();
        }

        RangeResult {
            observations,
            end_sequence: seq,
            at_end: seq >= next_seq,
            first_sequence: first_seq,
            next_sequence: next_seq,
        }
    }

    /// The restart sequence for a streamer after a heartbeat wait: the
    /// observer's earliest signaled sequence, or the next sequence to be
    /// assigned when nothing arrived. Taken under the sequence lock so a
    /// signal between the wait timing out and this call is not lost.
    ///
    /// # Panics
    /// Panics if the sequence lock is poisoned.
    #[must_use]
    pub fn restart_sequence(&self, observer: &ChangeObserver) -> u64 {
        let inner = self.inner.lock().unwrap();
        observer.triggered_sequence().unwrap_or(inner.next_seq)
    }
}

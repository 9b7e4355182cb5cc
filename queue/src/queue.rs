//! Action Queue: a time-indexed, thread-safe FIFO of actions with merge
//! semantics (§4.1).
//!
//! Responsibilities:
//! - deliver one action per control tick to the actuator (`pop`)
//! - accept newly produced chunks from the inference loop (`merge`)
//! - expose the leftover-tail view the inference loop feeds into RTC guidance
//!   (`leftover_raw`)
//!
//! Non-responsibilities:
//! - deciding *when* to run inference (the inference loop does that)
//! - anything about the raw/postprocessed tensor contents (the `guidance` and
//!   `runtime` crates own that)
//!
//! Safety: every operation takes the internal lock for the duration of a
//! single, non-blocking critical section (§5 "no reentrancy" / §4.1 M5 —
//! observers never see a partial merge).

use std::collections::VecDeque;

use parking_lot::Mutex;
use tracing::{debug, instrument};

use crate::model::{Action, ActionIndex, Chunk, QueueEntry};

/// Thread-safe FIFO of actions with inference-latency-compensated merge
/// semantics. One actuator consumer pops; one inference producer merges
/// (§3 Lifecycles, §5 Shared resources).
pub struct ActionQueue {
    inner: Mutex<Inner>,
}

struct Inner {
    entries: VecDeque<QueueEntry>,
    /// Index of the last action actually returned by `pop`. `None` before
    /// the first successful pop, in which case `current_action_index` is 0.
    last_popped: Option<ActionIndex>,
}

impl Default for ActionQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl ActionQueue {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                entries: VecDeque::new(),
                last_popped: None,
            }),
        }
    }

    /// Current number of queued entries.
    pub fn size(&self) -> usize {
        self.inner.lock().entries.len()
    }

    /// The index the next `pop()` would return if the queue were non-empty
    /// at that index: `last_popped_index + 1`, `0` initially (§4.1).
    pub fn current_action_index(&self) -> ActionIndex {
        Self::next_index(self.inner.lock().last_popped)
    }

    fn next_index(last_popped: Option<ActionIndex>) -> ActionIndex {
        match last_popped {
            None => 0,
            Some(i) => i + 1,
        }
    }

    /// Pops the lowest-indexed postprocessed action and advances the
    /// actuator index. Non-blocking; returns `None` if empty (§4.1, §4.5).
    #[instrument(skip(self), target = "queue")]
    pub fn pop(&self) -> Option<Action> {
        let mut inner = self.inner.lock();
        let entry = inner.entries.pop_front()?;
        inner.last_popped = Some(entry.index);
        debug!(index = entry.index, "popped action");
        Some(entry.postprocessed)
    }

    /// Atomically reads `(current_action_index(), leftover_raw())` under a
    /// single critical section, as required by the inference loop's merge
    /// alignment (§4.6 step 2, §5 "snapshot ... must be taken atomically").
    #[instrument(skip(self), target = "queue")]
    pub fn snapshot_for_inference(&self) -> (ActionIndex, Vec<Action>) {
        let inner = self.inner.lock();
        let i_before = Self::next_index(inner.last_popped);
        let tail = inner.entries.iter().map(|e| e.raw.clone()).collect();
        (i_before, tail)
    }

    /// Raw-form sequence of all currently-queued entries, in index order —
    /// the "leftover tail" the RTC guidance step consumes as the previous
    /// chunk's unexecuted prefix (§3, §4.2). Safe to call concurrently with
    /// `pop()`.
    #[instrument(skip(self), target = "queue")]
    pub fn leftover_raw(&self) -> Vec<Action> {
        self.inner
            .lock()
            .entries
            .iter()
            .map(|e| e.raw.clone())
            .collect()
    }

    /// Installs a newly produced chunk, discarding the portion consumed by
    /// inference latency and any portion the actuator has since outrun, then
    /// appending the surviving actions starting one past the last preserved
    /// index (M1-M5 in §4.1).
    ///
    /// `inference_delay_ticks` is `d`; `i_before` is the actuator index
    /// snapshotted by the caller immediately before starting inference.
    #[instrument(skip(self, raw_chunk, postprocessed_chunk), target = "queue", fields(d = inference_delay_ticks, i_before, incoming_len = raw_chunk.len()))]
    pub fn merge(
        &self,
        raw_chunk: Chunk,
        postprocessed_chunk: Chunk,
        inference_delay_ticks: u64,
        i_before: ActionIndex,
    ) {
        let mut inner = self.inner.lock();

        // M1: the incoming chunk is anchored at i_before + d; its first d
        // actions are consumed by inference latency.
        // M2: if the actuator has meanwhile outrun that estimate, discard
        // the extra leading actions too.
        let i_now = Self::next_index(inner.last_popped);
        let anchor = i_before + inference_delay_ticks;
        let i_new_first = anchor.max(i_now);
        let total_leading_drop = (i_new_first - i_before) as usize;

        let raw_iter = raw_chunk.0.into_iter().skip(total_leading_drop);
        let post_iter = postprocessed_chunk.0.into_iter().skip(total_leading_drop);

        // M3: drop every queued entry at or beyond the new anchor.
        inner.entries.retain(|e| e.index < i_new_first);

        // M4: append survivors with consecutive indices starting at i_new_first.
        let mut next_idx = i_new_first;
        for (raw, post) in raw_iter.zip(post_iter) {
            inner.entries.push_back(QueueEntry {
                index: next_idx,
                postprocessed: post,
                raw,
            });
            next_idx += 1;
        }

        debug!(
            i_new_first,
            surviving = inner.entries.len(),
            "merged chunk into queue"
        );
    }
}

//! Per-client request ordering.
//!
//! Requests of one client carry increasing sequence numbers but may reach
//! the server, and be picked up by workers, in any order. A request whose
//! number is the next expected one runs immediately; a request from the
//! future parks on its own condition variable until its predecessor
//! finishes. Completion wakes exactly the request that became admissible.
//!
//! A parked request that times out assumes its predecessor is lost and
//! bridges the gap, but only when it is the oldest request still waiting
//! and no older request is running. A slow predecessor is not a lost one.
//!
//! Duplicates and numbers already skipped run at once but never hand the
//! turn on.

use parking_lot::{Condvar, Mutex};
use rjit_utils::Stopwatch;
use std::collections::{BTreeMap, BTreeSet};
use std::ops::Range;
use std::sync::Arc;
use std::time::Duration;

/// The first sequence number a client issues
pub const FIRST_SEQ_NO: u32 = 1;

/// How a request got past the sequencer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    /// It was the expected request
    InOrder,
    /// It waited for its predecessor to finish
    Parked { waited: Duration },
    /// The expected number had already moved past it, either because a gap
    /// was bridged before it arrived or because it duplicates a number
    Late { expected: u32 },
    /// It gave up waiting and skipped the numbers in `skipped`
    GapBridged { skipped: Range<u32>, waited: Duration },
}

impl Admission {
    pub fn waited(&self) -> Duration {
        match self {
            Admission::Parked { waited } | Admission::GapBridged { waited, .. } => *waited,
            Admission::InOrder | Admission::Late { .. } => Duration::ZERO,
        }
    }

    pub fn bridged_gap(&self) -> bool {
        matches!(self, Admission::GapBridged { .. })
    }
}

#[derive(Debug)]
struct SequencerState {
    expected: u32,
    max_received: u32,
    /// Parked requests by sequence number
    waiting: BTreeMap<u32, Arc<Condvar>>,
    /// Admitted requests that have not completed yet
    running: BTreeSet<u32>,
    /// Requests admitted behind or beside the expected number, by count.
    /// Their completion hands the turn to nobody.
    late: BTreeMap<u32, usize>,
}

impl SequencerState {
    /// Wake every parked request the expected number has reached
    fn wake_admissible(&mut self) {
        loop {
            let Some((&seq_no, _)) = self.waiting.first_key_value() else {
                return;
            };
            if seq_no > self.expected {
                return;
            }
            if let Some(cv) = self.waiting.remove(&seq_no) {
                cv.notify_one();
            }
        }
    }

    fn older_request_alive(&self, seq_no: u32) -> bool {
        self.running.first().is_some_and(|&running| running < seq_no)
            || self
                .waiting
                .first_key_value()
                .is_some_and(|(&waiting, _)| waiting < seq_no)
    }
}

#[derive(Debug)]
pub struct Sequencer {
    state: Mutex<SequencerState>,
    wait_timeout: Duration,
}

impl Sequencer {
    pub fn new(wait_timeout: Duration) -> Self {
        Self::starting_at(FIRST_SEQ_NO, wait_timeout)
    }

    pub fn starting_at(expected: u32, wait_timeout: Duration) -> Self {
        Self {
            state: Mutex::new(SequencerState {
                expected,
                max_received: expected.saturating_sub(1),
                waiting: BTreeMap::new(),
                running: BTreeSet::new(),
                late: BTreeMap::new(),
            }),
            wait_timeout,
        }
    }

    /// Block until `seq_no` may run. Every call admits its request exactly
    /// once; the caller must pair it with [`Sequencer::complete`].
    pub fn admit(&self, seq_no: u32) -> Admission {
        let mut state = self.state.lock();
        state.max_received = state.max_received.max(seq_no);

        let duplicate = state.running.contains(&seq_no) || state.waiting.contains_key(&seq_no);
        if seq_no == state.expected && !duplicate {
            state.running.insert(seq_no);
            return Admission::InOrder;
        }
        if seq_no < state.expected || duplicate {
            let expected = state.expected;
            *state.late.entry(seq_no).or_default() += 1;
            return Admission::Late { expected };
        }

        let cv = Arc::new(Condvar::new());
        state.waiting.insert(seq_no, Arc::clone(&cv));
        let watch = Stopwatch::start_new();
        let mut round = Stopwatch::start_new();

        loop {
            let timed_out = cv
                .wait_for(&mut state, round.remaining(self.wait_timeout))
                .timed_out();

            if state.expected >= seq_no {
                state.waiting.remove(&seq_no);
                state.running.insert(seq_no);
                return Admission::Parked {
                    waited: watch.elapsed(),
                };
            }

            if timed_out || round.remaining(self.wait_timeout).is_zero() {
                state.waiting.remove(&seq_no);
                if !state.older_request_alive(seq_no) {
                    let skipped = state.expected..seq_no;
                    state.expected = seq_no;
                    state.running.insert(seq_no);
                    return Admission::GapBridged {
                        skipped,
                        waited: watch.elapsed(),
                    };
                }
                // An older request will move things along; wait another round.
                state.waiting.insert(seq_no, Arc::clone(&cv));
                round = Stopwatch::start_new();
            }
        }
    }

    /// Mark `seq_no` finished and hand the turn to its successor. Only the
    /// last of several admissions of one number hands the turn on.
    pub fn complete(&self, seq_no: u32) {
        let mut state = self.state.lock();
        if let Some(count) = state.late.get_mut(&seq_no) {
            *count -= 1;
            if *count == 0 {
                state.late.remove(&seq_no);
            }
            return;
        }
        state.running.remove(&seq_no);
        let next = seq_no.saturating_add(1);
        if next > state.expected {
            state.expected = next;
        }
        state.wake_admissible();
    }

    pub fn expected_seq_no(&self) -> u32 {
        self.state.lock().expected
    }

    /// Largest sequence number ever received, for diagnostics
    pub fn max_received_seq_no(&self) -> u32 {
        self.state.lock().max_received
    }

    pub fn waiting_count(&self) -> usize {
        self.state.lock().waiting.len()
    }

    pub fn wait_timeout(&self) -> Duration {
        self.wait_timeout
    }
}

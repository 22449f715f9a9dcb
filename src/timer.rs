//! MAC Timer API
//!
//! Provides the monotonic clock used by the MAC and the table of protocol
//! timers (inter-frame spaces, backoff, NAV and reply timeouts) that drive it.
//
// wlan-mac, IEEE 802.11 DCF / EDCA MAC
// SPDX-License-Identifier: MPL-2.0

use heapless::Vec;
use log::{error, trace};

use crate::Ts;
use crate::mac::config::AccessCategory;

/// Timer trait provides mechanisms for accessing monotonic times
/// to assist with procotol implementations.
///
/// All methods are monotonic and relative to the same unknown epoc
pub trait Timer {
    /// Returns the number of millisecond ticks since some unknown epoc
    fn ticks_ms(&self) -> u64;

    /// Returns the number of microsecond ticks since some unknown epoc
    fn ticks_us(&self) -> u64;
}

/// Identifies a protocol timer and the component that owns it.
///
/// Variants are ordered by priority, when two timers expire at the same
/// instant the greater id is handled first.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TimerId {
    /// Virtual carrier sense expiry
    Nav,
    /// Reply timeout for the frame exchange of an access category
    ReplyTimeout(AccessCategory),
    /// Inter-frame space for a contention channel
    Ifs(AccessCategory),
    /// Extended inter-frame space for a contention channel
    Eifs(AccessCategory),
    /// Backoff countdown for a contention channel
    Backoff(AccessCategory),
    /// Inter-frame space ahead of an immediate transmission
    ImmediateIfs,
}

/// Maximum number of concurrently scheduled timers
/// (one per [`TimerId`], with headroom)
pub const MAX_TIMERS: usize = 24;

/// Table of scheduled protocol timers.
///
/// Each [`TimerId`] is scheduled at most once, scheduling an id that is
/// already pending moves its deadline. Cancelling a timer that is not
/// scheduled is a no-op.
#[derive(Clone, Debug, PartialEq)]
pub struct Timers {
    pending: Vec<(Ts, TimerId), MAX_TIMERS>,
}

impl Default for Timers {
    fn default() -> Self {
        Self::new()
    }
}

impl Timers {
    pub fn new() -> Self {
        Self {
            pending: Vec::new(),
        }
    }

    /// Schedule (or re-schedule) a timer to expire at the provided time
    pub fn schedule_at(&mut self, at: Ts, id: TimerId) {
        trace!("Schedule {:?} at {} us", id, at);

        if let Some(entry) = self.pending.iter_mut().find(|(_, i)| *i == id) {
            entry.0 = at;
            return;
        }

        if self.pending.push((at, id)).is_err() {
            error!("Timer table full, dropping {:?}", id);
        }
    }

    /// Cancel a timer, returns whether the timer was pending
    pub fn cancel(&mut self, id: TimerId) -> bool {
        match self.pending.iter().position(|(_, i)| *i == id) {
            Some(idx) => {
                trace!("Cancel {:?}", id);
                self.pending.swap_remove(idx);
                true
            },
            None => false,
        }
    }

    /// Check whether a timer is currently scheduled
    pub fn is_scheduled(&self, id: TimerId) -> bool {
        self.deadline(id).is_some()
    }

    /// Fetch the deadline for a scheduled timer
    pub fn deadline(&self, id: TimerId) -> Option<Ts> {
        self.pending.iter().find(|(_, i)| *i == id).map(|(at, _)| *at)
    }

    /// Fetch the earliest scheduled deadline
    pub fn next_deadline(&self) -> Option<Ts> {
        self.pending.iter().map(|(at, _)| *at).min()
    }

    /// Remove and return the next timer that has expired by `now`,
    /// along with its deadline
    pub fn pop_expired(&mut self, now: Ts) -> Option<(Ts, TimerId)> {
        let idx = self.pending.iter()
            .enumerate()
            .filter(|(_, (at, _))| *at <= now)
            .min_by(|(_, a), (_, b)| a.0.cmp(&b.0).then(b.1.cmp(&a.1)))
            .map(|(idx, _)| idx)?;

        Some(self.pending.swap_remove(idx))
    }

    /// Number of scheduled timers
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Cancel every scheduled timer
    pub fn clear(&mut self) {
        self.pending.clear();
    }
}

#[cfg(any(test, feature="mocks"))]
pub mod mock {
    use std::sync::{Arc, Mutex};

    use crate::Ts;

    /// Mock timer implementation to assist with testing,
    /// clones share the same underlying clock
    #[derive(Clone, Debug)]
    pub struct MockTimer (Arc<Mutex<u64>>);

    impl Default for MockTimer {
        fn default() -> Self {
            Self::new()
        }
    }

    impl MockTimer {
        pub fn new() -> Self {
            Self(Arc::new(Mutex::new(0)))
        }

        pub fn set_ms(&mut self, val: u32) {
            *self.0.lock().unwrap() = val as u64 * 1000;
        }

        pub fn set_us(&mut self, val: Ts) {
            *self.0.lock().unwrap() = val;
        }

        pub fn advance_us(&mut self, val: Ts) {
            let mut v  = self.0.lock().unwrap();
            *v += val;
        }

        pub fn val(&self) -> Ts {
            *self.0.lock().unwrap()
        }
    }

    impl super::Timer for MockTimer {
        fn ticks_ms(&self) -> u64 {
            let v = self.0.lock().unwrap();
            return *v / 1000
        }

        fn ticks_us(&self) -> u64 {
            let v = self.0.lock().unwrap();
            return *v
        }
    }
}

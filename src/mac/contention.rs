//! Contention channel
//!
//! CSMA/CA backoff state machine for a single access category. Each channel
//! waits for the medium to become free, waits out its inter-frame space,
//! counts down a random number of idle slots and then requests permission
//! to transmit from the [`TransmitCoordinator`](super::tx::TransmitCoordinator).
//
// wlan-mac, IEEE 802.11 DCF / EDCA MAC
// SPDX-License-Identifier: MPL-2.0

use log::{debug, trace};
use rand_core::RngCore;

use crate::Ts;
use crate::error::ProtocolError;
use crate::frame::Frame;
use crate::timer::{TimerId, Timers};
use super::config::AccessCategory;

/// Contention channel states
#[derive(Copy, Clone, Debug, PartialEq, Eq, strum::Display)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ContentionState {
    /// No pending request
    Idle,
    /// Waiting for the medium to become free
    Defer,
    /// Waiting out the IFS (and EIFS if flagged)
    WaitIfs,
    /// Counting down backoff slots
    Backoff,
    /// Frame handed to the radio
    Transmit,
}

/// Parameters for a single transmission attempt
#[derive(Copy, Clone, Debug, PartialEq, Default)]
pub struct ContentionParams {
    pub ifs: Ts,
    pub eifs: Ts,
    pub cw_min: u16,
    pub cw_max: u16,
    pub slot_time: Ts,
    pub retry_count: u8,
}

impl ContentionParams {
    /// Contention window for this attempt
    pub fn cw(&self) -> u16 {
        contention_window(self.cw_min, self.cw_max, self.retry_count)
    }
}

/// Compute the contention window for a retry count,
/// `min(cw_max, (cw_min + 1) * 2^retry_count - 1)`
pub fn contention_window(cw_min: u16, cw_max: u16, retry_count: u8) -> u16 {
    let shift = retry_count.min(16) as u32;
    let cw = ((cw_min as u64 + 1) << shift) - 1;
    cw.min(cw_max as u64) as u16
}

/// Draw a uniform backoff count in `0..=cw`.
///
/// Raw values past the last whole multiple of `cw + 1` are redrawn so
/// every count is equally likely.
pub fn draw_slots<G: RngCore>(rng: &mut G, cw: u16) -> u32 {
    let range = cw as u64 + 1;
    let zone = (1u64 << 32) - (1u64 << 32) % range;

    loop {
        let v = rng.next_u32() as u64;
        if v < zone {
            return (v % range) as u32;
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ContentionChannel {
    ac: AccessCategory,
    state: ContentionState,

    frame: Option<Frame>,
    params: ContentionParams,

    backoff_slots: u32,
    backoff_started: Ts,

    ifs_pending: bool,
    eifs_pending: bool,
    use_eifs: bool,
}

impl ContentionChannel {
    pub fn new(ac: AccessCategory) -> Self {
        Self {
            ac,
            state: ContentionState::Idle,
            frame: None,
            params: ContentionParams::default(),
            backoff_slots: 0,
            backoff_started: 0,
            ifs_pending: false,
            eifs_pending: false,
            use_eifs: false,
        }
    }

    pub fn ac(&self) -> AccessCategory {
        self.ac
    }

    pub fn state(&self) -> ContentionState {
        self.state
    }

    /// Remaining backoff slots (as of the last freeze or draw)
    pub fn backoff_slots(&self) -> u32 {
        self.backoff_slots
    }

    pub fn frame(&self) -> Option<&Frame> {
        self.frame.as_ref()
    }

    pub fn is_idle(&self) -> bool {
        self.state == ContentionState::Idle
    }

    pub fn is_transmitting(&self) -> bool {
        self.state == ContentionState::Transmit
    }

    /// Whether the next wait will also arm the EIFS timer
    pub fn eifs_armed(&self) -> bool {
        self.use_eifs
    }

    /// Request contention for a frame.
    ///
    /// Draws the backoff count for this attempt and starts waiting for the
    /// medium, the channel must be idle.
    pub fn request<G: RngCore>(&mut self, frame: Frame, params: ContentionParams, rng: &mut G, free: bool, now: Ts, timers: &mut Timers) -> Result<(), ProtocolError> {
        if self.state != ContentionState::Idle {
            return Err(ProtocolError::ChannelBusy(self.ac));
        }

        let cw = params.cw();
        self.backoff_slots = draw_slots(rng, cw);
        self.params = params;
        self.frame = Some(frame);

        debug!("{} contention request, cw: {} slots: {}", self.ac, cw, self.backoff_slots);

        if free {
            self.enter_wait_ifs(now, timers);
        } else {
            self.set_state(ContentionState::Defer);
        }

        Ok(())
    }

    /// Handle a medium free / busy transition
    pub fn medium_changed(&mut self, free: bool, now: Ts, timers: &mut Timers) {
        match (self.state, free) {
            (ContentionState::Defer, true) => {
                self.enter_wait_ifs(now, timers);
            },
            (ContentionState::WaitIfs, false) => {
                timers.cancel(TimerId::Ifs(self.ac));
                timers.cancel(TimerId::Eifs(self.ac));
                self.ifs_pending = false;
                self.eifs_pending = false;

                self.set_state(ContentionState::Defer);
            },
            (ContentionState::Backoff, false) => {
                // Freeze the countdown at the remaining whole slots
                let elapsed = now.saturating_sub(self.backoff_started) / self.params.slot_time.max(1);
                self.backoff_slots = self.backoff_slots.saturating_sub(elapsed as u32);
                timers.cancel(TimerId::Backoff(self.ac));

                trace!("{} backoff frozen with {} slots remaining", self.ac, self.backoff_slots);

                self.set_state(ContentionState::Defer);
            },
            // Our own transmission holds the medium busy
            (ContentionState::Transmit, _) => (),
            _ => (),
        }
    }

    /// Handle expiry of one of this channel's timers,
    /// returns true when the backoff has completed and the channel is ready to transmit
    pub fn timer_fired(&mut self, id: TimerId, now: Ts, timers: &mut Timers) -> bool {
        match (self.state, id) {
            (ContentionState::WaitIfs, TimerId::Ifs(_)) => {
                self.ifs_pending = false;
                if !self.eifs_pending {
                    self.enter_backoff(now, timers);
                }
                false
            },
            (ContentionState::WaitIfs, TimerId::Eifs(_)) => {
                self.eifs_pending = false;
                if !self.ifs_pending {
                    self.enter_backoff(now, timers);
                }
                false
            },
            (ContentionState::Backoff, TimerId::Backoff(_)) => {
                self.backoff_slots = 0;
                true
            },
            _ => {
                trace!("{} ignoring stale {:?} in state {}", self.ac, id, self.state);
                false
            },
        }
    }

    /// Move to transmit following a granted backoff, returning the frame to send
    pub fn start_transmit(&mut self) -> Option<&Frame> {
        if self.state != ContentionState::Backoff {
            return None;
        }

        self.set_state(ContentionState::Transmit);
        self.frame.as_ref()
    }

    /// Abandon the attempt following an internal collision,
    /// returning the frame to the owner
    pub fn collided(&mut self) -> Option<Frame> {
        debug!("{} internal collision", self.ac);

        self.set_state(ContentionState::Idle);
        self.frame.take()
    }

    /// Handle the end of a radio transmission, returns true if this
    /// channel was the one transmitting
    pub fn transmission_finished(&mut self) -> bool {
        if self.state != ContentionState::Transmit {
            return false;
        }

        self.frame = None;
        self.set_state(ContentionState::Idle);
        true
    }

    /// Note a received frame, a corrupted reception arms the EIFS for the next wait
    pub fn frame_received(&mut self, fcs_ok: bool) {
        self.use_eifs = !fcs_ok;
    }

    /// Cancel any pending attempt and all timers
    pub fn abort(&mut self, timers: &mut Timers) -> Option<Frame> {
        timers.cancel(TimerId::Ifs(self.ac));
        timers.cancel(TimerId::Eifs(self.ac));
        timers.cancel(TimerId::Backoff(self.ac));

        self.ifs_pending = false;
        self.eifs_pending = false;
        self.backoff_slots = 0;

        self.set_state(ContentionState::Idle);
        self.frame.take()
    }

    fn enter_wait_ifs(&mut self, now: Ts, timers: &mut Timers) {
        self.set_state(ContentionState::WaitIfs);

        self.ifs_pending = true;
        timers.schedule_at(now + self.params.ifs, TimerId::Ifs(self.ac));

        if self.use_eifs {
            self.eifs_pending = true;
            timers.schedule_at(now + self.params.eifs, TimerId::Eifs(self.ac));
        }
    }

    fn enter_backoff(&mut self, now: Ts, timers: &mut Timers) {
        self.set_state(ContentionState::Backoff);

        self.backoff_started = now;
        let at = now + self.backoff_slots as Ts * self.params.slot_time;
        timers.schedule_at(at, TimerId::Backoff(self.ac));
    }

    fn set_state(&mut self, state: ContentionState) {
        if self.state != state {
            trace!("{} contention {} -> {}", self.ac, self.state, state);
        }
        self.state = state;
    }
}

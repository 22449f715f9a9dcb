//! Medium state
//!
//! Combines physical carrier sense (reception / transmission state reported
//! by the PHY) with virtual carrier sense (NAV) to decide whether the medium
//! is free.
//
// wlan-mac, IEEE 802.11 DCF / EDCA MAC
// SPDX-License-Identifier: MPL-2.0

use log::{debug, trace};

use crate::Ts;
use crate::timer::{TimerId, Timers};

/// PHY reception state
#[derive(Copy, Clone, Debug, PartialEq, Eq, strum::Display)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ReceptionState {
    Undefined,
    Idle,
    Busy,
    Receiving,
}

/// PHY transmission state
#[derive(Copy, Clone, Debug, PartialEq, Eq, strum::Display)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TransmissionState {
    Undefined,
    Idle,
    Transmitting,
}

#[derive(Clone, Debug, PartialEq)]
pub struct MediumState {
    reception: ReceptionState,
    transmission: TransmissionState,
    nav: Option<Ts>,
    free: bool,
}

impl Default for MediumState {
    fn default() -> Self {
        Self::new()
    }
}

impl MediumState {
    pub fn new() -> Self {
        Self {
            reception: ReceptionState::Idle,
            transmission: TransmissionState::Undefined,
            nav: None,
            free: true,
        }
    }

    /// Whether the medium is free (physically idle and no NAV pending)
    pub fn is_free(&self) -> bool {
        self.free
    }

    pub fn reception(&self) -> ReceptionState {
        self.reception
    }

    pub fn transmission(&self) -> TransmissionState {
        self.transmission
    }

    /// Current NAV deadline, if pending
    pub fn nav(&self) -> Option<Ts> {
        self.nav
    }

    /// Update the reception state, returns the new free state on a change
    pub fn set_reception(&mut self, state: ReceptionState) -> Option<bool> {
        trace!("Reception state: {}", state);
        self.reception = state;
        self.recompute()
    }

    /// Update the transmission state, returns the new free state on a change
    pub fn set_transmission(&mut self, state: TransmissionState) -> Option<bool> {
        trace!("Transmission state: {}", state);
        self.transmission = state;
        self.recompute()
    }

    /// Apply the duration of an overheard frame to the NAV.
    ///
    /// The NAV is only ever extended, an update ending before the pending
    /// deadline is ignored.
    pub fn update_nav(&mut self, now: Ts, duration: Ts, timers: &mut Timers) -> Option<bool> {
        if duration == 0 {
            return None;
        }

        let candidate = now + duration;

        if let Some(deadline) = self.nav {
            if deadline >= candidate {
                return None;
            }
        }

        debug!("NAV set until {} us", candidate);

        self.nav = Some(candidate);
        timers.schedule_at(candidate, TimerId::Nav);

        self.recompute()
    }

    /// Handle expiry of the NAV timer
    pub fn nav_expired(&mut self) -> Option<bool> {
        trace!("NAV expired");
        self.nav = None;
        self.recompute()
    }

    /// Clear the NAV (eg. on reset)
    pub fn clear_nav(&mut self, timers: &mut Timers) -> Option<bool> {
        timers.cancel(TimerId::Nav);
        self.nav = None;
        self.recompute()
    }

    fn recompute(&mut self) -> Option<bool> {
        let free = self.reception == ReceptionState::Idle
            && self.transmission == TransmissionState::Undefined
            && self.nav.is_none();

        if free == self.free {
            return None;
        }

        debug!("Medium {}", if free { "free" } else { "busy" });

        self.free = free;
        Some(free)
    }
}

//! Immediate channel
//!
//! Sends a single frame after a fixed inter-frame space without contention,
//! used for responses (CTS, ACK) and for the data frame following a CTS.
//
// wlan-mac, IEEE 802.11 DCF / EDCA MAC
// SPDX-License-Identifier: MPL-2.0

use log::debug;

use crate::Ts;
use crate::error::ProtocolError;
use crate::frame::Frame;
use crate::timer::{TimerId, Timers};
use super::config::AccessCategory;

#[derive(Clone, Debug, PartialEq, Default)]
pub struct ImmediateChannel {
    frame: Option<Frame>,
    owner: Option<AccessCategory>,
    transmitting: bool,
}

impl ImmediateChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a frame is waiting for its IFS or being transmitted
    pub fn is_busy(&self) -> bool {
        self.frame.is_some()
    }

    pub fn is_transmitting(&self) -> bool {
        self.transmitting
    }

    /// Frame exchange owning the outstanding transmission, `None` for
    /// responses generated by the MAC itself
    pub fn owner(&self) -> Option<AccessCategory> {
        self.owner
    }

    /// Schedule a frame for transmission after `ifs`
    pub fn transmit(&mut self, frame: Frame, ifs: Ts, owner: Option<AccessCategory>, now: Ts, timers: &mut Timers) -> Result<(), ProtocolError> {
        if self.is_busy() || timers.is_scheduled(TimerId::ImmediateIfs) {
            return Err(ProtocolError::ImmediateBusy);
        }

        debug!("Immediate {} to {} in {} us", frame.kind, frame.receiver, ifs);

        self.frame = Some(frame);
        self.owner = owner;
        timers.schedule_at(now + ifs, TimerId::ImmediateIfs);

        Ok(())
    }

    /// Handle IFS expiry, returning the frame to hand to the radio
    pub fn ifs_expired(&mut self) -> Option<&Frame> {
        if self.frame.is_none() || self.transmitting {
            return None;
        }

        self.transmitting = true;
        self.frame.as_ref()
    }

    /// Handle the end of a radio transmission.
    ///
    /// Returns `Some(owner)` when the immediate channel was transmitting.
    pub fn transmission_finished(&mut self) -> Option<Option<AccessCategory>> {
        if !self.transmitting {
            return None;
        }

        self.transmitting = false;
        self.frame = None;
        Some(self.owner.take())
    }

    /// Drop the outstanding frame of a frame exchange.
    ///
    /// A frame already handed to the radio still completes, it is then
    /// reported without an owner.
    pub fn abort_owned(&mut self, ac: AccessCategory, timers: &mut Timers) {
        if self.owner != Some(ac) {
            return;
        }

        if self.transmitting {
            debug!("Immediate frame for {} already on air, releasing owner", ac);
            self.owner = None;
        } else {
            self.abort(timers);
        }
    }

    /// Cancel any outstanding transmission
    pub fn abort(&mut self, timers: &mut Timers) {
        timers.cancel(TimerId::ImmediateIfs);
        self.frame = None;
        self.owner = None;
        self.transmitting = false;
    }
}

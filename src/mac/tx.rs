//! Transmit coordinator
//!
//! Owns the per access category contention channels and the immediate
//! channel, fans out medium and reception events to them and arbitrates
//! access to the single radio.
//
// wlan-mac, IEEE 802.11 DCF / EDCA MAC
// SPDX-License-Identifier: MPL-2.0

use core::fmt::Debug;

use log::{debug, error, warn};
use rand_core::RngCore;

use crate::Ts;
use crate::error::{CoreError, ProtocolError};
use crate::frame::{Frame, MAX_FRAME_LEN};
use crate::timer::{TimerId, Timers};
use super::config::{AccessCategory, NUM_ACCESS_CATEGORIES};
use super::contention::{ContentionChannel, ContentionParams};
use super::immediate::ImmediateChannel;

/// Identifies the channel a transmission was made on
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TxIndex {
    Contention(AccessCategory),
    Immediate,
}

/// Events reported by the coordinator to the owners of transmissions
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TxEvent {
    /// A transmission finished, `owner` identifies the frame exchange
    /// that requested it (if any)
    Complete { index: TxIndex, owner: Option<AccessCategory> },

    /// The backoff for this access category completed while the radio
    /// was in use by another channel of this station
    InternalCollision(AccessCategory),
}

#[derive(Clone, Debug, PartialEq)]
pub struct TransmitCoordinator {
    channels: [ContentionChannel; NUM_ACCESS_CATEGORIES],
    immediate: ImmediateChannel,
}

impl Default for TransmitCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl TransmitCoordinator {
    pub fn new() -> Self {
        Self {
            channels: [
                ContentionChannel::new(AccessCategory::Background),
                ContentionChannel::new(AccessCategory::BestEffort),
                ContentionChannel::new(AccessCategory::Video),
                ContentionChannel::new(AccessCategory::Voice),
            ],
            immediate: ImmediateChannel::new(),
        }
    }

    pub fn channel(&self, ac: AccessCategory) -> &ContentionChannel {
        &self.channels[ac.index()]
    }

    pub fn immediate(&self) -> &ImmediateChannel {
        &self.immediate
    }

    /// Whether any channel currently holds the radio
    pub fn is_transmitting(&self) -> bool {
        self.immediate.is_transmitting() || self.channels.iter().any(|c| c.is_transmitting())
    }

    /// Route a contention transmission to the channel for its access category
    pub fn transmit_contention<G: RngCore>(&mut self, ac: AccessCategory, frame: Frame, params: ContentionParams, rng: &mut G, free: bool, now: Ts, timers: &mut Timers) -> Result<(), ProtocolError> {
        self.channels[ac.index()].request(frame, params, rng, free, now, timers)
    }

    /// Route a transmission to the immediate channel
    pub fn transmit_immediate(&mut self, frame: Frame, ifs: Ts, owner: Option<AccessCategory>, now: Ts, timers: &mut Timers) -> Result<(), ProtocolError> {
        self.immediate.transmit(frame, ifs, owner, now, timers)
    }

    /// Broadcast a medium free / busy transition to every contention channel
    pub fn medium_changed(&mut self, free: bool, now: Ts, timers: &mut Timers) {
        for c in self.channels.iter_mut() {
            c.medium_changed(free, now, timers);
        }
    }

    /// Broadcast a lower layer reception to every contention channel
    pub fn frame_received(&mut self, fcs_ok: bool) {
        for c in self.channels.iter_mut() {
            c.frame_received(fcs_ok);
        }
    }

    /// Handle expiry of a channel timer, starting a transmission on the radio
    /// when a channel is granted access
    pub fn timer_fired<R, E>(&mut self, id: TimerId, now: Ts, timers: &mut Timers, radio: &mut R) -> Result<Option<TxEvent>, CoreError<E>>
    where
        R: radio::Transmit<Error=E>,
        E: Debug,
    {
        let ac = match id {
            TimerId::ImmediateIfs => {
                if let Some(frame) = self.immediate.ifs_expired() {
                    if self.channels.iter().any(|c| c.is_transmitting()) {
                        warn!("Immediate transmission while radio busy");
                    }
                    if let Err(e) = send_frame(radio, frame) {
                        error!("Immediate transmission failed");
                        self.immediate.abort(timers);
                        return Err(e);
                    }
                }
                return Ok(None);
            },
            TimerId::Ifs(ac) | TimerId::Eifs(ac) | TimerId::Backoff(ac) => ac,
            _ => return Ok(None),
        };

        if !self.channels[ac.index()].timer_fired(id, now, timers) {
            return Ok(None);
        }

        // Only one transmission may be in progress per station
        if self.is_transmitting() || self.immediate.is_busy() {
            self.channels[ac.index()].collided();
            return Ok(Some(TxEvent::InternalCollision(ac)));
        }

        if let Some(frame) = self.channels[ac.index()].start_transmit() {
            debug!("{} granted, transmitting {} to {}", ac, frame.kind, frame.receiver);
            if let Err(e) = send_frame(radio, frame) {
                error!("{} transmission failed", ac);
                self.channels[ac.index()].abort(timers);
                return Err(e);
            }
        }

        Ok(None)
    }

    /// Handle the end of a radio transmission.
    ///
    /// The immediate channel is notified first, then each contention channel,
    /// exactly one of these is expected to be transmitting.
    pub fn transmission_finished(&mut self) -> Result<TxEvent, ProtocolError> {
        if let Some(owner) = self.immediate.transmission_finished() {
            return Ok(TxEvent::Complete{ index: TxIndex::Immediate, owner });
        }

        for c in self.channels.iter_mut() {
            if c.transmission_finished() {
                let ac = c.ac();
                return Ok(TxEvent::Complete{ index: TxIndex::Contention(ac), owner: Some(ac) });
            }
        }

        Err(ProtocolError::NotTransmitting)
    }

    /// Abort the transmissions of an access category, including a pending
    /// immediate frame owned by its frame exchange
    pub fn abort(&mut self, ac: AccessCategory, timers: &mut Timers) {
        self.channels[ac.index()].abort(timers);
        self.immediate.abort_owned(ac, timers);
    }

    /// Abort every channel and cancel their timers
    pub fn abort_all(&mut self, timers: &mut Timers) {
        for c in self.channels.iter_mut() {
            c.abort(timers);
        }
        self.immediate.abort(timers);
    }
}

/// Encode a frame and hand it to the radio
pub fn send_frame<R, E>(radio: &mut R, frame: &Frame) -> Result<(), CoreError<E>>
where
    R: radio::Transmit<Error=E>,
    E: Debug,
{
    let mut buff = [0u8; MAX_FRAME_LEN];

    let n = frame.encode(&mut buff)?;

    debug!("Transmitting {} ({} bytes) seq: {} retry: {}", frame.kind, n, frame.seq, frame.is_retry());

    radio.start_transmit(&buff[..n]).map_err(CoreError::Radio)?;

    Ok(())
}

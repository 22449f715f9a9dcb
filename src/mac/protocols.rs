//! Frame exchange protocols
//!
//! Concrete step lists for the frame exchanges used by the MAC: unicast data
//! with an ACK, unicast data protected by RTS/CTS and group addressed data.
//
// wlan-mac, IEEE 802.11 DCF / EDCA MAC
// SPDX-License-Identifier: MPL-2.0

use log::{debug, warn};

use crate::Ts;
use crate::error::ProtocolError;
use crate::frame::{Frame, FrameKind};
use super::config::{AccessCategory, Config};
use super::contention::ContentionParams;
use super::exchange::{FrameExchange, Operations, Steps};
use super::timing::{nav_field, PhyMode};

/// Parameters shared by the frame exchanges of one access category
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct ExchangeParams {
    pub ac: AccessCategory,
    pub phy: PhyMode,

    /// Contention parameters for the first attempt
    pub contention: ContentionParams,

    /// Fixed contention window for group addressed frames
    pub cw_multicast: u16,

    pub short_retry_limit: u8,
    pub ack_timeout: Ts,
    pub cts_timeout: Ts,
}

impl ExchangeParams {
    pub fn new(config: &Config, ac: AccessCategory) -> Self {
        let edca = config.edca(ac);

        Self {
            ac,
            phy: config.phy,
            contention: ContentionParams {
                ifs: edca.aifs,
                eifs: edca.eifs,
                cw_min: edca.cw_min,
                cw_max: edca.cw_max,
                slot_time: config.slot_time(),
                retry_count: 0,
            },
            cw_multicast: config.cw_multicast,
            short_retry_limit: config.short_retry_limit,
            ack_timeout: config.ack_timeout(),
            cts_timeout: config.cts_timeout(),
        }
    }

    fn attempt(&self, retry_count: u8) -> ContentionParams {
        ContentionParams{ retry_count, ..self.contention }
    }

    /// Whether another attempt is allowed after `retry_count` retries
    fn may_retry(&self, retry_count: u8) -> bool {
        (retry_count as u16 + 1) < self.short_retry_limit as u16
    }
}

/// Unicast data followed by an ACK
#[derive(Clone, Debug, PartialEq)]
pub struct SendDataWithAck {
    data: Frame,
    params: ExchangeParams,
    retry_count: u8,
}

impl SendDataWithAck {
    pub fn new(mut data: Frame, params: ExchangeParams) -> Self {
        data.duration = nav_field(params.phy.data_nav());
        Self{ data, params, retry_count: 0 }
    }

    fn retry_or_fail(&mut self, ops: &mut Operations, mark_retry: bool) -> Result<(), ProtocolError> {
        if self.params.may_retry(self.retry_count) {
            self.retry_count += 1;
            if mark_retry {
                self.data.set_retry(true);
            }

            debug!("{} retrying seq {} ({})", self.params.ac, self.data.seq, self.retry_count);
            ops.goto_step(0)
        } else {
            warn!("{} retry limit reached for seq {}", self.params.ac, self.data.seq);
            ops.fail()
        }
    }
}

impl Steps for SendDataWithAck {
    fn do_step(&mut self, step: usize, ops: &mut Operations) -> Result<(), ProtocolError> {
        match step {
            0 => ops.transmit_contention(self.data.clone(), self.params.attempt(self.retry_count)),
            1 => ops.expect_reply(self.params.ack_timeout),
            2 => ops.succeed(),
            _ => Err(ProtocolError::UnknownStep{ step }),
        }
    }

    fn process_reply(&mut self, step: usize, frame: &Frame) -> bool {
        step == 1 && frame.kind == FrameKind::Ack && frame.receiver == self.data.transmitter
    }

    fn process_timeout(&mut self, step: usize, ops: &mut Operations) -> Result<(), ProtocolError> {
        match step {
            1 => self.retry_or_fail(ops, true),
            _ => Err(ProtocolError::UnexpectedEvent{ step, event: "reply timeout" }),
        }
    }

    fn process_internal_collision(&mut self, step: usize, ops: &mut Operations) -> Result<(), ProtocolError> {
        match step {
            0 => self.retry_or_fail(ops, false),
            _ => Err(ProtocolError::UnexpectedEvent{ step, event: "internal collision" }),
        }
    }
}

/// Unicast data protected by an RTS/CTS handshake
#[derive(Clone, Debug, PartialEq)]
pub struct SendDataWithRtsCts {
    rts: Frame,
    data: Frame,
    params: ExchangeParams,
    retry_count: u8,
}

impl SendDataWithRtsCts {
    pub fn new(mut data: Frame, params: ExchangeParams) -> Self {
        data.duration = nav_field(params.phy.data_nav());

        let rts = Frame::rts(data.transmitter, data.receiver, nav_field(params.phy.rts_nav(&data)));

        Self{ rts, data, params, retry_count: 0 }
    }

    fn is_reply(&self, frame: &Frame, kind: FrameKind) -> bool {
        frame.kind == kind && frame.receiver == self.data.transmitter
    }
}

impl Steps for SendDataWithRtsCts {
    fn do_step(&mut self, step: usize, ops: &mut Operations) -> Result<(), ProtocolError> {
        match step {
            0 => ops.transmit_contention(self.rts.clone(), self.params.attempt(self.retry_count)),
            1 => ops.expect_reply(self.params.cts_timeout),
            2 => ops.transmit_immediate(self.data.clone(), self.params.phy.sifs),
            3 => ops.expect_reply(self.params.ack_timeout),
            4 => ops.succeed(),
            _ => Err(ProtocolError::UnknownStep{ step }),
        }
    }

    fn process_reply(&mut self, step: usize, frame: &Frame) -> bool {
        match step {
            1 => self.is_reply(frame, FrameKind::Cts),
            3 => self.is_reply(frame, FrameKind::Ack),
            _ => false,
        }
    }

    fn process_timeout(&mut self, step: usize, ops: &mut Operations) -> Result<(), ProtocolError> {
        match step {
            // No CTS, contend again for the medium
            1 if self.params.may_retry(self.retry_count) => {
                self.retry_count += 1;
                debug!("{} no CTS for seq {}, retrying ({})", self.params.ac, self.data.seq, self.retry_count);
                ops.goto_step(0)
            },
            1 => {
                warn!("{} retry limit reached for seq {}", self.params.ac, self.data.seq);
                ops.fail()
            },
            // The medium was reserved, a missing ACK is not retried
            3 => {
                warn!("{} no ACK after CTS for seq {}", self.params.ac, self.data.seq);
                ops.fail()
            },
            _ => Err(ProtocolError::UnexpectedEvent{ step, event: "reply timeout" }),
        }
    }

    fn process_internal_collision(&mut self, step: usize, ops: &mut Operations) -> Result<(), ProtocolError> {
        match step {
            0 if self.params.may_retry(self.retry_count) => {
                self.retry_count += 1;
                ops.goto_step(0)
            },
            0 => ops.fail(),
            _ => Err(ProtocolError::UnexpectedEvent{ step, event: "internal collision" }),
        }
    }
}

/// Group addressed data, no acknowledgement
#[derive(Clone, Debug, PartialEq)]
pub struct SendMulticastData {
    data: Frame,
    params: ExchangeParams,
    retry_count: u8,
}

impl SendMulticastData {
    pub fn new(mut data: Frame, params: ExchangeParams) -> Self {
        data.duration = 0;
        Self{ data, params, retry_count: 0 }
    }
}

impl Steps for SendMulticastData {
    fn do_step(&mut self, step: usize, ops: &mut Operations) -> Result<(), ProtocolError> {
        match step {
            0 => {
                let cw = self.params.cw_multicast;
                let p = ContentionParams{ cw_min: cw, cw_max: cw, ..self.params.attempt(self.retry_count) };
                ops.transmit_contention(self.data.clone(), p)
            },
            1 => ops.succeed(),
            _ => Err(ProtocolError::UnknownStep{ step }),
        }
    }

    fn process_reply(&mut self, _step: usize, _frame: &Frame) -> bool {
        false
    }

    fn process_timeout(&mut self, step: usize, _ops: &mut Operations) -> Result<(), ProtocolError> {
        Err(ProtocolError::UnexpectedEvent{ step, event: "reply timeout" })
    }

    fn process_internal_collision(&mut self, step: usize, ops: &mut Operations) -> Result<(), ProtocolError> {
        match step {
            0 if self.params.may_retry(self.retry_count) => {
                self.retry_count += 1;
                self.data.set_retry(true);
                ops.goto_step(0)
            },
            0 => ops.fail(),
            _ => Err(ProtocolError::UnexpectedEvent{ step, event: "internal collision" }),
        }
    }
}

/// Frame exchange protocols supported by the MAC
#[derive(Clone, Debug, PartialEq)]
pub enum Protocol {
    Ack(SendDataWithAck),
    RtsCts(SendDataWithRtsCts),
    Multicast(SendMulticastData),
}

/// Frame exchange over one of the supported protocols
pub type Exchange = FrameExchange<Protocol>;

impl Protocol {
    /// Select the protocol for a frame by destination, unicast frames
    /// use RTS/CTS when `use_rts` is set
    pub fn for_frame(frame: Frame, params: ExchangeParams, use_rts: bool) -> Self {
        if frame.is_group_addressed() {
            Protocol::Multicast(SendMulticastData::new(frame, params))
        } else if use_rts {
            Protocol::RtsCts(SendDataWithRtsCts::new(frame, params))
        } else {
            Protocol::Ack(SendDataWithAck::new(frame, params))
        }
    }

    /// Data frame carried by this exchange
    pub fn frame(&self) -> &Frame {
        match self {
            Protocol::Ack(p) => &p.data,
            Protocol::RtsCts(p) => &p.data,
            Protocol::Multicast(p) => &p.data,
        }
    }

    /// Number of retries so far
    pub fn retry_count(&self) -> u8 {
        match self {
            Protocol::Ack(p) => p.retry_count,
            Protocol::RtsCts(p) => p.retry_count,
            Protocol::Multicast(p) => p.retry_count,
        }
    }

    fn inner(&mut self) -> &mut dyn Steps {
        match self {
            Protocol::Ack(p) => p,
            Protocol::RtsCts(p) => p,
            Protocol::Multicast(p) => p,
        }
    }
}

impl Steps for Protocol {
    fn do_step(&mut self, step: usize, ops: &mut Operations) -> Result<(), ProtocolError> {
        self.inner().do_step(step, ops)
    }

    fn process_reply(&mut self, step: usize, frame: &Frame) -> bool {
        self.inner().process_reply(step, frame)
    }

    fn process_timeout(&mut self, step: usize, ops: &mut Operations) -> Result<(), ProtocolError> {
        self.inner().process_timeout(step, ops)
    }

    fn process_internal_collision(&mut self, step: usize, ops: &mut Operations) -> Result<(), ProtocolError> {
        self.inner().process_internal_collision(step, ops)
    }
}

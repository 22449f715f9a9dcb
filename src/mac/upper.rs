//! Upper MAC
//!
//! Owns one transmit queue and at most one active frame exchange per access
//! category, answers incoming RTS and unicast frames with CTS / ACK responses
//! and drives the transmit coordinator from PHY notifications and timers.
//
// wlan-mac, IEEE 802.11 DCF / EDCA MAC
// SPDX-License-Identifier: MPL-2.0

use core::fmt::Debug;
use core::marker::PhantomData;

use heapless::{Deque, Vec};
use log::{debug, error, info, trace, warn};
use rand_core::RngCore;
use strum::IntoEnumIterator;

use crate::{Radio, Ts};
use crate::error::{CoreError, FrameError, ProtocolError};
use crate::frame::{Frame, FrameKind, MacAddress, MAX_FRAME_LEN};
use crate::timer::{Timer, TimerId, Timers};
use super::Mac as MacIf;
use super::config::{AccessCategory, Config, NUM_ACCESS_CATEGORIES};
use super::exchange::Request;
use super::medium::{MediumState, ReceptionState, TransmissionState};
use super::protocols::{Exchange, ExchangeParams, Protocol};
use super::queue::{FrameQueue, NoSource, PacketSource};
use super::timing::nav_field;
use super::tx::{TransmitCoordinator, TxEvent};

/// Capacity of the receive queue
pub const RX_QUEUE_LEN: usize = 16;

/// Capacity of the event queue
pub const EVENT_QUEUE_LEN: usize = 16;

/// Number of transmitters tracked for duplicate detection
pub const DEDUP_CACHE_LEN: usize = 16;

/// Events reported to the layer above
#[derive(Clone, Debug, PartialEq)]
pub enum MacEvent {
    /// Frame exchange completed successfully
    Sent { seq: u16, ac: AccessCategory, receiver: MacAddress },
    /// Frame exchange failed (retry limit reached or aborted)
    Failed { seq: u16, ac: AccessCategory, receiver: MacAddress },
    /// Frame dropped due to a full transmit queue
    Dropped { seq: u16, ac: AccessCategory, receiver: MacAddress },
}

/// MAC statistics
#[derive(Clone, Debug, PartialEq, Default)]
pub struct MacStats {
    pub tx_success: u32,
    pub tx_failed: u32,
    pub retransmissions: u32,
    pub internal_collisions: u32,
    pub queue_drops: u32,

    pub rx_frames: u32,
    pub rx_corrupted: u32,
    pub rx_duplicates: u32,
    pub rx_unrecognised: u32,

    pub acks_sent: u32,
    pub cts_sent: u32,
}

fn inc(v: &mut u32) {
    *v = v.saturating_add(1);
}

/// Last sequence number heard from a transmitter
#[derive(Clone, Debug, PartialEq)]
struct DedupEntry {
    transmitter: MacAddress,
    seq: u16,
    seen: Ts,
}

/// 802.11 upper MAC, generic over radio, timer, random source and an
/// optional external frame source
pub struct UpperMac<R, T, G, E, Q = NoSource> {
    config: Config,

    radio: R,
    timer: T,
    rng: G,
    source: Q,

    timers: Timers,
    medium: MediumState,
    tx: TransmitCoordinator,
    listening: bool,

    params: [ExchangeParams; NUM_ACCESS_CATEGORIES],
    queues: [FrameQueue; NUM_ACCESS_CATEGORIES],
    exchanges: [Option<Exchange>; NUM_ACCESS_CATEGORIES],

    seq: u16,

    rx_buff: Deque<Frame, RX_QUEUE_LEN>,
    events: Deque<MacEvent, EVENT_QUEUE_LEN>,
    // Least recently heard first
    dedup: Vec<DedupEntry, DEDUP_CACHE_LEN>,

    stats: MacStats,

    _e: PhantomData<E>,
}

impl <R, T, G, E> UpperMac<R, T, G, E, NoSource>
where
    R: Radio<E>,
    T: Timer,
    G: RngCore,
    E: Debug,
{
    /// Create a new MAC instance, validating the provided configuration
    pub fn new(config: Config, radio: R, timer: T, rng: G) -> Result<Self, CoreError<E>> {
        Self::with_source(config, radio, timer, rng, NoSource)
    }
}

impl <R, T, G, E, Q> UpperMac<R, T, G, E, Q>
where
    R: Radio<E>,
    T: Timer,
    G: RngCore,
    E: Debug,
    Q: PacketSource,
{
    /// Create a new MAC instance pulling frames from an external queue
    /// whenever its own queues have room
    pub fn with_source(config: Config, radio: R, timer: T, rng: G, source: Q) -> Result<Self, CoreError<E>> {
        config.validate()?;

        info!("Starting MAC {} (qos: {})", config.address, config.qos);

        let params = [
            ExchangeParams::new(&config, AccessCategory::Background),
            ExchangeParams::new(&config, AccessCategory::BestEffort),
            ExchangeParams::new(&config, AccessCategory::Video),
            ExchangeParams::new(&config, AccessCategory::Voice),
        ];

        let pm = config.prioritize_multicast;
        let queues = [FrameQueue::new(pm), FrameQueue::new(pm), FrameQueue::new(pm), FrameQueue::new(pm)];

        Ok(Self {
            config,
            radio,
            timer,
            rng,
            source,

            timers: Timers::new(),
            medium: MediumState::new(),
            tx: TransmitCoordinator::new(),
            listening: false,

            params,
            queues,
            exchanges: [None, None, None, None],

            seq: 0,

            rx_buff: Deque::new(),
            events: Deque::new(),
            dedup: Vec::new(),

            stats: MacStats::default(),

            _e: PhantomData,
        })
    }

    /// Station address
    pub fn address(&self) -> MacAddress {
        self.config.address
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn medium(&self) -> &MediumState {
        &self.medium
    }

    pub fn coordinator(&self) -> &TransmitCoordinator {
        &self.tx
    }

    /// Fetch MAC layer statistics
    pub fn stats(&self) -> MacStats {
        self.stats.clone()
    }

    /// Access the underlying radio
    pub fn radio(&mut self) -> &mut R {
        &mut self.radio
    }

    /// External frame source
    pub fn source(&mut self) -> &mut Q {
        &mut self.source
    }

    /// Transmit queue of an access category
    pub fn queue(&self, ac: AccessCategory) -> &FrameQueue {
        &self.queues[ac.index()]
    }

    /// Number of frames waiting in the queue of an access category
    pub fn queue_len(&self, ac: AccessCategory) -> usize {
        self.queues[ac.index()].len()
    }

    fn queued(&self) -> usize {
        self.queues.iter().map(|q| q.len()).sum()
    }

    /// Active frame exchange for an access category
    pub fn exchange(&self, ac: AccessCategory) -> Option<&Exchange> {
        self.exchanges[ac.index()].as_ref()
    }

    /// Whether any frame is queued or in flight
    pub fn is_busy(&self) -> bool {
        self.exchanges.iter().any(|x| x.is_some())
            || self.queues.iter().any(|q| !q.is_empty())
    }

    /// Earliest pending timer deadline, drivers may sleep until this time
    pub fn next_deadline(&self) -> Option<Ts> {
        self.timers.next_deadline()
    }

    /// Fetch the next received frame
    pub fn take_received(&mut self) -> Option<Frame> {
        self.rx_buff.pop_front()
    }

    /// Fetch the next MAC event
    pub fn poll_event(&mut self) -> Option<MacEvent> {
        self.events.pop_front()
    }

    fn now(&self) -> Ts {
        self.timer.ticks_us()
    }

    /// Fetch and increment the 12-bit sequence number
    fn next_seq(&mut self) -> u16 {
        let s = self.seq;
        self.seq = (self.seq + 1) % crate::frame::SEQ_MODULO;
        s
    }

    fn push_event(&mut self, e: MacEvent) {
        // Oldest events are discarded when the consumer falls behind
        if self.events.is_full() {
            let _ = self.events.pop_front();
        }
        let _ = self.events.push_back(e);
    }

    /// Accept a data or management frame from the layer above.
    ///
    /// The frame is assigned a sequence number and our transmitter address,
    /// classified into an access category and queued. Frames are dropped
    /// (not errored) when the queue for their category is full.
    pub fn upper_frame_received(&mut self, frame: Frame) -> Result<(), CoreError<E>> {
        let ac = match self.enqueue(frame)? {
            Some(ac) => ac,
            None => return Ok(()),
        };

        let now = self.now();
        self.start_next(ac, now)
    }

    /// Queue a frame from above, returning its access category unless dropped
    fn enqueue(&mut self, mut frame: Frame) -> Result<Option<AccessCategory>, CoreError<E>> {
        if frame.kind.is_control() {
            return Err(ProtocolError::ControlFrame(frame.kind).into());
        }

        frame.transmitter = self.config.address;
        frame.seq = self.next_seq();
        frame.set_retry(false);
        if frame.kind == FrameKind::Data {
            frame.qos = self.config.qos;
        }

        let ac = self.config.classify(&frame);
        let (seq, receiver) = (frame.seq, frame.receiver);

        // Management frames are only bounded by the queue capacity
        let q = &mut self.queues[ac.index()];
        let limited = frame.kind == FrameKind::Data && q.len() >= self.config.max_queue_size;

        if limited || q.push(frame).is_err() {
            warn!("{} queue full, dropping frame {} to {}", ac, seq, receiver);

            inc(&mut self.stats.queue_drops);
            self.push_event(MacEvent::Dropped{ seq, ac, receiver });

            return Ok(None);
        }

        trace!("{} queued frame {} to {} ({} pending)", ac, seq, receiver, self.queues[ac.index()].len());

        Ok(Some(ac))
    }

    /// Pull frames from the external source while the queues have room
    fn pull_source(&mut self) -> Result<(), CoreError<E>> {
        while self.queued() < self.config.max_queue_size {
            let frame = match self.source.request_packet() {
                Some(f) => f,
                None => break,
            };

            trace!("Pulled {} to {} from source", frame.kind, frame.receiver);
            self.enqueue(frame)?;
        }

        Ok(())
    }

    /// Handle a frame received by the PHY
    pub fn lower_frame_received(&mut self, frame: Frame, fcs_ok: bool) -> Result<(), CoreError<E>> {
        let now = self.now();

        if !fcs_ok {
            self.corrupted_reception();
            return Ok(());
        }

        self.tx.frame_received(true);
        inc(&mut self.stats.rx_frames);

        // Frames for other stations only update the NAV
        if frame.receiver != self.config.address && !frame.is_group_addressed() {
            trace!("Overheard {} for {} (duration {} us)", frame.kind, frame.receiver, frame.duration);

            let change = self.medium.update_nav(now, frame.duration as Ts, &mut self.timers);
            self.medium_changed(change, now);

            return Ok(());
        }

        match frame.kind {
            FrameKind::Rts => {
                self.send_response(Frame::cts(
                    frame.transmitter,
                    nav_field(self.config.phy.cts_nav(frame.duration as Ts))),
                    now,
                );
                Ok(())
            },
            FrameKind::Data | FrameKind::Management => {
                if !frame.is_group_addressed() {
                    self.send_response(Frame::ack(frame.transmitter, 0), now);
                }

                if self.is_duplicate(&frame, now) {
                    debug!("Duplicate frame {} from {}", frame.seq, frame.transmitter);
                    inc(&mut self.stats.rx_duplicates);
                    return Ok(());
                }

                debug!("Received {} {} from {} ({} bytes)", frame.kind, frame.seq, frame.transmitter, frame.payload().len());

                if self.rx_buff.push_back(frame).is_err() {
                    warn!("RX queue full, dropping frame");
                }

                Ok(())
            },
            FrameKind::Cts | FrameKind::Ack => {
                for ac in AccessCategory::iter() {
                    let r = match self.exchanges[ac.index()].as_mut() {
                        Some(x) => x.lower_frame_received(&frame),
                        None => continue,
                    };

                    match r {
                        Ok(Some(req)) => {
                            self.timers.cancel(TimerId::ReplyTimeout(ac));
                            return self.handle_request(ac, req, now);
                        },
                        Ok(None) => (),
                        Err(e) => return self.exchange_aborted(ac, e),
                    }
                }

                warn!("Unexpected {} to {}, dropping", frame.kind, frame.receiver);
                inc(&mut self.stats.rx_unrecognised);

                Ok(())
            },
        }
    }

    fn corrupted_reception(&mut self) {
        debug!("Corrupted reception, EIFS armed");
        self.tx.frame_received(false);
        inc(&mut self.stats.rx_corrupted);
    }

    /// Handle a PHY reception state change
    pub fn reception_state_changed(&mut self, state: ReceptionState) {
        let now = self.now();
        let change = self.medium.set_reception(state);
        self.medium_changed(change, now);
    }

    /// Handle a PHY transmission state change
    pub fn transmission_state_changed(&mut self, state: TransmissionState) {
        let now = self.now();
        let change = self.medium.set_transmission(state);
        self.medium_changed(change, now);
    }

    /// Handle the end of a radio transmission
    pub fn transmission_finished(&mut self) -> Result<(), CoreError<E>> {
        let now = self.now();

        let ev = match self.tx.transmission_finished() {
            Ok(ev) => ev,
            Err(e) => {
                error!("Transmission finished: {}", e);
                return Err(e.into());
            },
        };

        self.handle_tx_event(ev, now)
    }

    /// Process expired timers and restart idle queues
    pub fn handle_timers(&mut self) -> Result<(), CoreError<E>> {
        let now = self.now();

        // Timers are processed at their own deadlines so late polling
        // does not shift the protocol timeline
        while let Some((at, id)) = self.timers.pop_expired(now) {
            self.timer_fired(id, at)?;
        }

        self.pull_source()?;

        for ac in AccessCategory::iter() {
            self.start_next(ac, now)?;
        }

        Ok(())
    }

    /// Poll the radio for the end of a transmission or a received frame
    pub fn poll_radio(&mut self) -> Result<(), CoreError<E>> {
        if !self.listening {
            debug!("Entering receive mode");
            self.radio.start_receive().map_err(CoreError::Radio)?;
            self.listening = true;
        }

        if self.tx.is_transmitting() {
            if !self.radio.check_transmit().map_err(CoreError::Radio)? {
                return Ok(());
            }

            trace!("Transmit complete");

            self.transmission_state_changed(TransmissionState::Idle);
            self.radio.start_receive().map_err(CoreError::Radio)?;

            return self.transmission_finished();
        }

        if !self.radio.check_receive(true).map_err(CoreError::Radio)? {
            return Ok(());
        }

        let mut buff = [0u8; MAX_FRAME_LEN];
        let (n, _info) = self.radio.get_received(&mut buff).map_err(CoreError::Radio)?;

        match Frame::decode(&buff[..n]) {
            Ok(frame) => self.lower_frame_received(frame, true),
            Err(e) => {
                debug!("Undecodable reception ({} bytes): {}", n, e);
                self.corrupted_reception();
                Ok(())
            },
        }
    }

    /// Abort all frame exchanges, flush queues and cancel every timer
    pub fn reset(&mut self) {
        info!("Resetting MAC");

        self.tx.abort_all(&mut self.timers);

        for ac in AccessCategory::iter() {
            if let Some(x) = self.exchanges[ac.index()].take() {
                let f = x.steps().frame();
                let e = MacEvent::Failed{ seq: f.seq, ac, receiver: f.receiver };
                inc(&mut self.stats.tx_failed);
                self.push_event(e);
            }

            while let Some(f) = self.queues[ac.index()].pop_front() {
                inc(&mut self.stats.queue_drops);
                self.push_event(MacEvent::Dropped{ seq: f.seq, ac, receiver: f.receiver });
            }
        }

        self.medium.clear_nav(&mut self.timers);
        self.timers.clear();
        self.dedup.clear();
    }

    fn timer_fired(&mut self, id: TimerId, at: Ts) -> Result<(), CoreError<E>> {
        match id {
            TimerId::Nav => {
                let change = self.medium.nav_expired();
                self.medium_changed(change, at);
                Ok(())
            },
            TimerId::ReplyTimeout(ac) => {
                let r = match self.exchanges[ac.index()].as_mut() {
                    Some(x) => x.reply_timeout(),
                    None => {
                        trace!("Stale reply timeout for {}", ac);
                        return Ok(());
                    },
                };

                debug!("{} reply timeout", ac);

                match r {
                    Ok(req) => self.handle_request(ac, req, at),
                    Err(e) => self.exchange_aborted(ac, e),
                }
            },
            _ => {
                let owner = match id {
                    TimerId::Ifs(ac) | TimerId::Eifs(ac) | TimerId::Backoff(ac) => Some(ac),
                    _ => self.tx.immediate().owner(),
                };

                match self.tx.timer_fired(id, at, &mut self.timers, &mut self.radio) {
                    Ok(Some(ev)) => self.handle_tx_event(ev, at),
                    Ok(None) => Ok(()),
                    Err(e) => {
                        // The coordinator has released the channel, the exchange
                        // waiting on it cannot complete
                        if let Some(ac) = owner {
                            error!("{} transmission failed: {}", ac, e);
                            self.teardown(ac);
                        }
                        Err(e)
                    },
                }
            },
        }
    }

    fn medium_changed(&mut self, change: Option<bool>, now: Ts) {
        if let Some(free) = change {
            self.tx.medium_changed(free, now, &mut self.timers);
        }
    }

    fn handle_tx_event(&mut self, ev: TxEvent, now: Ts) -> Result<(), CoreError<E>> {
        let (ac, r) = match ev {
            TxEvent::Complete{ owner: None, .. } => {
                trace!("Response transmission complete");
                return Ok(());
            },
            TxEvent::Complete{ index, owner: Some(ac) } => {
                let r = match self.exchanges[ac.index()].as_mut() {
                    Some(x) => x.transmission_complete(index),
                    None => return Err(ProtocolError::NoExchange(ac).into()),
                };
                (ac, r)
            },
            TxEvent::InternalCollision(ac) => {
                inc(&mut self.stats.internal_collisions);

                let r = match self.exchanges[ac.index()].as_mut() {
                    Some(x) => x.internal_collision(),
                    None => return Err(ProtocolError::NoExchange(ac).into()),
                };
                (ac, r)
            },
        };

        match r {
            Ok(req) => self.handle_request(ac, req, now),
            Err(e) => self.exchange_aborted(ac, e),
        }
    }

    /// Execute a request issued by the frame exchange of an access category
    fn handle_request(&mut self, ac: AccessCategory, req: Request, now: Ts) -> Result<(), CoreError<E>> {
        let r = match req {
            Request::TransmitContention(frame, params) => {
                if params.retry_count > 0 {
                    inc(&mut self.stats.retransmissions);
                }

                let free = self.medium.is_free();
                self.tx.transmit_contention(ac, frame, params, &mut self.rng, free, now, &mut self.timers)
            },
            Request::TransmitImmediate(frame, ifs) => {
                self.tx.transmit_immediate(frame, ifs, Some(ac), now, &mut self.timers)
            },
            Request::ExpectReply(timeout) => {
                self.timers.schedule_at(now + timeout, TimerId::ReplyTimeout(ac));
                Ok(())
            },
            Request::Finished(success) => {
                return self.frame_exchange_finished(ac, success, now);
            },
        };

        match r {
            Ok(_) => Ok(()),
            Err(e) => self.exchange_aborted(ac, e),
        }
    }

    /// Dequeue and start the next frame exchange for an idle access category
    fn start_next(&mut self, ac: AccessCategory, now: Ts) -> Result<(), CoreError<E>> {
        let i = ac.index();

        if self.exchanges[i].is_some() {
            return Ok(());
        }

        let frame = match self.queues[i].pop_front() {
            Some(f) => f,
            None => return Ok(()),
        };

        let use_rts = self.config.use_rts(&frame);
        let mut x = Exchange::new(Protocol::for_frame(frame, self.params[i], use_rts));

        let f = x.steps().frame();
        debug!("{} starting exchange for {} to {} (rts: {})", ac, f.seq, f.receiver, use_rts);

        let r = x.start();
        self.exchanges[i] = Some(x);

        match r {
            Ok(req) => self.handle_request(ac, req, now),
            Err(e) => self.exchange_aborted(ac, e),
        }
    }

    /// Handle completion of the frame exchange of an access category,
    /// starting the next queued frame if any
    fn frame_exchange_finished(&mut self, ac: AccessCategory, success: bool, now: Ts) -> Result<(), CoreError<E>> {
        self.timers.cancel(TimerId::ReplyTimeout(ac));

        if let Some(x) = self.exchanges[ac.index()].take() {
            let f = x.steps().frame();
            let (seq, receiver) = (f.seq, f.receiver);

            if success {
                debug!("{} frame {} to {} sent ({} retries)", ac, seq, receiver, x.steps().retry_count());
                inc(&mut self.stats.tx_success);
                self.push_event(MacEvent::Sent{ seq, ac, receiver });
            } else {
                warn!("{} frame {} to {} failed", ac, seq, receiver);
                inc(&mut self.stats.tx_failed);
                self.push_event(MacEvent::Failed{ seq, ac, receiver });
            }
        }

        self.start_next(ac, now)
    }

    /// Tear down an exchange following a protocol violation
    fn exchange_aborted(&mut self, ac: AccessCategory, e: ProtocolError) -> Result<(), CoreError<E>> {
        error!("{} frame exchange aborted: {}", ac, e);

        self.teardown(ac);

        Err(e.into())
    }

    /// Cancel the timers and transmissions of an exchange and report it failed
    fn teardown(&mut self, ac: AccessCategory) {
        self.timers.cancel(TimerId::ReplyTimeout(ac));
        self.tx.abort(ac, &mut self.timers);

        if let Some(x) = self.exchanges[ac.index()].take() {
            let f = x.steps().frame();
            let ev = MacEvent::Failed{ seq: f.seq, ac, receiver: f.receiver };
            inc(&mut self.stats.tx_failed);
            self.push_event(ev);
        }
    }

    /// Send a CTS or ACK after SIFS on the immediate channel
    fn send_response(&mut self, frame: Frame, now: Ts) {
        let kind = frame.kind;

        if let Err(e) = self.tx.transmit_immediate(frame, self.config.sifs(), None, now, &mut self.timers) {
            warn!("Unable to send {}: {}", kind, e);
            return;
        }

        match kind {
            FrameKind::Cts => inc(&mut self.stats.cts_sent),
            _ => inc(&mut self.stats.acks_sent),
        }
    }

    /// Check for a retransmission of the last frame from the same transmitter
    fn is_duplicate(&mut self, frame: &Frame, now: Ts) -> bool {
        if !self.config.duplicate_detection {
            return false;
        }

        if let Some(timeout) = self.config.duplicate_timeout {
            self.dedup.retain(|e| e.seen.saturating_add(timeout) >= now);
        }

        let dup = match self.dedup.iter().position(|e| e.transmitter == frame.transmitter) {
            Some(i) => {
                let e = self.dedup.remove(i);
                frame.is_retry() && e.seq == frame.seq
            },
            None => {
                if self.dedup.is_full() {
                    self.dedup.remove(0);
                }
                false
            },
        };

        let _ = self.dedup.push(DedupEntry{ transmitter: frame.transmitter, seq: frame.seq, seen: now });

        dup
    }
}

impl <R, T, G, E, Q> MacIf for UpperMac<R, T, G, E, Q>
where
    R: Radio<E>,
    T: Timer,
    G: RngCore,
    E: Debug,
    Q: PacketSource,
{
    type Error = CoreError<E>;

    /// Enqueue a data frame for transmission
    fn transmit(&mut self, dest: MacAddress, data: &[u8], priority: u8) -> Result<(), Self::Error> {
        let frame = Frame::data(dest, data)?.with_priority(priority);
        self.upper_frame_received(frame)
    }

    /// Check for received frames, copying the payload into the provided buffer
    fn receive(&mut self, data: &mut [u8]) -> Result<Option<(usize, MacAddress)>, Self::Error> {
        let rx = match self.rx_buff.front() {
            Some(rx) => rx,
            None => return Ok(None),
        };

        let payload = rx.payload();
        if payload.len() > data.len() {
            return Err(FrameError::BufferTooSmall.into());
        }

        let n = payload.len();
        data[..n].copy_from_slice(payload);
        let source = rx.transmitter;

        let _ = self.rx_buff.pop_front();

        Ok(Some((n, source)))
    }

    /// Check whether the MAC has frames queued or in flight
    fn busy(&mut self) -> Result<bool, Self::Error> {
        Ok(self.is_busy())
    }

    /// Poll the radio, then run expired timers and idle queues
    fn tick(&mut self) -> Result<(), Self::Error> {
        self.poll_radio()?;
        self.handle_timers()?;

        // Frames handed to the radio hold the medium until polled complete
        if self.tx.is_transmitting() && self.medium.transmission() != TransmissionState::Transmitting {
            self.transmission_state_changed(TransmissionState::Transmitting);
        }

        Ok(())
    }
}

#[cfg(test)]
mod test {
    use std::vec;

    use super::*;
    use crate::mock::{SimError, SimRadio, SimRng};
    use crate::timer::mock::MockTimer;

    type TestMac = UpperMac<SimRadio, MockTimer, SimRng, SimError>;

    fn me() -> MacAddress {
        MacAddress::local(1)
    }

    fn peer() -> MacAddress {
        MacAddress::local(2)
    }

    fn setup(config: Config) -> (TestMac, SimRadio, MockTimer) {
        let _ = simplelog::SimpleLogger::init(log::LevelFilter::Debug, simplelog::Config::default());

        let radio = SimRadio::new();
        let timer = MockTimer::new();
        let config = Config{ address: me(), ..config };

        let mac = UpperMac::new(config, radio.clone(), timer.clone(), SimRng::constant(0)).unwrap();

        (mac, radio, timer)
    }

    fn incoming(kind: FrameKind, from: MacAddress, to: MacAddress, seq: u16) -> Frame {
        let mut f = match kind {
            FrameKind::Data => Frame::data(to, &[1, 2, 3]).unwrap(),
            FrameKind::Management => Frame::management(to, &[4]).unwrap(),
            FrameKind::Rts => Frame::rts(from, to, 1000),
            FrameKind::Cts => Frame::cts(to, 500),
            FrameKind::Ack => Frame::ack(to, 0),
        };
        f.transmitter = if kind.is_control() && kind != FrameKind::Rts { MacAddress::UNSPECIFIED } else { from };
        f.seq = seq;
        f
    }

    /// Advance the clock to the next deadline and process it
    fn step(mac: &mut TestMac, timer: &mut MockTimer) -> Option<Ts> {
        let at = mac.next_deadline()?;
        timer.set_us(at);
        mac.handle_timers().unwrap();
        Some(at)
    }

    /// Data frame from one of a set of numbered neighbours
    fn from_neighbour(n: u8, seq: u16, retry: bool) -> Frame {
        let mut f = incoming(FrameKind::Data, MacAddress::local(0x10 + u32::from(n)), me(), seq);
        f.set_retry(retry);
        f
    }

    #[test]
    fn invalid_config_rejected() {
        let r: Result<TestMac, _> = UpperMac::new(
            Config{ short_retry_limit: 0, ..Default::default() },
            SimRadio::new(), MockTimer::new(), SimRng::constant(0)
        );
        assert!(matches!(r, Err(CoreError::Config(_))));
    }

    #[test]
    fn sequence_numbers_assigned_and_wrap() {
        let (mut mac, _radio, _timer) = setup(Config::default());
        mac.seq = 4095;

        mac.transmit(peer(), &[1], 0).unwrap();
        mac.transmit(peer(), &[2], 0).unwrap();

        let x = mac.exchange(AccessCategory::BestEffort).unwrap();
        assert_eq!(x.steps().frame().seq, 4095);
        assert_eq!(x.steps().frame().transmitter, me());

        assert_eq!(mac.queue_len(AccessCategory::BestEffort), 1);
        assert_eq!(mac.seq, 1);
    }

    #[test]
    fn queue_overflow_drops_newest() {
        let (mut mac, _radio, _timer) = setup(Config{ max_queue_size: 2, ..Default::default() });

        // First frame starts an exchange, the next two fill the queue
        for i in 0..4 {
            mac.transmit(peer(), &[i], 0).unwrap();
        }

        assert_eq!(mac.queue_len(AccessCategory::BestEffort), 2);
        assert_eq!(mac.stats().queue_drops, 1);
        assert_eq!(mac.poll_event(), Some(MacEvent::Dropped{ seq: 3, ac: AccessCategory::BestEffort, receiver: peer() }));
    }

    #[test]
    fn transmit_then_ack() {
        let (mut mac, mut radio, mut timer) = setup(Config::default());

        mac.transmit(peer(), &[0xaa, 0xbb], 0).unwrap();

        // AIFS then a zero slot backoff expiring at the same instant
        let be = mac.config().edca(AccessCategory::BestEffort);
        assert_eq!(step(&mut mac, &mut timer), Some(be.aifs));
        assert_eq!(mac.next_deadline(), None);

        let sent = radio.take_sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].kind, FrameKind::Data);
        assert_eq!(sent[0].payload(), &[0xaa, 0xbb]);

        // PHY reports the end of the transmission
        timer.advance_us(500);
        mac.transmission_finished().unwrap();
        assert!(mac.exchange(AccessCategory::BestEffort).unwrap().awaiting_reply());
        assert_eq!(mac.next_deadline(), Some(timer.val() + mac.config().ack_timeout()));

        timer.advance_us(20);
        mac.lower_frame_received(incoming(FrameKind::Ack, peer(), me(), 0), true).unwrap();

        assert!(!mac.is_busy());
        assert_eq!(mac.next_deadline(), None);
        assert_eq!(mac.poll_event(), Some(MacEvent::Sent{ seq: 0, ac: AccessCategory::BestEffort, receiver: peer() }));
        assert_eq!(mac.stats().tx_success, 1);
    }

    #[test]
    fn data_is_acknowledged_and_delivered() {
        let (mut mac, mut radio, mut timer) = setup(Config::default());

        timer.set_us(1000);
        mac.lower_frame_received(incoming(FrameKind::Data, peer(), me(), 7), true).unwrap();

        // ACK after SIFS on the immediate channel
        assert_eq!(mac.next_deadline(), Some(1010));
        step(&mut mac, &mut timer);

        let sent = radio.take_sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].kind, FrameKind::Ack);
        assert_eq!(sent[0].receiver, peer());

        mac.transmission_finished().unwrap();

        let mut buff = [0u8; 16];
        assert_eq!(mac.receive(&mut buff).unwrap(), Some((3, peer())));
        assert_eq!(&buff[..3], &[1, 2, 3]);
        assert_eq!(mac.receive(&mut buff).unwrap(), None);
        assert_eq!(mac.stats().acks_sent, 1);
    }

    #[test]
    fn broadcast_is_not_acknowledged() {
        let (mut mac, _radio, _timer) = setup(Config::default());

        mac.lower_frame_received(incoming(FrameKind::Data, peer(), MacAddress::BROADCAST, 1), true).unwrap();

        assert_eq!(mac.next_deadline(), None);
        assert!(mac.take_received().is_some());
    }

    #[test]
    fn duplicates_acknowledged_not_delivered() {
        let (mut mac, _radio, mut timer) = setup(Config::default());

        let f = incoming(FrameKind::Data, peer(), me(), 9);
        mac.lower_frame_received(f.clone(), true).unwrap();
        step(&mut mac, &mut timer);
        mac.transmission_finished().unwrap();

        let mut retry = f.clone();
        retry.set_retry(true);
        mac.lower_frame_received(retry, true).unwrap();

        // Still acknowledged
        assert!(mac.next_deadline().is_some());
        assert_eq!(mac.stats().rx_duplicates, 1);

        assert!(mac.take_received().is_some());
        assert!(mac.take_received().is_none());
    }

    #[test]
    fn overheard_frames_set_nav() {
        let (mut mac, _radio, mut timer) = setup(Config::default());

        timer.set_us(100);
        mac.lower_frame_received(incoming(FrameKind::Rts, peer(), MacAddress::local(3), 0), true).unwrap();

        assert!(!mac.medium().is_free());
        assert_eq!(mac.medium().nav(), Some(1100));
        assert_eq!(mac.take_received(), None);

        // Queued traffic defers until the NAV expires
        mac.transmit(peer(), &[1], 0).unwrap();
        assert_eq!(mac.next_deadline(), Some(1100));

        step(&mut mac, &mut timer);
        assert!(mac.medium().is_free());

        let be = mac.config().edca(AccessCategory::BestEffort);
        assert_eq!(mac.next_deadline(), Some(1100 + be.aifs));
    }

    #[test]
    fn corrupted_frames_are_not_processed() {
        let (mut mac, _radio, _timer) = setup(Config::default());

        mac.lower_frame_received(incoming(FrameKind::Data, peer(), me(), 1), false).unwrap();

        assert_eq!(mac.next_deadline(), None);
        assert_eq!(mac.take_received(), None);
        assert_eq!(mac.stats().rx_corrupted, 1);
        assert!(mac.coordinator().channel(AccessCategory::BestEffort).eifs_armed());
    }

    #[test]
    fn unexpected_replies_dropped() {
        let (mut mac, _radio, _timer) = setup(Config::default());

        mac.lower_frame_received(incoming(FrameKind::Ack, peer(), me(), 0), true).unwrap();
        assert_eq!(mac.stats().rx_unrecognised, 1);
    }

    #[test]
    fn finished_without_transmission_is_error() {
        let (mut mac, _radio, _timer) = setup(Config::default());

        assert_eq!(
            mac.transmission_finished().map_err(|e| matches!(e, CoreError::Protocol(ProtocolError::NotTransmitting))),
            Err(true)
        );
    }

    #[test]
    fn reset_cancels_everything() {
        let (mut mac, _radio, _timer) = setup(Config::default());

        mac.transmit(peer(), &[1], 0).unwrap();
        mac.transmit(peer(), &[2], 6).unwrap();
        mac.transmit(peer(), &[3], 6).unwrap();
        assert!(mac.next_deadline().is_some());

        mac.reset();

        assert!(!mac.is_busy());
        assert_eq!(mac.next_deadline(), None);

        // Active exchanges fail, queued frames are dropped
        let events: vec::Vec<_> = core::iter::from_fn(|| mac.poll_event()).collect();
        assert_eq!(events, std::vec![
            MacEvent::Failed{ seq: 0, ac: AccessCategory::BestEffort, receiver: peer() },
            MacEvent::Failed{ seq: 1, ac: AccessCategory::Voice, receiver: peer() },
            MacEvent::Dropped{ seq: 2, ac: AccessCategory::Voice, receiver: peer() },
        ]);
        assert_eq!(mac.stats().queue_drops, 1);
        assert_eq!(mac.stats().tx_failed, 2);
    }

    #[test]
    fn radio_error_fails_exchange() {
        let (mut mac, mut radio, mut timer) = setup(Config::default());
        let be = AccessCategory::BestEffort;

        radio.fail_next(1);
        mac.transmit(peer(), &[1], 0).unwrap();

        timer.set_us(mac.config().edca(be).aifs);
        assert_eq!(mac.handle_timers(), Err(CoreError::Radio(SimError::Rejected)));

        assert!(mac.coordinator().channel(be).is_idle());
        assert!(mac.exchange(be).is_none());
        assert_eq!(mac.next_deadline(), None);
        assert_eq!(mac.poll_event(), Some(MacEvent::Failed{ seq: 0, ac: be, receiver: peer() }));
        assert_eq!(mac.stats().tx_failed, 1);
        assert!(radio.take_sent().is_empty());

        // The radio is free for the next exchange
        mac.transmit(peer(), &[2], 6).unwrap();
        step(&mut mac, &mut timer);

        let sent = radio.take_sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].priority, 6);
        assert_eq!(mac.stats().internal_collisions, 0);
    }

    #[test]
    fn aborted_exchange_drops_pending_data() {
        let (mut mac, mut radio, mut timer) = setup(Config{ rts_threshold: 20, ..Default::default() });
        let be = AccessCategory::BestEffort;

        mac.transmit(peer(), &[0u8; 32], 0).unwrap();
        step(&mut mac, &mut timer);
        assert_eq!(radio.take_sent()[0].kind, FrameKind::Rts);

        mac.transmission_finished().unwrap();
        timer.advance_us(20);
        mac.lower_frame_received(incoming(FrameKind::Cts, peer(), me(), 0), true).unwrap();

        // DATA waits out SIFS on the immediate channel
        assert_eq!(mac.coordinator().immediate().owner(), Some(be));

        let r = mac.exchange_aborted(be, ProtocolError::UnexpectedEvent{ step: 2, event: "reset" });
        assert_eq!(r, Err(CoreError::Protocol(ProtocolError::UnexpectedEvent{ step: 2, event: "reset" })));

        assert!(!mac.coordinator().immediate().is_busy());
        assert_eq!(mac.next_deadline(), None);
        assert_eq!(mac.poll_event(), Some(MacEvent::Failed{ seq: 0, ac: be, receiver: peer() }));

        timer.advance_us(1000);
        mac.handle_timers().unwrap();
        assert!(radio.take_sent().is_empty());
    }

    #[test]
    fn tick_drives_radio() {
        let (mut mac, mut radio, mut timer) = setup(Config::default());
        let be = AccessCategory::BestEffort;

        mac.transmit(peer(), &[0xaa], 0).unwrap();

        mac.tick().unwrap();
        assert_eq!(radio.receive_starts(), 1);

        timer.set_us(mac.config().edca(be).aifs);
        mac.tick().unwrap();
        assert_eq!(radio.take_sent().len(), 1);
        assert_eq!(mac.medium().transmission(), TransmissionState::Transmitting);
        assert!(!mac.medium().is_free());

        // Completion is picked up on the next tick, returning to receive
        timer.advance_us(500);
        mac.tick().unwrap();
        assert!(!mac.coordinator().is_transmitting());
        assert!(mac.medium().is_free());
        assert_eq!(radio.receive_starts(), 2);
        assert!(mac.exchange(be).unwrap().awaiting_reply());

        timer.advance_us(20);
        radio.deliver(&incoming(FrameKind::Ack, peer(), me(), 0));
        mac.tick().unwrap();

        assert!(!mac.busy().unwrap());
        assert_eq!(mac.poll_event(), Some(MacEvent::Sent{ seq: 0, ac: be, receiver: peer() }));
    }

    #[test]
    fn tick_receives_frames() {
        let (mut mac, mut radio, mut timer) = setup(Config::default());

        timer.set_us(100);
        radio.deliver(&incoming(FrameKind::Data, peer(), me(), 3));
        mac.tick().unwrap();

        let mut buff = [0u8; 8];
        assert_eq!(mac.receive(&mut buff).unwrap(), Some((3, peer())));

        // ACK after SIFS
        timer.set_us(110);
        mac.tick().unwrap();
        let sent = radio.take_sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].kind, FrameKind::Ack);

        mac.tick().unwrap();
        assert!(!mac.coordinator().is_transmitting());

        // Undecodable receptions count as corrupted
        radio.deliver_raw(&[0x04, 0x00]);
        mac.tick().unwrap();
        assert_eq!(mac.stats().rx_corrupted, 1);
        assert!(mac.coordinator().channel(AccessCategory::Voice).eifs_armed());
    }

    #[test]
    fn duplicate_cache_evicts_least_recent() {
        let (mut mac, _radio, _timer) = setup(Config::default());
        let n = DEDUP_CACHE_LEN as u8;

        for i in 0..n {
            assert!(!mac.is_duplicate(&from_neighbour(i, 1, false), 0));
        }

        // Hearing the first neighbour again makes the second the oldest
        assert!(!mac.is_duplicate(&from_neighbour(0, 2, false), 1));

        // Two new neighbours push out the two least recently heard
        assert!(!mac.is_duplicate(&from_neighbour(n, 1, false), 2));
        assert!(!mac.is_duplicate(&from_neighbour(n + 1, 1, false), 3));

        assert!(mac.is_duplicate(&from_neighbour(0, 2, true), 4));
        assert!(mac.is_duplicate(&from_neighbour(n - 1, 1, true), 4));
        assert!(!mac.is_duplicate(&from_neighbour(1, 1, true), 4));
        assert!(!mac.is_duplicate(&from_neighbour(2, 1, true), 4));
    }

    #[test]
    fn duplicate_entries_expire() {
        let (mut mac, _radio, _timer) = setup(Config{ duplicate_timeout: Some(1_000), ..Default::default() });

        assert!(!mac.is_duplicate(&from_neighbour(0, 5, false), 0));
        assert!(!mac.is_duplicate(&from_neighbour(1, 7, false), 0));

        assert!(mac.is_duplicate(&from_neighbour(0, 5, true), 1_000));

        // Neighbour 1 has not been heard for longer than the timeout
        assert!(!mac.is_duplicate(&from_neighbour(1, 7, true), 1_500));
        assert_eq!(mac.dedup.len(), 2);

        assert!(!mac.is_duplicate(&from_neighbour(0, 5, true), 2_600));
        assert_eq!(mac.dedup.len(), 1);
    }

    #[test]
    fn management_frames_bypass_data_limit() {
        let (mut mac, _radio, _timer) = setup(Config{ max_queue_size: 1, ..Config::dcf() });
        let be = AccessCategory::BestEffort;

        // First frame starts an exchange, the third overflows
        for i in 0..3 {
            mac.transmit(peer(), &[i], 0).unwrap();
        }
        mac.upper_frame_received(Frame::management(peer(), &[4]).unwrap()).unwrap();

        assert_eq!(mac.stats().queue_drops, 1);

        let queued: vec::Vec<_> = mac.queue(be).iter().map(|f| (f.kind, f.seq)).collect();
        assert_eq!(queued, std::vec![(FrameKind::Management, 3), (FrameKind::Data, 1)]);
    }

    #[test]
    fn multicast_queued_ahead_of_unicast() {
        let (mut mac, _radio, _timer) = setup(Config{ prioritize_multicast: true, ..Default::default() });

        mac.transmit(peer(), &[0], 0).unwrap();
        mac.transmit(peer(), &[1], 0).unwrap();
        mac.transmit(MacAddress::BROADCAST, &[2], 0).unwrap();
        mac.transmit(MacAddress::BROADCAST, &[3], 0).unwrap();

        let queued: vec::Vec<_> = mac.queue(AccessCategory::BestEffort).iter().map(|f| f.seq).collect();
        assert_eq!(queued, std::vec![2, 3, 1]);
    }

    #[test]
    fn frames_pulled_from_source() {
        let mut source: Deque<Frame, 4> = Deque::new();
        for i in 0..3 {
            source.push_back(Frame::data(peer(), &[i]).unwrap()).unwrap();
        }

        let config = Config{ address: me(), max_queue_size: 2, ..Default::default() };
        let mut mac: UpperMac<SimRadio, MockTimer, SimRng, SimError, Deque<Frame, 4>> =
            UpperMac::with_source(config, SimRadio::new(), MockTimer::new(), SimRng::constant(0), source).unwrap();
        let be = AccessCategory::BestEffort;

        // Pulls until the queues are full, then starts the first exchange
        mac.handle_timers().unwrap();
        assert_eq!(mac.exchange(be).unwrap().steps().frame().seq, 0);
        assert_eq!(mac.exchange(be).unwrap().steps().frame().transmitter, me());
        assert_eq!(mac.queue_len(be), 1);
        assert_eq!(mac.source().len(), 1);

        mac.handle_timers().unwrap();
        assert_eq!(mac.queue_len(be), 2);
        assert!(mac.source().is_empty());
    }

    #[test]
    fn control_frames_from_above_rejected() {
        let (mut mac, _radio, _timer) = setup(Config::default());

        assert_eq!(
            mac.upper_frame_received(Frame::ack(peer(), 0)),
            Err(CoreError::Protocol(ProtocolError::ControlFrame(FrameKind::Ack)))
        );
        assert_eq!(mac.seq, 0);
        assert!(!mac.is_busy());
    }

    #[test]
    fn dcf_sends_data_without_qos() {
        let (mut mac, mut radio, mut timer) = setup(Config::dcf());

        mac.transmit(peer(), &[1], 6).unwrap();
        step(&mut mac, &mut timer);

        let sent = radio.take_sent();
        assert_eq!(sent.len(), 1);
        assert!(!sent[0].qos);
        assert_eq!(sent[0].priority, 0);
        assert_eq!(sent[0].byte_len(), 18 + 1 + 4);
    }
}

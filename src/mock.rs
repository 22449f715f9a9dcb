//! Test doubles for the MAC
//!
//! A recording radio, a deterministic random source and a discrete event
//! network connecting a set of MAC instances over a single collision domain.
//
// wlan-mac, IEEE 802.11 DCF / EDCA MAC
// SPDX-License-Identifier: MPL-2.0

use std::boxed::Box;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::vec::Vec;

use radio::BasicInfo;

use log::{debug, trace};
use rand_core::{impls, RngCore};

use crate::Ts;
use crate::error::{CoreError, FrameError};
use crate::frame::{Frame, MacAddress, MAX_FRAME_LEN};
use crate::mac::{Config, PhyMode, UpperMac};
use crate::mac::medium::{ReceptionState, TransmissionState};
use crate::timer::mock::MockTimer;

/// Simulated radio errors
#[derive(Debug, Clone, PartialEq)]
pub enum SimError {
    /// The MAC handed the radio a frame that could not be decoded
    Frame(FrameError),
    /// Transmission refused by the radio
    Rejected,
}

#[derive(Debug, Default)]
struct SimRadioState {
    sent: Vec<Frame>,
    inbox: VecDeque<Vec<u8>>,
    failures: usize,
    receive_starts: usize,
}

/// Radio recording frames passed to `start_transmit` and returning
/// delivered buffers from `get_received`, clones share the same state.
///
/// Transmissions complete as soon as they are checked.
#[derive(Clone, Debug, Default)]
pub struct SimRadio {
    state: Arc<Mutex<SimRadioState>>,
}

impl SimRadio {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the frames transmitted since the last call
    pub fn take_sent(&mut self) -> Vec<Frame> {
        let mut state = self.state.lock().unwrap();
        core::mem::take(&mut state.sent)
    }

    /// Reject the next `n` calls to `start_transmit`
    pub fn fail_next(&mut self, n: usize) {
        self.state.lock().unwrap().failures = n;
    }

    /// Queue a frame for reception
    pub fn deliver(&mut self, frame: &Frame) {
        let mut buff = [0u8; MAX_FRAME_LEN];
        let n = frame.encode(&mut buff).unwrap();
        self.deliver_raw(&buff[..n]);
    }

    /// Queue raw bytes for reception
    pub fn deliver_raw(&mut self, data: &[u8]) {
        self.state.lock().unwrap().inbox.push_back(data.to_vec());
    }

    /// Number of times receive mode was entered
    pub fn receive_starts(&self) -> usize {
        self.state.lock().unwrap().receive_starts
    }
}

impl radio::Transmit for SimRadio {
    type Error = SimError;

    fn start_transmit(&mut self, data: &[u8]) -> Result<(), Self::Error> {
        let mut state = self.state.lock().unwrap();

        if state.failures > 0 {
            state.failures -= 1;
            return Err(SimError::Rejected);
        }

        let frame = Frame::decode(data).map_err(SimError::Frame)?;
        state.sent.push(frame);
        Ok(())
    }

    fn check_transmit(&mut self) -> Result<bool, Self::Error> {
        Ok(true)
    }
}

impl radio::Receive for SimRadio {
    type Error = SimError;
    type Info = BasicInfo;

    fn start_receive(&mut self) -> Result<(), Self::Error> {
        self.state.lock().unwrap().receive_starts += 1;
        Ok(())
    }

    fn check_receive(&mut self, _restart: bool) -> Result<bool, Self::Error> {
        Ok(!self.state.lock().unwrap().inbox.is_empty())
    }

    fn get_received(&mut self, buff: &mut [u8]) -> Result<(usize, Self::Info), Self::Error> {
        let data = match self.state.lock().unwrap().inbox.pop_front() {
            Some(d) => d,
            None => return Ok((0, BasicInfo::default())),
        };

        let n = data.len().min(buff.len());
        buff[..n].copy_from_slice(&data[..n]);

        Ok((n, BasicInfo::default()))
    }
}

/// Deterministic random source (xorshift) for repeatable backoff draws
#[derive(Clone, Debug)]
pub struct SimRng {
    state: u32,
    constant: Option<u32>,
}

impl SimRng {
    /// Always returns the provided value
    pub fn constant(v: u32) -> Self {
        Self{ state: 1, constant: Some(v) }
    }

    /// Pseudo random sequence from a seed
    pub fn seeded(seed: u32) -> Self {
        Self{ state: seed.max(1), constant: None }
    }
}

impl RngCore for SimRng {
    fn next_u32(&mut self) -> u32 {
        if let Some(v) = self.constant {
            return v;
        }

        let mut x = self.state;
        x ^= x << 13;
        x ^= x >> 17;
        x ^= x << 5;
        self.state = x;
        x
    }

    fn next_u64(&mut self) -> u64 {
        impls::next_u64_via_u32(self)
    }

    fn fill_bytes(&mut self, dest: &mut [u8]) {
        impls::fill_bytes_via_next(self, dest)
    }

    fn try_fill_bytes(&mut self, dest: &mut [u8]) -> Result<(), rand_core::Error> {
        self.fill_bytes(dest);
        Ok(())
    }
}

/// MAC instance used in simulations
pub type SimMac = UpperMac<SimRadio, MockTimer, SimRng, SimError>;

/// Network station
pub struct Station {
    pub mac: SimMac,
    radio: SimRadio,
    timer: MockTimer,
}

/// A frame on the air
#[derive(Clone, Debug, PartialEq)]
pub struct Transmission {
    pub start: Ts,
    pub end: Ts,
    pub source: usize,
    pub frame: Frame,
    /// Overlapped with another transmission, corrupting both
    pub collided: bool,

    /// Stations transmitting during this frame, which cannot receive it
    deaf: Vec<usize>,
}

/// Discrete event network, all stations share one collision domain
/// and propagation delay is ignored
pub struct Network {
    phy: PhyMode,
    now: Ts,
    stations: Vec<Box<Station>>,
    flights: Vec<Transmission>,
    log: Vec<Transmission>,
}

impl Network {
    pub fn new(phy: PhyMode) -> Self {
        Self {
            phy,
            now: 0,
            stations: Vec::new(),
            flights: Vec::new(),
            log: Vec::new(),
        }
    }

    /// Add a station with the provided configuration, returning its index
    pub fn add_station(&mut self, config: Config, rng: SimRng) -> Result<usize, CoreError<SimError>> {
        let radio = SimRadio::new();
        let mut timer = MockTimer::new();
        timer.set_us(self.now);

        let config = Config{ phy: self.phy, ..config };
        let mac = UpperMac::new(config, radio.clone(), timer.clone(), rng)?;

        self.stations.push(Box::new(Station{ mac, radio, timer }));

        Ok(self.stations.len() - 1)
    }

    pub fn station(&mut self, index: usize) -> &mut SimMac {
        &mut self.stations[index].mac
    }

    /// Index of the station with the provided address
    pub fn find(&self, address: MacAddress) -> Option<usize> {
        self.stations.iter().position(|s| s.mac.address() == address)
    }

    pub fn now(&self) -> Ts {
        self.now
    }

    /// Completed transmissions in order of completion
    pub fn log(&self) -> &[Transmission] {
        &self.log
    }

    /// Time of the next event (frame end or station timer)
    pub fn next_event(&self) -> Option<Ts> {
        let flight = self.flights.iter().map(|f| f.end).min();
        let timer = self.stations.iter().filter_map(|s| s.mac.next_deadline()).min();

        match (flight, timer) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// Run events up to the provided time, leaving the clock at `end`
    pub fn run_until(&mut self, end: Ts) -> Result<(), CoreError<SimError>> {
        while let Some(t) = self.next_event() {
            if t > end {
                break;
            }
            self.step()?;
        }

        if end > self.now {
            self.now = end;
            for s in self.stations.iter_mut() {
                s.timer.set_us(end);
            }
        }

        Ok(())
    }

    /// Process all events at the next event time, returns false when idle
    pub fn step(&mut self) -> Result<bool, CoreError<SimError>> {
        let t = match self.next_event() {
            Some(t) => t.max(self.now),
            None => return Ok(false),
        };

        self.now = t;
        for s in self.stations.iter_mut() {
            s.timer.set_us(t);
        }

        // Frames ending now are delivered before station timers run
        let (ended, flights): (Vec<_>, Vec<_>) = self.flights.drain(..).partition(|f| f.end <= t);
        self.flights = flights;

        for f in ended {
            self.deliver(&f)?;
            self.log.push(f);
        }

        if self.flights.is_empty() {
            for s in self.stations.iter_mut() {
                if s.mac.medium().reception() != ReceptionState::Idle {
                    s.mac.reception_state_changed(ReceptionState::Idle);
                }
            }
        }

        for s in self.stations.iter_mut() {
            s.mac.handle_timers()?;
        }

        self.launch(t);

        Ok(true)
    }

    fn deliver(&mut self, f: &Transmission) -> Result<(), CoreError<SimError>> {
        trace!("{} {} -> {} ended (collided: {})", f.frame.kind, f.source, f.frame.receiver, f.collided);

        let source = &mut self.stations[f.source].mac;
        source.transmission_finished()?;
        source.transmission_state_changed(TransmissionState::Undefined);

        for (i, s) in self.stations.iter_mut().enumerate() {
            if i == f.source || f.deaf.contains(&i) {
                continue;
            }
            s.mac.lower_frame_received(f.frame.clone(), !f.collided)?;
        }

        Ok(())
    }

    /// Start flights for frames handed to station radios
    fn launch(&mut self, t: Ts) {
        for source in 0..self.stations.len() {
            let sent = self.stations[source].radio.take_sent();

            for frame in sent {
                let end = t + self.phy.frame_duration(&frame);

                debug!("t={} {} {} -> {} until {}", t, frame.kind, source, frame.receiver, end);

                let mut deaf = Vec::new();
                let collided = !self.flights.is_empty();

                for other in self.flights.iter_mut() {
                    other.collided = true;
                    if !other.deaf.contains(&source) {
                        other.deaf.push(source);
                    }
                    deaf.push(other.source);
                }

                self.flights.push(Transmission{ start: t, end, source, frame, collided, deaf });

                for (i, s) in self.stations.iter_mut().enumerate() {
                    if i == source {
                        s.mac.transmission_state_changed(TransmissionState::Transmitting);
                    } else if s.mac.medium().reception() == ReceptionState::Idle {
                        s.mac.reception_state_changed(ReceptionState::Receiving);
                    }
                }
            }
        }
    }
}

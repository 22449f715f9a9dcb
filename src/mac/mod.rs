//! Medium Access Control (MAC) layer module.
//! Contains the MAC trait and the 802.11 DCF / EDCA implementation.
//
// wlan-mac, IEEE 802.11 DCF / EDCA MAC
// SPDX-License-Identifier: MPL-2.0

use crate::frame::MacAddress;

pub mod config;
pub use config::{AccessCategory, Config};

pub mod timing;
pub use timing::PhyMode;

pub mod medium;
pub mod contention;
pub mod immediate;
pub mod tx;
pub mod exchange;
pub mod protocols;

pub mod queue;
pub use queue::{FrameQueue, NoSource, PacketSource};

pub mod upper;
pub use upper::{UpperMac, MacEvent, MacStats};

/// Generic MAC trait, implemented by all MACs
pub trait Mac {
    type Error;

    /// Queue a payload for transmission with an 802.1D user priority
    fn transmit(&mut self, dest: MacAddress, data: &[u8], priority: u8) -> Result<(), Self::Error>;

    /// Check for received payloads, returning the length and source address
    fn receive(&mut self, data: &mut [u8]) -> Result<Option<(usize, MacAddress)>, Self::Error>;

    /// Check whether the MAC has outstanding transmissions
    fn busy(&mut self) -> Result<bool, Self::Error>;

    /// Update the MAC state
    fn tick(&mut self) -> Result<(), Self::Error>;
}

#[cfg(test)]
mod test {
    use std::vec::Vec;

    use super::*;
    use crate::Ts;
    use crate::frame::{Frame, FrameKind};
    use crate::mock::{Network, SimRng};

    const A: usize = 0;
    const B: usize = 1;

    fn network(config: Config, rng: SimRng) -> Network {
        let _ = simplelog::SimpleLogger::init(log::LevelFilter::Debug, simplelog::Config::default());

        let mut net = Network::new(PhyMode::dsss());

        net.add_station(Config{ address: MacAddress::local(1), ..config.clone() }, rng).unwrap();
        net.add_station(Config{ address: MacAddress::local(2), ..config }, SimRng::constant(0)).unwrap();

        net
    }

    fn kinds(net: &Network) -> Vec<(usize, FrameKind)> {
        net.log().iter().map(|t| (t.source, t.frame.kind)).collect()
    }

    #[test]
    fn unicast_data_with_ack() {
        let mut net = network(Config::default(), SimRng::constant(0));
        let phy = PhyMode::dsss();

        net.station(A).transmit(MacAddress::local(2), &[0u8; 10], 0).unwrap();
        net.run_until(100_000).unwrap();

        assert_eq!(kinds(&net), std::vec![(A, FrameKind::Data), (B, FrameKind::Ack)]);

        let aifs = net.station(A).config().edca(AccessCategory::BestEffort).aifs;
        let log = net.log();
        assert!(log.iter().all(|t| !t.collided));

        // DATA after AIFS with no backoff slots, ACK after SIFS
        assert_eq!(log[0].start, aifs);
        assert_eq!(log[1].start, log[0].end + phy.sifs);

        let a = net.station(A);
        assert_eq!(a.poll_event(), Some(MacEvent::Sent{ seq: 0, ac: AccessCategory::BestEffort, receiver: MacAddress::local(2) }));
        assert_eq!(a.queue_len(AccessCategory::BestEffort), 0);
        assert!(!a.is_busy());

        let f = net.station(B).take_received().unwrap();
        assert_eq!(f.transmitter, MacAddress::local(1));
        assert_eq!(f.payload(), &[0u8; 10]);

        // Nothing further happens until a new frame is queued
        assert_eq!(net.next_event(), None);
    }

    #[test]
    fn unicast_data_with_rts_cts() {
        let mut net = network(Config{ rts_threshold: 20, ..Default::default() }, SimRng::constant(0));
        let sifs = PhyMode::dsss().sifs;

        net.station(A).transmit(MacAddress::local(2), &[0u8; 10], 0).unwrap();
        net.run_until(100_000).unwrap();

        assert_eq!(kinds(&net), std::vec![
            (A, FrameKind::Rts),
            (B, FrameKind::Cts),
            (A, FrameKind::Data),
            (B, FrameKind::Ack),
        ]);

        let log = net.log();
        for w in log.windows(2) {
            assert_eq!(w[1].start, w[0].end + sifs);
        }

        // CTS reserves the remainder of the RTS duration
        assert_eq!(log[1].frame.duration as Ts, log[0].frame.duration as Ts - sifs - (log[1].end - log[1].start));

        assert!(matches!(net.station(A).poll_event(), Some(MacEvent::Sent{ .. })));
        assert_eq!(net.station(B).stats().cts_sent, 1);
    }

    #[test]
    fn retry_limit_exhausted() {
        let mut net = network(Config::default(), SimRng::seeded(0xdead_beef));

        // Nobody answers for this address
        net.station(A).transmit(MacAddress::local(9), &[1, 2, 3], 0).unwrap();
        net.run_until(10_000_000).unwrap();

        let attempts: Vec<_> = net.log().iter()
            .filter(|t| t.source == A)
            .map(|t| (t.frame.kind, t.frame.is_retry(), t.frame.seq))
            .collect();

        assert_eq!(attempts.len(), 7);
        for (i, (kind, retry, seq)) in attempts.iter().enumerate() {
            assert_eq!(*kind, FrameKind::Data);
            assert_eq!(*retry, i > 0);
            assert_eq!(*seq, 0);
        }

        let a = net.station(A);
        assert_eq!(a.poll_event(), Some(MacEvent::Failed{ seq: 0, ac: AccessCategory::BestEffort, receiver: MacAddress::local(9) }));
        assert_eq!(a.stats().retransmissions, 6);
        assert!(!a.is_busy());

        // The other station only overheard the frames
        assert_eq!(net.station(B).take_received(), None);
    }

    #[test]
    fn multicast_data() {
        let mut net = network(Config::default(), SimRng::constant(0));

        net.station(A).transmit(MacAddress::BROADCAST, &[7; 4], 0).unwrap();
        net.run_until(100_000).unwrap();

        assert_eq!(kinds(&net), std::vec![(A, FrameKind::Data)]);
        assert_eq!(net.log()[0].frame.duration, 0);

        assert!(matches!(net.station(A).poll_event(), Some(MacEvent::Sent{ .. })));
        assert!(net.station(B).take_received().is_some());
        assert_eq!(net.station(B).stats().acks_sent, 0);
    }

    #[test]
    fn multicast_internal_collision() {
        // Best effort and voice share an AIFS so their backoffs expire together
        let config = Config{ aifsn: [7, 2, 2, 2], ..Default::default() };
        let mut net = network(config, SimRng::constant(0));

        net.station(A).transmit(MacAddress::BROADCAST, &[0], 0).unwrap();
        net.station(A).transmit(MacAddress::BROADCAST, &[6], 6).unwrap();
        net.run_until(100_000).unwrap();

        let sent: Vec<_> = net.log().iter().map(|t| (t.frame.priority, t.frame.is_retry(), t.collided)).collect();

        // Voice wins, best effort retries after the medium frees
        assert_eq!(sent, std::vec![(6, false, false), (0, true, false)]);

        let a = net.station(A);
        assert_eq!(a.stats().internal_collisions, 1);
        assert_eq!(a.stats().tx_success, 2);
    }

    #[test]
    fn contending_stations_collide_and_recover() {
        let mut net = Network::new(PhyMode::dsss());
        for i in 0..3 {
            let config = Config{ address: MacAddress::local(i + 1), ..Default::default() };
            net.add_station(config, SimRng::seeded(i + 11)).unwrap();
        }

        // Both senders draw from their own sequences, collisions are retried
        for i in 0..2 {
            for n in 0..3 {
                net.station(i).transmit(MacAddress::local(3), &[i as u8, n], 0).unwrap();
            }
        }
        net.run_until(10_000_000).unwrap();

        let mut delivered = 0;
        while net.station(2).take_received().is_some() {
            delivered += 1;
        }

        assert_eq!(delivered, 6);
        assert_eq!(net.station(0).stats().tx_success, 3);
        assert_eq!(net.station(1).stats().tx_success, 3);
    }

    #[test]
    fn cts_sent_after_sifs() {
        let mut net = network(Config::default(), SimRng::constant(0));

        let rts = Frame::rts(MacAddress::local(2), MacAddress::local(1), 2000);
        net.station(A).lower_frame_received(rts, true).unwrap();
        net.run_until(100_000).unwrap();

        let log = net.log();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].source, A);
        assert_eq!(log[0].frame.kind, FrameKind::Cts);
        assert_eq!(log[0].frame.receiver, MacAddress::local(2));
        assert_eq!(log[0].start, PhyMode::dsss().sifs);

        assert_eq!(log[0].frame.duration as Ts, PhyMode::dsss().cts_nav(2000));

        // No exchange at B was waiting for it
        assert_eq!(net.station(B).stats().rx_unrecognised, 1);
    }
}

//! 802.11 contention simulation
//!
//! Runs a set of stations sharing a single collision domain, each offering
//! periodic traffic to its neighbour, and reports per station statistics.
//
// wlan-mac, IEEE 802.11 DCF / EDCA MAC
// SPDX-License-Identifier: MPL-2.0

use log::{debug, info, warn};

use structopt::StructOpt;
use humantime::Duration;

use wlan_mac::prelude::*;
use wlan_mac::mock::{Network, SimRng};


#[derive(Debug, StructOpt)]
struct Options {

    #[structopt(long, default_value="4")]
    /// Number of stations in the collision domain
    pub stations: u32,

    #[structopt(long, default_value="1s")]
    /// Simulated time to run for
    pub duration: Duration,

    #[structopt(long, default_value="5ms")]
    /// Interval between frames offered by each station
    pub interval: Duration,

    #[structopt(long, default_value="256")]
    /// Payload length in bytes
    pub payload_len: usize,

    #[structopt(long, default_value="2346")]
    /// Frames longer than this are protected by RTS/CTS
    pub rts_threshold: usize,

    #[structopt(long)]
    /// Use OFDM timing (default is DSSS)
    pub ofdm: bool,

    #[structopt(long)]
    /// Send group addressed frames instead of unicast
    pub broadcast: bool,

    #[structopt(long, default_value="1")]
    /// Seed for the backoff random sources
    pub seed: u32,

    #[structopt(long, default_value = "info")]
    /// Configure log level
    pub log_level: simplelog::LevelFilter,
}

fn main() -> anyhow::Result<()> {
    // Load options
    let opts = Options::from_args();

    // Initialise logging
    let log_cfg = simplelog::ConfigBuilder::new().build();
    let _ = simplelog::SimpleLogger::init(opts.log_level, log_cfg);

    info!("Starting contention simulation ({} stations)", opts.stations);

    if opts.stations < 2 {
        return Err(anyhow::anyhow!("At least two stations are required"));
    }

    let phy = match opts.ofdm {
        true => PhyMode::ofdm(),
        false => PhyMode::dsss(),
    };

    let mut net = Network::new(phy);

    for i in 0..opts.stations {
        let config = MacConfig {
            address: MacAddress::local(i + 1),
            rts_threshold: opts.rts_threshold,
            ..Default::default()
        };

        let rng = SimRng::seeded(opts.seed.wrapping_add(i).wrapping_mul(0x9e37_79b9));

        if let Err(e) = net.add_station(config, rng) {
            return Err(anyhow::anyhow!("Error initialising station {}: {:?}", i, e));
        }
    }

    let end = opts.duration.as_micros() as Ts;
    let interval = (opts.interval.as_micros() as Ts).max(1);
    let payload = vec![0xa5u8; opts.payload_len];

    debug!("Starting loop");

    let mut offered = vec![0u32; opts.stations as usize];
    let mut t = 0;

    while t < end {
        // Offer one frame per station
        for i in 0..opts.stations {
            let dest = match opts.broadcast {
                true => MacAddress::BROADCAST,
                false => MacAddress::local((i + 1) % opts.stations + 1),
            };

            if let Err(e) = net.station(i as usize).transmit(dest, &payload, (i % 8) as u8) {
                warn!("Station {} TX error: {:?}", i, e);
            }
            offered[i as usize] += 1;
        }

        t += interval;

        if let Err(e) = net.run_until(t) {
            return Err(anyhow::anyhow!("Simulation error at {} us: {:?}", net.now(), e));
        }
    }

    let airtime: Ts = net.log().iter().map(|f| f.end - f.start).sum();
    let collided = net.log().iter().filter(|f| f.collided).count();

    info!("Simulated {} us, {} transmissions ({} collided), medium busy {:.1}%",
        net.now(), net.log().len(), collided, airtime as f64 * 100.0 / net.now().max(1) as f64);

    for i in 0..opts.stations as usize {
        let mac = net.station(i);

        let mut received = 0;
        while mac.take_received().is_some() {
            received += 1;
        }

        let s = mac.stats();
        info!("Station {} ({}): offered {} sent {} failed {} dropped {} retries {} internal collisions {} received {}",
            i, mac.address(), offered[i], s.tx_success, s.tx_failed, s.queue_drops,
            s.retransmissions, s.internal_collisions, received);
    }

    Ok(())
}

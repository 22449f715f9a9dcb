//! PHY mode table
//!
//! Inter-frame spaces, slot times and frame airtime calculations for the
//! supported PHY modes. These are pure lookups, rate adaptation is not
//! supported so each station uses a single data and basic bitrate.
//
// wlan-mac, IEEE 802.11 DCF / EDCA MAC
// SPDX-License-Identifier: MPL-2.0

use crate::Ts;
use crate::frame::{Frame, FrameKind};

/// Length of an ACK frame in bits (including FCS)
pub const LENGTH_ACK: usize = 112;

/// Length of a CTS frame in bits (including FCS)
pub const LENGTH_CTS: usize = 112;

/// Length of an RTS frame in bits (including FCS)
pub const LENGTH_RTS: usize = 160;

/// PHY mode parameters
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct PhyMode {
    /// Short inter-frame space in microseconds
    pub sifs: Ts,

    /// Slot time in microseconds
    pub slot_time: Ts,

    /// PLCP preamble and header duration in microseconds
    pub phy_header: Ts,

    /// Bitrate for data and management frames in bits per second
    pub bitrate: u32,

    /// Bitrate for control frames in bits per second
    pub basic_bitrate: u32,

    /// Minimum contention window for this PHY
    pub cw_min: u16,
    /// Maximum contention window for this PHY
    pub cw_max: u16,
}

impl Default for PhyMode {
    fn default() -> Self {
        Self::dsss()
    }
}

impl PhyMode {
    /// 802.11b DSSS / HR-DSSS, 11 Mbps data with a 1 Mbps basic rate
    pub const fn dsss() -> Self {
        Self {
            sifs: 10,
            slot_time: 20,
            phy_header: 192,
            bitrate: 11_000_000,
            basic_bitrate: 1_000_000,
            cw_min: 31,
            cw_max: 1023,
        }
    }

    /// 802.11a OFDM, 54 Mbps data with a 6 Mbps basic rate
    pub const fn ofdm() -> Self {
        Self {
            sifs: 16,
            slot_time: 9,
            phy_header: 20,
            bitrate: 54_000_000,
            basic_bitrate: 6_000_000,
            cw_min: 15,
            cw_max: 1023,
        }
    }

    /// Airtime in microseconds for a frame of `bits` at the provided bitrate
    pub fn duration(&self, bits: usize, bitrate: u32) -> Ts {
        let bitrate = bitrate.max(1) as u64;
        let payload = (bits as u64 * 1_000_000 + bitrate - 1) / bitrate;
        self.phy_header + payload
    }

    /// Airtime for a frame, control frames are sent at the basic bitrate
    pub fn frame_duration(&self, frame: &Frame) -> Ts {
        let bitrate = match frame.kind {
            FrameKind::Rts | FrameKind::Cts | FrameKind::Ack => self.basic_bitrate,
            _ => self.bitrate,
        };
        self.duration(frame.bit_len(), bitrate)
    }

    pub fn ack_duration(&self) -> Ts {
        self.duration(LENGTH_ACK, self.basic_bitrate)
    }

    pub fn cts_duration(&self) -> Ts {
        self.duration(LENGTH_CTS, self.basic_bitrate)
    }

    pub fn rts_duration(&self) -> Ts {
        self.duration(LENGTH_RTS, self.basic_bitrate)
    }

    /// Inter-frame space for an arbitration inter-frame space number
    pub fn aifs(&self, aifsn: u8) -> Ts {
        self.sifs + aifsn as Ts * self.slot_time
    }

    /// DCF inter-frame space (AIFSN 2)
    pub fn difs(&self) -> Ts {
        self.aifs(2)
    }

    /// NAV value for a unicast data frame (covers the ACK)
    pub fn data_nav(&self) -> Ts {
        self.sifs + self.ack_duration()
    }

    /// NAV value for an RTS protecting the provided data frame
    pub fn rts_nav(&self, data: &Frame) -> Ts {
        3 * self.sifs + self.cts_duration() + self.frame_duration(data) + self.ack_duration()
    }

    /// NAV value for a CTS answering an RTS with the provided duration
    pub fn cts_nav(&self, rts_duration: Ts) -> Ts {
        rts_duration.saturating_sub(self.sifs + self.cts_duration())
    }
}

/// Clamp a NAV value into the 16-bit duration field
pub fn nav_field(d: Ts) -> u16 {
    d.min(u16::MAX as Ts) as u16
}

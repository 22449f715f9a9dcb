//! MAC configuration and access categories
//
// wlan-mac, IEEE 802.11 DCF / EDCA MAC
// SPDX-License-Identifier: MPL-2.0

use strum::{Display, EnumIter};

use crate::Ts;
use crate::error::ConfigError;
use crate::frame::{Frame, FrameKind, MacAddress};
use super::timing::PhyMode;

/// Number of EDCA access categories
pub const NUM_ACCESS_CATEGORIES: usize = 4;

/// Static capacity of each access category transmit queue
pub const MAX_QUEUE_CAPACITY: usize = 16;

/// Largest contention window accepted by the MAC
pub const MAX_CW: u16 = 32767;

/// EDCA access category, ordered by priority
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Display, EnumIter)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AccessCategory {
    #[strum(serialize = "AC_BK")]
    Background = 0,
    #[strum(serialize = "AC_BE")]
    BestEffort = 1,
    #[strum(serialize = "AC_VI")]
    Video = 2,
    #[strum(serialize = "AC_VO")]
    Voice = 3,
}

impl AccessCategory {
    pub fn index(&self) -> usize {
        *self as usize
    }

    pub fn from_index(i: usize) -> Option<Self> {
        match i {
            0 => Some(AccessCategory::Background),
            1 => Some(AccessCategory::BestEffort),
            2 => Some(AccessCategory::Video),
            3 => Some(AccessCategory::Voice),
            _ => None,
        }
    }

    /// Map an 802.1D user priority to an access category
    pub fn from_user_priority(up: u8) -> Self {
        match up & 0x07 {
            1 | 2 => AccessCategory::Background,
            0 | 3 => AccessCategory::BestEffort,
            4 | 5 => AccessCategory::Video,
            _ => AccessCategory::Voice,
        }
    }
}

/// Contention parameters for one access category
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct EdcaParams {
    pub aifs: Ts,
    pub eifs: Ts,
    pub cw_min: u16,
    pub cw_max: u16,
}

/// Configuration for the 802.11 MAC
#[derive(Clone, Debug, PartialEq)]
pub struct Config {
    /// Station address, used as the transmitter of outgoing frames
    pub address: MacAddress,

    /// PHY timing and bitrates
    pub phy: PhyMode,

    /// Enable EDCA, when disabled all traffic uses the best effort category
    pub qos: bool,

    /// Arbitration inter-frame space number per access category
    pub aifsn: [u8; NUM_ACCESS_CATEGORIES],

    /// Minimum contention window for data frames (PHY default if unset)
    pub cw_min_data: Option<u16>,
    /// Maximum contention window for data frames (PHY default if unset)
    pub cw_max_data: Option<u16>,

    /// Fixed contention window for group addressed frames
    pub cw_multicast: u16,

    /// Maximum number of transmission attempts for a frame
    pub short_retry_limit: u8,

    /// Frames longer than this (in bytes, including FCS) are protected by RTS/CTS
    pub rts_threshold: usize,

    /// Maximum number of data frames queued per access category,
    /// management frames are only limited by the queue capacity
    pub max_queue_size: usize,

    /// Queue group addressed data ahead of unicast data
    pub prioritize_multicast: bool,

    /// ACK timeout override in microseconds
    pub ack_timeout: Option<Ts>,
    /// CTS timeout override in microseconds
    pub cts_timeout: Option<Ts>,

    /// Suppress delivery of retransmitted duplicates
    pub duplicate_detection: bool,
    /// Forget transmitters not heard from for this long (microseconds)
    pub duplicate_timeout: Option<Ts>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            address: MacAddress::UNSPECIFIED,
            phy: PhyMode::dsss(),
            qos: true,
            aifsn: [7, 3, 2, 2],

            cw_min_data: None,
            cw_max_data: None,
            cw_multicast: 31,

            short_retry_limit: 7,
            rts_threshold: 2346,
            max_queue_size: 14,
            prioritize_multicast: false,

            ack_timeout: None,
            cts_timeout: None,

            duplicate_detection: true,
            duplicate_timeout: Some(10_000_000),
        }
    }
}

impl Config {
    /// Legacy DCF configuration, all traffic is sent as best effort after DIFS
    pub fn dcf() -> Self {
        Self {
            qos: false,
            aifsn: [2; NUM_ACCESS_CATEGORIES],
            ..Default::default()
        }
    }

    /// Check the configuration is usable
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.short_retry_limit == 0 {
            return Err(ConfigError::RetryLimit(self.short_retry_limit));
        }

        let (min, max) = (self.cw_min(), self.cw_max());
        if max > MAX_CW || min > max {
            return Err(ConfigError::ContentionWindow{ min, max });
        }

        if self.cw_multicast > MAX_CW {
            return Err(ConfigError::ContentionWindow{ min: self.cw_multicast, max: self.cw_multicast });
        }

        for (i, n) in self.aifsn.iter().enumerate() {
            if *n >= 16 {
                // Index is always in range for the fixed size array
                let ac = AccessCategory::from_index(i).unwrap_or(AccessCategory::BestEffort);
                return Err(ConfigError::Aifsn(ac, *n));
            }
        }

        if self.max_queue_size == 0 || self.max_queue_size > MAX_QUEUE_CAPACITY {
            return Err(ConfigError::QueueSize(self.max_queue_size));
        }

        if self.phy.slot_time == 0 || self.phy.bitrate == 0 || self.phy.basic_bitrate == 0 {
            return Err(ConfigError::PhyMode);
        }

        Ok(())
    }

    pub fn cw_min(&self) -> u16 {
        self.cw_min_data.unwrap_or(self.phy.cw_min)
    }

    pub fn cw_max(&self) -> u16 {
        self.cw_max_data.unwrap_or(self.phy.cw_max)
    }

    pub fn sifs(&self) -> Ts {
        self.phy.sifs
    }

    pub fn slot_time(&self) -> Ts {
        self.phy.slot_time
    }

    pub fn ack_timeout(&self) -> Ts {
        self.ack_timeout.unwrap_or(self.phy.sifs + self.phy.slot_time + self.phy.ack_duration())
    }

    pub fn cts_timeout(&self) -> Ts {
        self.cts_timeout.unwrap_or(self.phy.sifs + self.phy.slot_time + self.phy.cts_duration())
    }

    /// EDCA parameters for an access category
    pub fn edca(&self, ac: AccessCategory) -> EdcaParams {
        let (cw_min, cw_max) = (self.cw_min(), self.cw_max());

        let (cw_min, cw_max) = match ac {
            AccessCategory::Background | AccessCategory::BestEffort => (cw_min, cw_max),
            AccessCategory::Video => (((cw_min + 1) / 2).saturating_sub(1), cw_min),
            AccessCategory::Voice => (((cw_min + 1) / 4).saturating_sub(1), ((cw_min + 1) / 2).saturating_sub(1)),
        };

        let aifs = self.phy.aifs(self.aifsn[ac.index()]);

        EdcaParams {
            aifs,
            eifs: self.phy.sifs + aifs + self.phy.ack_duration(),
            cw_min,
            cw_max,
        }
    }

    /// Select the access category for an outgoing frame
    pub fn classify(&self, frame: &Frame) -> AccessCategory {
        if !self.qos {
            return AccessCategory::BestEffort;
        }

        match frame.kind {
            FrameKind::Management => AccessCategory::Voice,
            _ => AccessCategory::from_user_priority(frame.priority),
        }
    }

    /// Whether a frame should be protected by an RTS/CTS exchange
    pub fn use_rts(&self, frame: &Frame) -> bool {
        !frame.is_group_addressed() && frame.byte_len() > self.rts_threshold
    }
}

//! WLAN MAC crate prelude
//
// wlan-mac, IEEE 802.11 DCF / EDCA MAC
// SPDX-License-Identifier: MPL-2.0

pub use crate::{Radio, Ts};

pub use crate::mac::{Mac, UpperMac, MacEvent, MacStats, Config as MacConfig, AccessCategory, PhyMode};
pub use crate::mac::medium::{ReceptionState, TransmissionState};
pub use crate::mac::queue::{PacketSource, NoSource};

pub use crate::error::{CoreError, ProtocolError, FrameError, ConfigError};
pub use crate::timer::{Timer as MacTimer};

pub use crate::frame::{Frame, FrameKind, FrameFlags, MacAddress};

//! IEEE 802.11 MAC frames
//!
//! Owned frame representation with a bounded payload and a little-endian
//! 802.11 style encoding. The FCS is appended by the PHY and is not part of
//! the encoded buffer, it is however counted in [`Frame::byte_len`].
//
// wlan-mac, IEEE 802.11 DCF / EDCA MAC
// SPDX-License-Identifier: MPL-2.0

use core::fmt;

use bitflags::bitflags;
use byteorder::{ByteOrder, LittleEndian};
use heapless::Vec;

use crate::error::FrameError;

/// Maximum frame body length in bytes
pub const MAX_PAYLOAD_LEN: usize = 1500;

/// Length of a MAC address in bytes
pub const ADDRESS_LEN: usize = 6;

/// Length of the frame check sequence appended by the PHY
pub const FCS_LEN: usize = 4;

/// Maximum encoded header length (data frame with QoS control)
pub const MAX_HEADER_LEN: usize = 20;

/// QoS subtype bit of the data frame type octet
const QOS_SUBTYPE: u8 = 0x80;

/// Maximum encoded frame length (excluding FCS)
pub const MAX_FRAME_LEN: usize = MAX_HEADER_LEN + MAX_PAYLOAD_LEN;

/// Sequence numbers are 12-bit
pub const SEQ_MODULO: u16 = 4096;

/// 48-bit IEEE MAC address
#[derive(Copy, Clone, PartialEq, Eq, Hash, Default)]
pub struct MacAddress(pub [u8; ADDRESS_LEN]);

impl MacAddress {
    pub const BROADCAST: MacAddress = MacAddress([0xff; ADDRESS_LEN]);

    pub const UNSPECIFIED: MacAddress = MacAddress([0x00; ADDRESS_LEN]);

    /// Build a locally administered unicast address from an integer
    pub fn local(id: u32) -> Self {
        let b = id.to_be_bytes();
        MacAddress([0x02, 0x00, b[0], b[1], b[2], b[3]])
    }

    pub fn is_broadcast(&self) -> bool {
        *self == Self::BROADCAST
    }

    /// Group addressed (multicast or broadcast)
    pub fn is_multicast(&self) -> bool {
        self.0[0] & 0x01 != 0
    }

    pub fn is_unspecified(&self) -> bool {
        *self == Self::UNSPECIFIED
    }
}

impl From<[u8; ADDRESS_LEN]> for MacAddress {
    fn from(a: [u8; ADDRESS_LEN]) -> Self {
        MacAddress(a)
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let a = &self.0;
        write!(f, "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}", a[0], a[1], a[2], a[3], a[4], a[5])
    }
}

impl fmt::Debug for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

/// Frame kinds handled by the MAC
#[derive(Copy, Clone, Debug, PartialEq, Eq, strum::Display)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FrameKind {
    Management,
    Data,
    Rts,
    Cts,
    Ack,
}

impl FrameKind {
    /// Frame control type / subtype octet
    fn type_octet(&self) -> u8 {
        match self {
            // Action
            FrameKind::Management => 0xd0,
            // Data, the QoS subtype bit is set by the frame
            FrameKind::Data => 0x08,
            FrameKind::Rts => 0xb4,
            FrameKind::Cts => 0xc4,
            FrameKind::Ack => 0xd4,
        }
    }

    fn from_type_octet(v: u8) -> Result<Self, FrameError> {
        // Protocol version must be zero
        if v & 0x03 != 0 {
            return Err(FrameError::UnknownType(v));
        }

        match (v >> 2) & 0x03 {
            0 => Ok(FrameKind::Management),
            1 => match v >> 4 {
                11 => Ok(FrameKind::Rts),
                12 => Ok(FrameKind::Cts),
                13 => Ok(FrameKind::Ack),
                _ => Err(FrameError::UnknownType(v)),
            },
            2 => Ok(FrameKind::Data),
            _ => Err(FrameError::UnknownType(v)),
        }
    }

    /// Data and management frames carry a transmitter and sequence control
    pub fn is_data_or_mgmt(&self) -> bool {
        matches!(self, FrameKind::Data | FrameKind::Management)
    }

    pub fn is_control(&self) -> bool {
        !self.is_data_or_mgmt()
    }

    /// Encoded header length for this kind, `qos` adds the QoS control
    /// field of data frames
    pub fn header_len(&self, qos: bool) -> usize {
        match self {
            FrameKind::Cts | FrameKind::Ack => 4 + ADDRESS_LEN,
            FrameKind::Rts => 4 + 2 * ADDRESS_LEN,
            FrameKind::Management => 4 + 2 * ADDRESS_LEN + 2,
            FrameKind::Data if qos => 4 + 2 * ADDRESS_LEN + 2 + 2,
            FrameKind::Data => 4 + 2 * ADDRESS_LEN + 2,
        }
    }
}

bitflags! {
    /// Frame control flags (second octet)
    pub struct FrameFlags: u8 {
        const TO_DS = 0x01;
        const FROM_DS = 0x02;
        const MORE_FRAGMENTS = 0x04;
        const RETRY = 0x08;
        const POWER_MGMT = 0x10;
        const MORE_DATA = 0x20;
        const PROTECTED = 0x40;
        const ORDER = 0x80;
    }
}

/// Frame object represents an IEEE 802.11 MAC frame with owned storage
#[derive(Clone, Debug, PartialEq)]
pub struct Frame {
    pub kind: FrameKind,
    pub flags: FrameFlags,

    /// Duration / NAV value in microseconds
    pub duration: u16,

    /// Receiver address (RA)
    pub receiver: MacAddress,
    /// Transmitter address (TA), unspecified for CTS and ACK frames
    pub transmitter: MacAddress,

    /// 12-bit sequence number (data and management frames)
    pub seq: u16,

    /// 802.1D user priority (carried in QoS control for data frames)
    pub priority: u8,

    /// QoS data subtype, data frames without it carry no priority on air
    pub qos: bool,

    payload: Vec<u8, MAX_PAYLOAD_LEN>,
}

impl Frame {
    fn new(kind: FrameKind, receiver: MacAddress, transmitter: MacAddress, duration: u16) -> Self {
        Frame {
            kind,
            flags: FrameFlags::empty(),
            duration,
            receiver,
            transmitter,
            seq: 0,
            priority: 0,
            qos: kind == FrameKind::Data,
            payload: Vec::new(),
        }
    }

    /// Build a data frame, the transmitter and sequence number are
    /// assigned by the MAC on transmission
    pub fn data(receiver: MacAddress, data: &[u8]) -> Result<Self, FrameError> {
        let mut f = Self::new(FrameKind::Data, receiver, MacAddress::UNSPECIFIED, 0);
        f.set_payload(data)?;
        Ok(f)
    }

    /// Build a management (action) frame
    pub fn management(receiver: MacAddress, data: &[u8]) -> Result<Self, FrameError> {
        let mut f = Self::new(FrameKind::Management, receiver, MacAddress::UNSPECIFIED, 0);
        f.set_payload(data)?;
        Ok(f)
    }

    pub fn rts(transmitter: MacAddress, receiver: MacAddress, duration: u16) -> Self {
        Self::new(FrameKind::Rts, receiver, transmitter, duration)
    }

    pub fn cts(receiver: MacAddress, duration: u16) -> Self {
        Self::new(FrameKind::Cts, receiver, MacAddress::UNSPECIFIED, duration)
    }

    pub fn ack(receiver: MacAddress, duration: u16) -> Self {
        Self::new(FrameKind::Ack, receiver, MacAddress::UNSPECIFIED, duration)
    }

    /// Set the user priority for QoS classification
    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = priority & 0x07;
        self
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn set_payload(&mut self, data: &[u8]) -> Result<(), FrameError> {
        self.payload = Vec::from_slice(data)
            .map_err(|_| FrameError::PayloadTooLong(data.len()))?;
        Ok(())
    }

    pub fn is_retry(&self) -> bool {
        self.flags.contains(FrameFlags::RETRY)
    }

    pub fn set_retry(&mut self, retry: bool) {
        self.flags.set(FrameFlags::RETRY, retry);
    }

    /// Frame is addressed to a group (multicast or broadcast)
    pub fn is_group_addressed(&self) -> bool {
        self.receiver.is_multicast()
    }

    /// Encoded header length
    pub fn header_len(&self) -> usize {
        self.kind.header_len(self.qos)
    }

    /// Length on air in bytes including the FCS
    pub fn byte_len(&self) -> usize {
        self.header_len() + self.payload.len() + FCS_LEN
    }

    /// Length on air in bits including the FCS
    pub fn bit_len(&self) -> usize {
        self.byte_len() * 8
    }

    /// Encode the frame (excluding FCS) into the provided buffer,
    /// returning the encoded length
    pub fn encode(&self, buf: &mut [u8]) -> Result<usize, FrameError> {
        let header_len = self.header_len();
        let len = header_len + self.payload.len();

        if buf.len() < len {
            return Err(FrameError::BufferTooSmall);
        }

        // Frame control and duration
        buf[0] = match self.kind {
            FrameKind::Data if self.qos => self.kind.type_octet() | QOS_SUBTYPE,
            _ => self.kind.type_octet(),
        };
        buf[1] = self.flags.bits();
        LittleEndian::write_u16(&mut buf[2..4], self.duration);

        // Receiver address
        buf[4..10].copy_from_slice(&self.receiver.0);

        // Transmitter address
        if header_len > 10 {
            buf[10..16].copy_from_slice(&self.transmitter.0);
        }

        // Sequence control, fragment number is always zero
        if self.kind.is_data_or_mgmt() {
            LittleEndian::write_u16(&mut buf[16..18], (self.seq % SEQ_MODULO) << 4);
        }

        // QoS control
        if self.kind == FrameKind::Data && self.qos {
            LittleEndian::write_u16(&mut buf[18..20], self.priority as u16 & 0x07);
        }

        // Frame body
        buf[header_len..len].copy_from_slice(&self.payload);

        Ok(len)
    }

    /// Decode a frame (excluding FCS) from the provided buffer
    pub fn decode(buf: &[u8]) -> Result<Self, FrameError> {
        if buf.len() < 2 {
            return Err(FrameError::NotEnoughBytes);
        }

        let kind = FrameKind::from_type_octet(buf[0])?;
        let qos = kind == FrameKind::Data && buf[0] & QOS_SUBTYPE != 0;
        let header_len = kind.header_len(qos);
        if buf.len() < header_len {
            return Err(FrameError::NotEnoughBytes);
        }

        let mut f = Frame::new(
            kind,
            MacAddress(read_address(&buf[4..10])),
            MacAddress::UNSPECIFIED,
            LittleEndian::read_u16(&buf[2..4]),
        );
        f.flags = FrameFlags::from_bits_truncate(buf[1]);
        f.qos = qos;

        if header_len > 10 {
            f.transmitter = MacAddress(read_address(&buf[10..16]));
        }

        if kind.is_data_or_mgmt() {
            f.seq = LittleEndian::read_u16(&buf[16..18]) >> 4;
        }

        if qos {
            f.priority = (LittleEndian::read_u16(&buf[18..20]) & 0x07) as u8;
        }

        f.set_payload(&buf[header_len..])?;

        Ok(f)
    }
}

fn read_address(b: &[u8]) -> [u8; ADDRESS_LEN] {
    let mut a = [0u8; ADDRESS_LEN];
    a.copy_from_slice(&b[..ADDRESS_LEN]);
    a
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn control_frame_lengths() {
        let a = MacAddress::local(1);
        let b = MacAddress::local(2);

        // Lengths on air match the 802.11 control frame sizes
        assert_eq!(Frame::rts(a, b, 0).bit_len(), 160);
        assert_eq!(Frame::cts(a, 0).bit_len(), 112);
        assert_eq!(Frame::ack(a, 0).bit_len(), 112);
    }

    #[test]
    fn encode_decode_data() {
        let mut f = Frame::data(MacAddress::local(2), &[0, 1, 2, 3, 4, 5]).unwrap()
            .with_priority(6);
        f.transmitter = MacAddress::local(1);
        f.seq = 4095;
        f.duration = 314;
        f.set_retry(true);

        let mut buff = [0u8; MAX_FRAME_LEN];
        let n = f.encode(&mut buff).unwrap();

        assert_eq!(n, MAX_HEADER_LEN + 6);
        assert_eq!(buff[0], 0x88);
        assert_eq!(buff[1], FrameFlags::RETRY.bits());
        assert_eq!(&buff[2..4], &[0x3a, 0x01]);

        let d = Frame::decode(&buff[..n]).unwrap();
        assert_eq!(d, f);
        assert!(d.is_retry());
    }

    #[test]
    fn decode_non_qos_data() {
        // Data subtype 0, no QoS control field before the body
        let raw = [
            0x08, 0x00, 0x00, 0x00,
            0x02, 0x00, 0x00, 0x00, 0x00, 0x02,
            0x02, 0x00, 0x00, 0x00, 0x00, 0x01,
            0x50, 0x00,
            0xde, 0xad,
        ];

        let f = Frame::decode(&raw).unwrap();

        assert_eq!(f.kind, FrameKind::Data);
        assert!(!f.qos);
        assert_eq!(f.priority, 0);
        assert_eq!(f.seq, 5);
        assert_eq!(f.transmitter, MacAddress::local(1));
        assert_eq!(f.payload(), &[0xde, 0xad]);
        assert_eq!(f.byte_len(), raw.len() + FCS_LEN);

        // Re-encodes without the QoS subtype
        let mut buff = [0u8; 32];
        let n = f.encode(&mut buff).unwrap();
        assert_eq!(&buff[..n], &raw[..]);
    }

    #[test]
    fn decode_ack() {
        let raw = [0xd4, 0x00, 0x00, 0x00, 0x02, 0x00, 0x00, 0x00, 0x00, 0x07];

        let f = Frame::decode(&raw).unwrap();

        assert_eq!(f.kind, FrameKind::Ack);
        assert_eq!(f.receiver, MacAddress::local(7));
        assert_eq!(f.transmitter, MacAddress::UNSPECIFIED);
        assert!(f.payload().is_empty());
    }

    #[test]
    fn decode_errors() {
        assert_eq!(Frame::decode(&[0xd4]), Err(FrameError::NotEnoughBytes));
        assert_eq!(Frame::decode(&[0xb4, 0x00, 0x00, 0x00, 0x02]), Err(FrameError::NotEnoughBytes));
        // Control frame subtype 0 is reserved
        assert_eq!(Frame::decode(&[0x04, 0x00]), Err(FrameError::UnknownType(0x04)));
        // Extension frame type
        assert_eq!(Frame::decode(&[0x0c, 0x00]), Err(FrameError::UnknownType(0x0c)));
    }

    #[test]
    fn payload_limits() {
        let big = [0u8; MAX_PAYLOAD_LEN + 1];
        assert_eq!(
            Frame::data(MacAddress::BROADCAST, &big),
            Err(FrameError::PayloadTooLong(MAX_PAYLOAD_LEN + 1))
        );

        let f = Frame::data(MacAddress::BROADCAST, &big[..10]).unwrap();
        let mut small = [0u8; 8];
        assert_eq!(f.encode(&mut small), Err(FrameError::BufferTooSmall));
    }

    #[test]
    fn address_groups() {
        assert!(MacAddress::BROADCAST.is_multicast());
        assert!(MacAddress::BROADCAST.is_broadcast());
        assert!(MacAddress([0x01, 0x00, 0x5e, 0x00, 0x00, 0x01]).is_multicast());
        assert!(!MacAddress::local(3).is_multicast());
    }
}

//! MAC error types
//
// wlan-mac, IEEE 802.11 DCF / EDCA MAC
// SPDX-License-Identifier: MPL-2.0

use core::fmt;

use crate::frame::FrameKind;
use crate::mac::config::AccessCategory;

/// Basic MAC errors
#[derive(Debug, Clone, PartialEq)]
pub enum CoreError<E> {
    /// Wrapper for unhandled / underlying radio errors
    Radio(E),

    /// Protocol violation (programming error in the MAC or a frame exchange)
    Protocol(ProtocolError),

    /// Frame encoding / decoding error
    Frame(FrameError),

    /// Invalid MAC configuration
    Config(ConfigError),
}

impl <E> From<ProtocolError> for CoreError<E> {
    fn from(e: ProtocolError) -> Self {
        CoreError::Protocol(e)
    }
}

impl <E> From<FrameError> for CoreError<E> {
    fn from(e: FrameError) -> Self {
        CoreError::Frame(e)
    }
}

impl <E> From<ConfigError> for CoreError<E> {
    fn from(e: ConfigError) -> Self {
        CoreError::Config(e)
    }
}

impl <E: fmt::Debug> fmt::Display for CoreError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CoreError::Radio(e) => write!(f, "radio error: {:?}", e),
            CoreError::Protocol(e) => write!(f, "protocol violation: {}", e),
            CoreError::Frame(e) => write!(f, "frame error: {}", e),
            CoreError::Config(e) => write!(f, "invalid configuration: {}", e),
        }
    }
}

/// Protocol violations.
///
/// These indicate a bug in the MAC or one of its frame exchanges rather than
/// a network condition, and abort the operation that raised them.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ProtocolError {
    /// A second operation was issued within a single step
    OperationAlreadyIssued { step: usize },

    /// A step completed without issuing an operation
    NoOperation { step: usize },

    /// A step index with no handler was reached
    UnknownStep { step: usize },

    /// Too many consecutive goto operations without suspending
    GotoLoop { step: usize },

    /// An event was delivered to an exchange that has already finished
    ExchangeFinished,

    /// An event arrived that does not match the outstanding operation
    UnexpectedEvent { step: usize, event: &'static str },

    /// Transmit requested on a contention channel that is already in use
    ChannelBusy(AccessCategory),

    /// Transmit requested while an immediate transmission is outstanding
    ImmediateBusy,

    /// Transmission finished with no channel transmitting
    NotTransmitting,

    /// Event for an access category with no active exchange
    NoExchange(AccessCategory),

    /// Control frames are generated by the MAC and cannot be queued from above
    ControlFrame(FrameKind),
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolError::OperationAlreadyIssued { step } => write!(f, "operation already issued in step {}", step),
            ProtocolError::NoOperation { step } => write!(f, "step {} issued no operation", step),
            ProtocolError::UnknownStep { step } => write!(f, "unknown step {}", step),
            ProtocolError::GotoLoop { step } => write!(f, "goto loop at step {}", step),
            ProtocolError::ExchangeFinished => write!(f, "frame exchange already finished"),
            ProtocolError::UnexpectedEvent { step, event } => write!(f, "unexpected {} in step {}", event, step),
            ProtocolError::ChannelBusy(ac) => write!(f, "contention channel {} busy", ac),
            ProtocolError::ImmediateBusy => write!(f, "immediate channel busy"),
            ProtocolError::NotTransmitting => write!(f, "transmission finished with no transmitting channel"),
            ProtocolError::NoExchange(ac) => write!(f, "no active frame exchange for {}", ac),
            ProtocolError::ControlFrame(kind) => write!(f, "{} frame from the layer above", kind),
        }
    }
}

/// Frame encoding / decoding errors
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FrameError {
    /// Output buffer too small for the encoded frame
    BufferTooSmall,

    /// Input ended before the frame header was complete
    NotEnoughBytes,

    /// Frame control field does not describe a supported frame
    UnknownType(u8),

    /// Payload exceeds the maximum frame body
    PayloadTooLong(usize),
}

impl fmt::Display for FrameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FrameError::BufferTooSmall => write!(f, "buffer too small"),
            FrameError::NotEnoughBytes => write!(f, "not enough bytes"),
            FrameError::UnknownType(t) => write!(f, "unknown frame type 0x{:02x}", t),
            FrameError::PayloadTooLong(n) => write!(f, "payload too long ({} bytes)", n),
        }
    }
}

/// Configuration errors
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConfigError {
    /// Retry limit must allow at least one transmission
    RetryLimit(u8),

    /// Contention window outside of 0..=32767 or min > max
    ContentionWindow { min: u16, max: u16 },

    /// AIFSN must be below 16
    Aifsn(AccessCategory, u8),

    /// Queue size exceeds the static queue capacity
    QueueSize(usize),

    /// Slot time and bitrates must be non-zero
    PhyMode,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::RetryLimit(n) => write!(f, "retry limit {} out of range", n),
            ConfigError::ContentionWindow { min, max } => write!(f, "contention window {}..{} out of range", min, max),
            ConfigError::Aifsn(ac, n) => write!(f, "AIFSN {} for {} out of range", n, ac),
            ConfigError::QueueSize(n) => write!(f, "queue size {} exceeds capacity", n),
            ConfigError::PhyMode => write!(f, "invalid PHY mode"),
        }
    }
}

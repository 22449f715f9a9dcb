//! IEEE 802.11 DCF / EDCA MAC
//!
//! Contention based medium access (CSMA/CA with NAV), step driven frame
//! exchanges (DATA/ACK, RTS/CTS/DATA/ACK and group addressed data) and per
//! access category queueing, usable in `no_std` environments.
//
// wlan-mac, IEEE 802.11 DCF / EDCA MAC
// SPDX-License-Identifier: MPL-2.0

#![no_std]

use core::fmt::Debug;

#[cfg(any(test, feature="std"))]
extern crate std;

pub mod timer;

pub mod frame;

pub mod mac;

pub mod error;

pub mod prelude;

#[cfg(any(test, feature="mocks"))]
pub mod mock;

/// Timestamps are 64-bit in microseconds
pub type Ts = u64;

/// Radio interface combines the `radio` traits required by the MAC
pub trait Radio<E: Debug>: radio::Transmit<Error=E> + radio::Receive<Error=E> {}

/// Default Radio impl for radio devices
impl <T, E: Debug> Radio<E> for T where
    T: radio::Transmit<Error=E> + radio::Receive<Error=E>,
{}

//! Transmit queues
//!
//! Per access category frame queue with management and (optionally) group
//! addressed frames ordered ahead of unicast data, and the [`PacketSource`]
//! trait for pulling frames from an external passive queue.
//
// wlan-mac, IEEE 802.11 DCF / EDCA MAC
// SPDX-License-Identifier: MPL-2.0

use heapless::{Deque, Vec};

use crate::frame::{Frame, FrameKind};
use super::config::MAX_QUEUE_CAPACITY;

/// External queue the MAC pulls frames from when its own queues have room
pub trait PacketSource {
    /// Take the next frame for transmission, if any
    fn request_packet(&mut self) -> Option<Frame>;
}

/// Source that never supplies frames, used when frames are pushed through
/// [`Mac::transmit`](super::Mac::transmit)
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct NoSource;

impl PacketSource for NoSource {
    fn request_packet(&mut self) -> Option<Frame> {
        None
    }
}

impl <const N: usize> PacketSource for Deque<Frame, N> {
    fn request_packet(&mut self) -> Option<Frame> {
        self.pop_front()
    }
}

/// Bounded transmit queue.
///
/// Frames are ranked management first, then group addressed data when
/// `prioritize_multicast` is set, then all other data. Frames of equal rank
/// keep their arrival order.
#[derive(Clone, Debug, PartialEq)]
pub struct FrameQueue {
    frames: Vec<Frame, MAX_QUEUE_CAPACITY>,
    prioritize_multicast: bool,
}

impl FrameQueue {
    pub fn new(prioritize_multicast: bool) -> Self {
        Self {
            frames: Vec::new(),
            prioritize_multicast,
        }
    }

    fn rank(&self, frame: &Frame) -> u8 {
        match frame.kind {
            FrameKind::Management => 0,
            _ if self.prioritize_multicast && frame.is_group_addressed() => 1,
            _ => 2,
        }
    }

    /// Insert a frame behind every frame of equal or higher rank,
    /// returning it when the queue is full
    pub fn push(&mut self, frame: Frame) -> Result<(), Frame> {
        let rank = self.rank(&frame);
        let pos = self.frames.iter()
            .position(|f| self.rank(f) > rank)
            .unwrap_or(self.frames.len());

        self.frames.insert(pos, frame)
    }

    pub fn pop_front(&mut self) -> Option<Frame> {
        if self.frames.is_empty() {
            return None;
        }
        Some(self.frames.remove(0))
    }

    pub fn front(&self) -> Option<&Frame> {
        self.frames.first()
    }

    pub fn iter(&self) -> impl Iterator<Item=&Frame> {
        self.frames.iter()
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.frames.is_full()
    }
}

#[cfg(test)]
mod test {
    use std::vec::Vec;

    use super::*;
    use crate::frame::MacAddress;

    fn data(to: MacAddress, tag: u8) -> Frame {
        Frame::data(to, &[tag]).unwrap()
    }

    fn mgmt(tag: u8) -> Frame {
        Frame::management(MacAddress::local(2), &[tag]).unwrap()
    }

    fn tags(q: &FrameQueue) -> Vec<u8> {
        q.iter().map(|f| f.payload()[0]).collect()
    }

    #[test]
    fn management_ahead_of_data() {
        let mut q = FrameQueue::new(false);

        q.push(data(MacAddress::local(2), 1)).unwrap();
        q.push(data(MacAddress::BROADCAST, 2)).unwrap();
        q.push(mgmt(3)).unwrap();
        q.push(data(MacAddress::local(2), 4)).unwrap();
        q.push(mgmt(5)).unwrap();

        assert_eq!(tags(&q), std::vec![3, 5, 1, 2, 4]);

        assert_eq!(q.pop_front().map(|f| f.kind), Some(FrameKind::Management));
        assert_eq!(q.len(), 4);
    }

    #[test]
    fn multicast_ahead_of_unicast() {
        let mut q = FrameQueue::new(true);

        q.push(data(MacAddress::local(2), 1)).unwrap();
        q.push(data(MacAddress::local(3), 2)).unwrap();
        q.push(data(MacAddress::BROADCAST, 3)).unwrap();
        q.push(mgmt(4)).unwrap();
        q.push(data(MacAddress::BROADCAST, 5)).unwrap();

        assert_eq!(tags(&q), std::vec![4, 3, 5, 1, 2]);
    }

    #[test]
    fn full_queue_returns_frame() {
        let mut q = FrameQueue::new(false);

        for i in 0..MAX_QUEUE_CAPACITY {
            q.push(data(MacAddress::local(2), i as u8)).unwrap();
        }
        assert!(q.is_full());

        let f = mgmt(0xff);
        assert_eq!(q.push(f.clone()), Err(f));

        while q.pop_front().is_some() {}
        assert!(q.is_empty());
        assert_eq!(q.front(), None);
    }

    #[test]
    fn deque_source() {
        let mut d: Deque<Frame, 2> = Deque::new();
        d.push_back(mgmt(1)).unwrap();

        assert_eq!(d.request_packet(), Some(mgmt(1)));
        assert_eq!(d.request_packet(), None);
        assert_eq!(NoSource.request_packet(), None);
    }
}

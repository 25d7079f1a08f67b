//! The receiver's out-of-order segment buffer (C4) and SACK block
//! generation. Not internally synchronized; callers hold it behind a
//! `Mutex`, per §5.

use std::collections::BTreeMap;

use crate::packet::{self, Packet, MAX_SACK_BLOCKS};

#[derive(Debug)]
pub struct RecvWindow {
    capacity: usize,
    segment_size: usize,
    expected_seq: u32,
    entries: BTreeMap<u32, Packet>,
}

impl RecvWindow {
    pub fn new(capacity: usize, segment_size: usize, initial_seq: u32) -> Self {
        RecvWindow {
            capacity,
            segment_size,
            expected_seq: initial_seq,
            entries: BTreeMap::new(),
        }
    }

    pub fn expected_seq(&self) -> u32 {
        self.expected_seq
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn advertised_window(&self) -> u16 {
        (self.capacity.saturating_sub(self.entries.len())).min(u16::MAX as usize) as u16
    }

    /// Inserts a segment if it falls within
    /// `[expected_seq, expected_seq + capacity * segment_size)` and is
    /// not already buffered. Out-of-range or duplicate segments are a
    /// silent no-op; `true` is returned iff the segment was accepted.
    pub fn add(&mut self, packet: Packet, seq: u32) -> bool {
        let window_bytes = (self.capacity * self.segment_size) as u32;
        let in_range = seq.wrapping_sub(self.expected_seq) < window_bytes;
        if !in_range || self.entries.contains_key(&seq) {
            return false;
        }
        self.entries.insert(seq, packet);
        true
    }

    /// Returns and removes the entry at `expected_seq` if present,
    /// advancing `expected_seq` by its payload length. Callers drain
    /// in a loop until `None`.
    pub fn take_deliverable(&mut self) -> Option<Packet> {
        let packet = self.entries.remove(&self.expected_seq)?;
        let advance = packet.header.len as u32;
        self.expected_seq = self.expected_seq.wrapping_add(advance);
        Some(packet)
    }

    /// Scans the buffered out-of-order entries and emits up to
    /// [`MAX_SACK_BLOCKS`] `(start, end)` contiguous ranges, each
    /// strictly above `expected_seq`.
    pub fn sack_blocks(&self) -> Vec<(u32, u32)> {
        let mut blocks = Vec::new();
        let mut iter = self.entries.iter().peekable();

        while let Some((&start_seq, start_packet)) = iter.next() {
            let mut end = start_seq.wrapping_add(start_packet.header.len as u32);

            while let Some((&next_seq, next_packet)) = iter.peek() {
                if *next_seq != end {
                    break;
                }
                end = next_seq.wrapping_add(next_packet.header.len as u32);
                iter.next();
            }

            blocks.push((start_seq, end.wrapping_sub(1)));
            if blocks.len() == MAX_SACK_BLOCKS {
                break;
            }
        }

        blocks
    }

    pub fn encode_sack(&self) -> Vec<u8> {
        packet::encode_sack_blocks(&self.sack_blocks())
    }

    pub fn clear(&mut self, new_expected_seq: u32) {
        self.entries.clear();
        self.expected_seq = new_expected_seq;
    }
}

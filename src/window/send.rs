//! The sender's in-flight segment table (C3). Not internally
//! synchronized — callers hold it behind a `Mutex`, per §5.

use std::collections::{BTreeMap, BTreeSet};
use std::time::Instant;

use crate::packet::{seq_lt, Packet};

#[derive(Debug)]
pub struct Entry {
    pub packet: Packet,
    pub send_time: Option<Instant>,
    pub retransmit_count: u32,
    pub acked: bool,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SendWindowError {
    #[error("send window is full")]
    WindowFull,
    #[error("sequence number {0} is already in the send window")]
    DuplicateSeq(u32),
}

#[derive(Debug)]
pub struct SendWindow {
    capacity: usize,
    entries: BTreeMap<u32, Entry>,
    sacked: BTreeSet<u32>,
}

impl SendWindow {
    pub fn new(capacity: usize) -> Self {
        SendWindow {
            capacity,
            entries: BTreeMap::new(),
            sacked: BTreeSet::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.entries.len() >= self.capacity
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Appends a new outbound segment. Fails if the window is at
    /// capacity or `seq` is already tracked.
    pub fn add(&mut self, packet: Packet, seq: u32) -> Result<(), SendWindowError> {
        if self.entries.len() >= self.capacity {
            return Err(SendWindowError::WindowFull);
        }
        if self.entries.contains_key(&seq) {
            return Err(SendWindowError::DuplicateSeq(seq));
        }
        self.entries.insert(
            seq,
            Entry {
                packet,
                send_time: None,
                retransmit_count: 0,
                acked: false,
            },
        );
        Ok(())
    }

    /// Marks `seq` acknowledged. A missing sequence number is a stale
    /// ack and is silently ignored.
    pub fn ack(&mut self, seq: u32) {
        if let Some(entry) = self.entries.get_mut(&seq) {
            entry.acked = true;
        }
    }

    /// Marks every entry whose last byte precedes the peer's cumulative
    /// `ack` as acknowledged. Entries are keyed by their own starting
    /// sequence number, so a single cumulative ack can cover several.
    pub fn ack_upto(&mut self, ack: u32) {
        for (&seq, entry) in self.entries.iter_mut() {
            let end = seq.wrapping_add(entry.packet.header.len.max(1) as u32);
            if end == ack || seq_lt(end, ack) {
                entry.acked = true;
            }
        }
    }

    /// Marks every entry with `seq` in `[start, end]` as selectively
    /// acknowledged (out-of-order, but the peer has it) so the
    /// retransmitter skips it. A single SACK block commonly covers
    /// several contiguous buffered segments, not just its first one.
    pub fn sack(&mut self, start: u32, end: u32) {
        if start > end {
            return;
        }
        let seqs: Vec<u32> = self.entries.range(start..=end).map(|(&seq, _)| seq).collect();
        for seq in seqs {
            self.sacked.insert(seq);
        }
    }

    /// Removes every contiguous prefix of acked entries, advancing the
    /// window base. Also prunes SACK'd sequence numbers that slid out.
    pub fn slide(&mut self) {
        loop {
            let Some((&seq, entry)) = self.entries.iter().next() else {
                break;
            };
            if !entry.acked {
                break;
            }
            self.entries.remove(&seq);
            self.sacked.remove(&seq);
        }
    }

    /// Returns a copy of the lowest-sequence segment that has never
    /// been sent, stamping its send time to `now`.
    pub fn take_next_unsent(&mut self, now: Instant) -> Option<(u32, Packet)> {
        let seq = self
            .entries
            .iter()
            .find(|(_, e)| e.send_time.is_none())
            .map(|(seq, _)| *seq)?;
        let entry = self.entries.get_mut(&seq).unwrap();
        entry.send_time = Some(now);
        Some((seq, entry.packet.clone()))
    }

    /// Returns a copy of the lowest-sequence segment that is unacked,
    /// previously sent, not SACK'd, and overdue for retransmission,
    /// bumping its send time and retransmit count.
    pub fn take_retransmit(&mut self, rto_ms: u64, now: Instant) -> Option<(u32, Packet)> {
        let sacked = &self.sacked;
        let seq = self.entries.iter().find_map(|(seq, entry)| {
            if entry.acked || sacked.contains(seq) {
                return None;
            }
            let send_time = entry.send_time?;
            if now.saturating_duration_since(send_time).as_millis() as u64 > rto_ms {
                Some(*seq)
            } else {
                None
            }
        })?;

        let entry = self.entries.get_mut(&seq).unwrap();
        entry.send_time = Some(now);
        entry.retransmit_count += 1;
        Some((seq, entry.packet.clone()))
    }

    /// An RTT sample in milliseconds, taken from the most-recently-sent
    /// entry that `ack` newly covers and that was never retransmitted
    /// (Karn's algorithm: a retransmitted segment's round-trip time is
    /// ambiguous between the original send and the resend).
    pub fn sample_rtt_ms(&self, ack: u32, now: Instant) -> Option<u64> {
        self.entries
            .iter()
            .filter(|(&seq, entry)| {
                !entry.acked && entry.retransmit_count == 0 && {
                    let end = seq.wrapping_add(entry.packet.header.len.max(1) as u32);
                    end == ack || seq_lt(end, ack)
                }
            })
            .filter_map(|(_, entry)| entry.send_time)
            .map(|send_time| now.saturating_duration_since(send_time).as_millis() as u64)
            .max()
    }

    pub fn get(&self, seq: u32) -> Option<&Entry> {
        self.entries.get(&seq)
    }

    pub fn lowest_unacked(&self) -> Option<u32> {
        self.entries
            .iter()
            .find(|(_, e)| !e.acked)
            .map(|(seq, _)| *seq)
    }

    /// Total payload bytes of every unacked entry, for gating new sends
    /// against the congestion window (§4.5's "effective window").
    pub fn bytes_in_flight(&self) -> u32 {
        self.entries
            .values()
            .filter(|e| !e.acked)
            .map(|e| e.packet.header.len as u32)
            .sum()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.sacked.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::Packet;

    fn pkt(seq: u32) -> Packet {
        Packet::data(seq, 0, 32, vec![b'x'])
    }

    #[test]
    fn add_respects_capacity() {
        let mut w = SendWindow::new(2);
        w.add(pkt(0), 0).unwrap();
        w.add(pkt(1), 1).unwrap();
        assert_eq!(w.add(pkt(2), 2), Err(SendWindowError::WindowFull));
        assert!(w.len() <= w.capacity());
    }

    #[test]
    fn add_rejects_duplicate_seq() {
        let mut w = SendWindow::new(4);
        w.add(pkt(0), 0).unwrap();
        assert_eq!(w.add(pkt(0), 0), Err(SendWindowError::DuplicateSeq(0)));
    }

    #[test]
    fn slide_removes_contiguous_acked_prefix() {
        let mut w = SendWindow::new(4);
        w.add(pkt(0), 0).unwrap();
        w.add(pkt(1), 1).unwrap();
        w.add(pkt(2), 2).unwrap();
        w.ack(0);
        w.ack(2); // out of order ack, should not slide past seq 1
        w.slide();
        assert_eq!(w.len(), 2);
        assert!(w.get(1).is_some());
        w.ack(1);
        w.slide();
        assert_eq!(w.len(), 0);
    }

    #[test]
    fn take_retransmit_skips_sacked_entries() {
        let mut w = SendWindow::new(4);
        let now = Instant::now();
        w.add(pkt(0), 0).unwrap();
        w.take_next_unsent(now);
        w.sack(0, 0);
        assert_eq!(w.take_retransmit(0, now), None);
    }

    #[test]
    fn sack_range_covers_every_entry_in_the_block() {
        let mut w = SendWindow::new(4);
        let now = Instant::now();
        w.add(pkt(0), 0).unwrap();
        w.add(pkt(1), 1).unwrap();
        w.add(pkt(2), 2).unwrap();
        for _ in 0..3 {
            w.take_next_unsent(now);
        }
        w.sack(0, 2);
        assert_eq!(w.take_retransmit(0, now), None);
    }

    #[test]
    fn ack_upto_covers_every_fully_acked_entry() {
        let mut w = SendWindow::new(4);
        w.add(pkt(0), 0).unwrap();
        w.add(pkt(1), 1).unwrap();
        w.add(pkt(2), 2).unwrap();
        w.ack_upto(2);
        assert!(w.get(0).unwrap().acked);
        assert!(w.get(1).unwrap().acked);
        assert!(!w.get(2).unwrap().acked);
    }

    #[test]
    fn sample_rtt_ignores_retransmitted_entries() {
        let mut w = SendWindow::new(4);
        let t0 = Instant::now();
        w.add(pkt(0), 0).unwrap();
        w.add(pkt(1), 1).unwrap();
        w.take_next_unsent(t0);
        w.take_next_unsent(t0);
        w.take_retransmit(0, t0); // bumps seq 0's retransmit_count
        let later = t0 + std::time::Duration::from_millis(50);
        // seq 0 was retransmitted and is excluded; seq 1 still yields a sample.
        assert!(w.sample_rtt_ms(2, later).is_some());
    }

    #[test]
    fn bytes_in_flight_counts_only_unacked_entries() {
        let mut w = SendWindow::new(4);
        w.add(pkt(0), 0).unwrap();
        w.add(pkt(1), 1).unwrap();
        assert_eq!(w.bytes_in_flight(), 2);
        w.ack(0);
        assert_eq!(w.bytes_in_flight(), 1);
    }

    #[test]
    fn stale_ack_is_a_noop() {
        let mut w = SendWindow::new(4);
        w.add(pkt(0), 0).unwrap();
        w.ack(99); // not present
        assert!(!w.get(0).unwrap().acked);
    }
}

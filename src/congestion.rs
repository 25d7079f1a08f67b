//! RENO congestion control (C5): slow start, congestion avoidance, fast
//! retransmit/recovery. Grounded on `lab2/src/congestion_control.cpp`.
//! Not internally synchronized; `Endpoint` holds this behind a `Mutex`.

use crate::packet::MSS;

const DUP_ACK_THRESHOLD: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    SlowStart,
    CongestionAvoidance,
    FastRecovery,
}

#[derive(Debug)]
pub struct CongestionControl {
    cwnd: u32,
    ssthresh: u32,
    phase: Phase,
    duplicate_ack_count: u32,
    last_ack: u32,
    ca_accumulator: u32,
    have_last_ack: bool,
}

/// Outcome of feeding an ACK to the controller, telling the caller
/// whether to perform a fast retransmit of the lowest unacked segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AckOutcome {
    pub fast_retransmit: bool,
}

impl CongestionControl {
    pub fn new() -> Self {
        CongestionControl {
            cwnd: MSS as u32,
            ssthresh: 16 * MSS as u32,
            phase: Phase::SlowStart,
            duplicate_ack_count: 0,
            last_ack: 0,
            ca_accumulator: 0,
            have_last_ack: false,
        }
    }

    pub fn cwnd(&self) -> u32 {
        self.cwnd
    }

    pub fn ssthresh(&self) -> u32 {
        self.ssthresh
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn duplicate_ack_count(&self) -> u32 {
        self.duplicate_ack_count
    }

    /// `ack_seq` is the cumulative ack number carried by the packet.
    /// Returns whether this was treated as a new (non-duplicate) ack.
    pub fn on_ack(&mut self, ack_seq: u32) -> AckOutcome {
        let is_new = !self.have_last_ack || ack_seq != self.last_ack;

        if is_new {
            self.duplicate_ack_count = 0;
            self.last_ack = ack_seq;
            self.have_last_ack = true;

            if self.phase == Phase::FastRecovery {
                self.phase = Phase::CongestionAvoidance;
            }

            match self.phase {
                Phase::SlowStart => {
                    self.cwnd += MSS as u32;
                    if self.cwnd >= self.ssthresh {
                        self.phase = Phase::CongestionAvoidance;
                        self.ca_accumulator = 0;
                    }
                }
                Phase::CongestionAvoidance => {
                    self.ca_accumulator += 1;
                    let acks_per_window = (self.cwnd / MSS as u32).max(1);
                    if self.ca_accumulator >= acks_per_window {
                        self.cwnd += MSS as u32;
                        self.ca_accumulator = 0;
                    }
                }
                Phase::FastRecovery => unreachable!("just exited FastRecovery above"),
            }

            AckOutcome { fast_retransmit: false }
        } else {
            self.on_duplicate_ack()
        }
    }

    fn on_duplicate_ack(&mut self) -> AckOutcome {
        self.duplicate_ack_count += 1;

        if self.duplicate_ack_count == DUP_ACK_THRESHOLD && self.phase != Phase::FastRecovery {
            self.ssthresh = (self.cwnd / 2).max(2 * MSS as u32);
            self.cwnd = self.ssthresh + 3 * MSS as u32;
            self.phase = Phase::FastRecovery;
            return AckOutcome { fast_retransmit: true };
        }

        AckOutcome { fast_retransmit: false }
    }

    pub fn on_timeout(&mut self) {
        self.ssthresh = (self.cwnd / 2).max(2 * MSS as u32);
        self.cwnd = MSS as u32;
        self.duplicate_ack_count = 0;
        self.ca_accumulator = 0;
        self.phase = Phase::SlowStart;
    }

    pub fn effective_window(&self, remote_wnd_segments: u16) -> u32 {
        self.cwnd.min(remote_wnd_segments as u32 * MSS as u32)
    }
}

impl Default for CongestionControl {
    fn default() -> Self {
        Self::new()
    }
}

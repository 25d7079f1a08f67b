//! The 11-state connection FSM (C7). Adapted from the teacher's
//! `tcp::TCB`, which drives TCP-over-raw-IP; this one drives the
//! packet format in [`crate::packet`] over a plain UDP datagram.

use std::time::{Duration, Instant};

use log::warn;

use crate::packet::Packet;

pub const RTO_MIN_MS: u64 = 100;
pub const RTO_MAX_MS: u64 = 64_000;
pub const INITIAL_RTO_MS: u64 = 1_000;
pub const TIME_WAIT_DURATION: Duration = Duration::from_secs(4);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Closed,
    Listen,
    SynSent,
    SynRecv,
    Established,
    FinWait1,
    FinWait2,
    Closing,
    TimeWait,
    CloseWait,
    LastAck,
}

impl State {
    pub fn name(&self) -> &'static str {
        match self {
            State::Closed => "CLOSED",
            State::Listen => "LISTEN",
            State::SynSent => "SYN_SENT",
            State::SynRecv => "SYN_RECV",
            State::Established => "ESTABLISHED",
            State::FinWait1 => "FIN_WAIT_1",
            State::FinWait2 => "FIN_WAIT_2",
            State::Closing => "CLOSING",
            State::TimeWait => "TIME_WAIT",
            State::CloseWait => "CLOSE_WAIT",
            State::LastAck => "LAST_ACK",
        }
    }
}

/// What the caller (the receive loop in `endpoint`) should do in
/// response to a state transition driven by an inbound packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Noop,
    SendSynAck,
    SendAck,
    SendFin,
    DeliverEstablished,
    EstablishActive,
    CloseComplete,
}

/// Connection state machine. Not internally synchronized; `Endpoint`
/// holds it behind a `Mutex`, per §5.
#[derive(Debug)]
pub struct Tcb {
    state: State,
    pub local_seq: u32,
    pub remote_seq: u32,
    pub remote_wnd: u16,
    rto_ms: u64,
    srtt_ms: Option<u64>,
    time_wait_entered: Option<Instant>,
    local_fin_seq: Option<u32>,
}

impl Tcb {
    pub fn new_closed() -> Self {
        Tcb {
            state: State::Closed,
            local_seq: 0,
            remote_seq: 0,
            remote_wnd: 0,
            rto_ms: INITIAL_RTO_MS,
            srtt_ms: None,
            time_wait_entered: None,
            local_fin_seq: None,
        }
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn rto_ms(&self) -> u64 {
        self.rto_ms
    }

    pub fn force_state(&mut self, state: State) {
        self.state = state;
    }

    /// Sample a round-trip time and fold it into the RTO per the
    /// clamped-double-RTT scheme (`rto = clamp(2*sample, MIN, MAX)`).
    pub fn sample_rtt(&mut self, sample_ms: u64) {
        self.srtt_ms = Some(sample_ms);
        self.rto_ms = (2 * sample_ms).clamp(RTO_MIN_MS, RTO_MAX_MS);
    }

    pub fn initialize_isn(&mut self, isn: u32) {
        self.local_seq = isn;
    }

    /// Passive open: `bind`/`listen` transition CLOSED -> LISTEN.
    pub fn open_listen(&mut self) {
        self.state = State::Listen;
    }

    /// Active open: `connect` transitions CLOSED -> SYN_SENT, issuing
    /// the SYN the caller should emit.
    pub fn open_active(&mut self, isn: u32) {
        self.local_seq = isn;
        self.state = State::SynSent;
    }

    /// Dispatches an inbound packet against the current state,
    /// returning the action the caller should take. Protocol
    /// violations are logged and ignored, never answered with an RST
    /// (save explicit local abort, which goes through `abort`).
    pub fn on_packet(&mut self, packet: &Packet) -> Action {
        use crate::packet::{FLAG_ACK, FLAG_FIN, FLAG_SYN};

        let is_syn = packet.header.has_flag(FLAG_SYN);
        let is_ack = packet.header.has_flag(FLAG_ACK);
        let is_fin = packet.header.has_flag(FLAG_FIN);

        self.remote_wnd = packet.header.wnd;

        match self.state {
            State::Listen if is_syn => {
                self.remote_seq = packet.header.seq.wrapping_add(1);
                self.state = State::SynRecv;
                Action::SendSynAck
            }
            State::SynSent if is_syn && is_ack => {
                self.remote_seq = packet.header.seq.wrapping_add(1);
                self.local_seq = self.local_seq.wrapping_add(1);
                self.state = State::Established;
                Action::EstablishActive
            }
            State::SynRecv if is_ack => {
                self.local_seq = self.local_seq.wrapping_add(1);
                self.state = State::Established;
                Action::DeliverEstablished
            }
            State::Established if is_fin => {
                self.remote_seq = self.remote_seq.wrapping_add(1);
                self.state = State::CloseWait;
                Action::SendAck
            }
            State::Established => Action::Noop,
            State::FinWait1 if is_fin => {
                self.remote_seq = self.remote_seq.wrapping_add(1);
                // Distinguishes a sequential half-close (the peer had
                // already seen our FIN and this ack covers it) from a
                // true simultaneous close (the peer's FIN crossed ours
                // in flight, so its ack predates our FIN).
                let fin_already_acked = self.local_fin_seq.is_some_and(|seq| {
                    packet.header.ack == seq || crate::packet::seq_lt(seq, packet.header.ack)
                });
                if fin_already_acked {
                    self.state = State::TimeWait;
                    self.time_wait_entered = Some(Instant::now());
                } else {
                    self.state = State::Closing;
                }
                Action::SendAck
            }
            State::FinWait1 if is_ack => {
                self.state = State::FinWait2;
                Action::Noop
            }
            State::FinWait2 if is_fin => {
                self.remote_seq = self.remote_seq.wrapping_add(1);
                self.state = State::TimeWait;
                self.time_wait_entered = Some(Instant::now());
                Action::SendAck
            }
            State::Closing if is_ack => {
                self.state = State::TimeWait;
                self.time_wait_entered = Some(Instant::now());
                Action::Noop
            }
            State::LastAck if is_ack => {
                self.state = State::Closed;
                Action::CloseComplete
            }
            _ => {
                warn!(
                    "dropping packet with flags {:#x} in state {}",
                    packet.header.flags,
                    self.state.name()
                );
                Action::Noop
            }
        }
    }

    /// Local active close: ESTABLISHED -> FIN_WAIT_1, or
    /// CLOSE_WAIT -> LAST_ACK. Returns the FIN action when a
    /// transition applies.
    pub fn close(&mut self) -> Action {
        match self.state {
            State::Established => {
                self.local_fin_seq = Some(self.local_seq);
                self.state = State::FinWait1;
                Action::SendFin
            }
            State::CloseWait => {
                self.local_fin_seq = Some(self.local_seq);
                self.state = State::LastAck;
                Action::SendFin
            }
            _ => Action::Noop,
        }
    }

    /// Immediately forces the connection to CLOSED, bypassing
    /// TIME_WAIT. Used when a caller gives up waiting on teardown.
    pub fn abort(&mut self) {
        self.state = State::Closed;
    }

    /// Called periodically by the retransmit loop; returns `true` once
    /// TIME_WAIT's 2*MSL-equivalent duration has elapsed and the
    /// connection should be torn down.
    pub fn tick_time_wait(&mut self) -> bool {
        if self.state != State::TimeWait {
            return false;
        }
        match self.time_wait_entered {
            Some(entered) if entered.elapsed() >= TIME_WAIT_DURATION => {
                self.state = State::Closed;
                true
            }
            _ => false,
        }
    }

    pub fn is_established(&self) -> bool {
        self.state == State::Established
    }

    pub fn accepts_data(&self) -> bool {
        matches!(self.state, State::Established | State::FinWait1 | State::FinWait2)
    }
}

impl Default for Tcb {
    fn default() -> Self {
        Self::new_closed()
    }
}

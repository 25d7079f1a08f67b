//! The retransmission timer thread (C6): wakes every 10 ms, pulls
//! overdue segments from the send window, re-emits them, and notifies
//! the congestion controller of the loss. Grounded on the teacher's
//! `ih` ISN-ticker thread in `src/lib.rs`, repurposed from a free-running
//! counter to a scan-and-retransmit loop.

use std::net::UdpSocket;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, trace};

use crate::congestion::CongestionControl;
use crate::tcb::{State, Tcb};
use crate::window::SendWindow;

pub const TICK_INTERVAL: Duration = Duration::from_millis(10);

pub struct RetransmitContext {
    pub socket: Arc<UdpSocket>,
    pub peer: std::net::SocketAddr,
    pub tcb: Arc<Mutex<Tcb>>,
    pub send_window: Arc<Mutex<SendWindow>>,
    pub congestion: Arc<Mutex<CongestionControl>>,
    pub packets_retransmitted: Arc<std::sync::atomic::AtomicU64>,
    pub running: Arc<AtomicBool>,
}

/// Spawns the background thread driving C6. The thread exits once
/// `running` is cleared.
pub fn spawn(ctx: RetransmitContext) -> thread::JoinHandle<()> {
    thread::spawn(move || retransmit_loop(ctx))
}

fn retransmit_loop(ctx: RetransmitContext) {
    while ctx.running.load(Ordering::Acquire) {
        thread::sleep(TICK_INTERVAL);

        let active = {
            let tcb = ctx.tcb.lock().unwrap();
            matches!(
                tcb.state(),
                State::Established | State::CloseWait | State::FinWait1 | State::FinWait2
            )
        };
        if !active {
            continue;
        }

        let rto_ms = ctx.tcb.lock().unwrap().rto_ms();
        let now = Instant::now();

        loop {
            let next = {
                let mut window = ctx.send_window.lock().unwrap();
                window.take_retransmit(rto_ms, now)
            };

            let Some((seq, packet)) = next else { break };

            trace!("retransmitting seq {} (rto {} ms)", seq, rto_ms);
            if let Err(err) = ctx.socket.send_to(&packet.encode(), ctx.peer) {
                debug!("retransmit send failed: {}", err);
                break;
            }

            ctx.congestion.lock().unwrap().on_timeout();
            ctx.packets_retransmitted.fetch_add(1, Ordering::Relaxed);
        }

        if ctx.tcb.lock().unwrap().tick_time_wait() {
            debug!("TIME_WAIT expired, connection closed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tick_interval_is_ten_milliseconds() {
        assert_eq!(TICK_INTERVAL, Duration::from_millis(10));
    }
}

//! The public socket-style API (C8): owns a `UdpSocket`, spawns the
//! receive and retransmit threads, and demultiplexes accepted
//! connections by peer address. Grounded on the teacher's
//! `NetStack`/`Manager`/`segment_loop` in `src/lib.rs`, with the tun
//! device and raw IP/TCP parsing replaced by a plain `UdpSocket` and
//! this crate's own packet codec.

use std::collections::{HashMap, VecDeque};
use std::net::{IpAddr, SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, trace, warn};
use rand::Rng;

use crate::congestion::CongestionControl;
use crate::err::Error;
use crate::packet::{self, Packet, FLAG_ACK, FLAG_DATA, MSS};
use crate::tcb::{Action, State, Tcb};
use crate::timer::{self, RetransmitContext};
use crate::window::{RecvWindow, SendWindow, DEFAULT_CAPACITY};

#[derive(Debug, Clone, Copy)]
pub struct EndpointConfig {
    pub window_size: usize,
    pub segment_size: usize,
    pub recv_timeout: Duration,
    pub connect_timeout: Duration,
    pub accept_timeout: Duration,
    pub close_timeout: Duration,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        EndpointConfig {
            window_size: DEFAULT_CAPACITY,
            segment_size: MSS,
            recv_timeout: Duration::from_secs(5),
            connect_timeout: Duration::from_secs(5),
            accept_timeout: Duration::from_secs(30),
            close_timeout: Duration::from_secs(3),
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct Statistics {
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub packets_sent: u64,
    pub packets_received: u64,
    pub packets_retransmitted: u64,
    pub packets_dropped: u64,
    pub average_throughput: f64,
}

#[derive(Debug, Default)]
struct StatsInner {
    bytes_sent: u64,
    bytes_received: u64,
    packets_sent: u64,
    packets_received: u64,
    packets_retransmitted: u64,
    packets_dropped: u64,
}

/// Per-connection state, shared between a listener's demux table and
/// the `Endpoint` handle returned by `accept`/`connect`.
struct Conn {
    socket: Arc<UdpSocket>,
    peer: SocketAddr,
    config: EndpointConfig,
    tcb: Arc<Mutex<Tcb>>,
    send_window: Arc<Mutex<SendWindow>>,
    recv_window: Mutex<RecvWindow>,
    congestion: Arc<Mutex<CongestionControl>>,
    delivery: Mutex<VecDeque<u8>>,
    delivery_cv: Condvar,
    fin_seen: AtomicBool,
    handshake: Mutex<()>,
    handshake_cv: Condvar,
    stats: Mutex<StatsInner>,
    start: Instant,
    running: Arc<AtomicBool>,
    packets_retransmitted: Arc<AtomicU64>,
    retransmit_thread: Mutex<Option<thread::JoinHandle<()>>>,
    receive_thread: Mutex<Option<thread::JoinHandle<()>>>,
    recv_timeout_ms: AtomicU64,
}

impl Conn {
    fn new(socket: Arc<UdpSocket>, peer: SocketAddr, config: EndpointConfig) -> Arc<Self> {
        let recv_timeout_ms = config.recv_timeout.as_millis() as u64;
        Arc::new(Conn {
            socket,
            peer,
            config,
            tcb: Arc::new(Mutex::new(Tcb::new_closed())),
            send_window: Arc::new(Mutex::new(SendWindow::new(config.window_size))),
            recv_window: Mutex::new(RecvWindow::new(config.window_size, config.segment_size, 0)),
            congestion: Arc::new(Mutex::new(CongestionControl::new())),
            delivery: Mutex::new(VecDeque::new()),
            delivery_cv: Condvar::new(),
            fin_seen: AtomicBool::new(false),
            handshake: Mutex::new(()),
            handshake_cv: Condvar::new(),
            stats: Mutex::new(StatsInner::default()),
            start: Instant::now(),
            running: AtomicBool::new(true),
            packets_retransmitted: Arc::new(AtomicU64::new(0)),
            retransmit_thread: Mutex::new(None),
            receive_thread: Mutex::new(None),
            recv_timeout_ms: AtomicU64::new(recv_timeout_ms),
        })
    }

    fn send_packet(&self, packet: &Packet) {
        if self.socket.send_to(&packet.encode(), self.peer).is_ok() {
            let mut stats = self.stats.lock().unwrap();
            stats.packets_sent += 1;
            stats.bytes_sent += packet.payload.len() as u64;
        }
    }

    fn ack_packet(&self) -> Packet {
        let recv_window = self.recv_window.lock().unwrap();
        let tcb = self.tcb.lock().unwrap();
        let sack = recv_window.encode_sack();
        if sack.len() > 1 {
            Packet::ack_sack(
                tcb.local_seq,
                recv_window.expected_seq(),
                recv_window.advertised_window(),
                sack,
            )
        } else {
            Packet::ack(
                tcb.local_seq,
                recv_window.expected_seq(),
                recv_window.advertised_window(),
            )
        }
    }

    fn statistics(&self) -> Statistics {
        let stats = self.stats.lock().unwrap();
        let elapsed = self.start.elapsed().as_secs_f64().max(0.001);
        Statistics {
            bytes_sent: stats.bytes_sent,
            bytes_received: stats.bytes_received,
            packets_sent: stats.packets_sent,
            packets_received: stats.packets_received,
            packets_retransmitted: self.packets_retransmitted.load(Ordering::Relaxed),
            packets_dropped: stats.packets_dropped,
            average_throughput: stats.bytes_received as f64 / elapsed,
        }
    }
}

struct Listener {
    peers: Mutex<HashMap<SocketAddr, Arc<Conn>>>,
    accept_queue: Mutex<VecDeque<Arc<Conn>>>,
    accept_cv: Condvar,
    backlog: usize,
}

enum Role {
    Unbound,
    Listener {
        socket: Arc<UdpSocket>,
        listener: Arc<Listener>,
        running: Arc<AtomicBool>,
        recv_thread: Mutex<Option<thread::JoinHandle<()>>>,
    },
    Connection(Arc<Conn>),
}

pub struct Endpoint {
    local_addr: Mutex<Option<SocketAddr>>,
    config: EndpointConfig,
    role: Mutex<Role>,
}

impl Endpoint {
    pub fn new(config: EndpointConfig) -> Self {
        Endpoint {
            local_addr: Mutex::new(None),
            config,
            role: Mutex::new(Role::Unbound),
        }
    }

    /// Binds a UDP socket with the 100 ms read timeout every receive
    /// loop in this crate relies on to notice its shutdown flag.
    fn bind_socket(port: u16) -> Result<UdpSocket, Error> {
        let socket = UdpSocket::bind(("0.0.0.0", port))?;
        socket.set_read_timeout(Some(Duration::from_millis(100)))?;
        Ok(socket)
    }

    pub fn bind(&self, port: u16) -> bool {
        let socket = match Self::bind_socket(port) {
            Ok(s) => s,
            Err(err) => {
                warn!("bind to port {} failed: {}", port, err);
                return false;
            }
        };
        let local_addr = socket.local_addr().ok();
        *self.local_addr.lock().unwrap() = local_addr;
        *self.role.lock().unwrap() = Role::Listener {
            socket: Arc::new(socket),
            listener: Arc::new(Listener {
                peers: Mutex::new(HashMap::new()),
                accept_queue: Mutex::new(VecDeque::new()),
                accept_cv: Condvar::new(),
                backlog: 0,
            }),
            running: Arc::new(AtomicBool::new(true)),
            recv_thread: Mutex::new(None),
        };
        true
    }

    pub fn listen(&self, backlog: usize) -> bool {
        let mut role = self.role.lock().unwrap();
        let (socket, listener, running) = match &*role {
            Role::Listener { socket, listener, running, .. } => {
                (socket.clone(), listener.clone(), running.clone())
            }
            _ => {
                warn!("listen: {}", Error::WrongState);
                return false;
            }
        };
        listener.accept_queue.lock().unwrap().reserve(backlog);

        let config = self.config;
        let handle = thread::spawn(move || listener_receive_loop(socket, listener, running, config));

        if let Role::Listener { recv_thread, .. } = &mut *role {
            *recv_thread.lock().unwrap() = Some(handle);
        }
        true
    }

    pub fn accept(&self) -> Option<Endpoint> {
        let listener = match &*self.role.lock().unwrap() {
            Role::Listener { listener, .. } => listener.clone(),
            _ => {
                warn!("accept: {}", Error::WrongState);
                return None;
            }
        };

        let mut queue = listener.accept_queue.lock().unwrap();
        let (guard, timed_out) = listener
            .accept_cv
            .wait_timeout_while(queue, self.config.accept_timeout, |q| q.is_empty())
            .unwrap();
        queue = guard;
        if timed_out.timed_out() {
            debug!("accept: {}", Error::AcceptTimeout);
            return None;
        }
        let conn = queue.pop_front()?;
        drop(queue);

        conn.spawn_retransmit(self.config);

        Some(Endpoint {
            local_addr: Mutex::new(self.local_addr.lock().unwrap().clone()),
            config: self.config,
            role: Mutex::new(Role::Connection(conn)),
        })
    }

    pub fn connect(&self, remote_ip: IpAddr, remote_port: u16) -> bool {
        let socket = match Self::bind_socket(0) {
            Ok(s) => s,
            Err(err) => {
                warn!("connect: failed to bind ephemeral socket: {}", err);
                return false;
            }
        };
        let local_addr = socket.local_addr().ok();
        let peer = SocketAddr::new(remote_ip, remote_port);
        let socket = Arc::new(socket);

        let conn = Conn::new(socket.clone(), peer, self.config);
        let isn: u32 = rand::thread_rng().gen();
        {
            let mut tcb = conn.tcb.lock().unwrap();
            tcb.open_active(isn);
        }
        conn.recv_window.lock().unwrap().clear(0);

        *self.local_addr.lock().unwrap() = local_addr;
        *self.role.lock().unwrap() = Role::Connection(conn.clone());

        let syn = Packet::syn(isn, conn.config.window_size as u16);
        conn.send_packet(&syn);

        {
            let conn_for_thread = conn.clone();
            let handle = thread::spawn(move || connection_receive_loop(conn_for_thread));
            *conn.receive_thread.lock().unwrap() = Some(handle);
        }
        conn.spawn_retransmit(self.config);

        let deadline = Instant::now() + self.config.connect_timeout;
        let guard = conn.handshake.lock().unwrap();
        let (_guard, timed_out) = conn
            .handshake_cv
            .wait_timeout_while(guard, self.config.connect_timeout, |_| {
                !matches!(conn.tcb.lock().unwrap().state(), State::Established | State::Closed)
            })
            .unwrap();

        let established = conn.tcb.lock().unwrap().state() == State::Established;
        if !established && Instant::now() >= deadline {
            debug!("connect: {}", Error::ConnectTimeout);
        }
        let _ = timed_out;
        established
    }

    pub fn send(&self, data: &[u8]) -> i64 {
        let conn = match &*self.role.lock().unwrap() {
            Role::Connection(conn) => conn.clone(),
            _ => {
                warn!("send: {}", Error::WrongState);
                return -1;
            }
        };

        let mut sent = 0usize;
        for chunk in data.chunks(conn.config.segment_size) {
            loop {
                let remote_wnd = conn.tcb.lock().unwrap().remote_wnd;
                let effective_window = conn.congestion.lock().unwrap().effective_window(remote_wnd);
                let in_flight = conn.send_window.lock().unwrap().bytes_in_flight();
                if in_flight + chunk.len() as u32 > effective_window {
                    if !conn.running.load(Ordering::Acquire) {
                        return if sent > 0 { sent as i64 } else { -1 };
                    }
                    thread::sleep(timer::TICK_INTERVAL);
                    continue;
                }

                let seq = conn.tcb.lock().unwrap().local_seq;
                let ack = conn.recv_window.lock().unwrap().expected_seq();
                let wnd = conn.recv_window.lock().unwrap().advertised_window();
                let packet = Packet::data(seq, ack, wnd, chunk.to_vec());

                let added = conn.send_window.lock().unwrap().add(packet.clone(), seq);
                match added {
                    Ok(()) => {
                        conn.tcb.lock().unwrap().local_seq = seq.wrapping_add(chunk.len() as u32);
                        let now = Instant::now();
                        conn.send_window.lock().unwrap().take_next_unsent(now);
                        conn.send_packet(&packet);
                        sent += chunk.len();
                        break;
                    }
                    Err(_) => {
                        if !conn.running.load(Ordering::Acquire) {
                            return if sent > 0 { sent as i64 } else { -1 };
                        }
                        thread::sleep(timer::TICK_INTERVAL);
                    }
                }
            }
        }
        sent as i64
    }

    pub fn recv(&self, buf: &mut [u8]) -> i64 {
        let conn = match &*self.role.lock().unwrap() {
            Role::Connection(conn) => conn.clone(),
            _ => {
                warn!("recv: {}", Error::WrongState);
                return -1;
            }
        };

        let recv_timeout = Duration::from_millis(conn.recv_timeout_ms.load(Ordering::Relaxed));
        let guard = conn.delivery.lock().unwrap();
        let (mut guard, timed_out) = conn
            .delivery_cv
            .wait_timeout_while(guard, recv_timeout, |q| {
                q.is_empty() && !conn.fin_seen.load(Ordering::Acquire)
            })
            .unwrap();

        if guard.is_empty() {
            return if timed_out.timed_out() { -1 } else { 0 };
        }

        let n = buf.len().min(guard.len());
        for slot in buf.iter_mut().take(n) {
            *slot = guard.pop_front().unwrap();
        }
        n as i64
    }

    pub fn close(&self) -> bool {
        let conn = match &*self.role.lock().unwrap() {
            Role::Connection(conn) => Some(conn.clone()),
            Role::Listener { running, recv_thread, .. } => {
                running.store(false, Ordering::Release);
                if let Some(handle) = recv_thread.lock().unwrap().take() {
                    let _ = handle.join();
                }
                return true;
            }
            Role::Unbound => return true,
        };
        let Some(conn) = conn else { return true };

        let action = conn.tcb.lock().unwrap().close();
        if action == Action::SendFin {
            let ack = conn.recv_window.lock().unwrap().expected_seq();
            let fin = Packet::fin(conn.tcb.lock().unwrap().local_seq, ack, 0);
            conn.send_packet(&fin);
        }

        let deadline = Instant::now() + conn.config.close_timeout;
        while Instant::now() < deadline {
            let state = conn.tcb.lock().unwrap().state();
            if matches!(state, State::Closed | State::TimeWait) {
                break;
            }
            thread::sleep(Duration::from_millis(50));
        }
        if conn.tcb.lock().unwrap().state() != State::Closed {
            conn.tcb.lock().unwrap().abort();
        }

        conn.running.store(false, Ordering::Release);
        conn.delivery_cv.notify_all();
        conn.handshake_cv.notify_all();
        if let Some(handle) = conn.retransmit_thread.lock().unwrap().take() {
            let _ = handle.join();
        }
        if let Some(handle) = conn.receive_thread.lock().unwrap().take() {
            let _ = handle.join();
        }
        true
    }

    pub fn state(&self) -> State {
        match &*self.role.lock().unwrap() {
            Role::Unbound => State::Closed,
            Role::Listener { .. } => State::Listen,
            Role::Connection(conn) => conn.tcb.lock().unwrap().state(),
        }
    }

    pub fn state_name(&self) -> &'static str {
        self.state().name()
    }

    pub fn statistics(&self) -> Statistics {
        match &*self.role.lock().unwrap() {
            Role::Connection(conn) => conn.statistics(),
            _ => Statistics::default(),
        }
    }

    /// Overrides this handle's blocking `recv` timeout at runtime.
    pub fn set_recv_timeout(&self, ms: u64) {
        if let Role::Connection(conn) = &*self.role.lock().unwrap() {
            conn.recv_timeout_ms.store(ms, Ordering::Relaxed);
        }
    }
}

impl Conn {
    fn spawn_retransmit(self: &Arc<Self>, _config: EndpointConfig) {
        if self.retransmit_thread.lock().unwrap().is_some() {
            return;
        }
        let ctx = RetransmitContext {
            socket: self.socket.clone(),
            peer: self.peer,
            tcb: self.tcb.clone(),
            send_window: self.send_window.clone(),
            congestion: self.congestion.clone(),
            packets_retransmitted: self.packets_retransmitted.clone(),
            running: self.running.clone(),
        };
        let handle = timer::spawn(ctx);
        *self.retransmit_thread.lock().unwrap() = Some(handle);
    }
}

fn listener_receive_loop(
    socket: Arc<UdpSocket>,
    listener: Arc<Listener>,
    running: Arc<AtomicBool>,
    config: EndpointConfig,
) {
    let mut buf = vec![0u8; packet::HEADER_LEN + packet::MAX_PAYLOAD];
    while running.load(Ordering::Acquire) {
        let (n, src) = match socket.recv_from(&mut buf) {
            Ok(pair) => pair,
            Err(err) if matches!(err.kind(), std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut) => {
                continue
            }
            Err(err) => {
                debug!("listener recv failed: {}", err);
                continue;
            }
        };

        let packet = match Packet::decode(&buf[..n]) {
            Ok(p) => p,
            Err(err) => {
                if let Some(conn) = listener.peers.lock().unwrap().get(&src) {
                    conn.stats.lock().unwrap().packets_dropped += 1;
                }
                trace!("dropping undecodable datagram from {}: {}", src, err);
                continue;
            }
        };

        let conn = {
            let mut peers = listener.peers.lock().unwrap();
            peers
                .entry(src)
                .or_insert_with(|| {
                    let conn = Conn::new(socket.clone(), src, config);
                    conn.tcb.lock().unwrap().open_listen();
                    conn
                })
                .clone()
        };

        let action = dispatch_inbound(&conn, packet);
        if action == Action::DeliverEstablished {
            conn.spawn_retransmit(config);
            listener.accept_queue.lock().unwrap().push_back(conn);
            listener.accept_cv.notify_one();
        }
    }
}

fn connection_receive_loop(conn: Arc<Conn>) {
    let mut buf = vec![0u8; packet::HEADER_LEN + packet::MAX_PAYLOAD];
    while conn.running.load(Ordering::Acquire) {
        let (n, src) = match conn.socket.recv_from(&mut buf) {
            Ok(pair) => pair,
            Err(err) if matches!(err.kind(), std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut) => {
                continue
            }
            Err(err) => {
                debug!("connection recv failed: {}", err);
                continue;
            }
        };
        if src != conn.peer {
            continue;
        }

        let packet = match Packet::decode(&buf[..n]) {
            Ok(p) => p,
            Err(err) => {
                conn.stats.lock().unwrap().packets_dropped += 1;
                trace!("dropping undecodable datagram: {}", err);
                continue;
            }
        };

        dispatch_inbound(&conn, packet);
    }
}

/// Applies one decoded packet to `conn`'s windows, congestion state and
/// FSM, emitting whatever reply the protocol requires. Shared by both
/// the listener's demux loop and a plain connection's receive loop.
fn dispatch_inbound(conn: &Arc<Conn>, pkt: Packet) -> Action {
    conn.stats.lock().unwrap().packets_received += 1;

    if pkt.header.has_flag(FLAG_ACK) && !pkt.header.has_flag(FLAG_DATA) {
        let outcome = conn.congestion.lock().unwrap().on_ack(pkt.header.ack);
        let now = Instant::now();
        if let Some(sample_ms) = conn.send_window.lock().unwrap().sample_rtt_ms(pkt.header.ack, now) {
            conn.tcb.lock().unwrap().sample_rtt(sample_ms);
        }
        conn.send_window.lock().unwrap().ack_upto(pkt.header.ack);
        conn.send_window.lock().unwrap().slide();
        for (start, end) in packet::decode_sack_blocks(&pkt.payload) {
            conn.send_window.lock().unwrap().sack(start, end);
        }
        if outcome.fast_retransmit {
            if let Some(seq) = conn.send_window.lock().unwrap().lowest_unacked() {
                if let Some(entry) = conn.send_window.lock().unwrap().get(seq) {
                    conn.send_packet(&entry.packet);
                }
            }
        }
    }

    if pkt.header.has_flag(FLAG_DATA) {
        conn.recv_window.lock().unwrap().add(pkt.clone(), pkt.header.seq);
        let mut delivered_any = false;
        loop {
            let next = conn.recv_window.lock().unwrap().take_deliverable();
            let Some(data_packet) = next else { break };
            conn.delivery.lock().unwrap().extend(data_packet.payload.iter().copied());
            conn.stats.lock().unwrap().bytes_received += data_packet.payload.len() as u64;
            delivered_any = true;
        }
        if delivered_any {
            conn.delivery_cv.notify_all();
        }
        let ack = conn.ack_packet();
        conn.send_packet(&ack);
    }

    let action = conn.tcb.lock().unwrap().on_packet(&pkt);
    match action {
        Action::SendSynAck => {
            let isn: u32 = rand::thread_rng().gen();
            conn.tcb.lock().unwrap().initialize_isn(isn);
            conn.recv_window.lock().unwrap().clear(conn.tcb.lock().unwrap().remote_seq);
            let syn_ack = Packet::syn_ack(isn, conn.tcb.lock().unwrap().remote_seq, conn.config.window_size as u16);
            conn.send_packet(&syn_ack);
        }
        Action::EstablishActive => {
            // Mirror the passive side's `SendSynAck` arm: the peer's
            // data starts at its ISN + 1, so the receive window must
            // be seeded here too, not left at its initial 0.
            conn.recv_window.lock().unwrap().clear(conn.tcb.lock().unwrap().remote_seq);
            let ack = conn.ack_packet();
            conn.send_packet(&ack);
        }
        Action::SendAck => {
            let ack = conn.ack_packet();
            conn.send_packet(&ack);
        }
        Action::SendFin => {
            let ack = conn.recv_window.lock().unwrap().expected_seq();
            let fin = Packet::fin(conn.tcb.lock().unwrap().local_seq, ack, 0);
            conn.send_packet(&fin);
        }
        Action::DeliverEstablished => {
            conn.handshake_cv.notify_all();
        }
        Action::CloseComplete => {
            conn.fin_seen.store(true, Ordering::Release);
            conn.delivery_cv.notify_all();
            conn.running.store(false, Ordering::Release);
        }
        Action::Noop => {}
    }

    if pkt.header.has_flag(crate::packet::FLAG_FIN) {
        conn.fin_seen.store(true, Ordering::Release);
        conn.delivery_cv.notify_all();
    }

    conn.handshake_cv.notify_all();
    action
}

//! Shared harness for the end-to-end tests in this directory: spawns a
//! server `Endpoint` on its own thread and a small UDP relay that sits
//! between a client and that server so tests can drop, corrupt or
//! reorder individual datagrams without touching the protocol code.

use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{channel, Receiver};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use rdt::{Endpoint, EndpointConfig};

/// What the relay should do with the `n`th datagram it sees crossing
/// in one direction (0-indexed, counting every datagram including the
/// handshake).
pub enum Effect {
    Pass,
    Drop,
    Corrupt,
}

pub type EffectFn = Box<dyn FnMut(usize) -> Effect + Send>;

pub fn pass_through() -> EffectFn {
    Box::new(|_| Effect::Pass)
}

pub fn drop_nth(target: usize) -> EffectFn {
    Box::new(move |n| if n == target { Effect::Drop } else { Effect::Pass })
}

pub fn corrupt_nth(target: usize) -> EffectFn {
    Box::new(move |n| if n == target { Effect::Corrupt } else { Effect::Pass })
}

/// A UDP relay: a client connects to `proxy_port` believing it is the
/// server; the relay forwards datagrams to the real server listening
/// at `server_addr`, applying `client_to_server`/`server_to_client` to
/// each one crossing in that direction.
pub struct Proxy {
    running: Arc<AtomicBool>,
    handle: Option<thread::JoinHandle<()>>,
}

impl Proxy {
    pub fn spawn(
        proxy_port: u16,
        server_port: u16,
        mut client_to_server: EffectFn,
        mut server_to_client: EffectFn,
    ) -> Proxy {
        let inbound = UdpSocket::bind(("127.0.0.1", proxy_port)).expect("bind proxy ingress");
        inbound.set_read_timeout(Some(Duration::from_millis(20))).unwrap();
        let outbound = UdpSocket::bind("127.0.0.1:0").expect("bind proxy egress");
        outbound.set_read_timeout(Some(Duration::from_millis(20))).unwrap();
        let server_addr: SocketAddr = ("127.0.0.1", server_port)
            .to_socket_addrs()
            .unwrap()
            .next()
            .unwrap();

        let running = Arc::new(AtomicBool::new(true));
        let running_thread = running.clone();

        let handle = thread::spawn(move || {
            let mut client_addr: Option<SocketAddr> = None;
            let mut buf = [0u8; 2048];
            let mut c2s = 0usize;
            let mut s2c = 0usize;

            while running_thread.load(Ordering::Acquire) {
                if let Ok((n, src)) = inbound.recv_from(&mut buf) {
                    client_addr = Some(src);
                    let effect = client_to_server(c2s);
                    c2s += 1;
                    forward(&outbound, server_addr, &buf[..n], effect);
                }

                if let Some(client) = client_addr {
                    if let Ok((n, _)) = outbound.recv_from(&mut buf) {
                        let effect = server_to_client(s2c);
                        s2c += 1;
                        forward(&inbound, client, &buf[..n], effect);
                    }
                }
            }
        });

        Proxy { running, handle: Some(handle) }
    }
}

impl Drop for Proxy {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn forward(socket: &UdpSocket, dest: SocketAddr, data: &[u8], effect: Effect) {
    match effect {
        Effect::Drop => {}
        Effect::Pass => {
            let _ = socket.send_to(data, dest);
        }
        Effect::Corrupt => {
            let mut corrupted = data.to_vec();
            // Flip a bit inside the payload (past the 32-byte header) so
            // the checksum fails without producing a short/garbled frame.
            if let Some(byte) = corrupted.get_mut(32) {
                *byte ^= 0xff;
            }
            let _ = socket.send_to(&corrupted, dest);
        }
    }
}

/// Spawns a listening server on `port` and hands back the accepted
/// connection once a client completes the handshake. The listener
/// itself is intentionally leaked (its receive thread demultiplexes
/// every inbound packet for the accepted connection for the rest of
/// the test) unless the caller asks for it via `with_listener`.
pub fn spawn_server(port: u16, config: EndpointConfig) -> Receiver<Endpoint> {
    let (tx, rx) = channel();
    thread::spawn(move || {
        let listener = Endpoint::new(config);
        assert!(listener.bind(port), "server failed to bind port {port}");
        assert!(listener.listen(1), "server failed to listen");
        if let Some(conn) = listener.accept() {
            let _ = tx.send(conn);
        }
    });
    rx
}

/// Like [`spawn_server`], but also hands back the listener `Endpoint`
/// so the caller can shut it down explicitly (used by the shutdown
/// scenario to simulate the server process going away).
pub fn spawn_server_with_listener(port: u16, config: EndpointConfig) -> Receiver<(Endpoint, Endpoint)> {
    let (tx, rx) = channel();
    thread::spawn(move || {
        let listener = Endpoint::new(config);
        assert!(listener.bind(port), "server failed to bind port {port}");
        assert!(listener.listen(1), "server failed to listen");
        if let Some(conn) = listener.accept() {
            let _ = tx.send((listener, conn));
        }
    });
    rx
}

pub fn recv_n(conn: &Endpoint, total: usize, timeout: Duration) -> Vec<u8> {
    let mut out = Vec::with_capacity(total);
    let deadline = std::time::Instant::now() + timeout;
    let mut buf = vec![0u8; 64 * 1024];
    while out.len() < total && std::time::Instant::now() < deadline {
        let n = conn.recv(&mut buf);
        if n > 0 {
            out.extend_from_slice(&buf[..n as usize]);
        } else if n < 0 {
            break;
        }
    }
    out
}

//! Reorders two adjacent data segments in flight. The receive window
//! buffers the one that arrives early and only delivers it once the
//! gap behind it closes, so the application still sees the bytes in
//! the order they were sent.

mod common;

use std::net::{SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use rdt::{Endpoint, EndpointConfig};

/// Relays client -> server datagrams, holding the datagram at
/// `held_index` back until the one right after it has already gone
/// out, so the pair arrives at the server swapped. Every other
/// datagram, in both directions, passes straight through.
fn spawn_reordering_relay(proxy_port: u16, server_port: u16, held_index: usize) -> (Arc<AtomicBool>, thread::JoinHandle<()>) {
    let inbound = UdpSocket::bind(("127.0.0.1", proxy_port)).expect("bind proxy ingress");
    inbound.set_read_timeout(Some(Duration::from_millis(20))).unwrap();
    let outbound = UdpSocket::bind("127.0.0.1:0").expect("bind proxy egress");
    outbound.set_read_timeout(Some(Duration::from_millis(20))).unwrap();
    let server_addr = SocketAddr::new([127, 0, 0, 1].into(), server_port);

    let running = Arc::new(AtomicBool::new(true));
    let running_thread = running.clone();

    let handle = thread::spawn(move || {
        let mut client_addr: Option<SocketAddr> = None;
        let mut buf = [0u8; 2048];
        let mut held: Option<Vec<u8>> = None;
        let mut c2s = 0usize;

        while running_thread.load(Ordering::Acquire) {
            if let Ok((n, src)) = inbound.recv_from(&mut buf) {
                client_addr = Some(src);
                let datagram = buf[..n].to_vec();
                if c2s == held_index {
                    held = Some(datagram);
                } else {
                    let _ = outbound.send_to(&datagram, server_addr);
                    if c2s == held_index + 1 {
                        if let Some(h) = held.take() {
                            let _ = outbound.send_to(&h, server_addr);
                        }
                    }
                }
                c2s += 1;
            }

            if let Some(client) = client_addr {
                if let Ok((n, _)) = outbound.recv_from(&mut buf) {
                    let _ = inbound.send_to(&buf[..n], client);
                }
            }
        }
    });

    (running, handle)
}

#[test]
fn reordered_adjacent_segments_are_delivered_in_order() {
    let proxy_port = 19120;
    let server_port = 19121;
    let config = EndpointConfig { window_size: 32, ..EndpointConfig::default() };

    let server_rx = common::spawn_server(server_port, config);
    // Swap data segments 2 and 3 (overall indices 4 and 5: 0 = SYN,
    // 1 = handshake ack, 2.. = data segments).
    let (running, relay) = spawn_reordering_relay(proxy_port, server_port, 4);

    let client = Endpoint::new(config);
    assert!(client.connect("127.0.0.1".parse().unwrap(), proxy_port));

    let server_conn = server_rx.recv_timeout(Duration::from_secs(2)).expect("server accepted");

    let payload: Vec<u8> = (0..5 * 1400usize).map(|i| (i % 241) as u8).collect();
    let sent = client.send(&payload);
    assert_eq!(sent as usize, payload.len());

    let received = common::recv_n(&server_conn, payload.len(), Duration::from_secs(5));
    assert_eq!(received, payload);
    assert_eq!(server_conn.statistics().bytes_received, payload.len() as u64);

    client.close();
    server_conn.close();
    running.store(false, Ordering::Release);
    let _ = relay.join();
}

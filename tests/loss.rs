//! Drops one data segment out of a multi-segment transfer. The
//! receiver buffers everything after the gap out of order, the
//! resulting duplicate acks (or, failing that, the retransmit timer)
//! recover the missing segment, and the final byte stream still
//! matches exactly what was sent.

mod common;

use std::time::Duration;

use rdt::{Endpoint, EndpointConfig};

#[test]
fn one_dropped_data_packet_is_recovered_by_retransmission() {
    let proxy_port = 19090;
    let server_port = 19091;
    let config = EndpointConfig { window_size: 32, ..EndpointConfig::default() };

    let server_rx = common::spawn_server(server_port, config);
    // 0 = SYN, 1 = handshake ack, 2.. = data segments in order; this
    // drops the third data segment (index 2 of the segments, overall
    // index 4).
    let _proxy = common::Proxy::spawn(proxy_port, server_port, common::drop_nth(4), common::pass_through());

    let client = Endpoint::new(config);
    assert!(client.connect("127.0.0.1".parse().unwrap(), proxy_port));

    let server_conn = server_rx.recv_timeout(Duration::from_secs(2)).expect("server accepted");

    let payload: Vec<u8> = (0..10 * 1400usize).map(|i| (i % 251) as u8).collect();
    let sent = client.send(&payload);
    assert_eq!(sent as usize, payload.len());

    let received = common::recv_n(&server_conn, payload.len(), Duration::from_secs(5));
    assert_eq!(received, payload);

    let stats = client.statistics();
    assert!(stats.packets_retransmitted >= 1);

    client.close();
    server_conn.close();
}

//! Clean handshake followed by a small message exchange: both sides
//! reach ESTABLISHED, the bytes round-trip exactly, and nothing needed
//! retransmitting.

mod common;

use std::time::Duration;

use rdt::{Endpoint, EndpointConfig, State};

#[test]
fn handshake_then_small_message_then_clean_close() {
    let config = EndpointConfig::default();
    let rx = common::spawn_server(19080, config);

    let client = Endpoint::new(config);
    assert!(client.connect("127.0.0.1".parse().unwrap(), 19080));
    assert_eq!(client.state(), State::Established);

    let server_conn = rx.recv_timeout(Duration::from_secs(2)).expect("server accepted");
    assert_eq!(server_conn.state(), State::Established);

    let sent = client.send(b"hello");
    assert_eq!(sent, 5);

    let received = common::recv_n(&server_conn, 5, Duration::from_secs(2));
    assert_eq!(received, b"hello");

    std::thread::scope(|s| {
        let client_handle = s.spawn(|| client.close());
        let server_handle = s.spawn(|| server_conn.close());
        assert!(client_handle.join().unwrap());
        assert!(server_handle.join().unwrap());
    });
    assert_eq!(client.state(), State::Closed);

    let stats = client.statistics();
    assert_eq!(stats.packets_retransmitted, 0);
    assert_eq!(stats.bytes_sent, 5);
}

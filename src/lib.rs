//! A reliable datagram transport over UDP: connection-oriented, in-order,
//! loss-free byte delivery with RENO congestion control, selective
//! acknowledgement and a TCP-like connection state machine.
//!
//! [`Endpoint`] is the single entry point, playing both roles the
//! teacher's `NetStack`/`TcpListener`/`TcpStream` split played: `bind` +
//! `listen` + `accept` for a passive side, `connect` for an active side,
//! and `send`/`recv`/`close` once a connection is established.

mod checksum;
mod congestion;
mod endpoint;
mod err;
mod packet;
mod tcb;
mod timer;
mod window;

pub use endpoint::{Endpoint, EndpointConfig, Statistics};
pub use err::Error;
pub use packet::MSS;
pub use tcb::State;

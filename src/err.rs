use std::io;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("endpoint is not in a state that permits this operation")]
    WrongState,

    #[error("connect timed out waiting for the handshake to complete")]
    ConnectTimeout,

    #[error("accept timed out waiting for an incoming connection")]
    AcceptTimeout,
}

pub mod recv;
pub mod send;

pub use recv::RecvWindow;
pub use send::SendWindow;

pub const DEFAULT_CAPACITY: usize = 32;

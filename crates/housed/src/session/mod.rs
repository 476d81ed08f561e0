//! HNCP sessions: the handshake every new connection goes through before
//! any message is exchanged on it.

pub mod handshake;

pub use handshake::{HandshakeError, HandshakeResponse, Handshaker, Step};

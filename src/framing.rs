//! This module provides an async [`S2sSocket`](socket::S2sSocket) Stream + Sink that handles S2S cooked-mode frames.
//!
//! S2S is a big endian binary protocol built from length-prefixed NUL-terminated
//! strings. Each frame carries an ordered key/value map with a computed total-size
//! prefix and a trailing `"_raw"` sentinel. The framing layer handles the byte
//! layout; version negotiation and the handshake preamble live in
//! [`handshake`](crate::handshake).

mod event;
mod socket;
pub mod wire;

pub use event::{Event, S2sFrame, CAPABILITIES_KEY, CONTROL_MSG_KEY};
pub use socket::S2sSocket;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum S2sError {
    #[error("Bad string length prefix {0:#x}, expected at least 1")]
    BadStringLength(u32),
    #[error("Bad string terminator {0:#x}, expected NUL")]
    BadTerminator(u8),
    #[error("Bad frame padding word {0:#x}, expected zero")]
    BadPadding(u32),
    #[error("Bad frame trailer {0:?}, expected \"_raw\"")]
    BadTrailer(String),
    #[error("Bad _time value {0:?}, expected decimal epoch seconds")]
    BadTime(String),
    #[error("Frame is {0:#x} bytes, decoded {1:#x}")]
    BadSize(usize, usize),
    #[error("Reserved key {0:?} in event fields")]
    ReservedKey(String),
    #[error("Bad handshake signature {0:?}")]
    BadSignature(String),
    #[error("Protocol version {0} not accepted by this receiver")]
    UnsupportedVersion(crate::handshake::S2sVersion),
    #[error("Invalid endpoint {0:?}, expected host:port")]
    InvalidEndpoint(String),
    #[error("Invalid TLS material: {0}")]
    InvalidTls(String),
    #[error("{0}")]
    ClosedByPeer(String),
    #[error("S2S IO error")]
    Io {
        #[from]
        source: std::io::Error,
    },
}

//! Client and server for the Splunk-to-Splunk (S2S) cooked-mode protocol
//!
//! S2S "cooked mode" is the binary framed protocol Splunk Universal Forwarders
//! use to ship events to a downstream receiver, as opposed to raw line-oriented
//! TCP. Both roles run over plain TCP or TLS:
//! - a [`Connection`] dials a receiver, performs the version-appropriate
//!   handshake on the first send, and streams encoded event frames;
//! - a [`Server`] accepts connections, validates the handshake preamble,
//!   answers v3 capability negotiation, and hands decoded [`Event`]s to a
//!   caller-supplied sink.
//!
//! A connection opens with a fixed 400-byte preamble carrying the protocol
//! signature (`--splunk-cooked-mode-v2--` or `-v3--`), the server name and the
//! management port. Every frame after that is a length-prefixed key/value map:
//! well-known metadata keys (`_MetaData:Index`, `MetaData:Host`, ...) are
//! routed to typed [`Event`] attributes, everything else lands in the event's
//! extension fields, and each frame ends with a zero padding word plus a
//! `"_raw"` trailer sentinel. On v3 the first frame in each direction is a
//! capability-negotiation control frame; this crate always refuses acks and
//! compression, matching what a stock forwarder settles on.
//!
//! Frames are length-prefixed but not self-synchronizing: a single byte of
//! drift corrupts everything that follows, so both roles treat the first
//! decode error on a connection as fatal and drop the transport.
//!
//! ## Notice
//!
//! This is a clean-room implementation based on published descriptions of the
//! protocol and observed forwarder traffic. Optional features a full Splunk
//! deployment may negotiate (acks, compression, v4 channels) are intentionally
//! not implemented.

pub mod framing;
pub mod handshake;
pub mod receiver;
pub mod sender;
mod tls;

pub use framing::{Event, S2sError, S2sFrame, S2sSocket};
pub use handshake::S2sVersion;
pub use receiver::{EventSink, Server, StdoutSink};
pub use sender::Connection;

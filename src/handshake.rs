//! The fixed-width preamble every sender transmits after connecting, and the
//! capability exchange that follows it on v3 connections.
//!
//! The preamble is 400 bytes: a protocol signature, the sender's idea of the
//! server name and the management port, each NUL-padded to a fixed width. A
//! v3 sender then emits one ordinary event frame whose only meaningful entry
//! is `__s2s_capabilities`, and the receiver answers with a
//! `__s2s_control_msg` frame. v2 skips the exchange entirely.

use crate::framing::{Event, S2sError, CAPABILITIES_KEY, CONTROL_MSG_KEY};
use strum_macros::{Display, EnumCount, FromRepr};

pub(crate) const SIGNATURE_LEN: usize = 128;
pub(crate) const SERVER_NAME_LEN: usize = 256;
pub(crate) const MGMT_PORT_LEN: usize = 16;

/// Total size of the handshake preamble.
pub const PREAMBLE_LEN: usize = SIGNATURE_LEN + SERVER_NAME_LEN + MGMT_PORT_LEN;

/// Capabilities announced by the sender: no acks, no compression.
pub(crate) const CLIENT_CAPABILITIES: &str = "ack=0;compression=0";
/// Capability response the receiver sends back, refusing every optional
/// feature. Values observed from a stock Splunk indexer.
pub(crate) const SERVER_CAPABILITIES: &str =
    "cap_response=success;cap_flush_key=false;cap_ack=false;cap_compression=false;channel_limit=300;pl=7";

/// Cooked-mode protocol versions this crate speaks.
#[repr(u8)]
#[derive(Eq, PartialEq, Debug, Copy, Clone, Display, EnumCount, FromRepr)]
pub enum S2sVersion {
    #[strum(serialize = "v2")]
    V2 = 2,
    #[strum(serialize = "v3")]
    V3 = 3,
}

impl Default for S2sVersion {
    fn default() -> Self {
        S2sVersion::V3
    }
}

impl S2sVersion {
    pub fn signature(&self) -> &'static str {
        match self {
            S2sVersion::V2 => "--splunk-cooked-mode-v2--",
            S2sVersion::V3 => "--splunk-cooked-mode-v3--",
        }
    }

    pub fn from_signature(signature: &str) -> Option<Self> {
        match signature {
            "--splunk-cooked-mode-v2--" => Some(S2sVersion::V2),
            "--splunk-cooked-mode-v3--" => Some(S2sVersion::V3),
            _ => None,
        }
    }
}

/// The parsed form of the 400-byte handshake preamble.
#[derive(Eq, PartialEq, Debug, Clone)]
pub struct Preamble {
    pub version: S2sVersion,
    pub server_name: String,
    pub mgmt_port: String,
}

impl Preamble {
    /// Build the preamble a sender emits for `host:port`. Fails before any
    /// I/O when the endpoint does not split into exactly two components.
    pub fn for_endpoint(endpoint: &str, version: S2sVersion) -> Result<Self, S2sError> {
        let (server_name, mgmt_port) = split_endpoint(endpoint)?;
        Ok(Self {
            version,
            server_name: server_name.to_owned(),
            mgmt_port: mgmt_port.to_owned(),
        })
    }

    pub fn to_buf(&self) -> Vec<u8> {
        let mut buf = vec![0u8; PREAMBLE_LEN];
        copy_padded(&mut buf[..SIGNATURE_LEN], self.version.signature());
        copy_padded(
            &mut buf[SIGNATURE_LEN..SIGNATURE_LEN + SERVER_NAME_LEN],
            &self.server_name,
        );
        copy_padded(&mut buf[SIGNATURE_LEN + SERVER_NAME_LEN..], &self.mgmt_port);
        buf
    }

    pub fn from_buf(buf: &[u8; PREAMBLE_LEN]) -> Result<Self, S2sError> {
        let signature = trim_nul(&buf[..SIGNATURE_LEN]);
        let version = match S2sVersion::from_signature(&signature) {
            Some(version) => version,
            None => return Err(S2sError::BadSignature(signature)),
        };
        Ok(Self {
            version,
            server_name: trim_nul(&buf[SIGNATURE_LEN..SIGNATURE_LEN + SERVER_NAME_LEN]),
            mgmt_port: trim_nul(&buf[SIGNATURE_LEN + SERVER_NAME_LEN..]),
        })
    }
}

/// The capability frame a v3 sender emits right after the preamble.
pub(crate) fn capability_request() -> Event {
    let mut event = Event::default();
    event
        .fields
        .insert(CAPABILITIES_KEY.to_owned(), CLIENT_CAPABILITIES.to_owned());
    event
}

/// The receiver's reply to a capability frame.
pub(crate) fn capability_response() -> Event {
    let mut event = Event::default();
    event
        .fields
        .insert(CONTROL_MSG_KEY.to_owned(), SERVER_CAPABILITIES.to_owned());
    event
}

/// Split `host:port`, requiring exactly one separator.
pub(crate) fn split_endpoint(endpoint: &str) -> Result<(&str, &str), S2sError> {
    let mut parts = endpoint.split(':');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(host), Some(port), None) => Ok((host, port)),
        _ => Err(S2sError::InvalidEndpoint(endpoint.to_owned())),
    }
}

fn copy_padded(dst: &mut [u8], src: &str) {
    let n = src.len().min(dst.len());
    dst[..n].copy_from_slice(&src.as_bytes()[..n]);
}

fn trim_nul(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes)
        .trim_end_matches('\0')
        .to_owned()
}

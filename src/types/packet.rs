//! Received packet delivery type

use std::sync::Arc;

use crate::protocol::{OpenDataMessage, Packet};
use crate::Result;

/// One envelope as delivered by a packet source.
///
/// Carries the routing the broker knows about (data source, stream, session)
/// next to the raw envelope bytes. Bytes are shared so handlers can keep a
/// packet without copying.
#[derive(Debug, Clone, PartialEq)]
pub struct ReceivedPacket {
    pub data_source: String,
    pub stream: String,
    pub session_key: String,
    pub bytes: Arc<[u8]>,
}

impl ReceivedPacket {
    /// Create a received packet from raw envelope bytes
    pub fn new(
        data_source: impl Into<String>,
        stream: impl Into<String>,
        session_key: impl Into<String>,
        bytes: Vec<u8>,
    ) -> Self {
        Self {
            data_source: data_source.into(),
            stream: stream.into(),
            session_key: session_key.into(),
            bytes: bytes.into(),
        }
    }

    /// Decode the envelope.
    pub fn packet(&self) -> Result<Packet> {
        Packet::from_bytes(&self.bytes)
    }
}

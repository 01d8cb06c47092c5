//! Core types for streaming telemetry.
//!
//! ## Architecture
//!
//! - [`ReceivedPacket`] is the unit delivered by a packet source: routing plus
//!   raw envelope bytes shared through `Arc`
//! - [`SessionInfo`] describes a recording scope; [`SessionCreationInfo`] is
//!   the input for creating one
//! - [`SampleRecord`] is one projected `(timestamp, value, status)` sample
//! - [`StreamInfo`], [`CoverageCursorInfo`] and [`SessionAssociationInfo`]
//!   are the payloads of reader notifications
//!
//! ## Usage Example
//!
//! ```rust
//! use pitlane::protocol::{OpenDataMessage, Packet, PacketType, EndOfSessionPacket};
//! use pitlane::types::ReceivedPacket;
//!
//! let end = EndOfSessionPacket { data_source: "Default".to_string() };
//! let envelope = Packet::wrap(PacketType::EndOfSession, "key-1", false, &end, 9);
//! let received = ReceivedPacket::new("Default", "Stream1", "key-1", envelope.to_bytes());
//!
//! let packet = received.packet().unwrap();
//! assert_eq!(packet.id, 9);
//! assert_eq!(packet.content_as::<EndOfSessionPacket>().unwrap(), end);
//! ```

mod packet;
mod record;
mod session;

pub use packet::ReceivedPacket;
pub use record::{SampleRecord, SampleValue};
pub use session::{
    CoverageCursorInfo, InfoType, SessionAssociationInfo, SessionCreationInfo, SessionInfo,
    StreamInfo,
};

//! Session descriptors and reader notifications

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::protocol::{NewSessionPacket, SessionInfoPacket};

/// Recording scope created by the session management service.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SessionInfo {
    pub data_source: String,
    pub session_key: String,
    pub identifier: String,
    pub session_type: String,
    pub version: u32,
    /// Local time offset from UTC in seconds.
    pub utc_offset_secs: i64,
    pub associate_session_keys: Vec<String>,
    pub details: BTreeMap<String, String>,
    /// Set once the session has been ended.
    pub is_complete: bool,
}

impl SessionInfo {
    /// Build the session info payload carried by new-session and info packets.
    pub fn to_info_packet(&self) -> SessionInfoPacket {
        SessionInfoPacket {
            data_source: self.data_source.clone(),
            identifier: self.identifier.clone(),
            session_type: self.session_type.clone(),
            version: self.version,
            associate_session_keys: self.associate_session_keys.clone(),
            details: self.details.clone(),
        }
    }

    /// Build the new-session marker for this session.
    pub fn to_new_session_packet(&self) -> NewSessionPacket {
        NewSessionPacket {
            data_source: self.data_source.clone(),
            utc_offset_secs: self.utc_offset_secs,
            session_info: self.to_info_packet(),
        }
    }

    /// Rebuild a descriptor from a new-session marker received on `session_key`.
    pub fn from_new_session_packet(session_key: &str, packet: &NewSessionPacket) -> Self {
        let info = &packet.session_info;
        let data_source = if packet.data_source.is_empty() {
            info.data_source.clone()
        } else {
            packet.data_source.clone()
        };
        Self {
            data_source,
            session_key: session_key.to_string(),
            identifier: info.identifier.clone(),
            session_type: info.session_type.clone(),
            version: info.version,
            utc_offset_secs: packet.utc_offset_secs,
            associate_session_keys: info.associate_session_keys.clone(),
            details: info.details.clone(),
            is_complete: false,
        }
    }

    /// Apply an info update, keeping the session key and completion state.
    pub fn apply_info_packet(&mut self, packet: &SessionInfoPacket) {
        if !packet.data_source.is_empty() {
            self.data_source = packet.data_source.clone();
        }
        self.identifier = packet.identifier.clone();
        self.session_type = packet.session_type.clone();
        self.version = packet.version;
        self.associate_session_keys = packet.associate_session_keys.clone();
        self.details = packet.details.clone();
    }
}

/// Input for creating a new session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionCreationInfo {
    pub data_source: String,
    pub identifier: String,
    pub session_type: String,
    pub version: u32,
    pub utc_offset_secs: i64,
    pub associate_session_keys: Vec<String>,
    pub details: BTreeMap<String, String>,
}

impl SessionCreationInfo {
    /// Creation info with no associations or details.
    pub fn new(
        data_source: impl Into<String>,
        identifier: impl Into<String>,
        session_type: impl Into<String>,
        version: u32,
        utc_offset_secs: i64,
    ) -> Self {
        Self {
            data_source: data_source.into(),
            identifier: identifier.into(),
            session_type: session_type.into(),
            version,
            utc_offset_secs,
            associate_session_keys: Vec::new(),
            details: BTreeMap::new(),
        }
    }
}

/// A stream of one session, as seen by a reader.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StreamInfo {
    pub data_source: String,
    pub session_key: String,
    pub stream: String,
}

/// Progress marker published by the broker for a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoverageCursorInfo {
    /// Nanoseconds since the Unix epoch up to which data is complete.
    pub coverage_cursor_time: i64,
}

/// Association between a session and another session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionAssociationInfo {
    pub data_source: String,
    pub session_key: String,
    pub associate_session_key: String,
}

/// Out-of-band information packet kinds accepted by [`crate::services::PacketWriter::write_info`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InfoType {
    SessionInfo,
    SystemStatus,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_session_packet_rebuilds_descriptor() {
        let mut details = BTreeMap::new();
        details.insert("Track".to_string(), "Silverstone".to_string());
        let session = SessionInfo {
            data_source: "Default".to_string(),
            session_key: "key-1".to_string(),
            identifier: "FP1".to_string(),
            session_type: "Session".to_string(),
            version: 2,
            utc_offset_secs: 3600,
            associate_session_keys: vec!["key-0".to_string()],
            details,
            is_complete: false,
        };

        let rebuilt = SessionInfo::from_new_session_packet("key-1", &session.to_new_session_packet());
        assert_eq!(rebuilt, session);
    }

    #[test]
    fn test_info_update_keeps_key_and_completion() {
        let mut session = SessionInfo {
            session_key: "key-1".to_string(),
            data_source: "Default".to_string(),
            is_complete: true,
            ..Default::default()
        };
        let update = SessionInfoPacket {
            identifier: "Renamed".to_string(),
            version: 4,
            ..Default::default()
        };

        session.apply_info_packet(&update);
        assert_eq!(session.session_key, "key-1");
        assert_eq!(session.data_source, "Default");
        assert_eq!(session.identifier, "Renamed");
        assert_eq!(session.version, 4);
        assert!(session.is_complete);
    }
}

//! Broker and reader configuration
//!
//! Configuration is passed explicitly to whatever constructs a broker client;
//! there is no process-wide bootstrap. Both configuration types deserialize
//! from YAML with defaults matching a local development broker:
//!
//! ```yaml
//! broker_url: "localhost:9092"
//! stream_creation_strategy: TopicBased
//! stream_creation_timeout_secs: 10
//! ```
//!
//! ```rust
//! use pitlane::config::{StreamCreationStrategy, StreamingApiConfiguration};
//!
//! let config = StreamingApiConfiguration::from_yaml_str("broker_url: \"broker:9094\"").unwrap();
//! assert_eq!(config.broker_url, "broker:9094");
//! assert_eq!(config.stream_creation_strategy, StreamCreationStrategy::TopicBased);
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde::de::DeserializeOwned;

use crate::{Result, TelemetryError};

/// How broker destinations are derived from data sources and streams.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum StreamCreationStrategy {
    /// One topic per `(data source, stream)`; the main stream uses the bare data source.
    #[default]
    TopicBased,
    /// One topic per data source; streams map to partitions.
    PartitionBased,
}

/// Fixed stream-to-partition assignment for [`StreamCreationStrategy::PartitionBased`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionMapping {
    pub stream: String,
    pub partition: u32,
}

/// Broker destination for one stream of a data source.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StreamDestination {
    pub topic: String,
    pub partition: u32,
}

/// Connection settings for the streaming broker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamingApiConfiguration {
    /// Broker bootstrap address, `host:port`.
    pub broker_url: String,
    pub stream_creation_strategy: StreamCreationStrategy,
    pub partition_mappings: Vec<PartitionMapping>,
    pub stream_creation_timeout_secs: u64,
}

impl Default for StreamingApiConfiguration {
    fn default() -> Self {
        Self {
            broker_url: "localhost:9092".to_string(),
            stream_creation_strategy: StreamCreationStrategy::TopicBased,
            partition_mappings: Vec::new(),
            stream_creation_timeout_secs: 10,
        }
    }
}

impl StreamingApiConfiguration {
    /// Parse and validate configuration from YAML text.
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: Self = parse_yaml(yaml, "StreamingApiConfiguration")?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate configuration from a YAML file.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let config: Self = load_yaml(path.as_ref())?;
        config.validate()?;
        Ok(config)
    }

    /// Check settings for consistency.
    pub fn validate(&self) -> Result<()> {
        let Some((host, port)) = self.broker_url.rsplit_once(':') else {
            return Err(TelemetryError::config(format!(
                "broker_url '{}' must be host:port",
                self.broker_url
            )));
        };
        if host.is_empty() || port.parse::<u16>().is_err() {
            return Err(TelemetryError::config(format!(
                "broker_url '{}' must be host:port",
                self.broker_url
            )));
        }

        if self.stream_creation_timeout_secs == 0 {
            return Err(TelemetryError::config("stream_creation_timeout_secs must be positive"));
        }

        for (index, mapping) in self.partition_mappings.iter().enumerate() {
            let duplicate = self.partition_mappings[..index]
                .iter()
                .any(|earlier| earlier.stream == mapping.stream);
            if duplicate {
                return Err(TelemetryError::config(format!(
                    "stream '{}' is mapped to more than one partition",
                    mapping.stream
                )));
            }
        }

        Ok(())
    }

    pub fn stream_creation_timeout(&self) -> Duration {
        Duration::from_secs(self.stream_creation_timeout_secs)
    }

    /// Resolve the broker destination for a stream of a data source.
    ///
    /// The main stream (empty name) always lands on partition 0.
    pub fn destination(&self, data_source: &str, stream: &str) -> Result<StreamDestination> {
        match self.stream_creation_strategy {
            StreamCreationStrategy::TopicBased => {
                let topic = if stream.is_empty() {
                    data_source.to_string()
                } else {
                    format!("{}.{}", data_source, stream)
                };
                Ok(StreamDestination { topic, partition: 0 })
            }
            StreamCreationStrategy::PartitionBased => {
                if stream.is_empty() {
                    return Ok(StreamDestination { topic: data_source.to_string(), partition: 0 });
                }
                self.partition_mappings
                    .iter()
                    .find(|mapping| mapping.stream == stream)
                    .map(|mapping| StreamDestination {
                        topic: data_source.to_string(),
                        partition: mapping.partition,
                    })
                    .ok_or_else(|| {
                        TelemetryError::config(format!(
                            "stream '{}' has no partition mapping",
                            stream
                        ))
                    })
            }
        }
    }
}

/// Whether a reader follows sessions as they are written or replays a finished one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PacketReadingType {
    #[default]
    Live,
    Historic,
}

/// Selection of the sessions and streams a packet reader consumes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PacketReadingConfiguration {
    /// Session to read; required for historic reading.
    pub session_key: Option<String>,
    pub data_source: String,
    /// `*`, `prefix*`, `*suffix` or an exact identifier.
    pub session_identifier_pattern: String,
    pub reading_type: PacketReadingType,
    /// Streams to read; empty means every stream.
    pub streams: Vec<String>,
    pub read_timeout_secs: u64,
}

impl Default for PacketReadingConfiguration {
    fn default() -> Self {
        Self {
            session_key: None,
            data_source: "Default".to_string(),
            session_identifier_pattern: "*".to_string(),
            reading_type: PacketReadingType::Live,
            streams: Vec::new(),
            read_timeout_secs: 10,
        }
    }
}

impl PacketReadingConfiguration {
    /// Live reading of every session on a data source.
    pub fn live(data_source: impl Into<String>) -> Self {
        Self { data_source: data_source.into(), ..Self::default() }
    }

    /// Historic reading of one session.
    pub fn historic(data_source: impl Into<String>, session_key: impl Into<String>) -> Self {
        Self {
            session_key: Some(session_key.into()),
            data_source: data_source.into(),
            reading_type: PacketReadingType::Historic,
            ..Self::default()
        }
    }

    /// Parse and validate configuration from YAML text.
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: Self = parse_yaml(yaml, "PacketReadingConfiguration")?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate configuration from a YAML file.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let config: Self = load_yaml(path.as_ref())?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.data_source.is_empty() {
            return Err(TelemetryError::config("data_source must not be empty"));
        }
        if self.read_timeout_secs == 0 {
            return Err(TelemetryError::config("read_timeout_secs must be positive"));
        }
        if self.reading_type == PacketReadingType::Historic
            && self.session_key.as_deref().is_none_or(str::is_empty)
        {
            return Err(TelemetryError::config("historic reading requires a session_key"));
        }
        Ok(())
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }

    /// Check a session identifier against the configured pattern.
    pub fn matches_identifier(&self, identifier: &str) -> bool {
        let pattern = self.session_identifier_pattern.as_str();
        if pattern == "*" || pattern.is_empty() {
            return true;
        }
        if let Some(prefix) = pattern.strip_suffix('*') {
            return identifier.starts_with(prefix);
        }
        if let Some(suffix) = pattern.strip_prefix('*') {
            return identifier.ends_with(suffix);
        }
        identifier == pattern
    }

    /// Check a stream name against the configured stream list.
    pub fn includes_stream(&self, stream: &str) -> bool {
        self.streams.is_empty() || self.streams.iter().any(|s| s == stream)
    }
}

fn parse_yaml<T: DeserializeOwned>(yaml: &str, context: &str) -> Result<T> {
    serde_yaml_ng::from_str(yaml).map_err(|e| TelemetryError::Parse {
        context: format!("{} YAML", context),
        details: e.to_string(),
    })
}

fn load_yaml<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| TelemetryError::config_file(path.to_path_buf(), Box::new(e)))?;
    serde_yaml_ng::from_str(&text)
        .map_err(|e| TelemetryError::config_file(path.to_path_buf(), Box::new(e)))
}

//! Streaming telemetry client for the open data protocol.
//!
//! Pitlane produces and consumes time-series telemetry exchanged with a
//! streaming broker: it decodes received envelopes and projects parameter
//! samples out of them, generates paced synthetic signals, and writes
//! sessions in the order the broker requires.
//!
//! # Features
//!
//! - **Protocol**: Encode and decode every open data packet kind
//! - **Projection**: Turn periodic data packets into timestamped samples
//! - **Writing**: Session-scoped orchestration with per-writer packet ids
//! - **Reading**: Filtered packet dispatch with session lifecycle events
//! - **In-process broker**: Every broker service without a network transport
//!
//! # Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use pitlane::{
//!     InMemoryBroker, MockDataWriter, MockWriterOptions, PacketReader,
//!     PacketReadingConfiguration, ParameterProjector, ProjectionHandler,
//!     StreamingApiConfiguration,
//! };
//! use futures::StreamExt;
//!
//! #[tokio::main(flavor = "current_thread", start_paused = true)]
//! async fn main() -> pitlane::Result<()> {
//!     let broker = Arc::new(InMemoryBroker::new(&StreamingApiConfiguration::default())?);
//!
//!     let options = MockWriterOptions { packet_count: 2, ..Default::default() };
//!     let writer = MockDataWriter::new(broker.clone(), broker.clone(), broker.clone(), options);
//!     let summary = writer.run().await?;
//!
//!     let config = PacketReadingConfiguration::historic("Default", summary.session_key.clone());
//!     let mut reader = PacketReader::new(config.clone())?;
//!     let projector = ParameterProjector::new(broker.clone(), "Sin:MyApp");
//!     let (handler, samples) = ProjectionHandler::with_stream(projector, 1024);
//!     reader.set_handler(Arc::new(handler)).await;
//!     reader.start(broker.subscribe(&config)?);
//!     reader.finished().await;
//!     drop(reader);
//!
//!     assert_eq!(samples.count().await, 200);
//!     Ok(())
//! }
//! ```

pub mod broker;
pub mod config;
mod error;
pub mod events;
pub mod generator;
pub mod projection;
pub mod protocol;
pub mod reader;
pub mod services;
#[cfg_attr(any(test, feature = "benchmark"), path = "test_utils.rs")]
#[cfg(any(test, feature = "benchmark"))]
pub mod test_utils;
pub mod types;
pub mod writer;

// Core exports
pub use error::*;
pub use types::*;

// Service exports
pub use services::{
    DataFormatService, PacketHandler, PacketSource, PacketWriter, SessionService, SourceMessage,
};

// Main API exports
pub use broker::InMemoryBroker;
pub use config::{
    PacketReadingConfiguration, PacketReadingType, StreamCreationStrategy,
    StreamingApiConfiguration,
};
pub use events::{EventBus, EventKind, ReaderEvent, SessionNotifier, SubscriptionId};
pub use generator::{PacketIdGenerator, PeriodicPacketGenerator};
pub use projection::{ParameterProjector, ProjectionHandler};
pub use reader::{HandlerId, PacketReader, ReaderSummary};
pub use writer::{MockDataWriter, MockWriterOptions, SessionWriter, WriteSummary};

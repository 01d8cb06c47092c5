//! Broker implementations
//!
//! [`InMemoryBroker`] implements every service trait in-process so writers and
//! readers can run end to end without a network transport.
//!
//! ```rust
//! use pitlane::broker::InMemoryBroker;
//! use pitlane::config::StreamingApiConfiguration;
//! use pitlane::services::DataFormatService;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> pitlane::Result<()> {
//! let broker = InMemoryBroker::new(&StreamingApiConfiguration::default())?;
//! let parameters = vec!["Sin:MyApp".to_string()];
//! let id = broker.get_parameter_data_format_id("Default", &parameters).await?;
//! assert_eq!(broker.get_parameters_list("Default", id).await?, parameters);
//! # Ok(())
//! # }
//! ```

mod memory;

pub use memory::{BrokerSource, InMemoryBroker, LIVE_CHANNEL_CAPACITY};

//! Writes one mock session of sine wave data to an in-process broker.
//!
//! Usage: `sample_writer [streaming-config.yaml]`

use std::sync::Arc;

use anyhow::{Context, Result};
use pitlane::{
    InMemoryBroker, MockDataWriter, MockWriterOptions, SessionService, StreamingApiConfiguration,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = match std::env::args().nth(1) {
        Some(path) => StreamingApiConfiguration::from_path(&path)
            .with_context(|| format!("loading streaming configuration from {}", path))?,
        None => StreamingApiConfiguration::default(),
    };

    let broker = Arc::new(InMemoryBroker::new(&config).context("creating broker")?);
    let writer = MockDataWriter::new(
        broker.clone(),
        broker.clone(),
        broker.clone(),
        MockWriterOptions {
            stream_creation_timeout: config.stream_creation_timeout(),
            ..Default::default()
        },
    );

    let summary = writer.run().await.context("writing mock session")?;
    info!(
        "Session {} written: {} packets, {} failed writes",
        summary.session_key, summary.packets_written, summary.failed_writes
    );

    for session in broker.get_all_sessions().await? {
        println!(
            "{} '{}' complete={} details={:?}",
            session.session_key, session.identifier, session.is_complete, session.details
        );
    }
    Ok(())
}

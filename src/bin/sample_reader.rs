//! Reads live or historic sessions from an in-process broker.
//!
//! A mock writer feeds the broker so there is something to read. The reader
//! logs every `Sin:MyApp` sample and every session event.
//!
//! Usage: `sample_reader [streaming-config.yaml]`

use std::sync::Arc;

use anyhow::{Context, Result, bail};
use pitlane::{
    InMemoryBroker, MockDataWriter, MockWriterOptions, PacketReader, PacketReadingConfiguration,
    ParameterProjector, ProjectionHandler, SessionNotifier, SessionService,
    StreamingApiConfiguration,
};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

const PARAMETER: &str = "Sin:MyApp";

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

    let answer = prompt("Would you like to record live or historic data? (L/H)").await?;
    match answer.trim().to_uppercase().as_str() {
        "L" => read_live(broker).await,
        "H" => read_historic(broker).await,
        other => bail!("unknown reading mode '{}'", other),
    }
}

async fn read_live(broker: Arc<InMemoryBroker>) -> Result<()> {
    let reading = PacketReadingConfiguration::live("Default");
    let mut reader = PacketReader::new(reading.clone())?;
    let handler = reader.set_handler(Arc::new(projection_handler(&broker))).await;
    let mut notifier = SessionNotifier::new(reader.events());
    reader.start(broker.subscribe(&reading)?);

    let writer = mock_writer(&broker, 10);
    let writing = tokio::spawn(async move {
        if let Err(e) = writer.run().await {
            error!("Mock writer failed: {}", e);
        }
    });

    prompt("Awaiting live sessions... Press Enter to exit...").await?;

    notifier.unsubscribe_from_events();
    writing.abort();
    if let Some(summary) = reader.stop().await {
        info!("Dispatched {} packets", summary.packets_dispatched);
    }
    reader.remove_handler(handler).await;
    Ok(())
}

async fn read_historic(broker: Arc<InMemoryBroker>) -> Result<()> {
    info!("Writing a session to replay");
    mock_writer(&broker, 5).run().await.context("writing session to replay")?;

    let sessions = broker.get_all_sessions().await.context("listing sessions")?;
    println!("The following sessions are available:");
    for (index, session) in sessions.iter().enumerate() {
        println!("[{}] {}", index, session.identifier);
    }

    let answer = prompt("Which session would you like to record? Enter its index number:").await?;
    let Some(session) = answer.trim().parse::<usize>().ok().and_then(|index| sessions.get(index))
    else {
        bail!("invalid session index '{}'", answer.trim());
    };

    let reading =
        PacketReadingConfiguration::historic(session.data_source.clone(), session.session_key.clone());
    let mut reader = PacketReader::new(reading.clone())?;
    let handler = reader.set_handler(Arc::new(projection_handler(&broker))).await;
    let mut notifier = SessionNotifier::new(reader.events());
    reader.start(broker.subscribe(&reading)?);

    if let Some(summary) = reader.finished().await {
        info!(
            "Replayed {} packets, {} sessions completed",
            summary.packets_dispatched, summary.sessions_completed
        );
    }

    notifier.unsubscribe_from_events();
    reader.remove_handler(handler).await;
    Ok(())
}

fn projection_handler(broker: &Arc<InMemoryBroker>) -> ProjectionHandler {
    ProjectionHandler::new(ParameterProjector::new(broker.clone(), PARAMETER))
}

fn mock_writer(broker: &Arc<InMemoryBroker>, packet_count: usize) -> MockDataWriter {
    MockDataWriter::new(
        broker.clone(),
        broker.clone(),
        broker.clone(),
        MockWriterOptions {
            packet_count,
            stream_creation_timeout: broker.config().stream_creation_timeout(),
            ..Default::default()
        },
    )
}

async fn prompt(message: &str) -> Result<String> {
    println!("{}", message);
    let line = tokio::task::spawn_blocking(|| {
        let mut line = String::new();
        std::io::stdin().read_line(&mut line).map(|_| line)
    })
    .await
    .context("stdin reader task failed")?
    .context("reading stdin")?;
    Ok(line)
}

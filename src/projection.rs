//! Periodic packet decoding and single-parameter projection
//!
//! [`ParameterProjector`] turns one received envelope into the samples of one
//! parameter of interest. [`ProjectionHandler`] plugs a projector into a
//! packet reader, logging every sample and optionally forwarding records to a
//! [`Stream`](futures::Stream).

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, trace, warn};

use crate::protocol::{PacketType, PeriodicDataPacket, SampleColumn};
use crate::services::{DataFormatService, PacketHandler};
use crate::types::{ReceivedPacket, SampleRecord, SampleValue};
use crate::{Result, TelemetryError};

/// Projects the samples of one named parameter out of periodic data packets.
pub struct ParameterProjector {
    data_formats: Arc<dyn DataFormatService>,
    parameter: String,
}

impl ParameterProjector {
    pub fn new(data_formats: Arc<dyn DataFormatService>, parameter: impl Into<String>) -> Self {
        Self { data_formats, parameter: parameter.into() }
    }

    /// The parameter this projector extracts.
    pub fn parameter(&self) -> &str {
        &self.parameter
    }

    /// Project the configured parameter out of one received envelope.
    ///
    /// Envelopes that do not carry periodic data yield no records. Parameter
    /// names come from the packet itself when it lists them, otherwise from
    /// the data format service.
    ///
    /// # Errors
    ///
    /// - [`TelemetryError::Parse`] if the envelope or payload cannot be decoded
    /// - [`TelemetryError::ParameterLookup`] if the parameter list cannot be resolved
    /// - [`TelemetryError::MalformedRecord`] if parameters and columns disagree in count
    pub async fn project(&self, received: &ReceivedPacket) -> Result<Vec<SampleRecord>> {
        let packet = received.packet()?;
        if packet.packet_type != PacketType::PeriodicData {
            trace!("Skipping {} packet {}", packet.packet_type, packet.id);
            return Ok(Vec::new());
        }

        let periodic: PeriodicDataPacket = packet.content_as()?;
        let parameters = self.resolve_parameters(&received.data_source, &periodic).await?;

        if parameters.len() != periodic.columns.len() {
            return Err(TelemetryError::MalformedRecord {
                parameters: parameters.len(),
                columns: periodic.columns.len(),
            });
        }

        let Some(index) = parameters.iter().position(|name| *name == self.parameter) else {
            trace!("Parameter {} not present in packet {}", self.parameter, packet.id);
            return Ok(Vec::new());
        };

        self.records_from_column(&periodic, &periodic.columns[index])
    }

    async fn resolve_parameters(
        &self,
        data_source: &str,
        periodic: &PeriodicDataPacket,
    ) -> Result<Vec<String>> {
        if let Some(parameters) = periodic.data_format.embedded_parameters() {
            return Ok(parameters.to_vec());
        }

        let data_format_id = periodic.data_format.identifier();
        self.data_formats.get_parameters_list(data_source, data_format_id).await.map_err(|e| {
            match e {
                lookup @ TelemetryError::ParameterLookup { .. } => lookup,
                other => TelemetryError::ParameterLookup {
                    data_source: data_source.to_string(),
                    data_format_id: data_format_id.0,
                    reason: other.to_string(),
                },
            }
        })
    }

    fn records_from_column(
        &self,
        periodic: &PeriodicDataPacket,
        column: &SampleColumn,
    ) -> Result<Vec<SampleRecord>> {
        let samples: Vec<_> = match column {
            SampleColumn::Double(samples) => {
                samples.iter().map(|s| (SampleValue::Float64(s.value), s.status)).collect()
            }
            SampleColumn::Int32(samples) => {
                samples.iter().map(|s| (SampleValue::Int32(s.value), s.status)).collect()
            }
            SampleColumn::Bool(samples) => {
                samples.iter().map(|s| (SampleValue::Bool(s.value), s.status)).collect()
            }
            SampleColumn::Empty => Vec::new(),
        };

        samples
            .into_iter()
            .enumerate()
            .map(|(index, (value, status))| {
                let timestamp = periodic.timestamp_at(index).ok_or_else(|| {
                    TelemetryError::parse(
                        "PeriodicDataPacket",
                        format!(
                            "Timestamp overflow at sample {} (start {}, interval {})",
                            index, periodic.start_time, periodic.interval
                        ),
                    )
                })?;
                Ok(SampleRecord { parameter: self.parameter.clone(), timestamp, value, status })
            })
            .collect()
    }
}

/// Packet handler logging the projected samples of one parameter.
///
/// Failures for a single packet are logged and dropped; the reader moves on to
/// the next packet.
pub struct ProjectionHandler {
    projector: ParameterProjector,
    records: Option<mpsc::Sender<SampleRecord>>,
}

impl ProjectionHandler {
    /// Handler that only logs projected samples.
    pub fn new(projector: ParameterProjector) -> Self {
        Self { projector, records: None }
    }

    /// Handler that also forwards projected records into a bounded stream.
    ///
    /// When the stream is full the handler waits for the consumer.
    pub fn with_stream(
        projector: ParameterProjector,
        capacity: usize,
    ) -> (Self, ReceiverStream<SampleRecord>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { projector, records: Some(tx) }, ReceiverStream::new(rx))
    }
}

#[async_trait::async_trait]
impl PacketHandler for ProjectionHandler {
    async fn handle(&self, packet: &ReceivedPacket) {
        let records = match self.projector.project(packet).await {
            Ok(records) => records,
            Err(e) => {
                warn!(
                    "Dropping packet on {}/{} for session {}: {}",
                    packet.data_source, packet.stream, packet.session_key, e
                );
                return;
            }
        };

        if records.is_empty() {
            return;
        }
        debug!("Projected {} samples of {}", records.len(), self.projector.parameter());

        for record in records {
            trace!(
                "{} @ {}: {} ({:?})",
                record.parameter, record.timestamp, record.value, record.status
            );
            if let Some(tx) = &self.records
                && tx.send(record).await.is_err()
            {
                debug!("Record receiver dropped, no longer forwarding");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{
        DataFormatId, DataStatus, DoubleSample, EndOfSessionPacket, Int32Sample, OpenDataMessage,
        Packet, SampleDataFormat,
    };
    use crate::test_utils::{StaticDataFormats, double_column, periodic_packet, received};
    use futures::StreamExt;
    use proptest::prelude::*;

    fn projector(parameter: &str) -> ParameterProjector {
        let formats = StaticDataFormats::new().with_format(
            "Default",
            DataFormatId(4),
            &["A", "B", "vCar:Chassis"],
        );
        ParameterProjector::new(Arc::new(formats), parameter)
    }

    fn three_columns() -> Vec<SampleColumn> {
        vec![
            double_column(&[1.0, 2.0]),
            double_column(&[3.0, 4.0]),
            SampleColumn::Double(vec![
                DoubleSample { value: 80.0, status: DataStatus::Valid },
                DoubleSample { value: 81.5, status: DataStatus::Invalid },
                DoubleSample { value: 83.0, status: DataStatus::Missing },
            ]),
        ]
    }

    #[tokio::test]
    async fn test_projects_matching_column_with_status() {
        let packet = periodic_packet(
            SampleDataFormat::Identifier(DataFormatId(4)),
            1_000,
            10,
            three_columns(),
        );

        let records = projector("vCar:Chassis").project(&received(&packet)).await.unwrap();

        assert_eq!(records.len(), 3);
        assert_eq!(records[0].timestamp, 1_000);
        assert_eq!(records[1].timestamp, 1_010);
        assert_eq!(records[2].timestamp, 1_020);
        assert_eq!(records[1].value, SampleValue::Float64(81.5));
        assert_eq!(records[1].status, DataStatus::Invalid);
        assert_eq!(records[2].status, DataStatus::Missing);
        assert!(records.iter().all(|r| r.parameter == "vCar:Chassis"));
    }

    #[tokio::test]
    async fn test_unknown_status_in_other_column_keeps_projection() {
        let mut columns = three_columns();
        columns[0] = SampleColumn::Double(vec![
            DoubleSample { value: 1.0, status: DataStatus::Other(4) },
            DoubleSample { value: 2.0, status: DataStatus::Valid },
        ]);
        let packet =
            periodic_packet(SampleDataFormat::Identifier(DataFormatId(4)), 1_000, 10, columns);

        let records = projector("vCar:Chassis").project(&received(&packet)).await.unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(records[2].status, DataStatus::Missing);

        let records = projector("A").project(&received(&packet)).await.unwrap();
        assert_eq!(records[0].status, DataStatus::Other(4));
        assert_eq!(records[1].status, DataStatus::Valid);
    }

    #[tokio::test]
    async fn test_embedded_parameters_skip_lookup() {
        let packet = periodic_packet(
            SampleDataFormat::Parameters(vec!["Speed".to_string()]),
            0,
            5,
            vec![double_column(&[10.0, 11.0])],
        );
        // Empty registry: any lookup would fail
        let projector = ParameterProjector::new(Arc::new(StaticDataFormats::new()), "Speed");

        let records = projector.project(&received(&packet)).await.unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].timestamp, 5);
    }

    #[tokio::test]
    async fn test_count_mismatch_is_malformed_record() {
        let mut columns = three_columns();
        columns.pop();
        let packet =
            periodic_packet(SampleDataFormat::Identifier(DataFormatId(4)), 0, 1, columns);

        let err = projector("A").project(&received(&packet)).await.unwrap_err();
        match err {
            TelemetryError::MalformedRecord { parameters, columns } => {
                assert_eq!(parameters, 3);
                assert_eq!(columns, 2);
            }
            other => panic!("Expected MalformedRecord, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_unknown_format_is_lookup_failure() {
        let packet = periodic_packet(
            SampleDataFormat::Identifier(DataFormatId(99)),
            0,
            1,
            three_columns(),
        );

        let err = projector("A").project(&received(&packet)).await.unwrap_err();
        assert!(matches!(err, TelemetryError::ParameterLookup { data_format_id: 99, .. }));
    }

    #[tokio::test]
    async fn test_non_periodic_packet_yields_nothing() {
        let end = EndOfSessionPacket { data_source: "Default".to_string() };
        let packet = Packet::wrap(PacketType::EndOfSession, "key-1", false, &end, 3);

        let records = projector("A").project(&received(&packet)).await.unwrap();
        assert!(records.is_empty());
    }

    #[tokio::test]
    async fn test_absent_parameter_yields_nothing() {
        let packet = periodic_packet(
            SampleDataFormat::Identifier(DataFormatId(4)),
            0,
            1,
            three_columns(),
        );

        let records = projector("nGear").project(&received(&packet)).await.unwrap();
        assert!(records.is_empty());
    }

    #[tokio::test]
    async fn test_int32_columns_project() {
        let packet = periodic_packet(
            SampleDataFormat::Parameters(vec!["nGear".to_string()]),
            100,
            50,
            vec![SampleColumn::Int32(vec![
                Int32Sample { value: 3, status: DataStatus::Valid },
                Int32Sample { value: 4, status: DataStatus::Valid },
            ])],
        );
        let projector = ParameterProjector::new(Arc::new(StaticDataFormats::new()), "nGear");

        let records = projector.project(&received(&packet)).await.unwrap();
        assert_eq!(records[1].value, SampleValue::Int32(4));
        assert_eq!(records[1].timestamp, 150);
    }

    #[tokio::test]
    async fn test_timestamp_overflow_is_parse_error() {
        let packet = periodic_packet(
            SampleDataFormat::Parameters(vec!["A".to_string()]),
            i64::MAX,
            1,
            vec![double_column(&[0.0, 1.0])],
        );
        let projector = ParameterProjector::new(Arc::new(StaticDataFormats::new()), "A");

        let err = projector.project(&received(&packet)).await.unwrap_err();
        assert!(matches!(err, TelemetryError::Parse { .. }));
    }

    #[tokio::test]
    async fn test_garbage_envelope_is_parse_error() {
        let garbage = ReceivedPacket::new("Default", "", "key-1", vec![0xff, 0xff, 0xff]);
        let err = projector("A").project(&garbage).await.unwrap_err();
        assert!(matches!(err, TelemetryError::Parse { .. }));
    }

    #[tokio::test]
    async fn test_handler_forwards_records_and_survives_bad_packets() {
        let (handler, stream) = ProjectionHandler::with_stream(projector("B"), 16);

        let mut bad_columns = three_columns();
        bad_columns.pop();
        let bad = periodic_packet(SampleDataFormat::Identifier(DataFormatId(4)), 0, 1, bad_columns);
        let good = periodic_packet(
            SampleDataFormat::Identifier(DataFormatId(4)),
            0,
            1,
            three_columns(),
        );

        handler.handle(&received(&bad)).await;
        handler.handle(&received(&good)).await;
        drop(handler);

        let values: Vec<f64> = stream.map(|r| r.value.as_f64()).collect().await;
        assert_eq!(values, vec![3.0, 4.0]);
    }

    proptest! {
        #[test]
        fn prop_projection_timestamps_follow_start_and_interval(
            start_time in -1_000_000_000_000i64..1_000_000_000_000i64,
            interval in 0i64..1_000_000_000i64,
            values in prop::collection::vec(-1.0e6f64..1.0e6f64, 0..50),
            target in 0usize..3
        ) {
            let names = ["A", "B", "vCar:Chassis"];
            let columns: Vec<SampleColumn> = (0..3)
                .map(|i| if i == target { double_column(&values) } else { double_column(&[0.0]) })
                .collect();
            let packet = periodic_packet(
                SampleDataFormat::Identifier(DataFormatId(4)),
                start_time,
                interval,
                columns,
            );
            let bytes = packet.to_bytes();
            let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();

            let records = runtime
                .block_on(projector(names[target]).project(&ReceivedPacket::new("Default", "", "key-1", bytes)))
                .unwrap();

            prop_assert_eq!(records.len(), values.len());
            for (j, record) in records.iter().enumerate() {
                prop_assert_eq!(record.timestamp, start_time + j as i64 * interval);
                prop_assert_eq!(record.value, SampleValue::Float64(values[j]));
            }
        }
    }
}

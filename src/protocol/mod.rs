//! Open data protocol messages.
//!
//! Every unit exchanged with the broker is a [`Packet`] envelope whose
//! `content` holds one inner message selected by [`PacketType`]:
//!
//! | Tag             | Content                     |
//! |-----------------|-----------------------------|
//! | `PeriodicData`  | [`PeriodicDataPacket`]      |
//! | `Configuration` | [`ConfigurationPacket`]     |
//! | `Marker`        | [`MarkerPacket`]            |
//! | `SessionInfo`   | [`SessionInfoPacket`]       |
//! | `NewSession`    | [`NewSessionPacket`]        |
//! | `EndOfSession`  | [`EndOfSessionPacket`]      |
//!
//! ## Example
//!
//! ```rust
//! use pitlane::protocol::{
//!     DataFormatId, DataStatus, DoubleSample, OpenDataMessage, Packet, PacketType,
//!     PeriodicDataPacket, SampleColumn, SampleDataFormat,
//! };
//!
//! let periodic = PeriodicDataPacket {
//!     data_format: SampleDataFormat::Identifier(DataFormatId(3)),
//!     start_time: 1_000,
//!     interval: 10,
//!     columns: vec![SampleColumn::Double(vec![DoubleSample { value: 0.5, status: DataStatus::Valid }])],
//! };
//! let packet = Packet::wrap(PacketType::PeriodicData, "session", false, &periodic, 0);
//!
//! let decoded = Packet::from_bytes(&packet.to_bytes()).unwrap();
//! assert_eq!(decoded.packet_type, PacketType::PeriodicData);
//! assert_eq!(decoded.content_as::<PeriodicDataPacket>().unwrap(), periodic);
//! ```

mod configuration;
mod packet;
mod periodic;
mod session;
pub mod wire;

pub use configuration::{ConfigurationPacket, DataType, GroupDefinition, ParameterDefinition};
pub use packet::{Packet, PacketType};
pub use periodic::{
    BoolSample, DataFormatId, DataStatus, DoubleSample, Int32Sample, PeriodicDataPacket,
    SampleColumn, SampleDataFormat,
};
pub use session::{EndOfSessionPacket, MarkerPacket, NewSessionPacket, SessionInfoPacket};
pub use wire::OpenDataMessage;

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    prop_compose! {
        fn arb_double_sample()(
            value in any::<f64>().prop_filter("NaN never compares equal", |v| !v.is_nan()),
            status in prop::sample::select(vec![
                DataStatus::Unspecified, DataStatus::Valid, DataStatus::Invalid, DataStatus::Missing
            ])
        ) -> DoubleSample {
            DoubleSample { value, status }
        }
    }

    proptest! {
        #[test]
        fn prop_periodic_packets_survive_envelope(
            start_time in any::<i64>(),
            interval in any::<i64>(),
            format_id in any::<u64>(),
            columns in prop::collection::vec(prop::collection::vec(arb_double_sample(), 0..20), 0..5),
            session_key in "[a-z0-9-]{0,16}",
            id in any::<u64>(),
            is_essential in any::<bool>()
        ) {
            let periodic = PeriodicDataPacket {
                data_format: SampleDataFormat::Identifier(DataFormatId(format_id)),
                start_time,
                interval,
                columns: columns.into_iter().map(SampleColumn::Double).collect(),
            };
            let packet = Packet::wrap(PacketType::PeriodicData, session_key, is_essential, &periodic, id);

            let decoded = Packet::from_bytes(&packet.to_bytes()).unwrap();
            prop_assert_eq!(&decoded, &packet);
            prop_assert_eq!(decoded.content_as::<PeriodicDataPacket>().unwrap(), periodic);
        }

        #[test]
        fn prop_truncated_packets_fail_cleanly(cut in 1usize..64) {
            let periodic = PeriodicDataPacket {
                data_format: SampleDataFormat::Parameters(vec!["A".into(), "B".into()]),
                start_time: 123_456_789,
                interval: 10_000_000,
                columns: vec![
                    SampleColumn::Double(vec![DoubleSample { value: 1.0, status: DataStatus::Valid }; 3]),
                    SampleColumn::Double(vec![DoubleSample { value: 2.0, status: DataStatus::Invalid }; 3]),
                ],
            };
            let bytes = periodic.to_bytes();
            let cut = cut.min(bytes.len() - 1);

            // A strict prefix either fails or decodes to something different, never panics
            if let Ok(decoded) = PeriodicDataPacket::from_bytes(&bytes[..bytes.len() - cut]) {
                prop_assert_ne!(decoded, periodic);
            }
        }
    }
}

//! Paced synthetic signal generation and packet sequence ids

use std::f64::consts::TAU;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::time::Instant;
use tracing::trace;

use crate::protocol::{
    DataFormatId, DataStatus, DoubleSample, PeriodicDataPacket, SampleColumn, SampleDataFormat,
};
use crate::{Result, TelemetryError};

/// Samples per generated packet unless configured otherwise.
pub const DEFAULT_BATCH_SIZE: usize = 100;

const NANOS_PER_SECOND: f64 = 1e9;

/// Generator of sine wave periodic packets paced to wall-clock time.
///
/// Every call to [`generate_packet`](Self::generate_packet) produces one
/// packet holding a full sine period and waits roughly one sample interval
/// per sample. The timestamp cursor carries over between calls, so
/// consecutive packets cover contiguous, non-overlapping time ranges.
#[derive(Debug)]
pub struct PeriodicPacketGenerator {
    interval: i64,
    data_format_id: DataFormatId,
    next_timestamp: i64,
    batch_size: usize,
    overruns: u64,
}

impl PeriodicPacketGenerator {
    /// Create a generator sampling at `frequency` Hz, starting at
    /// `first_timestamp` nanoseconds since the Unix epoch.
    ///
    /// The sample interval is `floor(1e9 / frequency)` nanoseconds.
    pub fn new(frequency: f64, data_format_id: DataFormatId, first_timestamp: i64) -> Result<Self> {
        if !frequency.is_finite() || frequency <= 0.0 {
            return Err(TelemetryError::config(format!(
                "frequency must be a positive number of Hz, got {}",
                frequency
            )));
        }

        let interval = (NANOS_PER_SECOND / frequency).floor() as i64;
        if interval < 1 {
            return Err(TelemetryError::config(format!(
                "frequency {} Hz is above the 1 ns timestamp resolution",
                frequency
            )));
        }

        Ok(Self {
            interval,
            data_format_id,
            next_timestamp: first_timestamp,
            batch_size: DEFAULT_BATCH_SIZE,
            overruns: 0,
        })
    }

    /// Use `batch_size` samples per packet.
    pub fn with_batch_size(mut self, batch_size: usize) -> Result<Self> {
        if batch_size == 0 {
            return Err(TelemetryError::config("batch_size must be at least 1"));
        }
        self.batch_size = batch_size;
        Ok(self)
    }

    /// Sample interval in nanoseconds.
    pub fn interval(&self) -> i64 {
        self.interval
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Start time of the next packet.
    pub fn next_timestamp(&self) -> i64 {
        self.next_timestamp
    }

    /// Number of samples whose computation took at least one interval.
    pub fn overruns(&self) -> u64 {
        self.overruns
    }

    /// Produce the next packet, pacing sample production to the interval.
    ///
    /// Sample `i` of a batch is released no earlier than `i + 1` intervals
    /// after the batch started. Deadlines are absolute, so timer granularity
    /// does not accumulate across samples.
    pub async fn generate_packet(&mut self) -> PeriodicDataPacket {
        let step = TAU / self.batch_size as f64;
        let interval = Duration::from_nanos(self.interval.unsigned_abs());
        let mut samples = Vec::with_capacity(self.batch_size);
        let mut deadline = Instant::now();

        for index in 0..self.batch_size {
            let before = Instant::now();
            let value = (index as f64 * step).sin();
            samples.push(DoubleSample { value, status: DataStatus::Valid });
            let elapsed = before.elapsed();

            if overran(interval, elapsed) {
                self.overruns += 1;
                trace!("Sample {} overran its {:?} interval by {:?}", index, interval, elapsed - interval);
            }

            deadline += interval;
            if deadline > Instant::now() {
                tokio::time::sleep_until(deadline).await;
            }
        }

        let packet = PeriodicDataPacket {
            data_format: SampleDataFormat::Identifier(self.data_format_id),
            start_time: self.next_timestamp,
            interval: self.interval,
            columns: vec![SampleColumn::Double(samples)],
        };

        // Saturates at i64::MAX
        let span = self.interval.saturating_mul(self.batch_size as i64);
        self.next_timestamp = self.next_timestamp.saturating_add(span);

        packet
    }
}

/// Whether computing one sample took its whole interval.
fn overran(interval: Duration, elapsed: Duration) -> bool {
    elapsed >= interval
}

/// Strictly increasing packet sequence ids, starting at 0.
#[derive(Debug, Default)]
pub struct PacketIdGenerator {
    next: AtomicU64,
}

impl PacketIdGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the next id.
    pub fn next_id(&self) -> u64 {
        self.next.fetch_add(1, Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const T0: i64 = 1_700_000_000_000_000_000;

    fn samples(packet: &PeriodicDataPacket) -> &[DoubleSample] {
        match &packet.columns[..] {
            [SampleColumn::Double(samples)] => samples,
            other => panic!("Expected one double column, got {:?}", other),
        }
    }

    #[test]
    fn test_interval_is_floor_of_period() {
        let generator = PeriodicPacketGenerator::new(100.0, DataFormatId(1), T0).unwrap();
        assert_eq!(generator.interval(), 10_000_000);

        let generator = PeriodicPacketGenerator::new(3.0, DataFormatId(1), T0).unwrap();
        assert_eq!(generator.interval(), 333_333_333);
    }

    #[test]
    fn test_invalid_settings_are_rejected() {
        for frequency in [0.0, -5.0, f64::NAN, f64::INFINITY, 2e9] {
            let result = PeriodicPacketGenerator::new(frequency, DataFormatId(1), T0);
            assert!(matches!(result, Err(TelemetryError::Config { .. })), "{}", frequency);
        }

        let generator = PeriodicPacketGenerator::new(100.0, DataFormatId(1), T0).unwrap();
        assert!(generator.with_batch_size(0).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_batches_are_contiguous_at_100_hz() {
        let mut generator = PeriodicPacketGenerator::new(100.0, DataFormatId(7), T0).unwrap();

        let first = generator.generate_packet().await;
        assert_eq!(first.start_time, T0);
        assert_eq!(first.interval, 10_000_000);
        assert_eq!(first.data_format, SampleDataFormat::Identifier(DataFormatId(7)));
        assert_eq!(samples(&first).len(), 100);
        assert_eq!(first.timestamp_at(99), Some(T0 + 990_000_000));

        let second = generator.generate_packet().await;
        assert_eq!(second.start_time, T0 + 1_000_000_000);
        assert_eq!(generator.next_timestamp(), T0 + 2_000_000_000);
    }

    #[tokio::test(start_paused = true)]
    async fn test_samples_trace_one_sine_period() {
        let mut generator = PeriodicPacketGenerator::new(100.0, DataFormatId(1), T0).unwrap();
        let packet = generator.generate_packet().await;
        let samples = samples(&packet);

        assert_eq!(samples[0].value, 0.0);
        assert!((samples[25].value - 1.0).abs() < 1e-12);
        assert!((samples[75].value + 1.0).abs() < 1e-12);
        assert!(samples.iter().all(|s| s.status == DataStatus::Valid));
    }

    #[tokio::test(start_paused = true)]
    async fn test_generation_is_paced_to_interval() {
        let mut generator = PeriodicPacketGenerator::new(100.0, DataFormatId(1), T0).unwrap();

        let started = Instant::now();
        generator.generate_packet().await;

        // Sample computation takes no virtual time, so every interval is slept in full
        assert_eq!(started.elapsed(), Duration::from_secs(1));
        assert_eq!(generator.overruns(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_custom_batch_size() {
        let mut generator = PeriodicPacketGenerator::new(1000.0, DataFormatId(1), 0)
            .unwrap()
            .with_batch_size(4)
            .unwrap();

        let packet = generator.generate_packet().await;
        assert_eq!(samples(&packet).len(), 4);
        assert!((samples(&packet)[1].value - 1.0).abs() < 1e-12);
        assert_eq!(generator.next_timestamp(), 4_000_000);
    }

    #[test]
    fn test_overrun_starts_at_full_interval() {
        let interval = Duration::from_millis(10);

        assert!(!overran(interval, Duration::from_millis(3)));
        assert!(overran(interval, interval));
        assert!(overran(interval, Duration::from_millis(25)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_consecutive_batches_do_not_drift() {
        let mut generator = PeriodicPacketGenerator::new(100.0, DataFormatId(1), T0)
            .unwrap()
            .with_batch_size(10)
            .unwrap();

        let started = Instant::now();
        generator.generate_packet().await;
        generator.generate_packet().await;

        assert_eq!(started.elapsed(), Duration::from_millis(200));
    }

    #[tokio::test]
    async fn test_sub_millisecond_interval_keeps_wall_clock_pace() {
        // 10 kHz: 100 µs per sample, well below the timer's 1 ms granularity
        let mut generator = PeriodicPacketGenerator::new(10_000.0, DataFormatId(1), T0).unwrap();

        let started = std::time::Instant::now();
        for _ in 0..5 {
            generator.generate_packet().await;
        }
        let elapsed = started.elapsed();

        // Nominal 50 ms; per-sample rounding would take over half a second
        assert!(elapsed >= Duration::from_millis(50), "finished early: {:?}", elapsed);
        assert!(elapsed < Duration::from_millis(200), "fell behind: {:?}", elapsed);
    }

    #[test]
    fn test_packet_ids_increase_from_zero() {
        let ids = PacketIdGenerator::new();
        assert_eq!(ids.next_id(), 0);
        assert_eq!(ids.next_id(), 1);
        assert_eq!(ids.next_id(), 2);
    }

    proptest! {
        #[test]
        fn prop_cursor_advances_by_full_batches(
            frequency in 1.0f64..10_000.0,
            first_timestamp in 0i64..1_000_000_000_000_000_000,
            batches in 0usize..4
        ) {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_time()
                .start_paused(true)
                .build()
                .unwrap();
            let mut generator = PeriodicPacketGenerator::new(frequency, DataFormatId(1), first_timestamp)
                .unwrap()
                .with_batch_size(10)
                .unwrap();
            let interval = generator.interval();

            for n in 0..batches {
                let packet = runtime.block_on(generator.generate_packet());
                prop_assert_eq!(packet.start_time, first_timestamp + n as i64 * 10 * interval);
            }
            prop_assert_eq!(generator.next_timestamp(), first_timestamp + batches as i64 * 10 * interval);
        }
    }
}

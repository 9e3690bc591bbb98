//! Sample, configuration, and event types produced by the LinkBand driver.

use std::time::Duration;

/// The three streaming sensors on a LinkBand device.
///
/// Battery is not listed here: its notification is managed outside the
/// activation queue and stays enabled for the whole connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SensorType {
    Eeg,
    Ppg,
    Acc,
}

impl SensorType {
    /// All sensors in firmware activation order (EEG → ACC → PPG).
    ///
    /// Enabling notifications in any other order — or all at once — is
    /// unreliable on current firmware.
    pub const ACTIVATION_ORDER: [SensorType; 3] =
        [SensorType::Eeg, SensorType::Acc, SensorType::Ppg];

    pub fn name(&self) -> &'static str {
        match self {
            SensorType::Eeg => "EEG",
            SensorType::Ppg => "PPG",
            SensorType::Acc => "ACC",
        }
    }
}

/// One decoded EEG sample (two channels plus electrode-contact state).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EegSample {
    /// Epoch milliseconds, synthesized by the per-stream continuity clock.
    pub timestamp_ms: i64,
    /// `true` when any electrode lead is disconnected.
    pub lead_off: bool,
    /// Channel 1 voltage in µV.
    pub ch1_uv: f64,
    /// Channel 2 voltage in µV.
    pub ch2_uv: f64,
    /// Channel 1 raw 24-bit ADC code, sign-extended.
    pub ch1_raw: i32,
    /// Channel 2 raw 24-bit ADC code, sign-extended.
    pub ch2_raw: i32,
}

/// One decoded PPG sample (raw optical ADC counts, unscaled).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PpgSample {
    /// Epoch milliseconds, synthesized by the per-stream continuity clock.
    pub timestamp_ms: i64,
    /// Red LED channel, unsigned 24-bit.
    pub red: u32,
    /// Infrared LED channel, unsigned 24-bit.
    pub ir: u32,
}

/// One decoded accelerometer sample in raw device units.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccSample {
    /// Epoch milliseconds, synthesized by the per-stream continuity clock.
    pub timestamp_ms: i64,
    pub x: i16,
    pub y: i16,
    pub z: i16,
}

/// An accelerometer sample after the active [`AccelerometerMode`] projection.
///
/// In `Raw` mode this mirrors the [`AccSample`] unchanged; in `Motion` mode
/// the gravity estimate has been subtracted from every axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessedAccSample {
    pub timestamp_ms: i64,
    pub x: i16,
    pub y: i16,
    pub z: i16,
    /// The mode that produced this sample.
    pub mode: AccelerometerMode,
}

/// Battery state of charge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatteryReading {
    /// Percent, 0–100.
    pub level: u8,
}

/// Accelerometer output projection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AccelerometerMode {
    /// Raw acceleration, gravity included.
    #[default]
    Raw,
    /// Linear acceleration with the low-pass gravity estimate removed.
    Motion,
}

/// Which batch trigger applies to all sensors.
///
/// Each sensor keeps its own threshold magnitude per mode in
/// [`SensorBatchConfig`]; this selects which one is in force.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CollectionMode {
    #[default]
    SampleCount,
    Seconds,
    Minutes,
}

/// Per-sensor batch threshold magnitudes, one per [`CollectionMode`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SensorBatchConfig {
    /// Batch size in samples for [`CollectionMode::SampleCount`].
    pub sample_count: usize,
    /// Window length in seconds for [`CollectionMode::Seconds`].
    pub seconds: u32,
    /// Window length in minutes for [`CollectionMode::Minutes`].
    pub minutes: u32,
}

impl SensorBatchConfig {
    /// Accepted range for [`SensorBatchConfig::sample_count`] updates.
    pub const SAMPLE_COUNT_RANGE: std::ops::RangeInclusive<usize> = 1..=100_000;
    /// Accepted range for [`SensorBatchConfig::seconds`] updates.
    pub const SECONDS_RANGE: std::ops::RangeInclusive<u32> = 1..=3600;
    /// Accepted range for [`SensorBatchConfig::minutes`] updates.
    pub const MINUTES_RANGE: std::ops::RangeInclusive<u32> = 1..=60;

    /// Default thresholds tuned per sensor rate (one second of samples in
    /// sample-count mode).
    pub fn default_for(sensor: SensorType) -> Self {
        let sample_count = match sensor {
            SensorType::Eeg => 250,
            SensorType::Ppg => 50,
            SensorType::Acc => 25,
        };
        Self {
            sample_count,
            seconds: 1,
            minutes: 1,
        }
    }

    /// Resolve the trigger for the given global mode.
    pub fn trigger(&self, mode: CollectionMode) -> BatchTrigger {
        match mode {
            CollectionMode::SampleCount => BatchTrigger::SampleCount(self.sample_count),
            CollectionMode::Seconds => {
                BatchTrigger::TimeInterval(Duration::from_secs(self.seconds as u64))
            }
            CollectionMode::Minutes => {
                BatchTrigger::TimeInterval(Duration::from_secs(self.minutes as u64 * 60))
            }
        }
    }
}

/// Derived batch-trigger configuration, recomputed whenever the global mode
/// or a sensor's threshold changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchTrigger {
    /// Emit once the buffer holds this many samples.
    SampleCount(usize),
    /// Emit once the sample-timestamp span reaches this interval.
    TimeInterval(Duration),
}

/// BLE connection lifecycle, owned by the supervisor and changed only
/// through transport events.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    /// Connected; carries the platform device identifier.
    Connected(String),
}

/// A device found while scanning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredDevice {
    /// Advertised name (always starts with `LXB-`).
    pub name: String,
    /// Platform BLE identifier (UUID string on macOS/Windows, MAC on Linux).
    pub id: String,
}

/// Lifecycle events emitted on the driver's event stream.
///
/// Continuous data (samples, batches, battery) flows through the watch
/// channels on [`crate::client::LinkBandStreams`]; this stream carries only
/// the discrete transitions a consumer would want to react to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkBandEvent {
    /// Link established and GATT services discovered.
    Connected(String),
    /// Link lost or manually closed.
    Disconnected,
    /// A sensor's notification was confirmed (first data seen) or timed out
    /// and was skipped; either way the activation queue advanced past it.
    SensorActivated(SensorType),
    /// Every sensor in the activation queue has been brought up.
    ReceivingData,
    /// A scheduled auto-reconnect attempt is about to run (1-based counter).
    Reconnecting { attempt: u32 },
    /// The reconnect attempt budget was exhausted; the driver stays
    /// disconnected until an explicit connect.
    ReconnectExhausted,
}

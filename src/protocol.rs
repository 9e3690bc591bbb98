//! GATT UUIDs, sampling constants, and wire-format parameters for LinkBand
//! devices.
//!
//! The EEG, PPG, and accelerometer services live in a LinkBand vendor
//! namespace; battery uses the Bluetooth SIG standard battery service.

use std::time::Duration;

use uuid::Uuid;

// ── Services and characteristics ──────────────────────────────────────────────

/// Accelerometer service.
pub const ACC_SERVICE_UUID: Uuid = Uuid::from_u128(0x75c276c3_8f97_20bc_a143_b354244886d4);

/// Accelerometer data characteristic — notify, ACC packets.
pub const ACC_CHAR_UUID: Uuid = Uuid::from_u128(0xd3d46a35_4394_e9aa_5a43_e7921120aaed);

/// EEG service.
pub const EEG_SERVICE_UUID: Uuid = Uuid::from_u128(0xdf7b5d95_3afe_00a1_084c_b50895ef4f95);

/// EEG data characteristic — notify, EEG packets.
pub const EEG_NOTIFY_CHAR_UUID: Uuid = Uuid::from_u128(0x00ab4d15_66b4_0d8a_824f_8d6f8966c6e5);

/// EEG control characteristic — write-only.
///
/// The firmware accepts a single `0x01` byte to start the EEG front-end and
/// the ASCII string `"stop"` to halt it; see [`EEG_START_COMMAND`] and
/// [`EEG_STOP_COMMAND`].
pub const EEG_WRITE_CHAR_UUID: Uuid = Uuid::from_u128(0x0065cacb_9e52_21bf_a849_99a80d83830e);

/// PPG service.
pub const PPG_SERVICE_UUID: Uuid = Uuid::from_u128(0x1cc50ec0_6967_9d84_a243_c2267f924d1f);

/// PPG data characteristic — notify, PPG packets.
pub const PPG_CHAR_UUID: Uuid = Uuid::from_u128(0x6c739642_23ba_818b_2045_bfe8970263f6);

/// Standard battery service (0x180F).
pub const BATTERY_SERVICE_UUID: Uuid = Uuid::from_u128(0x0000180f_0000_1000_8000_00805f9b34fb);

/// Standard battery level characteristic (0x2A19) — read + notify.
pub const BATTERY_CHAR_UUID: Uuid = Uuid::from_u128(0x00002a19_0000_1000_8000_00805f9b34fb);

/// Client Characteristic Configuration descriptor (0x2902).
///
/// Written with the standard enable/disable-notification values to turn a
/// characteristic's notifications on or off.
pub const CCCD_UUID: Uuid = Uuid::from_u128(0x00002902_0000_1000_8000_00805f9b34fb);

// ── Control commands ──────────────────────────────────────────────────────────

/// Single binary byte that starts the EEG front-end.
pub const EEG_START_COMMAND: &[u8] = &[0x01];

/// ASCII stop command for the EEG front-end.
pub const EEG_STOP_COMMAND: &[u8] = b"stop";

// ── Scanning / connection ─────────────────────────────────────────────────────

/// Advertised-name prefix all LinkBand devices share (e.g. `"LXB-01A3"`).
pub const DEVICE_NAME_PREFIX: &str = "LXB-";

/// ATT MTU requested right after the link comes up.
pub const REQUESTED_MTU: u16 = 515;

/// Settle delay between the MTU result and service discovery.
pub const MTU_SETTLE_DELAY: Duration = Duration::from_millis(1000);

/// Delay between service discovery and the first notification rebuild.
pub const POST_DISCOVERY_DELAY: Duration = Duration::from_millis(500);

/// Delay after service discovery before the peripheral is considered fully
/// ready for sensor commands.
pub const SERVICES_READY_DELAY: Duration = Duration::from_millis(2000);

/// Stabilization delay after tearing all notifications down, before the
/// battery notification and the activation queue are brought up.
pub const TEARDOWN_SETTLE_DELAY: Duration = Duration::from_millis(1200);

/// Delay before the first queued sensor is activated, once services are ready.
pub const ACTIVATION_DELAY_READY: Duration = Duration::from_millis(1000);

/// Same, when the services-ready gate has not been reached yet.
pub const ACTIVATION_DELAY_NOT_READY: Duration = Duration::from_millis(2000);

/// Settle delay between a sensor's first confirmed sample and activating the
/// next sensor in the queue.
pub const ACTIVATION_SETTLE_DELAY: Duration = Duration::from_millis(500);

/// How long a sensor may stay silent after activation before the queue moves
/// on without it.
pub const ACTIVATION_TIMEOUT: Duration = Duration::from_secs(8);

/// Auto-reconnect delay schedule, indexed by `attempt - 1`.
///
/// Attempts past the end of the table reuse the last entry. Reconnection
/// stops permanently after [`MAX_RECONNECT_ATTEMPTS`] failures.
pub const RECONNECT_DELAYS: [Duration; 5] = [
    Duration::from_secs(3),
    Duration::from_secs(5),
    Duration::from_secs(10),
    Duration::from_secs(20),
    Duration::from_secs(30),
];

/// Auto-reconnect attempt budget.
pub const MAX_RECONNECT_ATTEMPTS: u32 = 5;

/// Delay for auto-reconnect attempt `attempt` (1-based), clamped to the last
/// table entry.
pub fn reconnect_delay(attempt: u32) -> Duration {
    let idx = (attempt.max(1) as usize - 1).min(RECONNECT_DELAYS.len() - 1);
    RECONNECT_DELAYS[idx]
}

// ── Packet geometry ───────────────────────────────────────────────────────────

/// Every sensor packet starts with this many bytes of little-endian coarse
/// device clock.
pub const PACKET_HEADER_SIZE: usize = 4;

/// Wire-format parameters for one LinkBand hardware revision.
///
/// The defaults match current production firmware; all fields are plain data
/// so alternative hardware can be described without touching the parser.
#[derive(Debug, Clone)]
pub struct SensorConfig {
    /// Divisor converting raw header ticks to seconds (ticks are ~1/32768 s).
    pub timestamp_divisor: f64,
    /// Second-to-millisecond factor used in the header conversion.
    pub milliseconds_to_seconds: f64,

    /// EEG samples per second.
    pub eeg_sample_rate: f64,
    /// Bytes per EEG sample: leadOff(1) + ch1(3) + ch2(3).
    pub eeg_sample_size: usize,
    /// Nominal EEG packet size including the header.
    pub eeg_packet_size: usize,
    /// ADC voltage reference in volts.
    pub eeg_voltage_reference: f64,
    /// Front-end amplifier gain.
    pub eeg_gain: f64,
    /// Full-scale positive ADC code, 2^23 - 1.
    pub eeg_resolution: f64,
    /// Volts-to-microvolts multiplier.
    pub microvolt_multiplier: f64,

    /// PPG samples per second.
    pub ppg_sample_rate: f64,
    /// Bytes per PPG sample: red(3) + ir(3).
    pub ppg_sample_size: usize,
    /// Nominal PPG packet size including the header.
    pub ppg_packet_size: usize,

    /// Accelerometer samples per second.
    pub acc_sample_rate: f64,
    /// Bytes per ACC sample: x(2) + y(2) + z(2).
    pub acc_sample_size: usize,
    /// Nominal ACC packet size including the header.
    pub acc_packet_size: usize,
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            timestamp_divisor: 32.768,
            milliseconds_to_seconds: 1000.0,

            eeg_sample_rate: 250.0,
            eeg_sample_size: 7,
            eeg_packet_size: 179,
            eeg_voltage_reference: 4.033,
            eeg_gain: 12.0,
            eeg_resolution: 8_388_607.0,
            microvolt_multiplier: 1e6,

            ppg_sample_rate: 50.0,
            ppg_sample_size: 6,
            ppg_packet_size: 172,

            acc_sample_rate: 25.0,
            acc_sample_size: 6,
            acc_packet_size: 184,
        }
    }
}

impl SensorConfig {
    /// Millisecond step between consecutive samples of a `rate` Hz stream.
    pub(crate) fn sample_interval_ms(rate: f64) -> i64 {
        (1000.0 / rate) as i64
    }

    /// Convert a raw 4-byte header value to milliseconds.
    pub(crate) fn header_to_millis(&self, raw: u32) -> i64 {
        let seconds = raw as f64 / self.timestamp_divisor / self.milliseconds_to_seconds;
        (seconds * 1000.0) as i64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reconnect_delays_follow_schedule_and_clamp() {
        assert_eq!(reconnect_delay(1), Duration::from_secs(3));
        assert_eq!(reconnect_delay(2), Duration::from_secs(5));
        assert_eq!(reconnect_delay(3), Duration::from_secs(10));
        assert_eq!(reconnect_delay(4), Duration::from_secs(20));
        assert_eq!(reconnect_delay(5), Duration::from_secs(30));
        assert_eq!(reconnect_delay(9), Duration::from_secs(30));
    }

    #[test]
    fn sample_intervals() {
        assert_eq!(SensorConfig::sample_interval_ms(250.0), 4);
        assert_eq!(SensorConfig::sample_interval_ms(50.0), 20);
        assert_eq!(SensorConfig::sample_interval_ms(25.0), 40);
    }

    #[test]
    fn header_conversion_uses_divisor() {
        let cfg = SensorConfig::default();
        // 32768 raw ticks = 1 second = 1000 ms.
        assert_eq!(cfg.header_to_millis(32_768), 1000);
        assert_eq!(cfg.header_to_millis(0), 0);
    }
}

//! Binary decoders for LinkBand BLE notification payloads.
//!
//! Every sensor packet is a 4-byte little-endian coarse clock header followed
//! by a run of fixed-size samples (big-endian fields within each sample):
//!
//! | Sensor  | Sample | Fields |
//! |---------|--------|--------|
//! | EEG     | 7 B    | leadOff(1), ch1(3, signed), ch2(3, signed) |
//! | PPG     | 6 B    | red(3, unsigned), ir(3, unsigned) |
//! | ACC     | 6 B    | x, y, z (2 B slots each) |
//! | Battery | 1 B    | level (no header) |
//!
//! Only one coarse timestamp is transmitted per packet, so the parser keeps
//! a continuity clock per stream: the header seeds the clock on the first
//! packet of a session, and every subsequent sample is stamped at the
//! previous sample's timestamp plus `1000 / sample_rate` ms. Stopping a
//! sensor or disconnecting resets that stream's clock so the next packet
//! reseeds from its own header.

use log::warn;
use thiserror::Error;

use crate::protocol::{SensorConfig, PACKET_HEADER_SIZE};
use crate::types::{AccSample, BatteryReading, EegSample, PpgSample, SensorType};

/// Per-packet decode failures.
///
/// Both variants are local: the packet is dropped, no samples are produced,
/// and the stream's continuity clock is left untouched, so the next
/// notification continues the stream normally.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("{sensor} packet too short: {len} bytes (minimum: {min})")]
    PacketTooShort {
        sensor: &'static str,
        len: usize,
        min: usize,
    },
    #[error("battery packet is empty")]
    EmptyBatteryPacket,
}

/// Stateful packet decoder, one per connection.
///
/// All methods are pure byte manipulation apart from the continuity clocks;
/// there is no I/O here.
pub struct PacketParser {
    config: SensorConfig,
    last_eeg_ms: Option<i64>,
    last_ppg_ms: Option<i64>,
    last_acc_ms: Option<i64>,
}

impl PacketParser {
    pub fn new(config: SensorConfig) -> Self {
        Self {
            config,
            last_eeg_ms: None,
            last_ppg_ms: None,
            last_acc_ms: None,
        }
    }

    /// Forget a stream's continuity clock; the next packet reseeds from its
    /// own header. Call on sensor stop or disconnect.
    pub fn reset(&mut self, sensor: SensorType) {
        match sensor {
            SensorType::Eeg => self.last_eeg_ms = None,
            SensorType::Ppg => self.last_ppg_ms = None,
            SensorType::Acc => self.last_acc_ms = None,
        }
    }

    /// Reset every stream's continuity clock.
    pub fn reset_all(&mut self) {
        self.last_eeg_ms = None;
        self.last_ppg_ms = None;
        self.last_acc_ms = None;
    }

    /// Decode an EEG packet into samples.
    ///
    /// Voltage conversion: `µV = raw × vref / gain / (2²³ − 1) × 1e6` with
    /// raw sign-extended from 24-bit two's complement.
    pub fn parse_eeg(&mut self, data: &[u8]) -> Result<Vec<EegSample>, ParseError> {
        let sample_size = self.config.eeg_sample_size;
        let min = PACKET_HEADER_SIZE + sample_size;
        if data.len() < min {
            return Err(ParseError::PacketTooShort {
                sensor: "EEG",
                len: data.len(),
                min,
            });
        }
        let count = (data.len() - PACKET_HEADER_SIZE) / sample_size;
        if data.len() != self.config.eeg_packet_size {
            let expected = (self.config.eeg_packet_size - PACKET_HEADER_SIZE) / sample_size;
            warn!(
                "EEG packet size {} (expected {}), processing {count} samples (expected {expected})",
                data.len(),
                self.config.eeg_packet_size
            );
        }

        let step = SensorConfig::sample_interval_ms(self.config.eeg_sample_rate);
        let mut ts = self.next_timestamp(self.last_eeg_ms, data, step);

        let mut samples = Vec::with_capacity(count);
        for i in 0..count {
            let base = PACKET_HEADER_SIZE + i * sample_size;
            let lead_off = data[base] > 0;
            let ch1_raw = sign_extend_24(read_u24_be(data, base + 1));
            let ch2_raw = sign_extend_24(read_u24_be(data, base + 4));
            samples.push(EegSample {
                timestamp_ms: ts,
                lead_off,
                ch1_uv: self.to_microvolts(ch1_raw),
                ch2_uv: self.to_microvolts(ch2_raw),
                ch1_raw,
                ch2_raw,
            });
            ts += step;
        }
        if let Some(last) = samples.last() {
            self.last_eeg_ms = Some(last.timestamp_ms);
        }
        Ok(samples)
    }

    /// Decode a PPG packet into samples (raw 24-bit unsigned ADC counts).
    pub fn parse_ppg(&mut self, data: &[u8]) -> Result<Vec<PpgSample>, ParseError> {
        let sample_size = self.config.ppg_sample_size;
        let min = PACKET_HEADER_SIZE + sample_size;
        if data.len() < min {
            return Err(ParseError::PacketTooShort {
                sensor: "PPG",
                len: data.len(),
                min,
            });
        }
        let count = (data.len() - PACKET_HEADER_SIZE) / sample_size;
        if data.len() != self.config.ppg_packet_size {
            let expected = (self.config.ppg_packet_size - PACKET_HEADER_SIZE) / sample_size;
            warn!(
                "PPG packet size {} (expected {}), processing {count} samples (expected {expected})",
                data.len(),
                self.config.ppg_packet_size
            );
        }

        let step = SensorConfig::sample_interval_ms(self.config.ppg_sample_rate);
        let mut ts = self.next_timestamp(self.last_ppg_ms, data, step);

        let mut samples = Vec::with_capacity(count);
        for i in 0..count {
            let base = PACKET_HEADER_SIZE + i * sample_size;
            samples.push(PpgSample {
                timestamp_ms: ts,
                red: read_u24_be(data, base),
                ir: read_u24_be(data, base + 3),
            });
            ts += step;
        }
        if let Some(last) = samples.last() {
            self.last_ppg_ms = Some(last.timestamp_ms);
        }
        Ok(samples)
    }

    /// Decode an accelerometer packet into samples.
    ///
    /// Each axis occupies a 2-byte slot on the wire but only the second byte
    /// of each slot carries signal that matches the vendor tooling; it is
    /// read alone and sign-extended. Kept as-is pending hardware-level
    /// confirmation of the slot layout.
    pub fn parse_acc(&mut self, data: &[u8]) -> Result<Vec<AccSample>, ParseError> {
        let sample_size = self.config.acc_sample_size;
        let min = PACKET_HEADER_SIZE + sample_size;
        if data.len() < min {
            return Err(ParseError::PacketTooShort {
                sensor: "ACC",
                len: data.len(),
                min,
            });
        }
        let count = (data.len() - PACKET_HEADER_SIZE) / sample_size;
        if data.len() != self.config.acc_packet_size {
            let expected = (self.config.acc_packet_size - PACKET_HEADER_SIZE) / sample_size;
            warn!(
                "ACC packet size {} (expected {}), processing {count} samples (expected {expected})",
                data.len(),
                self.config.acc_packet_size
            );
        }

        let step = SensorConfig::sample_interval_ms(self.config.acc_sample_rate);
        let mut ts = self.next_timestamp(self.last_acc_ms, data, step);

        let mut samples = Vec::with_capacity(count);
        for i in 0..count {
            let base = PACKET_HEADER_SIZE + i * sample_size;
            samples.push(AccSample {
                timestamp_ms: ts,
                x: data[base + 1] as i8 as i16,
                y: data[base + 3] as i8 as i16,
                z: data[base + 5] as i8 as i16,
            });
            ts += step;
        }
        if let Some(last) = samples.last() {
            self.last_acc_ms = Some(last.timestamp_ms);
        }
        Ok(samples)
    }

    /// Decode a battery level notification (single byte, no header).
    pub fn parse_battery(&self, data: &[u8]) -> Result<BatteryReading, ParseError> {
        let level = *data.first().ok_or(ParseError::EmptyBatteryPacket)?;
        Ok(BatteryReading {
            level: level.min(100),
        })
    }

    /// First-sample timestamp for a packet: continuity clock plus one step
    /// when the stream is live, otherwise seeded from the packet header.
    fn next_timestamp(&self, last: Option<i64>, data: &[u8], step: i64) -> i64 {
        match last {
            Some(ms) => ms + step,
            None => self.config.header_to_millis(read_header(data)),
        }
    }

    fn to_microvolts(&self, raw: i32) -> f64 {
        raw as f64 * self.config.eeg_voltage_reference / self.config.eeg_gain
            / self.config.eeg_resolution
            * self.config.microvolt_multiplier
    }
}

/// Read the 4-byte little-endian coarse clock header.
fn read_header(data: &[u8]) -> u32 {
    u32::from_le_bytes([data[0], data[1], data[2], data[3]])
}

/// Assemble an unsigned big-endian 24-bit value at `offset`.
fn read_u24_be(data: &[u8], offset: usize) -> u32 {
    ((data[offset] as u32) << 16) | ((data[offset + 1] as u32) << 8) | (data[offset + 2] as u32)
}

/// Sign-extend a 24-bit two's complement value to i32.
fn sign_extend_24(raw: u32) -> i32 {
    if raw & 0x80_0000 != 0 {
        raw as i32 - 0x100_0000
    } else {
        raw as i32
    }
}

//! # linkband-rs
//!
//! Async Rust driver for LinkBand wearable biosignal bands over Bluetooth
//! Low Energy: EEG, PPG, accelerometer, and battery streaming with
//! configurable batching, gravity filtering, CSV recording, and automatic
//! reconnection.
//!
//! ## Sensors
//!
//! | Sensor | Rate | Sample | Notes |
//! |---|---|---|---|
//! | EEG | 250 Hz | 2 ch × 24-bit + lead-off | µV conversion built in |
//! | PPG | 50 Hz | red + IR, 24-bit | raw ADC counts |
//! | ACC | 25 Hz | x/y/z | raw or gravity-filtered motion |
//! | Battery | on change | % | always on while connected |
//!
//! Sensors are brought up strictly one at a time (EEG → ACC → PPG) because
//! the firmware drops notification enables that land too close together; the
//! driver handles that pacing, the per-stream timestamp reconstruction, and
//! the 3/5/10/20/30 s reconnect backoff internally.
//!
//! ## Quick start
//!
//! ```no_run
//! use linkband_rs::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let (transport_tx, transport_rx) = tokio::sync::mpsc::channel(256);
//!     let transport = BleTransport::new(transport_tx).await?;
//!     let (handle, mut streams) = LinkBandClient::spawn(transport, transport_rx);
//!
//!     handle.start_scan().await?;
//!     streams.devices.changed().await?;
//!     let device = streams.devices.borrow().first().cloned().unwrap();
//!     handle.connect(device.id).await?;
//!
//!     while streams.eeg_batches.changed().await.is_ok() {
//!         println!("EEG batch: {} samples", streams.eeg_batches.borrow().len());
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Module overview
//!
//! | Module | Purpose |
//! |---|---|
//! | [`prelude`] | One-line glob import of the most commonly needed types |
//! | [`client`] | The supervisor task, [`client::LinkBandHandle`] command API, and output streams |
//! | [`transport`] | BLE transport trait and the btleplug implementation |
//! | [`types`] | Sample, configuration, and event types |
//! | [`protocol`] | GATT UUIDs, timing constants, and wire-format parameters |
//! | [`parse`] | Byte-to-sample decoders with per-stream timestamp reconstruction |
//! | [`batch`] | Sample-count and time-window batch aggregation |
//! | [`motion`] | Accelerometer gravity filter |
//! | [`recorder`] | CSV recording sessions |

pub mod batch;
pub mod client;
pub mod motion;
pub mod parse;
pub mod protocol;
pub mod recorder;
pub mod scheduler;
pub mod sequencer;
pub mod transport;
pub mod types;

// ── Prelude ───────────────────────────────────────────────────────────────────

/// Convenience re-exports for downstream crates.
///
/// A single glob import covers scanning, connecting, and consuming data:
///
/// ```no_run
/// use linkband_rs::prelude::*;
///
/// # #[tokio::main]
/// # async fn main() -> anyhow::Result<()> {
/// let (tx, rx) = tokio::sync::mpsc::channel(256);
/// let (handle, mut streams) = LinkBandClient::spawn(BleTransport::new(tx).await?, rx);
/// handle.start_scan().await?;
/// while let Some(event) = streams.events.recv().await {
///     println!("{event:?}");
/// }
/// # Ok(())
/// # }
/// ```
pub mod prelude {
    // ── Client ────────────────────────────────────────────────────────────────
    pub use crate::client::{CommandError, LinkBandClient, LinkBandHandle, LinkBandStreams};
    pub use crate::transport::{BleTransport, Transport, TransportEvent};

    // ── Data and configuration types ──────────────────────────────────────────
    pub use crate::types::{
        AccSample, AccelerometerMode, BatteryReading, CollectionMode, ConnectionState,
        DiscoveredDevice, EegSample, LinkBandEvent, PpgSample, ProcessedAccSample,
        SensorBatchConfig, SensorType,
    };

    // ── Protocol constants ────────────────────────────────────────────────────
    pub use crate::protocol::{DEVICE_NAME_PREFIX, MAX_RECONNECT_ATTEMPTS, RECONNECT_DELAYS};
}

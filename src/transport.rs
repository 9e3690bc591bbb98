//! BLE transport abstraction and the btleplug-backed implementation.
//!
//! The driver core never touches a BLE stack directly: it drives a
//! [`Transport`] and reacts to the [`TransportEvent`]s the transport pushes
//! into the supervisor's event channel. That keeps the connection state
//! machine, sequencer, and parsers testable with a scripted transport.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use btleplug::api::{
    Central, CentralEvent, Characteristic, Manager as _, Peripheral as _, ScanFilter, WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral};
use futures::StreamExt;
use log::{debug, info, warn};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::protocol::{
    ACC_CHAR_UUID, BATTERY_CHAR_UUID, DEVICE_NAME_PREFIX, EEG_NOTIFY_CHAR_UUID,
    EEG_WRITE_CHAR_UUID, PPG_CHAR_UUID,
};
use crate::types::DiscoveredDevice;

/// The five characteristics the driver talks to, addressed symbolically so
/// transports own the UUID mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SensorChar {
    EegNotify,
    EegWrite,
    Ppg,
    Acc,
    Battery,
}

impl SensorChar {
    fn uuid(self) -> Uuid {
        match self {
            SensorChar::EegNotify => EEG_NOTIFY_CHAR_UUID,
            SensorChar::EegWrite => EEG_WRITE_CHAR_UUID,
            SensorChar::Ppg => PPG_CHAR_UUID,
            SensorChar::Acc => ACC_CHAR_UUID,
            SensorChar::Battery => BATTERY_CHAR_UUID,
        }
    }

    fn from_uuid(uuid: Uuid) -> Option<Self> {
        [
            SensorChar::EegNotify,
            SensorChar::EegWrite,
            SensorChar::Ppg,
            SensorChar::Acc,
            SensorChar::Battery,
        ]
        .into_iter()
        .find(|c| c.uuid() == uuid)
    }
}

/// Asynchronous events a transport delivers to the supervisor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// A device matching the LinkBand name prefix appeared during a scan.
    DeviceDiscovered(DiscoveredDevice),
    /// The BLE link came up.
    Connected { device_id: String, name: String },
    /// The BLE link dropped (remote side, range, or local close).
    Disconnected,
    /// Result of the MTU request. Logged either way; the state machine
    /// proceeds regardless of `success`.
    MtuChanged { mtu: u16, success: bool },
    /// Service discovery finished.
    ServicesDiscovered { success: bool },
    /// A notification (or read completion) delivered a characteristic value.
    Characteristic { char: SensorChar, data: Vec<u8> },
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("no Bluetooth adapter found")]
    NoAdapter,
    #[error("not connected")]
    NotConnected,
    #[error("device {0} not found")]
    DeviceNotFound(String),
    #[error("characteristic {0:?} not found")]
    CharacteristicNotFound(SensorChar),
    #[error("operation timed out: {0}")]
    Timeout(&'static str),
    #[error(transparent)]
    Ble(#[from] btleplug::Error),
}

/// Platform BLE capability consumed by the driver core.
///
/// All methods are non-blocking at the protocol level: completions and data
/// arrive as [`TransportEvent`]s on the channel handed to the transport at
/// construction. Failures of fire-and-forget operations (MTU, discovery,
/// battery read) are reported through events, not return values.
#[async_trait]
pub trait Transport: Send {
    /// Begin scanning; matching devices arrive as
    /// [`TransportEvent::DeviceDiscovered`].
    async fn start_scan(&mut self) -> Result<(), TransportError>;

    /// Stop an in-progress scan. Idempotent.
    async fn stop_scan(&mut self);

    /// Initiate a connection to a previously discovered device.
    async fn connect(&mut self, device_id: &str) -> Result<(), TransportError>;

    /// Tear the link down. Idempotent; a `Disconnected` event follows.
    async fn disconnect(&mut self);

    /// Request an ATT MTU; result arrives as [`TransportEvent::MtuChanged`].
    async fn request_mtu(&mut self, mtu: u16);

    /// Start GATT service discovery; result arrives as
    /// [`TransportEvent::ServicesDiscovered`].
    async fn discover_services(&mut self);

    /// Enable or disable notifications on a sensor characteristic via the
    /// standard CCC descriptor.
    async fn set_notify(&mut self, char: SensorChar, enabled: bool) -> Result<(), TransportError>;

    /// Write a command to the EEG control characteristic.
    async fn write_eeg_command(&mut self, payload: &[u8]) -> Result<(), TransportError>;

    /// Read the battery level once; the value arrives as a
    /// [`TransportEvent::Characteristic`] for [`SensorChar::Battery`].
    async fn read_battery(&mut self);
}

// ── btleplug implementation ──────────────────────────────────────────────────

/// Hard cap on `connect()`: the platform stack can block indefinitely when
/// the device is out of range or the stack is wedged.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const DISCOVERY_TIMEOUT: Duration = Duration::from_secs(15);
const SCAN_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// [`Transport`] backed by `btleplug`, covering Linux/macOS/Windows centrals.
pub struct BleTransport {
    adapter: Adapter,
    events: mpsc::Sender<TransportEvent>,
    peripheral: Option<Peripheral>,
    chars: HashMap<SensorChar, Characteristic>,
    scan_task: Option<JoinHandle<()>>,
    notify_task: Option<JoinHandle<()>>,
    watcher_task: Option<JoinHandle<()>>,
}

impl BleTransport {
    /// Grab the first Bluetooth adapter on the system.
    pub async fn new(events: mpsc::Sender<TransportEvent>) -> Result<Self, TransportError> {
        let manager = Manager::new().await?;
        let adapter = manager
            .adapters()
            .await?
            .into_iter()
            .next()
            .ok_or(TransportError::NoAdapter)?;
        Ok(Self {
            adapter,
            events,
            peripheral: None,
            chars: HashMap::new(),
            scan_task: None,
            notify_task: None,
            watcher_task: None,
        })
    }

    async fn find_peripheral(&self, device_id: &str) -> Result<Peripheral, TransportError> {
        for p in self.adapter.peripherals().await? {
            if p.id().to_string() == device_id {
                return Ok(p);
            }
        }
        Err(TransportError::DeviceNotFound(device_id.to_owned()))
    }

    fn resolve_char(&self, char: SensorChar) -> Result<&Characteristic, TransportError> {
        self.chars
            .get(&char)
            .ok_or(TransportError::CharacteristicNotFound(char))
    }

    /// Forward the peripheral's notification stream into the event channel.
    fn spawn_notification_pump(&mut self, peripheral: Peripheral) {
        let events = self.events.clone();
        self.notify_task = Some(tokio::spawn(async move {
            let mut notifications = match peripheral.notifications().await {
                Ok(n) => n,
                Err(e) => {
                    warn!("could not obtain notification stream: {e}");
                    return;
                }
            };
            while let Some(notif) = notifications.next().await {
                match SensorChar::from_uuid(notif.uuid) {
                    Some(char) => {
                        let _ = events
                            .send(TransportEvent::Characteristic {
                                char,
                                data: notif.value,
                            })
                            .await;
                    }
                    None => debug!("notification from unknown characteristic {}", notif.uuid),
                }
            }
            debug!("notification stream ended");
        }));
    }

    /// Watch the adapter's event stream for our peripheral dropping off.
    /// Fires reliably when the band powers down or leaves range, usually
    /// faster than the notification stream closing.
    fn spawn_disconnect_watcher(&mut self, peripheral_id: btleplug::platform::PeripheralId) {
        let adapter = self.adapter.clone();
        let events = self.events.clone();
        self.watcher_task = Some(tokio::spawn(async move {
            let mut stream = match adapter.events().await {
                Ok(s) => s,
                Err(e) => {
                    warn!("disconnect watcher: could not subscribe to adapter events: {e}");
                    return;
                }
            };
            while let Some(event) = stream.next().await {
                if let CentralEvent::DeviceDisconnected(id) = event {
                    if id == peripheral_id {
                        info!("device {id:?} disconnected");
                        let _ = events.send(TransportEvent::Disconnected).await;
                        break;
                    }
                }
            }
        }));
    }

    fn abort_session_tasks(&mut self) {
        if let Some(t) = self.notify_task.take() {
            t.abort();
        }
        if let Some(t) = self.watcher_task.take() {
            t.abort();
        }
    }
}

#[async_trait]
impl Transport for BleTransport {
    async fn start_scan(&mut self) -> Result<(), TransportError> {
        if self.scan_task.is_some() {
            return Ok(());
        }
        self.adapter.start_scan(ScanFilter::default()).await?;

        // btleplug surfaces scan results through the peripheral cache; poll
        // it and forward anything with the LinkBand name prefix. Duplicate
        // suppression happens in the supervisor's device list.
        let adapter = self.adapter.clone();
        let events = self.events.clone();
        self.scan_task = Some(tokio::spawn(async move {
            let mut seen: Vec<String> = Vec::new();
            loop {
                for p in adapter.peripherals().await.unwrap_or_default() {
                    if let Ok(Some(props)) = p.properties().await {
                        if let Some(name) = props.local_name {
                            let id = p.id().to_string();
                            if name.starts_with(DEVICE_NAME_PREFIX) && !seen.contains(&id) {
                                info!("scan: found {name} id={id}");
                                seen.push(id.clone());
                                let _ = events
                                    .send(TransportEvent::DeviceDiscovered(DiscoveredDevice {
                                        name,
                                        id,
                                    }))
                                    .await;
                            }
                        }
                    }
                }
                tokio::time::sleep(SCAN_POLL_INTERVAL).await;
            }
        }));
        Ok(())
    }

    async fn stop_scan(&mut self) {
        if let Some(t) = self.scan_task.take() {
            t.abort();
            self.adapter.stop_scan().await.ok();
        }
    }

    async fn connect(&mut self, device_id: &str) -> Result<(), TransportError> {
        self.stop_scan().await;
        let peripheral = self.find_peripheral(device_id).await?;

        tokio::time::timeout(CONNECT_TIMEOUT, peripheral.connect())
            .await
            .map_err(|_| TransportError::Timeout("connect"))??;

        let name = peripheral
            .properties()
            .await?
            .and_then(|p| p.local_name)
            .unwrap_or_else(|| "LXB-?".into());

        self.spawn_disconnect_watcher(peripheral.id());
        self.peripheral = Some(peripheral);
        let _ = self
            .events
            .send(TransportEvent::Connected {
                device_id: device_id.to_owned(),
                name,
            })
            .await;
        Ok(())
    }

    async fn disconnect(&mut self) {
        self.abort_session_tasks();
        self.chars.clear();
        if let Some(p) = self.peripheral.take() {
            p.disconnect().await.ok();
            let _ = self.events.send(TransportEvent::Disconnected).await;
        }
    }

    async fn request_mtu(&mut self, mtu: u16) {
        // btleplug has no explicit ATT MTU request; the platform stack
        // negotiates it during connection. Report a synthetic success so the
        // supervisor's MTU → settle → discovery sequence is identical on all
        // platforms.
        info!("MTU {mtu} requested (negotiated by the platform stack)");
        let _ = self
            .events
            .send(TransportEvent::MtuChanged { mtu, success: true })
            .await;
    }

    async fn discover_services(&mut self) {
        let Some(peripheral) = self.peripheral.clone() else {
            let _ = self
                .events
                .send(TransportEvent::ServicesDiscovered { success: false })
                .await;
            return;
        };

        let success = match tokio::time::timeout(DISCOVERY_TIMEOUT, peripheral.discover_services())
            .await
        {
            Ok(Ok(())) => {
                self.chars.clear();
                for c in peripheral.characteristics() {
                    if let Some(char) = SensorChar::from_uuid(c.uuid) {
                        self.chars.insert(char, c);
                    }
                }
                let missing: Vec<SensorChar> = [
                    SensorChar::EegNotify,
                    SensorChar::EegWrite,
                    SensorChar::Ppg,
                    SensorChar::Acc,
                    SensorChar::Battery,
                ]
                .into_iter()
                .filter(|c| !self.chars.contains_key(c))
                .collect();
                if !missing.is_empty() {
                    warn!("service discovery: missing characteristics {missing:?}");
                }
                self.spawn_notification_pump(peripheral);
                true
            }
            Ok(Err(e)) => {
                warn!("service discovery failed: {e}");
                false
            }
            Err(_) => {
                warn!("service discovery timed out after {DISCOVERY_TIMEOUT:?}");
                false
            }
        };
        let _ = self
            .events
            .send(TransportEvent::ServicesDiscovered { success })
            .await;
    }

    async fn set_notify(&mut self, char: SensorChar, enabled: bool) -> Result<(), TransportError> {
        let peripheral = self.peripheral.as_ref().ok_or(TransportError::NotConnected)?;
        let characteristic = self.resolve_char(char)?;
        // btleplug writes the CCC descriptor's standard enable/disable
        // values as part of subscribe/unsubscribe.
        if enabled {
            peripheral.subscribe(characteristic).await?;
        } else {
            peripheral.unsubscribe(characteristic).await?;
        }
        Ok(())
    }

    async fn write_eeg_command(&mut self, payload: &[u8]) -> Result<(), TransportError> {
        let peripheral = self.peripheral.as_ref().ok_or(TransportError::NotConnected)?;
        let characteristic = self.resolve_char(SensorChar::EegWrite)?;
        peripheral
            .write(characteristic, payload, WriteType::WithResponse)
            .await?;
        Ok(())
    }

    async fn read_battery(&mut self) {
        let Some(peripheral) = self.peripheral.as_ref() else {
            return;
        };
        let Ok(characteristic) = self.resolve_char(SensorChar::Battery) else {
            warn!("battery characteristic not found");
            return;
        };
        match peripheral.read(characteristic).await {
            Ok(data) => {
                let _ = self
                    .events
                    .send(TransportEvent::Characteristic {
                        char: SensorChar::Battery,
                        data,
                    })
                    .await;
            }
            Err(e) => warn!("battery read failed: {e}"),
        }
    }
}

//! The LinkBand driver core: a single supervisor task owning all connection,
//! activation, parsing, batching, and recording state.
//!
//! Consumers talk to the supervisor through a cloneable [`LinkBandHandle`]
//! (commands) and read results from [`LinkBandStreams`] (watch channels for
//! latest-value state and batches, an mpsc channel for lifecycle events). The
//! supervisor itself is a plain event loop over three sources — commands,
//! transport events, and timers — so every state transition happens on one
//! task and needs no locking.

use std::collections::{HashSet, VecDeque};
use std::path::PathBuf;

use log::{debug, info, warn};
use thiserror::Error;
use tokio::sync::{mpsc, watch};

use crate::batch::Aggregator;
use crate::motion::GravityFilter;
use crate::parse::PacketParser;
use crate::protocol::{
    self, SensorConfig, ACTIVATION_DELAY_NOT_READY, ACTIVATION_DELAY_READY,
    ACTIVATION_SETTLE_DELAY, ACTIVATION_TIMEOUT, EEG_START_COMMAND, EEG_STOP_COMMAND,
    MAX_RECONNECT_ATTEMPTS, MTU_SETTLE_DELAY, POST_DISCOVERY_DELAY, REQUESTED_MTU,
    SERVICES_READY_DELAY, TEARDOWN_SETTLE_DELAY,
};
use crate::recorder::RecordingSession;
use crate::scheduler::{Scheduler, TimerFired, TimerKind};
use crate::sequencer::{build_activation_queue, ActivationSequencer};
use crate::transport::{SensorChar, Transport, TransportEvent};
use crate::types::{
    AccSample, AccelerometerMode, BatchTrigger, BatteryReading, CollectionMode, ConnectionState,
    DiscoveredDevice, EegSample, LinkBandEvent, PpgSample, ProcessedAccSample, SensorBatchConfig,
    SensorType,
};

/// Rolling-window capacities for the latest-samples watch channels.
const EEG_WINDOW: usize = 1000;
const PPG_WINDOW: usize = 500;
const ACC_WINDOW: usize = 300;

const COMMAND_QUEUE: usize = 64;
const TIMER_QUEUE: usize = 32;
const EVENT_QUEUE: usize = 64;

/// Errors returned by [`LinkBandHandle`] methods.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("{name} {value} outside accepted range {min}..={max}")]
    OutOfRange {
        name: &'static str,
        value: u64,
        min: u64,
        max: u64,
    },
    #[error("driver task has shut down")]
    Closed,
}

#[derive(Debug)]
enum Command {
    StartScan,
    StopScan,
    Connect(String),
    Disconnect,
    SelectSensor(SensorType),
    DeselectSensor(SensorType),
    StartSelectedSensors,
    StopSelectedSensors,
    SetCollectionMode(CollectionMode),
    SetSampleCountThreshold(SensorType, usize),
    SetSecondsThreshold(SensorType, u32),
    SetMinutesThreshold(SensorType, u32),
    SetAccelerometerMode(AccelerometerMode),
    StartRecording(PathBuf),
    StopRecording,
    SetAutoReconnect(bool),
}

/// Command side of the driver. Cheap to clone; every method enqueues a
/// command for the supervisor task.
#[derive(Clone)]
pub struct LinkBandHandle {
    tx: mpsc::Sender<Command>,
}

impl LinkBandHandle {
    async fn send(&self, cmd: Command) -> Result<(), CommandError> {
        self.tx.send(cmd).await.map_err(|_| CommandError::Closed)
    }

    pub async fn start_scan(&self) -> Result<(), CommandError> {
        self.send(Command::StartScan).await
    }

    pub async fn stop_scan(&self) -> Result<(), CommandError> {
        self.send(Command::StopScan).await
    }

    /// Connect to a device previously seen on the scan channel.
    pub async fn connect(&self, device_id: impl Into<String>) -> Result<(), CommandError> {
        self.send(Command::Connect(device_id.into())).await
    }

    /// Tear the connection down. Suppresses auto-reconnect.
    pub async fn disconnect(&self) -> Result<(), CommandError> {
        self.send(Command::Disconnect).await
    }

    /// Add a sensor to the selection used by the next activation run.
    pub async fn select_sensor(&self, sensor: SensorType) -> Result<(), CommandError> {
        self.send(Command::SelectSensor(sensor)).await
    }

    pub async fn deselect_sensor(&self, sensor: SensorType) -> Result<(), CommandError> {
        self.send(Command::DeselectSensor(sensor)).await
    }

    /// (Re)start streaming for the selected sensors. If streaming is already
    /// up, everything is torn down first and restarted after a settle delay.
    pub async fn start_selected_sensors(&self) -> Result<(), CommandError> {
        self.send(Command::StartSelectedSensors).await
    }

    pub async fn stop_selected_sensors(&self) -> Result<(), CommandError> {
        self.send(Command::StopSelectedSensors).await
    }

    /// Switch the global batch trigger mode. Clears all partially
    /// accumulated batches.
    pub async fn set_collection_mode(&self, mode: CollectionMode) -> Result<(), CommandError> {
        self.send(Command::SetCollectionMode(mode)).await
    }

    /// Set a sensor's sample-count batch threshold.
    pub async fn set_sample_count_threshold(
        &self,
        sensor: SensorType,
        count: usize,
    ) -> Result<(), CommandError> {
        let range = SensorBatchConfig::SAMPLE_COUNT_RANGE;
        if !range.contains(&count) {
            return Err(CommandError::OutOfRange {
                name: "sample count",
                value: count as u64,
                min: *range.start() as u64,
                max: *range.end() as u64,
            });
        }
        self.send(Command::SetSampleCountThreshold(sensor, count))
            .await
    }

    /// Set a sensor's seconds batch window.
    pub async fn set_seconds_threshold(
        &self,
        sensor: SensorType,
        seconds: u32,
    ) -> Result<(), CommandError> {
        let range = SensorBatchConfig::SECONDS_RANGE;
        if !range.contains(&seconds) {
            return Err(CommandError::OutOfRange {
                name: "seconds",
                value: seconds as u64,
                min: *range.start() as u64,
                max: *range.end() as u64,
            });
        }
        self.send(Command::SetSecondsThreshold(sensor, seconds))
            .await
    }

    /// Set a sensor's minutes batch window.
    pub async fn set_minutes_threshold(
        &self,
        sensor: SensorType,
        minutes: u32,
    ) -> Result<(), CommandError> {
        let range = SensorBatchConfig::MINUTES_RANGE;
        if !range.contains(&minutes) {
            return Err(CommandError::OutOfRange {
                name: "minutes",
                value: minutes as u64,
                min: *range.start() as u64,
                max: *range.end() as u64,
            });
        }
        self.send(Command::SetMinutesThreshold(sensor, minutes))
            .await
    }

    pub async fn set_accelerometer_mode(
        &self,
        mode: AccelerometerMode,
    ) -> Result<(), CommandError> {
        self.send(Command::SetAccelerometerMode(mode)).await
    }

    /// Start recording the selected sensors to CSV files under `dir`.
    pub async fn start_recording(&self, dir: impl Into<PathBuf>) -> Result<(), CommandError> {
        self.send(Command::StartRecording(dir.into())).await
    }

    pub async fn stop_recording(&self) -> Result<(), CommandError> {
        self.send(Command::StopRecording).await
    }

    pub async fn set_auto_reconnect(&self, enabled: bool) -> Result<(), CommandError> {
        self.send(Command::SetAutoReconnect(enabled)).await
    }
}

/// Read side of the driver.
///
/// Watch channels always hold the latest value (intermediate updates may be
/// skipped by a slow reader); the mpsc channels deliver every batch and
/// lifecycle event in order.
pub struct LinkBandStreams {
    pub connection: watch::Receiver<ConnectionState>,
    pub devices: watch::Receiver<Vec<DiscoveredDevice>>,
    pub battery: watch::Receiver<Option<BatteryReading>>,
    /// Sensors whose notifications are confirmed live.
    pub active_sensors: watch::Receiver<Vec<SensorType>>,
    /// True once the whole activation queue has been walked.
    pub receiving_data: watch::Receiver<bool>,
    pub recording: watch::Receiver<bool>,
    /// Most recent EEG samples (up to 1000).
    pub eeg_window: watch::Receiver<Vec<EegSample>>,
    /// Most recent PPG samples (up to 500).
    pub ppg_window: watch::Receiver<Vec<PpgSample>>,
    /// Most recent raw accelerometer samples (up to 300).
    pub acc_window: watch::Receiver<Vec<AccSample>>,
    /// Most recent gravity-filtered accelerometer samples (up to 300).
    pub processed_acc_window: watch::Receiver<Vec<ProcessedAccSample>>,
    /// Completed EEG batches, replace-on-emit: a reader always sees the most
    /// recent batch, and may skip batches it was too slow for.
    pub eeg_batches: watch::Receiver<Vec<EegSample>>,
    pub ppg_batches: watch::Receiver<Vec<PpgSample>>,
    /// Accelerometer batches carry processed samples; raw values are only
    /// available through [`Self::acc_window`].
    pub acc_batches: watch::Receiver<Vec<ProcessedAccSample>>,
    pub events: mpsc::Receiver<LinkBandEvent>,
}

struct Outputs {
    connection: watch::Sender<ConnectionState>,
    devices: watch::Sender<Vec<DiscoveredDevice>>,
    battery: watch::Sender<Option<BatteryReading>>,
    active_sensors: watch::Sender<Vec<SensorType>>,
    receiving_data: watch::Sender<bool>,
    recording: watch::Sender<bool>,
    eeg_window: watch::Sender<Vec<EegSample>>,
    ppg_window: watch::Sender<Vec<PpgSample>>,
    acc_window: watch::Sender<Vec<AccSample>>,
    processed_acc_window: watch::Sender<Vec<ProcessedAccSample>>,
    eeg_batches: watch::Sender<Vec<EegSample>>,
    ppg_batches: watch::Sender<Vec<PpgSample>>,
    acc_batches: watch::Sender<Vec<ProcessedAccSample>>,
    events: mpsc::Sender<LinkBandEvent>,
}

impl Outputs {
    fn emit(&self, event: LinkBandEvent) {
        if self.events.try_send(event.clone()).is_err() {
            debug!("event channel full or closed, dropping {event:?}");
        }
    }
}

/// Supervisor task state. Constructed via [`LinkBandClient::spawn`].
pub struct LinkBandClient<T: Transport> {
    transport: T,
    transport_rx: mpsc::Receiver<TransportEvent>,
    commands: mpsc::Receiver<Command>,
    scheduler: Scheduler,
    timer_rx: mpsc::Receiver<TimerFired>,
    out: Outputs,

    parser: PacketParser,
    gravity: GravityFilter,
    sequencer: ActivationSequencer,

    selected: HashSet<SensorType>,
    /// Sensors whose notifications have been enabled this run, confirmed or
    /// not. Teardown disables exactly this set.
    enabled: HashSet<SensorType>,
    active: HashSet<SensorType>,
    services_ready: bool,
    receiving_data: bool,
    manual_disconnect: bool,
    auto_reconnect: bool,
    reconnect_attempt: u32,
    last_device_id: Option<String>,
    known_devices: Vec<DiscoveredDevice>,

    collection_mode: CollectionMode,
    eeg_config: SensorBatchConfig,
    ppg_config: SensorBatchConfig,
    acc_config: SensorBatchConfig,
    eeg_agg: Aggregator<EegSample>,
    ppg_agg: Aggregator<PpgSample>,
    acc_agg: Aggregator<ProcessedAccSample>,

    eeg_buf: VecDeque<EegSample>,
    ppg_buf: VecDeque<PpgSample>,
    acc_buf: VecDeque<AccSample>,
    processed_acc_buf: VecDeque<ProcessedAccSample>,

    recorder: Option<RecordingSession>,
}

impl<T: Transport + 'static> LinkBandClient<T> {
    /// Spawn the supervisor over a transport. `transport_rx` is the receive
    /// side of the channel the transport was constructed with.
    pub fn spawn(
        transport: T,
        transport_rx: mpsc::Receiver<TransportEvent>,
    ) -> (LinkBandHandle, LinkBandStreams) {
        let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_QUEUE);
        let (timer_tx, timer_rx) = mpsc::channel(TIMER_QUEUE);

        let (connection_tx, connection_rx) = watch::channel(ConnectionState::default());
        let (devices_tx, devices_rx) = watch::channel(Vec::new());
        let (battery_tx, battery_rx) = watch::channel(None);
        let (active_tx, active_rx) = watch::channel(Vec::new());
        let (receiving_tx, receiving_rx) = watch::channel(false);
        let (recording_tx, recording_rx) = watch::channel(false);
        let (eeg_win_tx, eeg_win_rx) = watch::channel(Vec::new());
        let (ppg_win_tx, ppg_win_rx) = watch::channel(Vec::new());
        let (acc_win_tx, acc_win_rx) = watch::channel(Vec::new());
        let (pacc_win_tx, pacc_win_rx) = watch::channel(Vec::new());
        let (eeg_batch_tx, eeg_batch_rx) = watch::channel(Vec::new());
        let (ppg_batch_tx, ppg_batch_rx) = watch::channel(Vec::new());
        let (acc_batch_tx, acc_batch_rx) = watch::channel(Vec::new());
        let (event_tx, event_rx) = mpsc::channel(EVENT_QUEUE);

        let collection_mode = CollectionMode::default();
        let eeg_config = SensorBatchConfig::default_for(SensorType::Eeg);
        let ppg_config = SensorBatchConfig::default_for(SensorType::Ppg);
        let acc_config = SensorBatchConfig::default_for(SensorType::Acc);

        let client = LinkBandClient {
            transport,
            transport_rx,
            commands: cmd_rx,
            scheduler: Scheduler::new(timer_tx),
            timer_rx,
            out: Outputs {
                connection: connection_tx,
                devices: devices_tx,
                battery: battery_tx,
                active_sensors: active_tx,
                receiving_data: receiving_tx,
                recording: recording_tx,
                eeg_window: eeg_win_tx,
                ppg_window: ppg_win_tx,
                acc_window: acc_win_tx,
                processed_acc_window: pacc_win_tx,
                eeg_batches: eeg_batch_tx,
                ppg_batches: ppg_batch_tx,
                acc_batches: acc_batch_tx,
                events: event_tx,
            },
            parser: PacketParser::new(SensorConfig::default()),
            gravity: GravityFilter::new(),
            sequencer: ActivationSequencer::new(),
            selected: [SensorType::Eeg, SensorType::Ppg, SensorType::Acc].into(),
            enabled: HashSet::new(),
            active: HashSet::new(),
            services_ready: false,
            receiving_data: false,
            manual_disconnect: false,
            auto_reconnect: true,
            reconnect_attempt: 0,
            last_device_id: None,
            known_devices: Vec::new(),
            collection_mode,
            eeg_agg: Aggregator::new(eeg_config.trigger(collection_mode)),
            ppg_agg: Aggregator::new(ppg_config.trigger(collection_mode)),
            acc_agg: Aggregator::new(acc_config.trigger(collection_mode)),
            eeg_config,
            ppg_config,
            acc_config,
            eeg_buf: VecDeque::with_capacity(EEG_WINDOW),
            ppg_buf: VecDeque::with_capacity(PPG_WINDOW),
            acc_buf: VecDeque::with_capacity(ACC_WINDOW),
            processed_acc_buf: VecDeque::with_capacity(ACC_WINDOW),
            recorder: None,
        };
        tokio::spawn(client.run());

        let handle = LinkBandHandle { tx: cmd_tx };
        let streams = LinkBandStreams {
            connection: connection_rx,
            devices: devices_rx,
            battery: battery_rx,
            active_sensors: active_rx,
            receiving_data: receiving_rx,
            recording: recording_rx,
            eeg_window: eeg_win_rx,
            ppg_window: ppg_win_rx,
            acc_window: acc_win_rx,
            processed_acc_window: pacc_win_rx,
            eeg_batches: eeg_batch_rx,
            ppg_batches: ppg_batch_rx,
            acc_batches: acc_batch_rx,
            events: event_rx,
        };
        (handle, streams)
    }

    async fn run(mut self) {
        loop {
            tokio::select! {
                cmd = self.commands.recv() => match cmd {
                    Some(cmd) => self.handle_command(cmd).await,
                    // All handles dropped: shut down.
                    None => break,
                },
                Some(event) = self.transport_rx.recv() => {
                    self.handle_transport(event).await;
                }
                Some(fired) = self.timer_rx.recv() => {
                    if self.scheduler.is_current(fired) {
                        self.handle_timer(fired.kind).await;
                    } else {
                        debug!("dropping stale timer {:?}", fired.kind);
                    }
                }
            }
        }
        self.transport.disconnect().await;
        if let Some(session) = self.recorder.take() {
            session.stop().ok();
        }
        debug!("supervisor loop ended");
    }

    // ── Commands ─────────────────────────────────────────────────────────────

    async fn handle_command(&mut self, cmd: Command) {
        match cmd {
            Command::StartScan => {
                self.known_devices.clear();
                self.out.devices.send_replace(Vec::new());
                if let Err(e) = self.transport.start_scan().await {
                    warn!("scan failed to start: {e}");
                }
            }
            Command::StopScan => self.transport.stop_scan().await,
            Command::Connect(device_id) => {
                if matches!(*self.out.connection.borrow(), ConnectionState::Connected(_)) {
                    // Drop the old link first; the queued Disconnected event
                    // is consumed as a manual disconnect, then the new
                    // Connected event starts the fresh session.
                    self.manual_disconnect = true;
                    self.transport.disconnect().await;
                } else {
                    self.manual_disconnect = false;
                }
                self.reconnect_attempt = 0;
                self.scheduler.bump_session();
                self.connect(device_id).await;
            }
            Command::Disconnect => {
                self.manual_disconnect = true;
                self.scheduler.bump_session();
                self.transport.disconnect().await;
            }
            Command::SelectSensor(sensor) => {
                self.selected.insert(sensor);
            }
            Command::DeselectSensor(sensor) => {
                self.selected.remove(&sensor);
            }
            Command::StartSelectedSensors => self.start_selected().await,
            Command::StopSelectedSensors => self.stop_streaming(true).await,
            Command::SetCollectionMode(mode) => {
                if self.collection_mode != mode {
                    info!("collection mode -> {mode:?}");
                    self.collection_mode = mode;
                    self.rebuild_aggregators();
                }
            }
            Command::SetSampleCountThreshold(sensor, count) => {
                self.config_mut(sensor).sample_count = count;
                self.rebuild_aggregator(sensor);
            }
            Command::SetSecondsThreshold(sensor, seconds) => {
                self.config_mut(sensor).seconds = seconds;
                self.rebuild_aggregator(sensor);
            }
            Command::SetMinutesThreshold(sensor, minutes) => {
                self.config_mut(sensor).minutes = minutes;
                self.rebuild_aggregator(sensor);
            }
            Command::SetAccelerometerMode(mode) => self.gravity.set_mode(mode),
            Command::StartRecording(dir) => {
                if self.recorder.is_some() {
                    warn!("recording already in progress");
                    return;
                }
                let sensors: Vec<SensorType> = SensorType::ACTIVATION_ORDER
                    .into_iter()
                    .filter(|s| self.selected.contains(s))
                    .collect();
                match RecordingSession::start(&dir, &sensors) {
                    Ok(session) => {
                        self.recorder = Some(session);
                        self.out.recording.send_replace(true);
                    }
                    Err(e) => warn!("could not start recording in {}: {e}", dir.display()),
                }
            }
            Command::StopRecording => {
                if let Some(session) = self.recorder.take() {
                    match session.stop() {
                        Ok(paths) => {
                            for p in &paths {
                                info!("recording saved: {}", p.display());
                            }
                        }
                        Err(e) => warn!("error finalizing recording: {e}"),
                    }
                }
                self.out.recording.send_replace(false);
            }
            Command::SetAutoReconnect(enabled) => {
                self.auto_reconnect = enabled;
                if !enabled {
                    // Disabling also drops any attempt already in flight.
                    self.scheduler.cancel(TimerKind::Reconnect);
                    self.reconnect_attempt = 0;
                }
            }
        }
    }

    async fn connect(&mut self, device_id: String) {
        self.out.connection.send_replace(ConnectionState::Connecting);
        if let Err(e) = self.transport.connect(&device_id).await {
            warn!("connect to {device_id} failed: {e}");
            self.last_device_id = Some(device_id);
            self.out
                .connection
                .send_replace(ConnectionState::Disconnected);
            if self.reconnect_attempt > 0 {
                // A failed reconnect attempt consumes its slot in the budget.
                self.reconnect_attempt += 1;
                self.schedule_reconnect();
            }
        }
    }

    /// (Re)start the activation run. A live streaming session is torn down
    /// first and restarted after a settle delay.
    async fn start_selected(&mut self) {
        if !matches!(*self.out.connection.borrow(), ConnectionState::Connected(_)) {
            warn!("start requested while not connected");
            return;
        }
        if !self.enabled.is_empty() || self.sequencer.current().is_some() {
            self.stop_streaming(true).await;
            self.scheduler
                .schedule(TimerKind::TeardownSettle, TEARDOWN_SETTLE_DELAY);
        } else {
            self.begin_activation().await;
        }
    }

    /// Start an activation run: battery notification on (a firmware
    /// precondition for the other sensors), EEG front-end started if
    /// selected, batch configuration applied, then the queue is walked after
    /// the initial delay.
    async fn begin_activation(&mut self) {
        if let Err(e) = self.transport.set_notify(SensorChar::Battery, true).await {
            warn!("enabling battery notifications failed: {e}");
        }
        self.transport.read_battery().await;
        if self.selected.contains(&SensorType::Eeg) {
            if let Err(e) = self.transport.write_eeg_command(EEG_START_COMMAND).await {
                warn!("EEG start command failed: {e}");
            }
        }
        self.rebuild_aggregators();

        let queue = build_activation_queue(&self.selected);
        info!("activation queue: {queue:?}");
        self.sequencer.load(queue);
        let delay = if self.services_ready {
            ACTIVATION_DELAY_READY
        } else {
            ACTIVATION_DELAY_NOT_READY
        };
        self.scheduler.schedule(TimerKind::BeginActivation, delay);
    }

    /// Disable every enabled sensor notification. `flush` also drains partial
    /// time-window batches so trailing data reaches consumers and the
    /// recorder.
    async fn stop_streaming(&mut self, flush: bool) {
        self.scheduler.cancel(TimerKind::SetupStreams);
        self.scheduler.cancel(TimerKind::BeginActivation);
        self.scheduler.cancel(TimerKind::ActivateNext);
        self.scheduler.cancel(TimerKind::ActivationTimeout);
        self.scheduler.cancel(TimerKind::TeardownSettle);

        // Disable everything that was enabled this run, including sensors
        // that timed out mid-activation and were skipped.
        let stopping: Vec<SensorType> = SensorType::ACTIVATION_ORDER
            .into_iter()
            .filter(|s| self.enabled.contains(s))
            .collect();
        self.sequencer.clear();

        for sensor in stopping {
            if sensor == SensorType::Eeg {
                if let Err(e) = self.transport.write_eeg_command(EEG_STOP_COMMAND).await {
                    warn!("EEG stop command failed: {e}");
                }
            }
            if let Err(e) = self
                .transport
                .set_notify(Self::data_char(sensor), false)
                .await
            {
                warn!("disabling {} notifications failed: {e}", sensor.name());
            }
            self.parser.reset(sensor);
        }
        self.enabled.clear();
        self.active.clear();
        self.out.active_sensors.send_replace(Vec::new());
        self.receiving_data = false;
        self.out.receiving_data.send_replace(false);

        if flush {
            self.flush_batches();
        }
    }

    // ── Transport events ─────────────────────────────────────────────────────

    async fn handle_transport(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::DeviceDiscovered(device) => {
                if !self.known_devices.iter().any(|d| d.id == device.id) {
                    self.known_devices.push(device);
                    self.out.devices.send_replace(self.known_devices.clone());
                }
            }
            TransportEvent::Connected { device_id, name } => {
                info!("connected to {name} ({device_id})");
                self.reconnect_attempt = 0;
                self.last_device_id = Some(device_id.clone());
                self.out
                    .connection
                    .send_replace(ConnectionState::Connected(device_id));
                self.out.emit(LinkBandEvent::Connected(name));
                self.transport.request_mtu(REQUESTED_MTU).await;
            }
            TransportEvent::Disconnected => self.on_disconnected(),
            TransportEvent::MtuChanged { mtu, success } => {
                if success {
                    debug!("MTU {mtu} granted");
                } else {
                    warn!("MTU {mtu} request failed, continuing with default");
                }
                self.scheduler
                    .schedule(TimerKind::DiscoverServices, MTU_SETTLE_DELAY);
            }
            TransportEvent::ServicesDiscovered { success } => {
                if !success {
                    warn!("service discovery failed, disconnecting");
                    self.transport.disconnect().await;
                    return;
                }
                // Every fresh discovery starts from the full sensor set;
                // deselections apply to runs within this connection.
                self.selected = SensorType::ACTIVATION_ORDER.into();
                self.scheduler
                    .schedule(TimerKind::SetupStreams, POST_DISCOVERY_DELAY);
                self.scheduler
                    .schedule(TimerKind::ServicesReady, SERVICES_READY_DELAY);
            }
            TransportEvent::Characteristic { char, data } => {
                self.handle_characteristic(char, &data);
            }
        }
    }

    fn on_disconnected(&mut self) {
        info!("link down");
        self.scheduler.bump_session();
        self.sequencer.clear();
        self.parser.reset_all();
        self.gravity.reset();
        self.flush_batches();
        // Recording never spans connections: close the files while their
        // contents still match what was streamed.
        if let Some(session) = self.recorder.take() {
            match session.stop() {
                Ok(paths) => {
                    for p in &paths {
                        info!("recording saved: {}", p.display());
                    }
                }
                Err(e) => warn!("error finalizing recording: {e}"),
            }
            self.out.recording.send_replace(false);
        }
        self.enabled.clear();
        self.active.clear();
        self.services_ready = false;
        self.receiving_data = false;
        self.out.active_sensors.send_replace(Vec::new());
        self.out.receiving_data.send_replace(false);
        self.out
            .connection
            .send_replace(ConnectionState::Disconnected);
        self.out.emit(LinkBandEvent::Disconnected);

        if self.manual_disconnect || !self.auto_reconnect {
            self.manual_disconnect = false;
            return;
        }
        if self.last_device_id.is_none() {
            return;
        }
        self.reconnect_attempt += 1;
        self.schedule_reconnect();
    }

    fn schedule_reconnect(&mut self) {
        if self.reconnect_attempt > MAX_RECONNECT_ATTEMPTS {
            warn!("reconnect attempts exhausted");
            self.reconnect_attempt = 0;
            self.out
                .connection
                .send_replace(ConnectionState::Disconnected);
            self.out.emit(LinkBandEvent::ReconnectExhausted);
            return;
        }
        let delay = protocol::reconnect_delay(self.reconnect_attempt);
        info!(
            "reconnect attempt {} of {MAX_RECONNECT_ATTEMPTS} in {delay:?}",
            self.reconnect_attempt
        );
        self.out.emit(LinkBandEvent::Reconnecting {
            attempt: self.reconnect_attempt,
        });
        self.scheduler.schedule(TimerKind::Reconnect, delay);
    }

    // ── Timers ───────────────────────────────────────────────────────────────

    async fn handle_timer(&mut self, kind: TimerKind) {
        match kind {
            TimerKind::DiscoverServices => self.transport.discover_services().await,
            TimerKind::SetupStreams => self.begin_activation().await,
            TimerKind::ServicesReady => {
                self.services_ready = true;
                debug!("services ready");
            }
            TimerKind::TeardownSettle => self.begin_activation().await,
            TimerKind::BeginActivation | TimerKind::ActivateNext => self.activate_next().await,
            TimerKind::ActivationTimeout => {
                if let Some(sensor) = self.sequencer.abandon_current() {
                    warn!(
                        "{} produced no data within {ACTIVATION_TIMEOUT:?}, skipping",
                        sensor.name()
                    );
                    self.out.emit(LinkBandEvent::SensorActivated(sensor));
                    self.scheduler
                        .schedule(TimerKind::ActivateNext, ACTIVATION_SETTLE_DELAY);
                }
            }
            TimerKind::Reconnect => {
                // The flag may have flipped while this fire was in the queue.
                if !self.auto_reconnect {
                    return;
                }
                if let Some(device_id) = self.last_device_id.clone() {
                    self.connect(device_id).await;
                }
            }
        }
    }

    /// Bring up the next queued sensor, or finish the run.
    async fn activate_next(&mut self) {
        match self.sequencer.advance() {
            Some(sensor) => {
                info!("activating {}", sensor.name());
                self.enabled.insert(sensor);
                if let Err(e) = self
                    .transport
                    .set_notify(Self::data_char(sensor), true)
                    .await
                {
                    warn!("enabling {} notifications failed: {e}", sensor.name());
                }
                self.scheduler
                    .schedule(TimerKind::ActivationTimeout, ACTIVATION_TIMEOUT);
            }
            None => {
                if !self.receiving_data {
                    info!("all queued sensors up");
                    self.receiving_data = true;
                    self.out.receiving_data.send_replace(true);
                    self.out.emit(LinkBandEvent::ReceivingData);
                }
            }
        }
    }

    // ── Data path ────────────────────────────────────────────────────────────

    fn handle_characteristic(&mut self, char: SensorChar, data: &[u8]) {
        let sensor = match char {
            SensorChar::EegNotify => SensorType::Eeg,
            SensorChar::Ppg => SensorType::Ppg,
            SensorChar::Acc => SensorType::Acc,
            SensorChar::Battery => {
                match self.parser.parse_battery(data) {
                    Ok(reading) => {
                        self.out.battery.send_replace(Some(reading));
                    }
                    Err(e) => warn!("{e}"),
                }
                return;
            }
            SensorChar::EegWrite => return,
        };

        if self.sequencer.confirm(sensor) {
            info!("{} confirmed", sensor.name());
            self.active.insert(sensor);
            let active: Vec<SensorType> = SensorType::ACTIVATION_ORDER
                .into_iter()
                .filter(|s| self.active.contains(s))
                .collect();
            self.out.active_sensors.send_replace(active);
            self.out.emit(LinkBandEvent::SensorActivated(sensor));
            self.scheduler.cancel(TimerKind::ActivationTimeout);
            self.scheduler
                .schedule(TimerKind::ActivateNext, ACTIVATION_SETTLE_DELAY);
        }

        let result = match sensor {
            SensorType::Eeg => self.parser.parse_eeg(data).map(|s| self.ingest_eeg(s)),
            SensorType::Ppg => self.parser.parse_ppg(data).map(|s| self.ingest_ppg(s)),
            SensorType::Acc => self.parser.parse_acc(data).map(|s| self.ingest_acc(s)),
        };
        if let Err(e) = result {
            warn!("{e}");
        }
    }

    fn ingest_eeg(&mut self, samples: Vec<EegSample>) {
        for sample in samples {
            push_window(&mut self.eeg_buf, sample, EEG_WINDOW);
            if let Some(batch) = self.eeg_agg.push(sample) {
                self.deliver_eeg(batch);
            }
        }
        self.out
            .eeg_window
            .send_replace(self.eeg_buf.iter().copied().collect());
    }

    fn ingest_ppg(&mut self, samples: Vec<PpgSample>) {
        for sample in samples {
            push_window(&mut self.ppg_buf, sample, PPG_WINDOW);
            if let Some(batch) = self.ppg_agg.push(sample) {
                self.deliver_ppg(batch);
            }
        }
        self.out
            .ppg_window
            .send_replace(self.ppg_buf.iter().copied().collect());
    }

    fn ingest_acc(&mut self, samples: Vec<AccSample>) {
        for sample in samples {
            push_window(&mut self.acc_buf, sample, ACC_WINDOW);
            let processed = self.gravity.process(sample);
            push_window(&mut self.processed_acc_buf, processed, ACC_WINDOW);
            if let Some(batch) = self.acc_agg.push(processed) {
                self.deliver_acc(batch);
            }
        }
        self.out
            .acc_window
            .send_replace(self.acc_buf.iter().copied().collect());
        self.out
            .processed_acc_window
            .send_replace(self.processed_acc_buf.iter().copied().collect());
    }

    fn deliver_eeg(&mut self, batch: Vec<EegSample>) {
        if let Some(rec) = self.recorder.as_mut() {
            if let Err(e) = rec.write_eeg(&batch) {
                warn!("EEG recording write failed: {e}");
            }
        }
        self.out.eeg_batches.send_replace(batch);
    }

    fn deliver_ppg(&mut self, batch: Vec<PpgSample>) {
        if let Some(rec) = self.recorder.as_mut() {
            if let Err(e) = rec.write_ppg(&batch) {
                warn!("PPG recording write failed: {e}");
            }
        }
        self.out.ppg_batches.send_replace(batch);
    }

    fn deliver_acc(&mut self, batch: Vec<ProcessedAccSample>) {
        if let Some(rec) = self.recorder.as_mut() {
            if let Err(e) = rec.write_acc(&batch) {
                warn!("ACC recording write failed: {e}");
            }
        }
        self.out.acc_batches.send_replace(batch);
    }

    /// Deliver trailing partial time-window batches (no-op in sample-count
    /// mode, whose remainder would be undersized).
    fn flush_batches(&mut self) {
        if let Some(batch) = self.eeg_agg.flush() {
            self.deliver_eeg(batch);
        }
        if let Some(batch) = self.ppg_agg.flush() {
            self.deliver_ppg(batch);
        }
        if let Some(batch) = self.acc_agg.flush() {
            self.deliver_acc(batch);
        }
    }

    // ── Batch configuration ──────────────────────────────────────────────────

    fn config_mut(&mut self, sensor: SensorType) -> &mut SensorBatchConfig {
        match sensor {
            SensorType::Eeg => &mut self.eeg_config,
            SensorType::Ppg => &mut self.ppg_config,
            SensorType::Acc => &mut self.acc_config,
        }
    }

    fn trigger_for(&self, sensor: SensorType) -> BatchTrigger {
        let config = match sensor {
            SensorType::Eeg => &self.eeg_config,
            SensorType::Ppg => &self.ppg_config,
            SensorType::Acc => &self.acc_config,
        };
        config.trigger(self.collection_mode)
    }

    /// Replace one sensor's aggregator, discarding its buffer.
    fn rebuild_aggregator(&mut self, sensor: SensorType) {
        let trigger = self.trigger_for(sensor);
        debug!("{} batching -> {trigger:?}", sensor.name());
        match sensor {
            SensorType::Eeg => self.eeg_agg = Aggregator::new(trigger),
            SensorType::Ppg => self.ppg_agg = Aggregator::new(trigger),
            SensorType::Acc => self.acc_agg = Aggregator::new(trigger),
        }
    }

    fn rebuild_aggregators(&mut self) {
        for sensor in SensorType::ACTIVATION_ORDER {
            self.rebuild_aggregator(sensor);
        }
    }

    fn data_char(sensor: SensorType) -> SensorChar {
        match sensor {
            SensorType::Eeg => SensorChar::EegNotify,
            SensorType::Ppg => SensorChar::Ppg,
            SensorType::Acc => SensorChar::Acc,
        }
    }
}

fn push_window<S>(buf: &mut VecDeque<S>, sample: S, cap: usize) {
    if buf.len() == cap {
        buf.pop_front();
    }
    buf.push_back(sample);
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    /// What the supervisor asked the transport to do, in order.
    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Call {
        StartScan,
        StopScan,
        Connect(String),
        Disconnect,
        RequestMtu(u16),
        DiscoverServices,
        SetNotify(SensorChar, bool),
        WriteEeg(Vec<u8>),
        ReadBattery,
    }

    /// Scripted transport: records calls, answers the connect/MTU/discovery
    /// sequence with canned events, and exposes the event sender so tests can
    /// inject notifications.
    struct MockTransport {
        calls: Arc<Mutex<Vec<Call>>>,
        events: mpsc::Sender<TransportEvent>,
        fail_connects_after: Option<usize>,
        connects: usize,
    }

    impl MockTransport {
        fn new() -> (
            Self,
            Arc<Mutex<Vec<Call>>>,
            mpsc::Sender<TransportEvent>,
            mpsc::Receiver<TransportEvent>,
        ) {
            let (tx, rx) = mpsc::channel(256);
            let calls = Arc::new(Mutex::new(Vec::new()));
            let mock = Self {
                calls: calls.clone(),
                events: tx.clone(),
                fail_connects_after: None,
                connects: 0,
            };
            (mock, calls, tx, rx)
        }

        fn record(&self, call: Call) {
            self.calls.lock().unwrap().push(call);
        }
    }

    #[async_trait]
    impl Transport for MockTransport {
        async fn start_scan(&mut self) -> Result<(), crate::transport::TransportError> {
            self.record(Call::StartScan);
            Ok(())
        }

        async fn stop_scan(&mut self) {
            self.record(Call::StopScan);
        }

        async fn connect(
            &mut self,
            device_id: &str,
        ) -> Result<(), crate::transport::TransportError> {
            self.record(Call::Connect(device_id.to_owned()));
            self.connects += 1;
            if let Some(limit) = self.fail_connects_after {
                if self.connects > limit {
                    return Err(crate::transport::TransportError::DeviceNotFound(
                        device_id.to_owned(),
                    ));
                }
            }
            let _ = self
                .events
                .send(TransportEvent::Connected {
                    device_id: device_id.to_owned(),
                    name: "LXB-TEST".into(),
                })
                .await;
            Ok(())
        }

        async fn disconnect(&mut self) {
            self.record(Call::Disconnect);
            let _ = self.events.send(TransportEvent::Disconnected).await;
        }

        async fn request_mtu(&mut self, mtu: u16) {
            self.record(Call::RequestMtu(mtu));
            let _ = self
                .events
                .send(TransportEvent::MtuChanged { mtu, success: true })
                .await;
        }

        async fn discover_services(&mut self) {
            self.record(Call::DiscoverServices);
            let _ = self
                .events
                .send(TransportEvent::ServicesDiscovered { success: true })
                .await;
        }

        async fn set_notify(
            &mut self,
            char: SensorChar,
            enabled: bool,
        ) -> Result<(), crate::transport::TransportError> {
            self.record(Call::SetNotify(char, enabled));
            Ok(())
        }

        async fn write_eeg_command(
            &mut self,
            payload: &[u8],
        ) -> Result<(), crate::transport::TransportError> {
            self.record(Call::WriteEeg(payload.to_vec()));
            Ok(())
        }

        async fn read_battery(&mut self) {
            self.record(Call::ReadBattery);
        }
    }

    /// A minimal valid data packet for a sensor (header + one zero sample).
    fn packet(char: SensorChar) -> TransportEvent {
        let body = match char {
            SensorChar::EegNotify => 7,
            SensorChar::Ppg | SensorChar::Acc => 6,
            _ => panic!("not a data characteristic"),
        };
        TransportEvent::Characteristic {
            char,
            data: vec![0u8; 4 + body],
        }
    }

    async fn expect_event(streams: &mut LinkBandStreams, wanted: LinkBandEvent) {
        loop {
            let event = tokio::time::timeout(Duration::from_secs(60), streams.events.recv())
                .await
                .expect("timed out waiting for event")
                .expect("event channel closed");
            if event == wanted {
                return;
            }
        }
    }

    /// Poll (in virtual time) until the supervisor has issued `wanted`.
    async fn wait_for_call(calls: &Arc<Mutex<Vec<Call>>>, wanted: Call) {
        for _ in 0..1200 {
            if calls.lock().unwrap().contains(&wanted) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        panic!("transport never received {wanted:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn full_activation_runs_in_firmware_order() {
        let (mock, calls, inject, rx) = MockTransport::new();
        let (handle, mut streams) = LinkBandClient::spawn(mock, rx);

        handle.connect("dev-1").await.unwrap();
        expect_event(&mut streams, LinkBandEvent::Connected("LXB-TEST".into())).await;

        // Confirm each sensor with data as soon as its notification is on.
        wait_for_call(&calls, Call::SetNotify(SensorChar::EegNotify, true)).await;
        inject.send(packet(SensorChar::EegNotify)).await.unwrap();
        expect_event(&mut streams, LinkBandEvent::SensorActivated(SensorType::Eeg)).await;

        wait_for_call(&calls, Call::SetNotify(SensorChar::Acc, true)).await;
        inject.send(packet(SensorChar::Acc)).await.unwrap();
        expect_event(&mut streams, LinkBandEvent::SensorActivated(SensorType::Acc)).await;

        wait_for_call(&calls, Call::SetNotify(SensorChar::Ppg, true)).await;
        inject.send(packet(SensorChar::Ppg)).await.unwrap();
        expect_event(&mut streams, LinkBandEvent::SensorActivated(SensorType::Ppg)).await;
        expect_event(&mut streams, LinkBandEvent::ReceivingData).await;
        assert!(*streams.receiving_data.borrow());
        assert_eq!(
            streams.active_sensors.borrow().clone(),
            vec![SensorType::Eeg, SensorType::Acc, SensorType::Ppg]
        );

        let calls = calls.lock().unwrap().clone();
        let notify_order: Vec<SensorChar> = calls
            .iter()
            .filter_map(|c| match c {
                Call::SetNotify(char, true) => Some(*char),
                _ => None,
            })
            .collect();
        assert_eq!(
            notify_order,
            vec![
                SensorChar::Battery,
                SensorChar::EegNotify,
                SensorChar::Acc,
                SensorChar::Ppg
            ]
        );
        assert!(calls.contains(&Call::RequestMtu(REQUESTED_MTU)));
        assert!(calls.contains(&Call::ReadBattery));
        assert!(calls.contains(&Call::WriteEeg(EEG_START_COMMAND.to_vec())));
    }

    #[tokio::test(start_paused = true)]
    async fn restart_after_deselection_skips_eeg_and_its_start_command() {
        let (mock, calls, inject, rx) = MockTransport::new();
        let (handle, mut streams) = LinkBandClient::spawn(mock, rx);

        handle.connect("dev-1").await.unwrap();
        expect_event(&mut streams, LinkBandEvent::Connected("LXB-TEST".into())).await;

        // The first run starts with the full default selection; deselect EEG
        // once it is underway, stop, and restart.
        wait_for_call(&calls, Call::SetNotify(SensorChar::EegNotify, true)).await;
        handle.deselect_sensor(SensorType::Eeg).await.unwrap();
        handle.stop_selected_sensors().await.unwrap();
        wait_for_call(&calls, Call::SetNotify(SensorChar::EegNotify, false)).await;
        calls.lock().unwrap().clear();

        handle.start_selected_sensors().await.unwrap();
        wait_for_call(&calls, Call::SetNotify(SensorChar::Acc, true)).await;
        inject.send(packet(SensorChar::Acc)).await.unwrap();
        expect_event(&mut streams, LinkBandEvent::SensorActivated(SensorType::Acc)).await;
        wait_for_call(&calls, Call::SetNotify(SensorChar::Ppg, true)).await;
        inject.send(packet(SensorChar::Ppg)).await.unwrap();
        expect_event(&mut streams, LinkBandEvent::ReceivingData).await;

        let calls = calls.lock().unwrap().clone();
        assert!(!calls.contains(&Call::SetNotify(SensorChar::EegNotify, true)));
        assert!(!calls.iter().any(|c| matches!(c, Call::WriteEeg(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn silent_sensor_is_skipped_after_timeout() {
        let (mock, calls, inject, rx) = MockTransport::new();
        let (handle, mut streams) = LinkBandClient::spawn(mock, rx);

        handle.connect("dev-1").await.unwrap();

        // EEG never produces data; the 8 s timeout advances the queue to ACC.
        expect_event(&mut streams, LinkBandEvent::SensorActivated(SensorType::Eeg)).await;
        wait_for_call(&calls, Call::SetNotify(SensorChar::Acc, true)).await;
        inject.send(packet(SensorChar::Acc)).await.unwrap();
        expect_event(&mut streams, LinkBandEvent::SensorActivated(SensorType::Acc)).await;
        wait_for_call(&calls, Call::SetNotify(SensorChar::Ppg, true)).await;
        inject.send(packet(SensorChar::Ppg)).await.unwrap();
        expect_event(&mut streams, LinkBandEvent::ReceivingData).await;

        // EEG was skipped, not activated.
        assert_eq!(
            streams.active_sensors.borrow().clone(),
            vec![SensorType::Acc, SensorType::Ppg]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn discovery_resets_the_selection_to_all_sensors() {
        let (mock, calls, _inject, rx) = MockTransport::new();
        let (handle, mut streams) = LinkBandClient::spawn(mock, rx);

        // A deselection made before connecting does not survive discovery.
        handle.deselect_sensor(SensorType::Eeg).await.unwrap();
        handle.connect("dev-1").await.unwrap();
        expect_event(&mut streams, LinkBandEvent::Connected("LXB-TEST".into())).await;

        wait_for_call(&calls, Call::SetNotify(SensorChar::EegNotify, true)).await;
        assert!(calls
            .lock()
            .unwrap()
            .contains(&Call::WriteEeg(EEG_START_COMMAND.to_vec())));
    }

    #[tokio::test(start_paused = true)]
    async fn stop_disables_a_timed_out_sensor() {
        let (mock, calls, inject, rx) = MockTransport::new();
        let (handle, mut streams) = LinkBandClient::spawn(mock, rx);

        handle.connect("dev-1").await.unwrap();

        // EEG times out and is skipped; ACC confirms normally.
        expect_event(&mut streams, LinkBandEvent::SensorActivated(SensorType::Eeg)).await;
        wait_for_call(&calls, Call::SetNotify(SensorChar::Acc, true)).await;
        inject.send(packet(SensorChar::Acc)).await.unwrap();
        expect_event(&mut streams, LinkBandEvent::SensorActivated(SensorType::Acc)).await;

        // Stop must tear down the skipped sensor too, front-end included.
        handle.stop_selected_sensors().await.unwrap();
        wait_for_call(&calls, Call::SetNotify(SensorChar::EegNotify, false)).await;
        let calls = calls.lock().unwrap().clone();
        assert!(calls.contains(&Call::WriteEeg(EEG_STOP_COMMAND.to_vec())));
        assert!(calls.contains(&Call::SetNotify(SensorChar::Acc, false)));
    }

    #[tokio::test(start_paused = true)]
    async fn stop_cancels_a_pending_restart() {
        let (mock, calls, _inject, rx) = MockTransport::new();
        let (handle, mut streams) = LinkBandClient::spawn(mock, rx);

        handle.connect("dev-1").await.unwrap();
        expect_event(&mut streams, LinkBandEvent::Connected("LXB-TEST".into())).await;
        wait_for_call(&calls, Call::SetNotify(SensorChar::EegNotify, true)).await;

        // A restart request arms the teardown-settle delay; an explicit stop
        // landing before it fires must keep everything down.
        handle.start_selected_sensors().await.unwrap();
        handle.stop_selected_sensors().await.unwrap();

        tokio::time::sleep(Duration::from_secs(60)).await;
        let battery_enables = calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| **c == Call::SetNotify(SensorChar::Battery, true))
            .count();
        assert_eq!(battery_enables, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn disabling_auto_reconnect_cancels_pending_attempt() {
        let (mock, calls, inject, rx) = MockTransport::new();
        let (handle, mut streams) = LinkBandClient::spawn(mock, rx);

        handle.connect("dev-1").await.unwrap();
        expect_event(&mut streams, LinkBandEvent::Connected("LXB-TEST".into())).await;

        inject.send(TransportEvent::Disconnected).await.unwrap();
        expect_event(&mut streams, LinkBandEvent::Reconnecting { attempt: 1 }).await;
        handle.set_auto_reconnect(false).await.unwrap();

        // Give the (cancelled) backoff timer room to fire.
        tokio::time::sleep(Duration::from_secs(60)).await;
        let connects = calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| matches!(c, Call::Connect(_)))
            .count();
        assert_eq!(connects, 1);
        assert_eq!(*streams.connection.borrow(), ConnectionState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_reconnect_attempt_settles_the_watch_between_backoffs() {
        let (mut mock, _calls, inject, rx) = MockTransport::new();
        mock.fail_connects_after = Some(1);
        let (handle, mut streams) = LinkBandClient::spawn(mock, rx);

        handle.connect("dev-1").await.unwrap();
        expect_event(&mut streams, LinkBandEvent::Connected("LXB-TEST".into())).await;
        inject.send(TransportEvent::Disconnected).await.unwrap();

        // Attempt 1 fails; by the time attempt 2 is announced the watch is
        // back on Disconnected rather than stuck on Connecting.
        expect_event(&mut streams, LinkBandEvent::Reconnecting { attempt: 2 }).await;
        assert_eq!(*streams.connection.borrow(), ConnectionState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn unexpected_disconnect_walks_the_reconnect_schedule() {
        let (mut mock, calls, inject, rx) = MockTransport::new();
        mock.fail_connects_after = Some(1);
        let (handle, mut streams) = LinkBandClient::spawn(mock, rx);

        handle.connect("dev-1").await.unwrap();
        expect_event(&mut streams, LinkBandEvent::Connected("LXB-TEST".into())).await;

        inject.send(TransportEvent::Disconnected).await.unwrap();
        for attempt in 1..=MAX_RECONNECT_ATTEMPTS {
            expect_event(&mut streams, LinkBandEvent::Reconnecting { attempt }).await;
        }
        expect_event(&mut streams, LinkBandEvent::ReconnectExhausted).await;

        let connects = calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| matches!(c, Call::Connect(_)))
            .count();
        assert_eq!(connects, 1 + MAX_RECONNECT_ATTEMPTS as usize);
    }

    #[tokio::test(start_paused = true)]
    async fn manual_disconnect_does_not_reconnect() {
        let (mock, calls, _inject, rx) = MockTransport::new();
        let (handle, mut streams) = LinkBandClient::spawn(mock, rx);

        handle.connect("dev-1").await.unwrap();
        expect_event(&mut streams, LinkBandEvent::Connected("LXB-TEST".into())).await;
        handle.disconnect().await.unwrap();
        expect_event(&mut streams, LinkBandEvent::Disconnected).await;

        // Give any (wrong) reconnect timer room to fire.
        tokio::time::sleep(Duration::from_secs(60)).await;
        let connects = calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| matches!(c, Call::Connect(_)))
            .count();
        assert_eq!(connects, 1);
        assert_eq!(*streams.connection.borrow(), ConnectionState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn battery_notification_updates_watch() {
        let (mock, _calls, inject, rx) = MockTransport::new();
        let (handle, mut streams) = LinkBandClient::spawn(mock, rx);

        handle.connect("dev-1").await.unwrap();
        expect_event(&mut streams, LinkBandEvent::Connected("LXB-TEST".into())).await;
        inject
            .send(TransportEvent::Characteristic {
                char: SensorChar::Battery,
                data: vec![76],
            })
            .await
            .unwrap();
        streams.battery.changed().await.unwrap();
        assert_eq!(*streams.battery.borrow(), Some(BatteryReading { level: 76 }));
    }

    #[tokio::test(start_paused = true)]
    async fn count_batches_are_delivered() {
        let (mock, calls, inject, rx) = MockTransport::new();
        let (handle, mut streams) = LinkBandClient::spawn(mock, rx);

        handle
            .set_sample_count_threshold(SensorType::Ppg, 4)
            .await
            .unwrap();
        handle.connect("dev-1").await.unwrap();
        expect_event(&mut streams, LinkBandEvent::Connected("LXB-TEST".into())).await;

        // Batch configuration is applied when the activation run begins.
        wait_for_call(&calls, Call::SetNotify(SensorChar::Battery, true)).await;

        // Two packets of 2 PPG samples each reach the 4-sample threshold.
        let two_samples = TransportEvent::Characteristic {
            char: SensorChar::Ppg,
            data: vec![0u8; 4 + 12],
        };
        inject.send(two_samples.clone()).await.unwrap();
        inject.send(two_samples).await.unwrap();

        tokio::time::timeout(Duration::from_secs(60), streams.ppg_batches.changed())
            .await
            .expect("timed out waiting for batch")
            .unwrap();
        assert_eq!(streams.ppg_batches.borrow().len(), 4);
    }

    #[tokio::test]
    async fn threshold_validation_rejects_out_of_range() {
        let (mock, _calls, _inject, rx) = MockTransport::new();
        let (handle, _streams) = LinkBandClient::spawn(mock, rx);

        assert!(matches!(
            handle.set_sample_count_threshold(SensorType::Eeg, 0).await,
            Err(CommandError::OutOfRange { .. })
        ));
        assert!(matches!(
            handle.set_seconds_threshold(SensorType::Eeg, 3601).await,
            Err(CommandError::OutOfRange { .. })
        ));
        assert!(matches!(
            handle.set_minutes_threshold(SensorType::Eeg, 61).await,
            Err(CommandError::OutOfRange { .. })
        ));
        assert!(handle.set_minutes_threshold(SensorType::Eeg, 60).await.is_ok());
    }
}

use std::io::{self, BufRead};

use anyhow::Result;
use log::{error, info, warn};

use linkband_rs::client::{LinkBandClient, LinkBandStreams};
use linkband_rs::transport::BleTransport;
use linkband_rs::types::{AccelerometerMode, CollectionMode, LinkBandEvent, SensorType};

#[tokio::main]
async fn main() -> Result<()> {
    // ── Logging ───────────────────────────────────────────────────────────────
    // Set RUST_LOG=debug for verbose output, e.g.:
    //   RUST_LOG=linkband_rs=debug cargo run
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    // ── Driver ────────────────────────────────────────────────────────────────
    let (transport_tx, transport_rx) = tokio::sync::mpsc::channel(256);
    let transport = BleTransport::new(transport_tx).await?;
    let (handle, streams) = LinkBandClient::spawn(transport, transport_rx);
    let LinkBandStreams {
        devices,
        mut battery,
        mut eeg_batches,
        mut ppg_batches,
        mut acc_batches,
        mut events,
        ..
    } = streams;

    info!("Scanning for LinkBand devices …");
    handle.start_scan().await?;

    info!("Commands (type + Enter):");
    info!("  c <n>  – connect to the n-th scanned device (1-based)");
    info!("  d      – disconnect");
    info!("  s      – restart streaming of the selected sensors");
    info!("  x      – stop streaming");
    info!("  m      – toggle accelerometer raw/motion mode");
    info!("  t      – switch batching to 1-second time windows");
    info!("  rec    – start CSV recording in the current directory");
    info!("  stop   – stop CSV recording");
    info!("  q      – quit\n");

    // ── Stdin command loop ────────────────────────────────────────────────────
    // Lines are read on a dedicated OS thread (to avoid holding a non-Send
    // StdinLock across await points), then relayed to an async task.
    let (line_tx, mut line_rx) = tokio::sync::mpsc::unbounded_channel::<String>();

    std::thread::spawn(move || {
        let stdin = io::stdin();
        for line in stdin.lock().lines() {
            match line {
                Ok(l) => {
                    if line_tx.send(l.trim().to_owned()).is_err() {
                        break;
                    }
                }
                Err(_) => break,
            }
        }
    });

    let cmd_handle = handle.clone();
    let devices_for_cmd = devices.clone();
    tokio::spawn(async move {
        let mut motion = false;
        while let Some(line) = line_rx.recv().await {
            if line.is_empty() {
                continue;
            }
            match line.split_whitespace().collect::<Vec<_>>().as_slice() {
                ["q"] => {
                    info!("Quit requested.");
                    cmd_handle.disconnect().await.ok();
                    std::process::exit(0);
                }
                ["c", n] => {
                    let index: usize = match n.parse() {
                        Ok(i) => i,
                        Err(_) => {
                            warn!("Not a device number: {n}");
                            continue;
                        }
                    };
                    let device = devices_for_cmd.borrow().get(index.wrapping_sub(1)).cloned();
                    match device {
                        Some(d) => {
                            info!("Connecting to {} …", d.name);
                            if let Err(e) = cmd_handle.connect(d.id).await {
                                error!("Connect error: {e}");
                            }
                        }
                        None => warn!("No device #{index} in the scan list yet"),
                    }
                }
                ["d"] => {
                    if let Err(e) = cmd_handle.disconnect().await {
                        error!("Disconnect error: {e}");
                    }
                }
                ["s"] => {
                    if let Err(e) = cmd_handle.start_selected_sensors().await {
                        error!("Start error: {e}");
                    }
                }
                ["x"] => {
                    if let Err(e) = cmd_handle.stop_selected_sensors().await {
                        error!("Stop error: {e}");
                    }
                }
                ["m"] => {
                    motion = !motion;
                    let mode = if motion {
                        AccelerometerMode::Motion
                    } else {
                        AccelerometerMode::Raw
                    };
                    info!("Accelerometer mode: {mode:?}");
                    cmd_handle.set_accelerometer_mode(mode).await.ok();
                }
                ["t"] => {
                    info!("Switching to 1-second batch windows");
                    if let Err(e) = cmd_handle.set_seconds_threshold(SensorType::Eeg, 1).await {
                        error!("Threshold error: {e}");
                    }
                    cmd_handle.set_seconds_threshold(SensorType::Ppg, 1).await.ok();
                    cmd_handle.set_seconds_threshold(SensorType::Acc, 1).await.ok();
                    cmd_handle
                        .set_collection_mode(CollectionMode::Seconds)
                        .await
                        .ok();
                }
                ["rec"] => {
                    if let Err(e) = cmd_handle.start_recording(".").await {
                        error!("Recording error: {e}");
                    }
                }
                ["stop"] => {
                    cmd_handle.stop_recording().await.ok();
                }
                other => warn!("Unknown command: {other:?}"),
            }
        }
    });

    // ── Scan results ──────────────────────────────────────────────────────────
    let mut device_watch = devices;
    tokio::spawn(async move {
        while device_watch.changed().await.is_ok() {
            for (i, d) in device_watch.borrow().iter().enumerate() {
                info!("  [{}] {} ({})", i + 1, d.name, d.id);
            }
        }
    });

    // ── Battery ───────────────────────────────────────────────────────────────
    tokio::spawn(async move {
        while battery.changed().await.is_ok() {
            if let Some(reading) = *battery.borrow() {
                info!("🔋 Battery: {}%", reading.level);
            }
        }
    });

    // ── Batch consumers ───────────────────────────────────────────────────────
    tokio::spawn(async move {
        while eeg_batches.changed().await.is_ok() {
            let batch = eeg_batches.borrow_and_update().clone();
            if let Some(first) = batch.first() {
                info!(
                    "EEG batch: {} samples from t={} (ch1 {:+.2} µV, leadOff={})",
                    batch.len(),
                    first.timestamp_ms,
                    first.ch1_uv,
                    first.lead_off
                );
            }
        }
    });
    tokio::spawn(async move {
        while ppg_batches.changed().await.is_ok() {
            let batch = ppg_batches.borrow_and_update().clone();
            if let Some(first) = batch.first() {
                info!(
                    "PPG batch: {} samples from t={} (red={}, ir={})",
                    batch.len(),
                    first.timestamp_ms,
                    first.red,
                    first.ir
                );
            }
        }
    });
    tokio::spawn(async move {
        while acc_batches.changed().await.is_ok() {
            let batch = acc_batches.borrow_and_update().clone();
            if let Some(first) = batch.first() {
                info!(
                    "ACC batch ({:?}): {} samples from t={} (x={}, y={}, z={})",
                    first.mode,
                    batch.len(),
                    first.timestamp_ms,
                    first.x,
                    first.y,
                    first.z
                );
            }
        }
    });

    // ── Main event loop ───────────────────────────────────────────────────────
    while let Some(event) = events.recv().await {
        match event {
            LinkBandEvent::Connected(name) => info!("✅  Connected to {name}"),
            LinkBandEvent::Disconnected => info!("❌  Disconnected"),
            LinkBandEvent::SensorActivated(sensor) => info!("▶  {} up", sensor.name()),
            LinkBandEvent::ReceivingData => info!("📡  All sensors streaming"),
            LinkBandEvent::Reconnecting { attempt } => {
                info!("↻  Reconnecting (attempt {attempt}) …");
            }
            LinkBandEvent::ReconnectExhausted => {
                error!("Reconnect attempts exhausted; use 'c <n>' to retry manually");
            }
        }
    }
    Ok(())
}

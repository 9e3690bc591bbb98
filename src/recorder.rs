//! CSV recording of decoded sample streams.
//!
//! A [`RecordingSession`] owns one file per recorded sensor, named
//! `LinkBand_<SENSOR>_<yyyyMMdd_HHmmss>.csv`. Rows are appended as batches
//! are delivered, so a recording contains exactly what a live consumer saw.
//! Accelerometer rows carry the processed values (post gravity filter), not
//! the raw wire values.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::Local;
use log::info;

use crate::types::{EegSample, PpgSample, ProcessedAccSample, SensorType};

struct CsvWriter {
    path: PathBuf,
    out: BufWriter<File>,
}

impl CsvWriter {
    fn create(path: PathBuf, header: &str) -> io::Result<Self> {
        let file = File::create(&path)?;
        let mut out = BufWriter::new(file);
        writeln!(out, "{header}")?;
        Ok(Self { path, out })
    }
}

/// An in-progress recording. Dropped or [`stop`](Self::stop)ped sessions
/// flush their buffers; rows written after a sensor's writer errored are
/// skipped for that sensor only.
pub struct RecordingSession {
    eeg: Option<CsvWriter>,
    ppg: Option<CsvWriter>,
    acc: Option<CsvWriter>,
}

impl RecordingSession {
    /// Create the CSV files for `sensors` under `dir`. If any file fails to
    /// create, the ones already created are removed and the error is
    /// returned; a session never starts half-recorded.
    pub fn start(dir: &Path, sensors: &[SensorType]) -> io::Result<Self> {
        let stamp = Local::now().format("%Y%m%d_%H%M%S");
        let mut session = Self {
            eeg: None,
            ppg: None,
            acc: None,
        };

        for sensor in sensors {
            let path = dir.join(format!("LinkBand_{}_{stamp}.csv", sensor.name()));
            let result = match sensor {
                SensorType::Eeg => {
                    CsvWriter::create(path, "timestamp,ch1Raw,ch2Raw,ch1uV,ch2uV,leadOff")
                        .map(|w| session.eeg = Some(w))
                }
                SensorType::Ppg => {
                    CsvWriter::create(path, "timestamp,red,ir").map(|w| session.ppg = Some(w))
                }
                SensorType::Acc => {
                    CsvWriter::create(path, "timestamp,x,y,z").map(|w| session.acc = Some(w))
                }
            };
            if let Err(e) = result {
                session.remove_files();
                return Err(e);
            }
        }

        for w in [&session.eeg, &session.ppg, &session.acc].into_iter().flatten() {
            info!("recording to {}", w.path.display());
        }
        Ok(session)
    }

    pub fn write_eeg(&mut self, samples: &[EegSample]) -> io::Result<()> {
        let Some(w) = self.eeg.as_mut() else {
            return Ok(());
        };
        for s in samples {
            writeln!(
                w.out,
                "{},{},{},{},{},{}",
                s.timestamp_ms,
                s.ch1_raw,
                s.ch2_raw,
                s.ch1_uv,
                s.ch2_uv,
                s.lead_off as u8
            )?;
        }
        Ok(())
    }

    pub fn write_ppg(&mut self, samples: &[PpgSample]) -> io::Result<()> {
        let Some(w) = self.ppg.as_mut() else {
            return Ok(());
        };
        for s in samples {
            writeln!(w.out, "{},{},{}", s.timestamp_ms, s.red, s.ir)?;
        }
        Ok(())
    }

    pub fn write_acc(&mut self, samples: &[ProcessedAccSample]) -> io::Result<()> {
        let Some(w) = self.acc.as_mut() else {
            return Ok(());
        };
        for s in samples {
            writeln!(w.out, "{},{},{},{}", s.timestamp_ms, s.x, s.y, s.z)?;
        }
        Ok(())
    }

    /// Flush and close every writer. Returns the paths written.
    pub fn stop(mut self) -> io::Result<Vec<PathBuf>> {
        let mut paths = Vec::new();
        for w in [self.eeg.take(), self.ppg.take(), self.acc.take()]
            .into_iter()
            .flatten()
        {
            let mut out = w.out;
            out.flush()?;
            paths.push(w.path);
        }
        Ok(paths)
    }

    fn remove_files(&mut self) {
        for w in [self.eeg.take(), self.ppg.take(), self.acc.take()]
            .into_iter()
            .flatten()
        {
            drop(w.out);
            std::fs::remove_file(&w.path).ok();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::AccelerometerMode;

    #[test]
    fn eeg_rows_match_header() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = RecordingSession::start(dir.path(), &[SensorType::Eeg]).unwrap();
        session
            .write_eeg(&[EegSample {
                timestamp_ms: 1000,
                lead_off: true,
                ch1_uv: 1.5,
                ch2_uv: -2.5,
                ch1_raw: 42,
                ch2_raw: -42,
            }])
            .unwrap();
        let paths = session.stop().unwrap();
        assert_eq!(paths.len(), 1);

        let contents = std::fs::read_to_string(&paths[0]).unwrap();
        let mut lines = contents.lines();
        assert_eq!(
            lines.next().unwrap(),
            "timestamp,ch1Raw,ch2Raw,ch1uV,ch2uV,leadOff"
        );
        assert_eq!(lines.next().unwrap(), "1000,42,-42,1.5,-2.5,1");
        let name = paths[0].file_name().unwrap().to_string_lossy();
        assert!(name.starts_with("LinkBand_EEG_") && name.ends_with(".csv"));
    }

    #[test]
    fn ppg_and_acc_rows() {
        let dir = tempfile::tempdir().unwrap();
        let mut session =
            RecordingSession::start(dir.path(), &[SensorType::Ppg, SensorType::Acc]).unwrap();
        session
            .write_ppg(&[PpgSample {
                timestamp_ms: 20,
                red: 123,
                ir: 456,
            }])
            .unwrap();
        session
            .write_acc(&[ProcessedAccSample {
                timestamp_ms: 40,
                x: -1,
                y: 2,
                z: -3,
                mode: AccelerometerMode::Motion,
            }])
            .unwrap();
        let paths = session.stop().unwrap();
        assert_eq!(paths.len(), 2);

        let ppg = paths
            .iter()
            .find(|p| p.to_string_lossy().contains("_PPG_"))
            .unwrap();
        let acc = paths
            .iter()
            .find(|p| p.to_string_lossy().contains("_ACC_"))
            .unwrap();
        assert_eq!(
            std::fs::read_to_string(ppg).unwrap(),
            "timestamp,red,ir\n20,123,456\n"
        );
        assert_eq!(
            std::fs::read_to_string(acc).unwrap(),
            "timestamp,x,y,z\n40,-1,2,-3\n"
        );
    }

    #[test]
    fn writes_for_unrecorded_sensor_are_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = RecordingSession::start(dir.path(), &[SensorType::Eeg]).unwrap();
        session
            .write_ppg(&[PpgSample {
                timestamp_ms: 0,
                red: 1,
                ir: 2,
            }])
            .unwrap();
        assert_eq!(session.stop().unwrap().len(), 1);
    }

    #[test]
    fn failed_start_leaves_no_files_behind() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("does-not-exist");
        assert!(RecordingSession::start(&missing, &[SensorType::Eeg]).is_err());
    }
}

//! Accelerometer gravity filtering.
//!
//! A low-pass exponential moving average tracks the gravity component per
//! axis. In [`AccelerometerMode::Raw`] samples pass through unchanged; in
//! [`AccelerometerMode::Motion`] the gravity estimate is subtracted, leaving
//! linear acceleration.

use crate::types::{AccSample, AccelerometerMode, ProcessedAccSample};

/// EMA smoothing factor for the gravity estimate.
const GRAVITY_FILTER_FACTOR: f64 = 0.1;

/// Per-axis gravity estimator plus the active projection mode.
#[derive(Debug)]
pub struct GravityFilter {
    mode: AccelerometerMode,
    gravity_x: f64,
    gravity_y: f64,
    gravity_z: f64,
    initialized: bool,
}

impl GravityFilter {
    pub fn new() -> Self {
        Self {
            mode: AccelerometerMode::default(),
            gravity_x: 0.0,
            gravity_y: 0.0,
            gravity_z: 0.0,
            initialized: false,
        }
    }

    pub fn mode(&self) -> AccelerometerMode {
        self.mode
    }

    /// Switch projection mode. Entering `Motion` resets the estimator so the
    /// first post-switch sample re-seeds it instead of subtracting a stale
    /// or zero estimate.
    pub fn set_mode(&mut self, mode: AccelerometerMode) {
        if self.mode == mode {
            return;
        }
        self.mode = mode;
        if mode == AccelerometerMode::Motion {
            self.reset();
        }
    }

    pub fn reset(&mut self) {
        self.initialized = false;
        self.gravity_x = 0.0;
        self.gravity_y = 0.0;
        self.gravity_z = 0.0;
    }

    /// Project one raw sample through the active mode.
    pub fn process(&mut self, sample: AccSample) -> ProcessedAccSample {
        match self.mode {
            AccelerometerMode::Raw => ProcessedAccSample {
                timestamp_ms: sample.timestamp_ms,
                x: sample.x,
                y: sample.y,
                z: sample.z,
                mode: AccelerometerMode::Raw,
            },
            AccelerometerMode::Motion => {
                self.update_gravity(&sample);
                ProcessedAccSample {
                    timestamp_ms: sample.timestamp_ms,
                    x: (sample.x as f64 - self.gravity_x) as i16,
                    y: (sample.y as f64 - self.gravity_y) as i16,
                    z: (sample.z as f64 - self.gravity_z) as i16,
                    mode: AccelerometerMode::Motion,
                }
            }
        }
    }

    fn update_gravity(&mut self, sample: &AccSample) {
        if !self.initialized {
            // First sample seeds the estimate directly, no smoothing.
            self.gravity_x = sample.x as f64;
            self.gravity_y = sample.y as f64;
            self.gravity_z = sample.z as f64;
            self.initialized = true;
        } else {
            let a = GRAVITY_FILTER_FACTOR;
            self.gravity_x = self.gravity_x * (1.0 - a) + sample.x as f64 * a;
            self.gravity_y = self.gravity_y * (1.0 - a) + sample.y as f64 * a;
            self.gravity_z = self.gravity_z * (1.0 - a) + sample.z as f64 * a;
        }
    }
}

impl Default for GravityFilter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn acc(ts: i64, x: i16, y: i16, z: i16) -> AccSample {
        AccSample {
            timestamp_ms: ts,
            x,
            y,
            z,
        }
    }

    #[test]
    fn raw_mode_passes_through() {
        let mut f = GravityFilter::new();
        let out = f.process(acc(1, 10, -20, 30));
        assert_eq!((out.x, out.y, out.z), (10, -20, 30));
        assert_eq!(out.mode, AccelerometerMode::Raw);
    }

    #[test]
    fn motion_mode_first_sample_is_zeroed_by_seed() {
        let mut f = GravityFilter::new();
        f.set_mode(AccelerometerMode::Motion);
        let out = f.process(acc(1, 64, 64, 64));
        // Seeded estimate equals the sample itself.
        assert_eq!((out.x, out.y, out.z), (0, 0, 0));
        assert_eq!(out.mode, AccelerometerMode::Motion);
    }

    #[test]
    fn motion_mode_tracks_ema() {
        let mut f = GravityFilter::new();
        f.set_mode(AccelerometerMode::Motion);
        f.process(acc(1, 100, 0, 0));
        let out = f.process(acc(2, 0, 0, 0));
        // gravity_x = 100*0.9 + 0*0.1 = 90; 0 - 90 = -90.
        assert_eq!(out.x, -90);
    }

    #[test]
    fn switching_into_motion_reseeds() {
        let mut f = GravityFilter::new();
        f.set_mode(AccelerometerMode::Motion);
        f.process(acc(1, 100, 100, 100));
        f.set_mode(AccelerometerMode::Raw);
        f.set_mode(AccelerometerMode::Motion);
        // Estimator was reset: this sample seeds again rather than
        // subtracting the stale 100.
        let out = f.process(acc(2, 7, 7, 7));
        assert_eq!((out.x, out.y, out.z), (0, 0, 0));
    }
}

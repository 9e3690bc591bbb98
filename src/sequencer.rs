//! Sensor activation sequencing.
//!
//! LinkBand firmware misbehaves when several notification enables land close
//! together, so sensors are brought up strictly one at a time in a fixed
//! order (EEG → ACC → PPG), each waiting for first data or a timeout before
//! the next begins. This module tracks the queue and the sensor currently
//! being activated; the supervisor owns the timers and the GATT writes.

use crate::types::SensorType;

/// Build the activation queue for a selection, preserving the firmware
/// order regardless of selection order.
pub fn build_activation_queue<'a, I>(selected: I) -> Vec<SensorType>
where
    I: IntoIterator<Item = &'a SensorType>,
{
    let selected: Vec<SensorType> = selected.into_iter().copied().collect();
    SensorType::ACTIVATION_ORDER
        .into_iter()
        .filter(|s| selected.contains(s))
        .collect()
}

/// Walks an activation queue one sensor at a time.
#[derive(Debug, Default)]
pub struct ActivationSequencer {
    queue: Vec<SensorType>,
    current: Option<SensorType>,
}

impl ActivationSequencer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a fresh queue; any previous progress is discarded.
    pub fn load(&mut self, queue: Vec<SensorType>) {
        self.queue = queue;
        self.current = None;
    }

    /// The sensor currently waiting for its first data, if any.
    pub fn current(&self) -> Option<SensorType> {
        self.current
    }

    /// Pop the next sensor off the queue and mark it as activating.
    /// Returns `None` when the queue is exhausted.
    pub fn advance(&mut self) -> Option<SensorType> {
        self.current = if self.queue.is_empty() {
            None
        } else {
            Some(self.queue.remove(0))
        };
        self.current
    }

    /// First data arrived for `sensor`. Returns `true` when that confirms
    /// the sensor currently being activated (the caller then settles and
    /// advances); data from an already-active sensor returns `false`.
    pub fn confirm(&mut self, sensor: SensorType) -> bool {
        if self.current == Some(sensor) {
            self.current = None;
            true
        } else {
            false
        }
    }

    /// The current sensor never produced data within the timeout; drop it
    /// and let the caller advance. Returns the abandoned sensor.
    pub fn abandon_current(&mut self) -> Option<SensorType> {
        self.current.take()
    }

    /// True once the queue is drained and nothing is mid-activation.
    pub fn finished(&self) -> bool {
        self.queue.is_empty() && self.current.is_none()
    }

    pub fn clear(&mut self) {
        self.queue.clear();
        self.current = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn queue_follows_firmware_order_not_selection_order() {
        let selected: HashSet<SensorType> =
            [SensorType::Ppg, SensorType::Eeg, SensorType::Acc].into();
        assert_eq!(
            build_activation_queue(&selected),
            vec![SensorType::Eeg, SensorType::Acc, SensorType::Ppg]
        );
    }

    #[test]
    fn queue_for_subset() {
        let selected: HashSet<SensorType> = [SensorType::Ppg, SensorType::Acc].into();
        assert_eq!(
            build_activation_queue(&selected),
            vec![SensorType::Acc, SensorType::Ppg]
        );
    }

    #[test]
    fn confirm_advances_only_for_current_sensor() {
        let mut seq = ActivationSequencer::new();
        seq.load(vec![SensorType::Eeg, SensorType::Acc]);
        assert_eq!(seq.advance(), Some(SensorType::Eeg));

        // ACC data while EEG is activating does not confirm anything.
        assert!(!seq.confirm(SensorType::Acc));
        assert_eq!(seq.current(), Some(SensorType::Eeg));

        assert!(seq.confirm(SensorType::Eeg));
        assert_eq!(seq.advance(), Some(SensorType::Acc));
        assert!(seq.confirm(SensorType::Acc));
        assert_eq!(seq.advance(), None);
        assert!(seq.finished());
    }

    #[test]
    fn timeout_abandons_and_queue_continues() {
        let mut seq = ActivationSequencer::new();
        seq.load(vec![SensorType::Eeg, SensorType::Ppg]);
        seq.advance();
        assert_eq!(seq.abandon_current(), Some(SensorType::Eeg));
        assert_eq!(seq.advance(), Some(SensorType::Ppg));
    }

    #[test]
    fn empty_selection_finishes_immediately() {
        let mut seq = ActivationSequencer::new();
        seq.load(build_activation_queue(&HashSet::new()));
        assert_eq!(seq.advance(), None);
        assert!(seq.finished());
    }
}

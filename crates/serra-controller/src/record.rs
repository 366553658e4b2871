use chrono::{DateTime, Utc};

use serde::{Deserialize, Serialize};

use serra::actuator::ActuatorState;
use serra::device::DeviceId;

/// The control record of a device.
///
/// It tracks the state an operator wants enforced on a device, the state
/// the device last acknowledged, and the bookkeeping of the command which
/// is trying to make them equal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ControlRecord {
    /// Device identifier.
    pub device: DeviceId,
    /// Desired state.
    pub desired: ActuatorState,
    /// Reported state.
    pub reported: ActuatorState,
    /// Time of the last reported state.
    pub reported_at: DateTime<Utc>,
    /// Identifier of the last accepted command.
    pub command_id: u64,
    /// Whether the last command still waits for the device acknowledgement.
    pub pending_command: bool,
    /// Number of retries sent for the last command.
    pub attempts: u32,
    /// Time of the last update of the record.
    pub updated_at: DateTime<Utc>,
}

impl ControlRecord {
    /// Creates the default [`ControlRecord`] of a device.
    ///
    /// Both the desired and the reported states start from the default
    /// [`ActuatorState`] and no command has been issued yet.
    #[must_use]
    pub fn new(device: DeviceId) -> Self {
        let now = Utc::now();
        Self {
            device,
            desired: ActuatorState::default(),
            reported: ActuatorState::default(),
            reported_at: now,
            command_id: 0,
            pending_command: false,
            attempts: 0,
            updated_at: now,
        }
    }

    /// Checks whether the reported state equals the desired one.
    #[must_use]
    #[inline]
    pub fn is_converged(&self) -> bool {
        self.reported == self.desired
    }

    /// Checks whether the last command gave up without an acknowledgement.
    #[must_use]
    #[inline]
    pub const fn is_exhausted(&self) -> bool {
        !self.pending_command && self.attempts > 0
    }

    // Closes the command cycle as converged.
    pub(crate) fn converge(&mut self) {
        self.pending_command = false;
        self.attempts = 0;
        self.touch();
    }

    pub(crate) fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use serra::actuator::{Actuator, Switch};
    use serra::device::DeviceId;

    use super::ControlRecord;

    #[test]
    fn default_record() {
        let record = ControlRecord::new(DeviceId::default());

        assert_eq!(record.command_id, 0);
        assert!(!record.pending_command);
        assert!(record.is_converged());
        assert!(!record.is_exhausted());

        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["desired"], json!({"fan": 1, "lamp": 0, "pump": 0, "valve": 0}));
        assert_eq!(value["commandId"], json!(0));
        assert_eq!(value["pendingCommand"], json!(false));

        let decoded: ControlRecord = serde_json::from_value(value).unwrap();
        assert_eq!(decoded, record);
    }

    #[test]
    fn converge_resets_bookkeeping() {
        let mut record = ControlRecord::new(DeviceId::default());
        record.desired = record.desired.set(Actuator::Lamp, Switch::On);
        record.pending_command = true;
        record.attempts = 2;

        assert!(!record.is_converged());

        record.converge();

        assert!(!record.pending_command);
        assert_eq!(record.attempts, 0);
    }
}

use alloc::format;
use alloc::string::String;

use core::fmt;

use serde::Serialize;

use crate::actuator::{ActuatorPatch, ActuatorState};
use crate::device::DeviceId;
use crate::topics::SensorKind;

/// A `GPS` fix sent by a device.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[cfg_attr(feature = "deserialize", derive(serde::Deserialize))]
pub struct GpsFix {
    /// Latitude in decimal degrees.
    pub latitude: f64,
    /// Longitude in decimal degrees.
    pub longitude: f64,
    /// Altitude in meters.
    pub altitude: f64,
}

/// Notifies a change of the desired state or the convergence of a command.
///
/// The `pending` flag distinguishes the optimistic notification sent right
/// after a command is accepted from the one sent when the device
/// acknowledges it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[cfg_attr(feature = "deserialize", derive(serde::Deserialize))]
#[serde(rename_all = "camelCase")]
pub struct ControlUpdate {
    /// Device identifier.
    pub device: DeviceId,
    /// Actuator values.
    #[serde(flatten)]
    pub state: ActuatorPatch,
    /// Command identifier.
    pub command_id: u64,
    /// Whether the command still waits for the device acknowledgement.
    pub pending: bool,
}

/// Notifies that a device never reached the desired state of a command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[cfg_attr(feature = "deserialize", derive(serde::Deserialize))]
#[serde(rename_all = "camelCase")]
pub struct ControlMismatch {
    /// Device identifier.
    pub device: DeviceId,
    /// Desired state.
    pub desired: ActuatorState,
    /// Last reported state.
    pub reported: ActuatorState,
    /// Command identifier.
    pub command_id: u64,
    /// Human readable description of the mismatch.
    pub message: String,
}

/// Forwards the actuator state acknowledged by a device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[cfg_attr(feature = "deserialize", derive(serde::Deserialize))]
pub struct RelayStateUpdate {
    /// Device identifier.
    pub device: DeviceId,
    /// Reported state.
    #[serde(flatten)]
    pub state: ActuatorState,
}

/// Forwards a sensor reading.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[cfg_attr(feature = "deserialize", derive(serde::Deserialize))]
#[serde(rename_all = "camelCase")]
pub struct SensorUpdate {
    /// Device identifier.
    pub device: DeviceId,
    /// Sensor kind.
    pub sensor_type: SensorKind,
    /// Reading value.
    pub value: f64,
    /// Reception time, in milliseconds since the Unix epoch.
    pub timestamp: i64,
}

/// Forwards a `GPS` fix.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[cfg_attr(feature = "deserialize", derive(serde::Deserialize))]
pub struct GpsUpdate {
    /// Device identifier.
    pub device: DeviceId,
    /// The fix.
    #[serde(flatten)]
    pub fix: GpsFix,
    /// Reception time, in milliseconds since the Unix epoch.
    pub timestamp: i64,
}

/// All events broadcast to dashboards.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[cfg_attr(feature = "deserialize", derive(serde::Deserialize))]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ControlEvent {
    /// A [`ControlUpdate`] event.
    ControlUpdate(ControlUpdate),
    /// A [`ControlMismatch`] event.
    ControlMismatch(ControlMismatch),
    /// A [`RelayStateUpdate`] event.
    RelayStateUpdate(RelayStateUpdate),
    /// A [`SensorUpdate`] event.
    SensorUpdate(SensorUpdate),
    /// A [`GpsUpdate`] event.
    GpsUpdate(GpsUpdate),
}

impl ControlEvent {
    /// Creates a [`ControlEvent::ControlUpdate`].
    #[must_use]
    pub const fn update(
        device: DeviceId,
        state: ActuatorPatch,
        command_id: u64,
        pending: bool,
    ) -> Self {
        Self::ControlUpdate(ControlUpdate {
            device,
            state,
            command_id,
            pending,
        })
    }

    /// Creates a [`ControlEvent::ControlMismatch`] for a command which
    /// exhausted its retries.
    #[must_use]
    pub fn mismatch(
        device: DeviceId,
        desired: ActuatorState,
        reported: ActuatorState,
        command_id: u64,
        retries: u32,
    ) -> Self {
        let message = format!(
            "Device `{device}` did not apply command {command_id} after {retries} retries: \
             desired {desired}, reported {reported}"
        );
        Self::ControlMismatch(ControlMismatch {
            device,
            desired,
            reported,
            command_id,
            message,
        })
    }

    /// Creates a [`ControlEvent::RelayStateUpdate`].
    #[must_use]
    pub const fn relay_state(device: DeviceId, state: ActuatorState) -> Self {
        Self::RelayStateUpdate(RelayStateUpdate { device, state })
    }

    /// Creates a [`ControlEvent::SensorUpdate`].
    #[must_use]
    pub const fn sensor(device: DeviceId, sensor_type: SensorKind, value: f64, timestamp: i64) -> Self {
        Self::SensorUpdate(SensorUpdate {
            device,
            sensor_type,
            value,
            timestamp,
        })
    }

    /// Creates a [`ControlEvent::GpsUpdate`].
    #[must_use]
    pub const fn gps(device: DeviceId, fix: GpsFix, timestamp: i64) -> Self {
        Self::GpsUpdate(GpsUpdate {
            device,
            fix,
            timestamp,
        })
    }

    /// Returns the event name.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::ControlUpdate(_) => "control_update",
            Self::ControlMismatch(_) => "control_mismatch",
            Self::RelayStateUpdate(_) => "relay_state_update",
            Self::SensorUpdate(_) => "sensor_update",
            Self::GpsUpdate(_) => "gps_update",
        }
    }

    /// Returns the device the event refers to.
    #[must_use]
    pub const fn device(&self) -> &DeviceId {
        match self {
            Self::ControlUpdate(ControlUpdate { device, .. })
            | Self::ControlMismatch(ControlMismatch { device, .. })
            | Self::RelayStateUpdate(RelayStateUpdate { device, .. })
            | Self::SensorUpdate(SensorUpdate { device, .. })
            | Self::GpsUpdate(GpsUpdate { device, .. }) => device,
        }
    }
}

impl fmt::Display for ControlEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> Result<(), fmt::Error> {
        match self {
            Self::ControlUpdate(update) => write!(
                f,
                "[{}] command {} pending={}",
                update.device, update.command_id, update.pending
            ),
            Self::ControlMismatch(mismatch) => write!(f, "[{}] {}", mismatch.device, mismatch.message),
            Self::RelayStateUpdate(update) => write!(f, "[{}] relays {}", update.device, update.state),
            Self::SensorUpdate(update) => write!(
                f,
                "[{}] {} = {}",
                update.device, update.sensor_type, update.value
            ),
            Self::GpsUpdate(update) => write!(
                f,
                "[{}] gps {}, {} ({} m)",
                update.device, update.fix.latitude, update.fix.longitude, update.fix.altitude
            ),
        }
    }
}

#[cfg(test)]
#[cfg(feature = "deserialize")]
mod tests {
    use serde_json::json;

    use crate::actuator::{Actuator, ActuatorPatch, ActuatorState, Switch};
    use crate::device::DeviceId;
    use crate::topics::SensorKind;
    use crate::{deserialize, serialize};

    use super::{ControlEvent, GpsFix};

    #[test]
    fn test_control_update() {
        let event = ControlEvent::update(
            DeviceId::default(),
            ActuatorPatch::empty().set(Actuator::Fan, Switch::On),
            7,
            true,
        );

        assert_eq!(event.name(), "control_update");
        assert_eq!(
            serialize(&event),
            json!({
                "event": "control_update",
                "data": {
                    "device": "greenhouse",
                    "fan": 1,
                    "commandId": 7,
                    "pending": true,
                }
            })
        );
        assert_eq!(deserialize::<ControlEvent>(serialize(&event)), event);
    }

    #[test]
    fn test_control_mismatch() {
        let desired = ActuatorState::off().set(Actuator::Fan, Switch::On);
        let event = ControlEvent::mismatch(DeviceId::default(), desired, ActuatorState::off(), 3, 3);

        let ControlEvent::ControlMismatch(ref mismatch) = event else {
            panic!("Expected a mismatch event");
        };
        assert_eq!(
            mismatch.message,
            "Device `greenhouse` did not apply command 3 after 3 retries: \
             desired fan=1 lamp=0 pump=0 valve=0, reported fan=0 lamp=0 pump=0 valve=0"
        );

        assert_eq!(
            serialize(&event)["data"],
            json!({
                "device": "greenhouse",
                "desired": {"fan": 1, "lamp": 0, "pump": 0, "valve": 0},
                "reported": {"fan": 0, "lamp": 0, "pump": 0, "valve": 0},
                "commandId": 3,
                "message": mismatch.message,
            })
        );
    }

    #[test]
    fn test_telemetry_events() {
        let event = ControlEvent::sensor(DeviceId::default(), SensorKind::Soil, 41.5, 1000);
        assert_eq!(event.name(), "sensor_update");
        assert_eq!(
            serialize(&event)["data"],
            json!({
                "device": "greenhouse",
                "sensorType": "soil",
                "value": 41.5,
                "timestamp": 1000,
            })
        );

        let fix = GpsFix {
            latitude: 45.07,
            longitude: 7.68,
            altitude: 239.0,
        };
        let event = ControlEvent::gps(DeviceId::default(), fix, 1000);
        assert_eq!(event.name(), "gps_update");
        assert_eq!(event.device(), &DeviceId::default());
        assert_eq!(serialize(&event)["data"]["latitude"], json!(45.07));
    }
}

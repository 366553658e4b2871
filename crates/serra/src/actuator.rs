use core::fmt;

use serde::{Serialize, Serializer};

/// All [`Actuator`]s driven by a device.
pub const ALL_ACTUATORS: &[Actuator] = &[
    Actuator::Fan,
    Actuator::Lamp,
    Actuator::Pump,
    Actuator::Valve,
];

/// An actuator wired to a device relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Actuator {
    /// Ventilation fan.
    Fan,
    /// Grow lamp.
    Lamp,
    /// Irrigation pump.
    Pump,
    /// Irrigation valve.
    Valve,
}

impl Actuator {
    /// Returns the [`Actuator`] name, which is also its field name in
    /// every message payload.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Fan => "fan",
            Self::Lamp => "lamp",
            Self::Pump => "pump",
            Self::Valve => "valve",
        }
    }
}

impl fmt::Display for Actuator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.name().fmt(f)
    }
}

/// The value of a single actuator relay.
///
/// On the wire a [`Switch`] is the bare integer `0` or `1`. Any other value
/// is rejected while decoding.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum Switch {
    /// Relay open.
    #[default]
    Off,
    /// Relay closed.
    On,
}

impl Switch {
    /// Creates a [`Switch`] from its wire value.
    #[must_use]
    pub const fn from_value(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Off),
            1 => Some(Self::On),
            _ => None,
        }
    }

    /// Returns the wire value of the [`Switch`].
    #[must_use]
    pub const fn value(self) -> u8 {
        match self {
            Self::Off => 0,
            Self::On => 1,
        }
    }

    /// Whether the relay is closed.
    #[must_use]
    pub const fn is_on(self) -> bool {
        matches!(self, Self::On)
    }
}

impl From<bool> for Switch {
    fn from(on: bool) -> Self {
        if on { Self::On } else { Self::Off }
    }
}

impl fmt::Display for Switch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.value().fmt(f)
    }
}

impl Serialize for Switch {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(self.value())
    }
}

#[cfg(feature = "deserialize")]
impl<'de> serde::Deserialize<'de> for Switch {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = u64::deserialize(deserializer)?;
        u8::try_from(value)
            .ok()
            .and_then(Self::from_value)
            .ok_or_else(|| {
                serde::de::Error::invalid_value(
                    serde::de::Unexpected::Unsigned(value),
                    &"the integer 0 or 1",
                )
            })
    }
}

/// The complete configuration of the four actuators of a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[cfg_attr(feature = "deserialize", derive(serde::Deserialize))]
pub struct ActuatorState {
    /// Fan relay.
    pub fan: Switch,
    /// Lamp relay.
    pub lamp: Switch,
    /// Pump relay.
    pub pump: Switch,
    /// Valve relay.
    pub valve: Switch,
}

impl Default for ActuatorState {
    // A freshly installed greenhouse keeps air moving and everything else off.
    fn default() -> Self {
        Self {
            fan: Switch::On,
            lamp: Switch::Off,
            pump: Switch::Off,
            valve: Switch::Off,
        }
    }
}

impl ActuatorState {
    /// Creates an [`ActuatorState`] with all actuators off.
    #[must_use]
    pub const fn off() -> Self {
        Self {
            fan: Switch::Off,
            lamp: Switch::Off,
            pump: Switch::Off,
            valve: Switch::Off,
        }
    }

    /// Returns the value of an [`Actuator`].
    #[must_use]
    pub const fn get(&self, actuator: Actuator) -> Switch {
        match actuator {
            Actuator::Fan => self.fan,
            Actuator::Lamp => self.lamp,
            Actuator::Pump => self.pump,
            Actuator::Valve => self.valve,
        }
    }

    /// Sets the value of an [`Actuator`].
    #[must_use]
    pub const fn set(mut self, actuator: Actuator, value: Switch) -> Self {
        *self.slot(actuator) = value;
        self
    }

    /// Overwrites the actuators present in the [`ActuatorPatch`], leaving the
    /// others untouched.
    ///
    /// Returns the sub-patch of the actuators whose value actually changed.
    pub fn apply(&mut self, patch: &ActuatorPatch) -> ActuatorPatch {
        let mut changed = ActuatorPatch::empty();
        for (actuator, value) in patch.iter() {
            let slot = self.slot(actuator);
            if *slot != value {
                *slot = value;
                changed = changed.set(actuator, value);
            }
        }
        changed
    }

    const fn slot(&mut self, actuator: Actuator) -> &mut Switch {
        match actuator {
            Actuator::Fan => &mut self.fan,
            Actuator::Lamp => &mut self.lamp,
            Actuator::Pump => &mut self.pump,
            Actuator::Valve => &mut self.valve,
        }
    }
}

impl fmt::Display for ActuatorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "fan={} lamp={} pump={} valve={}",
            self.fan, self.lamp, self.pump, self.valve
        )
    }
}

/// A partial [`ActuatorState`].
///
/// Operators send a patch to change only some actuators and devices report
/// a patch when only some relays moved. Absent actuators are left untouched
/// and are not serialized. Unknown fields are ignored while decoding.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
#[cfg_attr(feature = "deserialize", derive(serde::Deserialize))]
pub struct ActuatorPatch {
    /// Fan relay.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub fan: Option<Switch>,
    /// Lamp relay.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub lamp: Option<Switch>,
    /// Pump relay.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub pump: Option<Switch>,
    /// Valve relay.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub valve: Option<Switch>,
}

impl ActuatorPatch {
    /// Creates an empty [`ActuatorPatch`].
    #[must_use]
    pub const fn empty() -> Self {
        Self {
            fan: None,
            lamp: None,
            pump: None,
            valve: None,
        }
    }

    /// Sets the value of an [`Actuator`].
    #[must_use]
    pub const fn set(mut self, actuator: Actuator, value: Switch) -> Self {
        match actuator {
            Actuator::Fan => self.fan = Some(value),
            Actuator::Lamp => self.lamp = Some(value),
            Actuator::Pump => self.pump = Some(value),
            Actuator::Valve => self.valve = Some(value),
        }
        self
    }

    /// Returns the value of an [`Actuator`], if present.
    #[must_use]
    pub const fn get(&self, actuator: Actuator) -> Option<Switch> {
        match actuator {
            Actuator::Fan => self.fan,
            Actuator::Lamp => self.lamp,
            Actuator::Pump => self.pump,
            Actuator::Valve => self.valve,
        }
    }

    /// Checks whether no actuator is present.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.fan.is_none() && self.lamp.is_none() && self.pump.is_none() && self.valve.is_none()
    }

    /// Returns an iterator over the present actuators and their values.
    pub fn iter(&self) -> impl Iterator<Item = (Actuator, Switch)> + '_ {
        ALL_ACTUATORS
            .iter()
            .filter_map(|actuator| self.get(*actuator).map(|value| (*actuator, value)))
    }
}

impl From<ActuatorState> for ActuatorPatch {
    fn from(state: ActuatorState) -> Self {
        Self {
            fan: Some(state.fan),
            lamp: Some(state.lamp),
            pump: Some(state.pump),
            valve: Some(state.valve),
        }
    }
}

#[cfg(test)]
#[cfg(feature = "deserialize")]
mod tests {
    use serde_json::json;

    use crate::{deserialize, serialize};

    use super::{ALL_ACTUATORS, Actuator, ActuatorPatch, ActuatorState, Switch};

    #[test]
    fn test_switch() {
        assert_eq!(serialize(Switch::On), json!(1));
        assert_eq!(serialize(Switch::Off), json!(0));
        assert_eq!(deserialize::<Switch>(json!(1)), Switch::On);
        assert_eq!(Switch::from_value(2), None);

        // Out of range and non-integer values are rejected.
        assert!(serde_json::from_value::<Switch>(json!(2)).is_err());
        assert!(serde_json::from_value::<Switch>(json!(-1)).is_err());
        assert!(serde_json::from_value::<Switch>(json!("1")).is_err());
        assert!(serde_json::from_value::<Switch>(json!(true)).is_err());
    }

    #[test]
    fn test_default_state() {
        let state = ActuatorState::default();

        assert_eq!(
            serialize(state),
            json!({"fan": 1, "lamp": 0, "pump": 0, "valve": 0})
        );
    }

    #[test]
    fn test_patch_serialization() {
        let patch = ActuatorPatch::empty().set(Actuator::Fan, Switch::On);
        assert_eq!(serialize(patch), json!({"fan": 1}));

        // Unknown fields are ignored.
        let patch = deserialize::<ActuatorPatch>(json!({"lamp": 1, "heater": 1}));
        assert_eq!(patch, ActuatorPatch::empty().set(Actuator::Lamp, Switch::On));

        assert!(deserialize::<ActuatorPatch>(json!({"heater": 1})).is_empty());
        assert!(serde_json::from_value::<ActuatorPatch>(json!({"pump": 3})).is_err());
    }

    #[test]
    fn test_apply_returns_changed_fields() {
        let mut state = ActuatorState::off();

        let patch = ActuatorPatch::empty()
            .set(Actuator::Fan, Switch::On)
            .set(Actuator::Lamp, Switch::Off);

        let changed = state.apply(&patch);

        assert_eq!(changed, ActuatorPatch::empty().set(Actuator::Fan, Switch::On));
        assert_eq!(state, ActuatorState::off().set(Actuator::Fan, Switch::On));

        // Applying the same patch again changes nothing.
        assert!(state.apply(&patch).is_empty());
    }

    #[test]
    fn test_partial_apply_keeps_other_fields() {
        let mut state = ActuatorState::off().set(Actuator::Fan, Switch::On);

        let _ = state.apply(&deserialize::<ActuatorPatch>(json!({"lamp": 1})));

        assert_eq!(
            serialize(state),
            json!({"fan": 1, "lamp": 1, "pump": 0, "valve": 0})
        );
    }

    #[test]
    fn test_full_snapshot() {
        let state = ActuatorState::default();
        let patch = ActuatorPatch::from(state);

        assert_eq!(patch.iter().count(), ALL_ACTUATORS.len());

        let mut other = ActuatorState::off();
        let _ = other.apply(&patch);
        assert_eq!(other, state);
    }
}

use alloc::format;
use alloc::string::String;
use alloc::vec::Vec;

use core::fmt;

use serde::Serialize;

use crate::device::DeviceId;

/// Canonical suffix of the command topic.
pub const COMMAND: &str = "control/command";
/// Suffix of the command topic listened to by legacy firmware.
pub const LEGACY_COMMAND: &str = "relay/command";

/// All command topic suffixes.
///
/// Every command is published on each of them, so that firmware built
/// against either naming receives it.
pub const COMMAND_SUFFIXES: &[&str] = &[COMMAND, LEGACY_COMMAND];

/// Canonical suffix of the reported-state topic.
pub const REPORTED_STATE: &str = "state/relay";

// Inbound suffixes and their classification.
//
// The reported-state aliases come from older firmware revisions and are
// treated exactly as the canonical topic.
const INBOUND: &[(&str, TopicKind)] = &[
    (REPORTED_STATE, TopicKind::ReportedState),
    ("relay/state", TopicKind::ReportedState),
    ("control/ack", TopicKind::ReportedState),
    ("temperature", TopicKind::SensorReading(SensorKind::Temperature)),
    ("humidity", TopicKind::SensorReading(SensorKind::Humidity)),
    ("soil", TopicKind::SensorReading(SensorKind::Soil)),
    ("gps", TopicKind::GpsFix),
    ("status", TopicKind::DeviceStatus),
];

/// A topic for message publication over the network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[cfg_attr(feature = "deserialize", derive(serde::Deserialize))]
pub struct Topic(String);

impl Topic {
    /// Creates a [`Topic`] for a device.
    #[must_use]
    pub fn new(device: &DeviceId, suffix: &str) -> Self {
        Self(format!("{device}/{suffix}"))
    }

    /// Returns the [`Topic`] as a [`&str`].
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Sensor kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[cfg_attr(feature = "deserialize", derive(serde::Deserialize))]
#[serde(rename_all = "camelCase")]
pub enum SensorKind {
    /// Air temperature.
    Temperature,
    /// Air humidity.
    Humidity,
    /// Soil moisture.
    Soil,
}

impl SensorKind {
    /// Returns the [`SensorKind`] name.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Temperature => "temperature",
            Self::Humidity => "humidity",
            Self::Soil => "soil",
        }
    }
}

impl fmt::Display for SensorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.name().fmt(f)
    }
}

/// The logical kind of an inbound topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TopicKind {
    /// A sensor reading.
    SensorReading(SensorKind),
    /// The actuator state reported by the device hardware.
    ReportedState,
    /// A `GPS` fix.
    GpsFix,
    /// A device status message.
    DeviceStatus,
    /// Any other topic.
    Unrecognized,
}

/// An inbound topic split into its device and its logical kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classified {
    /// The device the topic belongs to, if the topic has a valid device
    /// segment.
    pub device: Option<DeviceId>,
    /// Topic kind.
    pub kind: TopicKind,
}

impl Classified {
    const fn unrecognized() -> Self {
        Self {
            device: None,
            kind: TopicKind::Unrecognized,
        }
    }
}

/// Classifies an inbound topic.
///
/// A topic is recognized only when it has the `<device>/<suffix>` form and
/// its suffix is a known inbound suffix.
#[must_use]
pub fn classify(topic: &str) -> Classified {
    let Some((device, suffix)) = topic.split_once('/') else {
        return Classified::unrecognized();
    };

    let Some(device) = DeviceId::new(device) else {
        return Classified::unrecognized();
    };

    let kind = INBOUND
        .iter()
        .find_map(|(known, kind)| (*known == suffix).then_some(*kind))
        .unwrap_or(TopicKind::Unrecognized);

    Classified {
        device: Some(device),
        kind,
    }
}

/// Returns the subscription filters covering every inbound topic of every
/// device.
#[must_use]
pub fn subscriptions() -> Vec<String> {
    INBOUND
        .iter()
        .map(|(suffix, _)| format!("+/{suffix}"))
        .collect()
}

/// Returns all command topics of a device.
#[must_use]
pub fn command_topics(device: &DeviceId) -> Vec<Topic> {
    COMMAND_SUFFIXES
        .iter()
        .map(|suffix| Topic::new(device, suffix))
        .collect()
}

#[cfg(test)]
mod tests {
    use alloc::vec;

    use crate::device::DeviceId;

    use super::{SensorKind, TopicKind, classify, command_topics, subscriptions};

    fn kind(topic: &str) -> TopicKind {
        classify(topic).kind
    }

    #[test]
    fn test_reported_state_aliases() {
        for topic in [
            "greenhouse/state/relay",
            "greenhouse/relay/state",
            "greenhouse/control/ack",
        ] {
            let classified = classify(topic);
            assert_eq!(classified.kind, TopicKind::ReportedState);
            assert_eq!(classified.device, Some(DeviceId::default()));
        }
    }

    #[test]
    fn test_telemetry_topics() {
        assert_eq!(
            kind("greenhouse/temperature"),
            TopicKind::SensorReading(SensorKind::Temperature)
        );
        assert_eq!(
            kind("north/humidity"),
            TopicKind::SensorReading(SensorKind::Humidity)
        );
        assert_eq!(
            kind("north/soil"),
            TopicKind::SensorReading(SensorKind::Soil)
        );
        assert_eq!(kind("north/gps"), TopicKind::GpsFix);
        assert_eq!(kind("north/status"), TopicKind::DeviceStatus);
    }

    #[test]
    fn test_unrecognized_topics() {
        // Commands are outbound only.
        assert_eq!(kind("greenhouse/control/command"), TopicKind::Unrecognized);
        assert_eq!(kind("greenhouse/pressure"), TopicKind::Unrecognized);
        assert_eq!(kind("greenhouse"), TopicKind::Unrecognized);
        assert_eq!(classify("/state/relay").device, None);
        assert_eq!(kind("greenhouse/state/relay/extra"), TopicKind::Unrecognized);
    }

    #[test]
    fn test_command_topics() {
        let topics = command_topics(&DeviceId::default());
        let topics: alloc::vec::Vec<&str> = topics.iter().map(|topic| topic.as_str()).collect();

        assert_eq!(
            topics,
            vec!["greenhouse/control/command", "greenhouse/relay/command"]
        );
    }

    #[test]
    fn test_subscriptions_are_classified() {
        let filters = subscriptions();
        assert_eq!(filters.len(), 8);

        for filter in filters {
            let topic = filter.replacen('+', "greenhouse", 1);
            assert_ne!(kind(&topic), TopicKind::Unrecognized, "{topic}");
        }
    }
}

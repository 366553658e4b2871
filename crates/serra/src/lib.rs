//! The communication vocabulary shared by a `serra` controller and the
//! firmware of its greenhouse devices.
//!
//! This crate provides APIs to:
//!
//! - Encode and decode actuator states. A device drives four relays (a fan,
//!   a lamp, a pump, and a valve), each either off (`0`) or on (`1`).
//!   Complete states and partial patches share the same `JSON` shape, so a
//!   command sent to a device and the acknowledgement it reports back can
//!   carry any subset of the four actuators.
//! - Build and classify topics. Every topic of a device starts with its
//!   identifier, followed by a suffix which determines the logical kind of
//!   the message. Several suffixes may alias the same kind to stay
//!   compatible with older firmware.
//! - Describe the events broadcast to dashboards when the state of a device
//!   changes or when new telemetry arrives.
//!
//! A device can avoid importing deserialization functions by disabling the
//! `deserialize` feature at compile time.
//!
//! This crate can be compiled for both `std` and `no_std` environments.

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![no_std]

extern crate alloc;

/// Actuator states and patches.
pub mod actuator;
/// Device identifiers.
pub mod device;
/// Events broadcast to dashboards.
pub mod events;
/// Topic layout and classification.
pub mod topics;

#[cfg(test)]
#[cfg(feature = "deserialize")]
pub(crate) fn serialize<T: serde::Serialize>(value: T) -> serde_json::Value {
    serde_json::to_value(value).unwrap()
}

#[cfg(test)]
#[cfg(feature = "deserialize")]
pub(crate) fn deserialize<T: serde::de::DeserializeOwned>(value: serde_json::Value) -> T {
    serde_json::from_value(value).unwrap()
}

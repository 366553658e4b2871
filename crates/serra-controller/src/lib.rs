//! The `serra-controller` library crate provides a set of APIs to keep the
//! actuators of greenhouse devices in the state requested by operators.
//!
//! Devices are reached through an `MQTT` broker, which can lose, duplicate,
//! and reorder messages. For this reason, the desired state of a device is
//! never assumed to be applied until the device reports it back.
//!
//! Core functionalities of this crate include:
//!
//! - Accepting desired-state patches and turning each of them into a
//!   command, identified by a strictly increasing number
//! - Publishing commands and retrying them at a fixed interval until the
//!   device acknowledges them or the retries run out
//! - Storing the desired and reported states of each device, either in
//!   memory or in an embedded database
//! - Broadcasting state transitions and live telemetry to dashboards
//!
//! To optimize system resource usage, `serra-controller` leverages `tokio`
//! as an asynchronous executor: submissions, inbound messages, and retry
//! timers of different devices are processed concurrently, while those of
//! the same device are serialized.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

/// The message bus connecting the controller to devices.
pub mod bus;
/// Controller configurations.
pub mod config;
/// A controller for greenhouse devices.
pub mod controller;
/// The reconciliation engine.
pub mod engine;
/// Error management.
pub mod error;
/// Best-effort broadcasting of events to dashboards.
pub mod fanout;
/// The control record of a device.
pub mod record;
/// Control record stores.
pub mod store;

mod dispatch;
mod scheduler;

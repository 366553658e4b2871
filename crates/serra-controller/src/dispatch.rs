use std::sync::Arc;

use chrono::Utc;

use hashbrown::HashMap;

use serra::actuator::ActuatorPatch;
use serra::device::DeviceId;
use serra::events::{ControlEvent, GpsFix, GpsUpdate};
use serra::topics::{self, Classified, SensorKind, TopicKind};

use tokio::sync::RwLock;

use tokio_util::sync::CancellationToken;

use tracing::{debug, error, info, warn};

use crate::bus::{InboundMessage, Publisher};
use crate::engine::Reconciler;
use crate::error::{Error, Result};
use crate::fanout::FanOut;
use crate::store::ControlStore;

// Decodes a reported actuator state.
//
// The payload must be a `JSON` object. Unknown fields are ignored, while
// actuator values other than `0` and `1` are rejected.
pub(crate) fn decode_reported(payload: &[u8]) -> Result<ActuatorPatch> {
    let value: serde_json::Value = serde_json::from_slice(payload)?;
    if !value.is_object() {
        return Err(Error::malformed("The reported state is not a JSON object"));
    }
    Ok(serde_json::from_value(value)?)
}

// Decodes a sensor reading sent as a plain decimal number.
pub(crate) fn decode_reading(payload: &[u8]) -> Result<f64> {
    let text = std::str::from_utf8(payload).map_err(|e| Error::malformed(e.to_string()))?;
    let text = text.trim();

    let value = text
        .parse::<f64>()
        .map_err(|e| Error::malformed(format!("`{text}` is not a number: {e}")))?;

    if !value.is_finite() {
        return Err(Error::malformed(format!("`{text}` is not a finite number")));
    }

    Ok(value)
}

pub(crate) fn decode_gps(payload: &[u8]) -> Result<GpsFix> {
    Ok(serde_json::from_slice(payload)?)
}

/// The latest telemetry received from devices.
#[derive(Debug, Clone, Default)]
pub(crate) struct Telemetry {
    gps: Arc<RwLock<HashMap<DeviceId, GpsUpdate>>>,
}

impl Telemetry {
    pub(crate) async fn latest_gps(&self, device: &DeviceId) -> Option<GpsUpdate> {
        self.gps.read().await.get(device).cloned()
    }

    async fn update_gps(&self, update: GpsUpdate) {
        let _ = self.gps.write().await.insert(update.device.clone(), update);
    }
}

// Routes inbound messages to a handler for each topic kind.
pub(crate) struct Dispatcher<S, P> {
    reconciler: Reconciler<S, P>,
    fanout: FanOut,
    telemetry: Telemetry,
}

impl<S: ControlStore, P: Publisher> Dispatcher<S, P> {
    pub(crate) const fn new(
        reconciler: Reconciler<S, P>,
        fanout: FanOut,
        telemetry: Telemetry,
    ) -> Self {
        Self {
            reconciler,
            fanout,
            telemetry,
        }
    }

    // Dispatches inbound messages one at a time until the token is cancelled
    // or the bus is closed.
    pub(crate) async fn run(
        self,
        inbound: flume::Receiver<InboundMessage>,
        cancellation_token: CancellationToken,
    ) {
        loop {
            tokio::select! {
                () = cancellation_token.cancelled() => { break; }
                message = inbound.recv_async() => match message {
                    Ok(message) => self.dispatch(message).await,
                    Err(_) => {
                        debug!("The bus has been closed, stop dispatching");
                        break;
                    }
                }
            }
        }
    }

    pub(crate) async fn dispatch(&self, message: InboundMessage) {
        let Classified { device, kind } = topics::classify(&message.topic);

        let Some(device) = device else {
            debug!("Topic `{}` has no device, discard it", message.topic);
            return;
        };

        match kind {
            TopicKind::ReportedState => self.reported_state(&device, &message.payload).await,
            TopicKind::SensorReading(sensor) => self.sensor_reading(device, sensor, &message.payload),
            TopicKind::GpsFix => self.gps_fix(device, &message.payload).await,
            TopicKind::DeviceStatus => info!(
                "Device `{device}` status: {}",
                String::from_utf8_lossy(&message.payload)
            ),
            TopicKind::Unrecognized => debug!("Unrecognized topic `{}`, discard it", message.topic),
        }
    }

    async fn reported_state(&self, device: &DeviceId, payload: &[u8]) {
        let patch = match decode_reported(payload) {
            Ok(patch) => patch,
            Err(e) => {
                warn!("Discarding the reported state of `{device}`: {e}");
                return;
            }
        };

        if let Err(e) = self.reconciler.report(device, &patch).await {
            error!("Impossible to apply the reported state of `{device}`: {e}");
        }
    }

    fn sensor_reading(&self, device: DeviceId, sensor: SensorKind, payload: &[u8]) {
        match decode_reading(payload) {
            Ok(value) => self.fanout.emit(ControlEvent::sensor(
                device,
                sensor,
                value,
                Utc::now().timestamp_millis(),
            )),
            Err(e) => warn!("Discarding the {sensor} reading of `{device}`: {e}"),
        }
    }

    async fn gps_fix(&self, device: DeviceId, payload: &[u8]) {
        let fix = match decode_gps(payload) {
            Ok(fix) => fix,
            Err(e) => {
                warn!("Discarding the GPS fix of `{device}`: {e}");
                return;
            }
        };

        let update = GpsUpdate {
            device,
            fix,
            timestamp: Utc::now().timestamp_millis(),
        };
        self.telemetry.update_gps(update.clone()).await;
        self.fanout.emit(ControlEvent::GpsUpdate(update));
    }
}

#[cfg(test)]
mod tests {
    use serra::actuator::{Actuator, ActuatorPatch, ActuatorState, Switch};
    use serra::device::DeviceId;
    use serra::events::{ControlEvent, GpsFix};
    use serra::topics::SensorKind;

    use tokio::sync::broadcast::Receiver;

    use tokio_util::sync::CancellationToken;

    use crate::bus::InboundMessage;
    use crate::config::ReconcileConfig;
    use crate::engine::Reconciler;
    use crate::error::ErrorKind;
    use crate::fanout::FanOut;
    use crate::store::MemoryStore;
    use crate::tests::{MockPublisher, baseline_store, drain};

    use super::{Dispatcher, Telemetry, decode_gps, decode_reading, decode_reported};

    type TestDispatcher = Dispatcher<MemoryStore, MockPublisher>;

    async fn dispatcher() -> (TestDispatcher, Receiver<ControlEvent>) {
        let fanout = FanOut::new(64);
        let events = fanout.subscribe();
        let reconciler = Reconciler::new(
            baseline_store().await,
            MockPublisher::new(),
            fanout.clone(),
            ReconcileConfig::new(),
        );
        (
            Dispatcher::new(reconciler, fanout, Telemetry::default()),
            events,
        )
    }

    #[test]
    fn reported_state_decoding() {
        assert_eq!(
            decode_reported(br#"{"fan": 1, "pump": 0, "rssi": -70}"#),
            Ok(ActuatorPatch::empty()
                .set(Actuator::Fan, Switch::On)
                .set(Actuator::Pump, Switch::Off))
        );

        for payload in [
            &b"not-json"[..],
            b"[1, 0]",
            b"1",
            br#"{"fan": 2}"#,
            br#"{"fan": "on"}"#,
        ] {
            assert_eq!(
                decode_reported(payload).map_err(|e| e.kind()),
                Err(ErrorKind::MalformedMessage)
            );
        }
    }

    #[test]
    fn reading_decoding() {
        assert_eq!(decode_reading(b" 23.5\n"), Ok(23.5));
        assert_eq!(decode_reading(b"-4"), Ok(-4.0));

        for payload in [&b"warm"[..], b"", b"NaN", b"inf", &[0xff_u8, 0xfe][..]] {
            assert_eq!(
                decode_reading(payload).map_err(|e| e.kind()),
                Err(ErrorKind::MalformedMessage)
            );
        }
    }

    #[test]
    fn gps_decoding() {
        assert_eq!(
            decode_gps(br#"{"latitude": 45.07, "longitude": 7.68, "altitude": 239.0}"#),
            Ok(GpsFix {
                latitude: 45.07,
                longitude: 7.68,
                altitude: 239.0,
            })
        );
        assert!(decode_gps(br#"{"latitude": 45.07}"#).is_err());
    }

    #[tokio::test]
    async fn malformed_reported_state_is_dropped() {
        let (dispatcher, mut events) = dispatcher().await;
        let device = DeviceId::default();
        let before = dispatcher.reconciler.record(&device).await.unwrap();

        dispatcher
            .dispatch(InboundMessage::new("greenhouse/state/relay", "not-json"))
            .await;
        dispatcher
            .dispatch(InboundMessage::new("greenhouse/state/relay", r#"{"fan": 5}"#))
            .await;

        assert_eq!(dispatcher.reconciler.record(&device).await.unwrap(), before);
        assert!(drain(&mut events).is_empty());
    }

    #[tokio::test]
    async fn reported_state_aliases() {
        let (dispatcher, mut events) = dispatcher().await;
        let device = DeviceId::default();

        dispatcher
            .dispatch(InboundMessage::new("greenhouse/relay/state", r#"{"lamp": 1}"#))
            .await;
        dispatcher
            .dispatch(InboundMessage::new("greenhouse/control/ack", r#"{"valve": 1}"#))
            .await;
        dispatcher
            .dispatch(InboundMessage::new("greenhouse/state/relay", r#"{"lamp": 0}"#))
            .await;

        let reported = ActuatorState::off().set(Actuator::Valve, Switch::On);
        assert_eq!(
            dispatcher.reconciler.record(&device).await.unwrap().reported,
            reported
        );

        let events = drain(&mut events);
        assert_eq!(events.len(), 3);
        assert_eq!(events[2], ControlEvent::relay_state(device, reported));
    }

    #[tokio::test]
    async fn telemetry_is_forwarded() {
        let (dispatcher, mut events) = dispatcher().await;
        let device = DeviceId::new("north-wing").unwrap();

        dispatcher
            .dispatch(InboundMessage::new("north-wing/humidity", "61.2"))
            .await;
        dispatcher
            .dispatch(InboundMessage::new("north-wing/soil", "dry"))
            .await;
        dispatcher
            .dispatch(InboundMessage::new(
                "north-wing/gps",
                r#"{"latitude": 45.07, "longitude": 7.68, "altitude": 239.0}"#,
            ))
            .await;

        let events = drain(&mut events);
        assert_eq!(events.len(), 2);

        let ControlEvent::SensorUpdate(ref reading) = events[0] else {
            panic!("Expected a sensor update");
        };
        assert_eq!(reading.device, device);
        assert_eq!(reading.sensor_type, SensorKind::Humidity);
        assert_eq!(reading.value, 61.2);

        let ControlEvent::GpsUpdate(ref update) = events[1] else {
            panic!("Expected a GPS update");
        };
        assert_eq!(
            dispatcher.telemetry.latest_gps(&device).await.as_ref(),
            Some(update)
        );
        assert_eq!(
            dispatcher.telemetry.latest_gps(&DeviceId::default()).await,
            None
        );
    }

    #[tokio::test]
    async fn other_topics_are_ignored() {
        let (dispatcher, mut events) = dispatcher().await;

        for topic in ["greenhouse/status", "greenhouse/unknown", "no-device", "/soil"] {
            dispatcher.dispatch(InboundMessage::new(topic, "1")).await;
        }

        assert!(drain(&mut events).is_empty());
    }

    #[tokio::test]
    async fn run_until_cancelled() {
        let (dispatcher, mut events) = dispatcher().await;
        let (sender, receiver) = flume::bounded(4);
        let token = CancellationToken::new();

        let task = tokio::spawn(dispatcher.run(receiver, token.clone()));

        sender
            .send_async(InboundMessage::new("greenhouse/temperature", "21"))
            .await
            .unwrap();

        let event = events.recv().await.unwrap();
        assert_eq!(event.name(), "sensor_update");

        token.cancel();
        task.await.unwrap();
    }
}

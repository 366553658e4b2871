use serra::actuator::ActuatorPatch;
use serra::device::DeviceId;
use serra::events::{ControlEvent, GpsUpdate};

use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use tokio_util::sync::CancellationToken;

use tracing::{error, info};

use crate::bus::{Bus, InboundMessage, MqttPublisher, Publisher};
use crate::config::{BusConfig, ReconcileConfig};
use crate::dispatch::{Dispatcher, Telemetry};
use crate::engine::Reconciler;
use crate::error::{Error, Result};
use crate::fanout::FanOut;
use crate::record::ControlRecord;
use crate::store::{ControlStore, MemoryStore};

/// A controller for greenhouse devices.
///
/// It accepts the desired states submitted by operators, reconciles them
/// with the states reported by devices over the message bus, and broadcasts
/// every state transition and telemetry reading to dashboards.
///
/// All background tasks run until [`Controller::shutdown`] is called.
pub struct Controller<S: ControlStore = MemoryStore, P: Publisher = MqttPublisher> {
    reconciler: Reconciler<S, P>,
    fanout: FanOut,
    telemetry: Telemetry,
    cancellation_token: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl<S: ControlStore> Controller<S, MqttPublisher> {
    /// Starts a [`Controller`] connected to an `MQTT` broker.
    ///
    /// The broker connection is established in background and renewed
    /// whenever it drops.
    ///
    /// # Errors
    ///
    /// One of the configurations is invalid.
    ///
    /// # Panics
    ///
    /// The function is called outside of a `tokio` runtime.
    pub fn start(bus: BusConfig, reconcile: ReconcileConfig, store: S) -> Result<Self> {
        bus.validate()?;
        reconcile.validate()?;

        let cancellation_token = CancellationToken::new();
        let Bus {
            publisher,
            inbound,
            handle,
        } = Bus::start(&bus, cancellation_token.child_token());

        let mut controller = Self::build(
            store,
            publisher,
            inbound,
            reconcile,
            bus.events_capacity,
            cancellation_token,
        )?;
        controller.tasks.push(handle);

        Ok(controller)
    }
}

impl<S: ControlStore, P: Publisher> Controller<S, P> {
    /// Starts a [`Controller`] on a custom message bus.
    ///
    /// Commands are sent through the given [`Publisher`], while the messages
    /// received on the `inbound` channel are dispatched as if they came from
    /// the broker.
    ///
    /// # Errors
    ///
    /// The configuration is invalid or the event capacity is zero.
    ///
    /// # Panics
    ///
    /// The function is called outside of a `tokio` runtime.
    pub fn with_bus(
        store: S,
        publisher: P,
        inbound: flume::Receiver<InboundMessage>,
        reconcile: ReconcileConfig,
        events_capacity: usize,
    ) -> Result<Self> {
        Self::build(
            store,
            publisher,
            inbound,
            reconcile,
            events_capacity,
            CancellationToken::new(),
        )
    }

    fn build(
        store: S,
        publisher: P,
        inbound: flume::Receiver<InboundMessage>,
        reconcile: ReconcileConfig,
        events_capacity: usize,
        cancellation_token: CancellationToken,
    ) -> Result<Self> {
        reconcile.validate()?;
        if events_capacity == 0 {
            return Err(Error::config("The event capacity must be greater than zero"));
        }

        let fanout = FanOut::new(events_capacity);
        let telemetry = Telemetry::default();
        let reconciler = Reconciler::new(store, publisher, fanout.clone(), reconcile);

        let dispatcher = Dispatcher::new(reconciler.clone(), fanout.clone(), telemetry.clone());
        let dispatch_task = tokio::spawn(dispatcher.run(inbound, cancellation_token.child_token()));

        info!(
            "Controller started: {} retries every {:?}",
            reconcile.limit(),
            reconcile.delay()
        );

        Ok(Self {
            reconciler,
            fanout,
            telemetry,
            cancellation_token,
            tasks: vec![dispatch_task],
        })
    }

    /// Submits a desired-state patch for a device and returns the
    /// identifier of the new command.
    ///
    /// The function returns as soon as the command has been persisted and
    /// published, without waiting for the device acknowledgement.
    ///
    /// # Errors
    ///
    /// The patch does not contain any actuator, or the device record cannot
    /// be loaded or saved.
    pub async fn submit(&self, device: &DeviceId, patch: &ActuatorPatch) -> Result<u64> {
        self.reconciler.submit(device, patch).await
    }

    /// Returns the control record of a device.
    ///
    /// # Errors
    ///
    /// The device record cannot be loaded.
    pub async fn control(&self, device: &DeviceId) -> Result<ControlRecord> {
        self.reconciler.record(device).await
    }

    /// Returns the latest `GPS` fix received from a device, if any.
    pub async fn latest_gps(&self, device: &DeviceId) -> Option<GpsUpdate> {
        self.telemetry.latest_gps(device).await
    }

    /// Subscribes to all events emitted from now on.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ControlEvent> {
        self.fanout.subscribe()
    }

    /// Subscribes to all events emitted from now on as a stream.
    #[cfg(feature = "stream")]
    pub fn events(&self) -> impl futures_util::Stream<Item = ControlEvent> + Send + use<S, P> {
        self.fanout.stream()
    }

    /// Stops the controller.
    ///
    /// The bus connection and the dispatching of inbound messages are
    /// stopped, and the pending retries are dropped. Pending commands stay
    /// pending in the store.
    pub async fn shutdown(self) {
        self.cancellation_token.cancel();
        self.reconciler.cancel_all().await;

        for task in self.tasks {
            if let Err(e) = task.await {
                error!("Controller task failed: {e}");
            }
        }

        info!("Controller stopped");
    }
}

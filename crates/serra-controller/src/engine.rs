use std::sync::Arc;

use bytes::Bytes;

use chrono::Utc;

use hashbrown::HashMap;

use serra::actuator::ActuatorPatch;
use serra::device::DeviceId;
use serra::events::ControlEvent;
use serra::topics;

use tokio::sync::Mutex;

use tokio_util::sync::CancellationToken;

use tracing::{debug, error, info, trace, warn};

use crate::bus::Publisher;
use crate::config::ReconcileConfig;
use crate::error::{Error, Result};
use crate::fanout::FanOut;
use crate::record::ControlRecord;
use crate::scheduler::RetryTimer;
use crate::store::ControlStore;

// The session of a device.
//
// Its lock serializes every read-modify-write of the device record and
// guards the only retry timer the device can have.
#[derive(Debug, Default)]
struct DeviceSession {
    retry: Mutex<Option<RetryTimer>>,
}

struct Inner<S, P> {
    store: S,
    publisher: P,
    fanout: FanOut,
    config: ReconcileConfig,
    sessions: Mutex<HashMap<DeviceId, Arc<DeviceSession>>>,
}

/// The reconciliation engine.
///
/// It drives the actuators of each device towards the desired state
/// submitted by operators. Every accepted patch starts a new command cycle:
/// the command is published on the bus and retried until the device reports
/// the desired state back, or until the retries are exhausted.
///
/// A device runs at most one command cycle at a time. Submitting a patch
/// while a command is still pending silently abandons the previous cycle.
pub struct Reconciler<S, P> {
    inner: Arc<Inner<S, P>>,
}

impl<S, P> Clone for Reconciler<S, P> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S: ControlStore, P: Publisher> Reconciler<S, P> {
    /// Creates a [`Reconciler`].
    #[must_use]
    pub fn new(store: S, publisher: P, fanout: FanOut, config: ReconcileConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                publisher,
                fanout,
                config,
                sessions: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Submits a desired-state patch for a device and returns the
    /// identifier of the new command.
    ///
    /// The command is published and its retry timer armed before returning,
    /// without waiting for the device acknowledgement. Publishing failures
    /// are only logged: the retry timer takes care of them.
    ///
    /// # Errors
    ///
    /// The patch does not contain any actuator, or the device record cannot
    /// be loaded or saved.
    pub async fn submit(&self, device: &DeviceId, patch: &ActuatorPatch) -> Result<u64> {
        if patch.is_empty() {
            return Err(Error::validation(
                "The patch does not contain any actuator",
            ));
        }

        let session = self.inner.session(device).await;
        let mut retry = session.retry.lock().await;

        let mut record = self.inner.store.load(device).await?;
        let changed = record.desired.apply(patch);
        record.command_id += 1;
        record.pending_command = true;
        record.attempts = 0;
        record.touch();
        self.inner.store.save(&record).await?;

        if let Some(timer) = retry.take() {
            debug!(
                "Command {} for `{device}` superseded by command {}",
                timer.command_id(),
                record.command_id
            );
            timer.cancel();
        }

        info!(
            "Command {} for `{device}`: desired {}",
            record.command_id, record.desired
        );

        // The device must receive a command even when nothing changed.
        let command = if changed.is_empty() {
            ActuatorPatch::from(record.desired)
        } else {
            changed
        };
        self.inner.publish(device, &command).await;

        self.inner.fanout.emit(ControlEvent::update(
            device.clone(),
            ActuatorPatch::from(record.desired),
            record.command_id,
            true,
        ));

        *retry = Some(self.inner.arm(device.clone(), record.command_id));

        Ok(record.command_id)
    }

    /// Applies the actuator state reported by a device and returns the
    /// updated record.
    ///
    /// Only the actuators present in the patch are overwritten. When the
    /// reported state matches the desired one, a pending or exhausted
    /// command converges.
    ///
    /// # Errors
    ///
    /// The device record cannot be loaded or saved.
    pub async fn report(&self, device: &DeviceId, patch: &ActuatorPatch) -> Result<ControlRecord> {
        let session = self.inner.session(device).await;
        let mut retry = session.retry.lock().await;

        let mut record = self.inner.store.load(device).await?;
        let _ = record.reported.apply(patch);
        record.reported_at = Utc::now();

        let converged =
            (record.pending_command || record.attempts > 0) && record.is_converged();
        if converged {
            record.converge();
        } else {
            record.touch();
        }
        self.inner.store.save(&record).await?;

        if converged {
            if let Some(timer) = retry.take() {
                timer.cancel();
            }
            info!(
                "Device `{device}` applied command {}: {}",
                record.command_id, record.reported
            );
            self.inner.fanout.emit(ControlEvent::update(
                device.clone(),
                ActuatorPatch::from(record.reported),
                record.command_id,
                false,
            ));
        }

        self.inner
            .fanout
            .emit(ControlEvent::relay_state(device.clone(), record.reported));

        Ok(record)
    }

    /// Returns the current record of a device, creating the default one if
    /// the device has none.
    ///
    /// # Errors
    ///
    /// The device record cannot be loaded.
    pub async fn record(&self, device: &DeviceId) -> Result<ControlRecord> {
        self.inner.store.load(device).await
    }

    /// Cancels every armed retry timer and waits for their tasks.
    pub async fn cancel_all(&self) {
        let sessions: Vec<Arc<DeviceSession>> =
            self.inner.sessions.lock().await.values().cloned().collect();

        let mut handles = Vec::new();
        for session in sessions {
            if let Some(timer) = session.retry.lock().await.take() {
                handles.push(timer.stop());
            }
        }

        for handle in handles {
            if let Err(e) = handle.await {
                error!("Retry timer task failed: {e}");
            }
        }
    }
}

impl<S: ControlStore, P: Publisher> Inner<S, P> {
    async fn session(&self, device: &DeviceId) -> Arc<DeviceSession> {
        let mut sessions = self.sessions.lock().await;
        Arc::clone(sessions.entry(device.clone()).or_default())
    }

    // Publishes a command on every command topic of a device.
    async fn publish(&self, device: &DeviceId, command: &ActuatorPatch) {
        let payload = match serde_json::to_vec(command) {
            Ok(payload) => Bytes::from(payload),
            Err(e) => {
                error!("Impossible to encode the command for `{device}`: {e}");
                return;
            }
        };

        for topic in topics::command_topics(device) {
            if let Err(e) = self.publisher.publish(topic.as_str(), payload.clone()).await {
                warn!("Command for `{device}` not delivered on `{topic}`: {e}");
            }
        }
    }

    fn arm(self: &Arc<Self>, device: DeviceId, command_id: u64) -> RetryTimer {
        let inner = Arc::clone(self);
        let target = device.clone();
        RetryTimer::arm(device, command_id, self.config.retry_delay, move |token| {
            async move { inner.retry_due(&target, command_id, &token).await }
        })
    }

    async fn retry_due(self: &Arc<Self>, device: &DeviceId, command_id: u64, token: &CancellationToken) {
        let session = self.session(device).await;
        let mut retry = session.retry.lock().await;

        // The timer was cancelled while waiting for the session.
        if token.is_cancelled() {
            trace!("Retry timer of command {command_id} for `{device}` cancelled");
            return;
        }

        // The fired timer is the one owned by the session.
        drop(retry.take());

        match self.step(device, command_id).await {
            Ok(next) => *retry = next,
            Err(e) => error!("Retry of command {command_id} for `{device}` aborted: {e}"),
        }
    }

    // Advances a command cycle when its retry timer fires, returning the
    // timer of the next retry, if any.
    async fn step(self: &Arc<Self>, device: &DeviceId, command_id: u64) -> Result<Option<RetryTimer>> {
        let mut record = self.store.load(device).await?;

        if record.command_id != command_id || !record.pending_command {
            trace!("Command {command_id} for `{device}` is no longer pending");
            return Ok(None);
        }

        if record.is_converged() {
            record.converge();
            self.store.save(&record).await?;
            self.fanout.emit(ControlEvent::update(
                device.clone(),
                ActuatorPatch::from(record.desired),
                command_id,
                false,
            ));
            return Ok(None);
        }

        if record.attempts < self.config.retry_limit {
            record.attempts += 1;
            record.touch();
            self.store.save(&record).await?;

            info!(
                "Retrying command {command_id} for `{device}` ({}/{})",
                record.attempts, self.config.retry_limit
            );
            self.publish(device, &ActuatorPatch::from(record.desired))
                .await;

            return Ok(Some(self.arm(device.clone(), command_id)));
        }

        record.pending_command = false;
        record.touch();
        self.store.save(&record).await?;

        let event = ControlEvent::mismatch(
            device.clone(),
            record.desired,
            record.reported,
            command_id,
            record.attempts,
        );
        warn!("{event}");
        self.fanout.emit(event);

        Ok(None)
    }
}

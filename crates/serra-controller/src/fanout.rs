use serra::events::ControlEvent;

use tokio::sync::broadcast;

use tracing::{debug, trace};

/// A best-effort broadcaster of [`ControlEvent`]s to dashboards.
///
/// Every event is delivered at most once to the subscribers connected when
/// it is emitted. There are no acknowledgements and no replay: subscribers
/// connecting later never see it, and subscribers lagging behind the channel
/// capacity lose the oldest events.
#[derive(Debug, Clone)]
pub struct FanOut {
    sender: broadcast::Sender<ControlEvent>,
}

impl FanOut {
    /// Creates a [`FanOut`] holding at most `capacity` events for each
    /// subscriber.
    ///
    /// # Panics
    ///
    /// The capacity is zero.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Emits an event without waiting for any subscriber.
    pub fn emit(&self, event: ControlEvent) {
        debug!("Emitting `{}` {event}", event.name());
        if let Err(e) = self.sender.send(event) {
            trace!("No dashboard subscribed, `{}` discarded", e.0.name());
        }
    }

    /// Subscribes to all events emitted from now on.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ControlEvent> {
        self.sender.subscribe()
    }

    /// Returns the number of current subscribers.
    #[must_use]
    pub fn subscribers(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Subscribes to all events emitted from now on as a stream.
    ///
    /// Events lost because the subscriber lagged behind are skipped.
    #[cfg(feature = "stream")]
    pub fn stream(&self) -> impl futures_util::Stream<Item = ControlEvent> + Send + use<> {
        use futures_util::StreamExt;
        use tokio_stream::wrappers::BroadcastStream;

        BroadcastStream::new(self.subscribe()).filter_map(|event| {
            futures_util::future::ready(match event {
                Ok(event) => Some(event),
                Err(e) => {
                    tracing::warn!("Dashboard stream lagged behind: {e}");
                    None
                }
            })
        })
    }
}

use std::time::Duration;

use bytes::Bytes;

use serra::topics;

use rumqttc::v5::{
    AsyncClient, ConnectionError, Event, EventLoop, MqttOptions,
    mqttbytes::QoS,
    mqttbytes::v5::{Filter, Packet},
};

use tokio::task::JoinHandle;

use tokio_util::sync::CancellationToken;

use tracing::{debug, error, info, trace, warn};

use crate::config::BusConfig;
use crate::error::{Error, Result};

// Time to wait before polling the broker again after a connection error.
const RECONNECT_DELAY: Duration = Duration::from_secs(1);

/// A message received from the bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    /// The topic the message was published on.
    pub topic: String,
    /// Raw message payload.
    pub payload: Bytes,
}

impl InboundMessage {
    /// Creates an [`InboundMessage`].
    #[must_use]
    pub fn new(topic: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
        }
    }
}

/// The publishing side of a message bus.
pub trait Publisher: Send + Sync + 'static {
    /// Publishes a payload on a topic.
    ///
    /// # Errors
    ///
    /// The message cannot be handed over to the bus.
    fn publish(&self, topic: &str, payload: Bytes) -> impl Future<Output = Result<()>> + Send;
}

/// A [`Publisher`] for an `MQTT` broker.
#[derive(Debug, Clone)]
pub struct MqttPublisher {
    client: AsyncClient,
}

// Messages are queued without waiting: while the broker is unreachable the
// request queue is not drained, and a full queue is a transport error.
impl Publisher for MqttPublisher {
    async fn publish(&self, topic: &str, payload: Bytes) -> Result<()> {
        self.client
            .try_publish(topic, QoS::AtLeastOnce, false, payload)
            .map_err(|e| {
                error!("Impossible to publish on topic {topic}: {e}");
                Error::from(e)
            })
    }
}

// The outcome of a single poll of the broker connection.
#[derive(Debug)]
enum Polled {
    Message(InboundMessage),
    Connected,
    Disconnected,
    Ignored,
}

#[inline]
fn parse_event(event: std::result::Result<Event, ConnectionError>) -> Polled {
    let event = match event {
        Ok(event) => event,
        Err(e) => {
            error!("Connection to the broker failed, retrying: {e}");
            return Polled::Disconnected;
        }
    };

    let packet = match event {
        Event::Incoming(packet) => packet,
        Event::Outgoing(outgoing) => {
            trace!("Outgoing packet, discard it: {:?}", outgoing);
            return Polled::Ignored;
        }
    };

    match packet {
        Packet::ConnAck(_) => Polled::Connected,
        Packet::Publish(publish) => match String::from_utf8(publish.topic.to_vec()) {
            Ok(topic) => Polled::Message(InboundMessage::new(topic, publish.payload)),
            Err(e) => {
                warn!("Topic is not valid UTF-8, discard the message: {e}");
                Polled::Ignored
            }
        },
        packet => {
            trace!("Packet ignored: {:?}", packet);
            Polled::Ignored
        }
    }
}

fn subscription_filters() -> Vec<Filter> {
    topics::subscriptions()
        .into_iter()
        .map(|path| Filter::new(path, QoS::AtLeastOnce))
        .collect()
}

async fn run_bus(
    client: AsyncClient,
    mut eventloop: EventLoop,
    cancellation_token: CancellationToken,
    sender: flume::Sender<InboundMessage>,
) {
    loop {
        let polled = tokio::select! {
            // Use the cancellation token to stop the loop
            () = cancellation_token.cancelled() => { break; }
            // Poll the `MQTT` event coming from the network
            event = eventloop.poll() => parse_event(event),
        };

        match polled {
            Polled::Message(message) => {
                if let Err(e) = sender.send_async(message).await {
                    error!("Stop receiving messages from the bus: {e}");
                    break;
                }
            }
            // Subscriptions do not survive a reconnection, renew them
            // on every connection acknowledgement.
            Polled::Connected => {
                info!("Connected to the broker");
                if let Err(e) = client.try_subscribe_many(subscription_filters()) {
                    error!("Impossible to subscribe to the device topics: {e}");
                }
            }
            Polled::Disconnected => {
                tokio::select! {
                    () = cancellation_token.cancelled() => { break; }
                    () = tokio::time::sleep(RECONNECT_DELAY) => {}
                }
            }
            Polled::Ignored => {}
        }
    }

    if let Err(e) = client.try_disconnect() {
        debug!("Broker disconnection request not sent: {e}");
    }
    drop(sender);
    drop(eventloop);
}

/// A running connection to an `MQTT` broker.
pub(crate) struct Bus {
    pub(crate) publisher: MqttPublisher,
    pub(crate) inbound: flume::Receiver<InboundMessage>,
    pub(crate) handle: JoinHandle<()>,
}

impl Bus {
    // Spawns the task polling the broker.
    //
    // Inbound messages are forwarded to the returned receiver, whose buffer
    // holds at most `channel_capacity` messages.
    pub(crate) fn start(config: &BusConfig, cancellation_token: CancellationToken) -> Self {
        let mut mqttoptions =
            MqttOptions::new(config.client_id.as_str(), config.host.as_str(), config.port);
        let _ = mqttoptions.set_keep_alive(config.keep_alive);

        let (client, eventloop) = AsyncClient::new(mqttoptions, config.channel_capacity);
        let (sender, inbound) = flume::bounded(config.channel_capacity);

        info!(
            "Connecting to the broker at {}:{} as `{}`",
            config.host, config.port, config.client_id
        );

        let handle = tokio::spawn(run_bus(
            client.clone(),
            eventloop,
            cancellation_token,
            sender,
        ));

        Self {
            publisher: MqttPublisher { client },
            inbound,
            handle,
        }
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::{InboundMessage, subscription_filters};

    #[test]
    fn inbound_message() {
        let message = InboundMessage::new("greenhouse/state/relay", &b"{\"fan\":1}"[..]);

        assert_eq!(message.topic, "greenhouse/state/relay");
        assert_eq!(message.payload, Bytes::from_static(b"{\"fan\":1}"));
    }

    #[test]
    fn filters_cover_all_inbound_topics() {
        let filters = subscription_filters();
        let paths: Vec<&str> = filters.iter().map(|filter| filter.path.as_str()).collect();

        assert!(paths.contains(&"+/state/relay"));
        assert!(paths.contains(&"+/relay/state"));
        assert!(paths.contains(&"+/control/ack"));
        assert!(paths.contains(&"+/temperature"));
        assert!(!paths.iter().any(|path| path.ends_with("command")));
    }
}

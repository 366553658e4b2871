use std::time::Duration;

use crate::error::{Error, Result};

// Number of retries of a command before declaring it exhausted.
const RETRY_LIMIT: u32 = 3;

// Time waited for a device acknowledgement before retrying a command.
const RETRY_DELAY: Duration = Duration::from_millis(1500);

// Default broker port.
const BROKER_PORT: u16 = 1883;

// Keep alive time to send `pingreq` to broker when the connection is idle.
const KEEP_ALIVE_TIME: Duration = Duration::from_secs(5);

// The capacity of the bounded channels between the bus and its consumers.
const CHANNEL_CAPACITY: usize = 64;

// Capacity of the dashboard event channel.
const EVENTS_CAPACITY: usize = 128;

/// Reconciliation configuration.
///
/// A command is retried every `retry_delay` until the device acknowledges
/// it or until `retry_limit` retries have been sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileConfig {
    pub(crate) retry_limit: u32,
    pub(crate) retry_delay: Duration,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl ReconcileConfig {
    /// Creates a [`ReconcileConfig`] with 3 retries spaced 1.5 seconds apart.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            retry_limit: RETRY_LIMIT,
            retry_delay: RETRY_DELAY,
        }
    }

    /// Sets the maximum number of retries of a command.
    ///
    /// The limit must be at least `1`, an exhausted command is recognized
    /// by its retries.
    #[must_use]
    pub const fn retry_limit(mut self, retry_limit: u32) -> Self {
        self.retry_limit = retry_limit;
        self
    }

    /// Sets the delay between two retries of a command.
    #[must_use]
    pub const fn retry_delay(mut self, retry_delay: Duration) -> Self {
        self.retry_delay = retry_delay;
        self
    }

    /// Returns the maximum number of retries of a command.
    #[must_use]
    pub const fn limit(&self) -> u32 {
        self.retry_limit
    }

    /// Returns the delay between two retries of a command.
    #[must_use]
    pub const fn delay(&self) -> Duration {
        self.retry_delay
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.retry_limit == 0 {
            return Err(Error::config("A command must be retried at least once"));
        }
        if self.retry_delay.is_zero() {
            return Err(Error::config("The retry delay must be greater than zero"));
        }
        Ok(())
    }
}

/// Message bus configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusConfig {
    pub(crate) client_id: String,
    pub(crate) host: String,
    pub(crate) port: u16,
    pub(crate) keep_alive: Duration,
    pub(crate) channel_capacity: usize,
    pub(crate) events_capacity: usize,
}

impl BusConfig {
    /// Creates a [`BusConfig`] for the broker at the given host, listening
    /// on port `1883`.
    #[must_use]
    pub fn new(client_id: impl Into<String>, host: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            host: host.into(),
            port: BROKER_PORT,
            keep_alive: KEEP_ALIVE_TIME,
            channel_capacity: CHANNEL_CAPACITY,
            events_capacity: EVENTS_CAPACITY,
        }
    }

    /// Sets the broker port.
    #[must_use]
    pub const fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Sets the keep alive interval of the broker connection.
    #[must_use]
    pub const fn keep_alive(mut self, keep_alive: Duration) -> Self {
        self.keep_alive = keep_alive;
        self
    }

    /// Sets how many inbound messages can wait to be dispatched.
    ///
    /// When the buffer is full, the bus stops polling the broker until a
    /// message is consumed.
    #[must_use]
    pub const fn channel_capacity(mut self, channel_capacity: usize) -> Self {
        self.channel_capacity = channel_capacity;
        self
    }

    /// Sets how many dashboard events a slow subscriber can lag behind
    /// before losing the oldest ones.
    #[must_use]
    pub const fn events_capacity(mut self, events_capacity: usize) -> Self {
        self.events_capacity = events_capacity;
        self
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.client_id.is_empty() {
            return Err(Error::config("The bus client identifier cannot be empty"));
        }
        if self.host.is_empty() {
            return Err(Error::config("The broker host cannot be empty"));
        }
        if self.channel_capacity == 0 || self.events_capacity == 0 {
            return Err(Error::config("Channel capacities must be greater than zero"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use crate::error::{Error, ErrorKind};

    use super::{BusConfig, ReconcileConfig};

    #[test]
    fn default_reconcile_config() {
        let config = ReconcileConfig::default();

        assert_eq!(config.limit(), 3);
        assert_eq!(config.delay(), Duration::from_millis(1500));
        assert_eq!(config.validate(), Ok(()));
    }

    #[test]
    fn invalid_reconcile_config() {
        let config = ReconcileConfig::new().retry_delay(Duration::ZERO);

        assert_eq!(
            config.validate(),
            Err(Error::config("The retry delay must be greater than zero"))
        );

        let config = ReconcileConfig::new().retry_limit(0);

        assert_eq!(
            config.validate(),
            Err(Error::config("A command must be retried at least once"))
        );
        assert_eq!(ReconcileConfig::new().retry_limit(1).validate(), Ok(()));
    }

    #[test]
    fn bus_config() {
        let config = BusConfig::new("serra", "localhost").port(1884);

        assert_eq!(config.port, 1884);
        assert_eq!(config.validate(), Ok(()));

        assert_eq!(
            BusConfig::new("", "localhost").validate().map_err(|e| e.kind()),
            Err(ErrorKind::Config)
        );
        assert_eq!(
            BusConfig::new("serra", "localhost")
                .channel_capacity(0)
                .validate()
                .map_err(|e| e.kind()),
            Err(ErrorKind::Config)
        );
    }
}

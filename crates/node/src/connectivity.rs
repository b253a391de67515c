//! Broker connection lifecycle.
//!
//! ## State machine
//!
//! ```text
//!                 tick, retry due                   broker ack
//! Disconnected ───────────────────▶ Connecting ───────────────────▶ Connected
//!      ▲                                │                              │
//!      └────── failure (retry_at = now + delay) ◀──────────────────────┘
//! ```
//!
//! The manager never blocks. A failed attempt schedules the next one and
//! returns; the control loop keeps ticking actuators and debouncers in the
//! meantime. Reconnection is retried forever at a fixed interval unless a
//! bounded backoff is configured.
//!
//! Every successful connection resubscribes all inbound topics, since the
//! broker session is not assumed to survive a drop.

use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::channels::{Channel, ChannelBindings};
use crate::error::LinkError;

/// Delay between attempts when none is configured.
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_secs(5);

// ---------------------------------------------------------------------------
// Transport seam
// ---------------------------------------------------------------------------

/// The messaging client underneath the manager. Calls must not block; a
/// client that cannot accept a request right now returns an error.
pub trait Transport {
    fn subscribe(&mut self, topic: &str) -> Result<(), LinkError>;
    fn publish(&mut self, topic: &str, payload: &str) -> Result<(), LinkError>;
}

// ---------------------------------------------------------------------------
// Retry policy
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryPolicy {
    /// Same delay after every failure, retried indefinitely.
    Fixed(Duration),
    /// Doubling delay starting at `initial`, capped at `max`. Still retried
    /// indefinitely; only the spacing changes.
    Backoff { initial: Duration, max: Duration },
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::Fixed(DEFAULT_RETRY_INTERVAL)
    }
}

impl RetryPolicy {
    /// Delay before the next attempt, given how many attempts in a row have
    /// failed (1 after the first failure).
    pub fn delay(&self, consecutive_failures: u32) -> Duration {
        match *self {
            Self::Fixed(d) => d,
            Self::Backoff { initial, max } => {
                let shift = consecutive_failures.saturating_sub(1).min(16);
                initial.saturating_mul(1 << shift).min(max)
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Manager
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

pub struct ConnectivityManager<T> {
    transport: T,
    bindings: ChannelBindings,
    policy: RetryPolicy,
    state: ConnectionState,
    /// Total connection attempts since startup.
    retries: u64,
    consecutive_failures: u32,
    last_attempt: Option<Instant>,
    retry_at: Option<Instant>,
}

impl<T: Transport> ConnectivityManager<T> {
    pub fn new(transport: T, bindings: ChannelBindings, policy: RetryPolicy) -> Self {
        Self {
            transport,
            bindings,
            policy,
            state: ConnectionState::Disconnected,
            retries: 0,
            consecutive_failures: 0,
            last_attempt: None,
            retry_at: None,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    pub fn retries(&self) -> u64 {
        self.retries
    }

    pub fn last_attempt(&self) -> Option<Instant> {
        self.last_attempt
    }

    pub fn retry_at(&self) -> Option<Instant> {
        self.retry_at
    }

    pub fn bindings(&self) -> &ChannelBindings {
        &self.bindings
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Whether the underlying client should be driven (polled) right now.
    /// `false` while waiting out a retry delay.
    pub fn wants_io(&self) -> bool {
        self.state != ConnectionState::Disconnected
    }

    /// Start a new attempt if disconnected and the retry delay has passed.
    /// Returns `true` when an attempt was started.
    pub fn tick(&mut self, now: Instant) -> bool {
        if self.state != ConnectionState::Disconnected {
            return false;
        }
        if self.retry_at.is_some_and(|at| now < at) {
            return false;
        }
        self.begin_attempt(now);
        true
    }

    fn begin_attempt(&mut self, now: Instant) {
        self.state = ConnectionState::Connecting;
        self.retries += 1;
        self.last_attempt = Some(now);
        self.retry_at = None;
        debug!(attempt = self.retries, "connecting to broker");
    }

    /// The broker accepted the connection.
    pub fn on_connected(&mut self, now: Instant) {
        match self.state {
            ConnectionState::Connected => return,
            // The client got ahead of our tick; record the attempt so the
            // state still passes through Connecting.
            ConnectionState::Disconnected => self.begin_attempt(now),
            ConnectionState::Connecting => {}
        }
        self.state = ConnectionState::Connected;
        self.consecutive_failures = 0;
        info!(attempts = self.retries, "broker connected");

        for topic in self.bindings.subscriptions() {
            match self.transport.subscribe(topic) {
                Ok(()) => debug!(%topic, "subscribed"),
                Err(e) => warn!(%topic, "subscribe failed: {e}"),
            }
        }
    }

    /// The attempt failed or an established connection dropped.
    pub fn on_disconnected(&mut self, now: Instant, reason: &str) {
        if self.state == ConnectionState::Disconnected {
            return;
        }
        if self.state == ConnectionState::Connected {
            warn!("broker connection lost: {reason}");
        } else {
            warn!(attempt = self.retries, "broker connection failed: {reason}");
        }
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        let delay = self.policy.delay(self.consecutive_failures);
        self.state = ConnectionState::Disconnected;
        self.retry_at = Some(now + delay);
        info!(retry_in_ms = delay.as_millis() as u64, "reconnect scheduled");
    }

    /// Publish on a logical channel. Nothing is queued: a message sent
    /// while disconnected is lost.
    pub fn publish(&mut self, channel: Channel, payload: &str) -> Result<(), LinkError> {
        if self.state != ConnectionState::Connected {
            return Err(LinkError::NotConnected);
        }
        let topic = self
            .bindings
            .topic(channel)
            .ok_or(LinkError::Unbound(channel))?;
        self.transport.publish(topic, payload)
    }
}

// ---------------------------------------------------------------------------
// In-memory transport for tests
// ---------------------------------------------------------------------------

#[cfg(test)]
#[derive(Debug, Default)]
pub(crate) struct RecordingTransport {
    pub subscribed: Vec<String>,
    pub published: Vec<(String, String)>,
    pub reject: bool,
}

#[cfg(test)]
impl RecordingTransport {
    pub fn published_on(&self, topic: &str) -> Vec<&str> {
        self.published
            .iter()
            .filter(|(t, _)| t == topic)
            .map(|(_, p)| p.as_str())
            .collect()
    }
}

#[cfg(test)]
impl Transport for RecordingTransport {
    fn subscribe(&mut self, topic: &str) -> Result<(), LinkError> {
        if self.reject {
            return Err(LinkError::Transport("rejected".into()));
        }
        self.subscribed.push(topic.to_string());
        Ok(())
    }

    fn publish(&mut self, topic: &str, payload: &str) -> Result<(), LinkError> {
        if self.reject {
            return Err(LinkError::Transport("rejected".into()));
        }
        self.published.push((topic.to_string(), payload.to_string()));
        Ok(())
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn bindings() -> ChannelBindings {
        ChannelBindings::new([
            (Channel::Control, "mqtt/request"),
            (Channel::StatusResponse, "mqtt/response"),
            (Channel::ThresholdConfig, "arduino/Weather_threshold"),
            (Channel::SensorData, "arduino/Weather"),
        ])
    }

    fn manager() -> ConnectivityManager<RecordingTransport> {
        ConnectivityManager::new(
            RecordingTransport::default(),
            bindings(),
            RetryPolicy::default(),
        )
    }

    fn secs(n: u64) -> Duration {
        Duration::from_secs(n)
    }

    // -- Lifecycle ------------------------------------------------------------

    #[test]
    fn starts_disconnected_without_io() {
        let m = manager();
        assert_eq!(m.state(), ConnectionState::Disconnected);
        assert!(!m.wants_io());
        assert_eq!(m.retries(), 0);
    }

    #[test]
    fn first_tick_starts_attempt() {
        let t0 = Instant::now();
        let mut m = manager();
        assert!(m.tick(t0));
        assert_eq!(m.state(), ConnectionState::Connecting);
        assert!(m.wants_io());
        assert_eq!(m.retries(), 1);
        assert_eq!(m.last_attempt(), Some(t0));
        // Already connecting: further ticks do nothing.
        assert!(!m.tick(t0 + secs(1)));
        assert_eq!(m.retries(), 1);
    }

    #[test]
    fn connect_subscribes_inbound_topics() {
        let t0 = Instant::now();
        let mut m = manager();
        m.tick(t0);
        m.on_connected(t0);
        assert!(m.is_connected());
        assert_eq!(
            m.transport().subscribed,
            vec!["mqtt/request", "arduino/Weather_threshold"]
        );
    }

    #[test]
    fn connect_from_disconnected_passes_through_connecting() {
        let t0 = Instant::now();
        let mut m = manager();
        m.on_connected(t0);
        assert!(m.is_connected());
        assert_eq!(m.retries(), 1);
        assert_eq!(m.last_attempt(), Some(t0));
    }

    #[test]
    fn reconnect_resubscribes() {
        let t0 = Instant::now();
        let mut m = manager();
        m.tick(t0);
        m.on_connected(t0);
        m.on_disconnected(t0 + secs(10), "reset");
        m.tick(t0 + secs(15));
        m.on_connected(t0 + secs(15));
        assert_eq!(m.transport().subscribed.len(), 4);
    }

    #[test]
    fn subscribe_failure_is_not_fatal() {
        let t0 = Instant::now();
        let mut m = manager();
        m.transport_mut().reject = true;
        m.on_connected(t0);
        assert!(m.is_connected());
    }

    // -- Retry ----------------------------------------------------------------

    #[test]
    fn failure_waits_fixed_interval() {
        let t0 = Instant::now();
        let mut m = manager();
        m.tick(t0);
        m.on_disconnected(t0, "refused");
        assert_eq!(m.state(), ConnectionState::Disconnected);
        assert!(!m.wants_io());
        assert_eq!(m.retry_at(), Some(t0 + DEFAULT_RETRY_INTERVAL));

        assert!(!m.tick(t0 + secs(4)));
        assert_eq!(m.retries(), 1);
        assert!(m.tick(t0 + secs(5)));
        assert_eq!(m.retries(), 2);
    }

    #[test]
    fn fixed_policy_retries_forever_same_spacing() {
        let t0 = Instant::now();
        let mut m = manager();
        let mut now = t0;
        for attempt in 1..=50u64 {
            assert!(m.tick(now));
            assert_eq!(m.retries(), attempt);
            m.on_disconnected(now, "refused");
            assert_eq!(m.retry_at(), Some(now + secs(5)));
            now += secs(5);
        }
    }

    #[test]
    fn retry_counter_survives_success() {
        let t0 = Instant::now();
        let mut m = manager();
        m.tick(t0);
        m.on_disconnected(t0, "refused");
        m.tick(t0 + secs(5));
        m.on_connected(t0 + secs(5));
        assert_eq!(m.retries(), 2);
    }

    #[test]
    fn backoff_policy_doubles_and_caps() {
        let p = RetryPolicy::Backoff {
            initial: secs(1),
            max: secs(10),
        };
        assert_eq!(p.delay(1), secs(1));
        assert_eq!(p.delay(2), secs(2));
        assert_eq!(p.delay(3), secs(4));
        assert_eq!(p.delay(4), secs(8));
        assert_eq!(p.delay(5), secs(10));
        assert_eq!(p.delay(500), secs(10));
    }

    #[test]
    fn backoff_resets_after_success() {
        let t0 = Instant::now();
        let mut m = ConnectivityManager::new(
            RecordingTransport::default(),
            bindings(),
            RetryPolicy::Backoff {
                initial: secs(1),
                max: secs(60),
            },
        );
        m.tick(t0);
        m.on_disconnected(t0, "refused");
        m.tick(t0 + secs(1));
        m.on_disconnected(t0 + secs(1), "refused");
        assert_eq!(m.retry_at(), Some(t0 + secs(3)));
        m.tick(t0 + secs(3));
        m.on_connected(t0 + secs(3));
        m.on_disconnected(t0 + secs(100), "reset");
        assert_eq!(m.retry_at(), Some(t0 + secs(101)));
    }

    // -- Publish --------------------------------------------------------------

    #[test]
    fn publish_while_disconnected_is_not_connected() {
        let mut m = manager();
        assert!(matches!(
            m.publish(Channel::SensorData, "x"),
            Err(LinkError::NotConnected)
        ));
        m.tick(Instant::now());
        assert!(matches!(
            m.publish(Channel::SensorData, "x"),
            Err(LinkError::NotConnected)
        ));
        assert!(m.transport().published.is_empty());
    }

    #[test]
    fn publish_routes_to_bound_topic() {
        let mut m = manager();
        m.on_connected(Instant::now());
        m.publish(Channel::SensorData, "Temperature: 24.0°C").unwrap();
        assert_eq!(
            m.transport().published_on("arduino/Weather"),
            vec!["Temperature: 24.0°C"]
        );
    }

    #[test]
    fn publish_on_unbound_channel_fails() {
        let mut m = manager();
        m.on_connected(Instant::now());
        assert!(matches!(
            m.publish(Channel::Alert, "x"),
            Err(LinkError::Unbound(Channel::Alert))
        ));
    }

    #[test]
    fn publish_is_not_queued_across_reconnect() {
        let t0 = Instant::now();
        let mut m = manager();
        m.on_connected(t0);
        m.on_disconnected(t0, "reset");
        let _ = m.publish(Channel::SensorData, "lost");
        m.tick(t0 + secs(5));
        m.on_connected(t0 + secs(5));
        assert!(m.transport().published.is_empty());
    }
}

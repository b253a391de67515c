//! rumqttc glue: client options, the [`Transport`] adapter and event
//! classification for the main loop.

use std::time::Duration;

use rumqttc::{AsyncClient, ConnectReturnCode, ConnectionError, Event, MqttOptions, Packet, QoS};

use crate::connectivity::Transport;
use crate::error::LinkError;

/// Requests buffered between the client handle and the event loop.
pub const CLIENT_CAPACITY: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerSettings {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub keep_alive: Duration,
    pub credentials: Option<(String, String)>,
}

pub fn client_id(node_id: &str) -> String {
    format!("iot-node-{node_id}")
}

pub fn options(settings: &BrokerSettings) -> MqttOptions {
    let mut opts = MqttOptions::new(&settings.client_id, &settings.host, settings.port);
    opts.set_keep_alive(settings.keep_alive);
    // Subscriptions are replayed by the connectivity manager on every connect.
    opts.set_clean_session(true);
    if let Some((user, pass)) = &settings.credentials {
        opts.set_credentials(user, pass);
    }
    opts
}

/// [`Transport`] over an rumqttc client handle. Uses the non-blocking
/// `try_*` calls: a full request queue is reported, never waited on.
pub struct MqttTransport {
    client: AsyncClient,
}

impl MqttTransport {
    pub fn new(client: AsyncClient) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &AsyncClient {
        &self.client
    }
}

impl Transport for MqttTransport {
    fn subscribe(&mut self, topic: &str) -> Result<(), LinkError> {
        self.client
            .try_subscribe(topic, QoS::AtLeastOnce)
            .map_err(|e| LinkError::Transport(e.to_string()))
    }

    fn publish(&mut self, topic: &str, payload: &str) -> Result<(), LinkError> {
        self.client
            .try_publish(topic, QoS::AtLeastOnce, false, payload.as_bytes().to_vec())
            .map_err(|e| LinkError::Transport(e.to_string()))
    }
}

// ---------------------------------------------------------------------------
// Event classification
// ---------------------------------------------------------------------------

/// What the control loop needs to know about one event-loop poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    Connected,
    Message { topic: String, payload: Vec<u8> },
    Disconnected(String),
    /// Pings, acks and outgoing traffic.
    Other,
}

pub fn classify(polled: Result<Event, ConnectionError>) -> LinkEvent {
    match polled {
        Ok(Event::Incoming(Packet::ConnAck(ack))) => {
            if ack.code == ConnectReturnCode::Success {
                LinkEvent::Connected
            } else {
                LinkEvent::Disconnected(format!("connection refused: {:?}", ack.code))
            }
        }
        Ok(Event::Incoming(Packet::Publish(p))) => LinkEvent::Message {
            topic: p.topic,
            payload: p.payload.to_vec(),
        },
        Ok(Event::Incoming(Packet::Disconnect)) => {
            LinkEvent::Disconnected("broker sent disconnect".into())
        }
        Ok(_) => LinkEvent::Other,
        Err(e) => LinkEvent::Disconnected(e.to_string()),
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use rumqttc::{ConnAck, Outgoing, Publish};

    fn settings() -> BrokerSettings {
        BrokerSettings {
            host: "127.0.0.1".into(),
            port: 1883,
            client_id: client_id("node-a"),
            keep_alive: Duration::from_secs(30),
            credentials: None,
        }
    }

    // -- options --------------------------------------------------------------

    #[test]
    fn client_id_includes_node() {
        assert_eq!(client_id("node-a"), "iot-node-node-a");
    }

    #[test]
    fn options_carry_broker_and_keep_alive() {
        let opts = options(&settings());
        assert_eq!(opts.broker_address(), ("127.0.0.1".to_string(), 1883));
        assert_eq!(opts.client_id(), "iot-node-node-a");
        assert_eq!(opts.keep_alive(), Duration::from_secs(30));
    }

    // -- classify -------------------------------------------------------------

    #[test]
    fn connack_success_is_connected() {
        let ev = Ok(Event::Incoming(Packet::ConnAck(ConnAck::new(
            ConnectReturnCode::Success,
            false,
        ))));
        assert_eq!(classify(ev), LinkEvent::Connected);
    }

    #[test]
    fn connack_refused_is_disconnected() {
        let ev = Ok(Event::Incoming(Packet::ConnAck(ConnAck::new(
            ConnectReturnCode::NotAuthorized,
            false,
        ))));
        assert!(matches!(classify(ev), LinkEvent::Disconnected(_)));
    }

    #[test]
    fn publish_becomes_message() {
        let p = Publish::new("mqtt/request", QoS::AtLeastOnce, "status_request");
        let ev = Ok(Event::Incoming(Packet::Publish(p)));
        assert_eq!(
            classify(ev),
            LinkEvent::Message {
                topic: "mqtt/request".into(),
                payload: b"status_request".to_vec(),
            }
        );
    }

    #[test]
    fn outgoing_traffic_is_other() {
        assert_eq!(
            classify(Ok(Event::Outgoing(Outgoing::PingReq))),
            LinkEvent::Other
        );
        assert_eq!(
            classify(Ok(Event::Incoming(Packet::PingResp))),
            LinkEvent::Other
        );
    }

    #[test]
    fn poll_error_is_disconnected() {
        let ev = Err(ConnectionError::RequestsDone);
        assert!(matches!(classify(ev), LinkEvent::Disconnected(_)));
    }

    #[tokio::test]
    async fn transport_queues_without_blocking() {
        let (client, _eventloop) = AsyncClient::new(options(&settings()), CLIENT_CAPACITY);
        let mut t = MqttTransport::new(client);
        t.subscribe("mqtt/request").unwrap();
        t.publish("mqtt/response", "Board : ESP32 Status : Connected")
            .unwrap();
    }
}

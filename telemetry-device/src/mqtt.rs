//! MQTT broker over `rumqttc`.
//!
//! Publishes use QoS 1; a publish completes when the matching PubAck
//! arrives. The event loop is driven inline, so nothing runs in the
//! background between calls.

use crate::config::BrokerConfig;
use crate::transport::{Broker, BrokerConnection, TransportError};
use async_trait::async_trait;
use rumqttc::{AsyncClient, ConnectReturnCode, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS};
use std::time::Duration;
use tokio::time::timeout;
use tracing::debug;

/// Queue depth between client handle and event loop.
const REQUEST_CHANNEL_CAPACITY: usize = 10;

pub struct MqttBroker {
    config: BrokerConfig,
    name: String,
}

impl MqttBroker {
    pub fn new(config: BrokerConfig) -> Self {
        let name = format!("mqtt://{}:{}", config.host, config.port);
        Self { config, name }
    }

    fn options(&self) -> MqttOptions {
        let config = &self.config;
        let mut options = MqttOptions::new(&config.client_id, &config.host, config.port);
        options.set_keep_alive(Duration::from_secs(config.keep_alive_secs));
        options
    }

    fn connect_error(&self, reason: impl ToString) -> TransportError {
        TransportError::Connect {
            broker: self.name.clone(),
            reason: reason.to_string(),
        }
    }
}

#[async_trait]
impl Broker for MqttBroker {
    fn name(&self) -> &str {
        &self.name
    }

    async fn connect(&self) -> Result<Box<dyn BrokerConnection>, TransportError> {
        let (client, mut eventloop) = AsyncClient::new(self.options(), REQUEST_CHANNEL_CAPACITY);
        let ack_timeout = self.config.ack_timeout();

        let handshake = async {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                        return if ack.code == ConnectReturnCode::Success {
                            Ok(())
                        } else {
                            Err(self.connect_error(format!("{:?}", ack.code)))
                        };
                    }
                    Ok(_) => continue,
                    Err(e) => return Err(self.connect_error(e)),
                }
            }
        };
        timeout(ack_timeout, handshake)
            .await
            .map_err(|_| self.connect_error("timed out waiting for ConnAck"))??;

        debug!(broker = %self.name, "MQTT session established");
        Ok(Box::new(MqttConnection {
            client,
            eventloop,
            ack_timeout,
            closed: false,
        }))
    }
}

struct MqttConnection {
    client: AsyncClient,
    eventloop: EventLoop,
    ack_timeout: Duration,
    closed: bool,
}

impl MqttConnection {
    async fn await_puback(&mut self) -> Result<(), TransportError> {
        let mut sent_pkid = None;
        loop {
            match self.eventloop.poll().await {
                Ok(Event::Outgoing(Outgoing::Publish(pkid))) => sent_pkid = Some(pkid),
                Ok(Event::Incoming(Packet::PubAck(ack))) if Some(ack.pkid) == sent_pkid => {
                    return Ok(());
                }
                Ok(_) => continue,
                Err(e) => return Err(TransportError::Publish(e.to_string())),
            }
        }
    }
}

#[async_trait]
impl BrokerConnection for MqttConnection {
    async fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<(), TransportError> {
        if self.closed {
            return Err(TransportError::Publish("connection closed".to_string()));
        }
        self.client
            .publish(topic, QoS::AtLeastOnce, false, payload.to_vec())
            .await
            .map_err(|e| TransportError::Publish(e.to_string()))?;

        timeout(self.ack_timeout, self.await_puback())
            .await
            .map_err(|_| TransportError::Timeout("PubAck"))?
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.client
            .disconnect()
            .await
            .map_err(|e| TransportError::Publish(e.to_string()))?;

        // Drive the loop until the Disconnect packet is written.
        let ack_timeout = self.ack_timeout;
        let eventloop = &mut self.eventloop;
        let flush = async move {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Outgoing(Outgoing::Disconnect)) | Err(_) => break,
                    Ok(_) => continue,
                }
            }
        };
        timeout(ack_timeout, flush)
            .await
            .map_err(|_| TransportError::Timeout("Disconnect"))
    }
}

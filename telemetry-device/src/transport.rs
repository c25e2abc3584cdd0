//! Pub/sub transport and publish latency reporting.
//!
//! A [`Publisher`] opens one broker connection per call, publishes the same
//! payload `attempts` times in sequence, and closes the connection before
//! returning, whatever the outcome.

use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("Connection to {broker} failed: {reason}")]
    Connect { broker: String, reason: String },

    #[error("Publish failed: {0}")]
    Publish(String),

    #[error("Timed out waiting for {0}")]
    Timeout(&'static str),

    #[error("At least one publish attempt is required")]
    NoAttempts,

    #[error("Invalid topic: {0}")]
    InvalidTopic(String),
}

/// Broker topic `eth_<chain address>_<stream>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topic(String);

impl Topic {
    pub fn new(chain_address: &str, stream: &str) -> Result<Self, TransportError> {
        let reserved = |c: char| c.is_whitespace() || matches!(c, '/' | '+' | '#');
        for (name, part) in [("chain address", chain_address), ("stream", stream)] {
            if part.is_empty() {
                return Err(TransportError::InvalidTopic(format!("empty {}", name)));
            }
            if part.chars().any(reserved) {
                return Err(TransportError::InvalidTopic(format!("{} contains {:?}", name, part)));
            }
        }
        Ok(Self(format!("eth_{}_{}", chain_address, stream)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A message broker that hands out connections.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Broker name for logs (e.g. `"mqtt://host:1883"`).
    fn name(&self) -> &str;

    /// Open a connection. Implementations must not retry.
    async fn connect(&self) -> Result<Box<dyn BrokerConnection>, TransportError>;
}

/// One open broker connection.
#[async_trait]
pub trait BrokerConnection: Send {
    /// Publish and wait for the broker's acknowledgement.
    async fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<(), TransportError>;

    async fn close(&mut self) -> Result<(), TransportError>;
}

/// Publish that aborted the remaining attempts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishFailure {
    /// 1-based attempt number
    pub attempt: u32,
    pub reason: String,
}

/// Timing for one [`Publisher::publish`] call.
#[derive(Debug, Clone, PartialEq)]
pub struct PublishReport {
    pub topic: String,
    pub attempts_requested: u32,
    pub latencies: Vec<Duration>,
    pub failure: Option<PublishFailure>,
}

impl PublishReport {
    fn new(topic: &Topic, attempts_requested: u32) -> Self {
        Self {
            topic: topic.to_string(),
            attempts_requested,
            latencies: Vec::with_capacity(attempts_requested as usize),
            failure: None,
        }
    }

    pub fn completed(&self) -> u32 {
        self.latencies.len() as u32
    }

    pub fn total(&self) -> Duration {
        self.latencies.iter().sum()
    }

    /// Mean latency over completed attempts.
    pub fn average(&self) -> Option<Duration> {
        if self.latencies.is_empty() {
            None
        } else {
            Some(self.total() / self.completed())
        }
    }

    pub fn is_complete(&self) -> bool {
        self.failure.is_none() && self.completed() == self.attempts_requested
    }
}

pub struct Publisher {
    broker: Arc<dyn Broker>,
}

impl Publisher {
    pub fn new(broker: Arc<dyn Broker>) -> Self {
        Self { broker }
    }

    pub async fn publish(
        &self,
        payload: &[u8],
        topic: &Topic,
        attempts: u32,
    ) -> Result<PublishReport, TransportError> {
        if attempts == 0 {
            return Err(TransportError::NoAttempts);
        }

        let mut connection = self.broker.connect().await?;
        debug!(broker = self.broker.name(), topic = %topic, "Connected");

        let mut report = PublishReport::new(topic, attempts);
        for attempt in 1..=attempts {
            let started = Instant::now();
            match connection.publish(topic.as_str(), payload).await {
                Ok(()) => report.latencies.push(started.elapsed()),
                Err(e) => {
                    warn!(
                        topic = %topic,
                        attempt,
                        error = %e,
                        "Publish failed, aborting remaining attempts"
                    );
                    report.failure = Some(PublishFailure {
                        attempt,
                        reason: e.to_string(),
                    });
                    break;
                }
            }
        }

        if let Err(e) = connection.close().await {
            warn!(broker = self.broker.name(), error = %e, "Closing connection failed");
        }

        if let Some(average) = report.average() {
            info!(
                topic = %topic,
                completed = report.completed(),
                latency_ms = average.as_secs_f64() * 1000.0,
                "Average publish latency over {} attempts",
                report.completed()
            );
        }
        Ok(report)
    }
}

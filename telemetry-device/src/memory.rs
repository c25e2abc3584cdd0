//! In-process broker with latency and failure injection.
//!
//! Every connection is accounted for: opened, closed (explicitly or on drop)
//! and the peak number open at once.

use crate::transport::{Broker, BrokerConnection, TransportError};
use async_trait::async_trait;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;

/// A message the broker acknowledged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    pub acknowledged_at: Instant,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConnectionStats {
    pub opened: u64,
    pub closed: u64,
    pub open: usize,
    pub max_concurrent: usize,
}

#[derive(Debug, Default)]
struct State {
    refuse_connections: bool,
    fail_publish_at: Option<u64>,
    publish_calls: u64,
    stats: ConnectionStats,
    published: Vec<PublishedMessage>,
}

impl State {
    fn release(&mut self) {
        self.stats.open = self.stats.open.saturating_sub(1);
        self.stats.closed += 1;
    }
}

#[derive(Debug, Clone, Default)]
pub struct MemoryBroker {
    state: Arc<Mutex<State>>,
    latency: Duration,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay before each publish is acknowledged.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn refuse_connections(&self, refuse: bool) {
        self.lock().refuse_connections = refuse;
    }

    /// Fail the `n`-th publish (1-based, counted across connections).
    pub fn fail_publish_at(&self, n: u64) {
        self.lock().fail_publish_at = Some(n);
    }

    pub fn published(&self) -> Vec<PublishedMessage> {
        self.lock().published.clone()
    }

    pub fn stats(&self) -> ConnectionStats {
        self.lock().stats
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        lock(&self.state)
    }
}

fn lock(state: &Mutex<State>) -> MutexGuard<'_, State> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

#[async_trait]
impl Broker for MemoryBroker {
    fn name(&self) -> &str {
        "memory"
    }

    async fn connect(&self) -> Result<Box<dyn BrokerConnection>, TransportError> {
        let mut state = self.lock();
        if state.refuse_connections {
            return Err(TransportError::Connect {
                broker: "memory".to_string(),
                reason: "connection refused".to_string(),
            });
        }
        state.stats.opened += 1;
        state.stats.open += 1;
        state.stats.max_concurrent = state.stats.max_concurrent.max(state.stats.open);
        drop(state);

        Ok(Box::new(MemoryConnection {
            state: Arc::clone(&self.state),
            latency: self.latency,
            closed: false,
        }))
    }
}

struct MemoryConnection {
    state: Arc<Mutex<State>>,
    latency: Duration,
    closed: bool,
}

#[async_trait]
impl BrokerConnection for MemoryConnection {
    async fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<(), TransportError> {
        if self.closed {
            return Err(TransportError::Publish("connection closed".to_string()));
        }
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        let mut state = lock(&self.state);
        state.publish_calls += 1;
        if state.fail_publish_at == Some(state.publish_calls) {
            return Err(TransportError::Publish(format!(
                "injected failure on publish {}",
                state.publish_calls
            )));
        }
        state.published.push(PublishedMessage {
            topic: topic.to_string(),
            payload: payload.to_vec(),
            acknowledged_at: Instant::now(),
        });
        Ok(())
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        if !self.closed {
            self.closed = true;
            lock(&self.state).release();
        }
        Ok(())
    }
}

impl Drop for MemoryConnection {
    fn drop(&mut self) {
        if !self.closed {
            lock(&self.state).release();
        }
    }
}

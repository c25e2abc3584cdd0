//! Device session runtime.
//!
//! Three tasks share one [`SampleSlot`] and one [`CancellationToken`]:
//!
//! ```text
//! location ──writes──▶ SampleSlot ◀──snapshots── publish ──▶ Broker
//!                                                   ▲
//! watchdog ──cancel after session deadline──────────┘
//! ```
//!
//! The publish task only observes cancellation between cycles, so a publish
//! that has started always runs to completion. At most one publish completes
//! after cancellation: either the cycle that was in flight, or the final
//! attestation. The supervisor joins all three tasks before returning.

use crate::location::LocationSource;
use crate::transport::{Broker, Publisher, Topic};
use chrono::Utc;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use telemetry_core::{
    Attestor, AttestorSettings, CurvePoint, KeyPair, Layout, MessageEncoder, TripState,
    WireEncoding,
};
use thiserror::Error;
use tokio::sync::RwLock;
use tokio::task::JoinError;
use tokio::time::{interval, sleep, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// The latest trip state, written by the location task.
pub type SampleSlot = Arc<RwLock<Option<TripState>>>;

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("{task} task failed: {source}")]
    Task {
        task: &'static str,
        #[source]
        source: JoinError,
    },
}

#[derive(Debug, Clone)]
pub struct RuntimeSettings {
    pub location_refresh: Duration,
    /// `None` publishes only at the end of the session
    pub publish_interval: Option<Duration>,
    pub session_deadline: Duration,
    pub attempts_per_publish: u32,
    pub final_publish: bool,
    pub wire_encoding: WireEncoding,
    pub topic: Topic,
    pub layout: Layout,
    pub attestor: AttestorSettings,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LocationStats {
    pub fixes: u64,
    pub errors: u64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PublishStats {
    pub cycles: u64,
    /// Cycles skipped because no fix had been committed yet
    pub skipped: u64,
    pub envelopes_published: u64,
    pub attest_failures: u64,
    pub transport_failures: u64,
    pub last_average: Option<Duration>,
    pub final_published: bool,
    /// A periodic cycle was still publishing when the session ended, so it
    /// stood in for the final attestation
    pub final_superseded: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    pub public_key: CurvePoint,
    pub location: LocationStats,
    pub publish: PublishStats,
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "public key: ({}, {})", self.public_key.x(), self.public_key.y())?;
        writeln!(f, "fixes: {} ({} errors)", self.location.fixes, self.location.errors)?;
        write!(
            f,
            "publish cycles: {}, envelopes published: {}, failures: {} attest / {} transport",
            self.publish.cycles,
            self.publish.envelopes_published,
            self.publish.attest_failures,
            self.publish.transport_failures
        )?;
        if let Some(average) = self.publish.last_average {
            write!(f, ", last average latency: {:.3} s", average.as_secs_f64())?;
        }
        Ok(())
    }
}

pub struct DeviceRuntime {
    settings: RuntimeSettings,
    keys: KeyPair,
    broker: Arc<dyn Broker>,
    location: Box<dyn LocationSource>,
    slot: SampleSlot,
    cancel: CancellationToken,
}

impl DeviceRuntime {
    pub fn new(
        settings: RuntimeSettings,
        keys: KeyPair,
        broker: Arc<dyn Broker>,
        location: Box<dyn LocationSource>,
    ) -> Self {
        Self {
            settings,
            keys,
            broker,
            location,
            slot: Arc::new(RwLock::new(None)),
            cancel: CancellationToken::new(),
        }
    }

    /// Token that ends the session early when cancelled (e.g. on Ctrl-C).
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn sample_slot(&self) -> SampleSlot {
        Arc::clone(&self.slot)
    }

    /// Run the session to its deadline (or cancellation) and join all tasks.
    pub async fn run(self) -> Result<RunSummary, RuntimeError> {
        let public_key = self.keys.public_key();
        info!(
            topic = %self.settings.topic,
            broker = self.broker.name(),
            location = self.location.name(),
            deadline_secs = self.settings.session_deadline.as_secs(),
            "Starting device session"
        );

        let location = tokio::spawn(location_task(
            self.location,
            Arc::clone(&self.slot),
            self.settings.location_refresh,
            self.cancel.clone(),
        ));

        let publish_ctx = PublishContext {
            publisher: Publisher::new(Arc::clone(&self.broker)),
            keys: self.keys,
            slot: Arc::clone(&self.slot),
            settings: self.settings.clone(),
        };
        let publish = tokio::spawn(publish_task(publish_ctx, self.cancel.clone()));
        let deadline = self.settings.session_deadline;
        let watchdog = tokio::spawn(watchdog_task(deadline, self.cancel.clone()));

        let (location, publish, watchdog) = tokio::join!(location, publish, watchdog);
        watchdog.map_err(|source| RuntimeError::Task { task: "watchdog", source })?;
        let location = location.map_err(|source| RuntimeError::Task { task: "location", source })?;
        let publish = publish.map_err(|source| RuntimeError::Task { task: "publish", source })?;

        info!(
            fixes = location.fixes,
            published = publish.envelopes_published,
            "Device session finished"
        );
        Ok(RunSummary {
            public_key,
            location,
            publish,
        })
    }
}

async fn location_task(
    mut source: Box<dyn LocationSource>,
    slot: SampleSlot,
    refresh: Duration,
    cancel: CancellationToken,
) -> LocationStats {
    let mut stats = LocationStats::default();
    loop {
        let fix = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            fix = source.next_fix() => fix,
        };

        match fix {
            Ok(sample) => {
                let mut guard = slot.write().await;
                match guard.as_mut() {
                    Some(trip) => {
                        let segment = trip.advance(sample);
                        debug!(
                            segment_m = segment,
                            total_m = trip.distances.total_m(),
                            "Fix committed"
                        );
                    }
                    None => {
                        info!(device_id = %sample.device_id, "First fix, trip started");
                        *guard = Some(TripState::start(sample));
                    }
                }
                stats.fixes += 1;
            }
            Err(e) => {
                warn!(error = %e, "Location refresh failed");
                stats.errors += 1;
            }
        }

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = sleep(refresh) => {}
        }
    }
    stats
}

struct PublishContext {
    publisher: Publisher,
    keys: KeyPair,
    slot: SampleSlot,
    settings: RuntimeSettings,
}

enum CycleOutcome {
    Published,
    Skipped,
    AttestFailed,
    TransportFailed,
}

impl CycleOutcome {
    fn reached_broker(&self) -> bool {
        matches!(self, CycleOutcome::Published | CycleOutcome::TransportFailed)
    }
}

impl PublishContext {
    async fn cycle(&self, stats: &mut PublishStats) -> CycleOutcome {
        stats.cycles += 1;
        let snapshot = self.slot.read().await.clone();
        let Some(trip) = snapshot else {
            debug!("No fix yet, skipping publish");
            stats.skipped += 1;
            return CycleOutcome::Skipped;
        };

        // Fresh signing context per cycle; only the key pair is shared.
        let attestor = Attestor::new(
            self.keys.clone(),
            MessageEncoder::new(self.settings.layout.clone()),
            self.settings.attestor.clone(),
        );
        let wire = match attestor
            .envelope(&trip, Utc::now())
            .map_err(|e| e.to_string())
            .and_then(|envelope| {
                envelope
                    .to_wire(self.settings.wire_encoding)
                    .map_err(|e| e.to_string())
            })
        {
            Ok(wire) => wire,
            Err(e) => {
                error!(error = %e, device_id = %trip.current.device_id, "Attestation failed");
                stats.attest_failures += 1;
                return CycleOutcome::AttestFailed;
            }
        };

        match self
            .publisher
            .publish(&wire, &self.settings.topic, self.settings.attempts_per_publish)
            .await
        {
            Ok(report) => {
                stats.envelopes_published += u64::from(report.completed());
                stats.last_average = report.average().or(stats.last_average);
                if report.is_complete() {
                    CycleOutcome::Published
                } else {
                    stats.transport_failures += 1;
                    CycleOutcome::TransportFailed
                }
            }
            Err(e) => {
                warn!(
                    error = %e,
                    topic = %self.settings.topic,
                    "Publish cycle failed, retrying next interval"
                );
                stats.transport_failures += 1;
                CycleOutcome::TransportFailed
            }
        }
    }
}

async fn publish_task(ctx: PublishContext, cancel: CancellationToken) -> PublishStats {
    let mut stats = PublishStats::default();

    if let Some(period) = ctx.settings.publish_interval {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }
            // Not raced against cancellation: an in-flight publish completes.
            let outcome = ctx.cycle(&mut stats).await;
            if cancel.is_cancelled() {
                stats.final_superseded = outcome.reached_broker();
                break;
            }
        }
    } else {
        cancel.cancelled().await;
    }

    if ctx.settings.final_publish {
        if stats.final_superseded {
            info!("Publish in flight at shutdown was the last one, skipping final attestation");
        } else {
            info!("Session over, publishing final attestation");
            stats.final_published = matches!(ctx.cycle(&mut stats).await, CycleOutcome::Published);
        }
    }
    stats
}

async fn watchdog_task(deadline: Duration, cancel: CancellationToken) {
    tokio::select! {
        _ = sleep(deadline) => {
            info!(deadline_secs = deadline.as_secs(), "Session deadline reached");
            cancel.cancel();
        }
        _ = cancel.cancelled() => debug!("Session cancelled before deadline"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::location::ScriptedLocation;
    use crate::memory::MemoryBroker;
    use telemetry_core::{
        AttestationMode, DeviceId, Envelope, FixedSeed, KeyProvider, TelemetrySample, VehicleClass,
    };
    use tokio::time::Instant;

    const SEED: &str = "1997011358982923168928344992199991480689546837621580239342656433234255379025";

    fn settings() -> RuntimeSettings {
        RuntimeSettings {
            location_refresh: Duration::from_secs(1),
            publish_interval: Some(Duration::from_secs(2)),
            session_deadline: Duration::from_secs(5),
            attempts_per_publish: 1,
            final_publish: false,
            wire_encoding: WireEncoding::Protobuf,
            topic: Topic::new("0xabc", "iocarb").unwrap(),
            layout: Layout::trip(),
            attestor: AttestorSettings::new(VehicleClass::Bike, "token"),
        }
    }

    fn keys() -> KeyPair {
        FixedSeed::from_decimal(SEED).unwrap().key_pair().unwrap()
    }

    fn route() -> ScriptedLocation {
        let id = DeviceId("98765".to_string());
        ScriptedLocation::new(
            (0..10)
                .map(|i| {
                    let latitude = 47.0 + f64::from(i) * 0.001;
                    TelemetrySample::new(id.clone(), latitude, 8.0, 1_717_351_192 + i64::from(i))
                })
                .collect(),
        )
    }

    fn runtime(settings: RuntimeSettings, broker: &MemoryBroker) -> DeviceRuntime {
        let broker = Arc::new(broker.clone());
        DeviceRuntime::new(settings, keys(), broker, Box::new(route()))
    }

    #[tokio::test(start_paused = true)]
    async fn test_session_shuts_down_cleanly() {
        let broker = MemoryBroker::new().with_latency(Duration::from_millis(1500));
        let runtime = runtime(settings(), &broker);

        let started = Instant::now();
        let summary = runtime.run().await.unwrap();
        let deadline = started + Duration::from_secs(5);

        let stats = broker.stats();
        assert_eq!(stats.max_concurrent, 1);
        assert_eq!(stats.open, 0);
        assert_eq!(stats.opened, stats.closed);

        let published = broker.published();
        let after_deadline = published
            .iter()
            .filter(|m| m.acknowledged_at > deadline)
            .count();
        assert!(after_deadline <= 1);
        assert!(!published.is_empty());
        assert_eq!(summary.publish.envelopes_published, published.len() as u64);
        assert!(summary.location.fixes >= 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_in_flight_publish_replaces_final_attestation() {
        // Cycles start at 0 s, 2 s and 4 s; the last is still waiting for its ack at 5 s.
        let broker = MemoryBroker::new().with_latency(Duration::from_millis(1500));
        let mut settings = settings();
        settings.final_publish = true;
        let runtime = runtime(settings, &broker);

        let started = Instant::now();
        let summary = runtime.run().await.unwrap();
        let deadline = started + Duration::from_secs(5);

        let after: Vec<_> = broker
            .published()
            .iter()
            .filter(|m| m.acknowledged_at > deadline)
            .map(|m| m.acknowledged_at - started)
            .collect();
        assert_eq!(after, vec![Duration::from_millis(5500)]);
        assert!(summary.publish.final_superseded);
        assert!(!summary.publish.final_published);
        assert_eq!(broker.stats().max_concurrent, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_final_attestation_when_idle_at_deadline() {
        let broker = MemoryBroker::new().with_latency(Duration::from_millis(100));
        let mut settings = settings();
        settings.final_publish = true;
        let runtime = runtime(settings, &broker);

        let started = Instant::now();
        let summary = runtime.run().await.unwrap();
        let deadline = started + Duration::from_secs(5);

        let after = broker
            .published()
            .iter()
            .filter(|m| m.acknowledged_at > deadline)
            .count();
        assert_eq!(after, 1);
        assert!(summary.publish.final_published);
        assert!(!summary.publish.final_superseded);
    }

    #[tokio::test(start_paused = true)]
    async fn test_published_envelope_reflects_latest_fix() {
        let broker = MemoryBroker::new();
        let runtime = runtime(settings(), &broker);
        let slot = runtime.sample_slot();
        runtime.run().await.unwrap();

        let last = broker.published().pop().unwrap();
        let envelope = Envelope::from_wire(&last.payload, WireEncoding::Protobuf).unwrap();
        let payload = envelope.device_payload().unwrap();
        let trip = slot.read().await.clone().unwrap();
        assert!(payload.timestamp.parse::<i64>().unwrap() <= trip.current.timestamp);
        assert_eq!(payload.pebble_id, "98765");
    }

    #[tokio::test(start_paused = true)]
    async fn test_final_publish_in_digest_mode() {
        let broker = MemoryBroker::new();
        let mut settings = settings();
        settings.publish_interval = None;
        settings.final_publish = true;
        settings.attestor.mode = AttestationMode::DistanceDigest;
        settings.wire_encoding = WireEncoding::CborHex;

        let runtime = runtime(settings, &broker);
        let summary = runtime.run().await.unwrap();

        assert!(summary.publish.final_published);
        let published = broker.published();
        assert_eq!(published.len(), 1);

        let envelope = Envelope::from_wire(&published[0].payload, WireEncoding::CborHex).unwrap();
        let message = envelope.device_payload().unwrap().message;
        assert!(message.ends_with(" 1"));
        // tokens, then one distance per segment, then the vehicle number
        let count = message.split_whitespace().count();
        assert!(count >= 23);
        assert!(count <= 21 + summary.location.fixes as usize);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transport_failure_does_not_end_session() {
        let broker = MemoryBroker::new();
        broker.refuse_connections(true);
        let runtime = runtime(settings(), &broker);
        let summary = runtime.run().await.unwrap();

        assert!(summary.publish.transport_failures >= 2);
        assert_eq!(summary.publish.envelopes_published, 0);
        assert_eq!(broker.stats().opened, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_external_cancellation() {
        let broker = MemoryBroker::new();
        let mut settings = settings();
        settings.session_deadline = Duration::from_secs(3600);
        let runtime = runtime(settings, &broker);
        let cancel = runtime.cancellation_token();

        let handle = tokio::spawn(runtime.run());
        sleep(Duration::from_secs(3)).await;
        cancel.cancel();

        let started = Instant::now();
        handle.await.unwrap().unwrap();
        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(broker.stats().open, 0);
    }
}

//! Device side of the telemetry attestation pipeline.
//!
//! Reads location fixes, attests them on a fixed cadence with
//! [`telemetry_core::Attestor`], and publishes the envelopes to a pub/sub
//! broker, reporting publish latency.
//!
//! ## Session Flow
//! 1. Load [`DeviceConfig`] and build the key pair once
//! 2. Location task commits each fix to the shared [`SampleSlot`]
//! 3. Publish task snapshots the slot every interval, signs, and publishes
//! 4. Watchdog cancels the session at its deadline
//! 5. Optional final publish, then the supervisor joins all tasks

pub mod config;
pub mod location;
pub mod memory;
#[cfg(feature = "mqtt")]
pub mod mqtt;
pub mod runtime;
pub mod transport;

pub use config::{BrokerConfig, ConfigError, DeviceConfig, TopicConfig, AUTH_TOKEN_ENV};
pub use location::{GpsJsonFile, LocationError, LocationSource, ScriptedLocation};
pub use memory::{ConnectionStats, MemoryBroker, PublishedMessage};
#[cfg(feature = "mqtt")]
pub use mqtt::MqttBroker;
pub use runtime::{
    DeviceRuntime, LocationStats, PublishStats, RunSummary, RuntimeError, RuntimeSettings,
    SampleSlot,
};
pub use transport::{
    Broker, BrokerConnection, PublishFailure, PublishReport, Publisher, Topic, TransportError,
};

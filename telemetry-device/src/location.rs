//! Location sources feeding the sample slot.

use async_trait::async_trait;
use serde::Deserialize;
use std::path::PathBuf;
use telemetry_core::{DeviceId, TelemetrySample};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LocationError {
    #[error("Cannot read fix file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed fix: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("Receiver has no fix yet")]
    NoFix,

    #[error("Coordinates out of range: ({latitude}, {longitude})")]
    OutOfRange { latitude: f64, longitude: f64 },
}

#[async_trait]
pub trait LocationSource: Send {
    fn name(&self) -> &str;

    /// Latest fix. Called once per refresh interval.
    async fn next_fix(&mut self) -> Result<TelemetrySample, LocationError>;
}

/// Fix file written by the GPS collaborator.
///
/// ```json
/// {"imei": "86…", "latitude": 47.0, "longitude": 8.0, "altitude": 0, "utc": 1717351192.0}
/// ```
#[derive(Debug, Deserialize)]
struct GpsFix {
    imei: Imei,
    latitude: f64,
    longitude: f64,
    #[serde(default)]
    altitude: Option<f64>,
    utc: f64,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Imei {
    Text(String),
    Number(u64),
}

impl Imei {
    fn into_device_id(self) -> DeviceId {
        match self {
            Imei::Text(s) => DeviceId(s),
            Imei::Number(n) => DeviceId(n.to_string()),
        }
    }
}

pub struct GpsJsonFile {
    path: PathBuf,
    device_id: Option<DeviceId>,
}

impl GpsJsonFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            device_id: None,
        }
    }

    /// Report this id instead of the receiver's IMEI.
    pub fn with_device_id(mut self, device_id: Option<DeviceId>) -> Self {
        self.device_id = device_id;
        self
    }

    fn parse(&self, text: &str) -> Result<TelemetrySample, LocationError> {
        let fix: GpsFix = serde_json::from_str(text)?;
        // The collaborator seeds the file with zeros before the first fix.
        if fix.utc <= 0.0 {
            return Err(LocationError::NoFix);
        }
        let in_range =
            (-90.0..=90.0).contains(&fix.latitude) && (-180.0..=180.0).contains(&fix.longitude);
        if !in_range {
            return Err(LocationError::OutOfRange {
                latitude: fix.latitude,
                longitude: fix.longitude,
            });
        }

        let device_id = match &self.device_id {
            Some(id) => id.clone(),
            None => fix.imei.into_device_id(),
        };
        let mut sample =
            TelemetrySample::new(device_id, fix.latitude, fix.longitude, fix.utc as i64);
        sample.altitude = fix.altitude;
        Ok(sample)
    }
}

#[async_trait]
impl LocationSource for GpsJsonFile {
    fn name(&self) -> &str {
        "gps-json"
    }

    async fn next_fix(&mut self) -> Result<TelemetrySample, LocationError> {
        let text = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|source| LocationError::Io {
                path: self.path.clone(),
                source,
            })?;
        self.parse(&text)
    }
}

/// Replays a fixed list of fixes, then keeps returning the last one.
pub struct ScriptedLocation {
    fixes: Vec<TelemetrySample>,
    next: usize,
}

impl ScriptedLocation {
    pub fn new(fixes: Vec<TelemetrySample>) -> Self {
        Self { fixes, next: 0 }
    }
}

#[async_trait]
impl LocationSource for ScriptedLocation {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn next_fix(&mut self) -> Result<TelemetrySample, LocationError> {
        let index = self.next.min(self.fixes.len().saturating_sub(1));
        let fix = self.fixes.get(index).cloned().ok_or(LocationError::NoFix)?;
        self.next += 1;
        Ok(fix)
    }
}

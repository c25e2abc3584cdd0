//! Trip tracking: great-circle distance between fixes.

use crate::types::{TelemetrySample, VehicleClass};
use serde::{Deserialize, Serialize};

/// Mean Earth radius in metres.
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Haversine distance in whole metres (truncated).
pub fn haversine_m(from: (f64, f64), to: (f64, f64)) -> u64 {
    let (lat1, lon1) = (from.0.to_radians(), from.1.to_radians());
    let (lat2, lon2) = (to.0.to_radians(), to.1.to_radians());
    let dlat = lat2 - lat1;
    let dlon = lon2 - lon1;

    let a = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());
    let metres = EARTH_RADIUS_M * c;
    if metres.is_finite() && metres > 0.0 {
        metres as u64
    } else {
        0
    }
}

/// Segment distances accumulated over a trip, in metres.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DistanceLog {
    segments: Vec<u64>,
}

impl DistanceLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, metres: u64) {
        self.segments.push(metres);
    }

    pub fn segments(&self) -> &[u64] {
        &self.segments
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn total_m(&self) -> u64 {
        self.segments.iter().sum()
    }

    /// `"<d1> <d2> … <dn> <vehicle>"`, the text signed in digest mode, where
    /// `<vehicle>` is the short class number (see [`VehicleClass::ordinal`]).
    pub fn preimage(&self, vehicle: VehicleClass) -> String {
        let mut parts: Vec<String> = self.segments.iter().map(u64::to_string).collect();
        parts.push(vehicle.ordinal().to_string());
        parts.join(" ")
    }
}

/// The value held in the shared sample slot.
#[derive(Debug, Clone, PartialEq)]
pub struct TripState {
    pub origin: TelemetrySample,
    pub current: TelemetrySample,
    pub distances: DistanceLog,
}

impl TripState {
    /// First fix of a trip; origin and current coincide.
    pub fn start(sample: TelemetrySample) -> Self {
        Self {
            origin: sample.clone(),
            current: sample,
            distances: DistanceLog::new(),
        }
    }

    /// Record a new fix and the segment travelled since the previous one.
    pub fn advance(&mut self, sample: TelemetrySample) -> u64 {
        let segment = haversine_m(
            (self.current.latitude, self.current.longitude),
            (sample.latitude, sample.longitude),
        );
        self.distances.push(segment);
        self.current = sample;
        segment
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DeviceId;

    fn fix(lat: f64, lon: f64, ts: i64) -> TelemetrySample {
        TelemetrySample::new(DeviceId("98765".to_string()), lat, lon, ts)
    }

    #[test]
    fn test_haversine_known_distances() {
        assert_eq!(haversine_m((47.0, 8.0), (47.001, 8.0)), 111);
        assert_eq!(haversine_m((47.0, 8.0), (47.0, 8.001)), 75);
        assert_eq!(haversine_m((0.0, 0.0), (0.0, 1.0)), 111_194);
        assert_eq!(haversine_m((12.5, 99.1), (12.5, 99.1)), 0);
    }

    #[test]
    fn test_trip_accumulates_segments() {
        let mut trip = TripState::start(fix(47.0, 8.0, 100));
        assert!(trip.distances.is_empty());

        assert_eq!(trip.advance(fix(47.001, 8.0, 105)), 111);
        assert_eq!(trip.advance(fix(47.001, 8.001, 110)), 75);

        assert_eq!(trip.distances.segments(), &[111, 75]);
        assert_eq!(trip.distances.total_m(), 186);
        assert_eq!(trip.origin.timestamp, 100);
        assert_eq!(trip.current.timestamp, 110);
    }

    #[test]
    fn test_preimage_format() {
        let mut log = DistanceLog::new();
        log.push(120);
        log.push(85);
        assert_eq!(log.preimage(VehicleClass::Bike), "120 85 1");
        assert_eq!(DistanceLog::new().preimage(VehicleClass::Car), "4");
    }
}

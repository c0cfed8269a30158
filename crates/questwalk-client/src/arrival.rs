//! Geofenced arrival detection around a step target.

use questwalk_shared::constants::DEFAULT_ARRIVAL_THRESHOLD_M;
use questwalk_shared::geo;
use questwalk_shared::types::Location;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Arrival {
    Arrived { distance_m: f64 },
    Approaching { distance_m: f64 },
}

impl Arrival {
    pub fn distance_m(&self) -> f64 {
        match self {
            Arrival::Arrived { distance_m } | Arrival::Approaching { distance_m } => *distance_m,
        }
    }

    pub fn is_arrived(&self) -> bool {
        matches!(self, Arrival::Arrived { .. })
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ArrivalDetector {
    threshold_m: f64,
}

impl ArrivalDetector {
    pub fn new(threshold_m: f64) -> Self {
        Self { threshold_m }
    }

    pub fn threshold_m(&self) -> f64 {
        self.threshold_m
    }

    pub fn check(&self, user: &Location, target: &Location) -> Arrival {
        let distance_m = user.distance_to(target);
        if geo::has_arrived(user, target, self.threshold_m) {
            Arrival::Arrived { distance_m }
        } else {
            Arrival::Approaching { distance_m }
        }
    }
}

impl Default for ArrivalDetector {
    fn default() -> Self {
        Self::new(DEFAULT_ARRIVAL_THRESHOLD_M)
    }
}

//! Route provider boundary.
//!
//! Routing itself (polylines, turn-by-turn) is an external service; the
//! core only asks for a route between two points and keeps the answer
//! while a leg is being navigated.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use questwalk_shared::geo::{format_distance, format_duration};
use questwalk_shared::types::{Location, TravelMode};

/// One turn instruction of a route.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteInstruction {
    pub instruction: String,
    #[serde(default)]
    pub distance_m: f64,
    #[serde(default)]
    pub duration_s: f64,
}

/// A routable path from the user to the current step target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Route {
    pub distance_m: f64,
    pub duration_s: f64,
    pub polyline: Vec<Location>,
    #[serde(default)]
    pub steps: Vec<RouteInstruction>,
}

impl Route {
    pub fn formatted_distance(&self) -> String {
        format_distance(self.distance_m)
    }

    pub fn formatted_duration(&self) -> String {
        format_duration(self.duration_s.max(0.0).round() as u64)
    }

    pub fn next_instruction(&self) -> Option<&str> {
        self.steps.first().map(|s| s.instruction.as_str())
    }
}

/// External routing service. Returns `None` when no route can be computed.
#[async_trait]
pub trait RouteProvider: Send + Sync {
    async fn get_route(
        &self,
        origin: Location,
        destination: Location,
        mode: TravelMode,
    ) -> Option<Route>;
}

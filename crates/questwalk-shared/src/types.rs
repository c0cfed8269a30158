use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::LocationError;
use crate::geo;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct QuestId(pub Uuid);

impl QuestId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for QuestId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for QuestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct StepId(pub Uuid);

impl StepId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for StepId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for StepId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A WGS84 position in degrees.
///
/// Construct through [`Location::new`] to get range checking; the raw fields
/// stay public so payloads can be built and narrowed at the boundary.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Location {
    pub latitude: f64,
    pub longitude: f64,
}

impl Location {
    pub fn new(latitude: f64, longitude: f64) -> Result<Self, LocationError> {
        geo::validate_location(latitude, longitude)
    }

    /// Re-run validation on an already constructed value.
    pub fn validated(self) -> Result<Self, LocationError> {
        geo::validate_location(self.latitude, self.longitude)
    }

    pub fn distance_to(&self, other: &Location) -> f64 {
        geo::calculate_distance(self.latitude, self.longitude, other.latitude, other.longitude)
    }
}

impl std::fmt::Display for Location {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({:.6}, {:.6})", self.latitude, self.longitude)
    }
}

/// One waypoint of a quest.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QuestStep {
    pub id: StepId,
    /// 1-based position inside the quest.
    pub step_number: u32,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub location: Option<Location>,
    #[serde(default)]
    pub requires_photo: bool,
    #[serde(default)]
    pub requires_text: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Quest {
    pub id: QuestId,
    pub title: String,
    #[serde(default)]
    pub steps: Vec<QuestStep>,
    #[serde(default)]
    pub reward_xp: i64,
    #[serde(default)]
    pub estimated_minutes: Option<u32>,
    #[serde(default)]
    pub start_time: Option<DateTime<Utc>>,
    /// Anchor point reported by discovery, usually the first waypoint.
    #[serde(default)]
    pub location: Option<Location>,
    #[serde(default)]
    pub distance_km: Option<f64>,
}

impl Quest {
    pub fn total_steps(&self) -> u32 {
        self.steps.len() as u32
    }

    pub fn step(&self, step_number: u32) -> Option<&QuestStep> {
        self.steps.iter().find(|s| s.step_number == step_number)
    }

    /// True when step numbers run 1..=n without gaps or duplicates.
    pub fn has_contiguous_steps(&self) -> bool {
        let mut numbers: Vec<u32> = self.steps.iter().map(|s| s.step_number).collect();
        numbers.sort_unstable();
        numbers
            .iter()
            .enumerate()
            .all(|(i, n)| *n == i as u32 + 1)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum TravelMode {
    #[default]
    Walking,
    Cycling,
    Driving,
}

impl TravelMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            TravelMode::Walking => "walking",
            TravelMode::Cycling => "cycling",
            TravelMode::Driving => "driving",
        }
    }
}

impl std::str::FromStr for TravelMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "walking" | "walk" => Ok(TravelMode::Walking),
            "cycling" | "bike" | "bicycling" => Ok(TravelMode::Cycling),
            "driving" | "drive" => Ok(TravelMode::Driving),
            other => Err(format!("unknown travel mode: {other}")),
        }
    }
}

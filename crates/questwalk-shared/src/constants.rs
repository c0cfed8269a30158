/// Mean Earth radius used by the Haversine formula, in meters
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Feet per meter, for short-distance display
pub const FEET_PER_METER: f64 = 3.28084;

/// Distances at or above this render in kilometers
pub const KILOMETER_DISPLAY_THRESHOLD_M: f64 = 1000.0;

/// Default geofence radius around a step target, in meters
pub const DEFAULT_ARRIVAL_THRESHOLD_M: f64 = 50.0;

/// Location polling interval while navigating, in seconds
pub const LOCATION_POLL_INTERVAL_SECS: u64 = 5;

/// Hard ceiling applied to every backend RPC, in seconds
pub const RPC_TIMEOUT_SECS: u64 = 30;

/// Timeout for a single device location fix, in seconds
pub const LOCATION_TIMEOUT_SECS: u64 = 10;

/// Distance from a route's origin that triggers a route refresh, in meters
pub const REROUTE_DISTANCE_M: f64 = 100.0;

/// XP awarded for a quest when the backend does not say otherwise
pub const DEFAULT_QUEST_REWARD_XP: i64 = 25;

/// Base XP per correct quiz answer
pub const QUIZ_XP_PER_QUESTION: u64 = 25;

/// Minimum quiz score (percent) required to pass
pub const QUIZ_PASS_SCORE_PERCENT: u32 = 60;

// Pure quest-game logic shared by the client core: geo math, ranks, step
// sequencing, data model and RPC payloads.

pub mod constants;
pub mod error;
pub mod geo;
pub mod protocol;
pub mod rank;
pub mod sequence;
pub mod types;

pub use error::{LocationError, SequenceError};
pub use rank::RankProfile;
pub use types::{Location, Quest, QuestId, QuestStep, StepId, TravelMode};

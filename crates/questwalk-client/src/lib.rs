//! Async core of the quest client: the progression controller and the
//! collaborators it drives (backend RPC, routing, location, submissions).

pub mod arrival;
pub mod backend;
pub mod config;
pub mod controller;
pub mod error;
pub mod events;
pub mod monitor;
pub mod route;
pub mod rpc;
pub mod state;
pub mod submission;
pub mod telemetry;

pub use arrival::{Arrival, ArrivalDetector};
pub use backend::{discover_quests, QuestBackend};
pub use config::ClientConfig;
pub use controller::{spawn_controller, Collaborators, ControllerHandle, StepOutcome};
pub use error::{BackendError, QuestError, SubmissionError};
pub use events::QuestNotification;
pub use monitor::{LocationMonitor, LocationProvider, LocationSample};
pub use route::{Route, RouteInstruction, RouteProvider};
pub use rpc::RpcBackend;
pub use state::{Phase, PhaseKind, QuestSnapshot, UserQuestState};
pub use submission::{Submission, SubmissionCollaborator};

//! In-memory collaborators for driving the controller in tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use questwalk_client::{
    spawn_controller, BackendError, ClientConfig, Collaborators, ControllerHandle,
    LocationProvider, QuestBackend, Route, RouteProvider, Submission, SubmissionCollaborator,
    SubmissionError,
};
use questwalk_shared::protocol::{CompleteStepResponse, StartQuestResponse};
use questwalk_shared::{
    Location, LocationError, Quest, QuestId, QuestStep, RankProfile, StepId, TravelMode,
};

pub const START: Location = Location {
    latitude: 48.8566,
    longitude: 2.3522,
};
pub const LOUVRE: Location = Location {
    latitude: 48.8606,
    longitude: 2.3376,
};
pub const NOTRE_DAME: Location = Location {
    latitude: 48.8530,
    longitude: 2.3499,
};
/// About 220 m north of [`START`], still far from [`LOUVRE`].
pub const DRIFTED: Location = Location {
    latitude: 48.8586,
    longitude: 2.3522,
};

// =============================================================================
// Backend
// =============================================================================

pub struct FakeBackend {
    pub available: Mutex<Vec<Quest>>,
    pub detail: Mutex<Vec<QuestStep>>,
    pub step_responses: Mutex<VecDeque<Result<CompleteStepResponse, BackendError>>>,
    pub step_delay: Mutex<Duration>,
    pub quest_xp: Mutex<Result<i64, BackendError>>,
    pub completed_steps: Mutex<Vec<StepId>>,
    pub started_quests: AtomicUsize,
    pub completed_quests: AtomicUsize,
    pub location_updates: AtomicUsize,
}

impl FakeBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            available: Mutex::new(Vec::new()),
            detail: Mutex::new(Vec::new()),
            step_responses: Mutex::new(VecDeque::new()),
            step_delay: Mutex::new(Duration::ZERO),
            quest_xp: Mutex::new(Ok(25)),
            completed_steps: Mutex::new(Vec::new()),
            started_quests: AtomicUsize::new(0),
            completed_quests: AtomicUsize::new(0),
            location_updates: AtomicUsize::new(0),
        })
    }

    pub fn script_step(&self, response: Result<CompleteStepResponse, BackendError>) {
        self.step_responses.lock().unwrap().push_back(response);
    }

    pub fn complete_step_calls(&self) -> usize {
        self.completed_steps.lock().unwrap().len()
    }
}

#[async_trait]
impl QuestBackend for FakeBackend {
    async fn get_available_quests(
        &self,
        _location: Location,
        _max_distance_km: f64,
    ) -> Result<Vec<Quest>, BackendError> {
        Ok(self.available.lock().unwrap().clone())
    }

    async fn start_quest(&self, _quest_id: QuestId) -> Result<StartQuestResponse, BackendError> {
        self.started_quests.fetch_add(1, Ordering::SeqCst);
        Ok(StartQuestResponse {
            status: "in_progress".into(),
        })
    }

    async fn get_quest_detail(&self, _quest_id: QuestId) -> Result<Vec<QuestStep>, BackendError> {
        Ok(self.detail.lock().unwrap().clone())
    }

    async fn complete_step(
        &self,
        _quest_id: QuestId,
        step_id: StepId,
        _location: Location,
    ) -> Result<CompleteStepResponse, BackendError> {
        let delay = *self.step_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.completed_steps.lock().unwrap().push(step_id);
        self.step_responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Ok(CompleteStepResponse {
                quest_completed: false,
                current_step: None,
                total_steps: None,
            }))
    }

    async fn complete_quest(&self, _quest_id: QuestId) -> Result<i64, BackendError> {
        self.completed_quests.fetch_add(1, Ordering::SeqCst);
        self.quest_xp.lock().unwrap().clone()
    }

    async fn update_user_location(&self, _location: Location) -> Result<(), BackendError> {
        self.location_updates.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

// =============================================================================
// Routing, location, submissions
// =============================================================================

pub struct FakeRoutes {
    /// Per-call delay and answer; an empty script answers immediately.
    pub script: Mutex<VecDeque<(Duration, Option<Route>)>>,
    pub calls: AtomicUsize,
}

impl FakeRoutes {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(VecDeque::new()),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn push(&self, delay: Duration, route: Option<Route>) {
        self.script.lock().unwrap().push_back((delay, route));
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RouteProvider for FakeRoutes {
    async fn get_route(
        &self,
        origin: Location,
        destination: Location,
        _mode: TravelMode,
    ) -> Option<Route> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let next = self.script.lock().unwrap().pop_front();
        match next {
            Some((delay, route)) => {
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                route
            }
            None => Some(route_between(origin, destination)),
        }
    }
}

pub struct FakeLocation {
    pub position: Mutex<Option<Location>>,
    pub calls: AtomicUsize,
}

impl FakeLocation {
    pub fn new(position: Option<Location>) -> Arc<Self> {
        Arc::new(Self {
            position: Mutex::new(position),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn set(&self, location: Location) {
        *self.position.lock().unwrap() = Some(location);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LocationProvider for FakeLocation {
    async fn current_location(&self) -> Result<Location, LocationError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.position
            .lock()
            .unwrap()
            .ok_or_else(|| LocationError::Unavailable("no fix".into()))
    }
}

#[derive(Default)]
pub struct FakeSubmissions {
    pub uploads: AtomicUsize,
}

#[async_trait]
impl SubmissionCollaborator for FakeSubmissions {
    async fn submit(
        &self,
        _quest_id: QuestId,
        _step: &QuestStep,
        _submission: &Submission,
    ) -> Result<(), SubmissionError> {
        self.uploads.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

// =============================================================================
// Fixtures
// =============================================================================

pub fn route(distance_m: f64) -> Route {
    Route {
        distance_m,
        duration_s: distance_m / 1.4,
        polyline: vec![],
        steps: vec![],
    }
}

pub fn route_between(origin: Location, destination: Location) -> Route {
    Route {
        polyline: vec![origin, destination],
        ..route(origin.distance_to(&destination))
    }
}

pub fn step(step_number: u32, location: Option<Location>) -> QuestStep {
    QuestStep {
        id: StepId::new(),
        step_number,
        title: format!("Stop {step_number}"),
        description: None,
        location,
        requires_photo: false,
        requires_text: false,
    }
}

pub fn quest(targets: &[Location]) -> Quest {
    Quest {
        id: QuestId::new(),
        title: "Left bank walk".into(),
        steps: targets
            .iter()
            .zip(1u32..)
            .map(|(target, n)| step(n, Some(*target)))
            .collect(),
        reward_xp: 25,
        estimated_minutes: Some(40),
        start_time: None,
        location: targets.first().copied(),
        distance_km: None,
    }
}

pub struct Harness {
    pub handle: ControllerHandle,
    pub backend: Arc<FakeBackend>,
    pub routes: Arc<FakeRoutes>,
    pub location: Arc<FakeLocation>,
    pub submissions: Arc<FakeSubmissions>,
}

/// Spawn a controller wired to fakes. Must be called inside a runtime.
pub fn harness(total_xp: u64) -> Harness {
    questwalk_client::telemetry::init_tracing();

    let backend = FakeBackend::new();
    let routes = FakeRoutes::new();
    let location = FakeLocation::new(Some(START));
    let submissions = Arc::new(FakeSubmissions::default());

    let handle = spawn_controller(
        ClientConfig::default(),
        Collaborators {
            backend: backend.clone(),
            routes: routes.clone(),
            location: location.clone(),
            submissions: submissions.clone(),
        },
        RankProfile::new(total_xp),
    );

    Harness {
        handle,
        backend,
        routes,
        location,
        submissions,
    }
}

/// Advance paused time far enough for one more location poll.
pub async fn next_poll() {
    tokio::time::sleep(Duration::from_secs(6)).await;
}

//! Quest progression state machine.
//!
//! The controller runs in a dedicated tokio task and owns the only copy of
//! [`UserQuestState`]. Callers talk to it through a cloneable
//! [`ControllerHandle`]: commands go in over an mpsc channel and are answered
//! on a oneshot, snapshots come out of a `watch` channel, and notifications
//! are broadcast.
//!
//! Every command, location sample, timer, and collaborator result is handled
//! to completion before the next one is taken. Anything that can suspend
//! (route lookup, step submission, joining, a location fix) runs in a spawned
//! task and reports back as an internal event tagged with a token; results
//! whose token no longer matches the session are dropped.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

use questwalk_shared::constants::DEFAULT_QUEST_REWARD_XP;
use questwalk_shared::protocol::CompleteStepResponse;
use questwalk_shared::rank::{RankChange, RankProfile};
use questwalk_shared::sequence::{check_step_sequence, validate_step_sequence};
use questwalk_shared::types::{Location, Quest, QuestId, QuestStep, TravelMode};

use crate::arrival::{Arrival, ArrivalDetector};
use crate::backend::QuestBackend;
use crate::config::ClientConfig;
use crate::error::{BackendError, QuestError, Result};
use crate::events::QuestNotification;
use crate::monitor::{LocationMonitor, LocationProvider, LocationSample};
use crate::route::{Route, RouteProvider};
use crate::state::{Phase, PhaseKind, QuestSnapshot, UserQuestState};
use crate::submission::{Submission, SubmissionCollaborator};

const COMMAND_CHANNEL_SIZE: usize = 64;
const INTERNAL_CHANNEL_SIZE: usize = 64;
const SAMPLE_CHANNEL_SIZE: usize = 32;
const NOTIFICATION_CHANNEL_SIZE: usize = 128;

/// External services the controller drives.
#[derive(Clone)]
pub struct Collaborators {
    pub backend: Arc<dyn QuestBackend>,
    pub routes: Arc<dyn RouteProvider>,
    pub location: Arc<dyn LocationProvider>,
    pub submissions: Arc<dyn SubmissionCollaborator>,
}

/// Result of an accepted step.
#[derive(Debug, Clone, PartialEq)]
pub enum StepOutcome {
    Advanced {
        completed_step: u32,
        next_step_number: u32,
    },
    QuestCompleted {
        xp_reward: i64,
        change: RankChange,
    },
}

enum Command {
    Join {
        quest: Quest,
        reply: oneshot::Sender<Result<PhaseKind>>,
    },
    Navigate {
        reply: oneshot::Sender<Result<Route>>,
    },
    CompleteTask {
        step_number: u32,
        submission: Submission,
        reply: oneshot::Sender<Result<StepOutcome>>,
    },
    EndRoute {
        reply: oneshot::Sender<Result<()>>,
    },
    AbandonQuest {
        reply: oneshot::Sender<Result<()>>,
    },
    UpdateLocation {
        location: Location,
        reply: oneshot::Sender<Result<PhaseKind>>,
    },
    Background {
        reply: oneshot::Sender<Result<PhaseKind>>,
    },
    Logout {
        reply: oneshot::Sender<Result<()>>,
    },
    Shutdown,
}

enum RoutePurpose {
    Navigate(oneshot::Sender<Result<Route>>),
    Refresh,
}

struct StepReport {
    response: CompleteStepResponse,
    /// Set when the step finished the quest.
    xp_reward: Option<Result<i64>>,
}

struct SubmissionJob {
    quest_id: QuestId,
    step: QuestStep,
    location: Location,
    is_last: bool,
}

/// Results of spawned work, fed back into the controller loop.
enum Internal {
    Joined {
        token: u64,
        result: Result<Quest>,
        reply: oneshot::Sender<Result<PhaseKind>>,
    },
    RouteResolved {
        token: u64,
        purpose: RoutePurpose,
        result: Result<(Location, Route)>,
    },
    StepResolved {
        token: u64,
        step_number: u32,
        result: Result<StepReport>,
        reply: oneshot::Sender<Result<StepOutcome>>,
    },
}

// ---------------------------------------------------------------------------
// Handle
// ---------------------------------------------------------------------------

/// Cloneable front door to a running controller.
#[derive(Clone)]
pub struct ControllerHandle {
    cmd_tx: mpsc::Sender<Command>,
    snapshot_rx: watch::Receiver<QuestSnapshot>,
    notif_tx: broadcast::Sender<QuestNotification>,
}

impl ControllerHandle {
    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<Result<T>>) -> Command,
    ) -> Result<T> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(make(tx))
            .await
            .map_err(|_| QuestError::ControllerClosed)?;
        rx.await.map_err(|_| QuestError::ControllerClosed)?
    }

    /// Join a quest. Resolves to `Waiting` for quests scheduled in the
    /// future, `Active` otherwise.
    #[instrument(level = "debug", skip(self, quest), fields(quest_id = %quest.id))]
    pub async fn join(&self, quest: Quest) -> Result<PhaseKind> {
        self.request(|reply| Command::Join { quest, reply }).await
    }

    /// Start navigating to the current step.
    #[instrument(level = "debug", skip(self))]
    pub async fn navigate(&self) -> Result<Route> {
        self.request(|reply| Command::Navigate { reply }).await
    }

    /// Submit proof for `step_number` after arriving at it.
    #[instrument(level = "debug", skip(self, submission))]
    pub async fn complete_task(
        &self,
        step_number: u32,
        submission: Submission,
    ) -> Result<StepOutcome> {
        self.request(|reply| Command::CompleteTask {
            step_number,
            submission,
            reply,
        })
        .await
    }

    /// Cancel the current leg and go back to `Active`.
    #[instrument(level = "debug", skip(self))]
    pub async fn end_route(&self) -> Result<()> {
        self.request(|reply| Command::EndRoute { reply }).await
    }

    /// Leave the quest entirely.
    #[instrument(level = "debug", skip(self))]
    pub async fn abandon_quest(&self) -> Result<()> {
        self.request(|reply| Command::AbandonQuest { reply }).await
    }

    /// Feed a location obtained outside the poller (e.g. a foreground fix).
    #[instrument(level = "debug", skip(self))]
    pub async fn update_location(&self, location: Location) -> Result<PhaseKind> {
        self.request(|reply| Command::UpdateLocation { location, reply })
            .await
    }

    /// The app went to the background: stop polling and drop in-flight work.
    #[instrument(level = "debug", skip(self))]
    pub async fn background(&self) -> Result<PhaseKind> {
        self.request(|reply| Command::Background { reply }).await
    }

    #[instrument(level = "debug", skip(self))]
    pub async fn logout(&self) -> Result<()> {
        self.request(|reply| Command::Logout { reply }).await
    }

    pub fn snapshot(&self) -> QuestSnapshot {
        self.snapshot_rx.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<QuestSnapshot> {
        self.snapshot_rx.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<QuestNotification> {
        self.notif_tx.subscribe()
    }

    pub async fn shutdown(&self) {
        let _ = self.cmd_tx.send(Command::Shutdown).await;
    }
}

/// Spawn the controller task for one user session.
///
/// `profile` carries the user's XP before this session.
pub fn spawn_controller(
    config: ClientConfig,
    collaborators: Collaborators,
    profile: RankProfile,
) -> ControllerHandle {
    let (cmd_tx, cmd_rx) = mpsc::channel::<Command>(COMMAND_CHANNEL_SIZE);
    let (internal_tx, internal_rx) = mpsc::channel::<Internal>(INTERNAL_CHANNEL_SIZE);
    let (sample_tx, sample_rx) = mpsc::channel::<LocationSample>(SAMPLE_CHANNEL_SIZE);
    let (notif_tx, _) = broadcast::channel::<QuestNotification>(NOTIFICATION_CHANNEL_SIZE);
    let (snapshot_tx, snapshot_rx) = watch::channel(QuestSnapshot::build(None, &profile));

    let controller = QuestProgressionController {
        detector: ArrivalDetector::new(config.arrival_threshold_m),
        monitor: LocationMonitor::new(config.poll_interval, config.location_timeout),
        config,
        collab: collaborators,
        state: None,
        profile,
        last_fix: None,
        next_token: 0,
        pending_join: None,
        pending_navigation: None,
        refresh_leg: None,
        start_deadline: None,
        internal_tx,
        sample_tx,
        snapshot_tx,
        notif_tx: notif_tx.clone(),
    };

    tokio::spawn(controller.run(cmd_rx, internal_rx, sample_rx));

    ControllerHandle {
        cmd_tx,
        snapshot_rx,
        notif_tx,
    }
}

// ---------------------------------------------------------------------------
// Controller task
// ---------------------------------------------------------------------------

struct QuestProgressionController {
    config: ClientConfig,
    collab: Collaborators,
    detector: ArrivalDetector,
    monitor: LocationMonitor,

    state: Option<UserQuestState>,
    profile: RankProfile,
    /// Most recent device fix, kept across sessions.
    last_fix: Option<Location>,

    next_token: u64,
    pending_join: Option<u64>,
    pending_navigation: Option<u64>,
    /// Leg whose route refresh is in flight.
    refresh_leg: Option<u64>,
    start_deadline: Option<Instant>,

    internal_tx: mpsc::Sender<Internal>,
    sample_tx: mpsc::Sender<LocationSample>,
    snapshot_tx: watch::Sender<QuestSnapshot>,
    notif_tx: broadcast::Sender<QuestNotification>,
}

impl QuestProgressionController {
    async fn run(
        mut self,
        mut cmd_rx: mpsc::Receiver<Command>,
        mut internal_rx: mpsc::Receiver<Internal>,
        mut sample_rx: mpsc::Receiver<LocationSample>,
    ) {
        info!("Quest controller started");

        loop {
            let deadline = self.start_deadline;
            tokio::select! {
                cmd = cmd_rx.recv() => match cmd {
                    Some(Command::Shutdown) | None => {
                        info!("Quest controller shutdown requested");
                        break;
                    }
                    Some(cmd) => self.handle_command(cmd),
                },
                Some(event) = internal_rx.recv() => self.handle_internal(event),
                Some(sample) = sample_rx.recv() => self.handle_sample(sample),
                _ = wait_until(deadline) => self.on_start_time_reached(),
            }
        }

        self.monitor.stop();
        info!("Quest controller terminated");
    }

    fn handle_command(&mut self, cmd: Command) {
        match cmd {
            Command::Join { quest, reply } => self.join(quest, reply),
            Command::Navigate { reply } => self.navigate(reply),
            Command::CompleteTask {
                step_number,
                submission,
                reply,
            } => self.complete_task(step_number, submission, reply),
            Command::EndRoute { reply } => {
                let _ = reply.send(self.end_route());
            }
            Command::AbandonQuest { reply } => {
                let _ = reply.send(self.abandon_quest());
            }
            Command::UpdateLocation { location, reply } => {
                let _ = reply.send(self.update_location(location));
            }
            Command::Background { reply } => {
                let _ = reply.send(Ok(self.background()));
            }
            Command::Logout { reply } => {
                self.logout();
                let _ = reply.send(Ok(()));
            }
            Command::Shutdown => {}
        }
    }

    fn handle_internal(&mut self, event: Internal) {
        match event {
            Internal::Joined {
                token,
                result,
                reply,
            } => self.on_joined(token, result, reply),
            Internal::RouteResolved {
                token,
                purpose,
                result,
            } => self.on_route_resolved(token, purpose, result),
            Internal::StepResolved {
                token,
                step_number,
                result,
                reply,
            } => self.on_step_resolved(token, step_number, result, reply),
        }
    }

    // -- join / waiting ------------------------------------------------------

    fn join(&mut self, quest: Quest, reply: oneshot::Sender<Result<PhaseKind>>) {
        let phase = self.phase_kind();
        if !phase.accepts_join() || self.pending_join.is_some() {
            let _ = reply.send(Err(QuestError::InvalidTransition {
                action: "join",
                phase,
            }));
            return;
        }

        let token = self.next_token();
        self.pending_join = Some(token);
        info!(quest_id = %quest.id, token, "Joining quest");

        let backend = self.collab.backend.clone();
        let limit = self.config.rpc_timeout;
        let tx = self.internal_tx.clone();
        tokio::spawn(async move {
            let result = fetch_quest(backend.as_ref(), limit, quest).await;
            let _ = tx
                .send(Internal::Joined {
                    token,
                    result,
                    reply,
                })
                .await;
        });
    }

    fn on_joined(
        &mut self,
        token: u64,
        result: Result<Quest>,
        reply: oneshot::Sender<Result<PhaseKind>>,
    ) {
        if self.pending_join != Some(token) {
            debug!(token, "Dropping stale join result");
            let _ = reply.send(Err(QuestError::Cancelled));
            return;
        }
        self.pending_join = None;

        let outcome = result.map(|quest| self.start_session(quest));
        if let Err(e) = &outcome {
            self.report("join", e);
        }
        let _ = reply.send(outcome);
    }

    fn start_session(&mut self, quest: Quest) -> PhaseKind {
        let now = Utc::now();
        let phase = match quest.start_time {
            Some(starts_at) if starts_at > now => {
                let wait = (starts_at - now).to_std().unwrap_or(Duration::ZERO);
                self.start_deadline = Some(Instant::now() + wait);
                Phase::Waiting { starts_at }
            }
            _ => {
                self.start_deadline = None;
                Phase::Active
            }
        };

        self.monitor.stop();
        self.refresh_leg = None;
        self.pending_navigation = None;

        let from = self.phase_kind();
        let to = phase.kind();
        info!(
            quest_id = %quest.id,
            title = %quest.title,
            steps = quest.total_steps(),
            phase = %to,
            "Quest session started"
        );
        self.state = Some(UserQuestState::new(quest, phase, self.last_fix));
        self.publish();
        self.notify(QuestNotification::PhaseChanged { from, to });
        to
    }

    fn on_start_time_reached(&mut self) {
        self.start_deadline = None;
        if self.phase_kind() == PhaseKind::Waiting {
            info!("Scheduled start reached");
            self.transition(Phase::Active);
        }
    }

    // -- navigation ----------------------------------------------------------

    fn navigate(&mut self, reply: oneshot::Sender<Result<Route>>) {
        let phase = self.phase_kind();
        if phase != PhaseKind::Active || self.pending_navigation.is_some() {
            let _ = reply.send(Err(QuestError::InvalidTransition {
                action: "navigate",
                phase,
            }));
            return;
        }

        let Some(target) = self.state.as_ref().and_then(|s| s.current_target()) else {
            let err = QuestError::MissingLocation;
            self.report("navigate", &err);
            let _ = reply.send(Err(err));
            return;
        };

        let token = self.next_token();
        self.pending_navigation = Some(token);
        debug!(token, %target, "Requesting route");
        self.spawn_route(token, self.last_fix, target, RoutePurpose::Navigate(reply));
    }

    fn spawn_route(
        &self,
        token: u64,
        known_origin: Option<Location>,
        target: Location,
        purpose: RoutePurpose,
    ) {
        let routes = self.collab.routes.clone();
        let location = self.collab.location.clone();
        let mode = self.config.travel_mode;
        let rpc_timeout = self.config.rpc_timeout;
        let fix_timeout = self.config.location_timeout;
        let tx = self.internal_tx.clone();

        tokio::spawn(async move {
            let result = resolve_route(
                routes.as_ref(),
                location.as_ref(),
                known_origin,
                target,
                mode,
                (rpc_timeout, fix_timeout),
            )
            .await;
            let _ = tx
                .send(Internal::RouteResolved {
                    token,
                    purpose,
                    result,
                })
                .await;
        });
    }

    fn on_route_resolved(
        &mut self,
        token: u64,
        purpose: RoutePurpose,
        result: Result<(Location, Route)>,
    ) {
        match purpose {
            RoutePurpose::Navigate(reply) => {
                if self.pending_navigation != Some(token)
                    || self.phase_kind() != PhaseKind::Active
                {
                    debug!(token, "Dropping stale route result");
                    let _ = reply.send(Err(QuestError::Cancelled));
                    return;
                }
                self.pending_navigation = None;

                match result {
                    Ok((origin, route)) => {
                        self.record_fix(origin);
                        info!(
                            leg = token,
                            distance = %route.formatted_distance(),
                            duration = %route.formatted_duration(),
                            "Route leg started"
                        );
                        self.transition(Phase::Navigating {
                            leg: token,
                            origin,
                            route: route.clone(),
                        });
                        self.monitor.start(
                            self.collab.location.clone(),
                            token,
                            self.sample_tx.clone(),
                        );
                        self.notify(QuestNotification::RouteUpdated {
                            leg: token,
                            distance_m: route.distance_m,
                            duration_s: route.duration_s,
                        });
                        let _ = reply.send(Ok(route));
                    }
                    Err(e) => {
                        self.report("navigate", &e);
                        let _ = reply.send(Err(e));
                    }
                }
            }
            RoutePurpose::Refresh => {
                let current_leg = self.state.as_ref().and_then(|s| match &s.phase {
                    Phase::Navigating { leg, .. } => Some(*leg),
                    _ => None,
                });
                if current_leg != Some(token) || self.refresh_leg != Some(token) {
                    debug!(leg = token, "Dropping stale route refresh");
                    return;
                }
                self.refresh_leg = None;

                match result {
                    Ok((new_origin, new_route)) => {
                        let (distance_m, duration_s) = (new_route.distance_m, new_route.duration_s);
                        if let Some(state) = self.state.as_mut() {
                            if let Phase::Navigating { origin, route, .. } = &mut state.phase {
                                *origin = new_origin;
                                *route = new_route;
                            }
                        }
                        debug!(leg = token, distance_m, "Route refreshed");
                        self.publish();
                        self.notify(QuestNotification::RouteUpdated {
                            leg: token,
                            distance_m,
                            duration_s,
                        });
                    }
                    Err(e) => {
                        debug!(leg = token, error = %e, "Route refresh failed, keeping current route");
                    }
                }
            }
        }
    }

    fn end_route(&mut self) -> Result<()> {
        let phase = self.phase_kind();
        if !matches!(phase, PhaseKind::Navigating | PhaseKind::Arrived) {
            return Err(QuestError::InvalidTransition {
                action: "end route",
                phase,
            });
        }
        info!("Route leg ended by user");
        self.transition(Phase::Active);
        Ok(())
    }

    fn abandon_quest(&mut self) -> Result<()> {
        let phase = self.phase_kind();
        if !matches!(phase, PhaseKind::Navigating | PhaseKind::Arrived) {
            return Err(QuestError::InvalidTransition {
                action: "abandon quest",
                phase,
            });
        }
        info!(
            quest_id = ?self.state.as_ref().map(|s| s.quest_id()),
            "Quest abandoned"
        );
        self.transition(Phase::Ended);
        Ok(())
    }

    // -- location ------------------------------------------------------------

    fn handle_sample(&mut self, sample: LocationSample) {
        if self.monitor.active_leg() != Some(sample.leg) {
            debug!(leg = sample.leg, "Dropping sample from stopped poller");
            return;
        }
        self.apply_fix(sample.location);
    }

    fn update_location(&mut self, location: Location) -> Result<PhaseKind> {
        let location = location.validated()?;
        self.apply_fix(location);
        Ok(self.phase_kind())
    }

    fn record_fix(&mut self, location: Location) {
        self.last_fix = Some(location);
        if let Some(state) = self.state.as_mut() {
            state.last_known_location = Some(location);
        }
    }

    fn apply_fix(&mut self, location: Location) {
        self.record_fix(location);
        self.sync_location(location);

        let Some(state) = self.state.as_ref() else {
            return;
        };
        let (leg, origin) = match &state.phase {
            Phase::Navigating { leg, origin, .. } => (*leg, *origin),
            _ => return,
        };
        let Some(target) = state.current_target() else {
            return;
        };
        let step_number = state.current_step_number;

        match self.detector.check(&location, &target) {
            Arrival::Arrived { distance_m } => {
                info!(step_number, distance_m, "Arrived at step target");
                self.transition(Phase::Arrived { distance_m });
                self.notify(QuestNotification::ArrivedAtStep {
                    step_number,
                    distance_m,
                });
            }
            Arrival::Approaching { distance_m } => {
                debug!(step_number, distance_m, "Approaching step target");
                if self.refresh_leg.is_none()
                    && location.distance_to(&origin) > self.config.reroute_distance_m
                {
                    debug!(leg, "Moved away from route origin, refreshing route");
                    self.refresh_leg = Some(leg);
                    self.spawn_route(leg, Some(location), target, RoutePurpose::Refresh);
                }
            }
        }
    }

    fn sync_location(&self, location: Location) {
        let backend = self.collab.backend.clone();
        let limit = self.config.rpc_timeout;
        tokio::spawn(async move {
            if let Err(e) = call_backend(limit, backend.update_user_location(location)).await {
                warn!(error = %e, "Failed to sync location to backend");
            }
        });
    }

    // -- submission ----------------------------------------------------------

    fn complete_task(
        &mut self,
        step_number: u32,
        submission: Submission,
        reply: oneshot::Sender<Result<StepOutcome>>,
    ) {
        let (token, job) = match self.begin_submission(step_number, &submission) {
            Ok(started) => started,
            Err(e) => {
                debug!(step_number, error = %e, "Task completion rejected");
                let _ = reply.send(Err(e));
                return;
            }
        };

        let backend = self.collab.backend.clone();
        let submissions = self.collab.submissions.clone();
        let limit = self.config.rpc_timeout;
        let tx = self.internal_tx.clone();
        tokio::spawn(async move {
            let result =
                run_submission(backend.as_ref(), submissions.as_ref(), limit, job, submission)
                    .await;
            let _ = tx
                .send(Internal::StepResolved {
                    token,
                    step_number,
                    result,
                    reply,
                })
                .await;
        });
    }

    /// Validate a completion attempt and move to `Submitting`.
    ///
    /// The sequence check runs before the phase check so an out-of-order
    /// step is reported as such no matter where the session is.
    fn begin_submission(
        &mut self,
        step_number: u32,
        submission: &Submission,
    ) -> Result<(u64, SubmissionJob)> {
        let phase = self.phase_kind();
        let state = self.state.as_ref().ok_or(QuestError::InvalidTransition {
            action: "complete task",
            phase,
        })?;
        if phase == PhaseKind::Submitting {
            return Err(QuestError::SubmissionInProgress);
        }

        let last_completed = state.current_step_number.saturating_sub(1);
        check_step_sequence(last_completed, step_number)?;

        let distance_m = match &state.phase {
            Phase::Arrived { distance_m } => *distance_m,
            _ => {
                return Err(QuestError::InvalidTransition {
                    action: "complete task",
                    phase,
                })
            }
        };

        let step = state
            .current_step()
            .cloned()
            .ok_or_else(|| QuestError::InvalidQuest(format!("step {step_number} not found")))?;
        submission
            .check_requirements(&step)
            .map_err(QuestError::SubmissionIncomplete)?;
        let location = state
            .last_known_location
            .or(self.last_fix)
            .ok_or(QuestError::MissingLocation)?;

        let job = SubmissionJob {
            quest_id: state.quest_id(),
            is_last: state.is_last_step(step_number),
            step,
            location,
        };

        let token = self.next_token();
        info!(step_number, token, "Submitting step");
        self.transition(Phase::Submitting {
            step_number,
            token,
            distance_m,
        });
        Ok((token, job))
    }

    fn on_step_resolved(
        &mut self,
        token: u64,
        step_number: u32,
        result: Result<StepReport>,
        reply: oneshot::Sender<Result<StepOutcome>>,
    ) {
        let resolved = self.state.as_ref().and_then(|s| match &s.phase {
            Phase::Submitting {
                token: current,
                distance_m,
                ..
            } if *current == token => Some((*distance_m, s.total_steps, s.quest.reward_xp, s.quest_id())),
            _ => None,
        });
        let Some((distance_m, total_steps, quest_reward, quest_id)) = resolved else {
            debug!(token, step_number, "Dropping stale step result");
            let _ = reply.send(Err(QuestError::Cancelled));
            return;
        };

        let report = match result {
            Ok(report) => report,
            Err(e) => {
                self.transition(Phase::Arrived { distance_m });
                self.report("complete task", &e);
                let _ = reply.send(Err(e));
                return;
            }
        };

        let is_last = report.response.quest_completed || step_number >= total_steps;
        let outcome = if is_last {
            let fallback = if quest_reward != 0 {
                quest_reward
            } else {
                DEFAULT_QUEST_REWARD_XP
            };
            let xp_reward = match report.xp_reward {
                Some(Ok(xp)) => xp,
                Some(Err(e)) => {
                    warn!(error = %e, fallback, "complete_quest failed, using quest reward");
                    fallback
                }
                None => fallback,
            };

            let change = self.profile.award(xp_reward);
            info!(
                %quest_id,
                xp_reward,
                total_xp = change.new_xp,
                rank = change.new_rank,
                leveled_up = change.leveled_up,
                "Quest completed"
            );
            self.transition(Phase::Completed { xp_reward, change });
            self.notify(QuestNotification::StepCompleted {
                step_number,
                next_step_number: None,
                total_steps,
            });
            self.notify(QuestNotification::QuestCompleted {
                quest_id,
                xp_reward,
                total_xp: change.new_xp,
                rank: change.new_rank,
                rank_name: self.profile.rank_name(),
                leveled_up: change.leveled_up,
            });
            StepOutcome::QuestCompleted { xp_reward, change }
        } else {
            let next = next_step_number(step_number, report.response.current_step);
            if let Some(state) = self.state.as_mut() {
                state.advance_to(next);
            }
            info!(completed = step_number, next, total_steps, "Step accepted");
            self.transition(Phase::Active);
            self.notify(QuestNotification::StepCompleted {
                step_number,
                next_step_number: Some(next),
                total_steps,
            });
            StepOutcome::Advanced {
                completed_step: step_number,
                next_step_number: next,
            }
        };

        let _ = reply.send(Ok(outcome));
    }

    // -- lifecycle -----------------------------------------------------------

    fn background(&mut self) -> PhaseKind {
        self.monitor.stop();
        self.refresh_leg = None;
        if self.pending_navigation.take().is_some() {
            debug!("Discarding in-flight route request");
        }

        let resume = self.state.as_ref().and_then(|s| match &s.phase {
            Phase::Navigating { .. } => Some(Phase::Active),
            Phase::Submitting { distance_m, .. } => Some(Phase::Arrived {
                distance_m: *distance_m,
            }),
            _ => None,
        });
        if let Some(phase) = resume {
            self.transition(phase);
        }
        info!(phase = %self.phase_kind(), "App backgrounded");
        self.phase_kind()
    }

    fn logout(&mut self) {
        self.monitor.stop();
        self.refresh_leg = None;
        self.pending_join = None;
        self.pending_navigation = None;
        self.start_deadline = None;

        let from = self.phase_kind();
        self.state = None;
        self.last_fix = None;
        self.profile = RankProfile::default();
        info!("Session reset on logout");
        self.publish();
        if from != PhaseKind::Idle {
            self.notify(QuestNotification::PhaseChanged {
                from,
                to: PhaseKind::Idle,
            });
        }
    }

    // -- helpers -------------------------------------------------------------

    fn phase_kind(&self) -> PhaseKind {
        self.state
            .as_ref()
            .map_or(PhaseKind::Idle, |s| s.phase.kind())
    }

    fn next_token(&mut self) -> u64 {
        self.next_token += 1;
        self.next_token
    }

    /// Replace the phase of the current session. Leaving `Navigating` always
    /// stops the poller.
    fn transition(&mut self, next: Phase) {
        let to = next.kind();
        let from = match self.state.as_mut() {
            Some(state) => std::mem::replace(&mut state.phase, next).kind(),
            None => return,
        };

        if to != PhaseKind::Navigating {
            self.monitor.stop();
            self.refresh_leg = None;
        }
        if to != PhaseKind::Waiting {
            self.start_deadline = None;
        }

        debug!(%from, %to, "Quest phase changed");
        self.publish();
        if from != to {
            self.notify(QuestNotification::PhaseChanged { from, to });
        }
    }

    fn publish(&self) {
        self.snapshot_tx
            .send_replace(QuestSnapshot::build(self.state.as_ref(), &self.profile));
    }

    fn notify(&self, notification: QuestNotification) {
        // No subscribers is fine.
        let _ = self.notif_tx.send(notification);
    }

    fn report(&self, action: &'static str, err: &QuestError) {
        warn!(action, error = %err, retryable = err.is_retryable(), "Quest action failed");
        self.notify(QuestNotification::Error {
            action,
            message: err.to_string(),
            retryable: err.is_retryable(),
        });
    }
}

// ---------------------------------------------------------------------------
// Spawned work
// ---------------------------------------------------------------------------

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending::<()>().await,
    }
}

async fn call_backend<T, F>(limit: Duration, fut: F) -> Result<T>
where
    F: Future<Output = std::result::Result<T, BackendError>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result.map_err(QuestError::from),
        Err(_) => Err(QuestError::Timeout),
    }
}

/// Start the quest on the backend. Steps that came with the quest are checked
/// before the backend hears about it; fetched steps are checked after.
async fn fetch_quest(backend: &dyn QuestBackend, limit: Duration, quest: Quest) -> Result<Quest> {
    let needs_detail = quest.steps.is_empty();
    let mut quest = if needs_detail {
        quest
    } else {
        prepare_quest(quest)?
    };

    let started = call_backend(limit, backend.start_quest(quest.id)).await?;
    debug!(quest_id = %quest.id, status = %started.status, "Quest started on backend");

    if needs_detail {
        quest.steps = call_backend(limit, backend.get_quest_detail(quest.id)).await?;
        quest = prepare_quest(quest)?;
    }
    Ok(quest)
}

/// Sort steps, check they run 1..=n, and validate every step target.
fn prepare_quest(mut quest: Quest) -> Result<Quest> {
    quest.steps.sort_by_key(|s| s.step_number);
    if quest.steps.is_empty() {
        return Err(QuestError::InvalidQuest("quest has no steps".into()));
    }
    if !quest.has_contiguous_steps() {
        return Err(QuestError::InvalidQuest(
            "step numbers must run from 1 without gaps".into(),
        ));
    }
    for step in &quest.steps {
        if let Some(target) = step.location {
            target.validated().map_err(|e| {
                QuestError::InvalidQuest(format!("step {}: {e}", step.step_number))
            })?;
        }
    }
    Ok(quest)
}

async fn resolve_route(
    routes: &dyn RouteProvider,
    location: &dyn LocationProvider,
    known_origin: Option<Location>,
    target: Location,
    mode: TravelMode,
    (rpc_timeout, fix_timeout): (Duration, Duration),
) -> Result<(Location, Route)> {
    let origin = match known_origin {
        Some(origin) => origin,
        None => match tokio::time::timeout(fix_timeout, location.current_location()).await {
            Ok(Ok(fix)) => fix.validated().map_err(|_| QuestError::MissingLocation)?,
            Ok(Err(e)) => {
                debug!(error = %e, "No device fix for route origin");
                return Err(QuestError::MissingLocation);
            }
            Err(_) => return Err(QuestError::MissingLocation),
        },
    };

    match tokio::time::timeout(rpc_timeout, routes.get_route(origin, target, mode)).await {
        Ok(Some(route)) => Ok((origin, route)),
        Ok(None) => Err(QuestError::RouteUnavailable),
        Err(_) => Err(QuestError::Timeout),
    }
}

async fn run_submission(
    backend: &dyn QuestBackend,
    submissions: &dyn SubmissionCollaborator,
    limit: Duration,
    job: SubmissionJob,
    submission: Submission,
) -> Result<StepReport> {
    match tokio::time::timeout(limit, submissions.submit(job.quest_id, &job.step, &submission)).await
    {
        Ok(Ok(())) => {}
        Ok(Err(e)) => return Err(QuestError::Submission(e)),
        Err(_) => return Err(QuestError::Timeout),
    }

    let response = call_backend(
        limit,
        backend.complete_step(job.quest_id, job.step.id, job.location),
    )
    .await?;

    let xp_reward = if response.quest_completed || job.is_last {
        Some(call_backend(limit, backend.complete_quest(job.quest_id)).await)
    } else {
        None
    };

    Ok(StepReport {
        response,
        xp_reward,
    })
}

/// Prefer the backend's step number when it is the next one in sequence,
/// otherwise advance locally by one.
fn next_step_number(completed: u32, reported: Option<u32>) -> u32 {
    let local = completed + 1;
    match reported {
        Some(n) if validate_step_sequence(completed, n) => n,
        Some(n) => {
            warn!(completed, reported = n, "Backend step number out of sequence, advancing locally");
            local
        }
        None => local,
    }
}

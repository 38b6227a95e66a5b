//! Queryable state for one autonomous browser-exploration session.
//!
//! Driven entirely by asynchronous event delivery: screenshot -> analyze ->
//! act steps, a latest-wins coverage snapshot, a login-takeover sub-machine
//! and an optional multi-worker aggregate. All inputs are pre-filtered by
//! the router, so everything here belongs to this session's execution id.

mod takeover;
mod workers;

pub use takeover::{TakeoverResolution, TakeoverRound, TakeoverState};
pub use workers::{MultiAgentState, WorkerProgress, WorkerStatus};

use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::{debug, info};

use crate::constants::MAX_ACTIVITY_LINES;
use crate::events::{ActionInfo, ExplorationEvent, ExplorationStats, MultiAgentEvent};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExplorationPhase {
    Capture,
    Analyze,
    Act,
}

/// One phase of one iteration. Append-only; errors attach to the step they
/// belong to instead of replacing it, so a failed action stays visible in
/// context.
#[derive(Debug, Clone)]
pub struct ExplorationStep {
    pub iteration: u32,
    pub phase: ExplorationPhase,
    pub url: Option<String>,
    pub title: Option<String>,
    pub screenshot: Option<String>,
    pub analysis: Option<Value>,
    pub action: Option<ActionInfo>,
    pub error: Option<String>,
}

impl ExplorationStep {
    fn new(iteration: u32, phase: ExplorationPhase) -> Self {
        Self {
            iteration,
            phase,
            url: None,
            title: None,
            screenshot: None,
            analysis: None,
            action: None,
            error: None,
        }
    }
}

/// Latest coverage measurement. Overwritten wholesale, never accumulated.
#[derive(Debug, Clone, Default)]
pub struct CoverageSnapshot {
    pub route_coverage_pct: f32,
    pub element_coverage_pct: f32,
    pub component_coverage_pct: f32,
    pub pending_routes: Vec<String>,
    pub stable_rounds: u32,
    pub api_count: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Idle,
    Running,
    Completed,
    Failed,
}

/// Aggregated state of one exploration execution. Owned by the view session
/// that created it; discarded wholesale on execution switch.
pub struct ExplorationSession {
    execution_id: String,
    status: SessionStatus,
    target_url: Option<String>,
    steps: Vec<ExplorationStep>,
    interactions: u32,
    coverage: Option<CoverageSnapshot>,
    stats: Option<ExplorationStats>,
    activity: Vec<String>,
    takeover: TakeoverState,
    multi_agent: Option<MultiAgentState>,
}

impl ExplorationSession {
    pub fn new(execution_id: impl Into<String>) -> Self {
        Self {
            execution_id: execution_id.into(),
            status: SessionStatus::Idle,
            target_url: None,
            steps: Vec::new(),
            interactions: 0,
            coverage: None,
            stats: None,
            activity: Vec::new(),
            takeover: TakeoverState::new(),
            multi_agent: None,
        }
    }

    pub fn execution_id(&self) -> &str {
        &self.execution_id
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    pub fn target_url(&self) -> Option<&str> {
        self.target_url.as_deref()
    }

    pub fn steps(&self) -> &[ExplorationStep] {
        &self.steps
    }

    /// Count of act-phase events seen so far.
    pub fn interactions(&self) -> u32 {
        self.interactions
    }

    pub fn coverage(&self) -> Option<&CoverageSnapshot> {
        self.coverage.as_ref()
    }

    pub fn stats(&self) -> Option<&ExplorationStats> {
        self.stats.as_ref()
    }

    pub fn activity(&self) -> &[String] {
        &self.activity
    }

    pub fn takeover(&self) -> &TakeoverState {
        &self.takeover
    }

    pub fn multi_agent(&self) -> Option<&MultiAgentState> {
        self.multi_agent.as_ref()
    }

    /// Resolve the pending takeover locally (form submitted, skipped, or
    /// marked manually complete by the user).
    pub fn resolve_takeover(&mut self, resolution: TakeoverResolution) -> bool {
        self.takeover.resolve(resolution)
    }

    /// Fold one exploration event into the session.
    pub fn apply(&mut self, event: ExplorationEvent, now: DateTime<Utc>) {
        match event {
            ExplorationEvent::Start { target_url } => {
                info!("exploration of {} started", target_url);
                self.push_activity(format!("exploration started: {}", target_url));
                self.target_url = Some(target_url);
                self.status = SessionStatus::Running;
            }
            ExplorationEvent::Screenshot { iteration, url, title, path, screenshot } => {
                let mut step = ExplorationStep::new(iteration, ExplorationPhase::Capture);
                step.url = url;
                step.title = title;
                step.screenshot = screenshot.or(path);
                self.steps.push(step);
            }
            ExplorationEvent::Analysis { iteration, analysis } => {
                let mut step = ExplorationStep::new(iteration, ExplorationPhase::Analyze);
                step.analysis = Some(analysis);
                self.steps.push(step);
            }
            ExplorationEvent::Action { iteration, action } => {
                self.push_activity(format!(
                    "iteration {}: {} ({})",
                    iteration,
                    action.action_type,
                    if action.success { "ok" } else { "failed" }
                ));
                let mut step = ExplorationStep::new(iteration, ExplorationPhase::Act);
                step.action = Some(action);
                self.steps.push(step);
                self.interactions += 1;
            }
            ExplorationEvent::CoverageUpdate {
                route_coverage,
                element_coverage,
                component_coverage,
                pending_routes,
                stable_rounds,
                api_count,
            } => {
                self.push_activity(format!(
                    "coverage: routes {:.0}%, elements {:.0}%, {} APIs, {} pending routes",
                    route_coverage,
                    element_coverage,
                    api_count,
                    pending_routes.len()
                ));
                self.coverage = Some(CoverageSnapshot {
                    route_coverage_pct: route_coverage,
                    element_coverage_pct: element_coverage,
                    component_coverage_pct: component_coverage,
                    pending_routes,
                    stable_rounds,
                    api_count,
                });
            }
            ExplorationEvent::TakeoverRequest { message, fields, timeout_seconds } => {
                if self.takeover.on_request(message, fields, timeout_seconds, now) {
                    self.push_activity("login takeover requested".to_string());
                }
            }
            ExplorationEvent::CredentialsReceived { username } => {
                self.takeover.resolve(TakeoverResolution::Submitted);
                self.push_activity(match username {
                    Some(user) => format!("credentials received for {}", user),
                    None => "credentials received".to_string(),
                });
            }
            ExplorationEvent::Complete { stats } => {
                self.status = if stats.status == "failed" {
                    SessionStatus::Failed
                } else {
                    SessionStatus::Completed
                };
                self.push_activity(format!(
                    "exploration finished: {} pages, {} APIs in {} iterations",
                    stats.pages_visited, stats.apis_discovered, stats.total_iterations
                ));
                self.stats = Some(stats);
            }
            ExplorationEvent::Error { iteration, error } => {
                self.push_activity(format!("error: {}", error));
                self.attach_error(iteration, error);
            }
        }
    }

    /// Fold one multi-agent event into the session.
    pub fn apply_multi_agent(&mut self, event: MultiAgentEvent) {
        match event {
            MultiAgentEvent::MultiAgentStart { mode, total_workers } => {
                info!("multi-agent mode '{}' with {} workers", mode, total_workers);
                self.multi_agent = Some(MultiAgentState::new(mode, total_workers));
            }
            MultiAgentEvent::WorkerTasks { tasks } => {
                self.multi_agent_mut().seed_tasks(&tasks);
            }
            MultiAgentEvent::WorkerProgress { worker } => {
                self.multi_agent_mut().apply_progress(worker);
            }
            MultiAgentEvent::WorkerComplete { task_id, scope_name, .. } => {
                self.push_activity(format!("worker '{}' completed", scope_name));
                self.multi_agent_mut().complete_worker(&task_id, &scope_name);
            }
            MultiAgentEvent::MultiAgentStats { global_stats, .. } => {
                self.multi_agent_mut().set_global_stats(global_stats);
            }
        }
    }

    /// Worker events can beat the start event across reconnects.
    fn multi_agent_mut(&mut self) -> &mut MultiAgentState {
        self.multi_agent
            .get_or_insert_with(|| MultiAgentState::new(String::new(), 0))
    }

    /// Attach an error to the step it happened in; a step-less error still
    /// gets a visible slot in the feed.
    fn attach_error(&mut self, iteration: Option<u32>, error: String) {
        let step = match iteration {
            Some(iter) => self.steps.iter_mut().rev().find(|s| s.iteration == iter),
            None => self.steps.last_mut(),
        };
        match step {
            Some(step) => step.error = Some(error),
            None => {
                debug!("error event with no matching step");
                let mut step = ExplorationStep::new(iteration.unwrap_or(0), ExplorationPhase::Act);
                step.error = Some(error);
                self.steps.push(step);
            }
        }
    }

    fn push_activity(&mut self, line: String) {
        self.activity.push(line);
        if self.activity.len() > MAX_ACTIVITY_LINES {
            let excess = self.activity.len() - MAX_ACTIVITY_LINES;
            self.activity.drain(..excess);
        }
    }
}

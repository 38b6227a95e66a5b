use std::collections::{HashMap, HashSet};
use tracing::debug;

use crate::events::{GlobalStats, WorkerProgressUpdate, WorkerTask};

/// Lifecycle of one worker scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl WorkerStatus {
    fn from_wire(s: &str) -> Self {
        match s {
            "running" => WorkerStatus::Running,
            "completed" => WorkerStatus::Completed,
            "failed" => WorkerStatus::Failed,
            _ => WorkerStatus::Pending,
        }
    }
}

/// Live view of one worker, updated in place by task id.
#[derive(Debug, Clone)]
pub struct WorkerProgress {
    pub task_id: String,
    pub scope_name: String,
    pub status: WorkerStatus,
    pub pages_visited: u64,
    pub apis_discovered: u64,
    pub elements_interacted: u64,
    pub iterations_used: u32,
    pub progress_pct: f32,
    pub completion_reason: Option<String>,
}

impl WorkerProgress {
    fn pending(task_id: String, scope_name: String) -> Self {
        Self {
            task_id,
            scope_name,
            status: WorkerStatus::Pending,
            pages_visited: 0,
            apis_discovered: 0,
            elements_interacted: 0,
            iterations_used: 0,
            progress_pct: 0.0,
            completion_reason: None,
        }
    }
}

/// Aggregate over the worker fan-out of one multi-agent execution.
///
/// Workers live in a map keyed by task id so repeated progress events
/// update in place rather than append; completion is counted at most once
/// per task id regardless of redelivery.
#[derive(Debug, Default)]
pub struct MultiAgentState {
    pub mode: String,
    pub total_workers: u32,
    workers: HashMap<String, WorkerProgress>,
    completed: HashSet<String>,
    global_stats: Option<GlobalStats>,
}

impl MultiAgentState {
    pub fn new(mode: String, total_workers: u32) -> Self {
        Self {
            mode,
            total_workers,
            ..Self::default()
        }
    }

    /// Seed pending entries for planned tasks. Existing entries keep their
    /// state; replanning only adds.
    pub fn seed_tasks(&mut self, tasks: &[WorkerTask]) {
        for task in tasks {
            self.workers.entry(task.task_id.clone()).or_insert_with(|| {
                WorkerProgress::pending(task.task_id.clone(), task.scope_name.clone())
            });
        }
    }

    /// Upsert by task id: overwrite fields, never append. Completion is
    /// terminal, so progress redelivered after `complete_worker` is dropped
    /// instead of flipping the entry back to running.
    pub fn apply_progress(&mut self, update: WorkerProgressUpdate) {
        if self.completed.contains(&update.task_id) {
            debug!("progress for completed worker {} ignored", update.task_id);
            return;
        }
        let progress = WorkerProgress {
            task_id: update.task_id.clone(),
            scope_name: update.scope_name,
            status: WorkerStatus::from_wire(&update.status),
            pages_visited: update.pages_visited,
            apis_discovered: update.apis_discovered,
            elements_interacted: update.elements_interacted,
            iterations_used: update.iterations_used,
            progress_pct: update.progress.clamp(0.0, 100.0),
            completion_reason: update.completion_reason,
        };
        self.workers.insert(update.task_id, progress);
    }

    /// Mark a worker completed. Counting is exactly-once per task id.
    pub fn complete_worker(&mut self, task_id: &str, scope_name: &str) {
        let entry = self
            .workers
            .entry(task_id.to_string())
            .or_insert_with(|| {
                WorkerProgress::pending(task_id.to_string(), scope_name.to_string())
            });
        entry.status = WorkerStatus::Completed;
        entry.progress_pct = 100.0;

        if !self.completed.insert(task_id.to_string()) {
            debug!("duplicate completion for worker {} ignored", task_id);
        }
    }

    /// Latest-wins overwrite of the aggregate counters.
    pub fn set_global_stats(&mut self, stats: GlobalStats) {
        self.global_stats = Some(stats);
    }

    pub fn global_stats(&self) -> Option<&GlobalStats> {
        self.global_stats.as_ref()
    }

    pub fn completed_workers(&self) -> usize {
        self.completed.len()
    }

    pub fn worker(&self, task_id: &str) -> Option<&WorkerProgress> {
        self.workers.get(task_id)
    }

    /// Workers in a stable order for display.
    pub fn workers_sorted(&self) -> Vec<&WorkerProgress> {
        let mut workers: Vec<&WorkerProgress> = self.workers.values().collect();
        workers.sort_by(|a, b| a.task_id.cmp(&b.task_id));
        workers
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }
}

use crate::error::FetchError;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Identifier of one fetch attempt. Ordered by the registry's sequence, so
/// two ids never collide or compare equal even within one clock tick.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId {
    seq: u64,
    label: String,
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.label, self.seq)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Start,
    Finished,
    Error,
}

#[derive(Debug)]
pub struct Task {
    id: TaskId,
    start_text: String,
    finished_text: String,
    failed_text: String,
    state: TaskState,
    error: Option<FetchError>,
    start_time: DateTime<Utc>,
    finished_time: Option<DateTime<Utc>>,
}

impl Task {
    pub fn new(
        id: TaskId,
        start_text: impl Into<String>,
        finished_text: impl Into<String>,
        failed_text: impl Into<String>,
    ) -> Self {
        Self {
            id,
            start_text: start_text.into(),
            finished_text: finished_text.into(),
            failed_text: failed_text.into(),
            state: TaskState::Start,
            error: None,
            start_time: DateTime::<Utc>::default(),
            finished_time: None,
        }
    }

    pub fn id(&self) -> &TaskId {
        &self.id
    }

    pub fn state(&self) -> TaskState {
        self.state
    }

    pub fn error(&self) -> Option<&FetchError> {
        self.error.as_ref()
    }

    pub fn start_time(&self) -> DateTime<Utc> {
        self.start_time
    }

    pub fn finished_time(&self) -> Option<DateTime<Utc>> {
        self.finished_time
    }

    /// Text for the status bar in the task's current state.
    pub fn text(&self) -> String {
        match self.state {
            TaskState::Start => self.start_text.clone(),
            TaskState::Finished => self.finished_text.clone(),
            TaskState::Error => match self.error() {
                Some(err) => format!("{}: {err}", self.failed_text),
                None => self.failed_text.clone(),
            },
        }
    }

    /// How long the task ran; `None` while still running.
    pub fn duration(&self) -> Option<chrono::Duration> {
        self.finished_time.map(|finished| finished - self.start_time)
    }

    fn finish(&mut self, err: Option<FetchError>, now: DateTime<Utc>) -> bool {
        if self.state != TaskState::Start {
            return false;
        }
        self.state = match err {
            Some(_) => TaskState::Error,
            None => TaskState::Finished,
        };
        self.error = err;
        self.finished_time = Some(now);
        true
    }
}

/// Tasks currently shown in the status bar.
#[derive(Debug, Default)]
pub struct TaskRegistry {
    tasks: BTreeMap<TaskId, Task>,
    expiries: HashMap<TaskId, Instant>,
    next_seq: u64,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_id(&mut self, label: &str) -> TaskId {
        self.next_seq += 1;
        TaskId {
            seq: self.next_seq,
            label: label.to_string(),
        }
    }

    pub fn start(&mut self, mut task: Task, now: DateTime<Utc>) {
        if self.tasks.contains_key(&task.id) {
            warn!(id = %task.id, "task already registered");
            return;
        }
        debug!(id = %task.id, "starting task");
        task.start_time = now;
        self.tasks.insert(task.id.clone(), task);
    }

    /// Moves a running task to `Finished` or `Error`. Unknown, cleared and
    /// already-terminal tasks are left alone and `false` is returned.
    pub fn complete(
        &mut self,
        id: &TaskId,
        err: Option<FetchError>,
        now: DateTime<Utc>,
    ) -> bool {
        match self.tasks.get_mut(id) {
            Some(task) => task.finish(err, now),
            None => {
                debug!(%id, "completion for unknown task");
                false
            }
        }
    }

    pub fn schedule_clear(&mut self, id: &TaskId, after: Duration, now: Instant) {
        if self.tasks.contains_key(id) {
            self.expiries.insert(id.clone(), now + after);
        }
    }

    /// Drops every task whose clear deadline has passed.
    pub fn sweep(&mut self, now: Instant) -> Vec<TaskId> {
        let expired: Vec<TaskId> = self
            .expiries
            .iter()
            .filter(|(_, deadline)| **deadline <= now)
            .map(|(id, _)| id.clone())
            .collect();
        for id in &expired {
            self.expiries.remove(id);
            self.tasks.remove(id);
            debug!(%id, "cleared task");
        }
        expired
    }

    pub fn has_pending(&self) -> bool {
        self.tasks.values().any(|t| t.state == TaskState::Start)
    }

    pub fn get(&self, id: &TaskId) -> Option<&Task> {
        self.tasks.get(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Task> {
        self.tasks.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fetch_error() -> FetchError {
        FetchError::Transport {
            repository: "repo-a".to_string(),
            message: "connection reset".to_string(),
        }
    }

    fn started(registry: &mut TaskRegistry) -> TaskId {
        let id = registry.next_id("fetching_prs_1");
        registry.start(Task::new(id.clone(), "Fetching", "Fetched", "Failed fetching"), Utc::now());
        id
    }

    #[test]
    fn ids_are_unique_and_ordered() {
        let mut registry = TaskRegistry::new();
        let ids: Vec<TaskId> = (0..100).map(|_| registry.next_id("fetching_prs_1")).collect();
        for pair in ids.windows(2) {
            assert!(pair[0] < pair[1]);
            assert_ne!(pair[0].to_string(), pair[1].to_string());
        }
        assert_eq!(ids[0].to_string(), "fetching_prs_1_1");
    }

    #[test]
    fn start_records_start_time() {
        let mut registry = TaskRegistry::new();
        let now = Utc::now();
        let id = registry.next_id("t");
        registry.start(Task::new(id.clone(), "Fetching", "Fetched", "Failed fetching"), now);

        let task = registry.get(&id).unwrap();
        assert_eq!(task.state(), TaskState::Start);
        assert_eq!(task.start_time(), now);
        assert_eq!(task.finished_time(), None);
        assert_eq!(task.duration(), None);
        assert_eq!(task.text(), "Fetching");
        assert!(registry.has_pending());
    }

    #[test]
    fn complete_success_finishes_task() {
        let mut registry = TaskRegistry::new();
        let id = started(&mut registry);
        let now = Utc::now();

        assert!(registry.complete(&id, None, now));
        let task = registry.get(&id).unwrap();
        assert_eq!(task.state(), TaskState::Finished);
        assert_eq!(task.finished_time(), Some(now));
        assert!(task.error().is_none());
        assert_eq!(task.text(), "Fetched");
        assert!(!registry.has_pending());
    }

    #[test]
    fn complete_error_retains_error() {
        let mut registry = TaskRegistry::new();
        let id = started(&mut registry);

        assert!(registry.complete(&id, Some(fetch_error()), Utc::now()));
        let task = registry.get(&id).unwrap();
        assert_eq!(task.state(), TaskState::Error);
        assert_eq!(task.error(), Some(&fetch_error()));
        assert!(task.finished_time().is_some());
        assert_eq!(
            task.text(),
            "Failed fetching: request for repository repo-a failed: connection reset"
        );
    }

    #[test]
    fn terminal_task_is_never_reopened() {
        let mut registry = TaskRegistry::new();
        let id = started(&mut registry);
        let first = Utc::now();
        assert!(registry.complete(&id, None, first));

        assert!(!registry.complete(&id, Some(fetch_error()), Utc::now()));
        let task = registry.get(&id).unwrap();
        assert_eq!(task.state(), TaskState::Finished);
        assert_eq!(task.finished_time(), Some(first));
        assert!(task.error().is_none());
    }

    #[test]
    fn restarting_a_known_id_is_ignored() {
        let mut registry = TaskRegistry::new();
        let id = started(&mut registry);
        registry.complete(&id, None, Utc::now());

        registry.start(Task::new(id.clone(), "again", "again", "again"), Utc::now());
        assert_eq!(registry.get(&id).unwrap().state(), TaskState::Finished);
        assert!(!registry.has_pending());
    }

    #[test]
    fn completing_unknown_task_is_noop() {
        let mut registry = TaskRegistry::new();
        let id = registry.next_id("never-started");
        assert!(!registry.complete(&id, None, Utc::now()));
        assert_eq!(registry.iter().count(), 0);
    }

    #[test]
    fn scheduled_clear_removes_after_deadline() {
        let mut registry = TaskRegistry::new();
        let id = started(&mut registry);
        registry.complete(&id, Some(fetch_error()), Utc::now());

        let now = Instant::now();
        registry.schedule_clear(&id, Duration::from_secs(2), now);

        assert!(registry.sweep(now + Duration::from_secs(1)).is_empty());
        assert!(registry.get(&id).is_some());

        assert_eq!(registry.sweep(now + Duration::from_secs(2)), vec![id.clone()]);
        assert!(registry.get(&id).is_none());

        // A stray completion after clearing is harmless.
        assert!(!registry.complete(&id, None, Utc::now()));
        assert!(registry.sweep(now + Duration::from_secs(10)).is_empty());
    }

    #[test]
    fn schedule_clear_for_unknown_task_is_ignored() {
        let mut registry = TaskRegistry::new();
        let id = registry.next_id("gone");
        let now = Instant::now();
        registry.schedule_clear(&id, Duration::ZERO, now);
        assert!(registry.sweep(now).is_empty());
    }

    #[test]
    fn tasks_iterate_in_start_order() {
        let mut registry = TaskRegistry::new();
        let a = started(&mut registry);
        let b = started(&mut registry);
        let order: Vec<&TaskId> = registry.iter().map(|t| t.id()).collect();
        assert_eq!(order, vec![&a, &b]);
    }

    #[test]
    fn duration_spans_start_to_finish() {
        let mut registry = TaskRegistry::new();
        let start = Utc::now();
        let id = registry.next_id("t");
        registry.start(Task::new(id.clone(), "a", "b", "c"), start);
        registry.complete(&id, None, start + chrono::Duration::milliseconds(1500));
        assert_eq!(
            registry.get(&id).unwrap().duration(),
            Some(chrono::Duration::milliseconds(1500))
        );
    }
}

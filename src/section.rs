use crate::app::Command;
use crate::azdo::PullRequests;
use crate::config::Config;
use crate::error::FetchError;
use crate::task::{TaskId, TaskRegistry};
use chrono::{DateTime, Utc};
use crossterm::event::KeyCode;
use ratatui::layout::Rect;
use ratatui::Frame;

/// Data a section fetch hands back to its section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SectionPayload {
    PullRequests(PullRequests),
}

pub type FetchOutcome = Result<SectionPayload, FetchError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchState {
    Idle,
    Fetching,
}

/// What happened to a fetch outcome handed to [`Section::apply`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    Updated,
    /// The fetch failed; previous items stay in place.
    Failed,
    /// A newer fetch has started since; the outcome was dropped.
    Stale,
}

pub struct FetchContext<'a> {
    pub config: &'a Config,
    pub tasks: &'a mut TaskRegistry,
    pub now: DateTime<Utc>,
}

pub trait Section {
    fn id(&self) -> usize;
    fn section_type(&self) -> &'static str;
    fn fetch_state(&self) -> FetchState;
    fn last_fetch_task_id(&self) -> Option<&TaskId>;
    /// Rows currently held.
    fn item_count(&self) -> usize;
    /// Count reported by the source for the last applied fetch.
    fn total_count(&self) -> usize;

    /// Registers a new task and returns the command that performs the fetch.
    fn start_fetch(&mut self, ctx: FetchContext<'_>) -> Command;

    /// Applies `outcome` only if `task_id` is the most recently started fetch.
    fn apply(&mut self, task_id: &TaskId, outcome: FetchOutcome) -> Applied;

    fn handle_key(&mut self, code: KeyCode);
    fn draw(&mut self, frame: &mut Frame, area: Rect);
}

/// Fetch bookkeeping shared by every section.
#[derive(Debug, Clone)]
pub struct SectionModel {
    id: usize,
    section_type: &'static str,
    last_fetch_task_id: Option<TaskId>,
    in_flight: bool,
}

impl SectionModel {
    pub fn new(id: usize, section_type: &'static str) -> Self {
        Self {
            id,
            section_type,
            last_fetch_task_id: None,
            in_flight: false,
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn section_type(&self) -> &'static str {
        self.section_type
    }

    pub fn last_fetch_task_id(&self) -> Option<&TaskId> {
        self.last_fetch_task_id.as_ref()
    }

    pub fn fetch_state(&self) -> FetchState {
        if self.in_flight {
            FetchState::Fetching
        } else {
            FetchState::Idle
        }
    }

    pub fn begin_fetch(&mut self, task_id: TaskId) {
        self.last_fetch_task_id = Some(task_id);
        self.in_flight = true;
    }

    /// Staleness guard: true iff `task_id` is the latest fetch. Accepting
    /// the latest fetch returns the section to idle.
    pub fn accept(&mut self, task_id: &TaskId) -> bool {
        if self.last_fetch_task_id.as_ref() != Some(task_id) {
            return false;
        }
        self.in_flight = false;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_only_latest_fetch() {
        let mut tasks = TaskRegistry::new();
        let first = tasks.next_id("s");
        let second = tasks.next_id("s");
        let mut model = SectionModel::new(1, "pr");
        assert_eq!(model.fetch_state(), FetchState::Idle);

        model.begin_fetch(first.clone());
        model.begin_fetch(second.clone());
        assert_eq!(model.fetch_state(), FetchState::Fetching);
        assert_eq!(model.last_fetch_task_id(), Some(&second));

        assert!(!model.accept(&first));
        assert_eq!(model.fetch_state(), FetchState::Fetching);

        assert!(model.accept(&second));
        assert_eq!(model.fetch_state(), FetchState::Idle);
    }

    #[test]
    fn rejects_everything_before_first_fetch() {
        let mut tasks = TaskRegistry::new();
        let mut model = SectionModel::new(3, "pr");
        assert!(!model.accept(&tasks.next_id("s")));
        assert_eq!(model.id(), 3);
        assert_eq!(model.section_type(), "pr");
    }
}

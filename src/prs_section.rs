use crate::app::Command;
use crate::azdo::{FetchSpec, PullRequestRecord, PullRequestStatus, Vote};
use crate::config::Config;
use crate::section::{
    Applied, FetchContext, FetchOutcome, FetchState, Section, SectionModel, SectionPayload,
};
use crate::task::{Task, TaskId};
use crossterm::event::KeyCode;
use ratatui::layout::{Constraint, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::Span;
use ratatui::widgets::{Block, Borders, Cell, Row, Table, TableState};
use ratatui::Frame;

pub const SECTION_TYPE: &str = "pr";

/// One fetch spec per configured repository, in configuration order.
pub fn fetch_specs(config: &Config) -> Vec<FetchSpec> {
    config
        .projects
        .iter()
        .flat_map(|project| {
            project.repo_ids.iter().map(|repo_id| FetchSpec {
                organization: config.org_name.clone(),
                project_id: project.id.clone(),
                repository_id: repo_id.clone(),
                credential: config.personal_access_token.clone(),
            })
        })
        .collect()
}

pub struct PrSection {
    model: SectionModel,
    items: Vec<PullRequestRecord>,
    total_count: usize,
    failed_repositories: Vec<String>,
    table_state: TableState,
}

impl PrSection {
    pub fn new(id: usize) -> Self {
        Self {
            model: SectionModel::new(id, SECTION_TYPE),
            items: Vec::new(),
            total_count: 0,
            failed_repositories: Vec::new(),
            table_state: TableState::default(),
        }
    }

    fn clamp_selection(&mut self) {
        let selected = match (self.items.len(), self.table_state.selected()) {
            (0, _) => None,
            (len, Some(i)) => Some(i.min(len - 1)),
            (_, None) => Some(0),
        };
        self.table_state.select(selected);
    }

    fn next(&mut self) {
        if self.items.is_empty() {
            return;
        }
        let i = match self.table_state.selected() {
            Some(i) => (i + 1) % self.items.len(),
            None => 0,
        };
        self.table_state.select(Some(i));
    }

    fn previous(&mut self) {
        if self.items.is_empty() {
            return;
        }
        let i = match self.table_state.selected() {
            Some(0) | None => self.items.len() - 1,
            Some(i) => i - 1,
        };
        self.table_state.select(Some(i));
    }

    fn title(&self) -> String {
        let mut title = format!(" Pull requests ({}) ", self.total_count);
        if self.model.fetch_state() == FetchState::Fetching {
            title.push_str("· refreshing ");
        }
        if !self.failed_repositories.is_empty() {
            title.push_str(&format!(
                "· failed: {} ",
                self.failed_repositories.join(", ")
            ));
        }
        title
    }
}

fn status_cell(status: &PullRequestStatus) -> Cell<'_> {
    let (text, color) = match status {
        PullRequestStatus::Active => ("●", Color::Green),
        PullRequestStatus::Completed => ("●", Color::Cyan),
        PullRequestStatus::Draft => ("●", Color::DarkGray),
        PullRequestStatus::Abandoned => ("●", Color::Red),
        PullRequestStatus::Other(raw) => (raw.as_str(), Color::Reset),
    };
    Cell::from(Span::styled(text, Style::default().fg(color)))
}

fn bool_cell(value: bool) -> Cell<'static> {
    if value {
        Cell::from(Span::styled("✓", Style::default().fg(Color::Green)))
    } else {
        Cell::from(Span::styled("✗", Style::default().fg(Color::Red)))
    }
}

fn vote_cell(record: &PullRequestRecord) -> Cell<'static> {
    let color = match record.vote {
        Vote::Approved => Color::Green,
        Vote::ApprovedWithSuggestions => Color::Yellow,
        Vote::WaitingForAuthor => Color::Blue,
        Vote::Rejected => Color::Red,
        Vote::NoVote => Color::Reset,
    };
    Cell::from(Span::styled(record.vote.symbol(), Style::default().fg(color)))
}

impl Section for PrSection {
    fn id(&self) -> usize {
        self.model.id()
    }

    fn section_type(&self) -> &'static str {
        self.model.section_type()
    }

    fn fetch_state(&self) -> FetchState {
        self.model.fetch_state()
    }

    fn last_fetch_task_id(&self) -> Option<&TaskId> {
        self.model.last_fetch_task_id()
    }

    fn item_count(&self) -> usize {
        self.items.len()
    }

    fn total_count(&self) -> usize {
        self.total_count
    }

    fn start_fetch(&mut self, ctx: FetchContext<'_>) -> Command {
        let specs = fetch_specs(ctx.config);
        let org = &ctx.config.org_name;
        let task_id = ctx.tasks.next_id(&format!("fetching_prs_{}", self.model.id()));
        let task = Task::new(
            task_id.clone(),
            format!("Fetching PRs for \"{org}\""),
            format!("PRs for \"{org}\" have been fetched"),
            format!("Failed fetching PRs for \"{org}\""),
        );
        ctx.tasks.start(task, ctx.now);
        self.model.begin_fetch(task_id.clone());

        Command::FetchPullRequests {
            section_id: self.model.id(),
            section_type: SECTION_TYPE,
            task_id,
            specs,
        }
    }

    fn apply(&mut self, task_id: &TaskId, outcome: FetchOutcome) -> Applied {
        if !self.model.accept(task_id) {
            return Applied::Stale;
        }
        match outcome {
            Err(_) => Applied::Failed,
            Ok(SectionPayload::PullRequests(prs)) => {
                self.items = prs.records;
                self.total_count = prs.total_count;
                self.failed_repositories = prs
                    .failures
                    .iter()
                    .map(|f| f.repository().to_string())
                    .collect();
                self.clamp_selection();
                Applied::Updated
            }
        }
    }

    fn handle_key(&mut self, code: KeyCode) {
        match code {
            KeyCode::Char('j') | KeyCode::Down => self.next(),
            KeyCode::Char('k') | KeyCode::Up => self.previous(),
            KeyCode::Char('g') | KeyCode::Home => {
                if !self.items.is_empty() {
                    self.table_state.select(Some(0));
                }
            }
            KeyCode::Char('G') | KeyCode::End => {
                if !self.items.is_empty() {
                    self.table_state.select(Some(self.items.len() - 1));
                }
            }
            _ => {}
        }
    }

    fn draw(&mut self, frame: &mut Frame, area: Rect) {
        let header = Row::new([
            "Repository",
            "Title",
            "Created by",
            "Status",
            "Required",
            "Vote",
            "Source branch",
            "Merge",
            "Draft",
        ])
        .style(
            Style::default()
                .fg(Color::Magenta)
                .add_modifier(Modifier::BOLD),
        );

        let rows = self.items.iter().map(|pr| {
            Row::new(vec![
                Cell::from(Span::styled(
                    pr.repository_label(),
                    Style::default().fg(Color::Cyan),
                )),
                Cell::from(format!("#{} {}", pr.id, pr.title)),
                Cell::from(Span::styled(
                    pr.created_by.as_str(),
                    Style::default().fg(Color::Green),
                )),
                status_cell(&pr.status),
                bool_cell(pr.is_required_reviewer),
                vote_cell(pr),
                Cell::from(pr.branch_name()),
                Cell::from(pr.merge_status.as_str()),
                bool_cell(pr.is_draft),
            ])
        });

        let widths = [
            Constraint::Length(22),
            Constraint::Min(20),
            Constraint::Length(22),
            Constraint::Length(8),
            Constraint::Length(8),
            Constraint::Length(6),
            Constraint::Length(22),
            Constraint::Length(10),
            Constraint::Length(6),
        ];

        let table = Table::new(rows, widths)
            .header(header)
            .block(Block::default().borders(Borders::ALL).title(self.title()))
            .row_highlight_style(
                Style::default()
                    .bg(Color::DarkGray)
                    .add_modifier(Modifier::BOLD),
            )
            .highlight_symbol("▶ ");

        frame.render_stateful_widget(table, area, &mut self.table_state);
    }
}

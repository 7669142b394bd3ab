use crate::app::{App, Executor, Message};
use crate::azdo::RemoteDataSource;
use crate::config::Config;
use crate::task::{Task, TaskState};
use anyhow::{Context, Result};
use chrono::Utc;
use crossterm::event::{self, Event};
use crossterm::terminal::{
    disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen,
};
use crossterm::ExecutableCommand;
use ratatui::backend::CrosstermBackend;
use ratatui::layout::{Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, Paragraph};
use ratatui::{Frame, Terminal};
use std::io::{self, Stdout};
use std::sync::mpsc::{self, Sender};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{error, info};

const TICK_RATE: Duration = Duration::from_millis(100);

fn task_span(task: &Task, spinner: &'static str) -> Vec<Span<'static>> {
    match task.state() {
        TaskState::Start => {
            let elapsed = (Utc::now() - task.start_time()).num_seconds().max(0);
            vec![
                Span::styled(format!("{spinner} "), Style::default().fg(Color::Yellow)),
                Span::raw(format!("{} ({elapsed}s)", task.text())),
            ]
        }
        TaskState::Finished => {
            let took = task
                .duration()
                .map(|d| format!(" in {:.1}s", d.num_milliseconds() as f64 / 1000.0))
                .unwrap_or_default();
            vec![
                Span::styled("✓ ", Style::default().fg(Color::Green)),
                Span::raw(format!("{}{took}", task.text())),
            ]
        }
        TaskState::Error => vec![
            Span::styled("✗ ", Style::default().fg(Color::Red)),
            Span::styled(task.text(), Style::default().fg(Color::Red)),
        ],
    }
}

fn draw_status(frame: &mut Frame, app: &App, area: Rect) {
    let mut spans = Vec::new();
    for task in app.tasks().iter() {
        if !spans.is_empty() {
            spans.push(Span::raw("  │  "));
        }
        spans.extend(task_span(task, app.spinner()));
    }
    let status = Paragraph::new(Line::from(spans))
        .block(Block::default().borders(Borders::ALL).title(" Status "));
    frame.render_widget(status, area);
}

pub fn draw(frame: &mut Frame, app: &mut App) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Min(0),
            Constraint::Length(3),
            Constraint::Length(3),
        ])
        .split(frame.area());

    let counts = match app.current_section_mut() {
        Some(section) => {
            section.draw(frame, chunks[0]);
            format!("{} shown · {} total", section.item_count(), section.total_count())
        }
        None => {
            frame.render_widget(Paragraph::new("No sections defined..."), chunks[0]);
            String::new()
        }
    };

    draw_status(frame, app, chunks[1]);

    let help = Paragraph::new(Line::from(vec![
        Span::raw(" j/k: navigate | g/G: top/bottom | r: refresh | q: quit   "),
        Span::styled(counts, Style::default().add_modifier(Modifier::DIM)),
    ]))
    .style(Style::default().fg(Color::DarkGray))
    .block(Block::default().borders(Borders::ALL).title(" Help "));
    frame.render_widget(help, chunks[2]);
}

/// Paces ticks on wall-clock time, so key traffic cannot starve them.
struct TickClock {
    rate: Duration,
    last: Instant,
}

impl TickClock {
    fn new(rate: Duration, now: Instant) -> Self {
        Self { rate, last: now }
    }

    /// How long input polling may block before the next tick is due.
    fn timeout(&self, now: Instant) -> Duration {
        self.rate.saturating_sub(now.duration_since(self.last))
    }

    fn poll_tick(&mut self, now: Instant) -> Option<Instant> {
        if now.duration_since(self.last) < self.rate {
            return None;
        }
        self.last = now;
        Some(now)
    }
}

/// Forwards terminal input into the event loop's queue, plus a tick every
/// [`TICK_RATE`].
fn spawn_input(tx: Sender<Message>) {
    thread::spawn(move || {
        let mut clock = TickClock::new(TICK_RATE, Instant::now());
        loop {
            match event::poll(clock.timeout(Instant::now())) {
                Ok(true) => match event::read() {
                    Ok(Event::Key(key)) => {
                        if tx.send(Message::Key(key)).is_err() {
                            break;
                        }
                    }
                    Ok(_) => {}
                    Err(e) => {
                        error!(error = %e, "reading terminal event");
                        break;
                    }
                },
                Ok(false) => {}
                Err(e) => {
                    error!(error = %e, "polling terminal events");
                    break;
                }
            }
            if let Some(now) = clock.poll_tick(Instant::now()) {
                if tx.send(Message::Tick(now)).is_err() {
                    break;
                }
            }
        }
    });
}

fn setup_terminal() -> Result<Terminal<CrosstermBackend<Stdout>>> {
    enable_raw_mode().context("Failed to enable raw mode")?;
    let mut stdout = io::stdout();
    stdout.execute(EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let terminal = Terminal::new(backend)?;
    Ok(terminal)
}

fn restore_terminal(terminal: &mut Terminal<CrosstermBackend<Stdout>>) -> Result<()> {
    disable_raw_mode().context("Failed to disable raw mode")?;
    terminal.backend_mut().execute(LeaveAlternateScreen)?;
    terminal.show_cursor()?;
    Ok(())
}

pub fn run(config: Config, source: Arc<dyn RemoteDataSource>) -> Result<()> {
    let mut terminal = setup_terminal()?;

    let result = (|| -> Result<()> {
        let (tx, rx) = mpsc::channel();
        spawn_input(tx.clone());
        let executor = Executor::new(source, tx);

        let mut app = App::new(config);
        executor.run(app.init());
        terminal.draw(|f| draw(f, &mut app))?;

        // One render per processed message.
        while let Ok(msg) = rx.recv() {
            let commands = app.update(msg);
            executor.run(commands);
            if app.should_quit() {
                info!("quitting");
                break;
            }
            terminal.draw(|f| draw(f, &mut app))?;
        }
        Ok(())
    })();

    restore_terminal(&mut terminal)?;
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::TaskFinished;
    use crate::azdo::{PullRequestRecord, PullRequestStatus, PullRequests, Vote};
    use crate::config::ProjectConfig;
    use crate::error::FetchError;
    use crate::section::SectionPayload;
    use ratatui::backend::TestBackend;

    fn config() -> Config {
        Config {
            org_name: "contoso".to_string(),
            personal_access_token: "abc123".to_string(),
            projects: vec![ProjectConfig {
                id: "proj".to_string(),
                repo_ids: vec!["repo-a".to_string()],
            }],
            ..Config::default()
        }
    }

    fn render(app: &mut App) -> String {
        let mut terminal = Terminal::new(TestBackend::new(160, 20)).unwrap();
        terminal.draw(|f| draw(f, app)).unwrap();
        let buffer = terminal.backend().buffer();
        let width = buffer.area.width as usize;
        buffer
            .content()
            .chunks(width)
            .map(|row| row.iter().map(|cell| cell.symbol()).collect::<String>())
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn task_id(app: &mut App) -> crate::task::TaskId {
        match app.init().remove(0) {
            crate::app::Command::FetchPullRequests { task_id, .. } => task_id,
        }
    }

    #[test]
    fn ticks_keep_pace_under_constant_input() {
        let start = Instant::now();
        let mut clock = TickClock::new(TICK_RATE, start);
        assert_eq!(clock.timeout(start + Duration::from_millis(40)), Duration::from_millis(60));

        // A key every 30 ms never lets polling time out, yet ticks still fire.
        let ticks: Vec<Instant> = (1..=10)
            .map(|i| start + Duration::from_millis(30 * i))
            .filter_map(|now| clock.poll_tick(now))
            .collect();
        assert_eq!(
            ticks,
            vec![
                start + Duration::from_millis(120),
                start + Duration::from_millis(240),
            ]
        );
        assert_eq!(clock.timeout(start + Duration::from_millis(400)), Duration::ZERO);
    }

    #[test]
    fn renders_pending_fetch() {
        let mut app = App::new(config());
        task_id(&mut app);
        let screen = render(&mut app);
        assert!(screen.contains("Pull requests (0)"));
        assert!(screen.contains("Fetching PRs for \"contoso\""));
        assert!(screen.contains("r: refresh"));
    }

    #[test]
    fn renders_fetched_rows() {
        let mut app = App::new(config());
        let id = task_id(&mut app);
        let record = PullRequestRecord {
            id: 42,
            title: "Add login page".to_string(),
            status: PullRequestStatus::Active,
            merge_status: "succeeded".to_string(),
            source_branch: "refs/heads/feature/login".to_string(),
            created_by: "Alex".to_string(),
            is_draft: false,
            repository_id: "repo-a-id".to_string(),
            repository_name: "repo-a".to_string(),
            is_required_reviewer: true,
            vote: Vote::Approved,
        };
        app.update(Message::TaskFinished(TaskFinished {
            section_id: 1,
            section_type: "pr",
            task_id: id,
            outcome: Ok(SectionPayload::PullRequests(PullRequests {
                records: vec![record],
                total_count: 1,
                failures: Vec::new(),
            })),
        }));

        let screen = render(&mut app);
        assert!(screen.contains("Pull requests (1)"));
        assert!(screen.contains("#42 Add login page"));
        assert!(screen.contains("feature/login"));
        assert!(screen.contains("have been fetched"));
        assert!(screen.contains("1 shown · 1 total"));
    }

    #[test]
    fn renders_fetch_error() {
        let mut app = App::new(config());
        let id = task_id(&mut app);
        app.update(Message::TaskFinished(TaskFinished {
            section_id: 1,
            section_type: "pr",
            task_id: id,
            outcome: Err(FetchError::Status {
                repository: "repo-a".to_string(),
                status: 401,
                body: "denied".to_string(),
            }),
        }));

        let screen = render(&mut app);
        assert!(screen.contains("Failed fetching PRs for \"contoso\": repository repo-a"));
        assert!(screen.contains("HTTP 401"));
    }
}

use crate::azdo::{FetchSpec, RemoteDataSource};
use crate::config::Config;
use crate::prs_section::PrSection;
use crate::section::{Applied, FetchContext, FetchOutcome, Section, SectionPayload};
use crate::task::{TaskId, TaskRegistry};
use chrono::Utc;
use crossterm::event::{KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use std::sync::mpsc::Sender;
use std::sync::Arc;
use std::thread;
use std::time::Instant;
use tracing::{debug, error, info, warn};

pub const SPINNER_FRAMES: [&str; 10] = ["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"];

/// Result of a background fetch, tagged with the section and task it belongs to.
#[derive(Debug)]
pub struct TaskFinished {
    pub section_id: usize,
    pub section_type: &'static str,
    pub task_id: TaskId,
    pub outcome: FetchOutcome,
}

#[derive(Debug)]
pub enum Message {
    Key(KeyEvent),
    Tick(Instant),
    TaskFinished(TaskFinished),
}

/// Work the event loop hands off to background threads.
#[derive(Debug)]
pub enum Command {
    FetchPullRequests {
        section_id: usize,
        section_type: &'static str,
        task_id: TaskId,
        specs: Vec<FetchSpec>,
    },
}

/// Owns all state visible to rendering. Only `update` mutates it.
pub struct App {
    config: Config,
    tasks: TaskRegistry,
    sections: Vec<Box<dyn Section>>,
    current: usize,
    spinner_frame: usize,
    should_quit: bool,
}

impl App {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            tasks: TaskRegistry::new(),
            sections: vec![Box::new(PrSection::new(1))],
            current: 0,
            spinner_frame: 0,
            should_quit: false,
        }
    }

    /// Starts the initial fetch of every section.
    pub fn init(&mut self) -> Vec<Command> {
        let mut commands = Vec::with_capacity(self.sections.len());
        for section in &mut self.sections {
            commands.push(section.start_fetch(FetchContext {
                config: &self.config,
                tasks: &mut self.tasks,
                now: Utc::now(),
            }));
        }
        commands
    }

    pub fn update(&mut self, msg: Message) -> Vec<Command> {
        match msg {
            Message::Key(key) => self.handle_key(key),
            Message::Tick(now) => {
                self.handle_tick(now);
                Vec::new()
            }
            Message::TaskFinished(finished) => {
                self.handle_task_finished(finished);
                Vec::new()
            }
        }
    }

    pub fn should_quit(&self) -> bool {
        self.should_quit
    }

    pub fn tasks(&self) -> &TaskRegistry {
        &self.tasks
    }

    pub fn spinner(&self) -> &'static str {
        SPINNER_FRAMES[self.spinner_frame % SPINNER_FRAMES.len()]
    }

    pub fn current_section_mut(&mut self) -> Option<&mut (dyn Section + 'static)> {
        self.sections.get_mut(self.current).map(|s| &mut **s)
    }

    fn handle_key(&mut self, key: KeyEvent) -> Vec<Command> {
        if key.kind != KeyEventKind::Press {
            return Vec::new();
        }
        match key.code {
            KeyCode::Char('q') | KeyCode::Esc => self.should_quit = true,
            KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => {
                self.should_quit = true
            }
            KeyCode::Char('r') => return self.refresh_current().into_iter().collect(),
            code => {
                if let Some(section) = self.current_section_mut() {
                    section.handle_key(code);
                }
            }
        }
        Vec::new()
    }

    fn refresh_current(&mut self) -> Option<Command> {
        let section = self.sections.get_mut(self.current)?;
        info!(
            section = section.id(),
            state = ?section.fetch_state(),
            "refreshing section"
        );
        Some(section.start_fetch(FetchContext {
            config: &self.config,
            tasks: &mut self.tasks,
            now: Utc::now(),
        }))
    }

    fn handle_tick(&mut self, now: Instant) {
        if self.tasks.has_pending() {
            self.spinner_frame = (self.spinner_frame + 1) % SPINNER_FRAMES.len();
        }
        self.tasks.sweep(now);
    }

    fn handle_task_finished(&mut self, finished: TaskFinished) {
        let TaskFinished {
            section_id,
            section_type,
            task_id,
            outcome,
        } = finished;

        let err = outcome.as_ref().err().cloned();
        if let Some(err) = &err {
            error!(task = %task_id, error = %err, "task finished with error");
        }
        let completed = self.tasks.complete(&task_id, err, Utc::now());
        if completed {
            if let Some(task) = self.tasks.get(&task_id) {
                debug!(
                    task = %task.id(),
                    finished_at = ?task.finished_time(),
                    elapsed = ?task.duration(),
                    "task finished"
                );
            }
        }

        let section = self
            .sections
            .iter_mut()
            .find(|s| s.id() == section_id && s.section_type() == section_type);
        match section {
            Some(section) => match section.apply(&task_id, outcome) {
                Applied::Updated | Applied::Failed => {}
                Applied::Stale => debug!(
                    task = %task_id,
                    current = ?section.last_fetch_task_id().map(ToString::to_string),
                    "discarding stale result"
                ),
            },
            None => warn!(section_id, section_type, "result for unknown section"),
        }

        // Duplicate completions must not push an existing deadline out.
        if completed {
            self.tasks
                .schedule_clear(&task_id, self.config.task_clear_after(), Instant::now());
        }
    }
}

/// Runs commands off the event loop. Workers never touch `App`; they only
/// send a [`Message`] back.
pub struct Executor {
    source: Arc<dyn RemoteDataSource>,
    tx: Sender<Message>,
}

impl Executor {
    pub fn new(source: Arc<dyn RemoteDataSource>, tx: Sender<Message>) -> Self {
        Self { source, tx }
    }

    pub fn run(&self, commands: Vec<Command>) {
        for command in commands {
            self.spawn(command);
        }
    }

    fn spawn(&self, command: Command) {
        match command {
            Command::FetchPullRequests {
                section_id,
                section_type,
                task_id,
                specs,
            } => {
                let source = Arc::clone(&self.source);
                let tx = self.tx.clone();
                thread::spawn(move || {
                    let outcome = source
                        .fetch_pull_requests(&specs)
                        .map(SectionPayload::PullRequests);
                    let msg = Message::TaskFinished(TaskFinished {
                        section_id,
                        section_type,
                        task_id,
                        outcome,
                    });
                    // The loop has exited if the receiver is gone.
                    let _ = tx.send(msg);
                });
            }
        }
    }
}

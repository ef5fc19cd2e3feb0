//! Main TUI application state and logic

use crate::artifact::CompiledArtifact;
use crate::config::BuildConfiguration;
use crate::engine::DiagnosticEngine;
use crate::error::EngineError;
use crate::executor::{CancellationToken, RunResults};
use crate::log::LogMessage;
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind};
use ratatui::{
    backend::Backend,
    layout::{Constraint, Direction, Layout},
    Frame, Terminal,
};
use std::io;
use std::sync::mpsc::Receiver;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Which pane is currently focused
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FocusedPane {
    Source,
    Log,
    Chart,
    Il,
    Asm,
}

impl FocusedPane {
    /// Move focus to the next pane (clockwise: source -> chart -> il -> asm -> log)
    pub fn next(self) -> Self {
        match self {
            FocusedPane::Source => FocusedPane::Chart,
            FocusedPane::Chart => FocusedPane::Il,
            FocusedPane::Il => FocusedPane::Asm,
            FocusedPane::Asm => FocusedPane::Log,
            FocusedPane::Log => FocusedPane::Source,
        }
    }

    pub fn prev(self) -> Self {
        match self {
            FocusedPane::Source => FocusedPane::Log,
            FocusedPane::Chart => FocusedPane::Source,
            FocusedPane::Il => FocusedPane::Chart,
            FocusedPane::Asm => FocusedPane::Il,
            FocusedPane::Log => FocusedPane::Asm,
        }
    }
}

/// A run on the background thread
struct RunningScript {
    artifact: Arc<CompiledArtifact>,
    token: CancellationToken,
    handle: JoinHandle<Result<bool, EngineError>>,
}

/// The main application state
pub struct App {
    engine: Arc<DiagnosticEngine>,
    log_receiver: Receiver<LogMessage>,

    pub source: String,
    pub argument: String,
    pub build: BuildConfiguration,

    pub focused_pane: FocusedPane,

    /// Per-pane scroll offsets
    pub source_scroll: usize,
    pub log_scroll: usize,
    pub il_scroll: usize,
    pub asm_scroll: usize,

    pub log: Vec<LogMessage>,
    pub il: String,
    pub asm: String,
    pub results: Arc<RunResults>,
    pub fault_line: Option<usize>,

    artifact: Option<Arc<CompiledArtifact>>,
    running: Option<RunningScript>,

    pub should_quit: bool,
    pub status_message: String,
    pub has_error: bool,
}

impl App {
    /// `log_receiver` must be the receiving end of the engine's log channel
    pub fn new(
        engine: DiagnosticEngine,
        log_receiver: Receiver<LogMessage>,
        source: String,
        argument: String,
        build: BuildConfiguration,
    ) -> Self {
        let mut app = App {
            engine: Arc::new(engine),
            log_receiver,
            source,
            argument,
            build,
            focused_pane: FocusedPane::Source,
            source_scroll: 0,
            log_scroll: 0,
            il_scroll: 0,
            asm_scroll: 0,
            log: Vec::new(),
            il: String::new(),
            asm: String::new(),
            results: Arc::new(RunResults::empty()),
            fault_line: None,
            artifact: None,
            running: None,
            should_quit: false,
            status_message: String::from("Ready!"),
            has_error: false,
        };
        app.compile();
        app
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    /// Run the TUI application
    pub fn run<B: Backend>(&mut self, terminal: &mut Terminal<B>) -> io::Result<()> {
        loop {
            self.drain_log();
            self.poll_run();

            terminal.draw(|f| self.render(f))?;

            if self.should_quit {
                break;
            }

            if event::poll(Duration::from_millis(50))? {
                if let Event::Key(key) = event::read()? {
                    if key.kind == KeyEventKind::Press {
                        self.handle_key_event(key);
                    }
                }
            }
        }

        // Don't leave a worker spinning after the terminal is restored
        if let Some(running) = self.running.take() {
            running.token.cancel();
            let _ = running.handle.join();
        }

        Ok(())
    }

    fn drain_log(&mut self) {
        let before = self.log.len();
        self.log.extend(self.log_receiver.try_iter());
        if self.log.len() != before {
            self.log_scroll = usize::MAX;
        }
    }

    /// Compile the current source for the selected build. Refreshes the IL
    /// listing; the native listing depends on the code generation strategy.
    fn compile(&mut self) {
        self.fault_line = None;
        match self
            .engine
            .compile(&self.source, self.build.mode, self.build.platform)
        {
            Ok(artifact) => {
                self.il = artifact.dump_il();
                self.asm = match artifact.dump_asm() {
                    Ok(asm) => asm,
                    Err(unavailable) => format!("; {unavailable}"),
                };
                self.results = artifact.results();
                self.artifact = Some(Arc::new(artifact));
                self.status_message = format!("Compiled for {}", self.build);
                self.has_error = false;
            }
            Err(err) => {
                self.il = err
                    .diagnostics
                    .iter()
                    .map(|d| format!("// {d}"))
                    .collect::<Vec<_>>()
                    .join("\n");
                self.asm.clear();
                self.fault_line = err.diagnostics.iter().find(|d| d.is_error()).map(|d| d.line);
                self.artifact = None;
                self.status_message = "Compilation failed".to_string();
                self.has_error = true;
            }
        }
        self.il_scroll = 0;
        self.asm_scroll = 0;
    }

    fn start_run(&mut self) {
        if self.running.is_some() {
            self.status_message = "A run is already in progress".to_string();
            return;
        }

        self.compile();
        let Some(artifact) = self.artifact.clone() else {
            return;
        };

        let token = CancellationToken::new();
        let worker_artifact = Arc::clone(&artifact);
        let worker_token = token.clone();
        let argument = self.argument.clone();
        let spawned = thread::Builder::new()
            .name("tune-ui-run".to_string())
            .spawn(move || worker_artifact.execute_with(&argument, &worker_token));

        match spawned {
            Ok(handle) => {
                self.running = Some(RunningScript {
                    artifact,
                    token,
                    handle,
                });
                self.status_message = "Running...".to_string();
            }
            Err(err) => {
                self.status_message = format!("Could not start run: {err}");
                self.has_error = true;
            }
        }
    }

    fn poll_run(&mut self) {
        if !self
            .running
            .as_ref()
            .is_some_and(|running| running.handle.is_finished())
        {
            return;
        }
        let Some(running) = self.running.take() else {
            return;
        };

        let outcome = running.handle.join();
        self.results = running.artifact.results();
        self.asm = match running.artifact.dump_asm() {
            Ok(asm) => asm,
            Err(unavailable) => format!("; {unavailable}"),
        };
        let fault = self.results.report.fault.as_ref();
        self.fault_line = fault.and_then(|f| f.line);

        (self.status_message, self.has_error) = match outcome {
            Ok(Ok(true)) => match &self.results.report.return_value {
                Some(value) => (format!("Run succeeded, returned {value}"), false),
                None => ("Run succeeded".to_string(), false),
            },
            Ok(Ok(false)) => match fault {
                Some(fault) => (format!("Run failed: {fault}"), true),
                None => ("Run failed".to_string(), true),
            },
            Ok(Err(EngineError::CancellationRequested)) => ("Run cancelled".to_string(), false),
            Ok(Err(err)) => (err.to_string(), true),
            Err(_) => ("Run thread panicked".to_string(), true),
        };
    }

    fn cancel_run(&mut self) {
        match &self.running {
            Some(running) => {
                running.artifact.cancel();
                running.token.cancel();
                self.status_message = "Cancelling...".to_string();
            }
            None => self.status_message = "Nothing to cancel".to_string(),
        }
    }

    /// Render the UI
    fn render(&mut self, frame: &mut Frame) {
        let size = frame.area();

        let main_chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints([Constraint::Min(0), Constraint::Length(1)])
            .split(size);

        let columns = Layout::default()
            .direction(Direction::Horizontal)
            .constraints([Constraint::Percentage(45), Constraint::Percentage(55)])
            .split(main_chunks[0]);

        // Left column: Source (top) | Log (bottom)
        let left_rows = Layout::default()
            .direction(Direction::Vertical)
            .constraints([Constraint::Percentage(60), Constraint::Percentage(40)])
            .split(columns[0]);

        // Right column: Chart (top) | IL + ASM (bottom)
        let right_rows = Layout::default()
            .direction(Direction::Vertical)
            .constraints([Constraint::Percentage(45), Constraint::Percentage(55)])
            .split(columns[1]);

        let listings = Layout::default()
            .direction(Direction::Horizontal)
            .constraints([Constraint::Percentage(50), Constraint::Percentage(50)])
            .split(right_rows[1]);

        super::panes::render_source_pane(
            frame,
            left_rows[0],
            &self.source,
            self.fault_line,
            self.focused_pane == FocusedPane::Source,
            &mut self.source_scroll,
        );

        super::panes::render_log_pane(
            frame,
            left_rows[1],
            &self.log,
            self.focused_pane == FocusedPane::Log,
            &mut self.log_scroll,
        );

        super::panes::render_chart_pane(
            frame,
            right_rows[0],
            &self.results,
            self.focused_pane == FocusedPane::Chart,
        );

        super::panes::render_listing_pane(
            frame,
            listings[0],
            " IL ",
            &self.il,
            self.focused_pane == FocusedPane::Il,
            &mut self.il_scroll,
        );

        super::panes::render_listing_pane(
            frame,
            listings[1],
            " Native ",
            &self.asm,
            self.focused_pane == FocusedPane::Asm,
            &mut self.asm_scroll,
        );

        super::panes::render_status_bar(
            frame,
            main_chunks[1],
            &super::panes::StatusRenderData {
                message: &self.status_message,
                build: self.build,
                is_running: self.is_running(),
                has_error: self.has_error,
            },
        );
    }

    fn focused_scroll(&mut self) -> Option<&mut usize> {
        match self.focused_pane {
            FocusedPane::Source => Some(&mut self.source_scroll),
            FocusedPane::Log => Some(&mut self.log_scroll),
            FocusedPane::Il => Some(&mut self.il_scroll),
            FocusedPane::Asm => Some(&mut self.asm_scroll),
            FocusedPane::Chart => None,
        }
    }

    /// Handle keyboard events
    fn handle_key_event(&mut self, key: KeyEvent) {
        match key.code {
            KeyCode::Char('q') | KeyCode::Char('Q') => {
                self.should_quit = true;
            }
            KeyCode::Char('r') => self.start_run(),
            KeyCode::Char('c') => self.cancel_run(),
            KeyCode::Char('m') => {
                self.build.mode = self.build.mode.toggled();
                if !self.is_running() {
                    self.compile();
                }
            }
            KeyCode::Char('p') => {
                self.build.platform = self.build.platform.next();
                if !self.is_running() {
                    self.compile();
                }
            }
            KeyCode::Tab => {
                self.focused_pane = self.focused_pane.next();
            }
            KeyCode::BackTab => {
                self.focused_pane = self.focused_pane.prev();
            }
            KeyCode::Up => {
                if let Some(scroll) = self.focused_scroll() {
                    *scroll = scroll.saturating_sub(1);
                }
            }
            KeyCode::Down => {
                if let Some(scroll) = self.focused_scroll() {
                    *scroll = scroll.saturating_add(1);
                }
            }
            KeyCode::PageUp => {
                if let Some(scroll) = self.focused_scroll() {
                    *scroll = scroll.saturating_sub(10);
                }
            }
            KeyCode::PageDown => {
                if let Some(scroll) = self.focused_scroll() {
                    *scroll = scroll.saturating_add(10);
                }
            }
            _ => {}
        }
    }
}

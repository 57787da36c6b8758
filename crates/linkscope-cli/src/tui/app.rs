//! TUI application state and event loop.
//!
//! Acquisition runs on the controller's producer thread. The UI thread only
//! reads: on every render tick it takes one store snapshot and rebuilds the
//! chart frame, so a slow source never stalls the screen and a fast one
//! never floods it.

use std::io;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use crossterm::{
    event::{self, Event, KeyCode, KeyEventKind},
    execute,
    terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode},
};
use ratatui::prelude::*;

use linkscope_core::{
    ChartFrame, Controller, LoopCounters, RenderTicker, SessionConfig, SessionKind, SessionState,
    Snapshot,
};

// ---------------------------------------------------------------------------
// App
// ---------------------------------------------------------------------------

pub struct App {
    controller: Controller,
    config: SessionConfig,
    ticker: RenderTicker,
    frame: ChartFrame,
    running: bool,
    state: SessionState,
    last_error: Option<String>,
    counters: LoopCounters,
    /// When the current session was started (for elapsed display).
    started_at: Option<Instant>,
    /// Directory snapshot exports are written to.
    export_dir: PathBuf,
    last_export: Option<PathBuf>,
    /// One-line feedback for the last key action.
    message: Option<String>,
}

impl App {
    pub fn new(controller: Controller, config: SessionConfig, refresh: Duration) -> Self {
        let kind = config.kind();
        Self {
            controller,
            config,
            ticker: RenderTicker::new(refresh),
            frame: ChartFrame::build(kind, &Snapshot::default()),
            running: true,
            state: SessionState::Idle,
            last_error: None,
            counters: LoopCounters::default(),
            started_at: None,
            export_dir: PathBuf::from("."),
            last_export: None,
            message: None,
        }
    }

    pub fn run(&mut self) -> io::Result<()> {
        enable_raw_mode()?;
        let mut stdout = io::stdout();
        execute!(stdout, EnterAlternateScreen)?;
        let backend = CrosstermBackend::new(stdout);
        let mut terminal = Terminal::new(backend)?;

        // Install panic hook that restores terminal before printing the panic.
        let original_hook = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info| {
            let _ = disable_raw_mode();
            let _ = execute!(io::stdout(), LeaveAlternateScreen, crossterm::cursor::Show);
            original_hook(info);
        }));

        self.start_session();
        let result = self.run_loop(&mut terminal);

        // Always restore terminal, even if the loop returned an error.
        let _ = std::panic::take_hook(); // remove our hook
        disable_raw_mode()?;
        execute!(
            terminal.backend_mut(),
            LeaveAlternateScreen,
            crossterm::cursor::Show
        )?;

        if self.controller.state() != SessionState::Idle {
            println!("Stopping session...");
        }
        if let Err(e) = self.controller.stop() {
            eprintln!("Error stopping session: {e}");
        }

        if let Some(path) = &self.last_export {
            println!("Last snapshot exported to {}", path.display());
        }
        if let Some(reason) = self.controller.last_error() {
            eprintln!("Last session error: {reason}");
        }

        result
    }

    fn run_loop(
        &mut self,
        terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    ) -> io::Result<()> {
        while self.running {
            if self.ticker.due(Instant::now()) {
                self.tick();
            }

            terminal.draw(|f| super::ui::draw(f, self))?;

            if event::poll(Duration::from_millis(50))?
                && let Event::Key(key) = event::read()?
                && key.kind == KeyEventKind::Press
            {
                self.handle_key(key.code);
            }
        }

        Ok(())
    }

    /// One render tick: snapshot the store and rebuild the charts.
    fn tick(&mut self) {
        let snapshot = self.controller.snapshot();
        self.frame = ChartFrame::build(self.config.kind(), &snapshot);
        self.refresh_status();
    }

    fn refresh_status(&mut self) {
        self.state = self.controller.state();
        self.last_error = self.controller.last_error();
        self.counters = self.controller.counters();
    }

    fn handle_key(&mut self, key: KeyCode) {
        match key {
            KeyCode::Char('q') | KeyCode::Esc => self.running = false,
            KeyCode::Char('s') => self.start_session(),
            KeyCode::Char('x') => self.stop_session(),
            KeyCode::Char('t') => {
                self.controller.terminate();
                self.running = false;
            }
            KeyCode::Char('e') => self.export_snapshot(),
            KeyCode::Char('+') | KeyCode::Char('=') | KeyCode::Char(']') => self.ticker.faster(),
            KeyCode::Char('-') | KeyCode::Char('[') => self.ticker.slower(),
            _ => {}
        }
    }

    /// Start (or restart) the configured session.
    fn start_session(&mut self) {
        match self.controller.start(self.config.clone()) {
            Ok(()) => {
                self.started_at = Some(Instant::now());
                self.message = Some(format!("started {}", self.config.describe()));
            }
            Err(e) => {
                self.started_at = None;
                self.message = Some(format!("start failed: {e}"));
            }
        }
        self.tick();
    }

    fn stop_session(&mut self) {
        self.message = Some(match self.controller.stop() {
            Ok(()) => "stopped".to_string(),
            Err(e) => format!("stop failed: {e}"),
        });
        self.started_at = None;
        self.tick();
    }

    fn export_snapshot(&mut self) {
        match self.controller.export_snapshot(&self.export_dir) {
            Ok(path) => {
                self.message = Some(format!("exported {}", path.display()));
                self.last_export = Some(path);
            }
            Err(e) => self.message = Some(format!("export failed: {e}")),
        }
    }

    // --- Accessors for the renderer ---

    pub fn frame(&self) -> &ChartFrame {
        &self.frame
    }

    pub fn kind(&self) -> SessionKind {
        self.config.kind()
    }

    pub fn description(&self) -> String {
        self.config.describe()
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn counters(&self) -> LoopCounters {
        self.counters
    }

    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    pub fn refresh_rate_secs(&self) -> f64 {
        self.ticker.interval().as_secs_f64()
    }

    pub fn elapsed(&self) -> Option<Duration> {
        match self.state {
            SessionState::Running => self.started_at.map(|t| t.elapsed()),
            _ => None,
        }
    }
}

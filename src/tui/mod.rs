// src/tui/mod.rs
pub mod report;

use crate::core::shutdown::Shutdown;
use crate::types::{StreamKind, StreamState, UiEvent};
use crossterm::{
    event::{self, Event, KeyCode, KeyEventKind, KeyModifiers},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, List, ListItem, Paragraph, Wrap},
    Terminal,
};
use std::{io, time::Duration};
use tokio::sync::mpsc;

const MAX_LOGS: usize = 20;

pub struct App {
    pub report: String,
    pub revision: Option<u64>,
    pub user_stream: StreamState,
    pub market_stream: StreamState,
    pub logs: Vec<String>,
    pub scroll: u16,
}

impl App {
    pub fn new() -> Self {
        Self {
            report: "Loading account snapshot...".to_string(),
            revision: None,
            user_stream: StreamState::Disconnected,
            market_stream: StreamState::Disconnected,
            logs: Vec::new(),
            scroll: 0,
        }
    }

    pub fn on_event(&mut self, event: UiEvent) {
        match event {
            UiEvent::State(view) => {
                self.revision = Some(view.revision);
                self.report = report::render(&view);
            }
            UiEvent::Stream(StreamKind::User, state) => self.user_stream = state,
            UiEvent::Stream(StreamKind::Market, state) => self.market_stream = state,
            UiEvent::Log(msg) => {
                self.logs.push(msg);
                if self.logs.len() > MAX_LOGS {
                    self.logs.remove(0);
                }
            }
        }
    }
}

impl Default for App {
    fn default() -> Self {
        Self::new()
    }
}

/// Draws until the user quits or `shutdown` fires. Views queued since the last
/// frame are all applied in order; the frame shows the newest.
pub async fn run(mut rx: mpsc::UnboundedReceiver<UiEvent>, shutdown: Shutdown) -> anyhow::Result<()> {
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let mut app = App::new();

    while !shutdown.is_triggered() {
        terminal.draw(|f| ui(f, &app))?;

        if event::poll(Duration::from_millis(100))? {
            if let Event::Key(key) = event::read()? {
                if key.kind == KeyEventKind::Press {
                    match key.code {
                        KeyCode::Char('q') | KeyCode::Esc => break,
                        KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => {
                            break
                        }
                        KeyCode::Down => app.scroll = app.scroll.saturating_add(1),
                        KeyCode::Up => app.scroll = app.scroll.saturating_sub(1),
                        _ => {}
                    }
                }
            }
        }

        while let Ok(event) = rx.try_recv() {
            app.on_event(event);
        }
    }

    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;

    Ok(())
}

fn state_style(state: StreamState) -> Style {
    let color = match state {
        StreamState::Connected => Color::Green,
        StreamState::Connecting => Color::Yellow,
        StreamState::Disconnected | StreamState::Closed => Color::Red,
    };
    Style::default().fg(color).add_modifier(Modifier::BOLD)
}

fn ui(f: &mut ratatui::Frame, app: &App) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .margin(1)
        .constraints(
            [
                Constraint::Length(3),
                Constraint::Min(10),
                Constraint::Length(8),
            ]
            .as_ref(),
        )
        .split(f.size());

    let revision = match app.revision {
        Some(r) => format!("#{}", r),
        None => "-".to_string(),
    };

    let header = Paragraph::new(Line::from(vec![
        Span::styled("Watcher", Style::default().add_modifier(Modifier::BOLD)),
        Span::raw(" | User: "),
        Span::styled(app.user_stream.to_string(), state_style(app.user_stream)),
        Span::raw(" | Market: "),
        Span::styled(app.market_stream.to_string(), state_style(app.market_stream)),
        Span::raw(" | Rev: "),
        Span::styled(revision, Style::default().fg(Color::Yellow)),
        Span::raw("  (q to quit)"),
    ]))
    .block(Block::default().borders(Borders::ALL).title("Status"));
    f.render_widget(header, chunks[0]);

    let report = Paragraph::new(app.report.as_str())
        .wrap(Wrap { trim: false })
        .scroll((app.scroll, 0))
        .block(Block::default().borders(Borders::ALL).title("Account"));
    f.render_widget(report, chunks[1]);

    let logs: Vec<ListItem> = app
        .logs
        .iter()
        .rev()
        .map(|s| ListItem::new(Line::from(Span::raw(s))))
        .collect();

    let logs_list =
        List::new(logs).block(Block::default().borders(Borders::ALL).title("System Logs"));
    f.render_widget(logs_list, chunks[2]);
}

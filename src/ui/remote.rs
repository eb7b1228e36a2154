// Terminal remote - the phone app's buttons and status screen, in a terminal
// Keys become actions; state updates redraw the screen

use crate::control::{Action, ActionSink, ControllerStateUpdate, Interface, PlaylistMode, StateSubscriber};
use async_trait::async_trait;
use crossterm::event::{Event, EventStream, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use crossterm::terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen};
use crossterm::{cursor, execute};
use futures::StreamExt;
use ratatui::{
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    widgets::{Block, Borders, Gauge, Paragraph},
    Frame, Terminal,
};
use std::io;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::Notify;
use tracing::debug;

const REFRESH: Duration = Duration::from_millis(500);

const HELP: &str = "s song  a animal  t stop  k kill switch  d/n day/night  +/- volume  c clock changed  r reset  q quit";

/// What the remote shows. Built purely from state updates.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemoteState {
    pub currently_playing: String,
    pub kill_switch_counter: u64,
    pub playlist_mode: Option<PlaylistMode>,
    pub volume: u8,
    pub battery: Option<u8>,
}

impl RemoteState {
    pub fn apply(&mut self, update: &ControllerStateUpdate) {
        match update {
            ControllerStateUpdate::CurrentlyPlaying(description) => {
                self.currently_playing = description.clone();
            }
            ControllerStateUpdate::KillSwitchCounter(secs) => self.kill_switch_counter = *secs,
            ControllerStateUpdate::PlaylistMode(mode) => self.playlist_mode = Some(*mode),
            ControllerStateUpdate::Volume(percent) => self.volume = *percent,
            ControllerStateUpdate::Battery(percent) => self.battery = Some(*percent),
        }
    }
}

/// State subscriber side of the remote.
#[derive(Default)]
pub struct RemoteView {
    state: Mutex<RemoteState>,
    changed: Notify,
}

impl RemoteView {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> RemoteState {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl StateSubscriber for RemoteView {
    fn on_state_update(&self, update: &ControllerStateUpdate) {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .apply(update);
        self.changed.notify_one();
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteKey {
    Send(Action),
    Quit,
}

pub fn key_to_remote(key: KeyEvent) -> Option<RemoteKey> {
    if key.kind != KeyEventKind::Press {
        return None;
    }
    // raw mode swallows the signal, so ctrl-c arrives as a key
    if key.modifiers.contains(KeyModifiers::CONTROL) && key.code == KeyCode::Char('c') {
        return Some(RemoteKey::Quit);
    }

    let action = match key.code {
        KeyCode::Char('q') | KeyCode::Esc => return Some(RemoteKey::Quit),
        KeyCode::Char('s') => Action::PlaySong,
        KeyCode::Char('a') => Action::PlayAnimalSound,
        KeyCode::Char('t') | KeyCode::Char(' ') => Action::StopPlaying,
        KeyCode::Char('k') => Action::ActivateKillSwitch,
        KeyCode::Char('d') => Action::ChangePlaylist(PlaylistMode::Daytime.to_string()),
        KeyCode::Char('n') => Action::ChangePlaylist(PlaylistMode::Nighttime.to_string()),
        KeyCode::Char('+') | KeyCode::Char('=') | KeyCode::Up => Action::VolumeUp,
        KeyCode::Char('-') | KeyCode::Down => Action::VolumeDown,
        KeyCode::Char('c') => Action::DeviceTimeChanged,
        KeyCode::Char('r') => Action::ResetDevice,
        _ => return None,
    };
    Some(RemoteKey::Send(action))
}

/// Raw mode and the alternate screen, held for as long as the remote runs.
struct RawTerminal {
    terminal: Terminal<CrosstermBackend<io::Stdout>>,
}

impl RawTerminal {
    fn enter() -> io::Result<Self> {
        enable_raw_mode()?;
        let mut stdout = io::stdout();
        execute!(stdout, EnterAlternateScreen, cursor::Hide).inspect_err(|_| restore_terminal())?;
        let terminal = Terminal::new(CrosstermBackend::new(stdout)).inspect_err(|_| restore_terminal())?;
        Ok(Self { terminal })
    }
}

impl Drop for RawTerminal {
    fn drop(&mut self) {
        restore_terminal();
    }
}

// no printing here, the log writer may still own stderr
fn restore_terminal() {
    let _ = disable_raw_mode();
    let _ = execute!(io::stdout(), LeaveAlternateScreen, cursor::Show);
}

/// Keyboard-driven remote. Subscribe `view()` to the controller before
/// handing the remote to `take_control`.
pub struct TerminalRemote {
    view: Arc<RemoteView>,
}

impl TerminalRemote {
    pub fn new() -> Self {
        Self {
            view: Arc::new(RemoteView::new()),
        }
    }

    pub fn view(&self) -> Arc<RemoteView> {
        Arc::clone(&self.view)
    }
}

impl Default for TerminalRemote {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Interface for TerminalRemote {
    fn name(&self) -> &str {
        "terminal remote"
    }

    async fn listen(self: Box<Self>, actions: ActionSink) -> anyhow::Result<()> {
        let mut screen = RawTerminal::enter()?;
        let mut events = EventStream::new();
        let mut refresh = tokio::time::interval(REFRESH);

        loop {
            let state = self.view.snapshot();
            screen.terminal.draw(|f| render(f, &state))?;

            tokio::select! {
                event = events.next() => match event {
                    Some(Ok(Event::Key(key))) => match key_to_remote(key) {
                        Some(RemoteKey::Quit) => {
                            debug!("remote quit");
                            return Ok(());
                        }
                        Some(RemoteKey::Send(action)) => actions.send(action),
                        None => {}
                    },
                    Some(Ok(_)) => {}
                    Some(Err(e)) => return Err(e.into()),
                    None => return Ok(()),
                },
                _ = self.view.changed.notified() => {}
                _ = refresh.tick() => {}
            }
        }
    }
}

fn render(f: &mut Frame, state: &RemoteState) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3), // Header
            Constraint::Length(3), // Now playing
            Constraint::Length(3), // Mode + kill switch
            Constraint::Length(3), // Gauges
            Constraint::Min(0),
            Constraint::Length(3), // Keys
        ])
        .split(f.area());

    let title = Paragraph::new("🐘 SweetYaar")
        .style(Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD))
        .block(Block::default().borders(Borders::ALL));
    f.render_widget(title, chunks[0]);

    let playing = if state.currently_playing.is_empty() {
        "Nothing playing".to_string()
    } else {
        state.currently_playing.clone()
    };
    let playing = Paragraph::new(playing)
        .block(Block::default().borders(Borders::ALL).title("Now Playing"));
    f.render_widget(playing, chunks[1]);

    render_status(f, chunks[2], state);
    render_gauges(f, chunks[3], state);

    let help = Paragraph::new(HELP)
        .style(Style::default().fg(Color::DarkGray))
        .block(Block::default().borders(Borders::ALL).title("Keys"));
    f.render_widget(help, chunks[5]);
}

fn render_status(f: &mut Frame, area: Rect, state: &RemoteState) {
    let chunks = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(50), Constraint::Percentage(50)])
        .split(area);

    let mode = match state.playlist_mode {
        Some(PlaylistMode::Daytime) => "☀ daytime",
        Some(PlaylistMode::Nighttime) => "☾ nighttime",
        None => "…",
    };
    let mode = Paragraph::new(mode).block(Block::default().borders(Borders::ALL).title("Playlist"));
    f.render_widget(mode, chunks[0]);

    let (text, style) = if state.kill_switch_counter > 0 {
        (
            format!("🛑 {}:{:02}", state.kill_switch_counter / 60, state.kill_switch_counter % 60),
            Style::default().fg(Color::Red).add_modifier(Modifier::BOLD),
        )
    } else {
        ("off".to_string(), Style::default())
    };
    let kill_switch = Paragraph::new(text)
        .style(style)
        .block(Block::default().borders(Borders::ALL).title("Kill Switch"));
    f.render_widget(kill_switch, chunks[1]);
}

fn render_gauges(f: &mut Frame, area: Rect, state: &RemoteState) {
    let chunks = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(50), Constraint::Percentage(50)])
        .split(area);

    let volume = Gauge::default()
        .block(Block::default().borders(Borders::ALL).title("Volume"))
        .gauge_style(Style::default().fg(Color::Green))
        .percent(u16::from(state.volume.min(100)));
    f.render_widget(volume, chunks[0]);

    let battery = match state.battery {
        Some(level) => Gauge::default()
            .block(Block::default().borders(Borders::ALL).title("Battery"))
            .gauge_style(Style::default().fg(if level < 20 { Color::Red } else { Color::Yellow }))
            .percent(u16::from(level.min(100))),
        None => Gauge::default()
            .block(Block::default().borders(Borders::ALL).title("Battery"))
            .label("n/a")
            .percent(0),
    };
    f.render_widget(battery, chunks[1]);
}

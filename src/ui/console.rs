// Line-oriented console - commands in on stdin, state out as JSON lines
// This is the headless stand-in for the wireless remote link

use crate::control::{Action, ActionSink, ControllerStateUpdate, Interface, StateSubscriber};
use async_trait::async_trait;
use std::io::{self, Write};
use std::sync::{Mutex, PoisonError};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader, Stdin};
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleLine {
    Empty,
    Quit,
    /// Numeric wire code, decoded by the controller
    Command(u8),
    Action(Action),
    Unknown(String),
}

pub fn parse_line(line: &str) -> ConsoleLine {
    let line = line.trim();
    if line.is_empty() {
        return ConsoleLine::Empty;
    }
    if matches!(line, "q" | "quit" | "exit") {
        return ConsoleLine::Quit;
    }
    if let Ok(code) = line.parse::<u8>() {
        return ConsoleLine::Command(code);
    }
    match Action::from_name(line) {
        Some(action) => ConsoleLine::Action(action),
        None => ConsoleLine::Unknown(line.to_string()),
    }
}

/// Reads one command per line until EOF or `quit`.
pub struct ConsoleInterface<R> {
    reader: R,
}

impl ConsoleInterface<BufReader<Stdin>> {
    pub fn stdin() -> Self {
        Self::new(BufReader::new(tokio::io::stdin()))
    }
}

impl<R> ConsoleInterface<R>
where
    R: AsyncBufRead + Unpin + Send,
{
    pub fn new(reader: R) -> Self {
        Self { reader }
    }
}

#[async_trait]
impl<R> Interface for ConsoleInterface<R>
where
    R: AsyncBufRead + Unpin + Send,
{
    fn name(&self) -> &str {
        "console"
    }

    async fn listen(self: Box<Self>, actions: ActionSink) -> anyhow::Result<()> {
        let mut lines = self.reader.lines();

        while let Some(line) = lines.next_line().await? {
            match parse_line(&line) {
                ConsoleLine::Empty => {}
                ConsoleLine::Quit => {
                    debug!("console quit");
                    return Ok(());
                }
                ConsoleLine::Command(code) => actions.send_command(code),
                ConsoleLine::Action(action) => actions.send(action),
                ConsoleLine::Unknown(text) => warn!("❓ unknown console command '{}'", text),
            }
        }

        debug!("console input closed");
        Ok(())
    }
}

/// Writes every state update as one JSON object per line.
pub struct JsonStateLogger {
    out: Mutex<Box<dyn Write + Send>>,
}

impl JsonStateLogger {
    pub fn stdout() -> Self {
        Self::new(Box::new(io::stdout()))
    }

    pub fn new(out: Box<dyn Write + Send>) -> Self {
        Self {
            out: Mutex::new(out),
        }
    }
}

impl StateSubscriber for JsonStateLogger {
    fn on_state_update(&self, update: &ControllerStateUpdate) {
        let line = match serde_json::to_string(update) {
            Ok(line) => line,
            Err(e) => {
                warn!("can't encode {:?}: {}", update, e);
                return;
            }
        };

        let mut out = self.out.lock().unwrap_or_else(PoisonError::into_inner);
        if let Err(e) = writeln!(out, "{}", line).and_then(|_| out.flush()) {
            warn!("state output failed: {}", e);
        }
    }
}

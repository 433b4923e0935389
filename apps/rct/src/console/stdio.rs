use std::io::Write;

use async_trait::async_trait;
use crossterm::cursor::{MoveToColumn, MoveUp, RestorePosition, SavePosition};
use crossterm::terminal::{Clear, ClearType};
use parking_lot::Mutex;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

use super::{Console, ConsoleError};

/// Operator-side console backed by the real terminal.
///
/// A background task owns stdin and feeds whole lines through a channel so
/// `has_input_ready` can answer without blocking and `read_input_line` can be
/// awaited from any task.
pub struct StdioConsole {
    lines: tokio::sync::Mutex<mpsc::UnboundedReceiver<String>>,
    pending: Mutex<Option<String>>,
}

impl StdioConsole {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            let mut reader = BufReader::new(tokio::io::stdin()).lines();
            while let Ok(Some(line)) = reader.next_line().await {
                if tx.send(line).is_err() {
                    break;
                }
            }
        });
        Self {
            lines: tokio::sync::Mutex::new(rx),
            pending: Mutex::new(None),
        }
    }

    fn stdout_command(&self, command: impl crossterm::Command) {
        let mut stdout = std::io::stdout();
        let _ = crossterm::execute!(stdout, command);
    }
}

impl Default for StdioConsole {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Console for StdioConsole {
    fn print(&self, text: &str) {
        print!("{text}");
    }

    fn print_err(&self, text: &str) {
        eprint!("{text}");
    }

    fn print_sys(&self, text: &str) {
        print!("{text}");
    }

    fn clear(&self) {
        self.stdout_command(Clear(ClearType::All));
        self.stdout_command(crossterm::cursor::MoveTo(0, 0));
    }

    fn clear_line(&self) {
        self.stdout_command(Clear(ClearType::CurrentLine));
        self.stdout_command(MoveToColumn(0));
    }

    fn move_up(&self, lines: u32) {
        if lines > 0 {
            self.stdout_command(MoveUp(lines.min(u16::MAX as u32) as u16));
        }
    }

    fn save_cursor(&self) {
        self.stdout_command(SavePosition);
    }

    fn restore_cursor(&self) {
        self.stdout_command(RestorePosition);
    }

    fn clear_waiting_input(&self) {
        // Typed-ahead lines are stale once the remote process redraws.
        let mut lines = match self.lines.try_lock() {
            Ok(lines) => lines,
            Err(_) => return,
        };
        self.pending.lock().take();
        while lines.try_recv().is_ok() {}
    }

    async fn flush(&self) -> Result<(), ConsoleError> {
        std::io::stdout().flush()?;
        Ok(())
    }

    async fn has_input_ready(&self) -> Result<bool, ConsoleError> {
        if self.pending.lock().is_some() {
            return Ok(true);
        }
        let mut lines = self.lines.lock().await;
        match lines.try_recv() {
            Ok(line) => {
                *self.pending.lock() = Some(line);
                Ok(true)
            }
            Err(mpsc::error::TryRecvError::Empty) => Ok(false),
            Err(mpsc::error::TryRecvError::Disconnected) => Err(ConsoleError::InputClosed),
        }
    }

    async fn read_input_line(&self) -> Result<String, ConsoleError> {
        if let Some(line) = self.pending.lock().take() {
            return Ok(line);
        }
        let mut lines = self.lines.lock().await;
        lines.recv().await.ok_or(ConsoleError::InputClosed)
    }
}

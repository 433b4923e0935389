use std::collections::VecDeque;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{Console, ConsoleError};
use crate::protocol::ConsoleOperation;

/// In-memory console for tests: records every operation in order and serves
/// scripted input lines.
#[derive(Default)]
pub struct MockConsole {
    operations: Mutex<Vec<ConsoleOperation>>,
    input_lines: Mutex<VecDeque<String>>,
}

impl MockConsole {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn queue_input_line(&self, line: &str) {
        self.input_lines.lock().push_back(line.to_string());
    }

    pub fn operations(&self) -> Vec<ConsoleOperation> {
        self.operations.lock().clone()
    }

    /// Concatenation of everything printed through any print variant.
    pub fn printed_text(&self) -> String {
        self.operations
            .lock()
            .iter()
            .filter_map(|op| match op {
                ConsoleOperation::Print(text)
                | ConsoleOperation::PrintErr(text)
                | ConsoleOperation::PrintSys(text) => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }

    fn record(&self, operation: ConsoleOperation) {
        self.operations.lock().push(operation);
    }
}

#[async_trait]
impl Console for MockConsole {
    fn print(&self, text: &str) {
        self.record(ConsoleOperation::Print(text.to_string()));
    }

    fn print_err(&self, text: &str) {
        self.record(ConsoleOperation::PrintErr(text.to_string()));
    }

    fn print_sys(&self, text: &str) {
        self.record(ConsoleOperation::PrintSys(text.to_string()));
    }

    fn clear(&self) {
        self.record(ConsoleOperation::Clear);
    }

    fn clear_line(&self) {
        self.record(ConsoleOperation::ClearLine);
    }

    fn move_up(&self, lines: u32) {
        self.record(ConsoleOperation::MoveUp(lines));
    }

    fn save_cursor(&self) {
        self.record(ConsoleOperation::SaveCursor);
    }

    fn restore_cursor(&self) {
        self.record(ConsoleOperation::RestoreCursor);
    }

    fn clear_waiting_input(&self) {
        self.record(ConsoleOperation::ClearWaitingInput);
    }

    async fn flush(&self) -> Result<(), ConsoleError> {
        Ok(())
    }

    async fn has_input_ready(&self) -> Result<bool, ConsoleError> {
        Ok(!self.input_lines.lock().is_empty())
    }

    async fn read_input_line(&self) -> Result<String, ConsoleError> {
        self.input_lines
            .lock()
            .pop_front()
            .ok_or(ConsoleError::InputClosed)
    }
}

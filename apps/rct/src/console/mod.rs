pub mod mock;
pub mod stdio;

use async_trait::async_trait;

use crate::protocol::ConsoleOperation;
use crate::transport::TransportError;

#[derive(Debug, thiserror::Error)]
pub enum ConsoleError {
    /// Contract violation: console used after its process terminated.
    #[error("process already terminated")]
    ProcessTerminated,
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("input stream closed")]
    InputClosed,
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// The virtualized terminal surface handed to command handlers.
///
/// On the operator side this is the real terminal; on the controller side it
/// is a [`CommandProcessHandler`](crate::server::CommandProcessHandler) that
/// turns every call into a buffered [`ConsoleOperation`] shipped back over
/// the wire.
#[async_trait]
pub trait Console: Send + Sync {
    fn print(&self, text: &str);
    fn print_err(&self, text: &str);
    fn print_sys(&self, text: &str);
    fn clear(&self);
    fn clear_line(&self);
    fn move_up(&self, lines: u32);
    fn save_cursor(&self);
    fn restore_cursor(&self);
    fn clear_waiting_input(&self);

    /// Pushes any buffered output through to the viewer.
    async fn flush(&self) -> Result<(), ConsoleError>;

    /// Whether a full input line is ready without blocking.
    async fn has_input_ready(&self) -> Result<bool, ConsoleError>;

    /// Blocks until the operator submits a line.
    async fn read_input_line(&self) -> Result<String, ConsoleError>;

    fn println(&self, text: &str) {
        self.print(&format!("{text}\n"));
    }

    fn println_err(&self, text: &str) {
        self.print_err(&format!("{text}\n"));
    }

    fn println_sys(&self, text: &str) {
        self.print_sys(&format!("{text}\n"));
    }
}

/// Applies one received operation to a real console, preserving list order.
pub async fn apply_operation(
    console: &dyn Console,
    operation: &ConsoleOperation,
) -> Result<(), ConsoleError> {
    match operation {
        ConsoleOperation::Print(text) => console.print(text),
        ConsoleOperation::PrintErr(text) => console.print_err(text),
        ConsoleOperation::PrintSys(text) => console.print_sys(text),
        ConsoleOperation::Clear => console.clear(),
        ConsoleOperation::ClearLine => console.clear_line(),
        ConsoleOperation::MoveUp(lines) => console.move_up(*lines),
        ConsoleOperation::SaveCursor => console.save_cursor(),
        ConsoleOperation::RestoreCursor => console.restore_cursor(),
        ConsoleOperation::ClearWaitingInput => console.clear_waiting_input(),
        ConsoleOperation::Flush => console.flush().await?,
    }
    Ok(())
}

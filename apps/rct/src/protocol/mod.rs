pub mod wire;

pub use wire::{PROTOCOL_VERSION, WireError, decode_message, encode_message};

/// One virtualized terminal action, shipped as data and applied on the
/// operator side in list order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleOperation {
    Print(String),
    PrintErr(String),
    PrintSys(String),
    Clear,
    ClearLine,
    MoveUp(u32),
    SaveCursor,
    RestoreCursor,
    ClearWaitingInput,
    Flush,
}

/// At most one pending request rides on each output message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsoleRequest {
    NoRequest,
    HasInputReady,
    ReadInputLine,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HelpMessage {
    pub usage: String,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub domain: String,
    pub text: String,
    pub is_error: bool,
}

/// Everything that can cross the wire, in either direction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    ConnectionCheck,
    ConnectionResponse,
    StartCommand {
        process_id: u32,
        command_line: String,
    },
    CommandInput {
        process_id: u32,
        has_input_ready: bool,
        input_line: Option<String>,
        request: ConsoleRequest,
    },
    CommandOutput {
        process_id: u32,
        terminate_command: bool,
        request: ConsoleRequest,
        operations: Vec<ConsoleOperation>,
    },
    LogData {
        entries: Vec<LogEntry>,
    },
    CommandsListing {
        help_messages: Vec<HelpMessage>,
    },
    KeepaliveLocal,
    KeepaliveRemote,
}

impl Message {
    pub fn kind_name(&self) -> &'static str {
        match self {
            Message::ConnectionCheck => "connection-check",
            Message::ConnectionResponse => "connection-response",
            Message::StartCommand { .. } => "start-command",
            Message::CommandInput { .. } => "command-input",
            Message::CommandOutput { .. } => "command-output",
            Message::LogData { .. } => "log-data",
            Message::CommandsListing { .. } => "commands-listing",
            Message::KeepaliveLocal => "keepalive-local",
            Message::KeepaliveRemote => "keepalive-remote",
        }
    }
}

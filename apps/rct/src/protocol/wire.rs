use super::{ConsoleOperation, ConsoleRequest, HelpMessage, LogEntry, Message};

pub const PROTOCOL_VERSION: u8 = 1;

const VERSION_BITS: u8 = 3;
const VERSION_MASK: u8 = 0b1110_0000;
const TYPE_MASK: u8 = 0b0001_1111;

const KIND_CONNECTION_CHECK: u8 = 0;
const KIND_CONNECTION_RESPONSE: u8 = 1;
const KIND_START_COMMAND: u8 = 2;
const KIND_COMMAND_INPUT: u8 = 3;
const KIND_COMMAND_OUTPUT: u8 = 4;
const KIND_LOG_DATA: u8 = 5;
const KIND_COMMANDS_LISTING: u8 = 6;
const KIND_KEEPALIVE_LOCAL: u8 = 7;
const KIND_KEEPALIVE_REMOTE: u8 = 8;

const OP_PRINT: u8 = 0;
const OP_PRINT_ERR: u8 = 1;
const OP_PRINT_SYS: u8 = 2;
const OP_CLEAR: u8 = 3;
const OP_CLEAR_LINE: u8 = 4;
const OP_MOVE_UP: u8 = 5;
const OP_SAVE_CURSOR: u8 = 6;
const OP_RESTORE_CURSOR: u8 = 7;
const OP_CLEAR_WAITING_INPUT: u8 = 8;
const OP_FLUSH: u8 = 9;

const REQUEST_NONE: u8 = 0;
const REQUEST_HAS_INPUT_READY: u8 = 1;
const REQUEST_READ_INPUT_LINE: u8 = 2;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum WireError {
    #[error("invalid protocol version: {0}")]
    InvalidVersion(u8),
    #[error("unknown message type: {0}")]
    UnknownMessageType(u8),
    #[error("unknown console operation tag: {0}")]
    UnknownOperationTag(u8),
    #[error("unknown console request tag: {0}")]
    UnknownRequestTag(u8),
    #[error("unexpected end of input")]
    UnexpectedEof,
    #[error("varint overflow")]
    VarIntOverflow,
    #[error("invalid data: {0}")]
    InvalidData(&'static str),
}

pub fn encode_message(message: &Message) -> Vec<u8> {
    let mut buf = Vec::with_capacity(32);
    match message {
        Message::ConnectionCheck => write_header(&mut buf, KIND_CONNECTION_CHECK),
        Message::ConnectionResponse => write_header(&mut buf, KIND_CONNECTION_RESPONSE),
        Message::StartCommand {
            process_id,
            command_line,
        } => {
            write_header(&mut buf, KIND_START_COMMAND);
            write_var_u32(&mut buf, *process_id);
            write_string(&mut buf, command_line);
        }
        Message::CommandInput {
            process_id,
            has_input_ready,
            input_line,
            request,
        } => {
            write_header(&mut buf, KIND_COMMAND_INPUT);
            write_var_u32(&mut buf, *process_id);
            buf.push(*has_input_ready as u8);
            match input_line {
                Some(line) => {
                    buf.push(1);
                    write_string(&mut buf, line);
                }
                None => buf.push(0),
            }
            buf.push(encode_request(*request));
        }
        Message::CommandOutput {
            process_id,
            terminate_command,
            request,
            operations,
        } => {
            write_header(&mut buf, KIND_COMMAND_OUTPUT);
            write_var_u32(&mut buf, *process_id);
            buf.push(*terminate_command as u8);
            buf.push(encode_request(*request));
            encode_operations(&mut buf, operations);
        }
        Message::LogData { entries } => {
            write_header(&mut buf, KIND_LOG_DATA);
            write_var_u32(&mut buf, entries.len() as u32);
            for entry in entries {
                write_string(&mut buf, &entry.domain);
                write_string(&mut buf, &entry.text);
                buf.push(entry.is_error as u8);
            }
        }
        Message::CommandsListing { help_messages } => {
            write_header(&mut buf, KIND_COMMANDS_LISTING);
            write_var_u32(&mut buf, help_messages.len() as u32);
            for help in help_messages {
                write_string(&mut buf, &help.usage);
                write_string(&mut buf, &help.description);
            }
        }
        Message::KeepaliveLocal => write_header(&mut buf, KIND_KEEPALIVE_LOCAL),
        Message::KeepaliveRemote => write_header(&mut buf, KIND_KEEPALIVE_REMOTE),
    }
    buf
}

pub fn decode_message(bytes: &[u8]) -> Result<Message, WireError> {
    let mut cursor = Cursor::new(bytes);
    let kind = read_header(&mut cursor)?;
    match kind {
        KIND_CONNECTION_CHECK => Ok(Message::ConnectionCheck),
        KIND_CONNECTION_RESPONSE => Ok(Message::ConnectionResponse),
        KIND_START_COMMAND => {
            let process_id = cursor.read_var_u32()?;
            let command_line = cursor.read_string()?;
            Ok(Message::StartCommand {
                process_id,
                command_line,
            })
        }
        KIND_COMMAND_INPUT => {
            let process_id = cursor.read_var_u32()?;
            let has_input_ready = cursor.read_bool()?;
            let input_line = if cursor.read_bool()? {
                Some(cursor.read_string()?)
            } else {
                None
            };
            let request = decode_request(cursor.read_u8()?)?;
            Ok(Message::CommandInput {
                process_id,
                has_input_ready,
                input_line,
                request,
            })
        }
        KIND_COMMAND_OUTPUT => {
            let process_id = cursor.read_var_u32()?;
            let terminate_command = cursor.read_bool()?;
            let request = decode_request(cursor.read_u8()?)?;
            let operations = decode_operations(&mut cursor)?;
            Ok(Message::CommandOutput {
                process_id,
                terminate_command,
                request,
                operations,
            })
        }
        KIND_LOG_DATA => {
            let count = cursor.read_var_u32()? as usize;
            let mut entries = Vec::with_capacity(count.min(1024));
            for _ in 0..count {
                let domain = cursor.read_string()?;
                let text = cursor.read_string()?;
                let is_error = cursor.read_bool()?;
                entries.push(LogEntry {
                    domain,
                    text,
                    is_error,
                });
            }
            Ok(Message::LogData { entries })
        }
        KIND_COMMANDS_LISTING => {
            let count = cursor.read_var_u32()? as usize;
            let mut help_messages = Vec::with_capacity(count.min(1024));
            for _ in 0..count {
                let usage = cursor.read_string()?;
                let description = cursor.read_string()?;
                help_messages.push(HelpMessage { usage, description });
            }
            Ok(Message::CommandsListing { help_messages })
        }
        KIND_KEEPALIVE_LOCAL => Ok(Message::KeepaliveLocal),
        KIND_KEEPALIVE_REMOTE => Ok(Message::KeepaliveRemote),
        other => Err(WireError::UnknownMessageType(other)),
    }
}

fn encode_request(request: ConsoleRequest) -> u8 {
    match request {
        ConsoleRequest::NoRequest => REQUEST_NONE,
        ConsoleRequest::HasInputReady => REQUEST_HAS_INPUT_READY,
        ConsoleRequest::ReadInputLine => REQUEST_READ_INPUT_LINE,
    }
}

fn decode_request(tag: u8) -> Result<ConsoleRequest, WireError> {
    match tag {
        REQUEST_NONE => Ok(ConsoleRequest::NoRequest),
        REQUEST_HAS_INPUT_READY => Ok(ConsoleRequest::HasInputReady),
        REQUEST_READ_INPUT_LINE => Ok(ConsoleRequest::ReadInputLine),
        other => Err(WireError::UnknownRequestTag(other)),
    }
}

fn encode_operations(buf: &mut Vec<u8>, operations: &[ConsoleOperation]) {
    write_var_u32(buf, operations.len() as u32);
    for op in operations {
        match op {
            ConsoleOperation::Print(text) => {
                buf.push(OP_PRINT);
                write_string(buf, text);
            }
            ConsoleOperation::PrintErr(text) => {
                buf.push(OP_PRINT_ERR);
                write_string(buf, text);
            }
            ConsoleOperation::PrintSys(text) => {
                buf.push(OP_PRINT_SYS);
                write_string(buf, text);
            }
            ConsoleOperation::Clear => buf.push(OP_CLEAR),
            ConsoleOperation::ClearLine => buf.push(OP_CLEAR_LINE),
            ConsoleOperation::MoveUp(lines) => {
                buf.push(OP_MOVE_UP);
                write_var_u32(buf, *lines);
            }
            ConsoleOperation::SaveCursor => buf.push(OP_SAVE_CURSOR),
            ConsoleOperation::RestoreCursor => buf.push(OP_RESTORE_CURSOR),
            ConsoleOperation::ClearWaitingInput => buf.push(OP_CLEAR_WAITING_INPUT),
            ConsoleOperation::Flush => buf.push(OP_FLUSH),
        }
    }
}

fn decode_operations(cursor: &mut Cursor<'_>) -> Result<Vec<ConsoleOperation>, WireError> {
    let count = cursor.read_var_u32()? as usize;
    let mut operations = Vec::with_capacity(count.min(1024));
    for _ in 0..count {
        let tag = cursor.read_u8()?;
        let op = match tag {
            OP_PRINT => ConsoleOperation::Print(cursor.read_string()?),
            OP_PRINT_ERR => ConsoleOperation::PrintErr(cursor.read_string()?),
            OP_PRINT_SYS => ConsoleOperation::PrintSys(cursor.read_string()?),
            OP_CLEAR => ConsoleOperation::Clear,
            OP_CLEAR_LINE => ConsoleOperation::ClearLine,
            OP_MOVE_UP => ConsoleOperation::MoveUp(cursor.read_var_u32()?),
            OP_SAVE_CURSOR => ConsoleOperation::SaveCursor,
            OP_RESTORE_CURSOR => ConsoleOperation::RestoreCursor,
            OP_CLEAR_WAITING_INPUT => ConsoleOperation::ClearWaitingInput,
            OP_FLUSH => ConsoleOperation::Flush,
            other => return Err(WireError::UnknownOperationTag(other)),
        };
        operations.push(op);
    }
    Ok(operations)
}

fn write_header(buf: &mut Vec<u8>, kind: u8) {
    let version = PROTOCOL_VERSION & ((1 << VERSION_BITS) - 1);
    buf.push((version << 5) | (kind & TYPE_MASK));
}

fn read_header(cursor: &mut Cursor<'_>) -> Result<u8, WireError> {
    let byte = cursor.read_u8()?;
    let version = (byte & VERSION_MASK) >> 5;
    if version != (PROTOCOL_VERSION & ((1 << VERSION_BITS) - 1)) {
        return Err(WireError::InvalidVersion(version));
    }
    Ok(byte & TYPE_MASK)
}

fn write_string(buf: &mut Vec<u8>, value: &str) {
    write_var_u32(buf, value.len() as u32);
    buf.extend_from_slice(value.as_bytes());
}

fn write_var_u32(buf: &mut Vec<u8>, value: u32) {
    write_var_u64(buf, value as u64);
}

fn write_var_u64(buf: &mut Vec<u8>, mut value: u64) {
    while value >= 0x80 {
        buf.push((value as u8) | 0x80);
        value >>= 7;
    }
    buf.push(value as u8);
}

struct Cursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn read_u8(&mut self) -> Result<u8, WireError> {
        if self.pos >= self.bytes.len() {
            return Err(WireError::UnexpectedEof);
        }
        let value = self.bytes[self.pos];
        self.pos += 1;
        Ok(value)
    }

    fn read_var_u64(&mut self) -> Result<u64, WireError> {
        let mut result: u64 = 0;
        let mut shift = 0;
        while shift < 64 {
            let byte = self.read_u8()?;
            result |= ((byte & 0x7F) as u64) << shift;
            if byte & 0x80 == 0 {
                return Ok(result);
            }
            shift += 7;
        }
        Err(WireError::VarIntOverflow)
    }

    fn read_var_u32(&mut self) -> Result<u32, WireError> {
        let value = self.read_var_u64()?;
        if value > u32::MAX as u64 {
            return Err(WireError::InvalidData("u32 overflow"));
        }
        Ok(value as u32)
    }

    fn read_bool(&mut self) -> Result<bool, WireError> {
        match self.read_u8()? {
            0 => Ok(false),
            1 => Ok(true),
            _ => Err(WireError::InvalidData("invalid boolean")),
        }
    }

    fn read_bytes(&mut self, len: usize) -> Result<&'a [u8], WireError> {
        if self.pos + len > self.bytes.len() {
            return Err(WireError::UnexpectedEof);
        }
        let slice = &self.bytes[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    fn read_string(&mut self) -> Result<String, WireError> {
        let len = self.read_var_u32()? as usize;
        let bytes = self.read_bytes(len)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| WireError::InvalidData("invalid utf-8"))
    }
}

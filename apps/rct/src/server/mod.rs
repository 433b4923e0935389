mod process;

pub use process::CommandProcessHandler;

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::command::registry::DuplicateCommand;
use crate::command::{CommandInterpreter, CommandProcessor, LineError};
use crate::config::Config;
use crate::console::Console;
use crate::protocol::{ConsoleRequest, LogEntry, Message};
use crate::transport::{MessageSender, MessageSocket, TransportError};

enum Event {
    Message(Message),
    Failed(TransportError),
}

/// Controller-side server: accepts one connection at a time, routes
/// instruction messages, and runs at most one command process at a time.
pub struct RctServer {
    config: Config,
    builtin: CommandInterpreter,
    extensible: CommandInterpreter,
    connection: Arc<Mutex<Option<MessageSender>>>,
}

impl RctServer {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            builtin: builtin_interpreter(),
            extensible: CommandInterpreter::new(),
            connection: Arc::new(Mutex::new(None)),
        }
    }

    /// Registers an application command into the extensible set consulted
    /// after the builtin one.
    pub fn register_command(
        &mut self,
        processor: CommandProcessor,
    ) -> Result<(), DuplicateCommand> {
        self.extensible.add_processor(processor)
    }

    /// Ships log entries to the connected operator, if any.
    pub async fn forward_logs(&self, entries: Vec<LogEntry>) {
        let sender = self.connection.lock().clone();
        if let Some(sender) = sender {
            if let Err(error) = sender.send(&Message::LogData { entries }).await {
                debug!(%error, "log forwarding failed");
            }
        }
    }

    /// Serves connections forever, one at a time.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), TransportError> {
        loop {
            let (stream, peer) = listener.accept().await?;
            info!(%peer, "operator connected");
            self.serve_connection(MessageSocket::from_stream(stream))
                .await;
            info!(%peer, "operator disconnected");
        }
    }

    async fn serve_connection(&self, socket: MessageSocket) {
        let sender = socket.sender();
        *self.connection.lock() = Some(sender.clone());

        // The schema has no listing-request message, so the registered
        // command set is pushed once at connection establishment.
        let mut help_messages = self.builtin.help_messages();
        help_messages.extend(self.extensible.help_messages());
        let listing = Message::CommandsListing { help_messages };
        if let Err(error) = sender.send(&listing).await {
            warn!(%error, "failed to send commands listing");
        }

        let (tx, mut rx) = mpsc::unbounded_channel();
        let message_tx = tx.clone();
        socket.spawn_receiver(
            move |message| {
                let _ = message_tx.send(Event::Message(message));
            },
            move |failure| {
                let _ = tx.send(Event::Failed(failure));
            },
        );

        let current: Arc<Mutex<Option<Arc<CommandProcessHandler>>>> = Arc::new(Mutex::new(None));
        while let Some(event) = rx.recv().await {
            match event {
                Event::Message(Message::ConnectionCheck) => {
                    if sender.send(&Message::ConnectionResponse).await.is_err() {
                        break;
                    }
                }
                Event::Message(Message::StartCommand {
                    process_id,
                    command_line,
                }) => {
                    self.start_command(&sender, &current, process_id, command_line)
                        .await;
                }
                Event::Message(Message::CommandInput {
                    process_id,
                    has_input_ready,
                    input_line,
                    request,
                }) => {
                    let handler = current.lock().clone();
                    match handler {
                        Some(handler) if handler.process_id() == process_id => {
                            handler.handle_input(has_input_ready, input_line, request);
                        }
                        _ => debug!(process_id, "command-input for unknown process, dropped"),
                    }
                }
                Event::Message(Message::KeepaliveLocal) => {
                    if let Some(handler) = &*current.lock() {
                        handler.continue_keepalive();
                    }
                }
                Event::Message(other) => {
                    warn!(kind = other.kind_name(), "unexpected message, closing connection");
                    break;
                }
                Event::Failed(error) => {
                    debug!(%error, "connection lost");
                    break;
                }
            }
        }

        self.connection.lock().take();
        let handler = current.lock().take();
        if let Some(handler) = handler {
            handler.terminate(false).await;
        }
        socket.close().await;
    }

    async fn start_command(
        &self,
        sender: &MessageSender,
        current: &Arc<Mutex<Option<Arc<CommandProcessHandler>>>>,
        process_id: u32,
        command_line: String,
    ) {
        // At most one live process per connection: the predecessor goes
        // before its successor exists.
        let previous = current.lock().take();
        if let Some(previous) = previous {
            previous.terminate(false).await;
        }

        let handler =
            CommandProcessHandler::start(process_id, sender.clone(), self.config.keepalive());
        *current.lock() = Some(handler.clone());

        let builtin = self.builtin.clone();
        let extensible = self.extensible.clone();
        let current = current.clone();
        tokio::spawn(async move {
            let console: Arc<dyn Console> = handler.clone();
            let execution = {
                let console = console.clone();
                let line = command_line.clone();
                tokio::spawn(async move { run_chain(&builtin, &extensible, console, &line).await })
            };
            match execution.await {
                Ok(Ok(())) => handler.terminate(true).await,
                Ok(Err(LineError::Command(error))) => {
                    // A handler failure is not operator-reportable; the
                    // process ends without flushing whatever it buffered.
                    error!(process_id, %error, "command handler failed");
                    handler.terminate(false).await;
                }
                Ok(Err(recoverable)) => {
                    // Parse, bad-call, and unknown-command reports go back
                    // to the operator like ordinary output.
                    console.println_err(&recoverable.to_string());
                    handler.terminate(true).await;
                }
                Err(join_error) => {
                    error!(process_id, %join_error, "command execution panicked");
                    handler.terminate(false).await;
                }
            }
            let mut slot = current.lock();
            if slot
                .as_ref()
                .is_some_and(|active| active.process_id() == process_id)
            {
                slot.take();
            }
        });
    }
}

/// Builtin then extensible, with exactly one fallback level.
async fn run_chain(
    builtin: &CommandInterpreter,
    extensible: &CommandInterpreter,
    console: Arc<dyn Console>,
    line: &str,
) -> Result<(), LineError> {
    match builtin.process_line(console.clone(), line).await {
        Err(LineError::NotRecognized(_)) => extensible.process_line(console, line).await,
        other => other,
    }
}

fn builtin_interpreter() -> CommandInterpreter {
    let mut interpreter = CommandInterpreter::new();
    // Infallible because the set is built once from distinct names.
    let _ = interpreter.add_processor(CommandProcessor::new(
        "ping",
        "ping",
        "check that the controller is responsive",
        |console, command| async move {
            command.require_no_args()?;
            console.println("pong");
            Ok(())
        },
    ));
    interpreter
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::console::mock::MockConsole;

    #[tokio::test]
    async fn chain_falls_back_exactly_one_level() {
        let mut extensible = CommandInterpreter::new();
        extensible
            .add_processor(CommandProcessor::new(
                "restart",
                "restart",
                "restart the controller program",
                |console, _command| async move {
                    console.println("restarting");
                    Ok(())
                },
            ))
            .unwrap();
        let builtin = builtin_interpreter();
        let console = Arc::new(MockConsole::new());

        run_chain(&builtin, &extensible, console.clone(), "restart")
            .await
            .unwrap();
        assert_eq!(console.printed_text(), "restarting\n");

        let missing = run_chain(&builtin, &extensible, console, "nope").await;
        assert!(matches!(missing, Err(LineError::NotRecognized(name)) if name == "nope"));
    }

    #[tokio::test]
    async fn builtin_ping_answers_pong() {
        let builtin = builtin_interpreter();
        let console = Arc::new(MockConsole::new());
        builtin
            .process_line(console.clone(), "ping")
            .await
            .unwrap();
        assert_eq!(console.printed_text(), "pong\n");
    }
}

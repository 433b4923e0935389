mod process;

pub use process::{OutputEvent, ProcessError, RemoteProcessHandler};

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::console::Console;
use crate::protocol::{HelpMessage, Message};
use crate::transport::{MessageSocket, MessageSender, TransportError};
use crate::waiter::Waiter;

/// Local side's current assessment of transport + remote-server health.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    NoConnection,
    NoServer,
    Ok,
}

impl std::fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            ConnectionStatus::NoConnection => "NO_CONNECTION",
            ConnectionStatus::NoServer => "NO_SERVER",
            ConnectionStatus::Ok => "OK",
        };
        f.write_str(text)
    }
}

/// Owns the socket transport, republishes connection health, and drives the
/// reconnection loop. At most one remote process is in flight at a time.
pub struct ConnectionManager {
    config: Config,
    server_addr: SocketAddr,
    sender: Mutex<Option<MessageSender>>,
    status: Mutex<ConnectionStatus>,
    response_waiter: Waiter<()>,
    next_process_id: AtomicU32,
    current: Mutex<Option<Arc<RemoteProcessHandler>>>,
    remote_help: Mutex<Vec<HelpMessage>>,
    log_console: Mutex<Option<Arc<dyn Console>>>,
    last_connect_failure: Mutex<Option<String>>,
}

impl ConnectionManager {
    pub fn new(server_addr: SocketAddr, config: Config) -> Arc<Self> {
        Arc::new(Self {
            config,
            server_addr,
            sender: Mutex::new(None),
            status: Mutex::new(ConnectionStatus::NoConnection),
            response_waiter: Waiter::new(),
            next_process_id: AtomicU32::new(0),
            current: Mutex::new(None),
            remote_help: Mutex::new(Vec::new()),
            log_console: Mutex::new(None),
            last_connect_failure: Mutex::new(None),
        })
    }

    /// Console that received log-data entries are printed to.
    pub fn set_log_console(&self, console: Arc<dyn Console>) {
        *self.log_console.lock() = Some(console);
    }

    pub fn status(&self) -> ConnectionStatus {
        *self.status.lock()
    }

    /// Help listing last pushed by the remote side.
    pub fn remote_help(&self) -> Vec<HelpMessage> {
        self.remote_help.lock().clone()
    }

    /// Starts the background loop: check health every poll interval, and
    /// rebuild the socket whenever the status is NO_CONNECTION.
    pub fn start(self: &Arc<Self>) -> JoinHandle<()> {
        let manager = self.clone();
        tokio::spawn(async move {
            loop {
                let status = manager.check_server_connection().await;
                if status == ConnectionStatus::NoConnection {
                    let _ = manager.establish_new_connection().await;
                }
                tokio::time::sleep(manager.config.poll_interval).await;
            }
        })
    }

    /// One health probe: a connection-check round trip bounded by the
    /// response timeout.
    pub async fn check_server_connection(&self) -> ConnectionStatus {
        let sender = self.sender.lock().clone();
        let status = match sender {
            None => ConnectionStatus::NoConnection,
            Some(sender) => {
                let wait = self.response_waiter.wait(Some(self.config.response_timeout));
                tokio::pin!(wait);
                // Arm the waiter before the check leaves so the response
                // cannot race ahead of it.
                let _ = futures::poll!(wait.as_mut());
                match sender.send(&Message::ConnectionCheck).await {
                    Err(_) => ConnectionStatus::NoConnection,
                    Ok(()) => match wait.await {
                        Ok(()) => ConnectionStatus::Ok,
                        Err(_) => ConnectionStatus::NoServer,
                    },
                }
            }
        };
        self.set_status(status);
        status
    }

    /// Closes any existing socket best-effort, then opens and wires a new
    /// one. Repeated failures of the same kind are logged only once.
    pub async fn establish_new_connection(self: &Arc<Self>) -> Result<(), TransportError> {
        let old = self.sender.lock().take();
        if let Some(old) = old {
            old.close().await;
        }

        let socket = match MessageSocket::connect(self.server_addr).await {
            Ok(socket) => socket,
            Err(error) => {
                let class = failure_class(&error);
                let mut last = self.last_connect_failure.lock();
                if last.as_deref() != Some(class.as_str()) {
                    warn!(addr = %self.server_addr, %error, "connection attempt failed");
                    *last = Some(class);
                }
                return Err(error);
            }
        };

        let on_message = {
            let manager = self.clone();
            move |message| manager.dispatch(message)
        };
        let on_error = {
            let manager = self.clone();
            move |failure| manager.handle_receive_failure(failure)
        };
        let sender = socket.sender();
        socket.spawn_receiver(on_message, on_error);

        *self.sender.lock() = Some(sender);
        self.last_connect_failure.lock().take();
        info!(addr = %self.server_addr, "connected to controller");
        Ok(())
    }

    /// Runs one command remotely, rendering its console on `console`.
    /// ProcessIds are issued 0,1,2,… per manager session.
    pub async fn execute(
        &self,
        console: &dyn Console,
        command_line: &str,
    ) -> Result<(), ProcessError> {
        let sender = self
            .sender
            .lock()
            .clone()
            .ok_or(ProcessError::NoConnection)?;
        let process_id = self.next_process_id.fetch_add(1, Ordering::SeqCst);

        // Starting a new remote command supersedes the previous one.
        let previous = self.current.lock().take();
        if let Some(previous) = previous {
            previous.terminate();
        }

        let handler =
            RemoteProcessHandler::start(process_id, sender.clone(), self.config.keepalive());
        *self.current.lock() = Some(handler.clone());

        let result = handler.run(console, &sender, command_line).await;

        let mut slot = self.current.lock();
        if slot
            .as_ref()
            .is_some_and(|active| active.process_id() == process_id)
        {
            slot.take();
        }
        drop(slot);
        result
    }

    /// Single dispatch point for every message the receive loop decodes.
    fn dispatch(&self, message: Message) {
        match message {
            Message::ConnectionResponse => self.response_waiter.receive(()),
            Message::CommandOutput {
                process_id,
                terminate_command,
                request,
                operations,
            } => {
                let handler = self.current.lock().clone();
                match handler {
                    Some(handler) if handler.process_id() == process_id => {
                        handler.handle_output(OutputEvent {
                            terminate_command,
                            request,
                            operations,
                        });
                    }
                    _ => debug!(process_id, "command-output for unknown process, dropped"),
                }
            }
            Message::KeepaliveRemote => {
                if let Some(handler) = &*self.current.lock() {
                    handler.continue_keepalive();
                }
            }
            Message::CommandsListing { help_messages } => {
                *self.remote_help.lock() = help_messages;
            }
            Message::LogData { entries } => {
                let console = self.log_console.lock().clone();
                if let Some(console) = console {
                    for entry in entries {
                        let line = format!("[{}] {}", entry.domain, entry.text);
                        if entry.is_error {
                            console.println_err(&line);
                        } else {
                            console.println_sys(&line);
                        }
                    }
                }
            }
            other => {
                debug!(kind = other.kind_name(), "unexpected message, dropped");
            }
        }
    }

    /// Receive-loop failure: the transport is gone, and any in-flight
    /// process re-raises the captured error from `execute`.
    fn handle_receive_failure(&self, failure: TransportError) {
        self.set_status(ConnectionStatus::NoConnection);
        let handler = self.current.lock().take();
        if let Some(handler) = handler {
            handler.terminate_with(ProcessError::Transport(failure));
        }
    }

    fn set_status(&self, status: ConnectionStatus) {
        let mut current = self.status.lock();
        if *current != status {
            info!(from = %*current, to = %status, "connection status changed");
            *current = status;
        }
    }
}

fn failure_class(error: &TransportError) -> String {
    match error {
        TransportError::Io(io) => format!("io:{:?}", io.kind()),
        TransportError::Closed => "closed".to_string(),
        TransportError::Wire(_) => "wire".to_string(),
        TransportError::FrameTooLarge(_) => "frame-too-large".to_string(),
    }
}

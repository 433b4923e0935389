use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::debug;

use crate::console::{Console, ConsoleError, apply_operation};
use crate::keepalive::{KeepaliveConfig, KeepaliveWatcher};
use crate::protocol::{ConsoleOperation, ConsoleRequest, Message};
use crate::transport::{MessageSender, TransportError};

#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error("no connection to the controller")]
    NoConnection,
    #[error("remote process terminated")]
    Terminated,
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Console(#[from] ConsoleError),
}

/// One received command-output message, already filtered to this process.
pub struct OutputEvent {
    pub terminate_command: bool,
    pub request: ConsoleRequest,
    pub operations: Vec<ConsoleOperation>,
}

/// Local side of one in-flight remote command: sends the start instruction,
/// applies received console operations to the real terminal in order, and
/// answers input requests synchronously before taking the next output.
///
/// Outputs arrive through an ordered queue rather than a bare rendezvous:
/// the server may flush several output messages back to back, and the TCP
/// stream's ordering must survive into the apply loop.
pub struct RemoteProcessHandler {
    process_id: u32,
    outputs_tx: Mutex<Option<mpsc::UnboundedSender<OutputEvent>>>,
    outputs_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<OutputEvent>>,
    keepalive: Mutex<Option<KeepaliveWatcher>>,
    terminated: Arc<AtomicBool>,
    failure: Mutex<Option<ProcessError>>,
}

impl RemoteProcessHandler {
    pub fn start(
        process_id: u32,
        sender: MessageSender,
        keepalive_config: KeepaliveConfig,
    ) -> Arc<Self> {
        let (outputs_tx, outputs_rx) = mpsc::unbounded_channel();
        let handler = Arc::new(Self {
            process_id,
            outputs_tx: Mutex::new(Some(outputs_tx)),
            outputs_rx: tokio::sync::Mutex::new(outputs_rx),
            keepalive: Mutex::new(None),
            terminated: Arc::new(AtomicBool::new(false)),
            failure: Mutex::new(None),
        });

        let timeout_handler = handler.clone();
        let watcher = KeepaliveWatcher::start(
            keepalive_config,
            move || {
                let sender = sender.clone();
                async move {
                    let _ = sender.send(&Message::KeepaliveLocal).await;
                }
            },
            move || async move {
                debug!(
                    process_id = timeout_handler.process_id,
                    "keepalive timeout, terminating process"
                );
                timeout_handler.terminate();
            },
        );
        *handler.keepalive.lock() = Some(watcher);
        handler
    }

    pub fn process_id(&self) -> u32 {
        self.process_id
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::SeqCst)
    }

    pub fn continue_keepalive(&self) {
        if let Some(watcher) = &*self.keepalive.lock() {
            watcher.continue_keepalive();
        }
    }

    /// Delivers a command-output message whose id already matched.
    pub fn handle_output(&self, event: OutputEvent) {
        if let Some(tx) = &*self.outputs_tx.lock() {
            let _ = tx.send(event);
        }
    }

    /// Idempotent; unblocks the wait inside [`run`](Self::run) promptly.
    pub fn terminate(&self) {
        if self.terminated.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(watcher) = self.keepalive.lock().take() {
            watcher.stop();
        }
        // Dropping the sender wakes the output loop once the queue drains;
        // the terminated flag makes it stop before applying anything else.
        self.outputs_tx.lock().take();
    }

    /// Terminates and records the error that `run` should re-raise.
    pub fn terminate_with(&self, error: ProcessError) {
        *self.failure.lock() = Some(error);
        self.terminate();
    }

    /// Drives the process to completion against the real console.
    pub async fn run(
        &self,
        console: &dyn Console,
        sender: &MessageSender,
        command_line: &str,
    ) -> Result<(), ProcessError> {
        let result = self.run_inner(console, sender, command_line).await;
        self.terminate();
        match result {
            Err(ProcessError::Terminated) => match self.failure.lock().take() {
                Some(captured) => Err(captured),
                None => Err(ProcessError::Terminated),
            },
            other => other,
        }
    }

    async fn run_inner(
        &self,
        console: &dyn Console,
        sender: &MessageSender,
        command_line: &str,
    ) -> Result<(), ProcessError> {
        sender
            .send(&Message::StartCommand {
                process_id: self.process_id,
                command_line: command_line.to_string(),
            })
            .await?;

        let mut outputs = self.outputs_rx.lock().await;
        loop {
            let event = match outputs.recv().await {
                Some(event) if !self.is_terminated() => event,
                _ => return Err(ProcessError::Terminated),
            };
            for operation in &event.operations {
                apply_operation(console, operation).await?;
            }
            match event.request {
                ConsoleRequest::NoRequest => {}
                ConsoleRequest::HasInputReady => {
                    let ready = console.has_input_ready().await?;
                    sender
                        .send(&Message::CommandInput {
                            process_id: self.process_id,
                            has_input_ready: ready,
                            input_line: None,
                            request: ConsoleRequest::HasInputReady,
                        })
                        .await?;
                }
                ConsoleRequest::ReadInputLine => {
                    let line = console.read_input_line().await?;
                    sender
                        .send(&Message::CommandInput {
                            process_id: self.process_id,
                            has_input_ready: false,
                            input_line: Some(line),
                            request: ConsoleRequest::ReadInputLine,
                        })
                        .await?;
                }
            }
            if event.terminate_command {
                return Ok(());
            }
        }
    }
}

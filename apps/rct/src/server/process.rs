use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::console::{Console, ConsoleError};
use crate::keepalive::{KeepaliveConfig, KeepaliveWatcher};
use crate::protocol::{ConsoleOperation, ConsoleRequest, Message};
use crate::transport::MessageSender;
use crate::waiter::Waiter;

/// The virtual console handed to a running command handler on the
/// controller side.
///
/// Every print/clear/cursor call only appends a [`ConsoleOperation`] to a
/// buffer; `flush` ships the buffer as one command-output message. Input
/// calls flush together with the request tag and then block on the matching
/// command-input reply. The buffer is mutated by the execution task but also
/// drained by keepalive-timeout and termination paths on other tasks, hence
/// the mutex.
pub struct CommandProcessHandler {
    process_id: u32,
    sender: MessageSender,
    buffer: Mutex<Vec<ConsoleOperation>>,
    input_waiter: Waiter<String>,
    ready_waiter: Waiter<bool>,
    keepalive: Mutex<Option<KeepaliveWatcher>>,
    terminated: Arc<AtomicBool>,
}

impl CommandProcessHandler {
    pub fn start(
        process_id: u32,
        sender: MessageSender,
        keepalive_config: KeepaliveConfig,
    ) -> Arc<Self> {
        let handler = Arc::new(Self {
            process_id,
            sender: sender.clone(),
            buffer: Mutex::new(Vec::new()),
            input_waiter: Waiter::new(),
            ready_waiter: Waiter::new(),
            keepalive: Mutex::new(None),
            terminated: Arc::new(AtomicBool::new(false)),
        });

        let ping_sender = sender;
        let timeout_handler = handler.clone();
        let watcher = KeepaliveWatcher::start(
            keepalive_config,
            move || {
                let sender = ping_sender.clone();
                async move {
                    let _ = sender.send(&Message::KeepaliveRemote).await;
                }
            },
            move || async move {
                debug!(
                    process_id = timeout_handler.process_id,
                    "keepalive timeout, terminating process"
                );
                timeout_handler.terminate(false).await;
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

    /// Liveness signal from the operator side.
    pub fn continue_keepalive(&self) {
        if let Some(watcher) = &*self.keepalive.lock() {
            watcher.continue_keepalive();
        }
    }

    /// Reply routing for command-input messages whose id already matched.
    pub fn handle_input(
        &self,
        has_input_ready: bool,
        input_line: Option<String>,
        request: ConsoleRequest,
    ) {
        match request {
            ConsoleRequest::HasInputReady => self.ready_waiter.receive(has_input_ready),
            ConsoleRequest::ReadInputLine => {
                self.input_waiter.receive(input_line.unwrap_or_default())
            }
            ConsoleRequest::NoRequest => {
                debug!(process_id = self.process_id, "command-input without request, dropped");
            }
        }
    }

    /// Idempotent. Optionally flushes one final output message carrying
    /// `terminate_command`, then unblocks every pending wait.
    pub async fn terminate(&self, flush_output: bool) {
        if self.terminated.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(watcher) = self.keepalive.lock().take() {
            watcher.stop();
        }
        if flush_output {
            let operations = std::mem::take(&mut *self.buffer.lock());
            let message = Message::CommandOutput {
                process_id: self.process_id,
                terminate_command: true,
                request: ConsoleRequest::NoRequest,
                operations,
            };
            if let Err(error) = self.sender.send(&message).await {
                warn!(process_id = self.process_id, %error, "final flush failed");
            }
        } else {
            self.buffer.lock().clear();
        }
        self.input_waiter.kill();
        self.ready_waiter.kill();
    }

    fn push(&self, operation: ConsoleOperation) {
        self.buffer.lock().push(operation);
    }

    async fn flush_with(&self, request: ConsoleRequest) -> Result<(), ConsoleError> {
        if self.is_terminated() {
            return Err(ConsoleError::ProcessTerminated);
        }
        let operations = std::mem::take(&mut *self.buffer.lock());
        let message = Message::CommandOutput {
            process_id: self.process_id,
            terminate_command: false,
            request,
            operations,
        };
        self.sender.send(&message).await?;
        Ok(())
    }
}

#[async_trait]
impl Console for CommandProcessHandler {
    fn print(&self, text: &str) {
        self.push(ConsoleOperation::Print(text.to_string()));
    }

    fn print_err(&self, text: &str) {
        self.push(ConsoleOperation::PrintErr(text.to_string()));
    }

    fn print_sys(&self, text: &str) {
        self.push(ConsoleOperation::PrintSys(text.to_string()));
    }

    fn clear(&self) {
        self.push(ConsoleOperation::Clear);
    }

    fn clear_line(&self) {
        self.push(ConsoleOperation::ClearLine);
    }

    fn move_up(&self, lines: u32) {
        self.push(ConsoleOperation::MoveUp(lines));
    }

    fn save_cursor(&self) {
        self.push(ConsoleOperation::SaveCursor);
    }

    fn restore_cursor(&self) {
        self.push(ConsoleOperation::RestoreCursor);
    }

    fn clear_waiting_input(&self) {
        self.push(ConsoleOperation::ClearWaitingInput);
    }

    async fn flush(&self) -> Result<(), ConsoleError> {
        self.flush_with(ConsoleRequest::NoRequest).await
    }

    async fn has_input_ready(&self) -> Result<bool, ConsoleError> {
        let wait = self.ready_waiter.wait(None);
        tokio::pin!(wait);
        // Arm the waiter before the request leaves so the reply can never
        // race ahead of it.
        let _ = futures::poll!(wait.as_mut());
        self.flush_with(ConsoleRequest::HasInputReady).await?;
        wait.await.map_err(|_| ConsoleError::ProcessTerminated)
    }

    async fn read_input_line(&self) -> Result<String, ConsoleError> {
        let wait = self.input_waiter.wait(None);
        tokio::pin!(wait);
        let _ = futures::poll!(wait.as_mut());
        self.flush_with(ConsoleRequest::ReadInputLine).await?;
        wait.await.map_err(|_| ConsoleError::ProcessTerminated)
    }
}

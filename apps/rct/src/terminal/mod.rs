use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use tracing::debug;

use crate::client::{ConnectionManager, ProcessError};
use crate::command::{CommandInterpreter, CommandProcessor, LineError};
use crate::console::{Console, ConsoleError};
use crate::protocol::HelpMessage;

/// Interactive operator REPL: local commands first, everything else goes to
/// the controller through the connection manager.
pub struct OperatorTerminal {
    console: Arc<dyn Console>,
    manager: Arc<ConnectionManager>,
    local: CommandInterpreter,
    exit: Arc<AtomicBool>,
}

impl OperatorTerminal {
    pub fn new(console: Arc<dyn Console>, manager: Arc<ConnectionManager>) -> Self {
        let exit = Arc::new(AtomicBool::new(false));
        let local = local_interpreter(&manager, &exit);
        Self {
            console,
            manager,
            local,
            exit,
        }
    }

    pub async fn run(&self) -> Result<(), ConsoleError> {
        self.console
            .println_sys("RCT operator console. Type 'help' for commands, 'exit' to quit.");
        loop {
            if self.exit.load(Ordering::SeqCst) {
                return Ok(());
            }
            self.console.print("> ");
            self.console.flush().await?;
            let line = match self.console.read_input_line().await {
                Ok(line) => line,
                Err(ConsoleError::InputClosed) => return Ok(()),
                Err(error) => return Err(error),
            };
            if line.trim().is_empty() {
                continue;
            }
            self.process(&line).await;
        }
    }

    async fn process(&self, line: &str) {
        match self.local.process_line(self.console.clone(), line).await {
            Ok(()) => {}
            Err(LineError::NotRecognized(_)) => self.execute_remote(line).await,
            Err(recoverable) => self.console.println_err(&recoverable.to_string()),
        }
    }

    async fn execute_remote(&self, line: &str) {
        match self.manager.execute(self.console.as_ref(), line).await {
            Ok(()) => {}
            Err(ProcessError::NoConnection) => {
                self.console
                    .println_err("no connection to the controller (reconnecting in background)");
            }
            Err(ProcessError::Transport(error)) => {
                debug!(%error, "remote command failed");
                self.console
                    .println_err("connection lost while running command (reconnecting)");
            }
            // Keepalive timeouts end the process silently.
            Err(ProcessError::Terminated) => {}
            Err(ProcessError::Console(error)) => {
                self.console.println_err(&error.to_string());
            }
        }
    }
}

fn local_interpreter(
    manager: &Arc<ConnectionManager>,
    exit: &Arc<AtomicBool>,
) -> CommandInterpreter {
    let mut interpreter = CommandInterpreter::new();
    let local_help: Arc<Mutex<Vec<HelpMessage>>> = Arc::new(Mutex::new(Vec::new()));

    // The set is built once from distinct names, so registration is
    // infallible.
    let _ = interpreter.add_processor(CommandProcessor::new(
        "clear",
        "clear",
        "clear the terminal",
        |console, command| async move {
            command.require_no_args()?;
            console.clear();
            console.flush().await?;
            Ok(())
        },
    ));

    let exit_flag = exit.clone();
    let _ = interpreter.add_processor(CommandProcessor::new(
        "exit",
        "exit",
        "leave the operator console",
        move |_console, command| {
            let exit_flag = exit_flag.clone();
            async move {
                command.require_no_args()?;
                exit_flag.store(true, Ordering::SeqCst);
                Ok(())
            }
        },
    ));

    let comms_manager = manager.clone();
    let _ = interpreter.add_processor(CommandProcessor::new(
        "comms",
        "comms",
        "show connection status",
        move |console, command| {
            let manager = comms_manager.clone();
            async move {
                command.require_no_args()?;
                console.println(&format!("connection: {}", manager.status()));
                console.flush().await?;
                Ok(())
            }
        },
    ));

    let help_manager = manager.clone();
    let help_local = local_help.clone();
    let _ = interpreter.add_processor(CommandProcessor::new(
        "help",
        "help",
        "list local and remote commands",
        move |console, command| {
            let manager = help_manager.clone();
            let local = help_local.clone();
            async move {
                command.require_no_args()?;
                console.println("local commands:");
                for help in local.lock().iter() {
                    console.println(&format!("  {:<12} {}", help.usage, help.description));
                }
                let remote = manager.remote_help();
                if remote.is_empty() {
                    console.println("remote commands: (none received yet)");
                } else {
                    console.println("remote commands:");
                    for help in &remote {
                        console.println(&format!("  {:<12} {}", help.usage, help.description));
                    }
                }
                console.flush().await?;
                Ok(())
            }
        },
    ));

    *local_help.lock() = interpreter.help_messages();
    interpreter
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::console::mock::MockConsole;
    use std::net::SocketAddr;

    fn manager() -> Arc<ConnectionManager> {
        let addr: SocketAddr = "127.0.0.1:5800".parse().unwrap();
        ConnectionManager::new(addr, Config::default())
    }

    #[tokio::test]
    async fn local_commands_run_without_a_connection() {
        let manager = manager();
        let console = Arc::new(MockConsole::new());
        let terminal = OperatorTerminal::new(console.clone(), manager);
        terminal.process("comms").await;
        assert!(console.printed_text().contains("NO_CONNECTION"));
    }

    #[tokio::test]
    async fn unknown_remote_command_reports_missing_connection() {
        let manager = manager();
        let console = Arc::new(MockConsole::new());
        let terminal = OperatorTerminal::new(console.clone(), manager);
        terminal.process("subsystems").await;
        assert!(console.printed_text().contains("no connection"));
    }

    #[tokio::test]
    async fn help_lists_local_commands() {
        let manager = manager();
        let console = Arc::new(MockConsole::new());
        let terminal = OperatorTerminal::new(console.clone(), manager);
        terminal.process("help").await;
        let text = console.printed_text();
        for name in ["clear", "exit", "comms", "help"] {
            assert!(text.contains(name), "missing {name} in help output");
        }
    }

    #[tokio::test]
    async fn exit_sets_the_flag() {
        let manager = manager();
        let console = Arc::new(MockConsole::new());
        let terminal = OperatorTerminal::new(console, manager);
        terminal.process("exit").await;
        assert!(terminal.exit.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn parse_errors_print_one_line() {
        let manager = manager();
        let console = Arc::new(MockConsole::new());
        let terminal = OperatorTerminal::new(console.clone(), manager);
        terminal.process("comms --=x").await;
        assert!(console.printed_text().contains("option name is empty"));
    }
}

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::BoxFuture;

use super::{Command, ParseError, parse_line};
use crate::console::{Console, ConsoleError};
use crate::protocol::HelpMessage;

/// Failure inside a registered handler.
#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error("{0}")]
    BadCall(String),
    #[error(transparent)]
    Console(#[from] ConsoleError),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Outcome of feeding one raw line to an interpreter.
#[derive(Debug, thiserror::Error)]
pub enum LineError {
    #[error("{0}")]
    Parse(#[from] ParseError),
    #[error("command not recognized: {0}")]
    NotRecognized(String),
    #[error("{message}\nusage: {usage}")]
    BadCall { usage: String, message: String },
    #[error(transparent)]
    Command(CommandError),
}

#[derive(Debug, thiserror::Error)]
#[error("duplicate command name '{0}'")]
pub struct DuplicateCommand(pub String);

pub type HandlerFn = Arc<
    dyn Fn(Arc<dyn Console>, Command) -> BoxFuture<'static, Result<(), CommandError>>
        + Send
        + Sync,
>;

/// A registered (name, usage, description, handler) tuple.
#[derive(Clone)]
pub struct CommandProcessor {
    pub name: String,
    pub usage: String,
    pub description: String,
    handler: HandlerFn,
}

impl CommandProcessor {
    pub fn new<F, Fut>(name: &str, usage: &str, description: &str, handler: F) -> Self
    where
        F: Fn(Arc<dyn Console>, Command) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<(), CommandError>> + Send + 'static,
    {
        Self {
            name: name.to_string(),
            usage: usage.to_string(),
            description: description.to_string(),
            handler: Arc::new(move |console, command| Box::pin(handler(console, command))),
        }
    }
}

/// Maps command names to handlers. Lookup misses surface as
/// [`LineError::NotRecognized`] so the caller can try exactly one fallback
/// interpreter.
#[derive(Clone, Default)]
pub struct CommandInterpreter {
    processors: Vec<CommandProcessor>,
    by_name: HashMap<String, usize>,
}

impl CommandInterpreter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_processor(&mut self, processor: CommandProcessor) -> Result<(), DuplicateCommand> {
        if self.by_name.contains_key(&processor.name) {
            return Err(DuplicateCommand(processor.name));
        }
        self.by_name
            .insert(processor.name.clone(), self.processors.len());
        self.processors.push(processor);
        Ok(())
    }

    /// Parses the line and runs the matching handler against `console`.
    pub async fn process_line(
        &self,
        console: Arc<dyn Console>,
        line: &str,
    ) -> Result<(), LineError> {
        let command = parse_line(line)?;
        let processor = match self.by_name.get(command.name()) {
            Some(&index) => &self.processors[index],
            None => return Err(LineError::NotRecognized(command.name().to_string())),
        };
        match (processor.handler)(console, command).await {
            Ok(()) => Ok(()),
            Err(CommandError::BadCall(message)) => Err(LineError::BadCall {
                usage: processor.usage.clone(),
                message,
            }),
            Err(other) => Err(LineError::Command(other)),
        }
    }

    /// All registered (usage, description) pairs in registration order.
    pub fn help_messages(&self) -> Vec<HelpMessage> {
        self.processors
            .iter()
            .map(|p| HelpMessage {
                usage: p.usage.clone(),
                description: p.description.clone(),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::console::mock::MockConsole;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn noop_processor(name: &str) -> CommandProcessor {
        CommandProcessor::new(name, name, "does nothing", |_console, _command| async {
            Ok(())
        })
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let mut interpreter = CommandInterpreter::new();
        interpreter.add_processor(noop_processor("ping")).unwrap();
        assert!(interpreter.add_processor(noop_processor("ping")).is_err());
    }

    #[test]
    fn help_messages_keep_registration_order() {
        let mut interpreter = CommandInterpreter::new();
        interpreter.add_processor(noop_processor("zulu")).unwrap();
        interpreter.add_processor(noop_processor("alpha")).unwrap();
        let usages: Vec<_> = interpreter
            .help_messages()
            .into_iter()
            .map(|h| h.usage)
            .collect();
        assert_eq!(usages, ["zulu", "alpha"]);
    }

    #[tokio::test]
    async fn missing_command_raises_not_recognized() {
        let interpreter = CommandInterpreter::new();
        let console = Arc::new(MockConsole::new());
        let result = interpreter.process_line(console, "restart").await;
        assert!(matches!(result, Err(LineError::NotRecognized(name)) if name == "restart"));
    }

    #[tokio::test]
    async fn bad_call_carries_the_usage_string() {
        let mut interpreter = CommandInterpreter::new();
        interpreter
            .add_processor(CommandProcessor::new(
                "ssh",
                "ssh <target>",
                "open a shell on the controller",
                |_console, command| async move {
                    command.require_arg(0)?;
                    Ok(())
                },
            ))
            .unwrap();
        let console = Arc::new(MockConsole::new());
        match interpreter.process_line(console, "ssh").await {
            Err(LineError::BadCall { usage, .. }) => assert_eq!(usage, "ssh <target>"),
            other => panic!("expected bad call, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn handler_runs_with_the_parsed_command() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls_in_handler = calls.clone();
        let mut interpreter = CommandInterpreter::new();
        interpreter
            .add_processor(CommandProcessor::new(
                "watch",
                "watch [targets...]",
                "stream live values",
                move |_console, command| {
                    let calls = calls_in_handler.clone();
                    async move {
                        assert!(command.has_flag('a'));
                        assert_eq!(command.args(), ["pose"]);
                        calls.fetch_add(1, Ordering::SeqCst);
                        Ok(())
                    }
                },
            ))
            .unwrap();
        let console = Arc::new(MockConsole::new());
        interpreter
            .process_line(console, "watch -a pose")
            .await
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn parse_errors_pass_through() {
        let interpreter = CommandInterpreter::new();
        let console = Arc::new(MockConsole::new());
        let result = interpreter.process_line(console, "").await;
        assert!(matches!(result, Err(LineError::Parse(_))));
    }
}

pub mod parser;
pub mod registry;

pub use parser::{ParseError, parse_line};
pub use registry::{CommandError, CommandInterpreter, CommandProcessor, LineError};

use std::collections::{HashMap, HashSet};

/// One parsed command line: name, positional args, single-letter flags, and
/// options. An option mapped to `None` was given as a bare `--marker`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    name: String,
    args: Vec<String>,
    flags: HashSet<char>,
    options: HashMap<String, Option<String>>,
}

impl Command {
    pub(crate) fn new(
        name: String,
        args: Vec<String>,
        flags: HashSet<char>,
        options: HashMap<String, Option<String>>,
    ) -> Self {
        Self {
            name,
            args,
            flags,
            options,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    pub fn arg(&self, index: usize) -> Option<&str> {
        self.args.get(index).map(String::as_str)
    }

    /// Positional arg that must be present, reported as a bad call otherwise.
    pub fn require_arg(&self, index: usize) -> Result<&str, CommandError> {
        self.arg(index)
            .ok_or_else(|| CommandError::BadCall(format!("missing argument {}", index + 1)))
    }

    pub fn require_no_args(&self) -> Result<(), CommandError> {
        if self.args.is_empty() {
            Ok(())
        } else {
            Err(CommandError::BadCall("expected no arguments".to_string()))
        }
    }

    pub fn has_flag(&self, flag: char) -> bool {
        self.flags.contains(&flag)
    }

    pub fn flags(&self) -> &HashSet<char> {
        &self.flags
    }

    pub fn has_option(&self, name: &str) -> bool {
        self.options.contains_key(name)
    }

    /// Value of `--name=value`; `None` for a bare marker or an absent option.
    pub fn option_value(&self, name: &str) -> Option<&str> {
        self.options.get(name).and_then(|v| v.as_deref())
    }

    pub fn options(&self) -> &HashMap<String, Option<String>> {
        &self.options
    }
}

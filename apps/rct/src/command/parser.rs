use std::collections::{HashMap, HashSet};

use super::Command;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("empty command line")]
    EmptyLine,
    #[error("invalid command name '{0}': must be alphanumeric")]
    InvalidCommandName(String),
    #[error("option name is empty")]
    EmptyOptionName,
    #[error("invalid option name '{0}': must be alphanumeric")]
    InvalidOptionName(String),
    #[error("option '{0}' has an empty value")]
    EmptyOptionValue(String),
    #[error("empty flag cluster")]
    EmptyFlagCluster,
    #[error("invalid flag '{0}': must be a letter")]
    InvalidFlag(char),
}

/// Parses one raw line into a [`Command`]. Pure and total: every input maps
/// to either a command or a descriptive error.
///
/// Grammar: `COMMAND WORD*`, whitespace separated. `--name` is a marker
/// option, `--name=value` a valued option (value must be non-empty),
/// `-abc` a cluster of single-letter flags, anything else a positional arg.
pub fn parse_line(line: &str) -> Result<Command, ParseError> {
    let mut words = line.split_whitespace();
    let name = words.next().ok_or(ParseError::EmptyLine)?;
    if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(ParseError::InvalidCommandName(name.to_string()));
    }

    let mut args = Vec::new();
    let mut flags = HashSet::new();
    let mut options = HashMap::new();

    for word in words {
        if let Some(option) = word.strip_prefix("--") {
            let (option_name, value) = match option.split_once('=') {
                Some((option_name, value)) => (option_name, Some(value)),
                None => (option, None),
            };
            if option_name.is_empty() {
                return Err(ParseError::EmptyOptionName);
            }
            if !option_name.chars().all(|c| c.is_ascii_alphanumeric()) {
                return Err(ParseError::InvalidOptionName(option_name.to_string()));
            }
            if let Some(value) = value {
                if value.is_empty() {
                    return Err(ParseError::EmptyOptionValue(option_name.to_string()));
                }
                options.insert(option_name.to_string(), Some(value.to_string()));
            } else {
                options.insert(option_name.to_string(), None);
            }
        } else if let Some(cluster) = word.strip_prefix('-') {
            if cluster.is_empty() {
                return Err(ParseError::EmptyFlagCluster);
            }
            for flag in cluster.chars() {
                if !flag.is_ascii_alphabetic() {
                    return Err(ParseError::InvalidFlag(flag));
                }
                flags.insert(flag);
            }
        } else {
            args.push(word.to_string());
        }
    }

    Ok(Command::new(name.to_string(), args, flags, options))
}

//! Text command parser.
//!
//! A request is one line of whitespace-separated fields. Command names and
//! the `PX` option are matched case-insensitively; keys and values are kept
//! exactly as sent.

use std::fmt;

/// Parsed command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Liveness check, trailing fields ignored.
    Ping,
    /// Read a single key.
    Get { key: String },
    /// Store a value, optionally expiring after `ttl_millis` (0 = never).
    Set {
        key: String,
        value: String,
        ttl_millis: i64,
    },
}

/// Command errors reported back to the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandError {
    /// Arity violation on GET or SET.
    WrongArgCount,
    /// First field is not a known command.
    UnknownCommand,
}

// Existing clients match on these strings, typo included.
impl fmt::Display for CommandError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandError::WrongArgCount => write!(f, "(error) Wrong number of arguments"),
            CommandError::UnknownCommand => write!(f, "(error) Unkown command"),
        }
    }
}

impl std::error::Error for CommandError {}

/// Parse result.
#[derive(Debug, PartialEq, Eq)]
pub enum ParseResult {
    /// Successfully parsed command.
    Complete(Command),
    /// No fields at all; nothing should be sent back.
    Empty,
    /// Malformed or unknown command.
    Error(CommandError),
}

/// Parse one request line.
pub fn parse(request: &str) -> ParseResult {
    let fields: Vec<&str> = request.split_whitespace().collect();

    let Some((name, args)) = fields.split_first() else {
        return ParseResult::Empty;
    };

    let command = match name.to_ascii_uppercase().as_str() {
        "PING" => Ok(Command::Ping),
        "GET" => parse_get(args),
        "SET" => parse_set(args),
        _ => Err(CommandError::UnknownCommand),
    };

    match command {
        Ok(command) => ParseResult::Complete(command),
        Err(e) => ParseResult::Error(e),
    }
}

fn parse_get(args: &[&str]) -> Result<Command, CommandError> {
    match args {
        [key] => Ok(Command::Get {
            key: key.to_string(),
        }),
        _ => Err(CommandError::WrongArgCount),
    }
}

fn parse_set(args: &[&str]) -> Result<Command, CommandError> {
    let [key, value_fields @ ..] = args else {
        return Err(CommandError::WrongArgCount);
    };
    if value_fields.is_empty() {
        return Err(CommandError::WrongArgCount);
    }

    let (value_fields, ttl_millis) = split_px(value_fields);

    Ok(Command::Set {
        key: key.to_string(),
        value: value_fields.join(" "),
        ttl_millis,
    })
}

/// Strip a trailing `PX <millis>` pair from the value fields.
///
/// If the millis field is not an integer the pair is left in place and
/// becomes part of the value.
fn split_px<'a, 'b>(fields: &'a [&'b str]) -> (&'a [&'b str], i64) {
    if let [rest @ .., option, millis] = fields {
        if option.eq_ignore_ascii_case("PX") {
            if let Ok(millis) = millis.parse::<i64>() {
                return (rest, millis);
            }
        }
    }
    (fields, 0)
}

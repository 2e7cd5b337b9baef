//! Command execution against the storage backend.

use super::parser::Command;
use crate::storage::Storage;

/// Reply to a GET on a missing or expired key
const NIL: &str = "(nil)";

/// Execute a parsed command and return the response body (without the
/// trailing newline).
pub fn execute(command: Command, storage: &Storage) -> String {
    match command {
        Command::Ping => "PONG".to_string(),

        Command::Get { key } => storage.get(&key).unwrap_or_else(|| NIL.to_string()),

        Command::Set {
            key,
            value,
            ttl_millis,
        } => {
            storage.set(&key, value, ttl_millis);
            "OK".to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_execute_ping() {
        let storage = Storage::new();
        assert_eq!(execute(Command::Ping, &storage), "PONG");
    }

    #[test]
    fn test_execute_get_missing() {
        let storage = Storage::new();
        let response = execute(
            Command::Get {
                key: "missing".to_string(),
            },
            &storage,
        );
        assert_eq!(response, "(nil)");
    }

    #[test]
    fn test_execute_set_then_get() {
        let storage = Storage::new();

        let response = execute(
            Command::Set {
                key: "foo".to_string(),
                value: "bar baz".to_string(),
                ttl_millis: 0,
            },
            &storage,
        );
        assert_eq!(response, "OK");

        let response = execute(
            Command::Get {
                key: "foo".to_string(),
            },
            &storage,
        );
        assert_eq!(response, "bar baz");
    }
}

//! Redis-like text protocol over datagrams.
//!
//! Each datagram carries exactly one request and gets at most one reply:
//!
//! ```text
//! PING                          -> PONG\n
//! GET <key>                     -> <value>\n | (nil)\n | error\n
//! SET <key> <value...>          -> OK\n      | error\n
//! SET <key> <value...> PX <ms>  -> OK\n      | error\n
//! <anything else>               -> error\n
//! ```
//!
//! A request with no fields gets no reply at all. Nothing here touches a
//! socket, so `dispatch` can be called from any number of tasks at once.

pub mod handler;
pub mod parser;

use crate::storage::Storage;
use parser::ParseResult;
use tracing::trace;

/// Parse and execute one request, returning the newline-terminated
/// response, or `None` when nothing should be sent back.
pub fn dispatch(request: &str, storage: &Storage) -> Option<String> {
    let mut response = match parser::parse(request) {
        ParseResult::Complete(command) => {
            trace!(?command, "Processing command");
            handler::execute(command, storage)
        }
        ParseResult::Empty => return None,
        ParseResult::Error(e) => {
            trace!(error = ?e, "Rejected command");
            e.to_string()
        }
    };

    response.push('\n');
    Some(response)
}

//! Commands understood by the server and the replies they produce.

use crate::storage::types::{Data, Key, Value};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Command {
    /// Liveness probe, requested on the wire as `COMMAND`.
    Ping,
    Set { key: Key, value: Value },
    Get { key: Key },
    Del { keys: Vec<Key> },
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Reply {
    Simple(String),
    Bulk(Value),
    Null,
    Integer(i64),
    Error(String),
}

impl Reply {
    pub fn ok() -> Self {
        Reply::Simple("ok".into())
    }
}

impl Command {
    /// Applies the command to `data`.
    ///
    /// This never fails: every command reaching this point has already been
    /// validated while decoding.
    pub fn apply(self, data: &mut Data) -> Reply {
        match self {
            Command::Ping => Reply::ok(),
            Command::Set { key, value } => {
                data.insert(key, value);
                Reply::ok()
            }
            Command::Get { key } => data
                .get(&key)
                .cloned()
                .map(Reply::Bulk)
                .unwrap_or(Reply::Null),
            Command::Del { keys } => {
                let removed = keys.iter().filter(|key| data.remove(*key).is_some()).count();
                Reply::Integer(removed as i64)
            }
        }
    }
}

use thiserror::Error;

/// Errors produced while handling a single client command.
///
/// Each variant maps to one of the RESP error replies a handler can
/// produce, or to a condition that requires tearing the connection down
/// instead of replying on it.
#[derive(Debug, Error)]
pub enum RedisError {
    #[error("ERR wrong number of arguments for '{0}' command")]
    Arity(String),

    #[error("ERR Protocol error: {0}")]
    Protocol(String),

    #[error("ERR {0}")]
    Semantic(String),

    #[error("ERR unknown command '{0}'")]
    UnsupportedCommand(String),

    #[error("READONLY {0}")]
    ReadOnly(String),

    #[error("replication failure: {0}")]
    Replication(String),

    #[error("io failure: {0}")]
    Io(#[from] std::io::Error),
}

impl RedisError {
    pub fn semantic(msg: impl Into<String>) -> Self {
        RedisError::Semantic(msg.into())
    }

    /// The exact bytes to send back on the wire for this error, sans the
    /// leading `-` and trailing `\r\n` (added by the encoder).
    pub fn reply_message(&self) -> String {
        match self {
            RedisError::Arity(cmd) => format!("ERR wrong number of arguments for '{cmd}' command"),
            RedisError::Protocol(msg) => format!("ERR Protocol error: {msg}"),
            RedisError::Semantic(msg) => format!("ERR {msg}"),
            RedisError::UnsupportedCommand(cmd) => format!("ERR unknown command '{cmd}'"),
            RedisError::ReadOnly(msg) => format!("READONLY {msg}"),
            RedisError::Replication(msg) => format!("replication failure: {msg}"),
            RedisError::Io(e) => format!("io failure: {e}"),
        }
    }

    /// Whether this error should tear the connection down rather than
    /// simply reply with an error frame.
    pub fn is_fatal(&self) -> bool {
        matches!(self, RedisError::Protocol(_) | RedisError::Io(_))
    }
}

pub type RedisResult<T> = Result<T, RedisError>;

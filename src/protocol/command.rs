use std::fmt::Display;
use std::str::FromStr;

use bytes::Bytes;

use crate::error::RedisError;
use crate::protocol::resp::Resp;

/// The command vocabulary this server understands. Parsing a wire frame
/// always yields one of these tagged names plus its raw argument bytes;
/// handlers are responsible for their own arity/type validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandName {
    Ping,
    Echo,
    Command,
    Config,
    Set,
    Get,
    Incr,
    Type,
    Keys,
    Psync,
    Info,
    Replconf,
    Wait,
    Xadd,
    Xrange,
    Xread,
    Lpush,
    Rpush,
    Lpop,
    Rpop,
    Lrange,
    Llen,
    Blpop,
    Multi,
    Exec,
    Discard,
    Subscribe,
    Unsubscribe,
    Publish,
    Quit,
}

impl CommandName {
    /// Commands whose effects are replicated to connected replicas and
    /// counted toward the write-offset WAIT tracks.
    pub fn is_mutating(&self) -> bool {
        matches!(self, CommandName::Set | CommandName::Xadd)
    }

    /// The short allow-list a connection in subscribed mode is restricted
    /// to, per the pub/sub component design.
    pub fn allowed_while_subscribed(&self) -> bool {
        matches!(
            self,
            CommandName::Subscribe | CommandName::Unsubscribe | CommandName::Ping | CommandName::Quit
        )
    }
}

impl FromStr for CommandName {
    type Err = ();

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        Ok(match input.to_uppercase().as_str() {
            "PING" => CommandName::Ping,
            "ECHO" => CommandName::Echo,
            "COMMAND" => CommandName::Command,
            "CONFIG" => CommandName::Config,
            "SET" => CommandName::Set,
            "GET" => CommandName::Get,
            "INCR" => CommandName::Incr,
            "TYPE" => CommandName::Type,
            "KEYS" => CommandName::Keys,
            "PSYNC" => CommandName::Psync,
            "INFO" => CommandName::Info,
            "REPLCONF" => CommandName::Replconf,
            "WAIT" => CommandName::Wait,
            "XADD" => CommandName::Xadd,
            "XRANGE" => CommandName::Xrange,
            "XREAD" => CommandName::Xread,
            "LPUSH" => CommandName::Lpush,
            "RPUSH" => CommandName::Rpush,
            "LPOP" => CommandName::Lpop,
            "RPOP" => CommandName::Rpop,
            "LRANGE" => CommandName::Lrange,
            "LLEN" => CommandName::Llen,
            "BLPOP" => CommandName::Blpop,
            "MULTI" => CommandName::Multi,
            "EXEC" => CommandName::Exec,
            "DISCARD" => CommandName::Discard,
            "SUBSCRIBE" => CommandName::Subscribe,
            "UNSUBSCRIBE" => CommandName::Unsubscribe,
            "PUBLISH" => CommandName::Publish,
            "QUIT" => CommandName::Quit,
            _ => return Err(()),
        })
    }
}

impl Display for CommandName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            CommandName::Ping => "PING",
            CommandName::Echo => "ECHO",
            CommandName::Command => "COMMAND",
            CommandName::Config => "CONFIG",
            CommandName::Set => "SET",
            CommandName::Get => "GET",
            CommandName::Incr => "INCR",
            CommandName::Type => "TYPE",
            CommandName::Keys => "KEYS",
            CommandName::Psync => "PSYNC",
            CommandName::Info => "INFO",
            CommandName::Replconf => "REPLCONF",
            CommandName::Wait => "WAIT",
            CommandName::Xadd => "XADD",
            CommandName::Xrange => "XRANGE",
            CommandName::Xread => "XREAD",
            CommandName::Lpush => "LPUSH",
            CommandName::Rpush => "RPUSH",
            CommandName::Lpop => "LPOP",
            CommandName::Rpop => "RPOP",
            CommandName::Lrange => "LRANGE",
            CommandName::Llen => "LLEN",
            CommandName::Blpop => "BLPOP",
            CommandName::Multi => "MULTI",
            CommandName::Exec => "EXEC",
            CommandName::Discard => "DISCARD",
            CommandName::Subscribe => "SUBSCRIBE",
            CommandName::Unsubscribe => "UNSUBSCRIBE",
            CommandName::Publish => "PUBLISH",
            CommandName::Quit => "QUIT",
        };
        write!(f, "{s}")
    }
}

/// A decoded command: a tagged name plus its raw argument bytes, and the
/// exact original frame (needed verbatim for replication propagation).
#[derive(Debug, Clone)]
pub struct ParsedCommand {
    pub name: CommandName,
    pub raw_name: String,
    pub args: Vec<Bytes>,
    pub frame: Resp,
}

impl ParsedCommand {
    pub fn parse(frame: Resp) -> Result<ParsedCommand, RedisError> {
        let items = match &frame {
            Resp::Array(items) if !items.is_empty() && items.iter().all(|i| matches!(i, Resp::Bulk(_))) => items,
            _ => return Err(RedisError::Protocol("expected array of bulk strings".into())),
        };
        let raw_name = items[0].as_bulk_str().unwrap_or_default().to_string();
        let name = raw_name
            .parse::<CommandName>()
            .map_err(|_| RedisError::UnsupportedCommand(raw_name.clone()))?;
        let args = items[1..]
            .iter()
            .map(|v| match v {
                Resp::Bulk(b) => b.clone(),
                _ => unreachable!("filtered to bulk-only above"),
            })
            .collect();
        Ok(ParsedCommand { name, raw_name, args, frame })
    }

    pub fn arg_str(&self, index: usize) -> Option<&str> {
        self.args.get(index).and_then(|b| std::str::from_utf8(b).ok())
    }

    pub fn require_arity(&self, min: usize) -> Result<(), RedisError> {
        if self.args.len() < min {
            Err(RedisError::Arity(self.raw_name.clone()))
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::resp::command_array;

    #[test]
    fn parses_known_command_case_insensitively() {
        let parsed = ParsedCommand::parse(command_array(["set", "k", "v"])).unwrap();
        assert_eq!(parsed.name, CommandName::Set);
        assert_eq!(parsed.args.len(), 2);
    }

    #[test]
    fn unknown_command_is_unsupported_error() {
        let err = ParsedCommand::parse(command_array(["FROBNICATE"])).unwrap_err();
        assert!(matches!(err, RedisError::UnsupportedCommand(_)));
    }

    #[test]
    fn set_and_xadd_are_mutating_others_are_not() {
        assert!(CommandName::Set.is_mutating());
        assert!(CommandName::Xadd.is_mutating());
        assert!(!CommandName::Get.is_mutating());
    }
}

use async_trait::async_trait;

use crate::connection::ConnCtx;
use crate::error::RedisError;
use crate::protocol::command::ParsedCommand;
use crate::protocol::resp::Resp;

/// Per-connection command queue for `MULTI`/`EXEC`/`DISCARD`. Commands
/// are only queued while `active`; `EXEC`/`DISCARD` require it.
#[derive(Default)]
pub struct TransactionState {
    queue: Vec<ParsedCommand>,
    active: bool,
}

impl TransactionState {
    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn begin(&mut self) -> Result<(), RedisError> {
        if self.active {
            return Err(RedisError::semantic("MULTI calls can not be nested"));
        }
        self.active = true;
        Ok(())
    }

    pub fn enqueue(&mut self, cmd: ParsedCommand) {
        self.queue.push(cmd);
    }

    pub fn discard(&mut self) -> Result<(), RedisError> {
        if !self.active {
            return Err(RedisError::semantic("DISCARD without MULTI"));
        }
        self.active = false;
        self.queue.clear();
        Ok(())
    }

    /// Hands back the queued commands in arrival order and closes the
    /// transaction. Errors if no `MULTI` is in progress.
    pub fn take_for_exec(&mut self) -> Result<Vec<ParsedCommand>, RedisError> {
        if !self.active {
            return Err(RedisError::semantic("EXEC without MULTI"));
        }
        self.active = false;
        Ok(std::mem::take(&mut self.queue))
    }
}

/// Replaces the friendship the teacher's dispatcher and transaction
/// handling would otherwise need: `EXEC` never reaches into the
/// dispatcher's internals, it just holds a `&dyn CommandExecutor` and
/// replays each queued command through it.
#[async_trait]
pub trait CommandExecutor: Send + Sync {
    async fn execute(&self, cmd: ParsedCommand, ctx: &mut ConnCtx) -> Option<Resp>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::resp::command_array;

    fn cmd(name: &str) -> ParsedCommand {
        ParsedCommand::parse(command_array([name])).unwrap()
    }

    #[test]
    fn queues_only_while_active() {
        let mut txn = TransactionState::default();
        assert!(!txn.is_active());
        txn.begin().unwrap();
        txn.enqueue(cmd("INCR"));
        txn.enqueue(cmd("INCR"));
        let queued = txn.take_for_exec().unwrap();
        assert_eq!(queued.len(), 2);
        assert!(!txn.is_active());
    }

    #[test]
    fn nested_multi_is_an_error() {
        let mut txn = TransactionState::default();
        txn.begin().unwrap();
        assert!(txn.begin().is_err());
    }

    #[test]
    fn exec_without_multi_is_an_error() {
        let mut txn = TransactionState::default();
        assert!(txn.take_for_exec().is_err());
    }

    #[test]
    fn discard_without_multi_is_an_error() {
        let mut txn = TransactionState::default();
        assert!(txn.discard().is_err());
    }

    #[test]
    fn discard_clears_the_queue() {
        let mut txn = TransactionState::default();
        txn.begin().unwrap();
        txn.enqueue(cmd("INCR"));
        txn.discard().unwrap();
        txn.begin().unwrap();
        assert_eq!(txn.take_for_exec().unwrap().len(), 0);
    }
}

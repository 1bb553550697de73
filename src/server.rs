use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

use crate::config::Config;
use crate::connection::ConnCtx;
use crate::error::{RedisError, RedisResult};
use crate::protocol::command::{CommandName, ParsedCommand};
use crate::protocol::rdb;
use crate::protocol::resp::Resp;
use crate::pubsub::PubSub;
use crate::replication::{ReplicationRole, ReplicationState};
use crate::store::list::ListStore;
use crate::store::stream::{parse_range_endpoint, EntryId, Fields, IdSpec, StreamStore};
use crate::store::value::ValueStore;
use crate::transaction::CommandExecutor;
use crate::waiter::{WaitOutcome, WaiterRegistry, UNBOUNDED_WAIT_SENTINEL};

/// Holds every data store and piece of shared state a command handler
/// might touch. The dispatcher itself is stateless — all mutable state
/// lives behind the `Arc`s here, so cloning a `Server` handle is cheap and
/// every connection task gets its own.
pub struct Server {
    config: Arc<Config>,
    values: Arc<ValueStore>,
    streams: Arc<StreamStore>,
    lists: Arc<ListStore>,
    pubsub: Arc<PubSub>,
    replication: Arc<ReplicationState>,
    xread_waiters: Arc<WaiterRegistry<Bytes, HashMap<Bytes, EntryId>>>,
}

impl Server {
    pub fn new(config: Arc<Config>, replication: Arc<ReplicationState>) -> Self {
        let values = Arc::new(ValueStore::new());
        if let Some(path) = config.snapshot_path() {
            if let Err(e) = rdb::load_into(&path, &values) {
                tracing::warn!("failed to load RDB snapshot at {path:?}: {e}");
            }
        }
        Self {
            config,
            values,
            streams: Arc::new(StreamStore::new()),
            lists: Arc::new(ListStore::new()),
            pubsub: Arc::new(PubSub::new()),
            replication,
            xread_waiters: Arc::new(WaiterRegistry::new()),
        }
    }

    pub fn pubsub(&self) -> &Arc<PubSub> {
        &self.pubsub
    }

    pub fn replication(&self) -> &Arc<ReplicationState> {
        &self.replication
    }

    fn propagate_if_mutating(&self, cmd: &ParsedCommand, ctx: &ConnCtx) {
        if cmd.name.is_mutating() && !self.replication.is_replica() && !ctx.from_master_link {
            self.replication.propagate(&cmd.frame);
        }
    }

    async fn dispatch(&self, cmd: &ParsedCommand, ctx: &mut ConnCtx) -> RedisResult<Option<Resp>> {
        match cmd.name {
            CommandName::Ping if self.pubsub.subscription_count(ctx.id) > 0 => {
                let payload = cmd.arg_str(0).map(|s| Bytes::copy_from_slice(s.as_bytes())).unwrap_or_default();
                Ok(Some(Resp::Array(vec![Resp::bulk(Bytes::from_static(b"pong")), Resp::bulk(payload)])))
            }
            CommandName::Ping => match cmd.arg_str(0) {
                Some(msg) => Ok(Some(Resp::bulk(Bytes::copy_from_slice(msg.as_bytes())))),
                None => Ok(Some(Resp::Simple("PONG".to_string()))),
            },
            CommandName::Echo => {
                cmd.require_arity(1)?;
                Ok(Some(Resp::bulk(cmd.args[0].clone())))
            }
            CommandName::Command => Ok(Some(Resp::Array(Vec::new()))),
            CommandName::Config => self.handle_config(cmd),
            CommandName::Set => self.handle_set(cmd),
            CommandName::Get => {
                cmd.require_arity(1)?;
                Ok(Some(match self.values.get(&cmd.args[0]) {
                    Some(v) => Resp::bulk(v),
                    None => Resp::Null,
                }))
            }
            CommandName::Incr => {
                cmd.require_arity(1)?;
                Ok(Some(Resp::Integer(self.values.incr(cmd.args[0].clone())?)))
            }
            CommandName::Type => {
                cmd.require_arity(1)?;
                let key = &cmd.args[0];
                let type_name = if let Some(t) = self.values.type_of(key) {
                    t
                } else if self.streams.exists(key) {
                    "stream"
                } else {
                    "none"
                };
                Ok(Some(Resp::Simple(type_name.to_string())))
            }
            CommandName::Keys => {
                cmd.require_arity(1)?;
                let pattern = cmd.arg_str(0).unwrap_or("");
                let keys = self.values.keys_matching(pattern).into_iter().map(Resp::bulk).collect();
                Ok(Some(Resp::Array(keys)))
            }
            CommandName::Psync => self.handle_psync(ctx),
            CommandName::Info => Ok(Some(self.handle_info())),
            CommandName::Replconf => self.handle_replconf(cmd, ctx),
            CommandName::Wait => self.handle_wait(cmd).await,
            CommandName::Xadd => self.handle_xadd(cmd),
            CommandName::Xrange => self.handle_xrange(cmd),
            CommandName::Xread => self.handle_xread(cmd).await,
            CommandName::Lpush => {
                cmd.require_arity(2)?;
                let len = self.lists.push_left(&cmd.args[0], cmd.args[1..].iter().cloned());
                Ok(Some(Resp::Integer(len as i64)))
            }
            CommandName::Rpush => {
                cmd.require_arity(2)?;
                let len = self.lists.push_right(&cmd.args[0], cmd.args[1..].iter().cloned());
                Ok(Some(Resp::Integer(len as i64)))
            }
            CommandName::Lpop => self.handle_pop(cmd, true),
            CommandName::Rpop => self.handle_pop(cmd, false),
            CommandName::Lrange => {
                cmd.require_arity(3)?;
                let (start, end) = (parse_i64(cmd.arg_str(1))?, parse_i64(cmd.arg_str(2))?);
                let items = self.lists.range(&cmd.args[0], start, end).into_iter().map(Resp::bulk).collect();
                Ok(Some(Resp::Array(items)))
            }
            CommandName::Llen => {
                cmd.require_arity(1)?;
                Ok(Some(Resp::Integer(self.lists.len(&cmd.args[0]) as i64)))
            }
            CommandName::Blpop => self.handle_blpop(cmd).await,
            CommandName::Subscribe => self.handle_subscribe(cmd, ctx),
            CommandName::Unsubscribe => self.handle_unsubscribe(cmd, ctx),
            CommandName::Publish => {
                cmd.require_arity(2)?;
                let count = self.pubsub.publish(&cmd.args[0], &cmd.args[1]);
                Ok(Some(Resp::Integer(count as i64)))
            }
            CommandName::Quit => Ok(Some(Resp::ok())),
            CommandName::Multi | CommandName::Exec | CommandName::Discard => {
                unreachable!("transaction commands are intercepted before reaching the dispatcher")
            }
        }
    }

    fn handle_config(&self, cmd: &ParsedCommand) -> RedisResult<Option<Resp>> {
        cmd.require_arity(1)?;
        match cmd.arg_str(0) {
            Some(sub) if sub.eq_ignore_ascii_case("GET") => {
                cmd.require_arity(2)?;
                let key = cmd.arg_str(1).unwrap_or("");
                let reply = match self.config.get(key) {
                    Some(value) => vec![Resp::bulk(Bytes::copy_from_slice(key.as_bytes())), Resp::bulk(Bytes::copy_from_slice(value.as_bytes()))],
                    None => Vec::new(),
                };
                Ok(Some(Resp::Array(reply)))
            }
            _ => Err(RedisError::semantic("unsupported CONFIG subcommand")),
        }
    }

    fn handle_set(&self, cmd: &ParsedCommand) -> RedisResult<Option<Resp>> {
        cmd.require_arity(2)?;
        let mut ttl_ms = None;
        let mut i = 2;
        while i < cmd.args.len() {
            let opt = cmd.arg_str(i).unwrap_or("");
            if opt.eq_ignore_ascii_case("PX") {
                let ms: u64 = cmd
                    .arg_str(i + 1)
                    .and_then(|s| s.parse().ok())
                    .ok_or_else(|| RedisError::semantic("PX value is not an integer or out of range"))?;
                ttl_ms = Some(ms);
                i += 2;
            } else if opt.eq_ignore_ascii_case("EX") {
                let secs: u64 = cmd
                    .arg_str(i + 1)
                    .and_then(|s| s.parse().ok())
                    .ok_or_else(|| RedisError::semantic("EX value is not an integer or out of range"))?;
                ttl_ms = Some(secs * 1000);
                i += 2;
            } else {
                i += 1;
            }
        }
        self.values.set(cmd.args[0].clone(), cmd.args[1].clone(), ttl_ms);
        Ok(Some(Resp::ok()))
    }

    fn handle_psync(&self, ctx: &mut ConnCtx) -> RedisResult<Option<Resp>> {
        let fullresync = Resp::Simple(format!("FULLRESYNC {} 0", self.replication.replication_id()));
        let _ = ctx.outbox.send(crate::protocol::resp::encode(&fullresync));
        let _ = ctx.outbox.send(crate::protocol::resp::encode_raw_bulk(&rdb::empty_rdb()));
        // The reply is already in the outbox before this connection becomes
        // visible to propagation, so a write racing in right behind PSYNC
        // can never land ahead of the resync reply.
        self.replication.register_replica(ctx.id, ctx.outbox.clone(), ctx.replica_listening_port);
        ctx.is_replica_link = true;
        Ok(None)
    }

    fn handle_info(&self) -> Resp {
        let (role, extra) = match self.replication.role() {
            ReplicationRole::Master => ("master".to_string(), String::new()),
            ReplicationRole::Replica(of) => ("slave".to_string(), format!("master_host:{}\r\nmaster_port:{}\r\n", of.0, of.1)),
        };
        let body = format!(
            "# Replication\r\nrole:{role}\r\n{extra}master_replid:{}\r\nmaster_repl_offset:{}\r\n",
            self.replication.replication_id(),
            self.replication.offset(),
        );
        Resp::bulk(Bytes::from(body))
    }

    fn handle_replconf(&self, cmd: &ParsedCommand, ctx: &mut ConnCtx) -> RedisResult<Option<Resp>> {
        cmd.require_arity(1)?;
        let sub = cmd.arg_str(0).unwrap_or("");
        if sub.eq_ignore_ascii_case("ACK") {
            let offset: u64 = cmd.arg_str(1).and_then(|s| s.parse().ok()).unwrap_or(0);
            self.replication.record_ack(ctx.id, offset);
            return Ok(None);
        }
        if sub.eq_ignore_ascii_case("listening-port") {
            ctx.replica_listening_port = cmd.arg_str(1).and_then(|s| s.parse().ok());
        }
        Ok(Some(Resp::ok()))
    }

    async fn handle_wait(&self, cmd: &ParsedCommand) -> RedisResult<Option<Resp>> {
        cmd.require_arity(2)?;
        let num_replicas: usize = cmd
            .arg_str(0)
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| RedisError::semantic("value is not an integer or out of range"))?;
        let timeout_ms: u64 = cmd
            .arg_str(1)
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| RedisError::semantic("value is not an integer or out of range"))?;
        let timeout = if timeout_ms == 0 { UNBOUNDED_WAIT_SENTINEL } else { Duration::from_millis(timeout_ms) };
        let acked = self.replication.wait(num_replicas, timeout).await;
        Ok(Some(Resp::Integer(acked as i64)))
    }

    fn handle_xadd(&self, cmd: &ParsedCommand) -> RedisResult<Option<Resp>> {
        cmd.require_arity(4)?;
        if (cmd.args.len() - 2) % 2 != 0 {
            return Err(RedisError::Arity(cmd.raw_name.clone()));
        }
        let key = cmd.args[0].clone();
        let spec: IdSpec = cmd.arg_str(1).unwrap_or("*").parse()?;
        let fields: Fields = cmd.args[2..]
            .chunks_exact(2)
            .map(|pair| (pair[0].clone(), pair[1].clone()))
            .collect();
        let id = self.streams.add(&key, spec, fields)?;
        self.xread_waiters.notify_where(&key, |wait_ids| wait_ids.get(&key).map(|w| *w < id).unwrap_or(false));
        Ok(Some(Resp::bulk(Bytes::from(id.to_string()))))
    }

    fn handle_xrange(&self, cmd: &ParsedCommand) -> RedisResult<Option<Resp>> {
        cmd.require_arity(3)?;
        let start = parse_range_endpoint(cmd.arg_str(1).unwrap_or("-"), true)?;
        let end = parse_range_endpoint(cmd.arg_str(2).unwrap_or("+"), false)?;
        let entries = self.streams.range(&cmd.args[0], start, end);
        Ok(Some(encode_stream_entries(entries)))
    }

    async fn handle_xread(&self, cmd: &ParsedCommand) -> RedisResult<Option<Resp>> {
        cmd.require_arity(3)?;
        let mut block_ms: Option<u64> = None;
        let mut i = 0;
        while i < cmd.args.len() {
            let token = cmd.arg_str(i).unwrap_or("");
            if token.eq_ignore_ascii_case("BLOCK") {
                block_ms = cmd.arg_str(i + 1).and_then(|s| s.parse().ok());
                i += 2;
            } else if token.eq_ignore_ascii_case("STREAMS") {
                i += 1;
                break;
            } else {
                i += 1;
            }
        }
        let rest = &cmd.args[i..];
        if rest.is_empty() || rest.len() % 2 != 0 {
            return Err(RedisError::semantic("Unbalanced XREAD list of streams: for each stream key an ID or '$' must be specified."));
        }
        let n = rest.len() / 2;
        let keys = &rest[..n];
        let ids = &rest[n..];

        let mut wait_ids = HashMap::new();
        for (key, id_token) in keys.iter().zip(ids.iter()) {
            let id_str = std::str::from_utf8(id_token).unwrap_or("$");
            let resolved = if id_str == "$" {
                self.streams.latest_id(key)
            } else {
                id_str.parse()?
            };
            wait_ids.insert(key.clone(), resolved);
        }

        let collect = |wait_ids: &HashMap<Bytes, EntryId>| -> Vec<(Bytes, Vec<(EntryId, Fields)>)> {
            keys.iter()
                .filter_map(|key| {
                    let entries = self.streams.after(key, wait_ids[key]);
                    (!entries.is_empty()).then(|| (key.clone(), entries))
                })
                .collect()
        };

        let mut results = collect(&wait_ids);
        if results.is_empty() {
            match block_ms {
                None => return Ok(Some(Resp::NullArray)),
                Some(ms) => {
                    let handle = self.xread_waiters.register(keys.to_vec(), wait_ids.clone());
                    let timeout = if ms == 0 { UNBOUNDED_WAIT_SENTINEL } else { Duration::from_millis(ms) };
                    if matches!(handle.wait(timeout).await, WaitOutcome::TimedOut) {
                        return Ok(Some(Resp::NullArray));
                    }
                    results = collect(&wait_ids);
                    if results.is_empty() {
                        return Ok(Some(Resp::NullArray));
                    }
                }
            }
        }

        let streams = results
            .into_iter()
            .map(|(key, entries)| Resp::Array(vec![Resp::bulk(key), encode_stream_entries(entries)]))
            .collect();
        Ok(Some(Resp::Array(streams)))
    }

    fn handle_pop(&self, cmd: &ParsedCommand, from_left: bool) -> RedisResult<Option<Resp>> {
        cmd.require_arity(1)?;
        let count = cmd.arg_str(1).and_then(|s| s.parse::<usize>().ok());
        let popped = if from_left {
            self.lists.pop_left(&cmd.args[0], count.unwrap_or(1))
        } else {
            self.lists.pop_right(&cmd.args[0], count.unwrap_or(1))
        };
        match popped.len() {
            0 => Ok(Some(Resp::Null)),
            1 => Ok(Some(Resp::bulk(popped.into_iter().next().unwrap()))),
            _ => Ok(Some(Resp::Array(popped.into_iter().map(Resp::bulk).collect()))),
        }
    }

    async fn handle_blpop(&self, cmd: &ParsedCommand) -> RedisResult<Option<Resp>> {
        cmd.require_arity(2)?;
        let keys: Vec<Bytes> = cmd.args[..cmd.args.len() - 1].to_vec();
        let timeout_secs: f64 = cmd
            .arg_str(cmd.args.len() - 1)
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| RedisError::semantic("timeout is not a float or out of range"))?;

        let try_pop = |keys: &[Bytes]| -> Option<(Bytes, Bytes)> {
            keys.iter().find_map(|key| self.lists.pop_left(key, 1).into_iter().next().map(|v| (key.clone(), v)))
        };

        if let Some((key, value)) = try_pop(&keys) {
            return Ok(Some(Resp::Array(vec![Resp::bulk(key), Resp::bulk(value)])));
        }

        let timeout = if timeout_secs == 0.0 { UNBOUNDED_WAIT_SENTINEL } else { Duration::from_secs_f64(timeout_secs) };
        let handle = self.lists.waiters().register(keys.clone(), ());
        if matches!(handle.wait(timeout).await, WaitOutcome::TimedOut) {
            return Ok(Some(Resp::NullArray));
        }
        match try_pop(&keys) {
            Some((key, value)) => Ok(Some(Resp::Array(vec![Resp::bulk(key), Resp::bulk(value)]))),
            None => Ok(Some(Resp::NullArray)),
        }
    }

    fn handle_subscribe(&self, cmd: &ParsedCommand, ctx: &mut ConnCtx) -> RedisResult<Option<Resp>> {
        cmd.require_arity(1)?;
        for channel in &cmd.args {
            let count = self.pubsub.subscribe(ctx.id, ctx.outbox.clone(), channel.clone());
            let reply = Resp::Array(vec![
                Resp::bulk(Bytes::from_static(b"subscribe")),
                Resp::bulk(channel.clone()),
                Resp::Integer(count as i64),
            ]);
            let _ = ctx.outbox.send(crate::protocol::resp::encode(&reply));
        }
        Ok(None)
    }

    fn handle_unsubscribe(&self, cmd: &ParsedCommand, ctx: &mut ConnCtx) -> RedisResult<Option<Resp>> {
        let channels = if cmd.args.is_empty() {
            self.pubsub.subscribed_channels(ctx.id)
        } else {
            cmd.args.clone()
        };
        if channels.is_empty() {
            let reply = Resp::Array(vec![Resp::bulk(Bytes::from_static(b"unsubscribe")), Resp::Null, Resp::Integer(0)]);
            let _ = ctx.outbox.send(crate::protocol::resp::encode(&reply));
            return Ok(None);
        }
        for channel in channels {
            let count = self.pubsub.unsubscribe(ctx.id, &channel);
            let reply = Resp::Array(vec![
                Resp::bulk(Bytes::from_static(b"unsubscribe")),
                Resp::bulk(channel),
                Resp::Integer(count as i64),
            ]);
            let _ = ctx.outbox.send(crate::protocol::resp::encode(&reply));
        }
        Ok(None)
    }
}

fn parse_i64(s: Option<&str>) -> RedisResult<i64> {
    s.and_then(|s| s.parse().ok()).ok_or_else(|| RedisError::semantic("value is not an integer or out of range"))
}

fn encode_stream_entries(entries: Vec<(EntryId, Fields)>) -> Resp {
    Resp::Array(
        entries
            .into_iter()
            .map(|(id, fields)| {
                let flat = fields.into_iter().flat_map(|(f, v)| [Resp::bulk(f), Resp::bulk(v)]).collect();
                Resp::Array(vec![Resp::bulk(Bytes::from(id.to_string())), Resp::Array(flat)])
            })
            .collect(),
    )
}

#[async_trait]
impl CommandExecutor for Server {
    async fn execute(&self, cmd: ParsedCommand, ctx: &mut ConnCtx) -> Option<Resp> {
        if self.replication.is_replica() && cmd.name.is_mutating() && !ctx.from_master_link {
            return Some(Resp::Error(RedisError::ReadOnly("You can't write against a read only replica.".into()).reply_message()));
        }
        let result = self.dispatch(&cmd, ctx).await;
        if result.is_ok() {
            self.propagate_if_mutating(&cmd, ctx);
        }
        if ctx.from_master_link {
            return None;
        }
        match result {
            Ok(reply) => reply,
            Err(e) => Some(Resp::Error(e.reply_message())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::ConnId;
    use crate::protocol::resp::command_array;
    use tokio::sync::mpsc;

    fn server() -> Server {
        let config = Arc::new(Config::from_args(&[]).unwrap());
        Server::new(config, Arc::new(ReplicationState::new(ReplicationRole::Master)))
    }

    fn ctx() -> (ConnCtx, mpsc::UnboundedReceiver<Bytes>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (ConnCtx::new(ConnId::new_v4(), tx), rx)
    }

    #[tokio::test]
    async fn set_then_get_round_trips() {
        let server = server();
        let (mut ctx, _rx) = ctx();
        server.execute(ParsedCommand::parse(command_array(["SET", "k", "v"])).unwrap(), &mut ctx).await;
        let reply = server.execute(ParsedCommand::parse(command_array(["GET", "k"])).unwrap(), &mut ctx).await;
        assert_eq!(reply, Some(Resp::bulk(Bytes::from("v"))));
    }

    #[tokio::test]
    async fn xadd_ordering_violation_is_prefixed_with_err() {
        let server = server();
        let (mut ctx, _rx) = ctx();
        server.execute(ParsedCommand::parse(command_array(["XADD", "s", "1-1", "f", "v"])).unwrap(), &mut ctx).await;
        let reply = server.execute(ParsedCommand::parse(command_array(["XADD", "s", "1-1", "f", "v"])).unwrap(), &mut ctx).await;
        assert_eq!(
            reply,
            Some(Resp::Error("ERR The ID specified in XADD is equal or smaller than the target stream top item".to_string()))
        );
    }

    #[tokio::test]
    async fn lpop_with_explicit_count_one_returns_single_bulk_not_array() {
        let server = server();
        let (mut ctx, _rx) = ctx();
        server.execute(ParsedCommand::parse(command_array(["RPUSH", "k", "a", "b"])).unwrap(), &mut ctx).await;
        let reply = server.execute(ParsedCommand::parse(command_array(["LPOP", "k", "1"])).unwrap(), &mut ctx).await;
        assert_eq!(reply, Some(Resp::bulk(Bytes::from("a"))));
    }

    #[tokio::test]
    async fn lpop_with_count_on_empty_list_returns_null_bulk_not_empty_array() {
        let server = server();
        let (mut ctx, _rx) = ctx();
        let reply = server.execute(ParsedCommand::parse(command_array(["LPOP", "missing", "5"])).unwrap(), &mut ctx).await;
        assert_eq!(reply, Some(Resp::Null));
    }

    #[tokio::test]
    async fn ping_in_subscribed_mode_replies_as_pong_array() {
        let server = server();
        let (mut ctx, _rx) = ctx();
        server.execute(ParsedCommand::parse(command_array(["SUBSCRIBE", "news"])).unwrap(), &mut ctx).await;
        let reply = server.execute(ParsedCommand::parse(command_array(["PING"])).unwrap(), &mut ctx).await;
        assert_eq!(
            reply,
            Some(Resp::Array(vec![Resp::bulk(Bytes::from_static(b"pong")), Resp::bulk(Bytes::new())]))
        );
    }

    #[tokio::test]
    async fn type_does_not_report_list_values() {
        let server = server();
        let (mut ctx, _rx) = ctx();
        server.execute(ParsedCommand::parse(command_array(["RPUSH", "l", "a"])).unwrap(), &mut ctx).await;
        let reply = server.execute(ParsedCommand::parse(command_array(["TYPE", "l"])).unwrap(), &mut ctx).await;
        assert_eq!(reply, Some(Resp::Simple("none".to_string())));
    }

    #[tokio::test]
    async fn replica_rejects_writes_from_ordinary_clients() {
        let config = Arc::new(Config::from_args(&[]).unwrap());
        let server = Server::new(
            config,
            Arc::new(ReplicationState::new(ReplicationRole::Replica(crate::config::Binding("127.0.0.1".into(), 6379)))),
        );
        let (mut ctx, _rx) = ctx();
        let reply = server.execute(ParsedCommand::parse(command_array(["SET", "k", "v"])).unwrap(), &mut ctx).await;
        assert!(matches!(reply, Some(Resp::Error(msg)) if msg.starts_with("READONLY")));
    }

    #[tokio::test]
    async fn blpop_wakes_on_concurrent_push() {
        let server = Arc::new(server());
        let (mut ctx, _rx) = ctx();
        let waiter_server = server.clone();
        let waiter = tokio::spawn(async move {
            let (mut ctx2, _rx2) = {
                let (tx, rx) = mpsc::unbounded_channel();
                (ConnCtx::new(ConnId::new_v4(), tx), rx)
            };
            waiter_server
                .execute(ParsedCommand::parse(command_array(["BLPOP", "k", "1"])).unwrap(), &mut ctx2)
                .await
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        server.execute(ParsedCommand::parse(command_array(["RPUSH", "k", "v"])).unwrap(), &mut ctx).await;
        let reply = waiter.await.unwrap();
        assert_eq!(reply, Some(Resp::Array(vec![Resp::bulk(Bytes::from("k")), Resp::bulk(Bytes::from("v"))])));
    }
}

use std::sync::Arc;

use bytes::Bytes;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::mpsc;

use crate::protocol::command::{CommandName, ParsedCommand};
use crate::protocol::reader::{FrameError, FrameReader};
use crate::protocol::resp::{encode, Resp};
use crate::server::Server;
use crate::shutdown::ShutdownSignal;
use crate::transaction::{CommandExecutor, TransactionState};

pub type ConnId = uuid::Uuid;
pub type Outbox = mpsc::UnboundedSender<Bytes>;

/// Per-connection state the dispatcher and transaction handling both
/// need: identity, the outbox every reply/push/propagated frame flows
/// through, and whether this connection is actually the read side of the
/// replication link to our master rather than an ordinary client.
pub struct ConnCtx {
    pub id: ConnId,
    pub outbox: Outbox,
    pub transaction: TransactionState,
    pub from_master_link: bool,
    pub is_replica_link: bool,
    pub replica_listening_port: Option<u16>,
}

impl ConnCtx {
    pub fn new(id: ConnId, outbox: Outbox) -> Self {
        Self {
            id,
            outbox,
            transaction: TransactionState::default(),
            from_master_link: false,
            is_replica_link: false,
            replica_listening_port: None,
        }
    }
}

/// Runs one client connection end to end: a dedicated writer task drains
/// the outbox so every reply, pub/sub push, and replicated command is
/// written in the order it was queued, while this task reads frames and
/// dispatches them.
pub async fn handle_client(socket: TcpStream, server: Arc<Server>, shutdown: ShutdownSignal) {
    let id = ConnId::new_v4();
    let (read_half, mut write_half) = socket.into_split();
    let (outbox_tx, mut outbox_rx) = mpsc::unbounded_channel::<Bytes>();

    let writer = tokio::spawn(async move {
        while let Some(bytes) = outbox_rx.recv().await {
            if write_half.write_all(&bytes).await.is_err() {
                break;
            }
        }
        let _ = write_half.shutdown().await;
    });

    let mut reader = FrameReader::new(read_half);
    let mut ctx = ConnCtx::new(id, outbox_tx);

    loop {
        let frame = tokio::select! {
            frame = reader.read_frame() => frame,
            _ = shutdown.triggered() => break,
        };
        let frame = match frame {
            Ok(f) => f,
            Err(FrameError::ConnectionClosed) => break,
            Err(e) => {
                tracing::debug!("connection {id} protocol error: {e}");
                break;
            }
        };

        let parsed = match ParsedCommand::parse(frame) {
            Ok(p) => p,
            Err(e) => {
                let _ = ctx.outbox.send(encode(&Resp::Error(e.reply_message())));
                continue;
            }
        };

        let subscribed = server.pubsub().subscription_count(ctx.id) > 0;
        if subscribed && !parsed.name.allowed_while_subscribed() {
            let msg = format!(
                "ERR Can't execute '{}': only (P|S)SUBSCRIBE / (P|S)UNSUBSCRIBE / PING / QUIT / RESET are allowed in this context",
                parsed.raw_name.to_lowercase()
            );
            let _ = ctx.outbox.send(encode(&Resp::Error(msg)));
            continue;
        }

        let is_quit = parsed.name == CommandName::Quit;

        if ctx.transaction.is_active() && !matches!(parsed.name, CommandName::Multi | CommandName::Exec | CommandName::Discard) {
            ctx.transaction.enqueue(parsed);
            let _ = ctx.outbox.send(encode(&Resp::Simple("QUEUED".to_string())));
            continue;
        }

        match parsed.name {
            CommandName::Multi => {
                let reply = match ctx.transaction.begin() {
                    Ok(()) => Resp::ok(),
                    Err(e) => Resp::Error(e.reply_message()),
                };
                let _ = ctx.outbox.send(encode(&reply));
            }
            CommandName::Discard => {
                let reply = match ctx.transaction.discard() {
                    Ok(()) => Resp::ok(),
                    Err(e) => Resp::Error(e.reply_message()),
                };
                let _ = ctx.outbox.send(encode(&reply));
            }
            CommandName::Exec => {
                let reply = match ctx.transaction.take_for_exec() {
                    Err(e) => Resp::Error(e.reply_message()),
                    Ok(queued) => {
                        let mut replies = Vec::with_capacity(queued.len());
                        for queued_cmd in queued {
                            if let Some(r) = server.execute(queued_cmd, &mut ctx).await {
                                replies.push(r);
                            }
                        }
                        Resp::Array(replies)
                    }
                };
                let _ = ctx.outbox.send(encode(&reply));
            }
            _ => {
                if let Some(reply) = server.execute(parsed, &mut ctx).await {
                    let _ = ctx.outbox.send(encode(&reply));
                }
            }
        }

        if is_quit {
            break;
        }
    }

    server.pubsub().unsubscribe_all(ctx.id);
    if ctx.is_replica_link {
        server.replication().deregister_replica(ctx.id);
    }
    drop(ctx.outbox);
    let _ = writer.await;
}

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use bytes::Bytes;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::mpsc;

use crate::config::{Binding, Config};
use crate::connection::{ConnCtx, ConnId, Outbox};
use crate::protocol::command::ParsedCommand;
use crate::protocol::reader::FrameReader;
use crate::protocol::resp::{command_array, encode, Resp};
use crate::shutdown::ShutdownSignal;
use crate::transaction::CommandExecutor;

/// A fixed, process-lifetime replication ID. Real Redis generates a fresh
/// pseudo-random one per master; a constant is enough to satisfy PSYNC's
/// handshake without a dependency on an RNG crate.
const REPLICATION_ID: &str = "8371b4fb1155b71f4a04d3e1bc3e18c4a990aeeb";

#[derive(Debug, Clone)]
pub enum ReplicationRole {
    Master,
    Replica(Binding),
}

/// Tracks everything about this node's place in a replication topology:
/// its role, how many bytes of command stream it has produced or
/// consumed, and (if it's a master) the replicas currently attached.
pub struct ReplicationState {
    role: ReplicationRole,
    replication_id: String,
    repl_offset: AtomicU64,
    replicas: RwLock<Vec<Arc<ReplicaHandle>>>,
}

pub struct ReplicaHandle {
    pub id: ConnId,
    pub listening_port: RwLock<Option<u16>>,
    pub outbox: Outbox,
    pub acked_offset: AtomicU64,
}

impl ReplicationState {
    pub fn new(role: ReplicationRole) -> Self {
        Self {
            role,
            replication_id: REPLICATION_ID.to_string(),
            repl_offset: AtomicU64::new(0),
            replicas: RwLock::new(Vec::new()),
        }
    }

    pub fn role(&self) -> &ReplicationRole {
        &self.role
    }

    pub fn is_replica(&self) -> bool {
        matches!(self.role, ReplicationRole::Replica(_))
    }

    pub fn replication_id(&self) -> &str {
        &self.replication_id
    }

    pub fn offset(&self) -> u64 {
        self.repl_offset.load(Ordering::SeqCst)
    }

    /// Advances this node's known offset. On a master this happens when a
    /// write is propagated; on a replica it happens as bytes are consumed
    /// off the master link. Returns the offset after the advance.
    pub fn advance_offset(&self, by: u64) -> u64 {
        self.repl_offset.fetch_add(by, Ordering::SeqCst) + by
    }

    pub fn register_replica(&self, id: ConnId, outbox: Outbox, listening_port: Option<u16>) -> Arc<ReplicaHandle> {
        let handle = Arc::new(ReplicaHandle {
            id,
            listening_port: RwLock::new(listening_port),
            outbox,
            acked_offset: AtomicU64::new(0),
        });
        self.replicas.write().unwrap().push(handle.clone());
        handle
    }

    pub fn deregister_replica(&self, id: ConnId) {
        self.replicas.write().unwrap().retain(|r| r.id != id);
    }

    pub fn replica_count(&self) -> usize {
        self.replicas.read().unwrap().len()
    }

    /// Sends the exact original command frame to every attached replica
    /// and counts it toward this node's replication offset. Only called
    /// for commands `CommandName::is_mutating()` reports true for.
    pub fn propagate(&self, frame: &Resp) {
        let bytes = encode(frame);
        self.advance_offset(bytes.len() as u64);
        let replicas = self.replicas.read().unwrap();
        for replica in replicas.iter() {
            let _ = replica.outbox.send(bytes.clone());
        }
    }

    fn send_getack(&self) {
        let frame = encode(&command_array(["REPLCONF", "GETACK", "*"]));
        let replicas = self.replicas.read().unwrap();
        for replica in replicas.iter() {
            let _ = replica.outbox.send(frame.clone());
        }
    }

    pub fn record_ack(&self, id: ConnId, offset: u64) {
        if let Some(replica) = self.replicas.read().unwrap().iter().find(|r| r.id == id) {
            replica.acked_offset.store(offset, Ordering::SeqCst);
        }
    }

    /// Polls attached replicas' acknowledged offsets until `num_replicas`
    /// have caught up to this node's current offset or `timeout` elapses.
    /// Returns however many had caught up at whichever point stopped the
    /// loop.
    pub async fn wait(&self, num_replicas: usize, timeout: Duration) -> usize {
        let target = self.offset();
        let snapshot: Vec<Arc<ReplicaHandle>> = self.replicas.read().unwrap().clone();
        if snapshot.is_empty() {
            return 0;
        }
        if target == 0 {
            return snapshot.len();
        }
        let caught_up = |snapshot: &[Arc<ReplicaHandle>]| {
            snapshot.iter().filter(|r| r.acked_offset.load(Ordering::SeqCst) >= target).count()
        };
        let already = caught_up(&snapshot);
        if already >= num_replicas {
            return already;
        }
        self.send_getack();
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let acked = caught_up(&snapshot);
            if acked >= num_replicas || tokio::time::Instant::now() >= deadline {
                return acked;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }
}

/// Drives the replica side of a master link: handshake, then a read loop
/// that applies every propagated command locally and tracks the byte
/// offset it has consumed. Reconnects with a fixed backoff if the link
/// drops, matching the always-reconnect behavior of the system this was
/// modeled on.
pub async fn run_replica_link(
    master: Binding,
    config: Arc<Config>,
    server: Arc<dyn CommandExecutor>,
    replication: Arc<ReplicationState>,
    shutdown: ShutdownSignal,
) {
    loop {
        if shutdown.is_triggered() {
            return;
        }
        match replica_link_once(&master, &config, &server, &replication, &shutdown).await {
            Ok(()) => tracing::info!("replica link to {master} closed"),
            Err(e) => tracing::warn!("replica link to {master} failed: {e}"),
        }
        if shutdown.is_triggered() {
            return;
        }
        tokio::select! {
            _ = tokio::time::sleep(Duration::from_secs(2)) => {}
            _ = shutdown.triggered() => return,
        }
    }
}

async fn replica_link_once(
    master: &Binding,
    config: &Arc<Config>,
    server: &Arc<dyn CommandExecutor>,
    replication: &Arc<ReplicationState>,
    shutdown: &ShutdownSignal,
) -> anyhow::Result<()> {
    let stream = TcpStream::connect((master.0.as_str(), master.1)).await?;
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = FrameReader::new(read_half);

    write_half.write_all(&encode(&command_array(["PING"]))).await?;
    reader.read_frame().await?;

    write_half
        .write_all(&encode(&command_array(["REPLCONF", "listening-port", &config.port().to_string()])))
        .await?;
    reader.read_frame().await?;

    write_half
        .write_all(&encode(&command_array(["REPLCONF", "capa", "psync2"])))
        .await?;
    reader.read_frame().await?;

    write_half.write_all(&encode(&command_array(["PSYNC", "?", "-1"]))).await?;
    reader.read_frame().await?; // +FULLRESYNC <id> <offset>
    reader.read_raw_bulk().await?; // snapshot payload; ingesting it is out of scope here

    let (outbox_tx, mut outbox_rx) = mpsc::unbounded_channel::<Bytes>();
    tokio::spawn(async move {
        while let Some(bytes) = outbox_rx.recv().await {
            if write_half.write_all(&bytes).await.is_err() {
                break;
            }
        }
    });

    let mut ctx = ConnCtx::new(ConnId::new_v4(), outbox_tx);
    ctx.from_master_link = true;

    loop {
        tokio::select! {
            frame = reader.read_frame_len() => {
                let (frame, consumed) = frame?;
                let offset_before = replication.advance_offset(consumed as u64) - consumed as u64;
                let parsed = match ParsedCommand::parse(frame) {
                    Ok(p) => p,
                    Err(e) => {
                        tracing::warn!("malformed frame from master: {e}");
                        continue;
                    }
                };
                if parsed.name == crate::protocol::command::CommandName::Replconf
                    && parsed.arg_str(0).map(|s| s.eq_ignore_ascii_case("getack")).unwrap_or(false)
                {
                    let reply = command_array(["REPLCONF", "ACK", &(offset_before + consumed as u64).to_string()]);
                    let _ = ctx.outbox.send(encode(&reply));
                    continue;
                }
                let _ = server.execute(parsed, &mut ctx).await;
            }
            _ = shutdown.triggered() => return Ok(()),
        }
    }
}

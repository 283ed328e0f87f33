//! Orchestrator tying the block log, sync/dispatch state, and the
//! connection layer together. Wiring order mirrors the reference node:
//! open storage, stand up the sync core, start accepting/dialing
//! connections, then hand control to the caller's shutdown wait.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::Context;
use glint_blocklog::{BlockLog, BlockLogConfig, ChainIdentity};
use glint_core::{BlockId, BlockNum};
use glint_netp2p::connection::RoleMask;
use glint_netp2p::dedup::ConnectionId;
use glint_netp2p::dispatch::RecipientInfo;
use glint_netp2p::manager::{ConnectionManager, MessageHandler};
use glint_netp2p::sync::{ChainStatus, PeerCandidate, SyncAction};
use glint_netp2p::wire::{
    GoAway, GoAwayReason, Handshake, Message, Notice, PackedTransaction, Request, SignedBlock, SyncRequest,
    TimeMessage,
};
use glint_netp2p::{DispatchManager, SyncManager};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex as AsyncMutex;
use tracing::{info, warn};

use crate::chain::{Block, ChainController, InMemoryChainController};
use crate::config::NodeConfig;
use crate::genesis;

const NETWORK_VERSION: u16 = 1;
const MIN_DISTANCE: BlockNum = 0;

fn deterministic_id(seed: &str) -> [u8; 32] {
    let mut out = [0u8; 32];
    for (i, b) in seed.bytes().enumerate() {
        out[i % 32] ^= b.wrapping_add(i as u8);
    }
    out
}

fn now_ns() -> i64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_nanos() as i64).unwrap_or(0)
}

fn now_ms() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_millis() as u64).unwrap_or(0)
}

struct Shared {
    config: NodeConfig,
    listen_addr: std::net::SocketAddr,
    node_id: [u8; 32],
    chain_id: [u8; 32],
    block_log: AsyncMutex<BlockLog>,
    chain: AsyncMutex<InMemoryChainController>,
    dispatch: DispatchManager,
    sync: AsyncMutex<SyncManager>,
    conn_manager: ConnectionManager,
    peer_heads: AsyncMutex<HashMap<ConnectionId, ChainStatus>>,
    handshake_sent: AsyncMutex<HashMap<ConnectionId, bool>>,
}

struct NodeHandler {
    shared: Arc<Shared>,
}

pub struct NodeService {
    shared: Arc<Shared>,
}

impl NodeService {
    pub async fn start(config: NodeConfig) -> anyhow::Result<Self> {
        let node_id = deterministic_id(&format!("{}-{:?}", config.chain_id, config.p2p_listen));

        let block_log_config = match config.prune_blocks {
            Some(n) => BlockLogConfig::new(Some(n), config.prune_threshold),
            None => BlockLogConfig::dense(),
        };

        let (identity, chain_id) = match &config.genesis_file {
            Some(path) => {
                let genesis_bytes = genesis::encode_genesis_file(path).context("invalid genesis file")?;
                let chain_id = glint_blocklog::header::fallback_chain_id(&genesis_bytes);
                (ChainIdentity::Genesis(genesis_bytes), chain_id)
            }
            None => {
                let chain_id = deterministic_id(&config.chain_id);
                (ChainIdentity::ChainId(chain_id), chain_id)
            }
        };

        let block_log = BlockLog::open(config.block_log_dir(), block_log_config, identity)?;

        let chain = InMemoryChainController::new(BlockId::ZERO);
        let sync = SyncManager::new(config.sync_span, config.peer_limit, config.latency_budget_ms as u64 * 2);

        let listener = TcpListener::bind(config.p2p_listen).await?;
        let listen_addr = listener.local_addr()?;
        info!(addr = %listen_addr, "p2p listener bound");

        let shared = Arc::new(Shared {
            config: config.clone(),
            listen_addr,
            node_id,
            chain_id,
            block_log: AsyncMutex::new(block_log),
            chain: AsyncMutex::new(chain),
            dispatch: DispatchManager::new(),
            sync: AsyncMutex::new(sync),
            conn_manager: ConnectionManager::new(),
            peer_heads: AsyncMutex::new(HashMap::new()),
            handshake_sent: AsyncMutex::new(HashMap::new()),
        });

        let accept_shared = shared.clone();
        tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, peer_addr)) => {
                        info!(%peer_addr, "inbound connection accepted");
                        spawn_connection(accept_shared.clone(), stream, true).await;
                    }
                    Err(e) => {
                        warn!(error = %e, "accept failed");
                    }
                }
            }
        });

        for addr in config.p2p_peers.clone() {
            let dial_shared = shared.clone();
            tokio::spawn(async move {
                match TcpStream::connect(&addr).await {
                    Ok(stream) => {
                        info!(%addr, "outbound connection established");
                        spawn_connection(dial_shared, stream, false).await;
                    }
                    Err(e) => warn!(%addr, error = %e, "failed to dial peer"),
                }
            });
        }

        Ok(NodeService { shared })
    }

    pub fn listen_addr(&self) -> std::net::SocketAddr {
        self.shared.listen_addr
    }

    pub async fn shutdown(&mut self) {
        info!("node service shutting down");
    }
}

async fn spawn_connection(shared: Arc<Shared>, stream: TcpStream, _inbound: bool) {
    let id = shared.conn_manager.allocate_id();
    let handler = Arc::new(NodeHandler { shared: shared.clone() });
    shared.conn_manager.spawn(id, stream, RoleMask::Both, handler).await;

    let our = our_status(&shared).await;
    let handshake = Handshake {
        network_version: NETWORK_VERSION,
        chain_id: shared.chain_id,
        node_id: shared.node_id,
        key: [0u8; 32],
        time_ns: now_ns(),
        token: [0u8; 32],
        sig: [0u8; 64],
        p2p_address: shared.listen_addr.to_string(),
        last_irreversible: our.lib,
        last_irreversible_id: our.head_id,
        head: our.head,
        head_id: our.head_id,
        os: std::env::consts::OS.to_string(),
        agent: "glint-node".to_string(),
        generation: 1,
    };
    if shared.conn_manager.send(id, Message::Handshake(handshake)).await.is_ok() {
        shared.handshake_sent.lock().await.insert(id, true);
    }
}

async fn our_status(shared: &Shared) -> ChainStatus {
    let chain = shared.chain.lock().await;
    ChainStatus { lib: chain.lib(), head: chain.head(), head_id: chain.head_id() }
}

#[async_trait::async_trait]
impl MessageHandler for NodeHandler {
    async fn on_message(&self, conn: ConnectionId, msg: Message) {
        let shared = &self.shared;
        match msg {
            Message::Handshake(hs) => self.handle_handshake(conn, hs).await,
            Message::Time(tm) => self.handle_time(conn, tm).await,
            Message::Request(req) => self.handle_request(conn, req).await,
            Message::SyncRequest(req) => self.handle_sync_request(conn, req).await,
            Message::SignedBlock(sb) => self.handle_signed_block(conn, sb).await,
            Message::PackedTransaction(tx) => self.handle_packed_transaction(conn, tx).await,
            Message::GoAway(ga) => {
                warn!(conn, reason = ?ga.reason, "peer sent go_away");
                shared.conn_manager.close(conn).await;
            }
            Message::ChainSize(_) | Message::Notice(_) => {
                // Advisory only; the handshake already carries the fields
                // the sync core acts on.
            }
        }
    }

    async fn on_closed(&self, conn: ConnectionId) {
        let shared = &self.shared;
        shared.peer_heads.lock().await.remove(&conn);
        shared.handshake_sent.lock().await.remove(&conn);
        let mut sync = shared.sync.lock().await;
        if sync.sync_source() == Some(conn) {
            let lib = sync.known_lib();
            sync.on_sync_source_disconnected(lib);
        }
        info!(conn, "connection closed");
    }
}

impl NodeHandler {
    async fn handle_handshake(&self, conn: ConnectionId, hs: Handshake) {
        let shared = &self.shared;
        if hs.chain_id != shared.chain_id {
            let _ = shared
                .conn_manager
                .send(conn, Message::GoAway(GoAway { reason: GoAwayReason::WrongChain, node_id: shared.node_id }))
                .await;
            shared.conn_manager.close(conn).await;
            return;
        }

        let peer_status = ChainStatus { lib: hs.last_irreversible, head: hs.head, head_id: hs.head_id };
        shared.peer_heads.lock().await.insert(conn, peer_status);

        let our = our_status(shared).await;
        let our_id_at_peer_head = shared.chain.lock().await.block_id_for(hs.head);
        let already_sent = shared.handshake_sent.lock().await.get(&conn).copied().unwrap_or(false);

        let action = {
            let mut sync = shared.sync.lock().await;
            sync.recv_handshake(our, peer_status, shared.config.latency_budget_ms, MIN_DISTANCE, already_sent, our_id_at_peer_head)
        };

        match action {
            SyncAction::MarkPeerNotSyncing => {}
            SyncAction::ResendHandshake => self.resend_handshake(conn).await,
            SyncAction::SendLastIrrCatchUp { head, head_id, earliest_available_block_num } => {
                let _ = shared
                    .conn_manager
                    .send(conn, Message::Notice(Notice::LastIrrCatchUp { head, head_id, earliest_available_block_num }))
                    .await;
            }
            SyncAction::SendCatchUp { head, head_id, also_request_branch } => {
                let _ = shared.conn_manager.send(conn, Message::Notice(Notice::CatchUp { head, head_id })).await;
                if also_request_branch {
                    let _ = shared
                        .conn_manager
                        .send(conn, Message::Request(Request { block_num: hs.head, block_id: hs.head_id }))
                        .await;
                }
            }
            SyncAction::EnterHeadCatchup { request_from, .. } => {
                let _ = shared
                    .conn_manager
                    .send(conn, Message::SyncRequest(SyncRequest { start_block: request_from + 1, end_block: hs.head }))
                    .await;
            }
            SyncAction::NoOp => {}
        }

        self.maybe_request_sync_range().await;
    }

    async fn resend_handshake(&self, conn: ConnectionId) {
        let shared = &self.shared;
        let our = our_status(shared).await;
        let hs = Handshake {
            network_version: NETWORK_VERSION,
            chain_id: shared.chain_id,
            node_id: shared.node_id,
            key: [0u8; 32],
            time_ns: now_ns(),
            token: [0u8; 32],
            sig: [0u8; 64],
            p2p_address: shared.listen_addr.to_string(),
            last_irreversible: our.lib,
            last_irreversible_id: our.head_id,
            head: our.head,
            head_id: our.head_id,
            os: std::env::consts::OS.to_string(),
            agent: "glint-node".to_string(),
            generation: 1,
        };
        let _ = shared.conn_manager.send(conn, Message::Handshake(hs)).await;
    }

    async fn maybe_request_sync_range(&self) {
        let shared = &self.shared;
        let candidates: Vec<PeerCandidate> = {
            let peer_heads = shared.peer_heads.lock().await;
            let roles = shared.conn_manager.roles().await;
            peer_heads
                .iter()
                .map(|(&conn, status)| PeerCandidate {
                    conn,
                    carries_blocks: roles.get(&conn).map(|r| r.carries_blocks()).unwrap_or(false),
                    connected: true,
                    start_block: 1,
                    head: status.head,
                    has_gone_away: false,
                    rtt_ms: 0,
                    ordinal: conn as u64,
                })
                .collect()
        };

        let chosen = {
            let mut sync = shared.sync.lock().await;
            sync.choose_sync_source(&candidates)
        };

        if let Some(conn) = chosen {
            let (start, end) = shared.sync.lock().await.next_range();
            let _ = shared.conn_manager.send(conn, Message::SyncRequest(SyncRequest { start_block: start, end_block: end })).await;
        }
    }

    async fn handle_time(&self, conn: ConnectionId, tm: TimeMessage) {
        use glint_netp2p::time_sync::TimeTracker;
        let mut tracker = TimeTracker::default();
        let received = tracker.on_received(tm, now_ns());
        let _ = self.shared.conn_manager.send(conn, Message::Time(received.reply)).await;
    }

    async fn handle_request(&self, conn: ConnectionId, req: Request) {
        let shared = &self.shared;
        let payload = {
            let mut log = shared.block_log.lock().await;
            log.read_block_by_num(req.block_num).ok()
        };
        if let Some(payload) = payload {
            let previous = shared.chain.lock().await.block_id_for(req.block_num.saturating_sub(1)).unwrap_or(BlockId::ZERO);
            let _ = shared
                .conn_manager
                .send(
                    conn,
                    Message::SignedBlock(SignedBlock { block_num: req.block_num, block_id: req.block_id, previous, timestamp_ns: now_ns(), payload }),
                )
                .await;
        }
    }

    async fn handle_sync_request(&self, conn: ConnectionId, req: SyncRequest) {
        let shared = &self.shared;
        let mut num = req.start_block;
        while num <= req.end_block {
            let payload = {
                let mut log = shared.block_log.lock().await;
                log.read_block_by_num(num).ok()
            };
            let Some(payload) = payload else { break };
            let id = shared.chain.lock().await.block_id_for(num).unwrap_or(BlockId::with_num_and_tail(num, &[0; 28]));
            let previous = shared.chain.lock().await.block_id_for(num.saturating_sub(1)).unwrap_or(BlockId::ZERO);
            let sent = shared
                .conn_manager
                .send(conn, Message::SignedBlock(SignedBlock { block_num: num, block_id: id, previous, timestamp_ns: now_ns(), payload }))
                .await;
            if sent.is_err() {
                break;
            }
            num += 1;
        }
    }

    async fn handle_signed_block(&self, conn: ConnectionId, sb: SignedBlock) {
        let shared = &self.shared;
        shared.dispatch.record_peer_block(sb.block_id, conn);

        let block = Block { block_num: sb.block_num, id: sb.block_id, previous: sb.previous, payload: sb.payload.clone() };
        let applied = shared.chain.lock().await.apply_block(block);

        match applied {
            Ok(true) => {
                {
                    let mut log = shared.block_log.lock().await;
                    if let Err(e) = log.append(sb.block_num, &sb.payload) {
                        warn!(block_num = sb.block_num, error = %e, "failed to append block to log");
                    }
                }
                shared.sync.lock().await.record_acceptance(conn);
                let entered_in_sync = shared.sync.lock().await.on_block_received(sb.block_num, true);
                if entered_in_sync {
                    info!(block_num = sb.block_num, "caught up, back in sync");
                }

                let recipients = self.recipients_excluding(conn).await;
                let targets = shared.dispatch.bcast_block(sb.block_num, sb.block_id, &recipients);
                for t in targets {
                    let _ = shared
                        .conn_manager
                        .send(t.conn, Message::SignedBlock(SignedBlock { block_num: sb.block_num, block_id: sb.block_id, previous: sb.previous, timestamp_ns: sb.timestamp_ns, payload: sb.payload.clone() }))
                        .await;
                }
            }
            Ok(false) => {}
            Err(e) => {
                warn!(block_num = sb.block_num, error = %e, "rejected block, recording as a dispatch rejection");
                let close = shared.sync.lock().await.record_rejection(conn, now_ms());
                if close {
                    let _ = shared
                        .conn_manager
                        .send(conn, Message::GoAway(GoAway { reason: GoAwayReason::Unlinkable, node_id: shared.node_id }))
                        .await;
                    shared.conn_manager.close(conn).await;
                }
            }
        }
    }

    async fn handle_packed_transaction(&self, conn: ConnectionId, tx: PackedTransaction) {
        let shared = &self.shared;
        let recipients = self.recipients_excluding(conn).await;
        let now = (now_ms() / 1000) as u32;
        let targets = shared.dispatch.bcast_trx(tx.id, tx.expires, now, &recipients);
        for t in targets {
            let _ = shared.conn_manager.send(t.conn, Message::PackedTransaction(tx.clone())).await;
        }
    }

    async fn recipients_excluding(&self, conn: ConnectionId) -> Vec<RecipientInfo> {
        let shared = &self.shared;
        let roles = shared.conn_manager.roles().await;
        let peer_heads = shared.peer_heads.lock().await;
        roles
            .into_iter()
            .filter(|(id, _)| *id != conn)
            .map(|(id, role)| RecipientInfo {
                conn: id,
                is_syncing_from_us: false,
                carries_blocks: role.carries_blocks(),
                carries_trx: role.carries_trx(),
                peer_lib: peer_heads.get(&id).map(|s| s.lib).unwrap_or(0),
            })
            .collect()
    }
}

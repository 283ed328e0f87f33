//! Peer-to-peer sync core: dedup/unlinkable caches, dispatch and sync
//! managers, and the connection layer that frames and moves bytes between
//! nodes. Deliberately ignorant of block/transaction *contents* — callers
//! (`glint-node`) supply block bytes and a `ChainController`; this crate
//! only ever reasons about ids, numbers, and wire framing.

pub mod connection;
pub mod dedup;
pub mod dispatch;
pub mod error;
pub mod manager;
pub mod sync;
pub mod time_sync;
pub mod unlinkable;
pub mod wire;

pub use dedup::{ConnectionId, NodeTransactionIndex, PeerBlockIndex};
pub use dispatch::DispatchManager;
pub use error::{NetError, Result};
pub use sync::{ChainStatus, Reconnector, SyncAction, SyncManager, SyncStage};
pub use unlinkable::{UnlinkableBlockCache, UnlinkableBlock};
pub use wire::Message;

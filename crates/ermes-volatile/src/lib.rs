//! Volatile session ownership store for edge nodes.
//!
//! Tracks which node owns a session, arbitrates read-write and read-only
//! access with non-blocking try-acquire, and keeps two ranked indices:
//! - sessions by absolute expiration, for sweeping
//! - sessions by a decayed recency/priority score, for picking offload
//!   candidates
//!
//! Sessions move between nodes with [`SessionStore::offload`] on the source
//! and [`SessionStore::onload`] on the target. Everything lives in memory.
//!
//! # Example
//!
//! ```rust,ignore
//! use ermes_volatile::{GeoCoordinates, LockMode, MemoryPayloads, SessionStore, StoreConfig};
//!
//! let config = StoreConfig::default().with_node_id("edge-1");
//! let store = SessionStore::with_payloads(config, MemoryPayloads::new())?;
//!
//! let id = store.create_and_rw_acquire(GeoCoordinates::new(45.0, 7.6), None).await?;
//! store.release(&id, LockMode::ReadWrite).await?;
//! ```

mod clock;
mod config;
mod error;
mod id;
mod index;
mod payload;
mod score;
mod store;
mod sweeper;
mod types;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{
    DEFAULT_DECAY_RATE, DEFAULT_ID_RETRY_LIMIT, DEFAULT_MAX_PAYLOAD_BYTES, StoreConfig,
};
pub use error::{Error, Result};
pub use id::{SessionIdSource, UuidSource};
pub use index::OrderedIndex;
pub use payload::{MemoryPayloads, NoPayloads, PayloadStore};
pub use score::{decayed_boost, offload_score};
pub use store::SessionStore;
pub use types::{
    AcquireOutcome, GeoCoordinates, LockMode, OffloadOutcome, ReleaseOutcome, SessionLocation,
    SessionLockState, SessionMetadata, SessionRecord, StoreStats,
};

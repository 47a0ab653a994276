//! Session records and the shapes exchanged with the dispatch layer.

use serde::{Deserialize, Serialize};

/// Geographic position of the client that opened a session.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct GeoCoordinates {
    pub latitude: f64,
    pub longitude: f64,
}

impl GeoCoordinates {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }
}

/// Metadata describing a session. Timestamps are unix seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionMetadata {
    /// Where the client was when the session was opened.
    pub client_geo_coordinates: GeoCoordinates,

    /// Caller-assigned weight that temporarily boosts the offload score.
    pub static_offloadable_score: i64,

    /// Node the session was created on.
    pub created_in: String,

    pub created_at: i64,

    /// Last time the session was touched; drives the offload score decay.
    pub updated_at: i64,

    /// Absolute expiration time, if any.
    pub expires_at: Option<i64>,
}

/// Pointer to the node currently hosting a session.
///
/// An empty `host` means the session lives on this node.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionLocation {
    pub host: String,
    pub session_id: String,
}

impl SessionLocation {
    /// Location of a session held by this node.
    pub fn local(session_id: impl Into<String>) -> Self {
        Self {
            host: String::new(),
            session_id: session_id.into(),
        }
    }

    /// Location of a session held by `host`.
    pub fn remote(host: impl Into<String>, session_id: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            session_id: session_id.into(),
        }
    }

    pub fn is_local(&self) -> bool {
        self.host.is_empty()
    }
}

/// Access mode of a session lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockMode {
    ReadWrite,
    ReadOnly,
}

impl std::fmt::Display for LockMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LockMode::ReadWrite => write!(f, "rw"),
            LockMode::ReadOnly => write!(f, "ro"),
        }
    }
}

/// Lock bookkeeping of a session.
///
/// Read-write locks are a reference count, not an exclusive lock: several
/// holders may be granted read-write access at once. Exclusivity, when
/// needed, is arbitrated by the dispatch layer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionLockState {
    pub rw_locks: u32,
    pub ro_locks: u32,

    /// Set once an offload has been initiated for this session.
    pub is_offloading: bool,

    /// Where the session has been relocated to. While set, new
    /// acquisitions are refused locally.
    pub offload_target: Option<SessionLocation>,
}

impl SessionLockState {
    /// Lock state right after creating a session in `mode`.
    pub fn acquired(mode: LockMode) -> Self {
        let mut state = Self::default();
        *state.counter_mut(mode) = 1;
        state
    }

    pub fn count(&self, mode: LockMode) -> u32 {
        match mode {
            LockMode::ReadWrite => self.rw_locks,
            LockMode::ReadOnly => self.ro_locks,
        }
    }

    pub(crate) fn counter_mut(&mut self, mode: LockMode) -> &mut u32 {
        match mode {
            LockMode::ReadWrite => &mut self.rw_locks,
            LockMode::ReadOnly => &mut self.ro_locks,
        }
    }

    /// Whether any holder still has the session.
    pub fn is_held(&self) -> bool {
        self.rw_locks > 0 || self.ro_locks > 0
    }

    pub fn is_relocated(&self) -> bool {
        self.offload_target.is_some()
    }
}

/// A session as held by the store.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionRecord {
    pub metadata: SessionMetadata,
    pub lock_state: SessionLockState,
}

impl SessionRecord {
    pub fn new(metadata: SessionMetadata, lock_state: SessionLockState) -> Self {
        Self {
            metadata,
            lock_state,
        }
    }
}

/// Result of a try-acquire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AcquireOutcome {
    /// The lock was granted; the session is local.
    Acquired(SessionLocation),

    /// The session has moved. Nothing was acquired and the caller should
    /// redirect to `target`.
    Relocated { target: SessionLocation },
}

impl AcquireOutcome {
    pub fn is_acquired(&self) -> bool {
        matches!(self, AcquireOutcome::Acquired(_))
    }

    /// Turn a refused acquire into [`Error::Unavailable`](crate::Error::Unavailable).
    pub fn into_result(self, session_id: &str) -> crate::Result<SessionLocation> {
        match self {
            AcquireOutcome::Acquired(location) => Ok(location),
            AcquireOutcome::Relocated { target } => Err(crate::Error::Unavailable {
                session_id: session_id.to_string(),
                target,
            }),
        }
    }
}

/// Result of a release.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseOutcome {
    /// The record is still held by this node.
    Held,
    /// The last holder of a relocating session released it and the record
    /// was removed.
    Finalized,
}

/// Result of initiating an offload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OffloadOutcome {
    /// Local holders remain; the record is removed once they release.
    Draining { rw_locks: u32, ro_locks: u32 },
    /// Nobody held the session, so it was removed right away.
    Finalized,
}

/// Store statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreStats {
    /// Number of records held.
    pub sessions: usize,

    /// Entries in the expiration index.
    pub expiring: usize,

    /// Entries in the offload-score index.
    pub offload_ranked: usize,

    /// Records with an offload in progress.
    pub relocating: usize,

    /// Stored payloads.
    pub payloads: usize,
}

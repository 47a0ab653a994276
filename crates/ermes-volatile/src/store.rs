//! Session store: ownership, lock state and the two decision indices.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::RwLock;
use tracing::{debug, info, trace, warn};

use crate::clock::{Clock, SystemClock};
use crate::config::StoreConfig;
use crate::error::{Error, Result};
use crate::id::{SessionIdSource, UuidSource};
use crate::index::OrderedIndex;
use crate::payload::{NoPayloads, PayloadStore};
use crate::score::offload_score;
use crate::types::{
    AcquireOutcome, GeoCoordinates, LockMode, OffloadOutcome, ReleaseOutcome, SessionLocation,
    SessionLockState, SessionMetadata, SessionRecord, StoreStats,
};

/// Inner state protected by RwLock.
struct StoreInner<P: PayloadStore> {
    /// Records by session id.
    sessions: HashMap<String, SessionRecord>,

    /// Sessions with an expiration, ranked by `expires_at`.
    by_expiration: OrderedIndex,

    /// Offload candidates, ranked by decayed score.
    by_offload_score: OrderedIndex,

    payloads: P,
}

impl<P: PayloadStore> StoreInner<P> {
    /// Draw ids until one is free, at most `attempts` times.
    fn unique_id(&self, ids: &dyn SessionIdSource, attempts: u32) -> Result<String> {
        for _ in 0..attempts {
            let id = ids.next_id();
            if !self.sessions.contains_key(&id) {
                return Ok(id);
            }
            trace!(session_id = %id, "Session id collision, drawing again");
        }
        Err(Error::IdSpaceExhausted { attempts })
    }

    fn record_mut(&mut self, session_id: &str) -> Result<&mut SessionRecord> {
        self.sessions
            .get_mut(session_id)
            .ok_or_else(|| Error::NotFound(session_id.to_string()))
    }

    fn record(&self, session_id: &str) -> Result<&SessionRecord> {
        self.sessions
            .get(session_id)
            .ok_or_else(|| Error::NotFound(session_id.to_string()))
    }

    /// Remove a record together with its index entries and payload.
    fn remove_record(&mut self, session_id: &str) -> Option<SessionRecord> {
        let record = self.sessions.remove(session_id)?;
        self.by_expiration.remove(session_id);
        self.by_offload_score.remove(session_id);
        self.payloads.remove(session_id);
        Some(record)
    }

    /// Sessions expiring at or before `as_of`, soonest first.
    ///
    /// Index scores are `f64`, so timestamps beyond 2^53 may share a
    /// score; the exact `expires_at` is checked against the record.
    fn expired_as_of(&self, as_of: i64) -> Vec<String> {
        self.by_expiration
            .range_by_score(f64::NEG_INFINITY, as_of as f64)
            .into_iter()
            .filter(|id| {
                self.sessions
                    .get(id)
                    .and_then(|record| record.metadata.expires_at)
                    .is_some_and(|expires_at| expires_at <= as_of)
            })
            .collect()
    }

    /// Recompute the offload score of a ranked session.
    fn rescore(&mut self, session_id: &str, now: i64, decay_rate: f64) {
        if !self.by_offload_score.contains(session_id) {
            return;
        }
        if let Some(record) = self.sessions.get(session_id) {
            let score = offload_score(&record.metadata, now, decay_rate);
            self.by_offload_score.insert_or_update(session_id, score);
        }
    }
}

/// In-memory session ownership store.
///
/// One RwLock guards the record map, both indices and the payload backend.
/// No operation awaits while holding it, so dropping an operation's future
/// never leaves partial state behind. Acquisition is try-only: callers
/// that are refused retry (or redirect) on their own.
///
/// The payload backend is chosen by the type parameter. With
/// [`NoPayloads`] the store tracks ownership only and refuses onload; use
/// [`MemoryPayloads`](crate::MemoryPayloads) to accept onloaded sessions.
pub struct SessionStore<P: PayloadStore = NoPayloads> {
    inner: Arc<RwLock<StoreInner<P>>>,
    config: Arc<StoreConfig>,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn SessionIdSource>,
}

impl SessionStore<NoPayloads> {
    /// Create a store that keeps no payloads.
    pub fn new(config: StoreConfig) -> Result<Self> {
        Self::with_payloads(config, NoPayloads)
    }
}

impl<P: PayloadStore> SessionStore<P> {
    /// Create a store with a payload backend.
    pub fn with_payloads(config: StoreConfig, payloads: P) -> Result<Self> {
        config.validate()?;

        let inner = StoreInner {
            sessions: HashMap::new(),
            by_expiration: OrderedIndex::new(),
            by_offload_score: OrderedIndex::new(),
            payloads,
        };

        Ok(Self {
            inner: Arc::new(RwLock::new(inner)),
            config: Arc::new(config),
            clock: Arc::new(SystemClock),
            ids: Arc::new(UuidSource),
        })
    }

    /// Replace the wall clock.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Replace the session id source.
    pub fn with_id_source(mut self, ids: Arc<dyn SessionIdSource>) -> Self {
        self.ids = ids;
        self
    }

    /// Get the store configuration.
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Current time according to the store's clock.
    pub fn now(&self) -> i64 {
        self.clock.now()
    }

    /// Number of sessions held.
    pub async fn len(&self) -> usize {
        self.inner.read().await.sessions.len()
    }

    /// Check if the store holds no sessions.
    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.sessions.is_empty()
    }

    /// Check if a session is held by this store.
    pub async fn contains(&self, session_id: &str) -> bool {
        self.inner.read().await.sessions.contains_key(session_id)
    }

    /// Create a session and acquire it in `mode`.
    ///
    /// Only read-write sessions enter the offload ranking; a read-only
    /// session becomes a candidate once it is acquired read-write.
    pub async fn create_and_acquire(
        &self,
        mode: LockMode,
        geo: GeoCoordinates,
        expires_at: Option<i64>,
    ) -> Result<String> {
        let mut guard = self.inner.write().await;
        let inner = &mut *guard;

        let session_id = inner.unique_id(self.ids.as_ref(), self.config.id_retry_limit)?;
        let now = self.clock.now();

        let metadata = SessionMetadata {
            client_geo_coordinates: geo,
            static_offloadable_score: 0,
            created_in: self.config.node_id.clone(),
            created_at: now,
            updated_at: now,
            expires_at,
        };
        inner.sessions.insert(
            session_id.clone(),
            SessionRecord::new(metadata, SessionLockState::acquired(mode)),
        );

        if let Some(expires_at) = expires_at {
            inner
                .by_expiration
                .insert_or_update(&session_id, expires_at as f64);
        }
        if mode == LockMode::ReadWrite {
            inner.by_offload_score.insert_or_update(&session_id, now as f64);
        }

        debug!(
            session_id = %session_id,
            mode = %mode,
            expires_at = ?expires_at,
            sessions = inner.sessions.len(),
            "Session created"
        );

        Ok(session_id)
    }

    /// Create a session and acquire it read-write.
    pub async fn create_and_rw_acquire(
        &self,
        geo: GeoCoordinates,
        expires_at: Option<i64>,
    ) -> Result<String> {
        self.create_and_acquire(LockMode::ReadWrite, geo, expires_at)
            .await
    }

    /// Create a session and acquire it read-only.
    pub async fn create_and_ro_acquire(
        &self,
        geo: GeoCoordinates,
        expires_at: Option<i64>,
    ) -> Result<String> {
        self.create_and_acquire(LockMode::ReadOnly, geo, expires_at)
            .await
    }

    /// Metadata of a session.
    pub async fn get_metadata(&self, session_id: &str) -> Result<SessionMetadata> {
        let inner = self.inner.read().await;
        Ok(inner.record(session_id)?.metadata.clone())
    }

    /// Lock state of a session.
    pub async fn lock_state(&self, session_id: &str) -> Result<SessionLockState> {
        let inner = self.inner.read().await;
        Ok(inner.record(session_id)?.lock_state.clone())
    }

    /// Where a relocating session has been sent, if anywhere.
    pub async fn relocation_target(&self, session_id: &str) -> Result<Option<SessionLocation>> {
        let inner = self.inner.read().await;
        Ok(inner.record(session_id)?.lock_state.offload_target.clone())
    }

    /// Try to acquire a session in `mode`. Never waits.
    ///
    /// A relocated session is left untouched and the outcome carries the
    /// location to redirect to.
    pub async fn acquire(&self, session_id: &str, mode: LockMode) -> Result<AcquireOutcome> {
        let mut guard = self.inner.write().await;
        let inner = &mut *guard;
        let record = inner
            .sessions
            .get_mut(session_id)
            .ok_or_else(|| Error::NotFound(session_id.to_string()))?;

        if let Some(target) = &record.lock_state.offload_target {
            trace!(
                session_id = %session_id,
                target_host = %target.host,
                "Session relocated, refusing acquire"
            );
            return Ok(AcquireOutcome::Relocated {
                target: target.clone(),
            });
        }

        let counter = record.lock_state.counter_mut(mode);
        *counter = counter.checked_add(1).ok_or_else(|| {
            Error::InvariantViolation(format!(
                "{mode} lock count overflow on session {session_id}"
            ))
        })?;

        if mode == LockMode::ReadWrite && !inner.by_offload_score.contains(session_id) {
            let score = offload_score(&record.metadata, self.clock.now(), self.config.decay_rate);
            inner.by_offload_score.insert_or_update(session_id, score);
        }

        trace!(
            session_id = %session_id,
            mode = %mode,
            rw_locks = record.lock_state.rw_locks,
            ro_locks = record.lock_state.ro_locks,
            "Session acquired"
        );

        Ok(AcquireOutcome::Acquired(SessionLocation::local(session_id)))
    }

    /// Release a lock previously granted in `mode`.
    ///
    /// Releasing read-write re-scores the session. When the last holder of
    /// a relocating session releases it, the record is removed.
    pub async fn release(&self, session_id: &str, mode: LockMode) -> Result<ReleaseOutcome> {
        let mut guard = self.inner.write().await;
        let inner = &mut *guard;
        let record = inner.record_mut(session_id)?;

        let counter = record.lock_state.counter_mut(mode);
        if *counter == 0 {
            return Err(Error::InvariantViolation(format!(
                "release of {mode} lock on session {session_id} without a matching acquire"
            )));
        }
        *counter -= 1;

        let drained = record.lock_state.is_offloading && !record.lock_state.is_held();
        if drained {
            inner.remove_record(session_id);
            info!(session_id = %session_id, "Relocated session drained, record removed");
            return Ok(ReleaseOutcome::Finalized);
        }

        if mode == LockMode::ReadWrite {
            inner.rescore(session_id, self.clock.now(), self.config.decay_rate);
        }

        trace!(session_id = %session_id, mode = %mode, "Session released");
        Ok(ReleaseOutcome::Held)
    }

    /// Start relocating a session to `target`.
    ///
    /// New acquisitions are refused from now on. The record is removed as
    /// soon as the current holders have released it, immediately if there
    /// are none.
    pub async fn offload(&self, session_id: &str, target: SessionLocation) -> Result<OffloadOutcome> {
        if target.is_local() {
            return Err(Error::InvariantViolation(format!(
                "offload target of session {session_id} must name a remote host"
            )));
        }

        let mut guard = self.inner.write().await;
        let inner = &mut *guard;
        let record = inner.record_mut(session_id)?;

        if record.lock_state.is_offloading {
            return Err(Error::InvariantViolation(format!(
                "session {session_id} is already being offloaded"
            )));
        }

        record.lock_state.is_offloading = true;
        record.lock_state.offload_target = Some(target.clone());
        let (rw_locks, ro_locks) = (record.lock_state.rw_locks, record.lock_state.ro_locks);

        if rw_locks == 0 && ro_locks == 0 {
            inner.remove_record(session_id);
            info!(
                session_id = %session_id,
                target_host = %target.host,
                "Session offloaded"
            );
            return Ok(OffloadOutcome::Finalized);
        }

        // A relocating session is no longer a candidate.
        inner.by_offload_score.remove(session_id);

        info!(
            session_id = %session_id,
            target_host = %target.host,
            rw_locks,
            ro_locks,
            "Session offload started, waiting for holders to release"
        );

        Ok(OffloadOutcome::Draining { rw_locks, ro_locks })
    }

    /// Register a session received from another node.
    ///
    /// The payload is drained from `reader` before the store is locked. The
    /// new record is created with no holders and is not ranked for offload
    /// until it is first acquired read-write. On any failure no state is
    /// left behind.
    pub async fn onload<R>(&self, metadata: SessionMetadata, reader: R) -> Result<String>
    where
        R: AsyncRead + Unpin,
    {
        let limit = self.config.max_payload_bytes;
        let mut payload = Vec::new();
        reader
            .take((limit as u64).saturating_add(1))
            .read_to_end(&mut payload)
            .await
            .inspect_err(|e| warn!(error = %e, "Failed to read onload payload"))?;
        if payload.len() > limit {
            warn!(limit, "Onload payload too large");
            return Err(Error::PayloadTooLarge { limit });
        }

        let mut guard = self.inner.write().await;
        let inner = &mut *guard;

        let session_id = inner.unique_id(self.ids.as_ref(), self.config.id_retry_limit)?;
        let expires_at = metadata.expires_at;
        let payload_len = payload.len();

        inner.sessions.insert(
            session_id.clone(),
            SessionRecord::new(metadata, SessionLockState::default()),
        );
        if let Some(expires_at) = expires_at {
            inner
                .by_expiration
                .insert_or_update(&session_id, expires_at as f64);
        }

        if let Err(e) = inner.payloads.put(&session_id, payload) {
            inner.sessions.remove(&session_id);
            inner.by_expiration.remove(&session_id);
            warn!(session_id = %session_id, error = %e, "Payload store failed, onload rolled back");
            return Err(e);
        }

        info!(
            session_id = %session_id,
            payload_bytes = payload_len,
            "Session onloaded"
        );

        Ok(session_id)
    }

    /// Stored payload of a session.
    pub async fn payload(&self, session_id: &str) -> Result<Option<Vec<u8>>> {
        let inner = self.inner.read().await;
        inner.record(session_id)?;
        Ok(inner.payloads.get(session_id))
    }

    /// Replace the payload of a session.
    ///
    /// Refused once an offload has started: the payload already shipped to
    /// the target is the one that counts, and the local copy is dropped when
    /// the last holder releases.
    pub async fn put_payload(&self, session_id: &str, payload: Vec<u8>) -> Result<()> {
        let limit = self.config.max_payload_bytes;
        if payload.len() > limit {
            return Err(Error::PayloadTooLarge { limit });
        }

        let mut inner = self.inner.write().await;
        if inner.record(session_id)?.lock_state.is_offloading {
            warn!(session_id = %session_id, "Payload write refused, session is being offloaded");
            return Err(Error::InvariantViolation(format!(
                "session {session_id} is being offloaded and its payload is frozen"
            )));
        }
        inner.payloads.put(session_id, payload)
    }

    /// Mark a session as updated now and re-score it.
    pub async fn touch(&self, session_id: &str) -> Result<()> {
        let now = self.clock.now();
        let mut inner = self.inner.write().await;
        inner.record_mut(session_id)?.metadata.updated_at = now;
        inner.rescore(session_id, now, self.config.decay_rate);
        trace!(session_id = %session_id, "Session touched");
        Ok(())
    }

    /// Set the static offloadable score of a session and re-score it.
    pub async fn set_offloadable_score(&self, session_id: &str, score: i64) -> Result<()> {
        let now = self.clock.now();
        let mut inner = self.inner.write().await;
        let metadata = &mut inner.record_mut(session_id)?.metadata;
        metadata.static_offloadable_score = score;
        metadata.updated_at = now;
        inner.rescore(session_id, now, self.config.decay_rate);
        debug!(session_id = %session_id, score, "Offloadable score updated");
        Ok(())
    }

    /// Set or clear the expiration of a session.
    pub async fn set_expiration(&self, session_id: &str, expires_at: Option<i64>) -> Result<()> {
        let now = self.clock.now();
        let mut guard = self.inner.write().await;
        let inner = &mut *guard;
        let metadata = &mut inner.record_mut(session_id)?.metadata;
        metadata.expires_at = expires_at;
        metadata.updated_at = now;

        match expires_at {
            Some(expires_at) => inner
                .by_expiration
                .insert_or_update(session_id, expires_at as f64),
            None => {
                inner.by_expiration.remove(session_id);
            }
        }
        inner.rescore(session_id, now, self.config.decay_rate);

        debug!(session_id = %session_id, expires_at = ?expires_at, "Session expiration updated");
        Ok(())
    }

    /// Remove a session nobody holds.
    pub async fn delete(&self, session_id: &str) -> Result<SessionMetadata> {
        let mut inner = self.inner.write().await;
        if inner.record(session_id)?.lock_state.is_held() {
            return Err(Error::InvariantViolation(format!(
                "session {session_id} is still held and cannot be deleted"
            )));
        }
        let record = inner
            .remove_record(session_id)
            .ok_or_else(|| Error::NotFound(session_id.to_string()))?;
        debug!(session_id = %session_id, "Session deleted");
        Ok(record.metadata)
    }

    /// Sessions whose expiration is at or before `as_of`, soonest first.
    pub async fn expired_sessions(&self, as_of: i64) -> Vec<String> {
        self.inner.read().await.expired_as_of(as_of)
    }

    /// Up to `limit` offload candidates with their scores, lowest first.
    pub async fn offload_candidates(&self, limit: usize) -> Vec<(String, f64)> {
        let inner = self.inner.read().await;
        inner
            .by_offload_score
            .iter()
            .take(limit)
            .map(|(id, score)| (id.to_string(), score))
            .collect()
    }

    /// Ranked sessions whose offload score lies in `[low, high]`.
    pub async fn offload_scores_between(&self, low: f64, high: f64) -> Vec<String> {
        let inner = self.inner.read().await;
        inner.by_offload_score.range_by_score(low, high)
    }

    /// Current offload score of a session, if it is ranked.
    pub async fn offload_score(&self, session_id: &str) -> Option<f64> {
        self.inner.read().await.by_offload_score.score(session_id)
    }

    /// Expiration of a session, if it is in the expiration index.
    pub async fn expiration_entry(&self, session_id: &str) -> Option<i64> {
        let inner = self.inner.read().await;
        if !inner.by_expiration.contains(session_id) {
            return None;
        }
        inner.sessions.get(session_id)?.metadata.expires_at
    }

    /// Remove expired sessions that nobody holds, returning their ids.
    ///
    /// Expired sessions that are still held are kept until released.
    pub async fn sweep_expired(&self) -> Vec<String> {
        let now = self.clock.now();
        let mut inner = self.inner.write().await;
        let expired = inner.expired_as_of(now);

        let mut removed = Vec::with_capacity(expired.len());
        for session_id in expired {
            let held = inner
                .sessions
                .get(&session_id)
                .is_some_and(|record| record.lock_state.is_held());
            if held {
                debug!(session_id = %session_id, "Expired session still held, keeping");
                continue;
            }
            if inner.remove_record(&session_id).is_some() {
                debug!(session_id = %session_id, "Cleaning up expired session");
                removed.push(session_id);
            }
        }

        if !removed.is_empty() {
            debug!(count = removed.len(), "Swept expired sessions");
        }

        removed
    }

    /// Get store statistics.
    pub async fn stats(&self) -> StoreStats {
        let inner = self.inner.read().await;
        StoreStats {
            sessions: inner.sessions.len(),
            expiring: inner.by_expiration.len(),
            offload_ranked: inner.by_offload_score.len(),
            relocating: inner
                .sessions
                .values()
                .filter(|record| record.lock_state.is_offloading)
                .count(),
            payloads: inner.payloads.len(),
        }
    }
}

impl<P: PayloadStore> Clone for SessionStore<P> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            config: Arc::clone(&self.config),
            clock: Arc::clone(&self.clock),
            ids: Arc::clone(&self.ids),
        }
    }
}

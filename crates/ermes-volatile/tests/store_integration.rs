//! End-to-end tests of the session store command surface.

use std::collections::HashSet;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use ermes_volatile::{
    AcquireOutcome, Error, GeoCoordinates, LockMode, ManualClock, MemoryPayloads, PayloadStore,
    ReleaseOutcome, SessionLocation, SessionMetadata, SessionStore, StoreConfig, StoreStats,
};
use tokio::io::{AsyncRead, ReadBuf};

const T0: i64 = 1_700_000_000;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn node(name: &str, clock: Arc<ManualClock>) -> SessionStore<MemoryPayloads> {
    let config = StoreConfig::new().with_node_id(name);
    SessionStore::with_payloads(config, MemoryPayloads::new())
        .unwrap()
        .with_clock(clock)
}

fn metadata(expires_at: Option<i64>) -> SessionMetadata {
    SessionMetadata {
        client_geo_coordinates: GeoCoordinates::new(48.85, 2.35),
        static_offloadable_score: 25,
        created_in: "edge-origin".to_string(),
        created_at: T0 - 100,
        updated_at: T0 - 10,
        expires_at,
    }
}

/// Reader that fails after yielding a few bytes.
struct BrokenStream {
    sent: bool,
}

impl AsyncRead for BrokenStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        if !self.sent {
            self.sent = true;
            buf.put_slice(b"partial");
            return Poll::Ready(Ok(()));
        }
        Poll::Ready(Err(io::Error::new(
            io::ErrorKind::ConnectionReset,
            "peer went away",
        )))
    }
}

/// Payload backend that refuses every write.
struct RejectingPayloads;

impl PayloadStore for RejectingPayloads {
    fn put(&mut self, _session_id: &str, _payload: Vec<u8>) -> ermes_volatile::Result<()> {
        Err(Error::Payload("backend full".to_string()))
    }

    fn get(&self, _session_id: &str) -> Option<Vec<u8>> {
        None
    }

    fn remove(&mut self, _session_id: &str) {}

    fn len(&self) -> usize {
        0
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_creations_yield_distinct_ids() {
    init_tracing();
    let store = SessionStore::new(StoreConfig::new()).unwrap();

    let mut handles = Vec::with_capacity(10_000);
    for i in 0..10_000 {
        let store = store.clone();
        handles.push(tokio::spawn(async move {
            let mode = if i % 2 == 0 {
                LockMode::ReadWrite
            } else {
                LockMode::ReadOnly
            };
            store
                .create_and_acquire(mode, GeoCoordinates::default(), None)
                .await
                .unwrap()
        }));
    }

    let mut ids = HashSet::new();
    for handle in handles {
        assert!(ids.insert(handle.await.unwrap()));
    }

    assert_eq!(ids.len(), 10_000);
    let stats = store.stats().await;
    assert_eq!(stats.sessions, 10_000);
    assert_eq!(stats.offload_ranked, 5_000);
}

#[tokio::test]
async fn expiration_index_matches_records() {
    init_tracing();
    let clock = Arc::new(ManualClock::new(T0));
    let store = node("edge-1", clock);

    let mut expiring = Vec::new();
    for offset in [30, 10, 20] {
        let id = store
            .create_and_rw_acquire(GeoCoordinates::default(), Some(T0 + offset))
            .await
            .unwrap();
        expiring.push((offset, id));
    }
    let forever = store
        .create_and_ro_acquire(GeoCoordinates::default(), None)
        .await
        .unwrap();

    assert_eq!(store.stats().await.expiring, 3);
    assert!(store.expired_sessions(T0 + 9).await.is_empty());

    expiring.sort();
    let as_of_20: Vec<String> = expiring
        .iter()
        .filter(|(offset, _)| *offset <= 20)
        .map(|(_, id)| id.clone())
        .collect();
    assert_eq!(store.expired_sessions(T0 + 20).await, as_of_20);

    let all = store.expired_sessions(i64::MAX).await;
    assert_eq!(all.len(), 3);
    assert!(!all.contains(&forever));
}

#[tokio::test]
async fn read_only_sessions_stay_out_of_offload_ranking() {
    init_tracing();
    let clock = Arc::new(ManualClock::new(T0));
    let store = node("edge-1", clock);

    let ro = store
        .create_and_ro_acquire(GeoCoordinates::default(), None)
        .await
        .unwrap();
    let rw = store
        .create_and_rw_acquire(GeoCoordinates::default(), None)
        .await
        .unwrap();
    store.acquire(&ro, LockMode::ReadOnly).await.unwrap();
    store.release(&ro, LockMode::ReadOnly).await.unwrap();

    let ranked: Vec<String> = store
        .offload_candidates(10)
        .await
        .into_iter()
        .map(|(id, _)| id)
        .collect();
    assert_eq!(ranked, vec![rw.clone()]);

    store.acquire(&ro, LockMode::ReadWrite).await.unwrap();
    assert!(store.offload_score(&ro).await.is_some());
}

#[tokio::test]
async fn unknown_session_operations_fail_without_side_effects() {
    init_tracing();
    let clock = Arc::new(ManualClock::new(T0));
    let store = node("edge-1", clock);
    store
        .create_and_rw_acquire(GeoCoordinates::default(), Some(T0 + 5))
        .await
        .unwrap();
    let before = store.stats().await;

    assert!(matches!(
        store.acquire("nope", LockMode::ReadOnly).await,
        Err(Error::NotFound(_))
    ));
    assert!(matches!(
        store.get_metadata("nope").await,
        Err(Error::NotFound(_))
    ));
    assert!(matches!(
        store.release("nope", LockMode::ReadWrite).await,
        Err(Error::NotFound(_))
    ));
    assert!(matches!(store.touch("nope").await, Err(Error::NotFound(_))));

    assert_eq!(store.stats().await, before);
}

#[tokio::test]
async fn onload_round_trip() {
    init_tracing();
    let clock = Arc::new(ManualClock::new(T0));
    let store = node("edge-2", clock);
    let payload = b"serialized session state".to_vec();
    let sent = metadata(Some(T0 + 600));

    let id = store.onload(sent.clone(), payload.as_slice()).await.unwrap();

    assert_eq!(store.payload(&id).await.unwrap(), Some(payload));
    assert_eq!(store.get_metadata(&id).await.unwrap(), sent);

    let state = store.lock_state(&id).await.unwrap();
    assert_eq!((state.rw_locks, state.ro_locks), (0, 0));
    assert_eq!(store.offload_score(&id).await, None);
    assert_eq!(store.expiration_entry(&id).await, Some(T0 + 600));
}

#[tokio::test]
async fn failed_onload_leaves_store_unchanged() {
    init_tracing();
    let clock = Arc::new(ManualClock::new(T0));
    let store = node("edge-2", clock);
    store
        .create_and_rw_acquire(GeoCoordinates::default(), Some(T0 + 5))
        .await
        .unwrap();
    let before = store.stats().await;

    let result = store
        .onload(metadata(Some(T0 + 600)), BrokenStream { sent: false })
        .await;

    match result {
        Err(Error::Io(e)) => assert_eq!(e.kind(), io::ErrorKind::ConnectionReset),
        other => panic!("expected io error, got {other:?}"),
    }
    assert_eq!(store.stats().await, before);
    assert_eq!(store.expired_sessions(i64::MAX).await.len(), 1);
}

#[tokio::test]
async fn rejected_payload_rolls_back_onload() {
    init_tracing();
    let store = SessionStore::with_payloads(StoreConfig::new(), RejectingPayloads).unwrap();

    let result = store
        .onload(metadata(Some(T0 + 600)), &b"bytes"[..])
        .await;

    assert!(matches!(result, Err(Error::Payload(_))));
    assert_eq!(store.stats().await, StoreStats::default());
}

#[tokio::test]
async fn oversized_onload_is_refused() {
    init_tracing();
    let config = StoreConfig::new().with_max_payload_bytes(8);
    let store = SessionStore::with_payloads(config, MemoryPayloads::new()).unwrap();

    let result = store.onload(metadata(None), &[7u8; 9][..]).await;
    assert!(matches!(result, Err(Error::PayloadTooLarge { limit: 8 })));
    assert!(store.is_empty().await);

    let id = store.onload(metadata(None), &[7u8; 8][..]).await.unwrap();
    assert_eq!(store.payload(&id).await.unwrap(), Some(vec![7u8; 8]));
}

#[tokio::test]
async fn migration_between_nodes() {
    init_tracing();
    let clock = Arc::new(ManualClock::new(T0));
    let source = node("edge-1", clock.clone());
    let target = node("edge-2", clock.clone());

    let id = source
        .create_and_rw_acquire(GeoCoordinates::new(41.9, 12.5), Some(T0 + 3_600))
        .await
        .unwrap();
    source.put_payload(&id, b"cart: 3 items".to_vec()).await.unwrap();
    let reader = source
        .create_and_ro_acquire(GeoCoordinates::default(), None)
        .await
        .unwrap();
    assert_ne!(id, reader);

    // Ship metadata and payload to the target node.
    let metadata = source.get_metadata(&id).await.unwrap();
    let payload = source.payload(&id).await.unwrap().unwrap();
    let remote_id = target.onload(metadata.clone(), payload.as_slice()).await.unwrap();
    let location = SessionLocation::remote("edge-2", remote_id.clone());

    source.offload(&id, location.clone()).await.unwrap();

    // New clients are redirected; the existing holder keeps working.
    let outcome = source.acquire(&id, LockMode::ReadOnly).await.unwrap();
    assert_eq!(outcome, AcquireOutcome::Relocated { target: location.clone() });
    match outcome.into_result(&id) {
        Err(Error::Unavailable { target, .. }) => assert_eq!(target, location),
        other => panic!("expected unavailable, got {other:?}"),
    }
    assert!(source.contains(&id).await);

    assert_eq!(
        source.release(&id, LockMode::ReadWrite).await.unwrap(),
        ReleaseOutcome::Finalized
    );
    assert!(!source.contains(&id).await);
    assert!(source.expired_sessions(i64::MAX).await.is_empty());

    // The target owns it now, with a fresh id and the original metadata.
    assert_eq!(target.get_metadata(&remote_id).await.unwrap(), metadata);
    let outcome = target
        .acquire(&remote_id, LockMode::ReadWrite)
        .await
        .unwrap();
    assert_eq!(
        outcome,
        AcquireOutcome::Acquired(SessionLocation::local(remote_id.clone()))
    );
    assert!(target.offload_score(&remote_id).await.is_some());
}

#[tokio::test]
async fn stale_sessions_rank_first() {
    init_tracing();
    let clock = Arc::new(ManualClock::new(T0));
    let store = node("edge-1", clock.clone());

    let first = store
        .create_and_rw_acquire(GeoCoordinates::default(), None)
        .await
        .unwrap();
    clock.advance(3);
    let second = store
        .create_and_rw_acquire(GeoCoordinates::default(), None)
        .await
        .unwrap();
    clock.advance(3);
    let third = store
        .create_and_rw_acquire(GeoCoordinates::default(), None)
        .await
        .unwrap();

    // A fresh priority boost lifts `first` above the others for a while.
    store.set_offloadable_score(&first, 100).await.unwrap();
    let order: Vec<String> = store
        .offload_candidates(3)
        .await
        .into_iter()
        .map(|(id, _)| id)
        .collect();
    assert_eq!(order, vec![second.clone(), third.clone(), first.clone()]);

    assert_eq!(
        store.offload_scores_between((T0 + 3) as f64, (T0 + 6) as f64).await,
        vec![second, third]
    );
}

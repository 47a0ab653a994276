//! Per-session payload storage.
//!
//! The store keeps an opaque byte payload per session when a session's full
//! state is received from another node. [`PayloadStore`] decouples the store
//! from how those bytes are kept; it is driven under the store's lock, so
//! implementations must not block.

use std::collections::HashMap;

use crate::error::{Error, Result};

/// Backend holding session payloads.
pub trait PayloadStore: Send + Sync {
    /// Store `payload` under `session_id`, replacing any previous payload.
    fn put(&mut self, session_id: &str, payload: Vec<u8>) -> Result<()>;

    /// Payload of `session_id`, if one was stored.
    fn get(&self, session_id: &str) -> Option<Vec<u8>>;

    /// Drop the payload of `session_id`.
    ///
    /// Called when the session leaves the store.
    fn remove(&mut self, session_id: &str);

    /// Number of stored payloads.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Payload backend that keeps nothing. Stores built with it only track
/// ownership and lock state, and refuse to take payloads.
#[derive(Debug, Clone, Default)]
pub struct NoPayloads;

impl PayloadStore for NoPayloads {
    fn put(&mut self, _session_id: &str, _payload: Vec<u8>) -> Result<()> {
        Err(Error::Payload("store keeps no payloads".into()))
    }

    fn get(&self, _session_id: &str) -> Option<Vec<u8>> {
        None
    }

    fn remove(&mut self, _session_id: &str) {}

    fn len(&self) -> usize {
        0
    }
}

/// Payloads kept in memory, keyed by session id.
#[derive(Debug, Clone, Default)]
pub struct MemoryPayloads {
    payloads: HashMap<String, Vec<u8>>,
}

impl MemoryPayloads {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of payload bytes held.
    pub fn total_bytes(&self) -> usize {
        self.payloads.values().map(Vec::len).sum()
    }
}

impl PayloadStore for MemoryPayloads {
    fn put(&mut self, session_id: &str, payload: Vec<u8>) -> Result<()> {
        self.payloads.insert(session_id.to_string(), payload);
        Ok(())
    }

    fn get(&self, session_id: &str) -> Option<Vec<u8>> {
        self.payloads.get(session_id).cloned()
    }

    fn remove(&mut self, session_id: &str) {
        self.payloads.remove(session_id);
    }

    fn len(&self) -> usize {
        self.payloads.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_payloads() {
        let mut payloads = MemoryPayloads::new();
        payloads.put("s1", vec![1, 2, 3]).unwrap();
        payloads.put("s2", vec![4]).unwrap();

        assert_eq!(payloads.get("s1"), Some(vec![1, 2, 3]));
        assert_eq!(payloads.total_bytes(), 4);

        payloads.remove("s1");
        assert_eq!(payloads.get("s1"), None);
        assert_eq!(payloads.len(), 1);
    }

    #[test]
    fn test_no_payloads_refuses_writes() {
        let mut payloads = NoPayloads;
        assert!(matches!(payloads.put("s1", vec![1]), Err(Error::Payload(_))));
        assert!(payloads.get("s1").is_none());
        assert!(payloads.is_empty());
    }
}

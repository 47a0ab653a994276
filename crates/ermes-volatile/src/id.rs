//! Session id generation.

use uuid::Uuid;

/// Source of opaque session ids.
///
/// The store retries a bounded number of times when an id is already in
/// use, so implementations only need to make collisions unlikely.
pub trait SessionIdSource: Send + Sync {
    fn next_id(&self) -> String;
}

/// Random UUID v4 ids.
#[derive(Debug, Clone, Copy, Default)]
pub struct UuidSource;

impl SessionIdSource for UuidSource {
    fn next_id(&self) -> String {
        Uuid::new_v4().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uuid_ids_are_parseable() {
        let id = UuidSource.next_id();
        assert!(Uuid::parse_str(&id).is_ok());
        assert_ne!(id, UuidSource.next_id());
    }
}

//! Default affinity store on the coordination database.

use std::sync::Arc;

use async_trait::async_trait;
use rusqlite::{OptionalExtension, params};

use crate::collaborators::AffinityStore;
use crate::error::Result;
use crate::id::now_ms;
use crate::store::CoordinationStore;

#[derive(Debug, Clone)]
pub struct StoreAffinity {
    store: Arc<CoordinationStore>,
}

impl StoreAffinity {
    pub fn new(store: Arc<CoordinationStore>) -> Self {
        Self { store }
    }

    pub fn get_at(&self, channel_id: &str, user_id: &str, now: i64) -> Result<Option<String>> {
        self.store.with_conn(|c| {
            c.query_row(
                "SELECT avatar_id FROM affinities WHERE channel_id = ?1 AND user_id = ?2 AND expires_at > ?3",
                params![channel_id, user_id, now],
                |row| row.get(0),
            )
            .optional()
        })
    }

    pub fn set_at(&self, channel_id: &str, user_id: &str, avatar_id: &str, ttl_ms: i64, now: i64) -> Result<()> {
        self.store.with_conn(|c| {
            c.execute(
                r#"
                INSERT INTO affinities (channel_id, user_id, avatar_id, expires_at) VALUES (?1, ?2, ?3, ?4)
                ON CONFLICT(channel_id, user_id) DO UPDATE SET
                    avatar_id = excluded.avatar_id,
                    expires_at = excluded.expires_at
                "#,
                params![channel_id, user_id, avatar_id, now + ttl_ms],
            )
        })?;
        Ok(())
    }

    pub fn purge_expired(&self, now: i64) -> Result<usize> {
        let removed = self
            .store
            .with_conn(|c| c.execute("DELETE FROM affinities WHERE expires_at <= ?1", [now]))?;
        Ok(removed)
    }
}

#[async_trait]
impl AffinityStore for StoreAffinity {
    async fn get(&self, channel_id: &str, user_id: &str) -> Result<Option<String>> {
        self.get_at(channel_id, user_id, now_ms())
    }

    async fn set(&self, channel_id: &str, user_id: &str, avatar_id: &str, ttl_ms: i64) -> Result<()> {
        self.set_at(channel_id, user_id, avatar_id, ttl_ms, now_ms())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn affinity() -> StoreAffinity {
        StoreAffinity::new(Arc::new(CoordinationStore::open_in_memory().unwrap()))
    }

    #[test]
    fn test_set_get_expiry() {
        let aff = affinity();
        aff.set_at("c1", "u1", "ada", 1_000, 100).unwrap();
        assert_eq!(aff.get_at("c1", "u1", 500).unwrap().as_deref(), Some("ada"));
        assert!(aff.get_at("c1", "u1", 1_100).unwrap().is_none());
    }

    #[test]
    fn test_set_replaces_and_refreshes() {
        let aff = affinity();
        aff.set_at("c1", "u1", "ada", 1_000, 100).unwrap();
        aff.set_at("c1", "u1", "bob", 1_000, 900).unwrap();
        assert_eq!(aff.get_at("c1", "u1", 1_500).unwrap().as_deref(), Some("bob"));
    }

    #[test]
    fn test_purge_expired() {
        let aff = affinity();
        aff.set_at("c1", "u1", "ada", 100, 0).unwrap();
        aff.set_at("c1", "u2", "ada", 10_000, 0).unwrap();
        assert_eq!(aff.purge_expired(500).unwrap(), 1);
    }

    #[tokio::test]
    async fn test_trait_uses_wall_clock() {
        let aff = affinity();
        AffinityStore::set(&aff, "c1", "u1", "ada", 60_000).await.unwrap();
        assert_eq!(AffinityStore::get(&aff, "c1", "u1").await.unwrap().as_deref(), Some("ada"));
    }
}

//! Engine registration records and the lookup boundary.
//!
//! Engines are created, rotated and deleted by the surrounding
//! application; the control plane only ever looks a record up by its
//! registration token and stamps its last-connected time. Both go
//! through [`EngineRegistry`] so the server can run against a database,
//! the config file ([`StaticRegistry`]) or a test double.

use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::Rng;
use thiserror::Error;

use crate::types::EngineId;

/// Persisted engine registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineRecord {
    pub id: EngineId,
    pub name: String,

    /// Secret presented in `EngineHello`. Unique across engines.
    pub registration_token: String,

    pub last_connected_at: Option<DateTime<Utc>>,
}

impl EngineRecord {
    pub fn new(id: EngineId, name: impl Into<String>, token: impl Into<String>) -> Self {
        EngineRecord {
            id,
            name: name.into(),
            registration_token: token.into(),
            last_connected_at: None,
        }
    }
}

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("engine {0} not found")]
    NotFound(EngineId),

    #[error("registry backend error: {0}")]
    Backend(String),
}

/// Registration-token lookup used during the engine handshake.
#[async_trait]
pub trait EngineRegistry: Send + Sync + 'static {
    /// Find the engine owning `token`, if any.
    async fn find_by_token(&self, token: &str) -> Result<Option<EngineRecord>, RegistryError>;

    /// Record that `id` just completed a handshake.
    async fn update_last_connected(&self, id: EngineId) -> Result<(), RegistryError>;
}

/// Generate a fresh registration token (32 random bytes, hex encoded).
pub fn generate_token() -> String {
    let mut raw = [0u8; 32];
    rand::rng().fill(&mut raw);
    hex::encode(raw)
}

/// In-memory registry, typically loaded from the config file.
#[derive(Debug, Default)]
pub struct StaticRegistry {
    engines: RwLock<Vec<EngineRecord>>,
}

impl StaticRegistry {
    pub fn new(records: Vec<EngineRecord>) -> Self {
        StaticRegistry {
            engines: RwLock::new(records),
        }
    }

    pub fn get(&self, id: EngineId) -> Option<EngineRecord> {
        self.read().iter().find(|r| r.id == id).cloned()
    }

    /// Replace an engine's token; the old one stops working immediately.
    pub fn rotate_token(&self, id: EngineId) -> Result<String, RegistryError> {
        let mut guard = self.write();
        let record = guard
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or(RegistryError::NotFound(id))?;
        record.registration_token = generate_token();
        Ok(record.registration_token.clone())
    }

    /// Delete a record. Callers should also disconnect the live engine.
    pub fn remove(&self, id: EngineId) -> Option<EngineRecord> {
        let mut guard = self.write();
        let idx = guard.iter().position(|r| r.id == id)?;
        Some(guard.remove(idx))
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Vec<EngineRecord>> {
        self.engines.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Vec<EngineRecord>> {
        self.engines.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl EngineRegistry for StaticRegistry {
    async fn find_by_token(&self, token: &str) -> Result<Option<EngineRecord>, RegistryError> {
        if token.is_empty() {
            return Ok(None);
        }
        Ok(self
            .read()
            .iter()
            .find(|r| r.registration_token == token)
            .cloned())
    }

    async fn update_last_connected(&self, id: EngineId) -> Result<(), RegistryError> {
        let mut guard = self.write();
        let record = guard
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or(RegistryError::NotFound(id))?;
        record.last_connected_at = Some(Utc::now());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn rotated_token_invalidates_the_old_one() {
        let registry = StaticRegistry::new(vec![EngineRecord::new(EngineId(1), "alpha", "old")]);

        let fresh = registry.rotate_token(EngineId(1)).expect("rotate");
        assert_eq!(fresh.len(), 64);
        assert!(registry.find_by_token("old").await.unwrap().is_none());
        assert_eq!(
            registry.find_by_token(&fresh).await.unwrap().map(|r| r.id),
            Some(EngineId(1))
        );
    }

    #[tokio::test]
    async fn empty_token_never_matches() {
        let registry = StaticRegistry::new(vec![EngineRecord::new(EngineId(1), "alpha", "")]);
        assert!(registry.find_by_token("").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn removed_engine_can_no_longer_register() {
        let registry = StaticRegistry::new(vec![
            EngineRecord::new(EngineId(4), "a", "t4"),
            EngineRecord::new(EngineId(5), "b", "t5"),
        ]);
        assert!(registry.remove(EngineId(4)).is_some());
        assert!(registry.remove(EngineId(4)).is_none());
        assert!(registry.find_by_token("t4").await.unwrap().is_none());
        assert!(registry.get(EngineId(5)).is_some());
    }
}

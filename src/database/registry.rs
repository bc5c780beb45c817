use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use tracing::info;

use super::connection::TenantDatabase;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Alias already registered: {0}")]
    AlreadyRegistered(String),
}

/// Process-wide map of tenant alias to registered database.
///
/// Registration is insert-only: replacing an entry requires an explicit
/// `evict` first. Mutation sequences spanning several calls (check, probe,
/// register; or evict, re-register) are serialized per alias with `lock`.
#[derive(Default)]
pub struct AliasRegistry {
    entries: RwLock<HashMap<String, Arc<TenantDatabase>>>,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl AliasRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn has(&self, alias: &str) -> bool {
        self.entries.read().await.contains_key(alias)
    }

    pub async fn get(&self, alias: &str) -> Option<Arc<TenantDatabase>> {
        self.entries.read().await.get(alias).cloned()
    }

    pub async fn register(&self, database: TenantDatabase) -> Result<Arc<TenantDatabase>, RegistryError> {
        let alias = database.alias().to_string();
        let mut entries = self.entries.write().await;
        if entries.contains_key(&alias) {
            return Err(RegistryError::AlreadyRegistered(alias));
        }

        let description = database.connection.describe();
        let database = Arc::new(database);
        entries.insert(alias.clone(), database.clone());

        info!("Registered DB alias '{}' -> {}", alias, description);
        Ok(database)
    }

    /// Removes the alias if present. Closing the returned pool is up to the caller.
    pub async fn evict(&self, alias: &str) -> Option<Arc<TenantDatabase>> {
        let removed = self.entries.write().await.remove(alias);
        if removed.is_some() {
            info!("Evicted DB alias '{}'", alias);
        }

        // Only the map holds an idle lock; a held guard keeps its entry
        let mut locks = self.locks.lock().await;
        if locks.get(alias).is_some_and(|lock| Arc::strong_count(lock) == 1) {
            locks.remove(alias);
        }
        removed
    }

    /// Acquire the mutation lock for one alias
    pub async fn lock(&self, alias: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().await;
            locks
                .entry(alias.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }

    pub async fn aliases(&self) -> Vec<String> {
        let mut aliases: Vec<String> = self.entries.read().await.keys().cloned().collect();
        aliases.sort();
        aliases
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// Close and remove all pools (e.g., on shutdown)
    pub async fn close_all(&self) {
        let drained: Vec<(String, Arc<TenantDatabase>)> = self.entries.write().await.drain().collect();
        for (alias, database) in drained {
            database.pool.close().await;
            info!("Closed database pool: {}", alias);
        }
        self.locks.lock().await.retain(|_, lock| Arc::strong_count(lock) > 1);
    }

    #[cfg(test)]
    async fn lock_count(&self) -> usize {
        self.locks.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::database::connection::TenantConnection;
    use std::time::Duration;

    fn database(alias: &str, host: &str) -> TenantDatabase {
        let conn = TenantConnection::new(alias, "assets", "asset_user", host, 5432, "pw");
        TenantDatabase::open(conn, &AppConfig::development().database)
    }

    #[tokio::test]
    async fn register_is_insert_only() {
        let registry = AliasRegistry::new();
        registry.register(database("client_1", "first")).await.unwrap();

        let err = registry.register(database("client_1", "second")).await.unwrap_err();
        assert_eq!(err, RegistryError::AlreadyRegistered("client_1".to_string()));

        let kept = registry.get("client_1").await.unwrap();
        assert_eq!(kept.connection.host, "first");
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn evict_is_idempotent() {
        let registry = AliasRegistry::new();
        registry.register(database("client_2", "h")).await.unwrap();

        assert!(registry.evict("client_2").await.is_some());
        assert!(registry.evict("client_2").await.is_none());
        assert!(!registry.has("client_2").await);

        registry.register(database("client_2", "h2")).await.unwrap();
        assert!(registry.has("client_2").await);
    }

    #[tokio::test]
    async fn concurrent_registration_keeps_one_entry() {
        let registry = Arc::new(AliasRegistry::new());
        let mut handles = Vec::new();
        for i in 0..8 {
            let registry = registry.clone();
            handles.push(tokio::spawn(async move {
                registry.register(database("client_77", &format!("host{}", i))).await.is_ok()
            }));
        }

        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
        assert_eq!(registry.aliases().await, vec!["client_77".to_string()]);
    }

    #[tokio::test]
    async fn lock_serializes_per_alias_only() {
        let registry = Arc::new(AliasRegistry::new());
        let guard = registry.lock("client_a").await;

        // A different alias is not blocked
        tokio::time::timeout(Duration::from_millis(200), registry.lock("client_b"))
            .await
            .expect("independent alias should lock immediately");

        let blocked = tokio::time::timeout(Duration::from_millis(50), registry.lock("client_a")).await;
        assert!(blocked.is_err());

        drop(guard);
        tokio::time::timeout(Duration::from_millis(200), registry.lock("client_a"))
            .await
            .expect("lock should be free after release");
    }

    #[tokio::test]
    async fn close_all_drains_registry() {
        let registry = AliasRegistry::new();
        registry.register(database("client_3", "h")).await.unwrap();
        registry.register(database("client_4", "h")).await.unwrap();

        registry.close_all().await;
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn idle_locks_are_pruned() {
        let registry = AliasRegistry::new();
        registry.register(database("client_5", "h")).await.unwrap();
        drop(registry.lock("client_5").await);
        drop(registry.lock("client_6").await);
        assert_eq!(registry.lock_count().await, 2);

        registry.evict("client_5").await;
        assert_eq!(registry.lock_count().await, 1);

        // A held guard survives eviction
        let guard = registry.lock("client_7").await;
        registry.evict("client_7").await;
        assert_eq!(registry.lock_count().await, 2);

        registry.close_all().await;
        assert_eq!(registry.lock_count().await, 1);
        drop(guard);
        registry.close_all().await;
        assert_eq!(registry.lock_count().await, 0);
    }
}

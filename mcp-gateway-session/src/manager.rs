//! Identity-keyed LRU+TTL session pool (C6, spec §4.6).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use lru::LruCache;
use parking_lot::Mutex;
use tokio::sync::Mutex as AsyncMutex;

use mcp_gateway_core::{GatewayResult, Session};

use crate::identity::{derive_identity, AuthMode};

/// Builds a fresh `Session` the first time a given identity is seen, or
/// after its previous session expired (spec §4.6 "factory").
#[async_trait]
pub trait SessionFactory: Send + Sync {
    async fn create(&self, identity: &str) -> GatewayResult<Session>;
}

/// `{max, ttl, auth.mode}` (spec §4.6, §6 `session` options).
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    pub max: usize,
    pub ttl: Duration,
    pub auth_mode: AuthMode,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self { max: 100, ttl: Duration::from_secs(600), auth_mode: AuthMode::Anonymous }
    }
}

/// Pool counters surfaced by `stats()` (spec §4.6).
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct ManagerStats {
    pub active: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub expirations: u64,
    pub keys: Vec<String>,
}

struct PoolEntry {
    session: Session,
    last_used: Instant,
}

struct Pool {
    cache: LruCache<String, PoolEntry>,
    stats: ManagerStats,
}

/// A request carrying whatever's needed to derive an identity (spec §4.6
/// "get(request)"). Only the authorization header matters today; kept as a
/// struct so future identity sources (mTLS cert, API key header) slot in
/// without changing call sites.
#[derive(Debug, Clone, Default)]
pub struct SessionRequest {
    pub authorization: Option<String>,
}

/// Pools `Session`s by derived identity, evicting least-recently-used
/// entries past `max` and idle entries past `ttl`. Concurrent `get()` calls
/// for the *same* identity serialize on the factory so it runs at most once
/// per cold identity (spec §4.6 "per-key factory serialization"); different
/// identities proceed fully in parallel.
pub struct SessionManager {
    config: ManagerConfig,
    factory: Arc<dyn SessionFactory>,
    pool: Mutex<Pool>,
    creation_locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl SessionManager {
    pub fn new(config: ManagerConfig, factory: Arc<dyn SessionFactory>) -> Self {
        let capacity = std::num::NonZeroUsize::new(config.max.max(1)).expect("max coerced to >= 1");
        Self {
            config,
            factory,
            pool: Mutex::new(Pool { cache: LruCache::new(capacity), stats: ManagerStats::default() }),
            creation_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Resolve `request` to a live session, creating or recreating one as
    /// needed (spec §4.6).
    pub async fn get(&self, request: &SessionRequest) -> GatewayResult<Arc<Session>> {
        let identity = derive_identity(self.config.auth_mode, request.authorization.as_deref())?;

        if let Some(session) = self.try_reuse(&identity) {
            return Ok(session);
        }

        let lock = self.creation_lock_for(&identity);
        let _guard = lock.lock().await;

        // Another caller may have created it while we waited for the lock.
        if let Some(session) = self.try_reuse(&identity) {
            return Ok(session);
        }

        let session = self.factory.create(&identity).await?;
        self.insert(identity, session.clone())
    }

    fn try_reuse(&self, identity: &str) -> Option<Arc<Session>> {
        let mut pool = self.pool.lock();
        let now = Instant::now();
        let expired = match pool.cache.peek(identity) {
            Some(entry) => now.duration_since(entry.last_used) >= self.config.ttl || entry.session.is_closed(),
            None => false,
        };

        if expired {
            pool.cache.pop(identity);
            pool.stats.expirations += 1;
            pool.stats.active = pool.cache.len();
            return None;
        }

        match pool.cache.get_mut(identity) {
            Some(entry) => {
                entry.last_used = now;
                pool.stats.hits += 1;
                Some(Arc::new(entry.session.clone()))
            }
            None => {
                pool.stats.misses += 1;
                None
            }
        }
    }

    fn insert(&self, identity: String, session: Session) -> GatewayResult<Arc<Session>> {
        let mut pool = self.pool.lock();
        let returned = Arc::new(session.clone());
        if let Some((_, evicted)) = pool.cache.push(identity, PoolEntry { session, last_used: Instant::now() }) {
            pool.stats.evictions += 1;
            drop(pool);
            tokio::spawn(async move {
                let _ = evicted.session.close().await;
            });
            pool = self.pool.lock();
        }
        pool.stats.active = pool.cache.len();
        Ok(returned)
    }

    fn creation_lock_for(&self, identity: &str) -> Arc<AsyncMutex<()>> {
        self.creation_locks.lock().entry(identity.to_string()).or_insert_with(|| Arc::new(AsyncMutex::new(()))).clone()
    }

    pub fn stats(&self) -> ManagerStats {
        let pool = self.pool.lock();
        let mut stats = pool.stats.clone();
        stats.keys = pool.cache.iter().map(|(k, _)| k.clone()).collect();
        stats
    }

    /// Close every pooled session (spec §4.6 "close()").
    pub async fn close(&self) {
        let sessions: Vec<Session> = {
            let mut pool = self.pool.lock();
            let drained: Vec<Session> = pool.cache.iter().map(|(_, e)| e.session.clone()).collect();
            pool.cache.clear();
            pool.stats.active = 0;
            drained
        };
        for session in sessions {
            let _ = session.close().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mcp_gateway_core::session::test_support::{in_memory_session, InMemoryClient};
    use mcp_gateway_core::ServerInfo;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingFactory {
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl SessionFactory for CountingFactory {
        async fn create(&self, identity: &str) -> GatewayResult<Session> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let client = Arc::new(InMemoryClient::new(ServerInfo { name: identity.to_string(), version: "0.0.0".into(), instructions: None }));
            Ok(in_memory_session(identity, client))
        }
    }

    #[tokio::test]
    async fn same_identity_reuses_session() {
        let calls = Arc::new(AtomicUsize::new(0));
        let manager = SessionManager::new(ManagerConfig::default(), Arc::new(CountingFactory { calls: calls.clone() }));

        let req = SessionRequest { authorization: None };
        manager.get(&req).await.unwrap();
        manager.get(&req).await.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(manager.stats().hits, 1);
    }

    #[tokio::test]
    async fn different_identities_get_distinct_sessions() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut cfg = ManagerConfig::default();
        cfg.auth_mode = AuthMode::Bearer;
        let manager = SessionManager::new(cfg, Arc::new(CountingFactory { calls: calls.clone() }));

        manager.get(&SessionRequest { authorization: Some("Bearer a".into()) }).await.unwrap();
        manager.get(&SessionRequest { authorization: Some("Bearer b".into()) }).await.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        let stats = manager.stats();
        assert_eq!(stats.active, 2);
        assert_eq!(stats.keys.len(), 2);
    }

    #[tokio::test]
    async fn lru_eviction_past_max() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut cfg = ManagerConfig::default();
        cfg.max = 1;
        cfg.auth_mode = AuthMode::Bearer;
        let manager = SessionManager::new(cfg, Arc::new(CountingFactory { calls }));

        manager.get(&SessionRequest { authorization: Some("Bearer a".into()) }).await.unwrap();
        manager.get(&SessionRequest { authorization: Some("Bearer b".into()) }).await.unwrap();

        assert_eq!(manager.stats().active, 1);
        assert_eq!(manager.stats().evictions, 1);
    }

    #[tokio::test]
    async fn concurrent_get_for_same_identity_creates_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let manager = Arc::new(SessionManager::new(ManagerConfig::default(), Arc::new(CountingFactory { calls: calls.clone() })));

        let req = SessionRequest { authorization: None };
        let (a, b) = tokio::join!(manager.get(&req), manager.get(&req));
        a.unwrap();
        b.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn expired_identity_is_recreated() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut cfg = ManagerConfig::default();
        cfg.ttl = Duration::from_millis(10);
        let manager = SessionManager::new(cfg, Arc::new(CountingFactory { calls: calls.clone() }));

        let req = SessionRequest { authorization: None };
        manager.get(&req).await.unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        manager.get(&req).await.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(manager.stats().expirations, 1);
    }

    #[tokio::test]
    async fn close_closes_every_pooled_session() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut cfg = ManagerConfig::default();
        cfg.auth_mode = AuthMode::Bearer;
        let manager = SessionManager::new(cfg, Arc::new(CountingFactory { calls }));

        let session_a = manager.get(&SessionRequest { authorization: Some("Bearer a".into()) }).await.unwrap();
        manager.close().await;

        assert!(session_a.is_closed());
        assert_eq!(manager.stats().active, 0);
    }
}

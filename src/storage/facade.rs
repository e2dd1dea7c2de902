//! Store Facade - backend selection and transparent fallback
//!
//! Information Hiding:
//! - Which backend is active is invisible to callers; every operation has
//!   the same signature and contract on either backend
//! - Demotion state is a per-instance field, never process-global, so
//!   facades under test stay independent
//!
//! Selection happens once at construction. Mid-session, an unavailable
//! primary gets exactly one reconnection attempt; if that fails (or the
//! retried operation fails again) the facade demotes to the file fallback
//! for the remainder of the process lifetime. There is no automatic
//! promotion back - flapping between backends would hand callers
//! inconsistent search and ordering guarantees.

use std::future::Future;
use std::sync::Arc;

use chrono::Duration;
use tokio::sync::RwLock;
use tracing::{info, warn};

use super::{CleanupReport, ConversationStore, FileStore, RedisStore, Result, SearchHit};
use crate::config::StorageConfig;
use crate::core::models::{Conversation, ConversationSummary, StorageStats};

struct BackendSlot {
    store: Arc<dyn ConversationStore>,
    primary: bool,
}

pub struct StoreFacade {
    backend: RwLock<BackendSlot>,
    config: StorageConfig,
}

impl StoreFacade {
    /// Select a backend and commit to it. A primary that fails its health
    /// check at construction is a logged, non-fatal degradation; the facade
    /// starts on the fallback instead.
    pub async fn initialize(config: &StorageConfig) -> Result<Self> {
        let slot = if config.use_primary {
            match RedisStore::connect(&config.primary).await {
                Ok(store) => {
                    info!("[StoreFacade] Using primary (redis) conversation storage");
                    BackendSlot {
                        store: Arc::new(store),
                        primary: true,
                    }
                }
                Err(e) => {
                    warn!(
                        "[StoreFacade] Primary backend unavailable, using fallback storage: {}",
                        e
                    );
                    BackendSlot {
                        store: Arc::new(FileStore::open(&config.fallback).await?),
                        primary: false,
                    }
                }
            }
        } else {
            info!("[StoreFacade] Using fallback (file) conversation storage");
            BackendSlot {
                store: Arc::new(FileStore::open(&config.fallback).await?),
                primary: false,
            }
        };

        Ok(Self {
            backend: RwLock::new(slot),
            config: config.clone(),
        })
    }

    /// Name of the backend currently serving operations
    pub async fn active_backend(&self) -> &'static str {
        self.backend.read().await.store.backend_name()
    }

    async fn snapshot(&self) -> (Arc<dyn ConversationStore>, bool) {
        let guard = self.backend.read().await;
        (guard.store.clone(), guard.primary)
    }

    /// Delegate to the active backend; on an unavailable primary, run the
    /// reconnect-or-demote recovery path
    async fn run<T, F, Fut>(&self, op: F) -> Result<T>
    where
        F: Fn(Arc<dyn ConversationStore>) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let (store, primary) = self.snapshot().await;
        match op(store).await {
            Err(e) if primary && e.is_unavailable() => {
                warn!("[StoreFacade] Primary backend failed mid-session: {}", e);
                self.recover(op).await
            }
            outcome => outcome,
        }
    }

    /// One reconnection attempt, then permanent demotion. Holds the write
    /// lock so concurrent callers observe a single consistent switch.
    async fn recover<T, F, Fut>(&self, op: F) -> Result<T>
    where
        F: Fn(Arc<dyn ConversationStore>) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut guard = self.backend.write().await;

        // Another caller may have finished recovery while we waited
        if guard.primary {
            match RedisStore::connect(&self.config.primary).await {
                Ok(store) => {
                    info!("[StoreFacade] Reconnected to primary backend");
                    *guard = BackendSlot {
                        store: Arc::new(store),
                        primary: true,
                    };
                }
                Err(e) => {
                    warn!(
                        "[StoreFacade] Reconnection failed, demoting to fallback storage for the rest of this session: {}",
                        e
                    );
                    *guard = BackendSlot {
                        store: Arc::new(FileStore::open(&self.config.fallback).await?),
                        primary: false,
                    };
                }
            }
        }

        match op(guard.store.clone()).await {
            Err(e) if guard.primary && e.is_unavailable() => {
                warn!(
                    "[StoreFacade] Primary unavailable again after reconnect, demoting to fallback storage for the rest of this session: {}",
                    e
                );
                *guard = BackendSlot {
                    store: Arc::new(FileStore::open(&self.config.fallback).await?),
                    primary: false,
                };
                op(guard.store.clone()).await
            }
            outcome => outcome,
        }
    }

    pub async fn save(&self, conversation: &Conversation) -> Result<()> {
        self.run(|store| async move { store.save(conversation).await })
            .await
    }

    pub async fn load(&self, id: &str) -> Result<Conversation> {
        self.run(|store| async move { store.load(id).await }).await
    }

    pub async fn list(&self) -> Result<Vec<ConversationSummary>> {
        self.run(|store| async move { store.list().await }).await
    }

    pub async fn search(&self, query: &str) -> Result<Vec<SearchHit>> {
        self.run(|store| async move { store.search(query).await })
            .await
    }

    pub async fn delete(&self, id: &str) -> Result<()> {
        self.run(|store| async move { store.delete(id).await }).await
    }

    pub async fn cleanup(&self, older_than: Duration) -> Result<CleanupReport> {
        self.run(move |store| async move { store.cleanup(older_than).await })
            .await
    }

    pub async fn stats(&self) -> Result<StorageStats> {
        self.run(|store| async move { store.stats().await }).await
    }
}

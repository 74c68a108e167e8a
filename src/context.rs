/// Application context and dependency injection
use crate::{
    auth::{AuthProvider, HttpAuthProvider, SessionCache},
    config::ServerConfig,
    db,
    entitlement::{EntitlementCache, EntitlementStore},
    error::AppResult,
    import::{CommandImporter, PlaylistImporter},
    jobs::{JobRegistry, JobRunner},
    library::{DiskLibraryStore, LibraryCache, LibraryStore},
    rate_limit::FixedWindowLimiter,
};
use chrono::Duration;
use sqlx::SqlitePool;
use std::sync::Arc;

/// Application context holding all shared services
#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<ServerConfig>,
    pub entitlement_db: SqlitePool,
    pub entitlement_store: EntitlementStore,
    pub entitlement_cache: Arc<EntitlementCache>,
    pub session_cache: Arc<SessionCache>,
    pub auth_provider: Arc<dyn AuthProvider>,
    pub rate_limiter: Arc<FixedWindowLimiter>,
    pub library_store: Arc<dyn LibraryStore>,
    pub library_cache: Arc<LibraryCache>,
    pub job_registry: Arc<JobRegistry>,
    pub job_runner: Arc<JobRunner>,
}

impl AppContext {
    /// Create a new application context from configuration
    pub async fn new(config: ServerConfig) -> AppResult<Self> {
        config.validate()?;

        Self::ensure_directories(&config).await?;

        let entitlement_db =
            db::create_pool(&config.storage.entitlement_db, db::DatabaseOptions::default())
                .await?;
        db::run_migrations(&entitlement_db).await?;
        db::test_connection(&entitlement_db).await?;

        let entitlement_store = EntitlementStore::new(entitlement_db.clone());
        let entitlement_cache = Arc::new(EntitlementCache::new(Duration::seconds(
            config.entitlement.cache_ttl_secs as i64,
        )));

        let session_cache = Arc::new(SessionCache::new(
            Duration::seconds(config.auth.session_ttl_secs as i64),
            Duration::seconds(config.auth.refresh_threshold_secs as i64),
        ));
        let auth_provider: Arc<dyn AuthProvider> = Arc::new(HttpAuthProvider::new(
            config.auth.provider_url.clone(),
            config.auth.provider_api_key.clone(),
            config.auth.verify_attempts,
        ));

        let rate_limiter = Arc::new(FixedWindowLimiter::new(config.rate_limit.clone()));

        let library_store: Arc<dyn LibraryStore> = Arc::new(DiskLibraryStore::new(
            config.storage.library_directory.clone(),
        ));
        let library_cache = Arc::new(LibraryCache::new(
            config.storage.library_cache_directory.clone(),
        ));

        let importer: Arc<dyn PlaylistImporter> =
            Arc::new(CommandImporter::new(config.import.command.clone()));
        let job_registry = Arc::new(JobRegistry::new());
        let job_runner = Arc::new(JobRunner::new(
            importer,
            library_store.clone(),
            library_cache.clone(),
            job_registry.clone(),
            config.storage.shared_crate_directory.clone(),
            config.storage.user_crate_directory.clone(),
        ));

        Ok(Self {
            config: Arc::new(config),
            entitlement_db,
            entitlement_store,
            entitlement_cache,
            session_cache,
            auth_provider,
            rate_limiter,
            library_store,
            library_cache,
            job_registry,
            job_runner,
        })
    }

    async fn ensure_directories(config: &ServerConfig) -> AppResult<()> {
        for dir in [
            &config.storage.data_directory,
            &config.storage.library_directory,
            &config.storage.library_cache_directory,
            &config.storage.shared_crate_directory,
            &config.storage.user_crate_directory,
        ] {
            tokio::fs::create_dir_all(dir).await?;
        }
        Ok(())
    }
}

/// Configuration management for the CratePilot backend
use crate::error::{AppError, AppResult};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;

/// Main server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub service: ServiceConfig,
    pub storage: StorageConfig,
    pub auth: AuthConfig,
    pub entitlement: EntitlementConfig,
    pub rate_limit: RateLimitConfig,
    pub import: ImportConfig,
    pub logging: LoggingConfig,
}

/// Service-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub hostname: String,
    pub port: u16,
    pub version: String,
    /// Maximum accepted library database upload, in bytes
    pub upload_limit: usize,
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub data_directory: PathBuf,
    /// Entitlement store database
    pub entitlement_db: PathBuf,
    /// Uploaded library databases, keyed by identity + filename
    pub library_directory: PathBuf,
    /// Local working copies of library databases used by imports
    pub library_cache_directory: PathBuf,
    /// Shared directory the external importer writes crate files into
    pub shared_crate_directory: PathBuf,
    /// Per-identity claimed crate files, served by /download-crate
    pub user_crate_directory: PathBuf,
}

/// External auth provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Base URL of the external auth provider
    pub provider_url: String,
    /// API key sent with every provider request
    pub provider_api_key: String,
    /// Bounded verification retry attempts against the provider
    pub verify_attempts: u32,
    /// Session cache TTL in seconds
    pub session_ttl_secs: u64,
    /// Refresh tokens whose expiry is within this many seconds of now
    pub refresh_threshold_secs: u64,
}

/// Entitlement and quota configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntitlementConfig {
    /// Trial window length, in days, granted on first contact
    pub trial_days: i64,
    /// Daily export limit for free-tier accounts
    pub free_daily_exports: u32,
    /// Entitlement cache TTL in seconds
    pub cache_ttl_secs: u64,
}

/// Rate limiting configuration (fixed windows)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    pub enabled: bool,
    /// Window length in seconds, shared by both windows
    pub window_secs: u64,
    /// Requests admitted per window across all callers
    pub global_limit: u32,
    /// Requests admitted per window per caller key
    pub per_caller_limit: u32,
}

/// External importer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportConfig {
    /// Command invoked to run the external playlist importer
    pub command: String,
    /// Default matching threshold when the request omits one
    pub default_threshold: u8,
    /// Free-tier playlist track ceiling enforced by the importer
    pub free_track_ceiling: u32,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
}

impl ServerConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> AppResult<Self> {
        dotenv::dotenv().ok();

        let hostname = env::var("CRATEPILOT_HOSTNAME").unwrap_or_else(|_| "localhost".to_string());
        let port = env::var("CRATEPILOT_PORT")
            .unwrap_or_else(|_| "8080".to_string())
            .parse()
            .map_err(|_| AppError::Validation("Invalid port number".to_string()))?;
        let version = env::var("CRATEPILOT_VERSION").unwrap_or_else(|_| "0.1.0".to_string());
        let upload_limit = env::var("CRATEPILOT_UPLOAD_LIMIT")
            .unwrap_or_else(|_| "52428800".to_string())
            .parse()
            .unwrap_or(52428800);

        let data_directory: PathBuf = env::var("CRATEPILOT_DATA_DIRECTORY")
            .unwrap_or_else(|_| "./data".to_string())
            .into();
        let entitlement_db = env::var("CRATEPILOT_ENTITLEMENT_DB")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_directory.join("entitlements.sqlite"));
        let library_directory = env::var("CRATEPILOT_LIBRARY_DIRECTORY")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_directory.join("libraries"));
        let library_cache_directory = env::var("CRATEPILOT_LIBRARY_CACHE_DIRECTORY")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_directory.join("library-cache"));
        let shared_crate_directory = env::var("CRATEPILOT_SHARED_CRATE_DIRECTORY")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_directory.join("crates-staging"));
        let user_crate_directory = env::var("CRATEPILOT_USER_CRATE_DIRECTORY")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_directory.join("crates"));

        let provider_url = env::var("CRATEPILOT_AUTH_PROVIDER_URL")
            .map_err(|_| AppError::Validation("Auth provider URL required".to_string()))?;
        let provider_api_key = env::var("CRATEPILOT_AUTH_PROVIDER_API_KEY")
            .map_err(|_| AppError::Validation("Auth provider API key required".to_string()))?;
        let verify_attempts = env::var("CRATEPILOT_AUTH_VERIFY_ATTEMPTS")
            .unwrap_or_else(|_| "3".to_string())
            .parse()
            .unwrap_or(3);
        let session_ttl_secs = env::var("CRATEPILOT_SESSION_TTL_SECS")
            .unwrap_or_else(|_| "300".to_string())
            .parse()
            .unwrap_or(300);
        let refresh_threshold_secs = env::var("CRATEPILOT_REFRESH_THRESHOLD_SECS")
            .unwrap_or_else(|_| "600".to_string())
            .parse()
            .unwrap_or(600);

        let trial_days = env::var("CRATEPILOT_TRIAL_DAYS")
            .unwrap_or_else(|_| "7".to_string())
            .parse()
            .unwrap_or(7);
        let free_daily_exports = env::var("CRATEPILOT_FREE_DAILY_EXPORTS")
            .unwrap_or_else(|_| "1".to_string())
            .parse()
            .unwrap_or(1);
        let cache_ttl_secs = env::var("CRATEPILOT_ENTITLEMENT_CACHE_TTL_SECS")
            .unwrap_or_else(|_| "120".to_string())
            .parse()
            .unwrap_or(120);

        let rate_limit_enabled = env::var("CRATEPILOT_RATE_LIMITS_ENABLED")
            .unwrap_or_else(|_| "true".to_string())
            .parse()
            .unwrap_or(true);
        let window_secs = env::var("CRATEPILOT_RATE_LIMIT_WINDOW_SECS")
            .unwrap_or_else(|_| "60".to_string())
            .parse()
            .unwrap_or(60);
        let global_limit = env::var("CRATEPILOT_RATE_LIMIT_GLOBAL")
            .unwrap_or_else(|_| "3000".to_string())
            .parse()
            .unwrap_or(3000);
        let per_caller_limit = env::var("CRATEPILOT_RATE_LIMIT_PER_CALLER")
            .unwrap_or_else(|_| "60".to_string())
            .parse()
            .unwrap_or(60);

        let import_command = env::var("CRATEPILOT_IMPORT_COMMAND")
            .unwrap_or_else(|_| "crate-importer".to_string());
        let default_threshold = env::var("CRATEPILOT_IMPORT_DEFAULT_THRESHOLD")
            .unwrap_or_else(|_| "90".to_string())
            .parse()
            .unwrap_or(90);
        let free_track_ceiling = env::var("CRATEPILOT_IMPORT_FREE_TRACK_CEILING")
            .unwrap_or_else(|_| "100".to_string())
            .parse()
            .unwrap_or(100);

        let log_level = env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());

        Ok(ServerConfig {
            service: ServiceConfig {
                hostname,
                port,
                version,
                upload_limit,
            },
            storage: StorageConfig {
                data_directory,
                entitlement_db,
                library_directory,
                library_cache_directory,
                shared_crate_directory,
                user_crate_directory,
            },
            auth: AuthConfig {
                provider_url,
                provider_api_key,
                verify_attempts,
                session_ttl_secs,
                refresh_threshold_secs,
            },
            entitlement: EntitlementConfig {
                trial_days,
                free_daily_exports,
                cache_ttl_secs,
            },
            rate_limit: RateLimitConfig {
                enabled: rate_limit_enabled,
                window_secs,
                global_limit,
                per_caller_limit,
            },
            import: ImportConfig {
                command: import_command,
                default_threshold,
                free_track_ceiling,
            },
            logging: LoggingConfig { level: log_level },
        })
    }

    /// Validate configuration
    pub fn validate(&self) -> AppResult<()> {
        if self.service.hostname.is_empty() {
            return Err(AppError::Validation("Hostname cannot be empty".to_string()));
        }

        if self.auth.provider_url.is_empty() {
            return Err(AppError::Validation(
                "Auth provider URL cannot be empty".to_string(),
            ));
        }

        if self.entitlement.trial_days <= 0 {
            return Err(AppError::Validation(
                "Trial window must be at least one day".to_string(),
            ));
        }

        if self.rate_limit.window_secs == 0 {
            return Err(AppError::Validation(
                "Rate limit window must be non-zero".to_string(),
            ));
        }

        if self.import.default_threshold > 100 {
            return Err(AppError::Validation(
                "Matching threshold must be between 0 and 100".to_string(),
            ));
        }

        Ok(())
    }
}

/// Fixed configuration for unit tests across modules
#[cfg(test)]
pub(crate) fn test_config() -> ServerConfig {
    ServerConfig {
        service: ServiceConfig {
            hostname: "localhost".to_string(),
            port: 8080,
            version: "0.1.0".to_string(),
            upload_limit: 1024,
        },
        storage: StorageConfig {
            data_directory: "./data".into(),
            entitlement_db: "./data/entitlements.sqlite".into(),
            library_directory: "./data/libraries".into(),
            library_cache_directory: "./data/library-cache".into(),
            shared_crate_directory: "./data/crates-staging".into(),
            user_crate_directory: "./data/crates".into(),
        },
        auth: AuthConfig {
            provider_url: "https://auth.example.com".to_string(),
            provider_api_key: "key".to_string(),
            verify_attempts: 3,
            session_ttl_secs: 300,
            refresh_threshold_secs: 600,
        },
        entitlement: EntitlementConfig {
            trial_days: 7,
            free_daily_exports: 1,
            cache_ttl_secs: 120,
        },
        rate_limit: RateLimitConfig {
            enabled: true,
            window_secs: 60,
            global_limit: 3000,
            per_caller_limit: 60,
        },
        import: ImportConfig {
            command: "crate-importer".to_string(),
            default_threshold: 90,
            free_track_ceiling: 100,
        },
        logging: LoggingConfig {
            level: "info".to_string(),
        },
    }
}

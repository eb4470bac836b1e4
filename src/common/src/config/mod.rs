use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};

use once_cell::sync::OnceCell;

pub static CONFIG: OnceCell<Configuration> = OnceCell::new();

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub dsn: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            dsn: String::from("sqlite://.data/quill.db"),
        }
    }
}

impl DatabaseConfig {
    /// Create an in-memory database configuration
    pub fn in_memory() -> Self {
        Self {
            dsn: String::from("sqlite::memory:"),
        }
    }
}

/// Object storage holding entity-owned files (PDFs, seals, attachments, branding)
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StorageConfig {
    pub dsn: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            dsn: String::from("file:///.data/files"),
        }
    }
}

/// Object storage holding signing certificates
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CertificateStoreConfig {
    pub dsn: String,
}

impl Default for CertificateStoreConfig {
    fn default() -> Self {
        Self {
            dsn: String::from("file:///.data/certificates"),
        }
    }
}

/// Configuration for a queue implementation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Type of queue ("memory" or "nats")
    pub queue_type: String,
    /// Connection URL
    pub url: String,
    /// Stream name; published subjects are prefixed with it
    pub stream: String,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            queue_type: "memory".to_string(),
            url: "memory://local".to_string(),
            stream: "quill".to_string(),
        }
    }
}

/// Global retention intervals for document collections.
///
/// Companies may override either interval; unset global intervals mean
/// collections in that class are never reclaimed by age.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetentionConfig {
    /// Days after signing before a signed collection is reclaimed.
    ///
    /// Env: QUILL__RECLAIMER__RETENTION__SIGNED_DAYS
    #[serde(default)]
    pub signed_days: Option<u32>,

    /// Days after creation before an unsigned collection is reclaimed.
    ///
    /// Env: QUILL__RECLAIMER__RETENTION__UNSIGNED_DAYS
    #[serde(default)]
    pub unsigned_days: Option<u32>,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            signed_days: Some(365),
            unsigned_days: Some(90),
        }
    }
}

impl RetentionConfig {
    /// Validate that configured intervals are positive.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.signed_days == Some(0) {
            return Err(ConfigError::InvalidRetention {
                class: "signed",
                days: 0,
            });
        }
        if self.unsigned_days == Some(0) {
            return Err(ConfigError::InvalidRetention {
                class: "unsigned",
                days: 0,
            });
        }
        Ok(())
    }
}

/// Where audit snapshots of reclaimed document collections are forwarded.
#[derive(Clone, Debug, Serialize, Deserialize, Default)]
pub struct AuditConfig {
    /// Publish snapshots to the durable queue instead of the history service.
    ///
    /// Env: QUILL__RECLAIMER__AUDIT__USE_QUEUE
    #[serde(default)]
    pub use_queue: bool,

    /// Base URL of the history service, e.g. `https://history.internal/api`.
    ///
    /// Env: QUILL__RECLAIMER__AUDIT__HISTORY_BASE_URL
    #[serde(default)]
    pub history_base_url: Option<String>,

    /// Encrypted application key sent as the `AppKey` header.
    ///
    /// Env: QUILL__RECLAIMER__AUDIT__APP_KEY
    #[serde(default)]
    pub app_key: String,

    /// How `app_key` is stored.
    ///
    /// Env: QUILL__RECLAIMER__AUDIT__KEY_ENCRYPTION
    #[serde(default)]
    pub key_encryption: KeyEncryption,

    /// Base64-encoded 256-bit key decrypting `app_key` when it is AES-GCM sealed.
    ///
    /// Env: QUILL__RECLAIMER__AUDIT__KEY_SECRET
    #[serde(default, skip_serializing)]
    pub key_secret: Option<String>,
}

/// Storage format of the history service application key.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyEncryption {
    /// `base64(nonce || ciphertext)` sealed with AES-256-GCM under `key_secret`.
    #[default]
    AesGcm,
    /// The key is stored in clear. Only for local setups.
    Plaintext,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReclaimerConfig {
    /// Run the reclamation loop.
    ///
    /// Env: QUILL__RECLAIMER__ENABLED
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Interval between pipeline runs.
    ///
    /// Env: QUILL__RECLAIMER__TICK_INTERVAL
    #[serde(with = "humantime_serde")]
    pub tick_interval: Duration,

    /// Companies read per page during the retention scan.
    ///
    /// Env: QUILL__RECLAIMER__COMPANY_BATCH_SIZE
    #[serde(default = "default_company_batch_size")]
    pub company_batch_size: usize,

    #[serde(default)]
    pub retention: RetentionConfig,

    #[serde(default)]
    pub audit: AuditConfig,
}

fn default_enabled() -> bool {
    true
}

fn default_company_batch_size() -> usize {
    250
}

impl Default for ReclaimerConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            tick_interval: Duration::from_secs(3600),
            company_batch_size: default_company_batch_size(),
            retention: RetentionConfig::default(),
            audit: AuditConfig::default(),
        }
    }
}

impl ReclaimerConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.company_batch_size == 0 {
            return Err(ConfigError::InvalidBatchSize);
        }
        if self.tick_interval.is_zero() {
            return Err(ConfigError::InvalidTickInterval);
        }
        if !self.audit.use_queue {
            if self.audit.history_base_url.is_none() {
                return Err(ConfigError::MissingHistoryUrl);
            }
            if self.audit.key_encryption == KeyEncryption::AesGcm
                && self.audit.key_secret.is_none()
            {
                return Err(ConfigError::MissingKeySecret);
            }
        }
        self.retention.validate()
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, Default)]
pub struct Configuration {
    /// Relational store holding the business entities
    pub database: DatabaseConfig,
    /// Entity-owned file storage
    pub storage: StorageConfig,
    /// Signing certificate storage
    pub certificates: CertificateStoreConfig,
    /// Durable queue used for audit snapshots and notifications
    pub queue: QueueConfig,
    /// Reclamation pipeline settings
    pub reclaimer: ReclaimerConfig,
}

/// Errors raised while loading or validating configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] Box<figment::Error>),

    #[error("Invalid {class} retention interval: {days} days must be positive")]
    InvalidRetention { class: &'static str, days: u32 },

    #[error("Company batch size must be positive")]
    InvalidBatchSize,

    #[error("Tick interval must be positive")]
    InvalidTickInterval,

    #[error("HTTP audit channel selected but reclaimer.audit.history_base_url is not set")]
    MissingHistoryUrl,

    #[error("Encrypted application key configured but reclaimer.audit.key_secret is not set")]
    MissingKeySecret,
}

impl Configuration {
    fn figment() -> Figment {
        Figment::from(Serialized::defaults(Configuration::default()))
    }

    pub fn load() -> Result<Self, ConfigError> {
        let config: Configuration = Self::figment()
            .merge(Toml::file("quill.toml"))
            .merge(Env::prefixed("QUILL__").split("__"))
            .extract()
            .map_err(Box::new)?;

        Ok(config)
    }

    pub fn load_from_path(path: &Path) -> Result<Self, ConfigError> {
        let config: Configuration = Self::figment()
            .merge(Toml::file(path))
            .merge(Env::prefixed("QUILL__").split("__"))
            .extract()
            .map_err(Box::new)?;

        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.reclaimer.validate()
    }
}

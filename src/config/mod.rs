//! Configuration management for the ingestion gateway
//!
//! Values are layered: defaults, then the optional TOML file, then
//! environment variables. CLI flags are applied last by the binary.

pub mod file;

use std::path::{Path, PathBuf};
use std::time::Duration;

pub use file::IngestConfigFile;

/// Default HTTP port
pub const DEFAULT_PORT: u16 = 8787;

/// Default webhook mount path
pub const DEFAULT_WEBHOOK_PATH: &str = "/webhook";

/// Default source tag written on contacts created by this pipeline
pub const DEFAULT_SOURCE_TAG: &str = "whatsapp_webhook";

/// Default cap on webhook request bodies (32 MiB)
pub const DEFAULT_MAX_BODY_BYTES: usize = 32 * 1024 * 1024;

/// Default cap on downloaded media (16 MiB)
pub const DEFAULT_MAX_MEDIA_BYTES: usize = 16 * 1024 * 1024;

/// Gateway configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP server configuration
    pub server: ServerConfig,

    /// `SQLite` database file
    pub database_path: PathBuf,

    /// Media store configuration
    pub media: MediaConfig,

    /// Pipeline behaviour
    pub ingest: IngestSettings,
}

/// HTTP server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind: String,
    pub port: u16,
    /// Documented mount path of the webhook endpoint
    pub webhook_path: String,
    /// Largest accepted webhook body; larger ones are answered as unrecognized
    pub max_body_bytes: usize,
}

/// Media store configuration
#[derive(Debug, Clone)]
pub struct MediaConfig {
    /// Download and persist media attachments
    pub enabled: bool,

    /// Directory media files are written to (served under `/media`)
    pub dir: PathBuf,

    /// Public URL prefix for stored media
    pub public_base_url: String,

    /// Maximum accepted download size in bytes
    pub max_file_size: usize,

    /// Download timeout
    pub timeout: Duration,

    /// Provider token sent as the `token` header when downloading media
    pub provider_token: Option<String>,

    /// Hosts (`host` or `host:port`) that may receive the provider token
    pub token_hosts: Vec<String>,

    /// Report a failed delivery when media cannot be stored, instead of
    /// persisting the message without its attachment
    pub strict: bool,
}

/// Pipeline behaviour
#[derive(Debug, Clone)]
pub struct IngestSettings {
    /// Source tag written on newly created contacts
    pub source_tag: String,

    /// Reject every `fromMe` event as self-sent
    pub ignore_self_sent: bool,
}

impl Default for IngestSettings {
    fn default() -> Self {
        Self {
            source_tag: DEFAULT_SOURCE_TAG.to_string(),
            ignore_self_sent: false,
        }
    }
}

impl Config {
    /// Load configuration from the TOML file and process environment
    #[must_use]
    pub fn load(explicit_file: Option<&Path>) -> Self {
        let fc = file::load_config_file(explicit_file);
        let data_dir = data_dir();

        // Ensure data dir exists
        std::fs::create_dir_all(&data_dir).ok();

        Self::from_sources(fc, |key| std::env::var(key).ok(), &data_dir)
    }

    /// Build configuration from a parsed file and an environment lookup
    ///
    /// Environment values win over file values; file values win over defaults.
    #[must_use]
    pub fn from_sources<F>(fc: IngestConfigFile, env: F, data_dir: &Path) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let server = ServerConfig {
            bind: env("WA_INGEST_BIND")
                .or(fc.server.bind)
                .unwrap_or_else(|| "0.0.0.0".to_string()),
            port: env("WA_INGEST_PORT")
                .or_else(|| env("PORT"))
                .and_then(|s| s.parse().ok())
                .or(fc.server.port)
                .unwrap_or(DEFAULT_PORT),
            webhook_path: normalize_mount(
                &env("WA_INGEST_WEBHOOK_PATH")
                    .or(fc.server.webhook_path)
                    .unwrap_or_else(|| DEFAULT_WEBHOOK_PATH.to_string()),
            ),
            max_body_bytes: env("WA_INGEST_MAX_BODY_BYTES")
                .and_then(|s| s.parse().ok())
                .or(fc.server.max_body_bytes)
                .unwrap_or(DEFAULT_MAX_BODY_BYTES),
        };

        let database_path = env("WA_INGEST_DATABASE")
            .or(fc.database.path)
            .map_or_else(|| data_dir.join("wa-ingest.db"), PathBuf::from);

        let media = MediaConfig {
            enabled: env("WA_INGEST_MEDIA_ENABLED")
                .and_then(|v| parse_bool(&v))
                .or(fc.media.enabled)
                .unwrap_or(true),
            dir: env("WA_INGEST_MEDIA_DIR")
                .or(fc.media.dir)
                .map_or_else(|| data_dir.join("media"), PathBuf::from),
            public_base_url: env("WA_INGEST_MEDIA_PUBLIC_URL")
                .or(fc.media.public_base_url)
                .unwrap_or_else(|| "/media".to_string())
                .trim_end_matches('/')
                .to_string(),
            max_file_size: fc.media.max_file_size.unwrap_or(DEFAULT_MAX_MEDIA_BYTES),
            timeout: Duration::from_secs(fc.media.timeout_secs.unwrap_or(30)),
            provider_token: env("WA_INGEST_PROVIDER_TOKEN").or(fc.media.provider_token),
            token_hosts: env("WA_INGEST_TOKEN_HOSTS")
                .map(|v| v.split(',').map(ToString::to_string).collect())
                .or(fc.media.token_hosts)
                .unwrap_or_default()
                .into_iter()
                .map(|host| host.trim().to_ascii_lowercase())
                .filter(|host| !host.is_empty())
                .collect(),
            strict: fc.media.strict.unwrap_or(false),
        };

        let ingest = IngestSettings {
            source_tag: env("WA_INGEST_SOURCE_TAG")
                .or(fc.ingest.source_tag)
                .unwrap_or_else(|| DEFAULT_SOURCE_TAG.to_string()),
            ignore_self_sent: fc.ingest.ignore_self_sent.unwrap_or(false),
        };

        Self {
            server,
            database_path,
            media,
            ingest,
        }
    }
}

/// Return the data directory (`~/.local/share/wa-ingest` on Linux)
#[must_use]
pub fn data_dir() -> PathBuf {
    directories::BaseDirs::new()
        .map_or_else(|| PathBuf::from("."), |d| d.data_dir().join("wa-ingest"))
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Force a leading slash and drop a trailing one
fn normalize_mount(path: &str) -> String {
    let trimmed = path.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        return DEFAULT_WEBHOOK_PATH.to_string();
    }
    if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{trimmed}")
    }
}

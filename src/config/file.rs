//! TOML configuration file loading
//!
//! Supports `~/.config/wa-ingest/config.toml` (or an explicit `--config` path)
//! as a persistent config source. All fields are optional; the file is a
//! partial overlay on top of defaults.

use std::path::{Path, PathBuf};

use serde::Deserialize;

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
pub struct IngestConfigFile {
    /// HTTP server configuration
    #[serde(default)]
    pub server: ServerFileConfig,

    /// Database configuration
    #[serde(default)]
    pub database: DatabaseFileConfig,

    /// Media store configuration
    #[serde(default)]
    pub media: MediaFileConfig,

    /// Pipeline behaviour
    #[serde(default)]
    pub ingest: IngestFileConfig,
}

/// Server/runtime configuration
#[derive(Debug, Default, Deserialize)]
pub struct ServerFileConfig {
    /// Bind address (e.g. "0.0.0.0")
    pub bind: Option<String>,

    /// API server port
    pub port: Option<u16>,

    /// Mount path of the webhook endpoint
    pub webhook_path: Option<String>,

    /// Largest accepted webhook body
    pub max_body_bytes: Option<usize>,
}

/// Database configuration
#[derive(Debug, Default, Deserialize)]
pub struct DatabaseFileConfig {
    /// `SQLite` database file
    pub path: Option<String>,
}

/// Media store configuration
#[derive(Debug, Default, Deserialize)]
pub struct MediaFileConfig {
    pub enabled: Option<bool>,
    pub dir: Option<String>,
    pub public_base_url: Option<String>,
    pub max_file_size: Option<usize>,
    pub timeout_secs: Option<u64>,
    /// Provider token sent when downloading media
    pub provider_token: Option<String>,
    /// Hosts allowed to receive the provider token
    pub token_hosts: Option<Vec<String>>,
    /// Fail the delivery when media cannot be stored
    pub strict: Option<bool>,
}

/// Pipeline behaviour
#[derive(Debug, Default, Deserialize)]
pub struct IngestFileConfig {
    /// Source tag written on newly created contacts
    pub source_tag: Option<String>,

    /// Drop messages authored by the connected line itself
    pub ignore_self_sent: Option<bool>,
}

/// Load the TOML config file from an explicit path or the standard location
///
/// Returns `IngestConfigFile::default()` if the file doesn't exist or can't be parsed.
#[must_use]
pub fn load_config_file(explicit: Option<&Path>) -> IngestConfigFile {
    let Some(path) = explicit.map(Path::to_path_buf).or_else(config_file_path) else {
        return IngestConfigFile::default();
    };

    if !path.exists() {
        if explicit.is_some() {
            tracing::warn!(path = %path.display(), "config file not found, using defaults");
        }
        return IngestConfigFile::default();
    }

    match std::fs::read_to_string(&path) {
        Ok(content) => parse_config(&content).unwrap_or_else(|e| {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to parse config file, using defaults"
            );
            IngestConfigFile::default()
        }),
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to read config file"
            );
            IngestConfigFile::default()
        }
    }
}

/// Parse TOML content into the file schema
///
/// # Errors
///
/// Returns error if the content is not valid TOML for this schema
pub fn parse_config(content: &str) -> crate::Result<IngestConfigFile> {
    let config = toml::from_str(content)?;
    Ok(config)
}

/// Return the config file path: `~/.config/wa-ingest/config.toml`
#[must_use]
pub fn config_file_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.config_dir().join("wa-ingest").join("config.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_partial_file() {
        let fc = parse_config(
            r#"
            [server]
            port = 9000

            [media]
            strict = true
            provider_token = "abc"
            token_hosts = ["acme.uazapi.com"]
            "#,
        )
        .unwrap();

        assert_eq!(fc.server.port, Some(9000));
        assert!(fc.server.bind.is_none());
        assert_eq!(fc.media.strict, Some(true));
        assert_eq!(fc.media.provider_token.as_deref(), Some("abc"));
        assert_eq!(fc.media.token_hosts, Some(vec!["acme.uazapi.com".to_string()]));
        assert!(fc.ingest.source_tag.is_none());
    }

    #[test]
    fn empty_file_is_default() {
        let fc = parse_config("").unwrap();
        assert!(fc.database.path.is_none());
        assert!(fc.media.enabled.is_none());
    }

    #[test]
    fn rejects_wrong_types() {
        assert!(parse_config("[server]\nport = \"not a number\"").is_err());
    }
}

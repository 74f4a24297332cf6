//! Local-disk media store

use std::path::PathBuf;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Url;
use reqwest::header::CONTENT_TYPE;

use super::{extension_for, sanitize_component};
use crate::config::MediaConfig;
use crate::gateway::MediaStore;
use crate::{Error, Result};

/// Header carrying the provider token on media downloads
const TOKEN_HEADER: &str = "token";

/// Downloads media and writes it under `<dir>/<company>/<message>.<ext>`
///
/// Stored files are addressed as `<public_base_url>/<company>/<file>`.
pub struct FileMediaStore {
    client: reqwest::Client,
    dir: PathBuf,
    public_base_url: String,
    max_file_size: usize,
    provider_token: Option<String>,
    token_hosts: Vec<String>,
}

impl FileMediaStore {
    /// Create a store from media configuration
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client cannot be built
    pub fn new(config: &MediaConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| Error::Media(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            dir: config.dir.clone(),
            public_base_url: config.public_base_url.trim_end_matches('/').to_string(),
            max_file_size: config.max_file_size,
            provider_token: config.provider_token.clone(),
            token_hosts: config.token_hosts.clone(),
        })
    }

    /// Whether the provider token may be sent to this URL
    ///
    /// Entries match the bare host, or `host:port` when they name a port.
    fn token_allowed(&self, url: &Url) -> bool {
        let Some(host) = url.host_str().map(str::to_ascii_lowercase) else {
            return false;
        };
        let with_port = url
            .port_or_known_default()
            .map(|port| format!("{host}:{port}"));

        self.token_hosts
            .iter()
            .any(|allowed| *allowed == host || Some(allowed) == with_port.as_ref())
    }

    async fn download(&self, source_url: &str) -> Result<(Vec<u8>, Option<String>)> {
        let url = Url::parse(source_url)
            .map_err(|e| Error::Media(format!("invalid media url {source_url:?}: {e}")))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(Error::Media(format!(
                "unsupported media url scheme {:?}",
                url.scheme()
            )));
        }

        let token = self
            .provider_token
            .as_deref()
            .filter(|_| self.token_allowed(&url));
        if token.is_none() && self.provider_token.is_some() {
            tracing::debug!(host = ?url.host_str(), "media host not trusted, fetching without token");
        }

        let mut request = self.client.get(url);
        if let Some(token) = token {
            request = request.header(TOKEN_HEADER, token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| Error::Media(format!("download failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::Media(format!("download returned {status}")));
        }

        let max = u64::try_from(self.max_file_size).unwrap_or(u64::MAX);
        if let Some(len) = response.content_length() {
            if len > max {
                return Err(Error::Media(format!(
                    "media is {len} bytes, limit is {}",
                    self.max_file_size
                )));
            }
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(ToString::to_string);

        // Content-Length may be absent or wrong
        let mut body = Vec::new();
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| Error::Media(format!("download interrupted: {e}")))?;
            if body.len() + chunk.len() > self.max_file_size {
                return Err(Error::Media(format!(
                    "media exceeds {} bytes",
                    self.max_file_size
                )));
            }
            body.extend_from_slice(&chunk);
        }

        Ok((body, content_type))
    }
}

#[async_trait]
impl MediaStore for FileMediaStore {
    async fn persist_media(
        &self,
        company_id: &str,
        message_id: &str,
        source_url: &str,
    ) -> Result<String> {
        let (body, content_type) = self.download(source_url).await?;

        let company = sanitize_component(company_id);
        let file_name = format!(
            "{}.{}",
            sanitize_component(message_id),
            extension_for(content_type.as_deref(), source_url)
        );

        let company_dir = self.dir.join(&company);
        tokio::fs::create_dir_all(&company_dir)
            .await
            .map_err(|e| Error::Media(format!("failed to create {}: {e}", company_dir.display())))?;

        let path = company_dir.join(&file_name);
        tokio::fs::write(&path, &body)
            .await
            .map_err(|e| Error::Media(format!("failed to write {}: {e}", path.display())))?;

        tracing::debug!(path = %path.display(), bytes = body.len(), "media written");

        Ok(format!("{}/{company}/{file_name}", self.public_base_url))
    }

    fn name(&self) -> &'static str {
        "file"
    }
}

//! HTTP API server for the ingestion gateway

pub mod health;
pub mod webhook;

use std::path::PathBuf;
use std::sync::Arc;

use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::routing::any;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

use crate::config::{DEFAULT_MAX_BODY_BYTES, DEFAULT_WEBHOOK_PATH};
use crate::db::DbPool;
use crate::ingest::Pipeline;
use crate::{Error, Result};

/// Mount point of stored media files
pub const MEDIA_MOUNT: &str = "/media";

/// Paths owned by the server itself
const RESERVED_PATHS: [&str; 3] = ["/health", "/ready", MEDIA_MOUNT];

/// Shared state for API handlers
#[derive(Clone)]
pub struct ApiState {
    pub db: DbPool,
    pub pipeline: Arc<Pipeline>,
}

/// Configuration for building an API server
pub struct ApiServerBuilder {
    db: DbPool,
    pipeline: Arc<Pipeline>,
    bind: String,
    port: u16,
    webhook_path: String,
    max_body_bytes: usize,
    media_dir: Option<PathBuf>,
}

impl ApiServerBuilder {
    /// Create a new API server builder
    #[must_use]
    pub fn new(db: DbPool, pipeline: Arc<Pipeline>) -> Self {
        Self {
            db,
            pipeline,
            bind: "0.0.0.0".to_string(),
            port: crate::config::DEFAULT_PORT,
            webhook_path: DEFAULT_WEBHOOK_PATH.to_string(),
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
            media_dir: None,
        }
    }

    /// Set the bind address
    #[must_use]
    pub fn bind(mut self, bind: impl Into<String>) -> Self {
        self.bind = bind.into();
        self
    }

    /// Set the port
    #[must_use]
    pub const fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set the webhook mount path
    #[must_use]
    pub fn webhook_path(mut self, path: impl Into<String>) -> Self {
        self.webhook_path = path.into();
        self
    }

    /// Set the largest webhook body read before answering `unrecognized_payload`
    #[must_use]
    pub const fn max_body_bytes(mut self, limit: usize) -> Self {
        self.max_body_bytes = limit;
        self
    }

    /// Serve stored media from this directory under [`MEDIA_MOUNT`]
    #[must_use]
    pub fn media_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.media_dir = dir;
        self
    }

    /// Build the API server
    ///
    /// # Errors
    ///
    /// Returns error if the webhook path collides with a built-in route
    pub fn build(self) -> Result<ApiServer> {
        let webhook_path = self.webhook_path.trim_end_matches('/').to_string();
        if webhook_path.is_empty() || !webhook_path.starts_with('/') {
            return Err(Error::Config(format!(
                "invalid webhook path: {:?}",
                self.webhook_path
            )));
        }
        if RESERVED_PATHS
            .iter()
            .any(|reserved| webhook_path == *reserved || webhook_path.starts_with(&format!("{reserved}/")))
        {
            return Err(Error::Config(format!(
                "webhook path {webhook_path} collides with a built-in route"
            )));
        }

        Ok(ApiServer {
            state: Arc::new(ApiState {
                db: self.db,
                pipeline: self.pipeline,
            }),
            bind: self.bind,
            port: self.port,
            webhook_path,
            max_body_bytes: self.max_body_bytes,
            media_dir: self.media_dir,
        })
    }
}

/// API server
pub struct ApiServer {
    state: Arc<ApiState>,
    bind: String,
    port: u16,
    webhook_path: String,
    max_body_bytes: usize,
    media_dir: Option<PathBuf>,
}

impl ApiServer {
    /// Build the router with all routes
    ///
    /// The webhook answers on its mount path, on every sub-path (providers
    /// append event names to the configured URL) and, as the fallback, on
    /// any path not owned by health checks or stored media.
    #[must_use]
    pub fn router(&self) -> Router {
        let webhook_routes = Router::new()
            .route(&self.webhook_path, any(webhook::handle_webhook))
            .route(
                &format!("{}/{{*rest}}", self.webhook_path),
                any(webhook::handle_webhook),
            )
            .fallback(webhook::handle_webhook)
            .layer(DefaultBodyLimit::max(self.max_body_bytes))
            .with_state(self.state.clone());

        let mut router = Router::new()
            .merge(webhook_routes)
            .merge(health::router())
            .merge(health::ready_router(self.state.clone()));

        if let Some(media_dir) = &self.media_dir {
            router = router.nest_service(MEDIA_MOUNT, ServeDir::new(media_dir));
            tracing::info!(path = %media_dir.display(), "serving stored media");
        }

        // Provider consoles probe the webhook from the browser
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);

        router.layer(cors).layer(TraceLayer::new_for_http())
    }

    /// Run the API server
    ///
    /// # Errors
    ///
    /// Returns error if server fails to bind or run
    pub async fn run(self) -> Result<()> {
        let addr = format!("{}:{}", self.bind, self.port);
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| Error::Config(format!("failed to bind API server: {e}")))?;

        tracing::info!(
            addr = %addr,
            webhook_path = %self.webhook_path,
            "API server listening"
        );

        axum::serve(listener, self.router())
            .await
            .map_err(|e| Error::Config(format!("API server error: {e}")))?;

        Ok(())
    }

    /// Run the API server in a background task
    #[must_use]
    pub fn spawn(self) -> tokio::task::JoinHandle<Result<()>> {
        tokio::spawn(async move { self.run().await })
    }
}

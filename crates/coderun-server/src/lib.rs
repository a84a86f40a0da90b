//! HTTP front end for the sandboxed execution pipeline
//!
//! Exposes a single execution endpoint plus health and language discovery.
//! The server is generic over `CodeExecutor`, so the router can be exercised
//! without a container runtime. Each execution runs on a task owned by the
//! server's `TaskTracker`: a client that disconnects mid-request drops the
//! response future, never the pipeline, and shutdown waits for every tracked
//! execution to clean up.

pub mod error;

pub use error::{ErrorBody, Result, ServerError};

use axum::extract::rejection::JsonRejection;
use axum::extract::{DefaultBodyLimit, State};
use axum::http::StatusCode;
use axum::response::Json;
use axum::routing::{get, post};
use axum::{middleware, Router};
use coderun_core::{CodeExecutor, ExecutionRequest, ExecutionResult, LanguageInfo, ServerSettings};
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::task::TaskTracker;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Health check response.
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub version: String,
}

#[derive(Serialize)]
pub struct LanguagesResponse {
    pub languages: Vec<LanguageInfo>,
}

/// Configuration for the coderun server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Server bind address
    pub bind_addr: SocketAddr,
    /// Enable CORS
    pub enable_cors: bool,
    /// CORS allowed origins (if None, allows any origin)
    pub cors_origins: Option<Vec<String>>,
    /// Maximum request body size in bytes
    pub max_body_size: usize,
    /// Enable request logging
    pub enable_logging: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 3001)),
            enable_cors: true,
            cors_origins: None,
            max_body_size: 1024 * 1024,
            enable_logging: true,
        }
    }
}

impl ServerConfig {
    /// Create a new server configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from the `server` section of the service configuration.
    pub fn from_settings(settings: &ServerSettings) -> Result<Self> {
        let config = Self::new()
            .with_bind_addr_str(&settings.bind_addr)?
            .with_max_body_size(settings.max_body_bytes)
            .with_logging(settings.request_logging);
        Ok(match &settings.cors_origins {
            Some(origins) => config.with_cors_origins(origins.clone()),
            None => config,
        })
    }

    /// Parse and set the bind address from a string.
    pub fn with_bind_addr_str(mut self, addr: &str) -> Result<Self> {
        self.bind_addr = addr
            .parse()
            .map_err(|e| ServerError::config_error(format!("Invalid bind address '{}': {}", addr, e)))?;
        Ok(self)
    }

    /// Set allowed CORS origins.
    pub fn with_cors_origins(mut self, origins: Vec<String>) -> Self {
        self.cors_origins = Some(origins);
        self
    }

    /// Set maximum request body size.
    pub fn with_max_body_size(mut self, size: usize) -> Self {
        self.max_body_size = size;
        self
    }

    /// Enable or disable request logging.
    pub fn with_logging(mut self, enable: bool) -> Self {
        self.enable_logging = enable;
        self
    }
}

/// Shared application state.
pub struct AppState<E: CodeExecutor> {
    pub executor: Arc<E>,
    pub tasks: TaskTracker,
}

impl<E: CodeExecutor> Clone for AppState<E> {
    fn clone(&self) -> Self {
        Self {
            executor: self.executor.clone(),
            tasks: self.tasks.clone(),
        }
    }
}

/// Handler for the /run POST endpoint.
async fn run_handler<E: CodeExecutor + 'static>(
    State(app_state): State<AppState<E>>,
    payload: std::result::Result<Json<ExecutionRequest>, JsonRejection>,
) -> Result<Json<ExecutionResult>> {
    let Json(request) = payload.map_err(|rejection| {
        log::warn!("Rejected request body: {}", rejection);
        if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE {
            ServerError::PayloadTooLarge(rejection.body_text())
        } else {
            ServerError::invalid_request(rejection.body_text())
        }
    })?;

    log::info!(
        "Received {} execution request ({} bytes of code)",
        request.language,
        request.code.len()
    );

    let executor = app_state.executor.clone();
    let result = app_state
        .tasks
        .spawn(async move { executor.execute(request).await })
        .await
        .map_err(|e| ServerError::internal(format!("Execution task failed: {}", e)))??;

    Ok(Json(result))
}

/// Handler for the /languages GET endpoint.
async fn languages_handler<E: CodeExecutor + 'static>(
    State(app_state): State<AppState<E>>,
) -> Json<LanguagesResponse> {
    Json(LanguagesResponse {
        languages: app_state.executor.languages(),
    })
}

/// The coderun HTTP server.
pub struct CoderunServer<E: CodeExecutor> {
    executor: Arc<E>,
    config: ServerConfig,
    tasks: TaskTracker,
}

impl<E: CodeExecutor + 'static> CoderunServer<E> {
    /// Create a new server with the given executor and default configuration.
    pub fn new(executor: E) -> Self {
        Self::with_config(executor, ServerConfig::default())
    }

    /// Create a new server with custom configuration.
    pub fn with_config(executor: E, config: ServerConfig) -> Self {
        Self {
            executor: Arc::new(executor),
            config,
            tasks: TaskTracker::new(),
        }
    }

    /// Stop accepting executions and wait for the tracked ones to finish.
    pub async fn drain(&self) {
        self.tasks.close();
        if !self.tasks.is_empty() {
            log::info!("Waiting for {} in-flight execution(s) to finish", self.tasks.len());
        }
        self.tasks.wait().await;
    }

    /// Build the Axum router with all routes and middleware.
    pub fn build_router(&self) -> Router {
        let state = AppState {
            executor: self.executor.clone(),
            tasks: self.tasks.clone(),
        };

        let mut router = Router::new()
            .route("/health", get(|| async {
                Json(HealthResponse {
                    status: "healthy".to_string(),
                    timestamp: chrono::Utc::now(),
                    version: env!("CARGO_PKG_VERSION").to_string(),
                })
            }))
            .route("/languages", get(languages_handler::<E>))
            .route("/run", post(run_handler::<E>))
            .with_state(state);

        // Over-limit bodies surface as a `JsonRejection`, which keeps the 413
        // response in the same JSON shape as every other failure.
        router = router.layer(DefaultBodyLimit::max(self.config.max_body_size));

        if self.config.enable_logging {
            router =
                router.layer(middleware::from_fn(
                    |request: axum::http::Request<axum::body::Body>,
                     next: axum::middleware::Next| async {
                        let request_id = uuid::Uuid::new_v4().to_string();
                        let method = request.method().clone();
                        let uri = request.uri().clone();

                        // Health probes arrive every few seconds
                        let quiet = uri.path() == "/health";
                        if quiet {
                            log::debug!("Request {} {} {}", request_id, method, uri);
                        } else {
                            log::info!("Request {} {} {}", request_id, method, uri);
                        }

                        let start = std::time::Instant::now();
                        let response = next.run(request).await;
                        let duration = start.elapsed();

                        if quiet {
                            log::debug!("Response {} {} in {:?}", request_id, response.status(), duration);
                        } else {
                            log::info!("Response {} {} in {:?}", request_id, response.status(), duration);
                        }

                        response
                    },
                ));
        }

        router = router.layer(TraceLayer::new_for_http());

        if self.config.enable_cors {
            let cors_layer = if let Some(ref origins) = self.config.cors_origins {
                let origins: std::result::Result<Vec<_>, _> =
                    origins.iter().map(|s| s.parse()).collect();
                match origins {
                    Ok(origins) => CorsLayer::new()
                        .allow_origin(origins)
                        .allow_methods(Any)
                        .allow_headers(Any),
                    Err(_) => {
                        log::warn!("Invalid CORS origin in configuration, allowing any origin");
                        CorsLayer::permissive()
                    }
                }
            } else {
                CorsLayer::permissive()
            };
            router = router.layer(cors_layer);
        }

        router
    }

    /// Start the server with graceful shutdown support.
    ///
    /// The server will shut down when the provided shutdown signal is received.
    /// Executions still running once the connections close, including those
    /// whose client already went away, finish and clean up before this returns.
    pub async fn serve_with_shutdown<F>(self, shutdown_signal: F) -> Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let router = self.build_router();
        let listener = TcpListener::bind(self.config.bind_addr)
            .await
            .map_err(|e| {
                ServerError::config_error(format!(
                    "Failed to bind to {}: {}",
                    self.config.bind_addr, e
                ))
            })?;

        log::info!("coderun server listening on {}", self.config.bind_addr);
        log::info!("Health check: http://{}/health", self.config.bind_addr);
        log::info!("Languages: http://{}/languages", self.config.bind_addr);
        log::info!("Run endpoint: http://{}/run", self.config.bind_addr);

        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown_signal)
            .await
            .map_err(|e| ServerError::internal(format!("Server error: {}", e)))?;

        self.drain().await;
        log::info!("coderun server shut down gracefully");
        Ok(())
    }
}

/// Utility function to create a shutdown signal from Ctrl+C or SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            log::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                log::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            log::info!("Received Ctrl+C, shutting down...");
        },
        _ = terminate => {
            log::info!("Received SIGTERM, shutting down...");
        },
    }
}

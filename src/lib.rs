//! Aervyn - ActivityPub federation core
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      API Layer (Axum)                        │
//! │  - WebFinger, actor, inbox and outbox endpoints             │
//! │  - Local timeline, health, metrics                          │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     Service Layer                            │
//! │  - Inbox pipeline, follows, timelines                       │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//! ┌───────────────────────────────┬─────────────────────────────┐
//! │        Federation              │         Data Layer          │
//! │  - HTTP signatures             │  - SQLite (sqlx)            │
//! │  - Actor discovery             │  - Activity log, follows,   │
//! │  - Activity dispatch           │    posts, reactions         │
//! └───────────────────────────────┴─────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - `api`: HTTP handlers
//! - `service`: Business logic layer
//! - `federation`: ActivityPub protocol handling
//! - `data`: Database layer
//! - `config`: Configuration management
//! - `error`: Error types
//! - `metrics`: Prometheus instruments

pub mod api;
pub mod config;
pub mod data;
pub mod error;
pub mod federation;
pub mod metrics;
pub mod service;

use std::sync::Arc;

/// Application state shared across all handlers
///
/// Cloned for each request. Services are cheap views over these Arcs and
/// are built on demand.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration, fixed at startup
    pub config: Arc<config::AppConfig>,

    /// Database connection pool
    pub db: Arc<data::Database>,

    /// HTTP client for federation
    pub http_client: Arc<reqwest::Client>,
}

impl AppState {
    /// Initialize application state
    ///
    /// # Steps
    /// 1. Connect to SQLite database (runs migrations)
    /// 2. Build the federation HTTP client
    /// 3. Ensure the admin account exists
    ///
    /// # Errors
    /// Returns error if any initialization step fails
    pub async fn new(config: config::AppConfig) -> Result<Self, error::AppError> {
        tracing::info!("Initializing application state...");

        // 1. Connect to SQLite database
        let db = data::Database::connect(&config.database.path).await?;
        tracing::info!(path = %config.database.path.display(), "Database connected");

        // 2. Initialize HTTP client
        let http_client = reqwest::Client::builder()
            .user_agent(config.federation.user_agent.clone())
            .timeout(config.federation.fetch_timeout())
            .build()
            .map_err(|e| error::AppError::Internal(e.into()))?;

        let state = Self {
            config: Arc::new(config),
            db: Arc::new(db),
            http_client: Arc::new(http_client),
        };

        // 3. Initialize admin user
        let admin = state.account_service().ensure_admin_user().await?;
        tracing::info!(username = %admin.username, "Admin account ready");

        tracing::info!("Application state initialized successfully");
        Ok(state)
    }

    pub fn federation_client(&self) -> federation::FederationClient {
        federation::FederationClient::new(self.http_client.clone(), &self.config.federation)
    }

    pub fn actor_resolver(&self) -> federation::ActorResolver {
        federation::ActorResolver::new(
            self.federation_client(),
            self.config.federation.discovery_scheme(),
        )
    }

    pub fn signature_verifier(&self) -> federation::SignatureVerifier {
        federation::SignatureVerifier::new(self.federation_client(), &self.config)
    }

    pub fn account_service(&self) -> service::AccountService {
        service::AccountService::new(self.db.clone(), self.config.clone())
    }

    pub fn follow_service(&self) -> service::FollowService {
        service::FollowService::new(
            self.db.clone(),
            self.config.clone(),
            self.actor_resolver(),
            federation::ActivityDelivery::new(self.federation_client()),
        )
    }

    pub fn inbox_service(&self) -> service::InboxService {
        let processor = federation::ActivityProcessor::new(self.db.clone(), self.config.clone());
        service::InboxService::new(self.db.clone(), processor)
    }

    pub fn timeline_service(&self) -> service::TimelineService {
        service::TimelineService::new(
            self.db.clone(),
            self.config.clone(),
            federation::RemoteTimelineFetcher::new(self.actor_resolver()),
        )
    }
}

/// Build the Axum router with all routes.
///
/// This is shared by the binary and integration tests to keep route
/// composition consistent across environments.
pub fn build_router(state: AppState) -> axum::Router {
    use axum::Router;
    use tower_http::{
        compression::CompressionLayer, limit::RequestBodyLimitLayer, trace::TraceLayer,
    };

    Router::new()
        .route("/health", axum::routing::get(health_check))
        .merge(api::wellknown_router())
        .merge(api::activitypub_router())
        .nest("/api", api::timelines_router())
        .layer(RequestBodyLimitLayer::new(api::MAX_BODY_BYTES))
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .layer(tower_http::cors::CorsLayer::permissive())
        .with_state(state)
        .merge(api::metrics_router())
}

async fn health_check() -> &'static str {
    "OK"
}

//! The emulator service object and its HTTP router.

use std::{io, sync::Arc, time::Duration};

use axum::{
    extract::{DefaultBodyLimit, State},
    http::{header, Request, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use fakebooks_core::StoreError;
use fakebooks_sqlite::Store;
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Serialize;
use thiserror::Error;
use time::OffsetDateTime;

use crate::{
    auth, collections,
    config::Config,
    error::ApiError,
    handlers::{account_items, companies, deals, journals, oauth, receipts, wallet_txns, walletables},
    login::{LoginCredentials, LoginFlow},
    seed,
    tokens::{Clock, SystemClock, TokenManager},
};

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("storage: {0}")]
    Store(#[from] StoreError),
    #[error("upload directory: {0}")]
    Upload(#[from] io::Error),
}

/// Everything a request handler needs, built once from [`Config`] and shared
/// behind an `Arc` as router state.
pub struct Emulator {
    pub config: Config,
    pub store: Arc<Store>,
    pub tokens: TokenManager,
    pub login: LoginFlow,
    clock: Arc<dyn Clock>,
    metrics: Option<PrometheusHandle>,
}

impl Emulator {
    pub fn open(config: &Config) -> Result<Self, StartupError> {
        Self::open_with_clock(config, Arc::new(SystemClock))
    }

    /// Opens the store, checks every collection the handlers use, creates the
    /// upload root and seeds reference data.
    pub fn open_with_clock(config: &Config, clock: Arc<dyn Clock>) -> Result<Self, StartupError> {
        let mut store = Store::open(&config.storage.path)?;
        store.declare(collections::ALL)?;
        store.check_declared(collections::ALL)?;
        std::fs::create_dir_all(&config.storage.upload_root)?;
        seed::seed(&store, &config.auth)?;

        let store = Arc::new(store);
        let tokens = TokenManager::new(
            store.clone(),
            clock.clone(),
            time::Duration::seconds(config.auth.access_token_ttl_secs as i64),
            time::Duration::seconds(config.auth.refresh_token_ttl_secs as i64),
        );
        let login = LoginFlow::new(
            store.clone(),
            clock.clone(),
            LoginCredentials {
                email: config.auth.email.clone(),
                password: config.auth.password.clone(),
                otp_code: config.auth.otp_code.clone(),
            },
            time::Duration::seconds(config.auth.authorization_code_ttl_secs as i64),
        );

        tracing::info!(
            path = %config.storage.path.display(),
            upload_root = %config.storage.upload_root.display(),
            "Emulator ready"
        );

        Ok(Self {
            config: config.clone(),
            store,
            tokens,
            login,
            clock,
            metrics: None,
        })
    }

    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }

    pub fn now(&self) -> OffsetDateTime {
        self.clock.now()
    }

    pub fn router(self: Arc<Self>) -> Router {
        let api = Router::new()
            .route("/api/1/companies", get(companies::list))
            .route("/api/1/companies/:id", get(companies::get))
            .route("/api/1/account_items", get(account_items::list))
            .route("/api/1/walletables", get(walletables::list))
            .route("/api/1/wallet_txns", get(wallet_txns::list).post(wallet_txns::create))
            .route(
                "/api/1/wallet_txns/:id",
                get(wallet_txns::get).put(wallet_txns::update).delete(wallet_txns::delete),
            )
            .route("/api/1/deals", get(deals::list).post(deals::create))
            .route("/api/1/deals/:id", get(deals::get).put(deals::update).delete(deals::delete))
            .route("/api/1/journals", get(journals::list).post(journals::create))
            .route("/api/1/journals/:id", get(journals::get))
            .route("/api/1/receipts", get(receipts::list).post(receipts::create))
            .route("/api/1/receipts/:id", get(receipts::get).delete(receipts::delete))
            .route("/api/1/receipts/:id/download", get(receipts::download))
            .route_layer(middleware::from_fn_with_state(self.clone(), auth::require_bearer));

        Router::new()
            .route("/oauth/token", post(oauth::token))
            .route("/oauth/revoke", post(oauth::revoke))
            .route("/oauth/authorize", get(oauth::authorize))
            .route("/oauth/login", post(oauth::login))
            .route("/oauth/otp", post(oauth::otp))
            .route("/oauth/consent", post(oauth::consent))
            .route("/health", get(health))
            .route("/metrics", get(render_metrics))
            .merge(api)
            .layer(DefaultBodyLimit::max(self.config.storage.max_upload_bytes))
            .layer(middleware::from_fn_with_state(self.clone(), track_request))
            .with_state(self)
    }
}

/// Applies the request timeout and counts responses by method and status.
async fn track_request<B>(State(emulator): State<Arc<Emulator>>, req: Request<B>, next: Next<B>) -> Response {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let limit = Duration::from_secs(emulator.config.server.request_timeout_secs);

    let response = match tokio::time::timeout(limit, next.run(req)).await {
        Ok(response) => response,
        Err(_) => {
            tracing::warn!(%method, %path, timeout_secs = limit.as_secs(), "Request timed out");
            ApiError::Server("request timed out".to_string()).into_response()
        }
    };

    let status = response.status();
    tracing::debug!(%method, %path, status = status.as_u16(), "Request handled");
    metrics::increment_counter!(
        "fakebooks_http_requests_total",
        "method" => method.to_string(),
        "status" => status.as_u16().to_string()
    );
    response
}

#[derive(Serialize)]
struct Health {
    status: &'static str,
    version: &'static str,
}

async fn health() -> Json<Health> {
    Json(Health {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn render_metrics(State(emulator): State<Arc<Emulator>>) -> Response {
    match &emulator.metrics {
        Some(handle) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            handle.render(),
        )
            .into_response(),
        None => ApiError::NotFound("metrics are disabled".to_string()).into_response(),
    }
}

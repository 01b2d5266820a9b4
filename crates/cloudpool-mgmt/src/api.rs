use crate::accounts::AccountService;
use crate::config::MgmtConfig;
use crate::error::{MgmtError, Result};
use crate::lifecycle::PoolLifecycle;
use crate::models::{
    Account, AddMemberRequest, CreateAccountRequest, CreatePoolRequest, PoolMembership,
    StoragePool, UpdateStatusRequest,
};
use crate::quota::{AccountUsage, PoolUsage, QuotaAggregator, RefreshSummary, UsageSummary};
use crate::security::{constant_time_eq, security_headers_middleware, AuthRateLimiter};
use crate::store::PoolStore;
use axum::{
    body::Body,
    extract::{rejection::JsonRejection, ConnectInfo, Path, State},
    http::{header, Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    routing::{delete, get, post, put},
    Json, Router,
};
use cloudpool_rclone::{ToolConfig, ToolRunner};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

impl IntoResponse for MgmtError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            error!("Request failed: {}", self);
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

#[derive(Clone)]
pub struct AdminApi {
    config: Arc<MgmtConfig>,
    accounts: Arc<AccountService>,
    pools: Arc<PoolLifecycle>,
    quotas: Arc<QuotaAggregator>,
    rate_limiter: Arc<AuthRateLimiter>,
}

impl AdminApi {
    pub fn new(config: Arc<MgmtConfig>, store: Arc<PoolStore>, runner: Arc<dyn ToolRunner>) -> Self {
        let tools = Arc::new(config.tools.clone());
        let pools = Arc::new(PoolLifecycle::new(
            store.clone(),
            runner.clone(),
            tools.clone(),
        ));
        Self {
            accounts: Arc::new(AccountService::new(
                store.clone(),
                runner.clone(),
                tools.clone(),
                pools.locks(),
            )),
            pools,
            quotas: Arc::new(QuotaAggregator::new(
                store,
                runner,
                tools,
                config.refresh_concurrency,
            )),
            config,
            rate_limiter: Arc::new(AuthRateLimiter::new()),
        }
    }

    pub fn pools(&self) -> &PoolLifecycle {
        &self.pools
    }

    pub fn router(self: Arc<Self>) -> Router {
        let protected = Router::new()
            .route("/api/settings/system", get(system_settings_handler))
            .route(
                "/api/accounts",
                get(list_accounts_handler).post(create_account_handler),
            )
            .route(
                "/api/accounts/:id",
                get(get_account_handler).delete(delete_account_handler),
            )
            .route("/api/accounts/:id/refresh", post(refresh_account_handler))
            .route("/api/accounts/:id/status", put(update_account_status_handler))
            .route("/api/pools", get(list_pools_handler).post(create_pool_handler))
            .route(
                "/api/pools/:id",
                get(get_pool_handler).delete(delete_pool_handler),
            )
            .route("/api/pools/:id/start", post(start_pool_handler))
            .route("/api/pools/:id/stop", post(stop_pool_handler))
            .route("/api/pools/:id/accounts", post(add_member_handler))
            .route(
                "/api/pools/:id/accounts/:account_id",
                delete(remove_member_handler),
            )
            .route("/api/stats", get(stats_handler))
            .route("/api/stats/accounts", get(account_stats_handler))
            .route("/api/stats/pools", get(pool_stats_handler))
            .route("/api/stats/refresh", post(refresh_all_handler))
            .layer(axum::middleware::from_fn_with_state(
                self.clone(),
                auth_middleware,
            ));

        let public = Router::new().route("/health", get(health_handler));

        Router::new()
            .merge(protected)
            .merge(public)
            .layer(axum::middleware::from_fn(security_headers_middleware))
            .layer(CorsLayer::permissive())
            .layer(TraceLayer::new_for_http())
            .with_state(self)
    }

    pub async fn serve(self) -> anyhow::Result<()> {
        let addr = self.config.bind_addr;
        if self.config.admin_token.is_none() {
            warn!("Admin API is running without authentication; set admin_token in config");
        }

        let limiter = self.rate_limiter.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(60));
            loop {
                ticker.tick().await;
                limiter.prune();
            }
        });

        let router = Arc::new(self).router();
        let listener = tokio::net::TcpListener::bind(addr).await?;
        info!("Admin API listening on {}", addr);

        axum::serve(
            listener,
            router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await?;
        Ok(())
    }
}

fn body<T>(payload: std::result::Result<Json<T>, JsonRejection>) -> Result<T> {
    payload
        .map(|Json(value)| value)
        .map_err(|rejection| MgmtError::Validation(rejection.body_text()))
}

fn deleted(kind: &str, id: &str) -> Json<serde_json::Value> {
    Json(json!({ "message": format!("{} {} deleted", kind, id) }))
}

async fn health_handler() -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

async fn system_settings_handler(State(state): State<Arc<AdminApi>>) -> Json<serde_json::Value> {
    let tools: &ToolConfig = &state.config.tools;
    Json(json!({
        "mount_root": tools.mount_root,
        "rclone_config": tools.config_path,
        "vfs_cache_mode": tools.vfs_cache_mode,
        "refresh_concurrency": state.config.refresh_concurrency,
        "version": env!("CARGO_PKG_VERSION")
    }))
}

async fn list_accounts_handler(State(state): State<Arc<AdminApi>>) -> Result<Json<Vec<Account>>> {
    Ok(Json(state.accounts.list()?))
}

async fn create_account_handler(
    State(state): State<Arc<AdminApi>>,
    payload: std::result::Result<Json<CreateAccountRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<Account>)> {
    let account = state.accounts.create(body(payload)?).await?;
    Ok((StatusCode::CREATED, Json(account)))
}

async fn get_account_handler(
    State(state): State<Arc<AdminApi>>,
    Path(id): Path<String>,
) -> Result<Json<Account>> {
    Ok(Json(state.accounts.get(&id)?))
}

async fn delete_account_handler(
    State(state): State<Arc<AdminApi>>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>> {
    state.accounts.delete(&id).await?;
    Ok(deleted("account", &id))
}

async fn refresh_account_handler(
    State(state): State<Arc<AdminApi>>,
    Path(id): Path<String>,
) -> Result<Json<Account>> {
    Ok(Json(state.quotas.refresh_account(&id).await?))
}

async fn update_account_status_handler(
    State(state): State<Arc<AdminApi>>,
    Path(id): Path<String>,
    payload: std::result::Result<Json<UpdateStatusRequest>, JsonRejection>,
) -> Result<Json<Account>> {
    let req = body(payload)?;
    Ok(Json(state.accounts.update_status(&id, &req.status)?))
}

async fn list_pools_handler(State(state): State<Arc<AdminApi>>) -> Result<Json<Vec<StoragePool>>> {
    Ok(Json(state.pools.list()?))
}

async fn create_pool_handler(
    State(state): State<Arc<AdminApi>>,
    payload: std::result::Result<Json<CreatePoolRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<StoragePool>)> {
    let pool = state.pools.create(body(payload)?)?;
    Ok((StatusCode::CREATED, Json(pool)))
}

async fn get_pool_handler(
    State(state): State<Arc<AdminApi>>,
    Path(id): Path<String>,
) -> Result<Json<StoragePool>> {
    Ok(Json(state.pools.get(&id)?))
}

async fn delete_pool_handler(
    State(state): State<Arc<AdminApi>>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>> {
    state.pools.delete(&id).await?;
    Ok(deleted("pool", &id))
}

async fn start_pool_handler(
    State(state): State<Arc<AdminApi>>,
    Path(id): Path<String>,
) -> Result<Json<StoragePool>> {
    Ok(Json(state.pools.start(&id).await?))
}

async fn stop_pool_handler(
    State(state): State<Arc<AdminApi>>,
    Path(id): Path<String>,
) -> Result<Json<StoragePool>> {
    Ok(Json(state.pools.stop(&id).await?))
}

async fn add_member_handler(
    State(state): State<Arc<AdminApi>>,
    Path(id): Path<String>,
    payload: std::result::Result<Json<AddMemberRequest>, JsonRejection>,
) -> Result<Json<PoolMembership>> {
    let req = body(payload)?;
    Ok(Json(state.pools.add_member(&id, &req.account_id).await?))
}

async fn remove_member_handler(
    State(state): State<Arc<AdminApi>>,
    Path((id, account_id)): Path<(String, String)>,
) -> Result<Json<serde_json::Value>> {
    state.pools.remove_member(&id, &account_id).await?;
    Ok(Json(json!({
        "message": format!("account {} removed from pool {}", account_id, id)
    })))
}

async fn stats_handler(State(state): State<Arc<AdminApi>>) -> Result<Json<UsageSummary>> {
    Ok(Json(state.quotas.summary()?))
}

async fn account_stats_handler(
    State(state): State<Arc<AdminApi>>,
) -> Result<Json<Vec<AccountUsage>>> {
    Ok(Json(state.quotas.account_usage()?))
}

async fn pool_stats_handler(State(state): State<Arc<AdminApi>>) -> Result<Json<Vec<PoolUsage>>> {
    Ok(Json(state.quotas.pool_usage()?))
}

async fn refresh_all_handler(State(state): State<Arc<AdminApi>>) -> Result<Json<RefreshSummary>> {
    Ok(Json(state.quotas.refresh_all().await?))
}

/// Rate-limit key of a request: the peer address, or the first
/// `x-forwarded-for` hop when the API sits behind a trusted proxy.
fn client_key(request: &Request<Body>, trust_forwarded_for: bool) -> String {
    if trust_forwarded_for {
        let forwarded = request
            .headers()
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.split(',').next())
            .map(str::trim)
            .filter(|s| !s.is_empty());
        if let Some(hop) = forwarded {
            return hop.to_string();
        }
    }
    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

async fn auth_middleware(
    State(state): State<Arc<AdminApi>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let Some(token) = state.config.admin_token.as_deref() else {
        return next.run(request).await;
    };

    let client = client_key(&request, state.config.trust_forwarded_for);

    if state.rate_limiter.is_rate_limited(&client) {
        return (
            StatusCode::TOO_MANY_REQUESTS,
            Json(json!({ "error": "too many failed authentication attempts" })),
        )
            .into_response();
    }

    let presented = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));

    match presented {
        Some(presented) if constant_time_eq(presented, token) => {
            state.rate_limiter.record_success(&client);
            next.run(request).await
        }
        _ => {
            if state.rate_limiter.record_failure(&client) {
                warn!("Locking out {} after repeated authentication failures", client);
            }
            (
                StatusCode::UNAUTHORIZED,
                [(header::WWW_AUTHENTICATE, r#"Bearer realm="cloudpool""#)],
                Json(json!({ "error": "unauthorized" })),
            )
                .into_response()
        }
    }
}

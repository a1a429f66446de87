//! Axum HTTP server for the gateway.
//!
//! Routes: health and sign-in (public), advisors, favorites and reports
//! (signed-in users), and the admin console API (admins only).

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use axum::{
    Extension, Json, Router,
    extract::{DefaultBodyLimit, Path, RawQuery, State},
    http::{HeaderValue, StatusCode, header},
    middleware,
    response::IntoResponse,
    routing::{get, post},
};
use tokio::sync::oneshot;
use tower_http::cors::{AllowHeaders, CorsLayer};
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use crate::admin::{CreatedUser, DashboardStats, NewUserRequest, StatusChange};
use crate::advisor::{Advisor, AdvisorDraft, AdvisorId, AdvisorPatch};
use crate::app::App;
use crate::auth::{SignUpRequest, SignedIn};
use crate::backend::{AdvisorPage, AdvisorQuery, OptionColumn, ProfileUpdate, UserProfile};
use crate::config::{GatewayConfig, MAX_PAGE_SIZE};
use crate::email::Notice;
use crate::error::GatewayError;
use crate::gateway::auth::{CurrentUser, require_admin, require_user};
use crate::gateway::types::*;
use crate::gateway::{admin_error, auth_error, backend_error, list_error};
use crate::lists::{ListCollection, ListSummary};

type ApiResult<T> = Result<T, (StatusCode, String)>;

/// Fixed-window rate limiter shared by the sign-in endpoints.
///
/// Resets when the window expires. Global rather than per client.
pub struct RateLimiter {
    /// Requests remaining in the current window.
    remaining: AtomicU64,
    /// Epoch second when the current window started.
    window_start: AtomicU64,
    max_requests: u64,
    window_secs: u64,
}

fn epoch_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

impl RateLimiter {
    pub fn new(max_requests: u64, window_secs: u64) -> Self {
        Self {
            remaining: AtomicU64::new(max_requests),
            window_start: AtomicU64::new(epoch_secs()),
            max_requests,
            window_secs,
        }
    }

    /// Try to consume one request. Returns `false` when rate limited.
    pub fn check(&self) -> bool {
        let now = epoch_secs();
        let window = self.window_start.load(Ordering::Relaxed);
        if now.saturating_sub(window) >= self.window_secs {
            self.window_start.store(now, Ordering::Relaxed);
            self.remaining
                .store(self.max_requests.saturating_sub(1), Ordering::Relaxed);
            return true;
        }
        loop {
            let current = self.remaining.load(Ordering::Relaxed);
            if current == 0 {
                return false;
            }
            if self
                .remaining
                .compare_exchange_weak(current, current - 1, Ordering::Relaxed, Ordering::Relaxed)
                .is_ok()
            {
                return true;
            }
        }
    }
}

/// Shared state for all gateway handlers.
pub struct GatewayState {
    pub app: App,
    /// Guards the password sign-in endpoints.
    pub login_rate_limiter: RateLimiter,
    /// Browser origins allowed by CORS in addition to the bound address.
    pub allowed_origins: Vec<String>,
    /// Shutdown signal sender.
    pub shutdown_tx: tokio::sync::RwLock<Option<oneshot::Sender<()>>>,
    pub startup_time: std::time::Instant,
}

impl GatewayState {
    pub fn new(app: App, config: &GatewayConfig) -> Self {
        Self {
            app,
            login_rate_limiter: RateLimiter::new(
                config.login_rate_limit,
                config.login_rate_window_secs,
            ),
            allowed_origins: Vec::new(),
            shutdown_tx: tokio::sync::RwLock::new(None),
            startup_time: std::time::Instant::now(),
        }
    }

    pub fn with_origin(mut self, origin: &str) -> Self {
        let origin = origin.trim().trim_end_matches('/');
        if !origin.is_empty() {
            self.allowed_origins.push(origin.to_string());
        }
        self
    }

    /// Signal the server to stop. Returns false if it was not running.
    pub async fn shutdown(&self) -> bool {
        match self.shutdown_tx.write().await.take() {
            Some(tx) => tx.send(()).is_ok(),
            None => false,
        }
    }
}

const CONTENT_SECURITY_POLICY: &str = "default-src 'none'; frame-ancestors 'none'";

/// Start the gateway HTTP server.
///
/// Returns the actual bound `SocketAddr` (useful when binding to port 0).
pub async fn start_server(
    addr: SocketAddr,
    state: Arc<GatewayState>,
) -> Result<SocketAddr, GatewayError> {
    let listener =
        tokio::net::TcpListener::bind(addr)
            .await
            .map_err(|e| GatewayError::StartupFailed {
                reason: format!("Failed to bind to {}: {}", addr, e),
            })?;
    let bound_addr = listener
        .local_addr()
        .map_err(|e| GatewayError::StartupFailed {
            reason: format!("Failed to get local addr: {}", e),
        })?;

    // Public routes (no auth)
    let public = Router::new()
        .route("/api/health", get(health_handler))
        .route("/api/auth/login", post(login_handler))
        .route("/api/auth/admin/login", post(admin_login_handler))
        .route("/api/auth/signup", post(signup_handler))
        .route("/api/auth/password-reset", post(password_reset_handler));

    // Signed-in users
    let protected = Router::new()
        .route("/api/auth/logout", post(logout_handler))
        .route("/api/auth/me", get(me_handler))
        // Advisors
        .route("/api/advisors", get(advisors_list_handler))
        .route("/api/advisors/options", get(advisors_options_handler))
        .route("/api/advisors/{id}", get(advisor_detail_handler))
        .route(
            "/api/advisors/{id}/report-issue",
            post(advisor_report_issue_handler),
        )
        // Favorites
        .route(
            "/api/favorites",
            get(favorites_list_handler).post(favorites_create_handler),
        )
        .route(
            "/api/favorites/{name}",
            get(favorite_view_handler).delete(favorite_delete_handler),
        )
        .route("/api/favorites/{name}/rows", post(favorite_add_row_handler))
        .route(
            "/api/favorites/{name}/rows/{index}",
            axum::routing::delete(favorite_remove_row_handler),
        )
        // Reports
        .route(
            "/api/reports",
            get(reports_list_handler).post(reports_create_handler),
        )
        .route(
            "/api/reports/{name}",
            get(report_view_handler).delete(report_delete_handler),
        )
        .route(
            "/api/reports/{name}/rows/{index}",
            axum::routing::delete(report_remove_row_handler),
        )
        .route("/api/reports/{name}/export", get(report_export_handler))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_user));

    // Admin console
    let admin = Router::new()
        .route("/api/admin/dashboard", get(admin_dashboard_handler))
        .route(
            "/api/admin/advisors",
            get(admin_advisors_list_handler).post(admin_advisor_create_handler),
        )
        .route(
            "/api/admin/advisors/{id}",
            get(admin_advisor_get_handler)
                .put(admin_advisor_update_handler)
                .delete(admin_advisor_delete_handler),
        )
        .route(
            "/api/admin/users",
            get(admin_users_list_handler).post(admin_user_create_handler),
        )
        .route(
            "/api/admin/users/{id}",
            axum::routing::put(admin_user_update_handler),
        )
        .route(
            "/api/admin/users/{id}/activate",
            post(admin_user_activate_handler),
        )
        .route(
            "/api/admin/users/{id}/deactivate",
            post(admin_user_deactivate_handler),
        )
        .route(
            "/api/admin/users/{id}/reset-password",
            post(admin_user_reset_password_handler),
        )
        .route_layer(middleware::from_fn_with_state(state.clone(), require_admin));

    let origins: Vec<HeaderValue> = state
        .allowed_origins
        .iter()
        .cloned()
        .chain([
            format!("http://{}:{}", bound_addr.ip(), bound_addr.port()),
            format!("http://localhost:{}", bound_addr.port()),
        ])
        .filter_map(|origin| HeaderValue::from_str(&origin).ok())
        .collect();
    let cors = CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([
            axum::http::Method::GET,
            axum::http::Method::POST,
            axum::http::Method::PUT,
            axum::http::Method::DELETE,
        ])
        .allow_headers(AllowHeaders::list([
            header::CONTENT_TYPE,
            header::AUTHORIZATION,
        ]));

    let app = Router::new()
        .merge(public)
        .merge(protected)
        .merge(admin)
        .layer(DefaultBodyLimit::max(1024 * 1024)) // 1 MB max request body
        .layer(cors)
        .layer(SetResponseHeaderLayer::if_not_present(
            header::CONTENT_SECURITY_POLICY,
            HeaderValue::from_static(CONTENT_SECURITY_POLICY),
        ))
        .layer(SetResponseHeaderLayer::if_not_present(
            header::X_CONTENT_TYPE_OPTIONS,
            HeaderValue::from_static("nosniff"),
        ))
        .layer(SetResponseHeaderLayer::if_not_present(
            header::X_FRAME_OPTIONS,
            HeaderValue::from_static("DENY"),
        ))
        .layer(TraceLayer::new_for_http())
        .with_state(state.clone());

    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    *state.shutdown_tx.write().await = Some(shutdown_tx);

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
                tracing::info!("Gateway shutting down");
            })
            .await
        {
            tracing::error!("Gateway server error: {}", e);
        }
    });

    tracing::info!("Gateway listening on http://{}", bound_addr);
    Ok(bound_addr)
}

fn bad_request(message: String) -> (StatusCode, String) {
    (StatusCode::BAD_REQUEST, message)
}

// --- Health ---

async fn health_handler(State(state): State<Arc<GatewayState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        service: "advisor-connect",
        uptime_secs: state.startup_time.elapsed().as_secs(),
    })
}

// --- Auth ---

fn check_login_rate(state: &GatewayState) -> ApiResult<()> {
    if !state.login_rate_limiter.check() {
        return Err((
            StatusCode::TOO_MANY_REQUESTS,
            "Too many sign-in attempts. Try again shortly.".to_string(),
        ));
    }
    Ok(())
}

fn login_response(signed_in: SignedIn) -> Json<LoginResponse> {
    Json(LoginResponse {
        access_token: signed_in.session.access_token,
        refresh_token: signed_in.session.refresh_token,
        expires_at: signed_in.session.expires_at,
        profile: signed_in.profile,
    })
}

async fn login_handler(
    State(state): State<Arc<GatewayState>>,
    Json(req): Json<LoginRequest>,
) -> ApiResult<Json<LoginResponse>> {
    check_login_rate(&state)?;
    let signed_in = state
        .app
        .auth
        .sign_in(&req.email, &req.password)
        .await
        .map_err(auth_error)?;
    Ok(login_response(signed_in))
}

async fn admin_login_handler(
    State(state): State<Arc<GatewayState>>,
    Json(req): Json<LoginRequest>,
) -> ApiResult<Json<LoginResponse>> {
    check_login_rate(&state)?;
    let signed_in = state
        .app
        .auth
        .admin_sign_in(&req.email, &req.password)
        .await
        .map_err(auth_error)?;
    Ok(login_response(signed_in))
}

async fn signup_handler(
    State(state): State<Arc<GatewayState>>,
    Json(req): Json<SignUpRequest>,
) -> ApiResult<(StatusCode, Json<UserProfile>)> {
    check_login_rate(&state)?;
    let profile = state.app.auth.sign_up(&req).await.map_err(auth_error)?;
    Ok((StatusCode::CREATED, Json(profile)))
}

async fn password_reset_handler(
    State(state): State<Arc<GatewayState>>,
    Json(req): Json<PasswordResetRequest>,
) -> ApiResult<Json<ActionResponse>> {
    state
        .app
        .auth
        .request_password_reset(&req.email)
        .await
        .map_err(auth_error)?;
    Ok(Json(ActionResponse::ok(
        "If an account exists for that address, a reset link has been sent.",
    )))
}

async fn logout_handler(
    State(state): State<Arc<GatewayState>>,
    Extension(user): Extension<CurrentUser>,
) -> ApiResult<Json<ActionResponse>> {
    state
        .app
        .auth
        .sign_out(&user.access_token)
        .await
        .map_err(auth_error)?;
    Ok(Json(ActionResponse::ok("Signed out")))
}

async fn me_handler(Extension(user): Extension<CurrentUser>) -> Json<UserProfile> {
    Json(user.profile)
}

// --- Advisors ---

fn listing_response(page: AdvisorPage, offset: usize, limit: usize) -> AdvisorListResponse {
    let returned = page.rows.len();
    let seen = (offset + returned) as u64;
    let total = page.total.unwrap_or(seen);
    AdvisorListResponse {
        rows: page.rows,
        total,
        offset,
        limit,
        has_more: returned >= limit && seen < total,
        empty: total == 0,
    }
}

fn page_limit(query: &ListingQuery, default: usize) -> usize {
    query.limit.unwrap_or(default).clamp(1, MAX_PAGE_SIZE)
}

async fn advisors_list_handler(
    State(state): State<Arc<GatewayState>>,
    RawQuery(raw): RawQuery,
) -> ApiResult<Json<AdvisorListResponse>> {
    let query = ListingQuery::parse(raw.as_deref()).map_err(bad_request)?;
    let limit = page_limit(&query, state.app.page_size);
    tracing::debug!(
        provinces = query.filter.provinces.len(),
        search = %query.filter.search,
        offset = query.offset,
        limit,
        "Advisor listing"
    );
    let page = state
        .app
        .backend
        .advisors
        .query_advisors(&AdvisorQuery {
            filter: query.filter,
            offset: query.offset,
            limit,
            with_count: true,
        })
        .await
        .map_err(backend_error)?;
    Ok(Json(listing_response(page, query.offset, limit)))
}

async fn advisors_options_handler(
    State(state): State<Arc<GatewayState>>,
) -> ApiResult<Json<AdvisorOptionsResponse>> {
    let store = &state.app.backend.advisors;
    let (provinces, cities, firms, teams) = futures::try_join!(
        store.distinct_values(OptionColumn::Province),
        store.distinct_values(OptionColumn::City),
        store.distinct_values(OptionColumn::Firm),
        store.distinct_values(OptionColumn::Team),
    )
    .map_err(backend_error)?;
    Ok(Json(AdvisorOptionsResponse {
        provinces,
        cities,
        firms,
        teams,
    }))
}

async fn find_advisor(state: &GatewayState, id: &str) -> ApiResult<Advisor> {
    let id = AdvisorId::new(id.trim());
    state
        .app
        .backend
        .advisors
        .get_advisor(&id)
        .await
        .map_err(backend_error)?
        .ok_or_else(|| {
            (
                StatusCode::NOT_FOUND,
                format!("Advisor '{}' not found", id),
            )
        })
}

async fn advisor_detail_handler(
    State(state): State<Arc<GatewayState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<Advisor>> {
    Ok(Json(find_advisor(&state, &id).await?))
}

async fn advisor_report_issue_handler(
    State(state): State<Arc<GatewayState>>,
    Extension(user): Extension<CurrentUser>,
    Path(id): Path<String>,
    Json(req): Json<ReportIssueRequest>,
) -> ApiResult<Json<ActionResponse>> {
    let message = req.message.trim();
    if message.is_empty() {
        return Err(bad_request("Describe the issue before sending".to_string()));
    }
    let advisor = find_advisor(&state, &id).await?;
    let sent = state
        .app
        .notifier
        .notify_admin(Notice::AdvisorIssue {
            reporter: user.reporter(),
            advisor: Box::new(advisor),
            message: message.to_string(),
        })
        .await;
    if !sent {
        return Err((
            StatusCode::SERVICE_UNAVAILABLE,
            "The report could not be delivered. Try again later.".to_string(),
        ));
    }
    Ok(Json(ActionResponse::ok("Thanks, an administrator will review it.")))
}

// --- Favorites and reports (shared) ---

async fn lists_summary(
    state: &GatewayState,
    user: &CurrentUser,
    collection: ListCollection,
) -> ApiResult<Json<ListsResponse>> {
    let lists = state
        .app
        .lists
        .summaries(&user.owner(), collection)
        .await
        .map_err(list_error)?;
    Ok(Json(ListsResponse { lists }))
}

async fn list_view(
    state: &GatewayState,
    user: &CurrentUser,
    collection: ListCollection,
    name: String,
    raw: Option<String>,
) -> ApiResult<Json<ListViewResponse>> {
    let query = ListingQuery::parse(raw.as_deref()).map_err(bad_request)?;
    let page = state
        .app
        .lists
        .view(
            &user.owner(),
            collection,
            &name,
            &query.filter,
            query.page,
            query.per_page.min(MAX_PAGE_SIZE),
        )
        .await
        .map_err(list_error)?;
    Ok(Json(ListViewResponse {
        name: name.trim().to_string(),
        page,
    }))
}

async fn list_delete(
    state: &GatewayState,
    user: &CurrentUser,
    collection: ListCollection,
    name: &str,
) -> ApiResult<Json<ActionResponse>> {
    state
        .app
        .lists
        .delete_list(&user.owner(), collection, name)
        .await
        .map_err(list_error)?;
    Ok(Json(ActionResponse::ok(format!("Deleted '{}'", name.trim()))))
}

async fn list_remove_row(
    state: &GatewayState,
    user: &CurrentUser,
    collection: ListCollection,
    name: &str,
    index: usize,
) -> ApiResult<Json<Advisor>> {
    let removed = state
        .app
        .lists
        .remove_row(&user.owner(), collection, name, index)
        .await
        .map_err(list_error)?;
    Ok(Json(removed))
}

// --- Favorites ---

async fn favorites_list_handler(
    State(state): State<Arc<GatewayState>>,
    Extension(user): Extension<CurrentUser>,
) -> ApiResult<Json<ListsResponse>> {
    lists_summary(&state, &user, ListCollection::Favorites).await
}

async fn favorites_create_handler(
    State(state): State<Arc<GatewayState>>,
    Extension(user): Extension<CurrentUser>,
    Json(req): Json<CreateListRequest>,
) -> ApiResult<(StatusCode, Json<ListSummary>)> {
    let summary = state
        .app
        .lists
        .create_list(&user.owner(), ListCollection::Favorites, &req.name, req.rows)
        .await
        .map_err(list_error)?;
    Ok((StatusCode::CREATED, Json(summary)))
}

async fn favorite_view_handler(
    State(state): State<Arc<GatewayState>>,
    Extension(user): Extension<CurrentUser>,
    Path(name): Path<String>,
    RawQuery(raw): RawQuery,
) -> ApiResult<Json<ListViewResponse>> {
    list_view(&state, &user, ListCollection::Favorites, name, raw).await
}

async fn favorite_delete_handler(
    State(state): State<Arc<GatewayState>>,
    Extension(user): Extension<CurrentUser>,
    Path(name): Path<String>,
) -> ApiResult<Json<ActionResponse>> {
    list_delete(&state, &user, ListCollection::Favorites, &name).await
}

async fn favorite_add_row_handler(
    State(state): State<Arc<GatewayState>>,
    Extension(user): Extension<CurrentUser>,
    Path(name): Path<String>,
    Json(req): Json<AddFavoriteRequest>,
) -> ApiResult<(StatusCode, Json<AddFavoriteResponse>)> {
    let advisor = match (req.advisor_id, req.advisor) {
        (Some(id), _) => find_advisor(&state, &id).await?,
        (None, Some(advisor)) => advisor,
        (None, None) => {
            return Err(bad_request(
                "Provide either 'advisor_id' or 'advisor'".to_string(),
            ));
        }
    };
    let outcome = state
        .app
        .lists
        .add_to_favorites(&user.owner(), &name, advisor)
        .await
        .map_err(list_error)?;
    let status = if outcome.is_duplicate() {
        StatusCode::OK
    } else {
        StatusCode::CREATED
    };
    Ok((
        status,
        Json(AddFavoriteResponse::new(name.trim().to_string(), outcome)),
    ))
}

async fn favorite_remove_row_handler(
    State(state): State<Arc<GatewayState>>,
    Extension(user): Extension<CurrentUser>,
    Path((name, index)): Path<(String, usize)>,
) -> ApiResult<Json<Advisor>> {
    list_remove_row(&state, &user, ListCollection::Favorites, &name, index).await
}

// --- Reports ---

async fn reports_list_handler(
    State(state): State<Arc<GatewayState>>,
    Extension(user): Extension<CurrentUser>,
) -> ApiResult<Json<ListsResponse>> {
    lists_summary(&state, &user, ListCollection::Reports).await
}

async fn reports_create_handler(
    State(state): State<Arc<GatewayState>>,
    Extension(user): Extension<CurrentUser>,
    Json(req): Json<CreateReportRequest>,
) -> ApiResult<(StatusCode, Json<ListSummary>)> {
    let owner = user.owner();
    let reports = &state.app.reports;
    let summary = match req.rows {
        Some(rows) => reports.save_rows_as_report(&owner, &req.name, rows).await,
        None => {
            reports
                .save_filtered_report(&owner, &req.name, &req.filter)
                .await
        }
    }
    .map_err(list_error)?;
    Ok((StatusCode::CREATED, Json(summary)))
}

async fn report_view_handler(
    State(state): State<Arc<GatewayState>>,
    Extension(user): Extension<CurrentUser>,
    Path(name): Path<String>,
    RawQuery(raw): RawQuery,
) -> ApiResult<Json<ListViewResponse>> {
    list_view(&state, &user, ListCollection::Reports, name, raw).await
}

async fn report_delete_handler(
    State(state): State<Arc<GatewayState>>,
    Extension(user): Extension<CurrentUser>,
    Path(name): Path<String>,
) -> ApiResult<Json<ActionResponse>> {
    list_delete(&state, &user, ListCollection::Reports, &name).await
}

async fn report_remove_row_handler(
    State(state): State<Arc<GatewayState>>,
    Extension(user): Extension<CurrentUser>,
    Path((name, index)): Path<(String, usize)>,
) -> ApiResult<Json<Advisor>> {
    list_remove_row(&state, &user, ListCollection::Reports, &name, index).await
}

/// File name for a CSV download: anything outside `[A-Za-z0-9_-]` becomes `_`.
fn csv_file_name(report: &str) -> String {
    let stem: String = report
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if stem.is_empty() {
        "report.csv".to_string()
    } else {
        format!("{stem}.csv")
    }
}

async fn report_export_handler(
    State(state): State<Arc<GatewayState>>,
    Extension(user): Extension<CurrentUser>,
    Path(name): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let csv = state
        .app
        .reports
        .export_csv(&user.owner(), &name)
        .await
        .map_err(list_error)?;
    Ok((
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", csv_file_name(&name)),
            ),
        ],
        csv,
    ))
}

// --- Admin ---

async fn admin_dashboard_handler(
    State(state): State<Arc<GatewayState>>,
) -> ApiResult<Json<DashboardStats>> {
    let stats = state.app.admin.dashboard().await.map_err(admin_error)?;
    Ok(Json(stats))
}

async fn admin_advisors_list_handler(
    State(state): State<Arc<GatewayState>>,
    RawQuery(raw): RawQuery,
) -> ApiResult<Json<AdvisorListResponse>> {
    let query = ListingQuery::parse(raw.as_deref()).map_err(bad_request)?;
    let limit = page_limit(&query, state.app.page_size);
    let page = state
        .app
        .admin
        .list_advisors(query.filter, query.offset, limit)
        .await
        .map_err(admin_error)?;
    Ok(Json(listing_response(page, query.offset, limit)))
}

async fn admin_advisor_create_handler(
    State(state): State<Arc<GatewayState>>,
    Json(draft): Json<AdvisorDraft>,
) -> ApiResult<(StatusCode, Json<Advisor>)> {
    let advisor = state
        .app
        .admin
        .create_advisor(draft)
        .await
        .map_err(admin_error)?;
    Ok((StatusCode::CREATED, Json(advisor)))
}

async fn admin_advisor_get_handler(
    State(state): State<Arc<GatewayState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<Advisor>> {
    let advisor = state
        .app
        .admin
        .get_advisor(&AdvisorId::new(id))
        .await
        .map_err(admin_error)?;
    Ok(Json(advisor))
}

async fn admin_advisor_update_handler(
    State(state): State<Arc<GatewayState>>,
    Path(id): Path<String>,
    Json(patch): Json<AdvisorPatch>,
) -> ApiResult<Json<Advisor>> {
    let advisor = state
        .app
        .admin
        .update_advisor(&AdvisorId::new(id), &patch)
        .await
        .map_err(admin_error)?;
    Ok(Json(advisor))
}

async fn admin_advisor_delete_handler(
    State(state): State<Arc<GatewayState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<ActionResponse>> {
    let id = AdvisorId::new(id);
    state
        .app
        .admin
        .delete_advisor(&id)
        .await
        .map_err(admin_error)?;
    Ok(Json(ActionResponse::ok(format!("Deleted advisor {}", id))))
}

async fn admin_users_list_handler(
    State(state): State<Arc<GatewayState>>,
) -> ApiResult<Json<UserListResponse>> {
    let users = state.app.admin.list_users().await.map_err(admin_error)?;
    Ok(Json(UserListResponse { users }))
}

async fn admin_user_create_handler(
    State(state): State<Arc<GatewayState>>,
    Json(req): Json<NewUserRequest>,
) -> ApiResult<(StatusCode, Json<CreatedUser>)> {
    let created = state
        .app
        .admin
        .create_user(req)
        .await
        .map_err(admin_error)?;
    Ok((StatusCode::CREATED, Json(created)))
}

async fn admin_user_update_handler(
    State(state): State<Arc<GatewayState>>,
    Path(id): Path<Uuid>,
    Json(update): Json<ProfileUpdate>,
) -> ApiResult<Json<UserProfile>> {
    let profile = state
        .app
        .admin
        .update_user(id, update)
        .await
        .map_err(admin_error)?;
    Ok(Json(profile))
}

async fn admin_user_activate_handler(
    State(state): State<Arc<GatewayState>>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<StatusChange>> {
    let change = state
        .app
        .admin
        .set_active(id, true)
        .await
        .map_err(admin_error)?;
    Ok(Json(change))
}

async fn admin_user_deactivate_handler(
    State(state): State<Arc<GatewayState>>,
    Extension(admin): Extension<CurrentUser>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<StatusChange>> {
    if admin.profile.id == id {
        return Err(bad_request(
            "You cannot deactivate your own account".to_string(),
        ));
    }
    let change = state
        .app
        .admin
        .set_active(id, false)
        .await
        .map_err(admin_error)?;
    Ok(Json(change))
}

async fn admin_user_reset_password_handler(
    State(state): State<Arc<GatewayState>>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<PasswordResetResponse>> {
    let email_sent = state
        .app
        .admin
        .reset_password(id)
        .await
        .map_err(admin_error)?;
    Ok(Json(PasswordResetResponse { email_sent }))
}

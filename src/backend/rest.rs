//! Hosted backend over HTTP: PostgREST tables and GoTrue auth.

use std::collections::BTreeSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::{AUTHORIZATION, CONTENT_RANGE, HeaderMap, HeaderValue};
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use uuid::Uuid;

use crate::advisor::filter::FilterState;
use crate::advisor::{Advisor, AdvisorDraft, AdvisorId, AdvisorPatch};
use crate::backend::{
    AdminAuthProvider, AdvisorPage, AdvisorQuery, AdvisorStore, AuthProvider, AuthSession,
    AuthUser, NewProfile, OptionColumn, ProfileStore, ProfileUpdate, UserProfile,
};
use crate::config::BackendConfig;
use crate::error::{AuthError, BackendError};

/// Rows fetched per request when a call has to walk a whole column.
const SCAN_WINDOW: usize = 1000;
/// GoTrue has no permanent ban; a century is close enough.
const BAN_FOREVER: &str = "876000h";
const SEARCH_COLUMNS: [&str; 6] = ["first_name", "last_name", "team_name", "firm", "city", "email"];

pub struct RestBackend {
    client: reqwest::Client,
    base_url: String,
    anon_key: SecretString,
    service_key: Option<SecretString>,
    advisors_table: String,
    profiles_table: String,
}

/// Quote a value for use inside a PostgREST `in.(...)` or `or=(...)` list.
fn quote_value(value: &str) -> String {
    let escaped = value.replace('\\', "\\\\").replace('"', "\\\"");
    format!("\"{escaped}\"")
}

fn in_list(values: &BTreeSet<String>) -> Option<String> {
    let quoted: Vec<String> = values
        .iter()
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
        .map(quote_value)
        .collect();
    (!quoted.is_empty()).then(|| format!("in.({})", quoted.join(",")))
}

/// Filter, order and window parameters for an advisor select.
pub(crate) fn advisor_query_params(
    filter: &FilterState,
    offset: usize,
    limit: usize,
) -> Vec<(String, String)> {
    let filter = filter.normalized();
    let mut params = vec![("select".to_string(), "*".to_string())];

    for (column, values) in [
        ("province", &filter.provinces),
        ("city", &filter.cities),
        ("firm", &filter.firms),
        ("team_name", &filter.teams),
    ] {
        if let Some(clause) = in_list(values) {
            params.push((column.to_string(), clause));
        }
    }

    if let Some(term) = filter.search_term() {
        // `*` is the ilike wildcard in PostgREST; a literal one cannot be matched.
        let term = term.replace('*', "");
        if !term.trim().is_empty() {
            let pattern = quote_value(&format!("*{}*", term.trim()));
            let clauses: Vec<String> = SEARCH_COLUMNS
                .iter()
                .map(|c| format!("{c}.ilike.{pattern}"))
                .collect();
            params.push(("or".to_string(), format!("({})", clauses.join(","))));
        }
    }

    let primary = filter.sort.column();
    let dir = filter.direction.as_str();
    let mut order = vec![format!("{primary}.{dir}")];
    for tiebreak in ["last_name", "first_name"] {
        if tiebreak != primary {
            order.push(format!("{tiebreak}.asc"));
        }
    }
    params.push(("order".to_string(), order.join(",")));
    params.push(("offset".to_string(), offset.to_string()));
    params.push(("limit".to_string(), limit.to_string()));
    params
}

/// Total from a `Content-Range` header such as `0-49/1234` or `*/0`.
pub(crate) fn parse_content_range(value: &str) -> Option<u64> {
    let (_, total) = value.trim().rsplit_once('/')?;
    total.trim().parse().ok()
}

/// Human-readable message from a PostgREST or GoTrue error body.
pub(crate) fn error_message(body: &str) -> String {
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(body) {
        for field in ["message", "msg", "error_description", "error"] {
            if let Some(text) = value.get(field).and_then(|v| v.as_str())
                && !text.trim().is_empty()
            {
                return text.trim().to_string();
            }
        }
    }
    let trimmed = body.trim();
    if trimmed.is_empty() {
        "no response body".to_string()
    } else {
        trimmed.chars().take(300).collect()
    }
}

/// `action_link` from a generate_link response; older servers nest it
/// under `properties`.
pub(crate) fn extract_action_link(value: &serde_json::Value) -> Option<String> {
    value
        .get("action_link")
        .or_else(|| value.get("properties").and_then(|p| p.get("action_link")))
        .and_then(|v| v.as_str())
        .map(str::to_string)
}

async fn failure(resp: Response) -> BackendError {
    let status = resp.status();
    let body = resp.text().await.unwrap_or_default();
    let message = error_message(&body);
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => BackendError::Unauthorized(message),
        _ => BackendError::Status {
            status: status.as_u16(),
            message,
        },
    }
}

async fn expect_success(resp: Response) -> Result<Response, BackendError> {
    if resp.status().is_success() {
        Ok(resp)
    } else {
        Err(failure(resp).await)
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_at: Option<i64>,
    #[serde(default)]
    expires_in: Option<i64>,
    user: AuthUser,
}

impl From<TokenResponse> for AuthSession {
    fn from(t: TokenResponse) -> Self {
        let expires_at = t
            .expires_at
            .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0))
            .or_else(|| {
                t.expires_in
                    .map(|secs| Utc::now() + chrono::Duration::seconds(secs))
            });
        Self {
            access_token: t.access_token,
            refresh_token: t.refresh_token,
            expires_at,
            user: t.user,
        }
    }
}

/// Sign-up returns the user either bare or wrapped with a session.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum SignUpResponse {
    Wrapped { user: AuthUser },
    Bare(AuthUser),
}

#[derive(Debug, Deserialize)]
struct UserListResponse {
    #[serde(default)]
    users: Vec<AuthUser>,
}

fn is_banned_message(message: &str) -> bool {
    message.to_ascii_lowercase().contains("banned")
}

impl RestBackend {
    pub fn new(config: &BackendConfig) -> Result<Self, BackendError> {
        let base_url = config
            .url
            .clone()
            .ok_or_else(|| BackendError::Unsupported("BACKEND_URL is not configured".to_string()))?;
        let anon_key = config.anon_key.clone().ok_or_else(|| {
            BackendError::Unsupported("BACKEND_ANON_KEY is not configured".to_string())
        })?;
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| BackendError::Transport(e.to_string()))?;
        Ok(Self {
            client,
            base_url,
            anon_key,
            service_key: config.service_key.clone(),
            advisors_table: config.advisors_table.clone(),
            profiles_table: config.profiles_table.clone(),
        })
    }

    fn key_headers(key: &SecretString) -> Result<HeaderMap, BackendError> {
        let mut headers = HeaderMap::new();
        let raw = key.expose_secret();
        headers.insert(
            "apikey",
            HeaderValue::from_str(raw)
                .map_err(|e| BackendError::Transport(format!("invalid api key header: {e}")))?,
        );
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {raw}"))
                .map_err(|e| BackendError::Transport(format!("invalid auth header: {e}")))?,
        );
        Ok(headers)
    }

    /// Table access uses the service key when one is configured.
    fn table_request(&self, method: Method, table: &str) -> Result<RequestBuilder, BackendError> {
        let key = self.service_key.as_ref().unwrap_or(&self.anon_key);
        Ok(self
            .client
            .request(method, format!("{}/rest/v1/{}", self.base_url, table))
            .headers(Self::key_headers(key)?))
    }

    fn auth_request(&self, method: Method, path: &str) -> Result<RequestBuilder, BackendError> {
        Ok(self
            .client
            .request(method, format!("{}/auth/v1/{}", self.base_url, path))
            .headers(Self::key_headers(&self.anon_key)?))
    }

    fn admin_request(&self, method: Method, path: &str) -> Result<RequestBuilder, BackendError> {
        let key = self.service_key.as_ref().ok_or_else(|| {
            BackendError::Unauthorized(
                "BACKEND_SERVICE_KEY is required for user administration".to_string(),
            )
        })?;
        Ok(self
            .client
            .request(method, format!("{}/auth/v1/admin/{}", self.base_url, path))
            .headers(Self::key_headers(key)?))
    }

    fn user_token_request(
        &self,
        method: Method,
        path: &str,
        access_token: &str,
    ) -> Result<RequestBuilder, BackendError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            "apikey",
            HeaderValue::from_str(self.anon_key.expose_secret())
                .map_err(|e| BackendError::Transport(format!("invalid api key header: {e}")))?,
        );
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {access_token}"))
                .map_err(|_| BackendError::Unauthorized("malformed access token".to_string()))?,
        );
        Ok(self
            .client
            .request(method, format!("{}/auth/v1/{}", self.base_url, path))
            .headers(headers))
    }

    fn advisor_not_found(id: &AdvisorId) -> BackendError {
        BackendError::NotFound {
            entity: "advisor",
            id: id.to_string(),
        }
    }

    fn profile_not_found(id: Uuid) -> BackendError {
        BackendError::NotFound {
            entity: "profile",
            id: id.to_string(),
        }
    }

    async fn first_row<T: serde::de::DeserializeOwned>(
        resp: Response,
    ) -> Result<Option<T>, BackendError> {
        let rows: Vec<T> = expect_success(resp).await?.json().await?;
        Ok(rows.into_iter().next())
    }
}

#[async_trait]
impl AdvisorStore for RestBackend {
    async fn query_advisors(&self, query: &AdvisorQuery) -> Result<AdvisorPage, BackendError> {
        let params = advisor_query_params(&query.filter, query.offset, query.limit);
        tracing::debug!(table = %self.advisors_table, ?params, "Querying advisors");
        let mut req = self
            .table_request(Method::GET, &self.advisors_table)?
            .query(&params);
        if query.with_count {
            req = req.header("Prefer", "count=exact");
        }
        let resp = expect_success(req.send().await?).await?;
        let total = if query.with_count {
            resp.headers()
                .get(CONTENT_RANGE)
                .and_then(|v| v.to_str().ok())
                .and_then(parse_content_range)
        } else {
            None
        };
        let rows: Vec<Advisor> = resp.json().await?;
        Ok(AdvisorPage { rows, total })
    }

    async fn count_advisors(&self, filter: &FilterState) -> Result<u64, BackendError> {
        let mut params = advisor_query_params(filter, 0, 1);
        params.retain(|(k, _)| k != "order");
        let resp = self
            .table_request(Method::HEAD, &self.advisors_table)?
            .query(&params)
            .header("Prefer", "count=exact")
            .send()
            .await?;
        let resp = expect_success(resp).await?;
        resp.headers()
            .get(CONTENT_RANGE)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_content_range)
            .ok_or_else(|| BackendError::Decode("missing Content-Range total".to_string()))
    }

    async fn distinct_values(&self, column: OptionColumn) -> Result<Vec<String>, BackendError> {
        let name = column.column();
        let mut values = BTreeSet::new();
        let mut offset = 0;
        loop {
            let resp = self
                .table_request(Method::GET, &self.advisors_table)?
                .query(&[
                    ("select", name.to_string()),
                    (name, "not.is.null".to_string()),
                    ("order", format!("{name}.asc")),
                    ("offset", offset.to_string()),
                    ("limit", SCAN_WINDOW.to_string()),
                ])
                .send()
                .await?;
            let rows: Vec<serde_json::Value> = expect_success(resp).await?.json().await?;
            let fetched = rows.len();
            values.extend(
                rows.iter()
                    .filter_map(|row| row.get(name).and_then(|v| v.as_str()))
                    .map(str::trim)
                    .filter(|v| !v.is_empty())
                    .map(str::to_string),
            );
            if fetched < SCAN_WINDOW {
                break;
            }
            offset += fetched;
        }
        Ok(values.into_iter().collect())
    }

    async fn get_advisor(&self, id: &AdvisorId) -> Result<Option<Advisor>, BackendError> {
        let resp = self
            .table_request(Method::GET, &self.advisors_table)?
            .query(&[
                ("select", "*".to_string()),
                ("id", format!("eq.{id}")),
                ("limit", "1".to_string()),
            ])
            .send()
            .await?;
        Self::first_row(resp).await
    }

    async fn insert_advisor(&self, draft: &AdvisorDraft) -> Result<Advisor, BackendError> {
        let resp = self
            .table_request(Method::POST, &self.advisors_table)?
            .header("Prefer", "return=representation")
            .json(draft)
            .send()
            .await?;
        Self::first_row(resp)
            .await?
            .ok_or_else(|| BackendError::Decode("insert returned no rows".to_string()))
    }

    async fn update_advisor(
        &self,
        id: &AdvisorId,
        patch: &AdvisorPatch,
    ) -> Result<Advisor, BackendError> {
        let resp = self
            .table_request(Method::PATCH, &self.advisors_table)?
            .query(&[("id", format!("eq.{id}"))])
            .header("Prefer", "return=representation")
            .json(patch)
            .send()
            .await?;
        Self::first_row(resp)
            .await?
            .ok_or_else(|| Self::advisor_not_found(id))
    }

    async fn delete_advisor(&self, id: &AdvisorId) -> Result<bool, BackendError> {
        let resp = self
            .table_request(Method::DELETE, &self.advisors_table)?
            .query(&[("id", format!("eq.{id}"))])
            .header("Prefer", "return=representation")
            .send()
            .await?;
        let rows: Vec<serde_json::Value> = expect_success(resp).await?.json().await?;
        Ok(!rows.is_empty())
    }
}

#[async_trait]
impl ProfileStore for RestBackend {
    async fn get_profile(&self, id: Uuid) -> Result<Option<UserProfile>, BackendError> {
        let resp = self
            .table_request(Method::GET, &self.profiles_table)?
            .query(&[
                ("select", "*".to_string()),
                ("id", format!("eq.{id}")),
                ("limit", "1".to_string()),
            ])
            .send()
            .await?;
        Self::first_row(resp).await
    }

    async fn list_profiles(&self) -> Result<Vec<UserProfile>, BackendError> {
        let resp = self
            .table_request(Method::GET, &self.profiles_table)?
            .query(&[("select", "*"), ("order", "created_at.desc")])
            .send()
            .await?;
        Ok(expect_success(resp).await?.json().await?)
    }

    async fn insert_profile(&self, profile: &NewProfile) -> Result<UserProfile, BackendError> {
        let resp = self
            .table_request(Method::POST, &self.profiles_table)?
            .header("Prefer", "return=representation")
            .json(profile)
            .send()
            .await?;
        Self::first_row(resp)
            .await?
            .ok_or_else(|| BackendError::Decode("insert returned no rows".to_string()))
    }

    async fn update_profile(
        &self,
        id: Uuid,
        update: &ProfileUpdate,
    ) -> Result<UserProfile, BackendError> {
        let resp = self
            .table_request(Method::PATCH, &self.profiles_table)?
            .query(&[("id", format!("eq.{id}"))])
            .header("Prefer", "return=representation")
            .json(update)
            .send()
            .await?;
        Self::first_row(resp)
            .await?
            .ok_or_else(|| Self::profile_not_found(id))
    }
}

#[async_trait]
impl AuthProvider for RestBackend {
    async fn sign_in(&self, email: &str, password: &str) -> Result<AuthSession, AuthError> {
        let resp = self
            .auth_request(Method::POST, "token")?
            .query(&[("grant_type", "password")])
            .json(&serde_json::json!({ "email": email, "password": password }))
            .send()
            .await
            .map_err(BackendError::from)?;
        if resp.status().is_success() {
            let token: TokenResponse = resp.json().await.map_err(BackendError::from)?;
            return Ok(token.into());
        }
        match failure(resp).await {
            BackendError::Status { message, .. } | BackendError::Unauthorized(message)
                if is_banned_message(&message) =>
            {
                Err(AuthError::AccountDeactivated)
            }
            BackendError::Status { status: 400, .. } => Err(AuthError::InvalidCredentials),
            other => Err(other.into()),
        }
    }

    async fn sign_up(
        &self,
        email: &str,
        password: &str,
        metadata: &serde_json::Value,
    ) -> Result<AuthUser, AuthError> {
        let resp = self
            .auth_request(Method::POST, "signup")?
            .json(&serde_json::json!({ "email": email, "password": password, "data": metadata }))
            .send()
            .await
            .map_err(BackendError::from)?;
        if !resp.status().is_success() {
            return Err(match failure(resp).await {
                BackendError::Status {
                    status: 400 | 422,
                    message,
                } => AuthError::Validation(message),
                other => other.into(),
            });
        }
        let user = match resp.json::<SignUpResponse>().await.map_err(BackendError::from)? {
            SignUpResponse::Wrapped { user } | SignUpResponse::Bare(user) => user,
        };
        Ok(user)
    }

    async fn sign_out(&self, access_token: &str) -> Result<(), BackendError> {
        let resp = self
            .user_token_request(Method::POST, "logout", access_token)?
            .send()
            .await?;
        expect_success(resp).await?;
        Ok(())
    }

    async fn get_user(&self, access_token: &str) -> Result<AuthUser, AuthError> {
        let resp = self
            .user_token_request(Method::GET, "user", access_token)
            .map_err(|_| AuthError::InvalidSession)?
            .send()
            .await
            .map_err(BackendError::from)?;
        match expect_success(resp).await {
            Ok(resp) => Ok(resp.json().await.map_err(BackendError::from)?),
            Err(BackendError::Unauthorized(_)) => Err(AuthError::InvalidSession),
            Err(BackendError::Status { status: 404, .. }) => Err(AuthError::InvalidSession),
            Err(other) => Err(other.into()),
        }
    }
}

#[async_trait]
impl AdminAuthProvider for RestBackend {
    async fn admin_create_user(
        &self,
        email: &str,
        password: &str,
        metadata: &serde_json::Value,
    ) -> Result<AuthUser, BackendError> {
        let resp = self
            .admin_request(Method::POST, "users")?
            .json(&serde_json::json!({
                "email": email,
                "password": password,
                "email_confirm": true,
                "user_metadata": metadata,
            }))
            .send()
            .await?;
        Ok(expect_success(resp).await?.json().await?)
    }

    async fn admin_list_users(&self) -> Result<Vec<AuthUser>, BackendError> {
        let mut users = Vec::new();
        let mut page = 1;
        loop {
            let resp = self
                .admin_request(Method::GET, "users")?
                .query(&[("page", page), ("per_page", SCAN_WINDOW)])
                .send()
                .await?;
            let batch: UserListResponse = expect_success(resp).await?.json().await?;
            let fetched = batch.users.len();
            users.extend(batch.users);
            if fetched < SCAN_WINDOW {
                break;
            }
            page += 1;
        }
        Ok(users)
    }

    async fn admin_set_banned(&self, user_id: Uuid, banned: bool) -> Result<(), BackendError> {
        let duration = if banned { BAN_FOREVER } else { "none" };
        let resp = self
            .admin_request(Method::PUT, &format!("users/{user_id}"))?
            .json(&serde_json::json!({ "ban_duration": duration }))
            .send()
            .await?;
        expect_success(resp).await?;
        Ok(())
    }

    async fn admin_delete_user(&self, user_id: Uuid) -> Result<(), BackendError> {
        let resp = self
            .admin_request(Method::DELETE, &format!("users/{user_id}"))?
            .send()
            .await?;
        expect_success(resp).await?;
        Ok(())
    }

    async fn admin_generate_recovery_link(&self, email: &str) -> Result<String, BackendError> {
        let resp = self
            .admin_request(Method::POST, "generate_link")?
            .json(&serde_json::json!({ "type": "recovery", "email": email }))
            .send()
            .await?;
        let value: serde_json::Value = match expect_success(resp).await {
            Ok(resp) => resp.json().await?,
            Err(BackendError::Status { status: 404, .. }) => {
                return Err(BackendError::NotFound {
                    entity: "user",
                    id: email.to_string(),
                });
            }
            Err(BackendError::Status { message, .. })
                if message.to_ascii_lowercase().contains("not found") =>
            {
                return Err(BackendError::NotFound {
                    entity: "user",
                    id: email.to_string(),
                });
            }
            Err(e) => return Err(e),
        };
        extract_action_link(&value)
            .ok_or_else(|| BackendError::Decode("generate_link response had no action_link".into()))
    }
}

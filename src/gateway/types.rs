//! Request and response DTOs for the JSON API.

use serde::{Deserialize, Serialize};

use crate::advisor::Advisor;
use crate::advisor::filter::{FilterState, PageSlice, SortColumn, SortDirection};
use crate::backend::UserProfile;
use crate::lists::{AddOutcome, ListSummary};

// --- Health ---

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: &'static str,
    pub uptime_secs: u64,
}

// --- Auth ---

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub access_token: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<chrono::DateTime<chrono::Utc>>,
    pub profile: UserProfile,
}

#[derive(Debug, Deserialize)]
pub struct PasswordResetRequest {
    pub email: String,
}

#[derive(Debug, Serialize)]
pub struct ActionResponse {
    pub success: bool,
    pub message: String,
}

impl ActionResponse {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }
}

// --- Advisors ---

#[derive(Debug, Serialize)]
pub struct AdvisorListResponse {
    pub rows: Vec<Advisor>,
    pub total: u64,
    pub offset: usize,
    pub limit: usize,
    pub has_more: bool,
    /// The filter matched nothing. Not an error.
    pub empty: bool,
}

#[derive(Debug, Serialize)]
pub struct AdvisorOptionsResponse {
    pub provinces: Vec<String>,
    pub cities: Vec<String>,
    pub firms: Vec<String>,
    pub teams: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct ReportIssueRequest {
    pub message: String,
}

// --- Favorites / reports ---

#[derive(Debug, Serialize)]
pub struct ListsResponse {
    pub lists: Vec<ListSummary>,
}

#[derive(Debug, Deserialize)]
pub struct CreateListRequest {
    pub name: String,
    #[serde(default)]
    pub rows: Vec<Advisor>,
}

/// Add an advisor to a favorites list, either by backend id or inline.
#[derive(Debug, Deserialize)]
pub struct AddFavoriteRequest {
    #[serde(default)]
    pub advisor_id: Option<String>,
    #[serde(default)]
    pub advisor: Option<Advisor>,
}

#[derive(Debug, Serialize)]
pub struct AddFavoriteResponse {
    pub list: String,
    pub len: usize,
    pub duplicate: bool,
    pub message: String,
}

impl AddFavoriteResponse {
    pub fn new(list: String, outcome: AddOutcome) -> Self {
        let message = if outcome.is_duplicate() {
            format!("This advisor is already in '{list}'")
        } else {
            format!("Added to '{list}'")
        };
        Self {
            list,
            len: outcome.len(),
            duplicate: outcome.is_duplicate(),
            message,
        }
    }
}

/// Save a report from explicit rows, or from the filter when no rows are
/// given.
#[derive(Debug, Deserialize)]
pub struct CreateReportRequest {
    pub name: String,
    #[serde(default)]
    pub filter: FilterState,
    #[serde(default)]
    pub rows: Option<Vec<Advisor>>,
}

#[derive(Debug, Serialize)]
pub struct ListViewResponse {
    pub name: String,
    #[serde(flatten)]
    pub page: PageSlice<Advisor>,
}

// --- Admin ---

#[derive(Debug, Serialize)]
pub struct UserListResponse {
    pub users: Vec<UserProfile>,
}

#[derive(Debug, Serialize)]
pub struct PasswordResetResponse {
    pub email_sent: bool,
}

// --- Query strings ---

pub const DEFAULT_PER_PAGE: usize = 25;

/// Filter, sort and paging parameters from a query string.
///
/// `province`, `city`, `firm` and `team` may repeat. Paging is either
/// `offset`/`limit` (backend-backed listings) or 1-based `page`/`per_page`
/// (stored lists).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListingQuery {
    pub filter: FilterState,
    pub offset: usize,
    pub limit: Option<usize>,
    pub page: usize,
    pub per_page: usize,
}

fn parse_count(key: &str, value: &str) -> Result<usize, String> {
    value
        .trim()
        .parse::<usize>()
        .map_err(|_| format!("'{key}' must be a non-negative integer"))
}

impl ListingQuery {
    pub fn parse(raw: Option<&str>) -> Result<Self, String> {
        let mut query = Self {
            page: 1,
            per_page: DEFAULT_PER_PAGE,
            ..Default::default()
        };
        let Some(raw) = raw else {
            return Ok(query);
        };
        for (key, value) in url::form_urlencoded::parse(raw.as_bytes()) {
            let value = value.into_owned();
            match key.as_ref() {
                "province" => {
                    query.filter.provinces.insert(value);
                }
                "city" => {
                    query.filter.cities.insert(value);
                }
                "firm" => {
                    query.filter.firms.insert(value);
                }
                "team" => {
                    query.filter.teams.insert(value);
                }
                "search" | "q" => query.filter.search = value,
                "sort" => {
                    query.filter.sort = SortColumn::from_param(&value)
                        .ok_or_else(|| format!("unknown sort column '{value}'"))?;
                }
                "dir" | "direction" => {
                    query.filter.direction = SortDirection::from_param(&value)
                        .ok_or_else(|| format!("unknown sort direction '{value}'"))?;
                }
                "offset" => query.offset = parse_count("offset", &value)?,
                "limit" => query.limit = Some(parse_count("limit", &value)?),
                "page" => query.page = parse_count("page", &value)?.max(1),
                "per_page" => query.per_page = parse_count("per_page", &value)?.max(1),
                _ => {}
            }
        }
        query.filter = query.filter.normalized();
        Ok(query)
    }
}

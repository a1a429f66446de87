//! Filter/sort state for advisor queries.

use std::cmp::Ordering;
use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::advisor::Advisor;

/// Sortable advisor columns.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortColumn {
    FirstName,
    #[default]
    LastName,
    TeamName,
    Title,
    Firm,
    Branch,
    City,
    Province,
}

impl SortColumn {
    /// Backend column name.
    pub fn column(self) -> &'static str {
        match self {
            Self::FirstName => "first_name",
            Self::LastName => "last_name",
            Self::TeamName => "team_name",
            Self::Title => "title",
            Self::Firm => "firm",
            Self::Branch => "branch",
            Self::City => "city",
            Self::Province => "province",
        }
    }

    pub fn from_param(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "first_name" | "firstname" => Some(Self::FirstName),
            "last_name" | "lastname" => Some(Self::LastName),
            "team_name" | "team" => Some(Self::TeamName),
            "title" => Some(Self::Title),
            "firm" => Some(Self::Firm),
            "branch" => Some(Self::Branch),
            "city" => Some(Self::City),
            "province" => Some(Self::Province),
            _ => None,
        }
    }

    fn value(self, advisor: &Advisor) -> &str {
        match self {
            Self::FirstName => &advisor.first_name,
            Self::LastName => &advisor.last_name,
            Self::TeamName => &advisor.team_name,
            Self::Title => &advisor.title,
            Self::Firm => &advisor.firm,
            Self::Branch => &advisor.branch,
            Self::City => &advisor.city,
            Self::Province => &advisor.province,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

impl SortDirection {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Asc => "asc",
            Self::Desc => "desc",
        }
    }

    pub fn from_param(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "asc" | "ascending" => Some(Self::Asc),
            "desc" | "descending" => Some(Self::Desc),
            _ => None,
        }
    }
}

/// User filter selections. Empty sets impose no constraint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterState {
    pub provinces: BTreeSet<String>,
    pub cities: BTreeSet<String>,
    pub firms: BTreeSet<String>,
    pub teams: BTreeSet<String>,
    pub search: String,
    pub sort: SortColumn,
    pub direction: SortDirection,
}

/// Stable composite cache key for a filter combination.
///
/// Built from normalized sets rather than concatenated strings, so values
/// containing separators cannot collide.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FilterKey {
    provinces: BTreeSet<String>,
    cities: BTreeSet<String>,
    firms: BTreeSet<String>,
    teams: BTreeSet<String>,
    search: String,
    sort: SortColumn,
    direction: SortDirection,
}

fn clean_set(values: &BTreeSet<String>) -> BTreeSet<String> {
    values
        .iter()
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .collect()
}

fn contains_ci(haystack: &str, needle_lower: &str) -> bool {
    haystack.to_lowercase().contains(needle_lower)
}

impl FilterState {
    /// Trim selections, drop blanks and collapse whitespace in the search term.
    pub fn normalized(&self) -> Self {
        Self {
            provinces: clean_set(&self.provinces),
            cities: clean_set(&self.cities),
            firms: clean_set(&self.firms),
            teams: clean_set(&self.teams),
            search: self.search.split_whitespace().collect::<Vec<_>>().join(" "),
            sort: self.sort,
            direction: self.direction,
        }
    }

    pub fn search_term(&self) -> Option<&str> {
        let term = self.search.trim();
        (!term.is_empty()).then_some(term)
    }

    /// True when no selection or search term constrains the result set.
    pub fn is_unconstrained(&self) -> bool {
        let n = self.normalized();
        n.provinces.is_empty()
            && n.cities.is_empty()
            && n.firms.is_empty()
            && n.teams.is_empty()
            && n.search.is_empty()
    }

    pub fn key(&self) -> FilterKey {
        let n = self.normalized();
        FilterKey {
            provinces: n.provinces,
            cities: n.cities,
            firms: n.firms,
            teams: n.teams,
            search: n.search.to_lowercase(),
            sort: n.sort,
            direction: n.direction,
        }
    }

    /// In-memory equivalent of the backend filter, used for favorites and
    /// report views and by the in-memory backend.
    pub fn matches(&self, advisor: &Advisor) -> bool {
        let set_ok = |set: &BTreeSet<String>, value: &str| {
            set.iter().all(|v| v.trim().is_empty()) || set.iter().any(|v| v.trim() == value)
        };
        if !set_ok(&self.provinces, &advisor.province)
            || !set_ok(&self.cities, &advisor.city)
            || !set_ok(&self.firms, &advisor.firm)
            || !set_ok(&self.teams, &advisor.team_name)
        {
            return false;
        }

        let Some(term) = self.search_term() else {
            return true;
        };
        let needle = term.to_lowercase();
        contains_ci(&advisor.first_name, &needle)
            || contains_ci(&advisor.last_name, &needle)
            || contains_ci(&advisor.team_name, &needle)
            || contains_ci(&advisor.firm, &needle)
            || contains_ci(&advisor.city, &needle)
            || advisor
                .email
                .as_deref()
                .is_some_and(|e| contains_ci(e, &needle))
    }

    /// Order by the sort column, then last and first name, case-insensitively.
    pub fn compare(&self, a: &Advisor, b: &Advisor) -> Ordering {
        let primary = self
            .sort
            .value(a)
            .to_lowercase()
            .cmp(&self.sort.value(b).to_lowercase());
        let primary = match self.direction {
            SortDirection::Asc => primary,
            SortDirection::Desc => primary.reverse(),
        };
        primary
            .then_with(|| a.last_name.to_lowercase().cmp(&b.last_name.to_lowercase()))
            .then_with(|| a.first_name.to_lowercase().cmp(&b.first_name.to_lowercase()))
    }

    pub fn apply(&self, rows: &[Advisor]) -> Vec<Advisor> {
        let mut out: Vec<Advisor> = rows.iter().filter(|a| self.matches(a)).cloned().collect();
        out.sort_by(|a, b| self.compare(a, b));
        out
    }
}

/// One page of an in-memory row set.
#[derive(Debug, Clone, Serialize)]
pub struct PageSlice<T> {
    pub rows: Vec<T>,
    pub total: usize,
    /// 1-based.
    pub page: usize,
    pub per_page: usize,
    pub total_pages: usize,
}

/// Slice `rows` into 1-based pages. Pages past the end are empty.
pub fn paginate<T: Clone>(rows: &[T], page: usize, per_page: usize) -> PageSlice<T> {
    let per_page = per_page.max(1);
    let page = page.max(1);
    let total = rows.len();
    let total_pages = total.div_ceil(per_page);
    let start = (page - 1).saturating_mul(per_page).min(total);
    let end = start.saturating_add(per_page).min(total);
    PageSlice {
        rows: rows[start..end].to_vec(),
        total,
        page,
        per_page,
        total_pages,
    }
}

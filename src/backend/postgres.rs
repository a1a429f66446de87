//! Direct PostgreSQL access to the advisor and profile tables.
//!
//! Used when the application runs next to the database instead of going
//! through the REST gateway. Auth still goes over HTTP.

use async_trait::async_trait;
use deadpool_postgres::{Pool, Runtime};
use secrecy::ExposeSecret;
use tokio_postgres::NoTls;
use tokio_postgres::types::ToSql;
use uuid::Uuid;

use crate::advisor::filter::FilterState;
use crate::advisor::{Advisor, AdvisorDraft, AdvisorId, AdvisorPatch, non_blank};
use crate::backend::{
    AdvisorPage, AdvisorQuery, AdvisorStore, NewProfile, OptionColumn, ProfileRow, ProfileStore,
    ProfileUpdate, UserProfile,
};
use crate::config::BackendConfig;
use crate::error::BackendError;

mod embedded {
    refinery::embed_migrations!("migrations");
}

type SqlParam = Box<dyn ToSql + Sync + Send>;

const ADVISOR_COLUMNS: &str = "id, first_name, last_name, team_name, title, firm, branch, \
                               city, province, email, website_url, linkedin_url";
const PROFILE_COLUMNS: &str =
    "id, email, first_name, last_name, company, user_type, is_active, status, created_at";
const SEARCH_COLUMNS: [&str; 6] = ["first_name", "last_name", "team_name", "firm", "city", "email"];

pub struct PgTables {
    pool: Pool,
    advisors_table: String,
    profiles_table: String,
}

fn param_refs(params: &[SqlParam]) -> Vec<&(dyn ToSql + Sync)> {
    params
        .iter()
        .map(|p| p.as_ref() as &(dyn ToSql + Sync))
        .collect()
}

/// Escape LIKE metacharacters so the term matches literally.
fn like_pattern(term: &str) -> String {
    let escaped = term
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{escaped}%")
}

/// `WHERE` clause and its parameters for a filter. Placeholders start at $1.
fn where_clause(filter: &FilterState) -> (String, Vec<SqlParam>) {
    let filter = filter.normalized();
    let mut conditions = Vec::new();
    let mut params: Vec<SqlParam> = Vec::new();

    for (column, values) in [
        ("province", &filter.provinces),
        ("city", &filter.cities),
        ("firm", &filter.firms),
        ("team_name", &filter.teams),
    ] {
        if !values.is_empty() {
            params.push(Box::new(values.iter().cloned().collect::<Vec<String>>()));
            conditions.push(format!("{column} = ANY(${})", params.len()));
        }
    }

    if let Some(term) = filter.search_term() {
        params.push(Box::new(like_pattern(term)));
        let idx = params.len();
        let ors: Vec<String> = SEARCH_COLUMNS
            .iter()
            .map(|c| format!("{c} ILIKE ${idx}"))
            .collect();
        conditions.push(format!("({})", ors.join(" OR ")));
    }

    if conditions.is_empty() {
        (String::new(), params)
    } else {
        (format!(" WHERE {}", conditions.join(" AND ")), params)
    }
}

fn order_clause(filter: &FilterState) -> String {
    let primary = filter.sort.column();
    let dir = filter.direction.as_str();
    let mut order = vec![format!("lower({primary}) {dir}")];
    for tiebreak in ["last_name", "first_name"] {
        if tiebreak != primary {
            order.push(format!("lower({tiebreak}) asc"));
        }
    }
    format!(" ORDER BY {}", order.join(", "))
}

fn text(row: &tokio_postgres::Row, idx: usize) -> String {
    row.get::<_, Option<String>>(idx).unwrap_or_default()
}

fn row_to_advisor(row: &tokio_postgres::Row) -> Advisor {
    Advisor {
        id: Some(AdvisorId::new(row.get::<_, i64>(0).to_string())),
        first_name: text(row, 1),
        last_name: text(row, 2),
        team_name: text(row, 3),
        title: text(row, 4),
        firm: text(row, 5),
        branch: text(row, 6),
        city: text(row, 7),
        province: text(row, 8),
        email: non_blank(row.get(9)),
        website_url: non_blank(row.get(10)),
        linkedin_url: non_blank(row.get(11)),
    }
}

fn row_to_profile(row: &tokio_postgres::Row) -> UserProfile {
    ProfileRow {
        id: row.get(0),
        email: row.get(1),
        first_name: row.get(2),
        last_name: row.get(3),
        company: row.get(4),
        user_type: row.get(5),
        is_active: row.get(6),
        status: row.get(7),
        created_at: row.get(8),
    }
    .into()
}

fn parse_advisor_id(id: &AdvisorId) -> Result<i64, BackendError> {
    id.as_str().parse().map_err(|_| BackendError::NotFound {
        entity: "advisor",
        id: id.to_string(),
    })
}

fn patch_assignments(patch: &AdvisorPatch) -> Vec<(&'static str, SqlParam)> {
    let mut sets: Vec<(&'static str, SqlParam)> = Vec::new();
    for (column, value) in [
        ("first_name", &patch.first_name),
        ("last_name", &patch.last_name),
        ("team_name", &patch.team_name),
        ("title", &patch.title),
        ("firm", &patch.firm),
        ("branch", &patch.branch),
        ("city", &patch.city),
        ("province", &patch.province),
    ] {
        if let Some(v) = value {
            sets.push((column, Box::new(v.trim().to_string())));
        }
    }
    for (column, value) in [
        ("email", &patch.email),
        ("website_url", &patch.website_url),
        ("linkedin_url", &patch.linkedin_url),
    ] {
        if let Some(v) = value {
            sets.push((column, Box::new(non_blank(Some(v.clone())))));
        }
    }
    sets
}

impl PgTables {
    pub async fn new(config: &BackendConfig) -> Result<Self, BackendError> {
        let url = config
            .database_url
            .as_ref()
            .ok_or_else(|| BackendError::Pool("DATABASE_URL is not configured".to_string()))?;
        let mut cfg = deadpool_postgres::Config::new();
        cfg.url = Some(url.expose_secret().to_string());
        cfg.pool = Some(deadpool_postgres::PoolConfig::new(config.pool_size.max(1)));
        let pool = cfg
            .create_pool(Some(Runtime::Tokio1), NoTls)
            .map_err(|e| BackendError::Pool(e.to_string()))?;
        Ok(Self {
            pool,
            advisors_table: config.advisors_table.clone(),
            profiles_table: config.profiles_table.clone(),
        })
    }

    pub async fn run_migrations(&self) -> Result<(), BackendError> {
        let mut client = self.pool.get().await?;
        let report = embedded::migrations::runner()
            .run_async(&mut **client)
            .await
            .map_err(|e| BackendError::Query(format!("migration failed: {e}")))?;
        for migration in report.applied_migrations() {
            tracing::info!("Applied migration {}", migration);
        }
        Ok(())
    }

    async fn select_profile(&self, id: Uuid) -> Result<Option<UserProfile>, BackendError> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt(
                &format!(
                    "SELECT {PROFILE_COLUMNS} FROM \"{}\" WHERE id = $1",
                    self.profiles_table
                ),
                &[&id],
            )
            .await?;
        Ok(row.as_ref().map(row_to_profile))
    }
}

#[async_trait]
impl AdvisorStore for PgTables {
    async fn query_advisors(&self, query: &AdvisorQuery) -> Result<AdvisorPage, BackendError> {
        let client = self.pool.get().await?;
        let (filter_sql, mut params) = where_clause(&query.filter);

        let total = if query.with_count {
            let row = client
                .query_one(
                    &format!(
                        "SELECT COUNT(*) FROM \"{}\"{filter_sql}",
                        self.advisors_table
                    ),
                    &param_refs(&params),
                )
                .await?;
            Some(row.get::<_, i64>(0).max(0) as u64)
        } else {
            None
        };

        params.push(Box::new(query.offset as i64));
        let offset_idx = params.len();
        params.push(Box::new(query.limit as i64));
        let limit_idx = params.len();
        let sql = format!(
            "SELECT {ADVISOR_COLUMNS} FROM \"{}\"{filter_sql}{} OFFSET ${offset_idx} LIMIT ${limit_idx}",
            self.advisors_table,
            order_clause(&query.filter),
        );
        tracing::debug!(%sql, "Querying advisors");
        let rows = client.query(&sql, &param_refs(&params)).await?;
        Ok(AdvisorPage {
            rows: rows.iter().map(row_to_advisor).collect(),
            total,
        })
    }

    async fn count_advisors(&self, filter: &FilterState) -> Result<u64, BackendError> {
        let client = self.pool.get().await?;
        let (filter_sql, params) = where_clause(filter);
        let row = client
            .query_one(
                &format!(
                    "SELECT COUNT(*) FROM \"{}\"{filter_sql}",
                    self.advisors_table
                ),
                &param_refs(&params),
            )
            .await?;
        Ok(row.get::<_, i64>(0).max(0) as u64)
    }

    async fn distinct_values(&self, column: OptionColumn) -> Result<Vec<String>, BackendError> {
        let client = self.pool.get().await?;
        let name = column.column();
        let rows = client
            .query(
                &format!(
                    "SELECT DISTINCT btrim({name}) AS v FROM \"{}\" \
                     WHERE {name} IS NOT NULL AND btrim({name}) <> '' ORDER BY v",
                    self.advisors_table
                ),
                &[],
            )
            .await?;
        Ok(rows.iter().map(|r| r.get::<_, String>(0)).collect())
    }

    async fn get_advisor(&self, id: &AdvisorId) -> Result<Option<Advisor>, BackendError> {
        let Ok(key) = id.as_str().parse::<i64>() else {
            return Ok(None);
        };
        let client = self.pool.get().await?;
        let row = client
            .query_opt(
                &format!(
                    "SELECT {ADVISOR_COLUMNS} FROM \"{}\" WHERE id = $1",
                    self.advisors_table
                ),
                &[&key],
            )
            .await?;
        Ok(row.as_ref().map(row_to_advisor))
    }

    async fn insert_advisor(&self, draft: &AdvisorDraft) -> Result<Advisor, BackendError> {
        let d = draft.clone().normalized();
        let client = self.pool.get().await?;
        let row = client
            .query_one(
                &format!(
                    "INSERT INTO \"{}\" (first_name, last_name, team_name, title, firm, branch, \
                     city, province, email, website_url, linkedin_url) \
                     VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11) \
                     RETURNING {ADVISOR_COLUMNS}",
                    self.advisors_table
                ),
                &[
                    &d.first_name,
                    &d.last_name,
                    &d.team_name,
                    &d.title,
                    &d.firm,
                    &d.branch,
                    &d.city,
                    &d.province,
                    &d.email,
                    &d.website_url,
                    &d.linkedin_url,
                ],
            )
            .await?;
        Ok(row_to_advisor(&row))
    }

    async fn update_advisor(
        &self,
        id: &AdvisorId,
        patch: &AdvisorPatch,
    ) -> Result<Advisor, BackendError> {
        let key = parse_advisor_id(id)?;
        let sets = patch_assignments(patch);
        if sets.is_empty() {
            return self
                .get_advisor(id)
                .await?
                .ok_or_else(|| BackendError::NotFound {
                    entity: "advisor",
                    id: id.to_string(),
                });
        }

        let mut clauses = Vec::with_capacity(sets.len());
        let mut params: Vec<SqlParam> = Vec::with_capacity(sets.len() + 1);
        for (column, value) in sets {
            params.push(value);
            clauses.push(format!("{column} = ${}", params.len()));
        }
        params.push(Box::new(key));
        let sql = format!(
            "UPDATE \"{}\" SET {} WHERE id = ${} RETURNING {ADVISOR_COLUMNS}",
            self.advisors_table,
            clauses.join(", "),
            params.len()
        );
        let client = self.pool.get().await?;
        let row = client.query_opt(&sql, &param_refs(&params)).await?;
        row.as_ref()
            .map(row_to_advisor)
            .ok_or_else(|| BackendError::NotFound {
                entity: "advisor",
                id: id.to_string(),
            })
    }

    async fn delete_advisor(&self, id: &AdvisorId) -> Result<bool, BackendError> {
        let Ok(key) = id.as_str().parse::<i64>() else {
            return Ok(false);
        };
        let client = self.pool.get().await?;
        let affected = client
            .execute(
                &format!("DELETE FROM \"{}\" WHERE id = $1", self.advisors_table),
                &[&key],
            )
            .await?;
        Ok(affected > 0)
    }
}

#[async_trait]
impl ProfileStore for PgTables {
    async fn get_profile(&self, id: Uuid) -> Result<Option<UserProfile>, BackendError> {
        self.select_profile(id).await
    }

    async fn list_profiles(&self) -> Result<Vec<UserProfile>, BackendError> {
        let client = self.pool.get().await?;
        let rows = client
            .query(
                &format!(
                    "SELECT {PROFILE_COLUMNS} FROM \"{}\" ORDER BY created_at DESC NULLS LAST",
                    self.profiles_table
                ),
                &[],
            )
            .await?;
        Ok(rows.iter().map(row_to_profile).collect())
    }

    async fn insert_profile(&self, profile: &NewProfile) -> Result<UserProfile, BackendError> {
        let client = self.pool.get().await?;
        let row = client
            .query_one(
                &format!(
                    "INSERT INTO \"{}\" (id, email, first_name, last_name, company, user_type, is_active) \
                     VALUES ($1, $2, $3, $4, $5, $6, $7) RETURNING {PROFILE_COLUMNS}",
                    self.profiles_table
                ),
                &[
                    &profile.id,
                    &profile.email,
                    &profile.first_name,
                    &profile.last_name,
                    &profile.company,
                    &profile.user_type.as_str(),
                    &profile.is_active,
                ],
            )
            .await?;
        Ok(row_to_profile(&row))
    }

    async fn update_profile(
        &self,
        id: Uuid,
        update: &ProfileUpdate,
    ) -> Result<UserProfile, BackendError> {
        let mut clauses = Vec::new();
        let mut params: Vec<SqlParam> = Vec::new();
        for (column, value) in [
            ("first_name", &update.first_name),
            ("last_name", &update.last_name),
            ("company", &update.company),
        ] {
            if let Some(v) = value {
                params.push(Box::new(v.trim().to_string()));
                clauses.push(format!("{column} = ${}", params.len()));
            }
        }
        if let Some(user_type) = update.user_type {
            params.push(Box::new(user_type.as_str().to_string()));
            clauses.push(format!("user_type = ${}", params.len()));
        }
        if let Some(active) = update.is_active {
            params.push(Box::new(active));
            clauses.push(format!("is_active = ${}", params.len()));
        }
        if clauses.is_empty() {
            return self
                .select_profile(id)
                .await?
                .ok_or_else(|| BackendError::NotFound {
                    entity: "profile",
                    id: id.to_string(),
                });
        }

        params.push(Box::new(id));
        let sql = format!(
            "UPDATE \"{}\" SET {} WHERE id = ${} RETURNING {PROFILE_COLUMNS}",
            self.profiles_table,
            clauses.join(", "),
            params.len()
        );
        let client = self.pool.get().await?;
        let row = client.query_opt(&sql, &param_refs(&params)).await?;
        row.as_ref()
            .map(row_to_profile)
            .ok_or_else(|| BackendError::NotFound {
                entity: "profile",
                id: id.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use super::*;
    use crate::advisor::filter::{SortColumn, SortDirection};

    #[test]
    fn where_clause_numbers_placeholders_in_order() {
        let filter = FilterState {
            provinces: BTreeSet::from(["Ontario".to_string()]),
            teams: BTreeSet::from(["North".to_string()]),
            search: "smith".to_string(),
            ..Default::default()
        };
        let (sql, params) = where_clause(&filter);
        assert_eq!(params.len(), 3);
        assert!(sql.starts_with(" WHERE province = ANY($1) AND team_name = ANY($2) AND ("));
        assert!(sql.contains("email ILIKE $3"));
    }

    #[test]
    fn unconstrained_filter_has_no_where() {
        let (sql, params) = where_clause(&FilterState::default());
        assert!(sql.is_empty());
        assert!(params.is_empty());
    }

    #[test]
    fn like_metacharacters_are_escaped() {
        assert_eq!(like_pattern("50%_off"), "%50\\%\\_off%");
    }

    #[test]
    fn order_clause_is_case_insensitive_with_tiebreaks() {
        let filter = FilterState {
            sort: SortColumn::Firm,
            direction: SortDirection::Desc,
            ..Default::default()
        };
        assert_eq!(
            order_clause(&filter),
            " ORDER BY lower(firm) desc, lower(last_name) asc, lower(first_name) asc"
        );
    }

    #[test]
    fn patch_blank_optional_becomes_null() {
        let patch = AdvisorPatch {
            city: Some(" Ottawa ".to_string()),
            email: Some("".to_string()),
            ..Default::default()
        };
        let sets = patch_assignments(&patch);
        let columns: Vec<&str> = sets.iter().map(|(c, _)| *c).collect();
        assert_eq!(columns, vec!["city", "email"]);
    }
}

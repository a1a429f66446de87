//! Process-local backend.
//!
//! Holds advisors, profiles, accounts and sessions in memory. Used by the
//! test suite and for local demos (`BACKEND_KIND=memory`, optionally seeded
//! from a JSON array of advisor rows).

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use crate::advisor::filter::FilterState;
use crate::advisor::{Advisor, AdvisorDraft, AdvisorId, AdvisorPatch};
use crate::backend::{
    AdminAuthProvider, AdvisorPage, AdvisorQuery, AdvisorStore, AuthProvider, AuthSession,
    AuthUser, NewProfile, OptionColumn, ProfileStore, ProfileUpdate, UserProfile, UserType,
};
use crate::error::{AuthError, BackendError};

#[derive(Debug, Clone)]
struct Account {
    id: Uuid,
    email: String,
    password: String,
    banned: bool,
}

#[derive(Default)]
pub struct MemoryBackend {
    advisors: RwLock<Vec<Advisor>>,
    profiles: RwLock<HashMap<Uuid, UserProfile>>,
    /// Keyed by lowercased email.
    accounts: RwLock<HashMap<String, Account>>,
    /// Access token -> user id.
    sessions: RwLock<HashMap<String, Uuid>>,
    queries: RwLock<Vec<AdvisorQuery>>,
    next_id: AtomicU64,
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|e| e.into_inner())
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|e| e.into_inner())
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            ..Default::default()
        }
    }

    /// Append advisors, assigning ids to rows without one.
    pub fn seed_advisors(&self, rows: impl IntoIterator<Item = Advisor>) {
        let mut advisors = write(&self.advisors);
        for mut row in rows {
            match row.id {
                Some(ref id) => {
                    if let Ok(n) = id.as_str().parse::<u64>() {
                        self.next_id.fetch_max(n + 1, Ordering::AcqRel);
                    }
                }
                None => row.id = Some(self.allocate_id()),
            }
            advisors.push(row);
        }
    }

    /// Load a JSON array of advisor rows. Returns how many were loaded.
    pub async fn seed_from_file(&self, path: &str) -> Result<usize, BackendError> {
        let raw = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| BackendError::Transport(format!("failed to read {path}: {e}")))?;
        let rows: Vec<Advisor> =
            serde_json::from_str(&raw).map_err(|e| BackendError::Decode(e.to_string()))?;
        let count = rows.len();
        self.seed_advisors(rows);
        Ok(count)
    }

    /// Register an account and its profile in one step.
    pub fn add_account(
        &self,
        email: &str,
        password: &str,
        user_type: UserType,
        is_active: bool,
    ) -> UserProfile {
        let id = Uuid::new_v4();
        let email = email.trim().to_ascii_lowercase();
        write(&self.accounts).insert(
            email.clone(),
            Account {
                id,
                email: email.clone(),
                password: password.to_string(),
                banned: !is_active,
            },
        );
        let local = email.split('@').next().unwrap_or_default().to_string();
        let profile = NewProfile {
            id,
            email,
            first_name: local,
            last_name: String::new(),
            company: String::new(),
            user_type,
            is_active,
        }
        .into_profile(Some(Utc::now()));
        write(&self.profiles).insert(id, profile.clone());
        profile
    }

    /// Every advisor query issued so far, oldest first.
    pub fn recorded_queries(&self) -> Vec<AdvisorQuery> {
        read(&self.queries).clone()
    }

    pub fn is_banned(&self, user_id: Uuid) -> bool {
        read(&self.accounts)
            .values()
            .any(|a| a.id == user_id && a.banned)
    }

    fn allocate_id(&self) -> AdvisorId {
        AdvisorId::new(self.next_id.fetch_add(1, Ordering::AcqRel).to_string())
    }

    fn open_session(&self, account: &Account) -> AuthSession {
        let token = Uuid::new_v4().simple().to_string();
        write(&self.sessions).insert(token.clone(), account.id);
        AuthSession {
            access_token: token,
            refresh_token: Some(Uuid::new_v4().simple().to_string()),
            expires_at: Some(Utc::now() + chrono::Duration::hours(1)),
            user: AuthUser {
                id: account.id,
                email: Some(account.email.clone()),
            },
        }
    }

    fn not_found(id: &AdvisorId) -> BackendError {
        BackendError::NotFound {
            entity: "advisor",
            id: id.to_string(),
        }
    }
}

#[async_trait]
impl AdvisorStore for MemoryBackend {
    async fn query_advisors(&self, query: &AdvisorQuery) -> Result<AdvisorPage, BackendError> {
        write(&self.queries).push(query.clone());
        let matched = query.filter.apply(&read(&self.advisors));
        let total = matched.len() as u64;
        let rows = matched
            .into_iter()
            .skip(query.offset)
            .take(query.limit)
            .collect();
        Ok(AdvisorPage {
            rows,
            total: query.with_count.then_some(total),
        })
    }

    async fn count_advisors(&self, filter: &FilterState) -> Result<u64, BackendError> {
        Ok(read(&self.advisors)
            .iter()
            .filter(|a| filter.matches(a))
            .count() as u64)
    }

    async fn distinct_values(&self, column: OptionColumn) -> Result<Vec<String>, BackendError> {
        let values: BTreeSet<String> = read(&self.advisors)
            .iter()
            .map(|a| column.value(a).trim())
            .filter(|v| !v.is_empty())
            .map(str::to_string)
            .collect();
        Ok(values.into_iter().collect())
    }

    async fn get_advisor(&self, id: &AdvisorId) -> Result<Option<Advisor>, BackendError> {
        Ok(read(&self.advisors)
            .iter()
            .find(|a| a.id.as_ref() == Some(id))
            .cloned())
    }

    async fn insert_advisor(&self, draft: &AdvisorDraft) -> Result<Advisor, BackendError> {
        let advisor = draft.clone().normalized().into_advisor(Some(self.allocate_id()));
        write(&self.advisors).push(advisor.clone());
        Ok(advisor)
    }

    async fn update_advisor(
        &self,
        id: &AdvisorId,
        patch: &AdvisorPatch,
    ) -> Result<Advisor, BackendError> {
        let mut advisors = write(&self.advisors);
        let advisor = advisors
            .iter_mut()
            .find(|a| a.id.as_ref() == Some(id))
            .ok_or_else(|| Self::not_found(id))?;
        patch.apply_to(advisor);
        Ok(advisor.clone())
    }

    async fn delete_advisor(&self, id: &AdvisorId) -> Result<bool, BackendError> {
        let mut advisors = write(&self.advisors);
        let before = advisors.len();
        advisors.retain(|a| a.id.as_ref() != Some(id));
        Ok(advisors.len() != before)
    }
}

#[async_trait]
impl ProfileStore for MemoryBackend {
    async fn get_profile(&self, id: Uuid) -> Result<Option<UserProfile>, BackendError> {
        Ok(read(&self.profiles).get(&id).cloned())
    }

    async fn list_profiles(&self) -> Result<Vec<UserProfile>, BackendError> {
        let mut profiles: Vec<UserProfile> = read(&self.profiles).values().cloned().collect();
        profiles.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.email.cmp(&b.email)));
        Ok(profiles)
    }

    async fn insert_profile(&self, profile: &NewProfile) -> Result<UserProfile, BackendError> {
        let mut profiles = write(&self.profiles);
        if profiles.contains_key(&profile.id) {
            return Err(BackendError::Status {
                status: 409,
                message: format!("profile {} already exists", profile.id),
            });
        }
        let stored = profile.clone().into_profile(Some(Utc::now()));
        profiles.insert(profile.id, stored.clone());
        Ok(stored)
    }

    async fn update_profile(
        &self,
        id: Uuid,
        update: &ProfileUpdate,
    ) -> Result<UserProfile, BackendError> {
        let mut profiles = write(&self.profiles);
        let profile = profiles.get_mut(&id).ok_or_else(|| BackendError::NotFound {
            entity: "profile",
            id: id.to_string(),
        })?;
        update.apply_to(profile);
        Ok(profile.clone())
    }
}

#[async_trait]
impl AuthProvider for MemoryBackend {
    async fn sign_in(&self, email: &str, password: &str) -> Result<AuthSession, AuthError> {
        let account = read(&self.accounts)
            .get(&email.trim().to_ascii_lowercase())
            .cloned()
            .ok_or(AuthError::InvalidCredentials)?;
        if account.password != password {
            return Err(AuthError::InvalidCredentials);
        }
        if account.banned {
            return Err(AuthError::AccountDeactivated);
        }
        Ok(self.open_session(&account))
    }

    async fn sign_up(
        &self,
        email: &str,
        password: &str,
        _metadata: &serde_json::Value,
    ) -> Result<AuthUser, AuthError> {
        let key = email.trim().to_ascii_lowercase();
        let mut accounts = write(&self.accounts);
        if accounts.contains_key(&key) {
            return Err(AuthError::Validation("User already registered".to_string()));
        }
        let id = Uuid::new_v4();
        accounts.insert(
            key.clone(),
            Account {
                id,
                email: key.clone(),
                password: password.to_string(),
                banned: false,
            },
        );
        Ok(AuthUser {
            id,
            email: Some(key),
        })
    }

    async fn sign_out(&self, access_token: &str) -> Result<(), BackendError> {
        write(&self.sessions).remove(access_token);
        Ok(())
    }

    async fn get_user(&self, access_token: &str) -> Result<AuthUser, AuthError> {
        let id = read(&self.sessions)
            .get(access_token)
            .copied()
            .ok_or(AuthError::InvalidSession)?;
        let email = read(&self.accounts)
            .values()
            .find(|a| a.id == id)
            .map(|a| a.email.clone());
        Ok(AuthUser { id, email })
    }
}

#[async_trait]
impl AdminAuthProvider for MemoryBackend {
    async fn admin_create_user(
        &self,
        email: &str,
        password: &str,
        metadata: &serde_json::Value,
    ) -> Result<AuthUser, BackendError> {
        self.sign_up(email, password, metadata)
            .await
            .map_err(|e| BackendError::Status {
                status: 422,
                message: e.to_string(),
            })
    }

    async fn admin_list_users(&self) -> Result<Vec<AuthUser>, BackendError> {
        Ok(read(&self.accounts)
            .values()
            .map(|a| AuthUser {
                id: a.id,
                email: Some(a.email.clone()),
            })
            .collect())
    }

    async fn admin_set_banned(&self, user_id: Uuid, banned: bool) -> Result<(), BackendError> {
        let mut accounts = write(&self.accounts);
        let account = accounts
            .values_mut()
            .find(|a| a.id == user_id)
            .ok_or_else(|| BackendError::NotFound {
                entity: "user",
                id: user_id.to_string(),
            })?;
        account.banned = banned;
        if banned {
            write(&self.sessions).retain(|_, id| *id != user_id);
        }
        Ok(())
    }

    async fn admin_delete_user(&self, user_id: Uuid) -> Result<(), BackendError> {
        write(&self.accounts).retain(|_, a| a.id != user_id);
        write(&self.sessions).retain(|_, id| *id != user_id);
        Ok(())
    }

    async fn admin_generate_recovery_link(&self, email: &str) -> Result<String, BackendError> {
        let key = email.trim().to_ascii_lowercase();
        let account = read(&self.accounts)
            .get(&key)
            .cloned()
            .ok_or_else(|| BackendError::NotFound {
                entity: "user",
                id: key.clone(),
            })?;
        Ok(format!(
            "memory://recover?user={}&token={}",
            account.id,
            Uuid::new_v4().simple()
        ))
    }
}

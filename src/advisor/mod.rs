//! Advisor records.
//!
//! [`Advisor`] is the single typed schema used everywhere in the crate. The
//! backend speaks snake_case columns, which is the default serde shape of
//! `Advisor`. Persisted favorites/report blobs use display-capitalized keys;
//! [`AdvisorSnapshot`] is the adapter for that format and the only other
//! place field names are spelled out.

pub mod cache;
pub mod feed;
pub mod filter;

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};

/// Backend identifier. Tables may use numeric or text keys; both are held as
/// text.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct AdvisorId(String);

impl AdvisorId {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AdvisorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for AdvisorId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum RawId {
            Int(i64),
            Text(String),
        }

        Ok(match RawId::deserialize(deserializer)? {
            RawId::Int(n) => Self(n.to_string()),
            RawId::Text(s) => Self(s),
        })
    }
}

/// Null-tolerant string field: `null` and missing both become `""`.
fn de_text<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?
        .map(|s| s.trim().to_string())
        .unwrap_or_default())
}

/// Optional string field where blank means absent.
fn de_opt_text<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(non_blank(Option::<String>::deserialize(deserializer)?))
}

pub(crate) fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// A financial-advisor contact record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Advisor {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<AdvisorId>,
    #[serde(default, deserialize_with = "de_text")]
    pub first_name: String,
    #[serde(default, deserialize_with = "de_text")]
    pub last_name: String,
    #[serde(default, deserialize_with = "de_text")]
    pub team_name: String,
    #[serde(default, deserialize_with = "de_text")]
    pub title: String,
    #[serde(default, deserialize_with = "de_text")]
    pub firm: String,
    #[serde(default, deserialize_with = "de_text")]
    pub branch: String,
    #[serde(default, deserialize_with = "de_text")]
    pub city: String,
    #[serde(default, deserialize_with = "de_text")]
    pub province: String,
    #[serde(default, deserialize_with = "de_opt_text")]
    pub email: Option<String>,
    #[serde(default, deserialize_with = "de_opt_text")]
    pub website_url: Option<String>,
    #[serde(default, deserialize_with = "de_opt_text")]
    pub linkedin_url: Option<String>,
}

/// Identity used to keep an advisor from appearing twice in a named list.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DedupKey {
    /// Lowercased, trimmed email.
    Email(String),
    /// Whole-record equality when no email is present.
    Record(Box<Advisor>),
}

impl Advisor {
    pub fn full_name(&self) -> String {
        match (self.first_name.is_empty(), self.last_name.is_empty()) {
            (false, false) => format!("{} {}", self.first_name, self.last_name),
            (false, true) => self.first_name.clone(),
            (true, false) => self.last_name.clone(),
            (true, true) => String::new(),
        }
    }

    pub fn normalized_email(&self) -> Option<String> {
        self.email
            .as_deref()
            .map(|e| e.trim().to_ascii_lowercase())
            .filter(|e| !e.is_empty())
    }

    pub fn dedup_key(&self) -> DedupKey {
        match self.normalized_email() {
            Some(email) => DedupKey::Email(email),
            None => DedupKey::Record(Box::new(self.clone())),
        }
    }
}

/// Fields accepted when creating an advisor.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AdvisorDraft {
    pub first_name: String,
    pub last_name: String,
    #[serde(default)]
    pub team_name: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub firm: String,
    #[serde(default)]
    pub branch: String,
    #[serde(default)]
    pub city: String,
    #[serde(default)]
    pub province: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub website_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub linkedin_url: Option<String>,
}

impl AdvisorDraft {
    /// Trim every field and drop blank optional values.
    pub fn normalized(self) -> Self {
        Self {
            first_name: self.first_name.trim().to_string(),
            last_name: self.last_name.trim().to_string(),
            team_name: self.team_name.trim().to_string(),
            title: self.title.trim().to_string(),
            firm: self.firm.trim().to_string(),
            branch: self.branch.trim().to_string(),
            city: self.city.trim().to_string(),
            province: self.province.trim().to_string(),
            email: non_blank(self.email),
            website_url: non_blank(self.website_url),
            linkedin_url: non_blank(self.linkedin_url),
        }
    }

    pub fn into_advisor(self, id: Option<AdvisorId>) -> Advisor {
        Advisor {
            id,
            first_name: self.first_name,
            last_name: self.last_name,
            team_name: self.team_name,
            title: self.title,
            firm: self.firm,
            branch: self.branch,
            city: self.city,
            province: self.province,
            email: self.email,
            website_url: self.website_url,
            linkedin_url: self.linkedin_url,
        }
    }
}

/// Partial update; `None` leaves a column untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AdvisorPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub team_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub firm: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub province: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub website_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub linkedin_url: Option<String>,
}

impl AdvisorPatch {
    pub fn is_empty(&self) -> bool {
        self.first_name.is_none()
            && self.last_name.is_none()
            && self.team_name.is_none()
            && self.title.is_none()
            && self.firm.is_none()
            && self.branch.is_none()
            && self.city.is_none()
            && self.province.is_none()
            && self.email.is_none()
            && self.website_url.is_none()
            && self.linkedin_url.is_none()
    }

    /// Apply to an in-memory record. Blank optional values clear the field.
    pub fn apply_to(&self, advisor: &mut Advisor) {
        fn set(target: &mut String, value: &Option<String>) {
            if let Some(v) = value {
                *target = v.trim().to_string();
            }
        }
        fn set_opt(target: &mut Option<String>, value: &Option<String>) {
            if let Some(v) = value {
                *target = non_blank(Some(v.clone()));
            }
        }

        set(&mut advisor.first_name, &self.first_name);
        set(&mut advisor.last_name, &self.last_name);
        set(&mut advisor.team_name, &self.team_name);
        set(&mut advisor.title, &self.title);
        set(&mut advisor.firm, &self.firm);
        set(&mut advisor.branch, &self.branch);
        set(&mut advisor.city, &self.city);
        set(&mut advisor.province, &self.province);
        set_opt(&mut advisor.email, &self.email);
        set_opt(&mut advisor.website_url, &self.website_url);
        set_opt(&mut advisor.linkedin_url, &self.linkedin_url);
    }
}

/// Persisted form of an advisor inside a favorites/report blob.
///
/// Written with display keys; reads also accept the backend spellings so
/// rows saved straight from query results load correctly.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AdvisorSnapshot {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<AdvisorId>,
    #[serde(rename = "First Name", alias = "first_name", default, deserialize_with = "de_text")]
    pub first_name: String,
    #[serde(rename = "Last Name", alias = "last_name", default, deserialize_with = "de_text")]
    pub last_name: String,
    #[serde(rename = "Team Name", alias = "team_name", default, deserialize_with = "de_text")]
    pub team_name: String,
    #[serde(rename = "Title", alias = "title", default, deserialize_with = "de_text")]
    pub title: String,
    #[serde(rename = "Firm", alias = "firm", default, deserialize_with = "de_text")]
    pub firm: String,
    #[serde(rename = "Branch", alias = "branch", default, deserialize_with = "de_text")]
    pub branch: String,
    #[serde(rename = "City", alias = "city", default, deserialize_with = "de_text")]
    pub city: String,
    #[serde(rename = "Province", alias = "province", default, deserialize_with = "de_text")]
    pub province: String,
    #[serde(rename = "Email", alias = "email", default, deserialize_with = "de_opt_text")]
    pub email: Option<String>,
    #[serde(
        rename = "Website",
        alias = "website_url",
        alias = "website",
        default,
        deserialize_with = "de_opt_text"
    )]
    pub website_url: Option<String>,
    #[serde(
        rename = "LinkedIn",
        alias = "linkedin_url",
        alias = "linkedin",
        default,
        deserialize_with = "de_opt_text"
    )]
    pub linkedin_url: Option<String>,
}

impl From<&Advisor> for AdvisorSnapshot {
    fn from(a: &Advisor) -> Self {
        Self {
            id: a.id.clone(),
            first_name: a.first_name.clone(),
            last_name: a.last_name.clone(),
            team_name: a.team_name.clone(),
            title: a.title.clone(),
            firm: a.firm.clone(),
            branch: a.branch.clone(),
            city: a.city.clone(),
            province: a.province.clone(),
            email: a.email.clone(),
            website_url: a.website_url.clone(),
            linkedin_url: a.linkedin_url.clone(),
        }
    }
}

impl From<AdvisorSnapshot> for Advisor {
    fn from(s: AdvisorSnapshot) -> Self {
        Self {
            id: s.id,
            first_name: s.first_name,
            last_name: s.last_name,
            team_name: s.team_name,
            title: s.title,
            firm: s.firm,
            branch: s.branch,
            city: s.city,
            province: s.province,
            email: s.email,
            website_url: s.website_url,
            linkedin_url: s.linkedin_url,
        }
    }
}

/// Column headers used for display and CSV export, in record order.
pub const DISPLAY_HEADERS: [&str; 11] = [
    "First Name",
    "Last Name",
    "Team Name",
    "Title",
    "Firm",
    "Branch",
    "City",
    "Province",
    "Email",
    "Website",
    "LinkedIn",
];

impl Advisor {
    /// Field values in [`DISPLAY_HEADERS`] order.
    pub fn display_values(&self) -> [&str; 11] {
        [
            self.first_name.as_str(),
            self.last_name.as_str(),
            self.team_name.as_str(),
            self.title.as_str(),
            self.firm.as_str(),
            self.branch.as_str(),
            self.city.as_str(),
            self.province.as_str(),
            self.email.as_deref().unwrap_or(""),
            self.website_url.as_deref().unwrap_or(""),
            self.linkedin_url.as_deref().unwrap_or(""),
        ]
    }
}

#[cfg(test)]
pub(crate) fn sample_advisor(first: &str, last: &str, email: Option<&str>) -> Advisor {
    Advisor {
        id: None,
        first_name: first.to_string(),
        last_name: last.to_string(),
        team_name: "Northern Wealth".to_string(),
        title: "Wealth Advisor".to_string(),
        firm: "Maple Securities".to_string(),
        branch: "Downtown".to_string(),
        city: "Toronto".to_string(),
        province: "Ontario".to_string(),
        email: email.map(str::to_string),
        website_url: None,
        linkedin_url: None,
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn backend_row_with_numeric_id_and_nulls_decodes() {
        let row = serde_json::json!({
            "id": 42,
            "first_name": "Jane",
            "last_name": "Smith",
            "team_name": null,
            "firm": "Maple Securities",
            "city": "Ottawa",
            "province": "Ontario",
            "email": "  ",
            "website_url": "https://jane.example.com"
        });
        let advisor: Advisor = serde_json::from_value(row).expect("decode");
        assert_eq!(advisor.id, Some(AdvisorId::new("42")));
        assert_eq!(advisor.team_name, "");
        assert_eq!(advisor.email, None);
        assert_eq!(
            advisor.website_url.as_deref(),
            Some("https://jane.example.com")
        );
    }

    #[test]
    fn snapshot_writes_display_keys_and_reads_both_spellings() {
        let advisor = sample_advisor("Jane", "Smith", Some("jane@example.com"));
        let value = serde_json::to_value(AdvisorSnapshot::from(&advisor)).expect("encode");
        assert_eq!(value["First Name"], "Jane");
        assert_eq!(value["Email"], "jane@example.com");
        assert!(value.get("first_name").is_none());

        let legacy = serde_json::json!({
            "first_name": "Jane",
            "Last Name": "Smith",
            "Province": "Ontario",
            "linkedin": "https://linkedin.com/in/jane"
        });
        let snapshot: AdvisorSnapshot = serde_json::from_value(legacy).expect("decode");
        let restored = Advisor::from(snapshot);
        assert_eq!(restored.first_name, "Jane");
        assert_eq!(restored.last_name, "Smith");
        assert_eq!(
            restored.linkedin_url.as_deref(),
            Some("https://linkedin.com/in/jane")
        );
    }

    #[test]
    fn dedup_key_prefers_case_insensitive_email() {
        let a = sample_advisor("Jane", "Smith", Some("Jane@Example.com "));
        let mut b = sample_advisor("J.", "Smith", Some("jane@example.com"));
        b.city = "Ottawa".to_string();
        assert_eq!(a.dedup_key(), b.dedup_key());
    }

    #[test]
    fn dedup_key_without_email_falls_back_to_whole_record() {
        let a = sample_advisor("Jane", "Smith", None);
        let same = a.clone();
        let mut changed = a.clone();
        changed.branch = "Uptown".to_string();
        assert_eq!(a.dedup_key(), same.dedup_key());
        assert_ne!(a.dedup_key(), changed.dedup_key());
    }

    #[test]
    fn patch_clears_optional_fields_with_blank_values() {
        let mut advisor = sample_advisor("Jane", "Smith", Some("jane@example.com"));
        let patch = AdvisorPatch {
            email: Some("  ".to_string()),
            city: Some(" Kingston ".to_string()),
            ..Default::default()
        };
        patch.apply_to(&mut advisor);
        assert_eq!(advisor.email, None);
        assert_eq!(advisor.city, "Kingston");
        assert!(!patch.is_empty());
        assert!(AdvisorPatch::default().is_empty());
    }
}

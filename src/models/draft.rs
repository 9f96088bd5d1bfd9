use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::models::package::{self, ContentError, TripPackage};

/// In-progress wizard session. Same shape locally and in the hosted
/// `drafts` table.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Draft {
    pub id: String,
    pub user_id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub content: Value,
    #[serde(with = "timestamp")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "timestamp")]
    pub updated_at: DateTime<Utc>,
}

impl Draft {
    pub fn new(user_id: impl Into<String>, name: impl Into<String>, kind: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.into(),
            name: name.into(),
            kind: kind.into(),
            content: package::encode(&TripPackage::default()),
            created_at: now,
            updated_at: now,
        }
    }

    /// Decodes `content` into the wizard package, migrating older blobs.
    pub fn package(&self) -> Result<TripPackage, ContentError> {
        package::decode(self.content.clone())
    }

    pub fn set_package(&mut self, package: &TripPackage) {
        self.content = package::encode(package);
    }
}

/// Insert payload for the hosted table; identity and timestamps are assigned
/// by the backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewDraft {
    pub user_id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub content: Value,
}

impl From<&Draft> for NewDraft {
    fn from(draft: &Draft) -> Self {
        Self {
            user_id: draft.user_id.clone(),
            name: draft.name.clone(),
            kind: draft.kind.clone(),
            content: draft.content.clone(),
        }
    }
}

/// Partial update. Fields left as `None` are not sent and stay untouched.
#[serde_with::skip_serializing_none]
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DraftPatch {
    pub name: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub content: Option<Value>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl From<&Draft> for DraftPatch {
    fn from(draft: &Draft) -> Self {
        Self {
            name: Some(draft.name.clone()),
            kind: Some(draft.kind.clone()),
            content: Some(draft.content.clone()),
            updated_at: Some(draft.updated_at),
        }
    }
}

/// Timestamps arrive as RFC 3339 from the REST endpoint but in postgres text
/// form (`2024-05-01 10:00:00.123+00`) from the realtime feed.
pub(crate) mod timestamp {
    use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
    use serde::{de, Deserialize, Deserializer, Serializer};

    const ZONED_FORMATS: [&str; 2] = ["%Y-%m-%d %H:%M:%S%.f%#z", "%Y-%m-%dT%H:%M:%S%.f%#z"];
    const NAIVE_FORMATS: [&str; 2] = ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"];

    pub fn serialize<S: Serializer>(value: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_rfc3339_opts(SecondsFormat::Micros, true))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        parse(&raw).ok_or_else(|| de::Error::custom(format!("invalid timestamp `{raw}`")))
    }

    pub fn parse(raw: &str) -> Option<DateTime<Utc>> {
        let raw = raw.trim();
        if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
            return Some(ts.with_timezone(&Utc));
        }
        for format in ZONED_FORMATS {
            if let Ok(ts) = DateTime::parse_from_str(raw, format) {
                return Some(ts.with_timezone(&Utc));
            }
        }
        NAIVE_FORMATS
            .iter()
            .find_map(|format| NaiveDateTime::parse_from_str(raw, format).ok())
            .map(|naive| naive.and_utc())
    }
}

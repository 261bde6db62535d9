use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// One entry of a visit's action log as returned by Matomo.
///
/// Only `url` is ever inspected; everything else rides along untouched. The
/// upstream does not guarantee `url` is present or even a string, so it is
/// kept as a raw JSON value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionDetail {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ActionDetail {
    /// The action URL, if present and actually a string.
    pub fn url_str(&self) -> Option<&str> {
        self.url.as_ref().and_then(Value::as_str)
    }
}

/// A raw visit as returned by the Matomo `Live.getLastVisitsDetails` API.
///
/// `id` is the upstream visit identifier used for deduplication across fetch
/// cycles. Fields the pipeline does not inspect are captured verbatim in
/// `extra`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawVisit {
    pub id: String,
    pub visitor_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default)]
    pub action_details: Vec<ActionDetail>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl RawVisit {
    /// The visit document minus its action details, as persisted alongside
    /// them in the raw store. Keeps the upstream identifiers.
    pub fn visit_info(&self) -> Value {
        let mut info = self.extra.clone();
        info.insert("id".to_string(), Value::String(self.id.clone()));
        info.insert(
            "visitorId".to_string(),
            Value::String(self.visitor_id.clone()),
        );
        if let Some(user_id) = &self.user_id {
            info.insert("userId".to_string(), Value::String(user_id.clone()));
        }
        Value::Object(info)
    }
}

/// The reduced payload placed on the broker: a visit stripped down to its
/// qualifying action details. Exists only on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VisitMessage {
    pub visitor_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default)]
    pub action_details: Vec<ActionDetail>,
}

/// A persisted raw visit row.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct VisitRecord {
    pub id: Uuid,
    pub visitor_id: String,
    pub user_id: Option<String>,
    pub action_details: Value,
    pub visit_info: Value,
    pub created_at: DateTime<Utc>,
}

/// A persisted per-visitor URL list row.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct UrlListRecord {
    pub id: Uuid,
    pub visitor_id: String,
    pub user_id: Option<String>,
    pub urls: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;

use crate::grades::SavePayload;

/// Failures talking to the portal backend. None of these are retried; the
/// caller surfaces the message and the user decides.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Non-2xx response; `message` is what the backend put in its error body.
    #[error("{message}")]
    Server { status: u16, message: String },
    #[error("network error: {0}")]
    Network(String),
    #[error("unexpected response shape: {0}")]
    BadPayload(String),
}

impl ApiError {
    pub fn code(&self) -> &'static str {
        match self {
            ApiError::Server { .. } => "server_error",
            ApiError::Network(_) => "network_error",
            ApiError::BadPayload(_) => "bad_payload",
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Server { status, .. } => Some(*status),
            _ => None,
        }
    }
}

fn from_ureq(err: ureq::Error) -> ApiError {
    match err {
        ureq::Error::Status(status, resp) => {
            let message = resp
                .into_json::<serde_json::Value>()
                .ok()
                .and_then(|body| {
                    body.get("message")
                        .and_then(|m| m.as_str())
                        .map(|s| s.to_string())
                })
                .unwrap_or_else(|| format!("portal returned status {}", status));
            ApiError::Server { status, message }
        }
        ureq::Error::Transport(t) => ApiError::Network(t.to_string()),
    }
}

/// A field the backend sends either as a bare id string or as an embedded
/// document. Normalized in one place instead of shape-checks at every use.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum Ref<T> {
    Id(String),
    Embedded(T),
}

#[derive(Debug, Clone, Deserialize)]
pub struct Strand {
    #[serde(alias = "_id")]
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
}

impl Ref<Strand> {
    pub fn id(&self) -> &str {
        match self {
            Ref::Id(id) => id,
            Ref::Embedded(strand) => &strand.id,
        }
    }

    pub fn name(&self) -> Option<&str> {
        match self {
            Ref::Id(_) => None,
            Ref::Embedded(strand) => strand.name.as_deref(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Semester {
    #[serde(alias = "_id")]
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub year_level: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub strand: Option<Ref<Strand>>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subject {
    #[serde(alias = "_id")]
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub semester_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Section {
    #[serde(alias = "_id")]
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub year_level: Option<String>,
}

/// Confirmed grade cell as the backend stores it, keyed by student id then
/// subject id in `fetch_grades`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GradeCell {
    #[serde(default)]
    pub midterm: Option<f64>,
    #[serde(default)]
    pub finals: Option<f64>,
    #[serde(default)]
    pub final_rating: Option<i64>,
    #[serde(default)]
    pub action: Option<String>,
}

/// Derived values the backend returns from a single save.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveAck {
    pub final_rating: i64,
    pub action: String,
}

/// Blocking client for the portal REST backend. One agent per session,
/// bearer token on every call.
pub struct PortalApi {
    agent: ureq::Agent,
    base_url: String,
    token: String,
}

impl PortalApi {
    pub fn new(base_url: &str, token: &str) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout(Duration::from_secs(10))
            .build();
        Self {
            agent,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn bearer(&self) -> String {
        format!("Bearer {}", self.token)
    }

    fn get_json(&self, path_and_query: &str) -> Result<serde_json::Value, ApiError> {
        let url = format!("{}{}", self.base_url, path_and_query);
        let resp = self
            .agent
            .get(&url)
            .set("Authorization", &self.bearer())
            .call()
            .map_err(from_ureq)?;
        resp.into_json().map_err(|e| ApiError::BadPayload(e.to_string()))
    }

    fn post_json(&self, path: &str, body: impl Serialize) -> Result<serde_json::Value, ApiError> {
        let url = format!("{}{}", self.base_url, path);
        let resp = self
            .agent
            .post(&url)
            .set("Authorization", &self.bearer())
            .send_json(body)
            .map_err(from_ureq)?;
        resp.into_json().map_err(|e| ApiError::BadPayload(e.to_string()))
    }

    /// `POST /grades` — persists one student's marks, returns the derived
    /// rating the backend computed.
    pub fn save_grade(&self, payload: &SavePayload) -> Result<SaveAck, ApiError> {
        let body = self.post_json("/grades", payload)?;
        serde_json::from_value(unwrap_data(body))
            .map_err(|e| ApiError::BadPayload(format!("grade ack: {}", e)))
    }

    /// `POST /grades/bulk` — one atomic call for the whole batch.
    pub fn save_grades_bulk(&self, payloads: &[SavePayload]) -> Result<(), ApiError> {
        let body = serde_json::json!({ "updates": payloads });
        self.post_json("/grades/bulk", body)?;
        Ok(())
    }

    /// `GET /grades/:subjectId?semesterId=` — confirmed grades keyed by
    /// student id then subject id. An empty mapping means "no grades yet",
    /// not an error.
    pub fn fetch_grades(
        &self,
        subject_id: &str,
        semester_id: &str,
    ) -> Result<HashMap<String, HashMap<String, GradeCell>>, ApiError> {
        let body = self.get_json(&format!(
            "/grades/{}?semesterId={}",
            subject_id, semester_id
        ))?;
        serde_json::from_value(unwrap_data(body))
            .map_err(|e| ApiError::BadPayload(format!("grades map: {}", e)))
    }

    pub fn list_subjects(&self, semester_id: &str) -> Result<Vec<Subject>, ApiError> {
        let body = self.get_json(&format!("/subjects?semesterId={}", semester_id))?;
        serde_json::from_value(unwrap_data(body))
            .map_err(|e| ApiError::BadPayload(format!("subjects: {}", e)))
    }

    pub fn list_semesters(&self) -> Result<Vec<Semester>, ApiError> {
        let body = self.get_json("/semesters")?;
        serde_json::from_value(unwrap_data(body))
            .map_err(|e| ApiError::BadPayload(format!("semesters: {}", e)))
    }

    pub fn list_sections(&self) -> Result<Vec<Section>, ApiError> {
        let body = self.get_json("/sections")?;
        serde_json::from_value(unwrap_data(body))
            .map_err(|e| ApiError::BadPayload(format!("sections: {}", e)))
    }
}

/// The backend wraps most payloads in `{data: ...}` but not all of them.
fn unwrap_data(body: serde_json::Value) -> serde_json::Value {
    match body {
        serde_json::Value::Object(mut obj) if obj.contains_key("data") => {
            obj.remove("data").unwrap_or(serde_json::Value::Null)
        }
        other => other,
    }
}

use serde::Deserialize;

use crate::api::PortalApi;
use crate::grades::{GradeBook, SaveContext};

#[derive(Debug, Deserialize, Clone)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

/// One configured portal session: the authenticated API client, the grade
/// book for the currently open encoding screen, and that screen's context.
pub struct Session {
    pub api: PortalApi,
    pub book: GradeBook,
    pub context: Option<SaveContext>,
}

pub struct AppState {
    pub session: Option<Session>,
}

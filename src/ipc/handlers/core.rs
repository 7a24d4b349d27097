use serde_json::json;
use tracing::info;

use crate::api::PortalApi;
use crate::grades::GradeBook;
use crate::ipc::error::{ok, HandlerErr};
use crate::ipc::types::{AppState, Request, Session};

fn required_str(params: &serde_json::Value, key: &str) -> Result<String, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| HandlerErr::bad_params(format!("missing {}", key)))
}

fn handle_health(state: &mut AppState, req: &Request) -> serde_json::Value {
    ok(
        &req.id,
        json!({
            "version": env!("CARGO_PKG_VERSION"),
            "baseUrl": state.session.as_ref().map(|s| s.api.base_url().to_string()),
        }),
    )
}

/// Binds this sidecar to a portal backend. The UI calls this right after
/// sign-in with the base URL and the bearer token it was issued; token
/// issuance itself is not our business.
fn handle_session_configure(state: &mut AppState, req: &Request) -> serde_json::Value {
    let base_url = match required_str(&req.params, "baseUrl") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let token = match required_str(&req.params, "token") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };

    let api = PortalApi::new(&base_url, &token);
    let normalized = api.base_url().to_string();
    info!(base_url = %normalized, "session configured");
    state.session = Some(Session {
        api,
        book: GradeBook::new(),
        context: None,
    });

    ok(&req.id, json!({ "baseUrl": normalized }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "health" => Some(handle_health(state, req)),
        "session.configure" => Some(handle_session_configure(state, req)),
        _ => None,
    }
}

use serde_json::json;

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

fn session_ref<'a>(state: &'a AppState) -> Result<&'a Session, HandlerErr> {
    state
        .session
        .as_ref()
        .ok_or_else(|| HandlerErr::new("no_session", "configure a session first"))
}

fn subjects_list(session: &Session, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let semester_id = required_str(params, "semesterId")?;
    let subjects = session.api.list_subjects(&semester_id)?;
    let rows: Vec<serde_json::Value> = subjects
        .iter()
        .map(|s| {
            json!({
                "id": s.id,
                "name": s.name,
                "semesterId": s.semester_id,
            })
        })
        .collect();
    Ok(json!({ "subjects": rows }))
}

/// Semesters arrive with `strand` as either a bare id or an embedded
/// document; both normalize to `strandId` (+ `strandName` when known).
fn semesters_list(session: &Session, _params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let semesters = session.api.list_semesters()?;
    let rows: Vec<serde_json::Value> = semesters
        .iter()
        .map(|s| {
            json!({
                "id": s.id,
                "name": s.name,
                "yearLevel": s.year_level,
                "status": s.status,
                "strandId": s.strand.as_ref().map(|r| r.id().to_string()),
                "strandName": s.strand.as_ref().and_then(|r| r.name().map(|n| n.to_string())),
            })
        })
        .collect();
    Ok(json!({ "semesters": rows }))
}

fn sections_list(session: &Session, _params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let sections = session.api.list_sections()?;
    let rows: Vec<serde_json::Value> = sections
        .iter()
        .map(|s| {
            json!({
                "id": s.id,
                "name": s.name,
                "yearLevel": s.year_level,
            })
        })
        .collect();
    Ok(json!({ "sections": rows }))
}

fn dispatch(
    state: &mut AppState,
    req: &Request,
    f: fn(&Session, &serde_json::Value) -> Result<serde_json::Value, HandlerErr>,
) -> serde_json::Value {
    let session = match session_ref(state) {
        Ok(session) => session,
        Err(e) => return e.response(&req.id),
    };
    match f(session, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(e) => e.response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "subjects.list" => Some(dispatch(state, req, subjects_list)),
        "semesters.list" => Some(dispatch(state, req, semesters_list)),
        "sections.list" => Some(dispatch(state, req, sections_list)),
        _ => None,
    }
}

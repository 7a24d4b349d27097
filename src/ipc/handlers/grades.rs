use serde_json::json;
use std::collections::HashMap;
use tracing::{info, warn};
use uuid::Uuid;

use crate::api::GradeCell;
use crate::grades::{
    Action, GradeBook, GradeField, GradeRecord, Mark, SaveContext, SaveError,
};
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

fn session_mut<'a>(state: &'a mut AppState) -> Result<&'a mut Session, HandlerErr> {
    state
        .session
        .as_mut()
        .ok_or_else(|| HandlerErr::new("no_session", "configure a session first"))
}

fn open_context(session: &Session) -> Result<SaveContext, HandlerErr> {
    session
        .context
        .clone()
        .ok_or_else(|| HandlerErr::new("no_subject", "open a subject first"))
}

/// Form-input coercion happens here, once: null and the empty string mean
/// "not entered", numbers and numeric strings carry the mark. Marks live on
/// the 0-100 scale.
fn parse_mark(raw: Option<&serde_json::Value>) -> Result<Mark, HandlerErr> {
    let value = match raw {
        None | Some(serde_json::Value::Null) => return Ok(Mark::Empty),
        Some(serde_json::Value::String(s)) => {
            let t = s.trim();
            if t.is_empty() {
                return Ok(Mark::Empty);
            }
            t.parse::<f64>()
                .map_err(|_| HandlerErr::bad_params("value must be numeric or empty"))?
        }
        Some(v) => v
            .as_f64()
            .ok_or_else(|| HandlerErr::bad_params("value must be numeric or empty"))?,
    };
    if !(0.0..=100.0).contains(&value) {
        return Err(HandlerErr::with_details(
            "bad_params",
            "marks must be between 0 and 100",
            json!({ "value": value }),
        ));
    }
    Ok(Mark::Value(value))
}

fn cells_to_records(
    fetched: HashMap<String, HashMap<String, GradeCell>>,
) -> HashMap<String, HashMap<String, GradeRecord>> {
    fetched
        .into_iter()
        .map(|(student_id, by_subject)| {
            let records = by_subject
                .into_iter()
                .map(|(subject_id, cell)| {
                    let record = GradeRecord {
                        midterm: Mark::from_option(cell.midterm),
                        finals: Mark::from_option(cell.finals),
                        final_rating: cell.final_rating,
                        action: cell.action.as_deref().and_then(Action::parse),
                    };
                    (subject_id, record)
                })
                .collect();
            (student_id, records)
        })
        .collect()
}

fn record_json(student_id: &str, record: &GradeRecord) -> serde_json::Value {
    json!({
        "studentId": student_id,
        "midterm": record.midterm.value(),
        "finals": record.finals.value(),
        "finalRating": record.final_rating,
        "action": record.action,
    })
}

fn confirmed_rows(book: &GradeBook, subject_id: &str) -> Vec<serde_json::Value> {
    let mut students: Vec<&String> = book.confirmed_students().collect();
    students.sort();
    students
        .into_iter()
        .filter_map(|student_id| {
            book.confirmed_record(student_id, subject_id)
                .map(|record| record_json(student_id, record))
        })
        .collect()
}

/// `grades.open` — fetches confirmed grades for one encoding screen and
/// resets the book to it. Zero rows is "no grades yet", not a failure.
fn grades_open(session: &mut Session, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let subject_id = required_str(params, "subjectId")?;
    let semester_id = required_str(params, "semesterId")?;
    let section = required_str(params, "section")?;
    let year_level = required_str(params, "yearLevel")?;

    let fetched = session.api.fetch_grades(&subject_id, &semester_id)?;
    let mut book = GradeBook::new();
    book.load_confirmed(cells_to_records(fetched));

    let rows = confirmed_rows(&book, &subject_id);
    session.book = book;
    session.context = Some(SaveContext {
        subject_id: subject_id.clone(),
        semester_id,
        section,
        year_level,
    });

    Ok(json!({
        "subjectId": subject_id,
        "rows": rows,
    }))
}

/// `grades.setField` — records a keystroke and returns the live derived
/// rating when both fields resolve to entered values.
fn grades_set_field(session: &mut Session, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let ctx = open_context(session)?;
    let student_id = required_str(params, "studentId")?;
    let field_raw = required_str(params, "field")?;
    let field = GradeField::parse(&field_raw)
        .ok_or_else(|| HandlerErr::bad_params("field must be one of: midterm, finals"))?;
    let mark = parse_mark(params.get("value"))?;

    let preview = session.book.set_field(&student_id, &ctx.subject_id, field, mark);
    Ok(json!({
        "studentId": student_id,
        "finalRating": preview.map(|(rating, _)| rating),
        "action": preview.map(|(_, action)| action),
        "hasUnsaved": session.book.has_pending(&student_id),
    }))
}

/// `grades.toggleEdit` — leaving edit mode without saving discards that
/// student's pending edit.
fn grades_toggle_edit(session: &mut Session, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let student_id = required_str(params, "studentId")?;
    let editing = session.book.toggle_edit(&student_id);
    Ok(json!({
        "studentId": student_id,
        "editing": editing,
        "hasUnsaved": session.book.has_pending(&student_id),
    }))
}

/// `grades.saveOne` — single-student persistence. "Nothing to save" is a
/// successful no-op, not an error; a failed request keeps the pending edit.
fn grades_save_one(session: &mut Session, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let ctx = open_context(session)?;
    let student_id = required_str(params, "studentId")?;

    let payload = match session.book.begin_save(&student_id, &ctx) {
        Ok(payload) => payload,
        Err(SaveError::NothingToSave) => {
            return Ok(json!({
                "saved": false,
                "studentId": student_id,
                "reason": "nothing_to_save",
            }));
        }
        Err(e @ SaveError::AlreadySaving) => {
            return Err(HandlerErr::new(e.code(), "a save for this student is already in flight"));
        }
    };

    let attempt_id = Uuid::new_v4().to_string();
    match session.api.save_grade(&payload) {
        Ok(ack) => {
            let record = GradeRecord {
                midterm: Mark::from_option(payload.midterm),
                finals: Mark::from_option(payload.finals),
                final_rating: Some(ack.final_rating),
                action: Action::parse(&ack.action),
            };
            session.book.apply_save_success(&student_id, &ctx.subject_id, record);
            info!(attempt = %attempt_id, student = %student_id, rating = ack.final_rating, "grade saved");
            Ok(json!({
                "saved": true,
                "attemptId": attempt_id,
                "studentId": student_id,
                "finalRating": ack.final_rating,
                "action": ack.action,
                "hasUnsaved": session.book.has_pending(&student_id),
            }))
        }
        Err(e) => {
            session.book.abort_save(&student_id);
            warn!(attempt = %attempt_id, student = %student_id, error = %e, "grade save failed");
            Err(HandlerErr::from(e))
        }
    }
}

/// `grades.saveAll` — one atomic bulk call for every student with a pending
/// edit. Success applies the client-side recomputation for immediate
/// feedback, then re-fetches confirmed state to reconcile.
fn grades_save_all(session: &mut Session, _params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let ctx = open_context(session)?;

    let payloads = match session.book.begin_save_all(&ctx) {
        Ok(payloads) => payloads,
        // The bulk path treats an empty batch as a silent no-op.
        Err(_) => return Ok(json!({ "saved": 0 })),
    };

    let attempt_id = Uuid::new_v4().to_string();
    if let Err(e) = session.api.save_grades_bulk(&payloads) {
        session.book.abort_bulk(&payloads);
        warn!(attempt = %attempt_id, count = payloads.len(), error = %e, "bulk save failed");
        return Err(HandlerErr::from(e));
    }

    session.book.apply_bulk_success(&ctx.subject_id, &payloads);
    info!(attempt = %attempt_id, count = payloads.len(), "bulk save applied");

    let reconciled = match session.api.fetch_grades(&ctx.subject_id, &ctx.semester_id) {
        Ok(fetched) => {
            session.book.load_confirmed(cells_to_records(fetched));
            true
        }
        Err(e) => {
            // Optimistic state stands until the next open succeeds.
            warn!(attempt = %attempt_id, error = %e, "post-bulk reconcile fetch failed");
            false
        }
    };

    Ok(json!({
        "saved": payloads.len(),
        "attemptId": attempt_id,
        "reconciled": reconciled,
        "rows": confirmed_rows(&session.book, &ctx.subject_id),
    }))
}

fn dispatch(
    state: &mut AppState,
    req: &Request,
    f: fn(&mut Session, &serde_json::Value) -> Result<serde_json::Value, HandlerErr>,
) -> serde_json::Value {
    let session = match session_mut(state) {
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
        "grades.open" => Some(dispatch(state, req, grades_open)),
        "grades.setField" => Some(dispatch(state, req, grades_set_field)),
        "grades.toggleEdit" => Some(dispatch(state, req, grades_toggle_edit)),
        "grades.saveOne" => Some(dispatch(state, req, grades_save_one)),
        "grades.saveAll" => Some(dispatch(state, req, grades_save_all)),
        _ => None,
    }
}

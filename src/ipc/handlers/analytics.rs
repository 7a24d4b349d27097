use serde_json::json;

use crate::analytics::{analyze_attendance, grade_distribution, moving_average, AttendanceDay};
use crate::ipc::error::{ok, HandlerErr};
use crate::ipc::types::{AppState, Request};

const DEFAULT_MOVING_AVERAGE_PERIOD: usize = 3;

fn parse_present_counts(params: &serde_json::Value) -> Result<Vec<i64>, HandlerErr> {
    let Some(records) = params.get("records").and_then(|v| v.as_array()) else {
        return Err(HandlerErr::bad_params("missing records[]"));
    };
    records
        .iter()
        .enumerate()
        .map(|(i, record)| {
            record
                .get("present")
                .and_then(|v| v.as_i64())
                .ok_or_else(|| {
                    HandlerErr::bad_params(format!("record at index {} missing integer present", i))
                })
        })
        .collect()
}

fn handle_moving_average(req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let counts = parse_present_counts(&req.params)?;
    let period = match req.params.get("period") {
        None | Some(serde_json::Value::Null) => DEFAULT_MOVING_AVERAGE_PERIOD,
        Some(v) => match v.as_u64() {
            Some(p) if p >= 1 => p as usize,
            _ => return Err(HandlerErr::bad_params("period must be an integer >= 1")),
        },
    };

    Ok(json!({
        "period": period,
        "values": moving_average(&counts, period),
    }))
}

fn handle_grade_distribution(req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let Some(raw) = req.params.get("grades").and_then(|v| v.as_array()) else {
        return Err(HandlerErr::bad_params("missing grades[]"));
    };
    let grades: Vec<f64> = raw
        .iter()
        .enumerate()
        .map(|(i, v)| {
            v.as_f64()
                .ok_or_else(|| HandlerErr::bad_params(format!("grade at index {} must be numeric", i)))
        })
        .collect::<Result<_, _>>()?;

    Ok(json!({
        "total": grades.len(),
        "buckets": grade_distribution(&grades),
    }))
}

fn handle_attendance_patterns(req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let Some(raw) = req.params.get("days") else {
        return Err(HandlerErr::bad_params("missing days[]"));
    };
    let days: Vec<AttendanceDay> = serde_json::from_value(raw.clone())
        .map_err(|e| HandlerErr::bad_params(format!("days: {}", e)))?;
    if days.is_empty() {
        return Err(HandlerErr::bad_params("days must not be empty"));
    }
    for (i, day) in days.iter().enumerate() {
        if day.present < 0 || day.absent < 0 {
            return Err(HandlerErr::bad_params(format!(
                "day at index {} has negative counts",
                i
            )));
        }
        if day.label().is_none() {
            return Err(HandlerErr::bad_params(format!(
                "day at index {} needs a name or an ISO date",
                i
            )));
        }
    }

    let pattern = analyze_attendance(&days);
    Ok(json!({
        "days": days.len(),
        "pattern": pattern,
    }))
}

fn respond(req: &Request, result: Result<serde_json::Value, HandlerErr>) -> serde_json::Value {
    match result {
        Ok(value) => ok(&req.id, value),
        Err(e) => e.response(&req.id),
    }
}

// Aggregators are pure; they work with or without a configured session.
pub fn try_handle(_state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "analytics.movingAverage" => Some(respond(req, handle_moving_average(req))),
        "analytics.gradeDistribution" => Some(respond(req, handle_grade_distribution(req))),
        "analytics.attendancePatterns" => Some(respond(req, handle_attendance_patterns(req))),
        _ => None,
    }
}

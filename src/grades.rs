use serde::Serialize;
use std::collections::{HashMap, HashSet};

pub type StudentId = String;
pub type SubjectId = String;

pub const MIDTERM_WEIGHT: f64 = 0.4;
pub const FINALS_WEIGHT: f64 = 0.6;
pub const PASSING_GRADE: i64 = 75;

/// A grade-form field after edge coercion: the UI's empty string and JSON
/// null both become `Empty`, everything else carries the number.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum Mark {
    #[default]
    Empty,
    Value(f64),
}

impl Mark {
    pub fn value(self) -> Option<f64> {
        match self {
            Mark::Empty => None,
            Mark::Value(v) => Some(v),
        }
    }

    pub fn from_option(v: Option<f64>) -> Self {
        match v {
            Some(v) => Mark::Value(v),
            None => Mark::Empty,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Action {
    #[serde(rename = "PASSED")]
    Passed,
    #[serde(rename = "FAILED")]
    Failed,
}

impl Action {
    pub fn parse(raw: &str) -> Option<Action> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "PASSED" => Some(Action::Passed),
            "FAILED" => Some(Action::Failed),
            _ => None,
        }
    }
}

/// Weighted final rating, derived only once both marks are actually entered.
/// `Empty` suppresses derivation; it is never coerced to zero here.
pub fn derive_final_rating(midterm: Mark, finals: Mark) -> Option<(i64, Action)> {
    let m = midterm.value()?;
    let f = finals.value()?;
    let rating = (m * MIDTERM_WEIGHT + f * FINALS_WEIGHT).round() as i64;
    let action = if rating >= PASSING_GRADE {
        Action::Passed
    } else {
        Action::Failed
    };
    Some((rating, action))
}

/// Server-confirmed grade cell for one (student, subject).
#[derive(Debug, Clone, Copy, Default)]
pub struct GradeRecord {
    pub midterm: Mark,
    pub finals: Mark,
    pub final_rating: Option<i64>,
    pub action: Option<Action>,
}

/// Local-only overlay. `None` means the field was never touched this session;
/// `Some(Mark::Empty)` means the user cleared it, which overrides confirmed.
#[derive(Debug, Clone, Copy, Default)]
pub struct PendingEdit {
    pub midterm: Option<Mark>,
    pub finals: Option<Mark>,
}

impl PendingEdit {
    fn is_unset(&self) -> bool {
        self.midterm.is_none() && self.finals.is_none()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GradeField {
    Midterm,
    Finals,
}

impl GradeField {
    pub fn parse(raw: &str) -> Option<GradeField> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "midterm" => Some(GradeField::Midterm),
            "finals" => Some(GradeField::Finals),
            _ => None,
        }
    }
}

/// The grade-encoding screen a save belongs to. Section and year level are
/// screen-scoped, not per student.
#[derive(Debug, Clone)]
pub struct SaveContext {
    pub subject_id: SubjectId,
    pub semester_id: String,
    pub section: String,
    pub year_level: String,
}

/// Wire payload for `POST /grades` and the entries of `POST /grades/bulk`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SavePayload {
    pub student_id: StudentId,
    pub subject_id: SubjectId,
    pub semester_id: String,
    pub midterm: Option<f64>,
    pub finals: Option<f64>,
    pub section: String,
    pub year_level: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveError {
    /// No pending edit (or nothing resolvable) for the student; a local
    /// no-op, never a network call.
    NothingToSave,
    /// A save for this student is already in flight.
    AlreadySaving,
}

impl SaveError {
    pub fn code(self) -> &'static str {
        match self {
            SaveError::NothingToSave => "nothing_to_save",
            SaveError::AlreadySaving => "save_in_flight",
        }
    }
}

/// Merged view of confirmed grades and unsaved edits for one encoding
/// session. All mutation goes through methods; the maps are never handed out
/// mutably.
#[derive(Debug, Default)]
pub struct GradeBook {
    confirmed: HashMap<StudentId, HashMap<SubjectId, GradeRecord>>,
    pending: HashMap<StudentId, PendingEdit>,
    editing: HashSet<StudentId>,
    // Edit epochs guard in-flight saves against clobbering newer keystrokes:
    // begin_save snapshots the epoch, completion only clears the pending
    // edit if no set_field advanced it in between.
    epochs: HashMap<StudentId, u64>,
    in_flight: HashMap<StudentId, u64>,
}

impl GradeBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the confirmed cache with freshly fetched state. Zero entries
    /// is a valid "no grades yet" outcome. Pending edits survive.
    pub fn load_confirmed(&mut self, confirmed: HashMap<StudentId, HashMap<SubjectId, GradeRecord>>) {
        self.confirmed = confirmed;
    }

    pub fn confirmed_record(&self, student: &str, subject: &str) -> Option<&GradeRecord> {
        self.confirmed.get(student).and_then(|by_subject| by_subject.get(subject))
    }

    pub fn confirmed_students(&self) -> impl Iterator<Item = &StudentId> {
        self.confirmed.keys()
    }

    pub fn has_pending(&self, student: &str) -> bool {
        self.pending.get(student).map(|p| !p.is_unset()).unwrap_or(false)
    }

    pub fn is_editing(&self, student: &str) -> bool {
        self.editing.contains(student)
    }

    pub fn is_saving(&self, student: &str) -> bool {
        self.in_flight.contains_key(student)
    }

    fn epoch(&self, student: &str) -> u64 {
        self.epochs.get(student).copied().unwrap_or(0)
    }

    /// Pending field if touched, else confirmed, else `Empty`.
    pub fn resolved(&self, student: &str, subject: &str) -> (Mark, Mark) {
        let confirmed = self
            .confirmed_record(student, subject)
            .copied()
            .unwrap_or_default();
        let pending = self.pending.get(student).copied().unwrap_or_default();
        (
            pending.midterm.unwrap_or(confirmed.midterm),
            pending.finals.unwrap_or(confirmed.finals),
        )
    }

    /// Records a keystroke into the pending overlay and returns the live
    /// derived preview, when both resolved fields are entered.
    pub fn set_field(
        &mut self,
        student: &str,
        subject: &str,
        field: GradeField,
        mark: Mark,
    ) -> Option<(i64, Action)> {
        let entry = self.pending.entry(student.to_string()).or_default();
        match field {
            GradeField::Midterm => entry.midterm = Some(mark),
            GradeField::Finals => entry.finals = Some(mark),
        }
        self.editing.insert(student.to_string());
        *self.epochs.entry(student.to_string()).or_insert(0) += 1;
        let (midterm, finals) = self.resolved(student, subject);
        derive_final_rating(midterm, finals)
    }

    /// Enters or leaves edit mode. Leaving without a save discards that
    /// student's pending edit.
    pub fn toggle_edit(&mut self, student: &str) -> bool {
        if self.editing.remove(student) {
            self.pending.remove(student);
            false
        } else {
            self.editing.insert(student.to_string());
            true
        }
    }

    /// Stages a single-student save: snapshots the edit epoch, marks the
    /// student in flight, and builds the wire payload. Students without a
    /// pending edit are a local no-op (`NothingToSave`), which also makes an
    /// immediate re-save after success a no-op.
    pub fn begin_save(&mut self, student: &str, ctx: &SaveContext) -> Result<SavePayload, SaveError> {
        if self.is_saving(student) {
            return Err(SaveError::AlreadySaving);
        }
        if !self.has_pending(student) {
            return Err(SaveError::NothingToSave);
        }
        let (midterm, finals) = self.resolved(student, &ctx.subject_id);
        if midterm == Mark::Empty && finals == Mark::Empty {
            return Err(SaveError::NothingToSave);
        }
        self.in_flight.insert(student.to_string(), self.epoch(student));
        Ok(self.payload_for(student, midterm, finals, ctx))
    }

    fn payload_for(&self, student: &str, midterm: Mark, finals: Mark, ctx: &SaveContext) -> SavePayload {
        SavePayload {
            student_id: student.to_string(),
            subject_id: ctx.subject_id.clone(),
            semester_id: ctx.semester_id.clone(),
            midterm: midterm.value(),
            finals: finals.value(),
            section: ctx.section.clone(),
            year_level: ctx.year_level.clone(),
        }
    }

    /// Applies a successful save response. The confirmed record always
    /// updates; the pending edit is cleared only if no edit landed while the
    /// request was in flight, so newer keystrokes stay visible as unsaved.
    pub fn apply_save_success(&mut self, student: &str, subject: &str, record: GradeRecord) {
        let snapshot = self.in_flight.remove(student);
        self.confirmed
            .entry(student.to_string())
            .or_default()
            .insert(subject.to_string(), record);
        if snapshot == Some(self.epoch(student)) {
            self.pending.remove(student);
            self.editing.remove(student);
        }
    }

    /// A failed save keeps the pending edit untouched so nothing is lost.
    pub fn abort_save(&mut self, student: &str) {
        self.in_flight.remove(student);
    }

    /// Stages a bulk save: one payload per student with a pending edit, in
    /// stable student-id order. An empty batch is `NothingToSave` (the bulk
    /// caller treats that as a silent no-op).
    pub fn begin_save_all(&mut self, ctx: &SaveContext) -> Result<Vec<SavePayload>, SaveError> {
        let mut students: Vec<StudentId> = self
            .pending
            .iter()
            .filter(|(student, edit)| !edit.is_unset() && !self.in_flight.contains_key(*student))
            .map(|(student, _)| student.clone())
            .collect();
        students.sort();

        let mut payloads = Vec::new();
        for student in students {
            let (midterm, finals) = self.resolved(&student, &ctx.subject_id);
            if midterm == Mark::Empty && finals == Mark::Empty {
                continue;
            }
            self.in_flight.insert(student.clone(), self.epoch(&student));
            payloads.push(self.payload_for(&student, midterm, finals, ctx));
        }
        if payloads.is_empty() {
            return Err(SaveError::NothingToSave);
        }
        Ok(payloads)
    }

    /// The whole bulk call succeeded: recompute ratings client-side for
    /// immediate feedback (the caller reconciles with a re-fetch afterwards)
    /// and clear the pendings whose epochs did not advance.
    pub fn apply_bulk_success(&mut self, subject: &str, payloads: &[SavePayload]) {
        for payload in payloads {
            let midterm = Mark::from_option(payload.midterm);
            let finals = Mark::from_option(payload.finals);
            let derived = derive_final_rating(midterm, finals);
            let record = GradeRecord {
                midterm,
                finals,
                final_rating: derived.map(|(rating, _)| rating),
                action: derived.map(|(_, action)| action),
            };
            self.apply_save_success(&payload.student_id, subject, record);
        }
    }

    /// Partial or total bulk failure: the batch is treated as not applied.
    pub fn abort_bulk(&mut self, payloads: &[SavePayload]) {
        for payload in payloads {
            self.in_flight.remove(&payload.student_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> SaveContext {
        SaveContext {
            subject_id: "sub-101".to_string(),
            semester_id: "sem-1".to_string(),
            section: "Einstein".to_string(),
            year_level: "Grade 11".to_string(),
        }
    }

    fn echo_record(payload: &SavePayload) -> GradeRecord {
        // What the portal sends back: the saved marks plus derived values.
        let midterm = Mark::from_option(payload.midterm);
        let finals = Mark::from_option(payload.finals);
        let derived = derive_final_rating(midterm, finals);
        GradeRecord {
            midterm,
            finals,
            final_rating: derived.map(|(r, _)| r),
            action: derived.map(|(_, a)| a),
        }
    }

    #[test]
    fn final_rating_is_weighted_40_60() {
        assert_eq!(
            derive_final_rating(Mark::Value(80.0), Mark::Value(90.0)),
            Some((86, Action::Passed))
        );
        assert_eq!(
            derive_final_rating(Mark::Value(60.0), Mark::Value(70.0)),
            Some((66, Action::Failed))
        );
    }

    #[test]
    fn derivation_requires_both_fields_entered() {
        assert_eq!(derive_final_rating(Mark::Value(80.0), Mark::Empty), None);
        assert_eq!(derive_final_rating(Mark::Empty, Mark::Value(90.0)), None);
    }

    #[test]
    fn set_field_previews_once_both_fields_resolve() {
        let mut book = GradeBook::new();
        let preview = book.set_field("stu-1", "sub-101", GradeField::Midterm, Mark::Value(80.0));
        assert_eq!(preview, None);
        let preview = book.set_field("stu-1", "sub-101", GradeField::Finals, Mark::Value(90.0));
        assert_eq!(preview, Some((86, Action::Passed)));
    }

    #[test]
    fn cleared_field_overrides_confirmed_value() {
        let mut book = GradeBook::new();
        let mut by_subject = HashMap::new();
        by_subject.insert(
            "sub-101".to_string(),
            GradeRecord {
                midterm: Mark::Value(80.0),
                finals: Mark::Value(90.0),
                final_rating: Some(86),
                action: Some(Action::Passed),
            },
        );
        book.load_confirmed(HashMap::from([("stu-1".to_string(), by_subject)]));

        // Clearing the midterm input suppresses derivation even though a
        // confirmed midterm exists underneath.
        let preview = book.set_field("stu-1", "sub-101", GradeField::Midterm, Mark::Empty);
        assert_eq!(preview, None);
    }

    #[test]
    fn save_round_trip_clears_pending_and_confirms() {
        let mut book = GradeBook::new();
        book.set_field("stu-1", "sub-101", GradeField::Midterm, Mark::Value(80.0));
        book.set_field("stu-1", "sub-101", GradeField::Finals, Mark::Value(90.0));

        let payload = book.begin_save("stu-1", &ctx()).expect("payload");
        assert_eq!(payload.midterm, Some(80.0));
        assert_eq!(payload.finals, Some(90.0));

        book.apply_save_success("stu-1", "sub-101", echo_record(&payload));
        assert!(!book.has_pending("stu-1"));
        assert!(!book.is_editing("stu-1"));
        let confirmed = book.confirmed_record("stu-1", "sub-101").expect("confirmed");
        assert_eq!(confirmed.midterm.value(), Some(80.0));
        assert_eq!(confirmed.finals.value(), Some(90.0));
        assert_eq!(confirmed.final_rating, Some(86));
        assert_eq!(confirmed.action, Some(Action::Passed));

        // No new edits: an immediate second save is a local no-op.
        assert_eq!(book.begin_save("stu-1", &ctx()), Err(SaveError::NothingToSave));
    }

    #[test]
    fn edit_during_in_flight_save_survives_completion() {
        let mut book = GradeBook::new();
        book.set_field("stu-1", "sub-101", GradeField::Midterm, Mark::Value(80.0));
        book.set_field("stu-1", "sub-101", GradeField::Finals, Mark::Value(90.0));
        let payload = book.begin_save("stu-1", &ctx()).expect("payload");

        // Keystroke lands while the request is outstanding.
        book.set_field("stu-1", "sub-101", GradeField::Midterm, Mark::Value(95.0));

        book.apply_save_success("stu-1", "sub-101", echo_record(&payload));
        assert!(book.has_pending("stu-1"), "newer edit must not be clobbered");
        let (midterm, _) = book.resolved("stu-1", "sub-101");
        assert_eq!(midterm.value(), Some(95.0));
        // The stale response still updated the confirmed cache.
        let confirmed = book.confirmed_record("stu-1", "sub-101").expect("confirmed");
        assert_eq!(confirmed.midterm.value(), Some(80.0));
    }

    #[test]
    fn same_student_cannot_save_twice_concurrently() {
        let mut book = GradeBook::new();
        book.set_field("stu-1", "sub-101", GradeField::Midterm, Mark::Value(70.0));
        let _payload = book.begin_save("stu-1", &ctx()).expect("payload");
        assert_eq!(book.begin_save("stu-1", &ctx()), Err(SaveError::AlreadySaving));

        // A different student is free to save while stu-1 is in flight.
        book.set_field("stu-2", "sub-101", GradeField::Midterm, Mark::Value(75.0));
        assert!(book.begin_save("stu-2", &ctx()).is_ok());
    }

    #[test]
    fn failed_save_keeps_pending_for_retry() {
        let mut book = GradeBook::new();
        book.set_field("stu-1", "sub-101", GradeField::Midterm, Mark::Value(70.0));
        let _payload = book.begin_save("stu-1", &ctx()).expect("payload");
        book.abort_save("stu-1");
        assert!(book.has_pending("stu-1"));
        assert!(!book.is_saving("stu-1"));
        assert!(book.begin_save("stu-1", &ctx()).is_ok(), "retry must be possible");
    }

    #[test]
    fn toggle_edit_off_discards_pending() {
        let mut book = GradeBook::new();
        book.set_field("stu-1", "sub-101", GradeField::Midterm, Mark::Value(55.0));
        assert!(book.is_editing("stu-1"));
        assert!(!book.toggle_edit("stu-1"));
        assert!(!book.has_pending("stu-1"));
    }

    #[test]
    fn save_with_nothing_resolvable_is_rejected_locally() {
        let mut book = GradeBook::new();
        assert_eq!(book.begin_save("stu-1", &ctx()), Err(SaveError::NothingToSave));

        // A pending edit that only clears fields resolves to nothing either.
        book.set_field("stu-1", "sub-101", GradeField::Midterm, Mark::Empty);
        assert_eq!(book.begin_save("stu-1", &ctx()), Err(SaveError::NothingToSave));
    }

    #[test]
    fn bulk_save_covers_every_pending_student_in_order() {
        let mut book = GradeBook::new();
        book.set_field("stu-2", "sub-101", GradeField::Midterm, Mark::Value(88.0));
        book.set_field("stu-2", "sub-101", GradeField::Finals, Mark::Value(92.0));
        book.set_field("stu-1", "sub-101", GradeField::Midterm, Mark::Value(60.0));
        book.set_field("stu-1", "sub-101", GradeField::Finals, Mark::Value(70.0));
        book.toggle_edit("stu-3"); // edit mode but no keystrokes: skipped

        let payloads = book.begin_save_all(&ctx()).expect("payloads");
        assert_eq!(payloads.len(), 2);
        assert_eq!(payloads[0].student_id, "stu-1");
        assert_eq!(payloads[1].student_id, "stu-2");

        book.apply_bulk_success("sub-101", &payloads);
        assert!(!book.has_pending("stu-1"));
        assert!(!book.has_pending("stu-2"));
        let r1 = book.confirmed_record("stu-1", "sub-101").expect("stu-1");
        assert_eq!(r1.final_rating, Some(66));
        assert_eq!(r1.action, Some(Action::Failed));
        let r2 = book.confirmed_record("stu-2", "sub-101").expect("stu-2");
        assert_eq!(r2.final_rating, Some(90));
        assert_eq!(r2.action, Some(Action::Passed));
    }

    #[test]
    fn bulk_failure_applies_nothing() {
        let mut book = GradeBook::new();
        book.set_field("stu-1", "sub-101", GradeField::Midterm, Mark::Value(60.0));
        book.set_field("stu-2", "sub-101", GradeField::Finals, Mark::Value(70.0));
        let payloads = book.begin_save_all(&ctx()).expect("payloads");

        book.abort_bulk(&payloads);
        assert!(book.has_pending("stu-1"));
        assert!(book.has_pending("stu-2"));
        assert!(book.confirmed_record("stu-1", "sub-101").is_none());
        assert!(!book.is_saving("stu-1"));
    }

    #[test]
    fn empty_bulk_is_a_local_no_op() {
        let mut book = GradeBook::new();
        assert_eq!(book.begin_save_all(&ctx()), Err(SaveError::NothingToSave));
    }

    #[test]
    fn bulk_keeps_pending_for_student_edited_mid_flight() {
        let mut book = GradeBook::new();
        book.set_field("stu-1", "sub-101", GradeField::Midterm, Mark::Value(60.0));
        book.set_field("stu-2", "sub-101", GradeField::Midterm, Mark::Value(80.0));
        let payloads = book.begin_save_all(&ctx()).expect("payloads");

        book.set_field("stu-2", "sub-101", GradeField::Finals, Mark::Value(85.0));
        book.apply_bulk_success("sub-101", &payloads);

        assert!(!book.has_pending("stu-1"));
        assert!(book.has_pending("stu-2"), "mid-flight edit must survive");
    }
}

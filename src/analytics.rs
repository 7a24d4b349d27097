use chrono::{Datelike, NaiveDate, Weekday};
use serde::{Deserialize, Serialize};

/// One recorded day of class attendance. The attendance-entry side sends
/// either a weekday label, an ISO date, or both.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceDay {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub date: Option<String>,
    pub present: i64,
    pub absent: i64,
}

impl AttendanceDay {
    /// Weekday label, derived from the date when no explicit label was sent.
    pub fn label(&self) -> Option<String> {
        if let Some(name) = &self.name {
            let t = name.trim();
            if !t.is_empty() {
                return Some(t.to_string());
            }
        }
        let date = self.date.as_deref()?;
        let parsed = NaiveDate::parse_from_str(date.trim(), "%Y-%m-%d").ok()?;
        Some(weekday_name(parsed.weekday()).to_string())
    }
}

fn weekday_name(day: Weekday) -> &'static str {
    match day {
        Weekday::Mon => "Monday",
        Weekday::Tue => "Tuesday",
        Weekday::Wed => "Wednesday",
        Weekday::Thu => "Thursday",
        Weekday::Fri => "Friday",
        Weekday::Sat => "Saturday",
        Weekday::Sun => "Sunday",
    }
}

fn round_nearest(x: f64) -> i64 {
    // Positive inputs only; f64::round is round-half-up there.
    x.round() as i64
}

/// Trailing moving average of `present` counts. Slots before the first full
/// window are `None`. A zero period never produces a value.
pub fn moving_average(present_counts: &[i64], period: usize) -> Vec<Option<i64>> {
    if period == 0 {
        return vec![None; present_counts.len()];
    }
    let mut out = Vec::with_capacity(present_counts.len());
    let mut window_sum: i64 = 0;
    for (i, v) in present_counts.iter().enumerate() {
        window_sum += v;
        if i >= period {
            window_sum -= present_counts[i - period];
        }
        if i + 1 >= period {
            out.push(Some(round_nearest(window_sum as f64 / period as f64)));
        } else {
            out.push(None);
        }
    }
    out
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GradeBucket {
    pub range_label: String,
    pub min: i64,
    pub max: i64,
    pub count: usize,
    pub percentage: i64,
}

const GRADE_RANGES: [(i64, i64, &str); 5] = [
    (90, 100, "Outstanding"),
    (85, 89, "Very Good"),
    (80, 84, "Good"),
    (75, 79, "Fair"),
    (0, 74, "Needs Improvement"),
];

/// Histogram over the portal's fixed rating ranges. An empty grade list
/// yields 0% everywhere rather than dividing by zero.
pub fn grade_distribution(grades: &[f64]) -> Vec<GradeBucket> {
    let total = grades.len();
    GRADE_RANGES
        .iter()
        .map(|&(min, max, label)| {
            let count = grades
                .iter()
                .filter(|&&g| g >= min as f64 && g <= max as f64)
                .count();
            let percentage = if total > 0 {
                round_nearest(count as f64 / total as f64 * 100.0)
            } else {
                0
            };
            GradeBucket {
                range_label: label.to_string(),
                min,
                max,
                count,
                percentage,
            }
        })
        .collect()
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendancePattern {
    pub consecutive_absences: i64,
    pub most_absent_day: Option<String>,
    pub attendance_rate: i64,
    pub improvement: bool,
}

fn day_ratio(day: &AttendanceDay) -> f64 {
    let total = day.present + day.absent;
    if total <= 0 {
        return 0.0;
    }
    day.present as f64 / total as f64
}

fn mean_ratio(days: &[AttendanceDay]) -> f64 {
    if days.is_empty() {
        return 0.0;
    }
    days.iter().map(day_ratio).sum::<f64>() / days.len() as f64
}

/// Summarizes an ordered attendance sequence:
/// - `attendanceRate`: share of days where present outnumbers absent.
/// - `mostAbsentDay`: weekday label with the highest summed absents; the
///   first label encountered wins a tie.
/// - `improvement`: second half's mean per-day present ratio beats the
///   first half's (split at floor(n/2)).
/// - `consecutiveAbsences`: longest run of days where absent outnumbers
///   present.
pub fn analyze_attendance(days: &[AttendanceDay]) -> AttendancePattern {
    let total = days.len();
    if total == 0 {
        return AttendancePattern {
            consecutive_absences: 0,
            most_absent_day: None,
            attendance_rate: 0,
            improvement: false,
        };
    }

    let good_days = days.iter().filter(|d| d.present > d.absent).count();
    let attendance_rate = round_nearest(good_days as f64 / total as f64 * 100.0);

    // Vec keyed by first encounter, so the tie-break stays deterministic.
    let mut absents_by_label: Vec<(String, i64)> = Vec::new();
    for day in days {
        let label = day.label().unwrap_or_else(|| "Unknown".to_string());
        match absents_by_label.iter_mut().find(|(l, _)| *l == label) {
            Some((_, sum)) => *sum += day.absent,
            None => absents_by_label.push((label, day.absent)),
        }
    }
    let most_absent_day = absents_by_label
        .iter()
        .max_by(|a, b| a.1.cmp(&b.1))
        .map(|(label, _)| label.clone());

    let mid = total / 2;
    let improvement = mean_ratio(&days[mid..]) > mean_ratio(&days[..mid]);

    let mut longest_run: i64 = 0;
    let mut run: i64 = 0;
    for day in days {
        if day.absent > day.present {
            run += 1;
            longest_run = longest_run.max(run);
        } else {
            run = 0;
        }
    }

    AttendancePattern {
        consecutive_absences: longest_run,
        most_absent_day,
        attendance_rate,
        improvement,
    }
}

//! Mapping from upstream Moodle records to stored rows.
//!
//! Pure functions only: epoch conversion, defaults, the derived assignment
//! fields and the read-side grouping of assignments.

use std::collections::HashMap;
use std::hash::Hash;

use chrono::{DateTime, Duration, Utc};
use sea_orm::{NotSet, Set};
use sea_orm::prelude::DateTimeWithTimeZone;
use uuid::Uuid;

use crate::models::{assignment, course, course_content};
use crate::moodle::{Assignment, Course, Module, Section};

pub const DEFAULT_ASSIGNMENT_NAME: &str = "Assignment";
pub const DEFAULT_MODULE_NAME: &str = "Module";

/// Fragments of a lower-cased submission status that mean the work is done.
const COMPLETION_HINTS: &[&str] = &[
    "submitted",
    "submittedforgrading",
    "graded",
    "complete",
    "completed",
    "passed",
    "done",
    "finished",
];

/// Moodle uses `0` for "not set", so zero and negative epochs become null.
pub fn epoch_to_timestamp(secs: Option<i64>) -> Option<DateTimeWithTimeZone> {
    let secs = secs.filter(|s| *s > 0)?;
    DateTime::<Utc>::from_timestamp(secs, 0).map(Into::into)
}

/// An assignment is complete when it has a positive grade or its submission
/// status contains one of the completion hints (`"submitted late"` counts).
pub fn assignment_completed(grade: Option<f64>, status: Option<&str>) -> bool {
    if grade.is_some_and(|g| g > 0.0) {
        return true;
    }

    status
        .map(str::to_lowercase)
        .is_some_and(|s| COMPLETION_HINTS.iter().any(|hint| s.contains(hint)))
}

/// `hidden` only when the upstream explicitly says so.
pub fn visibility_label(visible: Option<bool>) -> &'static str {
    if visible.unwrap_or(true) {
        "visible"
    } else {
        "hidden"
    }
}

pub fn course_row(
    user_id: &str,
    connection_id: Uuid,
    course: &Course,
    now: DateTimeWithTimeZone,
) -> course::ActiveModel {
    course::ActiveModel {
        user_id: Set(user_id.to_string()),
        course_id: Set(course.id),
        connection_id: Set(connection_id),
        fullname: Set(course.fullname.clone().unwrap_or_default()),
        shortname: Set(course.shortname.clone()),
        summary: Set(course.summary.clone()),
        visible: Set(course.visible),
        progress: Set(course.progress),
        start_date: Set(epoch_to_timestamp(course.startdate)),
        end_date: Set(epoch_to_timestamp(course.enddate)),
        category_id: Set(course.category_id()),
        raw: Set(course.raw.clone()),
        created_at: Set(now),
        updated_at: Set(now),
    }
}

/// `course_id` is the id of the course block the assignment was listed under,
/// which wins over the record's own `course` field.
pub fn assignment_row(
    user_id: &str,
    connection_id: Uuid,
    course_id: i64,
    assignment: &Assignment,
    now: DateTimeWithTimeZone,
) -> assignment::ActiveModel {
    let submission_status = assignment.submission_status().map(str::to_string);
    let completed = assignment_completed(assignment.grade, submission_status.as_deref());

    assignment::ActiveModel {
        user_id: Set(user_id.to_string()),
        assignment_id: Set(assignment.id),
        connection_id: Set(connection_id),
        course_id: Set(course_id),
        name: Set(non_blank(assignment.name.as_deref(), DEFAULT_ASSIGNMENT_NAME)),
        due_date: Set(epoch_to_timestamp(assignment.duedate)),
        allow_submissions_from: Set(epoch_to_timestamp(assignment.allowsubmissionsfromdate)),
        cutoff_date: Set(epoch_to_timestamp(assignment.cutoffdate)),
        grade: Set(assignment.grade),
        status: Set(Some(visibility_label(assignment.visible).to_string())),
        submission_status: Set(submission_status),
        completed: Set(completed),
        raw: Set(assignment.raw.clone()),
        created_at: Set(now),
        updated_at: Set(now),
    }
}

pub fn content_row(
    user_id: &str,
    connection_id: Uuid,
    course_id: i64,
    section: &Section,
    module: &Module,
    now: DateTimeWithTimeZone,
) -> course_content::ActiveModel {
    course_content::ActiveModel {
        user_id: Set(user_id.to_string()),
        course_id: Set(course_id),
        module_id: Set(module.id),
        connection_id: Set(connection_id),
        section_id: Set(section.id),
        section_name: Set(section.name.clone()),
        module_name: Set(non_blank(module.name.as_deref(), DEFAULT_MODULE_NAME)),
        modname: Set(module.modname.clone()),
        url: Set(module.url.clone().filter(|u| !u.trim().is_empty())),
        raw: Set(module.raw.clone()),
        read: NotSet,
        created_at: Set(now),
        updated_at: Set(now),
    }
}

/// Flatten a course's sections into one row per module.
pub fn content_rows(
    user_id: &str,
    connection_id: Uuid,
    course_id: i64,
    sections: &[Section],
    now: DateTimeWithTimeZone,
) -> Vec<course_content::ActiveModel> {
    let rows = sections
        .iter()
        .flat_map(|section| {
            section.modules.iter().map(move |module| {
                (
                    module.id,
                    content_row(user_id, connection_id, course_id, section, module, now),
                )
            })
        })
        .collect();

    dedupe_last_wins(rows)
}

/// Keep the last row per key, in first-seen order.
///
/// Postgres refuses to update the same row twice within one
/// `INSERT .. ON CONFLICT` statement.
pub fn dedupe_last_wins<K, T>(rows: Vec<(K, T)>) -> Vec<T>
where
    K: Eq + Hash,
{
    let mut positions: HashMap<K, usize> = HashMap::with_capacity(rows.len());
    let mut out: Vec<T> = Vec::with_capacity(rows.len());

    for (key, row) in rows {
        match positions.get(&key) {
            Some(&idx) => out[idx] = row,
            None => {
                positions.insert(key, out.len());
                out.push(row);
            }
        }
    }

    out
}

fn non_blank(value: Option<&str>, default: &str) -> String {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .unwrap_or(default)
        .to_string()
}

/// Read-side buckets for the assignment list, each sorted by due date.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AssignmentGroups {
    pub completed: Vec<assignment::Model>,
    pub overdue: Vec<assignment::Model>,
    pub due_today: Vec<assignment::Model>,
    pub due_soon: Vec<assignment::Model>,
    pub upcoming: Vec<assignment::Model>,
}

/// Bucket stored assignments relative to `now`.
///
/// Completed wins over everything. `due_today` is the rest of the current UTC
/// day, `due_soon` runs from there to `now + due_soon_window`, and rows
/// without a due date are upcoming. Rows without a due date sort last.
pub fn group_assignments(
    rows: Vec<assignment::Model>,
    now: DateTime<Utc>,
    due_soon_window: Duration,
) -> AssignmentGroups {
    let horizon = now + due_soon_window;
    let day_end = now
        .date_naive()
        .succ_opt()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|midnight| midnight.and_utc())
        .unwrap_or(horizon);
    let mut groups = AssignmentGroups::default();

    for row in rows {
        if row.completed {
            groups.completed.push(row);
            continue;
        }

        match row.due_date.map(|d| d.with_timezone(&Utc)) {
            Some(due) if due < now => groups.overdue.push(row),
            Some(due) if due < day_end => groups.due_today.push(row),
            Some(due) if due <= horizon => groups.due_soon.push(row),
            _ => groups.upcoming.push(row),
        }
    }

    for bucket in [
        &mut groups.completed,
        &mut groups.overdue,
        &mut groups.due_today,
        &mut groups.due_soon,
        &mut groups.upcoming,
    ] {
        bucket.sort_by_key(|row| (row.due_date.is_none(), row.due_date, row.assignment_id));
    }

    groups
}

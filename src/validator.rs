//! Independent check of a finished timetable against the school configuration.
//!
//! Nothing the scheduler tracked internally is trusted here; every count and
//! booking is re-derived from the timetable itself. Class double-booking is not
//! checked because [`Timetable`] cannot represent it.

use crate::data::{ClassId, Day, Period, SchoolConfig, SlotIndex, Subject, TeacherId, Timetable};
use itertools::Itertools;
use serde::Serialize;
use std::collections::HashSet;
use std::fmt;

/// A broken hard constraint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Violation {
    /// Fewer lessons than required for a class/subject pair.
    MissingPeriods {
        class: ClassId,
        subject: Subject,
        actual: u32,
        required: u32,
    },
    /// A teacher appears in more than one class within a slot. One record per extra occurrence.
    TeacherDoubleBooked {
        teacher: TeacherId,
        day: Day,
        period: Period,
    },
    /// A teacher is teaching a subject outside their capabilities.
    UnqualifiedTeacher {
        teacher: TeacherId,
        subject: Subject,
        class: ClassId,
        day: Day,
        period: Period,
    },
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Violation::MissingPeriods {
                class,
                subject,
                actual,
                required,
            } => write!(
                f,
                "{class} has only {actual} periods of {subject}, but requires {required}"
            ),
            Violation::TeacherDoubleBooked {
                teacher,
                day,
                period,
            } => write!(f, "{teacher} is double-booked on {day} period {period}"),
            Violation::UnqualifiedTeacher {
                teacher,
                subject,
                class,
                day,
                period,
            } => write!(
                f,
                "{teacher} is teaching {subject} to {class} on {day} period {period}"
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationReport {
    pub ok: bool,
    pub violations: Vec<Violation>,
}

/// Runs all checks and returns every violation found, grouped by check in the
/// order: completeness, teacher double-booking, qualification.
pub fn validate(timetable: &Timetable, config: &SchoolConfig) -> ValidationReport {
    let mut violations = missing_periods(timetable, config);
    violations.extend(teacher_double_bookings(timetable));
    violations.extend(unqualified_teachers(timetable, config));

    ValidationReport {
        ok: violations.is_empty(),
        violations,
    }
}

fn missing_periods(timetable: &Timetable, config: &SchoolConfig) -> Vec<Violation> {
    let counts = timetable
        .lessons()
        .map(|(_, class, lesson)| (class, lesson.subject.as_str()))
        .counts();

    config
        .classes
        .iter()
        .filter_map(|class| config.requirements.get(class).map(|req| (class, req)))
        .flat_map(|(class, req)| {
            req.iter()
                .map(move |(subject, &required)| (class, subject, required))
        })
        .filter_map(|(class, subject, required)| {
            let actual = counts
                .get(&(class.as_str(), subject.as_str()))
                .copied()
                .unwrap_or(0) as u32;
            (actual < required).then(|| Violation::MissingPeriods {
                class: class.clone(),
                subject: subject.clone(),
                actual,
                required,
            })
        })
        .collect()
}

fn teacher_double_bookings(timetable: &Timetable) -> Vec<Violation> {
    let mut seen: HashSet<(SlotIndex, &str)> = HashSet::new();
    timetable
        .lessons()
        .filter(|(slot, _, lesson)| !seen.insert((*slot, lesson.teacher.as_str())))
        .map(|(slot, _, lesson)| Violation::TeacherDoubleBooked {
            teacher: lesson.teacher.clone(),
            day: timetable.day_label(slot).to_string(),
            period: slot.period,
        })
        .collect()
}

// a teacher missing from the config is never qualified
fn unqualified_teachers(timetable: &Timetable, config: &SchoolConfig) -> Vec<Violation> {
    timetable
        .lessons()
        .filter(|(_, _, lesson)| {
            config
                .teacher(&lesson.teacher)
                .is_none_or(|t| !t.can_teach(&lesson.subject))
        })
        .map(|(slot, class, lesson)| Violation::UnqualifiedTeacher {
            teacher: lesson.teacher.clone(),
            subject: lesson.subject.clone(),
            class: class.to_string(),
            day: timetable.day_label(slot).to_string(),
            period: slot.period,
        })
        .collect()
}

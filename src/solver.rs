use crate::data::{ConfigError, DemandUnit, Lesson, SchoolConfig, SlotIndex, Timetable};
use crate::validator::{self, ValidationReport};
use itertools::Itertools;
use log::{info, trace, warn};
use rand::Rng;
use rand::seq::SliceRandom;
use std::collections::{HashMap, HashSet};
use std::iter;
use std::time::Instant;

/// Output of a single scheduling run.
#[derive(Debug, Clone)]
pub struct ScheduleOutcome {
    pub timetable: Timetable,
    pub unassigned: Vec<DemandUnit>,
}

/// The run kept by [`solve`], with its validation report.
#[derive(Debug, Clone)]
pub struct SolveResult {
    pub outcome: ScheduleOutcome,
    pub report: ValidationReport,
    /// How many runs were made before stopping.
    pub attempts: u32,
}

/// One demand unit per required period, classes in configured order.
pub fn expand_demand(config: &SchoolConfig) -> Vec<DemandUnit> {
    config
        .classes
        .iter()
        .filter_map(|class| config.requirements.get(class).map(|req| (class, req)))
        .flat_map(|(class, req)| {
            req.iter().flat_map(move |(subject, &count)| {
                let unit = DemandUnit {
                    class: class.clone(),
                    subject: subject.clone(),
                };
                iter::repeat_n(unit, count as usize)
            })
        })
        .collect()
}

/// Greedy randomized scheduling: shuffle the demand, then place each unit first-fit.
pub fn schedule<R: Rng + ?Sized>(config: &SchoolConfig, rng: &mut R) -> ScheduleOutcome {
    let mut units = expand_demand(config);
    units.shuffle(rng);
    place_in_order(config, units)
}

/// Places demand units in the given order.
///
/// Each unit takes the first slot (days in order, then periods) where its class
/// is free and some qualified teacher is free, choosing the first such teacher in
/// declaration order. A unit that fits nowhere is recorded as unassigned and never
/// retried; earlier placements are never moved.
pub fn place_in_order(
    config: &SchoolConfig,
    units: impl IntoIterator<Item = DemandUnit>,
) -> ScheduleOutcome {
    let start_time = Instant::now();
    let qualified: HashMap<&str, Vec<&str>> = config
        .teachers
        .iter()
        .flat_map(|t| t.subjects.iter().map(move |s| (s.as_str(), t.name.as_str())))
        .into_group_map();

    let mut timetable = Timetable::empty(config);
    let mut booked: HashSet<(SlotIndex, &str)> = HashSet::new();
    let mut unassigned = Vec::new();
    let mut total = 0usize;

    for unit in units {
        total += 1;
        let teachers = qualified
            .get(unit.subject.as_str())
            .map(Vec::as_slice)
            .unwrap_or_default();

        let placement = timetable
            .slots()
            .filter(|&slot| !timetable.has_class(slot, &unit.class))
            .find_map(|slot| {
                teachers
                    .iter()
                    .find(|&&teacher| !booked.contains(&(slot, teacher)))
                    .map(|&teacher| (slot, teacher))
            });

        let Some((slot, teacher)) = placement else {
            trace!("No free slot or teacher for {}", unit);
            unassigned.push(unit);
            continue;
        };

        let lesson = Lesson {
            subject: unit.subject.clone(),
            teacher: teacher.to_string(),
        };
        match timetable.place(slot, unit.class.clone(), lesson) {
            Ok(()) => {
                booked.insert((slot, teacher));
            }
            Err(e) => {
                warn!("Dropping {}: {}", unit, e);
                unassigned.push(unit);
            }
        }
    }

    info!(
        "Placed {} of {} demand units in {:.2?}",
        timetable.len(),
        total,
        start_time.elapsed()
    );
    if !unassigned.is_empty() {
        warn!(
            "{} periods could not be assigned: {}",
            unassigned.len(),
            unassigned.iter().join(", ")
        );
    }

    ScheduleOutcome {
        timetable,
        unassigned,
    }
}

/// solves the timetabling problem with up to `max_attempts` independent runs.
///
/// Stops at the first run that validates; otherwise keeps the run with the fewest
/// unassigned units, earliest first on ties. A malformed config is the only error.
pub fn solve<R: Rng + ?Sized>(
    config: &SchoolConfig,
    max_attempts: u32,
    rng: &mut R,
) -> Result<SolveResult, ConfigError> {
    let start_time = Instant::now();
    config.validate()?;

    let unstaffed = config.unstaffed_subjects();
    if !unstaffed.is_empty() {
        warn!(
            "No qualified teacher for: {}; those periods will stay unassigned",
            unstaffed.iter().join(", ")
        );
    }

    let max_attempts = max_attempts.max(1);
    info!(
        "Scheduling {} periods for {} classes over {} slots ({} teachers, up to {} attempts)...",
        config.total_demand(),
        config.classes.len(),
        config.slot_count(),
        config.teachers.len(),
        max_attempts
    );

    let (mut outcome, mut report) = run_once(config, rng);
    let mut attempts = 1;
    while !report.ok && attempts < max_attempts {
        let (candidate, candidate_report) = run_once(config, rng);
        attempts += 1;
        trace!(
            "Attempt {}: {} unassigned, {} violations",
            attempts,
            candidate.unassigned.len(),
            candidate_report.violations.len()
        );
        if candidate_report.ok || candidate.unassigned.len() < outcome.unassigned.len() {
            outcome = candidate;
            report = candidate_report;
        }
    }

    if report.ok {
        info!(
            "Valid timetable found after {} attempt(s) in {:.2?}",
            attempts,
            start_time.elapsed()
        );
    } else {
        warn!(
            "No valid timetable after {} attempt(s); best run leaves {} periods unassigned",
            attempts,
            outcome.unassigned.len()
        );
    }

    Ok(SolveResult {
        outcome,
        report,
        attempts,
    })
}

fn run_once<R: Rng + ?Sized>(
    config: &SchoolConfig,
    rng: &mut R,
) -> (ScheduleOutcome, ValidationReport) {
    let outcome = schedule(config, rng);
    let report = validator::validate(&outcome.timetable, config);
    (outcome, report)
}

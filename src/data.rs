use itertools::Itertools;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::collections::btree_map::Entry;
use std::fmt;
use std::fs;
use std::path::Path;
use thiserror::Error;

// Type aliases for clarity
pub type ClassId = String;
pub type Subject = String;
pub type TeacherId = String;
pub type Day = String;
pub type Period = u32;

/// Upper bound on the number of demand units a single config may expand to.
pub const MAX_TOTAL_DEMAND: u64 = 100_000;

/// A teacher together with the subjects they are qualified to teach.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Teacher {
    pub name: TeacherId,
    pub subjects: Vec<Subject>,
}

impl Teacher {
    pub fn new(name: impl Into<TeacherId>, subjects: &[&str]) -> Self {
        Self {
            name: name.into(),
            subjects: subjects.iter().map(|s| s.to_string()).collect(),
        }
    }

    pub fn can_teach(&self, subject: &str) -> bool {
        self.subjects.iter().any(|s| s == subject)
    }
}

/// The complete, read-only input for a timetabling run.
///
/// `requirements` maps class -> subject -> weekly periods. Teachers are kept as
/// a list because their declared order is the order the scheduler tries them in.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SchoolConfig {
    pub classes: Vec<ClassId>,
    pub subjects: Vec<Subject>,
    pub requirements: BTreeMap<ClassId, BTreeMap<Subject, u32>>,
    pub teachers: Vec<Teacher>,
    pub days: Vec<Day>,
    pub periods_per_day: Period,
}

/// Rejected configuration. Raised before any scheduling happens.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Duplicate class: {0}")]
    DuplicateClass(String),

    #[error("Duplicate subject: {0}")]
    DuplicateSubject(String),

    #[error("Duplicate teacher: {0}")]
    DuplicateTeacher(String),

    #[error("Duplicate day: {0}")]
    DuplicateDay(String),

    #[error("At least one day is required")]
    NoDays,

    #[error("Periods per day must be positive")]
    NoPeriods,

    #[error("Total demand of {total} periods exceeds the limit of {limit}")]
    TooMuchDemand { total: u64, limit: u64 },

    #[error("Requirements reference unknown class: {0}")]
    UnknownClass(String),

    #[error("{class} requires unknown subject: {subject}")]
    UnknownRequiredSubject { class: String, subject: String },

    #[error("Teacher {0} has no subjects")]
    TeacherWithoutSubjects(String),

    #[error("Teacher {teacher} lists unknown subject: {subject}")]
    UnknownTeacherSubject { teacher: String, subject: String },

    #[error("Failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
}

impl SchoolConfig {
    /// The built-in school: four classes, six subjects, a five-day week of six periods.
    pub fn sample() -> Self {
        let subjects = [
            "Mathematics",
            "Science",
            "English",
            "Social Studies",
            "Computer Science",
            "Physical Education",
        ];
        let periods = |counts: [u32; 6]| -> BTreeMap<Subject, u32> {
            subjects
                .iter()
                .zip(counts)
                .map(|(s, n)| (s.to_string(), n))
                .collect()
        };

        Self {
            classes: ["Class 6A", "Class 6B", "Class 7A", "Class 7B"]
                .map(String::from)
                .to_vec(),
            subjects: subjects.map(String::from).to_vec(),
            requirements: BTreeMap::from([
                ("Class 6A".to_string(), periods([6, 6, 6, 6, 3, 3])),
                ("Class 6B".to_string(), periods([6, 6, 6, 6, 3, 3])),
                ("Class 7A".to_string(), periods([6, 6, 6, 6, 4, 2])),
                ("Class 7B".to_string(), periods([6, 6, 6, 6, 4, 2])),
            ]),
            teachers: vec![
                Teacher::new("Mr. Kumar", &["Mathematics"]),
                Teacher::new("Mrs. Sharma", &["Mathematics"]),
                Teacher::new("Ms. Gupta", &["Science"]),
                Teacher::new("Mr. Singh", &["Science", "Social Studies"]),
                Teacher::new("Mrs. Patel", &["English"]),
                Teacher::new("Mr. Joshi", &["English", "Social Studies"]),
                Teacher::new("Mr. Malhotra", &["Computer Science"]),
                Teacher::new("Mr. Chauhan", &["Physical Education"]),
            ],
            days: ["Monday", "Tuesday", "Wednesday", "Thursday", "Friday"]
                .map(String::from)
                .to_vec(),
            periods_per_day: 6,
        }
    }

    /// Loads and validates a configuration from a JSON file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks well-formedness, returning the first problem found.
    ///
    /// A required subject nobody can teach is allowed; see [`Self::unstaffed_subjects`].
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(class) = self.classes.iter().duplicates().next() {
            return Err(ConfigError::DuplicateClass(class.clone()));
        }
        if let Some(subject) = self.subjects.iter().duplicates().next() {
            return Err(ConfigError::DuplicateSubject(subject.clone()));
        }
        if let Some(teacher) = self.teachers.iter().map(|t| &t.name).duplicates().next() {
            return Err(ConfigError::DuplicateTeacher(teacher.clone()));
        }
        if self.days.is_empty() {
            return Err(ConfigError::NoDays);
        }
        if let Some(day) = self.days.iter().duplicates().next() {
            return Err(ConfigError::DuplicateDay(day.clone()));
        }
        if self.periods_per_day == 0 {
            return Err(ConfigError::NoPeriods);
        }

        for (class, subjects) in &self.requirements {
            if !self.classes.contains(class) {
                return Err(ConfigError::UnknownClass(class.clone()));
            }
            if let Some(subject) = subjects.keys().find(|s| !self.subjects.contains(s)) {
                return Err(ConfigError::UnknownRequiredSubject {
                    class: class.clone(),
                    subject: subject.clone(),
                });
            }
        }

        let total = self.total_demand();
        if total > MAX_TOTAL_DEMAND {
            return Err(ConfigError::TooMuchDemand {
                total,
                limit: MAX_TOTAL_DEMAND,
            });
        }

        for teacher in &self.teachers {
            if teacher.subjects.is_empty() {
                return Err(ConfigError::TeacherWithoutSubjects(teacher.name.clone()));
            }
            if let Some(subject) = teacher.subjects.iter().find(|s| !self.subjects.contains(s)) {
                return Err(ConfigError::UnknownTeacherSubject {
                    teacher: teacher.name.clone(),
                    subject: subject.clone(),
                });
            }
        }

        Ok(())
    }

    /// Subjects with non-zero demand that no teacher is qualified for.
    pub fn unstaffed_subjects(&self) -> Vec<&str> {
        self.requirements
            .values()
            .flat_map(|subjects| subjects.iter())
            .filter(|(_, count)| **count > 0)
            .map(|(subject, _)| subject.as_str())
            .filter(|subject| !self.teachers.iter().any(|t| t.can_teach(subject)))
            .unique()
            .collect()
    }

    pub fn teacher(&self, name: &str) -> Option<&Teacher> {
        self.teachers.iter().find(|t| t.name == name)
    }

    /// Total number of demand units across all classes and subjects.
    pub fn total_demand(&self) -> u64 {
        self.requirements
            .values()
            .flat_map(|subjects| subjects.values())
            .map(|&count| u64::from(count))
            .sum()
    }

    pub fn slot_count(&self) -> usize {
        self.days.len() * self.periods_per_day as usize
    }
}

/// One required weekly period of `subject` for `class`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize, Serialize)]
pub struct DemandUnit {
    pub class: ClassId,
    pub subject: Subject,
}

impl fmt::Display for DemandUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} for {}", self.subject, self.class)
    }
}

/// A (day, period) coordinate. `day` indexes the configured day list; periods start at 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SlotIndex {
    pub day: usize,
    pub period: Period,
}

/// What a class is doing in a given slot.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Lesson {
    pub subject: Subject,
    pub teacher: TeacherId,
}

/// A flat, self-describing record of one placed lesson.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize, Serialize)]
pub struct Assignment {
    pub class: ClassId,
    pub subject: Subject,
    pub teacher: TeacherId,
    pub day: Day,
    pub period: Period,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TimetableError {
    #[error("{class} already has a lesson on {day} period {period}")]
    ClassAlreadyBooked {
        class: ClassId,
        day: Day,
        period: Period,
    },

    #[error("Unknown day: {0}")]
    UnknownDay(String),

    #[error("Day index {0} is outside the configured week")]
    DayOutOfRange(usize),

    #[error("Period {period} is outside 1..={periods_per_day}")]
    PeriodOutOfRange {
        period: Period,
        periods_per_day: Period,
    },
}

/// A weekly grid: slot -> class -> lesson.
///
/// Keying each slot by class means a class can never hold two lessons in the
/// same slot; [`Timetable::place`] rejects the attempt instead of overwriting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Timetable {
    days: Vec<Day>,
    periods_per_day: Period,
    cells: BTreeMap<SlotIndex, BTreeMap<ClassId, Lesson>>,
}

impl Timetable {
    pub fn empty(config: &SchoolConfig) -> Self {
        Self {
            days: config.days.clone(),
            periods_per_day: config.periods_per_day,
            cells: BTreeMap::new(),
        }
    }

    pub fn from_assignments(
        config: &SchoolConfig,
        assignments: impl IntoIterator<Item = Assignment>,
    ) -> Result<Self, TimetableError> {
        let mut timetable = Self::empty(config);
        for assignment in assignments {
            timetable.insert(assignment)?;
        }
        Ok(timetable)
    }

    /// Every slot of the week: days in configured order, then periods 1..=n.
    pub fn slots(&self) -> impl Iterator<Item = SlotIndex> {
        let periods = self.periods_per_day;
        (0..self.days.len())
            .flat_map(move |day| (1..=periods).map(move |period| SlotIndex { day, period }))
    }

    pub fn day_label(&self, slot: SlotIndex) -> &str {
        &self.days[slot.day]
    }

    pub fn has_class(&self, slot: SlotIndex, class: &str) -> bool {
        self.cells
            .get(&slot)
            .is_some_and(|cell| cell.contains_key(class))
    }

    pub fn place(
        &mut self,
        slot: SlotIndex,
        class: impl Into<ClassId>,
        lesson: Lesson,
    ) -> Result<(), TimetableError> {
        if slot.day >= self.days.len() {
            return Err(TimetableError::DayOutOfRange(slot.day));
        }
        if slot.period == 0 || slot.period > self.periods_per_day {
            return Err(TimetableError::PeriodOutOfRange {
                period: slot.period,
                periods_per_day: self.periods_per_day,
            });
        }

        match self.cells.entry(slot).or_default().entry(class.into()) {
            Entry::Occupied(occupied) => Err(TimetableError::ClassAlreadyBooked {
                class: occupied.key().clone(),
                day: self.days[slot.day].clone(),
                period: slot.period,
            }),
            Entry::Vacant(vacant) => {
                vacant.insert(lesson);
                Ok(())
            }
        }
    }

    pub fn insert(&mut self, assignment: Assignment) -> Result<(), TimetableError> {
        let day = self
            .days
            .iter()
            .position(|d| *d == assignment.day)
            .ok_or_else(|| TimetableError::UnknownDay(assignment.day.clone()))?;
        let lesson = Lesson {
            subject: assignment.subject,
            teacher: assignment.teacher,
        };
        self.place(
            SlotIndex {
                day,
                period: assignment.period,
            },
            assignment.class,
            lesson,
        )
    }

    /// All lessons in slot order, classes sorted within a slot.
    pub fn lessons(&self) -> impl Iterator<Item = (SlotIndex, &str, &Lesson)> {
        self.cells.iter().flat_map(|(slot, cell)| {
            cell.iter()
                .map(move |(class, lesson)| (*slot, class.as_str(), lesson))
        })
    }

    pub fn len(&self) -> usize {
        self.cells.values().map(BTreeMap::len).sum()
    }

    pub fn assignments(&self) -> Vec<Assignment> {
        self.lessons()
            .map(|(slot, class, lesson)| self.to_assignment(slot, class, lesson))
            .collect()
    }

    /// One class's week.
    pub fn for_class(&self, class: &str) -> Vec<Assignment> {
        self.lessons()
            .filter(|(_, c, _)| *c == class)
            .map(|(slot, c, lesson)| self.to_assignment(slot, c, lesson))
            .collect()
    }

    /// One teacher's week.
    pub fn for_teacher(&self, teacher: &str) -> Vec<Assignment> {
        self.lessons()
            .filter(|(_, _, lesson)| lesson.teacher == teacher)
            .map(|(slot, class, lesson)| self.to_assignment(slot, class, lesson))
            .collect()
    }

    fn to_assignment(&self, slot: SlotIndex, class: &str, lesson: &Lesson) -> Assignment {
        Assignment {
            class: class.to_string(),
            subject: lesson.subject.clone(),
            teacher: lesson.teacher.clone(),
            day: self.day_label(slot).to_string(),
            period: slot.period,
        }
    }
}

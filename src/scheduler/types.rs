use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::error::SchedulerError;
use super::scorer;

pub const STRENGTH_MIN: f64 = 0.5;
pub const STRENGTH_MAX: f64 = 15.0;
pub const PRIORITY_MIN: f64 = 0.1;
pub const PRIORITY_MAX: f64 = 100.0;
pub const DEFAULT_INITIAL_STRENGTH: f64 = 3.0;
pub const STREAK_FLOOR: i64 = -2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryPhase {
    Initial,
    Retention,
    Mastered,
}

impl MemoryPhase {
    /// Mastered needs four reviews with no outstanding errors; any second
    /// review otherwise moves a word into retention.
    pub fn derive(review_count: i64, error_count: i64) -> Self {
        if review_count >= 4 && error_count == 0 {
            Self::Mastered
        } else if review_count > 1 {
            Self::Retention
        } else {
            Self::Initial
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Initial => "initial",
            Self::Retention => "retention",
            Self::Mastered => "mastered",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "initial" => Some(Self::Initial),
            "retention" => Some(Self::Retention),
            "mastered" => Some(Self::Mastered),
            _ => None,
        }
    }
}

impl fmt::Display for MemoryPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub date: DateTime<Utc>,
    pub interval: f64,
    pub correct: bool,
    pub strength: f64,
}

/// Ordered review log. Entries can only be appended.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HistoryLog(Vec<HistoryEntry>);

impl HistoryLog {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn push(&mut self, entry: HistoryEntry) {
        self.0.push(entry);
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn last(&self) -> Option<&HistoryEntry> {
        self.0.last()
    }

    pub fn iter(&self) -> impl Iterator<Item = &HistoryEntry> {
        self.0.iter()
    }
}

impl FromIterator<HistoryEntry> for HistoryLog {
    fn from_iter<I: IntoIterator<Item = HistoryEntry>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryRecord {
    pub id: String,
    pub user_id: String,
    pub word_id: String,
    pub memory_strength: f64,
    pub initial_strength: f64,
    pub correct_streak: i64,
    pub error_count: i64,
    pub review_count: i64,
    pub priority: f64,
    pub memory_phase: MemoryPhase,
    pub next_review: DateTime<Utc>,
    pub last_review: DateTime<Utc>,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub history_intervals: HistoryLog,
}

impl MemoryRecord {
    /// A never-reviewed record, due immediately.
    pub fn new(
        user_id: impl Into<String>,
        word_id: impl Into<String>,
        initial_strength: f64,
        now: DateTime<Utc>,
    ) -> Self {
        let mut record = Self {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.into(),
            word_id: word_id.into(),
            memory_strength: initial_strength.clamp(STRENGTH_MIN, STRENGTH_MAX),
            initial_strength,
            correct_streak: 0,
            error_count: 0,
            review_count: 0,
            priority: PRIORITY_MIN,
            memory_phase: MemoryPhase::Initial,
            next_review: now,
            last_review: now,
            version: 0,
            created_at: now,
            history_intervals: HistoryLog::new(),
        };
        record.priority = scorer::calculate_priority(&record, now);
        record
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.next_review <= now
    }

    pub fn is_new(&self) -> bool {
        self.review_count == 0
    }
}

/// What the request layer gets back after a feedback event.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedbackOutcome {
    pub record_id: String,
    pub priority: f64,
    pub next_review: DateTime<Utc>,
    pub phase: MemoryPhase,
}

impl From<&MemoryRecord> for FeedbackOutcome {
    fn from(record: &MemoryRecord) -> Self {
        Self {
            record_id: record.id.clone(),
            priority: record.priority,
            next_review: record.next_review,
            phase: record.memory_phase,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedbackAction {
    Know,
    Forget,
}

impl FeedbackAction {
    pub fn is_correct(self) -> bool {
        matches!(self, Self::Know)
    }
}

impl FromStr for FeedbackAction {
    type Err = SchedulerError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "know" | "known" => Ok(Self::Know),
            "forget" | "unknown" | "not_known" => Ok(Self::Forget),
            other => Err(SchedulerError::InvalidFeedback(format!(
                "unsupported feedback action: {other:?}"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Created,
    InProgress,
    Completed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "created" => Some(Self::Created),
            "in_progress" => Some(Self::InProgress),
            "completed" => Some(Self::Completed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskWordStatus {
    New,
    Retry,
    Known,
}

impl TaskWordStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::New => "new",
            Self::Retry => "retry",
            Self::Known => "known",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "new" => Some(Self::New),
            "retry" => Some(Self::Retry),
            "known" => Some(Self::Known),
            _ => None,
        }
    }

    pub fn is_pending(&self) -> bool {
        !matches!(self, Self::Known)
    }

    pub fn after_feedback(is_correct: bool) -> Self {
        if is_correct {
            Self::Known
        } else {
            Self::Retry
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskWord {
    pub id: String,
    pub task_id: String,
    pub record_id: String,
    pub word_id: String,
    pub word: String,
    pub status: TaskWordStatus,
    pub priority: f64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyTask {
    pub id: String,
    pub user_id: String,
    pub task_date: NaiveDate,
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub words: Vec<TaskWord>,
}

impl DailyTask {
    pub fn is_completed(&self) -> bool {
        self.status == TaskStatus::Completed
    }

    pub fn pending_count(&self) -> usize {
        self.words.iter().filter(|w| w.status.is_pending()).count()
    }
}

//! Spaced-repetition core: pure scoring and state transitions with no I/O.

pub mod error;
pub mod random;
pub mod review;
pub mod scorer;
pub mod types;

pub use error::SchedulerError;
pub use random::{FixedSource, RandomSource, RngSource};
pub use review::{apply_feedback, ReviewOutcome};
pub use types::{
    DailyTask, FeedbackAction, FeedbackOutcome, HistoryEntry, HistoryLog, MemoryPhase,
    MemoryRecord, TaskStatus, TaskWord, TaskWordStatus,
};

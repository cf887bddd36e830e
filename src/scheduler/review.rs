use chrono::{DateTime, Duration, Utc};

use super::random::RandomSource;
use super::scorer;
use super::types::{HistoryEntry, MemoryPhase, MemoryRecord, STREAK_FLOOR};

#[derive(Debug, Clone)]
pub struct ReviewOutcome {
    pub record: MemoryRecord,
    pub entry: HistoryEntry,
    pub interval_days: f64,
}

/// Computes the state of `record` after one answer. The input is left
/// untouched; the caller persists the returned snapshot.
///
/// Draw order from `rng`: strength noise, interval jitter, due-time jitter.
pub fn apply_feedback(
    record: &MemoryRecord,
    is_correct: bool,
    now: DateTime<Utc>,
    rng: &mut dyn RandomSource,
) -> ReviewOutcome {
    let mut next = record.clone();
    next.review_count += 1;

    if is_correct {
        next.correct_streak += 1;
        next.error_count = (next.error_count - 1).max(0);
    } else {
        next.correct_streak = (next.correct_streak - 2).max(STREAK_FLOOR);
        next.error_count += 1;
    }

    next.memory_phase = MemoryPhase::derive(next.review_count, next.error_count);
    next.memory_strength = scorer::update_strength(&next, rng);
    // last_review still points at the previous answer here
    next.priority = scorer::calculate_priority(&next, now);
    let interval_days = scorer::calculate_interval(&next, rng);

    let entry = HistoryEntry {
        date: now,
        interval: interval_days,
        correct: is_correct,
        strength: scorer::round_to(next.memory_strength, 2),
    };
    next.history_intervals.push(entry.clone());

    let due_in_days = interval_days * scorer::interval_jitter(rng);
    next.next_review = now + days_to_duration(due_in_days);
    next.last_review = now;
    next.version += 1;

    ReviewOutcome {
        record: next,
        entry,
        interval_days,
    }
}

pub fn days_to_duration(days: f64) -> Duration {
    Duration::milliseconds((days * 86_400_000.0).round() as i64)
}

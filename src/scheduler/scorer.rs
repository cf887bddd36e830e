//! Memory strength, review priority and review interval.
//!
//! All three are pure functions of a record's counters. The only randomness
//! is the bounded jitter drawn from the supplied [`RandomSource`], which keeps
//! words reviewed together from staying in lock-step.

use chrono::{DateTime, Utc};

use super::random::RandomSource;
use super::types::{MemoryPhase, MemoryRecord, PRIORITY_MAX, PRIORITY_MIN, STRENGTH_MAX, STRENGTH_MIN};

/// Base review interval in days, indexed by `review_count - 1`.
pub const INTERVAL_TABLE: [i64; 6] = [1, 2, 4, 7, 12, 21];
pub const MAX_INTERVAL_DAYS: i64 = 60;

const STRENGTH_NOISE: (f64, f64) = (0.95, 1.05);
const INTERVAL_JITTER: (f64, f64) = (0.9, 1.1);
const GRACE_DAYS: f64 = 3.0;
const MS_PER_DAY: f64 = 86_400_000.0;

pub fn update_strength(record: &MemoryRecord, rng: &mut dyn RandomSource) -> f64 {
    let base = record.initial_strength + 1.5_f64.powi(record.correct_streak as i32);
    let penalty = 0.8 * (1.0 + record.error_count.max(0) as f64).ln();
    let noise = rng.uniform(STRENGTH_NOISE.0, STRENGTH_NOISE.1);
    ((base - penalty) * noise).clamp(STRENGTH_MIN, STRENGTH_MAX)
}

pub fn calculate_priority(record: &MemoryRecord, now: DateTime<Utc>) -> f64 {
    let days_since = (now - record.last_review).num_milliseconds() as f64 / MS_PER_DAY;
    // urgency only starts compounding after the grace period
    let time_factor = 1.2_f64.powf((days_since - GRACE_DAYS).max(0.0));
    let strength_term = 10.0 / (1.0 + record.memory_strength.max(0.0).powf(0.7));
    let error_term = 1.0 + 0.3 * (1.0 + record.error_count.max(0) as f64).ln();
    let phase_boost = if record.memory_phase == MemoryPhase::Initial {
        2.0
    } else {
        1.0
    };

    let priority = strength_term * error_term * time_factor * phase_boost;
    if priority.is_nan() {
        return PRIORITY_MAX;
    }
    priority.clamp(PRIORITY_MIN, PRIORITY_MAX)
}

/// Interval before the base jitter is applied.
pub fn base_interval_days(record: &MemoryRecord) -> i64 {
    let base = if record.review_count <= 0 {
        1
    } else {
        let idx = (record.review_count - 1).clamp(0, INTERVAL_TABLE.len() as i64 - 1);
        INTERVAL_TABLE[idx as usize]
    };

    if record.error_count >= 2 {
        (base / 2).max(1)
    } else if record.correct_streak >= 3 {
        (base * 2).min(MAX_INTERVAL_DAYS)
    } else {
        base
    }
}

pub fn calculate_interval(record: &MemoryRecord, rng: &mut dyn RandomSource) -> f64 {
    let base = base_interval_days(record) as f64;
    round_to(base * rng.uniform(INTERVAL_JITTER.0, INTERVAL_JITTER.1), 1)
}

pub fn interval_jitter(rng: &mut dyn RandomSource) -> f64 {
    rng.uniform(INTERVAL_JITTER.0, INTERVAL_JITTER.1)
}

pub fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10_f64.powi(decimals);
    (value * factor).round() / factor
}

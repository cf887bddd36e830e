use std::time::Instant;

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::db::ReviewStore;
use crate::services::records;

#[derive(Debug, Default)]
pub struct RefreshStats {
    pub users: usize,
    pub updated_records: usize,
    pub failed_users: usize,
    pub duration_secs: f64,
}

/// Recomputes stored priorities for every user with records. A failing
/// user is logged and skipped.
pub async fn refresh_all_users(store: ReviewStore) -> Result<RefreshStats, super::WorkerError> {
    let start = Instant::now();
    debug!("Starting priority refresh cycle");

    let user_ids = records::list_user_ids(&store).await?;
    let now = Utc::now();

    let mut stats = RefreshStats {
        users: user_ids.len(),
        ..RefreshStats::default()
    };

    for user_id in &user_ids {
        match records::refresh_priorities(&store, user_id, now).await {
            Ok(updated) => stats.updated_records += updated,
            Err(err) => {
                stats.failed_users += 1;
                warn!(user_id = %user_id, error = %err, "priority refresh failed");
            }
        }
    }

    stats.duration_secs = start.elapsed().as_secs_f64();

    info!(
        users = stats.users,
        updated_records = stats.updated_records,
        failed_users = stats.failed_users,
        duration_secs = format!("{:.2}", stats.duration_secs),
        "Priority refresh completed"
    );

    Ok(stats)
}

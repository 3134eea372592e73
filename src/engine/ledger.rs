//! The only writer of `point_transactions` and of a user's running total.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::status::is_first_time_completion;
use crate::error::EngineError;
use crate::models::{PointTransaction, ProgressStatus, UserProgress};
use crate::store::StoreTx;

/// Appends a ledger entry and bumps the user's total when `row` is the
/// first completion of its lesson. Returns the points awarded, zero when
/// not eligible.
///
/// Must run inside the same transaction that wrote `row`; both writes land
/// or neither does.
pub async fn award_if_eligible(
    tx: &mut dyn StoreTx,
    previous: Option<&UserProgress>,
    row: &UserProgress,
    points: i32,
    reason: String,
    now: DateTime<Utc>,
) -> Result<i32, EngineError> {
    let was_completed = previous.is_some_and(|p| p.status == ProgressStatus::Completed);
    if was_completed || !is_first_time_completion(row) || points <= 0 {
        return Ok(0);
    }

    let total = tx
        .increment_points(row.user_id, points)
        .await?
        .ok_or(EngineError::UnknownUser(row.user_id))?;

    tx.append_point_transaction(&PointTransaction {
        id: Uuid::new_v4(),
        user_id: row.user_id,
        lesson_id: Some(row.lesson_id),
        points,
        reason,
        created_at: now,
    })
    .await?;

    tracing::info!(user_id = %row.user_id, lesson_id = %row.lesson_id, points, total, "points awarded");
    Ok(points)
}

//! Daily activity streaks.
//!
//! Days are calendar dates in one fixed offset, not 24 hour windows, so a
//! user active at 23:50 and again at 00:10 has continued their streak.

use chrono::{DateTime, FixedOffset, Utc};
use uuid::Uuid;

use super::retry_on_conflict;
use crate::config::Settings;
use crate::error::EngineError;
use crate::models::{StreakResp, User};
use crate::store::{ProgressStore, StreakUpdate};

/// Whole calendar days from `last` to `now` in `offset`.
pub fn calendar_days_between(
    last: DateTime<Utc>,
    now: DateTime<Utc>,
    offset: FixedOffset,
) -> i64 {
    let last_day = last.with_timezone(&offset).date_naive();
    let today = now.with_timezone(&offset).date_naive();
    (today - last_day).num_days()
}

pub fn advance(user: &User, now: DateTime<Utc>, offset: FixedOffset) -> StreakUpdate {
    let gap = user
        .last_active_at
        .map(|last| calendar_days_between(last, now, offset));

    let current = match gap {
        Some(0) => user.current_streak,
        Some(1) => user.current_streak + 1,
        _ => 1,
    };

    StreakUpdate {
        current_streak: current,
        longest_streak: user.longest_streak.max(current),
        last_active_at: now,
    }
}

/// Records a qualifying activity for `user_id` and returns the new streak.
pub async fn touch(
    store: &dyn ProgressStore,
    settings: &Settings,
    user_id: Uuid,
    now: DateTime<Utc>,
) -> Result<StreakResp, EngineError> {
    let offset = settings.streak_offset;
    retry_on_conflict(settings.max_retries, move || touch_once(store, offset, user_id, now)).await
}

async fn touch_once(
    store: &dyn ProgressStore,
    offset: FixedOffset,
    user_id: Uuid,
    now: DateTime<Utc>,
) -> Result<StreakResp, EngineError> {
    let mut tx = store.begin().await?;
    let user = tx
        .lock_user(user_id)
        .await?
        .ok_or(EngineError::UnknownUser(user_id))?;

    let update = advance(&user, now, offset);
    tx.save_streak(user_id, &update).await?;
    tx.commit().await?;

    if update.current_streak != user.current_streak {
        tracing::info!(
            %user_id,
            from = user.current_streak,
            to = update.current_streak,
            longest = update.longest_streak,
            "streak updated"
        );
    }
    Ok(StreakResp {
        current_streak: update.current_streak,
        longest_streak: update.longest_streak,
    })
}

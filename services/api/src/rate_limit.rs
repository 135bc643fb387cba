//! Per-plan request admission over sliding windows
//!
//! A request is admitted when the caller's request count over the trailing
//! minute and the trailing day both sit below the active plan's quotas, and
//! the admission itself is recorded in the same decision. Check and record
//! run inside one transaction holding a per-user advisory lock, so two
//! concurrent requests racing for the last quota slot cannot both read a
//! stale count and both get in. Requests from different users never contend.

use chrono::{DateTime, Duration, Utc};
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::error::{ApiError, LimitWindow};

/// Sliding window lengths, both ending at "now"
const MINUTE_WINDOW_SECONDS: i64 = 60;
const DAY_WINDOW_SECONDS: i64 = 86_400;

/// Quota attributes of the caller's active plan
#[derive(Debug, Clone, Copy)]
pub struct PlanLimits {
    pub requests_per_minute: i32,
    pub requests_per_day: i32,
}

/// The admit/reject decision over window counts
///
/// The day window is evaluated before the minute window, so a request that
/// exhausts both is reported against the day quota.
fn exceeded_window(minute_count: i64, day_count: i64, limits: PlanLimits) -> Option<LimitWindow> {
    if day_count >= i64::from(limits.requests_per_day) {
        return Some(LimitWindow::Day);
    }
    if minute_count >= i64::from(limits.requests_per_minute) {
        return Some(LimitWindow::Minute);
    }
    None
}

/// Advisory-lock key derived from the user id; collisions between distinct
/// users only cost spurious serialization, never correctness
fn advisory_lock_key(user_id: Uuid) -> i64 {
    let (hi, _lo) = user_id.as_u64_pair();
    hi as i64
}

/// Rate limiter backed by the request log
#[derive(Clone)]
pub struct RateLimiter {
    pool: PgPool,
}

impl RateLimiter {
    /// Create a new rate limiter
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Admit or reject one request attempt for `user_id` as of `now`,
    /// recording it in the request log when admitted
    ///
    /// Not idempotent: every call is one attempt. Callers invoke this
    /// exactly once per inbound request, before any business logic runs.
    pub async fn check_and_record(
        &self,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<(), ApiError> {
        let mut tx = self.pool.begin().await?;

        // Serialization point: held until commit or rollback
        sqlx::query("SELECT pg_advisory_xact_lock($1)")
            .bind(advisory_lock_key(user_id))
            .execute(&mut *tx)
            .await?;

        let plan_row = sqlx::query(
            r#"
            SELECT p.requests_per_minute, p.requests_per_day
            FROM user_subscriptions s
            JOIN subscription_plans p ON p.id = s.plan_id
            WHERE s.user_id = $1
              AND s.active
              AND s.start_date <= $2
              AND (s.end_date IS NULL OR s.end_date > $2)
            ORDER BY s.created_at DESC
            LIMIT 1
            "#,
        )
        .bind(user_id)
        .bind(now)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(plan_row) = plan_row else {
            return Err(ApiError::NoActivePlan);
        };
        let limits = PlanLimits {
            requests_per_minute: plan_row.get("requests_per_minute"),
            requests_per_day: plan_row.get("requests_per_day"),
        };

        // Both windows are (now - len, now]; the upper bound matters because
        // `now` is caller-supplied
        let counts = sqlx::query(
            r#"
            SELECT
                COUNT(*) FILTER (WHERE requested_at > $2) AS minute_count,
                COUNT(*) AS day_count
            FROM request_logs
            WHERE user_id = $1
              AND requested_at > $3
              AND requested_at <= $4
            "#,
        )
        .bind(user_id)
        .bind(now - Duration::seconds(MINUTE_WINDOW_SECONDS))
        .bind(now - Duration::seconds(DAY_WINDOW_SECONDS))
        .bind(now)
        .fetch_one(&mut *tx)
        .await?;

        let minute_count: i64 = counts.get("minute_count");
        let day_count: i64 = counts.get("day_count");

        if let Some(window) = exceeded_window(minute_count, day_count, limits) {
            // Dropping the transaction rolls back and releases the lock
            let limit = match window {
                LimitWindow::Minute => limits.requests_per_minute,
                LimitWindow::Day => limits.requests_per_day,
            };
            return Err(ApiError::RateLimitExceeded { window, limit });
        }

        sqlx::query(
            r#"
            INSERT INTO request_logs (user_id, requested_at)
            VALUES ($1, $2)
            "#,
        )
        .bind(user_id)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LIMITS: PlanLimits = PlanLimits {
        requests_per_minute: 3,
        requests_per_day: 10,
    };

    #[test]
    fn test_fresh_user_is_admitted() {
        assert_eq!(exceeded_window(0, 0, LIMITS), None);
    }

    #[test]
    fn test_counts_below_both_quotas_admit() {
        assert_eq!(exceeded_window(2, 9, LIMITS), None);
    }

    #[test]
    fn test_minute_quota_boundary() {
        // The third request of the window is the last one through
        assert_eq!(exceeded_window(2, 2, LIMITS), None);
        assert_eq!(exceeded_window(3, 3, LIMITS), Some(LimitWindow::Minute));
        assert_eq!(exceeded_window(4, 4, LIMITS), Some(LimitWindow::Minute));
    }

    #[test]
    fn test_day_quota_boundary() {
        assert_eq!(exceeded_window(0, 9, LIMITS), None);
        assert_eq!(exceeded_window(0, 10, LIMITS), Some(LimitWindow::Day));
    }

    #[test]
    fn test_day_window_takes_precedence_when_both_exceeded() {
        assert_eq!(exceeded_window(3, 10, LIMITS), Some(LimitWindow::Day));
    }

    #[test]
    fn test_windows_are_independent() {
        // Minute quota exhausted, day quota untouched
        assert_eq!(exceeded_window(3, 3, LIMITS), Some(LimitWindow::Minute));
        // Day quota exhausted with a quiet last minute
        assert_eq!(exceeded_window(0, 10, LIMITS), Some(LimitWindow::Day));
    }

    #[test]
    fn test_quota_of_one() {
        let limits = PlanLimits {
            requests_per_minute: 1,
            requests_per_day: 1,
        };
        assert_eq!(exceeded_window(0, 0, limits), None);
        assert_eq!(exceeded_window(1, 1, limits), Some(LimitWindow::Day));
        assert_eq!(exceeded_window(1, 0, limits), Some(LimitWindow::Minute));
    }

    #[test]
    fn test_lock_key_is_stable_per_user() {
        let user = Uuid::new_v4();
        assert_eq!(advisory_lock_key(user), advisory_lock_key(user));
    }
}

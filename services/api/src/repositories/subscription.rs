//! Subscription repository for database operations

use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::models::{SubscriptionPlan, UserSubscription};

/// Subscription repository
#[derive(Clone)]
pub struct SubscriptionRepository {
    pool: PgPool,
}

impl SubscriptionRepository {
    /// Create a new subscription repository
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// List all subscription plans
    pub async fn list_plans(&self) -> Result<Vec<SubscriptionPlan>, sqlx::Error> {
        let rows = sqlx::query(
            r#"
            SELECT id, name, requests_per_minute, requests_per_day, price::FLOAT8 AS price
            FROM subscription_plans
            ORDER BY price ASC, id ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let plans = rows
            .into_iter()
            .map(|row| SubscriptionPlan {
                id: row.get("id"),
                name: row.get("name"),
                requests_per_minute: row.get("requests_per_minute"),
                requests_per_day: row.get("requests_per_day"),
                price: row.get("price"),
            })
            .collect();

        Ok(plans)
    }

    /// Get the user's active subscription and its plan, as of `now`
    pub async fn active_subscription(
        &self,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Option<(UserSubscription, SubscriptionPlan)>, sqlx::Error> {
        let row = sqlx::query(
            r#"
            SELECT s.id AS subscription_id, s.user_id, s.plan_id, s.start_date, s.end_date,
                   s.active, s.created_at, s.updated_at,
                   p.id AS plan_row_id, p.name, p.requests_per_minute, p.requests_per_day,
                   p.price::FLOAT8 AS price
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
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|row| {
            let subscription = UserSubscription {
                id: row.get("subscription_id"),
                user_id: row.get("user_id"),
                plan_id: row.get("plan_id"),
                start_date: row.get("start_date"),
                end_date: row.get("end_date"),
                active: row.get("active"),
                created_at: row.get("created_at"),
                updated_at: row.get("updated_at"),
            };
            let plan = SubscriptionPlan {
                id: row.get("plan_row_id"),
                name: row.get("name"),
                requests_per_minute: row.get("requests_per_minute"),
                requests_per_day: row.get("requests_per_day"),
                price: row.get("price"),
            };
            (subscription, plan)
        }))
    }
}

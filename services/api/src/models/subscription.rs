//! Subscription plan and user subscription models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// A named tier defining per-minute and per-day request quotas
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct SubscriptionPlan {
    pub id: i64,
    pub name: String,
    pub requests_per_minute: i32,
    pub requests_per_day: i32,
    pub price: f64,
}

/// Links a user to its currently-active plan
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct UserSubscription {
    pub id: i64,
    pub user_id: Uuid,
    pub plan_id: i64,
    pub start_date: DateTime<Utc>,
    pub end_date: Option<DateTime<Utc>>,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Subscription representation returned to callers, with the plan embedded
#[derive(Debug, Clone, Serialize)]
pub struct UserSubscriptionResponse {
    pub id: i64,
    pub plan: SubscriptionPlan,
    pub start_date: DateTime<Utc>,
    pub end_date: Option<DateTime<Utc>>,
    pub active: bool,
}

//! User repository for database operations

use sqlx::{PgPool, Row, postgres::PgRow};
use tracing::info;
use uuid::Uuid;

use crate::models::{NewUser, User};

fn user_from_row(row: &PgRow) -> User {
    User {
        id: row.get("id"),
        email: row.get("email"),
        username: row.get("username"),
        password_hash: row.get("password_hash"),
        active: row.get("active"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

/// User repository
#[derive(Clone)]
pub struct UserRepository {
    pool: PgPool,
}

impl UserRepository {
    /// Create a new user repository
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create a new user together with its default subscription
    ///
    /// The user row and the subscription row are inserted in one
    /// transaction: a user either exists with an active subscription on the
    /// lowest-priced plan, or not at all.
    pub async fn create_with_default_plan(&self, new_user: &NewUser) -> Result<User, sqlx::Error> {
        info!("Creating new user: {}", new_user.username);

        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(
            r#"
            INSERT INTO users (email, username, password_hash)
            VALUES ($1, $2, $3)
            RETURNING id, email, username, password_hash, active, created_at, updated_at
            "#,
        )
        .bind(&new_user.email)
        .bind(&new_user.username)
        .bind(&new_user.password_hash)
        .fetch_one(&mut *tx)
        .await?;

        let user = user_from_row(&row);

        let plan_row = sqlx::query(
            r#"
            SELECT id
            FROM subscription_plans
            ORDER BY price ASC, id ASC
            LIMIT 1
            "#,
        )
        .fetch_one(&mut *tx)
        .await?;
        let plan_id: i64 = plan_row.get("id");

        sqlx::query(
            r#"
            INSERT INTO user_subscriptions (user_id, plan_id, active)
            VALUES ($1, $2, TRUE)
            "#,
        )
        .bind(user.id)
        .bind(plan_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(user)
    }

    /// Find a user by email
    pub async fn find_by_email(&self, email: &str) -> Result<Option<User>, sqlx::Error> {
        let row = sqlx::query(
            r#"
            SELECT id, email, username, password_hash, active, created_at, updated_at
            FROM users
            WHERE email = $1
            "#,
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|row| user_from_row(&row)))
    }

    /// Find a user by username
    pub async fn find_by_username(&self, username: &str) -> Result<Option<User>, sqlx::Error> {
        let row = sqlx::query(
            r#"
            SELECT id, email, username, password_hash, active, created_at, updated_at
            FROM users
            WHERE username = $1
            "#,
        )
        .bind(username)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|row| user_from_row(&row)))
    }

    /// Find a user by ID
    pub async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, sqlx::Error> {
        let row = sqlx::query(
            r#"
            SELECT id, email, username, password_hash, active, created_at, updated_at
            FROM users
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|row| user_from_row(&row)))
    }

    /// Find the user linked to an OAuth account
    pub async fn find_by_oauth_account(
        &self,
        provider: &str,
        provider_user_id: &str,
    ) -> Result<Option<User>, sqlx::Error> {
        let row = sqlx::query(
            r#"
            SELECT u.id, u.email, u.username, u.password_hash, u.active, u.created_at, u.updated_at
            FROM users u
            JOIN oauth_accounts oa ON oa.user_id = u.id
            WHERE oa.provider = $1 AND oa.provider_user_id = $2
            "#,
        )
        .bind(provider)
        .bind(provider_user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|row| user_from_row(&row)))
    }

    /// Link an OAuth account to a user, refreshing stored provider tokens
    /// when the link already exists
    pub async fn link_oauth_account(
        &self,
        user_id: Uuid,
        provider: &str,
        provider_user_id: &str,
        access_token: Option<&str>,
        refresh_token: Option<&str>,
    ) -> Result<(), sqlx::Error> {
        info!("Linking {} account for user {}", provider, user_id);

        sqlx::query(
            r#"
            INSERT INTO oauth_accounts (user_id, provider, provider_user_id, access_token, refresh_token)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (provider, provider_user_id)
            DO UPDATE SET access_token = EXCLUDED.access_token,
                          refresh_token = EXCLUDED.refresh_token
            "#,
        )
        .bind(user_id)
        .bind(provider)
        .bind(provider_user_id)
        .bind(access_token)
        .bind(refresh_token)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

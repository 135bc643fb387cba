//! Conversation repository for database operations

use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row, postgres::PgRow};
use tracing::info;
use uuid::Uuid;

use crate::models::{Conversation, Message, SenderType};

fn conversation_from_row(row: &PgRow) -> Conversation {
    Conversation {
        id: row.get("id"),
        user_id: row.get("user_id"),
        title: row.get("title"),
        created_at: row.get("created_at"),
    }
}

fn message_from_row(row: &PgRow) -> Message {
    let sender: String = row.get("sender_type");
    Message {
        id: row.get("id"),
        conversation_id: row.get("conversation_id"),
        // The column carries a CHECK constraint, unknown values cannot occur
        sender_type: SenderType::parse(&sender).unwrap_or(SenderType::System),
        content: row.get("content"),
        created_at: row.get("created_at"),
    }
}

/// Conversation repository
#[derive(Clone)]
pub struct ConversationRepository {
    pool: PgPool,
}

impl ConversationRepository {
    /// Create a new conversation repository
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create a conversation for a user
    pub async fn create(
        &self,
        user_id: Uuid,
        title: Option<&str>,
    ) -> Result<Conversation, sqlx::Error> {
        info!("Creating conversation for user {}", user_id);

        let row = sqlx::query(
            r#"
            INSERT INTO conversations (user_id, title)
            VALUES ($1, $2)
            RETURNING id, user_id, title, created_at
            "#,
        )
        .bind(user_id)
        .bind(title)
        .fetch_one(&self.pool)
        .await?;

        Ok(conversation_from_row(&row))
    }

    /// List a user's conversations, newest first
    pub async fn list_for_user(&self, user_id: Uuid) -> Result<Vec<Conversation>, sqlx::Error> {
        let rows = sqlx::query(
            r#"
            SELECT id, user_id, title, created_at
            FROM conversations
            WHERE user_id = $1
            ORDER BY created_at DESC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(conversation_from_row).collect())
    }

    /// Find a conversation owned by the given user
    pub async fn find_for_user(
        &self,
        conversation_id: i64,
        user_id: Uuid,
    ) -> Result<Option<Conversation>, sqlx::Error> {
        let row = sqlx::query(
            r#"
            SELECT id, user_id, title, created_at
            FROM conversations
            WHERE id = $1 AND user_id = $2
            "#,
        )
        .bind(conversation_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|row| conversation_from_row(&row)))
    }

    /// Rename a conversation owned by the given user
    pub async fn update_title(
        &self,
        conversation_id: i64,
        user_id: Uuid,
        title: Option<&str>,
    ) -> Result<Option<Conversation>, sqlx::Error> {
        let row = sqlx::query(
            r#"
            UPDATE conversations
            SET title = COALESCE($3, title)
            WHERE id = $1 AND user_id = $2
            RETURNING id, user_id, title, created_at
            "#,
        )
        .bind(conversation_id)
        .bind(user_id)
        .bind(title)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|row| conversation_from_row(&row)))
    }

    /// Delete a conversation owned by the given user; messages cascade
    pub async fn delete(&self, conversation_id: i64, user_id: Uuid) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            DELETE FROM conversations
            WHERE id = $1 AND user_id = $2
            "#,
        )
        .bind(conversation_id)
        .bind(user_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Append a message to a conversation
    pub async fn add_message(
        &self,
        conversation_id: i64,
        sender_type: SenderType,
        content: &str,
        now: DateTime<Utc>,
    ) -> Result<Message, sqlx::Error> {
        let row = sqlx::query(
            r#"
            INSERT INTO messages (conversation_id, sender_type, content, created_at)
            VALUES ($1, $2, $3, $4)
            RETURNING id, conversation_id, sender_type, content, created_at
            "#,
        )
        .bind(conversation_id)
        .bind(sender_type.as_str())
        .bind(content)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;

        Ok(message_from_row(&row))
    }

    /// All messages of a conversation in chronological order
    pub async fn messages(&self, conversation_id: i64) -> Result<Vec<Message>, sqlx::Error> {
        let rows = sqlx::query(
            r#"
            SELECT id, conversation_id, sender_type, content, created_at
            FROM messages
            WHERE conversation_id = $1
            ORDER BY created_at ASC, id ASC
            "#,
        )
        .bind(conversation_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(message_from_row).collect())
    }

    /// Messages for a batch of conversations, chronological within each
    pub async fn messages_for_all(
        &self,
        conversation_ids: &[i64],
    ) -> Result<Vec<Message>, sqlx::Error> {
        if conversation_ids.is_empty() {
            return Ok(Vec::new());
        }

        let rows = sqlx::query(
            r#"
            SELECT id, conversation_id, sender_type, content, created_at
            FROM messages
            WHERE conversation_id = ANY($1)
            ORDER BY conversation_id, created_at ASC, id ASC
            "#,
        )
        .bind(conversation_ids)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(message_from_row).collect())
    }
}

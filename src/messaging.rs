use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;

use crate::{
    auth::{new_id, AuthUser},
    db,
    error::AppError,
    models::{ConversationRow, MessageRow, SuggestionRow, ROLE_CLIENT, ROLE_PROFESSIONAL},
};

const MAX_MESSAGE_LEN: usize = 4000;

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct ConversationSummary {
    pub id: String,
    pub professional_id: String,
    pub client_id: String,
    pub counterpart_name: String,
    pub subject: Option<String>,
    pub last_message_at: Option<String>,
    pub unread: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OpenConversation {
    pub with_user_id: String,
    pub subject: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewMessage {
    pub body: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewSuggestion {
    pub body: String,
    pub source: Option<String>,
}

/// Returns the pair's conversation, creating it on first contact.
pub async fn open_conversation(
    pool: &SqlitePool,
    user: &AuthUser,
    input: OpenConversation,
) -> Result<ConversationRow, AppError> {
    let counterpart_role = sqlx::query_scalar::<_, String>("SELECT role FROM users WHERE id = ? AND active = 1")
        .bind(&input.with_user_id)
        .fetch_optional(pool)
        .await?
        .ok_or(AppError::NotFound("User"))?;

    let (professional_id, client_id) = match (user.role.as_str(), counterpart_role.as_str()) {
        (ROLE_PROFESSIONAL, ROLE_CLIENT) => (user.id.as_str(), input.with_user_id.as_str()),
        (ROLE_CLIENT, ROLE_PROFESSIONAL) => (input.with_user_id.as_str(), user.id.as_str()),
        _ => {
            return Err(AppError::validation(
                "Conversations are between a professional and a client.",
            ))
        }
    };

    sqlx::query(
        r#"INSERT INTO conversations (id, professional_id, client_id, subject, created_at)
           VALUES (?, ?, ?, ?, ?)
           ON CONFLICT(professional_id, client_id) DO NOTHING"#,
    )
    .bind(new_id())
    .bind(professional_id)
    .bind(client_id)
    .bind(input.subject.as_deref().map(str::trim).filter(|s| !s.is_empty()))
    .bind(db::now())
    .execute(pool)
    .await?;

    let row = sqlx::query_as::<_, ConversationRow>(
        r#"SELECT id, professional_id, client_id, subject, last_message_at, created_at
           FROM conversations WHERE professional_id = ? AND client_id = ?"#,
    )
    .bind(professional_id)
    .bind(client_id)
    .fetch_one(pool)
    .await?;
    Ok(row)
}

pub async fn list_conversations(pool: &SqlitePool, user: &AuthUser) -> Result<Vec<ConversationSummary>, AppError> {
    let rows = sqlx::query_as::<_, ConversationSummary>(
        r#"SELECT c.id, c.professional_id, c.client_id, u.display_name as counterpart_name,
                  c.subject, c.last_message_at,
                  (SELECT COUNT(*) FROM messages m
                   WHERE m.conversation_id = c.id AND m.sender_id != ? AND m.read_at IS NULL) as unread
           FROM conversations c
           JOIN users u ON u.id = CASE WHEN c.professional_id = ? THEN c.client_id ELSE c.professional_id END
           WHERE c.professional_id = ? OR c.client_id = ?
           ORDER BY COALESCE(c.last_message_at, c.created_at) DESC"#,
    )
    .bind(&user.id)
    .bind(&user.id)
    .bind(&user.id)
    .bind(&user.id)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

/// The conversation if `user` takes part in it; otherwise not found.
pub async fn fetch_for_participant(
    pool: &SqlitePool,
    user: &AuthUser,
    conversation_id: &str,
) -> Result<ConversationRow, AppError> {
    sqlx::query_as::<_, ConversationRow>(
        r#"SELECT id, professional_id, client_id, subject, last_message_at, created_at
           FROM conversations
           WHERE id = ? AND (professional_id = ? OR client_id = ?)
           LIMIT 1"#,
    )
    .bind(conversation_id)
    .bind(&user.id)
    .bind(&user.id)
    .fetch_optional(pool)
    .await?
    .ok_or(AppError::NotFound("Conversation"))
}

pub async fn send_message(
    pool: &SqlitePool,
    user: &AuthUser,
    conversation_id: &str,
    input: NewMessage,
) -> Result<MessageRow, AppError> {
    let conversation = fetch_for_participant(pool, user, conversation_id).await?;
    let body = input.body.trim();
    if body.is_empty() {
        return Err(AppError::validation("Message cannot be empty."));
    }
    if body.chars().count() > MAX_MESSAGE_LEN {
        return Err(AppError::validation(format!(
            "Messages are limited to {MAX_MESSAGE_LEN} characters."
        )));
    }

    let message = MessageRow {
        id: new_id(),
        conversation_id: conversation.id,
        sender_id: user.id.clone(),
        body: body.to_string(),
        read_at: None,
        created_at: db::now(),
    };

    let mut tx = pool.begin().await?;
    sqlx::query(
        r#"INSERT INTO messages (id, conversation_id, sender_id, body, created_at)
           VALUES (?, ?, ?, ?, ?)"#,
    )
    .bind(&message.id)
    .bind(&message.conversation_id)
    .bind(&message.sender_id)
    .bind(&message.body)
    .bind(&message.created_at)
    .execute(&mut *tx)
    .await?;
    sqlx::query("UPDATE conversations SET last_message_at = ? WHERE id = ?")
        .bind(&message.created_at)
        .bind(&message.conversation_id)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;

    Ok(message)
}

pub async fn list_messages(
    pool: &SqlitePool,
    user: &AuthUser,
    conversation_id: &str,
) -> Result<Vec<MessageRow>, AppError> {
    fetch_for_participant(pool, user, conversation_id).await?;
    let rows = sqlx::query_as::<_, MessageRow>(
        r#"SELECT id, conversation_id, sender_id, body, read_at, created_at
           FROM messages WHERE conversation_id = ?
           ORDER BY created_at ASC, rowid ASC"#,
    )
    .bind(conversation_id)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

/// Marks the other participant's unread messages read. Returns how many.
pub async fn mark_read(pool: &SqlitePool, user: &AuthUser, conversation_id: &str) -> Result<u64, AppError> {
    fetch_for_participant(pool, user, conversation_id).await?;
    let result = sqlx::query(
        r#"UPDATE messages SET read_at = ?
           WHERE conversation_id = ? AND sender_id != ? AND read_at IS NULL"#,
    )
    .bind(db::now())
    .bind(conversation_id)
    .bind(&user.id)
    .execute(pool)
    .await?;
    Ok(result.rows_affected())
}

pub async fn list_suggestions(
    pool: &SqlitePool,
    user: &AuthUser,
    conversation_id: &str,
) -> Result<Vec<SuggestionRow>, AppError> {
    let conversation = fetch_for_participant(pool, user, conversation_id).await?;
    if conversation.professional_id != user.id {
        return Err(AppError::Forbidden("Reply suggestions are for the professional.".into()));
    }
    let rows = sqlx::query_as::<_, SuggestionRow>(
        r#"SELECT id, conversation_id, body, source, created_at
           FROM message_suggestions WHERE conversation_id = ?
           ORDER BY created_at DESC, rowid DESC"#,
    )
    .bind(conversation_id)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

/// Stores a reply suggestion produced outside this service.
pub async fn add_suggestion(
    pool: &SqlitePool,
    user: &AuthUser,
    conversation_id: &str,
    input: NewSuggestion,
) -> Result<SuggestionRow, AppError> {
    let conversation = fetch_for_participant(pool, user, conversation_id).await?;
    if conversation.professional_id != user.id {
        return Err(AppError::Forbidden("Reply suggestions are for the professional.".into()));
    }
    if input.body.trim().is_empty() {
        return Err(AppError::validation("Suggestion cannot be empty."));
    }

    let row = SuggestionRow {
        id: new_id(),
        conversation_id: conversation.id,
        body: input.body.trim().to_string(),
        source: input
            .source
            .map(|source| source.trim().to_string())
            .filter(|source| !source.is_empty())
            .unwrap_or_else(|| "external".to_string()),
        created_at: db::now(),
    };
    sqlx::query(
        r#"INSERT INTO message_suggestions (id, conversation_id, body, source, created_at)
           VALUES (?, ?, ?, ?, ?)"#,
    )
    .bind(&row.id)
    .bind(&row.conversation_id)
    .bind(&row.body)
    .bind(&row.source)
    .bind(&row.created_at)
    .execute(pool)
    .await?;
    Ok(row)
}

//! Users and chat history persistence.
//!
//! The HTTP handlers only see the [`ChatStore`] trait; [`SqliteChatStore`]
//! is the shipped backend and shares the index database.

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use serde::Deserialize;
use sqlx::{Row, SqlitePool};

use crate::models::{HistoryEntry, Message};

/// A message as submitted by the client.
#[derive(Debug, Clone, Deserialize)]
pub struct NewMessage {
    pub session_id: String,
    pub email: String,
    pub sender: String,
    pub text: String,
    pub created_at: String,
    #[serde(default)]
    pub image_ids: Vec<String>,
    #[serde(default)]
    pub related_links: Vec<String>,
}

#[async_trait]
pub trait ChatStore: Send + Sync {
    /// Registers a user; an existing email is left untouched.
    async fn upsert_user(&self, email: &str, username: &str) -> Result<()>;

    async fn insert_message(&self, message: &NewMessage) -> Result<()>;

    /// Messages of one session for one user, oldest first.
    async fn fetch_session(&self, session_id: &str, email: &str) -> Result<Vec<Message>>;

    /// The user's sessions, most recently active first, each with its first
    /// `user` message. Sessions without a user message are omitted.
    async fn fetch_history(&self, email: &str, limit: Option<usize>) -> Result<Vec<HistoryEntry>>;
}

/// Normalises an ISO 8601 timestamp to RFC 3339 UTC with microseconds, so
/// stored values sort chronologically as text.
///
/// Accepts offsets (`Z`, `+02:00`) and naive timestamps, which are taken
/// as UTC.
pub fn normalize_timestamp(raw: &str) -> Result<String> {
    let raw = raw.trim();
    let parsed: DateTime<Utc> = if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        dt.with_timezone(&Utc)
    } else if let Ok(naive) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f") {
        naive.and_utc()
    } else if let Ok(naive) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f") {
        naive.and_utc()
    } else {
        bail!("invalid timestamp: {:?}", raw);
    };
    Ok(parsed.to_rfc3339_opts(SecondsFormat::Micros, true))
}

pub struct SqliteChatStore {
    pool: SqlitePool,
}

impl SqliteChatStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ChatStore for SqliteChatStore {
    async fn upsert_user(&self, email: &str, username: &str) -> Result<()> {
        sqlx::query("INSERT OR IGNORE INTO users (email, username, created_at) VALUES (?, ?, ?)")
            .bind(email)
            .bind(username)
            .bind(Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true))
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn insert_message(&self, message: &NewMessage) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO messages (session_id, email, sender, text, created_at, image_ids, related_links)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&message.session_id)
        .bind(&message.email)
        .bind(&message.sender)
        .bind(&message.text)
        .bind(normalize_timestamp(&message.created_at)?)
        .bind(serde_json::to_string(&message.image_ids)?)
        .bind(serde_json::to_string(&message.related_links)?)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn fetch_session(&self, session_id: &str, email: &str) -> Result<Vec<Message>> {
        let rows = sqlx::query(
            r#"
            SELECT sender, text, created_at, image_ids, related_links
            FROM messages
            WHERE session_id = ? AND email = ?
            ORDER BY created_at ASC, id ASC
            "#,
        )
        .bind(session_id)
        .bind(email)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                let image_ids: String = row.get("image_ids");
                let related_links: String = row.get("related_links");
                Ok(Message {
                    sender: row.get("sender"),
                    text: row.get("text"),
                    created_at: row.get("created_at"),
                    image_ids: parse_json_list(&image_ids),
                    related_links: parse_json_list(&related_links),
                })
            })
            .collect()
    }

    async fn fetch_history(&self, email: &str, limit: Option<usize>) -> Result<Vec<HistoryEntry>> {
        let rows = sqlx::query(
            r#"
            SELECT session_id, first_message FROM (
                SELECT m.session_id AS session_id,
                       MAX(m.created_at) AS last_time,
                       (SELECT u.text FROM messages u
                        WHERE u.email = ? AND u.session_id = m.session_id AND u.sender = 'user'
                        ORDER BY u.created_at ASC, u.id ASC LIMIT 1) AS first_message
                FROM messages m
                WHERE m.email = ?
                GROUP BY m.session_id
            )
            WHERE first_message IS NOT NULL
            ORDER BY last_time DESC
            LIMIT ?
            "#,
        )
        .bind(email)
        .bind(email)
        .bind(limit.map(|l| l as i64).unwrap_or(-1))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| HistoryEntry {
                session_id: row.get("session_id"),
                first_message: row.get("first_message"),
            })
            .collect())
    }
}

fn parse_json_list(raw: &str) -> Vec<String> {
    serde_json::from_str(raw).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{db, migrate};

    async fn store() -> (tempfile::TempDir, SqliteChatStore) {
        let tmp = tempfile::TempDir::new().unwrap();
        let pool = db::connect_path(&tmp.path().join("chat.sqlite")).await.unwrap();
        migrate::migrate(&pool).await.unwrap();
        (tmp, SqliteChatStore::new(pool))
    }

    fn msg(session: &str, sender: &str, text: &str, at: &str) -> NewMessage {
        NewMessage {
            session_id: session.to_string(),
            email: "ana@example.com".to_string(),
            sender: sender.to_string(),
            text: text.to_string(),
            created_at: at.to_string(),
            image_ids: vec![],
            related_links: vec![],
        }
    }

    #[test]
    fn timestamps_normalise_to_utc() {
        assert_eq!(
            normalize_timestamp("2024-05-01T10:00:00Z").unwrap(),
            "2024-05-01T10:00:00.000000Z"
        );
        assert_eq!(
            normalize_timestamp("2024-05-01T12:00:00+02:00").unwrap(),
            "2024-05-01T10:00:00.000000Z"
        );
        assert_eq!(
            normalize_timestamp("2024-05-01T10:00:00.5").unwrap(),
            "2024-05-01T10:00:00.500000Z"
        );
        assert!(normalize_timestamp("yesterday").is_err());
    }

    #[tokio::test]
    async fn upsert_user_is_idempotent() {
        let (_tmp, store) = store().await;
        store.upsert_user("ana@example.com", "Ana").await.unwrap();
        store.upsert_user("ana@example.com", "Someone Else").await.unwrap();

        let name: String = sqlx::query_scalar("SELECT username FROM users WHERE email = ?")
            .bind("ana@example.com")
            .fetch_one(&store.pool)
            .await
            .unwrap();
        assert_eq!(name, "Ana");
    }

    #[tokio::test]
    async fn session_is_chronological_and_keeps_lists() {
        let (_tmp, store) = store().await;
        let mut bot = msg("s1", "bot", "Hello.", "2024-05-01T10:00:05Z");
        bot.image_ids = vec!["doc.docx::img0_0".to_string()];
        bot.related_links = vec!["https://hr.example.com".to_string()];
        store.insert_message(&bot).await.unwrap();
        store
            .insert_message(&msg("s1", "user", "Hi", "2024-05-01T10:00:00Z"))
            .await
            .unwrap();

        let messages = store.fetch_session("s1", "ana@example.com").await.unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].text, "Hi");
        assert_eq!(messages[1].image_ids, vec!["doc.docx::img0_0"]);
        assert_eq!(messages[1].related_links, vec!["https://hr.example.com"]);

        assert!(store.fetch_session("s1", "other@example.com").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn history_orders_by_latest_activity() {
        let (_tmp, store) = store().await;
        store.insert_message(&msg("old", "user", "first question", "2024-05-01T09:00:00Z")).await.unwrap();
        store.insert_message(&msg("old", "user", "second question", "2024-05-01T09:01:00Z")).await.unwrap();
        store.insert_message(&msg("new", "user", "latest question", "2024-05-02T09:00:00Z")).await.unwrap();
        store.insert_message(&msg("bot-only", "bot", "greeting", "2024-05-03T09:00:00Z")).await.unwrap();

        let history = store.fetch_history("ana@example.com", None).await.unwrap();
        assert_eq!(
            history,
            vec![
                HistoryEntry { session_id: "new".into(), first_message: "latest question".into() },
                HistoryEntry { session_id: "old".into(), first_message: "first question".into() },
            ]
        );

        let limited = store.fetch_history("ana@example.com", Some(1)).await.unwrap();
        assert_eq!(limited.len(), 1);
        assert_eq!(limited[0].session_id, "new");
    }
}

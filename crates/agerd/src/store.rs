//! Facial feature and chat transcript persistence.
//!
//! Features are keyed by the canonical age key so that an age reported by
//! face analysis (`34`) and one sent later by a client (`34.0`) meet.

use ager_content::chat::conversation_title;
use ager_content::Speaker;
use ager_core::{age_key, FeatureDescriptor};
use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use parking_lot::Mutex;
use rusqlite::{params, OptionalExtension};
use serde::Serialize;
use std::collections::HashMap;
use std::path::Path;
use thiserror::Error;
use uuid::Uuid;

const SCHEMA: &str = "
PRAGMA foreign_keys = ON;
CREATE TABLE IF NOT EXISTS facial_features (
    age_key    TEXT PRIMARY KEY,
    descriptor TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS conversations (
    id         TEXT PRIMARY KEY,
    title      TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS messages (
    id              INTEGER PRIMARY KEY AUTOINCREMENT,
    conversation_id TEXT NOT NULL REFERENCES conversations(id) ON DELETE CASCADE,
    speaker         TEXT NOT NULL,
    content         TEXT NOT NULL,
    created_at      TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_messages_conversation ON messages(conversation_id, id);
";

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] tokio_rusqlite::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("stored record is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredMessage {
    #[serde(rename = "type")]
    pub speaker: Speaker,
    pub content: String,
    pub created_at: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub id: String,
    pub title: String,
    pub created_at: String,
    pub updated_at: String,
    pub messages: Vec<StoredMessage>,
}

#[async_trait]
pub trait FeatureStore: Send + Sync {
    async fn put_features(&self, age: f64, descriptor: &FeatureDescriptor) -> Result<(), StoreError>;
    async fn features(&self, age: f64) -> Result<Option<FeatureDescriptor>, StoreError>;
}

#[async_trait]
pub trait TranscriptStore: Send + Sync {
    /// Append one user message and its reply. A missing or unknown
    /// `conversation_id` starts a new conversation. Returns the id used.
    async fn record_exchange(
        &self,
        conversation_id: Option<&str>,
        user_message: &str,
        reply: &str,
    ) -> Result<String, StoreError>;

    async fn conversation(&self, id: &str) -> Result<Option<Conversation>, StoreError>;
}

fn now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn speaker_tag(speaker: &Speaker) -> &'static str {
    match speaker {
        Speaker::User => "user",
        Speaker::Bot => "bot",
    }
}

fn speaker_from_tag(tag: &str) -> Speaker {
    if tag == "user" {
        Speaker::User
    } else {
        Speaker::Bot
    }
}

/// SQLite-backed store for both features and transcripts.
pub struct SqliteStore {
    conn: tokio_rusqlite::Connection,
}

impl SqliteStore {
    pub async fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let conn = tokio_rusqlite::Connection::open(path).await?;
        tracing::info!(path = %path.display(), "opened store");
        Self::init(conn).await
    }

    pub async fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(tokio_rusqlite::Connection::open_in_memory().await?).await
    }

    async fn init(conn: tokio_rusqlite::Connection) -> Result<Self, StoreError> {
        conn.call(|c| {
            c.execute_batch(SCHEMA)?;
            Ok(())
        })
        .await?;
        Ok(Self { conn })
    }
}

#[async_trait]
impl FeatureStore for SqliteStore {
    async fn put_features(&self, age: f64, descriptor: &FeatureDescriptor) -> Result<(), StoreError> {
        let key = age_key(age);
        let json = serde_json::to_string(descriptor)?;
        let updated_at = now();
        self.conn
            .call(move |c| {
                c.execute(
                    "INSERT INTO facial_features (age_key, descriptor, updated_at) VALUES (?1, ?2, ?3)
                     ON CONFLICT(age_key) DO UPDATE SET descriptor = excluded.descriptor, updated_at = excluded.updated_at",
                    params![key, json, updated_at],
                )?;
                Ok(())
            })
            .await?;
        tracing::debug!(age_key = %age_key(age), "stored facial features");
        Ok(())
    }

    async fn features(&self, age: f64) -> Result<Option<FeatureDescriptor>, StoreError> {
        let key = age_key(age);
        let json: Option<String> = self
            .conn
            .call(move |c| {
                Ok(c.query_row(
                    "SELECT descriptor FROM facial_features WHERE age_key = ?1",
                    params![key],
                    |row| row.get(0),
                )
                .optional()?)
            })
            .await?;
        Ok(json.map(|j| serde_json::from_str(&j)).transpose()?)
    }
}

#[async_trait]
impl TranscriptStore for SqliteStore {
    async fn record_exchange(
        &self,
        conversation_id: Option<&str>,
        user_message: &str,
        reply: &str,
    ) -> Result<String, StoreError> {
        let requested = conversation_id.map(str::to_string);
        let new_id = Uuid::new_v4().to_string();
        let title = conversation_title(user_message);
        let user_message = user_message.to_string();
        let reply = reply.to_string();
        let at = now();

        let id = self
            .conn
            .call(move |c| {
                let tx = c.transaction()?;
                let existing: Option<String> = match requested {
                    Some(id) => tx
                        .query_row("SELECT id FROM conversations WHERE id = ?1", params![id], |row| row.get(0))
                        .optional()?,
                    None => None,
                };
                let id = match existing {
                    Some(id) => {
                        tx.execute("UPDATE conversations SET updated_at = ?1 WHERE id = ?2", params![at, id])?;
                        id
                    }
                    None => {
                        tx.execute(
                            "INSERT INTO conversations (id, title, created_at, updated_at) VALUES (?1, ?2, ?3, ?3)",
                            params![new_id, title, at],
                        )?;
                        new_id
                    }
                };
                for (speaker, content) in [(Speaker::User, &user_message), (Speaker::Bot, &reply)] {
                    tx.execute(
                        "INSERT INTO messages (conversation_id, speaker, content, created_at) VALUES (?1, ?2, ?3, ?4)",
                        params![id, speaker_tag(&speaker), content, at],
                    )?;
                }
                tx.commit()?;
                Ok(id)
            })
            .await?;
        Ok(id)
    }

    async fn conversation(&self, id: &str) -> Result<Option<Conversation>, StoreError> {
        let id = id.to_string();
        let conversation = self
            .conn
            .call(move |c| {
                let head = c
                    .query_row(
                        "SELECT id, title, created_at, updated_at FROM conversations WHERE id = ?1",
                        params![id],
                        |row| {
                            Ok((
                                row.get::<_, String>(0)?,
                                row.get::<_, String>(1)?,
                                row.get::<_, String>(2)?,
                                row.get::<_, String>(3)?,
                            ))
                        },
                    )
                    .optional()?;
                let Some((id, title, created_at, updated_at)) = head else {
                    return Ok(None);
                };

                let mut stmt = c.prepare(
                    "SELECT speaker, content, created_at FROM messages WHERE conversation_id = ?1 ORDER BY id",
                )?;
                let messages = stmt
                    .query_map(params![id], |row| {
                        let tag: String = row.get(0)?;
                        Ok(StoredMessage {
                            speaker: speaker_from_tag(&tag),
                            content: row.get(1)?,
                            created_at: row.get(2)?,
                        })
                    })?
                    .collect::<Result<Vec<_>, _>>()?;

                Ok(Some(Conversation {
                    id,
                    title,
                    created_at,
                    updated_at,
                    messages,
                }))
            })
            .await?;
        Ok(conversation)
    }
}

/// In-process store, used when the database cannot be opened and in tests.
#[derive(Default)]
pub struct MemoryStore {
    features: Mutex<HashMap<String, FeatureDescriptor>>,
    conversations: Mutex<HashMap<String, Conversation>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl FeatureStore for MemoryStore {
    async fn put_features(&self, age: f64, descriptor: &FeatureDescriptor) -> Result<(), StoreError> {
        self.features.lock().insert(age_key(age), descriptor.clone());
        Ok(())
    }

    async fn features(&self, age: f64) -> Result<Option<FeatureDescriptor>, StoreError> {
        Ok(self.features.lock().get(&age_key(age)).cloned())
    }
}

#[async_trait]
impl TranscriptStore for MemoryStore {
    async fn record_exchange(
        &self,
        conversation_id: Option<&str>,
        user_message: &str,
        reply: &str,
    ) -> Result<String, StoreError> {
        let at = now();
        let mut conversations = self.conversations.lock();
        let id = match conversation_id.filter(|id| conversations.contains_key(*id)) {
            Some(id) => id.to_string(),
            None => {
                let id = Uuid::new_v4().to_string();
                conversations.insert(
                    id.clone(),
                    Conversation {
                        id: id.clone(),
                        title: conversation_title(user_message),
                        created_at: at.clone(),
                        updated_at: at.clone(),
                        messages: Vec::new(),
                    },
                );
                id
            }
        };
        if let Some(conversation) = conversations.get_mut(&id) {
            conversation.updated_at = at.clone();
            for (speaker, content) in [(Speaker::User, user_message), (Speaker::Bot, reply)] {
                conversation.messages.push(StoredMessage {
                    speaker,
                    content: content.to_string(),
                    created_at: at.clone(),
                });
            }
        }
        Ok(id)
    }

    async fn conversation(&self, id: &str) -> Result<Option<Conversation>, StoreError> {
        Ok(self.conversations.lock().get(id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ager_core::FacialFeatures;

    fn descriptor(shape: &str) -> FeatureDescriptor {
        FeatureDescriptor {
            face_detected: true,
            facial_features: FacialFeatures {
                face_shape: Some(shape.to_string()),
                ..FacialFeatures::default()
            },
            ..FeatureDescriptor::default()
        }
    }

    async fn exercise_features(store: &dyn FeatureStore) {
        assert!(store.features(34.0).await.unwrap().is_none());
        store.put_features(34.0, &descriptor("oval")).await.unwrap();
        assert_eq!(store.features(34.0).await.unwrap().unwrap().face_shape(), "oval");

        store.put_features(34.0, &descriptor("round")).await.unwrap();
        assert_eq!(store.features(34.0).await.unwrap().unwrap().face_shape(), "round");
        assert!(store.features(34.5).await.unwrap().is_none());
    }

    async fn exercise_transcripts(store: &dyn TranscriptStore) {
        let id = store.record_exchange(None, "How do I sleep better?", "Keep a routine.").await.unwrap();
        let same = store.record_exchange(Some(&id), "And naps?", "Short ones.").await.unwrap();
        assert_eq!(id, same);

        let other = store.record_exchange(Some("missing-id"), "hello", "hi").await.unwrap();
        assert_ne!(other, "missing-id");
        assert_ne!(other, id);

        let conversation = store.conversation(&id).await.unwrap().unwrap();
        assert_eq!(conversation.title, "How do I sleep better?");
        assert_eq!(conversation.messages.len(), 4);
        assert_eq!(conversation.messages[0].speaker, Speaker::User);
        assert_eq!(conversation.messages[1].content, "Keep a routine.");
        assert_eq!(conversation.messages[3].speaker, Speaker::Bot);
        assert!(store.conversation("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_sqlite_features() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteStore::open(&dir.path().join("nested/ager.db")).await.unwrap();
        exercise_features(&store).await;
    }

    #[tokio::test]
    async fn test_sqlite_transcripts() {
        let store = SqliteStore::open_in_memory().await.unwrap();
        exercise_transcripts(&store).await;
    }

    #[tokio::test]
    async fn test_sqlite_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ager.db");
        {
            let store = SqliteStore::open(&path).await.unwrap();
            store.put_features(61.0, &descriptor("square")).await.unwrap();
        }
        let store = SqliteStore::open(&path).await.unwrap();
        assert_eq!(store.features(61.0).await.unwrap().unwrap().face_shape(), "square");
    }

    #[tokio::test]
    async fn test_memory_store() {
        let store = MemoryStore::new();
        exercise_features(&store).await;
        exercise_transcripts(&store).await;
    }

    #[test]
    fn test_message_serializes_type_field() {
        let message = StoredMessage {
            speaker: Speaker::Bot,
            content: "hi".into(),
            created_at: "t".into(),
        };
        let v = serde_json::to_value(&message).unwrap();
        assert_eq!(v["type"], "bot");
        assert_eq!(v["createdAt"], "t");
    }
}

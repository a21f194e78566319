//! # Transcript
//!
//! Durable record of a project's chat. The orchestrator writes the user turn
//! before generation starts and the assistant turn only after the stream has
//! completed, so a transcript never holds a partial reply.
//!
//! [`TranscriptSink`] is the seam; [`SqliteTranscript`] stores turns in the
//! `chat_turns` table.

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::database::Database;
use crate::error::PersistenceError;
use crate::models::ChatTurnRow;

/// Who produced a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            other => Err(format!("unknown role {other:?}")),
        }
    }
}

/// One message of a project's chat.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub project_id: String,
    pub role: Role,
    pub content: String,
    /// Generation model the turn was sent to or produced by.
    pub model: String,
    pub created_at: DateTime<Utc>,
}

impl ChatTurn {
    pub fn user(project_id: &str, content: &str, model: &str) -> Self {
        Self::new(project_id, Role::User, content, model)
    }

    pub fn assistant(project_id: &str, content: &str, model: &str) -> Self {
        Self::new(project_id, Role::Assistant, content, model)
    }

    fn new(project_id: &str, role: Role, content: &str, model: &str) -> Self {
        Self {
            project_id: project_id.to_string(),
            role,
            content: content.to_string(),
            model: model.to_string(),
            created_at: Utc::now(),
        }
    }
}

/// Append-only store of chat turns.
#[async_trait]
pub trait TranscriptSink: Send + Sync {
    async fn append(&self, turn: &ChatTurn) -> Result<(), PersistenceError>;

    /// All turns of `project_id` in the order they were appended.
    async fn history(&self, project_id: &str) -> Result<Vec<ChatTurn>, PersistenceError>;
}

/// [`TranscriptSink`] over the shared SQLite database.
#[derive(Debug, Clone)]
pub struct SqliteTranscript {
    database: Arc<Database>,
}

impl SqliteTranscript {
    pub fn new(database: Arc<Database>) -> Self {
        Self { database }
    }
}

#[async_trait]
impl TranscriptSink for SqliteTranscript {
    async fn append(&self, turn: &ChatTurn) -> Result<(), PersistenceError> {
        use crate::schema::chat_turns::dsl::chat_turns;

        let row = ChatTurnRow {
            id: None,
            project_id: turn.project_id.clone(),
            role: turn.role.as_str().to_string(),
            content: turn.content.clone(),
            model: turn.model.clone(),
            created_at: turn.created_at.naive_utc(),
        };

        self.database
            .with_connection(|conn| diesel::insert_into(chat_turns).values(&row).execute(conn))?;
        debug!("Recorded {} turn for project {:?}", turn.role, turn.project_id);
        Ok(())
    }

    async fn history(&self, project: &str) -> Result<Vec<ChatTurn>, PersistenceError> {
        use crate::schema::chat_turns::dsl::*;

        let rows: Vec<ChatTurnRow> = self.database.with_connection(|conn| {
            chat_turns
                .filter(project_id.eq(project))
                .order(id.asc())
                .select(ChatTurnRow::as_select())
                .load(conn)
        })?;

        let turns = rows
            .into_iter()
            .filter_map(|row| match row.role.parse::<Role>() {
                Ok(parsed) => Some(ChatTurn {
                    project_id: row.project_id,
                    role: parsed,
                    content: row.content,
                    model: row.model,
                    created_at: Utc.from_utc_datetime(&row.created_at),
                }),
                Err(err) => {
                    warn!("Skipping transcript row {:?}: {}", row.id, err);
                    None
                }
            })
            .collect();
        Ok(turns)
    }
}

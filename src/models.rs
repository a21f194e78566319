//! # Database models
//!
//! Data structures that map to the SQLite schema via **Diesel**.
//!
//! - [`MemoryRecordRow`]: one embedded memory inside a `(owner_id, project_id)` collection.
//! - [`ChatTurnRow`]: one user or assistant turn of a project's transcript.
//!
//! Both tables are created by [`crate::database::Database::open`]; see
//! `crate::schema` for the column layout. Domain code never hands these rows
//! out directly: [`crate::vector_store`] and [`crate::transcript`] convert them
//! into their own types.
use chrono::NaiveDateTime;
use diesel::prelude::*;

/// A persisted memory record.
///
/// ### Table
/// - `memory_records`
///
/// ### Notes
/// - `record_id` is the collection-local id handed out by the memory store; it is
///   unique per `(owner_id, project_id)` and starts at `0`.
/// - `vector` holds a `bincode` encoding of the `Vec<f32>` embedding.
/// - `metadata` is a JSON object of scalar values.
/// - `embedding_model` names the embedder that produced `vector`.
#[derive(Queryable, Insertable, Selectable, Debug, Clone)]
#[diesel(table_name = crate::schema::memory_records)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct MemoryRecordRow {
    /// Auto-increment primary key (set by the DB on insert).
    #[diesel(deserialize_as = i32)]
    pub id: Option<i32>,
    pub owner_id: String,
    pub project_id: String,
    pub record_id: i64,
    pub text: String,
    pub vector: Vec<u8>,
    pub metadata: String,
    pub embedding_model: String,
    pub created_at: NaiveDateTime,
}

/// One turn in a project transcript.
///
/// ### Role values
/// - `"user"`: user input, written before generation starts
/// - `"assistant"`: model output, written only once the stream completed
#[derive(Queryable, Insertable, Selectable, Debug, Clone)]
#[diesel(table_name = crate::schema::chat_turns)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct ChatTurnRow {
    /// Auto-increment primary key (set by the DB on insert).
    #[diesel(deserialize_as = i32)]
    pub id: Option<i32>,
    pub project_id: String,
    pub role: String,
    pub content: String,
    pub model: String,
    pub created_at: NaiveDateTime,
}

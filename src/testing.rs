//! Test doubles shared by the unit tests.

use async_trait::async_trait;
use futures::{StreamExt, stream};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use crate::api::{ChunkStream, CompletionProvider};
use crate::database::Database;
use crate::embedding::EmbeddingFunction;
use crate::error::{EmbeddingError, GenerationError, IndexError, PersistenceError};
use crate::index::{FlatIndex, IndexKind, Neighbor, VectorIndex};
use crate::transcript::{ChatTurn, TranscriptSink};
use crate::vector_store::MemoryStore;

/// Memory store over a private in-memory database.
pub fn memory_store(embedder: Arc<dyn EmbeddingFunction>) -> MemoryStore {
    memory_store_with(embedder, IndexKind::Flat)
}

pub fn memory_store_with(embedder: Arc<dyn EmbeddingFunction>, kind: IndexKind) -> MemoryStore {
    let database = Arc::new(Database::open(":memory:").unwrap());
    MemoryStore::new(embedder, kind, database)
}

/// Fault switches shared by every [`FlakyIndex`] built by one store.
#[derive(Default)]
pub struct IndexFaults {
    pub inserts: AtomicBool,
    pub searches: AtomicBool,
}

/// Flat index whose inserts and searches fail while the matching switch is on.
pub struct FlakyIndex {
    inner: FlatIndex,
    faults: Arc<IndexFaults>,
}

impl VectorIndex for FlakyIndex {
    fn dimension(&self) -> usize {
        self.inner.dimension()
    }

    fn len(&self) -> usize {
        self.inner.len()
    }

    fn insert(&mut self, id: u64, vector: &[f32]) -> Result<(), IndexError> {
        if self.faults.inserts.load(Ordering::SeqCst) {
            return Err(IndexError::Backend("index unavailable".to_string()));
        }
        self.inner.insert(id, vector)
    }

    fn search(&self, query: &[f32], top_k: usize) -> Result<Vec<Neighbor>, IndexError> {
        if self.faults.searches.load(Ordering::SeqCst) {
            return Err(IndexError::Backend("index unavailable".to_string()));
        }
        self.inner.search(query, top_k)
    }
}

/// Memory store whose collections use [`FlakyIndex`] driven by `faults`.
pub fn flaky_memory_store(
    embedder: Arc<dyn EmbeddingFunction>,
    faults: Arc<IndexFaults>,
) -> MemoryStore {
    let database = Arc::new(Database::open(":memory:").unwrap());
    MemoryStore::with_index_factory(
        embedder,
        Arc::new(move |dimension| {
            Box::new(FlakyIndex {
                inner: FlatIndex::new(dimension),
                faults: Arc::clone(&faults),
            }) as Box<dyn VectorIndex>
        }),
        database,
    )
}

/// 26-dimensional letter histogram. Deterministic and model-free.
pub struct LetterEmbedder;

#[async_trait]
impl EmbeddingFunction for LetterEmbedder {
    fn dimension(&self) -> usize {
        26
    }

    fn model_id(&self) -> &str {
        "test/letters"
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let mut vector = vec![0.0; 26];
        for c in text.chars().filter(|c| c.is_ascii_alphabetic()) {
            vector[(c.to_ascii_lowercase() as u8 - b'a') as usize] += 1.0;
        }
        Ok(vector)
    }
}

/// Fixed text-to-vector table; unknown texts fail.
pub struct TableEmbedder {
    dimension: usize,
    table: HashMap<String, Vec<f32>>,
}

impl TableEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            table: HashMap::new(),
        }
    }

    pub fn with(mut self, text: &str, vector: Vec<f32>) -> Self {
        self.table.insert(text.to_string(), vector);
        self
    }
}

#[async_trait]
impl EmbeddingFunction for TableEmbedder {
    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model_id(&self) -> &str {
        "test/table"
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        self.table
            .get(text)
            .cloned()
            .ok_or_else(|| EmbeddingError::Model(format!("no vector for {text:?}")))
    }
}

/// Always fails.
pub struct FailingEmbedder {
    dimension: usize,
}

impl FailingEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }
}

#[async_trait]
impl EmbeddingFunction for FailingEmbedder {
    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model_id(&self) -> &str {
        "test/failing"
    }

    async fn embed(&self, _text: &str) -> Result<Vec<f32>, EmbeddingError> {
        Err(EmbeddingError::Model("model offline".to_string()))
    }
}

/// One step of a scripted reply stream.
#[derive(Debug, Clone)]
pub enum Step {
    Chunk(&'static str),
    Fail(&'static str),
}

/// Arguments of one provider call.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderCall {
    pub prompt: String,
    pub model: String,
    pub system_instruction: String,
    pub max_tokens: Option<u32>,
}

/// Completion provider that replays a script.
#[derive(Default)]
pub struct ScriptedProvider {
    steps: Vec<Step>,
    completion: Option<Result<String, String>>,
    fail_open: bool,
    /// Keep the stream open after the last step instead of ending it.
    hang_after_steps: bool,
    calls: Mutex<Vec<ProviderCall>>,
    opened: AtomicUsize,
}

impl ScriptedProvider {
    pub fn streaming(steps: Vec<Step>) -> Self {
        Self {
            steps,
            ..Self::default()
        }
    }

    pub fn completing(text: &str) -> Self {
        Self {
            completion: Some(Ok(text.to_string())),
            ..Self::default()
        }
    }

    pub fn failing_completion(message: &str) -> Self {
        Self {
            completion: Some(Err(message.to_string())),
            ..Self::default()
        }
    }

    pub fn failing_to_open() -> Self {
        Self {
            fail_open: true,
            ..Self::default()
        }
    }

    pub fn hanging_after(steps: Vec<Step>) -> Self {
        Self {
            steps,
            hang_after_steps: true,
            ..Self::default()
        }
    }

    pub fn calls(&self) -> Vec<ProviderCall> {
        self.calls.lock().clone()
    }

    pub fn streams_opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CompletionProvider for ScriptedProvider {
    async fn stream_completion(
        &self,
        prompt: &str,
        model: &str,
        system_instruction: &str,
    ) -> Result<ChunkStream, GenerationError> {
        self.calls.lock().push(ProviderCall {
            prompt: prompt.to_string(),
            model: model.to_string(),
            system_instruction: system_instruction.to_string(),
            max_tokens: None,
        });
        if self.fail_open {
            return Err(GenerationError::Transport("connection refused".to_string()));
        }
        self.opened.fetch_add(1, Ordering::SeqCst);

        let items: Vec<Result<String, GenerationError>> = self
            .steps
            .iter()
            .map(|step| match step {
                Step::Chunk(text) => Ok(text.to_string()),
                Step::Fail(message) => Err(GenerationError::Stream(message.to_string())),
            })
            .collect();

        if self.hang_after_steps {
            Ok(Box::pin(stream::iter(items).chain(stream::pending())))
        } else {
            Ok(Box::pin(stream::iter(items)))
        }
    }

    async fn complete(
        &self,
        prompt: &str,
        model: &str,
        system_instruction: &str,
        max_tokens: u32,
    ) -> Result<String, GenerationError> {
        self.calls.lock().push(ProviderCall {
            prompt: prompt.to_string(),
            model: model.to_string(),
            system_instruction: system_instruction.to_string(),
            max_tokens: Some(max_tokens),
        });
        match &self.completion {
            Some(Ok(text)) => Ok(text.clone()),
            Some(Err(message)) => Err(GenerationError::Api(message.clone())),
            None => Err(GenerationError::Api("no completion scripted".to_string())),
        }
    }
}

/// Transcript kept in memory; can be told to fail appends of one role.
#[derive(Default)]
pub struct MemoryTranscript {
    turns: Mutex<Vec<ChatTurn>>,
    fail_user: bool,
    fail_assistant: bool,
}

impl MemoryTranscript {
    pub fn failing_user_turns() -> Self {
        Self {
            fail_user: true,
            ..Self::default()
        }
    }

    pub fn failing_assistant_turns() -> Self {
        Self {
            fail_assistant: true,
            ..Self::default()
        }
    }

    pub fn turns(&self) -> Vec<ChatTurn> {
        self.turns.lock().clone()
    }
}

#[async_trait]
impl TranscriptSink for MemoryTranscript {
    async fn append(&self, turn: &ChatTurn) -> Result<(), PersistenceError> {
        use crate::transcript::Role;

        let fail = match turn.role {
            Role::User => self.fail_user,
            Role::Assistant => self.fail_assistant,
        };
        if fail {
            return Err(PersistenceError::Unavailable("disk full".to_string()));
        }
        self.turns.lock().push(turn.clone());
        Ok(())
    }

    async fn history(&self, project_id: &str) -> Result<Vec<ChatTurn>, PersistenceError> {
        Ok(self
            .turns
            .lock()
            .iter()
            .filter(|turn| turn.project_id == project_id)
            .cloned()
            .collect())
    }
}

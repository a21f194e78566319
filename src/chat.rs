//! # Chat orchestration
//!
//! [`ChatOrchestrator`] runs one chat turn end to end:
//!
//! 1. retrieve the project's closest memories for the message;
//! 2. compose the prompt (see [`crate::template`]);
//! 3. record the user turn in the transcript;
//! 4. stream the reply, forwarding every chunk to the caller as it arrives;
//! 5. once the provider stream is exhausted, record the assistant turn and
//!    emit [`StreamEvent::Done`].
//!
//! The reply is accumulated locally and committed in exactly one place, after
//! the stream has ended. A provider error or a dropped event receiver ends
//! the turn as [`TurnOutcome::Aborted`] and nothing is written for it.
//!
//! The orchestrator also produces ghost-writing suggestions, short
//! continuations of the text before the cursor.

use futures::StreamExt;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, error, info, warn};

use crate::api::CompletionProvider;
use crate::config::{ChatSettings, GhostSettings, MembraneConfig};
use crate::error::{ChatError, PersistenceError};
use crate::template::{
    PartnerMode, PromptContext, Purpose, chat_instruction, compose_prompt, ghost_instruction,
    ghost_prompt, last_chars,
};
use crate::transcript::{ChatTurn, TranscriptSink};
use crate::vector_store::{CollectionKey, MemoryStore, Metadata};

/// Capacity of the event channel behind [`ChatOrchestrator::spawn_message`]
/// and [`ChatOrchestrator::run_message`].
const EVENT_BUFFER: usize = 32;

static REFUSAL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)^(i cannot|i can't|i can’t|i apologi[sz]e|i'm sorry|i’m sorry|i am sorry|sorry|without|i need|please provide|as an ai|could you)\b",
    )
    .unwrap()
});

/// One user message to answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatRequest {
    pub owner_id: String,
    pub project_id: String,
    pub message: String,
    /// Full text of the open document; only a prefix reaches the prompt.
    #[serde(default)]
    pub document_content: String,
    #[serde(default)]
    pub selected_text: Option<String>,
    #[serde(default)]
    pub purpose: Purpose,
    #[serde(default)]
    pub partner: PartnerMode,
    /// Generation model; the configured default when `None`.
    #[serde(default)]
    pub model: Option<String>,
}

impl ChatRequest {
    pub fn new(
        owner_id: impl Into<String>,
        project_id: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            owner_id: owner_id.into(),
            project_id: project_id.into(),
            message: message.into(),
            document_content: String::new(),
            selected_text: None,
            purpose: Purpose::default(),
            partner: PartnerMode::default(),
            model: None,
        }
    }

    pub fn collection_key(&self) -> CollectionKey {
        CollectionKey::new(&self.owner_id, &self.project_id)
    }
}

/// What the caller sees of a turn, in order.
///
/// A turn emits any number of chunks followed by at most one terminal marker
/// ([`Done`](Self::Done) or [`Error`](Self::Error)). A disconnected turn has
/// no marker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StreamEvent {
    Chunk(String),
    Done,
    Error(String),
}

impl StreamEvent {
    /// Server-sent-event framing, blank line included.
    pub fn to_sse(&self) -> String {
        match self {
            StreamEvent::Chunk(content) => {
                format!("data: {}\n\n", serde_json::json!({ "content": content }))
            }
            StreamEvent::Done => "data: [DONE]\n\n".to_string(),
            StreamEvent::Error(message) => {
                format!("data: {}\n\n", serde_json::json!({ "error": message }))
            }
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, StreamEvent::Chunk(_))
    }
}

/// Why a turn stopped without recording a reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AbortReason {
    /// The provider failed to open or broke off the stream.
    Generation(String),
    /// The event receiver was dropped.
    Disconnected,
}

/// How a turn that got as far as generation ended.
#[derive(Debug, Clone, PartialEq)]
pub enum TurnOutcome {
    /// The reply was streamed in full and recorded.
    Completed(ChatTurn),
    Aborted(AbortReason),
}

/// Ghost-writing request: suggest what comes after `cursor`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GhostRequest {
    pub text: String,
    /// Character offset into `text`; end of text when `None`.
    #[serde(default)]
    pub cursor: Option<usize>,
    #[serde(default)]
    pub purpose: Purpose,
    #[serde(default)]
    pub model: Option<String>,
}

/// Turns raw model output into a suggestion.
///
/// Surrounding whitespace and quotes are stripped. Refusals and meta replies
/// ("I cannot...", "Could you...") become empty. Anything else gets a single
/// leading space so it can be appended directly after the cursor.
pub fn clean_suggestion(raw: &str) -> String {
    let suggestion = raw
        .trim()
        .trim_matches(|c: char| matches!(c, '"' | '\'' | '“' | '”' | '‘' | '’'))
        .trim();

    if suggestion.is_empty() || REFUSAL.is_match(suggestion) {
        return String::new();
    }
    format!(" {suggestion}")
}

/// Drives chat turns and ghost suggestions for every project.
pub struct ChatOrchestrator {
    memory: Arc<MemoryStore>,
    provider: Arc<dyn CompletionProvider>,
    transcript: Arc<dyn TranscriptSink>,
    default_model: String,
    chat: ChatSettings,
    ghost: GhostWriter,
}

impl ChatOrchestrator {
    pub fn new(
        memory: Arc<MemoryStore>,
        provider: Arc<dyn CompletionProvider>,
        transcript: Arc<dyn TranscriptSink>,
        config: &MembraneConfig,
    ) -> Self {
        Self {
            ghost: GhostWriter::new(Arc::clone(&provider), config),
            memory,
            provider,
            transcript,
            default_model: config.model.clone(),
            chat: config.chat.clone(),
        }
    }

    pub fn memory(&self) -> &Arc<MemoryStore> {
        &self.memory
    }

    /// Recorded turns of `project_id`, oldest first.
    pub async fn history(&self, project_id: &str) -> Result<Vec<ChatTurn>, PersistenceError> {
        self.transcript.history(project_id).await
    }

    /// Run one turn, sending its events to `events`.
    ///
    /// # Errors
    /// Returns [`ChatError::Persistence`] when the user or assistant turn
    /// cannot be recorded; an [`StreamEvent::Error`] is sent first. Generation
    /// failures are reported as [`TurnOutcome::Aborted`], not as errors.
    pub async fn send_message(
        &self,
        request: &ChatRequest,
        events: mpsc::Sender<StreamEvent>,
    ) -> Result<TurnOutcome, ChatError> {
        let model = request.model.as_deref().unwrap_or(&self.default_model);
        let key = request.collection_key();

        let memories = self
            .memory
            .search(&key, &request.message, self.chat.memory_top_k)
            .await;
        debug!("Using {} memories for {}", memories.len(), key);

        let prompt = compose_prompt(&PromptContext {
            purpose: request.purpose,
            partner: request.partner,
            document_content: &request.document_content,
            selected_text: request.selected_text.as_deref(),
            memories: &memories,
            message: &request.message,
            document_prefix_chars: self.chat.document_prefix_chars,
        });
        let system_instruction = chat_instruction(request.partner, request.purpose);

        let user_turn = ChatTurn::user(&request.project_id, &request.message, model);
        if let Err(err) = self.transcript.append(&user_turn).await {
            error!("Failed to record user turn for {}: {}", key, err);
            let _ = events.send(StreamEvent::Error(err.to_string())).await;
            return Err(err.into());
        }

        let mut stream = match self
            .provider
            .stream_completion(&prompt, model, &system_instruction)
            .await
        {
            Ok(stream) => stream,
            Err(err) => {
                error!("Failed to start completion for {}: {}", key, err);
                let message = err.to_string();
                let _ = events.send(StreamEvent::Error(message.clone())).await;
                return Ok(TurnOutcome::Aborted(AbortReason::Generation(message)));
            }
        };

        let mut reply = String::new();
        loop {
            let item = tokio::select! {
                biased;
                _ = events.closed() => {
                    info!("Client for {} disconnected mid-reply", key);
                    return Ok(TurnOutcome::Aborted(AbortReason::Disconnected));
                }
                item = stream.next() => item,
            };

            match item {
                Some(Ok(chunk)) => {
                    reply.push_str(&chunk);
                    if events.send(StreamEvent::Chunk(chunk)).await.is_err() {
                        info!("Client for {} disconnected mid-reply", key);
                        return Ok(TurnOutcome::Aborted(AbortReason::Disconnected));
                    }
                }
                Some(Err(err)) => {
                    error!("Completion for {} failed mid-stream: {}", key, err);
                    let message = err.to_string();
                    let _ = events.send(StreamEvent::Error(message.clone())).await;
                    return Ok(TurnOutcome::Aborted(AbortReason::Generation(message)));
                }
                None => break,
            }
        }
        drop(stream);

        let assistant_turn = ChatTurn::assistant(&request.project_id, &reply, model);
        if let Err(err) = self.transcript.append(&assistant_turn).await {
            error!("Failed to record reply for {}: {}", key, err);
            let _ = events.send(StreamEvent::Error(err.to_string())).await;
            return Err(err.into());
        }
        let _ = events.send(StreamEvent::Done).await;
        info!("Completed turn for {} ({} chars)", key, reply.chars().count());

        if self.chat.remember_exchanges {
            self.remember_exchange(&key, &request.message, &reply).await;
        }

        Ok(TurnOutcome::Completed(assistant_turn))
    }

    /// Run [`send_message`](Self::send_message) on a task and return its events.
    ///
    /// Dropping the returned stream cancels the turn. The task may still be
    /// remembering the exchange after [`StreamEvent::Done`]; callers that shut
    /// the runtime down at `Done` should use [`run_message`](Self::run_message).
    pub fn spawn_message(self: &Arc<Self>, request: ChatRequest) -> ReceiverStream<StreamEvent> {
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let orchestrator = Arc::clone(self);

        tokio::spawn(async move {
            match orchestrator.send_message(&request, tx).await {
                Ok(TurnOutcome::Completed(_)) => {}
                Ok(TurnOutcome::Aborted(reason)) => {
                    debug!("Turn for {:?} aborted: {:?}", request.project_id, reason)
                }
                Err(err) => warn!("Turn for {:?} failed: {}", request.project_id, err),
            }
        });

        ReceiverStream::new(rx)
    }

    /// Run one turn on the current task while `consume` reads its events.
    ///
    /// Returns once both have finished, so work after [`StreamEvent::Done`]
    /// (exchange memorization) is never cut short when the consumer stops
    /// reading at `Done`.
    pub async fn run_message<C, Fut>(
        &self,
        request: &ChatRequest,
        consume: C,
    ) -> (Result<TurnOutcome, ChatError>, Fut::Output)
    where
        C: FnOnce(ReceiverStream<StreamEvent>) -> Fut,
        Fut: Future,
    {
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        tokio::join!(self.send_message(request, tx), consume(ReceiverStream::new(rx)))
    }

    async fn remember_exchange(&self, key: &CollectionKey, message: &str, reply: &str) {
        if reply.trim().is_empty() {
            return;
        }

        let mut metadata = Metadata::new();
        metadata.insert("kind".to_string(), "exchange".into());
        let text = format!("User: {message}\nAssistant: {reply}");

        if let Err(err) = self.memory.append(key, &text, Some(metadata)).await {
            warn!("Could not remember exchange in {}: {}", key, err);
        }
    }

    /// Suggest a short continuation of the text before the cursor.
    ///
    /// See [`GhostWriter::suggest`].
    pub async fn ghost_suggestion(&self, request: &GhostRequest) -> Result<String, ChatError> {
        self.ghost.suggest(request).await
    }
}

/// Ghost-writing suggestions on their own, without memory or transcript.
pub struct GhostWriter {
    provider: Arc<dyn CompletionProvider>,
    default_model: String,
    settings: GhostSettings,
}

impl GhostWriter {
    pub fn new(provider: Arc<dyn CompletionProvider>, config: &MembraneConfig) -> Self {
        Self {
            provider,
            default_model: config.model.clone(),
            settings: config.ghost.clone(),
        }
    }

    /// Suggest a short continuation of the text before the cursor.
    ///
    /// Returns an empty string when there is too little context or the model
    /// declines.
    ///
    /// # Errors
    /// [`ChatError::Generation`] when the provider call fails.
    pub async fn suggest(&self, request: &GhostRequest) -> Result<String, ChatError> {
        let total = request.text.chars().count();
        let cursor = request.cursor.unwrap_or(total).min(total);
        let before: String = request.text.chars().take(cursor).collect();
        let window = last_chars(&before, self.settings.window_chars);

        if window.trim().chars().count() < self.settings.min_context_chars {
            debug!("Skipping ghost suggestion: too little context");
            return Ok(String::new());
        }

        let model = request.model.as_deref().unwrap_or(&self.default_model);
        let raw = self
            .provider
            .complete(
                &ghost_prompt(window),
                model,
                &ghost_instruction(request.purpose),
                self.settings.max_tokens,
            )
            .await?;

        let suggestion = clean_suggestion(&raw);
        if suggestion.is_empty() && !raw.trim().is_empty() {
            debug!("Discarded ghost suggestion {:?}", raw);
        }
        Ok(suggestion)
    }
}

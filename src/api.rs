//! # API Module
//!
//! Text generation against an OpenAI-compatible chat completions endpoint
//! (OpenRouter by default).
//!
//! [`CompletionProvider`] is the seam the chat orchestrator talks to:
//!
//! - [`stream_completion`](CompletionProvider::stream_completion) yields reply
//!   chunks in order. A failure before the first chunk is returned directly; a
//!   failure later arrives as an `Err` item and ends the stream.
//! - [`complete`](CompletionProvider::complete) returns one whole short reply
//!   and is used for ghost-writing suggestions.
//!
//! [`OpenAiProvider`] implements both with `async-openai`.
//!
//! # Example
//!
//! ```no_run
//! use futures::StreamExt;
//! use membrane::api::{CompletionProvider, OpenAiProvider};
//! use membrane::config::MembraneConfig;
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let provider = OpenAiProvider::new(&MembraneConfig::default());
//! let mut stream = provider
//!     .stream_completion("Say hi", "anthropic/claude-3.5-sonnet", "Be brief.")
//!     .await?;
//! while let Some(chunk) = stream.next().await {
//!     print!("{}", chunk?);
//! }
//! # Ok(()) }
//! ```
use async_openai::{
    Client,
    config::OpenAIConfig,
    types::chat::{
        ChatCompletionRequestMessage, ChatCompletionRequestSystemMessage,
        ChatCompletionRequestSystemMessageContent, ChatCompletionRequestUserMessage,
        ChatCompletionRequestUserMessageContent, CreateChatCompletionRequest,
        CreateChatCompletionRequestArgs,
    },
};
use async_trait::async_trait;
use futures::{Stream, StreamExt};
use std::pin::Pin;
use tracing::{debug, error};

use crate::config::MembraneConfig;
use crate::error::GenerationError;

/// Ordered reply chunks of one streamed completion.
pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<String, GenerationError>> + Send>>;

/// A chat-completion backend.
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    /// Start a streamed completion of `prompt` under `system_instruction`.
    async fn stream_completion(
        &self,
        prompt: &str,
        model: &str,
        system_instruction: &str,
    ) -> Result<ChunkStream, GenerationError>;

    /// One non-streamed completion capped at `max_tokens`.
    async fn complete(
        &self,
        prompt: &str,
        model: &str,
        system_instruction: &str,
        max_tokens: u32,
    ) -> Result<String, GenerationError>;
}

/// Creates a new OpenAI API client from configuration.
pub fn create_client(config: &MembraneConfig) -> Client<OpenAIConfig> {
    let openai_config = OpenAIConfig::new()
        .with_api_key(config.api_key.clone())
        .with_api_base(config.api_base.clone());
    debug!("Client created for {}", config.api_base);
    Client::with_config(openai_config)
}

/// [`CompletionProvider`] over any OpenAI-compatible endpoint.
#[derive(Clone)]
pub struct OpenAiProvider {
    client: Client<OpenAIConfig>,
    max_tokens: u32,
    temperature: f32,
}

impl OpenAiProvider {
    /// Client for `config.api_base`; chat replies use `config.chat.max_tokens`
    /// and `config.chat.temperature`.
    pub fn new(config: &MembraneConfig) -> Self {
        Self {
            client: create_client(config),
            max_tokens: config.chat.max_tokens,
            temperature: config.chat.temperature,
        }
    }

    #[allow(deprecated)]
    fn request(
        &self,
        prompt: &str,
        model: &str,
        system_instruction: &str,
        max_tokens: u32,
    ) -> Result<CreateChatCompletionRequest, GenerationError> {
        let messages = vec![
            ChatCompletionRequestMessage::System(ChatCompletionRequestSystemMessage {
                content: ChatCompletionRequestSystemMessageContent::Text(
                    system_instruction.to_string(),
                ),
                name: None,
            }),
            ChatCompletionRequestMessage::User(ChatCompletionRequestUserMessage {
                content: ChatCompletionRequestUserMessageContent::Text(prompt.to_string()),
                name: None,
            }),
        ];

        let request = CreateChatCompletionRequestArgs::default()
            .max_tokens(max_tokens)
            .temperature(self.temperature)
            .model(model)
            .messages(messages)
            .build()?;
        Ok(request)
    }
}

#[async_trait]
impl CompletionProvider for OpenAiProvider {
    async fn stream_completion(
        &self,
        prompt: &str,
        model: &str,
        system_instruction: &str,
    ) -> Result<ChunkStream, GenerationError> {
        let request = self.request(prompt, model, system_instruction, self.max_tokens)?;
        debug!("Sending streamed request to {}", model);

        let stream = self.client.chat().create_stream(request).await?;

        // One chunk per provider event that carries content.
        let chunks = stream.filter_map(|event| async move {
            match event {
                Ok(response) => {
                    let content: String = response
                        .choices
                        .iter()
                        .filter_map(|choice| choice.delta.content.as_deref())
                        .collect();
                    (!content.is_empty()).then_some(Ok(content))
                }
                Err(err) => {
                    error!("Completion stream failed: {}", err);
                    Some(Err(GenerationError::from(err)))
                }
            }
        });

        Ok(Box::pin(chunks))
    }

    async fn complete(
        &self,
        prompt: &str,
        model: &str,
        system_instruction: &str,
        max_tokens: u32,
    ) -> Result<String, GenerationError> {
        let request = self.request(prompt, model, system_instruction, max_tokens)?;
        debug!("Sending request to {}", model);

        let response = self.client.chat().create(request).await?;
        let choice = response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| GenerationError::Stream("response had no choices".to_string()))?;

        Ok(choice.message.content.unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::{Method::POST, MockServer};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn config_for(server: &MockServer) -> MembraneConfig {
        MembraneConfig {
            api_key: "test-key".to_string(),
            api_base: server.base_url(),
            ..MembraneConfig::default()
        }
    }

    fn stream_event(content: Option<&str>) -> String {
        let chunk = json!({
            "id": "chatcmpl-1",
            "object": "chat.completion.chunk",
            "created": 1700000000,
            "model": "test-model",
            "choices": [{
                "index": 0,
                "delta": { "role": "assistant", "content": content },
                "finish_reason": null
            }]
        });
        format!("data: {chunk}\n\n")
    }

    #[tokio::test]
    async fn streamed_chunks_arrive_in_order() {
        let server = MockServer::start_async().await;
        let body = format!(
            "{}{}{}{}data: [DONE]\n\n",
            stream_event(Some("Hel")),
            stream_event(None),
            stream_event(Some("lo")),
            stream_event(Some("!")),
        );
        let completions = server
            .mock_async(|when, then| {
                when.method(POST).path("/chat/completions");
                then.status(200)
                    .header("content-type", "text/event-stream")
                    .body(body);
            })
            .await;

        let provider = OpenAiProvider::new(&config_for(&server));
        let stream = provider
            .stream_completion("prompt", "test-model", "system")
            .await
            .unwrap();
        let chunks: Vec<String> = stream.map(|chunk| chunk.unwrap()).collect().await;

        completions.assert_async().await;
        assert_eq!(chunks, vec!["Hel", "lo", "!"]);
    }

    #[tokio::test]
    async fn rejected_stream_surfaces_an_error_item() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/chat/completions");
                then.status(401).json_body(json!({
                    "error": {
                        "message": "bad key",
                        "type": "invalid_request_error",
                        "param": null,
                        "code": null
                    }
                }));
            })
            .await;

        let provider = OpenAiProvider::new(&config_for(&server));
        let outcome = match provider.stream_completion("p", "m", "s").await {
            Ok(mut stream) => stream.next().await,
            Err(err) => Some(Err(err)),
        };
        assert!(matches!(outcome, Some(Err(_))));
    }

    #[tokio::test]
    async fn complete_returns_the_first_choice() {
        let server = MockServer::start_async().await;
        let completions = server
            .mock_async(|when, then| {
                when.method(POST).path("/chat/completions");
                then.status(200).json_body(json!({
                    "id": "chatcmpl-2",
                    "object": "chat.completion",
                    "created": 1700000000,
                    "model": "test-model",
                    "choices": [{
                        "index": 0,
                        "message": { "role": "assistant", "content": "and then the rain came" },
                        "finish_reason": "stop"
                    }]
                }));
            })
            .await;

        let provider = OpenAiProvider::new(&config_for(&server));
        let text = provider.complete("p", "test-model", "s", 60).await.unwrap();

        completions.assert_async().await;
        assert_eq!(text, "and then the rain came");
    }

    #[tokio::test]
    async fn complete_maps_api_errors() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/chat/completions");
                then.status(400).json_body(json!({
                    "error": {
                        "message": "model not found",
                        "type": "invalid_request_error",
                        "param": null,
                        "code": null
                    }
                }));
            })
            .await;

        let provider = OpenAiProvider::new(&config_for(&server));
        let err = provider.complete("p", "missing", "s", 60).await.unwrap_err();
        assert!(matches!(err, GenerationError::Api(message) if message == "model not found"));
    }
}

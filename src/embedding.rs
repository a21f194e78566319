//! # Embeddings
//!
//! The [`EmbeddingFunction`] contract and the default sentence-embedding model.
//!
//! An embedder maps text to a vector of a **fixed** dimension. The memory store
//! relies on three guarantees:
//!
//! - [`dimension`](EmbeddingFunction::dimension) never changes after construction;
//! - the same text always embeds to the same vector;
//! - records and queries of one collection are embedded by the same
//!   [`model_id`](EmbeddingFunction::model_id). Mixing models makes distances meaningless.
//!
//! [`SentenceEmbeddingsModel`] runs `all-MiniLM-L6-v2` with Candle (pure Rust)
//! and produces L2-normalized 384-d vectors.

use async_trait::async_trait;
use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::bert::{BertModel, Config, DTYPE};
use hf_hub::{Repo, RepoType, api::sync::Api};
use std::sync::Arc;
use tokenizers::Tokenizer;
use tracing::info;

use crate::error::EmbeddingError;

/// Hugging Face id of the default sentence embedding model.
pub const MINILM_MODEL_ID: &str = "sentence-transformers/all-MiniLM-L6-v2";

/// Output dimension of [`MINILM_MODEL_ID`].
pub const MINILM_DIMENSION: usize = 384;

/// Maps text to a fixed-length vector.
#[async_trait]
pub trait EmbeddingFunction: Send + Sync {
    /// Length of every vector returned by [`embed`](Self::embed).
    fn dimension(&self) -> usize;

    /// Stable identifier of the model (and version) producing the vectors.
    fn model_id(&self) -> &str;

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;
}

/// Embed `text` and reject vectors whose length differs from the declared dimension.
pub async fn embed_checked(
    embedder: &dyn EmbeddingFunction,
    text: &str,
) -> Result<Vec<f32>, EmbeddingError> {
    let vector = embedder.embed(text).await?;
    if vector.len() != embedder.dimension() {
        return Err(EmbeddingError::DimensionMismatch {
            expected: embedder.dimension(),
            actual: vector.len(),
        });
    }
    Ok(vector)
}

fn model_error(err: impl std::fmt::Display) -> EmbeddingError {
    EmbeddingError::Model(err.to_string())
}

/// Sentence embeddings model using Candle (pure Rust)
///
/// Cheap to clone; inference for [`embed`](EmbeddingFunction::embed) runs on
/// the blocking thread pool.
#[derive(Clone)]
pub struct SentenceEmbeddingsModel {
    inner: Arc<MiniLm>,
}

struct MiniLm {
    model: BertModel,
    tokenizer: Tokenizer,
    device: Device,
}

impl SentenceEmbeddingsModel {
    /// Load the model from Hugging Face Hub (cached after the first download).
    pub fn load() -> Result<Self, EmbeddingError> {
        let device = Device::Cpu;
        let revision = "main";

        let repo = Repo::with_revision(
            MINILM_MODEL_ID.to_string(),
            RepoType::Model,
            revision.to_string(),
        );
        let api = Api::new().map_err(model_error)?;
        let api_repo = api.repo(repo);

        let config_filename = api_repo.get("config.json").map_err(model_error)?;
        let tokenizer_filename = api_repo.get("tokenizer.json").map_err(model_error)?;
        let weights_filename = api_repo.get("model.safetensors").map_err(model_error)?;

        let config = std::fs::read_to_string(config_filename).map_err(model_error)?;
        let config: Config = serde_json::from_str(&config).map_err(model_error)?;

        let tokenizer = Tokenizer::from_file(tokenizer_filename).map_err(model_error)?;

        let vb = unsafe {
            VarBuilder::from_mmaped_safetensors(&[weights_filename], DTYPE, &device)
                .map_err(model_error)?
        };
        let model = BertModel::load(vb, &config).map_err(model_error)?;

        info!("Loaded embedding model {}", MINILM_MODEL_ID);

        Ok(Self {
            inner: Arc::new(MiniLm {
                model,
                tokenizer,
                device,
            }),
        })
    }

    /// Encode text into a normalized embedding on the calling thread.
    pub fn encode(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        self.inner.encode(text)
    }
}

impl MiniLm {
    fn encode(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        // Tokenize with automatic truncation at 512 tokens
        let tokens = self.tokenizer.encode(text, true).map_err(model_error)?;

        let token_ids = Tensor::new(tokens.get_ids(), &self.device)
            .and_then(|t| t.unsqueeze(0))
            .map_err(model_error)?;
        let token_type_ids = Tensor::new(tokens.get_type_ids(), &self.device)
            .and_then(|t| t.unsqueeze(0))
            .map_err(model_error)?;

        let output = self
            .model
            .forward(&token_ids, &token_type_ids, None)
            .map_err(model_error)?;

        let embedding = self
            .mean_pooling(&output, tokens.get_attention_mask())
            .and_then(|pooled| Self::normalize(&pooled))
            .map_err(model_error)?;

        embedding.to_vec1::<f32>().map_err(model_error)
    }

    /// Mean pooling over token embeddings, considering attention mask
    fn mean_pooling(&self, embeddings: &Tensor, attention_mask: &[u32]) -> candle_core::Result<Tensor> {
        // embeddings: [1, seq_len, hidden]; mask reshaped to [1, seq_len, 1]
        let mask = Tensor::new(attention_mask, &self.device)?
            .to_dtype(DType::F32)?
            .unsqueeze(0)?
            .unsqueeze(2)?;

        let sum = embeddings.broadcast_mul(&mask)?.sum(1)?;
        let count = mask.sum(1)?.clamp(1f32, f32::INFINITY)?;

        sum.broadcast_div(&count)?.squeeze(0)
    }

    fn normalize(tensor: &Tensor) -> candle_core::Result<Tensor> {
        let norm = tensor.sqr()?.sum_all()?.sqrt()?;
        tensor.broadcast_div(&norm)
    }
}

#[async_trait]
impl EmbeddingFunction for SentenceEmbeddingsModel {
    fn dimension(&self) -> usize {
        MINILM_DIMENSION
    }

    fn model_id(&self) -> &str {
        MINILM_MODEL_ID
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let inner = Arc::clone(&self.inner);
        let text = text.to_string();
        tokio::task::spawn_blocking(move || inner.encode(&text))
            .await
            .map_err(model_error)?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{LetterEmbedder, TableEmbedder};

    #[tokio::test]
    async fn checked_embedding_passes_matching_dimension() {
        let embedder = LetterEmbedder;
        let vector = embed_checked(&embedder, "abc").await.unwrap();
        assert_eq!(vector.len(), embedder.dimension());
    }

    #[tokio::test]
    async fn checked_embedding_rejects_wrong_dimension() {
        let embedder = TableEmbedder::new(3).with("short", vec![1.0, 2.0]);
        let err = embed_checked(&embedder, "short").await.unwrap_err();
        assert!(matches!(
            err,
            EmbeddingError::DimensionMismatch {
                expected: 3,
                actual: 2
            }
        ));
    }

    #[tokio::test]
    #[ignore = "downloads all-MiniLM-L6-v2 from Hugging Face"]
    async fn minilm_vectors_are_normalized() {
        let model = SentenceEmbeddingsModel::load().unwrap();
        let vector = model.embed("Rust is cool.").await.unwrap();
        let norm: f32 = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        assert_eq!(vector.len(), MINILM_DIMENSION);
        assert!((norm - 1.0).abs() < 1e-3);
        assert_eq!(vector, model.encode("Rust is cool.").unwrap());
    }
}

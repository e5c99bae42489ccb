//! 임베딩 모듈 - 텍스트 벡터화
//!
//! 텍스트를 고정 길이 벡터로 변환하는 프로바이더입니다.
//! 한 프로세스 수명 동안 모든 호출의 차원은 동일해야 합니다.
//! 차원을 모르는 모델은 첫 응답의 길이로 고정합니다.
//!
//! ## 사용법
//! ```rust,ignore
//! let embedder = OpenAiEmbedding::from_env("text-embedding-3-small")?;
//! let embedding = embedder.embed("Hello, world!").await?;
//! ```

use std::sync::OnceLock;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::openai::OpenAiClient;

// ============================================================================
// EmbeddingProvider Trait
// ============================================================================

/// 임베딩 프로바이더 트레이트
///
/// 텍스트를 벡터로 변환하는 인터페이스입니다.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// 단일 텍스트 임베딩
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// 임베딩 차원 수 (아직 모르면 0)
    fn dimension(&self) -> usize;

    /// 프로바이더 이름
    fn name(&self) -> &str;
}

// ============================================================================
// OpenAI Embedding
// ============================================================================

/// 기본 임베딩 모델
pub const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-3-small";

/// 알려진 모델의 차원
fn known_dimension(model: &str) -> Option<usize> {
    match model {
        "text-embedding-3-small" | "text-embedding-ada-002" => Some(1536),
        "text-embedding-3-large" => Some(3072),
        _ => None,
    }
}

/// OpenAI 호환 `/embeddings` 구현체
#[derive(Debug, Clone)]
pub struct OpenAiEmbedding {
    client: OpenAiClient,
    model: String,
    /// 설정/모델 표에서 정해지거나 첫 응답에서 고정됨
    dimension: OnceLock<usize>,
    /// 요청에 실어 보낼 차원 (설정에서 지정한 경우만)
    requested_dimension: Option<usize>,
}

#[derive(Debug, Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    dimensions: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

impl OpenAiEmbedding {
    /// 클라이언트와 모델로 생성
    pub fn new(client: OpenAiClient, model: impl Into<String>) -> Self {
        let model = model.into();
        let dimension = OnceLock::new();
        if let Some(dim) = known_dimension(&model) {
            let _ = dimension.set(dim);
        }
        Self {
            client,
            model,
            dimension,
            requested_dimension: None,
        }
    }

    /// 차원 지정 (`dimensions` 축소 요청 등 모델 표와 다를 때)
    pub fn with_dimension(mut self, dimension: usize) -> Self {
        self.dimension = OnceLock::from(dimension);
        self.requested_dimension = Some(dimension);
        self
    }

    /// 응답 벡터 길이 확인. 처음 본 길이를 프로세스 수명 동안의 차원으로 고정합니다.
    fn check_dimension(&self, len: usize) -> Result<()> {
        let expected = *self.dimension.get_or_init(|| {
            tracing::info!("Embedding dimension for {} fixed at {}", self.model, len);
            len
        });
        if len != expected {
            anyhow::bail!("Embedding dimension mismatch: expected {}, got {}", expected, len);
        }
        Ok(())
    }

    /// 환경변수의 API 키로 생성
    pub fn from_env(model: impl Into<String>) -> Result<Self> {
        let client = OpenAiClient::from_env()?;
        Ok(Self::new(client, model))
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAiEmbedding {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        // 빈 텍스트는 호출 없이 영벡터
        if text.trim().is_empty() {
            let dim = self
                .dimension
                .get()
                .copied()
                .ok_or_else(|| anyhow::anyhow!("Embedding dimension of {} not known yet", self.model))?;
            return Ok(vec![0.0; dim]);
        }

        let request = EmbedRequest {
            model: &self.model,
            input: text,
            dimensions: self.requested_dimension,
        };

        let response: EmbedResponse = self
            .client
            .post_json("embeddings", &request)
            .await
            .context("Embedding request failed")?;

        let values = response
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| anyhow::anyhow!("Embedding response contained no data"))?;

        self.check_dimension(values.len())?;
        Ok(values)
    }

    fn dimension(&self) -> usize {
        self.dimension.get().copied().unwrap_or(0)
    }

    fn name(&self) -> &str {
        &self.model
    }
}

// ============================================================================
// Tests
// ============================================================================

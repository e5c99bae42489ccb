//! palank-assist - 하이브리드 검색 기반 자동 응답 파이프라인
//!
//! 코사인 유사도 + BM25 하이브리드 검색으로 컨텍스트를 고르고,
//! 생성된 응답을 리스크/신뢰도로 점수화한 뒤
//! 자동 전송할지 검토 대기열에 넣을지 결정합니다.

pub mod cli;
pub mod config;
pub mod embedding;
pub mod error;
pub mod exchange;
pub mod knowledge;
pub mod llm;
pub mod moderation;
pub mod openai;
pub mod pipeline;

// Re-exports
pub use config::{Config, ConfigStore, FileConfigStore, StaticConfigStore};
pub use embedding::{EmbeddingProvider, OpenAiEmbedding};
pub use error::PipelineError;
pub use exchange::{
    get_data_dir, DeliveryHook, ExchangeLog, ExchangeRecord, JsonlExchangeLog, NoopDelivery,
    ReviewDesk,
};
pub use knowledge::{
    CorpusIndex, CorpusLoader, HybridRetriever, Passage, Retrieval, ScoredPassage, SharedCorpus,
};
pub use llm::{AnswerGenerator, ChatPrompt, Generation, OpenAiChat};
pub use moderation::{ModerationScores, Moderator, OpenAiModeration};
pub use openai::{get_api_key, has_api_key, OpenAiClient};
pub use pipeline::{decide, Decision, ExchangeOutcome, ExchangeState, Mode, Pipeline};

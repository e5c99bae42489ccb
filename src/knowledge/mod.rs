//! Knowledge 모듈 - 하이브리드 검색 코퍼스
//!
//! - Chunker: 빈 줄 경계 패시지 분할
//! - Corpus: 패시지/임베딩/토큰 병렬 인덱스
//! - Lexical: BM25 키워드 점수
//! - Hybrid: 정규화 후 가중 결합

mod chunker;
mod corpus;
mod hybrid;
mod lexical;
mod vector;

// Re-exports
pub use chunker::{default_chunker, Chunker, ParagraphChunker};
pub use corpus::{
    CorpusIndex, CorpusLoader, Passage, SharedCorpus, SourceDocument, DEFAULT_EMBED_CONCURRENCY,
    DEFAULT_EXTENSIONS,
};
pub use hybrid::{combine_scores, rank, top_k_indices, HybridRetriever, Retrieval, ScoredPassage};
pub use lexical::{tokenize, Bm25Index};
pub use vector::{cosine_similarity, normalize_by_max};

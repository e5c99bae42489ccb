//! Corpus Index - 시작 시 한 번 빌드되는 읽기 전용 패시지 인덱스
//!
//! 디렉토리의 문서를 패시지로 분할하고, 각 패시지의 임베딩과 토큰을 계산합니다.
//! 패시지/임베딩/토큰은 항상 같은 인덱스로 대응합니다.

use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use anyhow::Context;
use futures::stream::{self, StreamExt, TryStreamExt};
use walkdir::WalkDir;

use crate::embedding::EmbeddingProvider;
use crate::error::PipelineError;

use super::chunker::{default_chunker, Chunker};
use super::lexical::{tokenize, Bm25Index};

/// 기본 코퍼스 파일 확장자
pub const DEFAULT_EXTENSIONS: &[&str] = &["md"];

/// 동시 임베딩 요청 수
pub const DEFAULT_EMBED_CONCURRENCY: usize = 4;

// ============================================================================
// Types
// ============================================================================

/// 검색 가능한 최소 텍스트 단위 (불변)
#[derive(Debug, Clone, PartialEq)]
pub struct Passage {
    /// 원본 파일 이름
    pub source: String,
    /// 패시지 텍스트
    pub text: String,
    /// 임베딩 벡터
    pub embedding: Vec<f32>,
    /// 소문자 토큰 (키워드 검색 전용)
    pub tokens: Vec<String>,
}

/// 로드된 원본 문서
#[derive(Debug, Clone)]
pub struct SourceDocument {
    pub path: PathBuf,
    pub text: String,
}

impl SourceDocument {
    /// 패시지 출처로 쓰는 파일 이름
    pub fn source_name(&self) -> String {
        self.path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("unknown")
            .to_string()
    }
}

// ============================================================================
// CorpusLoader
// ============================================================================

/// 코퍼스 디렉토리 로더
///
/// 하위 디렉토리는 탐색하지 않으며 파일 이름 순으로 읽습니다.
#[derive(Debug, Clone)]
pub struct CorpusLoader {
    extensions: Vec<String>,
}

impl Default for CorpusLoader {
    fn default() -> Self {
        Self::new(DEFAULT_EXTENSIONS.iter().map(|e| e.to_string()).collect())
    }
}

impl CorpusLoader {
    pub fn new(extensions: Vec<String>) -> Self {
        Self { extensions }
    }

    fn accepts(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| self.extensions.iter().any(|e| e.eq_ignore_ascii_case(ext)))
            .unwrap_or(false)
    }

    /// 디렉토리의 문서 로드
    ///
    /// 디렉토리가 없으면 빈 코퍼스로 취급합니다.
    pub fn load(&self, dir: &Path) -> anyhow::Result<Vec<SourceDocument>> {
        if !dir.exists() {
            tracing::warn!("Corpus directory not found: {:?} (empty corpus)", dir);
            return Ok(Vec::new());
        }

        if !dir.is_dir() {
            anyhow::bail!("Not a directory: {:?}", dir);
        }

        let mut documents = Vec::new();

        let walker = WalkDir::new(dir)
            .min_depth(1)
            .max_depth(1)
            .sort_by_file_name();

        for entry in walker {
            let entry = entry.with_context(|| format!("Failed to read entry in {:?}", dir))?;

            if !entry.file_type().is_file() || !self.accepts(entry.path()) {
                continue;
            }

            let text = std::fs::read_to_string(entry.path())
                .with_context(|| format!("Failed to read corpus file: {:?}", entry.path()))?;

            documents.push(SourceDocument {
                path: entry.path().to_path_buf(),
                text,
            });
        }

        tracing::info!("Loaded {} corpus files from {:?}", documents.len(), dir);
        Ok(documents)
    }
}

// ============================================================================
// CorpusIndex
// ============================================================================

/// 패시지 목록 + BM25 인덱스
#[derive(Debug, Clone)]
pub struct CorpusIndex {
    passages: Vec<Passage>,
    bm25: Bm25Index,
}

impl CorpusIndex {
    /// 빈 코퍼스
    pub fn empty() -> Self {
        Self::from_passages(Vec::new())
    }

    /// 이미 계산된 패시지로 인덱스 구성
    pub fn from_passages(passages: Vec<Passage>) -> Self {
        let token_lists: Vec<Vec<String>> = passages.iter().map(|p| p.tokens.clone()).collect();
        let bm25 = Bm25Index::new(&token_lists);
        Self { passages, bm25 }
    }

    /// 디렉토리에서 코퍼스 빌드
    ///
    /// 임베딩 프로바이더에 도달할 수 없으면 [`PipelineError::IndexBuild`]를 반환합니다.
    pub async fn build_from_dir(
        dir: &Path,
        loader: &CorpusLoader,
        embedder: &dyn EmbeddingProvider,
    ) -> Result<Self, PipelineError> {
        let documents = loader
            .load(dir)
            .map_err(|e| PipelineError::IndexBuild(PipelineError::describe(&e)))?;

        Self::build(&documents, default_chunker().as_ref(), embedder, DEFAULT_EMBED_CONCURRENCY)
            .await
    }

    /// 문서 목록에서 코퍼스 빌드
    ///
    /// 임베딩은 `concurrency`개까지 동시에 요청하지만, 결과는 패시지 순서대로 배치됩니다.
    pub async fn build(
        documents: &[SourceDocument],
        chunker: &dyn Chunker,
        embedder: &dyn EmbeddingProvider,
        concurrency: usize,
    ) -> Result<Self, PipelineError> {
        let chunks: Vec<(String, String)> = documents
            .iter()
            .flat_map(|doc| {
                let source = doc.source_name();
                chunker
                    .chunk(&doc.text)
                    .into_iter()
                    .map(move |text| (source.clone(), text))
            })
            .collect();

        if chunks.is_empty() {
            tracing::warn!("Corpus is empty; replies will have no grounding context");
            return Ok(Self::empty());
        }

        // buffered()는 완료 순서가 아니라 입력 순서로 결과를 내보냄
        let embeddings: Vec<Vec<f32>> = stream::iter(chunks.iter())
            .map(|(_, text)| embedder.embed(text))
            .buffered(concurrency.max(1))
            .try_collect()
            .await
            .map_err(|e| PipelineError::IndexBuild(PipelineError::describe(&e)))?;

        if let Some(first) = embeddings.first() {
            let dim = first.len();
            if let Some(bad) = embeddings.iter().position(|e| e.len() != dim) {
                return Err(PipelineError::IndexBuild(format!(
                    "embedding dimension mismatch at passage {}: expected {}, got {}",
                    bad,
                    dim,
                    embeddings[bad].len()
                )));
            }
        }

        let passages: Vec<Passage> = chunks
            .into_iter()
            .zip(embeddings)
            .map(|((source, text), embedding)| Passage {
                tokens: tokenize(&text),
                source,
                text,
                embedding,
            })
            .collect();

        tracing::info!(
            "Built corpus index: {} passages from {} documents (embedder: {})",
            passages.len(),
            documents.len(),
            embedder.name()
        );

        Ok(Self::from_passages(passages))
    }

    pub fn passages(&self) -> &[Passage] {
        &self.passages
    }

    pub fn get(&self, index: usize) -> Option<&Passage> {
        self.passages.get(index)
    }

    pub fn len(&self) -> usize {
        self.passages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.passages.is_empty()
    }

    /// 쿼리 토큰에 대한 패시지별 BM25 점수
    pub fn lexical_scores(&self, query_tokens: &[String]) -> Vec<f32> {
        self.bm25.scores(query_tokens)
    }
}

// ============================================================================
// SharedCorpus
// ============================================================================

/// 교환 간 공유되는 코퍼스 핸들
///
/// 읽기는 현재 스냅샷(`Arc`)을 복제해 가져가고, 재빌드는 새 인덱스 전체를 교체합니다.
#[derive(Debug, Clone)]
pub struct SharedCorpus {
    inner: Arc<RwLock<Arc<CorpusIndex>>>,
}

impl SharedCorpus {
    pub fn new(index: CorpusIndex) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Arc::new(index))),
        }
    }

    /// 현재 스냅샷
    pub fn current(&self) -> Arc<CorpusIndex> {
        let guard = self.inner.read().unwrap_or_else(|e| e.into_inner());
        Arc::clone(&guard)
    }

    /// 새 인덱스 게시 (원자적 교체)
    pub fn replace(&self, index: CorpusIndex) {
        let next = Arc::new(index);
        let mut guard = self.inner.write().unwrap_or_else(|e| e.into_inner());
        *guard = next;
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::time::Duration;
    use tempfile::TempDir;

    use crate::knowledge::chunker::ParagraphChunker;

    /// 텍스트 길이에 반비례하는 지연으로 완료 순서를 뒤섞는 임베더
    struct SlowEmbedding;

    #[async_trait]
    impl EmbeddingProvider for SlowEmbedding {
        async fn embed(&self, text: &str) -> anyhow::Result<Vec<f32>> {
            let delay = 50u64.saturating_sub(text.len() as u64 * 5);
            tokio::time::sleep(Duration::from_millis(delay)).await;
            Ok(vec![text.len() as f32, 1.0])
        }

        fn dimension(&self) -> usize {
            2
        }

        fn name(&self) -> &str {
            "slow"
        }
    }

    struct FailingEmbedding;

    #[async_trait]
    impl EmbeddingProvider for FailingEmbedding {
        async fn embed(&self, _text: &str) -> anyhow::Result<Vec<f32>> {
            anyhow::bail!("connection refused")
        }

        fn dimension(&self) -> usize {
            2
        }

        fn name(&self) -> &str {
            "failing"
        }
    }

    fn doc(name: &str, text: &str) -> SourceDocument {
        SourceDocument {
            path: PathBuf::from(name),
            text: text.to_string(),
        }
    }

    #[tokio::test]
    async fn test_build_keeps_passage_order_under_concurrency() {
        let docs = vec![
            doc("a.md", "x\n\nxxxxx\n\nxx"),
            doc("b.md", "xxxxxxx\n\nxxx"),
        ];
        let index = CorpusIndex::build(&docs, &ParagraphChunker::new(), &SlowEmbedding, 8)
            .await
            .unwrap();

        let texts: Vec<&str> = index.passages().iter().map(|p| p.text.as_str()).collect();
        assert_eq!(texts, vec!["x", "xxxxx", "xx", "xxxxxxx", "xxx"]);

        // 임베딩/토큰이 같은 패시지에 대응
        for p in index.passages() {
            assert_eq!(p.embedding[0], p.text.len() as f32);
            assert_eq!(p.tokens, tokenize(&p.text));
        }
        assert_eq!(index.passages()[3].source, "b.md");
    }

    #[tokio::test]
    async fn test_build_fails_fast_when_embedder_unreachable() {
        let docs = vec![doc("a.md", "refunds take 5 days")];
        let result = CorpusIndex::build(&docs, &ParagraphChunker::new(), &FailingEmbedding, 2).await;
        let err = result.unwrap_err();
        assert!(err.is_fatal());
        assert!(err.to_string().contains("connection refused"));
    }

    #[tokio::test]
    async fn test_empty_corpus_is_valid() {
        // 빈 코퍼스는 임베더를 호출하지 않음
        let index = CorpusIndex::build(&[], &ParagraphChunker::new(), &FailingEmbedding, 2)
            .await
            .unwrap();
        assert!(index.is_empty());
        assert!(index.lexical_scores(&tokenize("refund")).is_empty());
    }

    #[test]
    fn test_loader_reads_markdown_in_name_order() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("b.md"), "second").unwrap();
        std::fs::write(dir.path().join("a.md"), "first").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();
        std::fs::create_dir(dir.path().join("nested")).unwrap();
        std::fs::write(dir.path().join("nested").join("c.md"), "nested").unwrap();

        let docs = CorpusLoader::default().load(dir.path()).unwrap();
        let texts: Vec<&str> = docs.iter().map(|d| d.text.as_str()).collect();
        assert_eq!(texts, vec!["first", "second"]);
    }

    #[test]
    fn test_loader_missing_dir_is_empty() {
        let dir = TempDir::new().unwrap();
        let docs = CorpusLoader::default()
            .load(&dir.path().join("missing"))
            .unwrap();
        assert!(docs.is_empty());
    }

    #[tokio::test]
    async fn test_build_from_dir() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("faq.md"), "refunds take 5 days\n\nshipping is free").unwrap();

        let index = CorpusIndex::build_from_dir(dir.path(), &CorpusLoader::default(), &SlowEmbedding)
            .await
            .unwrap();
        assert_eq!(index.len(), 2);
        assert_eq!(index.get(0).map(|p| p.source.as_str()), Some("faq.md"));
    }

    #[test]
    fn test_shared_corpus_swap() {
        let shared = SharedCorpus::new(CorpusIndex::empty());
        let before = shared.current();
        assert!(before.is_empty());

        shared.replace(CorpusIndex::from_passages(vec![Passage {
            source: "a.md".into(),
            text: "hello".into(),
            embedding: vec![1.0],
            tokens: tokenize("hello"),
        }]));

        // 기존 스냅샷은 그대로, 새 읽기는 새 인덱스
        assert!(before.is_empty());
        assert_eq!(shared.current().len(), 1);
    }
}

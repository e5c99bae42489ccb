//! 하이브리드 검색 - 코사인 유사도 + BM25 가중 결합
//!
//! 두 점수는 스케일이 달라 각각 최대값으로 정규화한 뒤 선형 결합합니다.
//!
//! `combined = w * semantic_norm + (1 - w) * lexical_norm`
//!
//! 쿼리 임베딩이 실패하면 시맨틱 점수를 전부 0으로 보고 키워드 점수만으로 랭킹합니다.

use std::sync::Arc;

use crate::embedding::EmbeddingProvider;
use crate::error::PipelineError;

use super::corpus::{CorpusIndex, SharedCorpus};
use super::lexical::tokenize;
use super::vector::{cosine_similarity, normalize_by_max};

// ============================================================================
// Types
// ============================================================================

/// 점수가 붙은 검색 결과
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredPassage {
    /// 코퍼스 내 원래 인덱스
    pub index: usize,
    /// 패시지 텍스트
    pub text: String,
    /// 정규화된 시맨틱 점수
    pub semantic: f32,
    /// 정규화된 키워드 점수
    pub lexical: f32,
    /// 결합 점수
    pub combined: f32,
}

/// 검색 결과 (결합 점수 내림차순)
#[derive(Debug, Default)]
pub struct Retrieval {
    pub passages: Vec<ScoredPassage>,
    /// 쿼리 임베딩 실패 시 설정됨
    pub degraded: Option<PipelineError>,
}

impl Retrieval {
    /// 랭킹 순서의 패시지 텍스트
    pub fn texts(&self) -> Vec<&str> {
        self.passages.iter().map(|p| p.text.as_str()).collect()
    }
}

// ============================================================================
// Scoring
// ============================================================================

/// 정규화된 두 점수 배열의 가중 결합
pub fn combine_scores(semantic_norm: &[f32], lexical_norm: &[f32], semantic_weight: f32) -> Vec<f32> {
    semantic_norm
        .iter()
        .zip(lexical_norm.iter())
        .map(|(s, l)| semantic_weight * s + (1.0 - semantic_weight) * l)
        .collect()
}

/// 상위 K개 인덱스 선택
///
/// 안정 정렬이므로 동점이면 원래 인덱스가 작은 쪽이 앞섭니다.
pub fn top_k_indices(combined: &[f32], top_k: usize) -> Vec<usize> {
    let mut order: Vec<usize> = (0..combined.len()).collect();
    order.sort_by(|&a, &b| combined[b].total_cmp(&combined[a]));
    order.truncate(top_k);
    order
}

/// 코퍼스 + 쿼리 임베딩(없으면 키워드 전용)으로 랭킹
pub fn rank(
    corpus: &CorpusIndex,
    query: &str,
    query_embedding: Option<&[f32]>,
    top_k: usize,
    semantic_weight: f32,
) -> Vec<ScoredPassage> {
    let semantic: Vec<f32> = match query_embedding {
        Some(q) => corpus
            .passages()
            .iter()
            .map(|p| cosine_similarity(q, &p.embedding))
            .collect(),
        None => vec![0.0; corpus.len()],
    };
    let lexical = corpus.lexical_scores(&tokenize(query));

    let semantic_norm = normalize_by_max(&semantic);
    let lexical_norm = normalize_by_max(&lexical);
    let combined = combine_scores(&semantic_norm, &lexical_norm, semantic_weight);

    top_k_indices(&combined, top_k)
        .into_iter()
        .filter_map(|i| {
            corpus.get(i).map(|p| ScoredPassage {
                index: i,
                text: p.text.clone(),
                semantic: semantic_norm[i],
                lexical: lexical_norm[i],
                combined: combined[i],
            })
        })
        .collect()
}

// ============================================================================
// HybridRetriever
// ============================================================================

/// 하이브리드 검색기
pub struct HybridRetriever {
    corpus: SharedCorpus,
    embedder: Arc<dyn EmbeddingProvider>,
}

impl HybridRetriever {
    pub fn new(corpus: SharedCorpus, embedder: Arc<dyn EmbeddingProvider>) -> Self {
        Self { corpus, embedder }
    }

    /// 코퍼스 핸들 (재빌드 교체용)
    pub fn corpus(&self) -> &SharedCorpus {
        &self.corpus
    }

    /// 하이브리드 검색
    ///
    /// # Arguments
    /// * `query` - 사용자 메시지
    /// * `top_k` - 최대 결과 수 (코퍼스보다 크면 전체 반환)
    /// * `semantic_weight` - 시맨틱 점수 비중 (0.0 ~ 1.0)
    pub async fn retrieve(&self, query: &str, top_k: usize, semantic_weight: f32) -> Retrieval {
        let corpus = self.corpus.current();

        if corpus.is_empty() {
            return Retrieval::default();
        }

        let (query_embedding, degraded) = match self.embedder.embed(query).await {
            Ok(v) => (Some(v), None),
            Err(e) => {
                let err = PipelineError::RetrievalDegraded(PipelineError::describe(&e));
                tracing::warn!("{}", err);
                (None, Some(err))
            }
        };

        let passages = rank(
            &corpus,
            query,
            query_embedding.as_deref(),
            top_k,
            semantic_weight,
        );

        Retrieval { passages, degraded }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::HashMap;

    use crate::knowledge::corpus::Passage;

    /// 텍스트별로 지정된 벡터를 돌려주는 임베더
    struct TableEmbedding {
        table: HashMap<String, Vec<f32>>,
        fail: bool,
    }

    #[async_trait]
    impl EmbeddingProvider for TableEmbedding {
        async fn embed(&self, text: &str) -> anyhow::Result<Vec<f32>> {
            if self.fail {
                anyhow::bail!("embedding service unavailable");
            }
            Ok(self.table.get(text).cloned().unwrap_or_else(|| vec![1.0, 0.0]))
        }

        fn dimension(&self) -> usize {
            2
        }

        fn name(&self) -> &str {
            "table"
        }
    }

    fn passage(text: &str, embedding: Vec<f32>) -> Passage {
        Passage {
            source: "faq.md".into(),
            text: text.into(),
            embedding,
            tokens: tokenize(text),
        }
    }

    fn refund_corpus(embeddings: [Vec<f32>; 3]) -> CorpusIndex {
        let [e0, e1, e2] = embeddings;
        CorpusIndex::from_passages(vec![
            passage("refunds take 5 days", e0),
            passage("shipping is free", e1),
            passage("refunds require receipt", e2),
        ])
    }

    fn retriever(corpus: CorpusIndex, fail: bool) -> HybridRetriever {
        let embedder = TableEmbedding {
            table: HashMap::new(),
            fail,
        };
        HybridRetriever::new(SharedCorpus::new(corpus), Arc::new(embedder))
    }

    #[test]
    fn test_weight_one_equals_semantic() {
        let sem = [1.0, 0.5, 0.25];
        let lex = [0.0, 1.0, 0.3];
        assert_eq!(combine_scores(&sem, &lex, 1.0), sem.to_vec());
    }

    #[test]
    fn test_weight_zero_equals_lexical() {
        let sem = [1.0, 0.5, -0.25];
        let lex = [0.0, 1.0, 0.3];
        assert_eq!(combine_scores(&sem, &lex, 0.0), lex.to_vec());
    }

    #[test]
    fn test_top_k_sorted_descending() {
        let combined = [0.1, 0.9, 0.5, 0.7];
        assert_eq!(top_k_indices(&combined, 3), vec![1, 3, 2]);
    }

    #[test]
    fn test_top_k_ties_prefer_lower_index() {
        let combined = [0.5, 0.9, 0.5, 0.5];
        assert_eq!(top_k_indices(&combined, 3), vec![1, 0, 2]);
    }

    #[test]
    fn test_top_k_saturation_returns_all_once() {
        let combined = [0.2, 0.8, 0.5];
        let picked = top_k_indices(&combined, 10);
        assert_eq!(picked, vec![1, 2, 0]);
    }

    #[test]
    fn test_top_k_matches_brute_force() {
        let combined = [0.3, 0.3, 0.8, 0.1, 0.8, 0.5, 0.0];
        for k in 0..=combined.len() {
            let picked = top_k_indices(&combined, k);
            assert_eq!(picked.len(), k);
            // 선택되지 않은 항목은 선택된 최저점보다 높을 수 없음
            if let Some(&last) = picked.last() {
                for i in (0..combined.len()).filter(|i| !picked.contains(i)) {
                    assert!(
                        combined[i] < combined[last]
                            || (combined[i] == combined[last] && i > last)
                    );
                }
            }
            for w in picked.windows(2) {
                assert!(combined[w[0]] >= combined[w[1]]);
            }
        }
    }

    #[tokio::test]
    async fn test_refund_query_excludes_shipping() {
        // 시맨틱만 보면 shipping이 가장 높지만 키워드 신호로 제외되어야 함
        let corpus = refund_corpus([vec![0.9, 0.1], vec![1.0, 0.0], vec![0.9, 0.1]]);
        let result = retriever(corpus, false)
            .retrieve("how long for a refund", 2, 0.5)
            .await;

        assert!(result.degraded.is_none());
        let indices: Vec<usize> = result.passages.iter().map(|p| p.index).collect();
        assert_eq!(indices.len(), 2);
        assert!(!indices.contains(&1));
        assert!(result.passages[0].combined >= result.passages[1].combined);
    }

    #[tokio::test]
    async fn test_refund_query_with_uniform_embeddings() {
        let corpus = refund_corpus([vec![1.0, 0.0], vec![1.0, 0.0], vec![1.0, 0.0]]);
        let result = retriever(corpus, false)
            .retrieve("how long for a refund", 2, 0.5)
            .await;
        // 짧은 패시지가 BM25 길이 정규화로 먼저
        assert_eq!(result.texts(), vec!["refunds require receipt", "refunds take 5 days"]);
    }

    #[tokio::test]
    async fn test_embedding_failure_falls_back_to_lexical() {
        let corpus = refund_corpus([vec![0.0, 1.0], vec![1.0, 0.0], vec![0.0, 1.0]]);
        let result = retriever(corpus, true)
            .retrieve("how long for a refund", 3, 0.7)
            .await;

        assert!(matches!(result.degraded, Some(PipelineError::RetrievalDegraded(_))));
        assert_eq!(result.passages.len(), 3);
        assert!(result.passages.iter().all(|p| p.semantic == 0.0));
        assert_eq!(result.passages[2].index, 1);
    }

    #[tokio::test]
    async fn test_empty_corpus_returns_empty() {
        let result = retriever(CorpusIndex::empty(), true)
            .retrieve("anything", 3, 0.5)
            .await;
        assert!(result.passages.is_empty());
        assert!(result.degraded.is_none());
    }

    #[tokio::test]
    async fn test_no_term_overlap_keeps_semantic_ranking() {
        let corpus = refund_corpus([vec![0.2, 1.0], vec![1.0, 0.0], vec![0.0, 1.0]]);
        let result = retriever(corpus, false).retrieve("zzz", 3, 0.5).await;
        // 키워드 점수 전부 0 → 정규화 생략, 시맨틱 순서 유지
        assert!(result.passages.iter().all(|p| p.lexical == 0.0));
        assert_eq!(result.passages[0].index, 1);
        assert_eq!(result.passages[0].semantic, 1.0);
    }
}

//! 키워드 스코어러 - Okapi BM25
//!
//! 코퍼스 전체의 용어 빈도 통계로 패시지를 랭킹합니다.
//! 외부 호출 없이 결정적입니다.
//!
//! ref: Robertson & Zaragoza (2009), "The Probabilistic Relevance Framework: BM25 and Beyond"

use std::collections::{BTreeMap, HashMap};

/// 용어 빈도 포화 파라미터
const K1: f32 = 1.5;
/// 문서 길이 정규화 파라미터
const B: f32 = 0.75;
/// 음수 IDF 대체 비율 (평균 IDF 대비)
const EPSILON: f32 = 0.25;

// ============================================================================
// Tokenizer
// ============================================================================

/// 소문자 + 공백 분리 토크나이저
///
/// 토큰 양끝의 구두점을 제거하고, 단순 복수형(`refunds` → `refund`)을 접습니다.
pub fn tokenize(text: &str) -> Vec<String> {
    text.split_whitespace()
        .map(|raw| {
            raw.trim_matches(|c: char| !c.is_alphanumeric())
                .to_lowercase()
        })
        .filter(|t| !t.is_empty())
        .map(fold_plural)
        .collect()
}

fn fold_plural(token: String) -> String {
    let char_count = token.chars().count();
    if char_count > 3
        && token.ends_with('s')
        && !token.ends_with("ss")
        && !token.ends_with("us")
        && !token.ends_with("is")
    {
        let mut folded = token;
        folded.pop();
        folded
    } else {
        token
    }
}

// ============================================================================
// Bm25Index
// ============================================================================

/// BM25 인덱스
///
/// 패시지별 용어 빈도와 코퍼스 전체 IDF를 보관합니다.
#[derive(Debug, Clone)]
pub struct Bm25Index {
    doc_freqs: Vec<HashMap<String, u32>>,
    doc_lens: Vec<usize>,
    avg_doc_len: f32,
    idf: HashMap<String, f32>,
}

impl Bm25Index {
    /// 토큰화된 패시지 목록으로 인덱스 생성
    pub fn new(corpus: &[Vec<String>]) -> Self {
        let mut doc_freqs = Vec::with_capacity(corpus.len());
        let mut doc_lens = Vec::with_capacity(corpus.len());
        // 용어 → 해당 용어를 포함한 패시지 수
        let mut containing: BTreeMap<String, u32> = BTreeMap::new();

        for tokens in corpus {
            let mut freqs: HashMap<String, u32> = HashMap::new();
            for token in tokens {
                *freqs.entry(token.clone()).or_insert(0) += 1;
            }
            for term in freqs.keys() {
                *containing.entry(term.clone()).or_insert(0) += 1;
            }
            doc_lens.push(tokens.len());
            doc_freqs.push(freqs);
        }

        let total_len: usize = doc_lens.iter().sum();
        let avg_doc_len = if corpus.is_empty() {
            0.0
        } else {
            total_len as f32 / corpus.len() as f32
        };

        let idf = compute_idf(corpus.len(), &containing);

        Self {
            doc_freqs,
            doc_lens,
            avg_doc_len,
            idf,
        }
    }

    /// 패시지 수
    pub fn len(&self) -> usize {
        self.doc_freqs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.doc_freqs.is_empty()
    }

    /// 용어의 IDF (코퍼스에 없으면 0)
    pub fn idf(&self, term: &str) -> f32 {
        self.idf.get(term).copied().unwrap_or(0.0)
    }

    /// 쿼리에 대한 패시지별 점수 (코퍼스 순서)
    pub fn scores(&self, query: &[String]) -> Vec<f32> {
        self.doc_freqs
            .iter()
            .zip(self.doc_lens.iter())
            .map(|(freqs, &len)| {
                let len_norm = if self.avg_doc_len > 0.0 {
                    len as f32 / self.avg_doc_len
                } else {
                    0.0
                };

                query
                    .iter()
                    .map(|term| {
                        let tf = freqs.get(term).copied().unwrap_or(0) as f32;
                        if tf == 0.0 {
                            return 0.0;
                        }
                        self.idf(term) * (tf * (K1 + 1.0)) / (tf + K1 * (1.0 - B + B * len_norm))
                    })
                    .sum()
            })
            .collect()
    }
}

/// IDF 계산 (용어 정렬 순서로 합산해 결정적)
///
/// `ln((N - n + 0.5) / (n + 0.5))`. 절반 이상의 패시지에 등장해 음수가 되는 용어는
/// `epsilon * 평균 IDF`로 대체합니다.
fn compute_idf(n_docs: usize, containing: &BTreeMap<String, u32>) -> HashMap<String, f32> {
    let n = n_docs as f32;
    let mut idf = HashMap::with_capacity(containing.len());
    let mut idf_sum = 0.0f32;
    let mut negative = Vec::new();

    for (term, &freq) in containing {
        let freq = freq as f32;
        let value = ((n - freq + 0.5) / (freq + 0.5)).ln();
        idf_sum += value;
        if value < 0.0 {
            negative.push(term.clone());
        }
        idf.insert(term.clone(), value);
    }

    if !idf.is_empty() {
        let floor = EPSILON * (idf_sum / idf.len() as f32);
        for term in negative {
            idf.insert(term, floor);
        }
    }

    idf
}

// ============================================================================
// Tests
// ============================================================================

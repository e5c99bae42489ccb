//! Text Chunking Module
//!
//! 문서를 빈 줄(이중 줄바꿈) 경계에서 패시지로 분할합니다.

// ============================================================================
// Chunker Trait
// ============================================================================

/// 텍스트 청킹 전략 트레이트
pub trait Chunker: Send + Sync {
    /// 텍스트를 청크로 분할
    fn chunk(&self, text: &str) -> Vec<String>;

    /// 청커 이름
    fn name(&self) -> &'static str;
}

// ============================================================================
// ParagraphChunker
// ============================================================================

/// 문단 청커
///
/// `"\n\n"` 기준으로 분할하고 공백뿐인 청크는 버립니다.
/// 원문 순서를 유지합니다.
#[derive(Debug, Clone, Default)]
pub struct ParagraphChunker;

impl ParagraphChunker {
    pub fn new() -> Self {
        Self
    }
}

impl Chunker for ParagraphChunker {
    fn chunk(&self, text: &str) -> Vec<String> {
        // CRLF 파일도 같은 경계로 취급
        let normalized = text.replace("\r\n", "\n");

        normalized
            .split("\n\n")
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .map(str::to_string)
            .collect()
    }

    fn name(&self) -> &'static str {
        "ParagraphChunker"
    }
}

/// 기본 청커 생성
pub fn default_chunker() -> Box<dyn Chunker> {
    Box::new(ParagraphChunker::new())
}

// ============================================================================
// Tests
// ============================================================================

//! 파이프라인 에러 분류
//!
//! 인덱스 빌드 실패만 프로세스에 치명적이며,
//! 나머지는 교환(exchange) 단위에서 보수적 기본값으로 강등됩니다.

use thiserror::Error;

/// 파이프라인 단계별 실패
#[derive(Debug, Error)]
pub enum PipelineError {
    /// 시작 시 코퍼스 임베딩 실패 (치명적)
    #[error("corpus index build failed: {0}")]
    IndexBuild(String),

    /// 쿼리 임베딩 실패 - 키워드 검색만으로 진행
    #[error("query embedding failed, lexical-only retrieval: {0}")]
    RetrievalDegraded(String),

    /// 응답 생성 실패 - 빈 응답으로 기록, 자동 전송 금지
    #[error("answer generation failed: {0}")]
    Generation(String),

    /// 모더레이션/자기평가 호출 실패 - 기본값 적용
    #[error("safety scoring failed: {0}")]
    SafetyScoring(String),

    /// 신뢰도 숫자를 찾지 못함
    #[error("no confidence value in response: {0:?}")]
    ConfidenceParse(String),
}

impl PipelineError {
    /// 프로세스를 중단해야 하는 에러인지 여부
    pub fn is_fatal(&self) -> bool {
        matches!(self, PipelineError::IndexBuild(_))
    }

    /// anyhow 에러 체인을 한 줄 메시지로 변환
    pub(crate) fn describe(err: &anyhow::Error) -> String {
        format!("{:#}", err)
    }
}

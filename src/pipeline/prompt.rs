//! 프롬프트 조립
//!
//! 검색된 패시지를 랭킹 순서 그대로 컨텍스트 블록에 넣습니다.

use crate::llm::ChatPrompt;

/// 응답 생성 프롬프트 머리말
const ASSISTANT_PREAMBLE: &str = "You are the brand assistant. Answer the user using only the context below. \
If the context does not contain the answer, say so briefly.";

/// 자기평가 시스템 메시지
const RATING_SYSTEM: &str =
    "You must respond with ONLY a number between 0 and 1. No text before or after the number.";

/// 검색 결과 + 사용자 메시지 → 응답 생성 프롬프트
pub fn build_prompt(passages: &[&str], query: &str) -> ChatPrompt {
    let context = passages.join("\n");

    ChatPrompt::system(format!(
        "{ASSISTANT_PREAMBLE}\n\
         ### Context ###\n\
         {context}\n\
         ### User ###\n\
         {query}\n\
         ### Reply ###\n"
    ))
}

/// 생성된 응답 → 신뢰도 자기평가 프롬프트
pub fn build_rating_prompt(answer: &str) -> ChatPrompt {
    ChatPrompt::system(RATING_SYSTEM).with_user(format!(
        "Rate your confidence in this answer on a scale of 0 to 1.\n\
         Answer with ONLY a number between 0 and 1, with no explanation or additional text.\n\n\
         Answer: {answer}"
    ))
}

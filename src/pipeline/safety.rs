//! Safety Scorer - 리스크 + 자기평가 신뢰도
//!
//! - risk: 모더레이션 카테고리 점수의 최대값 (없는 점수는 제외, 전부 없으면 0.0)
//! - confidence: 두 번째 모델 호출의 응답에서 첫 숫자 토큰 (없거나 실패하면 0.5)

use std::sync::{Arc, OnceLock};

use regex::Regex;

use crate::error::PipelineError;
use crate::llm::AnswerGenerator;
use crate::moderation::{ModerationScores, Moderator};

use super::prompt::build_rating_prompt;

/// 모더레이션 실패/점수 없음 시 리스크
pub const DEFAULT_RISK: f32 = 0.0;
/// 신뢰도를 얻지 못했을 때의 값 (불확실)
pub const DEFAULT_CONFIDENCE: f32 = 0.5;

/// 안전 점수
#[derive(Debug, Clone, PartialEq)]
pub struct SafetyScore {
    pub risk: f32,
    pub confidence: f32,
}

/// 점수 + 점수화 과정의 강등 내역
#[derive(Debug)]
pub struct SafetyReport {
    pub score: SafetyScore,
    pub degradations: Vec<PipelineError>,
}

/// 카테고리 점수 중 최대값
pub fn risk_from_scores(scores: &ModerationScores) -> f32 {
    scores
        .values()
        .flatten()
        .copied()
        .filter(|v| !v.is_nan())
        .fold(None, |acc: Option<f32>, v| Some(acc.map_or(v, |a| a.max(v))))
        .unwrap_or(DEFAULT_RISK)
}

fn confidence_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"0\.\d+|1\.0|0|1").unwrap())
}

/// 자유 텍스트에서 첫 신뢰도 숫자 추출
///
/// `0.<digits>`, `1.0`, `0`, `1` 중 처음 나타나는 토큰을 사용합니다.
pub fn parse_confidence(response: &str) -> Option<f32> {
    confidence_pattern()
        .find(response)
        .and_then(|m| m.as_str().parse::<f32>().ok())
}

/// 리스크/신뢰도 산출기
pub struct SafetyScorer {
    moderator: Arc<dyn Moderator>,
    generator: Arc<dyn AnswerGenerator>,
}

impl SafetyScorer {
    pub fn new(moderator: Arc<dyn Moderator>, generator: Arc<dyn AnswerGenerator>) -> Self {
        Self {
            moderator,
            generator,
        }
    }

    /// 응답 텍스트 점수화
    ///
    /// 어떤 호출이 실패해도 에러를 내지 않고 기본값으로 대체합니다.
    pub async fn score(&self, model: &str, answer: &str) -> SafetyReport {
        let mut degradations = Vec::new();

        let risk = match self.moderator.moderate(answer).await {
            Ok(scores) => risk_from_scores(&scores),
            Err(e) => {
                let err = PipelineError::SafetyScoring(format!(
                    "moderation: {}",
                    PipelineError::describe(&e)
                ));
                tracing::warn!("{}", err);
                degradations.push(err);
                DEFAULT_RISK
            }
        };

        let confidence = match self.generator.generate(model, &build_rating_prompt(answer)).await {
            Ok(rating) => match parse_confidence(&rating.text) {
                Some(conf) => conf,
                None => {
                    let err = PipelineError::ConfidenceParse(rating.text);
                    tracing::warn!("{}", err);
                    degradations.push(err);
                    DEFAULT_CONFIDENCE
                }
            },
            Err(e) => {
                let err = PipelineError::SafetyScoring(format!(
                    "self-rating: {}",
                    PipelineError::describe(&e)
                ));
                tracing::warn!("{}", err);
                degradations.push(err);
                DEFAULT_CONFIDENCE
            }
        };

        SafetyReport {
            score: SafetyScore { risk, confidence },
            degradations,
        }
    }
}

//! 모더레이션 모듈
//!
//! 카테고리별 점수를 반환합니다. 점수가 없는 카테고리는 `None`으로 유지되어
//! 리스크 계산에서 0이 아니라 제외로 취급됩니다.

use std::collections::BTreeMap;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::openai::OpenAiClient;

/// 카테고리 → 점수 (없으면 `None`)
pub type ModerationScores = BTreeMap<String, Option<f32>>;

/// 모더레이션 인터페이스
#[async_trait]
pub trait Moderator: Send + Sync {
    async fn moderate(&self, text: &str) -> Result<ModerationScores>;
}

/// OpenAI 호환 `/moderations` 구현체
#[derive(Debug, Clone)]
pub struct OpenAiModeration {
    client: OpenAiClient,
}

#[derive(Debug, Serialize)]
struct ModerationRequest<'a> {
    input: &'a str,
}

#[derive(Debug, Deserialize)]
struct ModerationResponse {
    #[serde(default)]
    results: Vec<ModerationResult>,
}

#[derive(Debug, Deserialize)]
struct ModerationResult {
    #[serde(default)]
    category_scores: BTreeMap<String, Option<f32>>,
}

impl OpenAiModeration {
    pub fn new(client: OpenAiClient) -> Self {
        Self { client }
    }

    pub fn from_env() -> Result<Self> {
        Ok(Self::new(OpenAiClient::from_env()?))
    }
}

#[async_trait]
impl Moderator for OpenAiModeration {
    async fn moderate(&self, text: &str) -> Result<ModerationScores> {
        let response: ModerationResponse = self
            .client
            .post_json("moderations", &ModerationRequest { input: text })
            .await
            .context("Moderation request failed")?;

        // 첫 번째 결과만 사용, 결과가 없으면 빈 맵
        Ok(response
            .results
            .into_iter()
            .next()
            .map(|r| r.category_scores)
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_scores_with_nulls() {
        let body = r#"{"id":"x","results":[{"flagged":false,"category_scores":{"hate":0.01,"violence":null}}]}"#;
        let parsed: ModerationResponse = serde_json::from_str(body).unwrap();
        let scores = &parsed.results[0].category_scores;
        assert_eq!(scores.get("hate"), Some(&Some(0.01)));
        assert_eq!(scores.get("violence"), Some(&None));
    }

    #[test]
    fn test_parse_empty_results() {
        let parsed: ModerationResponse = serde_json::from_str(r#"{"results":[]}"#).unwrap();
        assert!(parsed.results.is_empty());
    }
}

//! OpenAI 호환 HTTP 클라이언트
//!
//! 임베딩/채팅/모더레이션 프로바이더가 공유하는 요청 루프입니다.
//! 429 및 전송 실패 시 지수 백오프로 재시도합니다.

use std::time::Duration;

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// 기본 API 엔드포인트
pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// 429 에러 시 최대 재시도 횟수
const MAX_RETRIES: u32 = 3;
/// 재시도 시 초기 백오프
const INITIAL_BACKOFF: Duration = Duration::from_millis(1000);
/// 요청 타임아웃
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// API 에러 응답
#[derive(Debug, Deserialize)]
struct ApiError {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: String,
    #[serde(default, rename = "type")]
    kind: String,
}

/// OpenAI 호환 API 클라이언트
#[derive(Debug, Clone)]
pub struct OpenAiClient {
    api_key: String,
    base_url: String,
    client: reqwest::Client,
    initial_backoff: Duration,
}

impl OpenAiClient {
    /// API 키와 베이스 URL로 생성
    pub fn new(api_key: String, base_url: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            api_key,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
            initial_backoff: INITIAL_BACKOFF,
        })
    }

    /// 환경변수에서 생성
    ///
    /// `OPENAI_API_KEY` 필수, `OPENAI_BASE_URL` 선택
    pub fn from_env() -> Result<Self> {
        let api_key = get_api_key()?;
        let base_url =
            std::env::var("OPENAI_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.to_string());
        Self::new(api_key, base_url)
    }

    #[cfg(test)]
    fn with_initial_backoff(mut self, backoff: Duration) -> Self {
        self.initial_backoff = backoff;
        self
    }

    /// 엔드포인트 전체 URL
    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    /// JSON POST (재시도 포함)
    pub async fn post_json<Req, Resp>(&self, path: &str, request: &Req) -> Result<Resp>
    where
        Req: Serialize + ?Sized,
        Resp: DeserializeOwned,
    {
        let url = self.url(path);
        let mut last_error: Option<anyhow::Error> = None;

        for attempt in 0..=MAX_RETRIES {
            let backoff = self.initial_backoff * 2u32.pow(attempt);

            let response = match self
                .client
                .post(&url)
                .bearer_auth(&self.api_key)
                .json(request)
                .send()
                .await
            {
                Ok(resp) => resp,
                Err(e) => {
                    last_error = Some(anyhow::anyhow!("Failed to send request to {}: {}", path, e));
                    if attempt < MAX_RETRIES {
                        tracing::warn!(
                            "Request failed, retrying in {:?} (attempt {}/{})",
                            backoff,
                            attempt + 1,
                            MAX_RETRIES
                        );
                        tokio::time::sleep(backoff).await;
                        continue;
                    }
                    break;
                }
            };

            let status = response.status();
            let body = response
                .text()
                .await
                .context("Failed to read response body")?;

            if status.is_success() {
                return serde_json::from_str(&body)
                    .with_context(|| format!("Failed to parse {} response", path));
            }

            if status.as_u16() == 429 {
                tracing::warn!(
                    "Rate limit hit (429), backing off {:?} (attempt {}/{})",
                    backoff,
                    attempt + 1,
                    MAX_RETRIES
                );
                last_error = Some(anyhow::anyhow!("Rate limit exceeded (429)"));

                if attempt < MAX_RETRIES {
                    tokio::time::sleep(backoff).await;
                    continue;
                }
            } else {
                if let Ok(error) = serde_json::from_str::<ApiError>(&body) {
                    anyhow::bail!("API error ({} {}): {}", status, error.error.kind, error.error.message);
                }
                anyhow::bail!("API error ({}): {}", status, body);
            }
        }

        Err(last_error
            .unwrap_or_else(|| anyhow::anyhow!("Request failed after {} retries", MAX_RETRIES)))
    }
}

// ============================================================================
// API Key Management
// ============================================================================

/// API 키 로드 (`OPENAI_API_KEY`)
pub fn get_api_key() -> Result<String> {
    match std::env::var("OPENAI_API_KEY") {
        Ok(key) if !key.is_empty() => Ok(key),
        _ => anyhow::bail!(
            "API key not found. Set OPENAI_API_KEY environment variable.\n\
             Optional: OPENAI_BASE_URL for OpenAI-compatible endpoints."
        ),
    }
}

/// API 키 존재 여부 확인
pub fn has_api_key() -> bool {
    std::env::var("OPENAI_API_KEY")
        .map(|key| !key.is_empty())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_joining() {
        let client = OpenAiClient::new("k".into(), "http://localhost:8080/v1/").unwrap();
        assert_eq!(client.url("/embeddings"), "http://localhost:8080/v1/embeddings");
        assert_eq!(client.url("moderations"), "http://localhost:8080/v1/moderations");
    }

    #[test]
    fn test_api_error_parsing() {
        let body = r#"{"error":{"message":"Invalid key","type":"invalid_request_error"}}"#;
        let parsed: ApiError = serde_json::from_str(body).unwrap();
        assert_eq!(parsed.error.message, "Invalid key");
        assert_eq!(parsed.error.kind, "invalid_request_error");
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_returns_error() {
        // 닫힌 포트 - 재시도 후 실패해야 함
        let client = OpenAiClient::new("k".into(), "http://127.0.0.1:9")
            .unwrap()
            .with_initial_backoff(Duration::ZERO);
        let result: Result<serde_json::Value> =
            client.post_json("embeddings", &serde_json::json!({})).await;
        assert!(result.is_err());
    }
}

//! 응답 생성 모듈 - 단일 턴 채팅 완성
//!
//! 생성 결과는 콘솔 출력이 아니라 구조화된 [`Generation`]으로 반환됩니다.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::openai::OpenAiClient;

// ============================================================================
// Types
// ============================================================================

/// 단일 턴 프롬프트
#[derive(Debug, Clone, PartialEq)]
pub struct ChatPrompt {
    /// 시스템 메시지
    pub system: String,
    /// 사용자 메시지 (선택)
    pub user: Option<String>,
}

impl ChatPrompt {
    /// 시스템 메시지만 있는 프롬프트
    pub fn system(system: impl Into<String>) -> Self {
        Self {
            system: system.into(),
            user: None,
        }
    }

    /// 사용자 메시지 추가
    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }
}

/// 생성 결과
#[derive(Debug, Clone, PartialEq)]
pub struct Generation {
    /// 앞뒤 공백이 제거된 응답 텍스트
    pub text: String,
    /// 응답한 모델 이름
    pub model: String,
}

// ============================================================================
// AnswerGenerator Trait
// ============================================================================

/// 언어 모델 호출 인터페이스
#[async_trait]
pub trait AnswerGenerator: Send + Sync {
    /// 프롬프트로 응답 생성
    async fn generate(&self, model: &str, prompt: &ChatPrompt) -> Result<Generation>;
}

// ============================================================================
// OpenAI Chat
// ============================================================================

/// OpenAI 호환 `/chat/completions` 구현체
#[derive(Debug, Clone)]
pub struct OpenAiChat {
    client: OpenAiClient,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
    #[serde(default)]
    model: String,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

impl OpenAiChat {
    pub fn new(client: OpenAiClient) -> Self {
        Self { client }
    }

    pub fn from_env() -> Result<Self> {
        Ok(Self::new(OpenAiClient::from_env()?))
    }
}

fn build_messages(prompt: &ChatPrompt) -> Vec<ChatMessage<'_>> {
    let mut messages = vec![ChatMessage {
        role: "system",
        content: &prompt.system,
    }];
    if let Some(ref user) = prompt.user {
        messages.push(ChatMessage {
            role: "user",
            content: user,
        });
    }
    messages
}

#[async_trait]
impl AnswerGenerator for OpenAiChat {
    async fn generate(&self, model: &str, prompt: &ChatPrompt) -> Result<Generation> {
        let request = ChatRequest {
            model,
            messages: build_messages(prompt),
        };

        let response: ChatResponse = self
            .client
            .post_json("chat/completions", &request)
            .await
            .context("Chat completion request failed")?;

        let text = response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| anyhow::anyhow!("Chat completion returned no content"))?;

        let model = if response.model.is_empty() {
            model.to_string()
        } else {
            response.model
        };

        Ok(Generation {
            text: text.trim().to_string(),
            model,
        })
    }
}

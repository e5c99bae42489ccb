//! 응답 파이프라인
//!
//! 교환 하나의 단계 순서는 고정입니다:
//! 검색 → 생성 → 모더레이션/자기평가 → 판정 → 기록
//!
//! 교환 단위 실패는 모두 보수적 기본값으로 강등되어 검토 대기열로 향하고,
//! 어떤 경우에도 기록은 남습니다.

mod gate;
mod prompt;
mod safety;

use std::sync::Arc;

use anyhow::{Context, Result};

use crate::config::ConfigStore;
use crate::error::PipelineError;
use crate::exchange::{DeliveryHook, ExchangeLog, ExchangeRecord, NoopDelivery};
use crate::knowledge::{HybridRetriever, ScoredPassage};
use crate::llm::AnswerGenerator;
use crate::moderation::Moderator;

pub use gate::{decide, Decision, ExchangeState, Mode};
pub use prompt::{build_prompt, build_rating_prompt};
pub use safety::{
    parse_confidence, risk_from_scores, SafetyReport, SafetyScore, SafetyScorer, DEFAULT_CONFIDENCE,
    DEFAULT_RISK,
};

// ============================================================================
// Types
// ============================================================================

/// 교환 처리 결과
#[derive(Debug)]
pub struct ExchangeOutcome {
    /// 로그에 기록된 내용
    pub record: ExchangeRecord,
    /// 종료 상태 (Sent | Queued)
    pub state: ExchangeState,
    /// 프롬프트에 사용된 패시지 (랭킹 순)
    pub context: Vec<ScoredPassage>,
    /// 처리 중 강등 내역
    pub degradations: Vec<PipelineError>,
}

impl ExchangeOutcome {
    pub fn is_sent(&self) -> bool {
        self.state == ExchangeState::Sent
    }
}

// ============================================================================
// Pipeline
// ============================================================================

/// 검색 + 생성 + 점수화 + 판정 파이프라인
pub struct Pipeline {
    retriever: HybridRetriever,
    generator: Arc<dyn AnswerGenerator>,
    safety: SafetyScorer,
    config: Arc<dyn ConfigStore>,
    log: Arc<dyn ExchangeLog>,
    delivery: Arc<dyn DeliveryHook>,
}

impl Pipeline {
    pub fn new(
        retriever: HybridRetriever,
        generator: Arc<dyn AnswerGenerator>,
        moderator: Arc<dyn Moderator>,
        config: Arc<dyn ConfigStore>,
        log: Arc<dyn ExchangeLog>,
    ) -> Self {
        let safety = SafetyScorer::new(moderator, Arc::clone(&generator));
        Self {
            retriever,
            generator,
            safety,
            config,
            log,
            delivery: Arc::new(NoopDelivery),
        }
    }

    /// 자동 전송 시 호출할 훅 등록
    pub fn with_delivery(mut self, delivery: Arc<dyn DeliveryHook>) -> Self {
        self.delivery = delivery;
        self
    }

    pub fn retriever(&self) -> &HybridRetriever {
        &self.retriever
    }

    pub fn log(&self) -> &Arc<dyn ExchangeLog> {
        &self.log
    }

    /// 메시지 하나 처리
    ///
    /// 외부 호출 실패는 에러로 전파하지 않습니다.
    /// 에러는 교환 기록 자체를 저장하지 못한 경우에만 반환됩니다.
    pub async fn handle(&self, text: &str) -> Result<ExchangeOutcome> {
        let config = self.config.get_current();
        let mut degradations = Vec::new();

        // 1. 검색
        let retrieval = self
            .retriever
            .retrieve(text, config.top_k_context, config.semantic_weight)
            .await;
        if let Some(err) = retrieval.degraded {
            degradations.push(err);
        }
        let context = retrieval.passages;

        if config.debug_retrieval {
            for p in &context {
                tracing::info!(
                    "Chunk {}: semantic={:.4}, bm25={:.4}, combined={:.4} | {}",
                    p.index,
                    p.semantic,
                    p.lexical,
                    p.combined,
                    p.text.chars().take(100).collect::<String>()
                );
            }
        }

        // 2. 생성
        let texts: Vec<&str> = context.iter().map(|p| p.text.as_str()).collect();
        let prompt = build_prompt(&texts, text);

        let reply = match self.generator.generate(&config.model, &prompt).await {
            Ok(generation) => generation.text,
            Err(e) => {
                let err = PipelineError::Generation(PipelineError::describe(&e));
                tracing::warn!("{}", err);
                degradations.push(err);

                let record = ExchangeRecord::new(text, "", DEFAULT_RISK, DEFAULT_CONFIDENCE, false);
                return self.finish(record, ExchangeState::Queued, context, degradations);
            }
        };

        // 3. 리스크/신뢰도
        let SafetyReport {
            score,
            degradations: safety_degradations,
        } = self.safety.score(&config.model, &reply).await;
        let scoring_failed = safety_degradations
            .iter()
            .any(|e| matches!(e, PipelineError::SafetyScoring(_)));
        degradations.extend(safety_degradations);

        // 4. 판정 - 판정 시점의 최신 설정 사용
        let gate_config = self.config.get_current();
        let decision = decide(
            gate_config.mode,
            score.confidence,
            score.risk,
            gate_config.min_confidence,
            gate_config.max_risk,
        );
        // 점수화 호출 실패나 빈 응답은 자동 전송하지 않음
        let decision = Decision {
            auto_send: decision.auto_send && !scoring_failed && !reply.is_empty(),
        };
        let state = ExchangeState::Generated.apply(decision);

        // 5. 기록
        let record = ExchangeRecord::new(text, reply, score.risk, score.confidence, decision.auto_send);
        self.finish(record, state, context, degradations)
    }

    fn finish(
        &self,
        record: ExchangeRecord,
        state: ExchangeState,
        context: Vec<ScoredPassage>,
        degradations: Vec<PipelineError>,
    ) -> Result<ExchangeOutcome> {
        let record = self
            .log
            .append(record)
            .context("Failed to record exchange")?;

        tracing::info!(
            "[{}] conf={:.2} risk={:.2} context={} degraded={}",
            state,
            record.conf,
            record.risk,
            context.len(),
            degradations.len()
        );

        if state == ExchangeState::Sent {
            self.delivery.notify(&record);
        }

        Ok(ExchangeOutcome {
            record,
            state,
            context,
            degradations,
        })
    }
}

// ============================================================================
// Tests
// ============================================================================

//! Decision Gate - 자동 전송 / 검토 대기 결정
//!
//! `auto_send = mode == active && confidence >= min_confidence && risk <= max_risk`
//!
//! 교환마다 `Generated → {Sent, Queued}` 한 번만 전이하며 자동 재평가는 없습니다.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// 운영 모드
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// 모든 응답을 검토 대기열로
    #[default]
    Passive,
    /// 기준을 만족하는 응답은 자동 전송
    Active,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Passive => write!(f, "passive"),
            Mode::Active => write!(f, "active"),
        }
    }
}

impl FromStr for Mode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "passive" => Ok(Mode::Passive),
            "active" => Ok(Mode::Active),
            other => anyhow::bail!("Unknown mode: {}. Use passive or active.", other),
        }
    }
}

/// 게이트 판정 결과
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    pub auto_send: bool,
}

impl Decision {
    /// 판정에 따른 종료 상태
    pub fn state(&self) -> ExchangeState {
        if self.auto_send {
            ExchangeState::Sent
        } else {
            ExchangeState::Queued
        }
    }
}

/// 교환 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeState {
    /// 응답 생성됨, 판정 전
    Generated,
    /// 자동 전송됨 (종료)
    Sent,
    /// 검토 대기 (종료, 검토자만 처리)
    Queued,
}

impl ExchangeState {
    /// 판정 적용. `Generated`에서만 전이하고 종료 상태는 그대로 유지합니다.
    pub fn apply(self, decision: Decision) -> ExchangeState {
        match self {
            ExchangeState::Generated => decision.state(),
            terminal => terminal,
        }
    }
}

impl fmt::Display for ExchangeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExchangeState::Generated => write!(f, "GENERATED"),
            ExchangeState::Sent => write!(f, "SENT"),
            ExchangeState::Queued => write!(f, "QUEUED"),
        }
    }
}

/// 자동 전송 여부 판정 (순수 함수)
pub fn decide(mode: Mode, confidence: f32, risk: f32, min_confidence: f32, max_risk: f32) -> Decision {
    Decision {
        auto_send: mode == Mode::Active && confidence >= min_confidence && risk <= max_risk,
    }
}

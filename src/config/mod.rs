//! 설정 모듈 - config.yaml + 수정 시간 기반 재로드
//!
//! 파이프라인은 교환마다 [`ConfigStore::get_current`]를 호출해
//! 마지막으로 저장된 설정으로 판정합니다.

use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::SystemTime;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::embedding::DEFAULT_EMBEDDING_MODEL;
use crate::pipeline::Mode;

/// 기본 설정 파일 이름
pub const CONFIG_FILE_NAME: &str = "config.yaml";

// ============================================================================
// Config
// ============================================================================

/// 파이프라인 설정
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// 운영 모드 (passive | active)
    pub mode: Mode,
    /// 자동 전송 최소 신뢰도
    pub min_confidence: f32,
    /// 자동 전송 최대 리스크
    pub max_risk: f32,
    /// 프롬프트에 넣을 패시지 수
    pub top_k_context: usize,
    /// 결합 점수 중 시맨틱 비중
    pub semantic_weight: f32,
    /// 생성 모델 (그대로 전달)
    pub model: String,
    /// 임베딩 모델
    pub embedding_model: String,
    /// 임베딩 차원 (없으면 모델 표 또는 첫 응답 기준)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding_dimension: Option<usize>,
    /// 검색 점수 로그 출력
    pub debug_retrieval: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            mode: Mode::Passive,
            min_confidence: 0.85,
            max_risk: 0.20,
            top_k_context: 3,
            semantic_weight: 0.7,
            model: "gpt-4o-mini".to_string(),
            embedding_model: DEFAULT_EMBEDDING_MODEL.to_string(),
            embedding_dimension: None,
            debug_retrieval: false,
        }
    }
}

impl Config {
    /// 값 범위 검증
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("min_confidence", self.min_confidence),
            ("max_risk", self.max_risk),
            ("semantic_weight", self.semantic_weight),
        ] {
            if !(0.0..=1.0).contains(&value) {
                anyhow::bail!("{} must be within [0, 1], got {}", name, value);
            }
        }

        if self.top_k_context == 0 {
            anyhow::bail!("top_k_context must be a positive integer");
        }

        if self.embedding_dimension == Some(0) {
            anyhow::bail!("embedding_dimension must be a positive integer");
        }

        if self.model.trim().is_empty() {
            anyhow::bail!("model must not be empty");
        }

        Ok(())
    }

    /// YAML 문자열 파싱 + 검증
    pub fn from_yaml(text: &str) -> Result<Self> {
        // 빈 파일은 기본값
        let config: Config = if text.trim().is_empty() {
            Config::default()
        } else {
            serde_yaml::from_str(text).context("Failed to parse config YAML")?
        };
        config.validate()?;
        Ok(config)
    }

    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).context("Failed to serialize config")
    }
}

// ============================================================================
// ConfigStore
// ============================================================================

/// 현재 설정 제공자
pub trait ConfigStore: Send + Sync {
    /// 저장소의 최신 설정
    fn get_current(&self) -> Config;
}

/// 파일 변경 감지 키 (수정 시간 + 크기)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FileStamp {
    modified: Option<SystemTime>,
    len: u64,
}

impl FileStamp {
    fn read(path: &Path) -> Option<Self> {
        let metadata = std::fs::metadata(path).ok()?;
        Some(Self {
            modified: metadata.modified().ok(),
            len: metadata.len(),
        })
    }
}

#[derive(Debug)]
struct Cached {
    stamp: Option<FileStamp>,
    config: Config,
}

/// YAML 파일 기반 설정 저장소
///
/// 호출마다 파일 메타데이터를 확인하고 변경되었을 때만 다시 읽습니다.
/// 파싱/검증에 실패하면 마지막 정상 설정을 유지합니다.
#[derive(Debug)]
pub struct FileConfigStore {
    path: PathBuf,
    cache: Mutex<Cached>,
}

impl FileConfigStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            cache: Mutex::new(Cached {
                stamp: None,
                config: Config::default(),
            }),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 파일이 없으면 기본 설정으로 생성
    pub fn ensure_exists(&self) -> Result<()> {
        if self.path.exists() {
            return Ok(());
        }

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).context("Failed to create config directory")?;
            }
        }

        std::fs::write(&self.path, Config::default().to_yaml()?)
            .with_context(|| format!("Failed to write default config: {:?}", self.path))?;
        tracing::info!("Created default config at {:?}", self.path);
        Ok(())
    }

    /// 설정 수정 후 저장
    pub fn update<F>(&self, mutate: F) -> Result<Config>
    where
        F: FnOnce(&mut Config),
    {
        let mut config = self.get_current();
        mutate(&mut config);
        config.validate()?;

        std::fs::write(&self.path, config.to_yaml()?)
            .with_context(|| format!("Failed to write config: {:?}", self.path))?;

        let mut cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
        cache.stamp = FileStamp::read(&self.path);
        cache.config = config.clone();
        Ok(config)
    }

    fn reload(&self, cache: &mut Cached, stamp: FileStamp) {
        let loaded = std::fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read config: {:?}", self.path))
            .and_then(|text| Config::from_yaml(&text));

        match loaded {
            Ok(config) => {
                if config.mode != cache.config.mode {
                    tracing::info!("Mode changed from {} to {}", cache.config.mode, config.mode);
                }
                cache.config = config;
            }
            Err(e) => {
                tracing::warn!("Keeping previous config: {:#}", e);
            }
        }
        // 잘못된 파일을 매번 다시 파싱하지 않도록 스탬프는 갱신
        cache.stamp = Some(stamp);
    }
}

impl ConfigStore for FileConfigStore {
    fn get_current(&self) -> Config {
        let mut cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());

        match FileStamp::read(&self.path) {
            Some(stamp) if cache.stamp != Some(stamp) => self.reload(&mut cache, stamp),
            Some(_) => {}
            None => {
                if cache.stamp.is_some() {
                    tracing::warn!("Config file {:?} disappeared, keeping previous config", self.path);
                    cache.stamp = None;
                }
            }
        }

        cache.config.clone()
    }
}

/// 메모리 설정 저장소 (테스트/임베딩용)
#[derive(Debug, Default)]
pub struct StaticConfigStore {
    config: Mutex<Config>,
}

impl StaticConfigStore {
    pub fn new(config: Config) -> Self {
        Self {
            config: Mutex::new(config),
        }
    }

    /// 설정 교체
    pub fn set(&self, config: Config) {
        *self.config.lock().unwrap_or_else(|e| e.into_inner()) = config;
    }
}

impl ConfigStore for StaticConfigStore {
    fn get_current(&self) -> Config {
        self.config.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

// ============================================================================
// Tests
// ============================================================================

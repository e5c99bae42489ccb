//! CLI 모듈
//!
//! palank-assist CLI 명령어 정의 및 구현

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use uuid::Uuid;

use crate::config::{ConfigStore, FileConfigStore, CONFIG_FILE_NAME};
use crate::embedding::{EmbeddingProvider, OpenAiEmbedding};
use crate::exchange::{
    get_data_dir, DeliveryHook, ExchangeLog, ExchangeRecord, JsonlExchangeLog, ReviewDesk,
    LOG_FILE_NAME,
};
use crate::knowledge::{default_chunker, CorpusIndex, CorpusLoader, HybridRetriever, SharedCorpus};
use crate::llm::OpenAiChat;
use crate::moderation::OpenAiModeration;
use crate::openai::{has_api_key, OpenAiClient};
use crate::pipeline::{ExchangeOutcome, Mode, Pipeline};

/// 기본 코퍼스 디렉토리
const DEFAULT_CORPUS_DIR: &str = "context";

// ============================================================================
// CLI Definition
// ============================================================================

#[derive(Parser)]
#[command(name = "palank-assist")]
#[command(version, about = "하이브리드 검색 기반 자동 응답 + 검토 게이트", long_about = None)]
pub struct Cli {
    /// 설정 파일 경로
    #[arg(long, global = true, default_value = CONFIG_FILE_NAME)]
    pub config: PathBuf,

    /// 코퍼스 디렉토리 (*.md)
    #[arg(long, global = true, default_value = DEFAULT_CORPUS_DIR)]
    pub corpus: PathBuf,

    /// 교환 로그 경로 (기본: ~/.palank-assist/store.jsonl)
    #[arg(long, global = true)]
    pub log: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// 코퍼스 인덱스 빌드 및 통계
    Index,

    /// 메시지 하나 처리
    Ask {
        /// 사용자 메시지
        text: String,
    },

    /// 대화형 모드 (/reload: 코퍼스 재빌드, /exit: 종료)
    Chat,

    /// 검토 대기 목록
    Queue {
        /// 결과 개수 제한
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },

    /// 대기 중인 교환에 응답 (승인)
    Respond {
        /// 교환 ID
        #[arg(long)]
        id: Uuid,

        /// 수정된 응답 (생략 시 생성된 응답 그대로)
        #[arg(short, long)]
        reply: Option<String>,
    },

    /// 운영 모드 변경 (passive | active)
    Mode {
        /// 새 모드
        mode: String,
    },

    /// 상태 확인
    Status,
}

// ============================================================================
// CLI Runner
// ============================================================================

/// CLI 명령어 실행
pub async fn run(cli: Cli) -> Result<()> {
    let ctx = Workspace::new(&cli)?;

    match cli.command {
        Commands::Index => cmd_index(&ctx).await,
        Commands::Ask { text } => cmd_ask(&ctx, &text).await,
        Commands::Chat => cmd_chat(&ctx).await,
        Commands::Queue { limit } => cmd_queue(&ctx, limit),
        Commands::Respond { id, reply } => cmd_respond(&ctx, id, reply),
        Commands::Mode { mode } => cmd_mode(&ctx, &mode),
        Commands::Status => cmd_status(&ctx),
    }
}

/// 명령어 공통 리소스
struct Workspace {
    config: Arc<FileConfigStore>,
    corpus_dir: PathBuf,
    log_path: PathBuf,
}

impl Workspace {
    fn new(cli: &Cli) -> Result<Self> {
        let config = Arc::new(FileConfigStore::new(&cli.config));
        config.ensure_exists()?;

        let log_path = cli
            .log
            .clone()
            .unwrap_or_else(|| get_data_dir().join(LOG_FILE_NAME));

        Ok(Self {
            config,
            corpus_dir: cli.corpus.clone(),
            log_path,
        })
    }

    fn open_log(&self) -> Result<Arc<JsonlExchangeLog>> {
        let log = JsonlExchangeLog::open(&self.log_path).context("교환 로그 열기 실패")?;
        Ok(Arc::new(log))
    }

    fn client(&self) -> Result<OpenAiClient> {
        require_api_key()?;
        OpenAiClient::from_env()
    }

    fn embedder(&self, client: OpenAiClient) -> Arc<dyn EmbeddingProvider> {
        let config = self.config.get_current();
        let mut embedder = OpenAiEmbedding::new(client, config.embedding_model);
        if let Some(dim) = config.embedding_dimension {
            embedder = embedder.with_dimension(dim);
        }
        Arc::new(embedder)
    }

    /// 코퍼스 빌드 (실패 시 치명적)
    async fn build_corpus(&self, embedder: &dyn EmbeddingProvider) -> Result<CorpusIndex> {
        let index = CorpusIndex::build_from_dir(&self.corpus_dir, &CorpusLoader::default(), embedder)
            .await
            .context("코퍼스 인덱스 빌드 실패")?;
        Ok(index)
    }

    /// 코퍼스 빌드 후 파이프라인 구성
    async fn pipeline(&self) -> Result<Pipeline> {
        let client = self.client()?;
        let embedder = self.embedder(client.clone());

        println!("[*] 코퍼스 인덱스 빌드 중: {}", self.corpus_dir.display());
        let corpus = self.build_corpus(embedder.as_ref()).await?;
        println!("[OK] 패시지 {} 개", corpus.len());

        let retriever = HybridRetriever::new(SharedCorpus::new(corpus), embedder);
        let config: Arc<dyn ConfigStore> = self.config.clone();

        Ok(Pipeline::new(
            retriever,
            Arc::new(OpenAiChat::new(client.clone())),
            Arc::new(OpenAiModeration::new(client)),
            config,
            self.open_log()?,
        )
        .with_delivery(Arc::new(StdoutDelivery)))
    }
}

/// 전송 훅 - 표준 출력
struct StdoutDelivery;

impl DeliveryHook for StdoutDelivery {
    fn notify(&self, record: &ExchangeRecord) {
        println!("[SENT] {}", record.reply);
    }
}

// ============================================================================
// Command Implementations
// ============================================================================

/// 인덱스 명령어 (index)
///
/// 코퍼스를 임베딩하고 패시지 통계를 출력합니다.
async fn cmd_index(ctx: &Workspace) -> Result<()> {
    let embedder = ctx.embedder(ctx.client()?);

    let documents = CorpusLoader::default()
        .load(&ctx.corpus_dir)
        .context("코퍼스 로드 실패")?;

    if documents.is_empty() {
        println!("[!] 코퍼스 파일이 없습니다: {}", ctx.corpus_dir.display());
        return Ok(());
    }

    let total_bytes: usize = documents.iter().map(|d| d.text.len()).sum();
    println!("[*] 코퍼스 파일: {} 개 ({})", documents.len(), format_bytes(total_bytes));
    println!("[*] 임베딩 생성 중 ({})...", embedder.name());

    let index = ctx.build_corpus(embedder.as_ref()).await?;

    println!();
    println!("[OK] 패시지 {} 개 (차원: {})", index.len(), embedder.dimension());

    for doc in &documents {
        let name = doc.source_name();
        let count = index.passages().iter().filter(|p| p.source == name).count();
        println!("     {:<30} {} 패시지", name, count);
    }

    Ok(())
}

/// 질문 명령어 (ask)
async fn cmd_ask(ctx: &Workspace, text: &str) -> Result<()> {
    let pipeline = ctx.pipeline().await?;
    let outcome = pipeline.handle(text).await?;
    print_outcome(&outcome);
    Ok(())
}

/// 대화형 명령어 (chat)
///
/// 한 줄에 메시지 하나씩 처리합니다.
async fn cmd_chat(ctx: &Workspace) -> Result<()> {
    let pipeline = ctx.pipeline().await?;
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    println!("[*] 메시지를 입력하세요 (/reload, /exit)");

    loop {
        print!("> ");
        std::io::stdout().flush().ok();

        let Some(line) = lines.next_line().await.context("입력 읽기 실패")? else {
            break;
        };
        let line = line.trim();

        match line {
            "" => continue,
            "/exit" | "/quit" => break,
            "/reload" => {
                // 교체 중에도 진행 중인 검색은 이전 스냅샷을 사용
                let embedder = ctx.embedder(ctx.client()?);
                match ctx.build_corpus(embedder.as_ref()).await {
                    Ok(index) => {
                        println!("[OK] 코퍼스 재빌드: 패시지 {} 개", index.len());
                        pipeline.retriever().corpus().replace(index);
                    }
                    Err(e) => println!("[!] 재빌드 실패 (이전 코퍼스 유지): {:#}", e),
                }
            }
            text => match pipeline.handle(text).await {
                Ok(outcome) => print_outcome(&outcome),
                Err(e) => println!("[!] {:#}", e),
            },
        }
    }

    Ok(())
}

/// 검토 대기 명령어 (queue)
fn cmd_queue(ctx: &Workspace, limit: usize) -> Result<()> {
    let log = ctx.open_log()?;
    let pending = log.pending().context("대기 목록 조회 실패")?;

    if pending.is_empty() {
        println!("[OK] 검토 대기 중인 교환이 없습니다.");
        return Ok(());
    }

    println!("[OK] 검토 대기 ({} 건):\n", pending.len());

    for record in pending.iter().take(limit) {
        println!("  {}", record.id);
        println!("        사용자: {}", truncate_text(&record.user, 80));
        if record.reply.is_empty() {
            println!("        응답: (생성 실패)");
        } else {
            println!("        응답: {}", truncate_text(&record.reply, 120));
        }
        println!(
            "        {} | conf={:.2} risk={:.2}",
            format_ts(record.ts),
            record.conf,
            record.risk
        );
        println!();
    }

    Ok(())
}

/// 응답 명령어 (respond)
fn cmd_respond(ctx: &Workspace, id: Uuid, reply: Option<String>) -> Result<()> {
    let log: Arc<dyn ExchangeLog> = ctx.open_log()?;
    let desk = ReviewDesk::new(log, Arc::new(StdoutDelivery));

    if let Some(ref text) = reply {
        if text.trim().is_empty() {
            bail!("응답이 비어 있습니다");
        }
    }

    let record = desk.approve(id, reply).context("응답 처리 실패")?;
    println!("[OK] 교환 {} 응답 완료", record.id);
    Ok(())
}

/// 모드 명령어 (mode)
fn cmd_mode(ctx: &Workspace, mode: &str) -> Result<()> {
    let mode: Mode = mode.parse()?;
    let config = ctx.config.update(|c| c.mode = mode)?;

    println!("[OK] 모드: {}", config.mode);
    if config.mode == Mode::Active {
        println!(
            "     자동 전송 기준: conf >= {:.2}, risk <= {:.2}",
            config.min_confidence, config.max_risk
        );
    }
    Ok(())
}

/// 상태 명령어 (status)
fn cmd_status(ctx: &Workspace) -> Result<()> {
    println!("palank-assist v{}", env!("CARGO_PKG_VERSION"));
    println!();

    // 설정
    let config = ctx.config.get_current();
    println!("[*] 설정 파일: {}", ctx.config.path().display());
    println!("    모드: {}", config.mode);
    println!(
        "    기준: conf >= {:.2}, risk <= {:.2}",
        config.min_confidence, config.max_risk
    );
    println!(
        "    검색: top_k={}, semantic_weight={:.2}",
        config.top_k_context, config.semantic_weight
    );
    println!("    모델: {} / {}", config.model, config.embedding_model);

    // API 키 상태
    if has_api_key() {
        println!("[OK] API 키: 설정됨");
    } else {
        println!("[!] API 키: 미설정");
        println!("    설정: export OPENAI_API_KEY=your-key");
    }

    // 코퍼스 (임베딩 없이 패시지 수만)
    match CorpusLoader::default().load(&ctx.corpus_dir) {
        Ok(documents) => {
            let chunker = default_chunker();
            let passages: usize = documents.iter().map(|d| chunker.chunk(&d.text).len()).sum();
            println!(
                "[OK] 코퍼스: {} 파일, {} 패시지 ({})",
                documents.len(),
                passages,
                ctx.corpus_dir.display()
            );
        }
        Err(e) => println!("[!] 코퍼스 로드 실패: {:#}", e),
    }

    // 교환 로그
    println!("[*] 교환 로그: {}", ctx.log_path.display());
    match ctx.open_log() {
        Ok(log) => match (log.pending(), log.sent()) {
            (Ok(pending), Ok(sent)) => {
                println!("[OK] 검토 대기: {} 건, 전송: {} 건", pending.len(), sent.len());
                println!("     크기: {}", format_bytes(file_size(log.path())));
            }
            (Err(e), _) | (_, Err(e)) => println!("[!] 로그 조회 실패: {:#}", e),
        },
        Err(e) => println!("[!] {:#}", e),
    }

    Ok(())
}

// ============================================================================
// Helper Functions
// ============================================================================

fn require_api_key() -> Result<()> {
    if !has_api_key() {
        bail!(
            "API 키가 설정되지 않았습니다.\n\n\
             설정 방법:\n  \
             export OPENAI_API_KEY=your-api-key\n\n\
             OpenAI 호환 엔드포인트: export OPENAI_BASE_URL=https://..."
        );
    }
    Ok(())
}

fn print_outcome(outcome: &ExchangeOutcome) {
    for err in &outcome.degradations {
        println!("[!] {}", err);
    }

    if !outcome.context.is_empty() {
        println!("[*] 컨텍스트 {} 개:", outcome.context.len());
        for p in &outcome.context {
            println!("    [{:.3}] {}", p.combined, truncate_text(&p.text, 80));
        }
    }

    let record = &outcome.record;
    println!(
        "[{}] conf={:.2} risk={:.2} id={}",
        outcome.state, record.conf, record.risk, record.id
    );
    if !outcome.is_sent() {
        println!("     응답 초안: {}", truncate_text(&record.reply, 200));
    }
}

fn file_size(path: &Path) -> usize {
    std::fs::metadata(path).map(|m| m.len() as usize).unwrap_or(0)
}

/// epoch 초 → 로컬 시각 문자열
fn format_ts(ts: f64) -> String {
    chrono::DateTime::from_timestamp_micros((ts * 1_000_000.0) as i64)
        .map(|dt| dt.with_timezone(&chrono::Local).format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| "-".to_string())
}

/// 텍스트 자르기 (UTF-8 안전)
fn truncate_text(text: &str, max_chars: usize) -> String {
    let cleaned = text.replace('\n', " ").replace('\r', "");
    let cleaned = cleaned.trim();

    if cleaned.chars().count() <= max_chars {
        cleaned.to_string()
    } else {
        let truncated: String = cleaned.chars().take(max_chars).collect();
        format!("{}...", truncated)
    }
}

/// 바이트 크기 포맷팅
fn format_bytes(bytes: usize) -> String {
    const KB: usize = 1024;
    const MB: usize = KB * 1024;

    if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

// ============================================================================
// Tests
// ============================================================================

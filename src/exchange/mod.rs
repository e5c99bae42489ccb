//! Exchange Log - 교환 기록 (append-only JSONL)
//!
//! 처리된 모든 메시지는 성공/실패와 무관하게 정확히 한 번 기록됩니다.
//! 기록 이후 변경은 검토자의 응답 처리(`mark_responded`)뿐이며,
//! 이 역시 기존 줄을 고치지 않고 응답 이벤트 줄을 추가합니다.
//!
//! 저장 위치: ~/.palank-assist/store.jsonl

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 기본 로그 파일 이름
pub const LOG_FILE_NAME: &str = "store.jsonl";

/// 같은 시각 기록 간 최소 간격 (초)
const TS_EPSILON: f64 = 1e-6;

// ============================================================================
// Data Directory
// ============================================================================

/// 데이터 디렉토리 경로 (~/.palank-assist/)
pub fn get_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".palank-assist")
}

// ============================================================================
// Types
// ============================================================================

/// 교환 기록
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExchangeRecord {
    /// 검토자 응답용 식별자 (없는 줄은 읽을 때 ts + user로 생성)
    #[serde(default)]
    pub id: Uuid,
    /// 기록 시각 (epoch 초)
    pub ts: f64,
    /// 사용자 메시지
    pub user: String,
    /// 생성된 응답 (실패 시 빈 문자열)
    pub reply: String,
    /// 리스크 (0 ~ 1)
    pub risk: f32,
    /// 신뢰도 (0 ~ 1)
    pub conf: f32,
    /// 자동 전송 여부
    pub active: bool,
    /// 검토자가 응답 처리함
    #[serde(default)]
    pub responded: bool,
}

impl ExchangeRecord {
    /// 현재 시각으로 새 기록 생성
    pub fn new(user: impl Into<String>, reply: impl Into<String>, risk: f32, conf: f32, active: bool) -> Self {
        Self {
            id: Uuid::new_v4(),
            ts: now_epoch_secs(),
            user: user.into(),
            reply: reply.into(),
            risk,
            conf,
            active,
            responded: false,
        }
    }

    /// 검토 대기 중인지 여부
    pub fn is_pending(&self) -> bool {
        !self.active && !self.responded
    }
}

/// 현재 시각 (epoch 초, 소수)
pub fn now_epoch_secs() -> f64 {
    chrono::Utc::now().timestamp_micros() as f64 / 1_000_000.0
}

// ============================================================================
// DeliveryHook
// ============================================================================

/// 전송 어댑터 구독 인터페이스
///
/// 자동 전송된 기록, 검토자가 승인한 기록이 전달됩니다.
pub trait DeliveryHook: Send + Sync {
    fn notify(&self, record: &ExchangeRecord);
}

/// 아무것도 하지 않는 훅
#[derive(Debug, Default)]
pub struct NoopDelivery;

impl DeliveryHook for NoopDelivery {
    fn notify(&self, _record: &ExchangeRecord) {}
}

// ============================================================================
// ExchangeLog
// ============================================================================

/// 교환 기록 저장소
pub trait ExchangeLog: Send + Sync {
    /// 기록 추가. 타임스탬프가 단조 증가하도록 조정된 기록을 반환합니다.
    fn append(&self, record: ExchangeRecord) -> Result<ExchangeRecord>;

    /// 전체 기록 (ts 오름차순)
    fn records(&self) -> Result<Vec<ExchangeRecord>>;

    /// 검토자 응답 처리 (수정된 응답 가능)
    ///
    /// 없는 id는 `None`, 대기 중이 아닌 기록(자동 전송/응답 완료)은 에러입니다.
    fn mark_responded(&self, id: Uuid, reply: Option<String>) -> Result<Option<ExchangeRecord>>;

    /// 검토 대기 기록 (최신순)
    fn pending(&self) -> Result<Vec<ExchangeRecord>> {
        let mut records: Vec<_> = self.records()?.into_iter().filter(|r| r.is_pending()).collect();
        records.reverse();
        Ok(records)
    }

    /// 전송된 기록 - 자동 전송 + 검토 응답 (최신순)
    fn sent(&self) -> Result<Vec<ExchangeRecord>> {
        let mut records: Vec<_> = self.records()?.into_iter().filter(|r| !r.is_pending()).collect();
        records.reverse();
        Ok(records)
    }
}

/// 검토자 응답 이벤트
///
/// 기록 줄을 고쳐 쓰지 않고 로그 끝에 추가되며, 읽을 때 대상 기록에 반영됩니다.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct ResponseEvent {
    responded_to: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    reply: Option<String>,
    ts: f64,
}

/// 로그 한 줄
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum LogLine {
    Response(ResponseEvent),
    Record(ExchangeRecord),
}

/// `id` 없이 기록된 줄의 식별자 (ts + user 기반이라 읽을 때마다 같음)
fn legacy_id(record: &ExchangeRecord) -> Uuid {
    let mut name = record.ts.to_bits().to_be_bytes().to_vec();
    name.extend_from_slice(record.user.as_bytes());
    Uuid::new_v5(&Uuid::NAMESPACE_OID, &name)
}

/// JSONL 파일 기반 교환 로그
///
/// 모든 쓰기는 한 줄 추가뿐이라 다른 프로세스(예: `chat`과 `respond`)가
/// 같은 파일에 동시에 써도 기록이 사라지지 않습니다.
#[derive(Debug)]
pub struct JsonlExchangeLog {
    path: PathBuf,
    /// 마지막 기록 시각 (쓰기 직렬화 겸용)
    last_ts: Mutex<f64>,
}

impl JsonlExchangeLog {
    /// 로그 열기 (없으면 생성)
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).context("Failed to create log directory")?;
            }
        }

        let (existing, _) = read_entries(path)?;
        let last_ts = existing.iter().map(|r| r.ts).fold(0.0, f64::max);

        tracing::debug!("Exchange log opened at {:?} ({} records)", path, existing.len());

        Ok(Self {
            path: path.to_path_buf(),
            last_ts: Mutex::new(last_ts),
        })
    }

    /// 기본 위치에서 열기 (~/.palank-assist/store.jsonl)
    pub fn open_default() -> Result<Self> {
        Self::open(&get_data_dir().join(LOG_FILE_NAME))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 한 줄 추가 (단일 write 호출)
    fn write_line(&self, line: &str) -> Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("Failed to open exchange log: {:?}", self.path))?;
        file.write_all(format!("{}\n", line).as_bytes())
            .context("Failed to append to exchange log")
    }
}

impl ExchangeLog for JsonlExchangeLog {
    fn append(&self, mut record: ExchangeRecord) -> Result<ExchangeRecord> {
        let mut last_ts = self.last_ts.lock().unwrap_or_else(|e| e.into_inner());

        if record.ts <= *last_ts {
            record.ts = *last_ts + TS_EPSILON;
        }

        let line = serde_json::to_string(&record).context("Failed to serialize exchange record")?;
        self.write_line(&line)?;

        *last_ts = record.ts;
        Ok(record)
    }

    fn records(&self) -> Result<Vec<ExchangeRecord>> {
        let (records, events) = read_entries(&self.path)?;
        let mut records = apply_responses(records, &events);
        // 파일 순서가 아닌 ts 기준
        records.sort_by(|a, b| a.ts.total_cmp(&b.ts));
        Ok(records)
    }

    fn mark_responded(&self, id: Uuid, reply: Option<String>) -> Result<Option<ExchangeRecord>> {
        let _guard = self.last_ts.lock().unwrap_or_else(|e| e.into_inner());

        let Some(mut target) = self.records()?.into_iter().find(|r| r.id == id) else {
            return Ok(None);
        };

        if !target.is_pending() {
            anyhow::bail!(
                "Exchange {} is not pending (auto-sent or already responded)",
                id
            );
        }

        let event = ResponseEvent {
            responded_to: id,
            reply,
            ts: now_epoch_secs(),
        };
        let line = serde_json::to_string(&event).context("Failed to serialize response")?;
        self.write_line(&line)?;

        // 다른 프로세스가 먼저 응답했다면 그쪽이 유효
        let (_, events) = read_entries(&self.path)?;
        if events.iter().find(|e| e.responded_to == id) != Some(&event) {
            anyhow::bail!("Exchange {} was responded to concurrently", id);
        }

        target.responded = true;
        if let Some(reply) = event.reply {
            target.reply = reply;
        }

        tracing::info!("Marked exchange {} as responded", id);
        Ok(Some(target))
    }
}

/// 파일의 기록/응답 이벤트 읽기 (깨진 줄은 건너뛰되 파일에는 남음)
fn read_entries(path: &Path) -> Result<(Vec<ExchangeRecord>, Vec<ResponseEvent>)> {
    if !path.exists() {
        return Ok((Vec::new(), Vec::new()));
    }

    let file = File::open(path).with_context(|| format!("Failed to open exchange log: {:?}", path))?;
    let mut records = Vec::new();
    let mut events = Vec::new();

    for (line_no, line) in BufReader::new(file).lines().enumerate() {
        let line = line.context("Failed to read exchange log")?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<LogLine>(&line) {
            Ok(LogLine::Record(mut record)) => {
                if record.id.is_nil() {
                    record.id = legacy_id(&record);
                }
                records.push(record);
            }
            Ok(LogLine::Response(event)) => events.push(event),
            Err(e) => tracing::warn!("Skipping malformed log line {}: {}", line_no + 1, e),
        }
    }

    Ok((records, events))
}

/// 응답 이벤트 반영. 기록마다 첫 응답만 유효합니다.
fn apply_responses(mut records: Vec<ExchangeRecord>, events: &[ResponseEvent]) -> Vec<ExchangeRecord> {
    let index: HashMap<Uuid, usize> = records.iter().enumerate().map(|(i, r)| (r.id, i)).collect();

    for event in events {
        let Some(&i) = index.get(&event.responded_to) else {
            tracing::warn!("Response to unknown exchange {}", event.responded_to);
            continue;
        };
        let record = &mut records[i];
        if !record.is_pending() {
            continue;
        }
        record.responded = true;
        if let Some(ref reply) = event.reply {
            record.reply = reply.clone();
        }
    }

    records
}

// ============================================================================
// ReviewDesk
// ============================================================================

/// 검토자 쓰기 경로
///
/// 대기 기록을 응답 처리하고 전송 훅에 알립니다.
pub struct ReviewDesk {
    log: Arc<dyn ExchangeLog>,
    hook: Arc<dyn DeliveryHook>,
}

impl ReviewDesk {
    pub fn new(log: Arc<dyn ExchangeLog>, hook: Arc<dyn DeliveryHook>) -> Self {
        Self { log, hook }
    }

    /// 검토 대기 목록
    pub fn pending(&self) -> Result<Vec<ExchangeRecord>> {
        self.log.pending()
    }

    /// 승인 후 전송 (수정된 응답 가능)
    pub fn approve(&self, id: Uuid, edited_reply: Option<String>) -> Result<ExchangeRecord> {
        let record = self
            .log
            .mark_responded(id, edited_reply)?
            .ok_or_else(|| anyhow::anyhow!("Exchange {} not found", id))?;

        self.hook.notify(&record);
        Ok(record)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn create_test_log() -> (TempDir, JsonlExchangeLog) {
        let dir = TempDir::new().unwrap();
        let log = JsonlExchangeLog::open(&dir.path().join(LOG_FILE_NAME)).unwrap();
        (dir, log)
    }

    #[derive(Default)]
    struct RecordingHook(Mutex<Vec<ExchangeRecord>>);

    impl DeliveryHook for RecordingHook {
        fn notify(&self, record: &ExchangeRecord) {
            self.0.lock().unwrap().push(record.clone());
        }
    }

    #[test]
    fn test_append_and_read() {
        let (_dir, log) = create_test_log();
        log.append(ExchangeRecord::new("hi", "hello", 0.1, 0.9, true)).unwrap();

        let records = log.records().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].user, "hi");
        assert!(records[0].active);
    }

    #[test]
    fn test_persisted_field_names() {
        let (_dir, log) = create_test_log();
        log.append(ExchangeRecord::new("u", "r", 0.0, 0.5, false)).unwrap();

        let raw = std::fs::read_to_string(log.path()).unwrap();
        let value: serde_json::Value = serde_json::from_str(raw.trim()).unwrap();
        for key in ["ts", "user", "reply", "risk", "conf", "active"] {
            assert!(value.get(key).is_some(), "missing {}", key);
        }
        assert!(value["ts"].is_f64());
    }

    #[test]
    fn test_timestamps_monotonic() {
        let (_dir, log) = create_test_log();
        let mut a = ExchangeRecord::new("a", "", 0.0, 0.5, false);
        let mut b = ExchangeRecord::new("b", "", 0.0, 0.5, false);
        a.ts = 100.0;
        b.ts = 50.0; // 시계가 뒤로 간 경우

        let a = log.append(a).unwrap();
        let b = log.append(b).unwrap();
        assert!(b.ts > a.ts);
    }

    #[test]
    fn test_reopen_continues_monotonic() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(LOG_FILE_NAME);

        let mut first = ExchangeRecord::new("a", "", 0.0, 0.5, false);
        first.ts = 4_000_000_000.0;
        JsonlExchangeLog::open(&path).unwrap().append(first).unwrap();

        let log = JsonlExchangeLog::open(&path).unwrap();
        let second = log.append(ExchangeRecord::new("b", "", 0.0, 0.5, false)).unwrap();
        assert!(second.ts > 4_000_000_000.0);
    }

    #[test]
    fn test_records_sorted_by_ts_not_file_order() {
        let (_dir, log) = create_test_log();
        let mut late = ExchangeRecord::new("late", "", 0.0, 0.5, false);
        late.ts = 20.0;
        let mut early = ExchangeRecord::new("early", "", 0.0, 0.5, false);
        early.ts = 10.0;

        // 동시 작성자를 흉내내 파일에 직접 역순 기록
        let lines = format!(
            "{}\n{}\n",
            serde_json::to_string(&late).unwrap(),
            serde_json::to_string(&early).unwrap()
        );
        std::fs::write(log.path(), lines).unwrap();

        let users: Vec<String> = log.records().unwrap().into_iter().map(|r| r.user).collect();
        assert_eq!(users, vec!["early", "late"]);
    }

    const LEGACY_LINE: &str =
        "{\"ts\":1.5,\"user\":\"u\",\"reply\":\"r\",\"risk\":0.0,\"conf\":0.5,\"active\":false}";

    #[test]
    fn test_legacy_lines_without_id() {
        let (_dir, log) = create_test_log();
        std::fs::write(log.path(), format!("{}\nnot json\n", LEGACY_LINE)).unwrap();

        let records = log.records().unwrap();
        assert_eq!(records.len(), 1);
        assert!(!records[0].responded);
        assert!(!records[0].id.is_nil());
    }

    #[test]
    fn test_legacy_record_id_is_stable_and_respondable() {
        let (_dir, log) = create_test_log();
        std::fs::write(log.path(), format!("{}\n", LEGACY_LINE)).unwrap();

        let first = log.pending().unwrap()[0].id;
        let second = log.pending().unwrap()[0].id;
        assert_eq!(first, second);

        let responded = log.mark_responded(first, None).unwrap();
        assert!(responded.is_some());
        assert!(log.pending().unwrap().is_empty());
    }

    #[test]
    fn test_responding_keeps_malformed_lines() {
        let (_dir, log) = create_test_log();
        let queued = log.append(ExchangeRecord::new("q", "draft", 0.0, 0.3, false)).unwrap();
        let mut raw = std::fs::read_to_string(log.path()).unwrap();
        raw.push_str("{broken\n");
        std::fs::write(log.path(), &raw).unwrap();

        log.mark_responded(queued.id, Some("final".into())).unwrap();

        let after = std::fs::read_to_string(log.path()).unwrap();
        assert!(after.starts_with(&raw));
        assert_eq!(log.records().unwrap()[0].reply, "final");
    }

    #[test]
    fn test_response_does_not_drop_other_writers_records() {
        // 같은 파일을 연 두 핸들 (chat 프로세스와 respond 프로세스)
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(LOG_FILE_NAME);
        let chat = JsonlExchangeLog::open(&path).unwrap();
        let reviewer = JsonlExchangeLog::open(&path).unwrap();

        let first = chat.append(ExchangeRecord::new("q1", "r1", 0.0, 0.3, false)).unwrap();
        let pending = reviewer.pending().unwrap();
        chat.append(ExchangeRecord::new("q2", "r2", 0.0, 0.3, false)).unwrap();
        reviewer.mark_responded(pending[0].id, None).unwrap();
        chat.append(ExchangeRecord::new("q3", "r3", 0.0, 0.3, false)).unwrap();

        let records = chat.records().unwrap();
        let users: Vec<&str> = records.iter().map(|r| r.user.as_str()).collect();
        assert_eq!(users, vec!["q1", "q2", "q3"]);
        assert!(records.iter().find(|r| r.id == first.id).unwrap().responded);
        assert_eq!(chat.pending().unwrap().len(), 2);
    }

    #[test]
    fn test_pending_and_sent_views() {
        let (_dir, log) = create_test_log();
        log.append(ExchangeRecord::new("q1", "r1", 0.0, 0.9, true)).unwrap();
        log.append(ExchangeRecord::new("q2", "r2", 0.5, 0.3, false)).unwrap();
        log.append(ExchangeRecord::new("q3", "r3", 0.5, 0.3, false)).unwrap();

        let pending: Vec<String> = log.pending().unwrap().into_iter().map(|r| r.user).collect();
        assert_eq!(pending, vec!["q3", "q2"]);
        assert_eq!(log.sent().unwrap().len(), 1);
    }

    #[test]
    fn test_review_desk_approve_with_edit() {
        let (_dir, log) = create_test_log();
        let queued = log.append(ExchangeRecord::new("q", "draft", 0.5, 0.3, false)).unwrap();

        let hook = Arc::new(RecordingHook::default());
        let desk = ReviewDesk::new(Arc::new(log), hook.clone());

        let sent = desk.approve(queued.id, Some("edited".to_string())).unwrap();
        assert!(sent.responded);
        assert_eq!(sent.reply, "edited");
        assert!(!sent.active);
        assert!(desk.pending().unwrap().is_empty());

        let notified = hook.0.lock().unwrap();
        assert_eq!(notified.len(), 1);
        assert_eq!(notified[0].id, queued.id);
    }

    #[test]
    fn test_review_desk_rejects_auto_sent_record() {
        let (_dir, log) = create_test_log();
        let sent = log.append(ExchangeRecord::new("q", "auto", 0.0, 0.95, true)).unwrap();

        let hook = Arc::new(RecordingHook::default());
        let desk = ReviewDesk::new(Arc::new(log), hook.clone());

        assert!(desk.approve(sent.id, Some("edited".to_string())).is_err());
        assert!(hook.0.lock().unwrap().is_empty());

        let records = desk.log.records().unwrap();
        assert_eq!(records[0].reply, "auto");
        assert!(!records[0].responded);
    }

    #[test]
    fn test_review_desk_approves_once() {
        let (_dir, log) = create_test_log();
        let queued = log.append(ExchangeRecord::new("q", "draft", 0.5, 0.3, false)).unwrap();

        let hook = Arc::new(RecordingHook::default());
        let desk = ReviewDesk::new(Arc::new(log), hook.clone());

        desk.approve(queued.id, Some("first".to_string())).unwrap();
        assert!(desk.approve(queued.id, Some("second".to_string())).is_err());

        assert_eq!(hook.0.lock().unwrap().len(), 1);
        assert_eq!(desk.log.records().unwrap()[0].reply, "first");
    }

    #[test]
    fn test_only_first_response_event_applies() {
        let (_dir, log) = create_test_log();
        let queued = log.append(ExchangeRecord::new("q", "draft", 0.5, 0.3, false)).unwrap();

        // 두 검토자가 동시에 쓴 경우
        for reply in ["first", "second"] {
            let event = ResponseEvent {
                responded_to: queued.id,
                reply: Some(reply.to_string()),
                ts: now_epoch_secs(),
            };
            log.write_line(&serde_json::to_string(&event).unwrap()).unwrap();
        }

        assert_eq!(log.records().unwrap()[0].reply, "first");
    }

    #[test]
    fn test_review_desk_unknown_id() {
        let (_dir, log) = create_test_log();
        let desk = ReviewDesk::new(Arc::new(log), Arc::new(NoopDelivery));
        assert!(desk.approve(Uuid::new_v4(), None).is_err());
    }
}

//! 追踪初始化、请求 ID 与进程级计数器。

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;
use tracing_subscriber::{fmt, EnvFilter};

/// 请求级追踪标识。
#[derive(Debug, Clone)]
pub struct RequestIds {
    pub request_id: String,
    pub trace_id: String,
}

/// 计数器快照。
#[derive(Debug, Clone, Copy, Default)]
pub struct MetricsSnapshot {
    pub frames_in: u64,
    pub frames_out: u64,
    pub orphan_responses: u64,
    pub dropped_events: u64,
    pub informs: u64,
    pub sessions_opened: u64,
    pub sessions_closed: u64,
    pub sessions_faulted: u64,
    pub rpc_completed: u64,
    pub rpc_failed: u64,
    pub rpc_timeout: u64,
    pub notify_delivered: u64,
    pub notify_unmatched: u64,
    pub connreq_attempts: u64,
    pub connreq_failures: u64,
    pub store_retries: u64,
    pub store_write_failures: u64,
    pub pushback: u64,
}

/// 进程级计数器。
pub struct TelemetryMetrics {
    frames_in: AtomicU64,
    frames_out: AtomicU64,
    orphan_responses: AtomicU64,
    dropped_events: AtomicU64,
    informs: AtomicU64,
    sessions_opened: AtomicU64,
    sessions_closed: AtomicU64,
    sessions_faulted: AtomicU64,
    rpc_completed: AtomicU64,
    rpc_failed: AtomicU64,
    rpc_timeout: AtomicU64,
    notify_delivered: AtomicU64,
    notify_unmatched: AtomicU64,
    connreq_attempts: AtomicU64,
    connreq_failures: AtomicU64,
    store_retries: AtomicU64,
    store_write_failures: AtomicU64,
    pushback: AtomicU64,
}

impl TelemetryMetrics {
    pub fn new() -> Self {
        Self {
            frames_in: AtomicU64::new(0),
            frames_out: AtomicU64::new(0),
            orphan_responses: AtomicU64::new(0),
            dropped_events: AtomicU64::new(0),
            informs: AtomicU64::new(0),
            sessions_opened: AtomicU64::new(0),
            sessions_closed: AtomicU64::new(0),
            sessions_faulted: AtomicU64::new(0),
            rpc_completed: AtomicU64::new(0),
            rpc_failed: AtomicU64::new(0),
            rpc_timeout: AtomicU64::new(0),
            notify_delivered: AtomicU64::new(0),
            notify_unmatched: AtomicU64::new(0),
            connreq_attempts: AtomicU64::new(0),
            connreq_failures: AtomicU64::new(0),
            store_retries: AtomicU64::new(0),
            store_write_failures: AtomicU64::new(0),
            pushback: AtomicU64::new(0),
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            frames_in: self.frames_in.load(Ordering::Relaxed),
            frames_out: self.frames_out.load(Ordering::Relaxed),
            orphan_responses: self.orphan_responses.load(Ordering::Relaxed),
            dropped_events: self.dropped_events.load(Ordering::Relaxed),
            informs: self.informs.load(Ordering::Relaxed),
            sessions_opened: self.sessions_opened.load(Ordering::Relaxed),
            sessions_closed: self.sessions_closed.load(Ordering::Relaxed),
            sessions_faulted: self.sessions_faulted.load(Ordering::Relaxed),
            rpc_completed: self.rpc_completed.load(Ordering::Relaxed),
            rpc_failed: self.rpc_failed.load(Ordering::Relaxed),
            rpc_timeout: self.rpc_timeout.load(Ordering::Relaxed),
            notify_delivered: self.notify_delivered.load(Ordering::Relaxed),
            notify_unmatched: self.notify_unmatched.load(Ordering::Relaxed),
            connreq_attempts: self.connreq_attempts.load(Ordering::Relaxed),
            connreq_failures: self.connreq_failures.load(Ordering::Relaxed),
            store_retries: self.store_retries.load(Ordering::Relaxed),
            store_write_failures: self.store_write_failures.load(Ordering::Relaxed),
            pushback: self.pushback.load(Ordering::Relaxed),
        }
    }
}

static METRICS: OnceLock<TelemetryMetrics> = OnceLock::new();

/// 获取全局计数器实例。
pub fn metrics() -> &'static TelemetryMetrics {
    METRICS.get_or_init(TelemetryMetrics::new)
}

/// 初始化 tracing（默认 info）。
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).try_init();
}

/// 生成新的 request_id 与 trace_id。
pub fn new_request_ids() -> RequestIds {
    RequestIds {
        request_id: uuid::Uuid::new_v4().to_string(),
        trace_id: uuid::Uuid::new_v4().to_string(),
    }
}

/// 记录入站帧。
pub fn record_frame_in() {
    metrics().frames_in.fetch_add(1, Ordering::Relaxed);
}

/// 记录出站帧。
pub fn record_frame_out() {
    metrics().frames_out.fetch_add(1, Ordering::Relaxed);
}

/// 记录无主响应（关联表中无此 msg_id）。
pub fn record_orphan_response() {
    metrics().orphan_responses.fetch_add(1, Ordering::Relaxed);
}

/// 记录入站事件因队列满被丢弃。
pub fn record_dropped_event() {
    metrics().dropped_events.fetch_add(1, Ordering::Relaxed);
}

/// 记录 Inform 处理次数。
pub fn record_inform() {
    metrics().informs.fetch_add(1, Ordering::Relaxed);
}

/// 记录会话打开。
pub fn record_session_opened() {
    metrics().sessions_opened.fetch_add(1, Ordering::Relaxed);
}

/// 记录会话关闭。
pub fn record_session_closed() {
    metrics().sessions_closed.fetch_add(1, Ordering::Relaxed);
}

/// 记录会话故障。
pub fn record_session_faulted() {
    metrics().sessions_faulted.fetch_add(1, Ordering::Relaxed);
}

/// 记录 RPC 正常完成。
pub fn record_rpc_completed() {
    metrics().rpc_completed.fetch_add(1, Ordering::Relaxed);
}

/// 记录 RPC 失败。
pub fn record_rpc_failed() {
    metrics().rpc_failed.fetch_add(1, Ordering::Relaxed);
}

/// 记录 RPC 超时。
pub fn record_rpc_timeout() {
    metrics().rpc_timeout.fetch_add(1, Ordering::Relaxed);
}

/// 记录订阅投递次数。
pub fn record_notify_delivered() {
    metrics().notify_delivered.fetch_add(1, Ordering::Relaxed);
}

/// 记录无订阅命中的 Notify。
pub fn record_notify_unmatched() {
    metrics().notify_unmatched.fetch_add(1, Ordering::Relaxed);
}

/// 记录连接请求发起次数。
pub fn record_connreq_attempt() {
    metrics().connreq_attempts.fetch_add(1, Ordering::Relaxed);
}

/// 记录连接请求失败次数。
pub fn record_connreq_failure() {
    metrics().connreq_failures.fetch_add(1, Ordering::Relaxed);
}

/// 记录存储写入重试。
pub fn record_store_retry() {
    metrics().store_retries.fetch_add(1, Ordering::Relaxed);
}

/// 记录存储写入最终失败。
pub fn record_store_write_failure() {
    metrics().store_write_failures.fetch_add(1, Ordering::Relaxed);
}

/// 记录背压拒绝。
pub fn record_pushback() {
    metrics().pushback.fetch_add(1, Ordering::Relaxed);
}

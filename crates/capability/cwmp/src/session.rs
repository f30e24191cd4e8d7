//! 会话表与设备 RPC 队列。
//!
//! 会话状态机（每会话）：
//!
//! `new` → `authenticated`（合法 Inform）→ `active`（有排队 RPC）
//! → `closing`（队列空）→ `closed`；任何畸形报文进 `faulted`，
//! `faulted` 一律收敛到 `closed`。
//!
//! 会话身份由 HTTP cookie（`CWMPSESSIONID`）承载；设备 RPC 队列
//! 独立于会话存活——会话异常只打掉在途那一条（session_lost），
//! 排队的留给下一个会话继续放送。

use crate::rpc::AcsRpc;
use crate::soap::CpeMessage;
use dashmap::DashMap;
use dms_registry::SessionRef;
use domain::now_epoch_ms;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::{oneshot, Mutex};

/// 会话状态。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    New,
    Authenticated,
    Active,
    Closing,
    Faulted,
    Closed,
}

/// 一条在途 / 排队 RPC 的操作员侧终点。
#[derive(Debug)]
pub enum RpcOutcome {
    Response(CpeMessage),
    Fault { code: u32, text: String },
    SessionLost,
}

/// 排队的服务端 RPC。
pub struct QueuedRpc {
    pub rpc: AcsRpc,
    /// 下发时分配的 cwmp:ID
    pub cwmp_id: String,
    pub waiter: Option<oneshot::Sender<RpcOutcome>>,
}

impl QueuedRpc {
    /// 以给定结局收尾（等待者可能已放弃，发送失败忽略）。
    pub fn finish(mut self, outcome: RpcOutcome) {
        if let Some(waiter) = self.waiter.take() {
            let _ = waiter.send(outcome);
        }
    }
}

/// 一个 CWMP 会话。
pub struct CwmpSession {
    pub session_id: String,
    pub device_id: String,
    pub state: SessionState,
    pub inflight: Option<QueuedRpc>,
    pub last_activity_ms: i64,
    pub session_ref: SessionRef,
}

impl CwmpSession {
    pub fn touch(&mut self) {
        self.last_activity_ms = now_epoch_ms();
    }
}

/// 会话表：按会话 ID 与设备 ID 双向索引。
pub struct SessionTable {
    sessions: DashMap<String, Arc<Mutex<CwmpSession>>>,
    by_device: DashMap<String, String>,
}

impl SessionTable {
    pub fn new() -> Self {
        Self {
            sessions: DashMap::new(),
            by_device: DashMap::new(),
        }
    }

    /// 开新会话（设备之前的会话条目被顶替）。
    pub fn open(
        &self,
        device_id: &str,
        session_ref: SessionRef,
    ) -> (String, Arc<Mutex<CwmpSession>>) {
        let session_id = session_ref.session_id.clone();
        let session = Arc::new(Mutex::new(CwmpSession {
            session_id: session_id.clone(),
            device_id: device_id.to_string(),
            state: SessionState::Authenticated,
            inflight: None,
            last_activity_ms: now_epoch_ms(),
            session_ref,
        }));
        self.sessions.insert(session_id.clone(), Arc::clone(&session));
        self.by_device.insert(device_id.to_string(), session_id.clone());
        (session_id, session)
    }

    pub fn get(&self, session_id: &str) -> Option<Arc<Mutex<CwmpSession>>> {
        self.sessions
            .get(session_id)
            .map(|entry| Arc::clone(entry.value()))
    }

    /// 首个 POST 没带 cookie 时按设备回退查找。
    pub fn get_by_device(&self, device_id: &str) -> Option<Arc<Mutex<CwmpSession>>> {
        let session_id = self.by_device.get(device_id)?.value().clone();
        self.get(&session_id)
    }

    /// 摘除会话条目（device 索引只在仍指向本会话时清除）。
    pub fn remove(&self, session_id: &str, device_id: &str) {
        self.sessions.remove(session_id);
        if let Some(entry) = self.by_device.get(device_id) {
            if entry.value() == session_id {
                drop(entry);
                self.by_device.remove(device_id);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// 找出闲置超时的会话。
    pub fn idle_sessions(&self, timeout_ms: i64) -> Vec<Arc<Mutex<CwmpSession>>> {
        let oldest = now_epoch_ms().saturating_sub(timeout_ms);
        self.sessions
            .iter()
            .filter_map(|entry| {
                let session = Arc::clone(entry.value());
                let is_idle = match session.try_lock() {
                    Ok(guard) => guard.last_activity_ms < oldest,
                    _ => false,
                };
                if is_idle { Some(session) } else { None }
            })
            .collect()
    }
}

impl Default for SessionTable {
    fn default() -> Self {
        Self::new()
    }
}

/// 设备 RPC 队列（FIFO，会话间存续）。
///
/// 推入 / 弹出都要求调用方先持有注册表里的设备互斥锁。
pub struct RpcQueues {
    queues: DashMap<String, VecDeque<QueuedRpc>>,
}

impl RpcQueues {
    pub fn new() -> Self {
        Self {
            queues: DashMap::new(),
        }
    }

    pub fn push(&self, device_id: &str, rpc: QueuedRpc) {
        self.queues
            .entry(device_id.to_string())
            .or_default()
            .push_back(rpc);
    }

    pub fn pop(&self, device_id: &str) -> Option<QueuedRpc> {
        self.queues
            .get_mut(device_id)
            .and_then(|mut entry| entry.value_mut().pop_front())
    }

    pub fn depth(&self, device_id: &str) -> usize {
        self.queues
            .get(device_id)
            .map(|entry| entry.value().len())
            .unwrap_or(0)
    }
}

impl Default for RpcQueues {
    fn default() -> Self {
        Self::new()
    }
}

//! USP 请求引擎。
//!
//! 负责请求/应答关联与入站分发：
//! - 关联表（msg_id → 一次性等待槽）：发送前插入，应答 / 错误 /
//!   超时 / 取消后移除，任何路径都不允许泄漏
//! - 入站分发任务逐帧解码：命中关联表的交给等待者；无主应答丢弃
//!   并计数；Notify 走订阅路由
//! - 变更类请求（Set/Add/Delete/Operate）持设备互斥锁串行，
//!   读取类并发放行

use crate::error::UspError;
use crate::record::{
    Msg, MsgBody, Notify, NotifyEvent, Record, RequestBody, ResponseBody,
};
use crate::subscriptions::{event_types, SubscriptionRouter};
use dashmap::DashMap;
use dms_pipeline::PersistSink;
use dms_registry::{DeviceDescriptor, DeviceRegistry, TransportHandle};
use dms_storage::ParameterRecord;
use dms_transport::{InboundFrame, MtpTransport};
use domain::{now_epoch_ms, DeviceId, ParamType};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// 引擎参数。
#[derive(Debug, Clone)]
pub struct UspEngineConfig {
    /// 控制器端点 ID（Record.from_id）
    pub controller_id: String,
    /// 关联表容量上限
    pub correlation_cap: usize,
    /// Notify 去重窗口容量（at-least-once 传输用）
    pub dedup_cap: usize,
}

impl Default for UspEngineConfig {
    fn default() -> Self {
        Self {
            controller_id: "self::dms-controller".to_string(),
            correlation_cap: 65_536,
            dedup_cap: 8_192,
        }
    }
}

/// 等待槽的终点：应答或设备侧错误。
#[derive(Debug)]
enum MsgOutcome {
    Response(ResponseBody),
    Error { code: u32, message: String },
}

/// 关联表清除守卫：无论请求以何种方式离开（应答、超时、取消），
/// 等待槽都会被移除，关联表不允许泄漏。
struct PendingGuard<'a> {
    pending: &'a DashMap<String, oneshot::Sender<MsgOutcome>>,
    msg_id: &'a str,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.pending.remove(self.msg_id);
    }
}

/// USP 引擎。进程级单例。
pub struct UspEngine {
    config: UspEngineConfig,
    registry: Arc<DeviceRegistry>,
    transports: HashMap<&'static str, Arc<dyn MtpTransport>>,
    router: Arc<SubscriptionRouter>,
    sink: PersistSink,
    /// 关联表：msg_id → 等待槽
    pending: DashMap<String, oneshot::Sender<MsgOutcome>>,
    /// Notify 去重：(from, msg_id) → 首见时间
    seen_notify: DashMap<String, i64>,
}

impl UspEngine {
    pub fn new(
        config: UspEngineConfig,
        registry: Arc<DeviceRegistry>,
        transports: Vec<Arc<dyn MtpTransport>>,
        router: Arc<SubscriptionRouter>,
        sink: PersistSink,
    ) -> Arc<Self> {
        let transports = transports
            .into_iter()
            .map(|transport| (transport.name(), transport))
            .collect();
        Arc::new(Self {
            config,
            registry,
            transports,
            router,
            sink,
            pending: DashMap::new(),
            seen_notify: DashMap::new(),
        })
    }

    /// 当前在途等待数（审计用）。
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// 发起一次请求并等待应答。
    ///
    /// 未注册设备立即失败，不触碰传输层。变更类请求全程持设备锁。
    pub async fn request(
        &self,
        device_id: &str,
        body: RequestBody,
        timeout: Duration,
    ) -> Result<ResponseBody, UspError> {
        let device = self
            .registry
            .get(device_id)
            .map_err(|_| UspError::DeviceUnknown(device_id.to_string()))?;
        let TransportHandle::Usp { transport, address } = device.transport() else {
            return Err(UspError::EngineMismatch(device_id.to_string()));
        };
        let adapter = self
            .transports
            .get(transport.as_str())
            .ok_or_else(|| UspError::TransportLost(format!("no adapter '{}'", transport)))?
            .clone();

        // 变更类请求按设备互斥；读取类不取锁
        let _guard = if body.is_mutator() {
            Some(device.mutex.clone().lock_owned().await)
        } else {
            None
        };

        if self.pending.len() >= self.config.correlation_cap {
            return Err(UspError::ResourcesExceeded(
                "correlation table full".to_string(),
            ));
        }

        let msg_id = uuid::Uuid::new_v4().to_string();
        let msg = Msg::request(&msg_id, body);
        let record = Record::new(device_id, &self.config.controller_id, msg.encode());

        // 先插入等待槽再发送，应答先到也不会丢。清除交给守卫：
        // 正常返回、超时、调用方半途放弃（future 被 drop）走同一条路
        let (sender, receiver) = oneshot::channel();
        self.pending.insert(msg_id.clone(), sender);
        let _cleanup = PendingGuard {
            pending: &self.pending,
            msg_id: &msg_id,
        };

        if let Err(err) = adapter.send(&address, record.encode()).await {
            return Err(UspError::TransportLost(err.to_string()));
        }

        let outcome = tokio::time::timeout(timeout, receiver).await;

        match outcome {
            Ok(Ok(MsgOutcome::Response(response))) => {
                dms_telemetry::record_rpc_completed();
                Ok(response)
            }
            Ok(Ok(MsgOutcome::Error { code, message })) => {
                dms_telemetry::record_rpc_failed();
                Err(UspError::Device { code, message })
            }
            Ok(Err(_)) => Err(UspError::TransportLost("waiter dropped".to_string())),
            Err(_) => {
                dms_telemetry::record_rpc_timeout();
                Err(UspError::Timeout)
            }
        }
    }

    /// 启动入站分发任务（每适配器集合一个）。
    pub fn spawn_dispatcher(
        self: &Arc<Self>,
        mut inbound: mpsc::Receiver<InboundFrame>,
    ) -> JoinHandle<()> {
        let engine = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(frame) = inbound.recv().await {
                engine.handle_frame(frame).await;
            }
        })
    }

    /// 周期审计：在途等待数不得超过关联表容量。
    pub fn spawn_correlation_audit(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let engine = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                let outstanding = engine.pending.len();
                if outstanding > engine.config.correlation_cap {
                    warn!(
                        target: "dms.usp",
                        outstanding,
                        cap = engine.config.correlation_cap,
                        "correlation table above cap"
                    );
                }
            }
        })
    }

    async fn handle_frame(&self, frame: InboundFrame) {
        let record = match Record::decode(&frame.payload) {
            Ok(record) => record,
            Err(err) => {
                debug!(target: "dms.usp", error = %err, "record decode failed");
                return;
            }
        };
        let msg = match Msg::decode(&record.payload) {
            Ok(msg) => msg,
            Err(err) => {
                debug!(target: "dms.usp", from = %record.from_id, error = %err, "msg decode failed");
                return;
            }
        };

        // 任何入站帧都刷新发送方活性
        self.registry.touch(&record.from_id);

        match msg.body {
            MsgBody::Response(response) => {
                match self.pending.remove(&msg.msg_id) {
                    Some((_, sender)) => {
                        let _ = sender.send(MsgOutcome::Response(response));
                    }
                    None => {
                        // 迟到或重复的应答：丢弃并计数
                        dms_telemetry::record_orphan_response();
                        debug!(target: "dms.usp", msg_id = %msg.msg_id, "orphan response dropped");
                    }
                }
            }
            MsgBody::Error(error) => match self.pending.remove(&msg.msg_id) {
                Some((_, sender)) => {
                    let _ = sender.send(MsgOutcome::Error {
                        code: error.code,
                        message: error.message,
                    });
                }
                None => {
                    dms_telemetry::record_orphan_response();
                }
            },
            MsgBody::Request(RequestBody::Notify(notify)) => {
                self.handle_notify(&record.from_id, &frame, &msg.msg_id, notify)
                    .await;
            }
            MsgBody::Request(other) => {
                debug!(
                    target: "dms.usp",
                    from = %record.from_id,
                    kind = other.kind_name(),
                    "agent-originated request ignored"
                );
            }
        }
    }

    async fn handle_notify(
        &self,
        from_id: &str,
        frame: &InboundFrame,
        msg_id: &str,
        notify: Notify,
    ) {
        // at-least-once 传输可能重复投递：按 (from, msg_id) 去重
        let dedup_key = format!("{}\u{1}{}", from_id, msg_id);
        if self.seen_notify.contains_key(&dedup_key) {
            debug!(target: "dms.usp", msg_id = %msg_id, "duplicate notify dropped");
            return;
        }
        if self.seen_notify.len() >= self.config.dedup_cap {
            // 满了就丢掉一半最旧的
            let cutoff = now_epoch_ms() - 60_000;
            self.seen_notify.retain(|_, first_seen| *first_seen > cutoff);
        }
        self.seen_notify.insert(dedup_key, now_epoch_ms());

        // 刷新 Agent 的应答地址（出现地址可能随连接漂移）
        let handle = TransportHandle::Usp {
            transport: frame.transport.to_string(),
            address: frame.origin.clone(),
        };
        match &notify.event {
            NotifyEvent::OnBoardReq {
                oui,
                product_class,
                serial_number,
            } => {
                let descriptor = DeviceDescriptor {
                    manufacturer: Some(oui.clone()),
                    model_name: Some(product_class.clone()),
                    software_version: None,
                    hardware_version: None,
                };
                let id = DeviceId::usp(from_id);
                match self.registry.register(&id, descriptor, handle) {
                    Ok(_) => {
                        info!(target: "dms.usp", endpoint = %from_id, serial = %serial_number, "agent on-boarded");
                    }
                    Err(err) => {
                        warn!(target: "dms.usp", endpoint = %from_id, error = %err, "on-board rejected");
                        return;
                    }
                }
                self.router
                    .route(from_id, event_types::ON_BOARD, "Device.", serde_json::json!({
                        "oui": oui,
                        "productClass": product_class,
                        "serialNumber": serial_number,
                    }))
                    .await;
            }
            NotifyEvent::ValueChange {
                param_path,
                param_value,
            } => {
                if let Ok(device) = self.registry.get(from_id) {
                    device.set_transport(handle);
                }
                // 参数增量异步落库；事件路径不回压
                self.sink.submit_parameters_event(
                    from_id,
                    vec![ParameterRecord {
                        device_id: from_id.to_string(),
                        path: param_path.clone(),
                        value: param_value.clone(),
                        param_type: ParamType::String,
                        writable: true,
                        last_update_ms: now_epoch_ms(),
                    }],
                );
                self.router
                    .route(
                        from_id,
                        event_types::VALUE_CHANGE,
                        param_path,
                        SubscriptionRouter::value_change_payload(param_path, param_value),
                    )
                    .await;
            }
            NotifyEvent::Event {
                obj_path,
                event_name,
                params_json,
            } => {
                if let Ok(device) = self.registry.get(from_id) {
                    device.set_transport(handle);
                }
                let payload = serde_json::json!({
                    "event": event_name,
                    "params": params_json,
                });
                self.router
                    .route(from_id, event_types::EVENT, obj_path, payload)
                    .await;
            }
            NotifyEvent::OperationComplete {
                obj_path,
                command_name,
                command_key,
            } => {
                if let Ok(device) = self.registry.get(from_id) {
                    device.set_transport(handle);
                }
                // 文件传输类命令以 CommandKey 关联，完成时流转终态
                if !command_key.is_empty() {
                    self.sink.submit_transfer_status(
                        from_id,
                        command_key,
                        "completed",
                        None,
                        Some(now_epoch_ms()),
                    );
                }
                let payload = serde_json::json!({
                    "command": command_name,
                    "commandKey": command_key,
                });
                self.router
                    .route(from_id, event_types::OPERATION_COMPLETE, obj_path, payload)
                    .await;
            }
        }

        // 按 Agent 要求回执 NotifyResp（尽力而为）
        if notify.send_resp {
            let response = Msg::response(
                msg_id,
                ResponseBody::NotifyResp {
                    subscription_id: notify.subscription_id.clone(),
                },
            );
            let record = Record::new(from_id, &self.config.controller_id, response.encode());
            if let Some(adapter) = self.transports.get(frame.transport) {
                if let Err(err) = adapter.send(&frame.origin, record.encode()).await {
                    debug!(target: "dms.usp", endpoint = %from_id, error = %err, "notify resp send failed");
                }
            }
        }
    }
}

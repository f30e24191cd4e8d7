//! ACS 服务：HTTP+SOAP 会话终结。
//!
//! 协议形状：设备开 HTTP 会话先发 Inform，服务端回 InformResponse；
//! 之后设备不断 POST——要么带着上一条 RPC 的应答，要么空体邀请
//! 服务端在响应体里放下一条排队 RPC；队列放空后回 204，设备关会话。
//!
//! 失败语义：HTTP 层故障按会话算——只打掉在途那条 RPC
//! （session_lost），排队的留给下一个会话；信封内的 CWMP Fault
//! 按 RPC 算——该操作以 fault 收尾，会话继续放下一条。

use crate::auth::{AuthMode, DeviceAuth};
use crate::connreq::ConnectionRequester;
use crate::error::{fault_codes, CwmpError};
use crate::rpc::{serialize_fault, serialize_inform_response, serialize_rpc,
    serialize_transfer_complete_response, AcsRpc};
use crate::session::{CwmpSession, QueuedRpc, RpcOutcome, RpcQueues, SessionState, SessionTable};
use crate::soap::{event_codes, parse_envelope, CpeMessage, Inform, TransferComplete};
use dms_pipeline::PersistSink;
use dms_registry::{DeviceDescriptor, DeviceRegistry, RegistryError, TransportHandle};
use dms_storage::{DeviceRecord, DeviceStore, ParameterRecord, TransferStore};
use dms_usp::{event_types, SubscriptionRouter};
use domain::{now_epoch_ms, DeviceId, DeviceKind, ParamType};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// 会话 cookie 名。
pub const SESSION_COOKIE: &str = "CWMPSESSIONID";

/// ACS 配置。
#[derive(Debug, Clone)]
pub struct AcsConfig {
    pub max_envelope_size: usize,
    pub session_timeout_ms: i64,
    pub auth_mode: AuthMode,
    pub device_username: String,
    pub device_password: String,
}

impl Default for AcsConfig {
    fn default() -> Self {
        Self {
            max_envelope_size: 65_536,
            session_timeout_ms: 30_000,
            auth_mode: AuthMode::Off,
            device_username: String::new(),
            device_password: String::new(),
        }
    }
}

/// 传输无关的请求形状（axum 层只做字节与头的搬运）。
#[derive(Debug, Default)]
pub struct AcsRequest {
    pub body: String,
    pub cookie_header: Option<String>,
    pub authorization: Option<String>,
    pub peer_ip: Option<String>,
    pub uri: String,
}

/// 传输无关的响应形状。
#[derive(Debug)]
pub struct AcsResponse {
    pub status: u16,
    pub body: Option<String>,
    pub set_cookie: Option<String>,
    pub www_authenticate: Option<String>,
}

impl AcsResponse {
    fn soap(status: u16, body: String) -> Self {
        Self {
            status,
            body: Some(body),
            set_cookie: None,
            www_authenticate: None,
        }
    }

    fn empty() -> Self {
        Self {
            status: 204,
            body: None,
            set_cookie: None,
            www_authenticate: None,
        }
    }

    fn unauthorized(challenge: Option<String>) -> Self {
        Self {
            status: 401,
            body: None,
            set_cookie: None,
            www_authenticate: challenge,
        }
    }
}

/// 从 Cookie 头里摘出会话 ID。
fn session_cookie(header: &str) -> Option<String> {
    header.split(';').find_map(|part| {
        let (name, value) = part.trim().split_once('=')?;
        (name == SESSION_COOKIE).then(|| value.to_string())
    })
}

/// ACS 服务。进程级单例。
pub struct AcsService {
    config: AcsConfig,
    registry: Arc<DeviceRegistry>,
    device_store: Arc<dyn DeviceStore>,
    transfer_store: Arc<dyn TransferStore>,
    sink: PersistSink,
    router: Arc<SubscriptionRouter>,
    sessions: SessionTable,
    queues: RpcQueues,
    auth: DeviceAuth,
    requester: Arc<ConnectionRequester>,
    rpc_counter: AtomicU64,
}

impl AcsService {
    pub fn new(
        config: AcsConfig,
        registry: Arc<DeviceRegistry>,
        device_store: Arc<dyn DeviceStore>,
        transfer_store: Arc<dyn TransferStore>,
        sink: PersistSink,
        router: Arc<SubscriptionRouter>,
        requester: Arc<ConnectionRequester>,
    ) -> Arc<Self> {
        let auth = DeviceAuth::new(
            config.auth_mode,
            config.device_username.clone(),
            config.device_password.clone(),
        );
        Arc::new(Self {
            config,
            registry,
            device_store,
            transfer_store,
            sink,
            router,
            sessions: SessionTable::new(),
            queues: RpcQueues::new(),
            auth,
            requester,
            rpc_counter: AtomicU64::new(1),
        })
    }

    /// 处理一次设备 POST。
    pub async fn handle(&self, request: AcsRequest) -> AcsResponse {
        if !self
            .auth
            .verify(request.authorization.as_deref(), "POST", &request.uri)
        {
            return AcsResponse::unauthorized(self.auth.challenge());
        }

        if request.body.len() > self.config.max_envelope_size {
            return AcsResponse::soap(
                200,
                serialize_fault(
                    None,
                    fault_codes::RESOURCES_EXCEEDED,
                    "Envelope exceeds maxEnvelopeSize",
                ),
            );
        }

        let session = request
            .cookie_header
            .as_deref()
            .and_then(session_cookie)
            .and_then(|session_id| self.sessions.get(&session_id));

        if request.body.trim().is_empty() {
            // 空体：设备邀请服务端下发排队 RPC
            return match session {
                Some(session) => self.next_rpc_or_close(session).await,
                None => AcsResponse::empty(),
            };
        }

        let envelope = match parse_envelope(&request.body) {
            Ok(envelope) => envelope,
            Err(err) => {
                debug!(target: "dms.cwmp", error = %err, "envelope rejected");
                // 畸形报文：会话进 faulted 并收敛 closed，在途 RPC 打掉
                if let Some(session) = session {
                    self.fault_session(session).await;
                }
                return AcsResponse::soap(
                    200,
                    serialize_fault(None, fault_codes::INVALID_ARGUMENTS, "Invalid SOAP envelope"),
                );
            }
        };

        match envelope.message {
            CpeMessage::Inform(inform) => {
                self.handle_inform(inform, envelope.id.as_deref(), request.peer_ip.as_deref())
                    .await
            }
            CpeMessage::TransferComplete(transfer) => {
                self.handle_transfer_complete(session, transfer, envelope.id.as_deref())
                    .await
            }
            CpeMessage::Fault(fault) => {
                dms_telemetry::record_rpc_failed();
                match session {
                    Some(session) => {
                        self.finish_inflight(
                            &session,
                            RpcOutcome::Fault {
                                code: fault.code,
                                text: fault.text,
                            },
                        )
                        .await;
                        self.next_rpc_or_close(session).await
                    }
                    None => AcsResponse::empty(),
                }
            }
            message => match session {
                Some(session) => {
                    dms_telemetry::record_rpc_completed();
                    self.finish_inflight(&session, RpcOutcome::Response(message)).await;
                    self.next_rpc_or_close(session).await
                }
                None => {
                    debug!(
                        target: "dms.cwmp",
                        kind = message.kind_name(),
                        "rpc response without session"
                    );
                    AcsResponse::empty()
                }
            },
        }
    }

    async fn handle_inform(
        &self,
        inform: Inform,
        cwmp_id: Option<&str>,
        peer_ip: Option<&str>,
    ) -> AcsResponse {
        dms_telemetry::record_inform();
        let id = DeviceId::cwmp(
            &inform.device_id.manufacturer,
            &inform.device_id.oui,
            &inform.device_id.product_class,
            &inform.device_id.serial_number,
        );
        let device_id = id.canonical();

        let find_param = |suffix: &str| {
            inform
                .parameter_list
                .iter()
                .find(|param| param.name.ends_with(suffix))
                .map(|param| param.value.clone())
        };
        let connection_request_url = find_param(".ManagementServer.ConnectionRequestURL");
        let descriptor = DeviceDescriptor {
            manufacturer: Some(inform.device_id.manufacturer.clone()),
            model_name: find_param(".DeviceInfo.ModelName"),
            software_version: find_param(".DeviceInfo.SoftwareVersion"),
            hardware_version: find_param(".DeviceInfo.HardwareVersion"),
        };

        let device = match self.registry.register(
            &id,
            descriptor,
            TransportHandle::Cwmp {
                connection_request_url: connection_request_url.clone(),
            },
        ) {
            Ok(device) => device,
            Err(RegistryError::IdentityConflict(_)) => {
                warn!(target: "dms.cwmp", device_id = %device_id, "identity conflict on inform");
                return AcsResponse::soap(
                    200,
                    serialize_fault(cwmp_id, fault_codes::REQUEST_DENIED, "Identity conflict"),
                );
            }
            Err(err) => {
                warn!(target: "dms.cwmp", device_id = %device_id, error = %err, "register failed");
                return AcsResponse::soap(
                    200,
                    serialize_fault(cwmp_id, fault_codes::INTERNAL_ERROR, "Registration failed"),
                );
            }
        };

        // 设备时钟偏差只观测不纠正
        if let Ok(device_time) = chrono::DateTime::parse_from_rfc3339(&inform.current_time) {
            let skew_ms = (device_time.timestamp_millis() - now_epoch_ms()).abs();
            if skew_ms > 30_000 {
                debug!(target: "dms.cwmp", device_id = %device_id, skew_ms, "device clock skew");
            }
        }

        // 设备记录落库（插入即替换）；存储故障不挡会话
        self.persist_device(&id, &inform, connection_request_url, peer_ip).await;

        // Inform 参数清单作为增量落库
        let now = now_epoch_ms();
        let parameters: Vec<ParameterRecord> = inform
            .parameter_list
            .iter()
            .map(|param| ParameterRecord {
                device_id: device_id.clone(),
                path: param.name.clone(),
                value: param.value.clone(),
                param_type: ParamType::parse(&param.param_type),
                writable: false,
                last_update_ms: now,
            })
            .collect();
        if !parameters.is_empty() {
            self.sink.submit_parameters_event(&device_id, parameters);
        }

        // 事件码处理
        for event in &inform.events {
            match event.event_code.as_str() {
                event_codes::BOOTSTRAP | event_codes::BOOT => {
                    self.router
                        .route(
                            &device_id,
                            event_types::BOOT,
                            "Device.",
                            serde_json::json!({ "event": event.event_code }),
                        )
                        .await;
                }
                event_codes::VALUE_CHANGE => {
                    for param in &inform.parameter_list {
                        self.router
                            .route(
                                &device_id,
                                event_types::VALUE_CHANGE,
                                &param.name,
                                SubscriptionRouter::value_change_payload(&param.name, &param.value),
                            )
                            .await;
                    }
                }
                _ => {}
            }
        }

        // 同设备的旧会话被新 Inform 顶替：在途 RPC 打掉，排队保留
        if let Some(old_session) = self.sessions.get_by_device(&device_id) {
            self.fault_session(old_session).await;
        }

        let session_id = uuid::Uuid::new_v4().to_string();
        let session_ref = device.attach_session(&session_id);
        self.sessions.open(&device_id, session_ref);
        dms_telemetry::record_session_opened();
        info!(
            target: "dms.cwmp",
            device_id = %device_id,
            session_id = %session_id,
            events = inform.events.len(),
            "session opened"
        );

        let mut response = AcsResponse::soap(200, serialize_inform_response(cwmp_id));
        response.set_cookie = Some(format!("{}={}; Path=/", SESSION_COOKIE, session_id));
        response
    }

    async fn persist_device(
        &self,
        id: &DeviceId,
        inform: &Inform,
        connection_request_url: Option<String>,
        peer_ip: Option<&str>,
    ) {
        let device_id = id.canonical();
        let mut record = match self.device_store.get_device(&device_id).await {
            Ok(Some(existing)) => existing,
            Ok(None) => DeviceRecord::new(id),
            Err(err) => {
                warn!(target: "dms.cwmp", device_id = %device_id, error = %err, "device lookup failed");
                dms_telemetry::record_store_write_failure();
                return;
            }
        };
        let find_param = |suffix: &str| {
            inform
                .parameter_list
                .iter()
                .find(|param| param.name.ends_with(suffix))
                .map(|param| param.value.clone())
        };
        if let Some(value) = find_param(".DeviceInfo.ModelName") {
            record.model_name = Some(value);
        }
        if let Some(value) = find_param(".DeviceInfo.SoftwareVersion") {
            record.software_version = Some(value);
        }
        if let Some(value) = find_param(".DeviceInfo.HardwareVersion") {
            record.hardware_version = Some(value);
        }
        if let Some(value) = find_param(".DeviceInfo.ProvisioningCode") {
            record.provisioning_code = Some(value);
        }
        if connection_request_url.is_some() {
            record.connection_request_url = connection_request_url;
        }
        record.ip_address = peer_ip.map(|ip| ip.to_string());
        record.last_contact_ms = now_epoch_ms();
        if inform
            .events
            .iter()
            .any(|event| event.event_code == event_codes::BOOTSTRAP)
        {
            record.last_bootstrap_ms = Some(record.last_contact_ms);
        }
        if let Err(err) = self.device_store.upsert_device(record).await {
            warn!(target: "dms.cwmp", device_id = %device_id, error = %err, "device upsert failed");
            dms_telemetry::record_store_write_failure();
        }
    }

    async fn handle_transfer_complete(
        &self,
        session: Option<Arc<Mutex<CwmpSession>>>,
        transfer: TransferComplete,
        cwmp_id: Option<&str>,
    ) -> AcsResponse {
        let Some(session) = session else {
            return AcsResponse::soap(
                200,
                serialize_fault(cwmp_id, fault_codes::REQUEST_DENIED, "No session"),
            );
        };
        let device_id = {
            let mut guard = session.lock().await;
            guard.touch();
            guard.device_id.clone()
        };
        self.registry.touch(&device_id);

        let (status, fault) = if transfer.fault_code == 0 {
            ("completed", None)
        } else {
            (
                "failed",
                Some(format!("{}: {}", transfer.fault_code, transfer.fault_string)),
            )
        };
        // 按 CommandKey 关联并流转终态；无主 CommandKey 只记日志
        match self
            .transfer_store
            .find_transfer(&device_id, &transfer.command_key)
            .await
        {
            Ok(Some(_)) => {
                self.sink.submit_transfer_status(
                    &device_id,
                    &transfer.command_key,
                    status,
                    fault.clone(),
                    Some(now_epoch_ms()),
                );
            }
            Ok(None) => {
                warn!(
                    target: "dms.cwmp",
                    device_id = %device_id,
                    command_key = %transfer.command_key,
                    "transfer complete for unknown command key"
                );
            }
            Err(err) => {
                warn!(target: "dms.cwmp", device_id = %device_id, error = %err, "transfer lookup failed");
            }
        }
        self.router
            .route(
                &device_id,
                event_types::TRANSFER_COMPLETE,
                "Device.",
                serde_json::json!({
                    "commandKey": transfer.command_key,
                    "status": status,
                    "fault": fault,
                }),
            )
            .await;
        AcsResponse::soap(200, serialize_transfer_complete_response(cwmp_id))
    }

    /// 把在途 RPC 以给定结局收尾。
    async fn finish_inflight(&self, session: &Arc<Mutex<CwmpSession>>, outcome: RpcOutcome) {
        let inflight = {
            let mut guard = session.lock().await;
            guard.touch();
            guard.inflight.take()
        };
        if let Some(rpc) = inflight {
            rpc.finish(outcome);
        }
    }

    /// 队列有货就放下一条 RPC，否则 204 收会话。
    async fn next_rpc_or_close(&self, session: Arc<Mutex<CwmpSession>>) -> AcsResponse {
        let (device_id, session_id) = {
            let guard = session.lock().await;
            (guard.device_id.clone(), guard.session_id.clone())
        };
        self.registry.touch(&device_id);

        // 队列弹出在设备锁内进行
        let next = match self.registry.get(&device_id) {
            Ok(device) => {
                let _guard = device.mutex.clone().lock_owned().await;
                self.queues.pop(&device_id)
            }
            Err(_) => None,
        };

        match next {
            Some(mut rpc) => {
                let cwmp_id = format!("dms-{}", self.rpc_counter.fetch_add(1, Ordering::Relaxed));
                rpc.cwmp_id = cwmp_id.clone();
                let body = serialize_rpc(&cwmp_id, &rpc.rpc);
                {
                    let mut guard = session.lock().await;
                    guard.touch();
                    guard.state = SessionState::Active;
                    guard.inflight = Some(rpc);
                }
                AcsResponse::soap(200, body)
            }
            None => {
                {
                    let mut guard = session.lock().await;
                    guard.state = SessionState::Closed;
                }
                self.close_session(&session, &session_id, &device_id).await;
                dms_telemetry::record_session_closed();
                AcsResponse::empty()
            }
        }
    }

    /// 畸形报文 / 被顶替 / 超时的会话：faulted → closed。
    async fn fault_session(&self, session: Arc<Mutex<CwmpSession>>) {
        let (session_id, device_id) = {
            let mut guard = session.lock().await;
            guard.state = SessionState::Faulted;
            (guard.session_id.clone(), guard.device_id.clone())
        };
        self.finish_inflight(&session, RpcOutcome::SessionLost).await;
        {
            let mut guard = session.lock().await;
            guard.state = SessionState::Closed;
        }
        self.close_session(&session, &session_id, &device_id).await;
        dms_telemetry::record_session_faulted();
    }

    async fn close_session(
        &self,
        session: &Arc<Mutex<CwmpSession>>,
        session_id: &str,
        device_id: &str,
    ) {
        let session_ref = {
            let guard = session.lock().await;
            guard.session_ref.clone()
        };
        if let Ok(device) = self.registry.get(device_id) {
            device.detach_session(&session_ref);
        }
        self.sessions.remove(session_id, device_id);
    }

    /// 操作员侧：给设备排队一条 RPC，返回结局接收端。
    ///
    /// 设备当前没有开着的会话时发一次连接请求唤醒（尽力而为）。
    pub async fn enqueue_rpc(
        &self,
        device_id: &str,
        rpc: AcsRpc,
    ) -> Result<oneshot::Receiver<RpcOutcome>, CwmpError> {
        let device = self
            .registry
            .get(device_id)
            .map_err(|_| CwmpError::DeviceUnknown(device_id.to_string()))?;
        if device.kind() != DeviceKind::Cwmp {
            return Err(CwmpError::EngineMismatch(device_id.to_string()));
        }

        let (sender, receiver) = oneshot::channel();
        {
            // 队列受设备锁保护
            let _guard = device.mutex.clone().lock_owned().await;
            self.queues.push(
                device_id,
                QueuedRpc {
                    rpc,
                    cwmp_id: String::new(),
                    waiter: Some(sender),
                },
            );
        }

        if self.sessions.get_by_device(device_id).is_none() {
            let TransportHandle::Cwmp {
                connection_request_url: Some(url),
            } = device.transport()
            else {
                debug!(target: "dms.cwmp", device_id = %device_id, "no connection request url");
                return Ok(receiver);
            };
            let requester = Arc::clone(&self.requester);
            let device_store = Arc::clone(&self.device_store);
            let device_id = device_id.to_string();
            tokio::spawn(async move {
                let (username, password) = match device_store.get_device(&device_id).await {
                    Ok(Some(record)) => (
                        record.connection_request_username,
                        record.connection_request_password,
                    ),
                    _ => (None, None),
                };
                if !requester
                    .wake(&url, username.as_deref(), password.as_deref())
                    .await
                {
                    let _ = device_store.bump_connreq_failures(&device_id).await;
                }
            });
        }
        Ok(receiver)
    }

    /// 排队深度（观测用）。
    pub fn queue_depth(&self, device_id: &str) -> usize {
        self.queues.depth(device_id)
    }

    /// 打开的会话数（观测用）。
    pub fn open_sessions(&self) -> usize {
        self.sessions.len()
    }

    /// 启动会话超时清扫。
    pub fn spawn_session_sweeper(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let service = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                for session in service
                    .sessions
                    .idle_sessions(service.config.session_timeout_ms)
                {
                    service.fault_session(session).await;
                }
            }
        })
    }
}

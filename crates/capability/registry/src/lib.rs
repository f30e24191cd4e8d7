//! 设备注册表。
//!
//! 按规范化 ID 索引在线设备：注册（幂等、身份冲突拒绝）、活性
//! 刷新、按窗口列活跃设备。每个设备携带一把互斥锁，供两侧引擎
//! 执行串行化纪律（CWMP 每会话一个在途 RPC、USP 变更类请求按
//! 设备互斥）。后台清扫任务按期把超窗设备降为离线；离线设备仍
//! 可查询。

use dashmap::DashMap;
use domain::{now_epoch_ms, DeviceId, DeviceKind};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// 注册表错误。
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// 同一 ID 出现描述符分歧的二次注册
    #[error("identity conflict for {0}")]
    IdentityConflict(String),
    /// 未注册设备
    #[error("device unknown: {0}")]
    DeviceUnknown(String),
}

/// 注册时携带的静态描述符。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceDescriptor {
    pub manufacturer: Option<String>,
    pub model_name: Option<String>,
    pub software_version: Option<String>,
    pub hardware_version: Option<String>,
}

/// 传输线索：引擎向设备送帧所需的最小句柄。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportHandle {
    /// 传统设备只能通过连接请求回调唤醒
    Cwmp { connection_request_url: Option<String> },
    /// 现代 Agent 的 MTP 适配器名 + 端点地址
    Usp { transport: String, address: String },
}

/// 会话弱引用（id + 代际），真实会话在 SessionTable 里。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionRef {
    pub session_id: String,
    pub generation: u64,
}

/// 注册表里的设备条目。
#[derive(Debug)]
pub struct RegisteredDevice {
    pub id: DeviceId,
    descriptor: RwLock<DeviceDescriptor>,
    transport: RwLock<TransportHandle>,
    /// 变更类操作的设备级互斥
    pub mutex: Arc<Mutex<()>>,
    last_contact_ms: AtomicI64,
    online: AtomicBool,
    session_generation: AtomicU64,
    current_session: RwLock<Option<SessionRef>>,
}

impl RegisteredDevice {
    pub fn kind(&self) -> DeviceKind {
        self.id.kind()
    }

    pub fn descriptor(&self) -> DeviceDescriptor {
        self.descriptor.read().map(|d| d.clone()).unwrap_or_default()
    }

    pub fn transport(&self) -> TransportHandle {
        self.transport
            .read()
            .map(|t| t.clone())
            .unwrap_or(TransportHandle::Cwmp {
                connection_request_url: None,
            })
    }

    /// 更新传输线索（Agent 换了出现地址、CPE 换了回调 URL）。
    pub fn set_transport(&self, handle: TransportHandle) {
        if let Ok(mut slot) = self.transport.write() {
            *slot = handle;
        }
    }

    pub fn last_contact_ms(&self) -> i64 {
        self.last_contact_ms.load(Ordering::Relaxed)
    }

    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::Relaxed)
    }

    /// 登记当前会话，返回带新代际的弱引用。
    pub fn attach_session(&self, session_id: &str) -> SessionRef {
        let generation = self.session_generation.fetch_add(1, Ordering::Relaxed) + 1;
        let session_ref = SessionRef {
            session_id: session_id.to_string(),
            generation,
        };
        if let Ok(mut slot) = self.current_session.write() {
            *slot = Some(session_ref.clone());
        }
        session_ref
    }

    /// 仅当代际匹配时解除会话引用（防止旧会话清掉新会话）。
    pub fn detach_session(&self, session_ref: &SessionRef) {
        if let Ok(mut slot) = self.current_session.write() {
            if slot.as_ref() == Some(session_ref) {
                *slot = None;
            }
        }
    }

    pub fn current_session(&self) -> Option<SessionRef> {
        self.current_session.read().ok().and_then(|slot| slot.clone())
    }
}

/// 描述符分歧判定：身份性字段（厂商 / 型号）两边都有值且不同。
fn descriptors_conflict(existing: &DeviceDescriptor, incoming: &DeviceDescriptor) -> bool {
    let field_conflicts = |a: &Option<String>, b: &Option<String>| match (a, b) {
        (Some(left), Some(right)) => left != right,
        _ => false,
    };
    field_conflicts(&existing.manufacturer, &incoming.manufacturer)
        || field_conflicts(&existing.model_name, &incoming.model_name)
}

/// 设备注册表。进程级单例，启动时创建。
pub struct DeviceRegistry {
    devices: DashMap<String, Arc<RegisteredDevice>>,
    liveness_window_ms: i64,
}

impl DeviceRegistry {
    pub fn new(liveness_window_ms: i64) -> Self {
        Self {
            devices: DashMap::new(),
            liveness_window_ms,
        }
    }

    pub fn liveness_window_ms(&self) -> i64 {
        self.liveness_window_ms
    }

    /// 注册设备。幂等：同 ID 同描述符刷新传输线索与活性；
    /// 身份性字段分歧则拒绝，既有条目保持不变。
    pub fn register(
        &self,
        id: &DeviceId,
        descriptor: DeviceDescriptor,
        transport: TransportHandle,
    ) -> Result<Arc<RegisteredDevice>, RegistryError> {
        let key = id.canonical();
        if let Some(existing) = self.devices.get(&key) {
            let device = Arc::clone(existing.value());
            drop(existing);
            if descriptors_conflict(&device.descriptor(), &descriptor) {
                return Err(RegistryError::IdentityConflict(key));
            }
            // 幂等注册：补全描述符、刷新传输线索与活性
            if let Ok(mut slot) = device.descriptor.write() {
                if descriptor.manufacturer.is_some() {
                    slot.manufacturer = descriptor.manufacturer;
                }
                if descriptor.model_name.is_some() {
                    slot.model_name = descriptor.model_name;
                }
                if descriptor.software_version.is_some() {
                    slot.software_version = descriptor.software_version;
                }
                if descriptor.hardware_version.is_some() {
                    slot.hardware_version = descriptor.hardware_version;
                }
            }
            device.set_transport(transport);
            device.last_contact_ms.store(now_epoch_ms(), Ordering::Relaxed);
            device.online.store(true, Ordering::Relaxed);
            return Ok(device);
        }

        let device = Arc::new(RegisteredDevice {
            id: id.clone(),
            descriptor: RwLock::new(descriptor),
            transport: RwLock::new(transport),
            mutex: Arc::new(Mutex::new(())),
            // 从未 Inform 过的设备：last_contact 取注册时间
            last_contact_ms: AtomicI64::new(now_epoch_ms()),
            online: AtomicBool::new(true),
            session_generation: AtomicU64::new(0),
            current_session: RwLock::new(None),
        });
        self.devices.insert(key.clone(), Arc::clone(&device));
        info!(target: "dms.registry", device_id = %key, "device registered");
        Ok(device)
    }

    /// 刷新活性。
    pub fn touch(&self, device_id: &str) {
        if let Some(device) = self.devices.get(device_id) {
            device.last_contact_ms.store(now_epoch_ms(), Ordering::Relaxed);
            device.online.store(true, Ordering::Relaxed);
        }
    }

    /// 取设备条目（含互斥锁与传输线索）。
    pub fn get(&self, device_id: &str) -> Result<Arc<RegisteredDevice>, RegistryError> {
        self.devices
            .get(device_id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| RegistryError::DeviceUnknown(device_id.to_string()))
    }

    /// 列出窗口内有过联系的设备。
    pub fn list_live(&self, window_ms: i64) -> Vec<Arc<RegisteredDevice>> {
        let oldest = now_epoch_ms().saturating_sub(window_ms);
        let mut items: Vec<Arc<RegisteredDevice>> = self
            .devices
            .iter()
            .filter(|entry| entry.value().last_contact_ms() >= oldest)
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        items.sort_by(|a, b| b.last_contact_ms().cmp(&a.last_contact_ms()));
        items
    }

    /// 全部条目数（含离线）。
    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    /// 清扫一轮：超窗设备降为离线。返回本轮降级数。
    pub fn sweep(&self) -> usize {
        let oldest = now_epoch_ms().saturating_sub(self.liveness_window_ms);
        let mut demoted = 0;
        for entry in self.devices.iter() {
            let device = entry.value();
            if device.last_contact_ms() < oldest && device.online.swap(false, Ordering::Relaxed) {
                demoted += 1;
            }
        }
        if demoted > 0 {
            debug!(target: "dms.registry", demoted, "liveness sweep");
        }
        demoted
    }
}

/// 启动清扫任务。
pub fn spawn_janitor(registry: Arc<DeviceRegistry>, sweep_interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(sweep_interval);
        loop {
            ticker.tick().await;
            registry.sweep();
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(model: &str) -> DeviceDescriptor {
        DeviceDescriptor {
            manufacturer: Some("Acme".to_string()),
            model_name: Some(model.to_string()),
            software_version: Some("1.0".to_string()),
            hardware_version: None,
        }
    }

    fn cwmp_handle() -> TransportHandle {
        TransportHandle::Cwmp {
            connection_request_url: Some("http://10.0.0.2:7547/cr".to_string()),
        }
    }

    #[test]
    fn register_is_idempotent() {
        let registry = DeviceRegistry::new(300_000);
        let id = DeviceId::cwmp("Acme", "001122", "Router", "SN1");
        let first = registry.register(&id, descriptor("R1"), cwmp_handle()).unwrap();
        let second = registry.register(&id, descriptor("R1"), cwmp_handle()).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn divergent_descriptor_is_conflict() {
        let registry = DeviceRegistry::new(300_000);
        let id = DeviceId::cwmp("Acme", "001122", "Router", "SN1");
        registry.register(&id, descriptor("R1"), cwmp_handle()).unwrap();

        let err = registry
            .register(&id, descriptor("R2"), cwmp_handle())
            .expect_err("conflict");
        assert!(matches!(err, RegistryError::IdentityConflict(_)));

        // 首次注册的条目保持不变
        let device = registry.get(&id.canonical()).unwrap();
        assert_eq!(device.descriptor().model_name.as_deref(), Some("R1"));
    }

    #[test]
    fn software_version_drift_is_not_conflict() {
        let registry = DeviceRegistry::new(300_000);
        let id = DeviceId::usp("os::0044-SN1");
        registry
            .register(&id, descriptor("R1"), cwmp_handle())
            .unwrap();
        let mut upgraded = descriptor("R1");
        upgraded.software_version = Some("2.0".to_string());
        registry.register(&id, upgraded, cwmp_handle()).unwrap();
        let device = registry.get("os::0044-SN1").unwrap();
        assert_eq!(device.descriptor().software_version.as_deref(), Some("2.0"));
    }

    #[test]
    fn sweep_demotes_stale_devices() {
        let registry = DeviceRegistry::new(0);
        let id = DeviceId::usp("os::0044-SN1");
        let device = registry.register(&id, descriptor("R1"), cwmp_handle()).unwrap();
        device.last_contact_ms.store(1, Ordering::Relaxed);

        assert_eq!(registry.sweep(), 1);
        assert!(!device.is_online());
        // 离线设备仍可查询
        assert!(registry.get("os::0044-SN1").is_ok());
    }

    #[test]
    fn session_ref_detach_checks_generation() {
        let registry = DeviceRegistry::new(300_000);
        let id = DeviceId::cwmp("Acme", "001122", "Router", "SN1");
        let device = registry.register(&id, descriptor("R1"), cwmp_handle()).unwrap();

        let old_ref = device.attach_session("s-1");
        let new_ref = device.attach_session("s-2");
        // 旧会话的解除不影响新会话
        device.detach_session(&old_ref);
        assert_eq!(device.current_session(), Some(new_ref.clone()));
        device.detach_session(&new_ref);
        assert!(device.current_session().is_none());
    }
}

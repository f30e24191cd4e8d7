//! 应用共享状态。

use dms_cwmp::AcsService;
use dms_ops::OpsService;
use dms_registry::DeviceRegistry;
use dms_storage::{DeviceStore, SubscriptionStore};
use std::sync::Arc;

/// handler 共享的服务句柄。
#[derive(Clone)]
pub struct AppState {
    pub ops: Arc<OpsService>,
    pub acs: Arc<AcsService>,
    pub devices: Arc<dyn DeviceStore>,
    pub subscriptions: Arc<dyn SubscriptionStore>,
    pub registry: Arc<DeviceRegistry>,
    pub liveness_window_ms: i64,
}

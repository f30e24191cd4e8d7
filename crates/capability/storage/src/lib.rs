//! 存储网关：文档存储 + 键值缓存之上的薄契约层。
//!
//! 上层（协议引擎、注册表、操作门面）只通过本 crate 的 trait 访问存储：
//! - `DeviceStore` / `ParameterStore` / `InstanceStore`：设备与数据模型状态
//! - `OperationStore`：在途操作记录（终态一次性约束在网关强制）
//! - `TransferStore` / `SubscriptionStore`：文件传输与订阅
//! - `CacheStore`：尽力而为的短时缓存（幂等键、关联令牌、活性）
//!
//! 实现：`in_memory`（测试与本地运行）、`postgres`（文档存储适配）、
//! `redis`（缓存适配）。网关不承载业务逻辑。

pub mod error;
pub mod in_memory;
pub mod models;
pub mod postgres;
pub mod redis;
pub mod retry;
pub mod traits;

mod connection;

pub use connection::connect_pool;
pub use error::StorageError;
pub use models::*;
pub use traits::*;

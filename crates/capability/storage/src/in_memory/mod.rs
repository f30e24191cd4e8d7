//! 内存存储实现模块
//!
//! 用于本地运行和测试。
//!
//! 包含以下实现：
//! - DeviceStore: InMemoryDeviceStore
//! - ParameterStore / InstanceStore: InMemoryParameterStore / InMemoryInstanceStore
//! - OperationStore: InMemoryOperationStore
//! - TransferStore: InMemoryTransferStore
//! - SubscriptionStore: InMemorySubscriptionStore
//! - CacheStore: InMemoryCacheStore

pub mod cache;
pub mod device;
pub mod operation;
pub mod parameter;
pub mod subscription;
pub mod transfer;

pub use cache::*;
pub use device::*;
pub use operation::*;
pub use parameter::*;
pub use subscription::*;
pub use transfer::*;

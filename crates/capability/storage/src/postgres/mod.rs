//! Postgres 存储实现模块
//!
//! 文档存储适配：每类资源一个实现，SQL 全部走 sqlx 参数绑定。

pub mod device;
pub mod operation;
pub mod parameter;
pub mod subscription;
pub mod transfer;

pub use device::*;
pub use operation::*;
pub use parameter::*;
pub use subscription::*;
pub use transfer::*;

//! USP（TR-369）消息引擎。
//!
//! 终结现代异步协议：长度定界二进制信封的编解码
//! （[`record`]）、请求/应答关联与入站分发（[`engine`]）、
//! 订阅路由（[`subscriptions`]）。传输由 MTP 适配层
//! （`dms-transport`）提供，引擎只假设适配器承诺的顺序语义。

pub mod codec;
pub mod engine;
pub mod error;
pub mod record;
pub mod subscriptions;

pub use engine::{UspEngine, UspEngineConfig};
pub use error::UspError;
pub use record::{
    Msg, MsgBody, Notify, NotifyEvent, ParamValue, Record, RequestBody, ResponseBody,
    SupportedParam,
};
pub use subscriptions::{event_types, DeliveryTask, SubscriptionRouter};

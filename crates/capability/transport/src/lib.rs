//! 消息传输抽象层（MTP）。
//!
//! 为 USP 引擎提供统一的帧收发能力：帧对传输层完全不透明，
//! 按端点地址寻址。具体适配器：
//! - [`queue_broker::QueueBrokerTransport`]：STOMP 队列（请求/应答型 broker）
//! - [`topic_broker::TopicBrokerTransport`]：MQTT 主题（发布/订阅，至少一次）
//! - [`datagram::DatagramTransport`]：UDP 报文（无连接，发送失败重试一次）
//! - [`socket::WebSocketTransport`]：WebSocket 常连接（全双工 + 保活）
//!
//! 顺序保证：PersistentSocket 与 QueueBroker 按 (地址, 方向) 保序；
//! TopicBroker 与 Datagram 不保序。引擎层不得假设更多。

pub mod datagram;
pub mod error;
pub mod queue_broker;
pub mod socket;
pub mod stomp;
pub mod topic_broker;
pub mod types;

pub use error::TransportError;
pub use types::{InboundFrame, MtpConfig, MtpCredentials, ReconnectBackoff};

use async_trait::async_trait;
use bytes::Bytes;

/// 统一传输能力。
///
/// 入站帧不经 `receive()` 拉取，而是在 `connect()` 后由适配器的
/// 单一入站任务推入构造时传入的通道（每适配器一个入站任务）。
#[async_trait]
pub trait MtpTransport: Send + Sync {
    /// 适配器名（写入设备的传输线索）
    fn name(&self) -> &'static str;

    /// 建立连接并启动入站任务
    async fn connect(&self) -> Result<(), TransportError>;

    /// 停止入站任务并断开
    async fn disconnect(&self);

    /// 向端点地址发送一帧
    async fn send(&self, address: &str, frame: Bytes) -> Result<(), TransportError>;
}

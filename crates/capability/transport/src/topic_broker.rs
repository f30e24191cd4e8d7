//! MQTT 主题适配器（TopicBroker）。
//!
//! 控制器订阅 `usp/controller/#`，端点 ID 取主题第三段；
//! 向 Agent 发布走 `usp/agent/{endpoint}`。投递为至少一次，
//! 去重（按消息 ID）由 USP 引擎负责。

use crate::error::TransportError;
use crate::types::{InboundFrame, MtpConfig, MtpCredentials};
use crate::MtpTransport;
use async_trait::async_trait;
use bytes::Bytes;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

const TRANSPORT_NAME: &str = "topic_broker";
const CONTROLLER_SUBSCRIPTION: &str = "usp/controller/#";

fn agent_topic(endpoint: &str) -> String {
    format!("usp/agent/{}", endpoint)
}

/// 从控制器主题提取端点 ID（`usp/controller/{endpoint}`）。
fn endpoint_from_topic(topic: &str) -> Option<String> {
    let mut parts = topic.split('/');
    if parts.next() != Some("usp") || parts.next() != Some("controller") {
        return None;
    }
    let endpoint: Vec<&str> = parts.collect();
    if endpoint.is_empty() {
        return None;
    }
    Some(endpoint.join("/"))
}

/// MQTT 主题适配器
pub struct TopicBrokerTransport {
    config: MtpConfig,
    inbound: mpsc::Sender<InboundFrame>,
    client: Arc<Mutex<Option<AsyncClient>>>,
    cancel: CancellationToken,
}

impl TopicBrokerTransport {
    pub fn new(config: MtpConfig, inbound: mpsc::Sender<InboundFrame>) -> Self {
        Self {
            config,
            inbound,
            client: Arc::new(Mutex::new(None)),
            cancel: CancellationToken::new(),
        }
    }

    fn host_port(&self) -> (String, u16) {
        match self.config.endpoint.rsplit_once(':') {
            Some((host, port)) => (
                host.to_string(),
                port.parse::<u16>().unwrap_or(1883),
            ),
            None => (self.config.endpoint.clone(), 1883),
        }
    }
}

#[async_trait]
impl MtpTransport for TopicBrokerTransport {
    fn name(&self) -> &'static str {
        TRANSPORT_NAME
    }

    async fn connect(&self) -> Result<(), TransportError> {
        let (host, port) = self.host_port();
        let client_id = format!("dms-controller-{}", uuid_suffix());
        let mut options = MqttOptions::new(client_id, host, port);
        options.set_keep_alive(Duration::from_secs(self.config.keepalive_seconds.max(5)));
        options.set_max_packet_size(4 * 1024 * 1024, 4 * 1024 * 1024);
        if let Some(MtpCredentials::UserSecret { user, secret }) = &self.config.credentials {
            options.set_credentials(user.clone(), secret.clone());
        }

        let (client, mut eventloop) = AsyncClient::new(options, self.config.max_inflight.max(8));
        client
            .subscribe(CONTROLLER_SUBSCRIPTION, QoS::AtLeastOnce)
            .await
            .map_err(|err| TransportError::Connection(err.to_string()))?;
        *self.client.lock().await = Some(client);

        let inbound = self.inbound.clone();
        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            loop {
                let event = tokio::select! {
                    _ = cancel.cancelled() => break,
                    event = eventloop.poll() => event,
                };
                match event {
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        let Some(origin) = endpoint_from_topic(&publish.topic) else {
                            warn!(target: "dms.transport", topic = %publish.topic, "mqtt topic skipped");
                            continue;
                        };
                        dms_telemetry::record_frame_in();
                        let item = InboundFrame {
                            transport: TRANSPORT_NAME,
                            origin,
                            payload: Bytes::from(publish.payload.to_vec()),
                        };
                        if inbound.send(item).await.is_err() {
                            break;
                        }
                    }
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        info!(target: "dms.transport", "mqtt connected");
                    }
                    Ok(_) => {}
                    Err(err) => {
                        warn!(target: "dms.transport", error = %err, "mqtt eventloop error");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        });
        Ok(())
    }

    async fn disconnect(&self) {
        self.cancel.cancel();
        if let Some(client) = self.client.lock().await.take() {
            let _ = client.disconnect().await;
        }
    }

    async fn send(&self, address: &str, frame: Bytes) -> Result<(), TransportError> {
        let guard = self.client.lock().await;
        let client = guard
            .as_ref()
            .ok_or_else(|| TransportError::NotConnected(address.to_string()))?;
        client
            .publish(agent_topic(address), QoS::AtLeastOnce, false, frame.to_vec())
            .await
            .map_err(|err| TransportError::Connection(err.to_string()))?;
        dms_telemetry::record_frame_out();
        Ok(())
    }
}

fn uuid_suffix() -> String {
    // 连接标识只要求进程内唯一，时间戳足够
    format!(
        "{:x}",
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos()
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn topic_layout() {
        assert_eq!(agent_topic("os::0044-SN1"), "usp/agent/os::0044-SN1");
    }

    #[test]
    fn endpoint_parsed_from_controller_topic() {
        assert_eq!(
            endpoint_from_topic("usp/controller/os::0044-SN1").as_deref(),
            Some("os::0044-SN1")
        );
        assert!(endpoint_from_topic("usp/agent/os::0044-SN1").is_none());
    }
}

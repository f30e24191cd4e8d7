//! STOMP 队列适配器（QueueBroker）。
//!
//! 控制器订阅单一应答队列 `/queue/openusp/controller/in`；
//! 向 Agent 发送走 `/queue/openusp/agent/{endpoint}/in`。
//! 入站帧的端点 ID 优先取 `endpoint-id` 头，退化时从目的队列解析。
//! 每 (地址, 方向) 保序由 broker 队列语义保证。

use crate::error::TransportError;
use crate::stomp::{encode_frame, read_frame, StompFrame};
use crate::types::{InboundFrame, MtpConfig, MtpCredentials};
use crate::MtpTransport;
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const TRANSPORT_NAME: &str = "queue_broker";
const CONTROLLER_QUEUE: &str = "/queue/openusp/controller/in";

fn agent_queue(endpoint: &str) -> String {
    format!("/queue/openusp/agent/{}/in", endpoint)
}

/// 从目的队列名提取端点 ID（`/queue/openusp/agent/{endpoint}/...`）。
fn endpoint_from_destination(destination: &str) -> Option<String> {
    let parts: Vec<&str> = destination.split('/').filter(|p| !p.is_empty()).collect();
    let index = parts.iter().position(|part| *part == "agent")?;
    parts.get(index + 1).map(|part| part.to_string())
}

/// STOMP 队列适配器
pub struct QueueBrokerTransport {
    config: MtpConfig,
    inbound: mpsc::Sender<InboundFrame>,
    writer: Arc<Mutex<Option<OwnedWriteHalf>>>,
    cancel: CancellationToken,
}

impl QueueBrokerTransport {
    pub fn new(config: MtpConfig, inbound: mpsc::Sender<InboundFrame>) -> Self {
        Self {
            config,
            inbound,
            writer: Arc::new(Mutex::new(None)),
            cancel: CancellationToken::new(),
        }
    }

    /// 连接并完成 STOMP 握手 + 订阅，返回读半部。
    async fn open_session(
        config: &MtpConfig,
        writer_slot: &Arc<Mutex<Option<OwnedWriteHalf>>>,
    ) -> Result<BufReader<tokio::net::tcp::OwnedReadHalf>, TransportError> {
        let stream = TcpStream::connect(&config.endpoint).await?;
        let (read_half, mut write_half) = stream.into_split();
        let mut reader = BufReader::new(read_half);

        let mut connect = StompFrame::new("CONNECT")
            .header("accept-version", "1.2")
            .header("host", &config.endpoint)
            .header(
                "heart-beat",
                &format!("{},{}", config.keepalive_seconds * 1_000, 0),
            );
        if let Some(MtpCredentials::UserSecret { user, secret }) = &config.credentials {
            connect = connect.header("login", user).header("passcode", secret);
        }
        write_half.write_all(&encode_frame(&connect)).await?;

        match read_frame(&mut reader).await? {
            Some(frame) if frame.command == "CONNECTED" => {}
            Some(frame) => {
                return Err(TransportError::Connection(format!(
                    "broker refused: {}",
                    frame.header_value("message").unwrap_or(&frame.command)
                )));
            }
            None => {
                return Err(TransportError::Connection(
                    "broker closed during handshake".to_string(),
                ));
            }
        }

        let subscribe = StompFrame::new("SUBSCRIBE")
            .header("id", "0")
            .header("destination", CONTROLLER_QUEUE)
            .header("ack", "auto");
        write_half.write_all(&encode_frame(&subscribe)).await?;

        *writer_slot.lock().await = Some(write_half);
        Ok(reader)
    }
}

#[async_trait]
impl MtpTransport for QueueBrokerTransport {
    fn name(&self) -> &'static str {
        TRANSPORT_NAME
    }

    async fn connect(&self) -> Result<(), TransportError> {
        let config = self.config.clone();
        let inbound = self.inbound.clone();
        let writer_slot = Arc::clone(&self.writer);
        let cancel = self.cancel.clone();

        tokio::spawn(async move {
            let mut attempt: u32 = 0;
            loop {
                if cancel.is_cancelled() {
                    break;
                }
                match Self::open_session(&config, &writer_slot).await {
                    Ok(mut reader) => {
                        info!(target: "dms.transport", endpoint = %config.endpoint, "stomp connected");
                        attempt = 0;
                        loop {
                            let frame = tokio::select! {
                                _ = cancel.cancelled() => return,
                                frame = read_frame(&mut reader) => frame,
                            };
                            match frame {
                                Ok(Some(frame)) if frame.command == "MESSAGE" => {
                                    let origin = frame
                                        .header_value("endpoint-id")
                                        .map(|value| value.to_string())
                                        .or_else(|| {
                                            frame
                                                .header_value("destination")
                                                .and_then(endpoint_from_destination)
                                        })
                                        .unwrap_or_default();
                                    dms_telemetry::record_frame_in();
                                    let item = InboundFrame {
                                        transport: TRANSPORT_NAME,
                                        origin,
                                        payload: Bytes::from(frame.body),
                                    };
                                    if inbound.send(item).await.is_err() {
                                        return;
                                    }
                                }
                                Ok(Some(frame)) if frame.command == "ERROR" => {
                                    warn!(
                                        target: "dms.transport",
                                        message = frame.header_value("message").unwrap_or(""),
                                        "stomp error frame"
                                    );
                                }
                                Ok(Some(frame)) => {
                                    debug!(target: "dms.transport", command = %frame.command, "stomp frame ignored");
                                }
                                Ok(None) => break,
                                Err(err) => {
                                    warn!(target: "dms.transport", error = %err, "stomp read failed");
                                    break;
                                }
                            }
                        }
                        writer_slot.lock().await.take();
                    }
                    Err(err) => {
                        warn!(target: "dms.transport", error = %err, "stomp connect failed");
                    }
                }
                let delay = config.reconnect.delay(attempt);
                attempt = attempt.saturating_add(1);
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        });
        Ok(())
    }

    async fn disconnect(&self) {
        self.cancel.cancel();
        if let Some(mut writer) = self.writer.lock().await.take() {
            let _ = writer
                .write_all(&encode_frame(&StompFrame::new("DISCONNECT")))
                .await;
        }
    }

    async fn send(&self, address: &str, frame: Bytes) -> Result<(), TransportError> {
        let mut guard = self.writer.lock().await;
        let writer = guard
            .as_mut()
            .ok_or_else(|| TransportError::NotConnected(address.to_string()))?;
        let send = StompFrame::new("SEND")
            .header("destination", &agent_queue(address))
            .body(frame.to_vec());
        writer.write_all(&encode_frame(&send)).await?;
        writer.flush().await?;
        dms_telemetry::record_frame_out();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn agent_queue_layout() {
        assert_eq!(agent_queue("os::0044-SN1"), "/queue/openusp/agent/os::0044-SN1/in");
    }

    #[test]
    fn endpoint_parsed_from_destination() {
        assert_eq!(
            endpoint_from_destination("/queue/openusp/agent/os::0044-SN1/out").as_deref(),
            Some("os::0044-SN1")
        );
        assert!(endpoint_from_destination("/queue/other").is_none());
    }
}

//! WebSocket 常连接适配器（PersistentSocket）。
//!
//! Agent 侧发起升级连接（NAT 后的设备无法被动拨入），路径为
//! `/usp/agent/{endpoint}`；控制器按端点 ID 维护连接表，出站帧
//! 查表写入对应连接。保活由周期 Ping 完成；每连接全双工保序。

use crate::error::TransportError;
use crate::types::{InboundFrame, MtpConfig};
use crate::MtpTransport;
use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

const TRANSPORT_NAME: &str = "websocket";

/// 从升级路径提取端点 ID（`/usp/agent/{endpoint}`）。
fn endpoint_from_path(path: &str) -> Option<String> {
    let rest = path.strip_prefix("/usp/agent/")?;
    if rest.is_empty() {
        return None;
    }
    Some(rest.trim_end_matches('/').to_string())
}

/// WebSocket 常连接适配器
pub struct WebSocketTransport {
    config: MtpConfig,
    inbound: mpsc::Sender<InboundFrame>,
    connections: Arc<DashMap<String, mpsc::Sender<Message>>>,
    cancel: CancellationToken,
}

impl WebSocketTransport {
    pub fn new(config: MtpConfig, inbound: mpsc::Sender<InboundFrame>) -> Self {
        Self {
            config,
            inbound,
            connections: Arc::new(DashMap::new()),
            cancel: CancellationToken::new(),
        }
    }

    async fn handle_connection(
        stream: TcpStream,
        inbound: mpsc::Sender<InboundFrame>,
        connections: Arc<DashMap<String, mpsc::Sender<Message>>>,
        keepalive: Duration,
        cancel: CancellationToken,
    ) {
        // 在握手回调里取出升级路径
        let endpoint_slot = Arc::new(std::sync::Mutex::new(None::<String>));
        let endpoint_capture = Arc::clone(&endpoint_slot);
        let callback = move |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
            match endpoint_from_path(request.uri().path()) {
                Some(endpoint) => {
                    if let Ok(mut slot) = endpoint_capture.lock() {
                        *slot = Some(endpoint);
                    }
                    Ok(response)
                }
                None => Err(ErrorResponse::new(Some("unknown path".to_string()))),
            }
        };

        let ws_stream = match tokio_tungstenite::accept_hdr_async(stream, callback).await {
            Ok(ws_stream) => ws_stream,
            Err(err) => {
                warn!(target: "dms.transport", error = %err, "websocket upgrade failed");
                return;
            }
        };
        let Some(endpoint) = endpoint_slot.lock().ok().and_then(|slot| slot.clone()) else {
            return;
        };
        info!(target: "dms.transport", endpoint = %endpoint, "websocket agent connected");

        let (mut sink, mut source) = ws_stream.split();
        let (sender, mut outbound) = mpsc::channel::<Message>(64);
        connections.insert(endpoint.clone(), sender);

        // 写任务：出站帧 + 保活 Ping
        let write_endpoint = endpoint.clone();
        let write_cancel = cancel.clone();
        let writer = tokio::spawn(async move {
            let mut keepalive_timer = tokio::time::interval(keepalive);
            loop {
                tokio::select! {
                    _ = write_cancel.cancelled() => break,
                    message = outbound.recv() => {
                        let Some(message) = message else { break };
                        if sink.send(message).await.is_err() {
                            break;
                        }
                    }
                    _ = keepalive_timer.tick() => {
                        if sink.send(Message::Ping(Vec::new())).await.is_err() {
                            break;
                        }
                    }
                }
            }
            let _ = sink.close().await;
            write_endpoint
        });

        // 读循环：二进制帧推给引擎
        loop {
            let message = tokio::select! {
                _ = cancel.cancelled() => break,
                message = source.next() => message,
            };
            match message {
                Some(Ok(Message::Binary(payload))) => {
                    dms_telemetry::record_frame_in();
                    let item = InboundFrame {
                        transport: TRANSPORT_NAME,
                        origin: endpoint.clone(),
                        payload: Bytes::from(payload),
                    };
                    if inbound.send(item).await.is_err() {
                        break;
                    }
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(err)) => {
                    warn!(target: "dms.transport", endpoint = %endpoint, error = %err, "websocket read failed");
                    break;
                }
            }
        }

        connections.remove(&endpoint);
        writer.abort();
        info!(target: "dms.transport", endpoint = %endpoint, "websocket agent disconnected");
    }
}

#[async_trait]
impl MtpTransport for WebSocketTransport {
    fn name(&self) -> &'static str {
        TRANSPORT_NAME
    }

    async fn connect(&self) -> Result<(), TransportError> {
        let listener = TcpListener::bind(&self.config.endpoint).await?;
        info!(target: "dms.transport", addr = %self.config.endpoint, "websocket listening");

        let inbound = self.inbound.clone();
        let connections = Arc::clone(&self.connections);
        let keepalive = Duration::from_secs(self.config.keepalive_seconds.max(5));
        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            loop {
                let accepted = tokio::select! {
                    _ = cancel.cancelled() => break,
                    accepted = listener.accept() => accepted,
                };
                match accepted {
                    Ok((stream, _peer)) => {
                        tokio::spawn(Self::handle_connection(
                            stream,
                            inbound.clone(),
                            Arc::clone(&connections),
                            keepalive,
                            cancel.clone(),
                        ));
                    }
                    Err(err) => {
                        warn!(target: "dms.transport", error = %err, "websocket accept failed");
                    }
                }
            }
        });
        Ok(())
    }

    async fn disconnect(&self) {
        self.cancel.cancel();
        self.connections.clear();
    }

    async fn send(&self, address: &str, frame: Bytes) -> Result<(), TransportError> {
        let sender = self
            .connections
            .get(address)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| TransportError::NotConnected(address.to_string()))?;
        sender
            .send(Message::Binary(frame.to_vec()))
            .await
            .map_err(|_| TransportError::NotConnected(address.to_string()))?;
        dms_telemetry::record_frame_out();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_parsed_from_upgrade_path() {
        assert_eq!(
            endpoint_from_path("/usp/agent/os::0044-SN1").as_deref(),
            Some("os::0044-SN1")
        );
        assert!(endpoint_from_path("/other").is_none());
        assert!(endpoint_from_path("/usp/agent/").is_none());
    }
}

//! UDP 报文适配器（Datagram）。
//!
//! 一帧一报文，天然定界；无连接、不保序。发送失败重试一次，
//! 仍失败报 [`TransportError::Timeout`]。入站帧的 `origin` 为
//! 报文源地址（`ip:port`），引擎据此更新 Agent 的应答地址。

use crate::error::TransportError;
use crate::types::{InboundFrame, MtpConfig};
use crate::MtpTransport;
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

const TRANSPORT_NAME: &str = "datagram";
const MAX_DATAGRAM: usize = 64 * 1024;

/// UDP 报文适配器
pub struct DatagramTransport {
    config: MtpConfig,
    inbound: mpsc::Sender<InboundFrame>,
    socket: Arc<Mutex<Option<Arc<UdpSocket>>>>,
    cancel: CancellationToken,
}

impl DatagramTransport {
    pub fn new(config: MtpConfig, inbound: mpsc::Sender<InboundFrame>) -> Self {
        Self {
            config,
            inbound,
            socket: Arc::new(Mutex::new(None)),
            cancel: CancellationToken::new(),
        }
    }
}

#[async_trait]
impl MtpTransport for DatagramTransport {
    fn name(&self) -> &'static str {
        TRANSPORT_NAME
    }

    async fn connect(&self) -> Result<(), TransportError> {
        let socket = Arc::new(UdpSocket::bind(&self.config.endpoint).await?);
        info!(target: "dms.transport", addr = %self.config.endpoint, "datagram listening");
        *self.socket.lock().await = Some(Arc::clone(&socket));

        let inbound = self.inbound.clone();
        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            let mut buf = vec![0u8; MAX_DATAGRAM];
            loop {
                let received = tokio::select! {
                    _ = cancel.cancelled() => break,
                    received = socket.recv_from(&mut buf) => received,
                };
                match received {
                    Ok((len, peer)) => {
                        dms_telemetry::record_frame_in();
                        let item = InboundFrame {
                            transport: TRANSPORT_NAME,
                            origin: peer.to_string(),
                            payload: Bytes::copy_from_slice(&buf[..len]),
                        };
                        if inbound.send(item).await.is_err() {
                            break;
                        }
                    }
                    Err(err) => {
                        warn!(target: "dms.transport", error = %err, "datagram recv failed");
                    }
                }
            }
        });
        Ok(())
    }

    async fn disconnect(&self) {
        self.cancel.cancel();
        self.socket.lock().await.take();
    }

    async fn send(&self, address: &str, frame: Bytes) -> Result<(), TransportError> {
        let socket = {
            let guard = self.socket.lock().await;
            guard
                .as_ref()
                .cloned()
                .ok_or_else(|| TransportError::NotConnected(address.to_string()))?
        };
        // 发送失败重试一次
        if let Err(err) = socket.send_to(&frame, address).await {
            warn!(target: "dms.transport", error = %err, peer = %address, "datagram send retry");
            socket.send_to(&frame, address).await.map_err(|err| {
                TransportError::Timeout(format!("send to {} failed: {}", address, err))
            })?;
        }
        dms_telemetry::record_frame_out();
        Ok(())
    }
}

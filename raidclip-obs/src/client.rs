use crate::error::{LinkError, Result};
use crate::models::*;
use crate::session::{ObsConnector, ObsSession};
use async_trait::async_trait;
use obws::Client;
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Opens OBS WebSocket v5 sessions with `obws`.
#[derive(Debug, Default, Clone)]
pub struct ObwsConnector;

#[async_trait]
impl ObsConnector for ObwsConnector {
    async fn handshake(&self, instance: &ObsInstance) -> Result<()> {
        debug!("[ObsLink] TCP handshake with {}:{}", instance.host, instance.port);
        TcpStream::connect((instance.host.as_str(), instance.port))
            .await
            .map_err(|e| {
                LinkError::Transport(format!("{}:{} unreachable: {}", instance.host, instance.port, e))
            })?;
        Ok(())
    }

    async fn login(&self, instance: &ObsInstance) -> Result<Arc<dyn ObsSession>> {
        info!("[ObsLink] Identifying with OBS at {}:{}", instance.host, instance.port);

        let client = Client::connect(&instance.host, instance.port, instance.password.as_deref())
            .await
            .map_err(LinkError::from_connect)?;

        Ok(Arc::new(ObwsSession::new(client)))
    }
}

/// One live `obws` client. Once closed every call fails with `NotReady`.
pub struct ObwsSession {
    client: RwLock<Option<Client>>,
}

impl ObwsSession {
    pub fn new(client: Client) -> Self {
        Self {
            client: RwLock::new(Some(client)),
        }
    }
}

#[async_trait]
impl ObsSession for ObwsSession {
    async fn version(&self) -> Result<ObsVersion> {
        let client_guard = self.client.read().await;
        match client_guard.as_ref() {
            Some(client) => {
                let version = client.general().version().await?;
                Ok(ObsVersion {
                    obs_version: version.obs_version.to_string(),
                    websocket_version: version.obs_web_socket_version.to_string(),
                })
            }
            None => Err(LinkError::NotReady),
        }
    }

    async fn stop_stream(&self) -> Result<()> {
        let client_guard = self.client.read().await;
        match client_guard.as_ref() {
            Some(client) => {
                client.streaming().stop().await?;
                Ok(())
            }
            None => Err(LinkError::NotReady),
        }
    }

    async fn stream_status(&self) -> Result<ObsStreamStatus> {
        let client_guard = self.client.read().await;
        match client_guard.as_ref() {
            Some(client) => {
                let status = client.streaming().status().await?;
                Ok(ObsStreamStatus {
                    is_streaming: status.active,
                    stream_time_ms: if status.active { Some(status.duration.whole_milliseconds() as u64) } else { None },
                    bytes_sent: Some(status.bytes),
                })
            }
            None => Err(LinkError::NotReady),
        }
    }

    async fn set_current_scene(&self, scene_name: &str) -> Result<()> {
        let client_guard = self.client.read().await;
        match client_guard.as_ref() {
            Some(client) => {
                client.scenes().set_current_program_scene(scene_name).await?;
                Ok(())
            }
            None => Err(LinkError::NotReady),
        }
    }

    async fn close(&self) {
        if let Some(mut client) = self.client.write().await.take() {
            client.disconnect().await;
            info!("[ObsLink] Session closed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::{SinkExt, StreamExt};
    use std::net::SocketAddr;
    use tokio::net::TcpListener;
    use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
    use tokio_tungstenite::tungstenite::protocol::CloseFrame;
    use tokio_tungstenite::tungstenite::Message;

    const HELLO_WITH_AUTH: &str = r#"{"op":0,"d":{"obsWebSocketVersion":"5.5.0","rpcVersion":1,"authentication":{"challenge":"+IxH4CnCiqpX1rM9scsNynZzbOe4KhDeYcTNS3PDaeY=","salt":"lM1GncleQOaCu9lT1yeUZhFYnqhsLLP1G5lAGo3ixaI="}}}"#;

    /// Accepts one websocket client, greets it with an auth challenge, reads
    /// its Identify, then closes with `code`.
    async fn fake_obs(code: u16, reason: &'static str) -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(tcp).await.unwrap();
            ws.send(Message::text(HELLO_WITH_AUTH)).await.unwrap();
            let identify = ws.next().await.unwrap().unwrap();
            assert!(identify.to_text().unwrap().contains("\"op\":1"));
            ws.send(Message::Close(Some(CloseFrame {
                code: CloseCode::from(code),
                reason: reason.into(),
            })))
            .await
            .unwrap();
            // Drain until the client hangs up.
            while let Some(Ok(_)) = ws.next().await {}
        });
        addr
    }

    fn instance(addr: SocketAddr, password: Option<&str>) -> ObsInstance {
        ObsInstance {
            host: addr.ip().to_string(),
            port: addr.port(),
            password: password.map(str::to_string),
        }
    }

    #[tokio::test]
    async fn test_wrong_password_is_auth_failed() {
        let addr = fake_obs(4009, "Authentication failed.").await;
        let err = ObwsConnector.login(&instance(addr, Some("wrong"))).await.err().unwrap();
        assert_eq!(err, LinkError::AuthFailed("Authentication failed.".into()));
    }

    #[tokio::test]
    async fn test_missing_password_is_auth_failed() {
        let addr = fake_obs(4009, "Authentication failed.").await;
        let err = ObwsConnector.login(&instance(addr, None)).await.err().unwrap();
        assert!(matches!(err, LinkError::AuthFailed(_)), "got {:?}", err);
    }

    #[tokio::test]
    async fn test_other_handshake_close_is_transport() {
        // 4010: unsupported RPC version
        let addr = fake_obs(4010, "Unsupported RPC version.").await;
        let err = ObwsConnector.login(&instance(addr, Some("pw"))).await.err().unwrap();
        assert!(matches!(err, LinkError::Transport(_)), "got {:?}", err);
    }

    #[tokio::test]
    async fn test_handshake_refused_port_is_transport() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let err = ObwsConnector.handshake(&instance(addr, None)).await.unwrap_err();
        assert!(matches!(err, LinkError::Transport(_)));
    }
}

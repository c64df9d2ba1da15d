//! WebSocket 传输实现
//!
//! 每条链路对应一个后台泵任务：出站帧序列化为 JSON 文本消息，入站文本消息
//! 解析为帧。任一方向结束时泵任务退出，核心据此判断链路断开。

use application::{Connector, Frame, RemoteEnd, TransportError, TransportLink};
use async_trait::async_trait;
use config::{AuthConfig, AuthStrategy, RealtimeConfig};
use futures_util::{SinkExt, StreamExt};
use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// 基于 tokio-tungstenite 的连接器
#[derive(Debug, Clone)]
pub struct WebSocketConnector {
    endpoint: String,
    auth: AuthConfig,
    buffer: usize,
}

impl WebSocketConnector {
    pub fn new(endpoint: impl Into<String>, auth: AuthConfig, buffer: usize) -> Self {
        Self {
            endpoint: endpoint.into(),
            auth,
            buffer: buffer.max(1),
        }
    }

    pub fn from_config(config: &RealtimeConfig) -> Self {
        Self::new(
            config.endpoint.url.clone(),
            config.auth.clone(),
            config.channel.outbound_buffer,
        )
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// 按认证策略构造握手请求
    fn request(&self) -> Result<Request, TransportError> {
        let token = self.auth.token.as_deref().filter(|token| !token.is_empty());

        let url = match (self.auth.strategy, token) {
            (AuthStrategy::Query, Some(token)) => {
                with_query_token(&self.endpoint, &self.auth.query_param, token)
            }
            _ => self.endpoint.clone(),
        };

        let mut request = url
            .into_client_request()
            .map_err(|err| TransportError::Handshake(err.to_string()))?;

        if let (AuthStrategy::Bearer, Some(token)) = (self.auth.strategy, token) {
            let value = HeaderValue::from_str(&format!("Bearer {token}"))
                .map_err(|err| TransportError::Handshake(err.to_string()))?;
            request.headers_mut().insert(AUTHORIZATION, value);
        }

        Ok(request)
    }
}

#[async_trait]
impl Connector for WebSocketConnector {
    async fn connect(&self) -> Result<TransportLink, TransportError> {
        let request = self.request()?;
        let (ws, response) = connect_async(request).await.map_err(connect_error)?;
        info!(endpoint = %self.endpoint, status = %response.status(), "websocket connected");

        let (link, remote) = TransportLink::pair(self.buffer);
        tokio::spawn(pump(ws, remote));
        Ok(link)
    }
}

/// 把令牌作为查询参数附加到端点上
pub fn with_query_token(endpoint: &str, param: &str, token: &str) -> String {
    let separator = if endpoint.contains('?') { '&' } else { '?' };
    format!(
        "{endpoint}{separator}{}={}",
        utf8_percent_encode(param, NON_ALPHANUMERIC),
        utf8_percent_encode(token, NON_ALPHANUMERIC)
    )
}

fn connect_error(err: WsError) -> TransportError {
    match err {
        WsError::Io(err) => TransportError::Refused(err.to_string()),
        WsError::Http(response) => {
            TransportError::Handshake(format!("server responded {}", response.status()))
        }
        WsError::ConnectionClosed | WsError::AlreadyClosed => TransportError::Closed,
        other => TransportError::Handshake(other.to_string()),
    }
}

/// 在 WebSocket 与链路通道之间搬运帧
async fn pump(ws: WsStream, remote: RemoteEnd) {
    let RemoteEnd { mut sent, deliver } = remote;
    let (mut sink, mut stream) = ws.split();

    loop {
        tokio::select! {
            outbound = sent.recv() => match outbound {
                Some(frame) => {
                    let text = match serde_json::to_string(&frame) {
                        Ok(text) => text,
                        Err(err) => {
                            warn!(event = %frame.event, error = %err, "failed to encode frame");
                            continue;
                        }
                    };
                    if let Err(err) = sink.send(Message::text(text)).await {
                        warn!(error = %err, "websocket send failed");
                        break;
                    }
                }
                None => {
                    // 本端主动关闭
                    let _ = sink.send(Message::Close(None)).await;
                    break;
                }
            },
            inbound = stream.next() => match inbound {
                Some(Ok(Message::Text(text))) => match serde_json::from_str::<Frame>(text.as_str()) {
                    Ok(frame) => {
                        if deliver.send(frame).await.is_err() {
                            break;
                        }
                    }
                    Err(err) => warn!(error = %err, "dropping unparseable websocket message"),
                },
                Some(Ok(Message::Close(reason))) => {
                    debug!(?reason, "websocket closed by peer");
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(err)) => {
                    warn!(error = %err, "websocket receive failed");
                    break;
                }
                None => break,
            },
        }
    }

    debug!("websocket pump stopped");
}

use std::sync::Arc;

use application::RealtimeClient;
use config::{ConfigError, RealtimeConfig};
use thiserror::Error;
use tracing::info;

use crate::websocket::WebSocketConnector;

#[derive(Debug, Error)]
pub enum InfrastructureError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("unsupported endpoint `{0}`, expected ws:// or wss://")]
    UnsupportedEndpoint(String),
}

/// 由配置组装出的基础设施
#[derive(Clone)]
pub struct Infrastructure {
    pub config: RealtimeConfig,
    pub connector: Arc<WebSocketConnector>,
}

impl Infrastructure {
    /// 从默认值、配置文件与环境变量加载
    pub fn from_env() -> Result<Self, InfrastructureError> {
        Self::new(RealtimeConfig::load()?)
    }

    pub fn new(config: RealtimeConfig) -> Result<Self, InfrastructureError> {
        config.validate_all()?;

        let url = config.endpoint.url.as_str();
        if !(url.starts_with("ws://") || url.starts_with("wss://")) {
            return Err(InfrastructureError::UnsupportedEndpoint(url.to_string()));
        }

        let connector = Arc::new(WebSocketConnector::from_config(&config));
        info!(config = %config.sanitize(), "infrastructure ready");
        Ok(Self { config, connector })
    }

    /// 启动实时客户端（需要在 tokio 运行时内调用）
    pub fn start_client(&self) -> RealtimeClient {
        RealtimeClient::start(self.connector.clone(), &self.config)
    }
}

//! 统一配置中心
//!
//! 提供实时同步核心的构造期配置，包括：
//! - 通道端点
//! - 认证令牌附加方式
//! - 重连策略
//! - 在线状态同步与通道缓冲
//!
//! 加载优先级：默认值 -> 可选配置文件（`REALTIME_CONFIG_FILE`）-> 环境变量（`REALTIME_*`）

use figment::providers::{Env, Format, Json, Serialized, Toml, Yaml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;
use validator::Validate;

/// 全局实时配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct RealtimeConfig {
    /// 通道端点
    #[validate(nested)]
    pub endpoint: EndpointConfig,
    /// 认证配置
    #[serde(default)]
    pub auth: AuthConfig,
    /// 重连策略
    #[validate(nested)]
    pub reconnect: ReconnectPolicy,
    /// 在线状态配置
    #[serde(default)]
    pub presence: PresenceConfig,
    /// 通道缓冲配置
    #[validate(nested)]
    pub channel: ChannelConfig,
}

/// 端点配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct EndpointConfig {
    #[validate(url)]
    pub url: String,
}

/// 认证令牌附加方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthStrategy {
    /// 不附加令牌
    #[default]
    None,
    /// 作为查询参数附加
    Query,
    /// 作为 `Authorization: Bearer` 请求头附加
    Bearer,
}

/// 认证配置
///
/// 令牌对核心来说是不透明的，只在建立连接时附加。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthConfig {
    #[serde(default)]
    pub strategy: AuthStrategy,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default = "default_query_param")]
    pub query_param: String,
}

fn default_query_param() -> String {
    "token".to_string()
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            strategy: AuthStrategy::None,
            token: None,
            query_param: default_query_param(),
        }
    }
}

/// 重连策略
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct ReconnectPolicy {
    /// 连续失败的最大次数，达到后停止自动重连
    #[validate(range(min = 1))]
    pub max_attempts: u32,
    /// 退避基准延迟（毫秒）
    #[validate(range(min = 1))]
    pub base_delay_ms: u64,
    /// 退避延迟上限（毫秒）
    #[validate(range(min = 1))]
    pub cap_delay_ms: u64,
    /// 抖动比例，0 表示不抖动
    #[validate(range(min = 0.0, max = 1.0))]
    pub jitter_ratio: f64,
    /// 单次建立连接的超时（毫秒）
    #[validate(range(min = 1))]
    pub connect_timeout_ms: u64,
}

impl ReconnectPolicy {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn cap_delay(&self) -> Duration {
        Duration::from_millis(self.cap_delay_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay_ms: 1_000,
            cap_delay_ms: 10_000,
            jitter_ratio: 0.2,
            connect_timeout_ms: 5_000,
        }
    }
}

/// 在线状态配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PresenceConfig {
    /// 每次（重新）连接成功后主动请求全量在线列表
    #[serde(default = "default_true")]
    pub request_sync_on_connect: bool,
}

fn default_true() -> bool {
    true
}

impl Default for PresenceConfig {
    fn default() -> Self {
        Self {
            request_sync_on_connect: true,
        }
    }
}

/// 通道缓冲配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct ChannelConfig {
    /// 每个入站事件的多播缓冲
    #[validate(range(min = 1))]
    pub event_buffer: usize,
    /// 出站帧缓冲
    #[validate(range(min = 1))]
    pub outbound_buffer: usize,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            event_buffer: 256,
            outbound_buffer: 64,
        }
    }
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            endpoint: EndpointConfig {
                url: "ws://127.0.0.1:3000/realtime".to_string(),
            },
            auth: AuthConfig::default(),
            reconnect: ReconnectPolicy::default(),
            presence: PresenceConfig::default(),
            channel: ChannelConfig::default(),
        }
    }
}

impl RealtimeConfig {
    /// 按 默认值 -> 配置文件 -> 环境变量 的顺序加载并校验
    pub fn load() -> Result<Self, ConfigError> {
        let mut fig = Figment::from(Serialized::defaults(RealtimeConfig::default()));
        if let Ok(path) = env::var("REALTIME_CONFIG_FILE") {
            fig = merge_file(fig, &path);
        }
        Self::from_figment(fig.merge(Env::prefixed("REALTIME_").split("__")))
    }

    /// 只从指定文件加载（不读取环境变量）
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let fig = Figment::from(Serialized::defaults(RealtimeConfig::default()));
        Self::from_figment(merge_file(fig, path))
    }

    fn from_figment(fig: Figment) -> Result<Self, ConfigError> {
        let mut config: RealtimeConfig = fig.extract().map_err(Box::new)?;
        if config.auth.token.is_none() {
            config.auth.token = env::var("REALTIME_AUTH_TOKEN").ok();
        }
        config.validate_all()?;
        Ok(config)
    }

    /// 字段校验加跨字段校验
    pub fn validate_all(&self) -> Result<(), ConfigError> {
        // NaN 能通过 range 校验，需单独拦下
        if !self.reconnect.jitter_ratio.is_finite() {
            return Err(ConfigError::InvalidReconnectPolicy(format!(
                "jitter ratio {} is not a finite number",
                self.reconnect.jitter_ratio
            )));
        }

        self.validate()?;

        if self.reconnect.base_delay_ms > self.reconnect.cap_delay_ms {
            return Err(ConfigError::InvalidReconnectPolicy(format!(
                "base delay {}ms exceeds cap {}ms",
                self.reconnect.base_delay_ms, self.reconnect.cap_delay_ms
            )));
        }

        if self.auth.strategy != AuthStrategy::None
            && self.auth.token.as_deref().map_or(true, str::is_empty)
        {
            return Err(ConfigError::MissingAuthToken);
        }

        Ok(())
    }

    /// 日志用的脱敏表示
    pub fn sanitize(&self) -> String {
        format!(
            "endpoint={} auth={:?} token={} max_attempts={} base={}ms cap={}ms timeout={}ms",
            self.endpoint.url,
            self.auth.strategy,
            if self.auth.token.is_some() { "***" } else { "-" },
            self.reconnect.max_attempts,
            self.reconnect.base_delay_ms,
            self.reconnect.cap_delay_ms,
            self.reconnect.connect_timeout_ms,
        )
    }
}

fn merge_file(fig: Figment, path: &str) -> Figment {
    if path.ends_with(".yml") || path.ends_with(".yaml") {
        fig.merge(Yaml::file(path))
    } else if path.ends_with(".json") {
        fig.merge(Json::file(path))
    } else {
        fig.merge(Toml::file(path))
    }
}

/// 配置错误类型
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] Box<figment::Error>),
    #[error("Invalid configuration: {0}")]
    Validation(#[from] validator::ValidationErrors),
    #[error("Invalid reconnect policy: {0}")]
    InvalidReconnectPolicy(String),
    #[error("Auth strategy requires a token")]
    MissingAuthToken,
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    #[test]
    fn test_defaults_are_valid() {
        let config = RealtimeConfig::default();
        assert!(config.validate_all().is_ok());
        assert_eq!(config.reconnect.max_attempts, 5);
        assert_eq!(config.reconnect.base_delay(), Duration::from_secs(1));
        assert_eq!(config.reconnect.cap_delay(), Duration::from_secs(10));
        assert!(config.presence.request_sync_on_connect);
    }

    #[test]
    fn test_env_overrides_defaults() {
        Jail::expect_with(|jail| {
            jail.set_env("REALTIME_ENDPOINT__URL", "wss://realtime.example.com/socket");
            jail.set_env("REALTIME_RECONNECT__MAX_ATTEMPTS", "8");
            jail.set_env("REALTIME_AUTH__STRATEGY", "bearer");
            jail.set_env("REALTIME_AUTH_TOKEN", "secret-token");

            let config = RealtimeConfig::load().map_err(|e| e.to_string())?;
            assert_eq!(config.endpoint.url, "wss://realtime.example.com/socket");
            assert_eq!(config.reconnect.max_attempts, 8);
            assert_eq!(config.auth.strategy, AuthStrategy::Bearer);
            assert_eq!(config.auth.token.as_deref(), Some("secret-token"));
            Ok(())
        });
    }

    #[test]
    fn test_file_then_env() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "realtime.toml",
                r#"
                [reconnect]
                max_attempts = 3
                base_delay_ms = 200
                cap_delay_ms = 800
                jitter_ratio = 0.0
                connect_timeout_ms = 1000
                "#,
            )?;
            jail.set_env("REALTIME_CONFIG_FILE", "realtime.toml");
            jail.set_env("REALTIME_RECONNECT__CAP_DELAY_MS", "1600");

            let config = RealtimeConfig::load().map_err(|e| e.to_string())?;
            assert_eq!(config.reconnect.max_attempts, 3);
            assert_eq!(config.reconnect.base_delay_ms, 200);
            assert_eq!(config.reconnect.cap_delay_ms, 1600);
            Ok(())
        });
    }

    #[test]
    fn test_base_above_cap_is_rejected() {
        let mut config = RealtimeConfig::default();
        config.reconnect.base_delay_ms = 20_000;
        assert!(matches!(
            config.validate_all(),
            Err(ConfigError::InvalidReconnectPolicy(_))
        ));
    }

    #[test]
    fn test_non_finite_jitter_is_rejected() {
        for ratio in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY] {
            let mut config = RealtimeConfig::default();
            config.reconnect.jitter_ratio = ratio;
            assert!(matches!(
                config.validate_all(),
                Err(ConfigError::InvalidReconnectPolicy(_))
            ));
        }
    }

    #[test]
    fn test_nan_jitter_from_file_is_rejected() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "realtime.toml",
                r#"
                [reconnect]
                jitter_ratio = nan
                "#,
            )?;
            jail.set_env("REALTIME_CONFIG_FILE", "realtime.toml");

            assert!(matches!(
                RealtimeConfig::load(),
                Err(ConfigError::InvalidReconnectPolicy(_))
            ));
            Ok(())
        });
    }

    #[test]
    fn test_field_validation() {
        let mut config = RealtimeConfig::default();
        config.reconnect.jitter_ratio = 1.5;
        assert!(matches!(config.validate_all(), Err(ConfigError::Validation(_))));

        let mut config = RealtimeConfig::default();
        config.endpoint.url = "not a url".to_string();
        assert!(matches!(config.validate_all(), Err(ConfigError::Validation(_))));

        let mut config = RealtimeConfig::default();
        config.reconnect.max_attempts = 0;
        assert!(config.validate_all().is_err());
    }

    #[test]
    fn test_auth_strategy_requires_token() {
        let mut config = RealtimeConfig::default();
        config.auth.strategy = AuthStrategy::Query;
        assert!(matches!(
            config.validate_all(),
            Err(ConfigError::MissingAuthToken)
        ));

        config.auth.token = Some("t".to_string());
        assert!(config.validate_all().is_ok());
    }

    #[test]
    fn test_sanitize_hides_token() {
        let mut config = RealtimeConfig::default();
        config.auth.token = Some("super-secret".to_string());
        let text = config.sanitize();
        assert!(!text.contains("super-secret"));
        assert!(text.contains("***"));
    }
}

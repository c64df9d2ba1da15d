use std::sync::Arc;

use config::RealtimeConfig;
use domain::{PresenceUpdate, UserId, UserStatus};
use tracing::info;

use crate::bridge::{BridgeHandle, EventBridge};
use crate::clock::{Clock, SystemClock};
use crate::connection::ConnectionManager;
use crate::store::{RealtimeAction, Store};
use crate::transport::Connector;

/// 组装好的实时同步核心
///
/// 界面只通过 `dispatch` 与 `store()` 交互，连接管理器对外只读。
pub struct RealtimeClient {
    manager: ConnectionManager,
    store: Arc<Store>,
    bridge: BridgeHandle,
}

impl RealtimeClient {
    /// 用给定的传输连接器启动核心（必须在 tokio 运行时内调用）
    pub fn start(connector: Arc<dyn Connector>, config: &RealtimeConfig) -> Self {
        Self::start_with_clock(connector, config, Arc::new(SystemClock))
    }

    pub fn start_with_clock(
        connector: Arc<dyn Connector>,
        config: &RealtimeConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let manager = ConnectionManager::new(connector, config.reconnect.clone(), &config.channel);
        let store = Arc::new(Store::new());
        let bridge = EventBridge::new(manager.clone(), store.clone(), clock)
            .request_sync_on_connect(config.presence.request_sync_on_connect)
            .start();

        info!(config = %config.sanitize(), "realtime client started");
        Self {
            manager,
            store,
            bridge,
        }
    }

    pub fn dispatch(&self, action: RealtimeAction) {
        self.store.dispatch(action);
    }

    pub fn connect(&self) {
        self.dispatch(RealtimeAction::ConnectRequested);
    }

    pub fn disconnect(&self) {
        self.dispatch(RealtimeAction::DisconnectRequested);
    }

    pub fn announce(&self, user_id: UserId, username: impl Into<String>, status: UserStatus) {
        self.dispatch(RealtimeAction::AnnouncePresence {
            user_id,
            username: username.into(),
            status,
        });
    }

    pub fn update_presence(&self, update: PresenceUpdate) {
        self.dispatch(RealtimeAction::UpdateLocalPresence(update));
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    pub fn manager(&self) -> &ConnectionManager {
        &self.manager
    }

    /// 结束会话：断开通道、停止桥接并把状态恢复为初始值
    pub async fn shutdown(self) {
        self.manager.disconnect().await;
        self.bridge.shutdown().await;
        self.store.dispatch(RealtimeAction::Reset);
        info!("realtime client stopped");
    }
}

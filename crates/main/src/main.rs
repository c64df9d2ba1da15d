//! 主应用程序入口
//!
//! 启动实时同步客户端，连接到配置的通道端点，直到收到 Ctrl-C。

use std::env;

use application::{selectors, StatusIndicator};
use domain::{UserId, UserStatus};
use infrastructure::Infrastructure;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 初始化日志
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let infra = Infrastructure::from_env()?;
    let client = infra.start_client();

    // 可选：以本地用户身份宣告上线
    if let Ok(user_id) = env::var("REALTIME_USER_ID") {
        let username = env::var("REALTIME_USERNAME").unwrap_or_else(|_| user_id.clone());
        client.announce(UserId::new(user_id), username, UserStatus::Online);
    }
    client.connect();

    let mut state = client.store().subscribe();
    let mut last_status = None;
    let mut last_online = 0;
    let mut last_notification = None;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("收到退出信号");
                break;
            }
            changed = state.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = state.borrow_and_update().clone();

                let status = selectors::status_indicator(&snapshot);
                if last_status != Some(status) {
                    match status {
                        StatusIndicator::Connected => tracing::info!("已连接"),
                        StatusIndicator::Connecting => tracing::info!("连接中"),
                        StatusIndicator::Reconnecting { attempt } => {
                            tracing::warn!(attempt, "重连中")
                        }
                        StatusIndicator::Offline => match &snapshot.error {
                            Some(error) => tracing::error!(%error, "已离线"),
                            None => tracing::info!("已离线"),
                        },
                    }
                    last_status = Some(status);
                }

                let online = selectors::online_count(&snapshot);
                if online != last_online {
                    tracing::info!(online, "在线人数变化");
                    last_online = online;
                }

                if let Some(latest) = selectors::recent_notifications(&snapshot, 1).pop() {
                    if last_notification.as_ref() != Some(&latest.id) {
                        tracing::info!(title = %latest.title, message = %latest.message, "新通知");
                        last_notification = Some(latest.id);
                    }
                }
            }
        }
    }

    client.shutdown().await;
    Ok(())
}

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use application::{Connector, Frame, RealtimeState, RemoteEnd, Store, TransportError, TransportLink};
use async_trait::async_trait;
use config::{RealtimeConfig, ReconnectPolicy};
use tokio::sync::mpsc;

/// 连接器每次被调用时的表现
#[derive(Debug, Clone)]
pub enum Step {
    /// 建立链路，远端交给测试
    Accept,
    Fail(TransportError),
    /// 永不返回，由连接超时兜底
    Hang,
}

/// 按脚本依次返回结果的连接器；脚本用完后一律拒绝
pub struct ScriptedConnector {
    steps: Mutex<VecDeque<Step>>,
    accepted: mpsc::UnboundedSender<RemoteEnd>,
    calls: AtomicUsize,
}

impl ScriptedConnector {
    pub fn new(steps: impl IntoIterator<Item = Step>) -> (Arc<Self>, mpsc::UnboundedReceiver<RemoteEnd>) {
        let (accepted, remotes) = mpsc::unbounded_channel();
        let connector = Arc::new(Self {
            steps: Mutex::new(steps.into_iter().collect()),
            accepted,
            calls: AtomicUsize::new(0),
        });
        (connector, remotes)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for ScriptedConnector {
    async fn connect(&self) -> Result<TransportLink, TransportError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let step = self
            .steps
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Step::Fail(TransportError::Refused("script exhausted".into())));

        match step {
            Step::Accept => {
                let (link, remote) = TransportLink::pair(64);
                self.accepted.send(remote).map_err(|_| TransportError::Closed)?;
                Ok(link)
            }
            Step::Fail(err) => Err(err),
            Step::Hang => std::future::pending().await,
        }
    }
}

pub fn policy(max_attempts: u32) -> ReconnectPolicy {
    ReconnectPolicy {
        max_attempts,
        base_delay_ms: 1_000,
        cap_delay_ms: 10_000,
        jitter_ratio: 0.0,
        connect_timeout_ms: 2_000,
    }
}

pub fn config(max_attempts: u32) -> RealtimeConfig {
    RealtimeConfig {
        reconnect: policy(max_attempts),
        ..RealtimeConfig::default()
    }
}

const WAIT: Duration = Duration::from_secs(30);

/// 等待容器状态满足条件
pub async fn wait_for_state(store: &Store, predicate: impl FnMut(&RealtimeState) -> bool) -> RealtimeState {
    let mut receiver = store.subscribe();
    let state = tokio::time::timeout(WAIT, receiver.wait_for(predicate))
        .await
        .expect("timed out waiting for store state")
        .expect("store dropped");
    state.clone()
}

/// 取远端收到的下一帧
pub async fn next_sent(remote: &mut RemoteEnd) -> Frame {
    tokio::time::timeout(WAIT, remote.sent.recv())
        .await
        .expect("timed out waiting for outbound frame")
        .expect("link closed")
}

/// 取下一个被接受的链路远端
pub async fn next_remote(remotes: &mut mpsc::UnboundedReceiver<RemoteEnd>) -> RemoteEnd {
    tokio::time::timeout(WAIT, remotes.recv())
        .await
        .expect("timed out waiting for connection")
        .expect("connector dropped")
}

pub async fn deliver(remote: &RemoteEnd, event: &str, data: serde_json::Value) {
    remote
        .deliver
        .send(Frame::new(event, data))
        .await
        .expect("client end dropped");
}

//! 通道连接管理器
//!
//! 持有唯一的逻辑通道，负责：
//! - 连接生命周期（connect / disconnect / 自动重连）
//! - 连接状态与重连计数的可观察流
//! - 按事件名多播的类型化订阅（`on`）与发送（`emit`）
//!
//! 状态机：
//!
//! ```text
//! disconnected --connect()--> connecting
//! connecting   --成功--> connected                    (attempts := 0)
//! connecting   --失败--> reconnecting | disconnected   (attempts == max)
//! connected    --异常断开--> reconnecting
//! reconnecting --成功--> connected                    (attempts := 0)
//! reconnecting --失败--> reconnecting (退避等待) | disconnected (attempts == max)
//! 任意状态     --disconnect()--> disconnecting --> disconnected
//! ```

use config::{ChannelConfig, ReconnectPolicy};
use domain::ConnectionState;
use futures_util::Stream;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::marker::PhantomData;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::task::{ready, Context, Poll};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::{BroadcastStream, WatchStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::backoff::Backoff;
use crate::error::ConnectionError;
use crate::transport::{Connector, Frame, TransportError, TransportLink};

const TRANSITION_BUFFER: usize = 64;
const ERROR_BUFFER: usize = 16;

/// 一次状态迁移，附带迁移发生时的重连计数
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub state: ConnectionState,
    pub attempts: u32,
}

/// 通道连接管理器，克隆后共享同一条通道
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<Inner>,
}

struct Inner {
    connector: Arc<dyn Connector>,
    policy: ReconnectPolicy,
    backoff: Backoff,
    event_buffer: usize,
    state: watch::Sender<ConnectionState>,
    attempts: watch::Sender<u32>,
    transitions: broadcast::Sender<Transition>,
    errors: broadcast::Sender<ConnectionError>,
    /// 当前链路的发送端，仅在 connected 时存在
    outbound: Mutex<Option<mpsc::Sender<Frame>>>,
    /// 事件名 -> 多播发送端；每个事件名只注册一次
    subscriptions: Mutex<HashMap<String, broadcast::Sender<Delivery>>>,
    /// 入站帧序号，跨事件名单调递增
    inbound_seq: AtomicU64,
    /// 串行化 connect / disconnect
    control: tokio::sync::Mutex<Option<Session>>,
}

/// 投递给监听者的一帧载荷
#[derive(Debug, Clone)]
struct Delivery {
    seq: u64,
    data: Value,
}

struct Session {
    cancel: CancellationToken,
    driver: JoinHandle<()>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl ConnectionManager {
    pub fn new(connector: Arc<dyn Connector>, policy: ReconnectPolicy, channel: &ChannelConfig) -> Self {
        let backoff = Backoff::from_policy(&policy);
        Self::with_backoff(connector, policy, channel, backoff)
    }

    /// 使用自定义退避（例如关闭抖动）
    pub fn with_backoff(
        connector: Arc<dyn Connector>,
        policy: ReconnectPolicy,
        channel: &ChannelConfig,
        backoff: Backoff,
    ) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        let (attempts, _) = watch::channel(0);
        let (transitions, _) = broadcast::channel(TRANSITION_BUFFER);
        let (errors, _) = broadcast::channel(ERROR_BUFFER);

        Self {
            inner: Arc::new(Inner {
                connector,
                policy,
                backoff,
                event_buffer: channel.event_buffer,
                state,
                attempts,
                transitions,
                errors,
                outbound: Mutex::new(None),
                subscriptions: Mutex::new(HashMap::new()),
                inbound_seq: AtomicU64::new(0),
                control: tokio::sync::Mutex::new(None),
            }),
        }
    }

    /// 开始建立连接
    ///
    /// 幂等：只有在 disconnected 时才会发起连接，其他状态下直接返回。
    pub async fn connect(&self) {
        let mut control = self.inner.control.lock().await;
        let current = *self.inner.state.borrow();
        if current != ConnectionState::Disconnected {
            debug!(state = %current, "connect ignored, channel already active");
            return;
        }

        self.inner.attempts.send_replace(0);
        self.inner.set_state(ConnectionState::Connecting);

        let cancel = CancellationToken::new();
        let driver = tokio::spawn(self.inner.clone().drive(cancel.clone()));
        *control = Some(Session { cancel, driver });
    }

    /// 主动断开
    ///
    /// 取消挂起的重连定时器，等待后台任务退出；不会触发自动重连。幂等。
    pub async fn disconnect(&self) {
        let mut control = self.inner.control.lock().await;
        let session = control.take();
        let current = *self.inner.state.borrow();

        if current == ConnectionState::Disconnected {
            // 重试耗尽后后台任务已自行结束
            if let Some(session) = session {
                session.cancel.cancel();
            }
            return;
        }

        self.inner.set_state(ConnectionState::Disconnecting);
        if let Some(session) = session {
            session.cancel.cancel();
            if let Err(err) = session.driver.await {
                warn!(error = %err, "connection driver ended abnormally");
            }
        }

        lock(&self.inner.outbound).take();
        self.inner.attempts.send_replace(0);
        self.inner.set_state(ConnectionState::Disconnected);
        info!("channel disconnected");
    }

    /// 订阅某个事件的类型化载荷
    ///
    /// 同一事件名的多个订阅共享一次注册；最后一个流被丢弃时注册随之释放。
    /// 订阅本身不会触发连接。
    pub fn on<T>(&self, event: &str) -> EventStream<T>
    where
        T: DeserializeOwned,
    {
        let receiver = {
            let mut subscriptions = lock(&self.inner.subscriptions);
            subscriptions
                .entry(event.to_string())
                .or_insert_with(|| {
                    debug!(event, "registering channel listener");
                    broadcast::channel(self.inner.event_buffer).0
                })
                .subscribe()
        };

        EventStream {
            stream: Some(BroadcastStream::new(receiver)),
            event: event.to_string(),
            registry: Arc::downgrade(&self.inner),
            _payload: PhantomData,
        }
    }

    /// 发送一帧
    ///
    /// 未连接时不排队：返回 `Ok(false)` 表示未送出。只有载荷无法序列化时才返回错误。
    pub async fn emit<T>(&self, event: &str, payload: &T) -> Result<bool, ConnectionError>
    where
        T: Serialize + ?Sized,
    {
        let data = serde_json::to_value(payload).map_err(|err| ConnectionError::encode(event, err))?;

        if !self.state().is_connected() {
            debug!(event, "not connected, emit dropped");
            return Ok(false);
        }

        let Some(sender) = lock(&self.inner.outbound).clone() else {
            debug!(event, "no active link, emit dropped");
            return Ok(false);
        };

        match sender.send(Frame::new(event, data)).await {
            Ok(()) => Ok(true),
            Err(_) => {
                debug!(event, "link closed while emitting");
                Ok(false)
            }
        }
    }

    /// 当前连接状态
    pub fn state(&self) -> ConnectionState {
        *self.inner.state.borrow()
    }

    /// 当前重连计数
    pub fn reconnect_attempts(&self) -> u32 {
        *self.inner.attempts.borrow()
    }

    /// 连接状态，新订阅者立即收到最新值
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.subscribe()
    }

    /// 连接状态流（以当前值开始）
    pub fn state_stream(&self) -> WatchStream<ConnectionState> {
        WatchStream::new(self.watch_state())
    }

    /// 重连计数，新订阅者立即收到最新值
    pub fn watch_attempts(&self) -> watch::Receiver<u32> {
        self.inner.attempts.subscribe()
    }

    /// 重连计数流（以当前值开始）
    pub fn attempts_stream(&self) -> WatchStream<u32> {
        WatchStream::new(self.watch_attempts())
    }

    /// 每一次状态迁移（不合并）
    pub fn transitions(&self) -> broadcast::Receiver<Transition> {
        self.inner.transitions.subscribe()
    }

    /// 终止性连接错误
    pub fn errors(&self) -> broadcast::Receiver<ConnectionError> {
        self.inner.errors.subscribe()
    }

    /// 当前注册了监听的事件数
    pub fn listener_count(&self) -> usize {
        lock(&self.inner.subscriptions).len()
    }
}

impl Inner {
    fn set_state(&self, state: ConnectionState) {
        self.state.send_replace(state);
        let _ = self.transitions.send(Transition {
            state,
            attempts: *self.attempts.borrow(),
        });
        trace!(state = %state, "connection state changed");
    }

    /// 后台任务：建立连接、泵入站帧、失败后按退避重连
    async fn drive(self: Arc<Self>, cancel: CancellationToken) {
        let timeout = self.policy.connect_timeout();
        let mut failures: u32 = 0;

        loop {
            let attempt = tokio::select! {
                _ = cancel.cancelled() => return,
                result = tokio::time::timeout(timeout, self.connector.connect()) => result,
            };
            let result = attempt.unwrap_or(Err(TransportError::Timeout(timeout)));

            match result {
                Ok(link) => {
                    if cancel.is_cancelled() {
                        return;
                    }
                    failures = 0;
                    if !self.run_link(link, &cancel).await {
                        return;
                    }

                    // 断线计为第一次失败，挂起的重连即第 1 次尝试
                    failures = 1;
                    self.attempts.send_replace(failures);
                    warn!(attempt = failures, "channel dropped unexpectedly, reconnecting");
                    self.set_state(ConnectionState::Reconnecting);
                    if !sleep_or_cancel(self.backoff.jittered(failures), &cancel).await {
                        return;
                    }
                }
                Err(err) => {
                    if cancel.is_cancelled() {
                        return;
                    }
                    failures += 1;
                    self.attempts.send_replace(failures);

                    if failures >= self.policy.max_attempts {
                        error!(attempts = failures, error = %err, "reconnect attempts exhausted");
                        self.set_state(ConnectionState::Disconnected);
                        let _ = self.errors.send(ConnectionError::RetriesExhausted {
                            attempts: failures,
                            last_error: err,
                        });
                        return;
                    }

                    let delay = self.backoff.jittered(failures);
                    warn!(
                        attempt = failures,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "connection attempt failed"
                    );
                    self.set_state(ConnectionState::Reconnecting);
                    if !sleep_or_cancel(delay, &cancel).await {
                        return;
                    }
                }
            }
        }
    }

    /// 运行一条已建立的链路；返回 `true` 表示链路异常断开，`false` 表示被取消
    async fn run_link(&self, link: TransportLink, cancel: &CancellationToken) -> bool {
        let TransportLink {
            outbound,
            mut inbound,
        } = link;

        self.attempts.send_replace(0);
        *lock(&self.outbound) = Some(outbound);
        self.set_state(ConnectionState::Connected);
        info!("channel connected");

        let dropped = loop {
            tokio::select! {
                _ = cancel.cancelled() => break false,
                frame = inbound.recv() => match frame {
                    Some(frame) => self.deliver(frame),
                    None => break true,
                },
            }
        };

        lock(&self.outbound).take();
        dropped
    }

    fn deliver(&self, frame: Frame) {
        let subscriptions = lock(&self.subscriptions);
        let seq = self.inbound_seq.fetch_add(1, Ordering::Relaxed);
        match subscriptions.get(&frame.event) {
            Some(sender) => {
                let _ = sender.send(Delivery {
                    seq,
                    data: frame.data,
                });
            }
            None => trace!(event = %frame.event, "no listener, frame dropped"),
        }
    }

    /// 在没有订阅者时释放事件注册
    fn release(&self, event: &str) {
        let mut subscriptions = lock(&self.subscriptions);
        if subscriptions
            .get(event)
            .is_some_and(|sender| sender.receiver_count() == 0)
        {
            subscriptions.remove(event);
            debug!(event, "released channel listener");
        }
    }
}

async fn sleep_or_cancel(delay: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(delay) => true,
    }
}

/// `on` 返回的事件流
///
/// 载荷无法解码为 `T` 时产出 `Err`，由调用方决定如何处理；多播缓冲溢出时跳过丢失的帧。
pub struct EventStream<T> {
    stream: Option<BroadcastStream<Delivery>>,
    event: String,
    registry: Weak<Inner>,
    _payload: PhantomData<fn() -> T>,
}

impl<T> EventStream<T> {
    pub fn event(&self) -> &str {
        &self.event
    }

    /// 附带入站序号的流，用于合并多个事件流时恢复到达顺序
    pub fn sequenced(self) -> Sequenced<T> {
        Sequenced { inner: self }
    }
}

impl<T> EventStream<T>
where
    T: DeserializeOwned,
{
    fn poll_delivery(&mut self, cx: &mut Context<'_>) -> Poll<Option<(u64, Result<T, ConnectionError>)>> {
        loop {
            let Some(stream) = self.stream.as_mut() else {
                return Poll::Ready(None);
            };
            match ready!(Pin::new(stream).poll_next(cx)) {
                Some(Ok(Delivery { seq, data })) => {
                    let payload = serde_json::from_value(data)
                        .map_err(|err| ConnectionError::decode(self.event.as_str(), err));
                    return Poll::Ready(Some((seq, payload)));
                }
                Some(Err(BroadcastStreamRecvError::Lagged(skipped))) => {
                    warn!(event = %self.event, skipped, "listener lagged, frames skipped");
                }
                None => return Poll::Ready(None),
            }
        }
    }
}

impl<T> Stream for EventStream<T>
where
    T: DeserializeOwned,
{
    type Item = Result<T, ConnectionError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut()
            .poll_delivery(cx)
            .map(|item| item.map(|(_, payload)| payload))
    }
}

impl<T> Drop for EventStream<T> {
    fn drop(&mut self) {
        self.stream.take();
        if let Some(inner) = self.registry.upgrade() {
            inner.release(&self.event);
        }
    }
}

/// 产出 `(序号, 载荷)` 的事件流
///
/// 序号在所有事件名之间单调递增：某帧可读时，序号更小的帧都已进入各自的缓冲。
pub struct Sequenced<T> {
    inner: EventStream<T>,
}

impl<T> Sequenced<T> {
    pub fn event(&self) -> &str {
        self.inner.event()
    }
}

impl<T> Stream for Sequenced<T>
where
    T: DeserializeOwned,
{
    type Item = (u64, Result<T, ConnectionError>);

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().inner.poll_delivery(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{MockConnector, RemoteEnd};
    use futures_util::StreamExt;
    use serde_json::json;

    fn policy(max_attempts: u32) -> ReconnectPolicy {
        ReconnectPolicy {
            max_attempts,
            base_delay_ms: 1_000,
            cap_delay_ms: 10_000,
            jitter_ratio: 0.0,
            connect_timeout_ms: 500,
        }
    }

    fn manager(connector: MockConnector, max_attempts: u32) -> ConnectionManager {
        ConnectionManager::new(Arc::new(connector), policy(max_attempts), &ChannelConfig::default())
    }

    /// 打开一条链路并保留远端，链路不会被判定为断开
    fn open_link(remotes: &Arc<Mutex<Vec<RemoteEnd>>>) -> Result<TransportLink, TransportError> {
        let (link, remote) = TransportLink::pair(8);
        lock(remotes).push(remote);
        Ok(link)
    }

    struct HangingConnector;

    #[async_trait::async_trait]
    impl Connector for HangingConnector {
        async fn connect(&self) -> Result<TransportLink, TransportError> {
            std::future::pending().await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_is_idempotent() {
        let remotes = Arc::new(Mutex::new(Vec::new()));
        let mut connector = MockConnector::new();
        let keep = remotes.clone();
        connector
            .expect_connect()
            .times(1)
            .returning(move || open_link(&keep));
        let manager = manager(connector, 5);

        manager.connect().await;
        manager.connect().await;
        manager
            .watch_state()
            .wait_for(|state| state.is_connected())
            .await
            .unwrap();

        manager.connect().await;
        assert_eq!(manager.state(), ConnectionState::Connected);
        manager.disconnect().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_then_success() {
        let remotes = Arc::new(Mutex::new(Vec::new()));
        let mut connector = MockConnector::new();
        let mut seq = mockall::Sequence::new();
        connector
            .expect_connect()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|| Err(TransportError::Refused("offline".into())));
        connector
            .expect_connect()
            .times(1)
            .in_sequence(&mut seq)
            .returning({
                let keep = remotes.clone();
                move || open_link(&keep)
            });
        let manager = manager(connector, 5);
        let mut transitions = manager.transitions();

        manager.connect().await;
        assert_eq!(transitions.recv().await.unwrap().state, ConnectionState::Connecting);
        let t = transitions.recv().await.unwrap();
        assert_eq!(t.state, ConnectionState::Reconnecting);
        assert_eq!(t.attempts, 1);
        assert_eq!(manager.reconnect_attempts(), 1);

        // 第一次失败后等待 base 延迟
        tokio::time::advance(Duration::from_millis(1_000)).await;
        let t = transitions.recv().await.unwrap();
        assert_eq!(t.state, ConnectionState::Connected);
        assert_eq!(t.attempts, 0);
        assert_eq!(manager.reconnect_attempts(), 0);

        manager.disconnect().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_exhausted_is_terminal() {
        let mut connector = MockConnector::new();
        connector
            .expect_connect()
            .times(3)
            .returning(|| Err(TransportError::Refused("offline".into())));
        let manager = manager(connector, 3);
        let mut errors = manager.errors();

        manager.connect().await;
        let err = errors.recv().await.unwrap();
        assert!(err.is_terminal());
        assert_eq!(manager.state(), ConnectionState::Disconnected);
        assert_eq!(manager.reconnect_attempts(), 3);

        // 不会继续静默重试
        tokio::time::advance(Duration::from_secs(60)).await;
        assert_eq!(manager.state(), ConnectionState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_on_shares_one_registration() {
        let connector = MockConnector::new();
        let manager = manager(connector, 5);

        let first = manager.on::<Value>("notification");
        let second = manager.on::<Value>("notification");
        assert_eq!(manager.listener_count(), 1);
        assert_eq!(manager.state(), ConnectionState::Disconnected);

        drop(first);
        assert_eq!(manager.listener_count(), 1);
        drop(second);
        assert_eq!(manager.listener_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_typed_payload_delivery() {
        #[derive(Debug, serde::Deserialize, PartialEq)]
        struct Ping {
            seq: u32,
        }

        let (link, remote) = TransportLink::pair(8);
        let link = Mutex::new(Some(link));
        let mut connector = MockConnector::new();
        connector
            .expect_connect()
            .times(1)
            .returning(move || lock(&link).take().ok_or(TransportError::Closed));
        let manager = manager(connector, 5);
        let mut pings = manager.on::<Ping>("ping");

        manager.connect().await;
        remote.deliver.send(Frame::new("ping", json!({"seq": 7}))).await.unwrap();
        remote.deliver.send(Frame::new("ping", json!({"seq": "x"}))).await.unwrap();

        assert_eq!(pings.next().await.unwrap().unwrap(), Ping { seq: 7 });
        assert!(matches!(
            pings.next().await.unwrap(),
            Err(ConnectionError::Decode { .. })
        ));

        manager.disconnect().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_sequence_spans_event_names() {
        let (link, remote) = TransportLink::pair(8);
        let link = Mutex::new(Some(link));
        let mut connector = MockConnector::new();
        connector
            .expect_connect()
            .times(1)
            .returning(move || lock(&link).take().ok_or(TransportError::Closed));
        let manager = manager(connector, 5);
        let mut joins = manager.on::<Value>("user-joined").sequenced();
        let mut leaves = manager.on::<Value>("user-left").sequenced();

        manager.connect().await;
        remote.deliver.send(Frame::new("user-joined", json!({"userId": "u1"}))).await.unwrap();
        remote.deliver.send(Frame::new("user-left", json!({"userId": "u1"}))).await.unwrap();
        remote.deliver.send(Frame::new("user-joined", json!({"userId": "u2"}))).await.unwrap();

        let (first, _) = joins.next().await.unwrap();
        let (second, _) = leaves.next().await.unwrap();
        let (third, _) = joins.next().await.unwrap();
        assert!(first < second && second < third);

        manager.disconnect().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_emit_when_disconnected_is_noop() {
        let connector = MockConnector::new();
        let manager = manager(connector, 5);

        let delivered = manager
            .emit("update-presence", &json!({"userId": "u1"}))
            .await
            .unwrap();
        assert!(!delivered);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_timeout_counts_as_failure() {
        let manager = ConnectionManager::new(
            Arc::new(HangingConnector),
            policy(5),
            &ChannelConfig::default(),
        );
        let mut transitions = manager.transitions();

        manager.connect().await;
        assert_eq!(transitions.recv().await.unwrap().state, ConnectionState::Connecting);
        let t = transitions.recv().await.unwrap();
        assert_eq!(t.state, ConnectionState::Reconnecting);
        assert_eq!(t.attempts, 1);
        manager.disconnect().await;
        assert_eq!(manager.state(), ConnectionState::Disconnected);
    }
}

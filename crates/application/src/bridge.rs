//! 连接管理器与状态容器之间唯一的桥梁
//!
//! 三个后台任务：
//! - 入站：通道事件 -> 动作 -> `Store::dispatch`
//! - 连接观察：状态迁移与终止性错误 -> 动作
//! - 传输副作用：已提交的动作 -> `connect` / `disconnect` / `emit`
//!
//! 传输副作用不持有容器句柄，只能调用连接管理器，不会再产生动作。

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use domain::{
    outbound, ChannelEvent, ChannelEventKind, ConnectionState, NotificationId, OnlineUser,
    PresenceUpdate, UserId,
};
use futures_util::{Stream, StreamExt};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{broadcast, mpsc};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::connection::{ConnectionManager, Sequenced, Transition};
use crate::error::ConnectionError;
use crate::store::{RealtimeAction, Store};

/// 由动作触发的传输调用
#[derive(Debug, Clone, PartialEq)]
pub enum TransportIntent {
    Connect,
    Disconnect,
    /// 宣告本地用户，重连后会自动重发
    Announce(PresenceUpdate),
    UpdatePresence(PresenceUpdate),
}

/// `request-presence-sync` 载荷
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<UserId>,
}

/// 入站事件到动作的映射
pub fn action_for_event(event: ChannelEvent, clock: &dyn Clock) -> RealtimeAction {
    let now = clock.now();
    match event {
        ChannelEvent::UserJoined(presence) => {
            RealtimeAction::UserJoined(OnlineUser::from_presence(presence, now))
        }
        ChannelEvent::UserLeft { user_id } => RealtimeAction::UserLeft { user_id },
        ChannelEvent::PresenceSynced(users) => RealtimeAction::PresenceSynced(
            users
                .into_iter()
                .map(|presence| OnlineUser::from_presence(presence, now))
                .collect(),
        ),
        ChannelEvent::PresenceChanged(presence) => RealtimeAction::PresenceChanged {
            presence,
            observed_at: now,
        },
        ChannelEvent::Notification(notification) => {
            RealtimeAction::NotificationReceived(notification)
        }
        ChannelEvent::ChapterCompleted(completed) => RealtimeAction::NotificationReceived(
            completed.into_notification(NotificationId::generate()),
        ),
    }
}

/// 动作到传输调用的映射；没有传输副作用的动作返回 `None`
pub fn intent_for_action(action: &RealtimeAction) -> Option<TransportIntent> {
    match action {
        RealtimeAction::ConnectRequested => Some(TransportIntent::Connect),
        RealtimeAction::DisconnectRequested => Some(TransportIntent::Disconnect),
        RealtimeAction::AnnouncePresence {
            user_id,
            username,
            status,
        } => Some(TransportIntent::Announce(PresenceUpdate::announce(
            user_id.clone(),
            username.clone(),
            *status,
        ))),
        RealtimeAction::UpdateLocalPresence(update) => {
            Some(TransportIntent::UpdatePresence(update.clone()))
        }
        RealtimeAction::ClearNotifications
        | RealtimeAction::RemoveNotification { .. }
        | RealtimeAction::Reset
        | RealtimeAction::ConnectionStateChanged { .. }
        | RealtimeAction::ConnectionFailed { .. }
        | RealtimeAction::UserJoined(_)
        | RealtimeAction::UserLeft { .. }
        | RealtimeAction::PresenceSynced(_)
        | RealtimeAction::PresenceChanged { .. }
        | RealtimeAction::NotificationReceived(_) => None,
    }
}

/// 把后续的局部更新合并进最近一次宣告
fn merge_update(base: &mut PresenceUpdate, update: &PresenceUpdate) {
    if update.username.is_some() {
        base.username = update.username.clone();
    }
    if update.status.is_some() {
        base.status = update.status;
    }
    if update.last_seen.is_some() {
        base.last_seen = update.last_seen;
    }
    if update.current_chapter.is_some() {
        base.current_chapter = update.current_chapter.clone();
    }
}

pub struct EventBridge {
    manager: ConnectionManager,
    store: Arc<Store>,
    clock: Arc<dyn Clock>,
    request_sync_on_connect: bool,
}

impl EventBridge {
    pub fn new(manager: ConnectionManager, store: Arc<Store>, clock: Arc<dyn Clock>) -> Self {
        Self {
            manager,
            store,
            clock,
            request_sync_on_connect: true,
        }
    }

    /// 每次连接成功后是否主动请求全量在线列表
    pub fn request_sync_on_connect(mut self, enabled: bool) -> Self {
        self.request_sync_on_connect = enabled;
        self
    }

    /// 启动桥接任务
    ///
    /// 所有订阅在返回前同步建立，之后到达的事件与动作都不会丢失。
    pub fn start(self) -> BridgeHandle {
        let cancel = CancellationToken::new();

        let inbound = OrderedInbound::new(
            ChannelEventKind::ALL
                .into_iter()
                .map(|kind| self.manager.on::<Value>(kind.as_str()).sequenced())
                .collect(),
        );

        let transitions = self.manager.transitions();
        let errors = self.manager.errors();
        let actions = self.store.effects();

        // 容器与管理器对齐
        self.store.dispatch(RealtimeAction::ConnectionStateChanged {
            state: self.manager.state(),
            attempts: self.manager.reconnect_attempts(),
        });

        let effects = TransportEffects {
            manager: self.manager.clone(),
            request_sync_on_connect: self.request_sync_on_connect,
            last_announce: None,
        };

        let tasks = vec![
            tokio::spawn(run_inbound(
                inbound,
                self.store.clone(),
                self.clock.clone(),
                cancel.clone(),
            )),
            tokio::spawn(run_connection_observer(
                transitions,
                errors,
                self.manager.clone(),
                self.store.clone(),
                cancel.clone(),
            )),
            tokio::spawn(effects.run(actions, cancel.clone())),
        ];

        info!(
            request_sync_on_connect = self.request_sync_on_connect,
            "event bridge started"
        );
        BridgeHandle { cancel, tasks }
    }
}

/// 桥接任务句柄
pub struct BridgeHandle {
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl BridgeHandle {
    /// 停止全部桥接任务并释放通道监听
    pub async fn shutdown(self) {
        self.cancel.cancel();
        for task in self.tasks {
            if let Err(err) = task.await {
                warn!(error = %err, "bridge task ended abnormally");
            }
        }
        info!("event bridge stopped");
    }
}

/// 按入站序号合并各事件流，保持帧的到达顺序
struct OrderedInbound {
    slots: Vec<InboundSlot>,
}

struct InboundSlot {
    stream: Sequenced<Value>,
    head: Option<(u64, Result<Value, ConnectionError>)>,
    done: bool,
}

impl OrderedInbound {
    fn new(streams: Vec<Sequenced<Value>>) -> Self {
        let slots = streams
            .into_iter()
            .map(|stream| InboundSlot {
                stream,
                head: None,
                done: false,
            })
            .collect();
        Self { slots }
    }
}

impl Stream for OrderedInbound {
    /// `(事件名, 载荷)`
    type Item = (String, Result<Value, ConnectionError>);

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        // 轮询到某一轮不再取到新帧为止：此后序号小于已取到帧的帧都已可读，
        // 取最小序号即为到达顺序
        let open = loop {
            let mut filled = false;
            let mut open = false;
            for slot in this.slots.iter_mut() {
                if slot.head.is_none() && !slot.done {
                    match Pin::new(&mut slot.stream).poll_next(cx) {
                        Poll::Ready(Some(item)) => {
                            slot.head = Some(item);
                            filled = true;
                        }
                        Poll::Ready(None) => slot.done = true,
                        Poll::Pending => {}
                    }
                }
                open |= !slot.done;
            }
            if !filled {
                break open;
            }
        };

        let earliest = this
            .slots
            .iter_mut()
            .filter_map(|slot| {
                let seq = slot.head.as_ref()?.0;
                Some((seq, slot))
            })
            .min_by_key(|(seq, _)| *seq);

        let next = earliest.and_then(|(_, slot)| {
            let (_, item) = slot.head.take()?;
            Some((slot.stream.event().to_string(), item))
        });
        match next {
            Some(item) => Poll::Ready(Some(item)),
            None if open => Poll::Pending,
            None => Poll::Ready(None),
        }
    }
}

async fn run_inbound(
    mut inbound: OrderedInbound,
    store: Arc<Store>,
    clock: Arc<dyn Clock>,
    cancel: CancellationToken,
) {
    loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => break,
            next = inbound.next() => next,
        };
        let Some((name, item)) = next else {
            break;
        };

        let decoded = item.map_err(|err| err.to_string()).and_then(|payload| {
            ChannelEvent::decode_named(&name, payload).map_err(|err| err.to_string())
        });
        match decoded {
            Ok(event) => {
                debug!(event = %event.kind(), "inbound event");
                store.dispatch(action_for_event(event, clock.as_ref()));
            }
            Err(err) => warn!(event = %name, error = %err, "dropping malformed payload"),
        }
    }
}

async fn run_connection_observer(
    mut transitions: broadcast::Receiver<Transition>,
    mut errors: broadcast::Receiver<ConnectionError>,
    manager: ConnectionManager,
    store: Arc<Store>,
    cancel: CancellationToken,
) {
    loop {
        // 终止错误总在对应的状态迁移之后发出，先处理迁移
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            transition = transitions.recv() => match transition {
                Ok(Transition { state, attempts }) => {
                    store.dispatch(RealtimeAction::ConnectionStateChanged { state, attempts });
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "connection transitions lagged, resyncing");
                    store.dispatch(RealtimeAction::ConnectionStateChanged {
                        state: manager.state(),
                        attempts: manager.reconnect_attempts(),
                    });
                }
                Err(RecvError::Closed) => break,
            },
            failure = errors.recv() => match failure {
                Ok(err) => store.dispatch(RealtimeAction::ConnectionFailed {
                    message: err.to_string(),
                }),
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "connection errors lagged"),
                Err(RecvError::Closed) => break,
            },
        }
    }
}

/// 不产生动作的传输副作用
struct TransportEffects {
    manager: ConnectionManager,
    request_sync_on_connect: bool,
    last_announce: Option<PresenceUpdate>,
}

impl TransportEffects {
    async fn run(mut self, mut actions: mpsc::UnboundedReceiver<RealtimeAction>, cancel: CancellationToken) {
        loop {
            let action = tokio::select! {
                _ = cancel.cancelled() => break,
                action = actions.recv() => action,
            };
            match action {
                Some(action) => self.handle(&action).await,
                None => break,
            }
        }
    }

    async fn handle(&mut self, action: &RealtimeAction) {
        match action {
            RealtimeAction::ConnectionStateChanged {
                state: ConnectionState::Connected,
                ..
            } => self.on_connected().await,
            RealtimeAction::Reset => self.last_announce = None,
            _ => {}
        }

        if let Some(intent) = intent_for_action(action) {
            self.execute(intent).await;
        }
    }

    async fn execute(&mut self, intent: TransportIntent) {
        debug!(?intent, "executing transport intent");
        match intent {
            TransportIntent::Connect => self.manager.connect().await,
            TransportIntent::Disconnect => self.manager.disconnect().await,
            TransportIntent::Announce(update) => {
                self.last_announce = Some(update.clone());
                self.send(outbound::UPDATE_PRESENCE, &update).await;
            }
            TransportIntent::UpdatePresence(update) => {
                if let Some(base) = self
                    .last_announce
                    .as_mut()
                    .filter(|base| base.user_id == update.user_id)
                {
                    merge_update(base, &update);
                }
                self.send(outbound::UPDATE_PRESENCE, &update).await;
            }
        }
    }

    /// 每次（重新）连接成功：请求全量同步并重发本地宣告
    async fn on_connected(&self) {
        if self.request_sync_on_connect {
            let request = SyncRequest {
                user_id: self.last_announce.as_ref().map(|update| update.user_id.clone()),
            };
            self.send(outbound::REQUEST_PRESENCE_SYNC, &request).await;
        }
        if let Some(update) = &self.last_announce {
            self.send(outbound::UPDATE_PRESENCE, update).await;
        }
    }

    async fn send<T: Serialize>(&self, event: &str, payload: &T) {
        match self.manager.emit(event, payload).await {
            Ok(true) => debug!(event, "frame sent"),
            Ok(false) => debug!(event, "not connected, frame not delivered"),
            Err(err) => warn!(event, error = %err, "failed to emit frame"),
        }
    }
}

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

use tokio::sync::{mpsc, watch};
use tracing::debug;

use super::action::RealtimeAction;
use super::reducer::reduce;
use super::selectors::Memoized;
use super::state::RealtimeState;

/// 显式传递的状态容器
///
/// `dispatch` 在锁内同步执行 reducer，动作严格按先进先出处理。
/// 状态通过 watch 通道发布（新订阅者立即拿到最新值）。已提交的动作按提交顺序
/// 写入每条 `effects()` 队列，队列无界，消费慢时也不会丢动作。
pub struct Store {
    state: watch::Sender<RealtimeState>,
    effects: Mutex<Vec<mpsc::UnboundedSender<RealtimeAction>>>,
    revision: AtomicU64,
    dispatch_lock: Mutex<()>,
}

impl Default for Store {
    fn default() -> Self {
        Self::new()
    }
}

impl Store {
    pub fn new() -> Self {
        Self::with_state(RealtimeState::default())
    }

    pub fn with_state(initial: RealtimeState) -> Self {
        let (state, _) = watch::channel(initial);
        Self {
            state,
            effects: Mutex::new(Vec::new()),
            revision: AtomicU64::new(0),
            dispatch_lock: Mutex::new(()),
        }
    }

    /// 提交一个动作；状态确有变化时版本号加一
    pub fn dispatch(&self, action: RealtimeAction) {
        let _guard = lock(&self.dispatch_lock);

        let changed = self.state.send_if_modified(|state| {
            let next = reduce(state.clone(), &action);
            if next == *state {
                false
            } else {
                *state = next;
                true
            }
        });
        if changed {
            self.revision.fetch_add(1, Ordering::SeqCst);
        }
        debug!(action = action.kind(), changed, "Action dispatched");

        // 消费端已关闭的队列随之移除
        lock(&self.effects).retain(|effects| effects.send(action.clone()).is_ok());
    }

    /// 当前状态快照
    pub fn state(&self) -> RealtimeState {
        self.state.borrow().clone()
    }

    pub fn select<R>(&self, selector: impl FnOnce(&RealtimeState) -> R) -> R {
        selector(&self.state.borrow())
    }

    pub fn memoized<T: Clone>(&self, selector: &mut Memoized<T>) -> T {
        let state = self.state.borrow();
        selector.get(self.revision(), &state).clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<RealtimeState> {
        self.state.subscribe()
    }

    /// 注册一条不丢失的动作队列，只包含注册之后提交的动作
    pub fn effects(&self) -> mpsc::UnboundedReceiver<RealtimeAction> {
        let (sender, receiver) = mpsc::unbounded_channel();
        lock(&self.effects).push(sender);
        receiver
    }

    pub fn revision(&self) -> u64 {
        self.revision.load(Ordering::SeqCst)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

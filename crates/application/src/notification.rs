use domain::{NotificationId, RealtimeNotification, Timestamp, MAX_NOTIFICATIONS};
use std::collections::VecDeque;

/// 有界通知流，最新的在前
///
/// 头部插入、尾部淘汰，追加代价为 O(1)。条目创建后不再修改。
#[derive(Debug, Clone, PartialEq)]
pub struct NotificationFeed {
    entries: VecDeque<RealtimeNotification>,
    capacity: usize,
}

impl Default for NotificationFeed {
    fn default() -> Self {
        Self::with_capacity(MAX_NOTIFICATIONS)
    }
}

impl NotificationFeed {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// 插入到头部，超出容量时从尾部淘汰；重复ID忽略
    ///
    /// 返回被淘汰的条目（如果有）。
    pub fn append(&mut self, notification: RealtimeNotification) -> Option<RealtimeNotification> {
        if self.contains(&notification.id) {
            return None;
        }
        self.entries.push_front(notification);
        if self.entries.len() > self.capacity {
            self.entries.pop_back()
        } else {
            None
        }
    }

    /// 按ID移除，不存在时忽略
    pub fn remove(&mut self, id: &NotificationId) -> bool {
        match self.entries.iter().position(|n| &n.id == id) {
            Some(index) => self.entries.remove(index).is_some(),
            None => false,
        }
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn contains(&self, id: &NotificationId) -> bool {
        self.entries.iter().any(|n| &n.id == id)
    }

    pub fn get(&self, index: usize) -> Option<&RealtimeNotification> {
        self.entries.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &RealtimeNotification> {
        self.entries.iter()
    }

    /// 最近的 n 条
    pub fn recent(&self, n: usize) -> impl Iterator<Item = &RealtimeNotification> {
        self.entries.iter().take(n)
    }

    /// 晚于给定时间的条数
    pub fn count_since(&self, since: Timestamp) -> usize {
        self.entries.iter().filter(|n| n.timestamp > since).count()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

use domain::{OnlineUser, PresenceUpdate, Timestamp, UserId, UserPresence, UserStatus};

/// 在线用户登记表
///
/// 由 join / leave / 全量同步三类事件驱动，以 `user_id` 去重：
/// - 重复的 join（例如重放的事件）不会产生第二条记录
/// - 全量同步是权威替换，总是覆盖此前的增量结果
/// - 本地用户通过 `announce` 宣告后永远不会出现在列表里
///
/// 增量 join/leave 只在同一连接周期内可靠，重连后必须以全量同步校准。
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PresenceRegistry {
    users: Vec<OnlineUser>,
    local_user: Option<UserId>,
}

impl PresenceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 用户加入；已存在或是本地用户时忽略，返回是否新增
    pub fn on_join(&mut self, user: OnlineUser) -> bool {
        if self.is_local(&user.user_id) || self.contains(&user.user_id) {
            return false;
        }
        self.users.push(user);
        true
    }

    /// 用户离开；不存在时忽略，返回是否移除
    pub fn on_leave(&mut self, user_id: &UserId) -> bool {
        let before = self.users.len();
        self.users.retain(|user| &user.user_id != user_id);
        self.users.len() != before
    }

    /// 全量同步：整体替换，快照内的重复ID只保留第一条
    pub fn on_full_sync(&mut self, users: Vec<OnlineUser>) {
        let mut synced: Vec<OnlineUser> = Vec::with_capacity(users.len());
        for user in users {
            if self.is_local(&user.user_id) || synced.iter().any(|u| u.user_id == user.user_id) {
                continue;
            }
            synced.push(user);
        }
        self.users = synced;
    }

    /// 合并状态；未跟踪的用户忽略
    pub fn update_status(&mut self, user_id: &UserId, status: UserStatus) -> bool {
        match self.get_mut(user_id) {
            Some(user) => {
                user.status = status;
                true
            }
            None => false,
        }
    }

    /// 合并当前章节；未跟踪的用户忽略
    pub fn update_current_chapter(&mut self, user_id: &UserId, chapter_id: Option<String>) -> bool {
        match self.get_mut(user_id) {
            Some(user) => {
                user.current_chapter = chapter_id;
                true
            }
            None => false,
        }
    }

    /// 单个用户的在线信息变更：合并状态、章节与最近活跃时间
    pub fn apply_presence_change(&mut self, presence: UserPresence, observed_at: Timestamp) -> bool {
        let UserPresence {
            user_id,
            status,
            current_chapter,
            last_seen,
            ..
        } = presence;

        if !self.update_status(&user_id, status) {
            return false;
        }
        if current_chapter.is_some() {
            self.update_current_chapter(&user_id, current_chapter);
        }
        if let Some(user) = self.get_mut(&user_id) {
            user.last_activity = last_seen.unwrap_or(observed_at);
        }
        true
    }

    /// 宣告本地用户，返回要发往通道的载荷
    ///
    /// 只记录本地身份，不把自己加入在线列表。
    pub fn announce(&mut self, user_id: UserId, username: impl Into<String>, status: UserStatus) -> PresenceUpdate {
        self.users.retain(|user| user.user_id != user_id);
        self.local_user = Some(user_id.clone());
        PresenceUpdate::announce(user_id, username, status)
    }

    pub fn local_user(&self) -> Option<&UserId> {
        self.local_user.as_ref()
    }

    pub fn get(&self, user_id: &UserId) -> Option<&OnlineUser> {
        self.users.iter().find(|user| &user.user_id == user_id)
    }

    pub fn contains(&self, user_id: &UserId) -> bool {
        self.get(user_id).is_some()
    }

    pub fn users(&self) -> &[OnlineUser] {
        &self.users
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }

    fn get_mut(&mut self, user_id: &UserId) -> Option<&mut OnlineUser> {
        self.users.iter_mut().find(|user| &user.user_id == user_id)
    }

    fn is_local(&self, user_id: &UserId) -> bool {
        self.local_user.as_ref() == Some(user_id)
    }
}

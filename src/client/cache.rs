use crate::models::Notification;
use std::collections::VecDeque;

/// 本地缓存默认容量上限
pub const DEFAULT_CACHE_CAPACITY: usize = 100;

/// 客户端本地通知缓存
///
/// 底层按到达顺序存储（队首最新），容量有上界；
/// 插入按 id 去重：已存在的 id 原地替换并提到队首，
/// 超出容量时淘汰到达最早的一条。
/// read/deleted 是纯本地标记，允许与服务端状态分叉。
#[derive(Debug, Clone)]
pub struct NotificationCache {
    entries: VecDeque<Notification>,
    capacity: usize,
}

impl NotificationCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    /// 插入或替换一条通知，返回被淘汰的条目（如果有）
    pub fn upsert(&mut self, notification: Notification) -> Option<Notification> {
        if let Some(pos) = self.entries.iter().position(|n| n.id == notification.id) {
            self.entries.remove(pos);
            self.entries.push_front(notification);
            return None;
        }

        self.entries.push_front(notification);
        if self.entries.len() > self.capacity {
            return self.entries.pop_back();
        }
        None
    }

    /// 展示顺序：优先级降序（HIGH > MEDIUM > LOW），同级按创建时间降序。
    ///
    /// 派生视图，不改变底层的到达顺序；本地已删除的条目不展示。
    pub fn display_order(&self) -> Vec<&Notification> {
        let mut visible: Vec<&Notification> =
            self.entries.iter().filter(|n| !n.deleted).collect();
        visible.sort_by(|a, b| {
            b.priority
                .rank()
                .cmp(&a.priority.rank())
                .then(b.created_at.cmp(&a.created_at))
        });
        visible
    }

    /// 本地已读标记，不回传服务端
    pub fn mark_read(&mut self, id: &str) -> bool {
        match self.entries.iter_mut().find(|n| n.id == id) {
            Some(n) => {
                n.read = true;
                true
            }
            None => false,
        }
    }

    /// 本地删除标记，不回传服务端
    pub fn delete(&mut self, id: &str) -> bool {
        match self.entries.iter_mut().find(|n| n.id == id) {
            Some(n) => {
                n.deleted = true;
                true
            }
            None => false,
        }
    }

    pub fn clear_all(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// 到达顺序迭代（队首最新）
    pub fn iter(&self) -> impl Iterator<Item = &Notification> {
        self.entries.iter()
    }

    /// 持久化快照（到达顺序）
    pub fn snapshot(&self) -> Vec<Notification> {
        self.entries.iter().cloned().collect()
    }

    /// 从持久化快照恢复，超出容量的尾部条目丢弃
    pub fn restore(capacity: usize, snapshot: Vec<Notification>) -> Self {
        let mut cache = Self::new(capacity);
        cache.entries = snapshot.into_iter().take(cache.capacity).collect();
        cache
    }
}

impl Default for NotificationCache {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_CAPACITY)
    }
}

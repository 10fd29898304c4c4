use crate::error::Result;
use crate::models::{Notification, NotificationEvent, NotificationPriority};
use crate::services::registry::ConnectionRegistry;
use crate::services::store::NotificationStore;
use std::sync::Arc;
use tracing::debug;

/// 通知服务
///
/// 摄取路径的核心：先持久化，再向接收者当前打开的通道扇出。
/// 队列消费者和 POST /notifications 都走这一条路径。
#[derive(Clone)]
pub struct NotificationService {
    store: Arc<dyn NotificationStore>,
    registry: Arc<ConnectionRegistry>,
}

impl NotificationService {
    pub fn new(store: Arc<dyn NotificationStore>, registry: Arc<ConnectionRegistry>) -> Self {
        Self { store, registry }
    }

    /// 持久化一个事件并立即广播。
    ///
    /// 同一逻辑消息被队列重投会产生第二条独立记录，
    /// 这里没有幂等键去重。
    pub async fn ingest(&self, event: NotificationEvent) -> Result<Notification> {
        let notification = self.store.create(event.into_notification()).await?;
        let delivered = self
            .registry
            .broadcast(&notification.recipient_id, &notification);
        debug!(
            "Ingested notification {} for recipient {} ({} live channel(s))",
            notification.id, notification.recipient_id, delivered
        );
        Ok(notification)
    }

    pub async fn list(
        &self,
        recipient_id: &str,
        priority: Option<NotificationPriority>,
    ) -> Result<Vec<Notification>> {
        self.store.list(recipient_id, priority).await
    }

    pub async fn get(&self, id: &str, recipient_id: &str) -> Result<Option<Notification>> {
        self.store.get(id, recipient_id).await
    }

    pub async fn mark_read(&self, id: &str, recipient_id: &str) -> Result<Option<Notification>> {
        self.store.mark_read(id, recipient_id).await
    }

    pub async fn soft_delete(&self, id: &str, recipient_id: &str) -> Result<Option<Notification>> {
        self.store.soft_delete(id, recipient_id).await
    }

    pub async fn unread_count(&self, recipient_id: &str) -> Result<usize> {
        self.store.unread_count(recipient_id).await
    }
}

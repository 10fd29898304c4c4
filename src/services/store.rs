use crate::config::Config;
use crate::error::Result;
use crate::models::{Notification, NotificationPriority};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use surrealdb::engine::remote::http::{Client, Http};
use surrealdb::opt::auth::Root;
use surrealdb::Surreal;
use tracing::{debug, info};

const TABLE: &str = "notification";

/// 通知持久化接口
///
/// 所有查询和变更都以 recipient_id 为归属范围；
/// 软删除的行对 list/get 不可见。
#[async_trait]
pub trait NotificationStore: Send + Sync {
    async fn create(&self, notification: Notification) -> Result<Notification>;

    /// 非删除行，按创建时间倒序，可选按优先级过滤
    async fn list(
        &self,
        recipient_id: &str,
        priority: Option<NotificationPriority>,
    ) -> Result<Vec<Notification>>;

    async fn get(&self, id: &str, recipient_id: &str) -> Result<Option<Notification>>;

    /// 幂等：重复调用同样成功并保持 read = true
    async fn mark_read(&self, id: &str, recipient_id: &str) -> Result<Option<Notification>>;

    /// 软删除：置 deleted = true，不物理移除
    async fn soft_delete(&self, id: &str, recipient_id: &str) -> Result<Option<Notification>>;

    async fn unread_count(&self, recipient_id: &str) -> Result<usize>;
}

/// SurrealDB 存储实现
#[derive(Clone)]
pub struct SurrealStore {
    db: Surreal<Client>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct NotificationRow<'a> {
    recipient_id: &'a str,
    title: &'a str,
    message: &'a str,
    category: crate::models::NotificationCategory,
    priority: NotificationPriority,
    #[serde(skip_serializing_if = "Option::is_none")]
    link: Option<&'a str>,
    read: bool,
    deleted: bool,
    created_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct CountRow {
    total: usize,
}

impl SurrealStore {
    /// 创建新的数据库连接
    pub async fn connect(config: &Config) -> Result<Self> {
        info!("Initializing database connection to {}", config.database_url);

        let db = Surreal::new::<Http>(config.database_url.as_str()).await?;
        db.signin(Root {
            username: &config.database_username,
            password: &config.database_password,
        })
        .await?;
        db.use_ns(&config.database_namespace)
            .use_db(&config.database_name)
            .await?;

        Ok(Self { db })
    }

    /// 验证数据库连接
    pub async fn verify_connection(&self) -> Result<()> {
        self.db.query("INFO FOR DB").await?.check()?;
        info!("Database connection verified successfully");
        Ok(())
    }
}

#[async_trait]
impl NotificationStore for SurrealStore {
    async fn create(&self, notification: Notification) -> Result<Notification> {
        let row = NotificationRow {
            recipient_id: &notification.recipient_id,
            title: &notification.title,
            message: &notification.message,
            category: notification.category,
            priority: notification.priority,
            link: notification.link.as_deref(),
            read: notification.read,
            deleted: notification.deleted,
            created_at: notification.created_at,
        };

        self.db
            .query("CREATE type::thing($tb, $id) CONTENT $data")
            .bind(("tb", TABLE))
            .bind(("id", notification.id.clone()))
            .bind(("data", serde_json::to_value(&row)?))
            .await?
            .check()?;

        debug!("Created notification {} for recipient {}", notification.id, notification.recipient_id);
        Ok(notification)
    }

    async fn list(
        &self,
        recipient_id: &str,
        priority: Option<NotificationPriority>,
    ) -> Result<Vec<Notification>> {
        let sql = match priority {
            Some(_) => {
                "SELECT *, meta::id(id) AS id FROM type::table($tb) \
                 WHERE recipientId = $recipient_id AND deleted = false AND priority = $priority \
                 ORDER BY createdAt DESC"
            }
            None => {
                "SELECT *, meta::id(id) AS id FROM type::table($tb) \
                 WHERE recipientId = $recipient_id AND deleted = false \
                 ORDER BY createdAt DESC"
            }
        };

        let mut query = self
            .db
            .query(sql)
            .bind(("tb", TABLE))
            .bind(("recipient_id", recipient_id.to_string()));
        if let Some(priority) = priority {
            query = query.bind(("priority", priority));
        }

        let notifications: Vec<Notification> = query.await?.take(0)?;
        Ok(notifications)
    }

    async fn get(&self, id: &str, recipient_id: &str) -> Result<Option<Notification>> {
        let mut response = self
            .db
            .query(
                "SELECT *, meta::id(id) AS id FROM type::thing($tb, $id) \
                 WHERE recipientId = $recipient_id AND deleted = false",
            )
            .bind(("tb", TABLE))
            .bind(("id", id.to_string()))
            .bind(("recipient_id", recipient_id.to_string()))
            .await?;

        let rows: Vec<Notification> = response.take(0)?;
        Ok(rows.into_iter().next())
    }

    async fn mark_read(&self, id: &str, recipient_id: &str) -> Result<Option<Notification>> {
        self.db
            .query(
                "UPDATE type::thing($tb, $id) SET read = true \
                 WHERE recipientId = $recipient_id AND deleted = false RETURN NONE",
            )
            .bind(("tb", TABLE))
            .bind(("id", id.to_string()))
            .bind(("recipient_id", recipient_id.to_string()))
            .await?
            .check()?;

        self.get(id, recipient_id).await
    }

    async fn soft_delete(&self, id: &str, recipient_id: &str) -> Result<Option<Notification>> {
        self.db
            .query(
                "UPDATE type::thing($tb, $id) SET deleted = true \
                 WHERE recipientId = $recipient_id RETURN NONE",
            )
            .bind(("tb", TABLE))
            .bind(("id", id.to_string()))
            .bind(("recipient_id", recipient_id.to_string()))
            .await?
            .check()?;

        // 返回软删除后的行，包含 deleted = true
        let mut response = self
            .db
            .query(
                "SELECT *, meta::id(id) AS id FROM type::thing($tb, $id) \
                 WHERE recipientId = $recipient_id",
            )
            .bind(("tb", TABLE))
            .bind(("id", id.to_string()))
            .bind(("recipient_id", recipient_id.to_string()))
            .await?;

        let rows: Vec<Notification> = response.take(0)?;
        Ok(rows.into_iter().next())
    }

    async fn unread_count(&self, recipient_id: &str) -> Result<usize> {
        let mut response = self
            .db
            .query(
                "SELECT count() AS total FROM type::table($tb) \
                 WHERE recipientId = $recipient_id AND deleted = false AND read = false \
                 GROUP ALL",
            )
            .bind(("tb", TABLE))
            .bind(("recipient_id", recipient_id.to_string()))
            .await?;

        let rows: Vec<CountRow> = response.take(0)?;
        Ok(rows.into_iter().next().map(|r| r.total).unwrap_or(0))
    }
}

/// 内存存储实现
///
/// 测试和无数据库的本地开发使用（STORE_DRIVER=memory）。
#[derive(Default)]
pub struct MemoryStore {
    rows: RwLock<Vec<Notification>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 直接检视底层行，包含软删除的行（测试用）
    pub fn raw_rows(&self) -> Vec<Notification> {
        self.rows.read().clone()
    }
}

#[async_trait]
impl NotificationStore for MemoryStore {
    async fn create(&self, notification: Notification) -> Result<Notification> {
        self.rows.write().push(notification.clone());
        Ok(notification)
    }

    async fn list(
        &self,
        recipient_id: &str,
        priority: Option<NotificationPriority>,
    ) -> Result<Vec<Notification>> {
        let mut matched: Vec<Notification> = self
            .rows
            .read()
            .iter()
            .filter(|n| n.recipient_id == recipient_id && !n.deleted)
            .filter(|n| priority.map_or(true, |p| n.priority == p))
            .cloned()
            .collect();
        matched.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(matched)
    }

    async fn get(&self, id: &str, recipient_id: &str) -> Result<Option<Notification>> {
        Ok(self
            .rows
            .read()
            .iter()
            .find(|n| n.id == id && n.recipient_id == recipient_id && !n.deleted)
            .cloned())
    }

    async fn mark_read(&self, id: &str, recipient_id: &str) -> Result<Option<Notification>> {
        let mut rows = self.rows.write();
        let row = rows
            .iter_mut()
            .find(|n| n.id == id && n.recipient_id == recipient_id && !n.deleted);
        Ok(row.map(|n| {
            n.read = true;
            n.clone()
        }))
    }

    async fn soft_delete(&self, id: &str, recipient_id: &str) -> Result<Option<Notification>> {
        let mut rows = self.rows.write();
        let row = rows
            .iter_mut()
            .find(|n| n.id == id && n.recipient_id == recipient_id);
        Ok(row.map(|n| {
            n.deleted = true;
            n.clone()
        }))
    }

    async fn unread_count(&self, recipient_id: &str) -> Result<usize> {
        Ok(self
            .rows
            .read()
            .iter()
            .filter(|n| n.recipient_id == recipient_id && !n.deleted && !n.read)
            .count())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NotificationEvent;

    fn event(recipient: &str, title: &str, priority: &str) -> NotificationEvent {
        serde_json::from_str(&format!(
            r#"{{"recipientId":"{}","title":"{}","message":"m","priority":"{}"}}"#,
            recipient, title, priority
        ))
        .unwrap()
    }

    #[tokio::test]
    async fn test_list_excludes_deleted_rows() {
        let store = MemoryStore::new();
        let kept = store.create(event("u1", "a", "HIGH").into_notification()).await.unwrap();
        let dropped = store.create(event("u1", "b", "LOW").into_notification()).await.unwrap();

        store.soft_delete(&dropped.id, "u1").await.unwrap().unwrap();

        let listed = store.list("u1", None).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, kept.id);

        // 行仍然在存储中，只是被标记删除
        assert_eq!(store.raw_rows().len(), 2);
        assert!(store.raw_rows().iter().any(|n| n.id == dropped.id && n.deleted));
    }

    #[tokio::test]
    async fn test_get_excludes_deleted_and_foreign_rows() {
        let store = MemoryStore::new();
        let n = store.create(event("u1", "a", "MEDIUM").into_notification()).await.unwrap();

        assert!(store.get(&n.id, "u2").await.unwrap().is_none());

        store.soft_delete(&n.id, "u1").await.unwrap();
        assert!(store.get(&n.id, "u1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_mark_read_is_idempotent() {
        let store = MemoryStore::new();
        let n = store.create(event("u1", "a", "MEDIUM").into_notification()).await.unwrap();

        let first = store.mark_read(&n.id, "u1").await.unwrap().unwrap();
        assert!(first.read);
        let second = store.mark_read(&n.id, "u1").await.unwrap().unwrap();
        assert!(second.read);
    }

    #[tokio::test]
    async fn test_mark_read_scoped_by_recipient() {
        let store = MemoryStore::new();
        let n = store.create(event("u1", "a", "MEDIUM").into_notification()).await.unwrap();

        assert!(store.mark_read(&n.id, "u2").await.unwrap().is_none());
        assert!(!store.get(&n.id, "u1").await.unwrap().unwrap().read);
    }

    #[tokio::test]
    async fn test_list_filters_by_priority() {
        let store = MemoryStore::new();
        store.create(event("u1", "a", "HIGH").into_notification()).await.unwrap();
        store.create(event("u1", "b", "LOW").into_notification()).await.unwrap();

        let high = store
            .list("u1", Some(NotificationPriority::High))
            .await
            .unwrap();
        assert_eq!(high.len(), 1);
        assert_eq!(high[0].title, "a");
    }

    #[tokio::test]
    async fn test_unread_count_ignores_read_and_deleted() {
        let store = MemoryStore::new();
        let a = store.create(event("u1", "a", "MEDIUM").into_notification()).await.unwrap();
        let b = store.create(event("u1", "b", "MEDIUM").into_notification()).await.unwrap();
        store.create(event("u1", "c", "MEDIUM").into_notification()).await.unwrap();

        store.mark_read(&a.id, "u1").await.unwrap();
        store.soft_delete(&b.id, "u1").await.unwrap();

        assert_eq!(store.unread_count("u1").await.unwrap(), 1);
    }
}

use crate::config::Config;
use crate::models::NotificationEvent;
use crate::services::notification::NotificationService;
use futures::StreamExt;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// 队列摄取消费者
///
/// 订阅通知主题，逐条处理：解析（枚举字段宽松归一化）、持久化、
/// 广播给接收者当前打开的通道。订阅内的消息是顺序处理的。
/// 单条解析失败只跳过那一条；订阅或连接断掉则按上限退避重建。
pub struct IngestionConsumer {
    queue_url: String,
    subject: String,
    backoff_base: Duration,
    backoff_max: Duration,
    service: NotificationService,
}

impl IngestionConsumer {
    pub fn new(config: &Config, service: NotificationService) -> Self {
        Self {
            queue_url: config.queue_url.clone(),
            subject: config.queue_subject.clone(),
            backoff_base: Duration::from_millis(config.queue_backoff_base_ms),
            backoff_max: Duration::from_millis(config.queue_backoff_max_ms),
            service,
        }
    }

    /// 消费循环；进程存活期间不返回
    pub async fn run(self) {
        let mut delay = self.backoff_base;
        loop {
            match self.consume_once().await {
                Ok(()) => {
                    warn!("Queue subscription ended, resubscribing");
                    delay = self.backoff_base;
                }
                Err(e) => {
                    warn!("Queue consumer error: {}, retrying in {:?}", e, delay);
                }
            }
            tokio::time::sleep(delay).await;
            delay = (delay * 2).min(self.backoff_max);
        }
    }

    async fn consume_once(&self) -> std::result::Result<(), async_nats::Error> {
        let client = async_nats::connect(&self.queue_url).await?;
        let mut subscriber = client.subscribe(self.subject.clone()).await?;
        info!("Subscribed to queue subject {}", self.subject);

        while let Some(message) = subscriber.next().await {
            self.handle_message(&message.payload).await;
        }
        Ok(())
    }

    /// 处理一条原始队列消息
    pub async fn handle_message(&self, payload: &[u8]) {
        let event: NotificationEvent = match serde_json::from_slice(payload) {
            Ok(event) => event,
            Err(e) => {
                warn!("Discarding malformed queue message: {}", e);
                return;
            }
        };
        if event.recipient_id.is_empty() {
            warn!("Discarding queue message without recipientId");
            return;
        }

        match self.service.ingest(event).await {
            Ok(notification) => {
                debug!("Persisted queued notification {}", notification.id);
            }
            Err(e) => {
                // 持久化失败：这一条丢了，但消费循环继续
                error!("Failed to persist queued notification: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::registry::ConnectionRegistry;
    use crate::services::store::{MemoryStore, NotificationStore};
    use std::sync::Arc;

    fn consumer_with_store() -> (IngestionConsumer, Arc<MemoryStore>, Arc<ConnectionRegistry>) {
        let store = Arc::new(MemoryStore::new());
        let registry = Arc::new(ConnectionRegistry::new());
        let service = NotificationService::new(store.clone(), registry.clone());
        let config = Config {
            server_host: "127.0.0.1".into(),
            server_port: 0,
            environment: "test".into(),
            log_level: "debug".into(),
            database_url: "127.0.0.1:8000".into(),
            database_namespace: "test".into(),
            database_name: "test".into(),
            database_username: "root".into(),
            database_password: "root".into(),
            store_driver: "memory".into(),
            queue_url: "nats://127.0.0.1:1".into(),
            queue_subject: "test.notifications".into(),
            queue_connect_attempts: 1,
            queue_backoff_base_ms: 10,
            queue_backoff_max_ms: 40,
            stream_keep_alive_secs: 15,
            client_reconnect_base_ms: 10,
            client_reconnect_max_ms: 100,
            client_cache_capacity: 100,
            client_cache_dir: None,
            cors_allowed_origins: "*".into(),
        };
        (IngestionConsumer::new(&config, service), store, registry)
    }

    #[tokio::test]
    async fn test_valid_message_is_persisted_and_normalized() {
        let (consumer, store, _registry) = consumer_with_store();
        consumer
            .handle_message(
                br#"{"recipientId":"u1","title":"Warehouse Created","message":"m","priority":"medium"}"#,
            )
            .await;

        let rows = store.list("u1", None).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].priority, crate::models::NotificationPriority::Medium);
        assert!(!rows[0].read);
    }

    #[tokio::test]
    async fn test_malformed_message_is_skipped() {
        let (consumer, store, _registry) = consumer_with_store();
        consumer.handle_message(b"not json at all").await;
        consumer.handle_message(br#"{"title":"missing recipient"}"#).await;
        consumer
            .handle_message(br#"{"recipientId":"","title":"t","message":"m"}"#)
            .await;

        assert!(store.raw_rows().is_empty());
    }

    #[tokio::test]
    async fn test_redelivery_produces_distinct_rows() {
        let (consumer, store, _registry) = consumer_with_store();
        let payload = br#"{"recipientId":"u1","title":"t","message":"m"}"#;
        consumer.handle_message(payload).await;
        consumer.handle_message(payload).await;

        let rows = store.list("u1", None).await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_ne!(rows[0].id, rows[1].id);
    }

    #[tokio::test]
    async fn test_ingest_broadcasts_to_registered_channel() {
        let (consumer, _store, registry) = consumer_with_store();
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        registry.register("u1", tx);

        consumer
            .handle_message(br#"{"recipientId":"u1","title":"t","message":"m"}"#)
            .await;

        let payload = rx.recv().await.unwrap();
        let pushed: crate::models::Notification = serde_json::from_str(&payload).unwrap();
        assert_eq!(pushed.recipient_id, "u1");
    }
}

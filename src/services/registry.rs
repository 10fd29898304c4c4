use crate::models::Notification;
use dashmap::DashMap;
use serde::Serialize;
use std::collections::HashMap;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

/// 注册表统计信息（诊断接口用）
#[derive(Debug, Clone, Serialize)]
pub struct RegistryStats {
    pub recipients: usize,
    pub handles: usize,
}

/// 推送连接注册表
///
/// recipient_id → 当前打开的推送通道集合。每进程构造一次，
/// 通过 AppState 注入消费者和流式端点，不做全局单例。
/// register/unregister/broadcast 可以从任意多个连接生命周期并发调用；
/// unregister 是同步的，因此可以在流的 Drop 中释放。
#[derive(Default)]
pub struct ConnectionRegistry {
    channels: DashMap<String, HashMap<Uuid, mpsc::UnboundedSender<String>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册一个推送通道，返回通道句柄 id
    pub fn register(&self, recipient_id: &str, tx: mpsc::UnboundedSender<String>) -> Uuid {
        let handle_id = Uuid::new_v4();
        self.channels
            .entry(recipient_id.to_string())
            .or_default()
            .insert(handle_id, tx);
        debug!("Registered push channel {} for recipient {}", handle_id, recipient_id);
        handle_id
    }

    /// 注销通道；集合清空时整个条目一并移除，避免空集合累积
    pub fn unregister(&self, recipient_id: &str, handle_id: Uuid) {
        let emptied = match self.channels.get_mut(recipient_id) {
            Some(mut entry) => {
                entry.remove(&handle_id);
                entry.is_empty()
            }
            None => false,
        };
        if emptied {
            self.channels
                .remove_if(recipient_id, |_, handles| handles.is_empty());
        }
        debug!("Unregistered push channel {} for recipient {}", handle_id, recipient_id);
    }

    /// 向某个接收者当前所有打开的通道写入同一份序列化负载。
    ///
    /// 接收者没有任何连接时静默跳过——事件已经持久化，
    /// 之后可以通过查询接口取回。返回实际送达的通道数。
    /// 发送失败的通道视为已断开，顺手剔除。
    pub fn broadcast(&self, recipient_id: &str, notification: &Notification) -> usize {
        let payload = match serde_json::to_string(notification) {
            Ok(payload) => payload,
            Err(e) => {
                warn!("Failed to serialize notification {}: {}", notification.id, e);
                return 0;
            }
        };

        let Some(mut entry) = self.channels.get_mut(recipient_id) else {
            debug!("No open channels for recipient {}, skipping broadcast", recipient_id);
            return 0;
        };

        let mut dead = Vec::new();
        let mut delivered = 0;
        for (handle_id, tx) in entry.iter() {
            if tx.send(payload.clone()).is_err() {
                dead.push(*handle_id);
            } else {
                delivered += 1;
            }
        }
        for handle_id in dead {
            warn!("Pruning dead push channel {} for recipient {}", handle_id, recipient_id);
            entry.remove(&handle_id);
        }

        debug!(
            "Broadcast notification {} to {} channel(s) for recipient {}",
            notification.id, delivered, recipient_id
        );
        delivered
    }

    pub fn stats(&self) -> RegistryStats {
        let recipients = self.channels.len();
        let handles = self.channels.iter().map(|entry| entry.len()).sum();
        RegistryStats { recipients, handles }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NotificationEvent;

    fn notification(recipient: &str) -> Notification {
        let event: NotificationEvent = serde_json::from_str(&format!(
            r#"{{"recipientId":"{}","title":"t","message":"m"}}"#,
            recipient
        ))
        .unwrap();
        event.into_notification()
    }

    #[tokio::test]
    async fn test_broadcast_reaches_all_handles_with_identical_payload() {
        let registry = ConnectionRegistry::new();
        let (tx1, mut rx1) = mpsc::unbounded_channel();
        let (tx2, mut rx2) = mpsc::unbounded_channel();
        registry.register("u2", tx1);
        registry.register("u2", tx2);

        let delivered = registry.broadcast("u2", &notification("u2"));
        assert_eq!(delivered, 2);

        let p1 = rx1.recv().await.unwrap();
        let p2 = rx2.recv().await.unwrap();
        assert_eq!(p1, p2);

        let parsed: Notification = serde_json::from_str(&p1).unwrap();
        assert_eq!(parsed.recipient_id, "u2");
    }

    #[test]
    fn test_broadcast_without_handles_is_a_noop() {
        let registry = ConnectionRegistry::new();
        assert_eq!(registry.broadcast("nobody", &notification("nobody")), 0);
    }

    #[test]
    fn test_unregister_removes_empty_entry() {
        let registry = ConnectionRegistry::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        let handle = registry.register("u1", tx);
        assert_eq!(registry.stats().recipients, 1);

        registry.unregister("u1", handle);
        let stats = registry.stats();
        assert_eq!(stats.recipients, 0);
        assert_eq!(stats.handles, 0);
    }

    #[test]
    fn test_handles_tracked_independently() {
        let registry = ConnectionRegistry::new();
        let (tx1, _rx1) = mpsc::unbounded_channel();
        let (tx2, _rx2) = mpsc::unbounded_channel();
        let h1 = registry.register("u1", tx1);
        let _h2 = registry.register("u1", tx2);

        registry.unregister("u1", h1);
        let stats = registry.stats();
        assert_eq!(stats.recipients, 1);
        assert_eq!(stats.handles, 1);
    }

    #[test]
    fn test_broadcast_prunes_dead_channels() {
        let registry = ConnectionRegistry::new();
        let (tx, rx) = mpsc::unbounded_channel();
        registry.register("u1", tx);
        drop(rx);

        assert_eq!(registry.broadcast("u1", &notification("u1")), 0);
        assert_eq!(registry.stats().handles, 0);
    }
}

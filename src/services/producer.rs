use crate::config::Config;
use crate::models::NotificationEvent;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// 业务事件生产者
///
/// 业务代码调用 `submit` 后立即返回，投递在独立任务中进行，
/// 从业务动作的角度是 fire-and-forget：队列不可用时事件丢弃并记日志，
/// 调用方永远不会因为通知投递而阻塞或失败。
///
/// 队列连接是惰性建立、进程内共享的单一可变资源，由本实例持有，
/// 用锁保证同一时刻只有一个连接尝试在进行；竞争到锁的调用方
/// 要么复用已有连接，要么执行有限退避重连；没竞争到的直接丢弃事件。
#[derive(Clone)]
pub struct EventProducer {
    queue_url: String,
    subject: String,
    connect_attempts: u32,
    backoff_base: Duration,
    conn: Arc<Mutex<Option<async_nats::Client>>>,
}

impl EventProducer {
    pub fn new(config: &Config) -> Self {
        Self {
            queue_url: config.queue_url.clone(),
            subject: config.queue_subject.clone(),
            connect_attempts: config.queue_connect_attempts,
            backoff_base: Duration::from_millis(config.queue_backoff_base_ms),
            conn: Arc::new(Mutex::new(None)),
        }
    }

    /// 提交一个通知事件，立即返回
    pub fn submit(&self, event: NotificationEvent) {
        let producer = self.clone();
        tokio::spawn(async move {
            producer.deliver(event).await;
        });
    }

    /// 实际投递：序列化后发布到队列主题，发送一次，不等待应用层确认
    pub async fn deliver(&self, event: NotificationEvent) {
        let payload = match serde_json::to_vec(&event) {
            Ok(payload) => payload,
            Err(e) => {
                warn!("Failed to serialize notification event for recipient {}: {}", event.recipient_id, e);
                return;
            }
        };

        let Some(client) = self.client().await else {
            warn!(
                "Dropping notification event for recipient {}: queue unavailable",
                event.recipient_id
            );
            return;
        };

        if let Err(e) = client.publish(self.subject.clone(), payload.into()).await {
            warn!(
                "Dropping notification event for recipient {}: publish failed: {}",
                event.recipient_id, e
            );
            // 连接已不可信，丢弃并让下一次提交重连
            self.conn.lock().await.take();
            return;
        }

        debug!("Published notification event for recipient {} to {}", event.recipient_id, self.subject);
    }

    /// 获取共享连接。
    ///
    /// try_lock 失败说明另一个调用方正在重连，此时直接返回 None（快速失败）；
    /// 持有锁的一方先复用健康连接，否则做有限指数退避的重连。
    async fn client(&self) -> Option<async_nats::Client> {
        let mut guard = match self.conn.try_lock() {
            Ok(guard) => guard,
            Err(_) => {
                debug!("Queue connect already in flight, failing fast");
                return None;
            }
        };

        if let Some(client) = guard.as_ref() {
            if client.connection_state() == async_nats::connection::State::Connected {
                return Some(client.clone());
            }
            debug!("Shared queue connection dropped, reconnecting");
            *guard = None;
        }

        let mut delay = self.backoff_base;
        for attempt in 1..=self.connect_attempts {
            match async_nats::connect(&self.queue_url).await {
                Ok(client) => {
                    info!("Connected to queue at {}", self.queue_url);
                    *guard = Some(client.clone());
                    return Some(client);
                }
                Err(e) => {
                    warn!(
                        "Queue connect attempt {}/{} failed: {}",
                        attempt, self.connect_attempts, e
                    );
                    if attempt < self.connect_attempts {
                        // 抖动避免多个进程同时重连
                        let jitter = rand::thread_rng()
                            .gen_range(0..=self.backoff_base.as_millis().max(1) as u64);
                        tokio::time::sleep(delay + Duration::from_millis(jitter)).await;
                        delay *= 2;
                    }
                }
            }
        }
        None
    }
}

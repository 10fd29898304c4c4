pub mod cache;

pub use cache::{NotificationCache, DEFAULT_CACHE_CAPACITY};

use crate::error::Result;
use crate::models::Notification;
use futures::StreamExt;
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// 推送通道连接状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub base_url: String,
    pub recipient_id: String,
    pub reconnect_base: Duration,
    pub reconnect_max: Duration,
    pub cache_capacity: usize,
    /// 本地快照目录；None 表示不持久化
    pub cache_dir: Option<PathBuf>,
}

impl ClientConfig {
    pub fn new(base_url: impl Into<String>, recipient_id: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            recipient_id: recipient_id.into(),
            reconnect_base: Duration::from_millis(500),
            reconnect_max: Duration::from_secs(30),
            cache_capacity: DEFAULT_CACHE_CAPACITY,
            cache_dir: None,
        }
    }

    /// 从服务配置派生客户端配置
    pub fn from_config(
        config: &crate::config::Config,
        base_url: impl Into<String>,
        recipient_id: impl Into<String>,
    ) -> Self {
        Self {
            base_url: base_url.into(),
            recipient_id: recipient_id.into(),
            reconnect_base: Duration::from_millis(config.client_reconnect_base_ms),
            reconnect_max: Duration::from_millis(config.client_reconnect_max_ms),
            cache_capacity: config.client_cache_capacity,
            cache_dir: config.client_cache_dir.as_ref().map(PathBuf::from),
        }
    }
}

/// 第 N 次连续失败后的重连延迟：指数退避，封顶 max
pub fn reconnect_delay(base: Duration, max: Duration, failures: u32) -> Duration {
    base.checked_mul(2u32.saturating_pow(failures))
        .unwrap_or(max)
        .min(max)
}

/// 接收端调和器
///
/// 每个实例维护一条推送通道和一份有界的本地缓存，
/// 把推送到的通知与查询接口拉回的通知合并在一起。
/// 连接断开后由唯一的驱动任务按封顶退避调度重连，
/// 同一时刻最多只有一个待触发的重连定时器；
/// `connect_now` 会取代并取消它。
#[derive(Clone)]
pub struct NotificationClient {
    config: ClientConfig,
    http: reqwest::Client,
    state: Arc<Mutex<ConnectionState>>,
    failures: Arc<Mutex<u32>>,
    cache: Arc<Mutex<NotificationCache>>,
    connect_now: Arc<Notify>,
}

impl NotificationClient {
    pub fn new(config: ClientConfig) -> Self {
        let cache = Self::load_snapshot(&config);
        Self {
            config,
            http: reqwest::Client::new(),
            state: Arc::new(Mutex::new(ConnectionState::Disconnected)),
            failures: Arc::new(Mutex::new(0)),
            cache: Arc::new(Mutex::new(cache)),
            connect_now: Arc::new(Notify::new()),
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.lock()
    }

    /// 启动驱动任务；停止时 abort 返回的句柄即可
    pub fn start(&self) -> JoinHandle<()> {
        let client = self.clone();
        tokio::spawn(async move {
            client.run().await;
        })
    }

    /// 立即发起连接，取消任何待触发的重连定时器
    pub fn connect_now(&self) {
        self.connect_now.notify_waiters();
    }

    /// 驱动循环：连接、读流、断开后按封顶退避重连
    pub async fn run(&self) {
        loop {
            *self.state.lock() = ConnectionState::Connecting;
            match self.stream_once().await {
                Ok(()) => info!("Push channel closed"),
                Err(e) => warn!("Push channel error: {}", e),
            }
            *self.state.lock() = ConnectionState::Disconnected;

            let failures = {
                let mut failures = self.failures.lock();
                let current = *failures;
                *failures = failures.saturating_add(1);
                current
            };
            let delay = reconnect_delay(
                self.config.reconnect_base,
                self.config.reconnect_max,
                failures,
            );
            debug!("Reconnecting push channel in {:?}", delay);
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = self.connect_now.notified() => {
                    debug!("Reconnect timer superseded by explicit connect");
                }
            }
        }
    }

    /// 打开一次推送通道并消费到关闭为止。
    ///
    /// 连接成功即清零失败计数，并先从查询接口合并一次服务端状态，
    /// 补上断线期间错过的推送。
    pub async fn stream_once(&self) -> Result<()> {
        let url = format!(
            "{}/api/notifications/stream?recipientId={}",
            self.config.base_url.trim_end_matches('/'),
            self.config.recipient_id
        );
        let response = self
            .http
            .get(&url)
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .send()
            .await?
            .error_for_status()?;

        *self.state.lock() = ConnectionState::Connected;
        *self.failures.lock() = 0;
        info!("Push channel connected for recipient {}", self.config.recipient_id);

        if let Err(e) = self.refresh().await {
            warn!("Failed to merge server notifications: {}", e);
        }

        let mut body = response.bytes_stream();
        let mut buffer = String::new();
        while let Some(chunk) = body.next().await {
            let chunk = chunk?;
            buffer.push_str(&String::from_utf8_lossy(&chunk));
            while let Some(boundary) = buffer.find("\n\n") {
                let frame: String = buffer.drain(..boundary + 2).collect();
                self.handle_frame(frame.trim_end());
            }
        }
        Ok(())
    }

    /// 从查询接口拉取并合并到本地缓存
    pub async fn refresh(&self) -> Result<()> {
        let url = format!(
            "{}/api/notifications?recipientId={}",
            self.config.base_url.trim_end_matches('/'),
            self.config.recipient_id
        );
        let body: serde_json::Value = self
            .http
            .get(&url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        let notifications: Vec<Notification> = serde_json::from_value(
            body.get("notifications")
                .cloned()
                .unwrap_or_else(|| serde_json::json!([])),
        )?;

        {
            let mut cache = self.cache.lock();
            // 列表按创建时间降序返回，反向插入让最新一条落在队首
            for notification in notifications.into_iter().rev() {
                cache.upsert(notification);
            }
        }
        self.persist();
        Ok(())
    }

    /// 处理一个 SSE 帧。
    ///
    /// ":" 开头的注释行（connected 标记、keep-alive）忽略；
    /// 无法解析的 data 负载记日志后丢弃，通道保持打开。
    fn handle_frame(&self, frame: &str) {
        let mut data = String::new();
        for line in frame.lines() {
            if let Some(rest) = line.strip_prefix("data:") {
                data.push_str(rest.trim_start());
            }
        }
        if data.is_empty() {
            return;
        }

        match serde_json::from_str::<Notification>(&data) {
            Ok(notification) => self.apply_push(notification),
            Err(e) => warn!("Discarding malformed push payload: {}", e),
        }
    }

    fn apply_push(&self, notification: Notification) {
        debug!("Received pushed notification {}", notification.id);
        self.cache.lock().upsert(notification);
        self.persist();
    }

    /// 展示顺序的本地视图
    pub fn notifications(&self) -> Vec<Notification> {
        self.cache
            .lock()
            .display_order()
            .into_iter()
            .cloned()
            .collect()
    }

    pub fn cache_len(&self) -> usize {
        self.cache.lock().len()
    }

    /// 本地已读标记；不回传服务端
    pub fn mark_read(&self, id: &str) -> bool {
        let changed = self.cache.lock().mark_read(id);
        if changed {
            self.persist();
        }
        changed
    }

    /// 本地删除标记；不回传服务端
    pub fn delete(&self, id: &str) -> bool {
        let changed = self.cache.lock().delete(id);
        if changed {
            self.persist();
        }
        changed
    }

    pub fn clear_all(&self) {
        self.cache.lock().clear_all();
        self.persist();
    }

    fn snapshot_path(config: &ClientConfig) -> Option<PathBuf> {
        config
            .cache_dir
            .as_ref()
            .map(|dir| dir.join(format!("{}.json", config.recipient_id)))
    }

    fn load_snapshot(config: &ClientConfig) -> NotificationCache {
        let Some(path) = Self::snapshot_path(config) else {
            return NotificationCache::new(config.cache_capacity);
        };
        match std::fs::read_to_string(&path) {
            Ok(raw) => match serde_json::from_str::<Vec<Notification>>(&raw) {
                Ok(snapshot) => NotificationCache::restore(config.cache_capacity, snapshot),
                Err(e) => {
                    warn!("Ignoring corrupt cache snapshot {}: {}", path.display(), e);
                    NotificationCache::new(config.cache_capacity)
                }
            },
            Err(_) => NotificationCache::new(config.cache_capacity),
        }
    }

    fn persist(&self) {
        let Some(path) = Self::snapshot_path(&self.config) else {
            return;
        };
        let snapshot = self.cache.lock().snapshot();
        let write = || -> std::io::Result<()> {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let raw = serde_json::to_string(&snapshot)?;
            std::fs::write(&path, raw)
        };
        if let Err(e) = write() {
            warn!("Failed to persist cache snapshot {}: {}", path.display(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reconnect_delay_grows_and_caps() {
        let base = Duration::from_millis(500);
        let max = Duration::from_secs(30);

        assert_eq!(reconnect_delay(base, max, 0), Duration::from_millis(500));
        assert_eq!(reconnect_delay(base, max, 1), Duration::from_secs(1));
        assert_eq!(reconnect_delay(base, max, 3), Duration::from_secs(4));
        // 任意大的失败次数都不超过上限
        for failures in 6..64 {
            assert_eq!(reconnect_delay(base, max, failures), max);
        }
    }

    #[test]
    fn test_handle_frame_ignores_comments_and_malformed_payloads() {
        let client = NotificationClient::new(ClientConfig::new("http://localhost:3000", "u1"));

        client.handle_frame(": connected");
        client.handle_frame("data: {not json");
        assert_eq!(client.cache_len(), 0);

        client.handle_frame(
            "data: {\"id\":\"n1\",\"recipientId\":\"u1\",\"title\":\"t\",\"message\":\"m\",\"createdAt\":\"2026-08-27T00:00:00Z\"}",
        );
        assert_eq!(client.cache_len(), 1);
    }

    #[test]
    fn test_pushed_enum_fields_are_normalized() {
        let client = NotificationClient::new(ClientConfig::new("http://localhost:3000", "u1"));
        client.handle_frame(
            "data: {\"id\":\"n1\",\"recipientId\":\"u1\",\"title\":\"t\",\"message\":\"m\",\"priority\":\"whatever\",\"category\":\"bogus\",\"createdAt\":\"2026-08-27T00:00:00Z\"}",
        );

        let notifications = client.notifications();
        assert_eq!(notifications.len(), 1);
        assert_eq!(
            notifications[0].priority,
            crate::models::NotificationPriority::Medium
        );
        assert_eq!(
            notifications[0].category,
            crate::models::NotificationCategory::Default
        );
    }

    #[test]
    fn test_local_actions_do_not_require_connection() {
        let client = NotificationClient::new(ClientConfig::new("http://localhost:3000", "u1"));
        client.handle_frame(
            "data: {\"id\":\"n1\",\"recipientId\":\"u1\",\"title\":\"t\",\"message\":\"m\",\"createdAt\":\"2026-08-27T00:00:00Z\"}",
        );

        assert!(client.mark_read("n1"));
        assert!(client.delete("n1"));
        client.clear_all();
        assert_eq!(client.cache_len(), 0);
        assert_eq!(client.state(), ConnectionState::Disconnected);
    }
}

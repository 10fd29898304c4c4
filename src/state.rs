use crate::{
    config::Config,
    services::{ConnectionRegistry, NotificationService},
};
use std::sync::Arc;

/// 应用程序的共享状态
///
/// 注册表每进程构造一次，经由这里注入消费者和流式端点。
#[derive(Clone)]
pub struct AppState {
    /// 应用配置
    pub config: Config,

    /// 通知服务（持久化 + 扇出）
    pub notification_service: NotificationService,

    /// 推送连接注册表
    pub registry: Arc<ConnectionRegistry>,
}

impl AppState {
    /// 检查是否为生产环境
    pub fn is_production(&self) -> bool {
        self.config.is_production()
    }

    /// 检查是否为开发环境
    pub fn is_development(&self) -> bool {
        self.config.is_development()
    }
}

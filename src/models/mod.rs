pub mod notification;

// 重新导出常用类型
pub use notification::{Notification, NotificationCategory, NotificationEvent, NotificationPriority};

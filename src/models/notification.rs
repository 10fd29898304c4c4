use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;
use validator::Validate;

/// 通知优先级
///
/// 线上格式为大写字符串（"HIGH"/"MEDIUM"/"LOW"）。
/// 未知或缺失的值一律回退到 Medium，不拒绝。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum NotificationPriority {
    High,
    Medium,
    Low,
}

impl NotificationPriority {
    /// 展示排序用的权重：HIGH=3, MEDIUM=2, LOW=1
    pub fn rank(&self) -> u8 {
        match self {
            NotificationPriority::High => 3,
            NotificationPriority::Medium => 2,
            NotificationPriority::Low => 1,
        }
    }

    /// 宽松解析：大小写不敏感，无法识别时回退到默认值
    pub fn parse_or_default(raw: &str) -> Self {
        match raw.to_ascii_uppercase().as_str() {
            "HIGH" => NotificationPriority::High,
            "MEDIUM" => NotificationPriority::Medium,
            "LOW" => NotificationPriority::Low,
            _ => NotificationPriority::Medium,
        }
    }
}

impl Default for NotificationPriority {
    fn default() -> Self {
        NotificationPriority::Medium
    }
}

/// 通知分类
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationCategory {
    Message,
    Order,
    Reminder,
    System,
    Default,
}

impl NotificationCategory {
    pub fn parse_or_default(raw: &str) -> Self {
        match raw.to_ascii_lowercase().as_str() {
            "message" => NotificationCategory::Message,
            "order" => NotificationCategory::Order,
            "reminder" => NotificationCategory::Reminder,
            "system" => NotificationCategory::System,
            _ => NotificationCategory::Default,
        }
    }
}

impl Default for NotificationCategory {
    fn default() -> Self {
        NotificationCategory::Default
    }
}

fn lenient_priority<'de, D>(deserializer: D) -> Result<NotificationPriority, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    Ok(raw
        .as_deref()
        .map(NotificationPriority::parse_or_default)
        .unwrap_or_default())
}

fn lenient_category<'de, D>(deserializer: D) -> Result<NotificationCategory, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    Ok(raw
        .as_deref()
        .map(NotificationCategory::parse_or_default)
        .unwrap_or_default())
}

/// 持久化的通知记录
///
/// `recipient_id` 是所有查询和变更的唯一归属范围；
/// `deleted = true` 的行对默认查询不可见（软删除）。
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub id: String,
    pub recipient_id: String,
    pub title: String,
    pub message: String,
    #[serde(default, deserialize_with = "lenient_category")]
    pub category: NotificationCategory,
    #[serde(default, deserialize_with = "lenient_priority")]
    pub priority: NotificationPriority,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link: Option<String>,
    #[serde(default)]
    pub read: bool,
    #[serde(default)]
    pub deleted: bool,
    pub created_at: DateTime<Utc>,
}

/// 业务事件：生产者提交、队列传输、POST /notifications 的请求体
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct NotificationEvent {
    #[validate(length(min = 1, message = "recipientId must not be empty"))]
    pub recipient_id: String,
    pub title: String,
    pub message: String,
    #[serde(default, deserialize_with = "lenient_category")]
    pub category: NotificationCategory,
    #[serde(default, deserialize_with = "lenient_priority")]
    pub priority: NotificationPriority,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link: Option<String>,
}

impl NotificationEvent {
    /// 转换为待持久化的通知记录，由服务端分配 id 和创建时间
    pub fn into_notification(self) -> Notification {
        Notification {
            id: Uuid::new_v4().to_string(),
            recipient_id: self.recipient_id,
            title: self.title,
            message: self.message,
            category: self.category,
            priority: self.priority,
            link: self.link,
            read: false,
            deleted: false,
            created_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_rank_ordering() {
        assert!(NotificationPriority::High.rank() > NotificationPriority::Medium.rank());
        assert!(NotificationPriority::Medium.rank() > NotificationPriority::Low.rank());
    }

    #[test]
    fn test_priority_parse_is_case_insensitive() {
        assert_eq!(
            NotificationPriority::parse_or_default("high"),
            NotificationPriority::High
        );
        assert_eq!(
            NotificationPriority::parse_or_default("Low"),
            NotificationPriority::Low
        );
    }

    #[test]
    fn test_unknown_priority_falls_back_to_medium() {
        assert_eq!(
            NotificationPriority::parse_or_default("URGENT"),
            NotificationPriority::Medium
        );
    }

    #[test]
    fn test_unknown_category_falls_back_to_default() {
        assert_eq!(
            NotificationCategory::parse_or_default("promotion"),
            NotificationCategory::Default
        );
        assert_eq!(
            NotificationCategory::parse_or_default("ORDER"),
            NotificationCategory::Order
        );
    }

    #[test]
    fn test_event_with_missing_enums_normalizes() {
        let event: NotificationEvent = serde_json::from_str(
            r#"{"recipientId":"u1","title":"Warehouse Created","message":"ok"}"#,
        )
        .unwrap();
        assert_eq!(event.priority, NotificationPriority::Medium);
        assert_eq!(event.category, NotificationCategory::Default);
    }

    #[test]
    fn test_event_with_invalid_enums_normalizes() {
        let event: NotificationEvent = serde_json::from_str(
            r#"{"recipientId":"u1","title":"t","message":"m","category":"bogus","priority":"medium"}"#,
        )
        .unwrap();
        assert_eq!(event.category, NotificationCategory::Default);
        assert_eq!(event.priority, NotificationPriority::Medium);
    }

    #[test]
    fn test_into_notification_assigns_server_fields() {
        let event: NotificationEvent = serde_json::from_str(
            r#"{"recipientId":"u1","title":"t","message":"m","priority":"HIGH"}"#,
        )
        .unwrap();
        let notification = event.into_notification();
        assert!(!notification.id.is_empty());
        assert!(!notification.read);
        assert!(!notification.deleted);
        assert_eq!(notification.priority, NotificationPriority::High);
    }

    #[test]
    fn test_notification_wire_format_is_camel_case() {
        let notification = Notification {
            id: "n1".into(),
            recipient_id: "u1".into(),
            title: "t".into(),
            message: "m".into(),
            category: NotificationCategory::Order,
            priority: NotificationPriority::High,
            link: None,
            read: false,
            deleted: false,
            created_at: Utc::now(),
        };
        let value = serde_json::to_value(&notification).unwrap();
        assert_eq!(value["recipientId"], "u1");
        assert_eq!(value["priority"], "HIGH");
        assert_eq!(value["category"], "order");
        assert!(value.get("link").is_none());
    }
}

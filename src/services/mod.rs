pub mod consumer;
pub mod notification;
pub mod producer;
pub mod registry;
pub mod store;

// 重新导出常用类型
pub use consumer::IngestionConsumer;
pub use notification::NotificationService;
pub use producer::EventProducer;
pub use registry::ConnectionRegistry;
pub use store::{MemoryStore, NotificationStore, SurrealStore};

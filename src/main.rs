use std::sync::Arc;
use axum::{
    routing::{get, Router},
    http::{Method, HeaderValue},
};
use tower_http::{
    cors::{CorsLayer, Any},
    compression::CompressionLayer,
    trace::TraceLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use tracing::{info, warn};

use stockhub_notify::{
    config::Config,
    routes,
    services::{
        ConnectionRegistry, IngestionConsumer, MemoryStore, NotificationService,
        NotificationStore, SurrealStore,
    },
    state::AppState,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 初始化日志
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("LOG_LEVEL").unwrap_or_else(|_| "stockhub_notify=debug,tower_http=debug".into())
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting StockHub notification service...");

    // 加载配置
    dotenv::dotenv().ok();
    let config = Config::from_env()?;

    // 初始化存储
    let store: Arc<dyn NotificationStore> = match config.store_driver.as_str() {
        "memory" => {
            warn!("Using in-memory notification store; rows will not survive restarts");
            Arc::new(MemoryStore::new())
        }
        _ => {
            let store = SurrealStore::connect(&config).await?;
            store.verify_connection().await?;
            info!("Database connection established successfully");
            Arc::new(store)
        }
    };

    // 注册表每进程一份，注入消费者与流式端点
    let registry = Arc::new(ConnectionRegistry::new());
    let notification_service = NotificationService::new(store, registry.clone());

    // 启动队列摄取消费者
    let consumer = IngestionConsumer::new(&config, notification_service.clone());
    tokio::spawn(consumer.run());

    // 创建应用状态
    let app_state = Arc::new(AppState {
        config: config.clone(),
        notification_service,
        registry,
    });

    // 配置 CORS
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PATCH, Method::DELETE, Method::OPTIONS])
        .allow_headers(Any)
        .allow_origin(
            config.cors_allowed_origins
                .split(',')
                .map(|origin| origin.parse::<HeaderValue>().unwrap())
                .collect::<Vec<_>>(),
        );

    // 构建应用路由
    let app = Router::new()
        .route("/", get(health_check))
        .route("/health", get(health_check))
        .nest("/api/notifications", routes::notifications::router())
        .nest("/api/diagnostics", routes::diagnostics::router())
        .layer(cors)
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .with_state(app_state);

    // 启动主服务器；绑定失败是这个子系统里唯一的致命错误
    let addr = format!("{}:{}", config.server_host, config.server_port);
    info!("Starting server on http://{}", addr);

    axum::Server::bind(&addr.parse()?)
        .serve(app.into_make_service())
        .await?;

    Ok(())
}

async fn health_check() -> &'static str {
    "stockhub-notify is running!"
}

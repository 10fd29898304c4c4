use crate::{
    error::Result,
    routes::notifications::RecipientQuery,
    services::registry::ConnectionRegistry,
    state::AppState,
};
use axum::{
    extract::{Query, State},
    http::header,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse,
    },
};
use futures::Stream;
use std::{
    convert::Infallible,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
    time::Duration,
};
use tokio::sync::mpsc;
use tracing::info;
use uuid::Uuid;

/// Open a long-lived push channel for a recipient
/// GET /api/notifications/stream?recipientId
///
/// 首帧是 ": connected" 注释帧；之后每帧是一条 JSON 序列化的通知。
/// 连接以任何方式终止（客户端关闭、网络断开、服务端退出）时，
/// 由流内的 Drop guard 注销注册表条目——每条退出路径都会走到它。
pub async fn notification_stream(
    State(state): State<Arc<AppState>>,
    Query(query): Query<RecipientQuery>,
) -> Result<impl IntoResponse> {
    let recipient_id = query.require_recipient()?.to_string();

    let (tx, rx) = mpsc::unbounded_channel::<String>();
    let handle_id = state.registry.register(&recipient_id, tx);
    info!("Opened push stream {} for recipient {}", handle_id, recipient_id);

    let stream = PushStream {
        rx,
        greeted: false,
        _guard: StreamGuard {
            registry: state.registry.clone(),
            recipient_id,
            handle_id,
        },
    };

    let sse = Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(state.config.stream_keep_alive_secs))
            .text("keep-alive"),
    );

    Ok(([(header::CACHE_CONTROL, "no-cache")], sse))
}

/// 推送事件流：先发 connected 标记，随后转发注册表写入的负载
struct PushStream {
    rx: mpsc::UnboundedReceiver<String>,
    greeted: bool,
    _guard: StreamGuard,
}

impl Stream for PushStream {
    type Item = std::result::Result<Event, Infallible>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if !this.greeted {
            this.greeted = true;
            return Poll::Ready(Some(Ok(Event::default().comment("connected"))));
        }
        match this.rx.poll_recv(cx) {
            Poll::Ready(Some(payload)) => Poll::Ready(Some(Ok(Event::default().data(payload)))),
            Poll::Ready(None) => Poll::Ready(None),
            Poll::Pending => Poll::Pending,
        }
    }
}

/// 持有注册信息，析构时注销
struct StreamGuard {
    registry: Arc<ConnectionRegistry>,
    recipient_id: String,
    handle_id: Uuid,
}

impl Drop for StreamGuard {
    fn drop(&mut self) {
        self.registry.unregister(&self.recipient_id, self.handle_id);
        info!(
            "Closed push stream {} for recipient {}",
            self.handle_id, self.recipient_id
        );
    }
}

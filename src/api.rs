use std::sync::Arc;

use axum::extract::State;
use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::response::Response;
use axum::{Router, routing::get};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::dispatcher::Dispatcher;

pub(crate) fn router(dispatcher: Arc<Dispatcher>) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/events", get(events))
        .with_state(dispatcher)
}

pub(crate) fn start_api_server(bind: String, dispatcher: Arc<Dispatcher>, cancel: CancellationToken) {
    tokio::spawn(async move {
        let app = router(dispatcher);

        let listener = match TcpListener::bind(&bind).await {
            Ok(listener) => listener,
            Err(e) => {
                log::error!("cannot bind {}: {}", bind, e);
                cancel.cancel();
                return;
            }
        };
        log::info!("Event server listening on {}", bind);
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal(cancel))
            .await
        {
            log::error!("Error running event server: {}", e);
        }
    });
}

async fn shutdown_signal(cancel: CancellationToken) {
    cancel.cancelled().await;
    log::info!("Shutting down event server...");
}

async fn index() -> &'static str {
    "timelapse generator, connect to /events"
}

async fn events(ws: WebSocketUpgrade, State(dispatcher): State<Arc<Dispatcher>>) -> Response {
    ws.on_upgrade(move |socket| serve_observer(socket, dispatcher))
}

async fn serve_observer(socket: WebSocket, dispatcher: Arc<Dispatcher>) {
    let (id, mut outbox) = dispatcher.connect();
    let (mut sink, mut stream) = socket.split();

    let writer = tokio::spawn(async move {
        while let Some(frame) = outbox.recv().await {
            if sink.send(WsMessage::Binary(frame)).await.is_err() {
                break;
            }
        }
    });

    while let Some(msg) = stream.next().await {
        match msg {
            Ok(WsMessage::Binary(frame)) => dispatcher.handle_inbound(id, &frame).await,
            Ok(WsMessage::Text(_)) => log::debug!("[observer {}] ignoring text frame", id),
            Ok(WsMessage::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                log::debug!("[observer {}] socket error: {}", id, e);
                break;
            }
        }
    }

    dispatcher.disconnect(id);
    writer.abort();
}

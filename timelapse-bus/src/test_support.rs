use axum::Router;
use axum::extract::Path;
use axum::http::StatusCode;
use axum::routing::get;

/// Serves a tiny 2x2 canvas under `/canvas/{hash}` and users under `/game/users/{id}`.
///
/// Hash `missing` has no backup. User 7 is `seven`, user 8 fails to resolve.
pub(crate) async fn serve_canvas() -> anyhow::Result<String> {
    let app = Router::new()
        .route(
            "/canvas/{hash}/metadata.json",
            get(|Path(hash): Path<String>| async move {
                if hash == "missing" {
                    return Err(StatusCode::NOT_FOUND);
                }
                Ok(r#"{"palette":[4278190335,"16711935"],"width":2,"height":2}"#)
            }),
        )
        .route(
            "/canvas/{hash}/place",
            get(|| async { vec![0u8, 1, 1, 0] }),
        )
        .route(
            "/canvas/{hash}/placers",
            get(|| async { vec![0u8, 0, 0, 7, 0, 0, 0, 7, 0, 0, 0, 8, 0, 0, 0, 0] }),
        )
        .route(
            "/game/users/{id}",
            get(|Path(id): Path<u32>| async move {
                match id {
                    7 => Ok(r#"{"chatName":"seven"}"#),
                    _ => Err(StatusCode::INTERNAL_SERVER_ERROR),
                }
            }),
        );

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    Ok(format!("http://{addr}"))
}

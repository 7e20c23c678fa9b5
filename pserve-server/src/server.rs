//! HTTP server and request dispatch

use crate::{auth, resolve, stream, AppState};
use anyhow::Result;
use bytes::Bytes;
use http_body_util::{combinators::BoxBody, BodyExt, Full};
use hyper::body::Incoming;
use hyper::header::{HeaderValue, CONTENT_DISPOSITION, CONTENT_TYPE};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

/// Response body type: either a buffered payload or a file stream
pub type ResponseBody = BoxBody<Bytes, io::Error>;

/// Request-scoped failures, each mapped to one HTTP response
#[derive(Debug, thiserror::Error)]
pub enum RequestError {
    #[error("invalid token")]
    InvalidToken,

    #[error("path traversal detected")]
    PathTraversal,

    #[error("no such file")]
    NotFound,

    #[error("transfer failed: {0}")]
    Transfer(#[from] io::Error),
}

/// Run the HTTP server
pub async fn run_server(state: Arc<AppState>) -> Result<()> {
    let addr: SocketAddr = format!(
        "{}:{}",
        state.config.server.bind_address, state.config.server.port
    )
    .parse()?;

    let listener = TcpListener::bind(addr).await?;
    info!("HTTP server listening on http://{}", addr);

    loop {
        let (tcp, remote_addr) = listener.accept().await?;
        let io = TokioIo::new(tcp);
        let state = state.clone();

        tokio::spawn(async move {
            let service = service_fn(move |req| {
                let state = state.clone();
                async move { handle_request(state, req, remote_addr).await }
            });

            if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
                debug!("Connection error: {:?}", err);
            }
        });
    }
}

/// Handle incoming HTTP request
async fn handle_request(
    state: Arc<AppState>,
    req: Request<Incoming>,
    remote_addr: SocketAddr,
) -> Result<Response<ResponseBody>, Infallible> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    if state.config.server.access_log {
        info!("{} {} {}", remote_addr.ip(), method, path);
    }

    let token = req
        .headers()
        .get(state.config.auth.header.as_str())
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned);

    Ok(dispatch(state, &method, &path, token.as_deref(), remote_addr).await)
}

/// Route one request: the public stats endpoint, or an authenticated file
/// download.
pub async fn dispatch(
    state: Arc<AppState>,
    method: &Method,
    path: &str,
    token: Option<&str>,
    remote_addr: SocketAddr,
) -> Response<ResponseBody> {
    if method != Method::GET {
        return text_response(StatusCode::METHOD_NOT_ALLOWED, "405 Method Not Allowed");
    }

    if path == auth::STATS_PATH {
        return stats_response(&state).await;
    }

    match file_response(&state, path, token, remote_addr).await {
        Ok(response) => response,
        Err(RequestError::InvalidToken) => {
            warn!(
                "Unauthorized access attempt from {} to {}",
                remote_addr.ip(),
                path
            );
            text_response(StatusCode::FORBIDDEN, "403 Forbidden: Invalid Token")
        }
        Err(RequestError::PathTraversal) => {
            warn!(
                "Path traversal attempt from {} to {}",
                remote_addr.ip(),
                path
            );
            text_response(
                StatusCode::FORBIDDEN,
                "403 Forbidden: Path Traversal Detected",
            )
        }
        Err(RequestError::NotFound) => {
            debug!("{} requested missing file {}", remote_addr.ip(), path);
            text_response(StatusCode::NOT_FOUND, "404 Not Found")
        }
        Err(RequestError::Transfer(e)) => {
            error!("{} failed to open {}: {}", remote_addr.ip(), path, e);
            text_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "500 Internal Server Error",
            )
        }
    }
}

/// Serve one file: auth, confinement, regular-file check, then a streamed
/// 200 response. The body begins transmitting before the file is fully
/// read; stats are recorded by a completion task only if every byte made
/// it out.
async fn file_response(
    state: &Arc<AppState>,
    path: &str,
    token: Option<&str>,
    remote_addr: SocketAddr,
) -> Result<Response<ResponseBody>, RequestError> {
    if !auth::authorize(path, token, &state.config.auth.token) {
        return Err(RequestError::InvalidToken);
    }

    let rel = path.trim_start_matches('/').to_string();
    let resolved = resolve::resolve(&state.root, &rel).await?;

    let meta = tokio::fs::metadata(&resolved)
        .await
        .map_err(|_| RequestError::NotFound)?;
    if !meta.is_file() {
        return Err(RequestError::NotFound);
    }

    let file = tokio::fs::File::open(&resolved).await.map_err(|e| {
        if e.kind() == io::ErrorKind::NotFound {
            RequestError::NotFound
        } else {
            RequestError::Transfer(e)
        }
    })?;

    let stream::Transfer { body, completion } =
        stream::start(file, state.config.files.chunk_size);

    let stats = state.stats.clone();
    let client = remote_addr.ip().to_string();
    let file_name = rel.clone();
    tokio::spawn(async move {
        match completion.await {
            Ok(Ok(report)) => {
                stats
                    .write()
                    .await
                    .record(file_name.clone(), report.bytes, client.clone(), report.elapsed);
                info!(
                    "{} downloaded {} ({} bytes) in {:.2}s",
                    client,
                    file_name,
                    report.bytes,
                    report.elapsed.as_secs_f64()
                );
            }
            Ok(Err(e)) => {
                error!("{} transfer of {} aborted: {}", client, file_name, e);
            }
            Err(_) => {
                error!("{} transfer of {} ended without a report", client, file_name);
            }
        }
    });

    let basename = resolved
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("download");
    let disposition = HeaderValue::from_str(&format!("attachment; filename=\"{}\"", basename))
        .unwrap_or_else(|_| HeaderValue::from_static("attachment"));

    let response = Response::builder()
        .status(StatusCode::OK)
        .header(CONTENT_TYPE, "application/octet-stream")
        .header(CONTENT_DISPOSITION, disposition)
        .body(body)
        .unwrap();

    Ok(response)
}

/// Serialize the current stats snapshot as JSON
async fn stats_response(state: &Arc<AppState>) -> Response<ResponseBody> {
    let snapshot = state.stats.read().await.snapshot();
    match serde_json::to_string(&snapshot) {
        Ok(json) => Response::builder()
            .status(StatusCode::OK)
            .header(CONTENT_TYPE, "application/json")
            .body(full_body(json.into_bytes()))
            .unwrap(),
        Err(e) => {
            error!("Failed to serialize stats: {}", e);
            text_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "500 Internal Server Error",
            )
        }
    }
}

/// Create a full body response
fn full_body(data: Vec<u8>) -> ResponseBody {
    Full::new(Bytes::from(data))
        .map_err(|_: Infallible| unreachable!())
        .boxed()
}

/// Create a plain-text response
fn text_response(status: StatusCode, message: &str) -> Response<ResponseBody> {
    Response::builder()
        .status(status)
        .header(CONTENT_TYPE, "text/plain; charset=utf-8")
        .body(full_body(message.as_bytes().to_vec()))
        .unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stats::Stats;
    use pserve_common::PserveConfig;
    use std::time::Duration;
    use tempfile::TempDir;
    use tokio::sync::RwLock;

    const TOKEN: &str = "secret";

    fn remote() -> SocketAddr {
        "10.0.0.1:40000".parse().unwrap()
    }

    fn state_with_root(tmp: &TempDir) -> Arc<AppState> {
        let root = tmp.path().join("data");
        std::fs::create_dir(&root).unwrap();
        std::fs::write(root.join("report.pdf"), vec![7u8; 1000]).unwrap();

        let mut config = PserveConfig::default();
        config.auth.token = TOKEN.to_string();
        config.files.root = root.to_str().unwrap().to_string();
        config.server.access_log = false;

        Arc::new(AppState {
            root: root.canonicalize().unwrap(),
            config: Arc::new(config),
            stats: Arc::new(RwLock::new(Stats::default())),
        })
    }

    async fn get(
        state: &Arc<AppState>,
        path: &str,
        token: Option<&str>,
    ) -> Response<ResponseBody> {
        dispatch(state.clone(), &Method::GET, path, token, remote()).await
    }

    async fn body_string(response: Response<ResponseBody>) -> String {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    /// Stats are recorded by a spawned completion task, so give it a moment.
    async fn wait_for_downloads(state: &Arc<AppState>, n: u64) {
        for _ in 0..100 {
            if state.stats.read().await.total_downloads >= n {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("stats never reached {} downloads", n);
    }

    #[tokio::test]
    async fn test_download_success() {
        let tmp = TempDir::new().unwrap();
        let state = state_with_root(&tmp);

        let response = get(&state, "/report.pdf", Some(TOKEN)).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[CONTENT_TYPE].to_str().unwrap(),
            "application/octet-stream"
        );
        assert_eq!(
            response.headers()[CONTENT_DISPOSITION].to_str().unwrap(),
            "attachment; filename=\"report.pdf\""
        );

        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(bytes.len(), 1000);
        assert!(bytes.iter().all(|&b| b == 7));

        wait_for_downloads(&state, 1).await;
        let stats = state.stats.read().await;
        assert_eq!(stats.total_downloads, 1);
        assert_eq!(stats.total_bytes_served, 1000);
        assert_eq!(stats.recent.len(), 1);
        assert_eq!(stats.recent[0].file, "report.pdf");
        assert_eq!(stats.recent[0].bytes, 1000);
        assert_eq!(stats.recent[0].client, "10.0.0.1");
    }

    #[tokio::test]
    async fn test_bad_token_rejected() {
        let tmp = TempDir::new().unwrap();
        let state = state_with_root(&tmp);

        for token in [None, Some("wrong"), Some("Secret")] {
            let response = get(&state, "/report.pdf", token).await;
            assert_eq!(response.status(), StatusCode::FORBIDDEN);
            assert_eq!(body_string(response).await, "403 Forbidden: Invalid Token");
        }

        assert_eq!(state.stats.read().await.total_downloads, 0);
    }

    #[tokio::test]
    async fn test_traversal_rejected_without_stats() {
        let tmp = TempDir::new().unwrap();
        let state = state_with_root(&tmp);

        let response = get(&state, "/../../etc/passwd", Some(TOKEN)).await;
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert_eq!(
            body_string(response).await,
            "403 Forbidden: Path Traversal Detected"
        );

        let stats = state.stats.read().await;
        assert_eq!(stats.total_downloads, 0);
        assert!(stats.recent.is_empty());
    }

    #[tokio::test]
    async fn test_missing_file_is_404_without_stats() {
        let tmp = TempDir::new().unwrap();
        let state = state_with_root(&tmp);

        let response = get(&state, "/nope.bin", Some(TOKEN)).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(body_string(response).await, "404 Not Found");
        assert_eq!(state.stats.read().await.total_downloads, 0);
    }

    #[tokio::test]
    async fn test_root_itself_is_404() {
        let tmp = TempDir::new().unwrap();
        let state = state_with_root(&tmp);

        let response = get(&state, "/", Some(TOKEN)).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_non_get_rejected() {
        let tmp = TempDir::new().unwrap();
        let state = state_with_root(&tmp);

        let response =
            dispatch(state.clone(), &Method::POST, "/report.pdf", Some(TOKEN), remote()).await;
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    }

    #[tokio::test]
    async fn test_stats_endpoint_bypasses_auth() {
        let tmp = TempDir::new().unwrap();
        let state = state_with_root(&tmp);

        get(&state, "/report.pdf", Some(TOKEN))
            .await
            .into_body()
            .collect()
            .await
            .unwrap();
        wait_for_downloads(&state, 1).await;

        // No header and a wrong token both succeed with the same shape.
        for token in [None, Some("wrong")] {
            let response = get(&state, "/stats", token).await;
            assert_eq!(response.status(), StatusCode::OK);
            assert_eq!(
                response.headers()[CONTENT_TYPE].to_str().unwrap(),
                "application/json"
            );

            let json: serde_json::Value =
                serde_json::from_str(&body_string(response).await).unwrap();
            assert_eq!(json["total_downloads"], 1);
            assert_eq!(json["total_bytes_served"], 1000);
            assert_eq!(json["recent"][0]["file"], "report.pdf");
            assert_eq!(json["recent"][0]["client"], "10.0.0.1");
        }
    }

    #[tokio::test]
    async fn test_concurrent_downloads_sum_into_stats() {
        let tmp = TempDir::new().unwrap();
        let state = state_with_root(&tmp);

        let sizes: Vec<usize> = vec![100, 2000, 30000, 4, 50000];
        for (i, size) in sizes.iter().enumerate() {
            std::fs::write(state.root.join(format!("file-{}.bin", i)), vec![1u8; *size])
                .unwrap();
        }

        let mut handles = Vec::new();
        for i in 0..sizes.len() {
            let state = state.clone();
            handles.push(tokio::spawn(async move {
                let response =
                    get(&state, &format!("/file-{}.bin", i), Some(TOKEN)).await;
                assert_eq!(response.status(), StatusCode::OK);
                response.into_body().collect().await.unwrap().to_bytes().len()
            }));
        }
        let mut served = 0usize;
        for handle in handles {
            served += handle.await.unwrap();
        }
        assert_eq!(served, sizes.iter().sum::<usize>());

        wait_for_downloads(&state, sizes.len() as u64).await;
        let stats = state.stats.read().await;
        assert_eq!(stats.total_downloads, sizes.len() as u64);
        assert_eq!(
            stats.total_bytes_served,
            sizes.iter().sum::<usize>() as u64
        );
    }

    #[tokio::test]
    async fn test_recent_window_via_dispatch() {
        let tmp = TempDir::new().unwrap();
        let state = state_with_root(&tmp);

        for i in 0..11 {
            std::fs::write(state.root.join(format!("f{}.bin", i)), vec![0u8; 10]).unwrap();
            get(&state, &format!("/f{}.bin", i), Some(TOKEN))
                .await
                .into_body()
                .collect()
                .await
                .unwrap();
            wait_for_downloads(&state, i as u64 + 1).await;
        }

        let stats = state.stats.read().await;
        assert_eq!(stats.total_downloads, 11);
        assert_eq!(stats.recent.len(), 10);
        assert_eq!(stats.recent.front().unwrap().file, "f1.bin");
        assert_eq!(stats.recent.back().unwrap().file, "f10.bin");
    }
}

//! HTTP gateway
//!
//! The client-facing server: session management endpoints plus a catch-all
//! transparent proxy that forwards anything under `/session/{id}/...` to the
//! session's backend server. The session id in the path is the sole
//! authorization token.

use crate::client::BackendClient;
use crate::config::BackendConfig;
use crate::error::{hub_error_response, json_error_response, HubErrorCode};
use crate::pool::SessionPool;
use http_body_util::{combinators::BoxBody, BodyExt, Full};
use hyper::body::{Bytes, Incoming};
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as AutoBuilder;
use serde::Deserialize;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Version information for the hub
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const PKG_NAME: &str = env!("CARGO_PKG_NAME");

/// Body of POST /session
#[derive(Debug, Deserialize)]
struct CreateSessionRequest {
    /// Opaque capability document, forwarded to the backend untouched
    capabilities: serde_json::Value,
    /// Optional device label recorded on the session
    device_name: Option<String>,
}

/// The gateway HTTP server
pub struct Gateway {
    bind_addr: SocketAddr,
    pool: Arc<SessionPool>,
    client: Arc<BackendClient>,
    backend: BackendConfig,
    shutdown_rx: watch::Receiver<bool>,
}

impl Gateway {
    pub fn new(
        bind_addr: SocketAddr,
        pool: Arc<SessionPool>,
        client: Arc<BackendClient>,
        backend: BackendConfig,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Self {
        Self {
            bind_addr,
            pool,
            client,
            backend,
            shutdown_rx,
        }
    }

    pub async fn run(self) -> anyhow::Result<()> {
        let listener = TcpListener::bind(self.bind_addr).await?;
        info!(addr = %self.bind_addr, "Gateway listening (HTTP/1.1 and HTTP/2)");

        let mut shutdown_rx = self.shutdown_rx.clone();

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            let pool = Arc::clone(&self.pool);
                            let client = Arc::clone(&self.client);
                            let backend = self.backend.clone();

                            tokio::spawn(async move {
                                if let Err(e) = serve_connection(stream, pool, client, backend).await {
                                    debug!(addr = %addr, error = %e, "Connection error");
                                }
                            });
                        }
                        Err(e) => {
                            error!(error = %e, "Failed to accept connection");
                        }
                    }
                }
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("Gateway shutting down");
                        break;
                    }
                }
            }
        }

        Ok(())
    }
}

async fn serve_connection<S>(
    stream: S,
    pool: Arc<SessionPool>,
    client: Arc<BackendClient>,
    backend: BackendConfig,
) -> anyhow::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let io = TokioIo::new(stream);

    let service = service_fn(move |req: Request<Incoming>| {
        let pool = Arc::clone(&pool);
        let client = Arc::clone(&client);
        let backend = backend.clone();
        async move { handle_request(req, pool, client, backend).await }
    });

    AutoBuilder::new(TokioExecutor::new())
        .serve_connection(io, service)
        .await
        .map_err(|e| anyhow::anyhow!("Connection error: {}", e))?;

    Ok(())
}

/// Split the remainder of `/session/...` into (session id, trailing path)
fn split_session_path(rest: &str) -> (&str, Option<&str>) {
    match rest.split_once('/') {
        Some((id, trailing)) => (id, Some(trailing)),
        None => (rest, None),
    }
}

fn json_response(
    status: StatusCode,
    body: impl Into<Bytes>,
) -> Response<BoxBody<Bytes, hyper::Error>> {
    Response::builder()
        .status(status)
        .header("Content-Type", "application/json")
        .body(Full::new(body.into()).map_err(|e| match e {}).boxed())
        .expect("valid response with StatusCode enum and static header")
}

async fn handle_request(
    req: Request<Incoming>,
    pool: Arc<SessionPool>,
    client: Arc<BackendClient>,
    backend: BackendConfig,
) -> Result<Response<BoxBody<Bytes, hyper::Error>>, hyper::Error> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    debug!(%method, %path, "Incoming request");

    let response = match (&method, path.as_str()) {
        (&Method::GET, "/") => {
            let body = serde_json::json!({
                "name": "Appium Gateway Hub",
                "version": VERSION,
                "status": "running",
                "sessions": pool.session_count(),
            });
            json_response(StatusCode::OK, body.to_string())
        }

        (&Method::GET, "/health") => {
            let stats = pool.stats();
            let body = serde_json::to_string(&stats)
                .unwrap_or_else(|_| "{}".to_string());
            json_response(StatusCode::OK, body)
        }

        (&Method::GET, "/sessions") => {
            let sessions = pool.list();
            let body = serde_json::json!({ "sessions": sessions });
            json_response(StatusCode::OK, body.to_string())
        }

        (&Method::POST, "/session") => create_session(req, &pool).await?,

        (_, path) => {
            if let Some(rest) = path.strip_prefix("/session/") {
                let (session_id, trailing) = split_session_path(rest);
                if session_id.is_empty() {
                    json_error_response(HubErrorCode::BadRequest, "Missing session id")
                } else {
                    match (&method, trailing) {
                        (&Method::DELETE, None) => {
                            delete_session(session_id, &pool, &client, &backend).await
                        }
                        (&Method::GET, Some("info")) => match pool.info(session_id) {
                            Ok(summary) => {
                                let body = serde_json::to_string(&summary)
                                    .unwrap_or_else(|_| "{}".to_string());
                                json_response(StatusCode::OK, body)
                            }
                            Err(e) => hub_error_response(&e),
                        },
                        (_, Some(trailing)) => {
                            proxy_to_backend(req, session_id, trailing, &pool, &client, &backend)
                                .await
                        }
                        (_, None) => json_error_response(
                            HubErrorCode::SessionNotFound,
                            "Session not found",
                        ),
                    }
                }
            } else {
                json_error_response(HubErrorCode::SessionNotFound, "Not found")
            }
        }
    };

    Ok(response)
}

/// POST /session: allocate a backend, then relay its own session response
async fn create_session(
    req: Request<Incoming>,
    pool: &Arc<SessionPool>,
) -> Result<Response<BoxBody<Bytes, hyper::Error>>, hyper::Error> {
    let body = req.into_body().collect().await?.to_bytes();

    let create: CreateSessionRequest = match serde_json::from_slice(&body) {
        Ok(c) => c,
        Err(e) => {
            return Ok(json_error_response(
                HubErrorCode::BadRequest,
                format!("Invalid request body: {}", e),
            ));
        }
    };

    match pool.create(create.capabilities, create.device_name).await {
        Ok(created) => {
            let body = serde_json::json!({
                "hub_session_id": created.session.id(),
                "appium_session": created.backend_response,
                "service_url": created.session.service_url(),
            });
            Ok(json_response(StatusCode::CREATED, body.to_string()))
        }
        Err(e) => {
            warn!(error = %e, "Session creation failed");
            Ok(hub_error_response(&e))
        }
    }
}

/// DELETE /session/{id}: tell the backend first, then tear down the session
async fn delete_session(
    session_id: &str,
    pool: &Arc<SessionPool>,
    client: &Arc<BackendClient>,
    backend: &BackendConfig,
) -> Response<BoxBody<Bytes, hyper::Error>> {
    let session = match pool.get(session_id) {
        Ok(s) => s,
        Err(e) => return hub_error_response(&e),
    };

    // Best effort: the backend may not have an active session, which is fine
    if let Err(e) = client
        .delete(session.port(), "/session", backend.session_create_timeout())
        .await
    {
        debug!(session_id, error = %e, "Backend-side session delete failed");
    }

    match pool.destroy(session_id).await {
        Ok(()) => json_response(
            StatusCode::OK,
            r#"{"message":"Session deleted successfully"}"#,
        ),
        Err(e) => hub_error_response(&e),
    }
}

/// ANY /session/{id}/{*path}: transparent proxy to the session's backend
async fn proxy_to_backend(
    req: Request<Incoming>,
    session_id: &str,
    trailing: &str,
    pool: &Arc<SessionPool>,
    client: &Arc<BackendClient>,
    backend: &BackendConfig,
) -> Response<BoxBody<Bytes, hyper::Error>> {
    // Resolving the session is also the heartbeat that keeps it alive
    let session = match pool.get(session_id) {
        Ok(s) => s,
        Err(e) => return hub_error_response(&e),
    };

    let path_and_query = match req.uri().query() {
        Some(q) => format!("/{}?{}", trailing, q),
        None => format!("/{}", trailing),
    };

    let port = session.port();
    let result = tokio::time::timeout(
        backend.proxy_timeout(),
        client.forward(req, port, &path_and_query),
    )
    .await;

    match result {
        Ok(Ok(response)) => {
            session.process().mark_healthy();
            response
        }
        Ok(Err(e)) if e.is_unreachable() => {
            // An unreachable backend is treated as crashed; reclaim its
            // port without waiting for the client to clean up
            error!(session_id, port, error = %e, "Backend unreachable, destroying session");
            pool.destroy_detached(session_id);
            json_error_response(HubErrorCode::BackendUnavailable, "Backend unreachable")
        }
        Ok(Err(e)) => {
            error!(session_id, port, error = %e, "Failed to forward request");
            json_error_response(
                HubErrorCode::InternalError,
                "Failed to forward request to backend",
            )
        }
        Err(_) => {
            warn!(
                session_id,
                port,
                timeout_secs = backend.proxy_timeout().as_secs(),
                "Proxied request timed out"
            );
            json_error_response(
                HubErrorCode::RequestTimeout,
                format!(
                    "Request timed out after {} seconds",
                    backend.proxy_timeout().as_secs()
                ),
            )
        }
    }
}

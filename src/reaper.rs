//! Background session reaper
//!
//! The sole mechanism bounding resource usage when clients crash or abandon
//! their tests: a periodic pass over the pool destroying sessions that have
//! expired or whose backend process has died.

use crate::pool::SessionPool;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Periodically destroys expired and dead sessions
pub struct HealthReaper {
    pool: Arc<SessionPool>,
    interval: Duration,
    shutdown_rx: watch::Receiver<bool>,
}

impl HealthReaper {
    pub fn new(
        pool: Arc<SessionPool>,
        interval: Duration,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Self {
        Self {
            pool,
            interval,
            shutdown_rx,
        }
    }

    /// Run until shutdown is signalled
    pub async fn run(mut self) {
        info!(interval_secs = self.interval.as_secs(), "Session reaper started");

        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {
                    self.reap_once().await;
                }
                _ = self.shutdown_rx.changed() => {
                    if *self.shutdown_rx.borrow() {
                        info!("Session reaper shutting down");
                        break;
                    }
                }
            }
        }
    }

    /// One pass: destroy every session that is expired or whose process is
    /// dead. A session vanishing mid-pass was destroyed concurrently and is
    /// not an error.
    pub async fn reap_once(&self) {
        let mut reaped = 0;

        for summary in self.pool.list() {
            let Ok(session) = self.pool.peek(&summary.session_id) else {
                continue;
            };

            let expired = self.pool.is_expired(&session);
            let dead = !self.pool.supervisor().is_alive(session.process());

            if !expired && !dead {
                continue;
            }

            if expired {
                info!(
                    session_id = %summary.session_id,
                    idle_secs = session.idle().as_secs(),
                    age_secs = session.age().as_secs(),
                    "Reaping expired session"
                );
            } else {
                warn!(
                    session_id = %summary.session_id,
                    port = summary.port,
                    "Reaping session with dead backend process"
                );
            }

            match self.pool.destroy(&summary.session_id).await {
                Ok(()) => reaped += 1,
                // Someone else destroyed it first; that is the outcome we wanted
                Err(_) => debug!(session_id = %summary.session_id, "Session already gone"),
            }
        }

        if reaped > 0 {
            debug!(reaped, "Reaper pass complete");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::BackendClient;
    use crate::config::{BackendConfig, PoolConfig};
    use http_body_util::Full;
    use hyper::body::Bytes;
    use hyper::service::service_fn;
    use hyper::{Method, Request, Response, StatusCode};
    use hyper_util::rt::TokioIo;
    use std::convert::Infallible;
    use tempfile::TempDir;

    async fn spawn_backend_stub(port: u16) {
        let listener = tokio::net::TcpListener::bind(("127.0.0.1", port))
            .await
            .expect("stub bind");
        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    break;
                };
                tokio::spawn(async move {
                    let service = service_fn(|req: Request<hyper::body::Incoming>| async move {
                        let body = match (req.method(), req.uri().path()) {
                            (&Method::GET, "/status") => r#"{"value":{"ready":true}}"#,
                            (&Method::POST, "/session") => {
                                r#"{"value":{"sessionId":"stub-1","capabilities":{}}}"#
                            }
                            _ => r#"{"value":null}"#,
                        };
                        Ok::<_, Infallible>(
                            Response::builder()
                                .status(StatusCode::OK)
                                .header("Content-Type", "application/json")
                                .body(Full::new(Bytes::from(body)))
                                .expect("valid response"),
                        )
                    });
                    let _ = hyper::server::conn::http1::Builder::new()
                        .serve_connection(TokioIo::new(stream), service)
                        .await;
                });
            }
        });
    }

    fn test_pool(dir: &TempDir, port: u16, idle_timeout_secs: u64) -> Arc<SessionPool> {
        let pool_config = PoolConfig {
            port_range_start: port,
            port_range_end: port,
            max_sessions: 2,
            idle_timeout_secs,
            max_lifetime_secs: 0,
            reap_interval_secs: 60,
            log_dir: dir.path().join("logs").display().to_string(),
        };
        let backend = BackendConfig {
            command: "sleep".to_string(),
            args: vec!["300".to_string()],
            readiness_poll_interval_ms: 50,
            startup_timeout_secs: 5,
            session_create_timeout_secs: 5,
            shutdown_grace_secs: 2,
            ..BackendConfig::default()
        };
        SessionPool::new(pool_config, backend, Arc::new(BackendClient::new())).unwrap()
    }

    fn reaper(pool: &Arc<SessionPool>) -> HealthReaper {
        let (_tx, rx) = watch::channel(false);
        HealthReaper::new(Arc::clone(pool), Duration::from_secs(60), rx)
    }

    #[tokio::test]
    async fn test_reaper_destroys_idle_session() {
        let dir = TempDir::new().unwrap();
        let pool = test_pool(&dir, 16200, 1);
        spawn_backend_stub(16200).await;

        let created = pool.create(serde_json::json!({}), None).await.unwrap();
        let id = created.session.id().to_string();

        let reaper = reaper(&pool);

        // Not yet expired
        reaper.reap_once().await;
        assert_eq!(pool.session_count(), 1);

        tokio::time::sleep(Duration::from_millis(1200)).await;
        reaper.reap_once().await;

        assert_eq!(pool.session_count(), 0);
        assert!(pool.get(&id).is_err());
        // Port reclaimed
        assert_eq!(pool.available_ports(), 1);
    }

    #[tokio::test]
    async fn test_reaper_destroys_dead_backend() {
        let dir = TempDir::new().unwrap();
        let pool = test_pool(&dir, 16201, 300);
        spawn_backend_stub(16201).await;

        let created = pool.create(serde_json::json!({}), None).await.unwrap();

        // Kill the backend process out from under the session
        pool.supervisor().stop(created.session.process()).await;

        reaper(&pool).reap_once().await;

        assert_eq!(pool.session_count(), 0);
        assert_eq!(pool.available_ports(), 1);
    }

    #[tokio::test]
    async fn test_reaper_leaves_active_sessions_alone() {
        let dir = TempDir::new().unwrap();
        let pool = test_pool(&dir, 16202, 300);
        spawn_backend_stub(16202).await;

        pool.create(serde_json::json!({}), None).await.unwrap();

        reaper(&pool).reap_once().await;
        assert_eq!(pool.session_count(), 1);

        pool.shutdown_all().await;
    }

    #[tokio::test]
    async fn test_reaper_respects_absolute_lifetime() {
        let dir = TempDir::new().unwrap();
        let port = 16203;
        let pool_config = PoolConfig {
            port_range_start: port,
            port_range_end: port,
            max_sessions: 2,
            idle_timeout_secs: 300,
            max_lifetime_secs: 1,
            reap_interval_secs: 60,
            log_dir: dir.path().join("logs").display().to_string(),
        };
        let backend = BackendConfig {
            command: "sleep".to_string(),
            args: vec!["300".to_string()],
            readiness_poll_interval_ms: 50,
            startup_timeout_secs: 5,
            session_create_timeout_secs: 5,
            shutdown_grace_secs: 2,
            ..BackendConfig::default()
        };
        let pool =
            SessionPool::new(pool_config, backend, Arc::new(BackendClient::new())).unwrap();
        spawn_backend_stub(port).await;

        let created = pool.create(serde_json::json!({}), None).await.unwrap();
        let id = created.session.id().to_string();

        tokio::time::sleep(Duration::from_millis(1200)).await;
        // Touching the session does not extend its absolute lifetime
        let _ = pool.get(&id);

        reaper(&pool).reap_once().await;
        assert_eq!(pool.session_count(), 0);
    }
}

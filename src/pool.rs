//! Session pool
//!
//! Owns the mapping from hub session identity to allocated port and
//! supervised backend process, under a fixed capacity limit. Creation is
//! fully rolled back on any failure; destruction is claim-based so that
//! concurrent destroys of the same identity never double-release a port or
//! double-stop a process.

use crate::client::BackendClient;
use crate::config::{BackendConfig, PoolConfig};
use crate::error::HubError;
use crate::ports::PortAllocator;
use crate::supervisor::{BackendProcess, ProcessSupervisor};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};
use uuid::Uuid;

/// Lifecycle of a hub session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    /// Being created, not yet visible in the pool
    Pending,
    /// Registered and proxying
    Active,
    /// Claimed for destruction, teardown in progress
    Expiring,
    /// Torn down; the identity will never be reused
    Destroyed,
}

/// One client-visible allocation: a backend process, a port and metadata
#[derive(Debug)]
pub struct Session {
    id: String,
    port: u16,
    process: BackendProcess,
    device_name: Option<String>,
    created_at: DateTime<Utc>,
    created: Instant,
    last_used: Mutex<Instant>,
    state: Mutex<SessionState>,
    log_path: PathBuf,
}

impl Session {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn process(&self) -> &BackendProcess {
        &self.process
    }

    pub fn device_name(&self) -> Option<&str> {
        self.device_name.as_deref()
    }

    pub fn state(&self) -> SessionState {
        *self.state.lock()
    }

    /// Base URL of this session's backend server
    pub fn service_url(&self) -> String {
        format!("http://127.0.0.1:{}", self.port)
    }

    pub fn age(&self) -> Duration {
        self.created.elapsed()
    }

    pub fn idle(&self) -> Duration {
        self.last_used.lock().elapsed()
    }

    fn touch(&self) {
        *self.last_used.lock() = Instant::now();
    }
}

/// Result of a successful session creation
#[derive(Debug)]
pub struct CreatedSession {
    pub session: Arc<Session>,
    /// The backend's own response to its nested session-creation call,
    /// passed through opaquely
    pub backend_response: serde_json::Value,
}

/// Read-only snapshot of one session for listings
#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub session_id: String,
    pub port: u16,
    pub service_url: String,
    pub state: SessionState,
    pub created_at: DateTime<Utc>,
    pub last_used: DateTime<Utc>,
    pub age_secs: u64,
    pub idle_secs: u64,
    pub device_name: Option<String>,
    pub is_alive: bool,
    pub log_file: String,
}

/// Aggregate pool health document
#[derive(Debug, Clone, Serialize)]
pub struct PoolStats {
    pub total_sessions: usize,
    pub healthy_sessions: usize,
    pub unhealthy_sessions: Vec<String>,
    pub available_ports: usize,
    pub used_ports: Vec<u16>,
}

/// Manages the pool of backend servers behind the gateway.
///
/// Designed to be used behind an `Arc` shared by every request handler and
/// the reaper; [`new`](SessionPool::new) returns `Arc<Self>` to enforce this.
pub struct SessionPool {
    config: PoolConfig,
    backend: BackendConfig,
    ports: PortAllocator,
    supervisor: ProcessSupervisor,
    client: Arc<BackendClient>,
    sessions: DashMap<String, Arc<Session>>,
    /// Capacity slots taken by registered sessions plus in-flight creates.
    /// Reserving a slot and checking the limit is one atomic step, so
    /// concurrent creates can never overshoot `max_sessions`.
    reserved: AtomicUsize,
}

impl SessionPool {
    pub fn new(
        config: PoolConfig,
        backend: BackendConfig,
        client: Arc<BackendClient>,
    ) -> anyhow::Result<Arc<Self>> {
        std::fs::create_dir_all(&config.log_dir)?;

        let ports = PortAllocator::new(config.port_range_start, config.port_range_end);
        let supervisor = ProcessSupervisor::new(backend.clone(), Arc::clone(&client));

        Ok(Arc::new(Self {
            config,
            backend,
            ports,
            supervisor,
            client,
            sessions: DashMap::new(),
            reserved: AtomicUsize::new(0),
        }))
    }

    pub fn supervisor(&self) -> &ProcessSupervisor {
        &self.supervisor
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn available_ports(&self) -> usize {
        self.ports.available_count()
    }

    /// Create a session: reserve capacity, acquire a port, launch a backend,
    /// wait for readiness, then forward the capability payload to the
    /// backend's own session-creation endpoint. Every failure path releases
    /// everything acquired before it.
    pub async fn create(
        &self,
        capabilities: serde_json::Value,
        device_name: Option<String>,
    ) -> Result<CreatedSession, HubError> {
        let max = self.config.max_sessions;
        self.reserved
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                if n < max {
                    Some(n + 1)
                } else {
                    None
                }
            })
            .map_err(|_| {
                warn!(max_sessions = max, "Maximum session count reached");
                HubError::CapacityExceeded(max)
            })?;

        match self.create_reserved(capabilities, device_name).await {
            Ok(created) => Ok(created),
            Err(e) => {
                self.reserved.fetch_sub(1, Ordering::SeqCst);
                Err(e)
            }
        }
    }

    /// The port/process/backend half of `create`; runs with a slot reserved
    async fn create_reserved(
        &self,
        capabilities: serde_json::Value,
        device_name: Option<String>,
    ) -> Result<CreatedSession, HubError> {
        let port = self.ports.acquire()?;
        let session_id = Uuid::new_v4().to_string();
        let log_path = PathBuf::from(&self.config.log_dir)
            .join(format!("appium_server_{}_{}.log", session_id, port));

        let process = match self.supervisor.start(port, &log_path) {
            Ok(p) => p,
            Err(e) => {
                self.ports.release(port);
                return Err(e);
            }
        };

        // await_ready stops the process itself on timeout or early death
        if let Err(e) = self
            .supervisor
            .await_ready(&process, self.backend.startup_timeout())
            .await
        {
            self.ports.release(port);
            return Err(e);
        }

        // Nested session creation on the backend; the payload is opaque here
        let payload = serde_json::json!({ "capabilities": capabilities });
        let backend_response = match self
            .client
            .post_json(port, "/session", &payload, self.backend.session_create_timeout())
            .await
        {
            Ok((status, value)) if status.is_success() => value,
            Ok((status, value)) => {
                self.supervisor.stop(&process).await;
                self.ports.release(port);
                return Err(HubError::BackendRejected(format!(
                    "status {}: {}",
                    status, value
                )));
            }
            Err(e) => {
                self.supervisor.stop(&process).await;
                self.ports.release(port);
                return Err(HubError::BackendRejected(e.to_string()));
            }
        };

        let session = Arc::new(Session {
            id: session_id.clone(),
            port,
            process,
            device_name,
            created_at: Utc::now(),
            created: Instant::now(),
            last_used: Mutex::new(Instant::now()),
            state: Mutex::new(SessionState::Pending),
            log_path,
        });

        *session.state.lock() = SessionState::Active;
        self.sessions.insert(session_id.clone(), Arc::clone(&session));

        info!(session_id = %session_id, port, "Created session");

        Ok(CreatedSession {
            session,
            backend_response,
        })
    }

    /// Look up a session and bump its idle timer. Any proxied request goes
    /// through here, so traffic keeps a session alive.
    pub fn get(&self, session_id: &str) -> Result<Arc<Session>, HubError> {
        let session = self
            .sessions
            .get(session_id)
            .map(|s| Arc::clone(&s))
            .ok_or(HubError::NotFound)?;
        session.touch();
        Ok(session)
    }

    /// Look up a session without touching its idle timer (listings, reaper)
    pub fn peek(&self, session_id: &str) -> Result<Arc<Session>, HubError> {
        self.sessions
            .get(session_id)
            .map(|s| Arc::clone(&s))
            .ok_or(HubError::NotFound)
    }

    /// Summary for one session; counts as activity for its idle timer
    pub fn info(&self, session_id: &str) -> Result<SessionSummary, HubError> {
        let session = self.get(session_id)?;
        Ok(self.summarize(&session))
    }

    /// Destroy a session: stop its process, release its port, free its slot.
    ///
    /// The map entry is removed first, which makes the removal the claim:
    /// of any number of concurrent destroys for the same identity exactly one
    /// proceeds and the rest see `NotFound`. A completed destroy is therefore
    /// visible to every subsequent `get`.
    pub async fn destroy(&self, session_id: &str) -> Result<(), HubError> {
        let (_, session) = self
            .sessions
            .remove(session_id)
            .ok_or(HubError::NotFound)?;

        *session.state.lock() = SessionState::Expiring;

        self.supervisor.stop(&session.process).await;
        self.ports.release(session.port);
        self.reserved.fetch_sub(1, Ordering::SeqCst);

        *session.state.lock() = SessionState::Destroyed;
        info!(session_id = %session_id, port = session.port, "Destroyed session");
        Ok(())
    }

    /// True when the session has outlived its idle or absolute window
    pub fn is_expired(&self, session: &Session) -> bool {
        if session.idle() > self.config.idle_timeout() {
            return true;
        }
        if let Some(max_lifetime) = self.config.max_lifetime() {
            if session.age() > max_lifetime {
                return true;
            }
        }
        false
    }

    /// Snapshot of all sessions, oldest first. Never holds the map locked
    /// for longer than the copy.
    pub fn list(&self) -> Vec<SessionSummary> {
        let mut sessions: Vec<Arc<Session>> = self
            .sessions
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        sessions.sort_by_key(|s| s.created_at);

        sessions.iter().map(|s| self.summarize(s)).collect()
    }

    fn summarize(&self, session: &Session) -> SessionSummary {
        let idle = session.idle();
        let last_used = Utc::now()
            - chrono::Duration::from_std(idle).unwrap_or_else(|_| chrono::Duration::zero());

        SessionSummary {
            session_id: session.id.clone(),
            port: session.port,
            service_url: session.service_url(),
            state: session.state(),
            created_at: session.created_at,
            last_used,
            age_secs: session.age().as_secs(),
            idle_secs: idle.as_secs(),
            device_name: session.device_name.clone(),
            is_alive: self.supervisor.is_alive(&session.process),
            log_file: session.log_path.display().to_string(),
        }
    }

    /// Aggregate health: a session is healthy when its process is alive and
    /// it is inside its timeout windows.
    pub fn stats(&self) -> PoolStats {
        let mut healthy = 0;
        let mut unhealthy = Vec::new();

        for entry in self.sessions.iter() {
            let session = entry.value();
            let alive = self.supervisor.is_alive(&session.process);
            if alive && !self.is_expired(session) {
                healthy += 1;
            } else {
                unhealthy.push(session.id.clone());
            }
        }
        unhealthy.sort();

        PoolStats {
            total_sessions: self.sessions.len(),
            healthy_sessions: healthy,
            unhealthy_sessions: unhealthy,
            available_ports: self.ports.available_count(),
            used_ports: self.ports.held_ports().into_iter().collect(),
        }
    }

    /// Destroy every session (shutdown path)
    pub async fn shutdown_all(&self) {
        let ids: Vec<String> = self.sessions.iter().map(|e| e.key().clone()).collect();
        if !ids.is_empty() {
            info!(count = ids.len(), "Shutting down all sessions");
        }
        for id in ids {
            // Already-gone sessions were destroyed concurrently
            let _ = self.destroy(&id).await;
        }
    }

    /// A backend that failed during proxying is treated as crashed: mark it,
    /// then tear the session down in the background so its port is reclaimed
    /// without waiting on the grace period.
    pub fn destroy_detached(self: &Arc<Self>, session_id: &str) {
        if let Ok(session) = self.peek(session_id) {
            session.process().mark_unhealthy();
        }
        let pool = Arc::clone(self);
        let id = session_id.to_string();
        tokio::spawn(async move {
            if pool.destroy(&id).await.is_ok() {
                warn!(session_id = %id, "Session destroyed after backend failure");
            }
        });
    }
}

impl std::fmt::Debug for SessionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionPool")
            .field("sessions", &self.sessions.len())
            .field("max_sessions", &self.config.max_sessions)
            .field("available_ports", &self.ports.available_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::Full;
    use hyper::body::Bytes;
    use hyper::service::service_fn;
    use hyper::{Method, Request, Response, StatusCode};
    use hyper_util::rt::TokioIo;
    use std::convert::Infallible;
    use std::sync::atomic::AtomicBool;
    use tempfile::TempDir;

    /// In-process stand-in for a backend server's HTTP surface. The actual
    /// child process is `sleep`, which never binds the port itself.
    async fn spawn_backend_stub(port: u16, reject: Arc<AtomicBool>) {
        let listener = tokio::net::TcpListener::bind(("127.0.0.1", port))
            .await
            .expect("stub bind");

        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    break;
                };
                let reject = Arc::clone(&reject);
                tokio::spawn(async move {
                    let service = service_fn(move |req: Request<hyper::body::Incoming>| {
                        let reject = reject.load(Ordering::SeqCst);
                        async move {
                            let resp = match (req.method(), req.uri().path()) {
                                (&Method::GET, "/status") => json_resp(
                                    StatusCode::OK,
                                    r#"{"value":{"ready":true,"message":"ready"}}"#,
                                ),
                                (&Method::POST, "/session") => {
                                    if reject {
                                        json_resp(
                                            StatusCode::INTERNAL_SERVER_ERROR,
                                            r#"{"value":{"error":"session not created"}}"#,
                                        )
                                    } else {
                                        json_resp(
                                            StatusCode::OK,
                                            r#"{"value":{"sessionId":"stub-1","capabilities":{}}}"#,
                                        )
                                    }
                                }
                                (&Method::DELETE, "/session") => {
                                    json_resp(StatusCode::OK, r#"{"value":null}"#)
                                }
                                (method, path) => json_resp(
                                    StatusCode::OK,
                                    format!(r#"{{"echo":"{} {}"}}"#, method, path),
                                ),
                            };
                            Ok::<_, Infallible>(resp)
                        }
                    });
                    let _ = hyper::server::conn::http1::Builder::new()
                        .serve_connection(TokioIo::new(stream), service)
                        .await;
                });
            }
        });
    }

    fn json_resp(status: StatusCode, body: impl Into<Bytes>) -> Response<Full<Bytes>> {
        Response::builder()
            .status(status)
            .header("Content-Type", "application/json")
            .body(Full::new(body.into()))
            .expect("valid response")
    }

    fn test_pool(
        dir: &TempDir,
        range: (u16, u16),
        max_sessions: usize,
    ) -> Arc<SessionPool> {
        let pool_config = PoolConfig {
            port_range_start: range.0,
            port_range_end: range.1,
            max_sessions,
            idle_timeout_secs: 300,
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

    #[tokio::test]
    async fn test_create_get_destroy_roundtrip() {
        let dir = TempDir::new().unwrap();
        let pool = test_pool(&dir, (16000, 16000), 2);
        spawn_backend_stub(16000, Arc::new(AtomicBool::new(false))).await;

        let created = pool
            .create(serde_json::json!({"platformName": "Android"}), Some("emu-1".to_string()))
            .await
            .unwrap();
        let id = created.session.id().to_string();

        assert_eq!(created.session.port(), 16000);
        assert_eq!(created.session.state(), SessionState::Active);
        assert_eq!(created.backend_response["value"]["sessionId"], "stub-1");
        assert_eq!(pool.session_count(), 1);
        assert_eq!(pool.available_ports(), 0);

        let fetched = pool.get(&id).unwrap();
        assert_eq!(fetched.device_name(), Some("emu-1"));

        pool.destroy(&id).await.unwrap();
        assert!(matches!(pool.get(&id), Err(HubError::NotFound)));
        assert_eq!(pool.session_count(), 0);
        // The port is reusable after destroy
        assert_eq!(pool.available_ports(), 1);
    }

    #[tokio::test]
    async fn test_capacity_exceeded_consumes_nothing() {
        let dir = TempDir::new().unwrap();
        let pool = test_pool(&dir, (16010, 16011), 1);
        spawn_backend_stub(16010, Arc::new(AtomicBool::new(false))).await;
        spawn_backend_stub(16011, Arc::new(AtomicBool::new(false))).await;

        pool.create(serde_json::json!({}), None).await.unwrap();

        let err = pool.create(serde_json::json!({}), None).await.unwrap_err();
        assert!(matches!(err, HubError::CapacityExceeded(1)));
        // No port was consumed by the failed create
        assert_eq!(pool.available_ports(), 1);
        assert_eq!(pool.session_count(), 1);

        pool.shutdown_all().await;
    }

    #[tokio::test]
    async fn test_port_exhaustion() {
        let dir = TempDir::new().unwrap();
        let pool = test_pool(&dir, (16020, 16020), 5);
        spawn_backend_stub(16020, Arc::new(AtomicBool::new(false))).await;

        pool.create(serde_json::json!({}), None).await.unwrap();

        let err = pool.create(serde_json::json!({}), None).await.unwrap_err();
        assert!(matches!(err, HubError::NoPortsAvailable));
        assert_eq!(pool.session_count(), 1);

        pool.shutdown_all().await;
    }

    #[tokio::test]
    async fn test_backend_rejection_rolls_back_fully() {
        let dir = TempDir::new().unwrap();
        let pool = test_pool(&dir, (16030, 16030), 5);
        let reject = Arc::new(AtomicBool::new(true));
        spawn_backend_stub(16030, Arc::clone(&reject)).await;

        let before = pool.available_ports();
        let err = pool.create(serde_json::json!({}), None).await.unwrap_err();
        assert!(matches!(err, HubError::BackendRejected(_)));
        assert_eq!(pool.available_ports(), before);
        assert_eq!(pool.session_count(), 0);

        // With a single-port range, the sole port must be acquirable again
        reject.store(false, Ordering::SeqCst);
        let created = pool.create(serde_json::json!({}), None).await.unwrap();
        assert_eq!(created.session.port(), 16030);

        pool.shutdown_all().await;
    }

    #[tokio::test]
    async fn test_readiness_timeout_rolls_back() {
        let dir = TempDir::new().unwrap();
        let pool = test_pool(&dir, (16040, 16040), 5);
        // No stub listener: the backend can never become ready

        let err = pool.create(serde_json::json!({}), None).await.unwrap_err();
        assert!(matches!(err, HubError::ReadinessTimeout(_)));
        assert_eq!(pool.available_ports(), 1);
        assert_eq!(pool.session_count(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_creates_respect_capacity() {
        let dir = TempDir::new().unwrap();
        let pool = test_pool(&dir, (16050, 16053), 2);
        for port in 16050..=16053 {
            spawn_backend_stub(port, Arc::new(AtomicBool::new(false))).await;
        }

        let tasks: Vec<_> = (0..4)
            .map(|_| {
                let pool = Arc::clone(&pool);
                tokio::spawn(async move { pool.create(serde_json::json!({}), None).await })
            })
            .collect();

        let mut ok = 0;
        let mut capacity = 0;
        for task in tasks {
            match task.await.unwrap() {
                Ok(_) => ok += 1,
                Err(HubError::CapacityExceeded(_)) => capacity += 1,
                Err(e) => panic!("unexpected error: {}", e),
            }
        }

        assert_eq!(ok, 2);
        assert_eq!(capacity, 2);
        assert_eq!(pool.session_count(), 2);

        // The two winners hold distinct ports
        let stats = pool.stats();
        assert_eq!(stats.used_ports.len(), 2);
        let mut ports = stats.used_ports.clone();
        ports.dedup();
        assert_eq!(ports.len(), 2);

        pool.shutdown_all().await;
    }

    #[tokio::test]
    async fn test_concurrent_destroy_single_winner() {
        let dir = TempDir::new().unwrap();
        let pool = test_pool(&dir, (16060, 16060), 2);
        spawn_backend_stub(16060, Arc::new(AtomicBool::new(false))).await;

        let created = pool.create(serde_json::json!({}), None).await.unwrap();
        let id = created.session.id().to_string();

        let tasks: Vec<_> = (0..4)
            .map(|_| {
                let pool = Arc::clone(&pool);
                let id = id.clone();
                tokio::spawn(async move { pool.destroy(&id).await })
            })
            .collect();

        let mut winners = 0;
        for task in tasks {
            if task.await.unwrap().is_ok() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
        assert_eq!(pool.available_ports(), 1);
    }

    #[tokio::test]
    async fn test_list_and_stats() {
        let dir = TempDir::new().unwrap();
        let pool = test_pool(&dir, (16070, 16071), 5);
        spawn_backend_stub(16070, Arc::new(AtomicBool::new(false))).await;
        spawn_backend_stub(16071, Arc::new(AtomicBool::new(false))).await;

        let a = pool
            .create(serde_json::json!({}), Some("dev-a".to_string()))
            .await
            .unwrap();
        let b = pool.create(serde_json::json!({}), None).await.unwrap();

        let listed = pool.list();
        assert_eq!(listed.len(), 2);
        // Oldest first
        assert_eq!(listed[0].session_id, a.session.id());
        assert_eq!(listed[1].session_id, b.session.id());
        assert_eq!(listed[0].device_name.as_deref(), Some("dev-a"));
        assert!(listed[0].is_alive);
        assert!(listed[0].log_file.contains(a.session.id()));

        let stats = pool.stats();
        assert_eq!(stats.total_sessions, 2);
        assert_eq!(stats.healthy_sessions, 2);
        assert!(stats.unhealthy_sessions.is_empty());
        assert_eq!(stats.available_ports, 0);
        assert_eq!(stats.used_ports, vec![16070, 16071]);

        pool.shutdown_all().await;
    }

    #[tokio::test]
    async fn test_stats_reports_dead_backend_unhealthy() {
        let dir = TempDir::new().unwrap();
        let pool = test_pool(&dir, (16080, 16080), 2);
        spawn_backend_stub(16080, Arc::new(AtomicBool::new(false))).await;

        let created = pool.create(serde_json::json!({}), None).await.unwrap();
        let id = created.session.id().to_string();

        // Kill the process behind the pool's back
        pool.supervisor().stop(created.session.process()).await;

        let stats = pool.stats();
        assert_eq!(stats.total_sessions, 1);
        assert_eq!(stats.healthy_sessions, 0);
        assert_eq!(stats.unhealthy_sessions, vec![id]);

        pool.shutdown_all().await;
    }

    #[tokio::test]
    async fn test_get_touches_idle_timer_peek_does_not() {
        let dir = TempDir::new().unwrap();
        let pool = test_pool(&dir, (16090, 16090), 2);
        spawn_backend_stub(16090, Arc::new(AtomicBool::new(false))).await;

        let created = pool.create(serde_json::json!({}), None).await.unwrap();
        let id = created.session.id().to_string();

        tokio::time::sleep(Duration::from_millis(120)).await;
        let idle_before = pool.peek(&id).unwrap().idle();
        assert!(idle_before >= Duration::from_millis(100));

        let _ = pool.get(&id).unwrap();
        let idle_after = pool.peek(&id).unwrap().idle();
        assert!(idle_after < idle_before);

        pool.shutdown_all().await;
    }

    #[tokio::test]
    async fn test_shutdown_all() {
        let dir = TempDir::new().unwrap();
        let pool = test_pool(&dir, (16100, 16101), 5);
        spawn_backend_stub(16100, Arc::new(AtomicBool::new(false))).await;
        spawn_backend_stub(16101, Arc::new(AtomicBool::new(false))).await;

        pool.create(serde_json::json!({}), None).await.unwrap();
        pool.create(serde_json::json!({}), None).await.unwrap();
        assert_eq!(pool.session_count(), 2);

        pool.shutdown_all().await;
        assert_eq!(pool.session_count(), 0);
        assert_eq!(pool.available_ports(), 2);
    }
}

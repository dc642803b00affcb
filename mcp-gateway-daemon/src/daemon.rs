//! The stateful daemon's in-process state (spec §4.8): a named-session
//! registry layered over the runtime's identity-keyed pool, persisted to
//! disk and swept for expiration.
//!
//! Turning a `ServerSpec` into a live upstream connection is an external
//! collaborator (mirrored from `mcp_gateway_core::ServerSpec`'s own doc
//! comment) — the daemon is generic over whatever `SessionFactory` its
//! embedder supplies, the same way `Runtime` is.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::SystemTime;

use parking_lot::Mutex;
use rand::RngCore;
use serde_json::{json, Value};

use mcp_gateway_core::{ErrorKind, GatewayError, GatewayResult, McpCallResult};
use mcp_gateway_runtime::{CallRequest, Runtime};
use mcp_gateway_session::SessionRequest;

use crate::error::IpcResult;
use crate::persistence::{self, EventLog};
use crate::registry::{SessionRegistryEntry, SessionRegistryFile, SessionStatus};

#[derive(Debug, Clone)]
pub struct DaemonLifecycle {
    pub max_sessions: usize,
    pub idle_timeout: std::time::Duration,
    pub max_session_age: std::time::Duration,
    pub sweep_interval: std::time::Duration,
    pub max_frame_bytes: usize,
    pub socket_timeout: std::time::Duration,
    pub event_log_max_bytes: u64,
    pub event_log_max_files: u32,
}

impl From<&mcp_gateway_config::DaemonConfig> for DaemonLifecycle {
    fn from(config: &mcp_gateway_config::DaemonConfig) -> Self {
        Self {
            max_sessions: config.max_sessions,
            idle_timeout: config.idle_timeout,
            max_session_age: config.max_session_age,
            sweep_interval: config.sweep_interval,
            max_frame_bytes: config.max_frame_bytes,
            socket_timeout: config.socket_timeout,
            event_log_max_bytes: config.event_log_max_bytes,
            event_log_max_files: config.event_log_max_files,
        }
    }
}

/// Bearer key used to route a named daemon session through the runtime's
/// identity-keyed `SessionManager`. The manager's own auth semantics don't
/// apply at the daemon layer — tokens are checked once, up front, per RPC
/// frame (spec §4.8 "Security") — so any fixed scheme that keys one entry
/// per session name is sufficient.
fn bearer_for(name: &str) -> String {
    format!("Bearer {name}")
}

pub struct Daemon {
    pub runtime: Arc<Runtime>,
    pub lifecycle: DaemonLifecycle,
    pub token: String,
    pub pid: u32,
    pub endpoint: String,
    pub started_at: SystemTime,
    registry: Mutex<HashMap<String, SessionRegistryEntry>>,
    events: EventLog,
    sessions_dir: std::path::PathBuf,
    shutdown_requested: tokio::sync::Notify,
}

impl Daemon {
    pub fn new(runtime: Arc<Runtime>, lifecycle: DaemonLifecycle, endpoint: String, sessions_dir: std::path::PathBuf) -> Self {
        let events = EventLog::new(sessions_dir.clone(), lifecycle.event_log_max_bytes, lifecycle.event_log_max_files);
        Self {
            runtime,
            lifecycle,
            token: generate_token(),
            pid: std::process::id(),
            endpoint,
            started_at: SystemTime::now(),
            registry: Mutex::new(HashMap::new()),
            events,
            sessions_dir,
            shutdown_requested: tokio::sync::Notify::new(),
        }
    }

    /// Requested by the `daemon.shutdown` RPC method; `run()` races this
    /// against the OS signal futures so a remote client can ask a daemon to
    /// drain without needing to send it a process signal.
    pub fn request_shutdown(&self) {
        self.shutdown_requested.notify_one();
    }

    pub async fn wait_for_shutdown_request(&self) {
        self.shutdown_requested.notified().await;
    }

    pub fn check_token(&self, presented: &str) -> GatewayResult<()> {
        if presented == self.token {
            Ok(())
        } else {
            Err(GatewayError::new(ErrorKind::SessionUnauthorized, "mcp-gateway-daemon", "auth", "token mismatch"))
        }
    }

    /// Load any `sessions.json` left by a prior run and mark its still-
    /// `active` entries `orphaned` (spec §4.8 "Startup"/"Shutdown").
    pub async fn recover(&self) -> IpcResult<()> {
        let persisted = persistence::read_session_registry(&self.sessions_dir).await?;
        let mut registry = self.registry.lock();
        for mut entry in persisted.sessions {
            if entry.status == SessionStatus::Active {
                entry.status = SessionStatus::Orphaned;
            }
            registry.insert(entry.name.clone(), entry);
        }
        Ok(())
    }

    pub async fn persist(&self) -> IpcResult<()> {
        let sessions: Vec<SessionRegistryEntry> = self.registry.lock().values().cloned().collect();
        persistence::write_session_registry(&self.sessions_dir, &SessionRegistryFile { sessions }).await
    }

    pub async fn health(&self) -> Value {
        let active = self.registry.lock().values().filter(|e| e.status == SessionStatus::Active).count();
        json!({"ok": true, "pid": self.pid, "endpoint": self.endpoint, "sessions": active})
    }

    /// `session.open`: reuse a live entry by name or create one. Sessions
    /// past `maxAgeAt` are closed and recreated rather than reused.
    pub async fn open(&self, name: &str, server_spec: Option<Value>) -> GatewayResult<bool> {
        self.sweep_expired();

        let now = SystemTime::now();
        let existing_usable = {
            let registry = self.registry.lock();
            match registry.get(name) {
                Some(entry) if entry.status == SessionStatus::Active && !entry.is_max_age_expired(now) => true,
                _ => false,
            }
        };

        if existing_usable {
            self.runtime.resolve(&SessionRequest { authorization: Some(bearer_for(name)) }).await?;
            return Ok(true);
        }

        self.evict_over_capacity(name).await;
        self.runtime.resolve(&SessionRequest { authorization: Some(bearer_for(name)) }).await?;
        let entry = SessionRegistryEntry::new(name, server_spec, self.lifecycle.idle_timeout, self.lifecycle.max_session_age);
        self.registry.lock().insert(name.to_string(), entry);
        self.events.append("session_opened", json!({"name": name})).await.ok();
        Ok(false)
    }

    /// Lazily sweeps `name` before use (spec §4.8 "also runs lazily on each
    /// execute/catalog lookup"), then dispatches through the runtime.
    pub async fn execute(&self, name: &str, method: &str, params: Value, meta: HashMap<String, Value>) -> GatewayResult<McpCallResult> {
        self.check_usable(name)?;
        let request =
            CallRequest::new(SessionRequest { authorization: Some(bearer_for(name)) }, method, params).with_meta(meta).with_surface("daemon");
        let result = self.runtime.execute(request).await;
        self.touch(name);
        self.events
            .append("session_executed", json!({"name": name, "method": method, "ok": result.is_ok()}))
            .await
            .ok();
        result
    }

    pub async fn catalog(&self, name: &str) -> GatewayResult<Value> {
        self.check_usable(name)?;
        let (_, state) = self.runtime.resolve(&SessionRequest { authorization: Some(bearer_for(name)) }).await?;
        self.touch(name);
        Ok(serde_json::to_value(state.catalog()).unwrap_or(Value::Null))
    }

    pub fn list(&self) -> Vec<SessionRegistryEntry> {
        self.sweep_expired();
        self.registry.lock().values().cloned().collect()
    }

    pub async fn stop(&self, name: &str) -> GatewayResult<()> {
        if let Some(mut entry) = self.registry.lock().remove(name) {
            entry.status = SessionStatus::Closed;
        }
        self.events.append("session_stopped", json!({"name": name})).await.ok();
        Ok(())
    }

    pub async fn stop_all(&self) {
        let names: Vec<String> = self.registry.lock().keys().cloned().collect();
        for name in &names {
            let _ = self.stop(name).await;
        }
        self.runtime.close().await;
    }

    /// Mark every active entry `service_shutdown` and persist before the
    /// listener stops (spec §4.8 "Shutdown").
    pub async fn shutdown(&self) -> IpcResult<()> {
        {
            let mut registry = self.registry.lock();
            for entry in registry.values_mut() {
                if entry.status == SessionStatus::Active {
                    entry.status = SessionStatus::ServiceShutdown;
                }
            }
        }
        self.persist().await?;
        self.runtime.close().await;
        persistence::delete_service_info(&self.sessions_dir).await?;
        Ok(())
    }

    /// Runs on a timer (`sweepIntervalMs`) and lazily before each lookup.
    pub fn sweep_expired(&self) {
        let now = SystemTime::now();
        let mut registry = self.registry.lock();
        for entry in registry.values_mut() {
            if entry.status != SessionStatus::Active {
                continue;
            }
            if entry.is_max_age_expired(now) {
                entry.status = SessionStatus::ExpiredMaxAge;
            } else if entry.is_idle_expired(now) {
                entry.status = SessionStatus::ExpiredIdle;
            }
        }
    }

    async fn evict_over_capacity(&self, incoming: &str) {
        let over = {
            let registry = self.registry.lock();
            !registry.contains_key(incoming) && registry.len() >= self.lifecycle.max_sessions
        };
        if !over {
            return;
        }
        let oldest = {
            let registry = self.registry.lock();
            registry.values().filter(|e| e.status == SessionStatus::Active).min_by_key(|e| e.last_active_at).map(|e| e.name.clone())
        };
        if let Some(name) = oldest {
            let _ = self.stop(&name).await;
        }
    }

    fn check_usable(&self, name: &str) -> GatewayResult<()> {
        self.sweep_expired();
        let registry = self.registry.lock();
        match registry.get(name) {
            None => Err(GatewayError::session_not_found("mcp-gateway-daemon", name)),
            Some(entry) => match entry.status {
                SessionStatus::Active => Ok(()),
                SessionStatus::ExpiredIdle => Err(GatewayError::new(
                    ErrorKind::SessionExpiredIdle,
                    "mcp-gateway-daemon",
                    "execute",
                    "session {name} expired from inactivity",
                )
                .with_var("name", name)),
                SessionStatus::ExpiredMaxAge => Err(GatewayError::new(
                    ErrorKind::SessionExpiredMaxAge,
                    "mcp-gateway-daemon",
                    "execute",
                    "session {name} exceeded its maximum age",
                )
                .with_var("name", name)),
                SessionStatus::Orphaned => {
                    Err(GatewayError::new(ErrorKind::SessionOrphaned, "mcp-gateway-daemon", "execute", "session {name} is orphaned").with_var("name", name))
                }
                SessionStatus::ServiceShutdown | SessionStatus::Closed => {
                    Err(GatewayError::session_not_found("mcp-gateway-daemon", name))
                }
            },
        }
    }

    fn touch(&self, name: &str) {
        if let Some(entry) = self.registry.lock().get_mut(name) {
            entry.touch(SystemTime::now());
        }
    }
}

fn generate_token() -> String {
    let mut bytes = [0u8; 24];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

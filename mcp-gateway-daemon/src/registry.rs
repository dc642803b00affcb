//! Persisted data model: `service.json` and `sessions.json` (spec §4.8, §6).

use std::collections::HashMap;
use std::time::{Duration, SystemTime};

use serde::{Deserialize, Serialize};

/// One daemon process's metadata, written to `service.json` at startup and
/// deleted on clean shutdown.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceInfo {
    pub pid: u32,
    pub endpoint: String,
    pub token: String,
    pub started_at: SystemTime,
}

/// Lifecycle status of one registered session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Active,
    Orphaned,
    ExpiredIdle,
    ExpiredMaxAge,
    ServiceShutdown,
    Closed,
}

/// One row of `sessions.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRegistryEntry {
    pub name: String,
    #[serde(default)]
    pub server_spec: Option<serde_json::Value>,
    pub created_at: SystemTime,
    pub last_active_at: SystemTime,
    pub idle_timeout: Duration,
    pub max_age: Duration,
    pub status: SessionStatus,
}

impl SessionRegistryEntry {
    pub fn new(name: impl Into<String>, server_spec: Option<serde_json::Value>, idle_timeout: Duration, max_age: Duration) -> Self {
        let now = SystemTime::now();
        Self { name: name.into(), server_spec, created_at: now, last_active_at: now, idle_timeout, max_age, status: SessionStatus::Active }
    }

    pub fn expires_at(&self) -> SystemTime {
        self.last_active_at + self.idle_timeout
    }

    pub fn max_age_at(&self) -> SystemTime {
        self.created_at + self.max_age
    }

    pub fn is_idle_expired(&self, now: SystemTime) -> bool {
        now >= self.expires_at()
    }

    pub fn is_max_age_expired(&self, now: SystemTime) -> bool {
        now >= self.max_age_at()
    }

    pub fn touch(&mut self, now: SystemTime) {
        self.last_active_at = now;
    }
}

/// The `{sessions: [...]}` envelope persisted to `sessions.json`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionRegistryFile {
    pub sessions: Vec<SessionRegistryEntry>,
}

impl SessionRegistryFile {
    pub fn index_by_name(&self) -> HashMap<&str, &SessionRegistryEntry> {
        self.sessions.iter().map(|e| (e.name.as_str(), e)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn idle_expiry_is_relative_to_last_active() {
        let mut entry = SessionRegistryEntry::new("alpha", None, Duration::from_millis(20), Duration::from_secs(600));
        assert!(!entry.is_idle_expired(SystemTime::now()));
        entry.last_active_at = SystemTime::now() - Duration::from_millis(50);
        assert!(entry.is_idle_expired(SystemTime::now()));
    }

    #[test]
    fn max_age_is_relative_to_creation() {
        let mut entry = SessionRegistryEntry::new("alpha", None, Duration::from_secs(600), Duration::from_millis(20));
        entry.created_at = SystemTime::now() - Duration::from_millis(50);
        assert!(entry.is_max_age_expired(SystemTime::now()));
    }

    #[test]
    fn round_trips_through_json() {
        let file = SessionRegistryFile { sessions: vec![SessionRegistryEntry::new("alpha", None, Duration::from_secs(60), Duration::from_secs(3600))] };
        let raw = serde_json::to_string(&file).unwrap();
        let decoded: SessionRegistryFile = serde_json::from_str(&raw).unwrap();
        assert_eq!(decoded.sessions.len(), 1);
        assert_eq!(decoded.sessions[0].name, "alpha");
    }
}

//! Atomic file persistence for the daemon's sessions directory (spec §4.8,
//! §6): `service.json`, `sessions.json`, and a rotating `events.log`.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use tokio::fs;
use tokio::io::AsyncWriteExt;

use crate::error::IpcResult;
use crate::registry::{ServiceInfo, SessionRegistryFile};

pub const SERVICE_FILE: &str = "service.json";
pub const SESSIONS_FILE: &str = "sessions.json";
pub const EVENTS_FILE: &str = "events.log";

/// Resolve `$HOME/.mcp-layer/sessions` (spec §4.8, §6).
pub fn sessions_dir() -> PathBuf {
    dirs::home_dir().unwrap_or_else(|| PathBuf::from(".")).join(".mcp-layer").join("sessions")
}

/// Create the sessions directory with mode `0o700` if it doesn't exist.
pub async fn ensure_sessions_dir() -> IpcResult<PathBuf> {
    let dir = sessions_dir();
    fs::create_dir_all(&dir).await?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(&dir, std::fs::Permissions::from_mode(0o700)).await?;
    }
    Ok(dir)
}

/// Write `content` to `path` via write-temp-then-rename, so readers never
/// observe a partially written file. Sets mode `0o600` on the temp file
/// before the rename so the final file inherits it.
async fn write_atomic(path: &Path, content: &[u8]) -> IpcResult<()> {
    let temp_path = path.with_extension(format!("tmp.{}", std::process::id()));
    fs::write(&temp_path, content).await?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(&temp_path, std::fs::Permissions::from_mode(0o600)).await?;
    }

    fs::rename(&temp_path, path).await?;
    Ok(())
}

pub async fn write_service_info(dir: &Path, info: &ServiceInfo) -> IpcResult<()> {
    let content = serde_json::to_vec_pretty(info)?;
    write_atomic(&dir.join(SERVICE_FILE), &content).await
}

pub async fn read_service_info(dir: &Path) -> IpcResult<Option<ServiceInfo>> {
    match fs::read(dir.join(SERVICE_FILE)).await {
        Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

pub async fn delete_service_info(dir: &Path) -> IpcResult<()> {
    match fs::remove_file(dir.join(SERVICE_FILE)).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

pub async fn write_session_registry(dir: &Path, registry: &SessionRegistryFile) -> IpcResult<()> {
    let content = serde_json::to_vec_pretty(registry)?;
    write_atomic(&dir.join(SESSIONS_FILE), &content).await
}

pub async fn read_session_registry(dir: &Path) -> IpcResult<SessionRegistryFile> {
    match fs::read(dir.join(SESSIONS_FILE)).await {
        Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(SessionRegistryFile::default()),
        Err(e) => Err(e.into()),
    }
}

/// Regex matching keys whose values should be redacted (spec §6).
static SENSITIVE_KEY: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)(token|secret|password|authorization|api[_-]?key)").unwrap());

/// Regexes matching sensitive values regardless of key name (spec §6):
/// `Bearer <opaque>`, `key: <8+ chars>`-shaped assignments, and well-known
/// token prefixes.
static SENSITIVE_VALUE_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    vec![
        Regex::new(r"(?i)bearer\s+\S+").unwrap(),
        Regex::new(r"(?i)(api[_-]?key|token|secret|password|authorization)\s*[:=]\s*\S{8,}").unwrap(),
        Regex::new(r"sk-[A-Za-z0-9]{8,}").unwrap(),
        Regex::new(r"ghp_[A-Za-z0-9]{8,}").unwrap(),
    ]
});

fn redact_value(value: &mut Value) {
    match value {
        Value::String(s) => {
            if SENSITIVE_VALUE_PATTERNS.iter().any(|re| re.is_match(s)) {
                *s = "[REDACTED]".to_string();
            }
        }
        Value::Array(items) => items.iter_mut().for_each(redact_value),
        Value::Object(map) => {
            for (key, val) in map.iter_mut() {
                if SENSITIVE_KEY.is_match(key) {
                    *val = Value::String("[REDACTED]".to_string());
                } else {
                    redact_value(val);
                }
            }
        }
        _ => {}
    }
}

/// One line of `events.log`: `{at, type, data}`, with sensitive fields
/// scrubbed from `data` before it ever reaches disk.
pub struct EventLog {
    dir: PathBuf,
    max_bytes: u64,
    max_files: u32,
}

impl EventLog {
    pub fn new(dir: PathBuf, max_bytes: u64, max_files: u32) -> Self {
        Self { dir, max_bytes, max_files }
    }

    pub async fn append(&self, event_type: &str, mut data: Value) -> IpcResult<()> {
        redact_value(&mut data);
        let record = serde_json::json!({
            "at": Utc::now().to_rfc3339(),
            "type": event_type,
            "data": data,
        });
        let mut line = serde_json::to_string(&record)?;
        line.push('\n');

        self.rotate_if_needed().await?;

        let path = self.dir.join(EVENTS_FILE);
        let mut file = fs::OpenOptions::new().create(true).append(true).open(&path).await?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            file.set_permissions(std::fs::Permissions::from_mode(0o600)).await?;
        }
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }

    async fn rotate_if_needed(&self) -> IpcResult<()> {
        let path = self.dir.join(EVENTS_FILE);
        let size = match fs::metadata(&path).await {
            Ok(meta) => meta.len(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        if size <= self.max_bytes {
            return Ok(());
        }

        for n in (1..self.max_files).rev() {
            let from = self.dir.join(format!("{EVENTS_FILE}.{n}"));
            let to = self.dir.join(format!("{EVENTS_FILE}.{}", n + 1));
            if fs::metadata(&from).await.is_ok() {
                let _ = fs::rename(&from, &to).await;
            }
        }
        fs::rename(&path, self.dir.join(format!("{EVENTS_FILE}.1"))).await?;
        Ok(())
    }
}

pub type Timestamp = DateTime<Utc>;

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn service_info_round_trips_atomically() {
        let dir = tempfile::tempdir().unwrap();
        let info = ServiceInfo { pid: 42, endpoint: "/tmp/x.sock".to_string(), token: "abc123".to_string(), started_at: std::time::SystemTime::now() };
        write_service_info(dir.path(), &info).await.unwrap();

        let loaded = read_service_info(dir.path()).await.unwrap().unwrap();
        assert_eq!(loaded.pid, 42);
        assert_eq!(loaded.endpoint, "/tmp/x.sock");

        delete_service_info(dir.path()).await.unwrap();
        assert!(read_service_info(dir.path()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn missing_sessions_file_reads_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let registry = read_session_registry(dir.path()).await.unwrap();
        assert!(registry.sessions.is_empty());
    }

    #[test]
    fn redacts_sensitive_keys() {
        let mut data = json!({"token": "super-secret-value", "name": "alpha"});
        redact_value(&mut data);
        assert_eq!(data["token"], "[REDACTED]");
        assert_eq!(data["name"], "alpha");
    }

    #[test]
    fn redacts_bearer_and_known_prefixes_in_values() {
        let mut data = json!({"header": "Bearer abcdef1234567890", "note": "sk-abcd1234efgh"});
        redact_value(&mut data);
        assert_eq!(data["header"], "[REDACTED]");
        assert_eq!(data["note"], "[REDACTED]");
    }

    #[tokio::test]
    async fn event_log_rotates_past_max_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let log = EventLog::new(dir.path().to_path_buf(), 10, 3);
        log.append("session_opened", json!({"name": "alpha"})).await.unwrap();
        log.append("session_opened", json!({"name": "beta"})).await.unwrap();
        assert!(dir.path().join("events.log.1").exists());
    }
}

use crate::error::AppError;
use crate::session_types::CallSession;

use async_trait::async_trait;
use sqlx::types::Json;
use sqlx::{PgPool, Pool, Postgres};
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use time::OffsetDateTime;
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, error, warn};
use uuid::Uuid;

const SESSION_FILE_SUFFIX: &str = "_transcript.json";

/// Keyed storage of one record per call.
///
/// `save` replaces the whole record atomically, so a concurrent `load` sees either the old or the
/// new record and never a torn one.  Nothing here serializes a load-modify-save cycle; callers
/// hold a [`CallLocks`] guard for that.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn load(&self, call_sid: &str) -> Result<Option<CallSession>, AppError>;
    async fn save(&self, session: &CallSession) -> Result<(), AppError>;
    async fn list(&self) -> Result<Vec<CallSession>, AppError>;
}

/// One JSON document per call in a directory.
pub struct FileSessionStore {
    dir: PathBuf,
}

impl FileSessionStore {
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self, AppError> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir).await.map_err(|e| {
            error!(error=%e, dir=?dir, "failed to create session directory");
            AppError::Persistence(format!("create {}: {e}", dir.display()))
        })?;
        Ok(Self { dir })
    }

    fn path_for(&self, call_sid: &str) -> PathBuf {
        self.dir
            .join(format!("{}{SESSION_FILE_SUFFIX}", file_stem(call_sid)))
    }
}

/// Provider ids are alphanumeric and used as-is.  Anything else is hex-encoded behind a leading
/// `_`, which a plain id never contains, so distinct ids never share a file and none escapes the
/// directory.
pub fn file_stem(call_sid: &str) -> String {
    let plain = !call_sid.is_empty()
        && call_sid
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-');
    if plain {
        call_sid.to_string()
    } else {
        format!("_{}", hex::encode(call_sid.as_bytes()))
    }
}

async fn read_session(path: &Path) -> Result<Option<CallSession>, AppError> {
    let raw = match tokio::fs::read(path).await {
        Ok(raw) => raw,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => {
            error!(error=%e, path=?path, "failed to read session file");
            return Err(AppError::Persistence(format!("read {}: {e}", path.display())));
        }
    };
    serde_json::from_slice(&raw).map(Some).map_err(|e| {
        error!(error=%e, path=?path, "failed to deserialize session file");
        AppError::Persistence(format!("decode {}: {e}", path.display()))
    })
}

/// Write to a sibling temp file and rename over the target.
pub async fn write_atomically(path: &Path, bytes: &[u8]) -> Result<(), std::io::Error> {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp = path.with_file_name(format!(".{file_name}.{}.tmp", Uuid::new_v4()));
    tokio::fs::write(&tmp, bytes).await?;
    if let Err(e) = tokio::fs::rename(&tmp, path).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(e);
    }
    Ok(())
}

#[async_trait]
impl SessionStore for FileSessionStore {
    async fn load(&self, call_sid: &str) -> Result<Option<CallSession>, AppError> {
        let path = self.path_for(call_sid);
        match read_session(&path).await? {
            Some(session) if session.call_sid != call_sid => {
                error!(call_sid=%call_sid, stored=%session.call_sid, path=?path, "session file belongs to another call");
                Err(AppError::Persistence(format!(
                    "{} holds call {}, not {call_sid}",
                    path.display(),
                    session.call_sid
                )))
            }
            found => Ok(found),
        }
    }

    async fn save(&self, session: &CallSession) -> Result<(), AppError> {
        let path = self.path_for(&session.call_sid);
        let bytes = serde_json::to_vec_pretty(session).map_err(|e| {
            error!(error=%e, call_sid=%session.call_sid, "failed to serialize session");
            AppError::Persistence(format!("encode {}: {e}", session.call_sid))
        })?;
        write_atomically(&path, &bytes).await.map_err(|e| {
            error!(error=%e, path=?path, "failed to write session file");
            AppError::Persistence(format!("write {}: {e}", path.display()))
        })?;
        debug!(call_sid=%session.call_sid, turns=session.transcript.len(), "saved session");
        Ok(())
    }

    async fn list(&self) -> Result<Vec<CallSession>, AppError> {
        let mut entries = tokio::fs::read_dir(&self.dir).await.map_err(|e| {
            error!(error=%e, dir=?self.dir, "failed to list session directory");
            AppError::Persistence(format!("list {}: {e}", self.dir.display()))
        })?;
        let mut sessions = vec![];
        loop {
            let entry = match entries.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(e) => {
                    error!(error=%e, "failed to read session directory entry");
                    return Err(AppError::Persistence(format!("list: {e}")));
                }
            };
            let path = entry.path();
            let is_session = path
                .file_name()
                .and_then(|n| n.to_str())
                .map(|n| n.ends_with(SESSION_FILE_SUFFIX) && !n.starts_with('.'))
                .unwrap_or(false);
            if !is_session {
                continue;
            }
            match read_session(&path).await {
                Ok(Some(session)) => sessions.push(session),
                Ok(None) => (),
                Err(e) => warn!(error=%e, path=?path, "skipping unreadable session"),
            }
        }
        Ok(sessions)
    }
}

/// One JSONB row per call.
pub struct PgSessionStore {
    pool: Pool<Postgres>,
}

impl PgSessionStore {
    pub async fn connect(database_url: &str) -> Result<Self, AppError> {
        let pool = PgPool::connect(database_url).await.map_err(|e| {
            error!(error=%e, "failed to connect to postgres");
            AppError::Persistence(format!("connect: {e}"))
        })?;
        sqlx::migrate!().run(&pool).await.map_err(|e| {
            error!(error=%e, "failed to run migrations");
            AppError::Persistence(format!("migrate: {e}"))
        })?;
        Ok(Self { pool })
    }
}

#[async_trait]
impl SessionStore for PgSessionStore {
    async fn load(&self, call_sid: &str) -> Result<Option<CallSession>, AppError> {
        let row: Option<(Json<CallSession>,)> =
            sqlx::query_as("select data from call_sessions where call_sid = $1")
                .bind(call_sid)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| {
                    error!(error=%e, call_sid=%call_sid, "failed to load session row");
                    AppError::Persistence(format!("load {call_sid}: {e}"))
                })?;
        Ok(row.map(|(Json(session),)| session))
    }

    async fn save(&self, session: &CallSession) -> Result<(), AppError> {
        sqlx::query(
            "
            insert into call_sessions (call_sid, data, updated_at)
            values ($1, $2, $3)
            on conflict (call_sid)
            do update set data = excluded.data, updated_at = excluded.updated_at
            ",
        )
        .bind(&session.call_sid)
        .bind(Json(session))
        .bind(OffsetDateTime::now_utc())
        .execute(&self.pool)
        .await
        .map_err(|e| {
            error!(error=%e, call_sid=%session.call_sid, "failed to upsert session row");
            AppError::Persistence(format!("save {}: {e}", session.call_sid))
        })?;
        Ok(())
    }

    async fn list(&self) -> Result<Vec<CallSession>, AppError> {
        let rows: Vec<(Json<CallSession>,)> = sqlx::query_as("select data from call_sessions")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| {
                error!(error=%e, "failed to list session rows");
                AppError::Persistence(format!("list: {e}"))
            })?;
        Ok(rows.into_iter().map(|(Json(session),)| session).collect())
    }
}

/// Per-call mutual exclusion for load-modify-save cycles.
#[derive(Default)]
pub struct CallLocks {
    // call sid => lock; entries nobody holds or waits on are pruned
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl CallLocks {
    pub async fn lock(&self, call_sid: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            locks.entry(call_sid.to_string()).or_default().clone()
        };
        lock.lock_owned().await
    }

    #[cfg(test)]
    fn tracked(&self) -> usize {
        self.locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

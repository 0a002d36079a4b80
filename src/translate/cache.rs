//! Translation cache store.
//! Persistent backend: SQLite with an LRU read-through in front.
//! Fallback backend: a plain in-memory map, used when no path is configured
//! or the database cannot be opened.
//! Entries never expire; only `clear` removes them.

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use lru::LruCache;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use super::TranslateError;

/// Bumped when the table layout changes; applied once per database in `init`.
const SCHEMA_VERSION: i32 = 1;

/// Opaque, restart-stable key for (language pair, glossary fingerprint, normalized text).
/// `glossary` is `None` when the glossary is not applied to the value.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn new(src_lang: &str, tgt_lang: &str, glossary: Option<&str>, normalized_text: &str) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(src_lang.as_bytes());
        hasher.update(b"|");
        hasher.update(tgt_lang.as_bytes());
        hasher.update(b"|");
        match glossary {
            Some(fingerprint) => {
                hasher.update(b"g");
                hasher.update(fingerprint.as_bytes());
            }
            None => {
                hasher.update(b"-");
            }
        }
        hasher.update(b"|");
        hasher.update(normalized_text.as_bytes());
        Self(hasher.finalize().to_hex().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

enum Backend {
    Sqlite {
        conn: Arc<Mutex<Connection>>,
        hot: Mutex<LruCache<CacheKey, String>>,
    },
    Memory(Mutex<HashMap<CacheKey, String>>),
}

pub struct CacheStore {
    path: Option<PathBuf>,
    hot_capacity: NonZeroUsize,
    backend: OnceCell<Backend>,
}

impl CacheStore {
    /// Store persisted at `path`, or memory-only when `path` is `None`.
    /// Nothing is opened until the first operation or an explicit `init`.
    pub fn new(path: Option<PathBuf>, hot_capacity: usize) -> Self {
        Self {
            path,
            hot_capacity: NonZeroUsize::new(hot_capacity).unwrap_or(NonZeroUsize::MIN),
            backend: OnceCell::new(),
        }
    }

    pub fn in_memory() -> Self {
        Self::new(None, 1)
    }

    /// Open or create the backing store. Safe to call any number of times.
    pub async fn init(&self) -> Result<(), TranslateError> {
        self.backend().await.map(|_| ())
    }

    pub async fn is_persistent(&self) -> Result<bool, TranslateError> {
        Ok(matches!(self.backend().await?, Backend::Sqlite { .. }))
    }

    async fn backend(&self) -> Result<&Backend, TranslateError> {
        self.backend
            .get_or_try_init(|| async {
                let Some(path) = self.path.clone() else {
                    debug!("translation cache using memory backend");
                    return Ok(Backend::Memory(Mutex::new(HashMap::new())));
                };

                let opened = tokio::task::spawn_blocking(move || open_sqlite(&path))
                    .await
                    .map_err(|e| TranslateError::Storage(format!("cache open task failed: {e}")))?;

                match opened {
                    Ok(conn) => Ok(Backend::Sqlite {
                        conn: Arc::new(Mutex::new(conn)),
                        hot: Mutex::new(LruCache::new(self.hot_capacity)),
                    }),
                    Err(e) => {
                        warn!(error = %e, "SQLite cache unavailable, falling back to memory");
                        Ok(Backend::Memory(Mutex::new(HashMap::new())))
                    }
                }
            })
            .await
    }

    /// Look up a translation. `Ok(None)` is a plain miss.
    pub async fn get(&self, key: &CacheKey) -> Result<Option<String>, TranslateError> {
        match self.backend().await? {
            Backend::Memory(map) => Ok(map.lock().get(key).cloned()),
            Backend::Sqlite { conn, hot } => {
                let hot_hit = hot.lock().get(key).cloned();
                if hot_hit.is_some() {
                    return Ok(hot_hit);
                }

                let conn = Arc::clone(conn);
                let lookup = key.clone();
                let value = run_blocking(move || {
                    let conn = conn.lock();
                    conn.query_row(
                        "SELECT value FROM translations WHERE key = ?1",
                        params![lookup.as_str()],
                        |row| row.get::<_, String>(0),
                    )
                    .optional()
                })
                .await?;

                if let Some(ref v) = value {
                    hot.lock().put(key.clone(), v.clone());
                }
                Ok(value)
            }
        }
    }

    pub async fn set(&self, key: &CacheKey, value: &str) -> Result<(), TranslateError> {
        match self.backend().await? {
            Backend::Memory(map) => {
                map.lock().insert(key.clone(), value.to_string());
                Ok(())
            }
            Backend::Sqlite { conn, hot } => {
                let conn = Arc::clone(conn);
                let stored_key = key.clone();
                let stored_value = value.to_string();
                run_blocking(move || {
                    let conn = conn.lock();
                    conn.execute(
                        "INSERT OR REPLACE INTO translations (key, value, created_at)
                         VALUES (?1, ?2, ?3)",
                        params![stored_key.as_str(), stored_value, now_unix()],
                    )
                })
                .await?;
                hot.lock().put(key.clone(), value.to_string());
                Ok(())
            }
        }
    }

    pub async fn clear(&self) -> Result<(), TranslateError> {
        match self.backend().await? {
            Backend::Memory(map) => map.lock().clear(),
            Backend::Sqlite { conn, hot } => {
                let conn = Arc::clone(conn);
                let removed = run_blocking(move || {
                    let conn = conn.lock();
                    conn.execute("DELETE FROM translations", [])
                })
                .await?;
                hot.lock().clear();
                info!(removed, "translation cache cleared");
            }
        }
        Ok(())
    }
}

fn open_sqlite(path: &Path) -> Result<Connection, TranslateError> {
    let conn = Connection::open(path).map_err(storage_error)?;

    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")
        .map_err(storage_error)?;

    let version: i32 = conn
        .query_row("PRAGMA user_version", [], |row| row.get(0))
        .map_err(storage_error)?;

    if version < SCHEMA_VERSION {
        conn.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS translations (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                created_at INTEGER NOT NULL
            );
            PRAGMA user_version = {SCHEMA_VERSION};"
        ))
        .map_err(storage_error)?;
        info!(path = %path.display(), from = version, to = SCHEMA_VERSION, "translation cache schema upgraded");
    }

    info!(path = %path.display(), "SQLite translation cache opened");
    Ok(conn)
}

async fn run_blocking<T, F>(f: F) -> Result<T, TranslateError>
where
    T: Send + 'static,
    F: FnOnce() -> rusqlite::Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| TranslateError::Storage(format!("cache task failed: {e}")))?
        .map_err(storage_error)
}

fn storage_error(e: rusqlite::Error) -> TranslateError {
    TranslateError::Storage(e.to_string())
}

/// Current time as Unix timestamp (seconds).
fn now_unix() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_depends_on_every_component() {
        let base = CacheKey::new("en", "fr", None, "Hello");
        assert_eq!(base, CacheKey::new("en", "fr", None, "Hello"));
        assert_ne!(base, CacheKey::new("en", "de", None, "Hello"));
        assert_ne!(base, CacheKey::new("es", "fr", None, "Hello"));
        assert_ne!(base, CacheKey::new("en", "fr", Some(""), "Hello"));
        assert_ne!(CacheKey::new("en", "fr", Some("ab"), "Hello"), CacheKey::new("en", "fr", Some("cd"), "Hello"));
        assert_ne!(base, CacheKey::new("en", "fr", None, "hello"));
        assert_eq!(base.as_str().len(), 64);
    }

    #[tokio::test]
    async fn memory_backend_round_trip() {
        let store = CacheStore::in_memory();
        store.init().await.unwrap();
        store.init().await.unwrap();
        assert!(!store.is_persistent().await.unwrap());

        let key = CacheKey::new("auto", "en", None, "Hola");
        assert_eq!(store.get(&key).await.unwrap(), None);
        store.set(&key, "Hello").await.unwrap();
        assert_eq!(store.get(&key).await.unwrap().as_deref(), Some("Hello"));
        store.clear().await.unwrap();
        assert_eq!(store.get(&key).await.unwrap(), None);
    }

    #[tokio::test]
    async fn sqlite_backend_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.db");
        let key = CacheKey::new("en", "fr", None, "Good morning");

        {
            let store = CacheStore::new(Some(path.clone()), 4);
            assert!(store.is_persistent().await.unwrap());
            store.set(&key, "Bonjour").await.unwrap();
            assert_eq!(store.get(&key).await.unwrap().as_deref(), Some("Bonjour"));
        }

        let reopened = CacheStore::new(Some(path), 4);
        assert_eq!(reopened.get(&key).await.unwrap().as_deref(), Some("Bonjour"));
        reopened.clear().await.unwrap();
        assert_eq!(reopened.get(&key).await.unwrap(), None);
    }

    #[tokio::test]
    async fn concurrent_sets_on_different_keys() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(CacheStore::new(Some(dir.path().join("c.db")), 2));

        let writes = (0..16).map(|i| {
            let store = Arc::clone(&store);
            tokio::spawn(async move {
                let key = CacheKey::new("en", "de", None, &format!("text {i}"));
                store.set(&key, &format!("Text {i}")).await
            })
        });
        for w in futures_util::future::join_all(writes).await {
            w.unwrap().unwrap();
        }

        for i in 0..16 {
            let key = CacheKey::new("en", "de", None, &format!("text {i}"));
            assert_eq!(store.get(&key).await.unwrap(), Some(format!("Text {i}")));
        }
    }

    #[tokio::test]
    async fn unopenable_path_falls_back_to_memory() {
        let dir = tempfile::tempdir().unwrap();
        // A directory cannot be opened as a database file.
        let store = CacheStore::new(Some(dir.path().to_path_buf()), 4);
        assert!(!store.is_persistent().await.unwrap());
        let key = CacheKey::new("en", "fr", None, "x");
        store.set(&key, "y").await.unwrap();
        assert_eq!(store.get(&key).await.unwrap().as_deref(), Some("y"));
    }
}

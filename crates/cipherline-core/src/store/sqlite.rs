//! SQLite-backed session store.

use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use base64::{engine::general_purpose::STANDARD, Engine as _};
use cipherline_crypto::{KEY_LEN, SALT_LEN};
use rusqlite::{params, Connection, OptionalExtension};

use crate::session::{NewSession, SessionRecord};

use super::{SessionStore, StoreError};

/// Session store on a single SQLite connection.
///
/// The connection sits behind a mutex: session creation happens once per
/// handshake and lookups are cached by the hub, so contention is not a
/// concern. Clones share the connection.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open (or create) the store at `database_url`.
    ///
    /// `:memory:` opens a private in-memory database; anything else is
    /// treated as a file path. File-backed stores run in WAL mode.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Sqlite`] if the database cannot be opened or
    /// the schema cannot be created. Callers treat this as fatal at
    /// process start.
    pub fn open(database_url: &str) -> Result<Self, StoreError> {
        let in_memory = database_url == ":memory:";
        let conn =
            if in_memory { Connection::open_in_memory()? } else { Connection::open(database_url)? };

        if !in_memory {
            // WAL keeps readers non-blocking; not supported in-memory.
            let _: String = conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
        }

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS session (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                client_id TEXT,
                salt TEXT NOT NULL,
                key_c2s BLOB NOT NULL,
                key_s2c BLOB NOT NULL,
                created_at INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_session_client_id ON session (client_id);",
        )?;

        Ok(Self { conn: Arc::new(Mutex::new(conn)) })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Connection> {
        match self.conn.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl SessionStore for SqliteStore {
    fn create(&self, new: NewSession) -> Result<SessionRecord, StoreError> {
        let created_at = SystemTime::now();
        let created_secs = created_at
            .duration_since(SystemTime::UNIX_EPOCH)
            .unwrap_or(Duration::ZERO)
            .as_secs() as i64;

        let conn = self.lock();
        conn.execute(
            "INSERT INTO session (client_id, salt, key_c2s, key_s2c, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                new.client_id,
                STANDARD.encode(new.salt),
                new.keys.k_c2s.as_slice(),
                new.keys.k_s2c.as_slice(),
                created_secs,
            ],
        )?;

        let id = conn.last_insert_rowid();

        Ok(SessionRecord {
            id,
            client_id: new.client_id,
            salt: new.salt,
            key_c2s: new.keys.k_c2s,
            key_s2c: new.keys.k_s2c,
            created_at,
        })
    }

    fn find_by_id(&self, id: i64) -> Result<Option<SessionRecord>, StoreError> {
        let conn = self.lock();

        let row = conn
            .query_row(
                "SELECT client_id, salt, key_c2s, key_s2c, created_at
                 FROM session WHERE id = ?1",
                params![id],
                |row| {
                    Ok((
                        row.get::<_, Option<String>>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, Vec<u8>>(2)?,
                        row.get::<_, Vec<u8>>(3)?,
                        row.get::<_, i64>(4)?,
                    ))
                },
            )
            .optional()?;

        let Some((client_id, salt_b64, key_c2s, key_s2c, created_secs)) = row else {
            return Ok(None);
        };

        let salt_bytes = STANDARD
            .decode(&salt_b64)
            .map_err(|e| StoreError::CorruptRecord { id, reason: format!("salt: {e}") })?;
        let salt = <[u8; SALT_LEN]>::try_from(salt_bytes.as_slice()).map_err(|_| {
            StoreError::CorruptRecord {
                id,
                reason: format!("salt must be {SALT_LEN} bytes, got {}", salt_bytes.len()),
            }
        })?;

        let key_c2s = decode_key(id, "key_c2s", &key_c2s)?;
        let key_s2c = decode_key(id, "key_s2c", &key_s2c)?;

        Ok(Some(SessionRecord {
            id,
            client_id: client_id.unwrap_or_default(),
            salt,
            key_c2s,
            key_s2c,
            created_at: SystemTime::UNIX_EPOCH + Duration::from_secs(created_secs.max(0) as u64),
        }))
    }
}

fn decode_key(id: i64, column: &str, bytes: &[u8]) -> Result<[u8; KEY_LEN], StoreError> {
    <[u8; KEY_LEN]>::try_from(bytes).map_err(|_| StoreError::CorruptRecord {
        id,
        reason: format!("{column} must be {KEY_LEN} bytes, got {}", bytes.len()),
    })
}

#[cfg(test)]
mod tests {
    use cipherline_crypto::SessionKeys;

    use super::*;

    fn open_memory() -> SqliteStore {
        SqliteStore::open(":memory:").unwrap()
    }

    fn new_session(client_id: &str) -> NewSession {
        NewSession {
            client_id: client_id.to_string(),
            salt: [9u8; 32],
            keys: SessionKeys { k_c2s: [3u8; 16], k_s2c: [4u8; 16] },
        }
    }

    #[test]
    fn create_and_find_round_trip() {
        let store = open_memory();

        let created = store.create(new_session("alice")).unwrap();
        assert!(created.id >= 1);

        let found = store.find_by_id(created.id).unwrap().unwrap();
        assert_eq!(found.client_id, "alice");
        assert_eq!(found.salt, [9u8; 32]);
        assert_eq!(found.key_c2s, [3u8; 16]);
        assert_eq!(found.key_s2c, [4u8; 16]);
    }

    #[test]
    fn ids_increase_monotonically() {
        let store = open_memory();

        let a = store.create(new_session("a")).unwrap();
        let b = store.create(new_session("b")).unwrap();
        let c = store.create(new_session("c")).unwrap();

        assert!(a.id < b.id && b.id < c.id);
    }

    #[test]
    fn unknown_id_is_none() {
        let store = open_memory();
        assert!(store.find_by_id(12345).unwrap().is_none());
    }

    #[test]
    fn corrupt_key_blob_is_reported() {
        let store = open_memory();
        let created = store.create(new_session("alice")).unwrap();

        store
            .lock()
            .execute(
                "UPDATE session SET key_c2s = ?1 WHERE id = ?2",
                params![vec![0u8; 7], created.id],
            )
            .unwrap();

        assert!(matches!(
            store.find_by_id(created.id),
            Err(StoreError::CorruptRecord { .. })
        ));
    }

    #[test]
    fn corrupt_salt_is_reported() {
        let store = open_memory();
        let created = store.create(new_session("alice")).unwrap();

        store
            .lock()
            .execute(
                "UPDATE session SET salt = 'not-base64!!!' WHERE id = ?1",
                params![created.id],
            )
            .unwrap();

        assert!(matches!(
            store.find_by_id(created.id),
            Err(StoreError::CorruptRecord { .. })
        ));
    }

    #[test]
    fn file_backed_store_persists_across_reopen() {
        let path = std::env::temp_dir().join(format!(
            "cipherline_store_test_{}.db",
            std::process::id()
        ));
        let _ = std::fs::remove_file(&path);
        let url = path.to_string_lossy().to_string();

        let id = {
            let store = SqliteStore::open(&url).unwrap();
            store.create(new_session("alice")).unwrap().id
        };

        {
            let store = SqliteStore::open(&url).unwrap();
            let found = store.find_by_id(id).unwrap().unwrap();
            assert_eq!(found.client_id, "alice");
        }

        let _ = std::fs::remove_file(&path);
    }
}

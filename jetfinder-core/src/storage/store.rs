//! SQLite-backed implementation of the storage traits

use std::path::Path;

use chrono::{SecondsFormat, Utc};
use parking_lot::{Mutex, MutexGuard};
use rusqlite::{params, Connection, OptionalExtension};

use super::{CollectedSpotsStore, CookieJar, KeyValueStorage};
use crate::error::Result;

const KEY_USER_REGISTERED: &str = "isUserRegistered";
const KEY_WINNER_NAME: &str = "winnerName";
const KEY_COOKIES: &str = "cookies";

fn now_ts() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Store handle (single connection)
pub struct Store {
    conn: Mutex<Connection>,
}

impl Store {
    /// Open or create a store at the given path
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            ",
        )?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open an in-memory store (for testing)
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Run migrations on this store
    pub fn migrate(&self) -> Result<()> {
        super::schema::run_migrations(&self.conn.lock())
    }

    fn connection(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock()
    }

    fn get(&self, key: &str) -> Result<Option<String>> {
        let conn = self.connection();
        let value = conn
            .query_row("SELECT value FROM kv WHERE key = ?1", [key], |r| r.get(0))
            .optional()?;
        Ok(value)
    }

    fn set(&self, key: &str, value: Option<&str>) -> Result<()> {
        let conn = self.connection();
        match value {
            Some(value) => {
                conn.execute(
                    r#"
                    INSERT INTO kv (key, value, updated_at) VALUES (?1, ?2, ?3)
                    ON CONFLICT(key) DO UPDATE SET
                        value = excluded.value,
                        updated_at = excluded.updated_at
                    "#,
                    params![key, value, now_ts()],
                )?;
            }
            None => {
                conn.execute("DELETE FROM kv WHERE key = ?1", [key])?;
            }
        }
        Ok(())
    }
}

impl KeyValueStorage for Store {
    fn is_user_registered(&self) -> Result<bool> {
        Ok(self.get(KEY_USER_REGISTERED)?.as_deref() == Some("true"))
    }

    fn set_user_registered(&self, registered: bool) -> Result<()> {
        let value = if registered { "true" } else { "false" };
        self.set(KEY_USER_REGISTERED, Some(value))
    }

    fn winner_name(&self) -> Result<Option<String>> {
        self.get(KEY_WINNER_NAME)
    }

    fn set_winner_name(&self, name: &str) -> Result<()> {
        self.set(KEY_WINNER_NAME, Some(name))
    }

    fn cookies(&self) -> Result<Option<String>> {
        self.get(KEY_COOKIES)
    }

    fn set_cookies(&self, cookies: Option<&str>) -> Result<()> {
        self.set(KEY_COOKIES, cookies)
    }
}

impl CookieJar for Store {
    fn last_cookie(&self) -> Result<Option<String>> {
        let conn = self.connection();
        // Only the newest cookie counts; once it is banned the jar is empty
        // until the server hands out a fresh one
        let latest: Option<(String, bool)> = conn
            .query_row(
                "SELECT cookie, banned FROM cookies ORDER BY seen_at DESC, id DESC LIMIT 1",
                [],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .optional()?;
        Ok(latest.and_then(|(cookie, banned)| (!banned).then_some(cookie)))
    }

    fn store_cookie(&self, cookie: &str) -> Result<bool> {
        let conn = self.connection();
        let banned: Option<bool> = conn
            .query_row(
                "SELECT banned FROM cookies WHERE cookie = ?1",
                [cookie],
                |r| r.get(0),
            )
            .optional()?;

        if banned == Some(true) {
            tracing::debug!("Ignoring banned cookie");
            return Ok(false);
        }

        conn.execute(
            r#"
            INSERT INTO cookies (cookie, seen_at, banned) VALUES (?1, ?2, 0)
            ON CONFLICT(cookie) DO UPDATE SET seen_at = excluded.seen_at
            "#,
            params![cookie, now_ts()],
        )?;
        Ok(true)
    }

    fn ban_cookie(&self) -> Result<()> {
        let conn = self.connection();
        let banned = conn.execute(
            r#"
            UPDATE cookies SET banned = 1
            WHERE id = (
                SELECT id FROM cookies
                ORDER BY seen_at DESC, id DESC LIMIT 1
            )
            "#,
            [],
        )?;
        tracing::debug!(banned, "Banned last cookie");
        Ok(())
    }
}

impl CollectedSpotsStore for Store {
    fn collected_spot_ids(&self) -> Result<Vec<i64>> {
        let conn = self.connection();
        let mut stmt = conn.prepare("SELECT spot_id FROM collected_spots ORDER BY position")?;
        let ids = stmt
            .query_map([], |r| r.get(0))?
            .collect::<rusqlite::Result<Vec<i64>>>()?;
        Ok(ids)
    }

    fn set_collected_spot_ids(&self, ids: &[i64]) -> Result<()> {
        let mut conn = self.connection();
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM collected_spots", [])?;
        {
            let mut stmt = tx.prepare(
                "INSERT OR IGNORE INTO collected_spots (spot_id, position) VALUES (?1, ?2)",
            )?;
            for (position, id) in ids.iter().enumerate() {
                stmt.execute(params![id, position as i64])?;
            }
        }
        tx.commit()?;
        Ok(())
    }
}

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, TimeZone, Utc};
use mlog_proto::{Mission, PendingOperation, UserInfo};
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

const KEY_MISSIONS: &str = "missions";
const KEY_TOKEN: &str = "token";
const KEY_USER: &str = "user";

/// A queued write as stored on disk.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingRow {
    pub seq: i64,
    pub op: PendingOperation,
    pub queued_at: DateTime<Utc>,
}

/// Rows handed to one drainer by [`LocalDb::claim_pending`].
#[derive(Debug, Default)]
pub struct PendingClaim {
    pub rows: Vec<PendingRow>,
    /// Undecodable rows moved to `dead_ops` during the claim.
    pub dead_lettered: usize,
}

/// Local SQLite database used by mlog-syncd: key-value cache plus the pending-write queue.
pub struct LocalDb {
    conn: Mutex<Connection>,
}

impl LocalDb {
    /// Open the database at the given path and initialize tables if needed
    pub fn new(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create db directory: {}", parent.display()))?;
        }
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database: {}", path.display()))?;
        Self::init(conn)
    }

    pub fn in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.busy_timeout(Duration::from_secs(5))?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS kv (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS pending_ops (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                operation TEXT NOT NULL,
                queued_at_ms INTEGER NOT NULL,
                claimed_by TEXT,
                claimed_at_ms INTEGER
            );
            CREATE TABLE IF NOT EXISTS dead_ops (
                seq INTEGER PRIMARY KEY,
                operation TEXT NOT NULL,
                queued_at_ms INTEGER NOT NULL,
                reason TEXT NOT NULL,
                dead_at_ms INTEGER NOT NULL
            );",
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("local database lock poisoned"))
    }

    // --- key-value ---

    pub fn get_value(&self, key: &str) -> Result<Option<String>> {
        Ok(self
            .conn()?
            .query_row("SELECT value FROM kv WHERE key = ?1", params![key], |row| {
                row.get(0)
            })
            .optional()?)
    }

    pub fn set_value(&self, key: &str, value: &str) -> Result<()> {
        self.conn()?.execute(
            "INSERT INTO kv (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, value],
        )?;
        Ok(())
    }

    pub fn delete_value(&self, key: &str) -> Result<()> {
        self.conn()?
            .execute("DELETE FROM kv WHERE key = ?1", params![key])?;
        Ok(())
    }

    pub fn token(&self) -> Result<Option<String>> {
        self.get_value(KEY_TOKEN)
    }

    pub fn set_session(&self, token: &str, user: &UserInfo) -> Result<()> {
        self.set_value(KEY_TOKEN, token)?;
        self.set_value(KEY_USER, &serde_json::to_string(user)?)
    }

    pub fn clear_session(&self) -> Result<()> {
        self.delete_value(KEY_TOKEN)?;
        self.delete_value(KEY_USER)
    }

    pub fn user(&self) -> Result<Option<UserInfo>> {
        self.get_value(KEY_USER)?
            .map(|raw| serde_json::from_str(&raw).context("corrupt cached user"))
            .transpose()
    }

    // --- mission cache ---

    pub fn cached_missions(&self) -> Result<Vec<Mission>> {
        Ok(match self.get_value(KEY_MISSIONS)? {
            Some(raw) => serde_json::from_str(&raw).context("corrupt cached missions")?,
            None => Vec::new(),
        })
    }

    pub fn store_missions(&self, missions: &[Mission]) -> Result<()> {
        self.set_value(KEY_MISSIONS, &serde_json::to_string(missions)?)
    }

    /// Read-modify-write of the cached list under one lock.
    fn update_missions<F>(&self, f: F) -> Result<()>
    where
        F: FnOnce(&mut Vec<Mission>),
    {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let raw: Option<String> = tx
            .query_row(
                "SELECT value FROM kv WHERE key = ?1",
                params![KEY_MISSIONS],
                |row| row.get(0),
            )
            .optional()?;
        let mut missions: Vec<Mission> = match raw {
            Some(raw) => serde_json::from_str(&raw).context("corrupt cached missions")?,
            None => Vec::new(),
        };
        f(&mut missions);
        tx.execute(
            "INSERT INTO kv (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![KEY_MISSIONS, serde_json::to_string(&missions)?],
        )?;
        tx.commit()?;
        Ok(())
    }

    /// Put `mission` at the head of the cache, dropping any older copy.
    pub fn prepend_mission(&self, mission: &Mission) -> Result<()> {
        self.update_missions(|missions| {
            missions.retain(|m| m.id != mission.id);
            missions.insert(0, mission.clone());
        })
    }

    /// Replace the cached copy in place, or prepend when it is not cached yet.
    pub fn upsert_cached_mission(&self, mission: &Mission) -> Result<()> {
        self.update_missions(|missions| {
            match missions.iter_mut().find(|m| m.id == mission.id) {
                Some(slot) => *slot = mission.clone(),
                None => missions.insert(0, mission.clone()),
            }
        })
    }

    pub fn remove_cached_mission(&self, id: i64) -> Result<()> {
        self.update_missions(|missions| missions.retain(|m| m.id != id))
    }

    // --- pending queue ---

    pub fn insert_pending(&self, op: &PendingOperation) -> Result<i64> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO pending_ops (operation, queued_at_ms) VALUES (?1, ?2)",
            params![serde_json::to_string(op)?, Utc::now().timestamp_millis()],
        )?;
        Ok(conn.last_insert_rowid())
    }

    #[cfg(test)]
    pub(crate) fn insert_pending_raw(&self, raw: &str) -> Result<i64> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO pending_ops (operation, queued_at_ms) VALUES (?1, ?2)",
            params![raw, Utc::now().timestamp_millis()],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// All queued writes, oldest first. Rows that no longer decode are skipped.
    pub fn pending(&self) -> Result<Vec<PendingRow>> {
        let conn = self.conn()?;
        let mut stmt =
            conn.prepare("SELECT seq, operation, queued_at_ms FROM pending_ops ORDER BY seq")?;
        let rows = stmt
            .query_map([], raw_pending)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut pending = Vec::with_capacity(rows.len());
        for (seq, raw, queued_at_ms) in rows {
            match decode_pending(seq, &raw, queued_at_ms) {
                Ok(row) => pending.push(row),
                Err(e) => tracing::warn!(seq, error = %e, "skipping undecodable pending operation"),
            }
        }
        Ok(pending)
    }

    /// Atomically take every unclaimed row (or one whose claim is older than
    /// `stale_after`) for `owner`.
    ///
    /// Rows that cannot be decoded are moved to `dead_ops` in the same
    /// transaction so they never block later drains.
    pub fn claim_pending(&self, owner: &str, stale_after: Duration) -> Result<PendingClaim> {
        let now = Utc::now().timestamp_millis();
        let stale_before = now - stale_after.as_millis() as i64;

        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let rows = {
            let mut stmt = tx.prepare(
                "SELECT seq, operation, queued_at_ms FROM pending_ops
                 WHERE claimed_by IS NULL OR claimed_at_ms < ?1
                 ORDER BY seq",
            )?;
            let rows = stmt
                .query_map(params![stale_before], raw_pending)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            rows
        };

        let mut claim = PendingClaim::default();
        for (seq, raw, queued_at_ms) in rows {
            match decode_pending(seq, &raw, queued_at_ms) {
                Ok(row) => {
                    tx.execute(
                        "UPDATE pending_ops SET claimed_by = ?1, claimed_at_ms = ?2 WHERE seq = ?3",
                        params![owner, now, seq],
                    )?;
                    claim.rows.push(row);
                }
                Err(e) => {
                    tracing::warn!(seq, error = %e, "moving undecodable pending operation to dead_ops");
                    tx.execute(
                        "INSERT OR REPLACE INTO dead_ops (seq, operation, queued_at_ms, reason, dead_at_ms)
                         VALUES (?1, ?2, ?3, ?4, ?5)",
                        params![seq, raw, queued_at_ms, e.to_string(), now],
                    )?;
                    tx.execute("DELETE FROM pending_ops WHERE seq = ?1", params![seq])?;
                    claim.dead_lettered += 1;
                }
            }
        }
        tx.commit()?;
        Ok(claim)
    }

    /// Hand claimed rows back so the next drain picks them up.
    pub fn release_pending(&self, seqs: &[i64]) -> Result<()> {
        if seqs.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "UPDATE pending_ops SET claimed_by = NULL, claimed_at_ms = NULL WHERE seq = ?1",
            )?;
            for seq in seqs {
                stmt.execute(params![seq])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    pub fn dead_letter_count(&self) -> Result<usize> {
        let count: i64 =
            self.conn()?
                .query_row("SELECT COUNT(*) FROM dead_ops", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    pub fn pending_count(&self) -> Result<usize> {
        let count: i64 =
            self.conn()?
                .query_row("SELECT COUNT(*) FROM pending_ops", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    /// Delete exactly the given entries; returns how many were removed.
    pub fn remove_pending(&self, seqs: &[i64]) -> Result<usize> {
        if seqs.is_empty() {
            return Ok(0);
        }
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let mut removed = 0;
        {
            let mut stmt = tx.prepare("DELETE FROM pending_ops WHERE seq = ?1")?;
            for seq in seqs {
                removed += stmt.execute(params![seq])?;
            }
        }
        tx.commit()?;
        Ok(removed)
    }
}

fn raw_pending(row: &rusqlite::Row<'_>) -> rusqlite::Result<(i64, String, i64)> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?))
}

fn decode_pending(seq: i64, raw: &str, queued_at_ms: i64) -> serde_json::Result<PendingRow> {
    Ok(PendingRow {
        seq,
        op: serde_json::from_str(raw)?,
        queued_at: Utc
            .timestamp_millis_opt(queued_at_ms)
            .single()
            .unwrap_or_else(Utc::now),
    })
}

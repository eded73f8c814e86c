use std::path::Path;

use rusqlite::{Connection, OptionalExtension, params};

use crate::{BackingStore, Result};

/// Durable [`BackingStore`] on a single SQLite file.
///
/// Each database is one `kv` table; every trait operation is a single
/// SQL statement, so single-key writes are atomic even if the process
/// dies mid-operation.
#[derive(Debug)]
pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    /// Opens the store at `path`, creating the file and schema when
    /// they do not exist yet. Reopening an existing store is a no-op
    /// migration.
    ///
    /// # Errors
    /// Returns an error if the file cannot be opened or the schema
    /// cannot be created.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        let store = Self { conn };
        store.migrate()?;
        Ok(store)
    }

    fn migrate(&self) -> Result<()> {
        self.conn.execute_batch(
            r"
        PRAGMA journal_mode=WAL;

        CREATE TABLE IF NOT EXISTS kv (
            key TEXT PRIMARY KEY,
            value BLOB NOT NULL
        );
        ",
        )?;
        Ok(())
    }
}

// Escapes LIKE wildcards so a scan prefix is always matched literally.
fn like_prefix(prefix: &str) -> String {
    let mut pattern = String::with_capacity(prefix.len() + 1);
    for ch in prefix.chars() {
        if matches!(ch, '%' | '_' | '\\') {
            pattern.push('\\');
        }
        pattern.push(ch);
    }
    pattern.push('%');
    pattern
}

impl BackingStore for SqliteStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let value = self
            .conn
            .query_row("SELECT value FROM kv WHERE key = ?", params![key], |r| {
                r.get(0)
            })
            .optional()?;
        Ok(value)
    }

    fn put(&mut self, key: &str, value: &[u8]) -> Result<()> {
        self.conn.execute(
            "INSERT INTO kv (key, value) VALUES (?, ?)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, value],
        )?;
        Ok(())
    }

    fn delete(&mut self, key: &str) -> Result<bool> {
        let removed = self.conn.execute("DELETE FROM kv WHERE key = ?", params![key])?;
        Ok(removed > 0)
    }

    fn scan(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>> {
        let mut stmt = self
            .conn
            .prepare("SELECT key, value FROM kv WHERE key LIKE ? ESCAPE '\\' ORDER BY key ASC")?;
        let rows = stmt.query_map(params![like_prefix(prefix)], |r| {
            Ok((r.get::<_, String>(0)?, r.get::<_, Vec<u8>>(1)?))
        })?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    fn clear(&mut self) -> Result<()> {
        self.conn.execute("DELETE FROM kv", [])?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    #![allow(clippy::expect_used)]
    use super::*;

    fn open_tmp(name: &str) -> (tempfile::TempDir, SqliteStore) {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = SqliteStore::open(&dir.path().join(format!("{name}.sqlite3"))).expect("open");
        (dir, store)
    }

    #[test]
    fn test_get_missing_is_none() -> Result<()> {
        let (_dir, store) = open_tmp("missing");
        assert!(store.get("nope")?.is_none());
        Ok(())
    }

    #[test]
    fn test_put_get_overwrite() -> Result<()> {
        let (_dir, mut store) = open_tmp("put_get");
        store.put("keys", b"first")?;
        assert_eq!(store.get("keys")?.as_deref(), Some(&b"first"[..]));

        // put is an upsert
        store.put("keys", b"second")?;
        assert_eq!(store.get("keys")?.as_deref(), Some(&b"second"[..]));
        Ok(())
    }

    #[test]
    fn test_delete_reports_presence() -> Result<()> {
        let (_dir, mut store) = open_tmp("delete");
        store.put("a", b"1")?;
        assert!(store.delete("a")?);
        assert!(!store.delete("a")?);
        assert!(store.get("a")?.is_none());
        Ok(())
    }

    #[test]
    fn test_scan_prefix_and_ordering() -> Result<()> {
        let (_dir, mut store) = open_tmp("scan");
        store.put("items/b", b"2")?;
        store.put("items/a", b"1")?;
        store.put("items/c", b"3")?;
        store.put("keys", b"blob")?;
        store.put("salt", b"salty")?;

        let items = store.scan("items/")?;
        let keys: Vec<_> = items.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, vec!["items/a", "items/b", "items/c"]);
        assert_eq!(items[0].1, b"1");

        // a prefix containing LIKE wildcards matches literally
        store.put("odd_key%x", b"odd")?;
        store.put("oddXkeyYx", b"not-matched")?;
        let odd = store.scan("odd_key%")?;
        assert_eq!(odd.len(), 1);
        assert_eq!(odd[0].0, "odd_key%x");
        Ok(())
    }

    #[test]
    fn test_clear_empties_database() -> Result<()> {
        let (_dir, mut store) = open_tmp("clear");
        store.put("keys", b"blob")?;
        store.put("items/a", b"1")?;
        store.clear()?;
        assert!(store.get("keys")?.is_none());
        assert!(store.scan("")?.is_empty());
        Ok(())
    }

    #[test]
    fn test_reopen_persists() -> Result<()> {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("persist.sqlite3");
        {
            let mut store = SqliteStore::open(&path)?;
            store.put("keys", b"blob")?;
        }
        let store = SqliteStore::open(&path)?;
        assert_eq!(store.get("keys")?.as_deref(), Some(&b"blob"[..]));
        Ok(())
    }
}

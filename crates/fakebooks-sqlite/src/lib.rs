//! Embedded key-value store for the fakebooks emulator.
//!
//! One SQLite file holds every named collection. Records are JSON documents
//! keyed either by a per-collection auto-incrementing integer or, for the
//! token and login-session collections, by an opaque string. All access goes
//! through [`Store::update`] or [`Store::view`], which run the caller's
//! closure inside a single SQLite transaction; writers take the database lock
//! up front so a read-then-write inside one closure cannot interleave with
//! another writer.

use std::{
    collections::HashSet,
    path::Path,
    sync::{Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use rusqlite::{params, Connection, OptionalExtension, Transaction, TransactionBehavior};
use serde::{de::DeserializeOwned, Serialize};

pub use fakebooks_core::StoreError;

pub type Key = i64;

pub const IN_MEMORY: &str = ":memory:";

fn backend(e: rusqlite::Error) -> StoreError {
    StoreError::Backend(e.to_string())
}

fn encode<T: Serialize>(value: &T) -> Result<String, StoreError> {
    serde_json::to_string(value).map_err(|e| StoreError::Codec(e.to_string()))
}

fn decode<T: DeserializeOwned>(raw: &str) -> Result<T, StoreError> {
    serde_json::from_str(raw).map_err(|e| StoreError::Codec(e.to_string()))
}

pub struct Store {
    conn: Mutex<Connection>,
    collections: HashSet<String>,
}

impl Store {
    /// Opens (or creates) the database file at `path`. `":memory:"` gives a
    /// private in-memory database.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        let conn = if path == Path::new(IN_MEMORY) {
            Connection::open_in_memory()
        } else {
            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)?;
                }
            }
            Connection::open(path)
        }
        .map_err(backend)?;

        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")
            .map_err(backend)?;
        conn.busy_timeout(Duration::from_secs(5)).map_err(backend)?;

        Self::init_schema(&conn)?;
        tracing::debug!(path = %path.display(), "Store opened");

        Ok(Self {
            conn: Mutex::new(conn),
            collections: HashSet::new(),
        })
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::open(IN_MEMORY)
    }

    fn init_schema(conn: &Connection) -> Result<(), StoreError> {
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS collections (
                name TEXT PRIMARY KEY,
                last_id INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS records (
                collection TEXT NOT NULL,
                id INTEGER NOT NULL,
                value TEXT NOT NULL,
                PRIMARY KEY (collection, id)
            ) WITHOUT ROWID;

            CREATE TABLE IF NOT EXISTS string_records (
                collection TEXT NOT NULL,
                key TEXT NOT NULL,
                value TEXT NOT NULL,
                PRIMARY KEY (collection, key)
            ) WITHOUT ROWID;
            ",
        )
        .map_err(backend)
    }

    /// Creates the named collections if they are absent. Collections must be
    /// declared before any transaction touches them.
    pub fn declare(&mut self, names: &[&str]) -> Result<(), StoreError> {
        let conn = self.conn.get_mut().unwrap_or_else(PoisonError::into_inner);

        for name in names {
            conn.execute(
                "INSERT OR IGNORE INTO collections (name, last_id) VALUES (?1, 0)",
                params![name],
            )
            .map_err(backend)?;
            self.collections.insert(name.to_string());
        }

        tracing::debug!(collections = ?names, "Collections declared");
        Ok(())
    }

    pub fn is_declared(&self, name: &str) -> bool {
        self.collections.contains(name)
    }

    /// Fails with the first name that was never declared.
    pub fn check_declared(&self, names: &[&str]) -> Result<(), StoreError> {
        match names.iter().find(|n| !self.is_declared(n)) {
            Some(missing) => Err(StoreError::UndeclaredCollection(missing.to_string())),
            None => Ok(()),
        }
    }

    /// A closure that panicked mid-transaction poisons the mutex, but the
    /// unwind dropped its `Transaction` and rolled it back, so the
    /// connection is still consistent.
    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|poisoned| {
            tracing::warn!("Recovering store lock after a panicked transaction");
            self.conn.clear_poison();
            poisoned.into_inner()
        })
    }

    fn run<R, E, F>(&self, behavior: TransactionBehavior, f: F) -> Result<R, E>
    where
        E: From<StoreError>,
        F: FnOnce(&Txn<'_>) -> Result<R, E>,
    {
        let mut conn = self.lock();
        let tx = conn.transaction_with_behavior(behavior).map_err(backend)?;
        let txn = Txn {
            tx,
            collections: &self.collections,
        };

        // An early return drops `txn`, which rolls the transaction back.
        let out = f(&txn)?;
        txn.tx.commit().map_err(backend)?;
        Ok(out)
    }

    /// Runs `f` in a write transaction. Returning `Err` rolls back every
    /// write made through the transaction, including `next_id` allocations.
    pub fn update<R, E, F>(&self, f: F) -> Result<R, E>
    where
        E: From<StoreError>,
        F: FnOnce(&Txn<'_>) -> Result<R, E>,
    {
        self.run(TransactionBehavior::Immediate, f)
    }

    pub fn view<R, E, F>(&self, f: F) -> Result<R, E>
    where
        E: From<StoreError>,
        F: FnOnce(&Txn<'_>) -> Result<R, E>,
    {
        self.run(TransactionBehavior::Deferred, f)
    }

    pub fn next_id(&self, collection: &str) -> Result<Key, StoreError> {
        self.update(|txn| txn.next_id(collection))
    }

    pub fn put<T: Serialize>(&self, collection: &str, key: Key, value: &T) -> Result<(), StoreError> {
        self.update(|txn| txn.put(collection, key, value))
    }

    pub fn get<T: DeserializeOwned>(&self, collection: &str, key: Key) -> Result<T, StoreError> {
        self.view(|txn| txn.get(collection, key))
    }

    pub fn delete(&self, collection: &str, key: Key) -> Result<(), StoreError> {
        self.update(|txn| txn.delete(collection, key))
    }

    pub fn scan<T, P>(&self, collection: &str, predicate: P) -> Result<Vec<T>, StoreError>
    where
        T: DeserializeOwned,
        P: FnMut(&T) -> bool,
    {
        self.view(|txn| txn.scan(collection, predicate))
    }

    pub fn put_string<T: Serialize>(&self, collection: &str, key: &str, value: &T) -> Result<(), StoreError> {
        self.update(|txn| txn.put_string(collection, key, value))
    }

    pub fn get_string<T: DeserializeOwned>(&self, collection: &str, key: &str) -> Result<T, StoreError> {
        self.view(|txn| txn.get_string(collection, key))
    }

    pub fn delete_string(&self, collection: &str, key: &str) -> Result<(), StoreError> {
        self.update(|txn| txn.delete_string(collection, key))
    }
}

/// A live transaction handed to [`Store::update`] and [`Store::view`]
/// closures.
pub struct Txn<'a> {
    tx: Transaction<'a>,
    collections: &'a HashSet<String>,
}

impl<'a> Txn<'a> {
    fn ensure(&self, collection: &str) -> Result<(), StoreError> {
        if self.collections.contains(collection) {
            Ok(())
        } else {
            Err(StoreError::UndeclaredCollection(collection.to_string()))
        }
    }

    /// Allocates the next key of `collection`. Keys are never handed out
    /// twice, even after the record holding one is deleted.
    pub fn next_id(&self, collection: &str) -> Result<Key, StoreError> {
        self.ensure(collection)?;
        self.tx
            .execute(
                "UPDATE collections SET last_id = last_id + 1 WHERE name = ?1",
                params![collection],
            )
            .map_err(backend)?;
        self.tx
            .query_row(
                "SELECT last_id FROM collections WHERE name = ?1",
                params![collection],
                |row| row.get(0),
            )
            .map_err(backend)
    }

    /// Inserts or replaces the record at `key`. A key above the collection's
    /// counter advances the counter so `next_id` cannot collide with it.
    pub fn put<T: Serialize>(&self, collection: &str, key: Key, value: &T) -> Result<(), StoreError> {
        self.ensure(collection)?;
        let encoded = encode(value)?;
        self.tx
            .execute(
                "INSERT INTO records (collection, id, value) VALUES (?1, ?2, ?3)
                 ON CONFLICT (collection, id) DO UPDATE SET value = excluded.value",
                params![collection, key, encoded],
            )
            .map_err(backend)?;
        self.tx
            .execute(
                "UPDATE collections SET last_id = MAX(last_id, ?2) WHERE name = ?1",
                params![collection, key],
            )
            .map_err(backend)?;
        Ok(())
    }

    pub fn get<T: DeserializeOwned>(&self, collection: &str, key: Key) -> Result<T, StoreError> {
        self.ensure(collection)?;
        let raw: Option<String> = self
            .tx
            .query_row(
                "SELECT value FROM records WHERE collection = ?1 AND id = ?2",
                params![collection, key],
                |row| row.get(0),
            )
            .optional()
            .map_err(backend)?;

        match raw {
            Some(raw) => decode(&raw),
            None => Err(StoreError::not_found(collection, key)),
        }
    }

    pub fn delete(&self, collection: &str, key: Key) -> Result<(), StoreError> {
        self.ensure(collection)?;
        let removed = self
            .tx
            .execute(
                "DELETE FROM records WHERE collection = ?1 AND id = ?2",
                params![collection, key],
            )
            .map_err(backend)?;

        if removed == 0 {
            return Err(StoreError::not_found(collection, key));
        }
        Ok(())
    }

    /// Returns every record of `collection` accepted by `predicate`, in key
    /// order.
    pub fn scan<T, P>(&self, collection: &str, mut predicate: P) -> Result<Vec<T>, StoreError>
    where
        T: DeserializeOwned,
        P: FnMut(&T) -> bool,
    {
        self.ensure(collection)?;
        let mut stmt = self
            .tx
            .prepare("SELECT value FROM records WHERE collection = ?1 ORDER BY id")
            .map_err(backend)?;
        let rows = stmt
            .query_map(params![collection], |row| row.get::<_, String>(0))
            .map_err(backend)?;

        let mut result = Vec::new();
        for row in rows {
            let value: T = decode(&row.map_err(backend)?)?;
            if predicate(&value) {
                result.push(value);
            }
        }
        Ok(result)
    }

    pub fn count(&self, collection: &str) -> Result<usize, StoreError> {
        self.ensure(collection)?;
        let count: i64 = self
            .tx
            .query_row(
                "SELECT COUNT(*) FROM records WHERE collection = ?1",
                params![collection],
                |row| row.get(0),
            )
            .map_err(backend)?;
        Ok(count as usize)
    }

    pub fn put_string<T: Serialize>(&self, collection: &str, key: &str, value: &T) -> Result<(), StoreError> {
        self.ensure(collection)?;
        let encoded = encode(value)?;
        self.tx
            .execute(
                "INSERT INTO string_records (collection, key, value) VALUES (?1, ?2, ?3)
                 ON CONFLICT (collection, key) DO UPDATE SET value = excluded.value",
                params![collection, key, encoded],
            )
            .map_err(backend)?;
        Ok(())
    }

    pub fn get_string<T: DeserializeOwned>(&self, collection: &str, key: &str) -> Result<T, StoreError> {
        self.ensure(collection)?;
        let raw: Option<String> = self
            .tx
            .query_row(
                "SELECT value FROM string_records WHERE collection = ?1 AND key = ?2",
                params![collection, key],
                |row| row.get(0),
            )
            .optional()
            .map_err(backend)?;

        match raw {
            Some(raw) => decode(&raw),
            None => Err(StoreError::not_found(collection, key)),
        }
    }

    pub fn delete_string(&self, collection: &str, key: &str) -> Result<(), StoreError> {
        self.ensure(collection)?;
        let removed = self
            .tx
            .execute(
                "DELETE FROM string_records WHERE collection = ?1 AND key = ?2",
                params![collection, key],
            )
            .map_err(backend)?;

        if removed == 0 {
            return Err(StoreError::not_found(collection, key));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use std::sync::Arc;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Note {
        id: Key,
        body: String,
        open: bool,
    }

    fn store() -> Store {
        let mut store = Store::open_in_memory().unwrap();
        store.declare(&["notes", "sessions"]).unwrap();
        store
    }

    #[test]
    fn test_next_id_is_monotonic_across_deletes() {
        let store = store();

        let mut last = 0;
        for round in 0..5 {
            let id = store.next_id("notes").unwrap();
            assert!(id > last, "round {}: {} should exceed {}", round, id, last);
            store.put("notes", id, &Note { id, body: format!("n{}", id), open: true }).unwrap();
            store.delete("notes", id).unwrap();
            last = id;
        }

        // Deleting the newest record must not free its key.
        assert_eq!(store.next_id("notes").unwrap(), last + 1);
    }

    #[test]
    fn test_counters_are_per_collection() {
        let store = store();
        assert_eq!(store.next_id("notes").unwrap(), 1);
        assert_eq!(store.next_id("notes").unwrap(), 2);
        assert_eq!(store.next_id("sessions").unwrap(), 1);
    }

    #[test]
    fn test_explicit_put_advances_counter() {
        let store = store();
        store.put("notes", 10, &Note { id: 10, body: "seeded".into(), open: false }).unwrap();
        assert_eq!(store.next_id("notes").unwrap(), 11);
    }

    #[test]
    fn test_get_put_delete() {
        let store = store();
        let note = Note { id: 1, body: "hello".into(), open: true };
        store.put("notes", 1, &note).unwrap();
        assert_eq!(store.get::<Note>("notes", 1).unwrap(), note);

        let updated = Note { body: "bye".into(), ..note };
        store.put("notes", 1, &updated).unwrap();
        assert_eq!(store.get::<Note>("notes", 1).unwrap(), updated);

        store.delete("notes", 1).unwrap();
        assert!(store.get::<Note>("notes", 1).unwrap_err().is_not_found());
        assert!(store.delete("notes", 1).unwrap_err().is_not_found());
    }

    #[test]
    fn test_scan_filters_in_key_order() {
        let store = store();
        for id in [3, 1, 2, 5, 4] {
            store.put("notes", id, &Note { id, body: String::new(), open: id % 2 == 1 }).unwrap();
        }

        let open: Vec<Note> = store.scan("notes", |n: &Note| n.open).unwrap();
        let ids: Vec<Key> = open.iter().map(|n| n.id).collect();
        assert_eq!(ids, vec![1, 3, 5]);

        let all: Vec<Note> = store.scan("notes", |_: &Note| true).unwrap();
        assert_eq!(all.len(), 5);
    }

    #[test]
    fn test_string_keys() {
        let store = store();
        store.put_string("sessions", "abc", &42i64).unwrap();
        assert_eq!(store.get_string::<i64>("sessions", "abc").unwrap(), 42);
        store.delete_string("sessions", "abc").unwrap();
        assert!(store.get_string::<i64>("sessions", "abc").unwrap_err().is_not_found());
        assert!(store.delete_string("sessions", "abc").unwrap_err().is_not_found());
    }

    #[test]
    fn test_undeclared_collection() {
        let store = store();
        let err = store.next_id("ghosts").unwrap_err();
        assert!(matches!(err, StoreError::UndeclaredCollection(ref name) if name == "ghosts"));
        assert!(store.check_declared(&["notes", "ghosts"]).is_err());
        assert!(store.check_declared(&["notes", "sessions"]).is_ok());
    }

    #[test]
    fn test_update_rolls_back_on_error() {
        let store = store();

        let result: Result<(), StoreError> = store.update(|txn| {
            let id = txn.next_id("notes")?;
            txn.put("notes", id, &Note { id, body: "doomed".into(), open: true })?;
            Err(StoreError::Backend("abort".into()))
        });
        assert!(result.is_err());

        assert_eq!(store.view(|txn| txn.count("notes")).unwrap(), 0);
        // The allocation rolled back with the write.
        assert_eq!(store.next_id("notes").unwrap(), 1);
    }

    #[test]
    fn test_concurrent_next_id_never_repeats() {
        let store = Arc::new(store());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = store.clone();
                std::thread::spawn(move || {
                    (0..25).map(|_| store.next_id("notes").unwrap()).collect::<Vec<_>>()
                })
            })
            .collect();

        let mut ids: Vec<Key> = handles.into_iter().flat_map(|h| h.join().unwrap()).collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), 200);
        assert_eq!(ids.last(), Some(&200));
    }

    #[test]
    fn test_panicked_transaction_does_not_wedge_store() {
        let store = store();
        store.put("notes", 1, &Note { id: 1, body: "before".into(), open: true }).unwrap();

        let panicked = std::thread::scope(|s| {
            s.spawn(|| {
                let _: Result<(), StoreError> = store.update(|txn| {
                    txn.put("notes", 1, &Note { id: 1, body: "half-written".into(), open: false })?;
                    panic!("closure blew up");
                });
            })
            .join()
            .is_err()
        });
        assert!(panicked);

        assert_eq!(store.get::<Note>("notes", 1).unwrap().body, "before");
        assert_eq!(store.next_id("notes").unwrap(), 2);
    }

    #[test]
    fn test_reopen_keeps_records_and_counters() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("store.db");

        {
            let mut store = Store::open(&path).unwrap();
            store.declare(&["notes"]).unwrap();
            let id = store.next_id("notes").unwrap();
            store.put("notes", id, &Note { id, body: "kept".into(), open: true }).unwrap();
            store.delete("notes", id).unwrap();
            let id = store.next_id("notes").unwrap();
            store.put("notes", id, &Note { id, body: "kept".into(), open: true }).unwrap();
        }

        let mut store = Store::open(&path).unwrap();
        store.declare(&["notes"]).unwrap();
        assert_eq!(store.get::<Note>("notes", 2).unwrap().body, "kept");
        assert_eq!(store.next_id("notes").unwrap(), 3);
    }
}

use std::{path::PathBuf, time::Instant};

use metrics::{counter, histogram};
use parking_lot::{Mutex, MutexGuard};
use rocksdb::{DBWithThreadMode, Direction, IteratorMode, MultiThreaded, Options, WriteBatch};
use serde::{Serialize, de::DeserializeOwned};
use tracing::debug;

use crate::{
    error::{RequestError, Result},
    snowflake::IdGenerator,
};

const SEP: u8 = b'/';
const PREFIX_LIVE: &str = "live";
const PREFIX_DELETED: &str = "deleted";
const PREFIX_CHILD: &str = "child";

/// A persisted record kind. `KIND` namespaces keys so several record types
/// share one database.
pub trait Record: Serialize + DeserializeOwned + Clone {
    const KIND: &'static str;

    fn id(&self) -> &str;

    /// Owning record, indexed so children can be enumerated per parent.
    fn parent_id(&self) -> Option<&str> {
        None
    }

    fn revision_id(&self) -> u64;

    fn set_revision_id(&mut self, revision_id: u64);
}

pub struct RecordStore {
    db: DBWithThreadMode<MultiThreaded>,
    write_lock: Mutex<()>,
    ids: IdGenerator,
}

/// Pending writes for one logical operation, applied atomically by `write`.
/// Holding a transaction serializes writers, so revision checks made through
/// it cannot race.
pub struct Transaction<'a> {
    store: &'a RecordStore,
    _guard: MutexGuard<'a, ()>,
    batch: WriteBatch,
    operations: usize,
}

impl RecordStore {
    pub fn open(path: PathBuf, worker_id: u16) -> Result<Self> {
        let mut options = Options::default();
        options.create_if_missing(true);
        let db = DBWithThreadMode::<MultiThreaded>::open(&options, &path)?;
        debug!(path = %path.display(), "opened record store");
        Ok(Self {
            db,
            write_lock: Mutex::new(()),
            ids: IdGenerator::new(worker_id),
        })
    }

    pub fn next_id(&self) -> String {
        self.ids.next_id()
    }

    pub fn begin(&self) -> Transaction<'_> {
        Transaction {
            store: self,
            _guard: self.write_lock.lock(),
            batch: WriteBatch::default(),
            operations: 0,
        }
    }

    pub fn get_by_id<T: Record>(&self, id: &str, with_deleted: bool) -> Result<Option<T>> {
        let start = Instant::now();
        let result = (|| {
            if let Some(record) = self.load(&live_key(T::KIND, id))? {
                return Ok(Some(record));
            }
            if with_deleted {
                return self.load(&deleted_key(T::KIND, id));
            }
            Ok(None)
        })();
        record_store_op("get", &result, start);
        result
    }

    /// All live records of one kind, in key order.
    pub fn list<T: Record>(&self) -> Result<Vec<T>> {
        let start = Instant::now();
        let prefix = key_with_segments(&[PREFIX_LIVE, T::KIND, ""]);
        let result = self.scan(&prefix, |_, value| {
            serde_json::from_slice::<T>(value).map_err(RequestError::from)
        });
        record_store_op("list", &result, start);
        result
    }

    /// Ids of the live children of `parent_id`.
    pub fn child_ids<T: Record>(&self, parent_id: &str) -> Result<Vec<String>> {
        let prefix = key_with_segments(&[PREFIX_CHILD, T::KIND, parent_id, ""]);
        self.scan(&prefix, |key, _| {
            Ok(String::from_utf8_lossy(&key[prefix.len()..]).into_owned())
        })
    }

    fn load<T: Record>(&self, key: &[u8]) -> Result<Option<T>> {
        match self.db.get(key)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    fn scan<F, V>(&self, prefix: &[u8], mut decode: F) -> Result<Vec<V>>
    where
        F: FnMut(&[u8], &[u8]) -> Result<V>,
    {
        let iter = self
            .db
            .iterator(IteratorMode::From(prefix, Direction::Forward));
        let mut items = Vec::new();
        for item in iter {
            let (key, value) = item?;
            if !key.starts_with(prefix) {
                break;
            }
            items.push(decode(&key, &value)?);
        }
        Ok(items)
    }

    fn stored_revision<T: Record>(&self, id: &str) -> Result<Option<u64>> {
        Ok(self
            .load::<T>(&live_key(T::KIND, id))?
            .map(|record| record.revision_id()))
    }
}

impl<'a> Transaction<'a> {
    /// Stage a new record at revision 1.
    pub fn create<T: Record>(&mut self, record: &mut T) -> Result<()> {
        if self.store.stored_revision::<T>(record.id())?.is_some() {
            return Err(RequestError::Storage(format!(
                "{} {} already exists",
                T::KIND,
                record.id()
            )));
        }
        record.set_revision_id(1);
        self.put(record)
    }

    /// Stage an update of an existing record. The record must carry the
    /// revision currently stored; on success it is bumped by one.
    pub fn commit<T: Record>(&mut self, record: &mut T) -> Result<()> {
        let stored = self
            .store
            .stored_revision::<T>(record.id())?
            .ok_or_else(|| {
                RequestError::Storage(format!("{} {} does not exist", T::KIND, record.id()))
            })?;
        if stored != record.revision_id() {
            return Err(RequestError::RevisionConflict {
                expected: record.revision_id(),
                actual: stored,
            });
        }
        record.set_revision_id(stored + 1);
        self.put(record)
    }

    /// Stage removal of a record. Without `force` it moves to the deleted
    /// keyspace and stays readable through `get_by_id(.., true)`.
    pub fn delete<T: Record>(&mut self, record: &T, force: bool) -> Result<()> {
        self.batch.delete(live_key(T::KIND, record.id()));
        if let Some(parent) = record.parent_id() {
            self.batch.delete(child_key(T::KIND, parent, record.id()));
        }
        let deleted = deleted_key(T::KIND, record.id());
        if force {
            self.batch.delete(deleted);
        } else {
            self.batch.put(deleted, serde_json::to_vec(record)?);
        }
        self.operations += 1;
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.operations == 0
    }

    pub fn write(self) -> Result<()> {
        self.write_then(|| {})
    }

    /// Write the batch and, if it succeeded, run `applied` before the writer
    /// lock is released. Side effects that must follow commit order go here.
    pub fn write_then<F: FnOnce()>(self, applied: F) -> Result<()> {
        if self.operations > 0 {
            let start = Instant::now();
            let result = self.store.db.write(self.batch).map_err(RequestError::from);
            record_store_op("write", &result, start);
            result?;
        }
        applied();
        Ok(())
    }

    fn put<T: Record>(&mut self, record: &T) -> Result<()> {
        self.batch
            .put(live_key(T::KIND, record.id()), serde_json::to_vec(record)?);
        if let Some(parent) = record.parent_id() {
            self.batch.put(child_key(T::KIND, parent, record.id()), b"");
        }
        self.operations += 1;
        Ok(())
    }
}

fn live_key(kind: &str, id: &str) -> Vec<u8> {
    key_with_segments(&[PREFIX_LIVE, kind, id])
}

fn deleted_key(kind: &str, id: &str) -> Vec<u8> {
    key_with_segments(&[PREFIX_DELETED, kind, id])
}

fn child_key(kind: &str, parent_id: &str, id: &str) -> Vec<u8> {
    key_with_segments(&[PREFIX_CHILD, kind, parent_id, id])
}

fn key_with_segments(parts: &[&str]) -> Vec<u8> {
    let mut key = Vec::new();
    let mut iter = parts.iter();
    if let Some(first) = iter.next() {
        key.extend_from_slice(first.as_bytes());
    }
    for part in iter {
        key.push(SEP);
        key.extend_from_slice(part.as_bytes());
    }
    key
}

fn record_store_op<T>(operation: &'static str, result: &Result<T>, start: Instant) {
    let status = if result.is_ok() { "ok" } else { "err" };
    let labels = [("operation", operation), ("status", status)];
    counter!("reqflow_store_operations_total", &labels).increment(1);
    histogram!("reqflow_store_operation_duration_seconds", &labels)
        .record(start.elapsed().as_secs_f64());
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
    struct Note {
        id: String,
        owner: String,
        body: String,
        revision_id: u64,
    }

    impl Record for Note {
        const KIND: &'static str = "note";

        fn id(&self) -> &str {
            &self.id
        }

        fn parent_id(&self) -> Option<&str> {
            Some(&self.owner)
        }

        fn revision_id(&self) -> u64 {
            self.revision_id
        }

        fn set_revision_id(&mut self, revision_id: u64) {
            self.revision_id = revision_id;
        }
    }

    fn note(id: &str, owner: &str) -> Note {
        Note {
            id: id.into(),
            owner: owner.into(),
            body: "hello".into(),
            revision_id: 0,
        }
    }

    fn open_store() -> (tempfile::TempDir, RecordStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = RecordStore::open(dir.path().join("db"), 1).unwrap();
        (dir, store)
    }

    #[test]
    fn create_commit_and_read_back() {
        let (_dir, store) = open_store();
        let mut record = note("n1", "o1");

        let mut tx = store.begin();
        tx.create(&mut record).unwrap();
        tx.write().unwrap();
        assert_eq!(record.revision_id, 1);

        record.body = "changed".into();
        let mut tx = store.begin();
        tx.commit(&mut record).unwrap();
        tx.write().unwrap();

        let stored: Note = store.get_by_id("n1", false).unwrap().unwrap();
        assert_eq!(stored.body, "changed");
        assert_eq!(stored.revision_id, 2);
    }

    #[test]
    fn stale_revision_is_rejected() {
        let (_dir, store) = open_store();
        let mut record = note("n1", "o1");
        let mut tx = store.begin();
        tx.create(&mut record).unwrap();
        tx.write().unwrap();

        let mut stale = record.clone();
        stale.revision_id = 7;
        let mut tx = store.begin();
        let err = tx.commit(&mut stale).unwrap_err();
        assert!(matches!(
            err,
            RequestError::RevisionConflict {
                expected: 7,
                actual: 1
            }
        ));
    }

    #[test]
    fn soft_and_forced_deletes() {
        let (_dir, store) = open_store();
        let mut soft = note("n1", "o1");
        let mut hard = note("n2", "o1");
        let mut tx = store.begin();
        tx.create(&mut soft).unwrap();
        tx.create(&mut hard).unwrap();
        tx.write().unwrap();
        assert_eq!(store.child_ids::<Note>("o1").unwrap(), vec!["n1", "n2"]);

        let mut tx = store.begin();
        tx.delete(&soft, false).unwrap();
        tx.delete(&hard, true).unwrap();
        tx.write().unwrap();

        assert!(store.get_by_id::<Note>("n1", false).unwrap().is_none());
        assert!(store.get_by_id::<Note>("n1", true).unwrap().is_some());
        assert!(store.get_by_id::<Note>("n2", true).unwrap().is_none());
        assert!(store.child_ids::<Note>("o1").unwrap().is_empty());
    }

    #[test]
    fn list_is_scoped_to_kind_and_live_records() {
        let (_dir, store) = open_store();
        let mut tx = store.begin();
        for id in ["a", "b", "c"] {
            tx.create(&mut note(id, "o1")).unwrap();
        }
        tx.write().unwrap();

        let listed: Vec<Note> = store.list().unwrap();
        assert_eq!(listed.len(), 3);
    }

    #[test]
    fn dropped_transaction_writes_nothing() {
        let (_dir, store) = open_store();
        {
            let mut tx = store.begin();
            tx.create(&mut note("n1", "o1")).unwrap();
        }
        assert!(store.get_by_id::<Note>("n1", false).unwrap().is_none());
    }
}

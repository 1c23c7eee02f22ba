use serde_json::Value;

use crate::{
    error::Result,
    index::SearchIndex,
    store::{Record, RecordStore, Transaction},
};

enum IndexOp {
    Index {
        kind: &'static str,
        id: String,
        document: Value,
        refresh: bool,
    },
    Delete {
        kind: &'static str,
        id: String,
        refresh: bool,
    },
}

/// Record writes and index updates of one service operation. Nothing is
/// persisted or indexed until [`UnitOfWork::complete`]; dropping the unit
/// discards everything.
pub struct UnitOfWork<'a> {
    tx: Transaction<'a>,
    index: &'a dyn SearchIndex,
    index_ops: Vec<IndexOp>,
}

impl<'a> UnitOfWork<'a> {
    pub fn begin(store: &'a RecordStore, index: &'a dyn SearchIndex) -> Self {
        Self {
            tx: store.begin(),
            index,
            index_ops: Vec::new(),
        }
    }

    pub fn create<T: Record>(&mut self, record: &mut T) -> Result<()> {
        self.tx.create(record)
    }

    pub fn commit<T: Record>(&mut self, record: &mut T) -> Result<()> {
        self.tx.commit(record)
    }

    pub fn delete<T: Record>(&mut self, record: &T, force: bool) -> Result<()> {
        self.tx.delete(record, force)
    }

    pub fn reindex<T: Record>(&mut self, record: &T, document: Value, refresh: bool) {
        self.index_ops.push(IndexOp::Index {
            kind: T::KIND,
            id: record.id().to_string(),
            document,
            refresh,
        });
    }

    pub fn unindex<T: Record>(&mut self, record: &T, refresh: bool) {
        self.index_ops.push(IndexOp::Delete {
            kind: T::KIND,
            id: record.id().to_string(),
            refresh,
        });
    }

    /// Write the batch, then apply index operations in registration order.
    /// The writer lock is held until the index has seen every operation, so
    /// index updates land in commit order.
    pub fn complete(self) -> Result<()> {
        let Self {
            tx,
            index,
            index_ops,
        } = self;
        tx.write_then(|| {
            for op in index_ops {
                match op {
                    IndexOp::Index {
                        kind,
                        id,
                        document,
                        refresh,
                    } => index.index(kind, &id, document, refresh),
                    IndexOp::Delete { kind, id, refresh } => index.delete(kind, &id, refresh),
                }
            }
        })
    }
}

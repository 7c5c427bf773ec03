use rocksdb::{Options, WriteBatch, DB};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard};

pub struct Database {
    pub inner: Arc<DB>,
    // Serializes check-then-commit sequences for every store sharing this
    // database, however many store handles exist over it. Cross-process
    // exclusion comes from RocksDB's own directory lock.
    write_lock: Mutex<()>,
}

impl Database {
    pub fn new(path: &str) -> Result<Self, rocksdb::Error> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        let db = DB::open(&opts, Path::new(path))?;
        Ok(Self {
            inner: Arc::new(db),
            write_lock: Mutex::new(()),
        })
    }

    /// Takes the database-wide write lock. Held across a read-check and the
    /// batch commit that depends on it.
    pub async fn lock_writes(&self) -> MutexGuard<'_, ()> {
        self.write_lock.lock().await
    }

    // All-or-nothing commit; reservation cell keys and the record must land together.
    pub fn write_batch(&self, batch: WriteBatch) -> Result<(), rocksdb::Error> {
        self.inner.write(batch)
    }
}

use hashbrown::HashMap;

use serra::device::DeviceId;

use tokio::sync::RwLock;

use crate::error::Result;
use crate::record::ControlRecord;

/// A persistent store of [`ControlRecord`]s, one per device.
///
/// Records are never deleted: the first access to a device creates its
/// default record, and later accesses return the saved one.
pub trait ControlStore: Send + Sync + 'static {
    /// Returns the [`ControlRecord`] of a device, atomically creating a
    /// default one if the device has none.
    ///
    /// # Errors
    ///
    /// The store cannot be reached or holds an invalid record.
    fn load(&self, device: &DeviceId) -> impl Future<Output = Result<ControlRecord>> + Send;

    /// Saves a complete [`ControlRecord`], replacing the previous one.
    ///
    /// # Errors
    ///
    /// The store cannot be reached.
    fn save(&self, record: &ControlRecord) -> impl Future<Output = Result<()>> + Send;
}

/// A [`ControlStore`] which keeps records in memory.
///
/// Records are lost when the store is dropped.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: RwLock<HashMap<DeviceId, ControlRecord>>,
}

impl MemoryStore {
    /// Creates an empty [`MemoryStore`].
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of stored records.
    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    /// Checks whether the store is empty.
    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

impl ControlStore for MemoryStore {
    async fn load(&self, device: &DeviceId) -> Result<ControlRecord> {
        if let Some(record) = self.records.read().await.get(device) {
            return Ok(record.clone());
        }

        // Another task may have created the record between the two locks,
        // the entry keeps the first one.
        let mut records = self.records.write().await;
        let record = records
            .entry(device.clone())
            .or_insert_with(|| ControlRecord::new(device.clone()));
        Ok(record.clone())
    }

    async fn save(&self, record: &ControlRecord) -> Result<()> {
        let _ = self
            .records
            .write()
            .await
            .insert(record.device.clone(), record.clone());
        Ok(())
    }
}

#[cfg(feature = "persistent")]
pub use persistent::RedbStore;

#[cfg(feature = "persistent")]
mod persistent {
    use std::path::Path;
    use std::sync::Arc;

    use redb::{Database, ReadableTable, TableDefinition};

    use serra::device::DeviceId;

    use tracing::debug;

    use crate::error::{Error, Result};
    use crate::record::ControlRecord;

    use super::ControlStore;

    // Records encoded as `JSON`, keyed by device identifier.
    const RECORDS: TableDefinition<'static, &str, &[u8]> = TableDefinition::new("control_records");

    /// A [`ControlStore`] backed by a `redb` database file.
    ///
    /// Every operation runs inside its own write transaction on a blocking
    /// thread, so the creation of a default record is atomic.
    #[derive(Clone)]
    pub struct RedbStore {
        db: Arc<Database>,
    }

    impl RedbStore {
        /// Opens the database at the given path, creating it if it does not
        /// exist.
        ///
        /// # Errors
        ///
        /// The database file cannot be created, opened, or initialized.
        pub fn open(path: impl AsRef<Path>) -> Result<Self> {
            let path = path.as_ref();
            let db = Database::create(path).map_err(Error::persistence)?;

            let txn = db.begin_write().map_err(Error::persistence)?;
            drop(txn.open_table(RECORDS).map_err(Error::persistence)?);
            txn.commit().map_err(Error::persistence)?;

            debug!("Control records database opened at {}", path.display());

            Ok(Self { db: Arc::new(db) })
        }

        async fn blocking<T, F>(&self, operation: F) -> Result<T>
        where
            T: Send + 'static,
            F: FnOnce(&Database) -> Result<T> + Send + 'static,
        {
            let db = Arc::clone(&self.db);
            tokio::task::spawn_blocking(move || operation(&db))
                .await
                .map_err(Error::persistence)?
        }
    }

    fn encode(record: &ControlRecord) -> Result<Vec<u8>> {
        serde_json::to_vec(record).map_err(Error::persistence)
    }

    fn decode(bytes: &[u8]) -> Result<ControlRecord> {
        serde_json::from_slice(bytes).map_err(Error::persistence)
    }

    fn load_or_create(db: &Database, device: DeviceId) -> Result<ControlRecord> {
        let txn = db.begin_write().map_err(Error::persistence)?;

        let record = {
            let mut table = txn.open_table(RECORDS).map_err(Error::persistence)?;

            let stored = table
                .get(device.as_str())
                .map_err(Error::persistence)?
                .map(|value| decode(value.value()));

            if let Some(record) = stored {
                record?
            } else {
                let record = ControlRecord::new(device);
                let _ = table
                    .insert(record.device.as_str(), encode(&record)?.as_slice())
                    .map_err(Error::persistence)?;
                record
            }
        };

        txn.commit().map_err(Error::persistence)?;
        Ok(record)
    }

    fn store(db: &Database, record: &ControlRecord) -> Result<()> {
        let txn = db.begin_write().map_err(Error::persistence)?;
        {
            let mut table = txn.open_table(RECORDS).map_err(Error::persistence)?;
            let _ = table
                .insert(record.device.as_str(), encode(record)?.as_slice())
                .map_err(Error::persistence)?;
        }
        txn.commit().map_err(Error::persistence)
    }

    impl ControlStore for RedbStore {
        async fn load(&self, device: &DeviceId) -> Result<ControlRecord> {
            let device = device.clone();
            self.blocking(move |db| load_or_create(db, device)).await
        }

        async fn save(&self, record: &ControlRecord) -> Result<()> {
            let record = record.clone();
            self.blocking(move |db| store(db, &record)).await
        }
    }
}

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, PoisonError, RwLock};

use ::sled::{Batch, Config, Db, Tree};
use tracing::{debug, warn};

use super::{Savepoint, Transaction, TransactionalStore};
use crate::config::StoreConfig;
use crate::encoding::{decode, encode, index_key, record_key, table_prefix};
use crate::entity::EntityType;
use crate::record::Record;
use crate::result::{DbResult, TinyBatchError};
use crate::value::{Payload, Value};

const RECORDS_TREE: &str = "records";

/// Decoded committed records, keyed by tree key.
type RecordCache = Arc<RwLock<HashMap<Vec<u8>, Payload>>>;

/// A transactional record store based on sled.
///
/// Every entity type lives in one tree so a page can be committed as a single
/// atomic [`Batch`].
#[derive(Clone)]
pub struct SledStore {
    engine: Db,
    records: Tree,
    cache: RecordCache,
    flush_on_commit: bool,
}

impl SledStore {
    /// Open a store.
    ///
    /// # Arguments
    ///
    /// * `config` - Where the database lives. Without a path the database is temporary.
    pub fn open(config: &StoreConfig) -> DbResult<Self> {
        let engine = if let Some(path) = &config.path {
            Config::new().path(path).temporary(config.temporary)
        } else {
            Config::new().temporary(true)
        }
        .open()?;

        let records = engine.open_tree(RECORDS_TREE)?;
        debug!(path = ?config.path, temporary = config.temporary, "opened sled store");

        Ok(Self {
            engine,
            records,
            cache: Arc::new(RwLock::new(HashMap::new())),
            flush_on_commit: config.flush_on_commit,
        })
    }

    /// Open an in-memory store that is removed on drop.
    pub fn temporary() -> DbResult<Self> {
        Self::open(&StoreConfig::default())
    }

    /// Read a committed record outside of any transaction.
    pub fn get(&self, entity_type: &EntityType, key: &Value) -> DbResult<Option<Record>> {
        match self.records.get(record_key(entity_type.name(), key)?)? {
            Some(bytes) => Ok(Some(Record {
                entity_type: entity_type.clone(),
                key: key.clone(),
                data: decode(&bytes)?,
            })),
            None => Ok(None),
        }
    }

    /// Every committed record of a table, in key order.
    pub fn all(&self, entity_type: &EntityType) -> DbResult<Vec<Record>> {
        let mut records = Vec::new();
        for entry in self.records.scan_prefix(table_prefix(entity_type.name())?) {
            let (key, value) = entry?;
            let (_, _, key): (u8, String, Value) = decode(&key)?;
            records.push(Record {
                entity_type: entity_type.clone(),
                key,
                data: decode(&value)?,
            });
        }

        Ok(records)
    }

    /// Number of committed records in a table.
    pub fn count(&self, entity_type: &EntityType) -> DbResult<usize> {
        let mut count = 0;
        for entry in self.records.scan_prefix(table_prefix(entity_type.name())?) {
            entry?;
            count += 1;
        }

        Ok(count)
    }

    /// Number of records currently held in the read cache.
    pub fn cached_records(&self) -> usize {
        self.cache.read().unwrap_or_else(PoisonError::into_inner).len()
    }
}

impl TransactionalStore for SledStore {
    type Transaction = SledTransaction;

    fn open_scope(&self) -> DbResult<SledTransaction> {
        Ok(SledTransaction {
            engine: self.engine.clone(),
            records: self.records.clone(),
            cache: self.cache.clone(),
            flush_on_commit: self.flush_on_commit,
            staged: BTreeMap::new(),
            undo: Vec::new(),
        })
    }

    fn clear_scoped_cache(&self) {
        let mut cache = self.cache.write().unwrap_or_else(PoisonError::into_inner);
        debug!(records = cache.len(), "clearing record cache");
        cache.clear();
    }
}

/// Staged writes against a [`SledStore`].
///
/// Reads see the transaction's own writes first. Nothing reaches the tree until
/// [`Transaction::commit`]; dropping the transaction discards it.
pub struct SledTransaction {
    engine: Db,
    records: Tree,
    cache: RecordCache,
    flush_on_commit: bool,
    /// `None` marks a removal.
    staged: BTreeMap<Vec<u8>, Option<Vec<u8>>>,
    /// Previous staged state of each write, newest last.
    undo: Vec<(Vec<u8>, Option<Option<Vec<u8>>>)>,
}

impl SledTransaction {
    fn stage(&mut self, key: Vec<u8>, value: Option<Vec<u8>>) {
        let previous = self.staged.insert(key.clone(), value);
        self.undo.push((key, previous));
    }

    /// Raw read through the staged writes.
    fn read(&self, key: &[u8]) -> DbResult<Option<Vec<u8>>> {
        match self.staged.get(key) {
            Some(staged) => Ok(staged.clone()),
            None => Ok(self.records.get(key)?.map(|bytes| bytes.to_vec())),
        }
    }

    fn read_payload(&self, key: &[u8]) -> DbResult<Option<Payload>> {
        if let Some(staged) = self.staged.get(key) {
            return staged.as_deref().map(|bytes| decode(bytes)).transpose();
        }

        if let Some(cached) = self
            .cache
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
        {
            return Ok(Some(cached.clone()));
        }

        match self.records.get(key)? {
            Some(bytes) => {
                let payload: Payload = decode(&bytes)?;
                self.cache
                    .write()
                    .unwrap_or_else(PoisonError::into_inner)
                    .insert(key.to_vec(), payload.clone());
                Ok(Some(payload))
            }
            None => Ok(None),
        }
    }

    /// Primary key that owns `value` in a unique field.
    fn index_owner(&self, table: &str, field: &str, value: &Value) -> DbResult<Option<Value>> {
        self.read(&index_key(table, field, value)?)?
            .map(|bytes| decode(&bytes))
            .transpose()
    }

    /// Generated id not yet used as a key of `table`, staged or committed.
    fn fresh_key(&self, table: &str) -> DbResult<Value> {
        loop {
            let key = Value::Int(self.engine.generate_id()? as i64);
            if self.read(&record_key(table, &key)?)?.is_none() {
                return Ok(key);
            }
        }
    }

    fn record(&self, entity_type: &EntityType, key: &Value) -> DbResult<Option<Record>> {
        Ok(self
            .read_payload(&record_key(entity_type.name(), key)?)?
            .map(|data| Record {
                entity_type: entity_type.clone(),
                key: key.clone(),
                data,
            }))
    }
}

impl Transaction for SledTransaction {
    fn add(&mut self, entity_type: &EntityType, payload: &Payload) -> DbResult<Value> {
        entity_type.check_fields(payload)?;
        let table = entity_type.name();

        let mut data = payload.clone();
        let key = match entity_type.key_of(payload) {
            Some(key) => key.clone(),
            None => {
                let key = self.fresh_key(table)?;
                data.set(entity_type.primary_key(), key.clone());
                key
            }
        };

        let key_bytes = record_key(table, &key)?;
        if self.read(&key_bytes)?.is_some() {
            return Err(TinyBatchError::Exists {
                table: table.to_owned(),
                key,
            });
        }

        let mut index_entries = vec![];
        for field in entity_type.unique_fields() {
            if let Some(value) = data.get(field).filter(|v| !v.is_null()) {
                if self.index_owner(table, field, value)?.is_some() {
                    return Err(TinyBatchError::Exists {
                        table: table.to_owned(),
                        key: value.clone(),
                    });
                }
                index_entries.push(index_key(table, field, value)?);
            }
        }

        let encoded_key = encode(&key)?;
        for entry in index_entries {
            self.stage(entry, Some(encoded_key.clone()));
        }
        self.stage(key_bytes, Some(encode(&data)?));

        Ok(key)
    }

    fn fetch_by_key(&mut self, entity_type: &EntityType, key: &Value) -> DbResult<Option<Record>> {
        self.record(entity_type, key)
    }

    fn find_unique(
        &mut self,
        entity_type: &EntityType,
        field: &str,
        value: &Value,
    ) -> DbResult<Option<Record>> {
        if !entity_type.unique_fields().iter().any(|f| f == field) {
            return Err(TinyBatchError::NotIndexed {
                table: entity_type.name().to_owned(),
                field: field.to_owned(),
            });
        }

        match self.index_owner(entity_type.name(), field, value)? {
            Some(key) => self.record(entity_type, &key),
            None => Ok(None),
        }
    }

    fn save(&mut self, record: &Record) -> DbResult<()> {
        let entity_type = &record.entity_type;
        let table = entity_type.name();
        entity_type.check_fields(&record.data)?;

        if entity_type
            .key_of(&record.data)
            .map_or(false, |key| key != &record.key)
        {
            return Err(TinyBatchError::ImmutableKey {
                table: table.to_owned(),
            });
        }

        let key_bytes = record_key(table, &record.key)?;
        let previous = self
            .read_payload(&key_bytes)?
            .ok_or_else(|| TinyBatchError::NotFound {
                table: table.to_owned(),
                key: record.key.clone(),
            })?;

        let mut moves = vec![];
        for field in entity_type.unique_fields() {
            let old = previous.get(field).filter(|v| !v.is_null());
            let new = record.data.get(field).filter(|v| !v.is_null());
            if old == new {
                continue;
            }

            if let Some(new) = new {
                if let Some(owner) = self.index_owner(table, field, new)? {
                    if owner != record.key {
                        return Err(TinyBatchError::Exists {
                            table: table.to_owned(),
                            key: new.clone(),
                        });
                    }
                }
            }

            moves.push((field, old.cloned(), new.cloned()));
        }

        let encoded_key = encode(&record.key)?;
        for (field, old, new) in moves {
            if let Some(old) = old {
                self.stage(index_key(table, field, &old)?, None);
            }
            if let Some(new) = new {
                self.stage(index_key(table, field, &new)?, Some(encoded_key.clone()));
            }
        }

        let mut data = record.data.clone();
        if entity_type.key_of(&data).is_none() {
            data.set(entity_type.primary_key(), record.key.clone());
        }
        self.stage(key_bytes, Some(encode(&data)?));

        Ok(())
    }

    fn remove(&mut self, record: &Record) -> DbResult<()> {
        let entity_type = &record.entity_type;
        let table = entity_type.name();

        let key_bytes = record_key(table, &record.key)?;
        let stored = self
            .read_payload(&key_bytes)?
            .ok_or_else(|| TinyBatchError::NotFound {
                table: table.to_owned(),
                key: record.key.clone(),
            })?;

        for field in entity_type.unique_fields() {
            if let Some(value) = stored.get(field).filter(|v| !v.is_null()) {
                if self.index_owner(table, field, value)?.as_ref() == Some(&record.key) {
                    self.stage(index_key(table, field, value)?, None);
                }
            }
        }
        self.stage(key_bytes, None);

        Ok(())
    }

    fn savepoint(&mut self) -> Savepoint {
        Savepoint::new(self.undo.len())
    }

    fn rollback_to(&mut self, savepoint: Savepoint) {
        while self.undo.len() > savepoint.position() {
            let Some((key, previous)) = self.undo.pop() else {
                break;
            };
            match previous {
                Some(value) => {
                    self.staged.insert(key, value);
                }
                None => {
                    self.staged.remove(&key);
                }
            }
        }
    }

    fn commit(mut self) -> DbResult<()> {
        let staged = std::mem::take(&mut self.staged);
        self.undo.clear();
        if staged.is_empty() {
            return Ok(());
        }

        let writes = staged.len();
        let mut batch = Batch::default();
        for (key, value) in &staged {
            match value {
                Some(value) => batch.insert(key.as_slice(), value.as_slice()),
                None => batch.remove(key.as_slice()),
            }
        }

        self.records.apply_batch(batch)?;

        {
            let mut cache = self.cache.write().unwrap_or_else(PoisonError::into_inner);
            for key in staged.keys() {
                cache.remove(key);
            }
        }
        debug!(writes, "committed transaction");

        // The batch is applied at this point, a failed flush does not undo it.
        if self.flush_on_commit {
            if let Err(e) = self.records.flush() {
                warn!(writes, error = %e, "flush after commit failed");
            }
        }

        Ok(())
    }
}

impl Drop for SledTransaction {
    fn drop(&mut self) {
        if !self.staged.is_empty() {
            debug!(writes = self.staged.len(), "rolled back transaction");
        }
    }
}

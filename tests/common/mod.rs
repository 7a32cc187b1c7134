#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tinybatch::{
    DbResult, EntityType, Payload, Record, Savepoint, SledStore, SledTransaction, TinyBatchError,
    Transaction, TransactionalStore, Value,
};

/// Wraps a temporary [`SledStore`], logging every call and allowing failures to be injected.
#[derive(Clone)]
pub struct RecordingStore {
    inner: SledStore,
    log: Arc<Mutex<Vec<String>>>,
    fail_commit: Arc<AtomicBool>,
    fail_open: Arc<AtomicBool>,
    scopes: Arc<AtomicUsize>,
    cache_clears: Arc<AtomicUsize>,
}

impl RecordingStore {
    pub fn new() -> Self {
        Self {
            inner: SledStore::temporary().unwrap(),
            log: Arc::new(Mutex::new(Vec::new())),
            fail_commit: Arc::new(AtomicBool::new(false)),
            fail_open: Arc::new(AtomicBool::new(false)),
            scopes: Arc::new(AtomicUsize::new(0)),
            cache_clears: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn inner(&self) -> &SledStore {
        &self.inner
    }

    /// Every call made so far, e.g. `add players:1` or `commit`.
    pub fn calls(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }

    /// Calls starting with `prefix`.
    pub fn calls_of(&self, prefix: &str) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|call| call.starts_with(prefix))
            .collect()
    }

    pub fn clear_log(&self) {
        self.log.lock().unwrap().clear();
    }

    pub fn fail_commits(&self, fail: bool) {
        self.fail_commit.store(fail, Ordering::SeqCst);
    }

    pub fn fail_opens(&self, fail: bool) {
        self.fail_open.store(fail, Ordering::SeqCst);
    }

    pub fn scopes_opened(&self) -> usize {
        self.scopes.load(Ordering::SeqCst)
    }

    pub fn cache_clears(&self) -> usize {
        self.cache_clears.load(Ordering::SeqCst)
    }

    fn push(&self, call: String) {
        self.log.lock().unwrap().push(call);
    }
}

impl TransactionalStore for RecordingStore {
    type Transaction = RecordingTransaction;

    fn open_scope(&self) -> DbResult<RecordingTransaction> {
        self.scopes.fetch_add(1, Ordering::SeqCst);
        if self.fail_open.load(Ordering::SeqCst) {
            self.push("open failed".to_owned());
            return Err(TinyBatchError::custom("store unavailable"));
        }

        self.push("open".to_owned());
        Ok(RecordingTransaction {
            inner: self.inner.open_scope()?,
            store: self.clone(),
        })
    }

    fn clear_scoped_cache(&self) {
        self.cache_clears.fetch_add(1, Ordering::SeqCst);
        self.inner.clear_scoped_cache();
    }
}

pub struct RecordingTransaction {
    inner: SledTransaction,
    store: RecordingStore,
}

fn describe(entity_type: &EntityType, key: Option<&Value>) -> String {
    match key {
        Some(Value::Text(text)) => format!("{}:{}", entity_type.name(), text),
        Some(key) => format!("{}:{}", entity_type.name(), key),
        None => format!("{}:?", entity_type.name()),
    }
}

impl Transaction for RecordingTransaction {
    fn add(&mut self, entity_type: &EntityType, payload: &Payload) -> DbResult<Value> {
        self.store
            .push(format!("add {}", describe(entity_type, entity_type.key_of(payload))));
        self.inner.add(entity_type, payload)
    }

    fn fetch_by_key(&mut self, entity_type: &EntityType, key: &Value) -> DbResult<Option<Record>> {
        self.store
            .push(format!("fetch {}", describe(entity_type, Some(key))));
        self.inner.fetch_by_key(entity_type, key)
    }

    fn find_unique(
        &mut self,
        entity_type: &EntityType,
        field: &str,
        value: &Value,
    ) -> DbResult<Option<Record>> {
        self.store
            .push(format!("find {}.{}", entity_type.name(), field));
        self.inner.find_unique(entity_type, field, value)
    }

    fn save(&mut self, record: &Record) -> DbResult<()> {
        self.store
            .push(format!("save {}", describe(&record.entity_type, Some(&record.key))));
        self.inner.save(record)
    }

    fn remove(&mut self, record: &Record) -> DbResult<()> {
        self.store
            .push(format!("remove {}", describe(&record.entity_type, Some(&record.key))));
        self.inner.remove(record)
    }

    fn savepoint(&mut self) -> Savepoint {
        self.inner.savepoint()
    }

    fn rollback_to(&mut self, savepoint: Savepoint) {
        self.inner.rollback_to(savepoint)
    }

    fn commit(self) -> DbResult<()> {
        if self.store.fail_commit.load(Ordering::SeqCst) {
            self.store.push("commit failed".to_owned());
            return Err(TinyBatchError::custom("connection lost"));
        }

        self.store.push("commit".to_owned());
        self.inner.commit()
    }
}

pub fn tournaments() -> EntityType {
    EntityType::new("tournaments", "id")
        .field("name")
        .field("num_attendees")
}

pub fn organizations() -> EntityType {
    EntityType::new("organizations", "id")
        .unique("normalized_key")
        .field("display_name")
}

pub fn tournament(id: &str) -> Payload {
    Payload::new()
        .with("id", id)
        .with("name", format!("Tournament {id}"))
        .with("num_attendees", 64)
}

//! Transactional store boundary.
//!
//! The queue only talks to storage through [`TransactionalStore`] and
//! [`Transaction`]. [`SledStore`] is the implementation shipped with the crate.

use crate::entity::EntityType;
use crate::record::Record;
use crate::result::DbResult;
use crate::value::{Payload, Value};

mod sled;
pub use self::sled::{SledStore, SledTransaction};

/// Position inside a transaction that can be rolled back to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Savepoint(usize);

impl Savepoint {
    /// Build a savepoint from a store-specific position.
    pub fn new(position: usize) -> Self {
        Self(position)
    }

    pub fn position(&self) -> usize {
        self.0
    }
}

/// A store that can open scoped transactions.
pub trait TransactionalStore {
    type Transaction: Transaction;

    /// Open a new transaction. Dropping it without [`Transaction::commit`] rolls it back.
    fn open_scope(&self) -> DbResult<Self::Transaction>;

    /// Release any per-scope caches held by the store.
    fn clear_scoped_cache(&self);
}

/// An open transaction.
///
/// Everything except [`Transaction::commit`] is object safe, so custom commands
/// receive a `&mut dyn Transaction`.
pub trait Transaction {
    /// Insert a new record and return its primary key.
    ///
    /// The key is taken from the payload's primary key field, or generated when absent.
    fn add(&mut self, entity_type: &EntityType, payload: &Payload) -> DbResult<Value>;

    /// Fetch a record by primary key.
    fn fetch_by_key(&mut self, entity_type: &EntityType, key: &Value) -> DbResult<Option<Record>>;

    /// Fetch a record through one of its unique fields.
    fn find_unique(
        &mut self,
        entity_type: &EntityType,
        field: &str,
        value: &Value,
    ) -> DbResult<Option<Record>>;

    /// Persist a fetched record after its fields were changed.
    fn save(&mut self, record: &Record) -> DbResult<()>;

    /// Remove a fetched record.
    fn remove(&mut self, record: &Record) -> DbResult<()>;

    fn savepoint(&mut self) -> Savepoint;

    /// Discard every change made after `savepoint`.
    fn rollback_to(&mut self, savepoint: Savepoint);

    /// Make every staged change durable.
    fn commit(self) -> DbResult<()>
    where
        Self: Sized;
}

impl<S: TransactionalStore + ?Sized> TransactionalStore for &S {
    type Transaction = S::Transaction;

    fn open_scope(&self) -> DbResult<Self::Transaction> {
        (**self).open_scope()
    }

    fn clear_scoped_cache(&self) {
        (**self).clear_scoped_cache()
    }
}

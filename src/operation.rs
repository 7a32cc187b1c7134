use std::fmt;
use std::sync::Arc;

use crate::entity::EntityType;
use crate::record::Record;
use crate::result::{DbResult, TinyBatchError};
use crate::store::Transaction;
use crate::value::{Payload, Value};

/// Modifying operation applied to a table.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum OperationKind {
    Create,
    Update,
    Delete,
    Custom,
}

impl OperationKind {
    /// Execution class inside a page. Lower runs first.
    pub fn priority(self) -> u8 {
        match self {
            OperationKind::Delete => 0,
            OperationKind::Update | OperationKind::Custom => 1,
            OperationKind::Create => 2,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            OperationKind::Create => "create",
            OperationKind::Update => "update",
            OperationKind::Delete => "delete",
            OperationKind::Custom => "custom",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Command run by a custom operation.
///
/// Used when one logical write touches several tables. The command runs inside
/// the page transaction and must not open one of its own.
pub trait CustomOperation: Send + Sync {
    fn execute(&self, tx: &mut dyn Transaction, payload: &Payload) -> DbResult<()>;

    /// Name used in logs and error records.
    fn name(&self) -> &str {
        "custom"
    }
}

impl<F> CustomOperation for F
where
    F: Fn(&mut dyn Transaction, &Payload) -> DbResult<()> + Send + Sync,
{
    fn execute(&self, tx: &mut dyn Transaction, payload: &Payload) -> DbResult<()> {
        self(tx, payload)
    }
}

/// Update a record when it exists, create it otherwise.
#[derive(Debug, Clone)]
pub struct Upsert {
    entity_type: EntityType,
}

impl Upsert {
    pub fn new(entity_type: &EntityType) -> Self {
        Self {
            entity_type: entity_type.clone(),
        }
    }
}

impl CustomOperation for Upsert {
    fn execute(&self, tx: &mut dyn Transaction, payload: &Payload) -> DbResult<()> {
        let existing = match self.entity_type.key_of(payload) {
            Some(key) => tx.fetch_by_key(&self.entity_type, key)?,
            None => None,
        };

        match existing {
            Some(mut record) => {
                record.data.merge(payload);
                tx.save(&record)
            }
            None => tx.add(&self.entity_type, payload).map(|_| ()),
        }
    }

    fn name(&self) -> &str {
        self.entity_type.name()
    }
}

/// One pending mutation. Never changed after construction.
#[derive(Clone)]
pub struct QueuedOperation {
    kind: OperationKind,
    entity_type: Option<EntityType>,
    payload: Payload,
    key: Option<Value>,
    callback: Option<Arc<dyn CustomOperation>>,
}

impl QueuedOperation {
    pub fn create(entity_type: &EntityType, payload: Payload) -> Self {
        Self {
            kind: OperationKind::Create,
            entity_type: Some(entity_type.clone()),
            payload,
            key: None,
            callback: None,
        }
    }

    pub fn update(entity_type: &EntityType, key: impl Into<Value>, payload: Payload) -> Self {
        Self {
            kind: OperationKind::Update,
            entity_type: Some(entity_type.clone()),
            payload,
            key: Some(key.into()),
            callback: None,
        }
    }

    pub fn delete(entity_type: &EntityType, key: impl Into<Value>) -> Self {
        Self {
            kind: OperationKind::Delete,
            entity_type: Some(entity_type.clone()),
            payload: Payload::new(),
            key: Some(key.into()),
            callback: None,
        }
    }

    pub fn custom(callback: impl CustomOperation + 'static, payload: Payload) -> Self {
        Self {
            kind: OperationKind::Custom,
            entity_type: None,
            payload,
            key: None,
            callback: Some(Arc::new(callback)),
        }
    }

    pub fn kind(&self) -> OperationKind {
        self.kind
    }

    pub fn priority(&self) -> u8 {
        self.kind.priority()
    }

    pub fn entity_type(&self) -> Option<&EntityType> {
        self.entity_type.as_ref()
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    pub fn key(&self) -> Option<&Value> {
        self.key.as_ref()
    }

    /// Table name, or the command name for custom operations.
    pub fn target(&self) -> &str {
        match (&self.entity_type, &self.callback) {
            (Some(entity_type), _) => entity_type.name(),
            (None, Some(callback)) => callback.name(),
            (None, None) => "custom",
        }
    }

    /// Run the operation against an open transaction.
    pub(crate) fn execute(&self, tx: &mut dyn Transaction) -> DbResult<()> {
        match self.kind {
            OperationKind::Create => {
                tx.add(self.require_entity_type()?, &self.payload)?;
            }
            OperationKind::Update => {
                let mut record = self.fetch(tx)?;
                record.data.merge(&self.payload);
                tx.save(&record)?;
            }
            OperationKind::Delete => {
                let record = self.fetch(tx)?;
                tx.remove(&record)?;
            }
            OperationKind::Custom => match &self.callback {
                Some(callback) => callback.execute(tx, &self.payload)?,
                None => return Err(TinyBatchError::custom("custom operation requires callback")),
            },
        }

        Ok(())
    }

    fn require_entity_type(&self) -> DbResult<&EntityType> {
        self.entity_type.as_ref().ok_or_else(|| {
            TinyBatchError::custom(format!("{} operation requires an entity type", self.kind))
        })
    }

    fn fetch(&self, tx: &mut dyn Transaction) -> DbResult<Record> {
        let entity_type = self.require_entity_type()?;
        let key = self.key.clone().unwrap_or(Value::Null);

        tx.fetch_by_key(entity_type, &key)?
            .ok_or_else(|| TinyBatchError::NotFound {
                table: entity_type.name().to_owned(),
                key,
            })
    }
}

impl fmt::Debug for QueuedOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueuedOperation")
            .field("kind", &self.kind)
            .field("target", &self.target())
            .field("key", &self.key)
            .field("payload", &self.payload)
            .finish()
    }
}

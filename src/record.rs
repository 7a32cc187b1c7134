use crate::entity::EntityType;
use crate::value::{Payload, Value};

/// A single record in a table, as fetched from or attached to a transaction.
#[derive(Debug, Clone)]
pub struct Record {
    pub entity_type: EntityType,
    /// Primary key of the record.
    pub key: Value,
    pub data: Payload,
}

impl Record {
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.data.get(field)
    }

    pub fn set(&mut self, field: &str, value: impl Into<Value>) {
        self.data.set(field, value);
    }
}

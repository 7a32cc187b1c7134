use std::ops::Deref;
use std::sync::Arc;

use crate::result::{DbResult, TinyBatchError};
use crate::value::{Payload, Value};

/// Describes a target table: its name, primary key field and declared fields.
///
/// The queue never looks inside an `EntityType`; it is handed through to the store,
/// which uses it to validate payloads and maintain unique fields.
///
/// # Example
///
/// ```
/// use tinybatch::EntityType;
///
/// let players = EntityType::new("players", "id")
///     .field("startgg_id")
///     .field("gamer_tag")
///     .unique("startgg_id");
///
/// assert!(players.has_field("gamer_tag"));
/// ```
#[derive(Debug, Clone)]
pub struct EntityType(Arc<EntityTypeInner>);

impl Deref for EntityType {
    type Target = EntityTypeInner;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

#[derive(Debug, Clone)]
pub struct EntityTypeInner {
    name: String,
    primary_key: String,
    fields: Vec<String>,
    unique: Vec<String>,
}

impl EntityType {
    /// Create a descriptor for table `name` keyed by `primary_key`.
    pub fn new(name: &str, primary_key: &str) -> Self {
        Self(Arc::new(EntityTypeInner {
            name: name.to_owned(),
            primary_key: primary_key.to_owned(),
            fields: vec![primary_key.to_owned()],
            unique: Vec::new(),
        }))
    }

    /// Declare a field.
    pub fn field(mut self, name: &str) -> Self {
        let inner = Arc::make_mut(&mut self.0);
        if !inner.fields.iter().any(|f| f == name) {
            inner.fields.push(name.to_owned());
        }
        self
    }

    /// Declare a field whose values must be unique across the table.
    pub fn unique(self, name: &str) -> Self {
        let mut this = self.field(name);
        let inner = Arc::make_mut(&mut this.0);
        if !inner.unique.iter().any(|f| f == name) {
            inner.unique.push(name.to_owned());
        }
        this
    }
}

impl EntityTypeInner {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn primary_key(&self) -> &str {
        &self.primary_key
    }

    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    pub fn unique_fields(&self) -> &[String] {
        &self.unique
    }

    pub fn has_field(&self, name: &str) -> bool {
        self.fields.iter().any(|f| f == name)
    }

    /// Primary key carried by `payload`, if any.
    pub fn key_of<'a>(&self, payload: &'a Payload) -> Option<&'a Value> {
        payload.get(&self.primary_key).filter(|v| !v.is_null())
    }

    /// Reject payload fields that were not declared.
    pub(crate) fn check_fields(&self, payload: &Payload) -> DbResult<()> {
        match payload.fields().find(|field| !self.has_field(field)) {
            Some(field) => Err(TinyBatchError::UnknownField {
                table: self.name.clone(),
                field: field.to_owned(),
            }),
            None => Ok(()),
        }
    }
}

impl PartialEq for EntityType {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0) || self.name == other.name
    }
}

use bincode::Options;

use crate::value::Value;
use crate::DbResult;

const RECORD_TAG: u8 = 0;
const INDEX_TAG: u8 = 1;

pub(crate) fn encode<S: ?Sized + serde::Serialize>(item: &S) -> DbResult<Vec<u8>> {
    Ok(bincode::DefaultOptions::new()
        .with_big_endian()
        .with_fixint_encoding()
        .allow_trailing_bytes()
        .serialize(&item)?)
}

pub(crate) fn decode<'a, T: serde::Deserialize<'a>>(bytes: &'a [u8]) -> DbResult<T> {
    Ok(bincode::DefaultOptions::new()
        .with_big_endian()
        .with_fixint_encoding()
        .allow_trailing_bytes()
        .deserialize(bytes)?)
}

/// Tree key of a record: `(tag, table, primary key)`.
pub(crate) fn record_key(table: &str, key: &Value) -> DbResult<Vec<u8>> {
    encode(&(RECORD_TAG, table, key))
}

/// Prefix shared by every record key of `table`.
pub(crate) fn table_prefix(table: &str) -> DbResult<Vec<u8>> {
    encode(&(RECORD_TAG, table))
}

/// Tree key of a unique index entry: `(tag, table, field, value)`.
pub(crate) fn index_key(table: &str, field: &str, value: &Value) -> DbResult<Vec<u8>> {
    encode(&(INDEX_TAG, table, field, value))
}

//! Row key and column name layouts.
//!
//! Row keys nest a scope prefix before the sub-key; the collection-prefixed
//! variant further nests a collection name for formats that keep collections
//! physically separate. Version columns encode the uuid's gregorian
//! timestamp first and byte-invert the result, so ascending byte order in
//! the store is newest-first, matching the reversed comparator the entity
//! and log column families are created with.

use crate::codec::composite::{CompositeBuilder, CompositeParser};
use crate::codec::EncodedKey;
use crate::error::EvdbError;
use crate::model::{uuid_timestamp, Field, Id, Scope};
use crate::mvcc::EntityVersion;
use uuid::Uuid;

/// Collection name for an entity type ("user" lives in "users").
pub fn collection_name(entity_type: &str) -> String {
    if entity_type.ends_with('s') {
        entity_type.to_string()
    } else {
        format!("{entity_type}s")
    }
}

pub fn scoped_row_key(scope: &Scope, id: &Id) -> EncodedKey {
    let mut builder = CompositeBuilder::new();
    builder.push_id(&scope.owner).push_str(&scope.name).push_id(id);
    builder.finish()
}

pub fn decode_scoped_row_key(bytes: &[u8]) -> Result<(Scope, Id), EvdbError> {
    let mut parser = CompositeParser::new(bytes);
    let owner = parser.read_id()?;
    let name = parser.read_str()?;
    let id = parser.read_id()?;
    Ok((Scope::new(owner, name), id))
}

pub fn collection_row_key(scope: &Scope, collection: &str, id: &Id) -> EncodedKey {
    let mut builder = CompositeBuilder::new();
    builder
        .push_id(&scope.owner)
        .push_str(&scope.name)
        .push_str(collection)
        .push_id(id);
    builder.finish()
}

pub fn decode_collection_row_key(bytes: &[u8]) -> Result<(Scope, String, Id), EvdbError> {
    let mut parser = CompositeParser::new(bytes);
    let owner = parser.read_id()?;
    let name = parser.read_str()?;
    let collection = parser.read_str()?;
    let id = parser.read_id()?;
    Ok((Scope::new(owner, name), collection, id))
}

/// Scope-only prefix, for range scans confined to one tenant.
pub fn scope_prefix(scope: &Scope) -> EncodedKey {
    let mut builder = CompositeBuilder::new();
    builder.push_id(&scope.owner).push_str(&scope.name);
    builder.finish()
}

/// Unique value partition key, V1 layout: the collection name sits between
/// the scope and the field so each collection owns its claims physically.
pub fn unique_value_row_key_v1(scope: &Scope, entity_type: &str, field: &Field) -> EncodedKey {
    let mut builder = CompositeBuilder::new();
    builder
        .push_id(&scope.owner)
        .push_str(&scope.name)
        .push_str(&collection_name(entity_type))
        .push_field(field);
    builder.finish()
}

/// Unique value partition key, V2 layout: raw entity type, no collection
/// pluralization.
pub fn unique_value_row_key_v2(scope: &Scope, entity_type: &str, field: &Field) -> EncodedKey {
    let mut builder = CompositeBuilder::new();
    builder
        .push_id(&scope.owner)
        .push_str(&scope.name)
        .push_str(entity_type)
        .push_field(field);
    builder.finish()
}

/// Row key of the reverse-lookup log listing every value an entity holds.
pub fn unique_log_row_key(scope: &Scope, id: &Id) -> EncodedKey {
    scoped_row_key(scope, id)
}

const VERSION_COLUMN_LEN: usize = 24;

/// Encodes a version uuid for the descending comparator: 60-bit timestamp
/// big-endian, then the raw uuid bytes, all inverted. Ascending byte order
/// over these columns is reverse-chronological.
pub fn encode_version_desc(version: &Uuid) -> Vec<u8> {
    let mut out = Vec::with_capacity(VERSION_COLUMN_LEN);
    out.extend_from_slice(&uuid_timestamp(version).to_be_bytes());
    out.extend_from_slice(version.as_bytes());
    for byte in &mut out {
        *byte = !*byte;
    }
    out
}

pub fn decode_version_desc(bytes: &[u8]) -> Result<Uuid, EvdbError> {
    if bytes.len() != VERSION_COLUMN_LEN {
        return Err(EvdbError::DataCorruption(format!(
            "version column must be {VERSION_COLUMN_LEN} bytes, found {}",
            bytes.len()
        )));
    }
    let mut restored = [0u8; VERSION_COLUMN_LEN];
    for (i, byte) in bytes.iter().enumerate() {
        restored[i] = !byte;
    }
    let mut uuid_bytes = [0u8; 16];
    uuid_bytes.copy_from_slice(&restored[8..]);
    let version = Uuid::from_bytes(uuid_bytes);
    let ts = u64::from_be_bytes(restored[..8].try_into().map_err(|_| {
        EvdbError::DataCorruption("version column timestamp prefix unreadable".into())
    })?);
    if ts != uuid_timestamp(&version) {
        return Err(EvdbError::DataCorruption(
            "version column timestamp prefix disagrees with uuid".into(),
        ));
    }
    Ok(version)
}

/// Unique value claim column: version timestamp first (not inverted), so the
/// oldest claim is the first column returned and deterministically wins a
/// race between concurrent writers.
pub fn encode_entity_version_column(ev: &EntityVersion) -> Vec<u8> {
    let mut out = Vec::with_capacity(64);
    out.extend_from_slice(&uuid_timestamp(&ev.version).to_be_bytes());
    let mut builder = CompositeBuilder::new();
    builder.push_uuid(&ev.version).push_id(&ev.entity_id);
    out.extend_from_slice(builder.finish().as_slice());
    out
}

pub fn decode_entity_version_column(bytes: &[u8]) -> Result<EntityVersion, EvdbError> {
    let rest = bytes.get(8..).ok_or_else(|| {
        EvdbError::DataCorruption("unique value column shorter than its timestamp prefix".into())
    })?;
    let mut parser = CompositeParser::new(rest);
    let version = parser.read_uuid()?;
    let entity_id = parser.read_id()?;
    Ok(EntityVersion::new(entity_id, version))
}

/// Reverse-log column: `(version, field)`, version descending so the newest
/// claims of an entity list first.
pub fn encode_unique_log_column(version: &Uuid, field: &Field) -> Vec<u8> {
    let mut out = encode_version_desc(version);
    let mut builder = CompositeBuilder::new();
    builder.push_field(field);
    out.extend_from_slice(builder.finish().as_slice());
    out
}

pub fn decode_unique_log_column(bytes: &[u8]) -> Result<(Uuid, Field), EvdbError> {
    let (version_bytes, rest) = bytes.split_at_checked(VERSION_COLUMN_LEN).ok_or_else(|| {
        EvdbError::DataCorruption("unique log column shorter than its version prefix".into())
    })?;
    let version = decode_version_desc(version_bytes)?;
    let mut parser = CompositeParser::new(rest);
    let field = parser.read_field()?;
    Ok((version, field))
}

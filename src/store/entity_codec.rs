//! On-disk formats for entity version columns.
//!
//! Every format writes the same column shape: a format byte, a status byte,
//! and (for non-deleted versions) a serialized payload. Formats differ in
//! row key layout and payload serialization, and each one owns a distinct
//! column family so formats never mix inside a row.

use crate::backend::{cf, ColumnFamily};
use crate::codec::row_key::{collection_name, collection_row_key, scoped_row_key};
use crate::codec::EncodedKey;
use crate::error::EvdbError;
use crate::model::{Entity, Id, Scope};
use crate::mvcc::Status;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum FormatVersion {
    V1,
    V2,
    V3,
}

impl FormatVersion {
    pub fn as_u16(self) -> u16 {
        match self {
            FormatVersion::V1 => 1,
            FormatVersion::V2 => 2,
            FormatVersion::V3 => 3,
        }
    }

    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            1 => Some(FormatVersion::V1),
            2 => Some(FormatVersion::V2),
            3 => Some(FormatVersion::V3),
            _ => None,
        }
    }

    fn format_byte(self) -> u8 {
        self.as_u16() as u8
    }
}

impl std::fmt::Display for FormatVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "v{}", self.as_u16())
    }
}

/// Encodes and decodes one entity format. The entity store is generic over
/// this seam; adding a format means adding a codec, not a store.
pub trait EntityCodec: Send + Sync {
    fn format(&self) -> FormatVersion;

    fn column_family(&self) -> ColumnFamily;

    fn row_key(&self, scope: &Scope, id: &Id) -> EncodedKey;

    /// Serializes a `(status, payload)` pair into a column value. Fails with
    /// `EntityTooLarge` before anything reaches the store.
    fn encode(&self, status: Status, entity: Option<&Entity>) -> Result<Vec<u8>, EvdbError>;

    /// Inverse of [`EntityCodec::encode`]. Corruption is reported, never
    /// papered over; the caller decides how to degrade.
    fn decode(&self, bytes: &[u8]) -> Result<(Status, Option<Entity>), EvdbError>;
}

#[derive(Debug, Clone, Copy)]
enum PayloadEncoding {
    Json,
    MsgPack,
}

/// The three shipped formats, one constructor each. V1 and V2 keep the
/// legacy collection-prefixed row key; V3 drops the collection component so
/// one scope's entities share a contiguous key range.
pub struct VersionedEntityCodec {
    format: FormatVersion,
    cf: ColumnFamily,
    collection_prefixed: bool,
    encoding: PayloadEncoding,
    max_entity_size: usize,
}

impl VersionedEntityCodec {
    pub fn v1(max_entity_size: usize) -> Self {
        Self {
            format: FormatVersion::V1,
            cf: cf::ENTITY_VERSION_DATA,
            collection_prefixed: true,
            encoding: PayloadEncoding::Json,
            max_entity_size,
        }
    }

    pub fn v2(max_entity_size: usize) -> Self {
        Self {
            format: FormatVersion::V2,
            cf: cf::ENTITY_VERSION_DATA_V2,
            collection_prefixed: true,
            encoding: PayloadEncoding::MsgPack,
            max_entity_size,
        }
    }

    pub fn v3(max_entity_size: usize) -> Self {
        Self {
            format: FormatVersion::V3,
            cf: cf::ENTITY_VERSION_DATA_V3,
            collection_prefixed: false,
            encoding: PayloadEncoding::MsgPack,
            max_entity_size,
        }
    }

    fn encode_payload(&self, entity: &Entity) -> Result<Vec<u8>, EvdbError> {
        match self.encoding {
            PayloadEncoding::Json => serde_json::to_vec(entity)
                .map_err(|e| EvdbError::Encode(format!("entity payload: {e}"))),
            PayloadEncoding::MsgPack => rmp_serde::to_vec_named(entity)
                .map_err(|e| EvdbError::Encode(format!("entity payload: {e}"))),
        }
    }

    fn decode_payload(&self, bytes: &[u8]) -> Result<Entity, EvdbError> {
        match self.encoding {
            PayloadEncoding::Json => serde_json::from_slice(bytes)
                .map_err(|e| EvdbError::DataCorruption(format!("entity payload: {e}"))),
            PayloadEncoding::MsgPack => rmp_serde::from_slice(bytes)
                .map_err(|e| EvdbError::DataCorruption(format!("entity payload: {e}"))),
        }
    }
}

impl EntityCodec for VersionedEntityCodec {
    fn format(&self) -> FormatVersion {
        self.format
    }

    fn column_family(&self) -> ColumnFamily {
        self.cf
    }

    fn row_key(&self, scope: &Scope, id: &Id) -> EncodedKey {
        if self.collection_prefixed {
            collection_row_key(scope, &collection_name(&id.entity_type), id)
        } else {
            scoped_row_key(scope, id)
        }
    }

    fn encode(&self, status: Status, entity: Option<&Entity>) -> Result<Vec<u8>, EvdbError> {
        let mut out = vec![self.format.format_byte(), status.to_byte()];
        // Deleted versions are tombstones; any payload handed in is dropped.
        if status != Status::Deleted {
            if let Some(entity) = entity {
                let payload = self.encode_payload(entity)?;
                if payload.len() > self.max_entity_size {
                    return Err(EvdbError::EntityTooLarge {
                        max: self.max_entity_size,
                        actual: payload.len(),
                    });
                }
                out.extend_from_slice(&payload);
            }
        }
        Ok(out)
    }

    fn decode(&self, bytes: &[u8]) -> Result<(Status, Option<Entity>), EvdbError> {
        let [format_byte, status_byte, payload @ ..] = bytes else {
            return Err(EvdbError::DataCorruption(
                "entity column shorter than its two-byte header".into(),
            ));
        };
        if *format_byte != self.format.format_byte() {
            return Err(EvdbError::DataCorruption(format!(
                "entity column format byte {format_byte} does not match {}",
                self.format
            )));
        }
        let status = Status::from_byte(*status_byte).ok_or_else(|| {
            EvdbError::DataCorruption(format!("unrecognized entity status byte {status_byte}"))
        })?;
        if payload.is_empty() {
            return Ok((status, None));
        }
        Ok((status, Some(self.decode_payload(payload)?)))
    }
}

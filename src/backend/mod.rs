//! The wide-column substrate contract.
//!
//! The stores assume only what a Cassandra-style store offers: composite row
//! keys, per-row columns sorted by a fixed comparator, column-level TTL, and
//! batched mutations that are atomic within a single row. Nothing here knows
//! about entities or versions.

pub mod memory;

use crate::codec::EncodedKey;
use crate::error::EvdbError;
use std::time::Duration;

/// A named column family. Names are stable on-disk identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ColumnFamily(pub &'static str);

impl std::fmt::Display for ColumnFamily {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.0)
    }
}

pub mod cf {
    use super::ColumnFamily;

    pub const ENTITY_VERSION_DATA: ColumnFamily = ColumnFamily("Entity_Version_Data");
    pub const ENTITY_VERSION_DATA_V2: ColumnFamily = ColumnFamily("Entity_Version_Data_V2");
    pub const ENTITY_VERSION_DATA_V3: ColumnFamily = ColumnFamily("Entity_Version_Data_V3");
    pub const ENTITY_LOG: ColumnFamily = ColumnFamily("Entity_Log");
    pub const ENTITY_LOG_V2: ColumnFamily = ColumnFamily("Entity_Log_V2");
    pub const UNIQUE_VALUES: ColumnFamily = ColumnFamily("Unique_Values");
    pub const UNIQUE_VALUES_V2: ColumnFamily = ColumnFamily("Unique_Values_V2");
    pub const ENTITY_UNIQUE_VALUES: ColumnFamily = ColumnFamily("Entity_Unique_Values");
    pub const ENTITY_UNIQUE_VALUES_V2: ColumnFamily = ColumnFamily("Entity_Unique_Values_V2");
    pub const MIGRATION_INFO: ColumnFamily = ColumnFamily("Migration_Info");
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    pub name: Vec<u8>,
    pub value: Vec<u8>,
}

#[derive(Debug, Clone)]
pub enum MutationOp {
    Put {
        cf: ColumnFamily,
        row: EncodedKey,
        column: Vec<u8>,
        value: Vec<u8>,
        ttl: Option<Duration>,
    },
    Delete {
        cf: ColumnFamily,
        row: EncodedKey,
        column: Vec<u8>,
    },
}

/// A pending set of column mutations. Stores hand these back to callers so
/// entity, log, and unique-value writes can be merged and executed together;
/// mutations touching one row apply atomically, cross-row batches do not.
#[derive(Debug, Clone, Default)]
pub struct MutationBatch {
    ops: Vec<MutationOp>,
}

impl MutationBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(
        &mut self,
        cf: ColumnFamily,
        row: EncodedKey,
        column: Vec<u8>,
        value: Vec<u8>,
        ttl: Option<Duration>,
    ) {
        self.ops.push(MutationOp::Put {
            cf,
            row,
            column,
            value,
            ttl,
        });
    }

    pub fn delete(&mut self, cf: ColumnFamily, row: EncodedKey, column: Vec<u8>) {
        self.ops.push(MutationOp::Delete { cf, row, column });
    }

    pub fn merge(&mut self, other: MutationBatch) {
        self.ops.extend(other.ops);
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn ops(&self) -> &[MutationOp] {
        &self.ops
    }

    pub(crate) fn into_ops(self) -> Vec<MutationOp> {
        self.ops
    }
}

/// Handle to the backing store. Long-lived, thread-safe, shared by every
/// store in the graph.
pub trait ColumnStore: Send + Sync {
    fn execute(&self, batch: MutationBatch) -> Result<(), EvdbError>;

    fn get_column(
        &self,
        cf: ColumnFamily,
        row: &EncodedKey,
        column: &[u8],
    ) -> Result<Option<Column>, EvdbError>;

    /// Range read over one row's columns in comparator order.
    ///
    /// Forward scans start at `start` (inclusive; `None` = first column) and
    /// move toward larger column names. Reversed scans start at `start`
    /// (inclusive; `None` = last column) and move toward smaller names.
    fn get_columns(
        &self,
        cf: ColumnFamily,
        row: &EncodedKey,
        start: Option<&[u8]>,
        limit: usize,
        reversed: bool,
    ) -> Result<Vec<Column>, EvdbError>;

    /// Row keys under a prefix, for bulk walks. Ordering follows the row
    /// key comparator; callers must not assume more.
    fn scan_row_keys(
        &self,
        cf: ColumnFamily,
        prefix: &EncodedKey,
    ) -> Result<Vec<EncodedKey>, EvdbError>;
}

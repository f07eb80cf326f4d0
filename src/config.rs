use crate::error::EvdbError;
use std::time::Duration;

/// Runtime configuration for the collection store graph.
///
/// Passed explicitly to [`crate::factory::StoreFactory`]; there is no global
/// configuration source.
#[derive(Debug, Clone)]
pub struct EvdbConfig {
    /// Maximum number of entity ids accepted by a single bulk load.
    pub max_load_size: usize,
    /// Maximum encoded payload size for one entity version. Writes above this
    /// are rejected before they reach the store.
    pub max_entity_size: usize,
    /// Maximum bytes one transport request may carry. Bulk loads whose
    /// worst-case result exceeds this are split into parallel sub-requests.
    pub transport_buffer_size: usize,
    /// Columns fetched per physical page when iterating version history.
    pub history_page_size: usize,
    /// How many older versions repair will inspect while searching for a
    /// COMPLETE or DELETED base version.
    pub repair_buffer_size: usize,
    /// When true, repair fails hard if no known-good base version is found
    /// within the buffer window. When false it returns the best-effort
    /// reconstruction accumulated from the partial versions.
    pub repair_requires_base: bool,
    /// TTL applied to transient write-progress markers and tentative unique
    /// value reservations so abandoned in-flight state self-expires.
    pub transient_timeout: Duration,
    /// Entity versions re-written per flush during bulk format migration.
    pub migration_batch_size: usize,
    /// Worker threads for the bulk migration pipeline.
    pub migration_workers: usize,
    /// When true, unique value loads delete newer duplicate claims instead of
    /// merely ignoring them.
    pub read_repair_enabled: bool,
}

impl Default for EvdbConfig {
    fn default() -> Self {
        Self {
            max_load_size: 100,
            max_entity_size: 512 * 1024,
            transport_buffer_size: 15 * 1024 * 1024,
            history_page_size: 100,
            repair_buffer_size: 10,
            repair_requires_base: false,
            transient_timeout: Duration::from_secs(10),
            migration_batch_size: 50,
            migration_workers: std::thread::available_parallelism()
                .map(|n| n.get().max(2))
                .unwrap_or(4),
            read_repair_enabled: false,
        }
    }
}

impl EvdbConfig {
    /// Small buffers and a single migration worker, for tests and local use.
    pub fn development() -> Self {
        Self {
            max_load_size: 10,
            max_entity_size: 64 * 1024,
            transport_buffer_size: 256 * 1024,
            history_page_size: 10,
            migration_workers: 1,
            ..Self::default()
        }
    }

    /// Strict profile: repair refuses to fabricate an entity when no
    /// known-good base version exists.
    pub fn strict() -> Self {
        Self {
            repair_requires_base: true,
            read_repair_enabled: true,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), EvdbError> {
        if self.max_load_size == 0 {
            return Err(EvdbError::InvalidConfig("max_load_size must be > 0".into()));
        }
        if self.max_entity_size == 0 {
            return Err(EvdbError::InvalidConfig(
                "max_entity_size must be > 0".into(),
            ));
        }
        if self.transport_buffer_size < self.max_entity_size {
            return Err(EvdbError::InvalidConfig(
                "transport_buffer_size must hold at least one maximum-size entity".into(),
            ));
        }
        if self.history_page_size == 0 {
            return Err(EvdbError::InvalidConfig(
                "history_page_size must be > 0".into(),
            ));
        }
        if self.repair_buffer_size == 0 {
            return Err(EvdbError::InvalidConfig(
                "repair_buffer_size must be > 0".into(),
            ));
        }
        if self.migration_batch_size == 0 {
            return Err(EvdbError::InvalidConfig(
                "migration_batch_size must be > 0".into(),
            ));
        }
        if self.migration_workers == 0 {
            return Err(EvdbError::InvalidConfig(
                "migration_workers must be > 0".into(),
            ));
        }
        Ok(())
    }
}

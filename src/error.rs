use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvdbErrorCode {
    Transport,
    DataCorruption,
    EntityTooLarge,
    Migration,
    RepairIncomplete,
    Validation,
    InvalidConfig,
    Encode,
    Decode,
}

impl EvdbErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            EvdbErrorCode::Transport => "transport",
            EvdbErrorCode::DataCorruption => "data_corruption",
            EvdbErrorCode::EntityTooLarge => "entity_too_large",
            EvdbErrorCode::Migration => "migration",
            EvdbErrorCode::RepairIncomplete => "repair_incomplete",
            EvdbErrorCode::Validation => "validation",
            EvdbErrorCode::InvalidConfig => "invalid_config",
            EvdbErrorCode::Encode => "encode",
            EvdbErrorCode::Decode => "decode",
        }
    }
}

#[derive(Debug, Error)]
pub enum EvdbError {
    /// Connectivity or timeout against the backing column store. Retryable,
    /// but the retry policy belongs to the caller, never to this layer.
    #[error("transport error: {0}")]
    Transport(String),
    /// Stored bytes that can never be parsed again. The affected version is
    /// lost; read paths degrade to a DELETED placeholder rather than crash.
    #[error("data corruption: {0}")]
    DataCorruption(String),
    #[error("entity payload is {actual} bytes, configured maximum is {max} bytes")]
    EntityTooLarge { max: usize, actual: usize },
    #[error("migration failed for entity {entity}: {message}")]
    Migration { entity: String, message: String },
    #[error("repair incomplete: {0}")]
    RepairIncomplete(String),
    #[error("validation error: {0}")]
    Validation(String),
    #[error("invalid config: {0}")]
    InvalidConfig(String),
    #[error("encode error: {0}")]
    Encode(String),
    #[error("decode error: {0}")]
    Decode(String),
}

impl EvdbError {
    pub fn code(&self) -> EvdbErrorCode {
        match self {
            EvdbError::Transport(_) => EvdbErrorCode::Transport,
            EvdbError::DataCorruption(_) => EvdbErrorCode::DataCorruption,
            EvdbError::EntityTooLarge { .. } => EvdbErrorCode::EntityTooLarge,
            EvdbError::Migration { .. } => EvdbErrorCode::Migration,
            EvdbError::RepairIncomplete(_) => EvdbErrorCode::RepairIncomplete,
            EvdbError::Validation(_) => EvdbErrorCode::Validation,
            EvdbError::InvalidConfig(_) => EvdbErrorCode::InvalidConfig,
            EvdbError::Encode(_) => EvdbErrorCode::Encode,
            EvdbError::Decode(_) => EvdbErrorCode::Decode,
        }
    }

    pub fn code_str(&self) -> &'static str {
        self.code().as_str()
    }
}

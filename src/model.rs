use crate::error::EvdbError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::OnceLock;
use uuid::{Context, Timestamp, Uuid};

/// Globally addressable entity identity. The type names the entity's
/// collection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Id {
    pub uuid: Uuid,
    pub entity_type: String,
}

impl Id {
    /// New identity with a freshly generated time-ordered uuid.
    pub fn new(entity_type: impl Into<String>) -> Self {
        Self {
            uuid: time_uuid(),
            entity_type: entity_type.into(),
        }
    }

    pub fn from_parts(uuid: Uuid, entity_type: impl Into<String>) -> Self {
        Self {
            uuid,
            entity_type: entity_type.into(),
        }
    }
}

impl std::fmt::Display for Id {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.entity_type, self.uuid)
    }
}

/// Tenancy boundary under which all row keys are namespaced. Every operation
/// is confined to one scope.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Scope {
    pub owner: Id,
    pub name: String,
}

impl Scope {
    pub fn new(owner: Id, name: impl Into<String>) -> Self {
        Self {
            owner,
            name: name.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FieldType {
    Boolean,
    Double,
    Float,
    Integer,
    Long,
    String,
    Uuid,
}

impl FieldType {
    pub fn tag(self) -> u8 {
        match self {
            FieldType::Boolean => 0x10,
            FieldType::Double => 0x11,
            FieldType::Float => 0x12,
            FieldType::Integer => 0x13,
            FieldType::Long => 0x14,
            FieldType::String => 0x15,
            FieldType::Uuid => 0x16,
        }
    }

    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0x10 => Some(FieldType::Boolean),
            0x11 => Some(FieldType::Double),
            0x12 => Some(FieldType::Float),
            0x13 => Some(FieldType::Integer),
            0x14 => Some(FieldType::Long),
            0x15 => Some(FieldType::String),
            0x16 => Some(FieldType::Uuid),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            FieldType::Boolean => "boolean",
            FieldType::Double => "double",
            FieldType::Float => "float",
            FieldType::Integer => "integer",
            FieldType::Long => "long",
            FieldType::String => "string",
            FieldType::Uuid => "uuid",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FieldValue {
    Boolean(bool),
    Double(f64),
    Float(f32),
    Integer(i32),
    Long(i64),
    String(String),
    Uuid(Uuid),
}

impl FieldValue {
    pub fn field_type(&self) -> FieldType {
        match self {
            FieldValue::Boolean(_) => FieldType::Boolean,
            FieldValue::Double(_) => FieldType::Double,
            FieldValue::Float(_) => FieldType::Float,
            FieldValue::Integer(_) => FieldType::Integer,
            FieldValue::Long(_) => FieldType::Long,
            FieldValue::String(_) => FieldType::String,
            FieldValue::Uuid(_) => FieldType::Uuid,
        }
    }

    /// Canonical string form used inside composite keys. Uniqueness
    /// comparison is case-insensitive, so the result is lowercased.
    pub fn key_string(&self) -> String {
        let raw = match self {
            FieldValue::Boolean(v) => v.to_string(),
            FieldValue::Double(v) => v.to_string(),
            FieldValue::Float(v) => v.to_string(),
            FieldValue::Integer(v) => v.to_string(),
            FieldValue::Long(v) => v.to_string(),
            FieldValue::String(v) => v.clone(),
            FieldValue::Uuid(v) => v.to_string(),
        };
        raw.to_lowercase()
    }

    /// Reverse of [`FieldValue::key_string`] for a known field type.
    pub fn parse(field_type: FieldType, value: &str) -> Result<Self, EvdbError> {
        let parsed = match field_type {
            FieldType::Boolean => FieldValue::Boolean(
                value
                    .parse()
                    .map_err(|_| bad_value(field_type, value))?,
            ),
            FieldType::Double => {
                FieldValue::Double(value.parse().map_err(|_| bad_value(field_type, value))?)
            }
            FieldType::Float => {
                FieldValue::Float(value.parse().map_err(|_| bad_value(field_type, value))?)
            }
            FieldType::Integer => {
                FieldValue::Integer(value.parse().map_err(|_| bad_value(field_type, value))?)
            }
            FieldType::Long => {
                FieldValue::Long(value.parse().map_err(|_| bad_value(field_type, value))?)
            }
            FieldType::String => FieldValue::String(value.to_string()),
            FieldType::Uuid => {
                FieldValue::Uuid(value.parse().map_err(|_| bad_value(field_type, value))?)
            }
        };
        Ok(parsed)
    }
}

fn bad_value(field_type: FieldType, value: &str) -> EvdbError {
    EvdbError::DataCorruption(format!(
        "cannot parse '{value}' as {} field value",
        field_type.name()
    ))
}

/// A named, typed entity attribute. `unique` marks the field as claiming a
/// collection-wide unique value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    pub value: FieldValue,
    pub unique: bool,
}

impl Field {
    pub fn new(name: impl Into<String>, value: FieldValue) -> Self {
        Self {
            name: name.into(),
            value,
            unique: false,
        }
    }

    pub fn unique(name: impl Into<String>, value: FieldValue) -> Self {
        Self {
            name: name.into(),
            value,
            unique: true,
        }
    }
}

/// An ordered set of uniquely named typed fields. The whole field set is
/// replaced on write; individual fields are never mutated in place outside
/// of repair.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Entity {
    fields: BTreeMap<String, Field>,
}

impl Entity {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_fields(fields: impl IntoIterator<Item = Field>) -> Self {
        let mut entity = Self::new();
        for field in fields {
            entity.add(field);
        }
        entity
    }

    /// Inserts the field, replacing any existing field of the same name.
    pub fn add(&mut self, field: Field) {
        self.fields.insert(field.name.clone(), field);
    }

    pub fn remove(&mut self, name: &str) -> Option<Field> {
        self.fields.remove(name)
    }

    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.get(name)
    }

    pub fn fields(&self) -> impl Iterator<Item = &Field> {
        self.fields.values()
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    pub fn unique_fields(&self) -> impl Iterator<Item = &Field> {
        self.fields.values().filter(|f| f.unique)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

static UUID_CONTEXT: OnceLock<Context> = OnceLock::new();
static NODE_ID: OnceLock<[u8; 6]> = OnceLock::new();

/// Generates a time-ordered (v1) uuid. Sorting by the embedded gregorian
/// timestamp sorts chronologically; the shared context guards against clock
/// sequence collisions within this process.
pub fn time_uuid() -> Uuid {
    let context = UUID_CONTEXT.get_or_init(|| Context::new(0));
    let node = NODE_ID.get_or_init(|| {
        let pid = std::process::id().to_be_bytes();
        [0xeb, 0xdb, pid[0], pid[1], pid[2], pid[3]]
    });
    let ts = Timestamp::now(context);
    Uuid::new_v1(ts, node)
}

/// Extracts the 60-bit gregorian timestamp from a time-ordered uuid.
///
/// Non-v1 uuids yield a value assembled from the same byte positions; it is
/// meaningless but stable, which is all ordering requires.
pub fn uuid_timestamp(uuid: &Uuid) -> u64 {
    let b = uuid.as_bytes();
    let time_low = u32::from_be_bytes([b[0], b[1], b[2], b[3]]) as u64;
    let time_mid = u16::from_be_bytes([b[4], b[5]]) as u64;
    let time_hi = (u16::from_be_bytes([b[6], b[7]]) & 0x0fff) as u64;
    (time_hi << 48) | (time_mid << 32) | time_low
}

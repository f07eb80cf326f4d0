//! Order-preserving composite key building and parsing.
//!
//! Each component is written as `(type tag, bytes, terminator)`. Strings are
//! 0x00-terminated with interior nulls escaped as `0x00 0xFF`, so comparing
//! encoded keys byte-wise compares the components in order. Uuids are fixed
//! width and need no terminator. Decoding fails loudly on an unrecognized
//! tag: silently returning wrong data from a range scan is worse than an
//! error.

use crate::codec::EncodedKey;
use crate::error::EvdbError;
use crate::model::{Field, FieldType, FieldValue, Id};
use smallvec::SmallVec;
use uuid::Uuid;

const TAG_STRING: u8 = 0x01;
const TAG_UUID: u8 = 0x02;
const TAG_ID: u8 = 0x03;

#[derive(Debug, Default)]
pub struct CompositeBuilder {
    out: SmallVec<[u8; 64]>,
}

impl CompositeBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_str(&mut self, value: &str) -> &mut Self {
        self.out.push(TAG_STRING);
        append_text(&mut self.out, value);
        self
    }

    pub fn push_uuid(&mut self, value: &Uuid) -> &mut Self {
        self.out.push(TAG_UUID);
        self.out.extend_from_slice(value.as_bytes());
        self
    }

    /// An id is a `(uuid, type-string)` pair.
    pub fn push_id(&mut self, id: &Id) -> &mut Self {
        self.out.push(TAG_ID);
        self.out.extend_from_slice(id.uuid.as_bytes());
        append_text(&mut self.out, &id.entity_type);
        self
    }

    /// A field is `(field-type tag, name, lowercased value string)`. The
    /// value is normalized so uniqueness comparison is case-insensitive.
    pub fn push_field(&mut self, field: &Field) -> &mut Self {
        self.out.push(field.value.field_type().tag());
        append_text(&mut self.out, &field.name);
        append_text(&mut self.out, &field.value.key_string());
        self
    }

    pub fn finish(self) -> EncodedKey {
        EncodedKey::from_smallvec(self.out)
    }
}

fn append_text(out: &mut SmallVec<[u8; 64]>, value: &str) {
    for byte in value.as_bytes() {
        if *byte == 0 {
            // Escape interior nulls so the terminator remains unambiguous.
            out.extend_from_slice(&[0x00, 0xFF]);
        } else {
            out.push(*byte);
        }
    }
    out.push(0x00);
}

#[derive(Debug)]
pub struct CompositeParser<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> CompositeParser<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    pub fn is_exhausted(&self) -> bool {
        self.pos >= self.bytes.len()
    }

    pub fn read_str(&mut self) -> Result<String, EvdbError> {
        self.expect_tag(TAG_STRING, "string")?;
        self.read_text()
    }

    pub fn read_uuid(&mut self) -> Result<Uuid, EvdbError> {
        self.expect_tag(TAG_UUID, "uuid")?;
        self.read_uuid_bytes()
    }

    pub fn read_id(&mut self) -> Result<Id, EvdbError> {
        self.expect_tag(TAG_ID, "id")?;
        let uuid = self.read_uuid_bytes()?;
        let entity_type = self.read_text()?;
        Ok(Id::from_parts(uuid, entity_type))
    }

    pub fn read_field(&mut self) -> Result<Field, EvdbError> {
        let tag = self.next_byte("field tag")?;
        let field_type = FieldType::from_tag(tag).ok_or_else(|| {
            EvdbError::DataCorruption(format!("unrecognized field type tag 0x{tag:02x}"))
        })?;
        let name = self.read_text()?;
        let value = self.read_text()?;
        Ok(Field {
            name,
            value: FieldValue::parse(field_type, &value)?,
            unique: false,
        })
    }

    fn expect_tag(&mut self, expected: u8, kind: &str) -> Result<(), EvdbError> {
        let tag = self.next_byte(kind)?;
        if tag != expected {
            return Err(EvdbError::DataCorruption(format!(
                "expected {kind} component (tag 0x{expected:02x}), found tag 0x{tag:02x}"
            )));
        }
        Ok(())
    }

    fn next_byte(&mut self, what: &str) -> Result<u8, EvdbError> {
        let byte = *self
            .bytes
            .get(self.pos)
            .ok_or_else(|| EvdbError::DataCorruption(format!("truncated key: missing {what}")))?;
        self.pos += 1;
        Ok(byte)
    }

    fn read_uuid_bytes(&mut self) -> Result<Uuid, EvdbError> {
        let end = self.pos + 16;
        let slice = self.bytes.get(self.pos..end).ok_or_else(|| {
            EvdbError::DataCorruption("truncated key: incomplete uuid component".into())
        })?;
        self.pos = end;
        let mut raw = [0u8; 16];
        raw.copy_from_slice(slice);
        Ok(Uuid::from_bytes(raw))
    }

    fn read_text(&mut self) -> Result<String, EvdbError> {
        let mut out = Vec::new();
        loop {
            let byte = self.next_byte("string terminator")?;
            if byte != 0x00 {
                out.push(byte);
                continue;
            }
            // An escaped interior null is 0x00 0xFF; a bare 0x00 terminates.
            match self.bytes.get(self.pos) {
                Some(0xFF) => {
                    self.pos += 1;
                    out.push(0x00);
                }
                _ => break,
            }
        }
        String::from_utf8(out)
            .map_err(|_| EvdbError::DataCorruption("non-utf8 string component in key".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::{CompositeBuilder, CompositeParser};
    use crate::error::EvdbError;
    use crate::model::{time_uuid, Field, FieldValue, Id};

    #[test]
    fn components_round_trip() {
        let id = Id::new("user");
        let uuid = time_uuid();
        let mut builder = CompositeBuilder::new();
        builder
            .push_id(&id)
            .push_str("emails")
            .push_uuid(&uuid)
            .push_field(&Field::new("email", FieldValue::String("A@B.c".into())));
        let key = builder.finish();

        let mut parser = CompositeParser::new(key.as_slice());
        assert_eq!(parser.read_id().expect("id"), id);
        assert_eq!(parser.read_str().expect("str"), "emails");
        assert_eq!(parser.read_uuid().expect("uuid"), uuid);
        let field = parser.read_field().expect("field");
        assert_eq!(field.name, "email");
        // the lowercased key form is what survives
        assert_eq!(field.value, FieldValue::String("a@b.c".into()));
        assert!(parser.is_exhausted());
    }

    #[test]
    fn interior_nulls_round_trip() {
        let mut builder = CompositeBuilder::new();
        builder.push_str("a\0b").push_str("tail");
        let key = builder.finish();
        let mut parser = CompositeParser::new(key.as_slice());
        assert_eq!(parser.read_str().expect("str"), "a\0b");
        assert_eq!(parser.read_str().expect("str"), "tail");
    }

    #[test]
    fn string_order_is_preserved() {
        let key = |s: &str| {
            let mut b = CompositeBuilder::new();
            b.push_str(s);
            b.finish()
        };
        assert!(key("a") < key("b"));
        assert!(key("a") < key("aa"));
        assert!(key("ab") < key("b"));
    }

    #[test]
    fn shared_prefix_confines_range_scans() {
        let prefix = {
            let mut b = CompositeBuilder::new();
            b.push_str("scope");
            b.finish()
        };
        let inside = {
            let mut b = CompositeBuilder::new();
            b.push_str("scope").push_str("x");
            b.finish()
        };
        let outside = {
            let mut b = CompositeBuilder::new();
            b.push_str("scopf");
            b.finish()
        };
        assert!(inside.starts_with(&prefix));
        assert!(!outside.starts_with(&prefix));
    }

    #[test]
    fn unknown_tag_fails_loudly() {
        let err = CompositeParser::new(&[0x7E, 0x00])
            .read_str()
            .expect_err("must reject unknown tag");
        assert!(matches!(err, EvdbError::DataCorruption(_)));
    }

    #[test]
    fn truncated_uuid_fails_loudly() {
        let mut bytes = vec![0x02];
        bytes.extend_from_slice(&[0xAB; 7]);
        let err = CompositeParser::new(&bytes)
            .read_uuid()
            .expect_err("must reject truncated uuid");
        assert!(matches!(err, EvdbError::DataCorruption(_)));
    }
}

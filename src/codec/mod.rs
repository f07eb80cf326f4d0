pub mod composite;
pub mod row_key;

use smallvec::SmallVec;

/// An encoded row or column key. Byte-wise lexicographic comparison of two
/// keys built from the same component shapes matches component-wise
/// comparison, so prefix range scans return only the intended sub-keys.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EncodedKey {
    bytes: SmallVec<[u8; 64]>,
}

impl EncodedKey {
    pub fn as_slice(&self) -> &[u8] {
        &self.bytes
    }

    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self {
            bytes: bytes.into(),
        }
    }

    pub fn into_vec(self) -> Vec<u8> {
        self.bytes.into_vec()
    }

    pub fn starts_with(&self, prefix: &EncodedKey) -> bool {
        self.bytes.starts_with(prefix.as_slice())
    }

    pub(crate) fn from_smallvec(bytes: SmallVec<[u8; 64]>) -> Self {
        Self { bytes }
    }
}

impl AsRef<[u8]> for EncodedKey {
    fn as_ref(&self) -> &[u8] {
        &self.bytes
    }
}

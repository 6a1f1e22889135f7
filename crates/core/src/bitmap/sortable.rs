//! Order-preserving byte encodings for indexed values.
//!
//! For every supported type, comparing two encoded keys byte by byte gives
//! the same ordering as comparing the values, so range predicates become
//! `BTreeMap` range scans.

/// A value that can key an [`InvertedIndex`](super::inverted::InvertedIndex).
pub trait Sortable: Sized {
    fn to_key(&self) -> Vec<u8>;

    fn from_key(key: &[u8]) -> Option<Self>;
}

const SIGN_BIT: u64 = 1 << 63;

impl Sortable for u64 {
    fn to_key(&self) -> Vec<u8> {
        self.to_be_bytes().to_vec()
    }

    fn from_key(key: &[u8]) -> Option<Self> {
        Some(u64::from_be_bytes(key.try_into().ok()?))
    }
}

impl Sortable for i64 {
    fn to_key(&self) -> Vec<u8> {
        ((*self as u64) ^ SIGN_BIT).to_be_bytes().to_vec()
    }

    fn from_key(key: &[u8]) -> Option<Self> {
        Some((u64::from_be_bytes(key.try_into().ok()?) ^ SIGN_BIT) as i64)
    }
}

impl Sortable for f64 {
    fn to_key(&self) -> Vec<u8> {
        let bits = self.to_bits();
        let ordered = if bits & SIGN_BIT != 0 {
            !bits
        } else {
            bits ^ SIGN_BIT
        };
        ordered.to_be_bytes().to_vec()
    }

    fn from_key(key: &[u8]) -> Option<Self> {
        let ordered = u64::from_be_bytes(key.try_into().ok()?);
        let bits = if ordered & SIGN_BIT != 0 {
            ordered ^ SIGN_BIT
        } else {
            !ordered
        };
        Some(f64::from_bits(bits))
    }
}

impl Sortable for String {
    fn to_key(&self) -> Vec<u8> {
        self.as_bytes().to_vec()
    }

    fn from_key(key: &[u8]) -> Option<Self> {
        String::from_utf8(key.to_vec()).ok()
    }
}

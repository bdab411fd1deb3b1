use std::fmt;

use crate::error::{Result, SealError};

/// A text field of exactly `N` bytes, zero-padded on the right.
#[derive(Clone, PartialEq, Eq)]
pub struct FixedField<const N: usize>([u8; N]);

impl<const N: usize> FixedField<N> {
    pub const WIDTH: usize = N;

    /// Fails with `FieldTooLong` when `value` exceeds `N` bytes.
    pub fn new(field: &'static str, value: &[u8]) -> Result<Self> {
        if value.len() > N {
            return Err(SealError::FieldTooLong { field, len: value.len(), capacity: N });
        }
        let mut buf = [0u8; N];
        buf[..value.len()].copy_from_slice(value);
        Ok(Self(buf))
    }

    /// Caller guarantees `raw.len() == N`.
    pub(crate) fn from_slice(raw: &[u8]) -> Self {
        let mut buf = [0u8; N];
        buf.copy_from_slice(raw);
        Self(buf)
    }

    pub fn as_bytes(&self) -> &[u8; N] {
        &self.0
    }

    /// The stored value without its zero padding.
    pub fn trimmed(&self) -> &[u8] {
        let end = self.0.iter().rposition(|&b| b != 0).map_or(0, |i| i + 1);
        &self.0[..end]
    }

    pub fn to_text(&self) -> Result<String> {
        String::from_utf8(self.trimmed().to_vec())
            .map_err(|_| SealError::NotAContainer("header text field is not UTF-8".into()))
    }

    pub fn to_text_lossy(&self) -> String {
        String::from_utf8_lossy(self.trimmed()).into_owned()
    }
}

impl<const N: usize> fmt::Debug for FixedField<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FixedField<{N}>({:?})", self.to_text_lossy())
    }
}

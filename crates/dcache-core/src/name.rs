//! Fixed-width name slots.
//!
//! A slot is `NAME_LEN` bytes and always NUL-terminated, so at most
//! `MAX_NAME_BYTES` bytes of a name survive. Longer names are cut bytewise;
//! the cut may split a multi-byte UTF-8 sequence.

use std::fmt;

/// Slot width in bytes, terminator included
pub const NAME_LEN: usize = 64;

/// Longest name a slot can hold
pub const MAX_NAME_BYTES: usize = NAME_LEN - 1;

#[derive(Clone, Copy, PartialEq, Eq)]
#[repr(transparent)]
pub struct NameSlot([u8; NAME_LEN]);

impl Default for NameSlot {
    fn default() -> Self {
        Self::EMPTY
    }
}

impl NameSlot {
    pub const EMPTY: NameSlot = NameSlot([0; NAME_LEN]);

    pub fn from_name(name: &[u8]) -> Self {
        let mut slot = Self::EMPTY;
        slot.fill(name);
        slot
    }

    pub(crate) const fn from_raw(raw: [u8; NAME_LEN]) -> Self {
        NameSlot(raw)
    }

    /// Overwrite with `name`, zeroing the tail. Returns the stored length.
    #[inline]
    pub fn fill(&mut self, name: &[u8]) -> usize {
        let n = name.len().min(MAX_NAME_BYTES);
        self.0[..n].copy_from_slice(&name[..n]);
        self.0[n..].fill(0);
        n
    }

    #[inline]
    pub fn clear(&mut self) {
        self.0 = [0; NAME_LEN];
    }

    /// Stored bytes up to the first NUL.
    pub fn as_bytes(&self) -> &[u8] {
        let end = self.0.iter().position(|&b| b == 0).unwrap_or(NAME_LEN);
        &self.0[..end]
    }

    pub fn raw(&self) -> &[u8; NAME_LEN] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0[0] == 0
    }
}

impl fmt::Debug for NameSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", String::from_utf8_lossy(self.as_bytes()))
    }
}

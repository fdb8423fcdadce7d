//! Fixed-size trace record and its wire encoding.
//!
//! Layout, little-endian, 536 bytes regardless of walked depth:
//!
//! ```text
//! offset  size  field
//!      0     8  timestamp (monotonic ns)
//!      8     8  group_id
//!     16     4  operation (0 = alloc, 1 = positive, 2 = negative)
//!     20     4  depth: bits 0-30 component count (0..=8), bit 31 root reached
//!     24   512  8 x 64-byte name slots, leaf first, NUL-terminated,
//!               unused slots zero-filled
//! ```
//!
//! A name slot holds at most 63 bytes; byte 63 is always the terminator.

use serde::Serialize;

use crate::error::DecodeError;
use crate::name::{NameSlot, NAME_LEN};
use crate::walker::MAX_DEPTH;

pub const RECORD_SIZE: usize = 8 + 8 + 4 + 4 + MAX_DEPTH * NAME_LEN;

pub const DEPTH_ROOT_FLAG: u32 = 0x8000_0000;
pub const DEPTH_COUNT_MASK: u32 = !DEPTH_ROOT_FLAG;

const NAMES_OFFSET: usize = 24;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
#[repr(u32)]
pub enum Operation {
    Alloc = 0,
    Positive = 1,
    Negative = 2,
}

impl Operation {
    pub fn as_str(self) -> &'static str {
        match self {
            Operation::Alloc => "alloc",
            Operation::Positive => "positive",
            Operation::Negative => "negative",
        }
    }
}

impl TryFrom<u32> for Operation {
    type Error = DecodeError;

    fn try_from(code: u32) -> Result<Self, Self::Error> {
        match code {
            0 => Ok(Operation::Alloc),
            1 => Ok(Operation::Positive),
            2 => Ok(Operation::Negative),
            other => Err(DecodeError::Operation(other)),
        }
    }
}

#[inline(always)]
pub fn pack_depth(count: usize, root_reached: bool) -> u32 {
    let count = count.min(MAX_DEPTH) as u32;
    if root_reached {
        count | DEPTH_ROOT_FLAG
    } else {
        count
    }
}

#[inline(always)]
pub fn unpack_depth(depth: u32) -> (usize, bool) {
    (
        (depth & DEPTH_COUNT_MASK) as usize,
        depth & DEPTH_ROOT_FLAG != 0,
    )
}

/// One traced allocation. `repr(C)` matches the wire layout field for field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(C)]
pub struct TraceEvent {
    pub timestamp: u64,
    pub group_id: u64,
    pub operation: Operation,
    pub depth: u32,
    pub names: [NameSlot; MAX_DEPTH],
}

const _: () = assert!(std::mem::size_of::<TraceEvent>() == RECORD_SIZE);

impl Default for TraceEvent {
    fn default() -> Self {
        Self::ZEROED
    }
}

impl TraceEvent {
    pub const ZEROED: TraceEvent = TraceEvent {
        timestamp: 0,
        group_id: 0,
        operation: Operation::Alloc,
        depth: 0,
        names: [NameSlot::EMPTY; MAX_DEPTH],
    };

    /// Number of valid name components
    pub fn count(&self) -> usize {
        unpack_depth(self.depth).0
    }

    pub fn root_reached(&self) -> bool {
        unpack_depth(self.depth).1
    }

    /// Valid components, leaf first.
    pub fn components(&self) -> impl Iterator<Item = &[u8]> + '_ {
        self.names[..self.count().min(MAX_DEPTH)]
            .iter()
            .map(NameSlot::as_bytes)
    }

    pub fn encode_into(&self, out: &mut [u8; RECORD_SIZE]) {
        out[0..8].copy_from_slice(&self.timestamp.to_le_bytes());
        out[8..16].copy_from_slice(&self.group_id.to_le_bytes());
        out[16..20].copy_from_slice(&(self.operation as u32).to_le_bytes());
        out[20..24].copy_from_slice(&self.depth.to_le_bytes());
        for (i, slot) in self.names.iter().enumerate() {
            let at = NAMES_OFFSET + i * NAME_LEN;
            out[at..at + NAME_LEN].copy_from_slice(slot.raw());
        }
    }

    pub fn to_bytes(&self) -> [u8; RECORD_SIZE] {
        let mut out = [0u8; RECORD_SIZE];
        self.encode_into(&mut out);
        out
    }

    /// Decode one record from the front of `bytes`.
    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        if bytes.len() < RECORD_SIZE {
            return Err(DecodeError::Truncated {
                got: bytes.len(),
                expected: RECORD_SIZE,
            });
        }
        let u64_at = |at: usize| {
            let mut b = [0u8; 8];
            b.copy_from_slice(&bytes[at..at + 8]);
            u64::from_le_bytes(b)
        };
        let u32_at = |at: usize| {
            let mut b = [0u8; 4];
            b.copy_from_slice(&bytes[at..at + 4]);
            u32::from_le_bytes(b)
        };

        let operation = Operation::try_from(u32_at(16))?;
        let depth = u32_at(20);
        if (depth & DEPTH_COUNT_MASK) as usize > MAX_DEPTH {
            return Err(DecodeError::Depth(depth & DEPTH_COUNT_MASK));
        }

        let mut names = [NameSlot::EMPTY; MAX_DEPTH];
        for (i, slot) in names.iter_mut().enumerate() {
            let at = NAMES_OFFSET + i * NAME_LEN;
            let mut raw = [0u8; NAME_LEN];
            raw.copy_from_slice(&bytes[at..at + NAME_LEN]);
            *slot = NameSlot::from_raw(raw);
        }

        Ok(TraceEvent {
            timestamp: u64_at(0),
            group_id: u64_at(8),
            operation,
            depth,
            names,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> TraceEvent {
        let mut evt = TraceEvent {
            timestamp: 0x0102_0304_0506_0708,
            group_id: 42,
            operation: Operation::Alloc,
            depth: pack_depth(3, true),
            ..TraceEvent::ZEROED
        };
        evt.names[0].fill(b"file");
        evt.names[1].fill(b"tmp");
        evt.names[2].fill(b"/");
        evt
    }

    #[test]
    fn test_record_size_is_constant() {
        assert_eq!(RECORD_SIZE, 536);
        assert_eq!(std::mem::size_of::<TraceEvent>(), RECORD_SIZE);
    }

    #[test]
    fn test_wire_layout_offsets() {
        let bytes = sample().to_bytes();
        assert_eq!(&bytes[0..8], &0x0102_0304_0506_0708u64.to_le_bytes());
        assert_eq!(&bytes[8..16], &42u64.to_le_bytes());
        assert_eq!(&bytes[16..20], &0u32.to_le_bytes());
        assert_eq!(&bytes[20..24], &(3u32 | DEPTH_ROOT_FLAG).to_le_bytes());
        assert_eq!(&bytes[24..28], b"file");
        assert_eq!(&bytes[88..91], b"tmp");
        // slots past the count are zero-filled
        assert!(bytes[24 + 3 * 64..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_decode_matches_encode() {
        let evt = sample();
        let decoded = TraceEvent::decode(&evt.to_bytes()).unwrap();
        assert_eq!(decoded, evt);
        assert_eq!(decoded.count(), 3);
        assert!(decoded.root_reached());
        let parts: Vec<&[u8]> = decoded.components().collect();
        assert_eq!(parts, vec![&b"file"[..], &b"tmp"[..], &b"/"[..]]);
    }

    #[test]
    fn test_decode_rejects_bad_records() {
        assert!(matches!(
            TraceEvent::decode(&[0u8; 10]),
            Err(DecodeError::Truncated { got: 10, .. })
        ));

        let mut bytes = sample().to_bytes();
        bytes[16..20].copy_from_slice(&9u32.to_le_bytes());
        assert_eq!(TraceEvent::decode(&bytes), Err(DecodeError::Operation(9)));

        let mut bytes = sample().to_bytes();
        bytes[20..24].copy_from_slice(&(12u32 | DEPTH_ROOT_FLAG).to_le_bytes());
        assert_eq!(TraceEvent::decode(&bytes), Err(DecodeError::Depth(12)));
    }

    #[test]
    fn test_depth_packing() {
        assert_eq!(pack_depth(8, false), 8);
        assert_eq!(pack_depth(2, true), 0x8000_0002);
        assert_eq!(unpack_depth(0x8000_0005), (5, true));
        assert_eq!(unpack_depth(pack_depth(30, false)), (MAX_DEPTH, false));
    }
}

//! Per-row survival mask.

use bitvec::prelude::*;
use cf_store::StoreError;

use crate::error::{Result, SelectError};

/// One bit per input row, `1` = still alive.
///
/// Bits only ever go from alive to dead. Packed MSB-first: row 0 is the high
/// bit of byte 0.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectionMask {
    bits: BitVec<u8, Msb0>,
}

impl SelectionMask {
    /// Mask over `rows` rows, all alive.
    pub fn new(rows: usize) -> Self {
        Self { bits: bitvec![u8, Msb0; 1; rows] }
    }

    /// Rebuild a mask from its packed form. Bits past `rows` are ignored.
    pub fn from_bytes(bytes: &[u8], rows: usize) -> Result<Self> {
        if bytes.len() * 8 < rows {
            return Err(SelectError::Store(StoreError::Corrupt(format!(
                "mask of {} bytes cannot hold {rows} rows",
                bytes.len()
            ))));
        }
        let mut bits = BitVec::<u8, Msb0>::from_slice(bytes);
        bits.truncate(rows);
        Ok(Self { bits })
    }

    /// Packed form, `ceil(rows / 8)` bytes with trailing pad bits zero.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = self.bits.as_raw_slice().to_vec();
        let rem = self.bits.len() % 8;
        if rem != 0
            && let Some(last) = out.last_mut()
        {
            *last &= 0xFFu8 << (8 - rem);
        }
        out
    }

    /// Number of rows covered.
    pub fn len(&self) -> usize {
        self.bits.len()
    }

    /// `true` if the mask covers no rows.
    pub fn is_empty(&self) -> bool {
        self.bits.is_empty()
    }

    /// `true` if `row` is in range and alive.
    pub fn is_alive(&self, row: usize) -> bool {
        self.bits.get(row).is_some_and(|b| *b)
    }

    /// Mark `row` dead. Returns `true` if it was alive.
    pub fn kill(&mut self, row: usize) -> bool {
        let was_alive = self.is_alive(row);
        if was_alive {
            self.bits.set(row, false);
        }
        was_alive
    }

    /// Population count.
    pub fn count_alive(&self) -> usize {
        self.bits.count_ones()
    }

    /// Indices of alive rows in ascending order.
    pub fn alive(&self) -> impl Iterator<Item = usize> + '_ {
        self.bits.iter_ones()
    }
}

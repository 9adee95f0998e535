//! Composite row identities.
//!
//! A row's identity packs its parent's identity and its position inside the
//! parent: `(parent << bits) | local`. Root rows use the container id as the
//! parent. Identities stay positive `i64` values so SQLite accepts them as
//! rowids.

use crate::error::{Result, VdbError};

/// Builds the identity of the `local`-th child of `parent`.
///
/// Fails when `local` does not fit in `bits` or the shifted parent would
/// leave the positive `i64` range; either would alias distinct rows.
pub fn compose(parent: i64, local: usize, bits: u32) -> Result<i64> {
    if local as u64 >= 1_u64 << bits {
        return Err(VdbError::Invariant(format!(
            "element index {local} does not fit in {bits} bits"
        )));
    }
    if parent < 0 || (parent as u64).leading_zeros() <= bits {
        return Err(VdbError::Invariant(format!(
            "parent identity {parent} cannot be shifted by {bits} bits"
        )));
    }
    Ok((parent << bits) | local as i64)
}

/// Splits an identity into its parent identity and local index.
pub fn decompose(rowid: i64, bits: u32) -> (i64, usize) {
    (rowid >> bits, (rowid & ((1_i64 << bits) - 1)) as usize)
}

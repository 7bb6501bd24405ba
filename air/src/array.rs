//! Typed column storage.
//!
//! Three backings, chosen by bit-width: a word-packed bit array for 1-bit
//! columns, a byte-packed array for widths up to 64, and a pooled array for
//! field-wide columns, where each cell is an index into a shared
//! deduplicating [`Pool`] of field elements.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use plonky2::field::types::{Field, PrimeField64};

/// Append-only deduplicating store of field elements. Inserting a value
/// returns its index; inserting a duplicate returns the existing index.
#[derive(Debug, Default)]
pub struct Pool<F> {
    values: Vec<F>,
    index: HashMap<u64, u32>,
}

impl<F: PrimeField64> Pool<F> {
    pub fn insert(&mut self, value: F) -> u32 {
        let key = value.to_canonical_u64();
        if let Some(&at) = self.index.get(&key) {
            return at;
        }
        let at = u32::try_from(self.values.len()).expect("pool overflow");
        self.values.push(value);
        self.index.insert(key, at);
        at
    }

    #[must_use]
    pub fn get(&self, at: u32) -> F { self.values[at as usize] }

    #[must_use]
    pub fn len(&self) -> usize { self.values.len() }

    #[must_use]
    pub fn is_empty(&self) -> bool { self.values.is_empty() }
}

/// A pool shared by all pooled columns of one trace.
pub type SharedPool<F> = Rc<RefCell<Pool<F>>>;

#[derive(Debug, Clone)]
enum Backing<F> {
    Bits { words: Vec<u64>, len: usize },
    Bytes { cell_bytes: usize, data: Vec<u8>, len: usize },
    Pooled { cells: Vec<u32>, pool: SharedPool<F> },
}

/// A column of field elements of fixed length, plus the padding value
/// returned for reads outside `[0, len)`.
#[derive(Debug, Clone)]
pub struct Column<F> {
    backing: Backing<F>,
    bit_width: Option<u32>,
    padding: F,
}

impl<F: PrimeField64> Column<F> {
    #[must_use]
    pub fn len(&self) -> usize {
        match &self.backing {
            Backing::Bits { len, .. } | Backing::Bytes { len, .. } => *len,
            Backing::Pooled { cells, .. } => cells.len(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool { self.len() == 0 }

    /// Declared width in bits; `None` means field-wide.
    #[must_use]
    pub fn bit_width(&self) -> Option<u32> { self.bit_width }

    #[must_use]
    pub fn padding(&self) -> F { self.padding }

    pub fn set_padding(&mut self, padding: F) { self.padding = padding; }

    /// Reads outside `[0, len)` return the padding value; this is the only
    /// well-defined out-of-bounds semantics.
    #[must_use]
    pub fn get(&self, row: isize) -> F {
        let Ok(row) = usize::try_from(row) else {
            return self.padding;
        };
        if row >= self.len() {
            return self.padding;
        }
        match &self.backing {
            Backing::Bits { words, .. } => {
                let bit = words[row / 64] >> (row % 64) & 1;
                F::from_canonical_u64(bit)
            }
            Backing::Bytes {
                cell_bytes, data, ..
            } => {
                let mut raw = [0u8; 8];
                raw[..*cell_bytes].copy_from_slice(&data[row * cell_bytes..(row + 1) * cell_bytes]);
                F::from_canonical_u64(u64::from_le_bytes(raw))
            }
            Backing::Pooled { cells, pool } => pool.borrow().get(cells[row]),
        }
    }

    /// # Panics
    /// If `row` is out of bounds, or (in debug builds) when `value` does not
    /// fit the column's declared width. Assignments validate widths before
    /// writing.
    pub fn set(&mut self, row: usize, value: F) {
        match &mut self.backing {
            Backing::Bits { words, len } => {
                assert!(row < *len);
                let raw = value.to_canonical_u64();
                debug_assert!(raw <= 1, "non-bit value in 1-bit column");
                let mask = 1u64 << (row % 64);
                if raw == 1 {
                    words[row / 64] |= mask;
                } else {
                    words[row / 64] &= !mask;
                }
            }
            Backing::Bytes {
                cell_bytes,
                data,
                len,
            } => {
                assert!(row < *len);
                let raw = value.to_canonical_u64();
                debug_assert!(
                    *cell_bytes == 8 || raw >> (cell_bytes.saturating_mul(8)) == 0,
                    "value too wide for byte-packed column"
                );
                data[row * *cell_bytes..(row + 1) * *cell_bytes]
                    .copy_from_slice(&raw.to_le_bytes()[..*cell_bytes]);
            }
            Backing::Pooled { cells, pool } => {
                cells[row] = pool.borrow_mut().insert(value);
            }
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = F> + '_ {
        (0..self.len()).map(|row| self.get(row as isize))
    }
}

/// Creates zero-initialised columns with the backing appropriate for their
/// width.
#[derive(Debug, Clone)]
pub struct ColumnBuilder<F> {
    pool: SharedPool<F>,
}

impl<F: PrimeField64> ColumnBuilder<F> {
    #[must_use]
    pub fn new(pool: SharedPool<F>) -> Self { ColumnBuilder { pool } }

    #[must_use]
    pub fn build(&self, bit_width: Option<u32>, len: usize, padding: F) -> Column<F> {
        let backing = match bit_width {
            Some(1) => Backing::Bits {
                words: vec![0; len.div_ceil(64)],
                len,
            },
            Some(width) if width <= 64 => {
                let cell_bytes = (width as usize).div_ceil(8);
                Backing::Bytes {
                    cell_bytes,
                    data: vec![0; len * cell_bytes],
                    len,
                }
            }
            // Field-wide, or wider than a word: indices into the shared pool.
            _ => {
                let zero = self.pool.borrow_mut().insert(F::ZERO);
                Backing::Pooled {
                    cells: vec![zero; len],
                    pool: Rc::clone(&self.pool),
                }
            }
        };
        Column {
            backing,
            bit_width,
            padding,
        }
    }

    #[must_use]
    pub fn from_values(&self, bit_width: Option<u32>, values: &[F], padding: F) -> Column<F> {
        let mut column = self.build(bit_width, values.len(), padding);
        for (row, &value) in values.iter().enumerate() {
            column.set(row, value);
        }
        column
    }
}

#[cfg(test)]
mod tests {
    use plonky2::field::goldilocks_field::GoldilocksField;
    use plonky2::field::types::Field;

    use super::*;

    type F = GoldilocksField;

    fn builder() -> ColumnBuilder<F> { ColumnBuilder::new(SharedPool::default()) }

    #[test]
    fn pool_deduplicates() {
        let mut pool = Pool::<F>::default();
        let a = pool.insert(F::from_canonical_u64(7));
        let b = pool.insert(F::from_canonical_u64(8));
        let c = pool.insert(F::from_canonical_u64(7));
        assert_eq!(a, c);
        assert_ne!(a, b);
        assert_eq!(pool.len(), 2);
    }

    #[test]
    fn all_backings_round_trip() {
        for (width, values) in [
            (Some(1), vec![1u64, 0, 1, 1, 0]),
            (Some(8), vec![0, 255, 17, 3, 254]),
            (Some(17), vec![0, 1 << 16, 99_999]),
            (Some(64), vec![(1 << 63) + 17, 5]),
            (None, vec![3, 0, u32::MAX as u64]),
        ] {
            let values: Vec<F> = values.into_iter().map(F::from_canonical_u64).collect();
            let column = builder().from_values(width, &values, F::ZERO);
            assert_eq!(column.len(), values.len());
            for (row, &expected) in values.iter().enumerate() {
                assert_eq!(column.get(row as isize), expected, "width {width:?} row {row}");
            }
        }
    }

    #[test]
    fn out_of_bounds_reads_return_padding() {
        let padding = F::from_canonical_u64(42);
        let column = builder().from_values(Some(8), &[F::ONE, F::TWO], padding);
        assert_eq!(column.get(-1), padding);
        assert_eq!(column.get(2), padding);
        assert_eq!(column.get(0), F::ONE);
    }

    #[test]
    fn pooled_columns_share_one_pool() {
        let pool = SharedPool::<F>::default();
        let builder = ColumnBuilder::new(Rc::clone(&pool));
        let v = F::from_canonical_u64(1234);
        let _a = builder.from_values(None, &[v, v], F::ZERO);
        let _b = builder.from_values(None, &[v], F::ZERO);
        // 0 (zero-fill) and 1234, deduplicated across both columns.
        assert_eq!(pool.borrow().len(), 2);
    }
}

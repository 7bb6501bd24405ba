//! Little-endian byte decomposition of one register into limb columns.

use plonky2::field::types::{Field, PrimeField64};
use trellis_expr::RegisterId;

use crate::array::Column;
use crate::error::ExpansionError;
use crate::schema::Schema;
use crate::trace::Trace;

/// Split `value` into little-endian limbs of the given widths. Bits beyond
/// the summed widths are discarded.
#[must_use]
pub fn split_le(value: u64, widths: &[u32]) -> Vec<u64> {
    let mut shift = 0u32;
    widths
        .iter()
        .map(|&width| {
            let limb = if shift >= 64 {
                0
            } else {
                let mask = if width >= 64 { u64::MAX } else { (1 << width) - 1 };
                (value >> shift) & mask
            };
            shift += width;
            limb
        })
        .collect()
}

pub(crate) fn compute<F: PrimeField64>(
    schema: &Schema<F>,
    trace: &Trace<F>,
    src: RegisterId,
    targets: &[RegisterId],
) -> Result<Vec<Column<F>>, ExpansionError> {
    let source = trace.column(src).expect("decomposition source is populated");
    let height = source.len();
    let widths: Vec<u32> = targets
        .iter()
        .map(|&target| {
            schema
                .register(target)
                .expect("targets are allocated ids")
                .width
                .expect("decomposition limbs always carry a width")
        })
        .collect();
    let total: u32 = widths.iter().sum();

    let builder = trace.builder();
    let limb_paddings = split_le(source.padding().to_canonical_u64(), &widths);
    let mut columns: Vec<Column<F>> = widths
        .iter()
        .zip(&limb_paddings)
        .map(|(&width, &padding)| {
            builder.build(Some(width), height, F::from_canonical_u64(padding))
        })
        .collect();

    for row in 0..height {
        let value = source.get(row as isize).to_canonical_u64();
        if total < 64 && value >> total != 0 {
            let src_register = schema.register(src).expect("known register");
            return Err(ExpansionError::ValueOutOfBounds {
                module: schema
                    .module(src_register.module)
                    .expect("known module")
                    .name
                    .clone(),
                register: src_register.name.clone(),
                row,
                value,
                width: total,
                expr: format!("(decompose {})", src_register.name),
            });
        }
        for (column, limb) in columns.iter_mut().zip(split_le(value, &widths)) {
            column.set(row, F::from_canonical_u64(limb));
        }
    }
    Ok(columns)
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn splits_258_into_two_bytes() {
        assert_eq!(split_le(258, &[8, 8]), vec![2, 1]);
    }

    #[test]
    fn top_limb_may_be_narrow() {
        // 12-bit value into a byte limb and a 4-bit limb.
        assert_eq!(split_le(0xabc, &[8, 4]), vec![0xbc, 0xa]);
    }

    proptest! {
        /// Decomposing and recombining yields the value modulo the summed
        /// widths.
        #[test]
        fn round_trips_modulo_total_width(value: u64, widths in prop::collection::vec(1u32..=16, 1..=6)) {
            let limbs = split_le(value, &widths);
            let total: u32 = widths.iter().sum();
            let mut recombined = 0u64;
            let mut shift = 0u32;
            for (limb, width) in limbs.into_iter().zip(&widths) {
                if shift < 64 {
                    recombined |= limb << shift;
                }
                shift += width;
            }
            let expected = if total >= 64 { value } else { value & ((1 << total) - 1) };
            prop_assert_eq!(recombined, expected);
        }
    }
}

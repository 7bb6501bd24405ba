//! Sorted permutation: per-column permutation of the sources such that the
//! target row tuples come out sorted with per-column signs.

use std::cmp::Ordering;

use plonky2::field::types::PrimeField64;
use trellis_expr::RegisterId;

use crate::array::Column;
use crate::error::ExpansionError;
use crate::schema::Schema;
use crate::trace::Trace;

pub(crate) fn compute<F: PrimeField64>(
    schema: &Schema<F>,
    trace: &Trace<F>,
    signs: &[bool],
    sources: &[RegisterId],
    targets: &[RegisterId],
) -> Result<Vec<Column<F>>, ExpansionError> {
    let height = trace
        .column(sources[0])
        .expect("sort sources are populated")
        .len();

    // Canonicalize once upfront; comparing canonical u64s is much cheaper
    // than comparing field elements per probe.
    let keys: Vec<Vec<u64>> = sources
        .iter()
        .map(|&source| {
            trace
                .column(source)
                .expect("sort sources are populated")
                .iter()
                .map(|value| value.to_canonical_u64())
                .collect()
        })
        .collect();

    let mut order: Vec<usize> = (0..height).collect();
    order.sort_unstable_by(|&left, &right| {
        for (column, &ascending) in keys.iter().zip(signs) {
            let by_column = column[left].cmp(&column[right]);
            let by_column = if ascending {
                by_column
            } else {
                by_column.reverse()
            };
            if by_column != Ordering::Equal {
                return by_column;
            }
        }
        // Equal rows keep their original relative order, which makes the
        // permutation deterministic.
        left.cmp(&right)
    });

    let builder = trace.builder();
    let columns = sources
        .iter()
        .zip(targets)
        .map(|(&source, &target)| {
            let from = trace.column(source).expect("sort sources are populated");
            let width = schema.register(target).expect("allocated id").width;
            let mut column = builder.build(width, height, from.padding());
            for (row, &at) in order.iter().enumerate() {
                column.set(row, from.get(at as isize));
            }
            column
        })
        .collect();
    Ok(columns)
}

//! Witness columns for lexicographic order: a delta column and one
//! selector bit per source, marking the first column that changed between
//! consecutive rows.

use plonky2::field::types::{Field, PrimeField64};
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

    let builder = trace.builder();
    let delta_width = schema.register(targets[0]).expect("allocated id").width;
    let mut delta = builder.build(delta_width, height, F::ZERO);
    let mut selectors: Vec<Column<F>> = targets[1..]
        .iter()
        .map(|_| builder.build(Some(1), height, F::ZERO))
        .collect();

    // Row 0 stays all zero.
    for row in 1..height {
        let Some(changed) = keys.iter().position(|column| column[row] != column[row - 1])
        else {
            continue;
        };
        selectors[changed].set(row, F::ONE);
        let (current, previous) = (keys[changed][row], keys[changed][row - 1]);
        let difference = if signs[changed] {
            current.checked_sub(previous)
        } else {
            previous.checked_sub(current)
        };
        // A negative difference means the sort order is violated; store zero
        // and let the delta bit-width constraint surface the violation.
        if let Some(difference) = difference {
            delta.set(row, F::from_canonical_u64(difference));
        }
    }

    let mut columns = vec![delta];
    columns.append(&mut selectors);
    Ok(columns)
}

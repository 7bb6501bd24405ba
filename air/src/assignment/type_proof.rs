//! Shared per-width type-proof tables.
//!
//! The table's value column covers every value of every accumulated source
//! register (gated by the source's selector), plus zero, sorted and
//! deduplicated; the limb columns split each value for the recursive
//! bitwidth argument.

use std::collections::BTreeSet;

use plonky2::field::types::{Field, PrimeField64};
use trellis_expr::{RegisterId, Term};

use crate::array::Column;
use crate::assignment::TypeProofSource;
use crate::error::ExpansionError;
use crate::schema::Schema;
use crate::trace::Trace;

pub(crate) fn compute<F: PrimeField64>(
    schema: &Schema<F>,
    trace: &Trace<F>,
    width: u32,
    sources: &[TypeProofSource<F>],
    targets: &[RegisterId],
) -> Result<Vec<Column<F>>, ExpansionError> {
    // Zero is always covered: padding rows and gated-out rows hold it.
    let mut values: BTreeSet<u64> = BTreeSet::from([0]);
    for source in sources {
        let column = trace
            .column(source.reg)
            .expect("type-proof sources are populated");
        for row in 0..column.len() {
            let selected = source
                .selector
                .as_ref()
                .map_or(true, |sel: &Term<F>| !sel.eval_at(row as isize, trace).is_zero());
            if selected {
                values.insert(column.get(row as isize).to_canonical_u64());
            }
        }
    }

    let height = values.len();
    let builder = trace.builder();
    let v_register = schema.register(targets[0]).expect("allocated id");
    let w_lo = schema
        .register(targets[1])
        .expect("allocated id")
        .width
        .expect("proof limbs carry widths");
    let w_hi = schema
        .register(targets[2])
        .expect("allocated id")
        .width
        .expect("proof limbs carry widths");

    let mut v = builder.build(v_register.width, height, F::ZERO);
    let mut v_lo = builder.build(Some(w_lo), height, F::ZERO);
    let mut v_hi = builder.build(Some(w_hi), height, F::ZERO);
    for (row, value) in values.into_iter().enumerate() {
        if width < 64 && value >> width != 0 {
            return Err(ExpansionError::ValueOutOfBounds {
                module: schema
                    .module(v_register.module)
                    .expect("known module")
                    .name
                    .clone(),
                register: v_register.name.clone(),
                row,
                value,
                width,
                expr: format!("(type-proof u{width})"),
            });
        }
        v.set(row, F::from_canonical_u64(value));
        let mask = if w_lo >= 64 { u64::MAX } else { (1 << w_lo) - 1 };
        v_lo.set(row, F::from_canonical_u64(value & mask));
        v_hi.set(row, F::from_canonical_u64(value >> w_lo));
    }
    Ok(vec![v, v_lo, v_hi])
}

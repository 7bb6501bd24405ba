//! Pseudo-inverse of an expression, batch-inverted.

use plonky2::field::types::{Field, PrimeField64};
use trellis_expr::{FnReader, RegisterId, Term};

use crate::array::Column;
use crate::error::ExpansionError;
use crate::schema::{ModuleId, Schema};
use crate::trace::Trace;

pub(crate) fn compute<F: PrimeField64>(
    schema: &Schema<F>,
    trace: &Trace<F>,
    module: ModuleId,
    expr: &Term<F>,
    target: RegisterId,
) -> Result<Vec<Column<F>>, ExpansionError> {
    let module_name = &schema.module(module).expect("known module").name;
    let height = trace
        .height(module)
        .ok_or_else(|| ExpansionError::UndeterminedHeight(module_name.clone()))?;

    let values: Vec<F> = (0..height)
        .map(|row| expr.eval_at(row as isize, trace))
        .collect();

    // Montgomery-batch the nonzero entries; inv(0) stays 0.
    let nonzero: Vec<F> = values.iter().copied().filter(|v| !v.is_zero()).collect();
    let mut inverted = F::batch_multiplicative_inverse(&nonzero).into_iter();
    let inverses: Vec<F> = values
        .iter()
        .map(|v| {
            if v.is_zero() {
                F::ZERO
            } else {
                inverted.next().expect("one inverse per nonzero value")
            }
        })
        .collect();

    let padding = expr
        .eval_at(0, &FnReader(|reg: RegisterId, _row: isize| trace.padding_of(reg)))
        .try_inverse()
        .unwrap_or(F::ZERO);
    let width = schema.register(target).expect("allocated id").width;
    Ok(vec![trace.builder().from_values(width, &inverses, padding)])
}

#[cfg(test)]
mod tests {
    use plonky2::field::goldilocks_field::GoldilocksField;
    use plonky2::field::types::{Field, Field64};
    use proptest::prelude::*;
    use trellis_expr::Term;

    use crate::assignment::AssignmentKind;
    use crate::expander::expand;
    use crate::schema::{RegisterDecl, Schema};
    use crate::trace::InputTrace;

    type F = GoldilocksField;

    proptest! {
        /// For every cell: either `e = 0` and `inv_e = 0`, or `e · inv_e = 1`.
        #[test]
        fn inverse_or_zero(values in prop::collection::vec(any::<u64>(), 1..32)) {
            let mut schema = Schema::<F>::new();
            let m = schema.add_module("m").unwrap();
            let e = schema.add_input_register(m, "e", None).unwrap();
            let inv = schema
                .add_assignment(
                    m,
                    vec![RegisterDecl::field_wide("e:inv")],
                    AssignmentKind::PseudoInverse { expr: Term::register(e) },
                )
                .unwrap();

            let mut inputs = InputTrace::new();
            inputs.set(
                "m",
                "e",
                values.iter().map(|&v| F::from_noncanonical_u64(v)).collect::<Vec<_>>(),
            );
            let trace = expand(&schema, &inputs).unwrap();

            for row in 0..values.len() as isize {
                let value = trace.get(e, row);
                let inverse = trace.get(inv, row);
                if value.is_zero() {
                    prop_assert_eq!(inverse, F::ZERO);
                } else {
                    prop_assert_eq!(value * inverse, F::ONE);
                }
            }
        }
    }
}

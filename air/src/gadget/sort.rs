//! Single-column sort: witness the consecutive difference and bound its
//! width, so the column is monotone in the chosen direction.

use plonky2::field::types::PrimeField64;
use trellis_expr::{RegisterId, Term};

use crate::assignment::{AssignmentKind, Direction};
use crate::error::SchemaError;
use crate::gadget::{bitwidth, gate, BitwidthConfig};
use crate::schema::{Handle, RegisterDecl, Schema};

/// Returns the register id of the delta column (`+X` or `-X` by sign).
pub(crate) fn apply<F: PrimeField64>(
    schema: &mut Schema<F>,
    reg: RegisterId,
    sign: bool,
    width: u32,
    strict: bool,
    selector: Option<&Term<F>>,
) -> Result<RegisterId, SchemaError> {
    let register = schema.register(reg)?;
    let module = register.module;
    let module_name = schema.module(module)?.name.clone();
    let delta_name = format!("{}{}", if sign { '+' } else { '-' }, register.name);
    if let Some(existing) = schema.lookup_register(module, &delta_name) {
        return Ok(existing);
    }

    let current = Term::register(reg);
    let previous = Term::shifted(reg, -1);
    let mut difference = if sign {
        current - previous
    } else {
        previous - current
    };
    if strict {
        difference = difference - 1;
    }

    // The delta column is field-wide on purpose: an unsorted input wraps the
    // difference around the modulus, which then fails the width constraint
    // at checking time instead of crashing expansion.
    let delta = schema.add_assignment(
        module,
        vec![RegisterDecl::field_wide(delta_name.clone())],
        AssignmentKind::Computed {
            expr: gate(selector, difference.clone()),
            direction: Direction::Forward,
            recursive: false,
        },
    )?;
    bitwidth::apply(schema, delta, width, selector, &BitwidthConfig::default())?;
    schema.add_vanishing(
        Handle::new(module_name, delta_name),
        None,
        gate(selector, Term::register(delta) - difference),
    )?;
    Ok(delta)
}

#[cfg(test)]
mod tests {
    use plonky2::field::goldilocks_field::GoldilocksField;
    use plonky2::field::types::Field;

    use crate::schema::Schema;

    type F = GoldilocksField;

    #[test]
    fn reuses_the_delta_column() {
        let mut schema = Schema::<F>::new();
        let m = schema.add_module("m").unwrap();
        let x = schema.add_input_register(m, "x", Some(8)).unwrap();
        let first = schema.apply_column_sort(x, true, 8, false, None).unwrap();
        let constraints = schema.constraints().count();
        let second = schema.apply_column_sort(x, true, 8, false, None).unwrap();
        assert_eq!(first, second);
        assert_eq!(schema.constraints().count(), constraints);
        assert_eq!(schema.lookup_register(m, "+x"), Some(first));
    }

    #[test]
    fn ascending_and_descending_columns_coexist() {
        let mut schema = Schema::<F>::new();
        let m = schema.add_module("m").unwrap();
        let x = schema.add_input_register(m, "x", Some(8)).unwrap();
        let up = schema.apply_column_sort(x, true, 8, false, None).unwrap();
        let down = schema.apply_column_sort(x, false, 8, false, None).unwrap();
        assert_ne!(up, down);
        assert_eq!(schema.lookup_register(m, "-x"), Some(down));
    }
}

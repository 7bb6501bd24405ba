//! Expand an expression into a named column, for the places (lookup and
//! permutation sources) that only accept plain register accesses at AIR
//! level.

use plonky2::field::types::PrimeField64;
use trellis_expr::Term;

use crate::assignment::{AssignmentKind, Direction};
use crate::error::SchemaError;
use crate::gadget::normalize::home_module;
use crate::schema::{Handle, RegisterDecl, Schema};

pub(crate) fn apply<F: PrimeField64>(
    schema: &mut Schema<F>,
    expr: &Term<F>,
) -> Result<trellis_expr::RegisterId, SchemaError> {
    // A zero-shift register access already is a column.
    if let Term::Register { reg, shift: 0 } = expr {
        return Ok(*reg);
    }
    let module = home_module(schema, expr)?;
    let module_name = schema.module(module)?.name.clone();
    let name = expr.lisp(schema);
    if let Some(existing) = schema.lookup_register(module, &name) {
        return Ok(existing);
    }

    let column = schema.add_assignment(
        module,
        vec![RegisterDecl::field_wide(name.clone())],
        AssignmentKind::Computed {
            expr: expr.clone(),
            direction: Direction::Forward,
            recursive: false,
        },
    )?;
    schema.add_vanishing(
        Handle::new(module_name, name),
        None,
        Term::register(column) - expr.clone(),
    )?;
    Ok(column)
}

#[cfg(test)]
mod tests {
    use plonky2::field::goldilocks_field::GoldilocksField;
    use plonky2::field::types::Field;
    use trellis_expr::Term;

    use crate::schema::Schema;

    type F = GoldilocksField;

    #[test]
    fn plain_accesses_pass_through() {
        let mut schema = Schema::<F>::new();
        let m = schema.add_module("m").unwrap();
        let x = schema.add_input_register(m, "x", None).unwrap();
        assert_eq!(schema.expand_to_column(&Term::register(x)).unwrap(), x);
        assert_eq!(schema.constraints().count(), 0);
    }

    #[test]
    fn compound_expressions_get_a_column_once() {
        let mut schema = Schema::<F>::new();
        let m = schema.add_module("m").unwrap();
        let x = schema.add_input_register(m, "x", None).unwrap();
        let expr = Term::register(x) * 2 + 1;
        let first = schema.expand_to_column(&expr).unwrap();
        let second = schema.expand_to_column(&expr).unwrap();
        assert_eq!(first, second);
        assert_ne!(first, x);
        assert_eq!(schema.constraints().count(), 1);
    }
}

//! Normalisation: turn an arbitrary expression into its 0/1 indicator.
//!
//! Allocates a pseudo-inverse column for `e` and pins it down with
//! `e · (1 − e·inv_e) = 0` and `inv_e · (1 − e·inv_e) = 0`; the returned
//! term `e · inv_e` is zero exactly when `e` is zero and one otherwise.

use plonky2::field::types::PrimeField64;
use trellis_expr::Term;

use crate::assignment::AssignmentKind;
use crate::error::SchemaError;
use crate::schema::{Handle, ModuleId, RegisterDecl, Schema};

pub(crate) fn apply<F: PrimeField64>(
    schema: &mut Schema<F>,
    expr: &Term<F>,
) -> Result<Term<F>, SchemaError> {
    let module = home_module(schema, expr)?;
    let module_name = schema.module(module)?.name.clone();
    // The canonical rendering names the column, which is what makes a second
    // normalisation of the same expression reuse the first one.
    let name = format!("{}:inv", expr.lisp(schema));

    let inverse = match schema.lookup_register(module, &name) {
        Some(existing) => existing,
        None => {
            let inverse = schema.add_assignment(
                module,
                vec![RegisterDecl::field_wide(name.clone())],
                AssignmentKind::PseudoInverse { expr: expr.clone() },
            )?;
            let normalised = expr.clone() * Term::register(inverse);
            schema.add_vanishing(
                Handle::new(module_name.clone(), format!("{name}:left")),
                None,
                expr.clone() * (1 - normalised.clone()),
            )?;
            schema.add_vanishing(
                Handle::new(module_name, format!("{name}:right")),
                None,
                Term::register(inverse) * (1 - normalised),
            )?;
            inverse
        }
    };
    Ok(expr.clone() * Term::register(inverse))
}

/// The single module an expression's registers live in.
pub(crate) fn home_module<F: PrimeField64>(
    schema: &Schema<F>,
    expr: &Term<F>,
) -> Result<ModuleId, SchemaError> {
    let mut module = None;
    for reg in expr.required_registers() {
        let home = schema.register(reg)?.module;
        match module {
            None => module = Some(home),
            Some(expected) if expected != home => return Err(SchemaError::MixedModules),
            Some(_) => {}
        }
    }
    module.ok_or(SchemaError::NoRegisters)
}

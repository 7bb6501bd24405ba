//! Binarity: `X · (X − 1) = 0`.

use plonky2::field::types::PrimeField64;
use trellis_expr::{RegisterId, Term};

use crate::error::SchemaError;
use crate::gadget::gate;
use crate::schema::{Handle, Schema};

pub(crate) fn apply<F: PrimeField64>(
    schema: &mut Schema<F>,
    reg: RegisterId,
    selector: Option<&Term<F>>,
) -> Result<(), SchemaError> {
    let register = schema.register(reg)?;
    let module = schema.module(register.module)?.name.clone();
    let handle = Handle::new(module, format!("{}:u1", register.name));
    if schema.has_handle(&handle) {
        return Ok(());
    }
    let expr = gate(selector, Term::register(reg).is_binary());
    schema.add_vanishing(handle, None, expr)
}

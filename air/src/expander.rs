//! Dependency-ordered execution of assignments over an input trace.

use log::debug;
use plonky2::field::types::{Field, PrimeField64};

use crate::error::{ConsistencyError, ExpansionError};
use crate::schema::{RegisterKind, Schema};
use crate::trace::{InputTrace, Trace};

/// Expand `inputs` into a complete trace. On failure the partial trace is
/// dropped; use [`expand_partial`] to keep it for debugging.
pub fn expand<F: PrimeField64>(
    schema: &Schema<F>,
    inputs: &InputTrace<F>,
) -> Result<Trace<F>, ExpansionError> {
    let (trace, outcome) = expand_partial(schema, inputs);
    outcome.map(|()| trace)
}

/// Expand `inputs`, stopping at the first error but returning whatever
/// columns were filled up to that point.
pub fn expand_partial<F: PrimeField64>(
    schema: &Schema<F>,
    inputs: &InputTrace<F>,
) -> (Trace<F>, Result<(), ExpansionError>) {
    let mut trace = Trace::new(schema);
    let outcome = run(schema, inputs, &mut trace);
    (trace, outcome)
}

fn run<F: PrimeField64>(
    schema: &Schema<F>,
    inputs: &InputTrace<F>,
    trace: &mut Trace<F>,
) -> Result<(), ExpansionError> {
    for rid in schema.register_ids() {
        let register = schema.register(rid).expect("ids enumerate the table");
        if register.kind != RegisterKind::Input {
            continue;
        }
        let module = &schema.module(register.module).expect("known module").name;
        let input = inputs.get(module, &register.name).ok_or_else(|| {
            ExpansionError::MissingInput {
                module: module.clone(),
                register: register.name.clone(),
            }
        })?;
        // Padding precedence: schema declaration, explicit input padding,
        // the value at row 0.
        let padding = register
            .padding
            .or(input.padding)
            .or_else(|| input.values.first().copied())
            .unwrap_or(F::ZERO);
        let column = trace
            .builder()
            .from_values(register.width, &input.values, padding);
        trace.install(schema, rid, column)?;
    }

    let order = schema.toposort_assignments().map_err(|error| match error {
        ConsistencyError::AssignmentCycle(label) => ExpansionError::Cycle(label),
        other => ExpansionError::Cycle(other.to_string()),
    })?;

    for aid in order {
        let assignment = schema.assignment(aid);
        debug!("computing {}", assignment.lisp(schema));
        let columns = assignment.compute(schema, trace)?;
        for (&rid, column) in assignment.targets.iter().zip(columns) {
            trace.install(schema, rid, column)?;
        }
    }
    Ok(())
}

//! Lexicographic sort of several columns, witnessed by a delta column and
//! one selector bit per source.

use plonky2::field::types::PrimeField64;
use trellis_expr::{RegisterId, Term};

use crate::assignment::AssignmentKind;
use crate::error::SchemaError;
use crate::gadget::{binarity, bitwidth, normalize, BitwidthConfig};
use crate::schema::{Handle, RegisterDecl, Schema};

pub(crate) fn apply<F: PrimeField64>(
    schema: &mut Schema<F>,
    regs: &[RegisterId],
    signs: &[bool],
    width: u32,
) -> Result<(), SchemaError> {
    if signs.len() != regs.len() || regs.is_empty() {
        return Err(SchemaError::SignCountMismatch {
            signs: signs.len(),
            columns: regs.len(),
        });
    }
    let module = schema.register(regs[0])?.module;
    for &reg in &regs[1..] {
        if schema.register(reg)?.module != module {
            return Err(SchemaError::MixedModules);
        }
    }
    let module_name = schema.module(module)?.name.clone();
    let prefix = {
        let names: Vec<_> = regs
            .iter()
            .map(|&reg| schema.register(reg).map(|register| register.name.clone()))
            .collect::<Result<_, _>>()?;
        names.join("+")
    };
    let delta_name = format!("{prefix}:delta");
    if schema.lookup_register(module, &delta_name).is_some() {
        return Ok(());
    }

    let mut decls = vec![RegisterDecl::field_wide(delta_name)];
    decls.extend(
        (0..regs.len()).map(|at| RegisterDecl::new(format!("{prefix}:mux:{at}"), 1)),
    );
    let delta = schema.add_assignment(module, decls, AssignmentKind::LexicographicSort {
        signs: signs.to_vec(),
        sources: regs.to_vec(),
        bit_width: width,
    })?;
    let selectors: Vec<RegisterId> = (1..=regs.len())
        .map(|at| RegisterId(delta.0 + at))
        .collect();

    for &selector in &selectors {
        binarity::apply(schema, selector, None)?;
    }

    // At most one selector fires per row.
    let any_set: Term<F> = selectors.iter().map(|&s| Term::register(s)).sum();
    schema.add_vanishing(
        Handle::new(module_name.clone(), format!("{prefix}:mux")),
        None,
        any_set.clone() * (any_set - 1),
    )?;

    let mut earlier_or_here = Term::constant(0);
    let mut delta_sum = Term::constant(0);
    for (at, (&reg, &sign)) in regs.iter().zip(signs).enumerate() {
        let selector = Term::register(selectors[at]);
        let difference = Term::register(reg) - Term::shifted(reg, -1);
        earlier_or_here = earlier_or_here + selector.clone();

        // Columns before the first change must repeat their previous value.
        schema.add_vanishing(
            Handle::new(module_name.clone(), format!("{prefix}:prefix:{at}")),
            None,
            (1 - earlier_or_here.clone()) * difference.clone(),
        )?;

        // The selected column must actually change; the normalised
        // difference is 1 exactly when it does.
        let changed = normalize::apply(schema, &difference)?;
        schema.add_vanishing(
            Handle::new(module_name.clone(), format!("{prefix}:strict:{at}")),
            None,
            selector.clone() * (1 - changed),
        )?;

        let signed = if sign {
            difference
        } else {
            Term::shifted(reg, -1) - Term::register(reg)
        };
        delta_sum = delta_sum + selector * signed;
    }

    schema.add_vanishing(
        Handle::new(module_name, format!("{prefix}:delta")),
        None,
        Term::register(delta) - delta_sum,
    )?;
    bitwidth::apply(schema, delta, width, None, &BitwidthConfig::default())?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use plonky2::field::goldilocks_field::GoldilocksField;
    use plonky2::field::types::Field;

    use crate::schema::Schema;

    type F = GoldilocksField;

    #[test]
    fn allocates_delta_and_one_mux_per_source() {
        let mut schema = Schema::<F>::new();
        let m = schema.add_module("m").unwrap();
        let a = schema.add_input_register(m, "a", Some(8)).unwrap();
        let b = schema.add_input_register(m, "b", Some(8)).unwrap();
        schema.apply_lex_sort(&[a, b], &[true, true], 8).unwrap();
        assert!(schema.lookup_register(m, "a+b:delta").is_some());
        assert!(schema.lookup_register(m, "a+b:mux:0").is_some());
        assert!(schema.lookup_register(m, "a+b:mux:1").is_some());
    }

    #[test]
    fn is_idempotent() {
        let mut schema = Schema::<F>::new();
        let m = schema.add_module("m").unwrap();
        let a = schema.add_input_register(m, "a", Some(8)).unwrap();
        let b = schema.add_input_register(m, "b", Some(8)).unwrap();
        schema.apply_lex_sort(&[a, b], &[true, false], 8).unwrap();
        let constraints = schema.constraints().count();
        let registers = schema.register_ids().count();
        schema.apply_lex_sort(&[a, b], &[true, false], 8).unwrap();
        assert_eq!(schema.constraints().count(), constraints);
        assert_eq!(schema.register_ids().count(), registers);
    }
}

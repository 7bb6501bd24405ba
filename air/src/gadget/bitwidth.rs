//! Bitwidth enforcement: `0 ≤ X < 2^w` on every row.
//!
//! Three strategies, chosen by the target width against the configured
//! cutoff: a plain range constraint, horizontal byte decomposition
//! (legacy), or a lookup into a shared per-width type-proof module. Proof
//! modules are singletons named `:u<w>`, created lazily and reused across
//! the whole schema.

use plonky2::field::types::{Field, PrimeField64};
use trellis_expr::{RegisterId, Term};

use crate::assignment::{AssignmentKind, TypeProofSource};
use crate::constraint::RegisterAccess;
use crate::error::SchemaError;
use crate::gadget::{binarity, BitwidthConfig};
use crate::schema::{Handle, RegisterDecl, Schema};

pub(crate) fn apply<F: PrimeField64>(
    schema: &mut Schema<F>,
    reg: RegisterId,
    width: u32,
    selector: Option<&Term<F>>,
    config: &BitwidthConfig,
) -> Result<(), SchemaError> {
    let register = schema.register(reg)?;
    let reg_name = register.name.clone();
    let module = register.module;
    let module_name = schema.module(module)?.name.clone();

    let handle = Handle::new(module_name, format!("{reg_name}:u{width}"));
    if schema.has_handle(&handle) {
        return Ok(());
    }
    if width == 0 {
        return schema.add_vanishing(handle, None, Term::register(reg));
    }
    if width == 1 {
        return binarity::apply(schema, reg, selector);
    }
    if width >= 64 {
        // Every field element already fits; there is nothing to enforce.
        return Ok(());
    }

    // A register whose value domain provably fits a cheap range never needs
    // the lookup machinery, whatever width was asked for.
    let declared = |r: RegisterId| schema.register(r).ok().and_then(|register| register.width);
    let narrow = Term::<F>::register(reg)
        .value_range(&declared)
        .is_some_and(|range| {
            range.fits_width(width) && range.fits_width(config.max_range_width)
        });
    if width <= config.max_range_width || narrow {
        // The bound never exceeds the declared width; a tighter bound still
        // enforces the requested one.
        let exponent = declared(reg).map_or(width, |declared| declared.min(width));
        let bound = F::from_canonical_u64(1 << exponent);
        return schema.add_range(handle, RegisterAccess::new(reg), bound);
    }

    if config.legacy {
        horizontal(schema, reg, &reg_name, width, selector, handle, config)
    } else {
        recursive(schema, reg, width, selector, handle, config)
    }
}

/// Split `X` into byte limbs, range-check each, and pin `X` to the weighted
/// sum of its limbs.
fn horizontal<F: PrimeField64>(
    schema: &mut Schema<F>,
    reg: RegisterId,
    reg_name: &str,
    width: u32,
    selector: Option<&Term<F>>,
    handle: Handle,
    config: &BitwidthConfig,
) -> Result<(), SchemaError> {
    let module = schema.register(reg)?.module;
    let full_limbs = width / 8;
    let top = width % 8;
    let widths: Vec<u32> = (0..full_limbs)
        .map(|_| 8)
        .chain((top > 0).then_some(top))
        .collect();
    let decls: Vec<RegisterDecl<F>> = widths
        .iter()
        .enumerate()
        .map(|(at, &limb_width)| RegisterDecl::new(format!("{reg_name}:{at}"), limb_width))
        .collect();
    let first = schema.add_assignment(
        module,
        decls,
        AssignmentKind::ByteDecomposition { src: reg },
    )?;

    let mut limbs = Vec::with_capacity(widths.len());
    for (at, &limb_width) in widths.iter().enumerate() {
        let limb = RegisterId(first.0 + at);
        apply(schema, limb, limb_width, None, config)?;
        limbs.push(Term::register(limb));
    }
    let recombined = Term::reduce_with_powers(limbs, 256);
    let expr = crate::gadget::gate(selector, Term::register(reg) - recombined);
    schema.add_vanishing(handle, None, expr)
}

/// Look `X` up in the shared `:u<w>` proof module, creating the module on
/// first use.
fn recursive<F: PrimeField64>(
    schema: &mut Schema<F>,
    reg: RegisterId,
    width: u32,
    selector: Option<&Term<F>>,
    handle: Handle,
    config: &BitwidthConfig,
) -> Result<(), SchemaError> {
    let proof_value = ensure_proof_module(schema, width, config)?;
    schema.add_type_proof_source(proof_value, TypeProofSource {
        reg,
        selector: selector.cloned(),
    })?;
    schema.add_lookup(
        handle,
        vec![RegisterAccess::new(reg)],
        vec![RegisterAccess::new(proof_value)],
    )
}

/// The value column of the `:u<width>` proof module. The module holds
/// `V = V_lo + 2^w_lo · V_hi`, with the limbs bounded recursively; base
/// cases terminate in range constraints.
fn ensure_proof_module<F: PrimeField64>(
    schema: &mut Schema<F>,
    width: u32,
    config: &BitwidthConfig,
) -> Result<RegisterId, SchemaError> {
    let module_name = format!(":u{width}");
    if let Some(existing) = schema.module_named(&module_name) {
        return Ok(schema
            .lookup_register(existing, "V")
            .expect("proof modules always hold V"));
    }

    let module = schema.add_module(module_name.clone())?;
    // The low limb takes the largest power of two at most half the width,
    // balancing the recursion depth of the two halves.
    let w_lo = prev_power_of_two(width / 2);
    let w_hi = width - w_lo;
    let storage = |w: u32| (w <= 64).then_some(w);

    let value = schema.add_assignment(
        module,
        vec![
            RegisterDecl {
                name: "V".into(),
                width: storage(width),
                kind: crate::schema::RegisterKind::Computed,
                padding: None,
            },
            RegisterDecl::new("V_lo", w_lo),
            RegisterDecl::new("V_hi", w_hi),
        ],
        AssignmentKind::TypeProof {
            width,
            sources: Vec::new(),
        },
    )?;
    let v_lo = RegisterId(value.0 + 1);
    let v_hi = RegisterId(value.0 + 2);

    let weight = Term::Const(F::TWO.exp_u64(u64::from(w_lo)));
    schema.add_vanishing(
        Handle::new(module_name, format!("V:u{width}")),
        None,
        Term::register(value) - (Term::register(v_lo) + weight * Term::register(v_hi)),
    )?;
    apply(schema, v_lo, w_lo, None, config)?;
    apply(schema, v_hi, w_hi, None, config)?;
    Ok(value)
}

fn prev_power_of_two(n: u32) -> u32 {
    debug_assert!(n > 0);
    1 << (31 - n.leading_zeros())
}

//! Compile-time constraint synthesizers.
//!
//! Gadgets add registers, assignments and constraints to a schema; they
//! never touch traces. Every gadget is idempotent: applying it twice with
//! identical parameters reuses the columns and handles of the first
//! application, which is why the synthesised names must stay stable.

use trellis_expr::Term;

pub mod binarity;
pub mod bitwidth;
pub mod expand;
pub mod lex_sort;
pub mod normalize;
pub mod sort;

/// Strategy knobs for the bitwidth gadget.
#[derive(Debug, Clone)]
pub struct BitwidthConfig {
    /// Widths up to this cutoff are enforced with a single range
    /// constraint.
    pub max_range_width: u32,
    /// Use horizontal byte decomposition instead of shared type-proof
    /// modules for wide registers.
    pub legacy: bool,
}

impl Default for BitwidthConfig {
    fn default() -> Self {
        BitwidthConfig {
            max_range_width: 8,
            legacy: false,
        }
    }
}

pub(crate) fn gate<F: plonky2::field::types::Field>(
    selector: Option<&Term<F>>,
    expr: Term<F>,
) -> Term<F> {
    match selector {
        Some(selector) => selector.clone() * expr,
        None => expr,
    }
}

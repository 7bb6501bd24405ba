//! The constraint taxonomy: vanishing, range, lookup, permutation, plus
//! property assertions checked only informationally.

use serde::{Deserialize, Serialize};
use trellis_expr::{RegisterId, RegisterNames, Term};

use crate::schema::{Handle, ModuleId};

/// A plain register access, the only shape lookups and ranges accept at AIR
/// level. Gadgets expand richer expressions into fresh columns first.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterAccess {
    pub reg: RegisterId,
    pub shift: i32,
}

impl RegisterAccess {
    #[must_use]
    pub fn new(reg: RegisterId) -> Self { RegisterAccess { reg, shift: 0 } }

    #[must_use]
    pub fn shifted(reg: RegisterId, shift: i32) -> Self { RegisterAccess { reg, shift } }

    #[must_use]
    pub fn to_term<F: plonky2::field::types::Field>(self) -> Term<F> {
        Term::Register {
            reg: self.reg,
            shift: self.shift,
        }
    }

    fn lisp(self, names: &impl RegisterNames) -> String {
        let name = names
            .register_name(self.reg)
            .unwrap_or_else(|| self.reg.to_string());
        match self.shift {
            0 => name,
            shift => format!("(shift {name} {shift})"),
        }
    }
}

/// An AIR constraint over one trace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(bound(serialize = "F: Serialize", deserialize = "F: Deserialize<'de>"))]
pub enum Constraint<F> {
    /// `expr` must evaluate to zero at every row, or at the single `domain`
    /// row when one is given (negative domains count from the end).
    Vanishing {
        handle: Handle,
        module: ModuleId,
        domain: Option<i32>,
        expr: Term<F>,
    },
    /// The accessed value must be below `bound` in integer interpretation on
    /// every row.
    Range {
        handle: Handle,
        module: ModuleId,
        access: RegisterAccess,
        bound: F,
    },
    /// Every row tuple of the source columns appears among the row tuples of
    /// the target columns, possibly in a different module.
    Lookup {
        handle: Handle,
        source: Vec<RegisterAccess>,
        target: Vec<RegisterAccess>,
    },
    /// The multiset of source row tuples equals the multiset of target row
    /// tuples, all within one module.
    Permutation {
        handle: Handle,
        module: ModuleId,
        source: Vec<RegisterId>,
        target: Vec<RegisterId>,
    },
}

impl<F: plonky2::field::types::Field> Constraint<F> {
    #[must_use]
    pub fn handle(&self) -> &Handle {
        match self {
            Constraint::Vanishing { handle, .. }
            | Constraint::Range { handle, .. }
            | Constraint::Lookup { handle, .. }
            | Constraint::Permutation { handle, .. } => handle,
        }
    }

    /// Canonical S-expression rendering, used for debugging output.
    pub fn lisp(&self, names: &impl RegisterNames) -> String {
        let reg_name = |reg: &RegisterId| {
            names
                .register_name(*reg)
                .unwrap_or_else(|| reg.to_string())
        };
        match self {
            Constraint::Vanishing {
                handle,
                domain,
                expr,
                ..
            } => match domain {
                Some(domain) => format!("(vanish {handle} {domain} {})", expr.lisp(names)),
                None => format!("(vanish {handle} {})", expr.lisp(names)),
            },
            Constraint::Range {
                handle,
                access,
                bound,
                ..
            } => format!("(range {handle} {} {bound})", access.lisp(names)),
            Constraint::Lookup {
                handle,
                source,
                target,
            } => {
                let side = |accesses: &[RegisterAccess]| {
                    let rendered: Vec<_> = accesses.iter().map(|a| a.lisp(names)).collect();
                    format!("({})", rendered.join(" "))
                };
                format!("(lookup {handle} {} {})", side(source), side(target))
            }
            Constraint::Permutation {
                handle,
                source,
                target,
                ..
            } => {
                let side = |regs: &[RegisterId]| {
                    let rendered: Vec<_> = regs.iter().map(reg_name).collect();
                    format!("({})", rendered.join(" "))
                };
                format!("(permute {handle} {} {})", side(source), side(target))
            }
        }
    }
}

/// An extra sanity property checked in testing; never enforced on the
/// prover side. The predicate must vanish everywhere to hold.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(bound(serialize = "F: Serialize", deserialize = "F: Deserialize<'de>"))]
pub struct PropertyAssertion<F> {
    pub handle: Handle,
    pub module: ModuleId,
    pub predicate: Term<F>,
}

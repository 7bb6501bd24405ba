//! Computed-column engines.
//!
//! Each assignment fills the columns of its target registers from already
//! populated ones. The expander runs them in dependency order; every engine
//! returns freshly allocated columns and never mutates its inputs.

use std::collections::BTreeSet;

use plonky2::field::types::PrimeField64;
use serde::{Deserialize, Serialize};
use trellis_expr::{RegisterId, RegisterNames, ShiftBounds, Term};

use crate::array::Column;
use crate::error::ExpansionError;
use crate::schema::{ModuleId, Schema};
use crate::trace::Trace;

pub mod byte_decomposition;
pub mod computed;
pub mod inverse;
pub mod lexicographic;
pub mod native;
pub mod sorted;
pub mod type_proof;

/// Row-walk order of a computed register.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Forward,
    Backward,
}

/// The fixed set of native helper computations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum NativeFunction {
    Id,
    Interleave,
    Filter,
    MapIf { key_count: usize },
    ChangesWithin { direction: Direction },
    UnchangedWithin { direction: Direction },
    FillWithin { direction: Direction },
}

impl NativeFunction {
    #[must_use]
    pub fn name(&self) -> String {
        let scan = |direction: &Direction| match direction {
            Direction::Forward => "fwd",
            Direction::Backward => "bwd",
        };
        match self {
            NativeFunction::Id => "id".into(),
            NativeFunction::Interleave => "interleave".into(),
            NativeFunction::Filter => "filter".into(),
            NativeFunction::MapIf { .. } => "map-if".into(),
            NativeFunction::ChangesWithin { direction } =>
                format!("{}-changes-within", scan(direction)),
            NativeFunction::UnchangedWithin { direction } =>
                format!("{}-unchanged-within", scan(direction)),
            NativeFunction::FillWithin { direction } =>
                format!("{}-fill-within", scan(direction)),
        }
    }

    /// Expected number of source columns, `None` for variadic functions.
    #[must_use]
    pub fn source_arity(&self) -> Option<usize> {
        match self {
            NativeFunction::Id => Some(1),
            NativeFunction::Interleave | NativeFunction::ChangesWithin { .. } |
            NativeFunction::UnchangedWithin { .. } => None,
            NativeFunction::Filter => Some(2),
            NativeFunction::MapIf { key_count } => Some(2 * key_count + 3),
            NativeFunction::FillWithin { .. } => Some(3),
        }
    }
}

/// One register whose values a shared type-proof table must cover, with the
/// selector gating which of its rows count.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(bound(serialize = "F: Serialize", deserialize = "F: Deserialize<'de>"))]
pub struct TypeProofSource<F> {
    pub reg: RegisterId,
    pub selector: Option<Term<F>>,
}

/// How a set of computed registers is filled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(bound(serialize = "F: Serialize", deserialize = "F: Deserialize<'de>"))]
pub enum AssignmentKind<F> {
    /// Little-endian limbs of `src`; limb widths are the declared widths of
    /// the targets and must sum to the width of `src`.
    ByteDecomposition { src: RegisterId },
    /// Evaluate `expr` row by row in `direction`, splitting the result
    /// MSB-first across the targets' widths. A recursive assignment may read
    /// its own targets at nonzero shifts.
    Computed {
        expr: Term<F>,
        direction: Direction,
        recursive: bool,
    },
    /// Per-column permutation of `sources` such that the target row tuples
    /// are sorted with per-column ascending/descending signs.
    SortedPermutation {
        signs: Vec<bool>,
        sources: Vec<RegisterId>,
    },
    /// Fill the delta and selector-bit witness columns of a lexicographic
    /// sort of `sources`.
    LexicographicSort {
        signs: Vec<bool>,
        sources: Vec<RegisterId>,
        bit_width: u32,
    },
    /// `target[i] = inverse(expr[i])`, with `inv(0) = 0`.
    PseudoInverse { expr: Term<F> },
    /// A named pure helper over whole columns.
    Native {
        function: NativeFunction,
        sources: Vec<RegisterId>,
    },
    /// Shared per-width table of all values to be bounded at `width` bits,
    /// split into a low and a high limb. Bitwidth-gadget invocations
    /// accumulate sources here.
    TypeProof {
        width: u32,
        sources: Vec<TypeProofSource<F>>,
    },
}

/// An assignment bound to its schema-allocated target registers. The module
/// is the one housing the targets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(bound(serialize = "F: Serialize", deserialize = "F: Deserialize<'de>"))]
pub struct Assignment<F> {
    pub module: ModuleId,
    pub targets: Vec<RegisterId>,
    pub kind: AssignmentKind<F>,
}

impl<F: PrimeField64> Assignment<F> {
    /// Registers read when computing, own targets included (the expander
    /// ignores self-reads when building the dependency DAG).
    #[must_use]
    pub fn registers_read(&self) -> BTreeSet<RegisterId> {
        match &self.kind {
            AssignmentKind::ByteDecomposition { src } => BTreeSet::from([*src]),
            AssignmentKind::Computed { expr, .. } | AssignmentKind::PseudoInverse { expr } =>
                expr.required_registers(),
            AssignmentKind::SortedPermutation { sources, .. }
            | AssignmentKind::LexicographicSort { sources, .. }
            | AssignmentKind::Native { sources, .. } => sources.iter().copied().collect(),
            AssignmentKind::TypeProof { sources, .. } => sources
                .iter()
                .flat_map(|source| {
                    let mut regs = source
                        .selector
                        .as_ref()
                        .map(Term::required_registers)
                        .unwrap_or_default();
                    regs.insert(source.reg);
                    regs
                })
                .collect(),
        }
    }

    #[must_use]
    pub fn registers_written(&self) -> &[RegisterId] { &self.targets }

    /// Max row shifts reachable while computing.
    #[must_use]
    pub fn bounds(&self) -> ShiftBounds {
        match &self.kind {
            AssignmentKind::Computed { expr, .. } | AssignmentKind::PseudoInverse { expr } =>
                expr.bounds(),
            AssignmentKind::LexicographicSort { .. } => ShiftBounds::of_shift(-1),
            AssignmentKind::TypeProof { sources, .. } => sources
                .iter()
                .filter_map(|source| source.selector.as_ref())
                .map(Term::bounds)
                .fold(ShiftBounds::default(), ShiftBounds::merge),
            _ => ShiftBounds::default(),
        }
    }

    /// Compute the target columns against a read-only view of the trace.
    pub fn compute(
        &self,
        schema: &Schema<F>,
        trace: &Trace<F>,
    ) -> Result<Vec<Column<F>>, ExpansionError> {
        match &self.kind {
            AssignmentKind::ByteDecomposition { src } =>
                byte_decomposition::compute(schema, trace, *src, &self.targets),
            AssignmentKind::Computed {
                expr,
                direction,
                recursive,
            } => computed::compute(
                schema,
                trace,
                self.module,
                expr,
                *direction,
                *recursive,
                &self.targets,
            ),
            AssignmentKind::SortedPermutation { signs, sources } =>
                sorted::compute(schema, trace, signs, sources, &self.targets),
            AssignmentKind::LexicographicSort {
                signs,
                sources,
                bit_width: _,
            } => lexicographic::compute(schema, trace, signs, sources, &self.targets),
            AssignmentKind::PseudoInverse { expr } =>
                inverse::compute(schema, trace, self.module, expr, self.targets[0]),
            AssignmentKind::Native { function, sources } =>
                native::compute(schema, trace, function, sources, &self.targets),
            AssignmentKind::TypeProof { width, sources } =>
                type_proof::compute(schema, trace, *width, sources, &self.targets),
        }
    }

    /// Canonical S-expression rendering for debugging.
    pub fn lisp(&self, names: &impl RegisterNames) -> String {
        let reg_name = |reg: &RegisterId| {
            names
                .register_name(*reg)
                .unwrap_or_else(|| reg.to_string())
        };
        let group = |regs: &[RegisterId]| {
            let rendered: Vec<_> = regs.iter().map(reg_name).collect();
            format!("({})", rendered.join(" "))
        };
        let sign_group = |signs: &[bool]| {
            let rendered: Vec<_> = signs.iter().map(|&s| if s { "+" } else { "-" }).collect();
            format!("({})", rendered.join(" "))
        };
        let targets = group(&self.targets);
        match &self.kind {
            AssignmentKind::ByteDecomposition { src } =>
                format!("(decompose {targets} {})", reg_name(src)),
            AssignmentKind::Computed {
                expr,
                direction,
                recursive,
            } => {
                let mut flags = String::new();
                if *direction == Direction::Backward {
                    flags.push_str(" :backward");
                }
                if *recursive {
                    flags.push_str(" :recursive");
                }
                format!("(compute {targets} {}{flags})", expr.lisp(names))
            }
            AssignmentKind::SortedPermutation { signs, sources } => format!(
                "(sorted {targets} {} {})",
                sign_group(signs),
                group(sources)
            ),
            AssignmentKind::LexicographicSort { signs, sources, .. } => format!(
                "(lex-sort {targets} {} {})",
                sign_group(signs),
                group(sources)
            ),
            AssignmentKind::PseudoInverse { expr } =>
                format!("(inv {targets} {})", expr.lisp(names)),
            AssignmentKind::Native { function, sources } =>
                format!("({} {targets} {})", function.name(), group(sources)),
            AssignmentKind::TypeProof { width, sources } => {
                let rendered: Vec<_> = sources.iter().map(|s| reg_name(&s.reg)).collect();
                format!("(type-proof u{width} {targets} ({}))", rendered.join(" "))
            }
        }
    }
}

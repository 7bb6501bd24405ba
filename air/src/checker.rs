//! Acceptance checking: run every constraint against an expanded trace and
//! collect all failures, never stopping early.

use std::collections::HashSet;
use std::fmt::{self, Display, Formatter};

use itertools::Itertools;
use plonky2::field::types::{Field, PrimeField64};
use trellis_expr::Term;

use crate::constraint::{Constraint, RegisterAccess};
use crate::schema::{Handle, ModuleId, Schema};
use crate::trace::Trace;

/// Why one constraint failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureKind {
    /// A vanishing expression evaluated to a nonzero value.
    NonZero { value: u64 },
    /// A range-constrained cell was at or above the bound.
    OutOfRange { value: u64, bound: u64 },
    /// A source row tuple is absent from the lookup target.
    MissingTuple { tuple: Vec<u64> },
    /// Source and target row multisets differ.
    PermutationMismatch,
}

/// One constraint failure, located by handle, module and (where it applies)
/// row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Failure {
    pub handle: Handle,
    pub module: String,
    pub row: Option<usize>,
    pub kind: FailureKind,
}

impl Display for Failure {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.handle)?;
        if let Some(row) = self.row {
            write!(f, " at row {row}")?;
        }
        match &self.kind {
            FailureKind::NonZero { value } => write!(f, ": evaluates to {value}"),
            FailureKind::OutOfRange { value, bound } => {
                write!(f, ": {value} is not below {bound}")
            }
            FailureKind::MissingTuple { tuple } => {
                write!(f, ": tuple {tuple:?} not found in target")
            }
            FailureKind::PermutationMismatch => {
                write!(f, ": source and target rows are not a permutation")
            }
        }
    }
}

/// Everything the checker found. Property-assertion failures are reported
/// separately and never make a trace unacceptable.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AcceptanceReport {
    pub failures: Vec<Failure>,
    pub informational: Vec<Failure>,
}

impl AcceptanceReport {
    #[must_use]
    pub fn accepted(&self) -> bool { self.failures.is_empty() }
}

impl Display for AcceptanceReport {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        if self.accepted() {
            write!(f, "all constraints hold")?;
        }
        for failure in &self.failures {
            writeln!(f, "{failure}")?;
        }
        for failure in &self.informational {
            writeln!(f, "(informational) {failure}")?;
        }
        Ok(())
    }
}

/// Check every constraint and assertion of `schema` against `trace`.
pub fn check<F: PrimeField64>(schema: &Schema<F>, trace: &Trace<F>) -> AcceptanceReport {
    let mut report = AcceptanceReport::default();
    for constraint in schema.constraints() {
        match constraint {
            Constraint::Vanishing {
                handle,
                module,
                domain,
                expr,
            } => check_vanishing(
                schema,
                trace,
                handle,
                *module,
                *domain,
                expr,
                &mut report.failures,
            ),
            Constraint::Range {
                handle,
                module,
                access,
                bound,
            } => check_range(
                schema,
                trace,
                handle,
                *module,
                *access,
                *bound,
                &mut report.failures,
            ),
            Constraint::Lookup {
                handle,
                source,
                target,
            } => check_lookup(schema, trace, handle, source, target, &mut report.failures),
            Constraint::Permutation {
                handle,
                module,
                source,
                target,
            } => {
                let source: Vec<_> = source.iter().map(|&reg| RegisterAccess::new(reg)).collect();
                let target: Vec<_> = target.iter().map(|&reg| RegisterAccess::new(reg)).collect();
                let height = trace.height(*module).unwrap_or(0);
                let source_rows = tuples(trace, &source, height).sorted().collect_vec();
                let target_rows = tuples(trace, &target, height).sorted().collect_vec();
                if source_rows != target_rows {
                    report.failures.push(Failure {
                        handle: handle.clone(),
                        module: module_name(schema, *module),
                        row: None,
                        kind: FailureKind::PermutationMismatch,
                    });
                }
            }
        }
    }
    for assertion in schema.assertions() {
        check_vanishing(
            schema,
            trace,
            &assertion.handle,
            assertion.module,
            None,
            &assertion.predicate,
            &mut report.informational,
        );
    }
    report
}

fn module_name<F: PrimeField64>(schema: &Schema<F>, module: ModuleId) -> String {
    schema.module(module).expect("known module").name.clone()
}

fn check_vanishing<F: PrimeField64>(
    schema: &Schema<F>,
    trace: &Trace<F>,
    handle: &Handle,
    module: ModuleId,
    domain: Option<i32>,
    expr: &Term<F>,
    failures: &mut Vec<Failure>,
) {
    let Some(height) = trace.height(module) else {
        return;
    };
    let rows: Vec<usize> = match domain {
        // Only rows where no access leaves the trace are constrained.
        None => {
            let bounds = expr.bounds();
            (bounds.backward as usize..height.saturating_sub(bounds.forward as usize)).collect()
        }
        Some(domain) => {
            let row = if domain >= 0 {
                domain as isize
            } else {
                height as isize + domain as isize
            };
            usize::try_from(row)
                .ok()
                .filter(|&row| row < height)
                .into_iter()
                .collect()
        }
    };
    for row in rows {
        let value = expr.eval_at(row as isize, trace);
        if !value.is_zero() {
            failures.push(Failure {
                handle: handle.clone(),
                module: module_name(schema, module),
                row: Some(row),
                kind: FailureKind::NonZero {
                    value: value.to_canonical_u64(),
                },
            });
        }
    }
}

fn check_range<F: PrimeField64>(
    schema: &Schema<F>,
    trace: &Trace<F>,
    handle: &Handle,
    module: ModuleId,
    access: RegisterAccess,
    bound: F,
    failures: &mut Vec<Failure>,
) {
    let height = trace.height(module).unwrap_or(0);
    let bound = bound.to_canonical_u64();
    for row in 0..height {
        let value = trace
            .get(access.reg, row as isize + access.shift as isize)
            .to_canonical_u64();
        if value >= bound {
            failures.push(Failure {
                handle: handle.clone(),
                module: module_name(schema, module),
                row: Some(row),
                kind: FailureKind::OutOfRange { value, bound },
            });
        }
    }
}

fn check_lookup<F: PrimeField64>(
    schema: &Schema<F>,
    trace: &Trace<F>,
    handle: &Handle,
    source: &[RegisterAccess],
    target: &[RegisterAccess],
    failures: &mut Vec<Failure>,
) {
    let height_of = |accesses: &[RegisterAccess]| {
        let module = schema
            .register(accesses[0].reg)
            .expect("known register")
            .module;
        (module, trace.height(module).unwrap_or(0))
    };
    let (_, target_height) = height_of(target);
    let looked: HashSet<Vec<u64>> = tuples(trace, target, target_height).collect();

    let (source_module, source_height) = height_of(source);
    for (row, tuple) in tuples(trace, source, source_height).enumerate() {
        if !looked.contains(&tuple) {
            failures.push(Failure {
                handle: handle.clone(),
                module: module_name(schema, source_module),
                row: Some(row),
                kind: FailureKind::MissingTuple { tuple },
            });
            // The first missing tuple fails the lookup; the rest add noise.
            return;
        }
    }
}

/// Row tuples in canonical form, one per row, limbs concatenated
/// big-endian in column order.
fn tuples<'a, F: PrimeField64>(
    trace: &'a Trace<F>,
    accesses: &'a [RegisterAccess],
    height: usize,
) -> impl Iterator<Item = Vec<u64>> + 'a {
    (0..height).map(move |row| {
        accesses
            .iter()
            .map(|access| {
                trace
                    .get(access.reg, row as isize + access.shift as isize)
                    .to_canonical_u64()
            })
            .collect()
    })
}

//! Simple library for handling ASTs of AIR terms for ZKP in Rust.
//!
//! A [`Term`] is an arithmetic expression over the cells of a tabular trace:
//! field constants, (shifted) register accesses, n-ary sums, differences and
//! products, and the pseudo-inverse. Terms are owned values; a schema stores
//! them as plain data and the expander/checker evaluate them against column
//! storage through the [`ColumnReader`] trait.

use core::iter::Sum;
use core::ops::{Add, Mul, Neg, Sub};
use std::collections::BTreeSet;
use std::fmt::{self, Display, Formatter};

use plonky2::field::types::{Field, PrimeField64};
use serde::{Deserialize, Serialize};

/// Index of a register in the flat, schema-wide register table.
#[derive(
    Debug, Default, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct RegisterId(pub usize);

impl Display for RegisterId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result { write!(f, "r{}", self.0) }
}

/// How far a term reaches below (`backward`) and above (`forward`) the
/// current row. The expander uses these to determine legal row ranges.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShiftBounds {
    pub backward: u32,
    pub forward: u32,
}

impl ShiftBounds {
    #[must_use]
    pub fn of_shift(shift: i32) -> Self {
        ShiftBounds {
            backward: u32::try_from(-shift).unwrap_or(0),
            forward: u32::try_from(shift).unwrap_or(0),
        }
    }

    #[must_use]
    pub fn merge(self, other: Self) -> Self {
        ShiftBounds {
            backward: self.backward.max(other.backward),
            forward: self.forward.max(other.forward),
        }
    }
}

/// Read access to column data during evaluation.
///
/// Implementors decide what an out-of-bounds `row` means: the trace returns
/// the register's padding value, while the overlay view used by recursive
/// computed registers returns zero.
pub trait ColumnReader<F> {
    fn read(&self, reg: RegisterId, row: isize) -> F;
}

/// Adapter turning a closure into a [`ColumnReader`].
pub struct FnReader<T>(pub T);

impl<F, T> ColumnReader<F> for FnReader<T>
where
    T: Fn(RegisterId, isize) -> F,
{
    fn read(&self, reg: RegisterId, row: isize) -> F { (self.0)(reg, row) }
}

/// Maps register ids back to their names for pretty-printing.
pub trait RegisterNames {
    fn register_name(&self, reg: RegisterId) -> Option<String>;
}

/// Inclusive integer bounds on the values a term can take, given the declared
/// bit-widths of the registers it reads. `None` anywhere means unbounded.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ValueRange {
    pub lo: i128,
    pub hi: i128,
}

impl ValueRange {
    #[must_use]
    pub fn exact(v: i128) -> Self { ValueRange { lo: v, hi: v } }

    /// Whether every possible value lies in `[0, 2^width)`.
    #[must_use]
    pub fn fits_width(&self, width: u32) -> bool {
        self.lo >= 0 && 128 - self.hi.leading_zeros() <= width
    }
}

/// An AIR term.
///
/// All n-ary variants hold at least one argument; the constructors enforce
/// this. `Inverse` denotes the pseudo-inverse (`inv(0) = 0`) and is only
/// legal inside assignments; schema constraint entry points reject it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(bound(serialize = "F: Serialize", deserialize = "F: Deserialize<'de>"))]
pub enum Term<F> {
    Const(F),
    Register { reg: RegisterId, shift: i32 },
    Add(Vec<Term<F>>),
    Sub(Vec<Term<F>>),
    Mul(Vec<Term<F>>),
    Inverse(Box<Term<F>>),
}

impl<F: Field> Term<F> {
    #[must_use]
    pub fn constant(value: i64) -> Self {
        let magnitude = F::from_canonical_u64(value.unsigned_abs());
        Term::Const(if value < 0 { -magnitude } else { magnitude })
    }

    #[must_use]
    pub fn register(reg: RegisterId) -> Self { Term::Register { reg, shift: 0 } }

    #[must_use]
    pub fn shifted(reg: RegisterId, shift: i32) -> Self { Term::Register { reg, shift } }

    /// # Panics
    /// If `args` is empty.
    #[must_use]
    pub fn sum_of(args: Vec<Term<F>>) -> Self {
        assert!(!args.is_empty(), "n-ary terms need at least one argument");
        Term::Add(args)
    }

    /// # Panics
    /// If `args` is empty.
    #[must_use]
    pub fn difference_of(args: Vec<Term<F>>) -> Self {
        assert!(!args.is_empty(), "n-ary terms need at least one argument");
        Term::Sub(args)
    }

    /// # Panics
    /// If `args` is empty.
    #[must_use]
    pub fn product_of(args: Vec<Term<F>>) -> Self {
        assert!(!args.is_empty(), "n-ary terms need at least one argument");
        Term::Mul(args)
    }

    #[must_use]
    pub fn inverse(inner: Term<F>) -> Self { Term::Inverse(Box::new(inner)) }

    /// `x · (x − 1)`: vanishes exactly when `x` is 0 or 1.
    #[must_use]
    pub fn is_binary(self) -> Self { self.clone() * (self - 1) }

    /// Reduce a little-endian sequence of terms into a single term using
    /// powers of `base`.
    ///
    /// For typing convenience, this only works for a non-empty list of terms.
    ///
    /// # Panics
    /// If `terms` is empty.
    #[must_use]
    pub fn reduce_with_powers<I>(terms: I, base: i64) -> Self
    where
        I: IntoIterator<Item = Term<F>>,
        I::IntoIter: DoubleEndedIterator, {
        let mut terms = terms.into_iter().rev().peekable();
        assert!(
            terms.peek().is_some(),
            "at least one term is required for an expression to be reduced"
        );
        let mut sum = Term::constant(0);
        for term in terms {
            sum = sum * base + term;
        }
        sum
    }

    /// Evaluate the term at `row`, reading cells from `columns`.
    ///
    /// Multiplication folds left-to-right and short-circuits on zero: once an
    /// intermediate product is zero the remaining arguments are not read.
    pub fn eval_at(&self, row: isize, columns: &impl ColumnReader<F>) -> F {
        match self {
            Term::Const(v) => *v,
            Term::Register { reg, shift } => columns.read(*reg, row + *shift as isize),
            Term::Add(args) => args.iter().map(|a| a.eval_at(row, columns)).sum(),
            Term::Sub(args) => {
                let mut it = args.iter();
                let first = it.next().expect("n-ary term is non-empty");
                it.fold(first.eval_at(row, columns), |acc, a| {
                    acc - a.eval_at(row, columns)
                })
            }
            Term::Mul(args) => {
                let mut product = F::ONE;
                for a in args {
                    product *= a.eval_at(row, columns);
                    if product.is_zero() {
                        break;
                    }
                }
                product
            }
            Term::Inverse(inner) => {
                let v = inner.eval_at(row, columns);
                v.try_inverse().unwrap_or(F::ZERO)
            }
        }
    }

    /// Max backward/forward shift reachable anywhere in the term.
    #[must_use]
    pub fn bounds(&self) -> ShiftBounds {
        match self {
            Term::Const(_) => ShiftBounds::default(),
            Term::Register { shift, .. } => ShiftBounds::of_shift(*shift),
            Term::Add(args) | Term::Sub(args) | Term::Mul(args) => args
                .iter()
                .map(Term::bounds)
                .fold(ShiftBounds::default(), ShiftBounds::merge),
            Term::Inverse(inner) => inner.bounds(),
        }
    }

    #[must_use]
    pub fn required_registers(&self) -> BTreeSet<RegisterId> {
        let mut out = BTreeSet::new();
        self.collect_registers(&mut out);
        out
    }

    fn collect_registers(&self, out: &mut BTreeSet<RegisterId>) {
        match self {
            Term::Const(_) => {}
            Term::Register { reg, .. } => {
                out.insert(*reg);
            }
            Term::Add(args) | Term::Sub(args) | Term::Mul(args) =>
                args.iter().for_each(|a| a.collect_registers(out)),
            Term::Inverse(inner) => inner.collect_registers(out),
        }
    }

    /// The specific cells touched when evaluating at `row`.
    #[must_use]
    pub fn required_cells(&self, row: isize) -> BTreeSet<(RegisterId, isize)> {
        let mut out = BTreeSet::new();
        self.collect_cells(row, &mut out);
        out
    }

    fn collect_cells(&self, row: isize, out: &mut BTreeSet<(RegisterId, isize)>) {
        match self {
            Term::Const(_) => {}
            Term::Register { reg, shift } => {
                out.insert((*reg, row + *shift as isize));
            }
            Term::Add(args) | Term::Sub(args) | Term::Mul(args) =>
                args.iter().for_each(|a| a.collect_cells(row, out)),
            Term::Inverse(inner) => inner.collect_cells(row, out),
        }
    }

    /// A copy of the term with every embedded register shift increased by
    /// `delta`. Used by gadget synthesis to normalize expressions.
    #[must_use]
    pub fn shift(&self, delta: i32) -> Self {
        match self {
            Term::Const(v) => Term::Const(*v),
            Term::Register { reg, shift } => Term::Register {
                reg: *reg,
                shift: shift + delta,
            },
            Term::Add(args) => Term::Add(args.iter().map(|a| a.shift(delta)).collect()),
            Term::Sub(args) => Term::Sub(args.iter().map(|a| a.shift(delta)).collect()),
            Term::Mul(args) => Term::Mul(args.iter().map(|a| a.shift(delta)).collect()),
            Term::Inverse(inner) => Term::Inverse(Box::new(inner.shift(delta))),
        }
    }

    /// Fold constants, flatten associative operators, drop identities and
    /// absorb multiplicative zero.
    #[must_use]
    pub fn simplify(&self) -> Self {
        match self {
            Term::Const(_) | Term::Register { .. } => self.clone(),
            Term::Inverse(inner) => Term::Inverse(Box::new(inner.simplify())),
            Term::Add(args) => {
                // Flatten nested sums, then fold the constants together.
                let mut flat = Vec::new();
                for arg in args {
                    match arg.simplify() {
                        Term::Add(inner) => flat.extend(inner),
                        other => flat.push(other),
                    }
                }
                let mut constant = F::ZERO;
                let mut rest = Vec::new();
                for arg in flat {
                    match arg {
                        Term::Const(v) => constant += v,
                        other => rest.push(other),
                    }
                }
                if !constant.is_zero() || rest.is_empty() {
                    rest.push(Term::Const(constant));
                }
                match rest.len() {
                    1 => rest.pop().expect("non-empty"),
                    _ => Term::Add(rest),
                }
            }
            Term::Sub(args) => {
                let mut args = args.iter().map(Term::simplify);
                let head = args.next().expect("n-ary term is non-empty");
                // Trailing zeros subtract nothing.
                let tail: Vec<_> = args.filter(|a| !matches!(a, Term::Const(v) if v.is_zero())).collect();
                if tail.is_empty() {
                    return head;
                }
                if let Term::Const(h) = head {
                    if let Some(folded) = tail
                        .iter()
                        .map(|a| match a {
                            Term::Const(v) => Some(*v),
                            _ => None,
                        })
                        .collect::<Option<Vec<_>>>()
                    {
                        return Term::Const(folded.into_iter().fold(h, |acc, v| acc - v));
                    }
                }
                Term::Sub(std::iter::once(head).chain(tail).collect())
            }
            Term::Mul(args) => {
                let mut flat = Vec::new();
                for arg in args {
                    match arg.simplify() {
                        Term::Mul(inner) => flat.extend(inner),
                        other => flat.push(other),
                    }
                }
                let mut constant = F::ONE;
                let mut rest = Vec::new();
                for arg in flat {
                    match arg {
                        Term::Const(v) => constant *= v,
                        other => rest.push(other),
                    }
                }
                if constant.is_zero() {
                    return Term::Const(F::ZERO);
                }
                if !constant.is_one() || rest.is_empty() {
                    rest.insert(0, Term::Const(constant));
                }
                match rest.len() {
                    1 => rest.pop().expect("non-empty"),
                    _ => Term::Mul(rest),
                }
            }
        }
    }

    /// Render per the S-expression grammar, resolving register names through
    /// `names`. Unresolvable registers fall back to `r<id>`.
    pub fn lisp(&self, names: &impl RegisterNames) -> String {
        let reg_name = |reg: RegisterId| names.register_name(reg).unwrap_or_else(|| reg.to_string());
        match self {
            Term::Const(v) => format!("{v}"),
            Term::Register { reg, shift: 0 } => reg_name(*reg),
            Term::Register { reg, shift } => format!("(shift {} {shift})", reg_name(*reg)),
            Term::Add(args) => Self::lisp_nary("+", args, names),
            Term::Sub(args) => Self::lisp_nary("-", args, names),
            Term::Mul(args) => Self::lisp_nary("*", args, names),
            Term::Inverse(inner) => format!("(inv {})", inner.lisp(names)),
        }
    }

    fn lisp_nary(op: &str, args: &[Term<F>], names: &impl RegisterNames) -> String {
        let rendered: Vec<_> = args.iter().map(|a| a.lisp(names)).collect();
        format!("({op} {})", rendered.join(" "))
    }
}

impl<F: PrimeField64> Term<F> {
    /// Compositional value-domain analysis. `width_of` reports the declared
    /// bit-width of a register, `None` meaning field-wide. Returns `None`
    /// when the term's value cannot be bounded (inverses, field-wide
    /// registers, or arithmetic overflow of the bound itself).
    pub fn value_range(&self, width_of: &impl Fn(RegisterId) -> Option<u32>) -> Option<ValueRange> {
        match self {
            Term::Const(v) => {
                let canonical = v.to_canonical_u64();
                // Small negative constants are represented near the modulus;
                // interpret them as negative integers.
                let signed = if canonical > F::ORDER / 2 {
                    canonical as i128 - F::ORDER as i128
                } else {
                    canonical as i128
                };
                Some(ValueRange::exact(signed))
            }
            Term::Register { reg, .. } => {
                let width = width_of(*reg)?;
                if width >= 127 {
                    return None;
                }
                Some(ValueRange {
                    lo: 0,
                    hi: (1i128 << width) - 1,
                })
            }
            Term::Add(args) => Self::fold_ranges(args, width_of, |a, b| {
                Some(ValueRange {
                    lo: a.lo.checked_add(b.lo)?,
                    hi: a.hi.checked_add(b.hi)?,
                })
            }),
            Term::Sub(args) => Self::fold_ranges(args, width_of, |a, b| {
                Some(ValueRange {
                    lo: a.lo.checked_sub(b.hi)?,
                    hi: a.hi.checked_sub(b.lo)?,
                })
            }),
            Term::Mul(args) => Self::fold_ranges(args, width_of, |a, b| {
                let corners = [
                    a.lo.checked_mul(b.lo)?,
                    a.lo.checked_mul(b.hi)?,
                    a.hi.checked_mul(b.lo)?,
                    a.hi.checked_mul(b.hi)?,
                ];
                Some(ValueRange {
                    lo: *corners.iter().min().expect("non-empty"),
                    hi: *corners.iter().max().expect("non-empty"),
                })
            }),
            Term::Inverse(_) => None,
        }
    }

    fn fold_ranges(
        args: &[Term<F>],
        width_of: &impl Fn(RegisterId) -> Option<u32>,
        combine: impl Fn(ValueRange, ValueRange) -> Option<ValueRange>,
    ) -> Option<ValueRange> {
        let mut it = args.iter();
        let mut acc = it.next().expect("n-ary term is non-empty").value_range(width_of)?;
        for arg in it {
            acc = combine(acc, arg.value_range(width_of)?)?;
        }
        Some(acc)
    }
}

impl<F: Display> Display for Term<F> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Term::Const(v) => write!(f, "{v}"),
            Term::Register { reg, shift: 0 } => write!(f, "{reg}"),
            Term::Register { reg, shift } => write!(f, "(shift {reg} {shift})"),
            Term::Add(args) => write_nary(f, "+", args),
            Term::Sub(args) => write_nary(f, "-", args),
            Term::Mul(args) => write_nary(f, "*", args),
            Term::Inverse(inner) => write!(f, "(inv {inner})"),
        }
    }
}

fn write_nary<F: Display>(f: &mut Formatter<'_>, op: &str, args: &[Term<F>]) -> fmt::Result {
    write!(f, "({op}")?;
    for arg in args {
        write!(f, " {arg}")?;
    }
    write!(f, ")")
}

impl<F: Field> Add for Term<F> {
    type Output = Term<F>;

    fn add(self, rhs: Self) -> Self::Output { Term::Add(vec![self, rhs]) }
}

impl<F: Field> Add<i64> for Term<F> {
    type Output = Term<F>;

    fn add(self, rhs: i64) -> Self::Output { self + Term::constant(rhs) }
}

impl<F: Field> Add<Term<F>> for i64 {
    type Output = Term<F>;

    fn add(self, rhs: Term<F>) -> Self::Output { Term::constant(self) + rhs }
}

impl<F: Field> Neg for Term<F> {
    type Output = Term<F>;

    fn neg(self) -> Self::Output { Term::Sub(vec![Term::Const(F::ZERO), self]) }
}

impl<F: Field> Sub for Term<F> {
    type Output = Term<F>;

    fn sub(self, rhs: Self) -> Self::Output { Term::Sub(vec![self, rhs]) }
}

impl<F: Field> Sub<i64> for Term<F> {
    type Output = Term<F>;

    fn sub(self, rhs: i64) -> Self::Output { self - Term::constant(rhs) }
}

impl<F: Field> Sub<Term<F>> for i64 {
    type Output = Term<F>;

    fn sub(self, rhs: Term<F>) -> Self::Output { Term::constant(self) - rhs }
}

impl<F: Field> Mul for Term<F> {
    type Output = Term<F>;

    fn mul(self, rhs: Self) -> Self::Output { Term::Mul(vec![self, rhs]) }
}

impl<F: Field> Mul<i64> for Term<F> {
    type Output = Term<F>;

    fn mul(self, rhs: i64) -> Self::Output { self * Term::constant(rhs) }
}

impl<F: Field> Mul<Term<F>> for i64 {
    type Output = Term<F>;

    fn mul(self, rhs: Term<F>) -> Self::Output { rhs * self }
}

impl<F: Field> Sum<Term<F>> for Term<F> {
    // For convenience with the types, we need to have at least one value.
    #[inline]
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self { iter.reduce(Add::add).unwrap() }
}

#[cfg(test)]
mod tests {
    use plonky2::field::goldilocks_field::GoldilocksField;
    use plonky2::field::types::Field;

    use super::*;

    type F = GoldilocksField;

    fn fixed(values: &'static [u64]) -> FnReader<impl Fn(RegisterId, isize) -> F> {
        FnReader(move |reg: RegisterId, row: isize| {
            assert_eq!(reg, RegisterId(0));
            usize::try_from(row)
                .ok()
                .and_then(|r| values.get(r))
                .map_or(F::ZERO, |&v| F::from_canonical_u64(v))
        })
    }

    fn no_columns() -> FnReader<impl Fn(RegisterId, isize) -> F> {
        FnReader(|_: RegisterId, _: isize| F::ZERO)
    }

    #[test]
    fn arithmetic_evaluates() {
        let a = Term::<F>::constant(7);
        let b = Term::<F>::constant(5);
        let none = no_columns();

        assert_eq!((a.clone() + b.clone()).eval_at(0, &none), F::from_canonical_u64(12));
        assert_eq!((a.clone() - b.clone()).eval_at(0, &none), F::from_canonical_u64(2));
        assert_eq!((a * b).eval_at(0, &none), F::from_canonical_u64(35));
    }

    #[test]
    fn multiplication_short_circuits_on_zero() {
        // The poisoned register trips an assertion when read; a zero factor
        // before it must keep the evaluator from ever getting there.
        let poisoned = FnReader(|reg: RegisterId, _: isize| {
            assert_ne!(reg, RegisterId(1), "short-circuit failed");
            F::ZERO
        });
        let product = Term::<F>::constant(0) * Term::register(RegisterId(1));
        assert_eq!(product.eval_at(0, &poisoned), F::ZERO);
    }

    #[test]
    fn pseudo_inverse_of_zero_is_zero() {
        let none = no_columns();
        assert_eq!(Term::<F>::inverse(Term::constant(0)).eval_at(0, &none), F::ZERO);
        let three = Term::<F>::inverse(Term::constant(3)).eval_at(0, &none);
        assert_eq!(three * F::from_canonical_u64(3), F::ONE);
    }

    #[test]
    fn shift_composes_with_eval() {
        let values: &[u64] = &[3, 1, 4, 1, 5, 9, 2, 6];
        let term =
            Term::<F>::register(RegisterId(0)) * Term::shifted(RegisterId(0), 1) + 1;
        for delta in -2i32..=2 {
            let shifted = term.shift(delta);
            for row in 2..5isize {
                assert_eq!(
                    shifted.eval_at(row, &fixed(values)),
                    term.eval_at(row + delta as isize, &fixed(values)),
                );
            }
        }
    }

    #[test]
    fn bounds_cover_all_accesses() {
        let term = Term::<F>::shifted(RegisterId(0), -2) * Term::shifted(RegisterId(1), 3)
            + Term::register(RegisterId(2));
        assert_eq!(term.bounds(), ShiftBounds {
            backward: 2,
            forward: 3
        });
        assert_eq!(term.required_registers().len(), 3);
        let cells = term.required_cells(10);
        assert!(cells.contains(&(RegisterId(0), 8)));
        assert!(cells.contains(&(RegisterId(1), 13)));
        assert!(cells.contains(&(RegisterId(2), 10)));
    }

    #[test]
    fn simplify_folds_and_flattens() {
        let x = Term::<F>::register(RegisterId(0));

        // 0 + (x + 2) + 3 => x + 5
        let sum = Term::constant(0) + (x.clone() + 2) + 3;
        assert_eq!(
            sum.simplify(),
            Term::Add(vec![x.clone(), Term::constant(5)])
        );

        // x * 0 * y absorbs to 0.
        let zeroed = x.clone() * 0 * Term::register(RegisterId(1));
        assert_eq!(zeroed.simplify(), Term::constant(0));

        // 1 * x drops the identity.
        assert_eq!((Term::constant(1) * x.clone()).simplify(), x.clone());

        // x - 0 drops the subtrahend.
        assert_eq!((x.clone() - 0).simplify(), x);
    }

    #[test]
    fn value_range_is_compositional() {
        let widths = |reg: RegisterId| match reg {
            RegisterId(0) => Some(8),
            RegisterId(1) => Some(1),
            _ => None,
        };
        let x = Term::<F>::register(RegisterId(0));
        let b = Term::<F>::register(RegisterId(1));

        let range = (x.clone() + b.clone()).value_range(&widths).unwrap();
        assert_eq!(range, ValueRange { lo: 0, hi: 256 });
        assert!(range.fits_width(9));
        assert!(!range.fits_width(8));

        let diff = (x.clone() - 1).value_range(&widths).unwrap();
        assert_eq!(diff, ValueRange { lo: -1, hi: 254 });
        assert!(!diff.fits_width(8));

        // Field-wide registers and inverses are unbounded.
        assert!(Term::<F>::register(RegisterId(9)).value_range(&widths).is_none());
        assert!(Term::inverse(x).value_range(&widths).is_none());
    }

    #[test]
    fn lisp_rendering_follows_the_grammar() {
        struct NoNames;
        impl RegisterNames for NoNames {
            fn register_name(&self, _: RegisterId) -> Option<String> { None }
        }

        let x = Term::<F>::register(RegisterId(0));
        let term = (x.clone() - Term::shifted(RegisterId(0), -1)) * Term::constant(2);
        assert_eq!(term.lisp(&NoNames), "(* (- r0 (shift r0 -1)) 2)");
        assert_eq!(
            Term::<F>::inverse(x).lisp(&NoNames),
            "(inv r0)"
        );
    }

    #[test]
    fn reduce_with_powers_is_little_endian() {
        // [2, 1] with base 256 is 2 + 256·1 = 258.
        let recombined =
            Term::<F>::reduce_with_powers([Term::constant(2), Term::constant(1)], 256);
        assert_eq!(recombined.eval_at(0, &no_columns()), F::from_canonical_u64(258));
    }
}

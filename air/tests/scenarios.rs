//! End-to-end scenarios: build a schema, expand an input trace, check it.

use anyhow::Result;
use plonky2::field::goldilocks_field::GoldilocksField;
use plonky2::field::types::{Field, PrimeField64};
use proptest::prelude::*;
use trellis_air::assignment::AssignmentKind;
use trellis_air::checker::{check, FailureKind};
use trellis_air::error::ExpansionError;
use trellis_air::expander::expand;
use trellis_air::gadget::BitwidthConfig;
use trellis_air::schema::{Handle, RegisterDecl, Schema};
use trellis_air::trace::InputTrace;
use trellis_expr::{RegisterId, Term};

type F = GoldilocksField;

fn field(values: &[u64]) -> Vec<F> {
    values.iter().map(|&v| F::from_canonical_u64(v)).collect()
}

fn column(trace: &trellis_air::trace::Trace<F>, reg: RegisterId) -> Vec<u64> {
    let height = trace.column(reg).expect("populated").len();
    (0..height as isize)
        .map(|row| trace.get(reg, row).to_canonical_u64())
        .collect()
}

/// Byte decomposition of 258 into two bytes, with the recombination
/// vanishing.
#[test]
fn byte_decomposition_of_258() -> Result<()> {
    let mut schema = Schema::<F>::new();
    let m = schema.add_module("m")?;
    let x = schema.add_input_register(m, "X", Some(16))?;
    let l0 = schema.add_assignment(
        m,
        vec![RegisterDecl::new("X:0", 8), RegisterDecl::new("X:1", 8)],
        AssignmentKind::ByteDecomposition { src: x },
    )?;
    let l1 = RegisterId(l0.0 + 1);
    schema.add_vanishing(
        Handle::new("m", "X:recombined"),
        None,
        Term::register(x)
            - Term::reduce_with_powers([Term::register(l0), Term::register(l1)], 256),
    )?;
    schema.finalize().unwrap();

    let mut inputs = InputTrace::new();
    inputs.set("m", "X", field(&[258]));
    let trace = expand(&schema, &inputs)?;

    assert_eq!(column(&trace, l0), vec![2]);
    assert_eq!(column(&trace, l1), vec![1]);
    assert!(check(&schema, &trace).accepted());
    Ok(())
}

/// The binarity gadget rejects a non-bit value with the offending row and
/// value.
#[test]
fn binarity_rejects_a_non_bit() -> Result<()> {
    let mut schema = Schema::<F>::new();
    let m = schema.add_module("m")?;
    let b = schema.add_input_register(m, "B", None)?;
    schema.apply_binarity(b, None)?;

    let mut inputs = InputTrace::new();
    inputs.set("m", "B", field(&[0, 1, 2]));
    let trace = expand(&schema, &inputs)?;

    let report = check(&schema, &trace);
    assert_eq!(report.failures.len(), 1);
    let failure = &report.failures[0];
    assert_eq!(failure.handle, Handle::new("m", "B:u1"));
    assert_eq!(failure.row, Some(2));
    // 2 · (2 − 1) = 2.
    assert_eq!(failure.kind, FailureKind::NonZero { value: 2 });
    Ok(())
}

/// Pseudo-inverse on zero and non-zero cells, via the normalisation gadget.
#[test]
fn normalisation_of_zero_and_nonzero() -> Result<()> {
    let mut schema = Schema::<F>::new();
    let m = schema.add_module("m")?;
    let e = schema.add_input_register(m, "E", None)?;
    let normalised = schema.normalise(&Term::register(e))?;
    let inv = schema.lookup_register(m, "E:inv").expect("gadget column");

    let mut inputs = InputTrace::new();
    inputs.set("m", "E", field(&[0, 3, 7]));
    let trace = expand(&schema, &inputs)?;

    assert_eq!(trace.get(inv, 0), F::ZERO);
    assert_eq!(trace.get(inv, 1) * F::from_canonical_u64(3), F::ONE);
    assert_eq!(trace.get(inv, 2) * F::from_canonical_u64(7), F::ONE);
    assert!(check(&schema, &trace).accepted());
    let indicator: Vec<u64> = (0..3isize)
        .map(|row| normalised.eval_at(row, &trace).to_canonical_u64())
        .collect();
    assert_eq!(indicator, vec![0, 1, 1]);
    Ok(())
}

/// Single-column ascending sort, width 8, non-strict.
#[test]
fn ascending_sort_accepts_sorted_data() -> Result<()> {
    let mut schema = Schema::<F>::new();
    let m = schema.add_module("m")?;
    let x = schema.add_input_register(m, "X", Some(8))?;
    let delta = schema.apply_column_sort(x, true, 8, false, None)?;
    schema.finalize().unwrap();

    let mut inputs = InputTrace::new();
    inputs.set("m", "X", field(&[1, 1, 2, 5]));
    let trace = expand(&schema, &inputs)?;

    // First row diffs against the padding value, which defaults to X[0].
    assert_eq!(column(&trace, delta), vec![0, 0, 1, 3]);
    assert!(check(&schema, &trace).accepted());
    Ok(())
}

#[test]
fn ascending_sort_rejects_a_dip() -> Result<()> {
    let mut schema = Schema::<F>::new();
    let m = schema.add_module("m")?;
    let x = schema.add_input_register(m, "X", Some(8))?;
    schema.apply_column_sort(x, true, 8, false, None)?;

    let mut inputs = InputTrace::new();
    inputs.set("m", "X", field(&[1, 1, 0, 5]));
    let trace = expand(&schema, &inputs)?;

    let report = check(&schema, &trace);
    assert!(!report.accepted());
    // The wrapped-around difference cannot fit in 8 bits.
    assert!(report.failures.iter().any(|failure| {
        failure.handle == Handle::new("m", "+X:u8")
            && failure.row == Some(2)
            && matches!(failure.kind, FailureKind::OutOfRange { .. })
    }));
    Ok(())
}

/// Strict sort: the witnessed difference loses one, so equal neighbours
/// wrap around and fail the width constraint. The padding must leave room
/// below the first value.
#[test]
fn strict_sort_rejects_equal_neighbours() -> Result<()> {
    let build = || -> Result<(Schema<F>, RegisterId)> {
        let mut schema = Schema::<F>::new();
        let m = schema.add_module("m")?;
        let x = schema.add_input_register(m, "X", Some(8))?;
        schema.apply_column_sort(x, true, 8, true, None)?;
        Ok((schema, x))
    };

    let (schema, _) = build()?;
    let mut inputs = InputTrace::new();
    inputs.set_with_padding("m", "X", field(&[1, 3, 5]), F::ZERO);
    let trace = expand(&schema, &inputs)?;
    assert!(check(&schema, &trace).accepted());

    let (schema, _) = build()?;
    let mut inputs = InputTrace::new();
    inputs.set_with_padding("m", "X", field(&[1, 1, 5]), F::ZERO);
    let trace = expand(&schema, &inputs)?;
    let report = check(&schema, &trace);
    assert!(report.failures.iter().any(|failure| {
        failure.row == Some(1) && matches!(failure.kind, FailureKind::OutOfRange { .. })
    }));
    Ok(())
}

/// A selector gates which consecutive pairs the sort constrains.
#[test]
fn selector_gates_the_column_sort() -> Result<()> {
    let build = || -> Result<(Schema<F>, RegisterId, RegisterId)> {
        let mut schema = Schema::<F>::new();
        let m = schema.add_module("m")?;
        let sel = schema.add_input_register(m, "sel", Some(1))?;
        let x = schema.add_input_register(m, "X", Some(8))?;
        schema.apply_column_sort(x, true, 8, false, Some(&Term::register(sel)))?;
        Ok((schema, sel, x))
    };

    // Row 2 is unselected, so the dip from 9 to 1 is not constrained.
    let (schema, _, _) = build()?;
    let mut inputs = InputTrace::new();
    inputs.set("m", "sel", field(&[1, 1, 0, 1]));
    inputs.set("m", "X", field(&[5, 9, 1, 4]));
    let trace = expand(&schema, &inputs)?;
    assert!(check(&schema, &trace).accepted());

    // A selected dip still fails.
    let (schema, _, _) = build()?;
    let mut inputs = InputTrace::new();
    inputs.set("m", "sel", field(&[1, 1, 0, 1]));
    inputs.set("m", "X", field(&[9, 5, 1, 4]));
    let trace = expand(&schema, &inputs)?;
    assert!(!check(&schema, &trace).accepted());
    Ok(())
}

/// Interleaving feeds a cross-module lookup: every row of each part
/// appears in the interleaved column.
#[test]
fn interleave_backs_a_lookup() -> Result<()> {
    let mut schema = Schema::<F>::new();
    let a = schema.add_module("a")?;
    let wide = schema.add_module("wide")?;
    let left = schema.add_input_register(a, "L", Some(8))?;
    let right = schema.add_input_register(a, "R", Some(8))?;
    let woven = schema.add_assignment(
        wide,
        vec![RegisterDecl::new("I", 8)],
        AssignmentKind::Native {
            function: trellis_air::assignment::NativeFunction::Interleave,
            sources: vec![left, right],
        },
    )?;
    schema.add_lookup(
        Handle::new("a", "L-in-I"),
        vec![trellis_air::constraint::RegisterAccess::new(left)],
        vec![trellis_air::constraint::RegisterAccess::new(woven)],
    )?;
    schema.finalize().unwrap();

    let mut inputs = InputTrace::new();
    inputs.set("a", "L", field(&[1, 2, 3]));
    inputs.set("a", "R", field(&[10, 20, 30]));
    let trace = expand(&schema, &inputs)?;
    assert_eq!(column(&trace, woven), vec![1, 10, 2, 20, 3, 30]);
    assert!(check(&schema, &trace).accepted());
    Ok(())
}

/// Lexicographic sort of two ascending columns.
#[test]
fn lexicographic_sort_of_two_columns() -> Result<()> {
    let mut schema = Schema::<F>::new();
    let m = schema.add_module("m")?;
    let a = schema.add_input_register(m, "A", Some(8))?;
    let b = schema.add_input_register(m, "B", Some(8))?;
    schema.apply_lex_sort(&[a, b], &[true, true], 8)?;
    schema.finalize().unwrap();

    let delta = schema.lookup_register(m, "A+B:delta").expect("gadget column");
    let mux0 = schema.lookup_register(m, "A+B:mux:0").expect("gadget column");
    let mux1 = schema.lookup_register(m, "A+B:mux:1").expect("gadget column");

    let mut inputs = InputTrace::new();
    inputs.set("m", "A", field(&[1, 1, 2]));
    inputs.set("m", "B", field(&[3, 4, 0]));
    let trace = expand(&schema, &inputs)?;

    assert_eq!(column(&trace, mux0), vec![0, 0, 1]);
    assert_eq!(column(&trace, mux1), vec![0, 1, 0]);
    assert_eq!(column(&trace, delta), vec![0, 1, 1]);
    assert!(check(&schema, &trace).accepted());
    Ok(())
}

#[test]
fn lexicographic_sort_rejects_a_swap() -> Result<()> {
    let mut schema = Schema::<F>::new();
    let m = schema.add_module("m")?;
    let a = schema.add_input_register(m, "A", Some(8))?;
    let b = schema.add_input_register(m, "B", Some(8))?;
    schema.apply_lex_sort(&[a, b], &[true, true], 8)?;

    let mut inputs = InputTrace::new();
    inputs.set("m", "A", field(&[1, 2, 1]));
    inputs.set("m", "B", field(&[3, 0, 4]));
    let trace = expand(&schema, &inputs)?;

    // A[2] − A[1] is negative, so the witnessed delta is zero and the
    // delta-consistency vanishing breaks at row 2.
    let report = check(&schema, &trace);
    assert!(!report.accepted());
    assert!(report.failures.iter().any(|failure| {
        failure.handle == Handle::new("m", "A+B:delta") && failure.row == Some(2)
    }));
    Ok(())
}

/// Recursive bitwidth gadget at width 32 with the default cutoff.
#[test]
fn recursive_bitwidth_at_32() -> Result<()> {
    let mut schema = Schema::<F>::new();
    let m = schema.add_module("M")?;
    let x = schema.add_input_register(m, "X", None)?;
    schema.apply_bitwidth(x, 32, None, &BitwidthConfig::default())?;
    schema.finalize().unwrap();

    let u32_module = schema.module_named(":u32").expect("shared proof module");
    let u16_module = schema.module_named(":u16").expect("shared proof module");
    let v = schema.lookup_register(u32_module, "V").unwrap();

    let mut inputs = InputTrace::new();
    inputs.set("M", "X", field(&[0, 1, 65535, 65536, 0xFFFF_FFFF]));
    let trace = expand(&schema, &inputs)?;

    // The proof module covers all five values (zero is already among them).
    assert_eq!(column(&trace, v), vec![0, 1, 65535, 65536, 0xFFFF_FFFF]);
    let v16 = schema.lookup_register(u16_module, "V").unwrap();
    assert_eq!(column(&trace, v16), vec![0, 1, 65535]);
    assert!(check(&schema, &trace).accepted());
    Ok(())
}

#[test]
fn recursive_bitwidth_overflow_names_the_proof_column() -> Result<()> {
    let mut schema = Schema::<F>::new();
    let m = schema.add_module("M")?;
    let x = schema.add_input_register(m, "X", None)?;
    schema.apply_bitwidth(x, 32, None, &BitwidthConfig::default())?;

    let mut inputs = InputTrace::new();
    inputs.set("M", "X", field(&[0, 1, 65535, 65536, 1 << 33]));
    match expand(&schema, &inputs) {
        Err(ExpansionError::ValueOutOfBounds {
            module,
            register,
            value,
            width,
            ..
        }) => {
            assert_eq!(module, ":u32");
            assert_eq!(register, "V");
            assert_eq!(value, 1 << 33);
            assert_eq!(width, 32);
        }
        other => panic!("expected an out-of-bounds expansion error, got {other:?}"),
    }
    Ok(())
}

/// The horizontal (legacy) strategy splits into byte limbs in the same
/// module instead of sharing proof modules.
#[test]
fn legacy_bitwidth_splits_horizontally() -> Result<()> {
    let mut schema = Schema::<F>::new();
    let m = schema.add_module("m")?;
    let x = schema.add_input_register(m, "X", None)?;
    schema.apply_bitwidth(x, 20, None, &BitwidthConfig {
        legacy: true,
        ..BitwidthConfig::default()
    })?;
    schema.finalize().unwrap();
    assert!(schema.module_named(":u20").is_none());

    let limb0 = schema.lookup_register(m, "X:0").expect("byte limb");
    let limb2 = schema.lookup_register(m, "X:2").expect("top limb");

    let mut inputs = InputTrace::new();
    inputs.set("m", "X", field(&[0xabcde, 0, 0xfffff]));
    let trace = expand(&schema, &inputs)?;
    assert_eq!(column(&trace, limb0), vec![0xde, 0, 0xff]);
    assert_eq!(column(&trace, limb2), vec![0xa, 0, 0xf]);
    assert!(check(&schema, &trace).accepted());
    Ok(())
}

proptest! {
    /// The column sort gadget accepts exactly the sorted inputs.
    #[test]
    fn sort_accepts_iff_sorted(values in prop::collection::vec(0u64..256, 1..24)) {
        let mut schema = Schema::<F>::new();
        let m = schema.add_module("m").unwrap();
        let x = schema.add_input_register(m, "X", Some(8)).unwrap();
        schema.apply_column_sort(x, true, 8, false, None).unwrap();

        let mut inputs = InputTrace::new();
        inputs.set("m", "X", field(&values));
        let trace = expand(&schema, &inputs).unwrap();
        let sorted = values.windows(2).all(|pair| pair[0] <= pair[1]);
        prop_assert_eq!(check(&schema, &trace).accepted(), sorted);
    }

    /// Permutation constraints hold exactly on multiset-equal columns.
    #[test]
    fn permutation_is_multiset_equality(
        values in prop::collection::vec(0u64..8, 1..16),
        tweak in any::<bool>(),
    ) {
        let mut schema = Schema::<F>::new();
        let m = schema.add_module("m").unwrap();
        let x = schema.add_input_register(m, "x", Some(8)).unwrap();
        let y = schema.add_input_register(m, "y", Some(8)).unwrap();
        schema
            .add_permutation(Handle::new("m", "x~y"), vec![x], vec![y])
            .unwrap();

        let mut shuffled: Vec<u64> = values.iter().rev().copied().collect();
        if tweak {
            shuffled[0] = (shuffled[0] + 1) % 8;
        }
        let mut inputs = InputTrace::new();
        inputs.set("m", "x", field(&values));
        inputs.set("m", "y", field(&shuffled));
        let trace = expand(&schema, &inputs).unwrap();

        let mut left = values.clone();
        let mut right = shuffled.clone();
        left.sort_unstable();
        right.sort_unstable();
        prop_assert_eq!(check(&schema, &trace).accepted(), left == right);
    }
}

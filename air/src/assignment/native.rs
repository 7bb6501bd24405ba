//! Native multiplexor computations: pure helpers over whole columns that
//! have no tractable per-row constraint form.

use std::collections::HashMap;

use plonky2::field::types::{Field, PrimeField64};
use trellis_expr::RegisterId;

use crate::array::Column;
use crate::assignment::{Direction, NativeFunction};
use crate::error::ExpansionError;
use crate::schema::Schema;
use crate::trace::Trace;

pub(crate) fn compute<F: PrimeField64>(
    schema: &Schema<F>,
    trace: &Trace<F>,
    function: &NativeFunction,
    sources: &[RegisterId],
    targets: &[RegisterId],
) -> Result<Vec<Column<F>>, ExpansionError> {
    let column = |reg: RegisterId| trace.column(reg).expect("native sources are populated");
    let target_width = schema.register(targets[0]).expect("allocated id").width;
    let build = |height: usize, padding: F| trace.builder().build(target_width, height, padding);

    let out = match function {
        NativeFunction::Id => {
            let src = column(sources[0]);
            let mut out = build(src.len(), src.padding());
            for row in 0..src.len() {
                out.set(row, src.get(row as isize));
            }
            out
        }

        NativeFunction::Interleave => {
            let parts: Vec<_> = sources.iter().map(|&reg| column(reg)).collect();
            let height = parts[0].len();
            for part in &parts[1..] {
                if part.len() != height {
                    let home = schema.register(sources[0]).expect("known register").module;
                    return Err(ExpansionError::HeightMismatch {
                        module: schema.module(home).expect("known module").name.clone(),
                        expected: height,
                        got: part.len(),
                    });
                }
            }
            let m = parts.len();
            let mut out = build(m * height, parts[0].padding());
            for (at, part) in parts.iter().enumerate() {
                for row in 0..height {
                    out.set(row * m + at, part.get(row as isize));
                }
            }
            out
        }

        NativeFunction::Filter => {
            let (src, sel) = (column(sources[0]), column(sources[1]));
            let mut out = build(sel.len(), F::ZERO);
            for row in 0..sel.len() {
                if !sel.get(row as isize).is_zero() {
                    out.set(row, src.get(row as isize));
                }
            }
            out
        }

        NativeFunction::MapIf { key_count } => {
            map_if(trace, sources, *key_count, &build)?
        }

        NativeFunction::ChangesWithin { direction } => {
            scan_changes(trace, sources, *direction, false, &build)
        }

        NativeFunction::UnchangedWithin { direction } => {
            scan_changes(trace, sources, *direction, true, &build)
        }

        NativeFunction::FillWithin { direction } => {
            let (sel, first, src) = (column(sources[0]), column(sources[1]), column(sources[2]));
            let mut out = build(sel.len(), F::ZERO);
            let mut held: Option<F> = None;
            for row in scan_order(sel.len(), *direction) {
                if sel.get(row as isize).is_zero() {
                    continue;
                }
                if !first.get(row as isize).is_zero() {
                    held = Some(src.get(row as isize));
                }
                out.set(row, held.unwrap_or(F::ZERO));
            }
            out
        }
    };
    Ok(vec![out])
}

fn scan_order(height: usize, direction: Direction) -> Vec<usize> {
    match direction {
        Direction::Forward => (0..height).collect(),
        Direction::Backward => (0..height).rev().collect(),
    }
}

/// Bit column over the active region: 1 where the key tuple differs from the
/// previously scanned active row (the first active row counts as changed).
/// `complement` flips the bit, yielding unchanged-within.
fn scan_changes<F: PrimeField64>(
    trace: &Trace<F>,
    sources: &[RegisterId],
    direction: Direction,
    complement: bool,
    build: &impl Fn(usize, F) -> Column<F>,
) -> Column<F> {
    let column = |reg: RegisterId| trace.column(reg).expect("native sources are populated");
    let sel = column(sources[0]);
    let keys: Vec<_> = sources[1..].iter().map(|&reg| column(reg)).collect();
    let mut out = build(sel.len(), F::ZERO);
    let mut previous: Option<Vec<u64>> = None;
    for row in scan_order(sel.len(), direction) {
        if sel.get(row as isize).is_zero() {
            continue;
        }
        let tuple: Vec<u64> = keys
            .iter()
            .map(|key| key.get(row as isize).to_canonical_u64())
            .collect();
        let changed = previous.as_ref() != Some(&tuple);
        if changed != complement {
            out.set(row, F::ONE);
        }
        previous = Some(tuple);
    }
    out
}

/// For each active source row, map its key tuple to its value; then write
/// the looked-up value at each active target row. Conflicting and missing
/// keys are fatal.
fn map_if<F: PrimeField64>(
    trace: &Trace<F>,
    sources: &[RegisterId],
    key_count: usize,
    build: &impl Fn(usize, F) -> Column<F>,
) -> Result<Column<F>, ExpansionError> {
    let column = |reg: RegisterId| trace.column(reg).expect("native sources are populated");
    let tgt_sel = column(sources[0]);
    let tgt_keys: Vec<_> = sources[1..=key_count].iter().map(|&r| column(r)).collect();
    let src_sel = column(sources[key_count + 1]);
    let src_keys: Vec<_> = sources[key_count + 2..2 * key_count + 2]
        .iter()
        .map(|&r| column(r))
        .collect();
    let src_val = column(sources[2 * key_count + 2]);

    let tuple_at = |keys: &[&Column<F>], row: usize| -> Vec<u64> {
        keys.iter()
            .map(|key| key.get(row as isize).to_canonical_u64())
            .collect()
    };

    let mut map: HashMap<Vec<u64>, (F, usize)> = HashMap::new();
    for row in 0..src_sel.len() {
        if src_sel.get(row as isize).is_zero() {
            continue;
        }
        let key = tuple_at(&src_keys, row);
        let value = src_val.get(row as isize);
        if let Some(&(existing, first)) = map.get(&key) {
            if existing != value {
                return Err(ExpansionError::ConflictingKey {
                    key,
                    first,
                    second: row,
                });
            }
        } else {
            map.insert(key, (value, row));
        }
    }

    let mut out = build(tgt_sel.len(), F::ZERO);
    for row in 0..tgt_sel.len() {
        if tgt_sel.get(row as isize).is_zero() {
            continue;
        }
        let key = tuple_at(&tgt_keys, row);
        match map.get(&key) {
            Some(&(value, _)) => out.set(row, value),
            None => return Err(ExpansionError::MissingKey { key, row }),
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use plonky2::field::goldilocks_field::GoldilocksField;
    use plonky2::field::types::{Field, PrimeField64};

    use crate::assignment::{AssignmentKind, Direction, NativeFunction};
    use crate::error::ExpansionError;
    use crate::expander::expand;
    use crate::schema::{ModuleId, RegisterDecl, Schema};
    use crate::trace::InputTrace;

    type F = GoldilocksField;

    fn field(values: &[u64]) -> Vec<F> {
        values.iter().map(|&v| F::from_canonical_u64(v)).collect()
    }

    fn native_schema(
        function: NativeFunction,
        inputs: &[(&str, &[u64])],
        target_module: Option<&str>,
    ) -> (Schema<F>, ModuleId, InputTrace<F>) {
        let mut schema = Schema::<F>::new();
        let m = schema.add_module("m").unwrap();
        let mut trace = InputTrace::new();
        let mut regs = Vec::new();
        for (name, values) in inputs {
            regs.push(schema.add_input_register(m, *name, None).unwrap());
            trace.set("m", *name, field(values));
        }
        let out_module = match target_module {
            Some(name) => schema.add_module(name).unwrap(),
            None => m,
        };
        schema
            .add_assignment(
                out_module,
                vec![RegisterDecl::field_wide("out")],
                AssignmentKind::Native {
                    function,
                    sources: regs,
                },
            )
            .unwrap();
        (schema, out_module, trace)
    }

    fn read_out(schema: &Schema<F>, module: ModuleId, inputs: &InputTrace<F>) -> Vec<u64> {
        let trace = expand(schema, inputs).unwrap();
        let out = schema.lookup_register(module, "out").unwrap();
        let height = trace.column(out).unwrap().len();
        (0..height as isize)
            .map(|row| trace.get(out, row).to_canonical_u64())
            .collect()
    }

    #[test]
    fn interleave_round_robins_rows() {
        let (schema, m, inputs) = native_schema(
            NativeFunction::Interleave,
            &[("c0", &[1, 2, 3]), ("c1", &[10, 20, 30])],
            Some("wide"),
        );
        assert_eq!(read_out(&schema, m, &inputs), vec![1, 10, 2, 20, 3, 30]);
    }

    #[test]
    fn filter_zeroes_unselected_rows() {
        let (schema, m, inputs) = native_schema(
            NativeFunction::Filter,
            &[("src", &[7, 8, 9]), ("sel", &[1, 0, 1])],
            None,
        );
        assert_eq!(read_out(&schema, m, &inputs), vec![7, 0, 9]);
    }

    #[test]
    fn changes_within_marks_group_starts() {
        let (schema, m, inputs) = native_schema(
            NativeFunction::ChangesWithin {
                direction: Direction::Forward,
            },
            &[("sel", &[1, 1, 0, 1, 1]), ("k", &[4, 4, 9, 4, 5])],
            None,
        );
        // Row 0 starts a group; row 3 reads back to row 1's key (both 4), so
        // it is unchanged; row 4 changes.
        assert_eq!(read_out(&schema, m, &inputs), vec![1, 0, 0, 0, 1]);
    }

    #[test]
    fn unchanged_within_is_the_complement() {
        let (schema, m, inputs) = native_schema(
            NativeFunction::UnchangedWithin {
                direction: Direction::Forward,
            },
            &[("sel", &[1, 1, 0, 1, 1]), ("k", &[4, 4, 9, 4, 5])],
            None,
        );
        assert_eq!(read_out(&schema, m, &inputs), vec![0, 1, 0, 1, 0]);
    }

    #[test]
    fn fill_within_holds_the_sampled_value() {
        let (schema, m, inputs) = native_schema(
            NativeFunction::FillWithin {
                direction: Direction::Forward,
            },
            &[
                ("sel", &[1, 1, 1, 0, 1]),
                ("first", &[1, 0, 1, 0, 0]),
                ("src", &[5, 6, 7, 8, 9]),
            ],
            None,
        );
        assert_eq!(read_out(&schema, m, &inputs), vec![5, 5, 7, 0, 7]);
    }

    #[test]
    fn backward_fill_scans_from_the_bottom() {
        let (schema, m, inputs) = native_schema(
            NativeFunction::FillWithin {
                direction: Direction::Backward,
            },
            &[
                ("sel", &[1, 1, 1, 1]),
                ("first", &[0, 1, 0, 1]),
                ("src", &[5, 6, 7, 8]),
            ],
            None,
        );
        // Scanning up from row 3: rows 3..=2 hold 8, rows 1..=0 hold 6.
        assert_eq!(read_out(&schema, m, &inputs), vec![6, 6, 8, 8]);
    }

    /// Target side lives in its own module so the two sides can have
    /// different heights.
    fn map_if_schema(
        tgt: &[(&str, &[u64])],
        src: &[(&str, &[u64])],
    ) -> (Schema<F>, ModuleId, InputTrace<F>) {
        let mut schema = Schema::<F>::new();
        let t = schema.add_module("t").unwrap();
        let s = schema.add_module("s").unwrap();
        let mut trace = InputTrace::new();
        let mut regs = Vec::new();
        for (module, module_name, columns) in [(t, "t", tgt), (s, "s", src)] {
            for (name, values) in columns {
                regs.push(schema.add_input_register(module, *name, None).unwrap());
                trace.set(module_name, *name, field(values));
            }
        }
        schema
            .add_assignment(
                t,
                vec![RegisterDecl::field_wide("out")],
                AssignmentKind::Native {
                    function: NativeFunction::MapIf { key_count: 1 },
                    sources: regs,
                },
            )
            .unwrap();
        (schema, t, trace)
    }

    #[test]
    fn map_if_translates_keys() {
        let (schema, t, inputs) = map_if_schema(
            &[("tgt_sel", &[1, 0, 1, 1]), ("tgt_k", &[2, 9, 1, 2])],
            &[
                ("src_sel", &[1, 1, 0]),
                ("src_k", &[1, 2, 9]),
                ("src_v", &[100, 200, 300]),
            ],
        );
        assert_eq!(read_out(&schema, t, &inputs), vec![200, 0, 100, 200]);
    }

    #[test]
    fn map_if_missing_key_is_fatal() {
        let (schema, _t, inputs) = map_if_schema(
            &[("tgt_sel", &[1]), ("tgt_k", &[7])],
            &[("src_sel", &[1]), ("src_k", &[1]), ("src_v", &[100])],
        );
        assert!(matches!(
            expand(&schema, &inputs),
            Err(ExpansionError::MissingKey { row: 0, .. })
        ));
    }

    #[test]
    fn map_if_conflicting_values_are_fatal() {
        let (schema, _t, inputs) = map_if_schema(
            &[("tgt_sel", &[0, 0]), ("tgt_k", &[0, 0])],
            &[
                ("src_sel", &[1, 1]),
                ("src_k", &[3, 3]),
                ("src_v", &[100, 200]),
            ],
        );
        assert!(matches!(
            expand(&schema, &inputs),
            Err(ExpansionError::ConflictingKey {
                first: 0,
                second: 1,
                ..
            })
        ));
    }
}

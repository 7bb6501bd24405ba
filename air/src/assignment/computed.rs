//! Row-by-row evaluation of a defining expression, with optional recursion
//! through the in-progress target columns.

use plonky2::field::types::{Field, PrimeField64};
use trellis_expr::{ColumnReader, RegisterId, Term};

use crate::array::Column;
use crate::assignment::Direction;
use crate::error::ExpansionError;
use crate::schema::{ModuleId, Schema};
use crate::trace::Trace;

/// Overlays the in-progress target columns on top of the trace: cells
/// already written read back their value, cells ahead of the cursor and
/// out-of-bounds rows read as field zero.
struct Overlay<'a, F> {
    trace: &'a Trace<F>,
    targets: &'a [RegisterId],
    columns: &'a [Column<F>],
}

impl<F: PrimeField64> ColumnReader<F> for Overlay<'_, F> {
    fn read(&self, reg: RegisterId, row: isize) -> F {
        match self.targets.iter().position(|&target| target == reg) {
            Some(at) => {
                let in_bounds =
                    usize::try_from(row).is_ok_and(|row| row < self.columns[at].len());
                if in_bounds {
                    self.columns[at].get(row)
                } else {
                    F::ZERO
                }
            }
            None => self.trace.get(reg, row),
        }
    }
}

/// Synthetic padding row: every register reads its padding value; the
/// assignment's own targets read zero.
struct PaddingRow<'a, F> {
    trace: &'a Trace<F>,
    targets: &'a [RegisterId],
}

impl<F: PrimeField64> ColumnReader<F> for PaddingRow<'_, F> {
    fn read(&self, reg: RegisterId, _row: isize) -> F {
        if self.targets.contains(&reg) {
            F::ZERO
        } else {
            self.trace.padding_of(reg)
        }
    }
}

#[allow(clippy::too_many_arguments)]
pub(crate) fn compute<F: PrimeField64>(
    schema: &Schema<F>,
    trace: &Trace<F>,
    module: ModuleId,
    expr: &Term<F>,
    direction: Direction,
    recursive: bool,
    targets: &[RegisterId],
) -> Result<Vec<Column<F>>, ExpansionError> {
    let module_name = schema.module(module).expect("known module").name.clone();
    let height = trace
        .height(module)
        .ok_or_else(|| ExpansionError::UndeterminedHeight(module_name.clone()))?;
    let widths: Vec<Option<u32>> = targets
        .iter()
        .map(|&target| schema.register(target).expect("allocated id").width)
        .collect();

    let builder = trace.builder();
    let mut columns: Vec<Column<F>> = widths
        .iter()
        .map(|&width| builder.build(width, height, F::ZERO))
        .collect();

    let rows: Vec<usize> = match direction {
        Direction::Forward => (0..height).collect(),
        Direction::Backward => (0..height).rev().collect(),
    };
    for row in rows {
        let value = if recursive {
            let view = Overlay {
                trace,
                targets,
                columns: &columns,
            };
            expr.eval_at(row as isize, &view)
        } else {
            expr.eval_at(row as isize, trace)
        };
        write_split(schema, &mut columns, targets, &widths, row, value, || {
            (module_name.clone(), expr.lisp(schema))
        })?;
    }

    // Padding agrees with the expression at a synthetic padding row.
    let padding = expr.eval_at(0, &PaddingRow { trace, targets });
    if let [only] = &mut columns[..] {
        only.set_padding(padding);
    } else {
        let total: u32 = widths.iter().map(|w| w.expect("limbs carry widths")).sum();
        let raw = padding.to_canonical_u64();
        for (column, limb) in columns.iter_mut().zip(split_msb_first(raw, total, &widths)) {
            column.set_padding(F::from_canonical_u64(limb));
        }
    }
    Ok(columns)
}

/// Split `value` MSB-first across the target widths and store one limb per
/// column. Errors when the value does not fit the summed widths.
fn write_split<F: PrimeField64>(
    schema: &Schema<F>,
    columns: &mut [Column<F>],
    targets: &[RegisterId],
    widths: &[Option<u32>],
    row: usize,
    value: F,
    context: impl Fn() -> (String, String),
) -> Result<(), ExpansionError> {
    if let ([only], [width]) = (&mut *columns, widths) {
        if let Some(width) = width {
            let raw = value.to_canonical_u64();
            if *width < 64 && raw >> width != 0 {
                let (module, expr) = context();
                return Err(ExpansionError::ValueOutOfBounds {
                    module,
                    register: schema.register(targets[0]).expect("allocated id").name.clone(),
                    row,
                    value: raw,
                    width: *width,
                    expr,
                });
            }
        }
        only.set(row, value);
        return Ok(());
    }

    let total: u32 = widths.iter().map(|w| w.expect("limbs carry widths")).sum();
    let raw = value.to_canonical_u64();
    if total < 64 && raw >> total != 0 {
        let (module, expr) = context();
        return Err(ExpansionError::ValueOutOfBounds {
            module,
            register: schema.register(targets[0]).expect("allocated id").name.clone(),
            row,
            value: raw,
            width: total,
            expr,
        });
    }
    for (column, limb) in columns.iter_mut().zip(split_msb_first(raw, total, widths)) {
        column.set(row, F::from_canonical_u64(limb));
    }
    Ok(())
}

fn split_msb_first(value: u64, total: u32, widths: &[Option<u32>]) -> Vec<u64> {
    let mut remaining = total;
    widths
        .iter()
        .map(|width| {
            let width = width.expect("limbs carry widths");
            remaining -= width;
            let mask = if width >= 64 { u64::MAX } else { (1 << width) - 1 };
            if remaining >= 64 {
                0
            } else {
                (value >> remaining) & mask
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn msb_first_split() {
        // 0x0102 over two byte limbs: high limb first.
        assert_eq!(
            split_msb_first(0x0102, 16, &[Some(8), Some(8)]),
            vec![0x01, 0x02]
        );
        // Uneven widths: 0b1_0110 over (1, 4).
        assert_eq!(split_msb_first(0b1_0110, 5, &[Some(1), Some(4)]), vec![1, 6]);
    }
}

//! Trace storage.
//!
//! A trace owns all column arrays and the shared pool backing the
//! field-wide ones; the schema owns no runtime state. [`InputTrace`] is the
//! `(module, register) -> values` boundary type consumed by the expander.

use std::collections::BTreeMap;
use std::rc::Rc;

use plonky2::field::types::{Field, PrimeField64};
use trellis_expr::{ColumnReader, RegisterId};

use crate::array::{Column, ColumnBuilder, SharedPool};
use crate::error::ExpansionError;
use crate::schema::{ModuleId, Schema};

/// Values for the input registers, keyed by module and register name.
#[derive(Debug, Clone)]
pub struct InputTrace<F> {
    columns: BTreeMap<(String, String), InputColumn<F>>,
}

impl<F: Field> Default for InputTrace<F> {
    fn default() -> Self { Self::new() }
}

#[derive(Debug, Clone)]
pub(crate) struct InputColumn<F> {
    pub values: Vec<F>,
    pub padding: Option<F>,
}

impl<F: Field> InputTrace<F> {
    #[must_use]
    pub fn new() -> Self {
        InputTrace {
            columns: BTreeMap::new(),
        }
    }

    pub fn set(
        &mut self,
        module: impl Into<String>,
        register: impl Into<String>,
        values: Vec<F>,
    ) {
        self.columns.insert((module.into(), register.into()), InputColumn {
            values,
            padding: None,
        });
    }

    /// Like [`InputTrace::set`], with an explicit padding value instead of
    /// the default (the value at row 0).
    pub fn set_with_padding(
        &mut self,
        module: impl Into<String>,
        register: impl Into<String>,
        values: Vec<F>,
        padding: F,
    ) {
        self.columns.insert((module.into(), register.into()), InputColumn {
            values,
            padding: Some(padding),
        });
    }

    pub(crate) fn get(&self, module: &str, register: &str) -> Option<&InputColumn<F>> {
        self.columns
            .get(&(module.to_string(), register.to_string()))
    }
}

/// A (partially) expanded trace: one optional column per register, one
/// optional height per module.
#[derive(Debug, Clone)]
pub struct Trace<F> {
    columns: Vec<Option<Column<F>>>,
    heights: Vec<Option<usize>>,
    pool: SharedPool<F>,
}

impl<F: PrimeField64> Trace<F> {
    pub(crate) fn new(schema: &Schema<F>) -> Self {
        Trace {
            columns: vec![None; schema.register_ids().count()],
            heights: vec![None; schema.modules().count()],
            pool: SharedPool::default(),
        }
    }

    #[must_use]
    pub fn height(&self, module: ModuleId) -> Option<usize> {
        self.heights.get(module.0).copied().flatten()
    }

    #[must_use]
    pub fn column(&self, reg: RegisterId) -> Option<&Column<F>> {
        self.columns.get(reg.0).and_then(Option::as_ref)
    }

    /// Read a cell; out-of-bounds rows yield the register's padding value.
    ///
    /// # Panics
    /// If the register's column has not been populated yet. The expander's
    /// dependency order guarantees it has whenever an assignment runs.
    #[must_use]
    pub fn get(&self, reg: RegisterId, row: isize) -> F {
        self.columns[reg.0]
            .as_ref()
            .expect("column read before being populated")
            .get(row)
    }

    /// # Panics
    /// If the register's column has not been populated yet.
    #[must_use]
    pub fn padding_of(&self, reg: RegisterId) -> F {
        self.columns[reg.0]
            .as_ref()
            .expect("column read before being populated")
            .padding()
    }

    #[must_use]
    pub fn builder(&self) -> ColumnBuilder<F> { ColumnBuilder::new(Rc::clone(&self.pool)) }

    /// The trace contents in the boundary format: a mapping from
    /// `(module_name, register_name)` to the column's values. Unpopulated
    /// registers are absent.
    #[must_use]
    pub fn export(&self, schema: &Schema<F>) -> BTreeMap<(String, String), Vec<F>> {
        schema
            .register_ids()
            .filter_map(|rid| {
                let column = self.column(rid)?;
                let register = schema.register(rid).ok()?;
                let module = schema.module(register.module).ok()?;
                Some((
                    (module.name.clone(), register.name.clone()),
                    column.iter().collect(),
                ))
            })
            .collect()
    }

    /// Install a freshly computed column, fixing the module height on first
    /// installation and checking it afterwards. An explicit padding value on
    /// the register declaration overrides whatever the engine derived.
    pub(crate) fn install(
        &mut self,
        schema: &Schema<F>,
        reg: RegisterId,
        mut column: Column<F>,
    ) -> Result<(), ExpansionError> {
        let register = schema.register(reg).expect("targets are allocated ids");
        if let Some(padding) = register.padding {
            column.set_padding(padding);
        }
        let module = register.module;
        match self.heights[module.0] {
            None => self.heights[module.0] = Some(column.len()),
            Some(expected) if expected != column.len() => {
                return Err(ExpansionError::HeightMismatch {
                    module: schema.module(module).expect("known module").name.clone(),
                    expected,
                    got: column.len(),
                });
            }
            Some(_) => {}
        }
        self.columns[reg.0] = Some(column);
        Ok(())
    }
}

impl<F: PrimeField64> ColumnReader<F> for Trace<F> {
    fn read(&self, reg: RegisterId, row: isize) -> F { self.get(reg, row) }
}

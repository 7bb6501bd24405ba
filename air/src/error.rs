//! Structured error taxonomy: construction errors surface immediately from
//! the offending `add_*` call, consistency errors are batched by
//! `finalize()`, and expansion stops at the first error.

use thiserror::Error;
use trellis_expr::RegisterId;

use crate::schema::{Handle, ModuleId};

/// Invariant violation detected at schema-construction time.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum SchemaError {
    #[error("unknown module id {0:?}")]
    UnknownModule(ModuleId),
    #[error("no module named `{0}`")]
    NoSuchModule(String),
    #[error("unknown register id {0:?}")]
    UnknownRegister(RegisterId),
    #[error("no register named `{name}` in module `{module}`")]
    NoSuchRegister { module: String, name: String },
    #[error("duplicate module name `{0}`")]
    DuplicateModule(String),
    #[error("duplicate register name `{name}` in module `{module}`")]
    DuplicateRegister { module: String, name: String },
    #[error("duplicate constraint handle `{0}`")]
    DuplicateHandle(Handle),
    #[error("register `{0}` is already written by another assignment")]
    DuplicateWriter(String),
    #[error("inverse terms are only legal inside assignments: `{0}`")]
    InverseInConstraint(String),
    #[error("constraint `{handle}` mixes registers from different modules")]
    CrossModule { handle: Handle },
    #[error("expression reads registers from more than one module")]
    MixedModules,
    #[error("expression reads no register, so no module can host it")]
    NoRegisters,
    #[error("`{handle}` relates {source_cols} source columns to {target} target columns")]
    ColumnCountMismatch {
        handle: Handle,
        source_cols: usize,
        target: usize,
    },
    #[error("{signs} signs given for {columns} columns")]
    SignCountMismatch { signs: usize, columns: usize },
    #[error("native computation expected {expected} source columns, got {got}")]
    NativeArityMismatch { expected: usize, got: usize },
    #[error("limb widths sum to {limbs} bits but source `{src}` is declared {src_width} bits wide")]
    DecompositionWidthMismatch {
        src: String,
        limbs: u32,
        src_width: u32,
    },
    #[error("range bound 2^{bound_width} exceeds the declared width {declared} of `{register}`")]
    RangeWiderThanRegister {
        register: String,
        bound_width: u32,
        declared: u32,
    },
    #[error("assignment declares no target register")]
    NoTargets,
    #[error("byte decomposition source `{0}` has no declared width; pass explicit limb widths")]
    DecomposingFieldWide(String),
    #[error("multi-limb computed targets must all declare a width")]
    UnsizedLimbs,
}

/// Deferred invariant violation reported by `Schema::finalize`.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConsistencyError {
    #[error("register `{0}` is not an input and has no assignment writing it")]
    MissingWriter(String),
    #[error("assignments form a cycle through `{0}`")]
    AssignmentCycle(String),
    #[error("non-recursive assignment for `{0}` reads its own targets")]
    UnmarkedRecursion(String),
}

/// Error raised while expanding a trace. Expansion stops at the first one;
/// partially filled columns are kept for debugging.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ExpansionError {
    #[error("no input column supplied for register `{module}.{register}`")]
    MissingInput { module: String, register: String },
    #[error("columns of module `{module}` have inconsistent heights ({expected} vs {got})")]
    HeightMismatch {
        module: String,
        expected: usize,
        got: usize,
    },
    #[error(
        "value {value} of `{register}` at row {row} in module `{module}` does not fit in \
         {width} bits (while computing `{expr}`)"
    )]
    ValueOutOfBounds {
        module: String,
        register: String,
        row: usize,
        value: u64,
        width: u32,
        expr: String,
    },
    #[error("conflicting values for key {key:?}: source rows {first} and {second}")]
    ConflictingKey {
        key: Vec<u64>,
        first: usize,
        second: usize,
    },
    #[error("no source row provides key {key:?} needed at target row {row}")]
    MissingKey { key: Vec<u64>, row: usize },
    #[error("assignments form a cycle through `{0}`")]
    Cycle(String),
    #[error("native computation expected {expected} source columns, got {got}")]
    SourceArityMismatch { expected: usize, got: usize },
    #[error("height of module `{0}` is not determined by any input or computed column")]
    UndeterminedHeight(String),
}

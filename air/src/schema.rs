//! The schema: modules, registers, constraints and assignments, plus the
//! indices needed for name resolution and dependency analysis.
//!
//! A schema owns only descriptions. Assignments know their target register
//! ids; registers do not know their writers — the `writer_of` index answers
//! that query instead.

use std::collections::{HashMap, HashSet};
use std::fmt::{self, Display, Formatter};

use plonky2::field::types::PrimeField64;
use serde::{Deserialize, Serialize};
use trellis_expr::{RegisterId, RegisterNames, Term};

use crate::assignment::{Assignment, AssignmentKind, NativeFunction, TypeProofSource};
use crate::constraint::{Constraint, PropertyAssertion, RegisterAccess};
use crate::error::{ConsistencyError, SchemaError};
use crate::gadget::{self, BitwidthConfig};

#[derive(
    Debug, Default, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct ModuleId(pub usize);

#[derive(
    Debug, Default, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct AssignmentId(pub usize);

/// Stable name of a constraint or column, scoped to a module.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Handle {
    pub module: String,
    pub name: String,
}

impl Handle {
    pub fn new(module: impl Into<String>, name: impl Into<String>) -> Self {
        Handle {
            module: module.into(),
            name: name.into(),
        }
    }
}

impl Display for Handle {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.module, self.name)
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RegisterKind {
    Input,
    Computed,
    Output,
}

/// A column declaration. `width` is the bit-width, `None` meaning
/// field-wide; `padding` is the value returned for out-of-bounds reads,
/// resolved at expansion time when left unset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(bound(serialize = "F: Serialize", deserialize = "F: Deserialize<'de>"))]
pub struct Register<F> {
    pub name: String,
    pub module: ModuleId,
    pub width: Option<u32>,
    pub kind: RegisterKind,
    pub padding: Option<F>,
}

/// Target declaration used when adding an assignment; the schema allocates
/// the register ids.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisterDecl<F> {
    pub name: String,
    pub width: Option<u32>,
    pub kind: RegisterKind,
    pub padding: Option<F>,
}

impl<F> RegisterDecl<F> {
    pub fn new(name: impl Into<String>, width: u32) -> Self {
        RegisterDecl {
            name: name.into(),
            width: Some(width),
            kind: RegisterKind::Computed,
            padding: None,
        }
    }

    pub fn field_wide(name: impl Into<String>) -> Self {
        RegisterDecl {
            name: name.into(),
            width: None,
            kind: RegisterKind::Computed,
            padding: None,
        }
    }

    #[must_use]
    pub fn output(mut self) -> Self {
        self.kind = RegisterKind::Output;
        self
    }

    #[must_use]
    pub fn with_padding(mut self, padding: F) -> Self {
        self.padding = Some(padding);
        self
    }
}

/// Named container of registers sharing one height.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Module {
    pub name: String,
    pub registers: Vec<RegisterId>,
}

#[derive(Debug, Clone)]
pub struct Schema<F> {
    modules: Vec<Module>,
    registers: Vec<Register<F>>,
    assignments: Vec<Assignment<F>>,
    constraints: Vec<Constraint<F>>,
    assertions: Vec<PropertyAssertion<F>>,
    module_index: HashMap<String, ModuleId>,
    writer_of: HashMap<RegisterId, AssignmentId>,
    handles: HashSet<Handle>,
}

impl<F: PrimeField64> Default for Schema<F> {
    fn default() -> Self { Self::new() }
}

impl<F: PrimeField64> Schema<F> {
    #[must_use]
    pub fn new() -> Self {
        Schema {
            modules: Vec::new(),
            registers: Vec::new(),
            assignments: Vec::new(),
            constraints: Vec::new(),
            assertions: Vec::new(),
            module_index: HashMap::new(),
            writer_of: HashMap::new(),
            handles: HashSet::new(),
        }
    }

    pub fn add_module(&mut self, name: impl Into<String>) -> Result<ModuleId, SchemaError> {
        let name = name.into();
        if self.module_index.contains_key(&name) {
            return Err(SchemaError::DuplicateModule(name));
        }
        let mid = ModuleId(self.modules.len());
        self.module_index.insert(name.clone(), mid);
        self.modules.push(Module {
            name,
            registers: Vec::new(),
        });
        Ok(mid)
    }

    pub fn add_register(
        &mut self,
        module: ModuleId,
        name: impl Into<String>,
        width: Option<u32>,
        kind: RegisterKind,
    ) -> Result<RegisterId, SchemaError> {
        self.alloc_register(module, &RegisterDecl {
            name: name.into(),
            width,
            kind,
            padding: None,
        })
    }

    pub fn add_input_register(
        &mut self,
        module: ModuleId,
        name: impl Into<String>,
        width: Option<u32>,
    ) -> Result<RegisterId, SchemaError> {
        self.add_register(module, name, width, RegisterKind::Input)
    }

    /// Add an assignment; its target registers are declared by the caller
    /// and allocated here. Returns the id of the first target.
    ///
    /// The id a target will receive is [`Schema::next_register_id`] plus its
    /// position, which is how recursive computed registers reference their
    /// own targets in the defining expression.
    pub fn add_assignment(
        &mut self,
        module: ModuleId,
        targets: Vec<RegisterDecl<F>>,
        kind: AssignmentKind<F>,
    ) -> Result<RegisterId, SchemaError> {
        if targets.is_empty() {
            return Err(SchemaError::NoTargets);
        }
        self.module(module)?;
        let first_target = self.next_register_id();
        let target_ids: Vec<RegisterId> = (0..targets.len())
            .map(|at| RegisterId(first_target.0 + at))
            .collect();
        self.validate_assignment(module, &targets, &target_ids, &kind)?;

        for decl in &targets {
            self.alloc_register(module, decl)?;
        }
        let aid = AssignmentId(self.assignments.len());
        for &rid in &target_ids {
            self.writer_of.insert(rid, aid);
        }
        self.assignments.push(Assignment {
            module,
            targets: target_ids,
            kind,
        });
        Ok(first_target)
    }

    pub fn add_vanishing(
        &mut self,
        handle: Handle,
        domain: Option<i32>,
        expr: Term<F>,
    ) -> Result<(), SchemaError> {
        let module = self.constraint_module(&handle, &expr)?;
        self.claim_handle(&handle)?;
        self.constraints.push(Constraint::Vanishing {
            handle,
            module,
            domain,
            expr,
        });
        Ok(())
    }

    pub fn add_range(
        &mut self,
        handle: Handle,
        access: RegisterAccess,
        bound: F,
    ) -> Result<(), SchemaError> {
        let register = self.register(access.reg)?;
        let module = register.module;
        // For a power-of-two bound the declared width must be able to hold
        // every admissible value; field-wide registers always can.
        let raw_bound = bound.to_canonical_u64();
        if raw_bound.is_power_of_two() {
            let bound_width = raw_bound.trailing_zeros();
            if let Some(declared) = register.width {
                if declared < bound_width {
                    return Err(SchemaError::RangeWiderThanRegister {
                        register: register.name.clone(),
                        bound_width,
                        declared,
                    });
                }
            }
        }
        self.claim_handle(&handle)?;
        self.constraints.push(Constraint::Range {
            handle,
            module,
            access,
            bound,
        });
        Ok(())
    }

    pub fn add_lookup(
        &mut self,
        handle: Handle,
        source: Vec<RegisterAccess>,
        target: Vec<RegisterAccess>,
    ) -> Result<(), SchemaError> {
        if source.len() != target.len() || source.is_empty() {
            return Err(SchemaError::ColumnCountMismatch {
                handle,
                source_cols: source.len(),
                target: target.len(),
            });
        }
        self.single_module_of(&handle, source.iter().map(|access| access.reg))?;
        self.single_module_of(&handle, target.iter().map(|access| access.reg))?;
        self.claim_handle(&handle)?;
        self.constraints.push(Constraint::Lookup {
            handle,
            source,
            target,
        });
        Ok(())
    }

    pub fn add_permutation(
        &mut self,
        handle: Handle,
        source: Vec<RegisterId>,
        target: Vec<RegisterId>,
    ) -> Result<(), SchemaError> {
        if source.len() != target.len() || source.is_empty() {
            return Err(SchemaError::ColumnCountMismatch {
                handle,
                source_cols: source.len(),
                target: target.len(),
            });
        }
        // Permutations live inside a single module.
        let module =
            self.single_module_of(&handle, source.iter().chain(&target).copied())?;
        self.claim_handle(&handle)?;
        self.constraints.push(Constraint::Permutation {
            handle,
            module,
            source,
            target,
        });
        Ok(())
    }

    pub fn add_assertion(&mut self, handle: Handle, predicate: Term<F>) -> Result<(), SchemaError> {
        let module = self.constraint_module(&handle, &predicate)?;
        self.claim_handle(&handle)?;
        self.assertions.push(PropertyAssertion {
            handle,
            module,
            predicate,
        });
        Ok(())
    }

    /// Deferred whole-schema checks; returns every violation found.
    pub fn finalize(&self) -> Result<(), Vec<ConsistencyError>> {
        let mut errors = Vec::new();

        for (at, register) in self.registers.iter().enumerate() {
            if register.kind != RegisterKind::Input
                && !self.writer_of.contains_key(&RegisterId(at))
            {
                errors.push(ConsistencyError::MissingWriter(
                    self.register_label(RegisterId(at)),
                ));
            }
        }

        for assignment in &self.assignments {
            if let AssignmentKind::Computed {
                expr,
                recursive: false,
                ..
            } = &assignment.kind
            {
                let reads = expr.required_registers();
                if assignment.targets.iter().any(|t| reads.contains(t)) {
                    errors.push(ConsistencyError::UnmarkedRecursion(
                        self.register_label(assignment.targets[0]),
                    ));
                }
            }
        }

        if let Err(cycle) = self.toposort_assignments() {
            errors.push(cycle);
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Topological order of assignment ids; an error names a register on a
    /// cycle. Self-reads of recursive assignments are not edges.
    pub(crate) fn toposort_assignments(&self) -> Result<Vec<AssignmentId>, ConsistencyError> {
        let n = self.assignments.len();
        let mut indegree = vec![0usize; n];
        let mut dependants: Vec<Vec<usize>> = vec![Vec::new(); n];
        for (at, assignment) in self.assignments.iter().enumerate() {
            for read in assignment.registers_read() {
                if assignment.targets.contains(&read) {
                    continue;
                }
                if let Some(&AssignmentId(writer)) = self.writer_of.get(&read) {
                    dependants[writer].push(at);
                    indegree[at] += 1;
                }
            }
        }
        let mut ready: Vec<usize> = (0..n).filter(|&at| indegree[at] == 0).collect();
        let mut order = Vec::with_capacity(n);
        // Popping the smallest ready id keeps the order stable.
        while let Some(at) = ready.iter().copied().min() {
            ready.retain(|&r| r != at);
            order.push(AssignmentId(at));
            for &next in &dependants[at] {
                indegree[next] -= 1;
                if indegree[next] == 0 {
                    ready.push(next);
                }
            }
        }
        if order.len() < n {
            let stuck = (0..n)
                .find(|&at| indegree[at] > 0)
                .expect("some assignment is on a cycle");
            return Err(ConsistencyError::AssignmentCycle(
                self.register_label(self.assignments[stuck].targets[0]),
            ));
        }
        Ok(order)
    }

    // ---- queries ---------------------------------------------------------

    #[must_use]
    pub fn next_register_id(&self) -> RegisterId { RegisterId(self.registers.len()) }

    pub fn register(&self, rid: RegisterId) -> Result<&Register<F>, SchemaError> {
        self.registers
            .get(rid.0)
            .ok_or(SchemaError::UnknownRegister(rid))
    }

    pub fn module(&self, mid: ModuleId) -> Result<&Module, SchemaError> {
        self.modules.get(mid.0).ok_or(SchemaError::UnknownModule(mid))
    }

    #[must_use]
    pub fn module_named(&self, name: &str) -> Option<ModuleId> {
        self.module_index.get(name).copied()
    }

    #[must_use]
    pub fn lookup_register(&self, module: ModuleId, name: &str) -> Option<RegisterId> {
        self.resolve(module, name)
    }

    fn resolve(&self, module: ModuleId, name: &str) -> Option<RegisterId> {
        self.modules.get(module.0)?.registers.iter().copied().find(
            |&rid| self.registers[rid.0].name == name,
        )
    }

    pub fn modules(&self) -> impl Iterator<Item = (ModuleId, &Module)> {
        self.modules
            .iter()
            .enumerate()
            .map(|(at, module)| (ModuleId(at), module))
    }

    pub fn register_ids(&self) -> impl Iterator<Item = RegisterId> {
        (0..self.registers.len()).map(RegisterId)
    }

    pub fn constraints(&self) -> impl Iterator<Item = &Constraint<F>> { self.constraints.iter() }

    pub fn assertions(&self) -> impl Iterator<Item = &PropertyAssertion<F>> {
        self.assertions.iter()
    }

    pub fn assignments(&self) -> impl Iterator<Item = (AssignmentId, &Assignment<F>)> {
        self.assignments
            .iter()
            .enumerate()
            .map(|(at, assignment)| (AssignmentId(at), assignment))
    }

    pub fn assignment(&self, aid: AssignmentId) -> &Assignment<F> { &self.assignments[aid.0] }

    /// The assignment writing `rid`, if any.
    #[must_use]
    pub fn assignment_writing(&self, rid: RegisterId) -> Option<AssignmentId> {
        self.writer_of.get(&rid).copied()
    }

    #[must_use]
    pub fn has_handle(&self, handle: &Handle) -> bool { self.handles.contains(handle) }

    /// `module.register` label for error messages.
    #[must_use]
    pub fn register_label(&self, rid: RegisterId) -> String {
        let register = &self.registers[rid.0];
        format!("{}.{}", self.modules[register.module.0].name, register.name)
    }

    /// Dump of every constraint, assertion and assignment in canonical
    /// S-expression form, one per line. Debugging only; nothing parses this.
    #[must_use]
    pub fn lisp(&self) -> String {
        let mut out = String::new();
        for constraint in &self.constraints {
            out.push_str(&constraint.lisp(self));
            out.push('\n');
        }
        for assertion in &self.assertions {
            out.push_str(&format!(
                "(assert {} {})\n",
                assertion.handle,
                assertion.predicate.lisp(self)
            ));
        }
        for assignment in &self.assignments {
            out.push_str(&assignment.lisp(self));
            out.push('\n');
        }
        out
    }

    // ---- gadget entry points --------------------------------------------

    pub fn apply_binarity(
        &mut self,
        reg: RegisterId,
        selector: Option<&Term<F>>,
    ) -> Result<(), SchemaError> {
        gadget::binarity::apply(self, reg, selector)
    }

    pub fn apply_bitwidth(
        &mut self,
        reg: RegisterId,
        width: u32,
        selector: Option<&Term<F>>,
        config: &BitwidthConfig,
    ) -> Result<(), SchemaError> {
        gadget::bitwidth::apply(self, reg, width, selector, config)
    }

    /// Returns the register id of the delta column.
    pub fn apply_column_sort(
        &mut self,
        reg: RegisterId,
        sign: bool,
        width: u32,
        strict: bool,
        selector: Option<&Term<F>>,
    ) -> Result<RegisterId, SchemaError> {
        gadget::sort::apply(self, reg, sign, width, strict, selector)
    }

    pub fn apply_lex_sort(
        &mut self,
        regs: &[RegisterId],
        signs: &[bool],
        width: u32,
    ) -> Result<(), SchemaError> {
        gadget::lex_sort::apply(self, regs, signs, width)
    }

    /// Returns `e · inv_e`: zero when `e` is zero, one otherwise.
    pub fn normalise(&mut self, expr: &Term<F>) -> Result<Term<F>, SchemaError> {
        gadget::normalize::apply(self, expr)
    }

    /// Returns a register holding the value of `expr` at every row.
    pub fn expand_to_column(&mut self, expr: &Term<F>) -> Result<RegisterId, SchemaError> {
        gadget::expand::apply(self, expr)
    }

    // ---- internals -------------------------------------------------------

    fn alloc_register(
        &mut self,
        module: ModuleId,
        decl: &RegisterDecl<F>,
    ) -> Result<RegisterId, SchemaError> {
        let module_name = self.module(module)?.name.clone();
        if self.resolve(module, &decl.name).is_some() {
            return Err(SchemaError::DuplicateRegister {
                module: module_name,
                name: decl.name.clone(),
            });
        }
        let rid = RegisterId(self.registers.len());
        self.registers.push(Register {
            name: decl.name.clone(),
            module,
            width: decl.width,
            kind: decl.kind,
            padding: decl.padding,
        });
        self.modules[module.0].registers.push(rid);
        Ok(rid)
    }

    fn claim_handle(&mut self, handle: &Handle) -> Result<(), SchemaError> {
        if !self.handles.insert(handle.clone()) {
            return Err(SchemaError::DuplicateHandle(handle.clone()));
        }
        Ok(())
    }

    /// Module hosting a constraint: named by the handle, and every register
    /// the expression reads must live there.
    fn constraint_module(&self, handle: &Handle, expr: &Term<F>) -> Result<ModuleId, SchemaError> {
        if contains_inverse(expr) {
            return Err(SchemaError::InverseInConstraint(handle.to_string()));
        }
        let module = self
            .module_named(&handle.module)
            .ok_or_else(|| SchemaError::NoSuchModule(handle.module.clone()))?;
        for reg in expr.required_registers() {
            if self.register(reg)?.module != module {
                return Err(SchemaError::CrossModule {
                    handle: handle.clone(),
                });
            }
        }
        Ok(module)
    }

    fn single_module_of(
        &self,
        handle: &Handle,
        regs: impl IntoIterator<Item = RegisterId>,
    ) -> Result<ModuleId, SchemaError> {
        let mut module = None;
        for reg in regs {
            let home = self.register(reg)?.module;
            match module {
                None => module = Some(home),
                Some(expected) if expected != home => {
                    return Err(SchemaError::CrossModule {
                        handle: handle.clone(),
                    });
                }
                Some(_) => {}
            }
        }
        module.ok_or(SchemaError::NoRegisters)
    }

    fn validate_assignment(
        &self,
        module: ModuleId,
        targets: &[RegisterDecl<F>],
        target_ids: &[RegisterId],
        kind: &AssignmentKind<F>,
    ) -> Result<(), SchemaError> {
        let known = |rid: &RegisterId| -> Result<(), SchemaError> {
            self.register(*rid).map(|_| ())
        };
        match kind {
            AssignmentKind::ByteDecomposition { src } => {
                known(src)?;
                let source = self.register(*src)?;
                if let Some(src_width) = source.width {
                    let limbs: u32 = targets.iter().filter_map(|decl| decl.width).sum();
                    if targets.iter().any(|decl| decl.width.is_none()) || limbs != src_width {
                        return Err(SchemaError::DecompositionWidthMismatch {
                            src: source.name.clone(),
                            limbs,
                            src_width,
                        });
                    }
                } else if targets.iter().any(|decl| decl.width.is_none()) {
                    return Err(SchemaError::DecomposingFieldWide(source.name.clone()));
                }
            }
            AssignmentKind::Computed {
                expr, recursive, ..
            } => {
                if targets.len() > 1 && targets.iter().any(|decl| decl.width.is_none()) {
                    return Err(SchemaError::UnsizedLimbs);
                }
                for reg in expr.required_registers() {
                    if target_ids.contains(&reg) {
                        if !recursive {
                            return Err(SchemaError::UnknownRegister(reg));
                        }
                    } else {
                        known(&reg)?;
                    }
                }
            }
            AssignmentKind::SortedPermutation { signs, sources } => {
                if signs.len() != sources.len() || sources.len() != targets.len() {
                    return Err(SchemaError::SignCountMismatch {
                        signs: signs.len(),
                        columns: sources.len(),
                    });
                }
                for src in sources {
                    known(src)?;
                    if self.register(*src)?.module != module {
                        return Err(SchemaError::CrossModule {
                            handle: Handle::new(self.module(module)?.name.clone(), "sorted"),
                        });
                    }
                }
            }
            AssignmentKind::LexicographicSort { signs, sources, .. } => {
                if signs.len() != sources.len() || targets.len() != sources.len() + 1 {
                    return Err(SchemaError::SignCountMismatch {
                        signs: signs.len(),
                        columns: sources.len(),
                    });
                }
                for src in sources {
                    known(src)?;
                }
            }
            AssignmentKind::PseudoInverse { expr } => {
                for reg in expr.required_registers() {
                    known(&reg)?;
                }
            }
            AssignmentKind::Native { function, sources } => {
                if let Some(expected) = function.source_arity() {
                    if sources.len() != expected {
                        return Err(SchemaError::NativeArityMismatch {
                            expected,
                            got: sources.len(),
                        });
                    }
                }
                let minimum = match function {
                    NativeFunction::Interleave => 1,
                    NativeFunction::ChangesWithin { .. }
                    | NativeFunction::UnchangedWithin { .. } => 2,
                    _ => 0,
                };
                if sources.len() < minimum {
                    return Err(SchemaError::NativeArityMismatch {
                        expected: minimum,
                        got: sources.len(),
                    });
                }
                for src in sources {
                    known(src)?;
                }
            }
            AssignmentKind::TypeProof { sources, .. } => {
                for source in sources {
                    known(&source.reg)?;
                }
            }
        }
        Ok(())
    }

    /// Append a register to a shared type-proof table. `proof_reg` is the
    /// table's value column; re-registering the same source is a no-op,
    /// which is what keeps repeated gadget applications idempotent.
    pub(crate) fn add_type_proof_source(
        &mut self,
        proof_reg: RegisterId,
        source: TypeProofSource<F>,
    ) -> Result<(), SchemaError> {
        self.register(source.reg)?;
        let aid = self
            .assignment_writing(proof_reg)
            .ok_or(SchemaError::UnknownRegister(proof_reg))?;
        match &mut self.assignments[aid.0].kind {
            AssignmentKind::TypeProof { sources, .. } => {
                if sources.iter().all(|existing| existing.reg != source.reg) {
                    sources.push(source);
                }
                Ok(())
            }
            _ => Err(SchemaError::UnknownRegister(proof_reg)),
        }
    }
}

impl<F: PrimeField64> RegisterNames for Schema<F> {
    fn register_name(&self, reg: RegisterId) -> Option<String> {
        self.registers.get(reg.0).map(|register| register.name.clone())
    }
}

fn contains_inverse<F>(term: &Term<F>) -> bool {
    match term {
        Term::Const(_) | Term::Register { .. } => false,
        Term::Add(args) | Term::Sub(args) | Term::Mul(args) => args.iter().any(contains_inverse),
        Term::Inverse(_) => true,
    }
}

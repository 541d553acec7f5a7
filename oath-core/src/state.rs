#![forbid(unsafe_code)]

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use oath_ast::{FuncDef, Ident, Type, TypeId, Val};
use oath_vm::Instr;

use crate::compile::CompilerOptions;
use crate::error::CompilerError;

/// Compilation proceeds in two passes over the same state: `Check` types
/// and validates, `CodeGen` emits. Call-graph side tables only accept
/// entries during `CodeGen`, so dead subtrees contribute edges exactly
/// when they are emitted.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    Check,
    CodeGen,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UnitKind {
    TxScript,
    AssetScript,
    Contract { is_abstract: bool },
    Interface,
}

impl UnitKind {
    pub fn is_interface(&self) -> bool {
        matches!(self, UnitKind::Interface)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VarKind {
    Local,
    Field,
    Template,
    Constant,
}

#[derive(Clone, Debug)]
pub struct VarInfo {
    pub kind: VarKind,
    pub ty: Type,
    pub is_mutable: bool,
    /// Declared `@unused`; exempt from the unused sweeps.
    pub is_unused: bool,
    /// Compiler-generated (array refs, synthetic fields).
    pub is_generated: bool,
    /// Storage index of the first slot. Meaningless for constants.
    pub index: u8,
    /// The folded value for `Constant` kind.
    pub value: Option<Val>,
}

/// Externally visible signature of a function, used both for the unit
/// under compilation and for cross-contract call checking.
#[derive(Clone, Debug, PartialEq)]
pub struct FuncSig {
    pub name: String,
    pub is_public: bool,
    pub use_preapproved_assets: bool,
    pub use_contract_assets: bool,
    pub use_update_fields: bool,
    pub use_check_external_caller: Option<bool>,
    pub arg_types: Vec<Type>,
    pub rtypes: Vec<Type>,
}

impl FuncSig {
    pub fn from_def(def: &FuncDef) -> Self {
        FuncSig {
            name: def.id.name.clone(),
            is_public: def.is_public,
            use_preapproved_assets: def.use_preapproved_assets,
            use_contract_assets: def.use_contract_assets,
            use_update_fields: def.use_update_fields,
            use_check_external_caller: def.use_check_external_caller,
            arg_types: def.args.iter().map(|a| a.ty.clone()).collect(),
            rtypes: def.rtypes.clone(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct FieldSig {
    pub name: String,
    pub ty: Type,
    pub is_mutable: bool,
}

/// What one unit knows about another: its kind, callable functions, field
/// layout and std interface id. Built once per project by the
/// orchestrator and shared with every unit's state.
#[derive(Clone, Debug)]
pub struct ContractInfo {
    pub kind: UnitKind,
    pub funcs: Vec<FuncSig>,
    pub fields: Vec<FieldSig>,
    /// Full bytes, prefix included.
    pub std_id: Option<Vec<u8>>,
}

impl ContractInfo {
    pub fn func(&self, name: &str) -> Option<&FuncSig> {
        self.funcs.iter().find(|f| f.name == name)
    }
}

#[derive(Clone, Debug)]
pub struct EventSig {
    pub name: String,
    pub field_types: Vec<Type>,
}

/// Per-unit mutable compilation context: symbol tables, scopes, call
/// graph, warnings and phase flags. One state compiles one unit and is
/// then discarded.
pub struct CompilerState {
    pub type_id: TypeId,
    pub kind: UnitKind,
    phase: Phase,
    pub allow_debug: bool,
    options: CompilerOptions,

    /// Current scope name: a function name, or "" for the unit frame.
    current_scope: String,
    vars: HashMap<String, VarInfo>,
    /// Insertion order of `vars` keys, for stable warning sweeps.
    var_order: Vec<String>,
    next_field_index: u8,
    next_template_index: u8,
    next_local_index: u8,
    /// Frame size (args + locals, flattened) per function, fixed during
    /// check and read back during method assembly.
    local_slots: HashMap<String, usize>,
    /// Deterministic naming for materialized array refs; reset at every
    /// function entry in both phases so the emit replay resolves the
    /// same names the check created.
    array_ref_counter: usize,

    funcs: Vec<FuncSig>,
    func_index: HashMap<String, usize>,
    events: Vec<EventSig>,
    event_index: HashMap<String, usize>,
    contracts: HashMap<String, ContractInfo>,

    pub internal_calls: BTreeMap<String, BTreeSet<String>>,
    pub internal_calls_reversed: BTreeMap<String, BTreeSet<String>>,
    pub external_calls: BTreeSet<(TypeId, String)>,
    /// Functions of this unit containing at least one interface call.
    pub interface_func_calls: BTreeSet<String>,
    /// Built-ins invoked per function, recorded at emit.
    pub builtin_calls: BTreeMap<String, BTreeSet<String>>,

    accessed: HashSet<String>,
    assigned: HashSet<String>,
    pub funcs_updating_fields: BTreeSet<String>,

    pub warnings: Vec<String>,
}

pub(crate) fn const_instr(v: &Val) -> Instr {
    match v {
        Val::Bool(true) => Instr::ConstTrue,
        Val::Bool(false) => Instr::ConstFalse,
        Val::I256(n) => Instr::I256Const(*n),
        Val::U256(n) => Instr::U256Const(*n),
        Val::ByteVec(b) => Instr::BytesConst(b.clone()),
        Val::Address(b) => Instr::AddressConst(b.clone()),
    }
}

impl CompilerState {
    pub fn new(
        type_id: TypeId,
        kind: UnitKind,
        contracts: HashMap<String, ContractInfo>,
        options: CompilerOptions,
    ) -> Self {
        CompilerState {
            type_id,
            kind,
            phase: Phase::Check,
            allow_debug: true,
            options,
            current_scope: String::new(),
            vars: HashMap::new(),
            var_order: Vec::new(),
            next_field_index: 0,
            next_template_index: 0,
            next_local_index: 0,
            local_slots: HashMap::new(),
            array_ref_counter: 0,
            funcs: Vec::new(),
            func_index: HashMap::new(),
            events: Vec::new(),
            event_index: HashMap::new(),
            contracts,
            internal_calls: BTreeMap::new(),
            internal_calls_reversed: BTreeMap::new(),
            external_calls: BTreeSet::new(),
            interface_func_calls: BTreeSet::new(),
            builtin_calls: BTreeMap::new(),
            accessed: HashSet::new(),
            assigned: HashSet::new(),
            funcs_updating_fields: BTreeSet::new(),
            warnings: Vec::new(),
        }
    }

    pub fn options(&self) -> &CompilerOptions {
        &self.options
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn set_phase(&mut self, phase: Phase) {
        self.phase = phase;
    }

    pub fn current_scope(&self) -> &str {
        &self.current_scope
    }

    /// Enter a function scope. Local slot numbering restarts; the array
    /// ref counter restarts so check and emit allocate identical names.
    pub fn enter_function(&mut self, name: &str) {
        self.current_scope = name.to_string();
        self.next_local_index = 0;
        self.array_ref_counter = 0;
    }

    /// Re-enter a function during code generation without disturbing the
    /// slot count fixed at check time.
    pub fn reenter_function(&mut self, name: &str) {
        self.current_scope = name.to_string();
        self.array_ref_counter = 0;
    }

    pub fn exit_function(&mut self) {
        // Frame sizes are fixed during check; the emit pass re-enters
        // without touching them.
        if self.phase == Phase::Check && !self.current_scope.is_empty() {
            self.local_slots.insert(
                self.current_scope.clone(),
                self.next_local_index as usize,
            );
        }
        self.current_scope = String::new();
    }

    pub fn frame_size(&self, func: &str) -> usize {
        self.local_slots.get(func).copied().unwrap_or(0)
    }

    fn scoped(&self, scope: &str, ident: &str) -> String {
        format!("{scope}.{ident}")
    }

    fn resolve_key(&self, ident: &str) -> Option<String> {
        let local = self.scoped(&self.current_scope, ident);
        if self.vars.contains_key(&local) {
            return Some(local);
        }
        let unit = self.scoped("", ident);
        if !self.current_scope.is_empty() && self.vars.contains_key(&unit) {
            return Some(unit);
        }
        None
    }

    // --- variable table ------------------------------------------------

    fn insert_var(
        &mut self,
        ident: &Ident,
        info: VarInfo,
        scope: &str,
    ) -> Result<(), CompilerError> {
        let key = self.scoped(scope, &ident.node);
        // A local may not shadow a unit-level name either.
        let clash = self.vars.contains_key(&key)
            || (!scope.is_empty() && self.vars.contains_key(&self.scoped("", &ident.node)));
        if clash {
            return Err(CompilerError {
                message: format!("duplicate definition of \"{}\"", ident.node),
                span: ident.span,
            });
        }
        self.vars.insert(key.clone(), info);
        self.var_order.push(key);
        Ok(())
    }

    fn alloc_index(
        next: &mut u8,
        len: usize,
        ident: &Ident,
        what: &str,
    ) -> Result<u8, CompilerError> {
        let index = *next;
        let end = index as usize + len;
        if end > u8::MAX as usize + 1 {
            return Err(CompilerError {
                message: format!("too many {what} at \"{}\"", ident.node),
                span: ident.span,
            });
        }
        *next = end as u8;
        Ok(index)
    }

    pub fn add_local_variable(
        &mut self,
        ident: &Ident,
        ty: Type,
        is_mutable: bool,
        is_unused: bool,
        is_generated: bool,
    ) -> Result<(), CompilerError> {
        debug_assert!(!self.current_scope.is_empty());
        let index = Self::alloc_index(
            &mut self.next_local_index,
            ty.flattened_len(),
            ident,
            "local variables",
        )?;
        let scope = self.current_scope.clone();
        self.insert_var(
            ident,
            VarInfo {
                kind: VarKind::Local,
                ty,
                is_mutable,
                is_unused,
                is_generated,
                index,
                value: None,
            },
            &scope,
        )
    }

    pub fn add_field_variable(
        &mut self,
        ident: &Ident,
        ty: Type,
        is_mutable: bool,
        is_unused: bool,
        is_generated: bool,
    ) -> Result<(), CompilerError> {
        let index = Self::alloc_index(
            &mut self.next_field_index,
            ty.flattened_len(),
            ident,
            "fields",
        )?;
        self.insert_var(
            ident,
            VarInfo {
                kind: VarKind::Field,
                ty,
                is_mutable,
                is_unused,
                is_generated,
                index,
                value: None,
            },
            "",
        )
    }

    pub fn add_template_variable(
        &mut self,
        ident: &Ident,
        ty: Type,
        is_unused: bool,
    ) -> Result<(), CompilerError> {
        let index = Self::alloc_index(
            &mut self.next_template_index,
            ty.flattened_len(),
            ident,
            "template variables",
        )?;
        self.insert_var(
            ident,
            VarInfo {
                kind: VarKind::Template,
                ty,
                is_mutable: false,
                is_unused,
                is_generated: false,
                index,
                value: None,
            },
            "",
        )
    }

    pub fn add_constant_variable(
        &mut self,
        ident: &Ident,
        value: Val,
    ) -> Result<(), CompilerError> {
        self.insert_var(
            ident,
            VarInfo {
                kind: VarKind::Constant,
                ty: value.ty(),
                is_mutable: false,
                is_unused: false,
                is_generated: false,
                index: 0,
                value: Some(value),
            },
            "",
        )
    }

    /// Look a variable up, recording the access. Writes must target a
    /// mutable variable; writes to fields mark the enclosing function as
    /// a field updater.
    pub fn get_variable(
        &mut self,
        ident: &Ident,
        is_write: bool,
    ) -> Result<VarInfo, CompilerError> {
        let key = self.resolve_key(&ident.node).ok_or_else(|| CompilerError {
            message: format!("undefined variable \"{}\"", ident.node),
            span: ident.span,
        })?;
        let info = self.vars[&key].clone();
        if is_write {
            if !info.is_mutable {
                return Err(CompilerError {
                    message: format!("cannot assign to immutable variable \"{}\"", ident.node),
                    span: ident.span,
                });
            }
            self.assigned.insert(key);
            if info.kind == VarKind::Field {
                self.funcs_updating_fields.insert(self.current_scope.clone());
            }
        } else {
            self.accessed.insert(key);
        }
        Ok(info)
    }

    pub fn get_type(&mut self, ident: &Ident) -> Result<Type, CompilerError> {
        Ok(self.get_variable(ident, false)?.ty)
    }

    /// Name for a materialized array ref. Created during check, resolved
    /// again (same traversal order, same counter) during emit.
    fn next_array_ref_name(&mut self) -> Ident {
        let name = format!("_arr{}", self.array_ref_counter);
        self.array_ref_counter += 1;
        Ident::new(oath_ast::span(0, 0), name)
    }

    /// Allocate a generated local holding a materialized array value.
    /// Called while checking; the emit replay resolves the same name.
    pub fn create_array_ref(&mut self, ty: Type) -> Result<Ident, CompilerError> {
        let ident = self.next_array_ref_name();
        self.add_local_variable(&ident, ty, true, false, true)?;
        Ok(ident)
    }

    /// The next materialized array ref, by replayed allocation order.
    pub fn resolve_array_ref(&mut self) -> Ident {
        self.next_array_ref_name()
    }

    // --- load/store code -----------------------------------------------

    fn load_slot(kind: VarKind, index: u8) -> Instr {
        match kind {
            VarKind::Local => Instr::LoadLocal(index),
            VarKind::Field => Instr::LoadField(index),
            VarKind::Template => Instr::LoadTemplate(index),
            VarKind::Constant => unreachable!("constants load their value"),
        }
    }

    fn store_slot(kind: VarKind, index: u8) -> Instr {
        match kind {
            VarKind::Local => Instr::StoreLocal(index),
            VarKind::Field => Instr::StoreField(index),
            _ => unreachable!("templates and constants are immutable"),
        }
    }

    /// Instructions leaving the variable's value on the stack; arrays
    /// load every slot in ascending order.
    pub fn gen_load_code(&mut self, ident: &Ident) -> Result<Vec<Instr>, CompilerError> {
        let info = self.get_variable(ident, false)?;
        if let Some(v) = &info.value {
            return Ok(vec![const_instr(v)]);
        }
        let len = info.ty.flattened_len();
        Ok((0..len)
            .map(|i| Self::load_slot(info.kind, info.index + i as u8))
            .collect())
    }

    /// Instructions storing the stack top into the variable; arrays
    /// store slots in descending order, matching left-to-right pushes.
    pub fn gen_store_code(&mut self, ident: &Ident) -> Result<Vec<Instr>, CompilerError> {
        let info = self.get_variable(ident, true)?;
        let len = info.ty.flattened_len();
        Ok((0..len)
            .rev()
            .map(|i| Self::store_slot(info.kind, info.index + i as u8))
            .collect())
    }

    pub fn load_slot_range(kind: VarKind, base: u8, offset: usize, len: usize) -> Vec<Instr> {
        (0..len)
            .map(|i| Self::load_slot(kind, base + (offset + i) as u8))
            .collect()
    }

    pub fn store_slot_range(kind: VarKind, base: u8, offset: usize, len: usize) -> Vec<Instr> {
        (0..len)
            .rev()
            .map(|i| Self::store_slot(kind, base + (offset + i) as u8))
            .collect()
    }

    // --- functions, events, contracts ----------------------------------

    pub fn register_func(&mut self, def: &FuncDef) -> Result<(), CompilerError> {
        if self.func_index.contains_key(&def.id.name) {
            return Err(CompilerError {
                message: format!("duplicate definition of \"{}\"", def.id.name),
                span: def.span,
            });
        }
        self.func_index
            .insert(def.id.name.clone(), self.funcs.len());
        self.funcs.push(FuncSig::from_def(def));
        Ok(())
    }

    pub fn func_sig(&self, name: &str) -> Option<&FuncSig> {
        self.func_index.get(name).map(|i| &self.funcs[*i])
    }

    pub fn func_sigs(&self) -> &[FuncSig] {
        &self.funcs
    }

    pub fn func_method_index(&self, name: &str) -> Option<usize> {
        self.func_index.get(name).copied()
    }

    pub fn register_event(
        &mut self,
        ident: &Ident,
        field_types: Vec<Type>,
    ) -> Result<(), CompilerError> {
        if self.event_index.contains_key(&ident.node) {
            return Err(CompilerError {
                message: format!("duplicate definition of \"{}\"", ident.node),
                span: ident.span,
            });
        }
        self.event_index
            .insert(ident.node.clone(), self.events.len());
        self.events.push(EventSig {
            name: ident.node.clone(),
            field_types,
        });
        Ok(())
    }

    pub fn event(&self, name: &str) -> Option<(usize, &EventSig)> {
        self.event_index
            .get(name)
            .map(|i| (*i, &self.events[*i]))
    }

    pub fn contract_info(&self, name: &str) -> Option<&ContractInfo> {
        self.contracts.get(name)
    }

    // --- call graph (CodeGen phase only) -------------------------------

    pub fn add_internal_call(&mut self, callee: &str) {
        if self.phase != Phase::CodeGen {
            return;
        }
        let caller = self.current_scope.clone();
        self.internal_calls
            .entry(caller.clone())
            .or_default()
            .insert(callee.to_string());
        self.internal_calls_reversed
            .entry(callee.to_string())
            .or_default()
            .insert(caller);
    }

    pub fn add_external_call(&mut self, type_id: TypeId, func: &str) {
        if self.phase != Phase::CodeGen {
            return;
        }
        self.external_calls.insert((type_id, func.to_string()));
    }

    pub fn add_interface_func_call(&mut self) {
        if self.phase != Phase::CodeGen {
            return;
        }
        self.interface_func_calls
            .insert(self.current_scope.clone());
    }

    pub fn add_builtin_call(&mut self, name: &str) {
        if self.phase != Phase::CodeGen {
            return;
        }
        self.builtin_calls
            .entry(self.current_scope.clone())
            .or_default()
            .insert(name.to_string());
    }

    pub fn func_calls_builtin(&self, func: &str, builtin: &str) -> bool {
        self.builtin_calls
            .get(func)
            .is_some_and(|set| set.contains(builtin))
    }

    // --- warnings and post-checks --------------------------------------

    pub fn warn(&mut self, message: String) {
        self.warnings.push(message);
    }

    fn is_used(&self, key: &str) -> bool {
        self.accessed.contains(key) || self.assigned.contains(key)
    }

    /// Unused-local sweep for the current function scope.
    pub fn check_unused_local_vars(&mut self) {
        if self.options.ignore_unused_variables_warnings {
            return;
        }
        let prefix = format!("{}.", self.current_scope);
        let mut msgs = Vec::new();
        for key in &self.var_order {
            let Some(name) = key.strip_prefix(&prefix) else {
                continue;
            };
            let info = &self.vars[key];
            if info.kind == VarKind::Local
                && !info.is_unused
                && !info.is_generated
                && !self.is_used(key)
            {
                msgs.push(format!(
                    "unused variable \"{name}\" in function \"{}\"",
                    self.current_scope
                ));
            }
        }
        self.warnings.extend(msgs);
    }

    pub fn check_unassigned_local_mutable_vars(&mut self) {
        let prefix = format!("{}.", self.current_scope);
        let mut msgs = Vec::new();
        for key in &self.var_order {
            let Some(name) = key.strip_prefix(&prefix) else {
                continue;
            };
            let info = &self.vars[key];
            if info.kind == VarKind::Local
                && info.is_mutable
                && !info.is_generated
                && !self.assigned.contains(key)
            {
                msgs.push(format!(
                    "mutable variable \"{name}\" in function \"{}\" is never assigned",
                    self.current_scope
                ));
            }
        }
        self.warnings.extend(msgs);
    }

    pub fn check_unused_fields(&mut self) {
        if self.options.ignore_unused_fields_warnings {
            return;
        }
        let mut msgs = Vec::new();
        for key in &self.var_order {
            let Some(name) = key.strip_prefix('.') else {
                continue;
            };
            let info = &self.vars[key];
            if info.kind == VarKind::Field
                && !info.is_unused
                && !info.is_generated
                && !self.is_used(key)
            {
                msgs.push(format!("unused field \"{name}\""));
            }
        }
        self.warnings.extend(msgs);
    }

    pub fn check_unassigned_mutable_fields(&mut self) {
        let mut msgs = Vec::new();
        for key in &self.var_order {
            let Some(name) = key.strip_prefix('.') else {
                continue;
            };
            let info = &self.vars[key];
            if info.kind == VarKind::Field
                && info.is_mutable
                && !info.is_generated
                && !self.assigned.contains(key)
            {
                msgs.push(format!("mutable field \"{name}\" is never assigned"));
            }
        }
        self.warnings.extend(msgs);
    }

    pub fn check_unused_templates(&mut self) {
        if self.options.ignore_unused_fields_warnings {
            return;
        }
        let mut msgs = Vec::new();
        for key in &self.var_order {
            let Some(name) = key.strip_prefix('.') else {
                continue;
            };
            let info = &self.vars[key];
            if info.kind == VarKind::Template && !info.is_unused && !self.is_used(key) {
                msgs.push(format!("unused template variable \"{name}\""));
            }
        }
        self.warnings.extend(msgs);
    }

    pub fn check_unused_constants(&mut self) {
        if self.options.ignore_unused_constants_warnings {
            return;
        }
        let mut msgs = Vec::new();
        for key in &self.var_order {
            let Some(name) = key.strip_prefix('.') else {
                continue;
            };
            let info = &self.vars[key];
            if info.kind == VarKind::Constant && !self.is_used(key) {
                msgs.push(format!("unused constant \"{name}\""));
            }
        }
        self.warnings.extend(msgs);
    }
}

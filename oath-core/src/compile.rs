#![forbid(unsafe_code)]

use std::collections::HashMap;

use oath_ast::{
    flattened_len_of, AssetScript, Contract, ContractUnit, FuncDef, Ident, Type, TypeId,
    TxScript,
};
use oath_vm::{Method, StatefulContract, StatefulScript, StatelessScript};
use serde::{Deserialize, Serialize};

use crate::error::CompilerError;
use crate::resolve::{ExtractedDefs, MultiContract, Resolver};
use crate::state::{CompilerState, ContractInfo, FieldSig, FuncSig, Phase, UnitKind};

/// Warning suppression switches, deserializable from project manifests.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CompilerOptions {
    pub ignore_unused_constants_warnings: bool,
    pub ignore_unused_variables_warnings: bool,
    pub ignore_unused_fields_warnings: bool,
    pub ignore_unused_private_functions_warnings: bool,
    pub ignore_update_fields_check_warnings: bool,
    pub ignore_check_external_caller_warnings: bool,
}

#[derive(Clone, Debug)]
pub struct CompiledContract {
    /// Release artifact: debug instructions elided.
    pub contract: StatefulContract,
    /// Debug artifact, always emitted first.
    pub debug_contract: StatefulContract,
    /// The flattened AST the artifact was compiled from.
    pub ast: Contract,
    pub warnings: Vec<String>,
    /// Per method: reads state without touching fields, assets or
    /// interfaces. Callers and ABI emission key off this.
    pub simple_views: Vec<bool>,
}

#[derive(Clone, Debug)]
pub struct CompiledScript {
    pub script: StatefulScript,
    pub debug_script: StatefulScript,
    pub ast: TxScript,
    pub warnings: Vec<String>,
}

#[derive(Clone, Debug)]
pub struct CompiledAssetScript {
    pub script: StatelessScript,
    pub debug_script: StatelessScript,
    pub ast: AssetScript,
    pub warnings: Vec<String>,
}

#[derive(Clone, Debug)]
pub enum CompiledUnit {
    Contract(CompiledContract),
    Script(CompiledScript),
    AssetScript(CompiledAssetScript),
}

/// Compile a project: resolve inheritance, then check and emit every
/// script and concrete contract in input order. Interfaces and abstract
/// contracts only contribute definitions.
pub fn compile_project(
    units: Vec<ContractUnit>,
    options: &CompilerOptions,
) -> Result<Vec<CompiledUnit>, CompilerError> {
    let multi = MultiContract::new(units)?;
    let mut resolver = Resolver::new(&multi);

    let mut infos: HashMap<String, ContractInfo> = HashMap::new();
    let mut extracted: HashMap<String, ExtractedDefs> = HashMap::new();
    for unit in multi.units() {
        let name = unit.name().to_string();
        match unit {
            ContractUnit::Interface(iface) => {
                resolver.validate_interface(iface)?;
                let funcs = resolver.interface_funcs(iface)?;
                infos.insert(
                    name,
                    ContractInfo {
                        kind: UnitKind::Interface,
                        funcs: funcs.iter().map(FuncSig::from_def).collect(),
                        fields: Vec::new(),
                        std_id: None,
                    },
                );
            }
            ContractUnit::Contract(c) => {
                resolver.validate_contract_inheritance(c)?;
                let defs = resolver.extract_defs(c)?;
                let std_id = if defs.std_id_enabled {
                    defs.std_id.clone()
                } else {
                    None
                };
                infos.insert(
                    name.clone(),
                    ContractInfo {
                        kind: UnitKind::Contract {
                            is_abstract: c.is_abstract,
                        },
                        funcs: defs.funcs.iter().map(FuncSig::from_def).collect(),
                        fields: c
                            .fields
                            .iter()
                            .map(|f| FieldSig {
                                name: f.ident.node.clone(),
                                ty: f.ty.clone(),
                                is_mutable: f.is_mutable,
                            })
                            .collect(),
                        std_id,
                    },
                );
                extracted.insert(name, defs);
            }
            ContractUnit::TxScript(s) => {
                infos.insert(
                    name,
                    ContractInfo {
                        kind: UnitKind::TxScript,
                        funcs: s.funcs.iter().map(FuncSig::from_def).collect(),
                        fields: Vec::new(),
                        std_id: None,
                    },
                );
            }
            ContractUnit::AssetScript(s) => {
                infos.insert(
                    name,
                    ContractInfo {
                        kind: UnitKind::AssetScript,
                        funcs: s.funcs.iter().map(FuncSig::from_def).collect(),
                        fields: Vec::new(),
                        std_id: None,
                    },
                );
            }
        }
    }

    let mut compiled = Vec::new();
    for unit in multi.units() {
        match unit {
            ContractUnit::Contract(c) if !c.is_abstract => {
                let defs = extracted
                    .remove(c.ident.node.as_str())
                    .expect("extracted above");
                compiled.push(CompiledUnit::Contract(compile_contract(
                    c, defs, &infos, options,
                )?));
            }
            ContractUnit::TxScript(s) => {
                let (methods, debug_methods, warnings) = compile_script_unit(
                    &s.ident,
                    UnitKind::TxScript,
                    &s.templates,
                    &s.funcs,
                    &infos,
                    options,
                )?;
                compiled.push(CompiledUnit::Script(CompiledScript {
                    script: StatefulScript { methods },
                    debug_script: StatefulScript {
                        methods: debug_methods,
                    },
                    ast: s.clone(),
                    warnings,
                }));
            }
            ContractUnit::AssetScript(s) => {
                let (methods, debug_methods, warnings) = compile_script_unit(
                    &s.ident,
                    UnitKind::AssetScript,
                    &s.templates,
                    &s.funcs,
                    &infos,
                    options,
                )?;
                compiled.push(CompiledUnit::AssetScript(CompiledAssetScript {
                    script: StatelessScript { methods },
                    debug_script: StatelessScript {
                        methods: debug_methods,
                    },
                    ast: s.clone(),
                    warnings,
                }));
            }
            _ => {}
        }
    }
    Ok(compiled)
}

fn emit_all(
    state: &mut CompilerState,
    funcs: &[FuncDef],
) -> Result<Vec<Method>, CompilerError> {
    funcs.iter().map(|f| state.emit_func(f)).collect()
}

fn compile_contract(
    contract: &Contract,
    defs: ExtractedDefs,
    infos: &HashMap<String, ContractInfo>,
    options: &CompilerOptions,
) -> Result<CompiledContract, CompilerError> {
    let std_active = defs.std_id_enabled && defs.std_id.is_some();
    let flattened = Contract {
        funcs: defs.funcs,
        events: defs.events,
        consts: defs.consts,
        enums: defs.enums,
        ..contract.clone()
    };

    let mut state = CompilerState::new(
        TypeId::new(flattened.ident.node.clone()),
        UnitKind::Contract { is_abstract: false },
        infos.clone(),
        options.clone(),
    );

    for field in &flattened.fields {
        state.add_field_variable(
            &field.ident,
            field.ty.clone(),
            field.is_mutable,
            field.is_unused,
            false,
        )?;
    }
    if std_active {
        state.add_field_variable(
            &Ident::new(flattened.span, "__stdInterfaceId".to_string()),
            Type::ByteVec,
            false,
            true,
            true,
        )?;
    }
    for c in &flattened.consts {
        state.add_constant_variable(&c.ident, c.value.clone())?;
    }
    for e in &flattened.enums {
        for field in &e.fields {
            let joined = Ident::new(
                field.ident.span,
                format!("{}.{}", e.ident.node, field.ident.node),
            );
            state.add_constant_variable(&joined, field.value.clone())?;
        }
    }
    for event in &flattened.events {
        if event.fields.iter().any(|f| f.ty.is_array()) {
            return Err(CompilerError {
                message: format!("event \"{}\" fields cannot be arrays", event.ident.node),
                span: event.ident.span,
            });
        }
        state.register_event(
            &event.ident,
            event.fields.iter().map(|f| f.ty.clone()).collect(),
        )?;
    }
    for func in &flattened.funcs {
        state.register_func(func)?;
    }

    for func in &flattened.funcs {
        state.check_func(func)?;
    }
    state.check_unused_fields();
    state.check_unassigned_mutable_fields();
    state.check_unused_constants();

    state.set_phase(Phase::CodeGen);
    let debug_methods = emit_all(&mut state, &flattened.funcs)?;
    let simple_views = static_analysis(&mut state, &flattened.funcs, infos)?;

    let field_types: Vec<Type> = flattened.fields.iter().map(|f| f.ty.clone()).collect();
    let fields_length = flattened_len_of(&field_types) + usize::from(std_active);
    let debug_contract = StatefulContract {
        fields_length,
        methods: debug_methods,
    };
    let contract_artifact = if debug_contract.has_debug_ops() {
        state.allow_debug = false;
        StatefulContract {
            fields_length,
            methods: emit_all(&mut state, &flattened.funcs)?,
        }
    } else {
        debug_contract.clone()
    };

    Ok(CompiledContract {
        contract: contract_artifact,
        debug_contract,
        ast: flattened,
        warnings: state.warnings.clone(),
        simple_views,
    })
}

/// Shared TxScript/AssetScript drive: template registration, check,
/// double emit and the entry-method rule.
fn compile_script_unit(
    ident: &Ident,
    kind: UnitKind,
    templates: &[oath_ast::Argument],
    funcs: &[FuncDef],
    infos: &HashMap<String, ContractInfo>,
    options: &CompilerOptions,
) -> Result<(Vec<Method>, Vec<Method>, Vec<String>), CompilerError> {
    let valid = matches!(funcs.first(), Some(f) if f.is_public)
        && funcs[1..].iter().all(|f| !f.is_public);
    if !valid {
        return Err(CompilerError {
            message: format!(
                "first method of script \"{}\" must be public and the rest private",
                ident.node
            ),
            span: ident.span,
        });
    }
    for func in funcs {
        if func.is_abstract() {
            return Err(CompilerError {
                message: format!("script function \"{}\" must have a body", func.id.name),
                span: func.span,
            });
        }
    }

    let mut state = CompilerState::new(
        TypeId::new(ident.node.clone()),
        kind,
        infos.clone(),
        options.clone(),
    );
    for template in templates {
        state.add_template_variable(&template.ident, template.ty.clone(), template.is_unused)?;
    }
    for func in funcs {
        state.register_func(func)?;
    }
    for func in funcs {
        state.check_func(func)?;
    }
    state.check_unused_templates();

    state.set_phase(Phase::CodeGen);
    let debug_methods = emit_all(&mut state, funcs)?;
    check_unused_private_funcs(&mut state, funcs);

    let has_debug = debug_methods.iter().any(Method::has_debug_ops);
    let methods = if has_debug {
        state.allow_debug = false;
        emit_all(&mut state, funcs)?
    } else {
        debug_methods.clone()
    };
    Ok((methods, debug_methods, state.warnings.clone()))
}

fn check_unused_private_funcs(state: &mut CompilerState, funcs: &[FuncDef]) {
    if state.options().ignore_unused_private_functions_warnings {
        return;
    }
    let mut msgs = Vec::new();
    for func in funcs {
        let name = &func.id.name;
        let called = state
            .internal_calls_reversed
            .get(name)
            .is_some_and(|callers| !callers.is_empty());
        if !func.is_public && !called {
            msgs.push(format!("private function \"{name}\" is never called"));
        }
    }
    for msg in msgs {
        state.warn(msg);
    }
}

/// Post-emit analyses over the recorded call graph: external-call
/// sanity, the check-external-caller table, update-fields consistency,
/// unused private functions, and the simple-view classification.
fn static_analysis(
    state: &mut CompilerState,
    funcs: &[FuncDef],
    infos: &HashMap<String, ContractInfo>,
) -> Result<Vec<bool>, CompilerError> {
    // Every recorded external call must land on a public function of a
    // known unit.
    for (type_id, func) in state.external_calls.clone() {
        let callable = infos
            .get(type_id.as_str())
            .and_then(|info| info.func(&func))
            .is_some_and(|sig| sig.is_public);
        if !callable {
            return Err(CompilerError {
                message: format!(
                    "external call target \"{type_id}.{func}\" does not exist or is private"
                ),
                span: oath_ast::span(0, 0),
            });
        }
    }

    let simple_views: Vec<bool> = funcs
        .iter()
        .map(|f| {
            let name = f.id.name.as_str();
            !state.funcs_updating_fields.contains(name)
                && !f.use_preapproved_assets
                && !f.use_contract_assets
                && !state.interface_func_calls.contains(name)
                && !state.func_calls_builtin(name, "migrate")
        })
        .collect();

    // External-caller checks: seeded by a direct checkCaller! or an
    // explicit opt-out, then propagated caller-wards through private
    // callees to a fixed point.
    let mut checked: HashMap<String, bool> = funcs
        .iter()
        .map(|f| {
            let name = f.id.name.clone();
            let seed = state.func_calls_builtin(&name, "checkCaller")
                || f.use_check_external_caller == Some(false);
            (name, seed)
        })
        .collect();
    let is_private: HashMap<String, bool> = funcs
        .iter()
        .map(|f| (f.id.name.clone(), !f.is_public))
        .collect();
    loop {
        let mut changed = false;
        let mut newly_checked = Vec::new();
        for (caller, callees) in &state.internal_calls {
            if checked.get(caller).copied().unwrap_or(false) {
                continue;
            }
            let propagated = callees.iter().any(|callee| {
                is_private.get(callee).copied().unwrap_or(false)
                    && checked.get(callee).copied().unwrap_or(false)
            });
            if propagated {
                newly_checked.push(caller.clone());
                changed = true;
            }
        }
        for name in newly_checked {
            checked.insert(name, true);
        }
        if !changed {
            break;
        }
    }

    let mut warnings = Vec::new();
    if !state.options().ignore_check_external_caller_warnings {
        for (func, view) in funcs.iter().zip(&simple_views) {
            let name = func.id.name.as_str();
            if func.is_public && !checked.get(name).copied().unwrap_or(false) && !view {
                warnings.push(format!(
                    "public function \"{name}\" does not check its external caller"
                ));
            }
        }
    }
    if !state.options().ignore_update_fields_check_warnings {
        for func in funcs {
            let name = func.id.name.as_str();
            let updates = state.funcs_updating_fields.contains(name);
            if updates && !func.use_update_fields {
                warnings.push(format!(
                    "function \"{name}\" updates fields but does not declare useUpdateFields"
                ));
            }
            if !updates && func.use_update_fields {
                warnings.push(format!(
                    "function \"{name}\" declares useUpdateFields but never updates fields"
                ));
            }
        }
    }
    for msg in warnings {
        state.warn(msg);
    }
    check_unused_private_funcs(state, funcs);
    Ok(simple_views)
}

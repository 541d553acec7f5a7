#![forbid(unsafe_code)]

use std::collections::HashMap;

use oath_ast::{
    ConstantVarDef, Contract, ContractInterface, ContractUnit, EnumDef, EnumFieldDef, EventDef,
    FuncDef, Ident,
};

use crate::error::CompilerError;

/// Every std interface id starts with these bytes on the wire.
pub const STD_ID_PREFIX: &[u8] = b"ALPH";

/// The project being compiled: all units, keyed by name.
#[derive(Debug)]
pub struct MultiContract {
    units: Vec<ContractUnit>,
    index: HashMap<String, usize>,
}

impl MultiContract {
    pub fn new(units: Vec<ContractUnit>) -> Result<Self, CompilerError> {
        let mut index = HashMap::new();
        for (i, unit) in units.iter().enumerate() {
            if index.insert(unit.name().to_string(), i).is_some() {
                return Err(CompilerError {
                    message: format!(
                        "duplicate contract or script name \"{}\"",
                        unit.name()
                    ),
                    span: unit.ident().span,
                });
            }
        }
        Ok(MultiContract { units, index })
    }

    pub fn units(&self) -> &[ContractUnit] {
        &self.units
    }

    pub fn get(&self, name: &str) -> Option<&ContractUnit> {
        self.index.get(name).map(|i| &self.units[*i])
    }
}

/// Flattened definitions of one contract: everything it declares plus
/// everything it inherits, in final method order.
pub struct ExtractedDefs {
    pub funcs: Vec<FuncDef>,
    pub events: Vec<EventDef>,
    pub consts: Vec<ConstantVarDef>,
    pub enums: Vec<EnumDef>,
    /// Full std interface id bytes (prefix included), before the
    /// enabled flag is applied.
    pub std_id: Option<Vec<u8>>,
    pub std_id_enabled: bool,
}

/// Resolves inheritance for a project. Closures are memoized in
/// `parents`; cycles surface on first touch.
pub struct Resolver<'a> {
    multi: &'a MultiContract,
    parents: HashMap<String, Vec<String>>,
}

impl<'a> Resolver<'a> {
    pub fn new(multi: &'a MultiContract) -> Self {
        Resolver {
            multi,
            parents: HashMap::new(),
        }
    }

    /// Transitive ancestors of a unit, ancestors-first, deduplicated.
    pub fn closure(&mut self, ident: &Ident) -> Result<Vec<String>, CompilerError> {
        let mut visiting = Vec::new();
        self.closure_rec(ident, &mut visiting)
    }

    fn closure_rec(
        &mut self,
        ident: &Ident,
        visiting: &mut Vec<String>,
    ) -> Result<Vec<String>, CompilerError> {
        let name = ident.node.as_str();
        if let Some(found) = self.parents.get(name) {
            return Ok(found.clone());
        }
        if visiting.iter().any(|v| v == name) {
            return Err(CompilerError {
                message: format!("cyclic inheritance involving \"{name}\""),
                span: ident.span,
            });
        }
        let unit = self.multi.get(name).ok_or_else(|| CompilerError {
            message: format!("undefined contract type \"{name}\""),
            span: ident.span,
        })?;
        let parent_idents: Vec<Ident> =
            unit.parent_names().into_iter().cloned().collect();

        visiting.push(name.to_string());
        let mut closure: Vec<String> = Vec::new();
        for parent in &parent_idents {
            let parent_unit = self.multi.get(&parent.node).ok_or_else(|| CompilerError {
                message: format!("undefined contract type \"{}\"", parent.node),
                span: parent.span,
            })?;
            if !parent_unit.inheritable() {
                return Err(CompilerError {
                    message: format!(
                        "\"{}\" cannot be inherited from",
                        parent.node
                    ),
                    span: parent.span,
                });
            }
            for ancestor in self.closure_rec(parent, visiting)? {
                if !closure.contains(&ancestor) {
                    closure.push(ancestor);
                }
            }
            if !closure.contains(&parent.node) {
                closure.push(parent.node.clone());
            }
        }
        visiting.pop();
        self.parents.insert(name.to_string(), closure.clone());
        Ok(closure)
    }

    /// Interfaces in the closure, nearest-ancestor-last, validated to
    /// form a single inheritance chain.
    fn interface_chain(
        &mut self,
        owner: &Ident,
    ) -> Result<Vec<&'a ContractInterface>, CompilerError> {
        let closure = self.closure(owner)?;
        let mut ifaces: Vec<(&'a ContractInterface, usize)> = Vec::new();
        for name in &closure {
            if let Some(ContractUnit::Interface(i)) = self.multi.get(name) {
                let size = self.closure(&i.ident)?.len();
                ifaces.push((i, size));
            }
        }
        ifaces.sort_by_key(|(_, size)| *size);
        for pair in ifaces.windows(2) {
            let (shallow, _) = pair[0];
            let (deep, _) = pair[1];
            let deep_closure = self.closure(&deep.ident)?;
            if !deep_closure.contains(&shallow.ident.node) {
                return Err(CompilerError {
                    message: format!(
                        "interfaces inherited by \"{}\" do not form a single chain",
                        owner.node
                    ),
                    span: owner.span,
                });
            }
        }
        Ok(ifaces.into_iter().map(|(i, _)| i).collect())
    }

    /// The deepest std interface id on the chain, each declaration
    /// strictly extending its predecessor's bytes.
    fn chain_std_id(
        chain: &[&ContractInterface],
    ) -> Result<Option<Vec<u8>>, CompilerError> {
        let mut current: Option<(&ContractInterface, &[u8])> = None;
        for iface in chain {
            if let Some(id) = &iface.std_id {
                if let Some((parent, parent_id)) = current {
                    if !id.starts_with(parent_id) || id.len() == parent_id.len() {
                        return Err(CompilerError {
                            message: format!(
                                "std interface id of \"{}\" must strictly extend \"{}\"",
                                iface.ident.node, parent.ident.node
                            ),
                            span: iface.ident.span,
                        });
                    }
                }
                current = Some((iface, id));
            }
        }
        Ok(current.map(|(_, id)| {
            let mut full = STD_ID_PREFIX.to_vec();
            full.extend_from_slice(id);
            full
        }))
    }

    /// Merge all inherited and own definitions of a contract.
    pub fn extract_defs(&mut self, contract: &'a Contract) -> Result<ExtractedDefs, CompilerError> {
        let closure = self.closure(&contract.ident)?;
        let chain = self.interface_chain(&contract.ident)?;
        let std_id = Self::chain_std_id(&chain)?;

        let mut contract_parents: Vec<&'a Contract> = Vec::new();
        for name in &closure {
            if let Some(ContractUnit::Contract(c)) = self.multi.get(name) {
                contract_parents.push(c);
            }
        }

        // std-id field flag: every contract on the closure that sets it
        // must agree; the default is on.
        let mut std_id_enabled: Option<bool> = None;
        for c in contract_parents.iter().chain(std::iter::once(&contract)) {
            if let Some(flag) = c.std_id_enabled {
                match std_id_enabled {
                    Some(prev) if prev != flag => {
                        return Err(CompilerError {
                            message: format!(
                                "contracts inherited by \"{}\" disagree on the std interface id field",
                                contract.ident.node
                            ),
                            span: contract.ident.span,
                        });
                    }
                    _ => std_id_enabled = Some(flag),
                }
            }
        }

        // Interface functions first, then contract parents, then own.
        let mut sources: Vec<&'a FuncDef> = Vec::new();
        for iface in &chain {
            sources.extend(iface.funcs.iter());
        }
        for parent in &contract_parents {
            sources.extend(parent.funcs.iter());
        }
        sources.extend(contract.funcs.iter());

        let mut order: Vec<String> = Vec::new();
        let mut abstracts: HashMap<String, &FuncDef> = HashMap::new();
        let mut concretes: HashMap<String, &FuncDef> = HashMap::new();
        for def in sources {
            let name = def.id.name.clone();
            let table = if def.is_abstract() {
                &mut abstracts
            } else {
                &mut concretes
            };
            if table.insert(name.clone(), def).is_some() {
                return Err(CompilerError {
                    message: format!("duplicate definition of \"{name}\""),
                    span: def.span,
                });
            }
            if !order.contains(&name) {
                order.push(name);
            }
        }
        for (name, abs) in &abstracts {
            if let Some(conc) = concretes.get(name) {
                if !abs.signature_matches(conc) {
                    return Err(CompilerError {
                        message: format!(
                            "function \"{name}\" is defined with conflicting signatures"
                        ),
                        span: conc.span,
                    });
                }
            }
        }
        if !contract.is_abstract {
            let missing: Vec<&str> = order
                .iter()
                .filter(|n| !concretes.contains_key(*n))
                .map(|n| n.as_str())
                .collect();
            if !missing.is_empty() {
                return Err(CompilerError {
                    message: format!(
                        "contract \"{}\" does not implement: {}",
                        contract.ident.node,
                        missing.join(", ")
                    ),
                    span: contract.span,
                });
            }
        }
        let funcs: Vec<FuncDef> = order
            .iter()
            .map(|name| {
                concretes
                    .get(name)
                    .or_else(|| abstracts.get(name))
                    .map(|d| (*d).clone())
                    .expect("every ordered name has a definition")
            })
            .collect();

        // Events: interfaces first, then contracts.
        let mut events: Vec<EventDef> = Vec::new();
        for iface in &chain {
            events.extend(iface.events.iter().cloned());
        }
        for parent in &contract_parents {
            events.extend(parent.events.iter().cloned());
        }
        events.extend(contract.events.iter().cloned());

        // Constants concatenate; enums merge by id.
        let mut consts: Vec<ConstantVarDef> = Vec::new();
        for parent in &contract_parents {
            consts.extend(parent.consts.iter().cloned());
        }
        consts.extend(contract.consts.iter().cloned());

        let enums = Self::merge_enums(
            contract_parents
                .iter()
                .flat_map(|p| p.enums.iter())
                .chain(contract.enums.iter()),
        )?;

        Ok(ExtractedDefs {
            funcs,
            events,
            consts,
            enums,
            std_id,
            std_id_enabled: std_id_enabled.unwrap_or(true),
        })
    }

    fn merge_enums<'e>(
        defs: impl Iterator<Item = &'e EnumDef>,
    ) -> Result<Vec<EnumDef>, CompilerError> {
        let mut order: Vec<String> = Vec::new();
        let mut merged: HashMap<String, EnumDef> = HashMap::new();
        for def in defs {
            let name = def.ident.node.clone();
            match merged.get_mut(&name) {
                None => {
                    order.push(name.clone());
                    merged.insert(name, def.clone());
                }
                Some(existing) => {
                    for field in &def.fields {
                        if existing
                            .fields
                            .iter()
                            .any(|f| f.ident.node == field.ident.node)
                        {
                            return Err(CompilerError {
                                message: format!(
                                    "duplicate definition of \"{}.{}\"",
                                    name, field.ident.node
                                ),
                                span: field.ident.span,
                            });
                        }
                        existing.fields.push(field.clone());
                    }
                }
            }
        }
        for name in &order {
            let def = &merged[name];
            Self::check_enum_field_types(name, &def.fields)?;
        }
        Ok(order.into_iter().map(|n| merged.remove(&n).unwrap()).collect())
    }

    fn check_enum_field_types(
        name: &str,
        fields: &[EnumFieldDef],
    ) -> Result<(), CompilerError> {
        let Some(first) = fields.first() else {
            return Ok(());
        };
        let ty = first.value.ty();
        for field in &fields[1..] {
            if field.value.ty() != ty {
                return Err(CompilerError {
                    message: format!("enum \"{name}\" members must share one type"),
                    span: field.ident.span,
                });
            }
        }
        Ok(())
    }

    /// Full function set of an interface, inherited chain included.
    pub fn interface_funcs(
        &mut self,
        iface: &'a ContractInterface,
    ) -> Result<Vec<FuncDef>, CompilerError> {
        let chain = self.interface_chain(&iface.ident)?;
        let mut seen: Vec<String> = Vec::new();
        let mut funcs: Vec<FuncDef> = Vec::new();
        for def in chain
            .iter()
            .flat_map(|i| i.funcs.iter())
            .chain(iface.funcs.iter())
        {
            if seen.contains(&def.id.name) {
                return Err(CompilerError {
                    message: format!("duplicate definition of \"{}\"", def.id.name),
                    span: def.span,
                });
            }
            seen.push(def.id.name.clone());
            funcs.push(def.clone());
        }
        Ok(funcs)
    }

    /// Interface declaration rules: abstract public functions only, no
    /// state of any kind.
    pub fn validate_interface(
        &mut self,
        iface: &ContractInterface,
    ) -> Result<(), CompilerError> {
        if !iface.fields.is_empty() {
            return Err(CompilerError {
                message: format!("interface \"{}\" cannot declare fields", iface.ident.node),
                span: iface.ident.span,
            });
        }
        if !iface.consts.is_empty() {
            return Err(CompilerError {
                message: format!(
                    "interface \"{}\" cannot declare constants",
                    iface.ident.node
                ),
                span: iface.ident.span,
            });
        }
        if !iface.enums.is_empty() {
            return Err(CompilerError {
                message: format!("interface \"{}\" cannot declare enums", iface.ident.node),
                span: iface.ident.span,
            });
        }
        for func in &iface.funcs {
            if !func.is_abstract() {
                return Err(CompilerError {
                    message: format!(
                        "interface function \"{}\" cannot have a body",
                        func.id.name
                    ),
                    span: func.span,
                });
            }
            if !func.is_public {
                return Err(CompilerError {
                    message: format!(
                        "interface function \"{}\" must be public",
                        func.id.name
                    ),
                    span: func.span,
                });
            }
        }
        Ok(())
    }

    /// `extends P(a, b, …)` must re-declare the parent's entire field
    /// list, same names' types and mutability, in order.
    pub fn validate_contract_inheritance(
        &mut self,
        contract: &Contract,
    ) -> Result<(), CompilerError> {
        for inheritance in &contract.inheritances {
            let oath_ast::Inheritance::Contract { parent, fields } = inheritance else {
                continue;
            };
            let Some(ContractUnit::Contract(parent_contract)) = self.multi.get(&parent.node)
            else {
                // Kind and existence surface in closure validation.
                continue;
            };
            let matches = fields.len() == parent_contract.fields.len()
                && fields.iter().zip(&parent_contract.fields).all(|(ident, pf)| {
                    contract.fields.iter().any(|cf| {
                        cf.ident.node == ident.node
                            && cf.ty == pf.ty
                            && cf.is_mutable == pf.is_mutable
                    })
                });
            if !matches {
                return Err(CompilerError {
                    message: format!(
                        "inherited fields of \"{}\" do not match declaration in \"{}\"",
                        parent.node, contract.ident.node
                    ),
                    span: parent.span,
                });
            }
        }
        Ok(())
    }
}

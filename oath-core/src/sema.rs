#![forbid(unsafe_code)]

use oath_ast::{
    ApproveAsset, Expr, ExprKind, FuncDef, Ident, Statement, Type, Val,
};

use crate::builtins::{builtin, is_contract_static_builtin, BuiltinFunc};
use crate::error::CompilerError;
use crate::state::{CompilerState, UnitKind, VarKind};

fn type_list(types: &[Type]) -> String {
    types
        .iter()
        .map(Type::signature)
        .collect::<Vec<_>>()
        .join(", ")
}

/// True when the statement list ends every control-flow path in a
/// `return` or a call to a diverging built-in.
pub(crate) fn stmts_terminate(stmts: &[Statement]) -> bool {
    match stmts.last() {
        None => false,
        Some(Statement::Return(_)) => true,
        Some(Statement::Expr(e)) => is_diverging_call(e),
        Some(Statement::IfElse(s)) => {
            let Some(else_body) = &s.else_body else {
                return false;
            };
            s.branches.iter().all(|b| stmts_terminate(&b.body)) && stmts_terminate(else_body)
        }
        _ => false,
    }
}

fn is_diverging_call(e: &Expr) -> bool {
    match &e.unparen().kind {
        ExprKind::Call { id, .. } => {
            id.is_builtin && builtin(&id.name).is_some_and(|f| f.diverges)
        }
        _ => false,
    }
}

impl CompilerState {
    /// Type an expression. The result is memoized on the node; repeated
    /// calls return the memo without recomputation or side effects.
    pub fn type_of(&mut self, e: &Expr) -> Result<Vec<Type>, CompilerError> {
        if let Some(t) = e.ty.get() {
            return Ok(t.clone());
        }
        let t = self.infer_expr(e)?;
        let _ = e.ty.set(t.clone());
        Ok(t)
    }

    pub fn type_of_single(&mut self, e: &Expr) -> Result<Type, CompilerError> {
        let mut types = self.type_of(e)?;
        if types.len() != 1 {
            return Err(CompilerError {
                message: format!("expected a single value, got {}", type_list(&types)),
                span: e.span,
            });
        }
        Ok(types.remove(0))
    }

    fn infer_expr(&mut self, e: &Expr) -> Result<Vec<Type>, CompilerError> {
        match &e.kind {
            ExprKind::Const(v) => Ok(vec![v.ty()]),
            ExprKind::Variable(ident) => Ok(vec![self.get_type(ident)?]),
            ExprKind::EnumField { enum_id, field } => {
                let joined = Ident::new(
                    field.span,
                    format!("{}.{}", enum_id.node, field.node),
                );
                let info = self.get_variable(&joined, false).map_err(|_| CompilerError {
                    message: format!(
                        "undefined enum field \"{}.{}\"",
                        enum_id.node, field.node
                    ),
                    span: field.span,
                })?;
                Ok(vec![info.ty])
            }
            ExprKind::CreateArray(elems) => {
                if elems.is_empty() {
                    return Err(CompilerError {
                        message: "array literals cannot be empty".to_string(),
                        span: e.span,
                    });
                }
                let elem_ty = self.type_of_single(&elems[0])?;
                for elem in &elems[1..] {
                    let t = self.type_of_single(elem)?;
                    if t != elem_ty {
                        return Err(CompilerError {
                            message: format!(
                                "array elements must share one type, got {} and {}",
                                elem_ty.signature(),
                                t.signature()
                            ),
                            span: elem.span,
                        });
                    }
                }
                Ok(vec![Type::array(elem_ty, elems.len())])
            }
            ExprKind::ArrayElement { array, indexes } => {
                let base = self.type_of_single(array)?;
                let (_, residual) = self.array_element_ty(&base, indexes)?;
                // Indexing anything but a named variable first lands the
                // array in generated local slots.
                if !matches!(array.unparen().kind, ExprKind::Variable(_)) {
                    self.create_array_ref(base)?;
                }
                Ok(vec![residual])
            }
            ExprKind::Unary { op, expr } => {
                let t = self.type_of_single(expr)?;
                let out = op.result_type(&t).ok_or_else(|| CompilerError {
                    message: format!(
                        "operator {op} cannot be applied to {}",
                        t.signature()
                    ),
                    span: e.span,
                })?;
                Ok(vec![out])
            }
            ExprKind::Binary { op, lhs, rhs } => {
                let lt = self.type_of_single(lhs)?;
                let rt = self.type_of_single(rhs)?;
                let out = op.result_type(&lt, &rt).ok_or_else(|| CompilerError {
                    message: format!(
                        "operator {op} cannot be applied to {} and {}",
                        lt.signature(),
                        rt.signature()
                    ),
                    span: e.span,
                })?;
                Ok(vec![out])
            }
            ExprKind::ContractConv { type_id, address } => {
                let at = self.type_of_single(address)?;
                if at != Type::ByteVec {
                    return Err(CompilerError {
                        message: format!(
                            "contract id must be ByteVec, got {}",
                            at.signature()
                        ),
                        span: address.span,
                    });
                }
                let info = self
                    .contract_info(&type_id.node)
                    .ok_or_else(|| CompilerError {
                        message: format!("undefined contract type \"{}\"", type_id.node),
                        span: type_id.span,
                    })?;
                let instantiable = matches!(
                    info.kind,
                    UnitKind::Interface | UnitKind::Contract { is_abstract: false }
                );
                if !instantiable {
                    return Err(CompilerError {
                        message: format!("contract \"{}\" is not instantiable", type_id.node),
                        span: type_id.span,
                    });
                }
                Ok(vec![Type::contract(type_id.node.clone())])
            }
            ExprKind::Call { id, approve, args } => {
                self.check_approve_assets(approve)?;
                if id.is_builtin {
                    let f = builtin(&id.name).ok_or_else(|| CompilerError {
                        message: format!("undefined function \"{}!\"", id.name),
                        span: e.span,
                    })?;
                    self.check_approve_cross(!approve.is_empty(), false, &id.name, e)?;
                    self.check_builtin_args(&f, args, e)
                } else {
                    let sig = self.func_sig(&id.name).cloned().ok_or_else(|| {
                        CompilerError {
                            message: format!("undefined function \"{}\"", id.name),
                            span: e.span,
                        }
                    })?;
                    self.check_approve_cross(
                        !approve.is_empty(),
                        sig.use_preapproved_assets,
                        &id.name,
                        e,
                    )?;
                    self.check_call_args(&sig.arg_types, args, &id.name, e.span)?;
                    Ok(sig.rtypes)
                }
            }
            ExprKind::StaticContractCall {
                contract,
                id,
                approve,
                args,
            } => {
                if !(id.is_builtin && is_contract_static_builtin(&id.name)) {
                    return Err(CompilerError {
                        message: format!(
                            "\"{}\" is not a static function of \"{}\"",
                            id.name, contract.node
                        ),
                        span: e.span,
                    });
                }
                if !approve.is_empty() {
                    return Err(CompilerError {
                        message: format!(
                            "function \"{}\" does not accept preapproved assets",
                            id.name
                        ),
                        span: e.span,
                    });
                }
                let info = self
                    .contract_info(&contract.node)
                    .ok_or_else(|| CompilerError {
                        message: format!("undefined contract type \"{}\"", contract.node),
                        span: contract.span,
                    })?;
                if !matches!(info.kind, UnitKind::Contract { .. }) {
                    return Err(CompilerError {
                        message: format!(
                            "cannot encode fields of \"{}\": not a contract",
                            contract.node
                        ),
                        span: contract.span,
                    });
                }
                let expected: Vec<Type> = match id.name.as_str() {
                    "encodeImmFields" => info
                        .fields
                        .iter()
                        .filter(|f| !f.is_mutable)
                        .map(|f| f.ty.clone())
                        .collect(),
                    "encodeMutFields" => info
                        .fields
                        .iter()
                        .filter(|f| f.is_mutable)
                        .map(|f| f.ty.clone())
                        .collect(),
                    _ => info.fields.iter().map(|f| f.ty.clone()).collect(),
                };
                self.check_call_args(&expected, args, &id.name, e.span)?;
                Ok(vec![Type::ByteVec])
            }
            ExprKind::ContractCall {
                obj,
                id,
                approve,
                args,
            } => {
                self.check_approve_assets(approve)?;
                if id.is_builtin {
                    return Err(CompilerError {
                        message: format!(
                            "static function \"{}\" cannot be called on a contract instance",
                            id.name
                        ),
                        span: e.span,
                    });
                }
                let ot = self.type_of_single(obj)?;
                let Type::Contract(type_id) = ot else {
                    return Err(CompilerError {
                        message: format!(
                            "expected contract instance, got {}",
                            ot.signature()
                        ),
                        span: obj.span,
                    });
                };
                let info = self
                    .contract_info(type_id.as_str())
                    .ok_or_else(|| CompilerError {
                        message: format!("undefined contract type \"{type_id}\""),
                        span: obj.span,
                    })?;
                let sig = info.func(&id.name).cloned().ok_or_else(|| CompilerError {
                    message: format!(
                        "contract \"{type_id}\" has no function \"{}\"",
                        id.name
                    ),
                    span: e.span,
                })?;
                if !sig.is_public {
                    return Err(CompilerError {
                        message: format!("function \"{type_id}.{}\" is private", id.name),
                        span: e.span,
                    });
                }
                self.check_approve_cross(
                    !approve.is_empty(),
                    sig.use_preapproved_assets,
                    &id.name,
                    e,
                )?;
                self.check_call_args(&sig.arg_types, args, &id.name, e.span)?;
                Ok(sig.rtypes)
            }
            ExprKind::IfElse {
                branches,
                else_expr,
            } => {
                // Branches first, else last: the emit replay walks the
                // same order.
                let mut result: Option<Vec<Type>> = None;
                for (cond, value) in branches {
                    let ct = self.type_of_single(cond)?;
                    if ct != Type::Bool {
                        return Err(CompilerError {
                            message: format!("condition must be Bool, got {}", ct.signature()),
                            span: cond.span,
                        });
                    }
                    let vt = self.type_of(value)?;
                    if let Some(prev) = &result {
                        if *prev != vt {
                            return Err(CompilerError {
                                message: format!(
                                    "if/else branches have mismatched types: {} vs {}",
                                    type_list(&vt),
                                    type_list(prev)
                                ),
                                span: value.span,
                            });
                        }
                    }
                    result = Some(vt);
                }
                let else_ty = self.type_of(else_expr)?;
                if let Some(prev) = &result {
                    if *prev != else_ty {
                        return Err(CompilerError {
                            message: format!(
                                "if/else branches have mismatched types: {} vs {}",
                                type_list(prev),
                                type_list(&else_ty)
                            ),
                            span: else_expr.span,
                        });
                    }
                }
                Ok(else_ty)
            }
            ExprKind::Paren(inner) => self.type_of(inner),
            ExprKind::AlphTokenId => Ok(vec![Type::ByteVec]),
        }
    }

    fn check_call_args(
        &mut self,
        expected: &[Type],
        args: &[Expr],
        callee: &str,
        span: oath_ast::Span,
    ) -> Result<(), CompilerError> {
        let mut actual = Vec::with_capacity(args.len());
        for arg in args {
            actual.push(self.type_of_single(arg)?);
        }
        if actual != expected {
            return Err(CompilerError {
                message: format!(
                    "arguments of \"{callee}\" must be ({}), got ({})",
                    type_list(expected),
                    type_list(&actual)
                ),
                span,
            });
        }
        Ok(())
    }

    fn check_builtin_args(
        &mut self,
        f: &BuiltinFunc,
        args: &[Expr],
        site: &Expr,
    ) -> Result<Vec<Type>, CompilerError> {
        if f.variadic {
            for arg in args {
                self.type_of_single(arg)?;
            }
            return Ok(f.rtypes.clone());
        }
        self.check_call_args(&f.params, args, &format!("{}!", f.name), site.span)?;
        Ok(f.rtypes.clone())
    }

    fn check_approve_assets(
        &mut self,
        approve: &[ApproveAsset],
    ) -> Result<(), CompilerError> {
        for entry in approve {
            if entry.tokens.is_empty() {
                return Err(CompilerError {
                    message: "approved assets entry must approve at least one token"
                        .to_string(),
                    span: entry.address.span,
                });
            }
            let at = self.type_of_single(&entry.address)?;
            if at != Type::Address {
                return Err(CompilerError {
                    message: format!(
                        "approved assets address must be Address, got {}",
                        at.signature()
                    ),
                    span: entry.address.span,
                });
            }
            for (token, amount) in &entry.tokens {
                let tt = self.type_of_single(token)?;
                if tt != Type::ByteVec {
                    return Err(CompilerError {
                        message: format!("token id must be ByteVec, got {}", tt.signature()),
                        span: token.span,
                    });
                }
                let amt = self.type_of_single(amount)?;
                if amt != Type::U256 {
                    return Err(CompilerError {
                        message: format!(
                            "token amount must be U256, got {}",
                            amt.signature()
                        ),
                        span: amount.span,
                    });
                }
            }
        }
        Ok(())
    }

    fn check_approve_cross(
        &self,
        has_braces: bool,
        callee_accepts: bool,
        callee: &str,
        site: &Expr,
    ) -> Result<(), CompilerError> {
        if has_braces && !callee_accepts {
            return Err(CompilerError {
                message: format!("function \"{callee}\" does not accept preapproved assets"),
                span: site.span,
            });
        }
        if !has_braces && callee_accepts {
            return Err(CompilerError {
                message: format!("call to \"{callee}\" requires braces to approve assets"),
                span: site.span,
            });
        }
        Ok(())
    }

    /// Fold a compile-time constant array index: a U256 literal, constant
    /// variable or enum field.
    pub(crate) fn const_index(&mut self, e: &Expr) -> Result<usize, CompilerError> {
        let folded = match &e.unparen().kind {
            ExprKind::Const(Val::U256(v)) => Some(*v),
            ExprKind::Variable(ident) => {
                let info = self.get_variable(ident, false)?;
                match (info.kind, info.value) {
                    (VarKind::Constant, Some(Val::U256(v))) => Some(v),
                    _ => None,
                }
            }
            ExprKind::EnumField { enum_id, field } => {
                let joined = Ident::new(
                    field.span,
                    format!("{}.{}", enum_id.node, field.node),
                );
                match self.get_variable(&joined, false)?.value {
                    Some(Val::U256(v)) => Some(v),
                    _ => None,
                }
            }
            _ => None,
        };
        folded
            .map(|v| v as usize)
            .ok_or_else(|| CompilerError {
                message: "array index must be a compile-time constant".to_string(),
                span: e.span,
            })
    }

    /// Walk an index list down an array type, validating every level and
    /// bound. Returns the flattened slot offset and the residual type.
    pub(crate) fn array_element_ty(
        &mut self,
        base: &Type,
        indexes: &[Expr],
    ) -> Result<(usize, Type), CompilerError> {
        let mut ty = base.clone();
        let mut offset = 0usize;
        for idx in indexes {
            let it = self.type_of_single(idx)?;
            if it != Type::U256 {
                return Err(CompilerError {
                    message: format!("array index must be U256, got {}", it.signature()),
                    span: idx.span,
                });
            }
            let Type::FixedArray { elem, size } = ty else {
                return Err(CompilerError {
                    message: format!("cannot index into {}", ty.signature()),
                    span: idx.span,
                });
            };
            let i = self.const_index(idx)?;
            if i >= size {
                return Err(CompilerError {
                    message: format!(
                        "array index {i} out of range for [{}; {size}]",
                        elem.signature()
                    ),
                    span: idx.span,
                });
            }
            offset += i * elem.flattened_len();
            ty = *elem;
        }
        Ok((offset, ty))
    }

    // --- statements ----------------------------------------------------

    pub fn check_stmt(&mut self, stmt: &Statement) -> Result<(), CompilerError> {
        match stmt {
            Statement::VarDef(def) => {
                let rhs = self.type_of(&def.value)?;
                if def.decls.len() != rhs.len() {
                    return Err(CompilerError {
                        message: format!(
                            "let binding expects {} values, got {}",
                            def.decls.len(),
                            rhs.len()
                        ),
                        span: def.span,
                    });
                }
                for (decl, ty) in def.decls.iter().zip(&rhs) {
                    if let oath_ast::VarDeclaration::Named { mutable, ident } = decl {
                        self.add_local_variable(ident, ty.clone(), *mutable, false, false)?;
                    }
                }
                Ok(())
            }
            Statement::Assign(assign) => {
                let rhs = self.type_of(&assign.value)?;
                let mut lhs = Vec::with_capacity(assign.targets.len());
                for target in &assign.targets {
                    let info = self.get_variable(&target.ident, true)?;
                    if target.indexes.is_empty() {
                        lhs.push(info.ty);
                    } else {
                        let (_, residual) =
                            self.array_element_ty(&info.ty, &target.indexes)?;
                        lhs.push(residual);
                    }
                }
                if lhs != rhs {
                    return Err(CompilerError {
                        message: format!(
                            "cannot assign ({}) to ({})",
                            type_list(&rhs),
                            type_list(&lhs)
                        ),
                        span: assign.span,
                    });
                }
                Ok(())
            }
            Statement::Expr(e) => {
                if !matches!(
                    e.kind,
                    ExprKind::Call { .. }
                        | ExprKind::StaticContractCall { .. }
                        | ExprKind::ContractCall { .. }
                ) {
                    return Err(CompilerError {
                        message: "only calls can be used as statements".to_string(),
                        span: e.span,
                    });
                }
                self.type_of(e)?;
                Ok(())
            }
            Statement::IfElse(s) => {
                for branch in &s.branches {
                    let ct = self.type_of_single(&branch.cond)?;
                    if ct != Type::Bool {
                        return Err(CompilerError {
                            message: format!(
                                "condition must be Bool, got {}",
                                ct.signature()
                            ),
                            span: branch.cond.span,
                        });
                    }
                    for stmt in &branch.body {
                        self.check_stmt(stmt)?;
                    }
                }
                if let Some(else_body) = &s.else_body {
                    for stmt in else_body {
                        self.check_stmt(stmt)?;
                    }
                }
                Ok(())
            }
            Statement::While(s) => {
                let ct = self.type_of_single(&s.cond)?;
                if ct != Type::Bool {
                    return Err(CompilerError {
                        message: format!("condition must be Bool, got {}", ct.signature()),
                        span: s.cond.span,
                    });
                }
                for stmt in &s.body {
                    self.check_stmt(stmt)?;
                }
                Ok(())
            }
            Statement::For(s) => {
                self.check_stmt(&s.init)?;
                let ct = self.type_of_single(&s.cond)?;
                if ct != Type::Bool {
                    return Err(CompilerError {
                        message: format!("condition must be Bool, got {}", ct.signature()),
                        span: s.cond.span,
                    });
                }
                self.check_stmt(&s.update)?;
                for stmt in &s.body {
                    self.check_stmt(stmt)?;
                }
                Ok(())
            }
            Statement::Return(s) => {
                let mut actual = Vec::new();
                for e in &s.exprs {
                    actual.extend(self.type_of(e)?);
                }
                let expected = self
                    .func_sig(self.current_scope())
                    .map(|f| f.rtypes.clone())
                    .unwrap_or_default();
                if actual != expected {
                    return Err(CompilerError {
                        message: format!(
                            "expected return types ({}), got ({})",
                            type_list(&expected),
                            type_list(&actual)
                        ),
                        span: s.span,
                    });
                }
                Ok(())
            }
            Statement::EmitEvent(s) => {
                let (_, sig) = self.event(&s.id.node).ok_or_else(|| CompilerError {
                    message: format!("undefined event \"{}\"", s.id.node),
                    span: s.id.span,
                })?;
                let expected = sig.field_types.clone();
                self.check_call_args(&expected, &s.args, &s.id.node, s.span)?;
                Ok(())
            }
            Statement::Debug(s) => {
                if s.parts.len() != s.interpolations.len() + 1 {
                    return Err(CompilerError {
                        message: "malformed debug interpolation".to_string(),
                        span: s.span,
                    });
                }
                for e in &s.interpolations {
                    let t = self.type_of_single(e)?;
                    if t.is_array() {
                        return Err(CompilerError {
                            message: "cannot interpolate array values".to_string(),
                            span: e.span,
                        });
                    }
                }
                Ok(())
            }
        }
    }

    // --- functions -----------------------------------------------------

    /// Check one function: bind arguments, check the body, verify the
    /// exhaustive-return rule and the per-function unused sweeps.
    pub fn check_func(&mut self, def: &FuncDef) -> Result<(), CompilerError> {
        let Some(body) = &def.body else {
            return Err(CompilerError {
                message: format!("function \"{}\" must have a body", def.id.name),
                span: def.span,
            });
        };
        self.enter_function(&def.id.name);
        for arg in &def.args {
            self.add_local_variable(
                &arg.ident,
                arg.ty.clone(),
                arg.is_mutable,
                arg.is_unused,
                false,
            )?;
        }
        for stmt in body {
            self.check_stmt(stmt)?;
        }
        if !def.rtypes.is_empty() && !stmts_terminate(body) {
            self.exit_function();
            return Err(CompilerError {
                message: format!(
                    "function \"{}\" does not return on all paths",
                    def.id.name
                ),
                span: def.span,
            });
        }
        self.check_unused_local_vars();
        self.check_unassigned_local_mutable_vars();
        self.exit_function();
        Ok(())
    }
}

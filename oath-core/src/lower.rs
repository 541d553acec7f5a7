#![forbid(unsafe_code)]

use oath_ast::{
    flattened_len_of, ApproveAsset, BinOp, Expr, ExprKind, FuncDef, Span, Statement, Type,
    UnaryOp,
};
use oath_vm::{Instr, Method};

use crate::error::CompilerError;
use crate::state::{const_instr, CompilerState, Phase};

fn pops(n: usize) -> Vec<Instr> {
    std::iter::repeat(Instr::Pop).take(n).collect()
}

fn binop_instr(op: BinOp, operand: &Type) -> Instr {
    use Instr::*;
    match (op, operand) {
        (BinOp::Add, Type::U256) => U256Add,
        (BinOp::Sub, Type::U256) => U256Sub,
        (BinOp::Mul, Type::U256) => U256Mul,
        (BinOp::Div, Type::U256) => U256Div,
        (BinOp::Mod, Type::U256) => U256Mod,
        (BinOp::Add, Type::I256) => I256Add,
        (BinOp::Sub, Type::I256) => I256Sub,
        (BinOp::Mul, Type::I256) => I256Mul,
        (BinOp::Div, Type::I256) => I256Div,
        (BinOp::Mod, Type::I256) => I256Mod,
        (BinOp::Concat, _) => ByteVecConcat,
        (BinOp::Eq, Type::U256) => U256Eq,
        (BinOp::Ne, Type::U256) => U256Neq,
        (BinOp::Lt, Type::U256) => U256Lt,
        (BinOp::Le, Type::U256) => U256Le,
        (BinOp::Gt, Type::U256) => U256Gt,
        (BinOp::Ge, Type::U256) => U256Ge,
        (BinOp::Eq, Type::I256) => I256Eq,
        (BinOp::Ne, Type::I256) => I256Neq,
        (BinOp::Lt, Type::I256) => I256Lt,
        (BinOp::Le, Type::I256) => I256Le,
        (BinOp::Gt, Type::I256) => I256Gt,
        (BinOp::Ge, Type::I256) => I256Ge,
        (BinOp::Eq, Type::Bool) => BoolEq,
        (BinOp::Ne, Type::Bool) => BoolNeq,
        (BinOp::And, _) => BoolAnd,
        (BinOp::Or, _) => BoolOr,
        (BinOp::Eq, Type::Address) => AddressEq,
        (BinOp::Ne, Type::Address) => AddressNeq,
        // Contract values are their ByteVec ids on the stack.
        (BinOp::Eq, _) => ByteVecEq,
        (BinOp::Ne, _) => ByteVecNeq,
        _ => unreachable!("operator typing admitted an impossible combination"),
    }
}

impl CompilerState {
    /// Validate a relative jump distance against the one-byte offset
    /// limit of the instruction encoding.
    fn branch_offset(&self, len: usize, span: Span) -> Result<i32, CompilerError> {
        if len > 255 {
            return Err(CompilerError {
                message: format!("branch offset {len} exceeds 255 instructions"),
                span,
            });
        }
        Ok(len as i32)
    }

    /// Emit a branch condition: the expression code plus the conditional
    /// jump taken when the condition fails. `!x` folds its negation into
    /// the jump polarity.
    fn emit_cond(&mut self, cond: &Expr) -> Result<(Vec<Instr>, bool), CompilerError> {
        if let ExprKind::Unary {
            op: UnaryOp::Not,
            expr,
        } = &cond.unparen().kind
        {
            Ok((self.emit_expr(expr)?, true))
        } else {
            Ok((self.emit_expr(cond)?, false))
        }
    }

    fn cond_branch(jump_when_true: bool, offset: i32) -> Instr {
        if jump_when_true {
            Instr::IfTrue(offset)
        } else {
            Instr::IfFalse(offset)
        }
    }

    pub fn emit_expr(&mut self, e: &Expr) -> Result<Vec<Instr>, CompilerError> {
        match &e.kind {
            ExprKind::Const(v) => Ok(vec![const_instr(v)]),
            ExprKind::Variable(ident) => self.gen_load_code(ident),
            ExprKind::EnumField { enum_id, field } => {
                let joined = oath_ast::Ident::new(
                    field.span,
                    format!("{}.{}", enum_id.node, field.node),
                );
                self.gen_load_code(&joined)
            }
            ExprKind::CreateArray(elems) => {
                let mut code = Vec::new();
                for elem in elems {
                    code.extend(self.emit_expr(elem)?);
                }
                Ok(code)
            }
            ExprKind::ArrayElement { array, indexes } => {
                let base = self.type_of_single(array)?;
                let (offset, residual) = self.array_element_ty(&base, indexes)?;
                let len = residual.flattened_len();
                if let ExprKind::Variable(ident) = &array.unparen().kind {
                    let info = self.get_variable(ident, false)?;
                    Ok(Self::load_slot_range(info.kind, info.index, offset, len))
                } else {
                    // Materialize the array into its generated slots,
                    // then load the selected range.
                    let mut code = self.emit_expr(array)?;
                    let ident = self.resolve_array_ref();
                    let info = self.get_variable(&ident, true)?;
                    code.extend(Self::store_slot_range(
                        info.kind,
                        info.index,
                        0,
                        base.flattened_len(),
                    ));
                    code.extend(Self::load_slot_range(info.kind, info.index, offset, len));
                    Ok(code)
                }
            }
            ExprKind::Unary { op, expr } => {
                let mut code = self.emit_expr(expr)?;
                code.push(match op {
                    UnaryOp::Not => Instr::BoolNot,
                    UnaryOp::Neg => Instr::I256Neg,
                });
                Ok(code)
            }
            ExprKind::Binary { op, lhs, rhs } => {
                let operand = self.type_of_single(lhs)?;
                let mut code = self.emit_expr(lhs)?;
                code.extend(self.emit_expr(rhs)?);
                code.push(binop_instr(*op, &operand));
                Ok(code)
            }
            ExprKind::ContractConv { address, .. } => self.emit_expr(address),
            ExprKind::Call { id, approve, args } => {
                let mut code = self.emit_approve_assets(approve)?;
                if id.is_builtin {
                    self.add_builtin_call(&id.name);
                    code.extend(self.emit_builtin_call(&id.name, args)?);
                } else {
                    self.add_internal_call(&id.name);
                    for arg in args {
                        code.extend(self.emit_expr(arg)?);
                    }
                    let index = self.func_method_index(&id.name).expect("checked call");
                    let index = u8::try_from(index).map_err(|_| CompilerError {
                        message: "too many functions in contract".to_string(),
                        span: e.span,
                    })?;
                    code.push(Instr::CallLocal(index));
                }
                Ok(code)
            }
            ExprKind::StaticContractCall {
                contract, id, args, ..
            } => {
                let info = self.contract_info(&contract.node).expect("checked call");
                let std_id = info.std_id.clone();
                let with_prefix = matches!(id.name.as_str(), "encodeImmFields" | "encodeFields")
                    && std_id.is_some();
                let mut code = Vec::new();
                let mut count = 0usize;
                if with_prefix {
                    code.push(Instr::BytesConst(std_id.unwrap()));
                    count += 1;
                }
                for arg in args {
                    count += flattened_len_of(&self.type_of(arg)?);
                    code.extend(self.emit_expr(arg)?);
                }
                code.push(Instr::U256Const(count as u128));
                code.push(Instr::Encode);
                Ok(code)
            }
            ExprKind::ContractCall {
                obj, id, approve, args,
            } => {
                let obj_ty = self.type_of_single(obj)?;
                let Type::Contract(type_id) = obj_ty else {
                    unreachable!("checked call");
                };
                let info = self.contract_info(type_id.as_str()).expect("checked call");
                let sig = info.func(&id.name).expect("checked call");
                let arg_len = flattened_len_of(&sig.arg_types);
                let ret_len = flattened_len_of(&sig.rtypes);
                let is_interface = info.kind.is_interface();

                // Evaluation order mirrors the check pass (approve, obj,
                // args); the object code itself lands after the lengths.
                let mut code = self.emit_approve_assets(approve)?;
                let obj_code = self.emit_expr(obj)?;
                for arg in args {
                    code.extend(self.emit_expr(arg)?);
                }
                code.push(Instr::U256Const(arg_len as u128));
                code.push(Instr::U256Const(ret_len as u128));
                code.extend(obj_code);
                code.push(Instr::CallExternal {
                    type_id: type_id.clone(),
                    func: id.name.clone(),
                });

                self.add_external_call(type_id, &id.name);
                if is_interface {
                    self.add_interface_func_call();
                }
                Ok(code)
            }
            ExprKind::IfElse {
                branches,
                else_expr,
            } => {
                let mut parts = Vec::with_capacity(branches.len());
                for (cond, value) in branches {
                    let cond_code = self.emit_cond(cond)?;
                    let body = self.emit_expr(value)?;
                    parts.push((cond_code, body, cond.span));
                }
                let else_code = self.emit_expr(else_expr)?;
                self.assemble_if_else(parts, else_code)
            }
            ExprKind::Paren(inner) => self.emit_expr(inner),
            ExprKind::AlphTokenId => Ok(vec![Instr::AlphTokenId]),
        }
    }

    /// Concatenate branch chunks back-to-front, sizing every forward
    /// jump from the code that follows it.
    fn assemble_if_else(
        &mut self,
        parts: Vec<((Vec<Instr>, bool), Vec<Instr>, Span)>,
        else_code: Vec<Instr>,
    ) -> Result<Vec<Instr>, CompilerError> {
        let mut acc = else_code;
        for ((cond_code, jump_when_true), body, span) in parts.into_iter().rev() {
            let jump_len = usize::from(!acc.is_empty());
            let skip = self.branch_offset(body.len() + jump_len, span)?;
            let mut chunk = cond_code;
            chunk.push(Self::cond_branch(jump_when_true, skip));
            chunk.extend(body);
            if jump_len == 1 {
                let off = self.branch_offset(acc.len(), span)?;
                chunk.push(Instr::Jump(off));
            }
            chunk.extend(acc);
            acc = chunk;
        }
        Ok(acc)
    }

    fn emit_approve_assets(
        &mut self,
        approve: &[ApproveAsset],
    ) -> Result<Vec<Instr>, CompilerError> {
        let mut code = Vec::new();
        for entry in approve {
            code.extend(self.emit_expr(&entry.address)?);
            // One address copy per token entry.
            code.extend(std::iter::repeat(Instr::Dup).take(entry.tokens.len().saturating_sub(1)));
            for (token, amount) in &entry.tokens {
                if token.is_alph_token_id() {
                    code.extend(self.emit_expr(amount)?);
                    code.push(Instr::ApproveAlph);
                } else {
                    code.extend(self.emit_expr(token)?);
                    code.extend(self.emit_expr(amount)?);
                    code.push(Instr::ApproveToken);
                }
            }
        }
        Ok(code)
    }

    /// Arguments plus the built-in's opcode tail. The transfer and
    /// remaining built-ins substitute their `*Alph*` opcode and skip the
    /// token argument when it is the native sentinel.
    fn emit_builtin_call(
        &mut self,
        name: &str,
        args: &[Expr],
    ) -> Result<Vec<Instr>, CompilerError> {
        let mut code = Vec::new();
        match name {
            "transferToken" => {
                let native = args[2].is_alph_token_id();
                code.extend(self.emit_expr(&args[0])?);
                code.extend(self.emit_expr(&args[1])?);
                if native {
                    code.extend(self.emit_expr(&args[3])?);
                    code.push(Instr::TransferAlph);
                } else {
                    code.extend(self.emit_expr(&args[2])?);
                    code.extend(self.emit_expr(&args[3])?);
                    code.push(Instr::TransferToken);
                }
            }
            "transferTokenFromSelf" | "transferTokenToSelf" => {
                let native = args[1].is_alph_token_id();
                let from_self = name == "transferTokenFromSelf";
                code.extend(self.emit_expr(&args[0])?);
                if native {
                    code.extend(self.emit_expr(&args[2])?);
                    code.push(if from_self {
                        Instr::TransferAlphFromSelf
                    } else {
                        Instr::TransferAlphToSelf
                    });
                } else {
                    code.extend(self.emit_expr(&args[1])?);
                    code.extend(self.emit_expr(&args[2])?);
                    code.push(if from_self {
                        Instr::TransferTokenFromSelf
                    } else {
                        Instr::TransferTokenToSelf
                    });
                }
            }
            "tokenRemaining" => {
                code.extend(self.emit_expr(&args[0])?);
                if args[1].is_alph_token_id() {
                    code.push(Instr::AlphRemaining);
                } else {
                    code.extend(self.emit_expr(&args[1])?);
                    code.push(Instr::TokenRemaining);
                }
            }
            "encodeToByteVec" => {
                let mut count = 0usize;
                for arg in args {
                    count += flattened_len_of(&self.type_of(arg)?);
                    code.extend(self.emit_expr(arg)?);
                }
                code.push(Instr::U256Const(count as u128));
                code.push(Instr::Encode);
            }
            _ => {
                for arg in args {
                    code.extend(self.emit_expr(arg)?);
                }
                code.push(match name {
                    "assert" | "checkCaller" => Instr::AssertWithErrorCode,
                    "panic" => Instr::Panic,
                    "migrate" => Instr::Migrate,
                    other => unreachable!("unknown builtin {other}"),
                });
            }
        }
        Ok(code)
    }

    pub fn emit_stmt(&mut self, stmt: &Statement) -> Result<Vec<Instr>, CompilerError> {
        match stmt {
            Statement::VarDef(def) => {
                let rhs = self.type_of(&def.value)?;
                let mut code = self.emit_expr(&def.value)?;
                for (decl, ty) in def.decls.iter().zip(&rhs).rev() {
                    match decl {
                        oath_ast::VarDeclaration::Named { ident, .. } => {
                            code.extend(self.gen_store_code(ident)?);
                        }
                        oath_ast::VarDeclaration::Anonymous => {
                            code.extend(pops(ty.flattened_len()));
                        }
                    }
                }
                Ok(code)
            }
            Statement::Assign(assign) => {
                let mut code = self.emit_expr(&assign.value)?;
                for target in assign.targets.iter().rev() {
                    let info = self.get_variable(&target.ident, true)?;
                    if target.indexes.is_empty() {
                        code.extend(Self::store_slot_range(
                            info.kind,
                            info.index,
                            0,
                            info.ty.flattened_len(),
                        ));
                    } else {
                        let (offset, residual) =
                            self.array_element_ty(&info.ty, &target.indexes)?;
                        code.extend(Self::store_slot_range(
                            info.kind,
                            info.index,
                            offset,
                            residual.flattened_len(),
                        ));
                    }
                }
                Ok(code)
            }
            Statement::Expr(e) => {
                let ret = flattened_len_of(&self.type_of(e)?);
                let mut code = self.emit_expr(e)?;
                code.extend(pops(ret));
                Ok(code)
            }
            Statement::IfElse(s) => {
                let mut parts = Vec::with_capacity(s.branches.len());
                for branch in &s.branches {
                    let cond_code = self.emit_cond(&branch.cond)?;
                    let mut body = Vec::new();
                    for stmt in &branch.body {
                        body.extend(self.emit_stmt(stmt)?);
                    }
                    parts.push((cond_code, body, branch.cond.span));
                }
                let mut else_code = Vec::new();
                if let Some(else_body) = &s.else_body {
                    for stmt in else_body {
                        else_code.extend(self.emit_stmt(stmt)?);
                    }
                }
                self.assemble_if_else(parts, else_code)
            }
            Statement::While(s) => {
                let (cond_code, jump_when_true) = self.emit_cond(&s.cond)?;
                let mut body = Vec::new();
                for stmt in &s.body {
                    body.extend(self.emit_stmt(stmt)?);
                }
                let skip = self.branch_offset(body.len() + 1, s.cond.span)?;
                let mut code = cond_code;
                code.push(Self::cond_branch(jump_when_true, skip));
                let back = self.branch_offset(code.len() + body.len() + 1, s.cond.span)?;
                code.extend(body);
                code.push(Instr::Jump(-back));
                Ok(code)
            }
            Statement::For(s) => {
                let init = self.emit_stmt(&s.init)?;
                let (cond_code, jump_when_true) = self.emit_cond(&s.cond)?;
                let update = self.emit_stmt(&s.update)?;
                let mut body = Vec::new();
                for stmt in &s.body {
                    body.extend(self.emit_stmt(stmt)?);
                }
                let skip =
                    self.branch_offset(body.len() + update.len() + 1, s.cond.span)?;
                let mut cond = cond_code;
                cond.push(Self::cond_branch(jump_when_true, skip));
                let back = self.branch_offset(
                    cond.len() + body.len() + update.len() + 1,
                    s.cond.span,
                )?;
                let mut code = init;
                code.extend(cond);
                code.extend(body);
                code.extend(update);
                code.push(Instr::Jump(-back));
                Ok(code)
            }
            Statement::Return(s) => {
                let mut code = Vec::new();
                for e in &s.exprs {
                    code.extend(self.emit_expr(e)?);
                }
                code.push(Instr::Return);
                Ok(code)
            }
            Statement::EmitEvent(s) => {
                let (index, _) = self.event(&s.id.node).expect("checked event");
                let mut code = vec![Instr::U256Const(index as u128)];
                for arg in &s.args {
                    code.extend(self.emit_expr(arg)?);
                }
                code.push(Instr::Log(s.args.len() as u8));
                Ok(code)
            }
            Statement::Debug(s) => {
                if !self.allow_debug {
                    return Ok(Vec::new());
                }
                let mut code = Vec::new();
                for e in &s.interpolations {
                    code.extend(self.emit_expr(e)?);
                }
                code.push(Instr::Debug(s.parts.clone()));
                Ok(code)
            }
        }
    }

    /// Emit one function into a method record. The state must already
    /// have been through the check pass for this function.
    pub fn emit_func(&mut self, def: &FuncDef) -> Result<Method, CompilerError> {
        debug_assert_eq!(self.phase(), Phase::CodeGen);
        let body = def.body.as_ref().ok_or_else(|| CompilerError {
            message: format!("function \"{}\" must have a body", def.id.name),
            span: def.span,
        })?;
        self.reenter_function(&def.id.name);
        let mut instrs = Vec::new();
        for stmt in body {
            instrs.extend(self.emit_stmt(stmt)?);
        }
        if def.rtypes.is_empty() && !matches!(body.last(), Some(Statement::Return(_))) {
            instrs.push(Instr::Return);
        }
        let arg_types: Vec<Type> = def.args.iter().map(|a| a.ty.clone()).collect();
        let method = Method {
            is_public: def.is_public,
            use_preapproved_assets: def.use_preapproved_assets,
            use_contract_assets: def.use_contract_assets,
            args_length: flattened_len_of(&arg_types),
            locals_length: self.frame_size(&def.id.name),
            return_length: flattened_len_of(&def.rtypes),
            instrs,
        };
        self.exit_function();
        Ok(method)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compile::CompilerOptions;
    use oath_ast::{span, Ident, TypeId, Val};
    use std::collections::HashMap;

    fn state() -> CompilerState {
        let mut s = CompilerState::new(
            TypeId::new("Test"),
            crate::state::UnitKind::Contract { is_abstract: false },
            HashMap::new(),
            CompilerOptions::default(),
        );
        s.set_phase(Phase::CodeGen);
        s.enter_function("f");
        s
    }

    fn boolean(v: bool) -> Expr {
        Expr::new(span(0, 0), ExprKind::Const(Val::Bool(v)))
    }

    fn u256(v: u128) -> Expr {
        Expr::new(span(0, 0), ExprKind::Const(Val::U256(v)))
    }

    fn debug_stmt() -> Statement {
        Statement::Debug(oath_ast::DebugStmt {
            span: span(0, 0),
            parts: vec!["x".to_string()],
            interpolations: vec![],
        })
    }

    #[test]
    fn negated_condition_folds_into_jump_polarity() {
        let mut s = state();
        let cond = Expr::new(
            span(0, 0),
            ExprKind::Unary {
                op: UnaryOp::Not,
                expr: Box::new(boolean(true)),
            },
        );
        let (code, jump_when_true) = s.emit_cond(&cond).unwrap();
        assert_eq!(code, vec![Instr::ConstTrue]);
        assert!(jump_when_true);

        let (code, jump_when_true) = s.emit_cond(&boolean(false)).unwrap();
        assert_eq!(code, vec![Instr::ConstFalse]);
        assert!(!jump_when_true);
    }

    #[test]
    fn while_loop_jumps_back_over_cond_and_body() {
        let mut s = state();
        let stmt = Statement::While(oath_ast::WhileStmt {
            span: span(0, 0),
            cond: boolean(true),
            body: vec![debug_stmt()],
        });
        let code = s.emit_stmt(&stmt).unwrap();
        // cond, IfFalse over body+jump, body (1 debug), jump back to cond.
        assert_eq!(
            code,
            vec![
                Instr::ConstTrue,
                Instr::IfFalse(2),
                Instr::Debug(vec!["x".to_string()]),
                Instr::Jump(-4),
            ]
        );
    }

    #[test]
    fn for_loop_layout_matches_while_with_init_and_update() {
        let mut s = state();
        s.add_local_variable(
            &Ident::new(span(0, 0), "i".to_string()),
            Type::U256,
            true,
            false,
            false,
        )
        .unwrap();
        let assign = Statement::Assign(oath_ast::AssignStmt {
            span: span(0, 0),
            targets: vec![oath_ast::AssignTarget {
                ident: Ident::new(span(0, 0), "i".to_string()),
                indexes: vec![],
            }],
            value: u256(1),
        });
        let stmt = Statement::For(oath_ast::ForStmt {
            span: span(0, 0),
            init: Box::new(assign.clone()),
            cond: boolean(true),
            update: Box::new(assign),
            body: vec![debug_stmt()],
        });
        let code = s.emit_stmt(&stmt).unwrap();
        assert_eq!(
            code,
            vec![
                // init
                Instr::U256Const(1),
                Instr::StoreLocal(0),
                // cond: skip body + update + 1
                Instr::ConstTrue,
                Instr::IfFalse(4),
                // body
                Instr::Debug(vec!["x".to_string()]),
                // update
                Instr::U256Const(1),
                Instr::StoreLocal(0),
                // back over cond(2) + body(1) + update(2) + 1
                Instr::Jump(-6),
            ]
        );
    }

    #[test]
    fn branch_offset_boundary_is_255() {
        let s = state();
        assert_eq!(s.branch_offset(255, span(0, 0)).unwrap(), 255);
        let err = s.branch_offset(256, span(0, 0)).unwrap_err();
        assert!(err.message.contains("exceeds 255"));
    }

    #[test]
    fn debug_statements_are_elided_in_release() {
        let mut s = state();
        assert_eq!(
            s.emit_stmt(&debug_stmt()).unwrap(),
            vec![Instr::Debug(vec!["x".to_string()])]
        );
        s.allow_debug = false;
        assert_eq!(s.emit_stmt(&debug_stmt()).unwrap(), Vec::<Instr>::new());
    }
}

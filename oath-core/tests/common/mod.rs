#![allow(dead_code)]

use oath_ast::{
    span, ApproveAsset, Argument, AssignStmt, AssignTarget, BinOp, Contract, ContractInterface,
    ContractUnit, DebugStmt, EmitEventStmt, Expr, ExprKind, FuncDef, FuncId, Ident, IfBranch,
    IfElseStmt, ReturnStmt, Span, Statement, TxScript, Type, UnaryOp, Val, VarDeclaration,
    VarDefStmt,
};
use oath_core::{compile_project, CompiledContract, CompiledUnit, CompilerOptions};

pub fn sp() -> Span {
    span(0, 0)
}

pub fn id(name: &str) -> Ident {
    Ident::new(sp(), name.to_string())
}

pub fn u256(v: u128) -> Expr {
    Expr::new(sp(), ExprKind::Const(Val::U256(v)))
}

pub fn i256(v: i128) -> Expr {
    Expr::new(sp(), ExprKind::Const(Val::I256(v)))
}

pub fn boolean(v: bool) -> Expr {
    Expr::new(sp(), ExprKind::Const(Val::Bool(v)))
}

pub fn bytes(v: &[u8]) -> Expr {
    Expr::new(sp(), ExprKind::Const(Val::ByteVec(v.to_vec())))
}

pub fn address(v: &[u8]) -> Expr {
    Expr::new(sp(), ExprKind::Const(Val::Address(v.to_vec())))
}

pub fn alph() -> Expr {
    Expr::new(sp(), ExprKind::AlphTokenId)
}

pub fn var(name: &str) -> Expr {
    Expr::new(sp(), ExprKind::Variable(id(name)))
}

pub fn bin(op: BinOp, lhs: Expr, rhs: Expr) -> Expr {
    Expr::new(
        sp(),
        ExprKind::Binary {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        },
    )
}

pub fn not(e: Expr) -> Expr {
    Expr::new(
        sp(),
        ExprKind::Unary {
            op: UnaryOp::Not,
            expr: Box::new(e),
        },
    )
}

pub fn array(elems: Vec<Expr>) -> Expr {
    Expr::new(sp(), ExprKind::CreateArray(elems))
}

pub fn index(array: Expr, indexes: Vec<Expr>) -> Expr {
    Expr::new(
        sp(),
        ExprKind::ArrayElement {
            array: Box::new(array),
            indexes,
        },
    )
}

pub fn call(name: &str, args: Vec<Expr>) -> Expr {
    Expr::new(
        sp(),
        ExprKind::Call {
            id: FuncId::new(name),
            approve: vec![],
            args,
        },
    )
}

pub fn builtin_call(name: &str, args: Vec<Expr>) -> Expr {
    Expr::new(
        sp(),
        ExprKind::Call {
            id: FuncId::builtin(name),
            approve: vec![],
            args,
        },
    )
}

pub fn contract_call(obj: Expr, name: &str, args: Vec<Expr>) -> Expr {
    Expr::new(
        sp(),
        ExprKind::ContractCall {
            obj: Box::new(obj),
            id: FuncId::new(name),
            approve: vec![],
            args,
        },
    )
}

pub fn contract_conv(type_name: &str, addr: Expr) -> Expr {
    Expr::new(
        sp(),
        ExprKind::ContractConv {
            type_id: id(type_name),
            address: Box::new(addr),
        },
    )
}

pub fn arg(name: &str, ty: Type) -> Argument {
    Argument::new(id(name), ty)
}

pub fn mut_arg(name: &str, ty: Type) -> Argument {
    Argument {
        is_mutable: true,
        ..Argument::new(id(name), ty)
    }
}

pub fn unused_arg(name: &str, ty: Type) -> Argument {
    Argument {
        is_unused: true,
        ..Argument::new(id(name), ty)
    }
}

pub fn ret(exprs: Vec<Expr>) -> Statement {
    Statement::Return(ReturnStmt {
        span: sp(),
        exprs,
    })
}

pub fn let_var(name: &str, value: Expr) -> Statement {
    Statement::VarDef(VarDefStmt {
        span: sp(),
        decls: vec![VarDeclaration::Named {
            mutable: false,
            ident: id(name),
        }],
        value,
    })
}

pub fn let_mut(name: &str, value: Expr) -> Statement {
    Statement::VarDef(VarDefStmt {
        span: sp(),
        decls: vec![VarDeclaration::Named {
            mutable: true,
            ident: id(name),
        }],
        value,
    })
}

pub fn assign(name: &str, value: Expr) -> Statement {
    Statement::Assign(AssignStmt {
        span: sp(),
        targets: vec![AssignTarget {
            ident: id(name),
            indexes: vec![],
        }],
        value,
    })
}

pub fn assign_index(name: &str, indexes: Vec<Expr>, value: Expr) -> Statement {
    Statement::Assign(AssignStmt {
        span: sp(),
        targets: vec![AssignTarget {
            ident: id(name),
            indexes,
        }],
        value,
    })
}

pub fn expr_stmt(e: Expr) -> Statement {
    Statement::Expr(e)
}

pub fn func(
    name: &str,
    is_public: bool,
    args: Vec<Argument>,
    rtypes: Vec<Type>,
    body: Vec<Statement>,
) -> FuncDef {
    FuncDef {
        span: sp(),
        id: FuncId::new(name),
        is_public,
        use_preapproved_assets: false,
        use_contract_assets: false,
        use_check_external_caller: None,
        use_update_fields: false,
        args,
        rtypes,
        body: Some(body),
    }
}

pub fn abstract_func(
    name: &str,
    args: Vec<Argument>,
    rtypes: Vec<Type>,
) -> FuncDef {
    FuncDef {
        body: None,
        ..func(name, true, args, rtypes, vec![])
    }
}

pub fn contract(name: &str, fields: Vec<Argument>, funcs: Vec<FuncDef>) -> Contract {
    Contract {
        span: sp(),
        ident: id(name),
        is_abstract: false,
        std_id_enabled: None,
        fields,
        funcs,
        events: vec![],
        consts: vec![],
        enums: vec![],
        inheritances: vec![],
    }
}

pub fn contract_unit(name: &str, fields: Vec<Argument>, funcs: Vec<FuncDef>) -> ContractUnit {
    ContractUnit::Contract(contract(name, fields, funcs))
}

pub fn compile(units: Vec<ContractUnit>) -> Vec<CompiledUnit> {
    compile_project(units, &CompilerOptions::default()).expect("compilation should succeed")
}

pub fn compile_err(units: Vec<ContractUnit>) -> oath_core::CompilerError {
    compile_project(units, &CompilerOptions::default()).expect_err("compilation should fail")
}

/// The first compiled contract of a project.
pub fn first_contract(units: Vec<ContractUnit>) -> CompiledContract {
    compile(units)
        .into_iter()
        .find_map(|u| match u {
            CompiledUnit::Contract(c) => Some(c),
            _ => None,
        })
        .expect("project should produce a contract")
}

/// The compiled contract with the given name.
pub fn contract_named(units: Vec<ContractUnit>, name: &str) -> CompiledContract {
    compile(units)
        .into_iter()
        .find_map(|u| match u {
            CompiledUnit::Contract(c) if c.ast.ident.node == name => Some(c),
            _ => None,
        })
        .expect("project should produce the named contract")
}

pub fn static_call(contract_name: &str, name: &str, args: Vec<Expr>) -> Expr {
    Expr::new(
        sp(),
        ExprKind::StaticContractCall {
            contract: id(contract_name),
            id: FuncId::builtin(name),
            approve: vec![],
            args,
        },
    )
}

pub fn if_else(
    branches: Vec<(Expr, Vec<Statement>)>,
    else_body: Option<Vec<Statement>>,
) -> Statement {
    Statement::IfElse(IfElseStmt {
        span: sp(),
        branches: branches
            .into_iter()
            .map(|(cond, body)| IfBranch { cond, body })
            .collect(),
        else_body,
    })
}

pub fn if_else_expr(branches: Vec<(Expr, Expr)>, else_expr: Expr) -> Expr {
    Expr::new(
        sp(),
        ExprKind::IfElse {
            branches,
            else_expr: Box::new(else_expr),
        },
    )
}

pub fn debug(parts: Vec<&str>, interpolations: Vec<Expr>) -> Statement {
    Statement::Debug(DebugStmt {
        span: sp(),
        parts: parts.into_iter().map(str::to_string).collect(),
        interpolations,
    })
}

pub fn emit_event(name: &str, args: Vec<Expr>) -> Statement {
    Statement::EmitEvent(EmitEventStmt {
        span: sp(),
        id: id(name),
        args,
    })
}

pub fn approve_entry(address: Expr, tokens: Vec<(Expr, Expr)>) -> ApproveAsset {
    ApproveAsset { address, tokens }
}

pub fn call_approving(name: &str, approve: Vec<ApproveAsset>, args: Vec<Expr>) -> Expr {
    Expr::new(
        sp(),
        ExprKind::Call {
            id: FuncId::new(name),
            approve,
            args,
        },
    )
}

pub fn interface(name: &str, parents: Vec<&str>, funcs: Vec<FuncDef>) -> ContractInterface {
    ContractInterface {
        span: sp(),
        ident: id(name),
        inheritances: parents.into_iter().map(id).collect(),
        funcs,
        events: vec![],
        std_id: None,
        fields: vec![],
        consts: vec![],
        enums: vec![],
    }
}

pub fn interface_unit(name: &str, parents: Vec<&str>, funcs: Vec<FuncDef>) -> ContractUnit {
    ContractUnit::Interface(interface(name, parents, funcs))
}

pub fn abstract_contract_unit(
    name: &str,
    fields: Vec<Argument>,
    funcs: Vec<FuncDef>,
) -> ContractUnit {
    ContractUnit::Contract(Contract {
        is_abstract: true,
        ..contract(name, fields, funcs)
    })
}

pub fn tx_script(name: &str, templates: Vec<Argument>, funcs: Vec<FuncDef>) -> ContractUnit {
    ContractUnit::TxScript(TxScript {
        span: sp(),
        ident: id(name),
        templates,
        funcs,
    })
}

pub fn asset_script(name: &str, templates: Vec<Argument>, funcs: Vec<FuncDef>) -> ContractUnit {
    ContractUnit::AssetScript(oath_ast::AssetScript {
        span: sp(),
        ident: id(name),
        templates,
        funcs,
    })
}

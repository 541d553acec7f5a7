mod common;

use common::*;
use oath_ast::{BinOp, ConstantVarDef, ContractUnit, EnumDef, EnumFieldDef, EventDef, EventField, Expr, ExprKind, Type, Val};
use oath_vm::Instr;

#[test]
fn field_getter_compiles_to_single_load() {
    // Contract C(x: U256) { pub fn get() -> U256 { return x } }
    let unit = contract_unit(
        "C",
        vec![arg("x", Type::U256)],
        vec![func(
            "get",
            true,
            vec![],
            vec![Type::U256],
            vec![ret(vec![var("x")])],
        )],
    );
    let compiled = first_contract(vec![unit]);

    assert_eq!(compiled.contract.fields_length, 1);
    assert_eq!(compiled.contract.methods.len(), 1);
    let method = &compiled.contract.methods[0];
    assert!(method.is_public);
    assert_eq!(method.args_length, 0);
    assert_eq!(method.locals_length, 0);
    assert_eq!(method.return_length, 1);
    assert_eq!(method.instrs, vec![Instr::LoadField(0), Instr::Return]);
    assert!(compiled.warnings.is_empty());
    // No debug ops, so both artifacts are the same emission.
    assert_eq!(compiled.contract, compiled.debug_contract);
    // A pure field read is a simple view.
    assert_eq!(compiled.simple_views, vec![true]);
}

#[test]
fn compiling_twice_yields_identical_artifacts_and_warnings() {
    let build = || {
        contract_unit(
            "Counter",
            vec![mut_arg("count", Type::U256)],
            vec![
                func(
                    "bump",
                    true,
                    vec![],
                    vec![],
                    vec![assign("count", bin(BinOp::Add, var("count"), u256(1)))],
                ),
                func("get", true, vec![], vec![Type::U256], vec![ret(vec![var("count")])]),
            ],
        )
    };
    let first = first_contract(vec![build()]);
    let second = first_contract(vec![build()]);
    assert_eq!(first.contract, second.contract);
    assert_eq!(first.debug_contract, second.debug_contract);
    assert_eq!(first.warnings, second.warnings);
}

#[test]
fn event_emission_logs_index_then_fields() {
    let mut c = contract(
        "Token",
        vec![],
        vec![func(
            "fire",
            true,
            vec![arg("to", Type::Address), arg("amount", Type::U256)],
            vec![],
            vec![emit_event("Transfer", vec![var("to"), var("amount")])],
        )],
    );
    c.events.push(EventDef {
        span: sp(),
        ident: id("Minted"),
        fields: vec![EventField {
            ident: id("amount"),
            ty: Type::U256,
        }],
    });
    c.events.push(EventDef {
        span: sp(),
        ident: id("Transfer"),
        fields: vec![
            EventField {
                ident: id("to"),
                ty: Type::Address,
            },
            EventField {
                ident: id("amount"),
                ty: Type::U256,
            },
        ],
    });
    let compiled = first_contract(vec![ContractUnit::Contract(c)]);
    let method = &compiled.contract.methods[0];
    assert_eq!(
        method.instrs,
        vec![
            // Transfer is the second declared event.
            Instr::U256Const(1),
            Instr::LoadLocal(0),
            Instr::LoadLocal(1),
            Instr::Log(2),
            Instr::Return,
        ]
    );
}

#[test]
fn event_args_must_match_declared_fields() {
    let mut c = contract(
        "Token",
        vec![],
        vec![func(
            "fire",
            true,
            vec![],
            vec![],
            vec![emit_event("Transfer", vec![u256(1)])],
        )],
    );
    c.events.push(EventDef {
        span: sp(),
        ident: id("Transfer"),
        fields: vec![EventField {
            ident: id("to"),
            ty: Type::Address,
        }],
    });
    let err = compile_err(vec![ContractUnit::Contract(c)]);
    assert!(err.message.contains("arguments of \"Transfer\""));
}

#[test]
fn constants_and_enum_fields_inline_their_values() {
    let mut c = contract(
        "Config",
        vec![],
        vec![func(
            "limit",
            true,
            vec![],
            vec![Type::U256],
            vec![ret(vec![bin(
                BinOp::Add,
                var("MAX"),
                Expr::new(
                    sp(),
                    ExprKind::EnumField {
                        enum_id: id("Tier"),
                        field: id("Gold"),
                    },
                ),
            )])],
        )],
    );
    c.consts.push(ConstantVarDef {
        span: sp(),
        ident: id("MAX"),
        value: Val::U256(100),
    });
    c.enums.push(EnumDef {
        span: sp(),
        ident: id("Tier"),
        fields: vec![
            EnumFieldDef {
                ident: id("Silver"),
                value: Val::U256(1),
            },
            EnumFieldDef {
                ident: id("Gold"),
                value: Val::U256(2),
            },
        ],
    });
    let compiled = first_contract(vec![ContractUnit::Contract(c)]);
    assert_eq!(
        compiled.contract.methods[0].instrs,
        vec![
            Instr::U256Const(100),
            Instr::U256Const(2),
            Instr::U256Add,
            Instr::Return,
        ]
    );
    // Silver is never read.
    assert!(compiled
        .warnings
        .iter()
        .any(|w| w.contains("unused constant \"Tier.Silver\"")));
}

#[test]
fn encode_builtins_filter_fields_by_mutability() {
    let target = contract_unit(
        "Vault",
        vec![arg("owner", Type::Address), mut_arg("balance", Type::U256)],
        vec![],
    );
    let caller = contract_unit(
        "Factory",
        vec![],
        vec![
            func(
                "imm",
                true,
                vec![],
                vec![Type::ByteVec],
                vec![ret(vec![static_call(
                    "Vault",
                    "encodeImmFields",
                    vec![address(&[1])],
                )])],
            ),
            func(
                "all",
                true,
                vec![],
                vec![Type::ByteVec],
                vec![ret(vec![static_call(
                    "Vault",
                    "encodeFields",
                    vec![address(&[1]), u256(9)],
                )])],
            ),
        ],
    );
    let compiled = contract_named(vec![target, caller], "Factory");
    assert_eq!(
        compiled.contract.methods[0].instrs,
        vec![
            Instr::AddressConst(vec![1]),
            Instr::U256Const(1),
            Instr::Encode,
            Instr::Return,
        ]
    );
    assert_eq!(
        compiled.contract.methods[1].instrs,
        vec![
            Instr::AddressConst(vec![1]),
            Instr::U256Const(9),
            Instr::U256Const(2),
            Instr::Encode,
            Instr::Return,
        ]
    );
}

#[test]
fn mismatched_encode_arguments_are_rejected() {
    let target = contract_unit("Vault", vec![arg("owner", Type::Address)], vec![]);
    let caller = contract_unit(
        "Factory",
        vec![],
        vec![func(
            "bad",
            true,
            vec![],
            vec![Type::ByteVec],
            vec![ret(vec![static_call("Vault", "encodeFields", vec![u256(1)])])],
        )],
    );
    let err = compile_err(vec![target, caller]);
    assert!(err.message.contains("arguments of \"encodeFields\""));
}

#[test]
fn non_static_function_cannot_be_called_statically() {
    let target = contract_unit(
        "Vault",
        vec![],
        vec![func("touch", true, vec![], vec![], vec![])],
    );
    let caller = contract_unit(
        "Factory",
        vec![],
        vec![func(
            "bad",
            true,
            vec![],
            vec![],
            vec![expr_stmt(Expr::new(
                sp(),
                ExprKind::StaticContractCall {
                    contract: id("Vault"),
                    id: oath_ast::FuncId::new("touch"),
                    approve: vec![],
                    args: vec![],
                },
            ))],
        )],
    );
    let err = compile_err(vec![target, caller]);
    assert!(err.message.contains("is not a static function"));
}

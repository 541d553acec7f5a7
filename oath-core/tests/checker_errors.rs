mod common;

use common::*;
use oath_ast::{Statement, Type, VarDeclaration, VarDefStmt};
use oath_core::{compile_project, CompiledUnit, CompilerOptions};

fn one_func_contract(f: oath_ast::FuncDef) -> oath_ast::ContractUnit {
    contract_unit("C", vec![], vec![f])
}

#[test]
fn undefined_variables_are_reported() {
    let err = compile_err(vec![one_func_contract(func(
        "f",
        true,
        vec![],
        vec![Type::U256],
        vec![ret(vec![var("nope")])],
    ))]);
    assert!(err.message.contains("undefined variable \"nope\""));
}

#[test]
fn undefined_functions_are_reported() {
    let err = compile_err(vec![one_func_contract(func(
        "f",
        true,
        vec![],
        vec![],
        vec![expr_stmt(call("nope", vec![]))],
    ))]);
    assert!(err.message.contains("undefined function \"nope\""));
}

#[test]
fn assigning_an_immutable_local_fails() {
    let err = compile_err(vec![one_func_contract(func(
        "f",
        true,
        vec![],
        vec![],
        vec![let_var("x", u256(1)), assign("x", u256(2))],
    ))]);
    assert!(err.message.contains("cannot assign to immutable variable \"x\""));
}

#[test]
fn assigning_an_immutable_field_fails() {
    let unit = contract_unit(
        "C",
        vec![arg("x", Type::U256)],
        vec![func("f", true, vec![], vec![], vec![assign("x", u256(2))])],
    );
    let err = compile_err(vec![unit]);
    assert!(err.message.contains("cannot assign to immutable variable \"x\""));
}

#[test]
fn return_types_must_match_the_signature() {
    let err = compile_err(vec![one_func_contract(func(
        "f",
        true,
        vec![],
        vec![Type::U256],
        vec![ret(vec![boolean(true)])],
    ))]);
    assert!(err.message.contains("expected return types (U256), got (Bool)"));
}

#[test]
fn assignment_types_must_match() {
    let err = compile_err(vec![one_func_contract(func(
        "f",
        true,
        vec![],
        vec![],
        vec![let_mut("x", u256(1)), assign("x", boolean(true))],
    ))]);
    assert!(err.message.contains("cannot assign (Bool) to (U256)"));
}

#[test]
fn let_arity_must_match_the_value() {
    let stmt = Statement::VarDef(VarDefStmt {
        span: sp(),
        decls: vec![
            VarDeclaration::Named {
                mutable: false,
                ident: id("a"),
            },
            VarDeclaration::Named {
                mutable: false,
                ident: id("b"),
            },
        ],
        value: u256(1),
    });
    let err = compile_err(vec![one_func_contract(func(
        "f",
        true,
        vec![],
        vec![],
        vec![stmt],
    ))]);
    assert!(err.message.contains("let binding expects 2 values, got 1"));
}

#[test]
fn multi_value_bindings_destructure_call_results() {
    use oath_vm::Instr;
    let pair = func(
        "pair",
        false,
        vec![],
        vec![Type::U256, Type::Bool],
        vec![ret(vec![u256(1), boolean(true)])],
    );
    let unit = contract_unit(
        "C",
        vec![],
        vec![
            func(
                "f",
                true,
                vec![],
                vec![Type::U256],
                vec![
                    Statement::VarDef(VarDefStmt {
                        span: sp(),
                        decls: vec![
                            VarDeclaration::Named {
                                mutable: false,
                                ident: id("a"),
                            },
                            VarDeclaration::Anonymous,
                        ],
                        value: call("pair", vec![]),
                    }),
                    ret(vec![var("a")]),
                ],
            ),
            pair,
        ],
    );
    let compiled = first_contract(vec![unit]);
    assert_eq!(
        compiled.contract.methods[0].instrs,
        vec![
            Instr::CallLocal(1),
            // anonymous slot popped first, then `a` stored
            Instr::Pop,
            Instr::StoreLocal(0),
            Instr::LoadLocal(0),
            Instr::Return,
        ]
    );
}

#[test]
fn duplicate_function_names_are_rejected() {
    let unit = contract_unit(
        "C",
        vec![],
        vec![
            func("f", true, vec![], vec![], vec![]),
            func("f", false, vec![], vec![], vec![]),
        ],
    );
    let err = compile_err(vec![unit]);
    assert!(err.message.contains("duplicate definition of \"f\""));
}

#[test]
fn locals_cannot_shadow_fields() {
    let unit = contract_unit(
        "C",
        vec![arg("x", Type::U256)],
        vec![func("f", true, vec![], vec![], vec![let_var("x", u256(1))])],
    );
    let err = compile_err(vec![unit]);
    assert!(err.message.contains("duplicate definition of \"x\""));
}

#[test]
fn only_calls_are_valid_statements() {
    let err = compile_err(vec![one_func_contract(func(
        "f",
        true,
        vec![],
        vec![],
        vec![expr_stmt(u256(1))],
    ))]);
    assert!(err.message.contains("only calls can be used as statements"));
}

#[test]
fn tuple_values_cannot_feed_operators() {
    let pair = func(
        "pair",
        false,
        vec![],
        vec![Type::U256, Type::U256],
        vec![ret(vec![u256(1), u256(2)])],
    );
    let unit = contract_unit(
        "C",
        vec![],
        vec![
            func(
                "f",
                true,
                vec![],
                vec![Type::U256],
                vec![ret(vec![bin(oath_ast::BinOp::Add, call("pair", vec![]), u256(1))])],
            ),
            pair,
        ],
    );
    let err = compile_err(vec![unit]);
    assert!(err.message.contains("expected a single value"));
}

#[test]
fn conversion_targets_must_be_instantiable() {
    let abstract_unit = abstract_contract_unit("A", vec![], vec![]);
    let caller = contract_unit(
        "C",
        vec![],
        vec![func(
            "f",
            true,
            vec![],
            vec![],
            vec![let_var("a", contract_conv("A", bytes(&[1])))],
        )],
    );
    let err = compile_err(vec![abstract_unit, caller]);
    assert!(err.message.contains("is not instantiable"));

    let caller = contract_unit(
        "C",
        vec![],
        vec![func(
            "f",
            true,
            vec![],
            vec![],
            vec![let_var("a", contract_conv("Nope", bytes(&[1])))],
        )],
    );
    let err = compile_err(vec![caller]);
    assert!(err.message.contains("undefined contract type \"Nope\""));
}

#[test]
fn private_functions_cannot_be_called_externally() {
    let other = contract_unit(
        "Other",
        vec![],
        vec![func("hidden", false, vec![], vec![], vec![])],
    );
    let caller = contract_unit(
        "C",
        vec![],
        vec![func(
            "f",
            true,
            vec![],
            vec![],
            vec![expr_stmt(contract_call(
                contract_conv("Other", bytes(&[1])),
                "hidden",
                vec![],
            ))],
        )],
    );
    let err = compile_err(vec![other, caller]);
    assert!(err.message.contains("is private"));
}

#[test]
fn unused_locals_fields_and_constants_are_warned_about() {
    use oath_ast::{ConstantVarDef, ContractUnit, Val};
    let mut c = contract(
        "C",
        vec![arg("field_unread", Type::U256), mut_arg("field_mut", Type::U256)],
        vec![func("f", true, vec![], vec![], vec![let_var("local_unread", u256(1))])],
    );
    c.consts.push(ConstantVarDef {
        span: sp(),
        ident: id("CONST_UNREAD"),
        value: Val::U256(1),
    });
    let compiled = first_contract(vec![ContractUnit::Contract(c)]);
    let all = compiled.warnings.join("\n");
    assert!(all.contains("unused variable \"local_unread\" in function \"f\""));
    assert!(all.contains("unused field \"field_unread\""));
    assert!(all.contains("unused field \"field_mut\""));
    assert!(all.contains("mutable field \"field_mut\" is never assigned"));
    assert!(all.contains("unused constant \"CONST_UNREAD\""));
}

#[test]
fn warning_switches_silence_their_categories() {
    let build = || {
        contract_unit(
            "C",
            vec![arg("field_unread", Type::U256)],
            vec![func("f", true, vec![], vec![], vec![let_var("local_unread", u256(1))])],
        )
    };
    let options = CompilerOptions {
        ignore_unused_variables_warnings: true,
        ignore_unused_fields_warnings: true,
        ..CompilerOptions::default()
    };
    let compiled = compile_project(vec![build()], &options).unwrap();
    let CompiledUnit::Contract(compiled) = &compiled[0] else {
        panic!("expected contract");
    };
    assert!(compiled.warnings.is_empty());

    // Same project, default options: both warnings fire.
    let compiled = first_contract(vec![build()]);
    assert_eq!(compiled.warnings.len(), 2);
}

#[test]
fn unused_annotations_suppress_argument_warnings() {
    let unit = contract_unit(
        "C",
        vec![],
        vec![func(
            "f",
            true,
            vec![unused_arg("ignored", Type::U256)],
            vec![],
            vec![],
        )],
    );
    let compiled = first_contract(vec![unit]);
    assert!(compiled.warnings.is_empty());
}

#[test]
fn mutable_locals_must_be_assigned_somewhere() {
    let unit = contract_unit(
        "C",
        vec![],
        vec![func(
            "f",
            true,
            vec![],
            vec![Type::U256],
            vec![let_mut("x", u256(1)), ret(vec![var("x")])],
        )],
    );
    let compiled = first_contract(vec![unit]);
    assert!(compiled
        .warnings
        .iter()
        .any(|w| w.contains("mutable variable \"x\" in function \"f\" is never assigned")));
}

#[test]
fn unused_script_templates_are_warned_about() {
    let script = tx_script(
        "Run",
        vec![arg("t", Type::U256)],
        vec![func("main", true, vec![], vec![], vec![])],
    );
    let compiled = compile(vec![script]);
    let CompiledUnit::Script(script) = &compiled[0] else {
        panic!("expected script");
    };
    assert!(script
        .warnings
        .iter()
        .any(|w| w.contains("unused template variable \"t\"")));
}

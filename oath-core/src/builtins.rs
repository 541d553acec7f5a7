#![forbid(unsafe_code)]

use oath_ast::Type;

/// Signature of a built-in function. Built-ins dispatch to dedicated
/// opcodes instead of `CallLocal`; their instruction tails live with the
/// emitter because several specialize on the native-token sentinel.
#[derive(Clone, Debug)]
pub struct BuiltinFunc {
    pub name: &'static str,
    pub params: Vec<Type>,
    pub rtypes: Vec<Type>,
    /// Variadic built-ins get a `U256Const(argc)` pushed before their
    /// opcode; `argc` counts flattened stack slots.
    pub variadic: bool,
    /// Calling this ends the control-flow path (exhaustive-return
    /// analysis treats it like a return).
    pub diverges: bool,
}

impl BuiltinFunc {
    fn new(name: &'static str, params: Vec<Type>, rtypes: Vec<Type>) -> Self {
        BuiltinFunc {
            name,
            params,
            rtypes,
            variadic: false,
            diverges: false,
        }
    }
}

/// Look up a built-in by bare name (no `!`).
pub fn builtin(name: &str) -> Option<BuiltinFunc> {
    use Type::*;
    let f = match name {
        "assert" => BuiltinFunc::new("assert", vec![Bool, U256], vec![]),
        "checkCaller" => BuiltinFunc::new("checkCaller", vec![Bool, U256], vec![]),
        "panic" => BuiltinFunc {
            diverges: true,
            ..BuiltinFunc::new("panic", vec![U256], vec![])
        },
        "transferToken" => {
            BuiltinFunc::new("transferToken", vec![Address, Address, ByteVec, U256], vec![])
        }
        "transferTokenFromSelf" => {
            BuiltinFunc::new("transferTokenFromSelf", vec![Address, ByteVec, U256], vec![])
        }
        "transferTokenToSelf" => {
            BuiltinFunc::new("transferTokenToSelf", vec![Address, ByteVec, U256], vec![])
        }
        "tokenRemaining" => {
            BuiltinFunc::new("tokenRemaining", vec![Address, ByteVec], vec![U256])
        }
        "migrate" => BuiltinFunc::new("migrate", vec![ByteVec], vec![]),
        "encodeToByteVec" => BuiltinFunc {
            variadic: true,
            ..BuiltinFunc::new("encodeToByteVec", vec![], vec![ByteVec])
        },
        _ => return None,
    };
    Some(f)
}

/// Static per-contract encoding built-ins, expanded at the call site.
pub fn is_contract_static_builtin(name: &str) -> bool {
    matches!(name, "encodeImmFields" | "encodeMutFields" | "encodeFields")
}

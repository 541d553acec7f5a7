#![forbid(unsafe_code)]

use std::fmt;

use oath_ast::TypeId;

/// The opcode alphabet of the target VM.
///
/// The compiler names these and lays them out; it never interprets them.
/// Jump offsets are relative and counted in instructions; the emitter
/// guarantees |offset| <= 255 so each fits a signed byte on the wire.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Instr {
    // Constant loads.
    ConstTrue,
    ConstFalse,
    I256Const(i128),
    U256Const(u128),
    BytesConst(Vec<u8>),
    AddressConst(Vec<u8>),

    // Variable storage.
    LoadLocal(u8),
    StoreLocal(u8),
    LoadField(u8),
    StoreField(u8),
    LoadTemplate(u8),

    // Stack manipulation.
    Pop,
    Dup,

    // Control flow.
    Jump(i32),
    IfTrue(i32),
    IfFalse(i32),
    Return,

    // Calls.
    CallLocal(u8),
    CallExternal { type_id: TypeId, func: String },

    // U256 arithmetic and comparison.
    U256Add,
    U256Sub,
    U256Mul,
    U256Div,
    U256Mod,
    U256Eq,
    U256Neq,
    U256Lt,
    U256Le,
    U256Gt,
    U256Ge,

    // I256 arithmetic and comparison.
    I256Add,
    I256Sub,
    I256Mul,
    I256Div,
    I256Mod,
    I256Neg,
    I256Eq,
    I256Neq,
    I256Lt,
    I256Le,
    I256Gt,
    I256Ge,

    // Bool logic.
    BoolNot,
    BoolAnd,
    BoolOr,
    BoolEq,
    BoolNeq,

    // ByteVec.
    ByteVecEq,
    ByteVecNeq,
    ByteVecConcat,

    // Address.
    AddressEq,
    AddressNeq,

    // Asset handling.
    ApproveAlph,
    ApproveToken,
    TransferAlph,
    TransferAlphFromSelf,
    TransferAlphToSelf,
    TransferToken,
    TransferTokenFromSelf,
    TransferTokenToSelf,
    AlphRemaining,
    TokenRemaining,
    /// The native-token id, pushed as a ByteVec.
    AlphTokenId,

    // Events and diagnostics.
    /// Log the event index plus `n` field values.
    Log(u8),
    /// Interpolated debug output; string parts surround the already
    /// evaluated interpolations. Present only in debug artifacts.
    Debug(Vec<String>),

    // Assertions and contract lifecycle.
    AssertWithErrorCode,
    Panic,
    Migrate,
    /// Pop a count then that many values; push their field encoding.
    Encode,
}

impl Instr {
    pub fn is_debug(&self) -> bool {
        matches!(self, Instr::Debug(_))
    }

    /// Relative jump payload, if the instruction is a branch.
    pub fn jump_offset(&self) -> Option<i32> {
        match self {
            Instr::Jump(off) | Instr::IfTrue(off) | Instr::IfFalse(off) => Some(*off),
            _ => None,
        }
    }
}

impl fmt::Display for Instr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Instr::CallExternal { type_id, func } => {
                write!(f, "CallExternal({type_id}.{func})")
            }
            other => write!(f, "{other:?}"),
        }
    }
}

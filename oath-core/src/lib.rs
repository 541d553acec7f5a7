#![forbid(unsafe_code)]

mod builtins;
mod compile;
mod error;
mod lower;
mod resolve;
mod sema;
mod state;

pub use builtins::{builtin, BuiltinFunc};
pub use compile::{
    compile_project, CompiledAssetScript, CompiledContract, CompiledScript, CompiledUnit,
    CompilerOptions,
};
pub use error::CompilerError;
pub use resolve::{MultiContract, STD_ID_PREFIX};
pub use state::{
    CompilerState, ContractInfo, EventSig, FieldSig, FuncSig, Phase, UnitKind, VarInfo, VarKind,
};

#![forbid(unsafe_code)]

use crate::instr::Instr;

/// One compiled function. Lengths are measured in flattened stack slots.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Method {
    pub is_public: bool,
    pub use_preapproved_assets: bool,
    pub use_contract_assets: bool,
    pub args_length: usize,
    pub locals_length: usize,
    pub return_length: usize,
    pub instrs: Vec<Instr>,
}

impl Method {
    pub fn has_debug_ops(&self) -> bool {
        self.instrs.iter().any(Instr::is_debug)
    }
}

/// A deployed contract: persistent field slots plus callable methods.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StatefulContract {
    pub fields_length: usize,
    pub methods: Vec<Method>,
}

impl StatefulContract {
    pub fn has_debug_ops(&self) -> bool {
        self.methods.iter().any(Method::has_debug_ops)
    }
}

/// A one-shot transaction program. The entry method is public; any
/// helper methods are private.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StatefulScript {
    pub methods: Vec<Method>,
}

impl StatefulScript {
    pub fn has_debug_ops(&self) -> bool {
        self.methods.iter().any(Method::has_debug_ops)
    }
}

/// An asset script: stateless, no contract storage to touch.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StatelessScript {
    pub methods: Vec<Method>,
}

impl StatelessScript {
    pub fn has_debug_ops(&self) -> bool {
        self.methods.iter().any(Method::has_debug_ops)
    }
}

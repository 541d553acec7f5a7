#![forbid(unsafe_code)]

use std::cell::OnceCell;
use std::fmt;

use miette::SourceSpan;

/// Byte range in a unit's source text. The parser stamps one onto every
/// node it produces; compiler diagnostics hand them to `miette` labels.
pub type Span = SourceSpan;

/// A parsed payload together with the source range it came from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Spanned<T> {
    pub span: Span,
    pub node: T,
}

impl<T> Spanned<T> {
    pub fn new(span: Span, node: T) -> Self {
        Spanned { span, node }
    }

    /// Rewrap the payload, keeping the range.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Spanned<U> {
        Spanned::new(self.span, f(self.node))
    }
}

/// Span from a byte offset and a length.
pub fn span(start: usize, len: usize) -> Span {
    Span::new(start.into(), len)
}

/// Span covering `start..end`. An `end` before `start` (possible when a
/// parser recovers across token boundaries) clamps to an empty range.
pub fn span_between(start: usize, end: usize) -> Span {
    span(start, end.saturating_sub(start))
}

/// A source-level name: variables, fields, functions, events, units.
pub type Ident = Spanned<String>;

/// A user-declared type name (contract, interface or script).
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TypeId(pub String);

impl TypeId {
    pub fn new(name: impl Into<String>) -> Self {
        TypeId(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A function name. Built-in functions are written `name!` in source and
/// dispatch to dedicated opcodes instead of `CallLocal`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FuncId {
    pub name: String,
    pub is_builtin: bool,
}

impl FuncId {
    pub fn new(name: impl Into<String>) -> Self {
        FuncId {
            name: name.into(),
            is_builtin: false,
        }
    }

    pub fn builtin(name: impl Into<String>) -> Self {
        FuncId {
            name: name.into(),
            is_builtin: true,
        }
    }
}

impl fmt::Display for FuncId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_builtin {
            write!(f, "{}!", self.name)
        } else {
            write!(f, "{}", self.name)
        }
    }
}

/// The closed set of source-language types. Equality is structural:
/// arrays compare on element type and size, contracts on their type id.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Type {
    Bool,
    I256,
    U256,
    ByteVec,
    Address,
    FixedArray { elem: Box<Type>, size: usize },
    Contract(TypeId),
}

impl Type {
    pub fn array(elem: Type, size: usize) -> Self {
        Type::FixedArray {
            elem: Box::new(elem),
            size,
        }
    }

    pub fn contract(name: impl Into<String>) -> Self {
        Type::Contract(TypeId::new(name))
    }

    /// Stable textual form used in error messages and ABIs.
    pub fn signature(&self) -> String {
        match self {
            Type::Bool => "Bool".to_string(),
            Type::I256 => "I256".to_string(),
            Type::U256 => "U256".to_string(),
            Type::ByteVec => "ByteVec".to_string(),
            Type::Address => "Address".to_string(),
            Type::FixedArray { elem, size } => format!("[{}; {}]", elem.signature(), size),
            Type::Contract(id) => id.0.clone(),
        }
    }

    /// Number of VM stack slots a value of this type occupies.
    pub fn flattened_len(&self) -> usize {
        match self {
            Type::FixedArray { elem, size } => size * elem.flattened_len(),
            _ => 1,
        }
    }

    pub fn is_array(&self) -> bool {
        matches!(self, Type::FixedArray { .. })
    }

    fn is_numeric(&self) -> bool {
        matches!(self, Type::I256 | Type::U256)
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.signature())
    }
}

pub fn flattened_len_of(types: &[Type]) -> usize {
    types.iter().map(Type::flattened_len).sum()
}

/// A compile-time constant of a non-array type.
///
/// The source language names 256-bit integers; the compiler only ever has
/// to fold the constants it manufactures itself (indexes, counts, error
/// codes), so 128-bit payloads suffice. The VM owns real 256-bit math.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Val {
    Bool(bool),
    I256(i128),
    U256(u128),
    ByteVec(Vec<u8>),
    Address(Vec<u8>),
}

impl Val {
    pub fn ty(&self) -> Type {
        match self {
            Val::Bool(_) => Type::Bool,
            Val::I256(_) => Type::I256,
            Val::U256(_) => Type::U256,
            Val::ByteVec(_) => Type::ByteVec,
            Val::Address(_) => Type::Address,
        }
    }
}

impl fmt::Display for Val {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Val::Bool(b) => write!(f, "{b}"),
            Val::I256(v) => write!(f, "{v}i"),
            Val::U256(v) => write!(f, "{v}"),
            Val::ByteVec(bytes) => {
                write!(f, "#")?;
                for b in bytes {
                    write!(f, "{b:02x}")?;
                }
                Ok(())
            }
            Val::Address(bytes) => {
                write!(f, "@")?;
                for b in bytes {
                    write!(f, "{b:02x}")?;
                }
                Ok(())
            }
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UnaryOp {
    /// Boolean negation.
    Not,
    /// Arithmetic negation, signed integers only.
    Neg,
}

impl UnaryOp {
    pub fn result_type(&self, operand: &Type) -> Option<Type> {
        match (self, operand) {
            (UnaryOp::Not, Type::Bool) => Some(Type::Bool),
            (UnaryOp::Neg, Type::I256) => Some(Type::I256),
            _ => None,
        }
    }
}

impl fmt::Display for UnaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnaryOp::Not => write!(f, "!"),
            UnaryOp::Neg => write!(f, "-"),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    /// ByteVec concatenation (`++`).
    Concat,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

impl BinOp {
    /// The result type for the given operand types, or `None` when the
    /// operator does not accept them.
    pub fn result_type(&self, lhs: &Type, rhs: &Type) -> Option<Type> {
        use BinOp::*;
        match self {
            Add | Sub | Mul | Div | Mod => {
                if lhs == rhs && lhs.is_numeric() {
                    Some(lhs.clone())
                } else {
                    None
                }
            }
            Concat => {
                if lhs == &Type::ByteVec && rhs == &Type::ByteVec {
                    Some(Type::ByteVec)
                } else {
                    None
                }
            }
            Eq | Ne => {
                if lhs == rhs && !lhs.is_array() {
                    Some(Type::Bool)
                } else {
                    None
                }
            }
            Lt | Le | Gt | Ge => {
                if lhs == rhs && lhs.is_numeric() {
                    Some(Type::Bool)
                } else {
                    None
                }
            }
            And | Or => {
                if lhs == &Type::Bool && rhs == &Type::Bool {
                    Some(Type::Bool)
                } else {
                    None
                }
            }
        }
    }
}

impl fmt::Display for BinOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::Mod => "%",
            BinOp::Concat => "++",
            BinOp::Eq => "==",
            BinOp::Ne => "!=",
            BinOp::Lt => "<",
            BinOp::Le => "<=",
            BinOp::Gt => ">",
            BinOp::Ge => ">=",
            BinOp::And => "&&",
            BinOp::Or => "||",
        };
        write!(f, "{s}")
    }
}

/// Write-once memo for an expression's computed type. Filled on the first
/// `type_of` and never recomputed.
pub type TypeCell = OnceCell<Vec<Type>>;

#[derive(Clone, Debug, PartialEq)]
pub struct Expr {
    pub span: Span,
    pub kind: ExprKind,
    pub ty: TypeCell,
}

impl Expr {
    pub fn new(span: Span, kind: ExprKind) -> Self {
        Expr {
            span,
            kind,
            ty: TypeCell::new(),
        }
    }

    /// Strip grouping parentheses.
    pub fn unparen(&self) -> &Expr {
        match &self.kind {
            ExprKind::Paren(inner) => inner.unparen(),
            _ => self,
        }
    }

    /// True when the expression is the native-token id sentinel. Drives
    /// the `*Alph*` opcode specialization in asset built-ins.
    pub fn is_alph_token_id(&self) -> bool {
        matches!(self.unparen().kind, ExprKind::AlphTokenId)
    }
}

/// One entry of an approve-assets block: an address and the token amounts
/// it pre-authorizes for the callee.
#[derive(Clone, Debug, PartialEq)]
pub struct ApproveAsset {
    pub address: Expr,
    /// `(token id, amount)` pairs.
    pub tokens: Vec<(Expr, Expr)>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum ExprKind {
    Const(Val),
    Variable(Ident),
    EnumField {
        enum_id: Ident,
        field: Ident,
    },
    CreateArray(Vec<Expr>),
    ArrayElement {
        array: Box<Expr>,
        indexes: Vec<Expr>,
    },
    Unary {
        op: UnaryOp,
        expr: Box<Expr>,
    },
    Binary {
        op: BinOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    /// `Foo(addressExpr)` — view a ByteVec contract id as a `Foo`.
    ContractConv {
        type_id: Ident,
        address: Box<Expr>,
    },
    /// Call of a function of the current unit, or of a built-in.
    Call {
        id: FuncId,
        approve: Vec<ApproveAsset>,
        args: Vec<Expr>,
    },
    /// `Foo.f(…)` — static call on a named contract type.
    StaticContractCall {
        contract: Ident,
        id: FuncId,
        approve: Vec<ApproveAsset>,
        args: Vec<Expr>,
    },
    /// `obj.f(…)` — dynamic call through a contract value.
    ContractCall {
        obj: Box<Expr>,
        id: FuncId,
        approve: Vec<ApproveAsset>,
        args: Vec<Expr>,
    },
    /// Expression form; the else branch is mandatory.
    IfElse {
        branches: Vec<(Expr, Expr)>,
        else_expr: Box<Expr>,
    },
    Paren(Box<Expr>),
    /// The native-token id sentinel (`ALPH`), of type ByteVec.
    AlphTokenId,
}

#[derive(Clone, Debug, PartialEq)]
pub enum VarDeclaration {
    Named { mutable: bool, ident: Ident },
    Anonymous,
}

#[derive(Clone, Debug, PartialEq)]
pub struct VarDefStmt {
    pub span: Span,
    pub decls: Vec<VarDeclaration>,
    pub value: Expr,
}

/// Assignment target: a variable, optionally indexed into an array.
#[derive(Clone, Debug, PartialEq)]
pub struct AssignTarget {
    pub ident: Ident,
    pub indexes: Vec<Expr>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct AssignStmt {
    pub span: Span,
    pub targets: Vec<AssignTarget>,
    pub value: Expr,
}

#[derive(Clone, Debug, PartialEq)]
pub struct IfBranch {
    pub cond: Expr,
    pub body: Vec<Statement>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct IfElseStmt {
    pub span: Span,
    pub branches: Vec<IfBranch>,
    pub else_body: Option<Vec<Statement>>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct WhileStmt {
    pub span: Span,
    pub cond: Expr,
    pub body: Vec<Statement>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ForStmt {
    pub span: Span,
    pub init: Box<Statement>,
    pub cond: Expr,
    pub update: Box<Statement>,
    pub body: Vec<Statement>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ReturnStmt {
    pub span: Span,
    pub exprs: Vec<Expr>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct EmitEventStmt {
    pub span: Span,
    pub id: Ident,
    pub args: Vec<Expr>,
}

/// `emit Debug(...)` — string parts interleaved with interpolations.
/// Elided entirely in release emission.
#[derive(Clone, Debug, PartialEq)]
pub struct DebugStmt {
    pub span: Span,
    pub parts: Vec<String>,
    pub interpolations: Vec<Expr>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Statement {
    VarDef(VarDefStmt),
    Assign(AssignStmt),
    /// A call in statement position; results are popped.
    Expr(Expr),
    IfElse(IfElseStmt),
    While(WhileStmt),
    For(ForStmt),
    Return(ReturnStmt),
    EmitEvent(EmitEventStmt),
    Debug(DebugStmt),
}

#[derive(Clone, Debug, PartialEq)]
pub struct Argument {
    pub ident: Ident,
    pub ty: Type,
    pub is_mutable: bool,
    pub is_unused: bool,
}

impl Argument {
    pub fn new(ident: Ident, ty: Type) -> Self {
        Argument {
            ident,
            ty,
            is_mutable: false,
            is_unused: false,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct FuncDef {
    pub span: Span,
    pub id: FuncId,
    pub is_public: bool,
    pub use_preapproved_assets: bool,
    pub use_contract_assets: bool,
    /// `None` means the default (the check is expected); `Some(false)` is
    /// an explicit opt-out.
    pub use_check_external_caller: Option<bool>,
    pub use_update_fields: bool,
    pub args: Vec<Argument>,
    pub rtypes: Vec<Type>,
    /// `None` for abstract functions (interfaces, abstract contracts).
    pub body: Option<Vec<Statement>>,
}

impl FuncDef {
    pub fn is_abstract(&self) -> bool {
        self.body.is_none()
    }

    pub fn name(&self) -> &str {
        &self.id.name
    }

    /// True when both definitions declare the same externally visible
    /// signature: name, publicity, asset attributes, argument types and
    /// mutability, and return types.
    pub fn signature_matches(&self, other: &FuncDef) -> bool {
        self.id.name == other.id.name
            && self.is_public == other.is_public
            && self.use_preapproved_assets == other.use_preapproved_assets
            && self.use_contract_assets == other.use_contract_assets
            && self.args.len() == other.args.len()
            && self
                .args
                .iter()
                .zip(&other.args)
                .all(|(a, b)| a.ty == b.ty && a.is_mutable == b.is_mutable)
            && self.rtypes == other.rtypes
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct EventField {
    pub ident: Ident,
    pub ty: Type,
}

#[derive(Clone, Debug, PartialEq)]
pub struct EventDef {
    pub span: Span,
    pub ident: Ident,
    pub fields: Vec<EventField>,
}

impl EventDef {
    pub fn name(&self) -> &str {
        &self.ident.node
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ConstantVarDef {
    pub span: Span,
    pub ident: Ident,
    pub value: Val,
}

#[derive(Clone, Debug, PartialEq)]
pub struct EnumFieldDef {
    pub ident: Ident,
    pub value: Val,
}

#[derive(Clone, Debug, PartialEq)]
pub struct EnumDef {
    pub span: Span,
    pub ident: Ident,
    pub fields: Vec<EnumFieldDef>,
}

/// One entry of a contract's inheritance list.
#[derive(Clone, Debug, PartialEq)]
pub enum Inheritance {
    /// `extends Parent(a, b)` — the idents name the child fields passed
    /// through to the parent's field list.
    Contract { parent: Ident, fields: Vec<Ident> },
    /// `implements Iface`.
    Interface { parent: Ident },
}

impl Inheritance {
    pub fn parent(&self) -> &Ident {
        match self {
            Inheritance::Contract { parent, .. } => parent,
            Inheritance::Interface { parent } => parent,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct TxScript {
    pub span: Span,
    pub ident: Ident,
    pub templates: Vec<Argument>,
    pub funcs: Vec<FuncDef>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct AssetScript {
    pub span: Span,
    pub ident: Ident,
    pub templates: Vec<Argument>,
    pub funcs: Vec<FuncDef>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Contract {
    pub span: Span,
    pub ident: Ident,
    pub is_abstract: bool,
    /// Whether the synthetic std-interface-id field is materialized when
    /// an inherited interface declares one. `None` inherits the default.
    pub std_id_enabled: Option<bool>,
    pub fields: Vec<Argument>,
    pub funcs: Vec<FuncDef>,
    pub events: Vec<EventDef>,
    pub consts: Vec<ConstantVarDef>,
    pub enums: Vec<EnumDef>,
    pub inheritances: Vec<Inheritance>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ContractInterface {
    pub span: Span,
    pub ident: Ident,
    /// Parent interface names.
    pub inheritances: Vec<Ident>,
    pub funcs: Vec<FuncDef>,
    pub events: Vec<EventDef>,
    /// Declared std interface id bytes (without the fixed prefix).
    pub std_id: Option<Vec<u8>>,
    // Declaring any of these on an interface is a semantic error; the
    // slots exist so the checker can report them instead of the parser.
    pub fields: Vec<Argument>,
    pub consts: Vec<ConstantVarDef>,
    pub enums: Vec<EnumDef>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum ContractUnit {
    TxScript(TxScript),
    AssetScript(AssetScript),
    Contract(Contract),
    Interface(ContractInterface),
}

impl ContractUnit {
    pub fn ident(&self) -> &Ident {
        match self {
            ContractUnit::TxScript(s) => &s.ident,
            ContractUnit::AssetScript(s) => &s.ident,
            ContractUnit::Contract(c) => &c.ident,
            ContractUnit::Interface(i) => &i.ident,
        }
    }

    pub fn name(&self) -> &str {
        &self.ident().node
    }

    pub fn type_id(&self) -> TypeId {
        TypeId::new(self.name())
    }

    pub fn span(&self) -> Span {
        match self {
            ContractUnit::TxScript(s) => s.span,
            ContractUnit::AssetScript(s) => s.span,
            ContractUnit::Contract(c) => c.span,
            ContractUnit::Interface(i) => i.span,
        }
    }

    pub fn funcs(&self) -> &[FuncDef] {
        match self {
            ContractUnit::TxScript(s) => &s.funcs,
            ContractUnit::AssetScript(s) => &s.funcs,
            ContractUnit::Contract(c) => &c.funcs,
            ContractUnit::Interface(i) => &i.funcs,
        }
    }

    pub fn is_script(&self) -> bool {
        matches!(
            self,
            ContractUnit::TxScript(_) | ContractUnit::AssetScript(_)
        )
    }

    /// Interfaces and abstract contracts may be inherited from; concrete
    /// contracts and scripts may not.
    pub fn inheritable(&self) -> bool {
        match self {
            ContractUnit::Interface(_) => true,
            ContractUnit::Contract(c) => c.is_abstract,
            _ => false,
        }
    }

    /// Only deployed, concrete contracts can be the target of a
    /// contract-conversion expression or an external call.
    pub fn instantiable(&self) -> bool {
        matches!(self, ContractUnit::Contract(c) if !c.is_abstract)
            || matches!(self, ContractUnit::Interface(_))
    }

    pub fn parent_names(&self) -> Vec<&Ident> {
        match self {
            ContractUnit::Contract(c) => c.inheritances.iter().map(|i| i.parent()).collect(),
            ContractUnit::Interface(i) => i.inheritances.iter().collect(),
            _ => Vec::new(),
        }
    }
}

//! A minimal stand-in for the "Parser / AST" and "Program model" external
//! collaborators (§1). The real parser/resolver yield a much richer `Node`
//! tree and element table; this gives the lowering components (C6–C9)
//! something concrete to walk and gives the test suite something concrete
//! to construct by hand, without pretending to be a full front end.

use smallvec::SmallVec;

use crate::diagnostics::FileSpan;
use crate::symbol::Symbol;
use crate::types::element::{ClassId, ElementId, FunctionId, GlobalId, OperatorKind};
use crate::types::ty::Type;

/// A binary operator token, resolved upstream to a [`Type`]-directed
/// operation at expression-lowering time (§4.8).
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum BinaryOp {
  Add, Sub, Mul, Div, Rem, Pow,
  Eq, Ne, Lt, Le, Gt, Ge,
  BitAnd, BitOr, BitXor, Shl, Shr, ShrU,
  LogicalAnd, LogicalOr,
}

impl BinaryOp {
  /// The [`OperatorKind`] a class-level overload for this token would be
  /// tagged with, if any (logical `&&`/`||` never dispatch to an overload:
  /// §4.8 "Short-circuit" is handled structurally, not via `OperatorKind`).
  #[must_use] pub fn operator_kind(self) -> Option<OperatorKind> {
    Some(match self {
      BinaryOp::Add => OperatorKind::Add,
      BinaryOp::Sub => OperatorKind::Sub,
      BinaryOp::Mul => OperatorKind::Mul,
      BinaryOp::Div => OperatorKind::Div,
      BinaryOp::Rem => OperatorKind::Rem,
      BinaryOp::Pow => OperatorKind::Pow,
      BinaryOp::Eq => OperatorKind::Eq,
      BinaryOp::Ne => OperatorKind::Ne,
      BinaryOp::Lt => OperatorKind::Lt,
      BinaryOp::Le => OperatorKind::Le,
      BinaryOp::Gt => OperatorKind::Gt,
      BinaryOp::Ge => OperatorKind::Ge,
      BinaryOp::BitAnd => OperatorKind::BitwiseAnd,
      BinaryOp::BitOr => OperatorKind::BitwiseOr,
      BinaryOp::BitXor => OperatorKind::BitwiseXor,
      BinaryOp::Shl => OperatorKind::BitwiseShl,
      BinaryOp::Shr => OperatorKind::BitwiseShr,
      BinaryOp::ShrU => OperatorKind::BitwiseShrU,
      BinaryOp::LogicalAnd | BinaryOp::LogicalOr => return None,
    })
  }
}

/// A unary operator token.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum UnaryOp { Plus, Minus, Not, BitNot, PrefixInc, PrefixDec }

/// An assignment target, already resolved to its kind by the resolver
/// (§4.8 "Assignment").
#[derive(Clone, Debug)]
pub enum AssignTarget {
  Local(Symbol),
  Global(GlobalId),
  Field { base: Box<Node>, field: Symbol },
  Property { base: Box<Node>, name: Symbol },
  Indexed { base: Box<Node>, index: Box<Node> },
}

/// A resolved expression node. Identifiers, property accesses, and calls
/// already carry enough resolver output (the `Element`/overload they refer
/// to) that C8 never performs name lookup itself — only type-directed
/// lowering (§1 "Resolver... returns `Element`s").
#[derive(Clone, Debug)]
pub enum Node {
  NullLiteral,
  BoolLiteral(bool),
  IntLiteral(i64),
  FloatLiteral(f64),
  StringLiteral(String),
  /// `this`, inside an instance method or constructor.
  This,
  /// `super`, inside a derived-class method or constructor.
  Super,
  /// A resolved identifier: a local/global/inlined-constant/enum-value
  /// reference (§4.8 "Identifier").
  Ident { name: Symbol, element: Option<ElementId> },
  Binary { op: BinaryOp, lhs: Box<Node>, rhs: Box<Node> },
  Unary { op: UnaryOp, operand: Box<Node> },
  Assign { target: AssignTarget, value: Box<Node>, is_tee: bool },
  /// A direct or indirect call; which path applies is determined at
  /// lowering time by inspecting `callee` (§4.8 "Calls").
  Call { callee: Box<Node>, type_args: SmallVec<[Type; 2]>, args: Vec<Node> },
  New { class: ClassId, args: Vec<Node> },
  PropertyAccess { base: Box<Node>, name: Symbol },
  ElementAccess { base: Box<Node>, index: Box<Node> },
  Ternary { cond: Box<Node>, then: Box<Node>, els: Box<Node> },
  ArrayLiteral { element_ty: Type, elements: Vec<Node> },
  /// A reference to a resolved, non-generic or already-instantiated
  /// function, for the direct-call path.
  FunctionRef(FunctionId),
}

/// A statement node (§4.7).
#[derive(Clone, Debug)]
pub enum Stmt {
  Expr(Node),
  Block(Vec<Stmt>),
  If { cond: Node, then: Box<Stmt>, els: Option<Box<Stmt>> },
  While { cond: Node, body: Box<Stmt> },
  DoWhile { body: Box<Stmt>, cond: Node },
  For { init: Option<Box<Stmt>>, cond: Option<Node>, update: Option<Node>, body: Box<Stmt> },
  Switch { discriminant: Node, cases: Vec<SwitchCase>, default: Option<Vec<Stmt>> },
  Return(Option<Node>),
  Break(Option<Symbol>),
  Continue(Option<Symbol>),
  Throw(Option<Node>),
  Try,
  /// A local variable declaration; `is_const` with a value that
  /// precomputes to a constant becomes a virtual local (§4.7 "Variable").
  Variable { name: Symbol, ty: Option<Type>, is_const: bool, init: Option<Node> },
}

/// One labelled case of a `switch` (§4.7).
#[derive(Clone, Debug)]
pub struct SwitchCase {
  pub label: Node,
  pub body: Vec<Stmt>,
}

/// A single compilation unit (§3 "Module" lifecycle: "populated with...").
#[derive(Clone, Debug, Default)]
pub struct Source {
  pub path: String,
  pub top_level: Vec<TopLevel>,
}

/// A top-level declaration or statement the driver (C5) walks (§4.5).
#[derive(Clone, Debug)]
pub enum TopLevel {
  Function(FunctionId),
  Global(GlobalId),
  Class(ClassId),
  Enum(crate::types::element::EnumId),
  Namespace(crate::types::element::NamespaceId),
  Import { source_path: String },
  Statement(Stmt),
}

/// The whole resolved program: every source, plus which one(s) are entry
/// sources (directly requested, as opposed to pulled in via `import`)
/// (§4.5 "tree-shaking policy").
#[derive(Clone, Debug, Default)]
pub struct Program {
  pub sources: Vec<Source>,
  pub entry_sources: Vec<usize>,
}

/// Carries a node's source range alongside it, for diagnostics (§1
/// "`Node` trees... with source ranges").
#[derive(Clone, Debug)]
pub struct Spanned<T> {
  pub node: T,
  pub span: FileSpan,
}

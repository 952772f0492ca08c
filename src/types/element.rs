//! The `Element` type, the resolved program entities the core consumes
//! (§3 "Element"). Graphs of elements (function ↔ prototype ↔ class ↔
//! field) are represented as integer handles into per-kind arenas rather
//! than direct pointers, so that a class's methods and a method's owning
//! class can each name the other without a borrow-checker-hostile cycle
//! (§9 "Graph of references").

use bitflags::bitflags;
use smallvec::SmallVec;

use crate::flow::Flow;
use crate::ir::FuncId;
use crate::symbol::Symbol;
use crate::types::ty::Type;

/// A generic arena handle. `T` is a zero-sized tag distinguishing e.g.
/// `Idx<Class>` from `Idx<Function>` at the type level even though both are
/// plain `u32`s at runtime.
pub struct Idx<T>(u32, std::marker::PhantomData<fn() -> T>);

impl<T> Clone for Idx<T> { fn clone(&self) -> Self { *self } }
impl<T> Copy for Idx<T> {}
impl<T> PartialEq for Idx<T> { fn eq(&self, o: &Self) -> bool { self.0 == o.0 } }
impl<T> Eq for Idx<T> {}
impl<T> std::hash::Hash for Idx<T> { fn hash<H: std::hash::Hasher>(&self, h: &mut H) { self.0.hash(h) } }
impl<T> std::fmt::Debug for Idx<T> { fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result { write!(f, "#{}", self.0) } }

impl<T> Idx<T> {
  #[must_use] pub fn new(i: u32) -> Self { Self(i, std::marker::PhantomData) }
  #[must_use] pub fn into_usize(self) -> usize { self.0 as usize }
}

/// An append-only, index-addressed collection, used for every per-kind
/// element table (`Arena<Function>`, `Arena<Class>`, ...).
#[derive(Debug)]
pub struct Arena<T> { items: Vec<T> }

impl<T> Default for Arena<T> { fn default() -> Self { Self { items: Vec::new() } } }

impl<T> Arena<T> {
  #[must_use] pub fn new() -> Self { Self::default() }
  pub fn push(&mut self, item: T) -> Idx<T> {
    let id = Idx::new(u32::try_from(self.items.len()).expect("arena overflow"));
    self.items.push(item);
    id
  }
  #[must_use] pub fn get(&self, id: Idx<T>) -> &T { &self.items[id.into_usize()] }
  pub fn get_mut(&mut self, id: Idx<T>) -> &mut T { &mut self.items[id.into_usize()] }
  pub fn iter(&self) -> impl Iterator<Item = (Idx<T>, &T)> {
    self.items.iter().enumerate().map(|(i, t)| (Idx::new(u32::try_from(i).unwrap()), t))
  }
  #[must_use] pub fn len(&self) -> usize { self.items.len() }
  #[must_use] pub fn is_empty(&self) -> bool { self.items.is_empty() }
}

pub type ClassId = Idx<Class>;
pub type ClassPrototypeId = Idx<ClassPrototype>;
pub type FunctionId = Idx<Function>;
pub type FunctionPrototypeId = Idx<FunctionPrototype>;
pub type GlobalId = Idx<Global>;
pub type EnumId = Idx<Enum>;
pub type PropertyId = Idx<Property>;
pub type NamespaceId = Idx<Namespace>;
pub type FieldId = Idx<Field>;

bitflags! {
  /// Common flags shared by every [`Element`] variant (§3).
  #[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
  pub struct ElementFlags: u32 {
    const EXPORT             = 1 << 0;
    const STATIC              = 1 << 1;
    const CONST               = 1 << 2;
    const READONLY            = 1 << 3;
    const PRIVATE             = 1 << 4;
    const INSTANCE            = 1 << 5;
    const GENERIC             = 1 << 6;
    const AMBIENT             = 1 << 7;
    const CONSTRUCTOR         = 1 << 8;
    const MAIN                = 1 << 9;
    const INLINED             = 1 << 10;
    /// Set once the element's definition has been added to the module;
    /// every lowering entry point checks this first (§3 Invariants).
    const COMPILED            = 1 << 11;
    const MODULE_IMPORT       = 1 << 12;
    /// Set on a [`Function`] that is itself a trampoline (§4.4), so that
    /// `ensureFunctionTableEntry` does not try to wrap a trampoline in
    /// another trampoline.
    const TRAMPOLINE          = 1 << 13;
    const UNCHECKED_CONTEXT   = 1 << 14;
    /// Set once some branch of the element's body has executed an
    /// allocation (§3 Invariants: "the first local of a constructor...").
    const ALLOCATES           = 1 << 15;
  }
}

bitflags! {
  /// Decorator-sourced flags, kept separate from [`ElementFlags`] because
  /// they come from `@decorator(...)` syntax rather than declaration
  /// modifiers and are consulted by different components (C6, C8, C9).
  #[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
  pub struct DecoratorFlags: u32 {
    const BUILTIN  = 1 << 0;
    const INLINE   = 1 << 1;
    const EXTERNAL = 1 << 2;
  }
}

/// The operator a class method overloads, keyed off the `@operator(...)`
/// decorator tag (§4.8). Method dispatch by name is replaced, at the
/// resolver boundary, by a lookup on this tag (§9).
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum OperatorKind {
  Add, Sub, Mul, Div, Rem, Pow,
  Eq, Ne, Lt, Le, Gt, Ge,
  BitwiseAnd, BitwiseOr, BitwiseXor, BitwiseNot, BitwiseShl, BitwiseShr, BitwiseShrU,
  Plus, Minus, Not, PrefixInc, PrefixDec,
  IndexedGet, IndexedSet,
}

impl OperatorKind {
  /// The decorator string form, e.g. `@operator("+")`.
  #[must_use] pub fn as_str(self) -> &'static str {
    match self {
      OperatorKind::Add => "+", OperatorKind::Sub => "-", OperatorKind::Mul => "*",
      OperatorKind::Div => "/", OperatorKind::Rem => "%", OperatorKind::Pow => "**",
      OperatorKind::Eq => "==", OperatorKind::Ne => "!=",
      OperatorKind::Lt => "<", OperatorKind::Le => "<=", OperatorKind::Gt => ">", OperatorKind::Ge => ">=",
      OperatorKind::BitwiseAnd => "&", OperatorKind::BitwiseOr => "|", OperatorKind::BitwiseXor => "^",
      OperatorKind::BitwiseNot => "~", OperatorKind::BitwiseShl => "<<",
      OperatorKind::BitwiseShr => ">>", OperatorKind::BitwiseShrU => ">>>",
      OperatorKind::Plus => "unary+", OperatorKind::Minus => "unary-", OperatorKind::Not => "!",
      OperatorKind::PrefixInc => "++", OperatorKind::PrefixDec => "--",
      OperatorKind::IndexedGet => "[]", OperatorKind::IndexedSet => "[]=",
    }
  }

  /// Whether this operator, applied to a reference type with no overload
  /// found, is nonetheless allowed to fall back to native pointer
  /// comparison (§4.8: "`==`/`!=` remain allowed for references without
  /// overload").
  #[must_use] pub fn allows_pointer_fallback(self) -> bool {
    matches!(self, OperatorKind::Eq | OperatorKind::Ne)
  }
}

/// A function's parameter/return shape (§3 "Function").
#[derive(Clone, Debug)]
pub struct Signature {
  pub params: SmallVec<[Type; 4]>,
  /// Number of leading parameters that are required; the remainder have
  /// initializer expressions and are filled by the trampoline path (C4/C9)
  /// when omitted.
  pub required: usize,
  pub return_type: Type,
  /// Present for instance methods and constructors.
  pub this_type: Option<Type>,
}

impl Signature {
  #[must_use] pub fn has_this(&self) -> bool { self.this_type.is_some() }
  #[must_use] pub fn max_operands(&self) -> usize { self.params.len() }
  #[must_use] pub fn has_optional(&self) -> bool { self.required < self.params.len() }
}

/// A resolved instance of a [`FunctionPrototype`] (§3 "Function"). Created
/// once per distinct type-argument combination; compilation is memoised by
/// `ElementFlags::COMPILED`.
#[derive(Clone, Debug)]
pub struct Function {
  pub prototype: FunctionPrototypeId,
  pub signature: Signature,
  pub flags: ElementFlags,
  /// Internal (mangled) name, assigned once resolved.
  pub name: Symbol,
  /// Source-level parameter names, aligned to `signature.params` (`this` is
  /// addressed by `Node::This`/`Node::Super`, not a name here). Needed to
  /// re-bind arguments to their declared names when inlining a call (§4.8
  /// "Inlining") and when a trampoline compiles an optional initializer
  /// that references an earlier parameter by name (§4.4).
  pub param_names: Vec<Symbol>,
  /// Additional locals beyond the parameters, in acquisition order; grows
  /// as the body is compiled (temp-local pool, §5).
  pub extra_locals: Vec<Type>,
  pub flow: Flow,
  /// The trampoline synthesized for this function, if it has optional
  /// parameters (§4.4). `None` until first requested.
  pub trampoline: Option<FunctionId>,
  /// Index into the module's function table, or `-1` if not indexed
  /// (§3 Invariants).
  pub table_index: i32,
  pub next_inline_id: u32,
  /// Set once the body has been lowered and handed to the IR module.
  pub compiled_ir: Option<FuncId>,
  /// Initializer expression for each optional parameter (aligned to
  /// `signature.params[signature.required..]`), compiled lazily in the
  /// scope that needs it: the trampoline body (§4.4) or an inlined call
  /// site (§4.8), never eagerly.
  pub optional_initializers: Vec<crate::types::program::Node>,
  /// The function body, as resolved statements (absent for ambient/
  /// intrinsic functions). `None` after compilation, since by then its
  /// statements have been consumed into `compiled_ir`.
  pub body: Option<Vec<crate::types::program::Stmt>>,
}

impl Function {
  #[must_use] pub fn is_compiled(&self) -> bool { self.flags.contains(ElementFlags::COMPILED) }
  #[must_use] pub fn is_trampoline(&self) -> bool { self.flags.contains(ElementFlags::TRAMPOLINE) }
}

/// The unresolved declaration a [`Function`] is an instance of.
#[derive(Clone, Debug)]
pub struct FunctionPrototype {
  pub name: Symbol,
  pub flags: ElementFlags,
  pub decorators: DecoratorFlags,
  pub operator: Option<OperatorKind>,
  pub owner: Option<ClassId>,
  /// Module/element name pair for `@external`-decorated or ambient
  /// functions (§6 "Imports mangling").
  pub import: Option<(Symbol, Symbol)>,
  pub instances: Vec<FunctionId>,
}

/// A resolved global variable (§3).
#[derive(Clone, Debug)]
pub struct Global {
  pub name: Symbol,
  pub ty: Type,
  pub flags: ElementFlags,
  pub import: Option<(Symbol, Symbol)>,
  pub compiled_ir: Option<crate::ir::GlobalId>,
  /// Set once a constant global's initializer has precomputed to a literal
  /// (§4.6); such globals are never emitted as IR globals at all.
  pub inlined_value: Option<crate::ir::Expr>,
}

/// A local binding inside a function body (§3). Not arena-allocated: owned
/// directly by the `Flow`'s scoped-locals map, since locals never outlive
/// their function.
#[derive(Clone, Debug)]
pub struct Local {
  pub name: Symbol,
  pub ty: Type,
  pub flags: ElementFlags,
  /// `None` for a virtual (constant-substituted) local (§ GLOSSARY).
  pub index: Option<u32>,
  /// Present only for virtual locals.
  pub constant_value: Option<crate::ir::Expr>,
}

/// A resolved class field (§3). Layout (byte offset within instances) is
/// precomputed by the resolver; the core only consults it.
#[derive(Clone, Debug)]
pub struct Field {
  pub name: Symbol,
  pub ty: Type,
  pub flags: ElementFlags,
  pub offset: u32,
  pub initializer: Option<crate::ir::Expr>,
  /// Index of the constructor parameter that initializes this field, for
  /// `constructor(public x: T)`-style declarations (§4.8 "Allocation").
  pub ctor_param: Option<usize>,
}

/// A resolved class instance (§3). `size` is the total instance byte size
/// including any GC header.
#[derive(Clone, Debug)]
pub struct Class {
  pub prototype: ClassPrototypeId,
  pub base: Option<ClassId>,
  pub fields: Vec<FieldId>,
  pub constructor: Option<FunctionId>,
  pub methods: Vec<FunctionId>,
  pub operators: Vec<(OperatorKind, FunctionId)>,
  pub size: u32,
  pub flags: ElementFlags,
  pub gc_hook: Option<i32>,
}

impl Class {
  /// Look up a declared operator overload (§4.8, §9 "replace method
  /// dispatch with table lookup on `OperatorKind`").
  #[must_use] pub fn operator(&self, kind: OperatorKind) -> Option<FunctionId> {
    self.operators.iter().find(|(k, _)| *k == kind).map(|(_, f)| *f)
  }
}

/// The unresolved class declaration a [`Class`] is an instance of.
#[derive(Clone, Debug)]
pub struct ClassPrototype {
  pub name: Symbol,
  pub flags: ElementFlags,
  pub decorators: DecoratorFlags,
  pub instances: Vec<ClassId>,
}

/// A resolved const-enum or regular enum (§3, §4.6).
#[derive(Clone, Debug)]
pub struct Enum {
  pub name: Symbol,
  pub flags: ElementFlags,
  pub members: Vec<EnumValue>,
}

/// One member of an [`Enum`] (§3 "EnumValue").
#[derive(Clone, Debug)]
pub struct EnumValue {
  pub name: Symbol,
  pub flags: ElementFlags,
  /// Present once the initializer has been evaluated; absent only
  /// transiently during C6 lowering.
  pub value: Option<i32>,
  pub compiled_ir: Option<crate::ir::GlobalId>,
  /// Set once a `const enum` member's value has been folded to a literal
  /// (§4.6, §8 "Const-enum propagation"); mirrors [`Global::inlined_value`].
  /// A reference to the member substitutes this directly instead of
  /// `get_global`.
  pub inlined_value: Option<crate::ir::Expr>,
}

/// A resolved property accessor pair (§3).
#[derive(Clone, Debug)]
pub struct Property {
  pub name: Symbol,
  pub flags: ElementFlags,
  pub getter: Option<FunctionId>,
  pub setter: Option<FunctionId>,
}

/// A namespace, purely a grouping construct for export translation (§4.5).
#[derive(Clone, Debug)]
pub struct Namespace {
  pub name: Symbol,
  pub flags: ElementFlags,
  pub members: Vec<ElementId>,
}

/// A resolved program entity (§3 "Element"). Mirrors the tag set the
/// resolver hands to the core verbatim; `Local` is intentionally absent
/// here since locals are scoped to a `Flow`, not arena-addressed.
#[derive(Clone, Copy, Debug)]
pub enum ElementId {
  Function(FunctionId),
  FunctionPrototype(FunctionPrototypeId),
  Global(GlobalId),
  Class(ClassId),
  ClassPrototype(ClassPrototypeId),
  Enum(EnumId),
  /// A single member of an enum, named by its owning enum and its index
  /// into `Enum::members` — the target of an `E.C`-style identifier
  /// reference (§3 "EnumValue", `Node::Ident`).
  EnumValue(EnumId, usize),
  Property(PropertyId),
  Namespace(NamespaceId),
  Field(FieldId),
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn arena_handles_round_trip() {
    let mut arena: Arena<u32> = Arena::new();
    let a = arena.push(10);
    let b = arena.push(20);
    assert_eq!(*arena.get(a), 10);
    assert_eq!(*arena.get(b), 20);
    assert_ne!(a, b);
  }

  #[test]
  fn operator_kind_round_trips_through_decorator_string() {
    assert_eq!(OperatorKind::Add.as_str(), "+");
    assert!(OperatorKind::Eq.allows_pointer_fallback());
    assert!(!OperatorKind::Add.allows_pointer_fallback());
  }
}

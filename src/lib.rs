//! Code-generation core for a statically-typed, class-based,
//! TypeScript-like source language targeting WebAssembly (§1).
//!
//! [`Compiler`] owns all process-scoped state (§5 "Shared resources") and
//! is the single entry point: construct one, call
//! [`Compiler::compile`](crate::driver), and inspect
//! [`Compiler::diagnostics`] before trusting the returned [`ir::Module`].

pub mod builtins;
pub mod call;
pub mod decls;
pub mod diagnostics;
pub mod driver;
pub mod expr;
pub mod expr_assign;
pub mod expr_call;
pub mod flow;
pub mod function_table;
pub mod ir;
pub mod memory;
pub mod stmt;
pub mod symbol;
pub mod types;

use bitflags::bitflags;
use hashbrown::{HashMap, HashSet};

use crate::diagnostics::{DiagnosticBag, FileSpan};
use crate::flow::Flow;
use crate::memory::MemoryLayout;
use crate::symbol::{Interner, Symbol};
use crate::types::element::{
  Arena, Class, ClassId, ClassPrototype, ClassPrototypeId, Enum, EnumId, Field, FieldId,
  Function, FunctionId, FunctionPrototype, FunctionPrototypeId, Global, GlobalId, Namespace,
  NamespaceId, Property, PropertyId,
};
use crate::types::ty::Type;

bitflags! {
  /// The `features` compiler option bitset (§6).
  #[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
  pub struct Features: u32 {
    /// Enables `extend8_s`/`extend16_s`/`extend32_s` for small-integer
    /// wrap (§4.1 "Ensure-wrap"), avoiding the shift-pair fallback.
    const SIGN_EXTENSION = 1 << 0;
    /// Allows a non-`const` global to be exported (§4.5 "Exports").
    const MUTABLE_GLOBAL = 1 << 1;
  }
}

/// The target's pointer width, controlling `usize`/`isize` size and which
/// native type backs a reference (§6 `target`).
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub enum Target {
  #[default]
  Wasm32,
  Wasm64,
}

impl Target {
  #[must_use] pub fn pointer_size(self) -> u32 { match self { Target::Wasm32 => 32, Target::Wasm64 => 64 } }
}

/// Recognised compiler options (§6).
#[derive(Clone, Debug)]
pub struct CompilerOptions {
  pub target: Target,
  pub no_tree_shaking: bool,
  pub no_assert: bool,
  pub import_memory: bool,
  pub import_table: bool,
  pub source_map: bool,
  pub memory_base: u32,
  pub global_aliases: HashMap<String, String>,
  pub features: Features,
}

impl Default for CompilerOptions {
  fn default() -> Self {
    Self {
      target: Target::default(),
      no_tree_shaking: false,
      no_assert: false,
      import_memory: false,
      import_table: false,
      source_map: false,
      memory_base: 8,
      global_aliases: HashMap::new(),
      features: Features::empty(),
    }
  }
}

/// A temporary local acquired from a function's pool (§5 "Temporary
/// locals"). Carries enough information to release it correctly.
#[derive(Clone, Copy, Debug)]
pub struct TempLocal {
  pub index: u32,
  pub ty: Type,
  pub wrapped: bool,
}

/// The compiler's process-scoped, single-threaded state (§5 "Shared
/// resources"). There is exactly one instance per compilation; all of its
/// fields are mutated only by the one owning thread (§5 "Scheduling
/// model").
pub struct Compiler {
  pub interner: Interner,
  pub diagnostics: DiagnosticBag,
  pub options: CompilerOptions,
  pub module: ir::Module,
  pub memory: MemoryLayout,

  pub functions: Arena<Function>,
  pub function_prototypes: Arena<FunctionPrototype>,
  pub globals: Arena<Global>,
  pub classes: Arena<Class>,
  pub class_prototypes: Arena<ClassPrototype>,
  pub enums: Arena<Enum>,
  pub properties: Arena<Property>,
  pub namespaces: Arena<Namespace>,
  pub fields: Arena<Field>,

  /// The function currently being lowered, if any (§9 "keep `currentType`,
  /// `currentFunction`, `currentFlow` in that context").
  pub current_function: Option<FunctionId>,
  /// The flow for the branch currently being lowered. A stack because
  /// statement lowering forks/frees around nested blocks; the top is the
  /// active flow (§9 "Flow forks": "represent `Flow`... with explicit
  /// `fork`/`free` (LIFO stack)").
  pub flow_stack: Vec<Flow>,
  /// The IR-level type of the expression most recently compiled (§3
  /// Invariants).
  pub current_type: Type,

  /// `~argc` global, created lazily on first trampoline use (§5).
  pub argc_global: Option<GlobalId>,
  /// `~started` global, created only when a user `main` exists (§5).
  pub started_global: Option<GlobalId>,
  /// The synthetic start function created by the driver (C5, §4.5) to hold
  /// module-level initialisation. `main`'s body wraps a call to it behind
  /// the `~started` guard (§4.6 "Functions").
  pub start_function: Option<FunctionId>,
  /// IR statements for module-level global/enum initialisation, collected
  /// by [`crate::decls`] as declarations are lowered and drained into the
  /// synthetic start function's body by the driver (§4.5, §4.6 "Globals").
  pub pending_start_inits: Vec<ir::Expr>,

  /// Recursion guard for self-inlining (§4.8 "Inlining").
  pub current_inline_functions: HashSet<FunctionId>,
  /// Monotonically increasing counter minting fresh `break|N`/`continue|N`
  /// loop labels (§4.7).
  pub break_context_counter: u32,
  /// Monotonically increasing counter minting fresh inline-call return
  /// labels, `<fname>|inlined.<n>` (§4.8).
  pub inline_counter: u32,
  /// Stack of currently active branch-target labels, innermost last. Used
  /// to compute a `Br`'s relative depth for named `break`/`continue`
  /// targets (§4.7) and an inlined call's synthetic `return` label (§4.8
  /// "Inlining").
  pub label_stack: Vec<Symbol>,

  /// Cached resolutions of `Math.pow`/`Mathf.pow`/`Math.mod`/`Mathf.mod`
  /// (§4.8 "Power / modulo").
  pub math_fn_cache: HashMap<&'static str, Option<FunctionId>>,

  /// Whether any compiled element registered a GC hook, which gates
  /// emission of the `iterateRoots` helper (§4.5).
  pub any_gc_hook_registered: bool,

  /// Memoised builtin-runtime imports (`env.allocate`, `env.abort`, ...),
  /// a single instance per module (§5 "a single instance per module").
  pub builtin_imports: HashMap<&'static str, ir::FuncId>,
  /// Next GC hook index to hand out from `ensureGCHook` (§6).
  pub gc_hook_counter: i32,
}

impl Compiler {
  /// Construct a fresh compiler for one compilation (§3 "Module: created
  /// once per compilation").
  #[must_use] pub fn new(options: CompilerOptions) -> Self {
    let pointer_size = options.target.pointer_size();
    let memory_base = options.memory_base;
    Self {
      interner: Interner::new(),
      diagnostics: DiagnosticBag::new(),
      module: ir::Module::default(),
      memory: MemoryLayout::new(memory_base, pointer_size),
      functions: Arena::new(),
      function_prototypes: Arena::new(),
      globals: Arena::new(),
      classes: Arena::new(),
      class_prototypes: Arena::new(),
      enums: Arena::new(),
      properties: Arena::new(),
      namespaces: Arena::new(),
      fields: Arena::new(),
      current_function: None,
      flow_stack: Vec::new(),
      current_type: Type::new(types::ty::TypeKind::Void),
      argc_global: None,
      started_global: None,
      start_function: None,
      pending_start_inits: Vec::new(),
      current_inline_functions: HashSet::new(),
      break_context_counter: 0,
      inline_counter: 0,
      label_stack: Vec::new(),
      math_fn_cache: HashMap::new(),
      any_gc_hook_registered: false,
      builtin_imports: HashMap::new(),
      gc_hook_counter: 0,
      options,
    }
  }

  #[must_use] pub fn pointer_size(&self) -> u32 { self.options.target.pointer_size() }
  #[must_use] pub fn pointer_type(&self) -> Type {
    Type::new(if self.pointer_size() == 64 { types::ty::TypeKind::Usize } else { types::ty::TypeKind::Usize })
  }

  /// The active flow (top of [`Compiler::flow_stack`]). Panics if called
  /// outside of a function body, which would itself be an internal bug
  /// (§7 "Internal").
  pub fn flow(&mut self) -> &mut Flow {
    self.flow_stack.last_mut().expect("no active flow: not compiling a function body")
  }

  /// `fork()` + push (§4.2, §9).
  pub fn fork_flow(&mut self) {
    let child = self.flow().fork();
    self.flow_stack.push(child);
  }

  /// Pop the top flow and `free()` it into the (now top-of-stack) parent,
  /// returning it so the caller chooses which `inherit*` variant applies.
  pub fn free_flow(&mut self) -> Flow {
    let child = self.flow_stack.pop().expect("free_flow with no forked child");
    child
  }

  fn span(&self, _node: Option<FileSpan>) -> Option<FileSpan> { _node }

  /// Push a label onto the active-branch-target stack (§4.7, §4.8).
  pub fn push_label(&mut self, label: Symbol) { self.label_stack.push(label); }

  /// Pop the innermost active label. Must be paired with a prior
  /// [`Compiler::push_label`].
  pub fn pop_label(&mut self) { self.label_stack.pop(); }

  /// The relative `Br` depth of `label` (0 = innermost), or `None` if it
  /// names no currently active block/loop.
  #[must_use] pub fn label_depth(&self, label: Symbol) -> Option<u32> {
    let pos = self.label_stack.iter().rposition(|&l| l == label)?;
    Some(u32::try_from(self.label_stack.len() - 1 - pos).unwrap())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn compiler_starts_with_empty_module_and_no_diagnostics() {
    let c = Compiler::new(CompilerOptions::default());
    assert!(c.module.functions.is_empty());
    assert!(!c.diagnostics.has_errors());
  }
}

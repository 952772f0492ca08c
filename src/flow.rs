//! Flow analysis (C2). `Flow` is the only mutable state shared between
//! statement and expression lowering other than the [`Compiler`]
//! (`crate::driver::Compiler`) itself (§4.2).

use bitflags::bitflags;
use hashbrown::HashMap;

use crate::symbol::Symbol;
use crate::types::element::Local;
use crate::types::ty::Type;

bitflags! {
  /// The per-branch termination/effect bits tracked by a [`Flow`] (§3).
  #[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
  pub struct FlowFlags: u32 {
    const RETURNS                    = 1 << 0;
    const RETURNS_WRAPPED            = 1 << 1;
    const BREAKS                     = 1 << 2;
    const CONDITIONALLY_BREAKS       = 1 << 3;
    const CONTINUES                  = 1 << 4;
    const CONDITIONALLY_CONTINUES    = 1 << 5;
    const THROWS                     = 1 << 6;
    const ALLOCATES                  = 1 << 7;
    /// Contextual, not a per-branch termination bit: propagated unchanged
    /// by every fork while compiling an inlined call body (§4.8 "Inlining").
    const INLINE_CONTEXT             = 1 << 8;
    /// Contextual: propagated unchanged while compiling code whose static
    /// type checks have been suppressed (`unchecked` blocks upstream).
    const UNCHECKED_CONTEXT          = 1 << 9;
  }
}

impl FlowFlags {
  /// Bits that are properties of the surrounding compilation context and
  /// must survive a `fork()` unchanged, as opposed to the termination bits
  /// that start clear in every child and are merged back explicitly.
  const CONTEXTUAL: FlowFlags = FlowFlags::INLINE_CONTEXT.union(FlowFlags::UNCHECKED_CONTEXT);

  /// Bits that indicate the branch terminated unconditionally: if both
  /// arms of an `if` set one of these, the parent inherits it
  /// unconditionally too (§4.2 `inherit_mutual`).
  const TERMINATING: FlowFlags = FlowFlags::RETURNS.union(FlowFlags::BREAKS)
    .union(FlowFlags::CONTINUES).union(FlowFlags::THROWS);
}

/// Per-function (and per-branching-construct) analysis state (§3 "Flow",
/// §4.2).
#[derive(Clone, Debug)]
pub struct Flow {
  pub return_type: Type,
  /// Set while compiling an inlined call body; `break`s to this label are
  /// the inlined function's `return`s (§4.8).
  pub return_label: Option<Symbol>,
  pub break_label: Option<Symbol>,
  pub continue_label: Option<Symbol>,
  /// Set while compiling an inlined call body whose callee is an instance
  /// method: `this` inside that body reads this local instead of local 0
  /// of the (unrelated) enclosing function (§4.8 "Inlining").
  pub inline_this: Option<(crate::ir::LocalId, Type)>,
  pub flags: FlowFlags,
  /// local index -> "known wrapped" bit (§4.2 "Local-wrapped tracking").
  wrapped_locals: HashMap<u32, bool>,
  /// name -> binding, for virtual locals and ordinary block-scoped locals
  /// introduced by inlining or `let`/`const` (§ GLOSSARY "Virtual local").
  scoped_locals: HashMap<Symbol, Local>,
}

impl Flow {
  /// Construct the root flow for a function body.
  #[must_use] pub fn new(return_type: Type) -> Self {
    Self {
      return_type,
      return_label: None,
      break_label: None,
      continue_label: None,
      inline_this: None,
      flags: FlowFlags::empty(),
      wrapped_locals: HashMap::new(),
      scoped_locals: HashMap::new(),
    }
  }

  /// `fork()` (§4.2, §9 "Flow forks"): create a child flow inheriting
  /// contextual state (return type/labels, wrapped-local knowledge, scoped
  /// locals so lexical lookups keep working) but with termination flags
  /// cleared, ready to analyse one arm of a branching construct. Every
  /// `fork` must be matched by a [`Flow::free`] that folds the child back.
  #[must_use] pub fn fork(&self) -> Flow {
    Flow {
      return_type: self.return_type,
      return_label: self.return_label,
      break_label: self.break_label,
      continue_label: self.continue_label,
      inline_this: self.inline_this,
      flags: self.flags & FlowFlags::CONTEXTUAL,
      wrapped_locals: self.wrapped_locals.clone(),
      scoped_locals: self.scoped_locals.clone(),
    }
  }

  /// `free(child)`: discard a forked child once its results have been
  /// merged into `self` via `inherit*`. Present mainly to document the
  /// fork/free pairing invariant at call sites; forking is otherwise
  /// ordinary value-type cloning so there is nothing to release.
  pub fn free(&mut self, _child: Flow) {}

  /// `inherit(child)` (§4.2): unconditional merge, used when a construct
  /// has no dynamic condition (a plain block). The child's set bits become
  /// the parent's outright, and any newly learned wrapped-local facts
  /// propagate too.
  pub fn inherit(&mut self, child: &Flow) {
    self.flags |= child.flags & !FlowFlags::CONTEXTUAL;
    for (&local, &wrapped) in &child.wrapped_locals {
      self.wrapped_locals.insert(local, wrapped);
    }
  }

  /// `inherit_conditional(child)` (§4.2): a single conditional arm (an `if`
  /// with no `else`, a loop body). Terminating bits weaken to their
  /// `CONDITIONALLY_*` counterpart since the arm may not execute at all;
  /// bits with no conditional counterpart (`THROWS`, `ALLOCATES`,
  /// `RETURNS`/`RETURNS_WRAPPED`) are dropped rather than asserted, since
  /// they are not safe to assume unconditionally true of the parent.
  pub fn inherit_conditional(&mut self, child: &Flow) {
    if child.flags.contains(FlowFlags::BREAKS) {
      self.flags |= FlowFlags::CONDITIONALLY_BREAKS;
    }
    if child.flags.contains(FlowFlags::CONTINUES) {
      self.flags |= FlowFlags::CONDITIONALLY_CONTINUES;
    }
    // Wrapped-local knowledge learned in a conditional arm cannot be
    // assumed once control rejoins the parent unless it also held before
    // entry, since the arm might not have run.
  }

  /// `inherit_mutual(then, else)` (§4.2): both arms of a branch exist. Bits
  /// set in **both** arms upgrade to unconditional in the parent; bits set
  /// in exactly one degrade to their conditional counterpart.
  pub fn inherit_mutual(&mut self, then: &Flow, els: &Flow) {
    let both = (then.flags & FlowFlags::TERMINATING) & (els.flags & FlowFlags::TERMINATING);
    let either = (then.flags | els.flags) & FlowFlags::TERMINATING;
    self.flags |= both;
    if either.contains(FlowFlags::BREAKS) && !both.contains(FlowFlags::BREAKS) {
      self.flags |= FlowFlags::CONDITIONALLY_BREAKS;
    }
    if either.contains(FlowFlags::CONTINUES) && !both.contains(FlowFlags::CONTINUES) {
      self.flags |= FlowFlags::CONDITIONALLY_CONTINUES;
    }
    if both.contains(FlowFlags::RETURNS)
      && then.flags.contains(FlowFlags::RETURNS_WRAPPED)
      && els.flags.contains(FlowFlags::RETURNS_WRAPPED)
    {
      self.flags |= FlowFlags::RETURNS_WRAPPED;
    }
    if both.contains(FlowFlags::ALLOCATES) { self.flags |= FlowFlags::ALLOCATES; }
    // A local only stays known-wrapped across the join if both arms agree.
    for (&local, &w1) in &then.flags_wrapped_locals() {
      if els.local_is_wrapped(local) == Some(w1) {
        self.wrapped_locals.insert(local, w1);
      }
    }
  }

  fn flags_wrapped_locals(&self) -> HashMap<u32, bool> { self.wrapped_locals.clone() }

  /// Mark a local's current value as known (un)wrapped. Called after every
  /// assignment; an assignment whose RHS may overflow resets the bit to
  /// `false` (§4.2 "Reset on any assignment whose RHS may overflow").
  pub fn set_local_wrapped(&mut self, local: u32, wrapped: bool) {
    self.wrapped_locals.insert(local, wrapped);
  }

  #[must_use] pub fn local_is_wrapped(&self, local: u32) -> Option<bool> {
    self.wrapped_locals.get(&local).copied()
  }

  /// `canOverflow(expr, type)` (§4.2): a conservative predicate over IR
  /// shapes, used to decide whether a wrap can be skipped. Recognises
  /// constant expressions (never overflow a type they were checked
  /// against), already-wrapped locals, and simple loads from typed fields
  /// (memory loads of a short-integer field are exactly as wide as the
  /// field, so the load itself cannot introduce garbage bits).
  #[must_use] pub fn can_overflow(&self, expr: &crate::ir::Expr, ty: Type) -> bool {
    use crate::ir::Expr;
    if !ty.is_short() { return false }
    match expr {
      Expr::I32Const(_) | Expr::I64Const(_) => false,
      Expr::GetLocal(crate::ir::LocalId(i)) => self.local_is_wrapped(*i) != Some(true),
      Expr::Load { .. } => false,
      _ => true,
    }
  }

  /// Introduce a scoped local binding (ordinary `let`/`const`, a virtual
  /// constant local, or an inline-parameter alias).
  pub fn declare_local(&mut self, name: Symbol, local: Local) {
    self.scoped_locals.insert(name, local);
  }

  #[must_use] pub fn lookup_local(&self, name: Symbol) -> Option<&Local> {
    self.scoped_locals.get(&name)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::types::ty::{Type, TypeKind};

  #[test]
  fn inherit_mutual_upgrades_shared_terminating_bits() {
    let parent = Flow::new(Type::new(TypeKind::I32));
    let mut then = parent.fork();
    then.flags |= FlowFlags::RETURNS;
    let mut els = parent.fork();
    els.flags |= FlowFlags::RETURNS;
    let mut merged = parent.fork();
    merged.inherit_mutual(&then, &els);
    assert!(merged.flags.contains(FlowFlags::RETURNS));
  }

  #[test]
  fn inherit_mutual_degrades_bit_set_in_only_one_arm() {
    let parent = Flow::new(Type::new(TypeKind::I32));
    let mut then = parent.fork();
    then.flags |= FlowFlags::BREAKS;
    let els = parent.fork();
    let mut merged = parent.fork();
    merged.inherit_mutual(&then, &els);
    assert!(!merged.flags.contains(FlowFlags::BREAKS));
    assert!(merged.flags.contains(FlowFlags::CONDITIONALLY_BREAKS));
  }

  #[test]
  fn fork_preserves_contextual_flags_and_clears_termination_flags() {
    let mut parent = Flow::new(Type::new(TypeKind::I32));
    parent.flags |= FlowFlags::INLINE_CONTEXT | FlowFlags::RETURNS;
    let child = parent.fork();
    assert!(child.flags.contains(FlowFlags::INLINE_CONTEXT));
    assert!(!child.flags.contains(FlowFlags::RETURNS));
  }
}

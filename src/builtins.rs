//! Builtins (external collaborator, §1/§6, stubbed for this workspace).
//! Implements `compileBuiltinCall` for exactly the builtins the core's own
//! lowering paths are load-bearing on: `allocate`, `abort`, `iterateRoots`,
//! `ensureGCHook`. A real toolchain's builtin module recognises dozens of
//! intrinsics (`memory.copy`, `String.fromCharCode`, ...); those are out of
//! scope here since nothing in C6–C9 depends on them.

use smallvec::smallvec;

use crate::diagnostics::FileSpan;
use crate::ir::{Expr, FuncId, NativeType, Signature};
use crate::types::element::ClassId;
use crate::Compiler;

/// `compileBuiltinCall(compiler, name, classArg, argumentNodes, reportNode)`
/// (§6). Returns `None` for any name this stub does not recognise, which the
/// caller (§4.8 "Calls" path 1) turns into an "operation not supported"
/// diagnostic.
pub fn compile_builtin_call(
  compiler: &mut Compiler,
  name: &str,
  class_arg: Option<ClassId>,
  message: Option<&str>,
  _span: Option<FileSpan>,
) -> Option<Expr> {
  match name {
    "allocate" => Some(allocate(compiler, class_arg?)),
    "abort" => Some(abort(compiler, message)),
    _ => None,
  }
}

fn pointer_native(compiler: &Compiler) -> NativeType {
  if compiler.pointer_size() == 64 { NativeType::I64 } else { NativeType::I32 }
}

/// Memoise an `env`-module runtime import by name, a single instance per
/// module (§5).
fn ensure_import(compiler: &mut Compiler, name: &'static str, sig: Signature) -> FuncId {
  if let Some(&f) = compiler.builtin_imports.get(name) { return f }
  let ty = compiler.module.intern_type(sig);
  let f = compiler.module.add_import("env", name, ty);
  compiler.builtin_imports.insert(name, f);
  f
}

/// `allocate(class, node)` (§6): acquire an untyped, zeroed chunk of
/// `class.size` bytes from the runtime. The raw acquisition itself is a
/// runtime concern (out of scope, §1); this just calls through to it.
/// `makeAllocate`/`makeConditionalAllocate` (§4.8) — the per-field store
/// sequence around this raw chunk — live in `expr.rs`, since they need the
/// class's field layout and constructor-parameter aliasing that this module
/// has no business knowing about.
#[must_use]
pub fn allocate(compiler: &mut Compiler, class: ClassId) -> Expr {
  let size = compiler.classes.get(class).size;
  let result = pointer_native(compiler);
  let func = ensure_import(compiler, "allocate", Signature { params: smallvec![NativeType::I32], result });
  Expr::CallImport { func, args: vec![Expr::I32Const(i32::try_from(size).unwrap())] }
}

/// `abort(message?, node)` (§6): lowers `throw` (and an explicit `abort(...)`
/// call) to a call into the runtime's abort hook followed by `unreachable`,
/// matching "no exceptions: throws lower to `abort`" (§9).
#[must_use]
pub fn abort(compiler: &mut Compiler, message: Option<&str>) -> Expr {
  let ptr_ty = pointer_native(compiler);
  let func = ensure_import(compiler, "abort", Signature { params: smallvec![ptr_ty], result: NativeType::None });
  let msg_ptr = match message {
    Some(s) => {
      let ptr = compiler.memory.ensure_static_string(s, None);
      if ptr_ty == NativeType::I64 { Expr::I64Const(i64::from(ptr)) } else { Expr::I32Const(i32::try_from(ptr).unwrap()) }
    }
    None => if ptr_ty == NativeType::I64 { Expr::I64Const(0) } else { Expr::I32Const(0) },
  };
  Expr::Block { ty: NativeType::None, body: vec![Expr::CallImport { func, args: vec![msg_ptr] }, Expr::Unreachable] }
}

/// `ensureGCHook(compiler, class) -> i32` (§6): lazily assigns a per-class
/// hook index, written into the GC header word of that class's heap
/// instances (§4.3 "optionally preceded by a GC header whose first word is a
/// hook index"), and records that the module now needs an `iterateRoots`
/// helper (§4.5 "if any compiled element registered a GC hook").
pub fn ensure_gc_hook(compiler: &mut Compiler, class: ClassId) -> i32 {
  if let Some(hook) = compiler.classes.get(class).gc_hook { return hook }
  let hook = compiler.gc_hook_counter;
  compiler.gc_hook_counter += 1;
  compiler.classes.get_mut(class).gc_hook = Some(hook);
  compiler.any_gc_hook_registered = true;
  hook
}

/// `iterateRoots(compiler)` (§6, §4.5): emits the module's GC-root iteration
/// helper, a function that calls back into the runtime's visitor import once
/// per hook index registered via [`ensure_gc_hook`]. Only called by the
/// driver (C5) once, at the end of compilation, and only when
/// `any_gc_hook_registered` is set.
pub fn emit_iterate_roots(compiler: &mut Compiler) -> FuncId {
  let visit = ensure_import(compiler, "visitRoot", Signature { params: smallvec![NativeType::I32], result: NativeType::None });
  let body: Vec<Expr> = (0..compiler.gc_hook_counter)
    .map(|hook| Expr::CallImport { func: visit, args: vec![Expr::I32Const(hook)] })
    .collect();
  let ty = compiler.module.intern_type(Signature { params: smallvec![], result: NativeType::None });
  let func = compiler.module.declare_function(ty, "iterateRoots".to_owned());
  compiler.module.define_function(func, crate::ir::FunctionBody { locals: Vec::new(), body });
  func
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::CompilerOptions;

  #[test]
  fn gc_hook_indices_are_assigned_once_per_class() {
    let mut compiler = Compiler::new(CompilerOptions::default());
    let class = compiler.classes.push(crate::types::element::Class {
      prototype: crate::types::element::Idx::new(0),
      base: None,
      fields: Vec::new(),
      constructor: None,
      methods: Vec::new(),
      operators: Vec::new(),
      size: 8,
      flags: crate::types::element::ElementFlags::empty(),
      gc_hook: None,
    });
    let a = ensure_gc_hook(&mut compiler, class);
    let b = ensure_gc_hook(&mut compiler, class);
    assert_eq!(a, b);
    assert!(compiler.any_gc_hook_registered);
  }

  #[test]
  fn abort_without_message_uses_null_pointer() {
    let mut compiler = Compiler::new(CompilerOptions::default());
    let e = abort(&mut compiler, None);
    match e {
      Expr::Block { body, .. } => assert!(matches!(body[1], Expr::Unreachable)),
      _ => panic!("expected block"),
    }
  }
}

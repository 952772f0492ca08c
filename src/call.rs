//! Call machinery (C9). Signature checking, argument filling, and routing
//! a call through the direct/trampoline/indirect paths (§4.9).

use smallvec::SmallVec;

use crate::diagnostics::{DiagnosticCode, FileSpan};
use crate::ir::{Expr, FuncId, GlobalId, NativeType};
use crate::types::element::{ElementFlags, FunctionId, Signature};
use crate::types::program::Node;
use crate::types::ty::Type;
use crate::Compiler;

/// `checkCallSignature(sig, n, hasThis, node)` (§4.9).
pub fn check_call_signature(
  compiler: &mut Compiler,
  sig: &Signature,
  n: usize,
  has_this: bool,
  span: Option<FileSpan>,
) -> bool {
  let mut ok = true;
  if has_this != sig.has_this() {
    compiler.diagnostics.error(DiagnosticCode::SignatureMismatch, "`this` argument mismatch", span);
    ok = false;
  }
  // Rest parameters are a declared Non-goal (§1); a signature that somehow
  // carries one is always rejected here rather than silently mishandled.
  if n < sig.required {
    compiler.diagnostics.error(
      DiagnosticCode::SignatureMismatch,
      format!("expected at least {} arguments, got {n}", sig.required),
      span,
    );
    ok = false;
  } else if n > sig.max_operands() {
    compiler.diagnostics.error(
      DiagnosticCode::SignatureMismatch,
      format!("expected at most {} arguments, got {n}", sig.max_operands()),
      span,
    );
    ok = false;
  }
  ok
}

/// Try to fold a resolved-but-not-yet-lowered argument-initializer node to
/// a literal IR constant, the "syntactically constant values" test of
/// §4.4/§4.9. Anything that is not a bare literal is conservatively *not*
/// constant — this intentionally does not attempt arithmetic folding,
/// matching the narrow "literal initialisers" wording of the spec.
#[must_use]
pub fn try_fold_constant(node: &Node, ty: Type, pointer_size: u32) -> Option<Expr> {
  Some(match node {
    Node::NullLiteral => ty.native_zero(pointer_size),
    Node::BoolLiteral(b) => Expr::I32Const(i32::from(*b)),
    Node::IntLiteral(v) => match ty.native_type(pointer_size) {
      NativeType::I64 => Expr::I64Const(*v),
      _ => Expr::I32Const(i32::try_from(*v).unwrap_or(*v as i32)),
    },
    Node::FloatLiteral(v) => match ty.native_type(pointer_size) {
      NativeType::F32 => Expr::F32Const(*v as f32),
      _ => Expr::F64Const(*v),
    },
    _ => return None,
  })
}

/// `makeCallDirect(f, operands?)` (§4.9). `operands` already-compiled
/// against the callee's parameter types; `None` entries are omitted
/// trailing optional arguments whose initializer node is supplied in
/// `missing_initializers` (parallel array, one slot per omitted operand).
pub fn make_call_direct(
  compiler: &mut Compiler,
  f: FunctionId,
  operands: Vec<Expr>,
  missing_initializers: Vec<&Node>,
  this_arg: Option<Expr>,
  span: Option<FileSpan>,
) -> Expr {
  crate::decls::ensure_function_compiled(compiler, f);
  let func = compiler.functions.get(f);
  let sig = func.signature.clone();
  let pointer_size = compiler.pointer_size();
  let func_ir = func.compiled_ir.expect("ensure_function_compiled must assign compiled_ir");
  let is_import = func.flags.contains(ElementFlags::MODULE_IMPORT);

  let mut args: Vec<Expr> = this_arg.into_iter().collect();
  args.extend(operands);

  if missing_initializers.is_empty() {
    return if is_import { Expr::CallImport { func: func_ir, args } } else { Expr::Call { func: func_ir, args } };
  }

  let optional_types = &sig.params[sig.required..];
  let folded: Option<Vec<Expr>> = missing_initializers.iter().zip(optional_types)
    .map(|(n, t)| try_fold_constant(n, *t, pointer_size))
    .collect();

  if let Some(consts) = folded {
    args.extend(consts);
    return if is_import { Expr::CallImport { func: func_ir, args } } else { Expr::Call { func: func_ir, args } };
  }

  // Not all missing initialisers are literal: zero-pad, route through the
  // trampoline, and set `~argc` to the number of arguments the caller
  // actually supplied (§4.4, §4.9).
  let supplied = args.len() - usize::from(sig.has_this());
  for t in optional_types { args.push(t.native_zero(pointer_size)); }
  let trampoline = crate::function_table::ensure_trampoline(compiler, f);
  crate::decls::ensure_function_compiled(compiler, trampoline);
  let trampoline_ir = compiler.functions.get(trampoline).compiled_ir.unwrap();

  let argc = ensure_argc_global(compiler);
  let set_argc = Expr::SetGlobal(argc, Box::new(Expr::I32Const(i32::try_from(supplied).unwrap())));
  let call = if is_import {
    Expr::CallImport { func: trampoline_ir, args }
  } else {
    Expr::Call { func: trampoline_ir, args }
  };
  Expr::Block { ty: sig.return_type.native_type(pointer_size), body: vec![set_argc, call] }
}

/// `makeCallIndirect(sig, index, operands?)` (§4.9). Always sets `~argc`
/// since the table slot named by `index` could be a trampoline.
pub fn make_call_indirect(
  compiler: &mut Compiler,
  sig: &Signature,
  table_index: Expr,
  mut operands: Vec<Expr>,
  this_arg: Option<Expr>,
  span: Option<FileSpan>,
) -> Expr {
  let pointer_size = compiler.pointer_size();
  if !check_call_signature(compiler, sig, operands.len(), this_arg.is_some(), span) {
    return Expr::Unreachable;
  }
  let argc = ensure_argc_global(compiler);
  let supplied = operands.len() + usize::from(this_arg.is_some());
  let set_argc = Expr::SetGlobal(argc, Box::new(Expr::I32Const(i32::try_from(supplied).unwrap())));
  for t in &sig.params[operands.len()..] { operands.push(t.native_zero(pointer_size)); }
  let mut args: Vec<Expr> = this_arg.into_iter().collect();
  args.append(&mut operands);
  let params: SmallVec<[NativeType; 4]> = sig.params.iter().map(|t| t.native_type(pointer_size)).collect();
  let ty = compiler.module.intern_type(crate::ir::Signature { params, result: sig.return_type.native_type(pointer_size) });
  let call = Expr::CallIndirect { ty, table_index: Box::new(table_index), args };
  Expr::Block { ty: sig.return_type.native_type(pointer_size), body: vec![set_argc, call] }
}

/// Lazily create the `~argc` global, a single instance per module (§5).
pub fn ensure_argc_global(compiler: &mut Compiler) -> GlobalId {
  if let Some(id) = compiler.argc_global { return id }
  let id = compiler.module.add_global(NativeType::I32, true, Expr::I32Const(0), Some("~argc".into()));
  compiler.argc_global = Some(id);
  id
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::flow::Flow;
  use crate::types::element::{DecoratorFlags, Function, FunctionPrototype};
  use crate::types::ty::TypeKind;
  use crate::CompilerOptions;

  #[test]
  fn fold_constant_recognises_literals_only() {
    let i32_ = Type::new(TypeKind::I32);
    assert!(try_fold_constant(&Node::IntLiteral(2), i32_, 32).is_some());
    assert!(try_fold_constant(&Node::This, i32_, 32).is_none());
  }

  /// `function f(a: i32, b: i32 = <default>) {}` — one required, one
  /// optional parameter.
  fn push_optional_param_fn(compiler: &mut Compiler) -> FunctionId {
    let i32_ = Type::new(TypeKind::I32);
    let name = compiler.interner.intern("f");
    let proto = compiler.function_prototypes.push(FunctionPrototype {
      name, flags: ElementFlags::empty(), decorators: DecoratorFlags::empty(),
      operator: None, owner: None, import: None, instances: Vec::new(),
    });
    compiler.functions.push(Function {
      prototype: proto,
      signature: Signature { params: SmallVec::from_vec(vec![i32_, i32_]), required: 1, return_type: Type::new(TypeKind::Void), this_type: None },
      flags: ElementFlags::empty(), name, param_names: Vec::new(), extra_locals: Vec::new(),
      flow: Flow::new(Type::new(TypeKind::Void)), trampoline: None, table_index: -1,
      next_inline_id: 0, compiled_ir: None, optional_initializers: Vec::new(), body: Some(Vec::new()),
    })
  }

  #[test]
  fn supplying_all_operands_emits_a_plain_call() {
    let mut compiler = Compiler::new(CompilerOptions::default());
    let f = push_optional_param_fn(&mut compiler);
    let call = make_call_direct(&mut compiler, f, vec![Expr::I32Const(5), Expr::I32Const(7)], Vec::new(), None, None);
    assert!(matches!(call, Expr::Call { .. }));
  }

  #[test]
  fn omitting_an_optional_argument_with_a_non_constant_initializer_routes_through_the_trampoline() {
    let mut compiler = Compiler::new(CompilerOptions::default());
    let f = push_optional_param_fn(&mut compiler);
    let default_init = Node::This; // not foldable to a literal
    let call = make_call_direct(&mut compiler, f, vec![Expr::I32Const(5)], vec![&default_init], None, None);
    match call {
      Expr::Block { body, .. } => {
        assert!(matches!(body[0], Expr::SetGlobal(_, _)), "argc must be set before the call");
        assert!(matches!(body[1], Expr::Call { .. }), "must route through the trampoline");
      }
      other => panic!("expected a {{set ~argc; call(trampoline)}} block, got {other:?}"),
    }
  }

  #[test]
  fn omitting_an_optional_argument_with_a_literal_initializer_inlines_the_constant() {
    let mut compiler = Compiler::new(CompilerOptions::default());
    let f = push_optional_param_fn(&mut compiler);
    let default_init = Node::IntLiteral(2);
    let call = make_call_direct(&mut compiler, f, vec![Expr::I32Const(5)], vec![&default_init], None, None);
    match call {
      Expr::Call { args, .. } => {
        assert_eq!(args.len(), 2);
        assert!(matches!(args[1], Expr::I32Const(2)));
      }
      other => panic!("expected a plain call with the folded constant inlined, got {other:?}"),
    }
  }
}

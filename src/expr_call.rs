//! Calls (§4.8 "Calls") and inlining (§4.8 "Inlining") — split out of
//! `expr.rs` since resolving which of the five call paths applies, and the
//! inline-body machinery, are each substantial on their own.

use crate::diagnostics::{DiagnosticCode, FileSpan};
use crate::ir::Expr;
use crate::types::element::{DecoratorFlags, ElementFlags, ElementId, FunctionId, Local};
use crate::types::program::Node;
use crate::types::ty::{ConvertKind, Type, TypeKind};
use crate::Compiler;

/// `compileCallExpression(callee, typeArgs, args)` (§4.8 "Calls"). Five
/// paths in the spec collapse to three here since this workspace's type
/// lattice has no function-pointer `Type`, so an arbitrary
/// signature-holding-value callee (path 5) cannot be type-checked; it is
/// reported as unsupported rather than guessed at.
pub fn compile_call(
  compiler: &mut Compiler,
  callee: &Node,
  type_args: &[Type],
  args: &[Node],
  contextual_type: Option<Type>,
  span: Option<FileSpan>,
) -> Expr {
  match callee {
    Node::Ident { element: Some(ElementId::FunctionPrototype(proto)), name } => {
      compile_prototype_call(compiler, *proto, *name, type_args, args, span)
    }
    Node::Ident { element: Some(ElementId::Function(f)), .. } => compile_resolved_call(compiler, *f, args, span),
    Node::FunctionRef(f) => compile_resolved_call(compiler, *f, args, span),
    _ => {
      compiler.diagnostics.unsupported("indirect calls through a function-typed value are not supported in this workspace", span);
      compiler.current_type = contextual_type.unwrap_or_else(|| compiler.pointer_type());
      Expr::Unreachable
    }
  }
}

/// Path 1 (builtin-decorated) and the generic paths (2/3), collapsed to
/// "use the prototype's sole pre-resolved instance" since generic
/// type-argument inference/instantiation is the resolver's job (§1), not
/// modeled by this workspace.
fn compile_prototype_call(
  compiler: &mut Compiler,
  proto: crate::types::element::FunctionPrototypeId,
  name: crate::symbol::Symbol,
  type_args: &[Type],
  args: &[Node],
  span: Option<FileSpan>,
) -> Expr {
  let prototype = compiler.function_prototypes.get(proto).clone();
  if prototype.decorators.contains(DecoratorFlags::BUILTIN) {
    let name_str = compiler.interner.resolve(name).to_owned();
    let class_arg = type_args.first().and_then(|t| match t.kind { TypeKind::Reference(c) => Some(c), _ => None });
    let message = args.first().and_then(|n| match n { Node::StringLiteral(s) => Some(s.as_str()), _ => None });
    if let Some(e) = crate::builtins::compile_builtin_call(compiler, &name_str, class_arg, message, span) {
      compiler.current_type = match name_str.as_str() {
        "allocate" => class_arg.map_or_else(|| compiler.pointer_type(), |c| Type::new(TypeKind::Reference(c))),
        _ => Type::new(TypeKind::Void),
      };
      return e;
    }
    compiler.diagnostics.error(DiagnosticCode::OperationNotSupported, format!("unrecognised builtin `{name_str}`"), span);
    compiler.current_type = compiler.pointer_type();
    return Expr::Unreachable;
  }

  match prototype.instances.as_slice() {
    [only] => compile_resolved_call(compiler, *only, args, span),
    _ => {
      compiler.diagnostics.unsupported("generic call resolution requires a type-argument resolver, not modeled in this workspace", span);
      compiler.current_type = compiler.pointer_type();
      Expr::Unreachable
    }
  }
}

/// Path 4 (non-generic, already-resolved function). Free-function/static
/// dispatch only: calls on an object receiver go through
/// `compile_operator_overload`/property dispatch in `expr.rs`, which supply
/// their own `this_arg`.
fn compile_resolved_call(compiler: &mut Compiler, f: FunctionId, args: &[Node], span: Option<FileSpan>) -> Expr {
  let sig = compiler.functions.get(f).signature.clone();
  if args.len() < sig.required || args.len() > sig.max_operands() {
    crate::call::check_call_signature(compiler, &sig, args.len(), false, span);
    compiler.current_type = sig.return_type;
    return Expr::Unreachable;
  }

  let operands: Vec<Expr> = args.iter().zip(sig.params.iter())
    .map(|(a, t)| crate::expr::compile_expression(compiler, a, Some(*t), ConvertKind::Implicit, true))
    .collect();

  let prototype = compiler.functions.get(f).prototype;
  let inline = compiler.function_prototypes.get(prototype).decorators.contains(DecoratorFlags::INLINE)
    && !compiler.current_inline_functions.contains(&f);

  let e = if inline {
    compile_call_inline_unchecked(compiler, f, operands, None, span)
  } else {
    let missing: Vec<&Node> = if args.len() < sig.params.len() {
      let start = args.len().saturating_sub(sig.required);
      compiler.functions.get(f).optional_initializers[start..].iter().collect()
    } else {
      Vec::new()
    };
    crate::call::make_call_direct(compiler, f, operands, missing, None, span)
  };
  compiler.current_type = sig.return_type;
  e
}

/// `compileCallInlineUnchecked(f, operands, thisArg)` (§4.8 "Inlining").
/// `operands` may be shorter than `f`'s parameter list; the remainder are
/// filled from `f`'s optional initializers, compiled in the inline scope
/// (so they may reference `this` and the already-bound earlier arguments).
///
/// Simplification relative to the spec's exact wording: every argument is
/// materialised into a fresh local in the caller's frame rather than
/// aliasing directly to an existing get-local when the operand is already a
/// side-effect-free local read. This forgoes that optimisation but is
/// always correct.
pub fn compile_call_inline_unchecked(
  compiler: &mut Compiler,
  f: FunctionId,
  mut operands: Vec<Expr>,
  this_arg: Option<Expr>,
  span: Option<FileSpan>,
) -> Expr {
  if compiler.current_inline_functions.contains(&f) {
    return crate::call::make_call_direct(compiler, f, operands, Vec::new(), this_arg, span);
  }

  let func = compiler.functions.get(f).clone();
  let sig = func.signature.clone();
  let return_ty = sig.return_type;
  let native = return_ty.native_type(compiler.pointer_size());

  let label_name = format!("{}|inlined.{}", compiler.interner.resolve(func.name), func.next_inline_id);
  compiler.functions.get_mut(f).next_inline_id += 1;
  let label = compiler.interner.intern(&label_name);

  let mut child = compiler.flow().fork();
  child.flags |= crate::flow::FlowFlags::INLINE_CONTEXT;
  child.return_label = Some(label);
  compiler.flow_stack.push(child);
  compiler.current_inline_functions.insert(f);
  compiler.push_label(label);

  let mut body = Vec::new();
  if let (Some(this_value), Some(this_ty)) = (this_arg, sig.this_type) {
    let local = crate::expr::acquire_temp_local(compiler, this_ty);
    body.push(Expr::SetLocal(local, Box::new(this_value)));
    compiler.flow().inline_this = Some((local, this_ty));
  }

  if operands.len() < sig.params.len() {
    let start = operands.len();
    let initializers: Vec<Expr> = func.optional_initializers[start.saturating_sub(sig.required)..].iter()
      .zip(&sig.params[start..])
      .map(|(node, ty)| crate::expr::compile_expression(compiler, node, Some(*ty), ConvertKind::Implicit, true))
      .collect();
    operands.extend(initializers);
  }

  for (i, value) in operands.into_iter().enumerate() {
    let local = crate::expr::acquire_temp_local(compiler, sig.params[i]);
    body.push(Expr::SetLocal(local, Box::new(value)));
    if let Some(&name) = func.param_names.get(i) {
      compiler.flow().declare_local(name, Local { name, ty: sig.params[i], flags: ElementFlags::empty(), index: Some(local.0), constant_value: None });
    }
  }

  let inline_body = func.body.clone().unwrap_or_default();
  for stmt in &inline_body {
    crate::stmt::compile_statement(compiler, stmt, &mut body);
  }

  compiler.pop_label();
  compiler.current_inline_functions.remove(&f);
  let child = compiler.flow_stack.pop().expect("inline child flow pushed above");
  compiler.flow().inherit(&child);

  Expr::Block { ty: native, body }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::types::ty::TypeKind;
  use crate::CompilerOptions;

  #[test]
  fn recursive_inline_call_falls_back_to_a_direct_call() {
    let mut compiler = Compiler::new(CompilerOptions::default());
    let prototype = compiler.function_prototypes.push(crate::types::element::FunctionPrototype {
      name: compiler.interner.intern("f"), flags: ElementFlags::empty(), decorators: DecoratorFlags::INLINE,
      operator: None, owner: None, import: None, instances: Vec::new(),
    });
    let sig = crate::types::element::Signature { params: smallvec::smallvec![], required: 0, return_type: Type::new(TypeKind::I32), this_type: None };
    let f = compiler.functions.push(crate::types::element::Function {
      prototype, signature: sig, flags: ElementFlags::COMPILED, name: compiler.interner.intern("f"),
      param_names: Vec::new(), extra_locals: Vec::new(), flow: crate::flow::Flow::new(Type::new(TypeKind::I32)),
      trampoline: None, table_index: -1, next_inline_id: 0,
      compiled_ir: Some(crate::ir::FuncId(0)), optional_initializers: Vec::new(), body: Some(Vec::new()),
    });
    compiler.module.declare_function(compiler.module.intern_type(crate::ir::Signature { params: smallvec::smallvec![], result: crate::ir::NativeType::I32 }), "f".into());
    compiler.current_inline_functions.insert(f);
    compiler.current_function = Some(f);
    compiler.flow_stack.push(crate::flow::Flow::new(Type::new(TypeKind::I32)));
    let e = compile_call_inline_unchecked(&mut compiler, f, Vec::new(), None, None);
    assert!(matches!(e, Expr::Call { .. }));
  }
}

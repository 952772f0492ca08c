//! Assignment (§4.8 "Assignment") — one lowering per [`AssignTarget`] kind,
//! split out of `expr.rs` since each target kind needs its own temp-local
//! and diagnostic handling and the combination reads poorly inlined.

use crate::diagnostics::DiagnosticCode;
use crate::ir::{Expr, MemArg};
use crate::types::element::{ElementFlags, OperatorKind};
use crate::types::program::{AssignTarget, Node};
use crate::types::ty::{ConvertKind, Type};
use crate::Compiler;

/// `target = value` / `target := value` (tee) (§4.8). Compiles `value`
/// against the target's own type, then dispatches on target kind.
pub fn compile_assign(compiler: &mut Compiler, target: &AssignTarget, value: &Node, is_tee: bool) -> Expr {
  let Some(ty) = target_type(compiler, target) else {
    compiler.diagnostics.error(DiagnosticCode::NotAssignable, "assignment to an unresolved target", None);
    compiler.current_type = compiler.pointer_type();
    return Expr::Unreachable;
  };
  let value_expr = crate::expr::compile_expression(compiler, value, Some(ty), ConvertKind::Implicit, true);
  assign_value(compiler, target, value_expr, ty, is_tee)
}

fn target_type(compiler: &mut Compiler, target: &AssignTarget) -> Option<Type> {
  match target {
    AssignTarget::Local(name) => compiler.flow().lookup_local(*name).map(|l| l.ty),
    AssignTarget::Global(g) => Some(compiler.globals.get(*g).ty),
    AssignTarget::Field { field, .. } => field_lookup(compiler, *field).map(|(_, f)| f.ty),
    AssignTarget::Property { base, name } => {
      let (class, _) = resolve_class(compiler, base)?;
      let prop = compiler.properties.iter().find(|(_, p)| p.name == *name && class_owns_property(compiler, class))?.1;
      let setter = prop.setter?;
      Some(compiler.functions.get(setter).signature.params[0])
    }
    AssignTarget::Indexed { base, .. } => {
      let (class, _) = resolve_class(compiler, base)?;
      let f = compiler.classes.get(class).operator(OperatorKind::IndexedSet)?;
      Some(compiler.functions.get(f).signature.params[1])
    }
  }
}

fn class_owns_property(_compiler: &Compiler, _class: crate::types::element::ClassId) -> bool {
  // Properties are not yet attached to their owning class in this workspace's
  // element model (no `Class::properties` list); any declared property is
  // treated as a candidate. Real ownership filtering is the resolver's job.
  true
}

/// Compiles `base` and resolves the reference class it names. Used by the
/// `Property`/`Indexed` targets, where `base` is a general expression (it may
/// run twice — once from [`target_type`] and once from the corresponding
/// `assign_*` — a documented limitation: re-evaluating a side-effecting base
/// would duplicate those side effects. The `Field` target avoids this
/// entirely by always reading the implicit `this`, which is side-effect-free
/// (mirrors `compile_implicit_field`'s read-side handling in `expr.rs`).
fn resolve_class(compiler: &mut Compiler, base: &Node) -> Option<(crate::types::element::ClassId, Expr)> {
  let expr = crate::expr::compile_expression(compiler, base, None, ConvertKind::Implicit, true);
  match compiler.current_type.kind {
    crate::types::ty::TypeKind::Reference(class) => Some((class, expr)),
    _ => None,
  }
}

fn field_lookup(compiler: &mut Compiler, field: crate::symbol::Symbol) -> Option<(crate::types::element::FieldId, crate::types::element::Field)> {
  let (_, this_ty) = crate::expr::compile_this(compiler);
  let crate::types::ty::TypeKind::Reference(class) = this_ty.kind else { return None };
  let field_id = *compiler.classes.get(class).fields.iter().find(|&&fid| compiler.fields.get(fid).name == field)?;
  Some((field_id, compiler.fields.get(field_id).clone()))
}

/// Emit the actual set/tee once `value_expr` has already been compiled and
/// converted to the target's type. Exposed separately (not just through
/// [`compile_assign`]) for `++`/`--` (§4.8 operator desugaring in `expr.rs`),
/// which builds its own stepped value rather than compiling a value node.
pub fn assign_value(compiler: &mut Compiler, target: &AssignTarget, value_expr: Expr, ty: Type, is_tee: bool) -> Expr {
  let e = match target {
    AssignTarget::Local(name) => assign_local(compiler, *name, value_expr, ty, is_tee),
    AssignTarget::Global(g) => assign_global(compiler, *g, value_expr, is_tee),
    AssignTarget::Field { field, .. } => assign_field(compiler, *field, value_expr, ty, is_tee),
    AssignTarget::Property { base, name } => assign_property(compiler, base, *name, value_expr, is_tee),
    AssignTarget::Indexed { base, index } => assign_indexed(compiler, base, index, value_expr, is_tee),
  };
  compiler.current_type = ty;
  e
}

fn assign_local(compiler: &mut Compiler, name: crate::symbol::Symbol, value_expr: Expr, ty: Type, is_tee: bool) -> Expr {
  let Some(local) = compiler.flow().lookup_local(name).cloned() else {
    compiler.diagnostics.error(DiagnosticCode::NotAssignable, "assignment to an undeclared local", None);
    return Expr::Unreachable;
  };
  if local.flags.contains(ElementFlags::CONST) || local.index.is_none() {
    compiler.diagnostics.error(DiagnosticCode::ReadonlyOrConstAssignment, "assignment to a const binding", None);
    return Expr::Unreachable;
  }
  let index = crate::ir::LocalId(local.index.unwrap());
  let wrapped = !compiler.flow().can_overflow(&value_expr, ty);
  compiler.flow().set_local_wrapped(index.0, wrapped);
  if is_tee { Expr::TeeLocal(index, Box::new(value_expr)) } else { Expr::SetLocal(index, Box::new(value_expr)) }
}

fn assign_global(compiler: &mut Compiler, g: crate::types::element::GlobalId, value_expr: Expr, is_tee: bool) -> Expr {
  let global = compiler.globals.get(g);
  if global.flags.contains(ElementFlags::CONST) {
    compiler.diagnostics.error(DiagnosticCode::ReadonlyOrConstAssignment, "assignment to a const global", None);
    return Expr::Unreachable;
  }
  let id = global.compiled_ir.expect("global referenced before it was compiled");
  if !is_tee { return Expr::SetGlobal(id, Box::new(value_expr)) }
  Expr::Block { ty: compiler.globals.get(g).ty.native_type(compiler.pointer_size()), body: vec![Expr::SetGlobal(id, Box::new(value_expr)), Expr::GetGlobal(id)] }
}

fn assign_field(compiler: &mut Compiler, field: crate::symbol::Symbol, value_expr: Expr, ty: Type, is_tee: bool) -> Expr {
  let Some((_, f)) = field_lookup(compiler, field) else {
    compiler.diagnostics.error(DiagnosticCode::NotAssignable, "assignment to an unresolved field", None);
    return Expr::Unreachable;
  };
  if f.flags.contains(ElementFlags::READONLY) {
    let in_ctor = compiler.current_function.is_some_and(|cf| compiler.functions.get(cf).flags.contains(ElementFlags::CONSTRUCTOR));
    if !in_ctor {
      compiler.diagnostics.error(DiagnosticCode::ReadonlyOrConstAssignment, "assignment to a readonly field outside its constructor", None);
      return Expr::Unreachable;
    }
  }
  let (base_expr, _) = crate::expr::compile_this(compiler);
  let pointer_size = compiler.pointer_size();
  let width = byte_width(f.ty, pointer_size);
  let value = if matches!(ty.kind, crate::types::ty::TypeKind::Bool) {
    crate::types::ty::ensure_small_integer_wrap(value_expr, ty, compiler.options.features)
  } else {
    value_expr
  };
  let addr = Expr::Binary(crate::ir::Binop::AddI32, Box::new(base_expr.clone()), Box::new(Expr::I32Const(i32::try_from(f.offset).unwrap())));
  let store = Expr::Store { width: Some(width), mem: MemArg::default(), addr: Box::new(addr), value: Box::new(value) };
  if !is_tee { return store }
  let addr2 = Expr::Binary(crate::ir::Binop::AddI32, Box::new(base_expr), Box::new(Expr::I32Const(i32::try_from(f.offset).unwrap())));
  let native = f.ty.native_type(pointer_size);
  Expr::Block { ty: native, body: vec![store, Expr::Load { width, signed: f.ty.is_signed(), native, mem: MemArg::default(), addr: Box::new(addr2) }] }
}

fn byte_width(ty: Type, pointer_size: u32) -> crate::ir::Width {
  use crate::ir::Width;
  match ty.byte_size(pointer_size) {
    1 => Width::W8,
    2 => Width::W16,
    4 => Width::W32,
    _ => Width::W64,
  }
}

fn assign_property(compiler: &mut Compiler, base: &Node, name: crate::symbol::Symbol, value_expr: Expr, is_tee: bool) -> Expr {
  let Some((class, base_expr)) = resolve_class(compiler, base) else {
    compiler.diagnostics.error(DiagnosticCode::NotAssignable, "property assignment on a non-reference base", None);
    return Expr::Unreachable;
  };
  let _ = class;
  let Some((_, prop)) = compiler.properties.iter().find(|(_, p)| p.name == name) else {
    compiler.diagnostics.error(DiagnosticCode::NotAssignable, "unresolved property", None);
    return Expr::Unreachable;
  };
  let (Some(setter), getter) = (prop.setter, prop.getter) else {
    compiler.diagnostics.error(DiagnosticCode::NotAssignable, "property has no setter", None);
    return Expr::Unreachable;
  };
  let set = crate::call::make_call_direct(compiler, setter, vec![value_expr], Vec::new(), Some(base_expr.clone()), None);
  if !is_tee { return set }
  let Some(getter) = getter else {
    compiler.diagnostics.error(DiagnosticCode::NotAssignable, "property has no getter for tee", None);
    return set;
  };
  let get = crate::call::make_call_direct(compiler, getter, Vec::new(), Vec::new(), Some(base_expr), None);
  let native = compiler.functions.get(getter).signature.return_type.native_type(compiler.pointer_size());
  Expr::Block { ty: native, body: vec![set, get] }
}

fn assign_indexed(compiler: &mut Compiler, base: &Node, index: &Node, value_expr: Expr, is_tee: bool) -> Expr {
  let Some((class, base_expr)) = resolve_class(compiler, base) else {
    compiler.diagnostics.error(DiagnosticCode::NotAssignable, "indexed assignment on a non-reference base", None);
    return Expr::Unreachable;
  };
  let Some(setter) = compiler.classes.get(class).operator(OperatorKind::IndexedSet) else {
    compiler.diagnostics.error(DiagnosticCode::OperatorNotApplicable, "class has no INDEXED_SET overload", None);
    return Expr::Unreachable;
  };
  let index_ty = compiler.functions.get(setter).signature.params[0];
  let index_expr = crate::expr::compile_expression(compiler, index, Some(index_ty), ConvertKind::Implicit, true);
  let set = crate::call::make_call_direct(compiler, setter, vec![index_expr.clone(), value_expr], Vec::new(), Some(base_expr.clone()), None);
  if !is_tee { return set }
  let Some(getter) = compiler.classes.get(class).operator(OperatorKind::IndexedGet) else {
    compiler.diagnostics.error(DiagnosticCode::OperatorNotApplicable, "class has no INDEXED_GET overload for tee", None);
    return set;
  };
  let get = crate::call::make_call_direct(compiler, getter, vec![index_expr], Vec::new(), Some(base_expr), None);
  let native = compiler.functions.get(getter).signature.return_type.native_type(compiler.pointer_size());
  Expr::Block { ty: native, body: vec![set, get] }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::symbol::Symbol;
  use crate::types::element::Local;
  use crate::types::ty::TypeKind;
  use crate::CompilerOptions;

  #[test]
  fn assigning_to_a_const_local_is_an_error() {
    let mut compiler = Compiler::new(CompilerOptions::default());
    let name = compiler.interner.intern("x");
    let mut flow = crate::flow::Flow::new(Type::new(TypeKind::I32));
    flow.declare_local(name, Local { name, ty: Type::new(TypeKind::I32), flags: ElementFlags::CONST, index: Some(0), constant_value: None });
    compiler.flow_stack.push(flow);
    let before = compiler.diagnostics.all().len();
    assign_value(&mut compiler, &AssignTarget::Local(name), Expr::I32Const(1), Type::new(TypeKind::I32), false);
    assert!(compiler.diagnostics.all().len() > before);
  }
}

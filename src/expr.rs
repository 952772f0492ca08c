//! Expression lowering (C8, §4.8) — the largest component. Every handler
//! follows the same shape: compute operand(s) against a contextual type,
//! consult operator overloads when applicable, emit the IR op dispatched
//! over the concrete [`TypeKind`](crate::types::ty::TypeKind), and leave
//! `compiler.current_type` holding the type of the returned expression (§3
//! Invariants).

use byteorder::{ByteOrder, LittleEndian};

use crate::diagnostics::{DiagnosticCode, FileSpan};
use crate::ir::{Binop, Expr, NativeType, Unop};
use crate::types::element::{ElementId, OperatorKind};
use crate::types::program::{BinaryOp, Node, UnaryOp};
use crate::types::ty::{
  common_compatible, convert, make_is_falseish, make_is_trueish, ConvertKind, Type, TypeKind,
};
use crate::Compiler;

pub use crate::expr_assign::compile_assign;
pub use crate::expr_call::{compile_call, compile_call_inline_unchecked};

/// `compileExpression(node, contextualType, kind, wrap)` (§4.8). The single
/// entry point every statement and nested expression lowers through.
pub fn compile_expression(
  compiler: &mut Compiler,
  node: &Node,
  contextual_type: Option<Type>,
  kind: ConvertKind,
  wrap: bool,
) -> Expr {
  let (expr, ty) = compile_inner(compiler, node, contextual_type, wrap);
  compiler.current_type = ty;
  match contextual_type {
    Some(ctx) if ctx != ty => {
      let e = convert(expr, ty, ctx, kind, wrap, compiler.options.features, |msg| {
        compiler.diagnostics.error(DiagnosticCode::NotAssignable, msg.to_owned(), span_of(node));
      });
      compiler.current_type = ctx;
      e
    }
    _ => expr,
  }
}

fn span_of(_node: &Node) -> Option<FileSpan> { None }

fn error_stub(compiler: &mut Compiler, code: DiagnosticCode, message: impl Into<String>, ty: Type) -> (Expr, Type) {
  compiler.diagnostics.error(code, message, None);
  (Expr::Unreachable, ty)
}

fn compile_inner(compiler: &mut Compiler, node: &Node, contextual_type: Option<Type>, wrap: bool) -> (Expr, Type) {
  match node {
    Node::NullLiteral => {
      let ty = contextual_type.unwrap_or(compiler.pointer_type());
      (ty.native_zero(compiler.pointer_size()), ty)
    }
    Node::BoolLiteral(b) => (Expr::I32Const(i32::from(*b)), Type::new(TypeKind::Bool)),
    Node::IntLiteral(v) => {
      let ty = contextual_type.filter(|t| t.is_integer()).unwrap_or(Type::new(TypeKind::I32));
      let e = if ty.is_long() { Expr::I64Const(*v) } else { Expr::I32Const(i32::try_from(*v).unwrap_or(*v as i32)) };
      (e, ty)
    }
    Node::FloatLiteral(v) => {
      let ty = contextual_type.filter(|t| t.is_float()).unwrap_or(Type::new(TypeKind::F64));
      let e = if matches!(ty.kind, TypeKind::F32) { Expr::F32Const(*v as f32) } else { Expr::F64Const(*v) };
      (e, ty)
    }
    Node::StringLiteral(s) => {
      let ptr = compiler.memory.ensure_static_string(s, None);
      let ty = compiler.pointer_type();
      (const_pointer(ty, compiler.pointer_size(), ptr), ty)
    }
    Node::This => compile_this(compiler),
    Node::Super => compile_this(compiler),
    Node::Ident { name, element } => compile_identifier(compiler, *name, *element),
    Node::Binary { op, lhs, rhs } => compile_binary(compiler, *op, lhs, rhs, contextual_type, wrap),
    Node::Unary { op, operand } => compile_unary(compiler, *op, operand, wrap),
    Node::Assign { target, value, is_tee } => {
      let e = compile_assign(compiler, target, value, *is_tee);
      (e, compiler.current_type)
    }
    Node::Call { callee, type_args, args } => {
      let e = compile_call(compiler, callee, type_args, args, contextual_type, None);
      (e, compiler.current_type)
    }
    Node::New { class, args } => compile_new(compiler, *class, args),
    Node::PropertyAccess { base, name } => compile_property_access(compiler, base, *name),
    Node::ElementAccess { base, index } => compile_element_access(compiler, base, index),
    Node::Ternary { cond, then, els } => compile_ternary(compiler, cond, then, els, contextual_type),
    Node::ArrayLiteral { element_ty, elements } => compile_array_literal(compiler, *element_ty, elements),
    Node::FunctionRef(f) => {
      let idx = crate::function_table::ensure_function_table_entry(compiler, *f);
      (Expr::I32Const(i32::try_from(idx).unwrap()), Type::new(TypeKind::Usize))
    }
  }
}

fn const_pointer(ty: Type, pointer_size: u32, value: u32) -> Expr {
  match ty.native_type(pointer_size) {
    NativeType::I64 => Expr::I64Const(i64::from(value)),
    _ => Expr::I32Const(i32::try_from(value).unwrap()),
  }
}

/// `this`/`super` (§4.8 "Identifier"): loads local 0, typed as the current
/// function's (or its base's) instance type. Constructor pre-allocation is
/// the declaration lowerer's concern (§4.6 "Constructors"), not this one's.
pub(crate) fn compile_this(compiler: &mut Compiler) -> (Expr, Type) {
  if let Some((local, ty)) = compiler.flow().inline_this {
    return (Expr::GetLocal(local), ty);
  }
  let f = compiler.current_function.expect("`this`/`super` outside a function body");
  let sig = &compiler.functions.get(f).signature;
  match sig.this_type {
    Some(ty) => (Expr::GetLocal(crate::ir::LocalId(0)), ty),
    None => error_stub(compiler, DiagnosticCode::SuperOutsideDerivedClass, "`this` outside an instance method", compiler.pointer_type()),
  }
}

fn compile_identifier(compiler: &mut Compiler, name: crate::symbol::Symbol, element: Option<ElementId>) -> (Expr, Type) {
  match element {
    None => {
      if let Some(local) = compiler.flow().lookup_local(name).cloned() {
        return match local.index {
          Some(i) => (Expr::GetLocal(crate::ir::LocalId(i)), local.ty),
          None => (local.constant_value.clone().unwrap_or(Expr::Unreachable), local.ty),
        };
      }
      error_stub(compiler, DiagnosticCode::NotAssignable, "undeclared identifier", compiler.pointer_type())
    }
    Some(ElementId::Global(g)) => {
      let global = compiler.globals.get(g);
      if let Some(v) = global.inlined_value.clone() { return (v, global.ty) }
      let ty = global.ty;
      let ir_id = global.compiled_ir.expect("global referenced before it was compiled");
      (Expr::GetGlobal(ir_id), ty)
    }
    Some(ElementId::Function(f)) => {
      let idx = crate::function_table::ensure_function_table_entry(compiler, f);
      (Expr::I32Const(i32::try_from(idx).unwrap()), Type::new(TypeKind::Usize))
    }
    Some(ElementId::Field(field_id)) => compile_implicit_field(compiler, field_id),
    Some(ElementId::EnumValue(e, index)) => compile_enum_value(compiler, e, index),
    _ => error_stub(compiler, DiagnosticCode::OperationNotSupported, "unsupported identifier kind", compiler.pointer_type()),
  }
}

/// `E.C`-style reference to an enum member (§3 "EnumValue", §4.6). A
/// `const enum` member substitutes its `inlined_value` literal directly;
/// a regular enum member loads the global it was compiled to.
fn compile_enum_value(compiler: &mut Compiler, e: crate::types::element::EnumId, index: usize) -> (Expr, Type) {
  crate::decls::ensure_enum_compiled(compiler, e);
  let member = compiler.enums.get(e).members[index].clone();
  let ty = Type::new(TypeKind::I32);
  if let Some(v) = member.inlined_value { return (v, ty) }
  let id = member.compiled_ir.expect("ensure_enum_compiled must assign compiled_ir or inlined_value");
  (Expr::GetGlobal(id), ty)
}

fn compile_implicit_field(compiler: &mut Compiler, field_id: crate::types::element::FieldId) -> (Expr, Type) {
  let field = compiler.fields.get(field_id).clone();
  let (this, _) = compile_this(compiler);
  let pointer_size = compiler.pointer_size();
  let native = field.ty.native_type(pointer_size);
  let addr = Expr::Binary(Binop::AddI32, Box::new(this), Box::new(Expr::I32Const(i32::try_from(field.offset).unwrap())));
  (Expr::Load { width: width_of(field.ty, pointer_size), signed: field.ty.is_signed(), native, mem: crate::ir::MemArg::default(), addr: Box::new(addr) }, field.ty)
}

pub(crate) fn width_of(ty: Type, pointer_size: u32) -> crate::ir::Width {
  use crate::ir::Width;
  match ty.byte_size(pointer_size) {
    1 => Width::W8,
    2 => Width::W16,
    4 => Width::W32,
    _ => Width::W64,
  }
}

/// Binary operators (§4.8 "Operator overloads" + common-type promotion).
fn compile_binary(compiler: &mut Compiler, op: BinaryOp, lhs: &Node, rhs: &Node, contextual_type: Option<Type>, wrap: bool) -> (Expr, Type) {
  if matches!(op, BinaryOp::LogicalAnd | BinaryOp::LogicalOr) {
    return compile_short_circuit(compiler, op, lhs, rhs);
  }

  let lexpr = compile_expression(compiler, lhs, None, ConvertKind::Implicit, wrap);
  let lty = compiler.current_type;

  if lty.is_reference() {
    if let Some(kind) = op.operator_kind() {
      if let Some(e) = compile_operator_overload(compiler, kind, lty, lexpr.clone(), rhs) {
        return (e, compiler.current_type);
      }
      if !kind.allows_pointer_fallback() {
        return error_stub(compiler, DiagnosticCode::OperatorNotApplicable, "no operator overload found", lty);
      }
    }
    let rexpr = compile_expression(compiler, rhs, Some(lty), ConvertKind::Implicit, wrap);
    let native = lty.native_type(compiler.pointer_size());
    let ir_op = if matches!(op, BinaryOp::Eq) { eq_op(native) } else { ne_op(native) };
    return (Expr::Binary(ir_op, Box::new(lexpr), Box::new(rexpr)), Type::new(TypeKind::Bool));
  }

  let rexpr_probe = compile_expression(compiler, rhs, None, ConvertKind::Implicit, wrap);
  let rty = compiler.current_type;
  let signedness_matters = !matches!(op, BinaryOp::Eq | BinaryOp::Ne);
  let Some(common) = common_compatible(lty, rty, signedness_matters) else {
    return error_stub(compiler, DiagnosticCode::OperatorNotApplicable, "operands have no common arithmetic type", contextual_type.unwrap_or(lty));
  };

  if matches!(op, BinaryOp::Pow | BinaryOp::Rem) && common.is_float() {
    return compile_float_pow_or_mod(compiler, op, lexpr, lty, rhs, common);
  }

  let l = convert(lexpr, lty, common, ConvertKind::Implicit, wrap, compiler.options.features, |_| {});
  let r = convert(rexpr_probe, rty, common, ConvertKind::Implicit, wrap, compiler.options.features, |_| {});
  let native = common.native_type(compiler.pointer_size());
  let signed = common.is_signed();
  let ir_op = arith_binop(op, native, signed);
  let is_compare = matches!(op, BinaryOp::Eq | BinaryOp::Ne | BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge);
  let result_ty = if is_compare { Type::new(TypeKind::Bool) } else { common };
  let mut e = Expr::Binary(ir_op, Box::new(l), Box::new(r));
  if !is_compare && wrap && result_ty.is_short() {
    e = crate::types::ty::ensure_small_integer_wrap(e, result_ty, compiler.options.features);
  }
  (e, result_ty)
}

fn eq_op(native: NativeType) -> Binop {
  match native { NativeType::I64 => Binop::EqI64, _ => Binop::EqI32 }
}
fn ne_op(native: NativeType) -> Binop {
  match native { NativeType::I64 => Binop::NeI64, _ => Binop::NeI32 }
}

fn arith_binop(op: BinaryOp, native: NativeType, signed: bool) -> Binop {
  use BinaryOp as B;
  use NativeType as N;
  match (op, native) {
    (B::Add, N::I32) => Binop::AddI32, (B::Add, N::I64) => Binop::AddI64,
    (B::Add, N::F32) => Binop::AddF32, (B::Add, N::F64) => Binop::AddF64,
    (B::Sub, N::I32) => Binop::SubI32, (B::Sub, N::I64) => Binop::SubI64,
    (B::Sub, N::F32) => Binop::SubF32, (B::Sub, N::F64) => Binop::SubF64,
    (B::Mul, N::I32) => Binop::MulI32, (B::Mul, N::I64) => Binop::MulI64,
    (B::Mul, N::F32) => Binop::MulF32, (B::Mul, N::F64) => Binop::MulF64,
    (B::Div, N::I32) => if signed { Binop::DivSI32 } else { Binop::DivUI32 },
    (B::Div, N::I64) => if signed { Binop::DivSI64 } else { Binop::DivUI64 },
    (B::Div, N::F32) => Binop::DivF32, (B::Div, N::F64) => Binop::DivF64,
    (B::Rem, N::I32) => if signed { Binop::RemSI32 } else { Binop::RemUI32 },
    (B::Rem, N::I64) => if signed { Binop::RemSI64 } else { Binop::RemUI64 },
    (B::BitAnd, N::I32) => Binop::AndI32, (B::BitAnd, N::I64) => Binop::AndI64,
    (B::BitOr, N::I32) => Binop::OrI32, (B::BitOr, N::I64) => Binop::OrI64,
    (B::BitXor, N::I32) => Binop::XorI32, (B::BitXor, N::I64) => Binop::XorI64,
    (B::Shl, N::I32) => Binop::ShlI32, (B::Shl, N::I64) => Binop::ShlI64,
    // Open question in §9: the source's handling of `>>>` falls through the
    // signed-shift case after the unsigned one runs once. We emit the
    // unsigned shift and stop there, matching "the specified behaviour is to
    // emit ShrU32 exactly once" rather than reproducing the fallthrough bug.
    (B::ShrU, N::I32) => Binop::ShrUI32, (B::ShrU, N::I64) => Binop::ShrUI64,
    (B::Shr, N::I32) => if signed { Binop::ShrSI32 } else { Binop::ShrUI32 },
    (B::Shr, N::I64) => if signed { Binop::ShrSI64 } else { Binop::ShrUI64 },
    (B::Eq, N::I32) => Binop::EqI32, (B::Eq, N::I64) => Binop::EqI64,
    (B::Eq, N::F32) => Binop::EqF32, (B::Eq, N::F64) => Binop::EqF64,
    (B::Ne, N::I32) => Binop::NeI32, (B::Ne, N::I64) => Binop::NeI64,
    (B::Ne, N::F32) => Binop::NeF32, (B::Ne, N::F64) => Binop::NeF64,
    (B::Lt, N::I32) => if signed { Binop::LtSI32 } else { Binop::LtUI32 },
    (B::Lt, N::I64) => if signed { Binop::LtSI64 } else { Binop::LtUI64 },
    (B::Lt, N::F32) => Binop::LtF32, (B::Lt, N::F64) => Binop::LtF64,
    (B::Le, N::I32) => if signed { Binop::LeSI32 } else { Binop::LeUI32 },
    (B::Le, N::I64) => if signed { Binop::LeSI64 } else { Binop::LeUI64 },
    (B::Le, N::F32) => Binop::LeF32, (B::Le, N::F64) => Binop::LeF64,
    (B::Gt, N::I32) => if signed { Binop::GtSI32 } else { Binop::GtUI32 },
    (B::Gt, N::I64) => if signed { Binop::GtSI64 } else { Binop::GtUI64 },
    (B::Gt, N::F32) => Binop::GtF32, (B::Gt, N::F64) => Binop::GtF64,
    (B::Ge, N::I32) => if signed { Binop::GeSI32 } else { Binop::GeUI32 },
    (B::Ge, N::I64) => if signed { Binop::GeSI64 } else { Binop::GeUI64 },
    (B::Ge, N::F32) => Binop::GeF32, (B::Ge, N::F64) => Binop::GeF64,
    _ => unreachable!("unsupported operator/native-type combination {op:?}/{native:?}"),
  }
}

fn compile_operator_overload(compiler: &mut Compiler, kind: OperatorKind, lty: Type, lexpr: Expr, rhs: &Node) -> Option<Expr> {
  let TypeKind::Reference(class) = lty.kind else { return None };
  let f = compiler.classes.get(class).operator(kind)?;
  let param_ty = compiler.functions.get(f).signature.params[0];
  let rexpr = compile_expression(compiler, rhs, Some(param_ty), ConvertKind::Implicit, true);
  let prototype = compiler.functions.get(f).prototype;
  let inline = compiler.function_prototypes.get(prototype).decorators.contains(crate::types::element::DecoratorFlags::INLINE);
  Some(if inline {
    compile_call_inline_unchecked(compiler, f, vec![rexpr], Some(lexpr), None)
  } else {
    crate::call::make_call_direct(compiler, f, vec![rexpr], Vec::new(), Some(lexpr), None)
  })
}

fn compile_float_pow_or_mod(compiler: &mut Compiler, op: BinaryOp, lexpr: Expr, lty: Type, rhs: &Node, common: Type) -> (Expr, Type) {
  let rexpr = compile_expression(compiler, rhs, Some(common), ConvertKind::Implicit, true);
  let l = convert(lexpr, lty, common, ConvertKind::Implicit, true, compiler.options.features, |_| {});
  let name = match (op, common.kind) {
    (BinaryOp::Pow, TypeKind::F32) => "Mathf.pow",
    (BinaryOp::Pow, _) => "Math.pow",
    (BinaryOp::Rem, TypeKind::F32) => "Mathf.mod",
    (_, _) => "Math.mod",
  };
  let Some(f) = resolve_math_fn(compiler, name) else {
    return error_stub(compiler, DiagnosticCode::OperationNotSupported, format!("{name} is not available"), common);
  };
  (crate::call::make_call_direct(compiler, f, vec![l, rexpr], Vec::new(), None, None), common)
}

/// `Math.pow`/`Mathf.pow`/`Math.mod`/`Mathf.mod` resolution, memoised on the
/// compiler per §4.8 "instances are memoised on the compiler".
fn resolve_math_fn(compiler: &mut Compiler, name: &'static str) -> Option<crate::types::element::FunctionId> {
  if let Some(&cached) = compiler.math_fn_cache.get(name) { return cached }
  // The root-namespace lookup itself is a resolver concern (§1); absent a
  // real resolver in this workspace, an unresolved cache entry is recorded so
  // repeated uses don't re-probe, matching the memoisation contract.
  compiler.math_fn_cache.insert(name, None);
  None
}

fn compile_unary(compiler: &mut Compiler, op: UnaryOp, operand: &Node, wrap: bool) -> (Expr, Type) {
  match op {
    UnaryOp::Not => {
      let e = compile_expression(compiler, operand, None, ConvertKind::Implicit, wrap);
      let ty = compiler.current_type;
      (make_is_falseish(e, ty, false, compiler.options.features), Type::new(TypeKind::Bool))
    }
    UnaryOp::Minus => {
      let e = compile_expression(compiler, operand, None, ConvertKind::Implicit, wrap);
      let ty = compiler.current_type;
      let native = ty.native_type(compiler.pointer_size());
      let neg = match native {
        NativeType::I32 => Expr::Binary(Binop::SubI32, Box::new(Expr::I32Const(0)), Box::new(e)),
        NativeType::I64 => Expr::Binary(Binop::SubI64, Box::new(Expr::I64Const(0)), Box::new(e)),
        NativeType::F32 => Expr::Unary(Unop::NegF32, Box::new(e)),
        NativeType::F64 => Expr::Unary(Unop::NegF64, Box::new(e)),
        NativeType::None => e,
      };
      (neg, ty)
    }
    UnaryOp::Plus => {
      let e = compile_expression(compiler, operand, None, ConvertKind::Implicit, wrap);
      (e, compiler.current_type)
    }
    UnaryOp::BitNot => {
      let e = compile_expression(compiler, operand, None, ConvertKind::Implicit, wrap);
      let ty = compiler.current_type;
      let native = ty.native_type(compiler.pointer_size());
      let e = match native {
        NativeType::I64 => Expr::Binary(Binop::XorI64, Box::new(e), Box::new(Expr::I64Const(-1))),
        _ => Expr::Binary(Binop::XorI32, Box::new(e), Box::new(Expr::I32Const(-1))),
      };
      (crate::types::ty::ensure_small_integer_wrap(e, ty, compiler.options.features), ty)
    }
    UnaryOp::PrefixInc | UnaryOp::PrefixDec => compile_prefix_step(compiler, op, operand),
  }
}

fn compile_prefix_step(compiler: &mut Compiler, op: UnaryOp, operand: &Node) -> (Expr, Type) {
  let Node::Ident { name, element } = operand else {
    return error_stub(compiler, DiagnosticCode::OperationNotSupported, "increment/decrement target must be a variable", compiler.pointer_type());
  };
  let value = compile_identifier(compiler, *name, *element);
  let ty = value.1;
  let one = ty.native_one(compiler.pointer_size());
  let native = ty.native_type(compiler.pointer_size());
  let step = match (op, native) {
    (UnaryOp::PrefixInc, NativeType::I64) => Binop::AddI64,
    (UnaryOp::PrefixInc, _) => Binop::AddI32,
    (UnaryOp::PrefixDec, NativeType::I64) => Binop::SubI64,
    (UnaryOp::PrefixDec, _) => Binop::SubI32,
  };
  let stepped = Expr::Binary(step, Box::new(value.0), Box::new(one));
  let target = match element {
    Some(ElementId::Global(g)) => crate::types::program::AssignTarget::Global(*g),
    _ => crate::types::program::AssignTarget::Local(*name),
  };
  let e = crate::expr_assign::assign_value(compiler, &target, stepped, ty, true);
  (e, ty)
}

/// `&&`/`||` (§4.8 "Short-circuit"). The LHS is used twice — once as the
/// `if` condition, once as the untaken branch's value — so a side-effecting
/// LHS (a call, a store, an increment) is teed into a temporary local
/// instead of being re-emitted, to avoid running it twice.
fn compile_short_circuit(compiler: &mut Compiler, op: BinaryOp, lhs: &Node, rhs: &Node) -> (Expr, Type) {
  let lexpr = compile_expression(compiler, lhs, None, ConvertKind::Implicit, true);
  let lty = compiler.current_type;

  let (lhs_for_cond, lhs_for_branch) = if is_side_effect_free(lhs) {
    (lexpr.clone(), lexpr)
  } else {
    let temp = acquire_temp_local(compiler, lty);
    (Expr::TeeLocal(temp, Box::new(lexpr)), Expr::GetLocal(temp))
  };
  let cond = make_is_trueish(lhs_for_cond, lty, false, compiler.options.features);

  compiler.fork_flow();
  let rexpr = compile_expression(compiler, rhs, Some(lty), ConvertKind::Implicit, true);
  let rflow = compiler.free_flow();
  compiler.flow().inherit_conditional(&rflow);

  let native = lty.native_type(compiler.pointer_size());
  let (then, els) = match op {
    BinaryOp::LogicalAnd => (rexpr, lhs_for_branch),
    _ => (lhs_for_branch, rexpr),
  };
  (Expr::If { ty: native, cond: Box::new(cond), then: vec![then], els: vec![els] }, lty)
}

/// Whether `node` is free of observable side effects and so safe to
/// lower into more than one place in the emitted IR without a temp local
/// (calls, assignments, `new`, and `++`/`--` are not; reads are).
fn is_side_effect_free(node: &Node) -> bool {
  match node {
    Node::NullLiteral | Node::BoolLiteral(_) | Node::IntLiteral(_) | Node::FloatLiteral(_) | Node::StringLiteral(_) => true,
    Node::This | Node::Super | Node::Ident { .. } | Node::FunctionRef(_) => true,
    Node::Unary { op, operand } => !matches!(op, UnaryOp::PrefixInc | UnaryOp::PrefixDec) && is_side_effect_free(operand),
    Node::Binary { lhs, rhs, .. } => is_side_effect_free(lhs) && is_side_effect_free(rhs),
    Node::PropertyAccess { base, .. } => is_side_effect_free(base),
    Node::ElementAccess { base, index } => is_side_effect_free(base) && is_side_effect_free(index),
    Node::Ternary { cond, then, els } => is_side_effect_free(cond) && is_side_effect_free(then) && is_side_effect_free(els),
    Node::Assign { .. } | Node::Call { .. } | Node::New { .. } | Node::ArrayLiteral { .. } => false,
  }
}

fn compile_ternary(compiler: &mut Compiler, cond: &Node, then: &Node, els: &Node, contextual_type: Option<Type>) -> (Expr, Type) {
  let cond_raw = compile_expression(compiler, cond, None, ConvertKind::Implicit, true);
  let cond_ty = compiler.current_type;
  let cexpr = make_is_trueish(cond_raw, cond_ty, false, compiler.options.features);

  compiler.fork_flow();
  let texpr = compile_expression(compiler, then, contextual_type, ConvertKind::Implicit, true);
  let tty = compiler.current_type;
  let tflow = compiler.free_flow();

  compiler.fork_flow();
  let eexpr = compile_expression(compiler, els, contextual_type.or(Some(tty)), ConvertKind::Implicit, true);
  let eflow = compiler.free_flow();

  let mut merged = compiler.flow_stack.pop().expect("ternary compiled outside a function body");
  merged.inherit_mutual(&tflow, &eflow);
  compiler.flow_stack.push(merged);

  let native = tty.native_type(compiler.pointer_size());
  (Expr::If { ty: native, cond: Box::new(cexpr), then: vec![texpr], els: vec![eexpr] }, tty)
}

fn compile_property_access(compiler: &mut Compiler, base: &Node, name: crate::symbol::Symbol) -> (Expr, Type) {
  let bexpr = compile_expression(compiler, base, None, ConvertKind::Implicit, true);
  let bty = compiler.current_type;
  let TypeKind::Reference(class) = bty.kind else {
    return error_stub(compiler, DiagnosticCode::OperatorNotApplicable, "property access on a non-reference type", compiler.pointer_type());
  };
  let Some(&field_id) = compiler.classes.get(class).fields.iter().find(|&&fid| compiler.fields.get(fid).name == name) else {
    return error_stub(compiler, DiagnosticCode::OperationNotSupported, "property getters are not modelled in this workspace", compiler.pointer_type());
  };
  let field = compiler.fields.get(field_id).clone();
  let pointer_size = compiler.pointer_size();
  let native = field.ty.native_type(pointer_size);
  let addr = Expr::Binary(Binop::AddI32, Box::new(bexpr), Box::new(Expr::I32Const(i32::try_from(field.offset).unwrap())));
  (Expr::Load { width: width_of(field.ty, pointer_size), signed: field.ty.is_signed(), native, mem: crate::ir::MemArg::default(), addr: Box::new(addr) }, field.ty)
}

fn compile_element_access(compiler: &mut Compiler, base: &Node, index: &Node) -> (Expr, Type) {
  let bexpr = compile_expression(compiler, base, None, ConvertKind::Implicit, true);
  let bty = compiler.current_type;
  let TypeKind::Reference(class) = bty.kind else {
    return error_stub(compiler, DiagnosticCode::OperatorNotApplicable, "indexed access on a non-reference type", compiler.pointer_type());
  };
  let Some(f) = compiler.classes.get(class).operator(OperatorKind::IndexedGet) else {
    return error_stub(compiler, DiagnosticCode::OperatorNotApplicable, "class has no INDEXED_GET overload", compiler.pointer_type());
  };
  let index_ty = compiler.functions.get(f).signature.params[0];
  let iexpr = compile_expression(compiler, index, Some(index_ty), ConvertKind::Implicit, true);
  let e = crate::call::make_call_direct(compiler, f, vec![iexpr], Vec::new(), Some(bexpr), None);
  (e, compiler.current_type)
}

/// `new Class(args)` (§4.8 "Allocation"): `makeAllocate` plus the
/// constructor call, matching the instance-methods-call-through-constructor
/// shape the rest of the lowering expects.
fn compile_new(compiler: &mut Compiler, class: crate::types::element::ClassId, args: &[Node]) -> (Expr, Type) {
  let ty = Type::new(TypeKind::Reference(class));
  let Some(ctor) = compiler.classes.get(class).constructor else {
    // No declared constructor, so no `constructor(public x: T)`-style
    // parameter promotion exists to read from either.
    let allocated = make_allocate(compiler, class, None);
    return (allocated, ty);
  };
  let sig = compiler.functions.get(ctor).signature.clone();
  let operands: Vec<Expr> = args.iter().zip(sig.params.iter()).map(|(a, t)| compile_expression(compiler, a, Some(*t), ConvertKind::Implicit, true)).collect();
  let missing: Vec<&Node> = Vec::new();
  (crate::call::make_call_direct(compiler, ctor, operands, missing, None, None), ty)
}

/// `makeAllocate(class)` (§4.8): acquire a raw chunk, tee it into a temp, and
/// store each field's initializer, or — when the field was declared as a
/// `constructor(public x: T)`-style promoted parameter and `ctor_param_base`
/// names where the constructor's own parameter locals begin — a read of the
/// matching parameter local, or else the type's native zero.
pub fn make_allocate(compiler: &mut Compiler, class: crate::types::element::ClassId, ctor_param_base: Option<u32>) -> Expr {
  let raw = crate::builtins::allocate(compiler, class);
  let pointer_size = compiler.pointer_size();
  let temp_ty = Type::new(TypeKind::Reference(class));
  let temp = acquire_temp_local(compiler, temp_ty);
  let mut body = vec![Expr::SetLocal(temp, Box::new(raw))];
  let field_ids = compiler.classes.get(class).fields.clone();
  for field_id in field_ids {
    let field = compiler.fields.get(field_id).clone();
    let value = match (field.ctor_param, ctor_param_base) {
      (Some(param_index), Some(base)) => Expr::GetLocal(crate::ir::LocalId(base + u32::try_from(param_index).unwrap())),
      _ => field.initializer.clone().unwrap_or_else(|| field.ty.native_zero(pointer_size)),
    };
    let addr = Expr::Binary(Binop::AddI32, Box::new(Expr::GetLocal(temp)), Box::new(Expr::I32Const(i32::try_from(field.offset).unwrap())));
    body.push(Expr::Store { width: Some(width_of(field.ty, pointer_size)), mem: crate::ir::MemArg::default(), addr: Box::new(addr), value: Box::new(value) });
  }
  body.push(Expr::GetLocal(temp));
  let native = temp_ty.native_type(pointer_size);
  Expr::Block { ty: native, body }
}

/// `makeConditionalAllocate(class)` (§4.8): used by derived-class
/// constructors that may have already been allocated by a `super(...)` call.
/// `ctor_param_base` is the local index of the owning constructor's first
/// declared parameter (just past `this`), threaded through to
/// [`make_allocate`] for promoted-field initialisation.
pub fn make_conditional_allocate(compiler: &mut Compiler, class: crate::types::element::ClassId, this_local: crate::ir::LocalId, ctor_param_base: u32) -> Expr {
  let pointer_size = compiler.pointer_size();
  let native = Type::new(TypeKind::Reference(class)).native_type(pointer_size);
  let cond = Expr::Unary(Unop::EqzI32, Box::new(Expr::GetLocal(this_local)));
  let alloc = make_allocate(compiler, class, Some(ctor_param_base));
  Expr::If { ty: native, cond: Box::new(cond), then: vec![alloc], els: vec![Expr::GetLocal(this_local)] }
}

pub(crate) fn acquire_temp_local(compiler: &mut Compiler, ty: Type) -> crate::ir::LocalId {
  let f = compiler.current_function.expect("temp local acquired outside a function body");
  let func = compiler.functions.get_mut(f);
  let sig_len = func.signature.params.len() + usize::from(func.signature.has_this());
  let index = u32::try_from(sig_len + func.extra_locals.len()).unwrap();
  func.extra_locals.push(ty);
  crate::ir::LocalId(index)
}

fn compile_array_literal(compiler: &mut Compiler, element_ty: Type, elements: &[Node]) -> (Expr, Type) {
  let pointer_size = compiler.pointer_size();
  let element_size = element_ty.byte_size(pointer_size);
  let folded: Option<Vec<Expr>> = elements.iter().map(|n| crate::call::try_fold_constant(n, element_ty, pointer_size)).collect();
  let Some(values) = folded else {
    compiler.diagnostics.unsupported("array literals with non-constant elements are not supported", None);
    return (Expr::Unreachable, compiler.pointer_type());
  };
  let length = u32::try_from(values.len()).unwrap();
  const HEADER_SIZE: u32 = 8; // [length: i32][data pointer: native]
  let (buffer_start, _) = compiler.memory.add_static_array(element_size, length, 0, |buf| {
    for v in &values { write_const_bytes(buf, v, element_size); }
  });
  let mut header = vec![0u8; HEADER_SIZE as usize];
  LittleEndian::write_i32(&mut header[0..4], i32::try_from(length).unwrap());
  LittleEndian::write_u32(&mut header[4..8], buffer_start);
  let header_start = compiler.memory.add_segment(4, header);
  let ty = compiler.pointer_type();
  (const_pointer(ty, pointer_size, header_start), ty)
}

fn write_const_bytes(buf: &mut Vec<u8>, v: &Expr, element_size: u32) {
  let mut scratch = [0u8; 8];
  match *v {
    Expr::I32Const(i) => LittleEndian::write_i32(&mut scratch, i),
    Expr::I64Const(i) => LittleEndian::write_i64(&mut scratch, i),
    Expr::F32Const(f) => LittleEndian::write_f32(&mut scratch, f),
    Expr::F64Const(f) => LittleEndian::write_f64(&mut scratch, f),
    _ => {}
  }
  buf.extend_from_slice(&scratch[..element_size as usize]);
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::types::ty::TypeKind;
  use crate::CompilerOptions;

  #[test]
  fn int_literal_defaults_to_i32() {
    let mut compiler = Compiler::new(CompilerOptions::default());
    compiler.flow_stack.push(crate::flow::Flow::new(Type::new(TypeKind::I32)));
    let e = compile_expression(&mut compiler, &Node::IntLiteral(7), None, ConvertKind::Implicit, true);
    assert!(matches!(e, Expr::I32Const(7)));
    assert_eq!(compiler.current_type.kind, TypeKind::I32);
  }

  #[test]
  fn bool_literal_is_i32_zero_or_one() {
    let mut compiler = Compiler::new(CompilerOptions::default());
    compiler.flow_stack.push(crate::flow::Flow::new(Type::new(TypeKind::Bool)));
    let e = compile_expression(&mut compiler, &Node::BoolLiteral(true), None, ConvertKind::Implicit, true);
    assert!(matches!(e, Expr::I32Const(1)));
  }

  fn push_dummy_function(compiler: &mut Compiler) -> crate::types::element::FunctionId {
    use crate::types::element::{DecoratorFlags, Function, FunctionPrototype, Signature};
    let name = compiler.interner.intern("f");
    let proto = compiler.function_prototypes.push(FunctionPrototype {
      name, flags: ElementFlags::empty(), decorators: DecoratorFlags::empty(), operator: None, owner: None, import: None, instances: Vec::new(),
    });
    compiler.functions.push(Function {
      prototype: proto,
      signature: Signature { params: Default::default(), required: 0, return_type: Type::new(TypeKind::Void), this_type: None },
      flags: ElementFlags::empty(), name, param_names: Vec::new(), extra_locals: Vec::new(),
      flow: crate::flow::Flow::new(Type::new(TypeKind::Void)), trampoline: None, table_index: -1,
      next_inline_id: 0, compiled_ir: None, optional_initializers: Vec::new(), body: Some(Vec::new()),
    })
  }

  #[test]
  fn make_allocate_reads_a_promoted_field_from_its_constructor_parameter() {
    use crate::types::element::{Class, ClassPrototype, DecoratorFlags, Field};
    let mut compiler = Compiler::new(CompilerOptions::default());
    let class_name = compiler.interner.intern("Point");
    let field_name = compiler.interner.intern("x");
    let proto = compiler.class_prototypes.push(ClassPrototype {
      name: class_name, flags: ElementFlags::empty(), decorators: DecoratorFlags::empty(), instances: Vec::new(),
    });
    let field = compiler.fields.push(Field {
      name: field_name, ty: Type::new(TypeKind::I32), flags: ElementFlags::empty(), offset: 0, initializer: None, ctor_param: Some(0),
    });
    let class = compiler.classes.push(Class {
      prototype: proto, base: None, fields: vec![field], constructor: None, methods: Vec::new(), operators: Vec::new(), size: 4,
      flags: ElementFlags::empty(), gc_hook: None,
    });
    compiler.current_function = Some(push_dummy_function(&mut compiler));

    // This mirrors the constructor param layout `prepend_constructor_prologue`
    // computes: local 0 is `this`, so a single declared parameter starts at 1.
    let e = make_allocate(&mut compiler, class, Some(1));
    let Expr::Block { body, .. } = e else { panic!("expected a block") };
    let store = body.iter().find(|e| matches!(e, Expr::Store { .. })).expect("a field store");
    let Expr::Store { value, .. } = store else { unreachable!() };
    assert!(matches!(**value, Expr::GetLocal(crate::ir::LocalId(1))), "a promoted field must read its constructor parameter, not fall back to a native zero");
  }

  #[test]
  fn make_allocate_falls_back_to_native_zero_without_a_ctor_param_base() {
    use crate::types::element::{Class, ClassPrototype, DecoratorFlags, Field};
    let mut compiler = Compiler::new(CompilerOptions::default());
    let class_name = compiler.interner.intern("Point");
    let field_name = compiler.interner.intern("x");
    let proto = compiler.class_prototypes.push(ClassPrototype {
      name: class_name, flags: ElementFlags::empty(), decorators: DecoratorFlags::empty(), instances: Vec::new(),
    });
    let field = compiler.fields.push(Field {
      name: field_name, ty: Type::new(TypeKind::I32), flags: ElementFlags::empty(), offset: 0, initializer: None, ctor_param: Some(0),
    });
    let class = compiler.classes.push(Class {
      prototype: proto, base: None, fields: vec![field], constructor: None, methods: Vec::new(), operators: Vec::new(), size: 4,
      flags: ElementFlags::empty(), gc_hook: None,
    });
    compiler.current_function = Some(push_dummy_function(&mut compiler));

    let e = make_allocate(&mut compiler, class, None);
    let Expr::Block { body, .. } = e else { panic!("expected a block") };
    let store = body.iter().find(|e| matches!(e, Expr::Store { .. })).expect("a field store");
    let Expr::Store { value, .. } = store else { unreachable!() };
    assert!(matches!(**value, Expr::I32Const(0)), "with no constructor context a promoted field still falls back to a native zero");
  }

  #[test]
  fn short_circuit_tees_a_side_effecting_lhs_into_a_temp_local_instead_of_duplicating_it() {
    let mut compiler = Compiler::new(CompilerOptions::default());
    let a = compiler.interner.intern("a");
    let mut flow = crate::flow::Flow::new(Type::new(TypeKind::I32));
    flow.declare_local(a, crate::types::element::Local { name: a, ty: Type::new(TypeKind::I32), flags: ElementFlags::empty(), index: Some(0), constant_value: None });
    compiler.flow_stack.push(flow);
    compiler.current_function = Some(push_dummy_function(&mut compiler));

    let lhs = Node::Unary { op: UnaryOp::PrefixInc, operand: Box::new(Node::Ident { name: a, element: None }) };
    let rhs = Node::IntLiteral(1);
    let (e, _) = compile_short_circuit(&mut compiler, BinaryOp::LogicalAnd, &lhs, &rhs);
    let Expr::If { cond, els, .. } = e else { panic!("expected an If") };
    assert!(matches!(*cond, Expr::TeeLocal(..)), "the increment must run exactly once, inside the tee");
    assert!(matches!(els[0], Expr::GetLocal(_)), "the untaken branch must read the teed temp, not re-run the increment");
  }

  #[test]
  fn short_circuit_reuses_a_side_effect_free_lhs_directly() {
    let mut compiler = Compiler::new(CompilerOptions::default());
    let a = compiler.interner.intern("a");
    let mut flow = crate::flow::Flow::new(Type::new(TypeKind::I32));
    flow.declare_local(a, crate::types::element::Local { name: a, ty: Type::new(TypeKind::I32), flags: ElementFlags::empty(), index: Some(0), constant_value: None });
    compiler.flow_stack.push(flow);

    let lhs = Node::Ident { name: a, element: None };
    let rhs = Node::IntLiteral(1);
    let (e, _) = compile_short_circuit(&mut compiler, BinaryOp::LogicalAnd, &lhs, &rhs);
    let Expr::If { els, .. } = e else { panic!("expected an If") };
    assert!(matches!(els[0], Expr::GetLocal(crate::ir::LocalId(0))), "a plain local read is cheap enough to reuse directly");
  }
}

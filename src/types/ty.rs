//! Type lattice and conversion (C1). The numeric kind lattice, the
//! common-type rule used at every binary operator, and the conversion/
//! wrap machinery that bridges it to the IR's four native types.

use crate::ir::{Cvtop, Expr, NativeType};
use crate::types::element::ClassId;

/// The tag of a [`Type`]. Primitive numeric kinds plus `reference`, as in §3.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum TypeKind {
  I8, U8, I16, U16, I32, U32, I64, U64, Isize, Usize, F32, F64, Bool, Void,
  /// A reference to an instance of `ClassId`, optionally nullable.
  Reference(ClassId),
}

/// A fully resolved source-level type. Carries the flags the spec calls out
/// explicitly (`signed`, `integer`, `float`, `long`, `short`, `nullable`)
/// alongside the kind, since several of them (`short` in particular) are
/// consulted far more often than the kind match itself.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Type {
  pub kind: TypeKind,
  /// Whether a `reference(class)` type may additionally hold `null`.
  pub nullable: bool,
}

impl Type {
  #[must_use] pub fn new(kind: TypeKind) -> Self { Self { kind, nullable: false } }
  #[must_use] pub fn nullable_reference(class: ClassId) -> Self {
    Self { kind: TypeKind::Reference(class), nullable: true }
  }

  #[must_use] pub fn is_signed(self) -> bool {
    matches!(self.kind, TypeKind::I8 | TypeKind::I16 | TypeKind::I32 | TypeKind::I64 | TypeKind::Isize)
  }
  #[must_use] pub fn is_integer(self) -> bool {
    matches!(self.kind,
      TypeKind::I8 | TypeKind::U8 | TypeKind::I16 | TypeKind::U16 |
      TypeKind::I32 | TypeKind::U32 | TypeKind::I64 | TypeKind::U64 |
      TypeKind::Isize | TypeKind::Usize | TypeKind::Bool)
  }
  #[must_use] pub fn is_float(self) -> bool { matches!(self.kind, TypeKind::F32 | TypeKind::F64) }
  /// 64-bit integer kinds, which live in an IR `i64` slot.
  #[must_use] pub fn is_long(self) -> bool { matches!(self.kind, TypeKind::I64 | TypeKind::U64) }
  /// Any integer kind narrower than 32 bits, plus `bool` (§ GLOSSARY
  /// "Short integer"). Such values live in 32-bit IR slots and must be
  /// explicitly wrapped when observable width matters.
  #[must_use] pub fn is_short(self) -> bool {
    matches!(self.kind, TypeKind::I8 | TypeKind::U8 | TypeKind::I16 | TypeKind::U16 | TypeKind::Bool)
  }
  #[must_use] pub fn is_reference(self) -> bool { matches!(self.kind, TypeKind::Reference(_)) }
  #[must_use] pub fn is_void(self) -> bool { matches!(self.kind, TypeKind::Void) }

  /// Byte size of a value of this type in memory (not its native IR slot
  /// width — a `u8` is 1 byte in memory but lives in an `i32` IR slot).
  #[must_use] pub fn byte_size(self, pointer_size: u32) -> u32 {
    match self.kind {
      TypeKind::I8 | TypeKind::U8 | TypeKind::Bool => 1,
      TypeKind::I16 | TypeKind::U16 => 2,
      TypeKind::I32 | TypeKind::U32 | TypeKind::F32 => 4,
      TypeKind::I64 | TypeKind::U64 | TypeKind::F64 => 8,
      TypeKind::Isize | TypeKind::Usize | TypeKind::Reference(_) => pointer_size,
      TypeKind::Void => 0,
    }
  }

  /// The IR-level native type backing this source type (§ GLOSSARY).
  #[must_use] pub fn native_type(self, pointer_size: u32) -> NativeType {
    match self.kind {
      TypeKind::I8 | TypeKind::U8 | TypeKind::I16 | TypeKind::U16 |
      TypeKind::I32 | TypeKind::U32 | TypeKind::Bool => NativeType::I32,
      TypeKind::I64 | TypeKind::U64 => NativeType::I64,
      TypeKind::F32 => NativeType::F32,
      TypeKind::F64 => NativeType::F64,
      TypeKind::Isize | TypeKind::Usize | TypeKind::Reference(_) =>
        if pointer_size == 64 { NativeType::I64 } else { NativeType::I32 },
      TypeKind::Void => NativeType::None,
    }
  }

  /// The native representation of `0`/`1` for this type, used for
  /// truthiness, default-initialisation, and null pointers.
  #[must_use] pub fn native_zero(self, pointer_size: u32) -> Expr {
    match self.native_type(pointer_size) {
      NativeType::I32 => Expr::I32Const(0),
      NativeType::I64 => Expr::I64Const(0),
      NativeType::F32 => Expr::F32Const(0.0),
      NativeType::F64 => Expr::F64Const(0.0),
      NativeType::None => Expr::Nop,
    }
  }
  #[must_use] pub fn native_one(self, pointer_size: u32) -> Expr {
    match self.native_type(pointer_size) {
      NativeType::I32 => Expr::I32Const(1),
      NativeType::I64 => Expr::I64Const(1),
      NativeType::F32 => Expr::F32Const(1.0),
      NativeType::F64 => Expr::F64Const(1.0),
      NativeType::None => Expr::Nop,
    }
  }

  /// The signed/unsigned integer type of the same bit width, used as the
  /// "companion" type for bitwise operations on floats (bit-pattern
  /// reinterpretation).
  #[must_use] pub fn bitwise_companion(self) -> Type {
    match self.kind {
      TypeKind::F32 => Type::new(TypeKind::U32),
      TypeKind::F64 => Type::new(TypeKind::U64),
      _ => self,
    }
  }

  /// A numeric rank used only to order types within [`commonCompatible`]:
  /// wider/more-general types have a higher rank. Floats outrank integers
  /// of the same or smaller width; `i64`/`u64` outrank all 32-bit-or-
  /// narrower integers.
  fn rank(self) -> u8 {
    match self.kind {
      TypeKind::Bool => 0,
      TypeKind::I8 | TypeKind::U8 => 1,
      TypeKind::I16 | TypeKind::U16 => 2,
      TypeKind::I32 | TypeKind::U32 | TypeKind::Isize | TypeKind::Usize => 3,
      TypeKind::I64 | TypeKind::U64 => 4,
      TypeKind::F32 => 5,
      TypeKind::F64 => 6,
      TypeKind::Void | TypeKind::Reference(_) => u8::MAX,
    }
  }
}

/// How a [`convert`] call was requested: implicit conversions emit a
/// diagnostic if they are not sound; explicit (`as`) conversions never do.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ConvertKind { Implicit, Explicit }

/// `commonCompatible(a, b, signednessIsSignificant) -> Option<Type>` (§4.1).
/// Returns the smallest type both `a` and `b` are assignable to, or `None`
/// if no common type exists (e.g. two unrelated reference types, or signed
/// vs. unsigned when `signedness_is_significant`).
#[must_use]
pub fn common_compatible(a: Type, b: Type, signedness_is_significant: bool) -> Option<Type> {
  if a.is_reference() || b.is_reference() {
    return if a.kind == b.kind { Some(a) } else { None };
  }
  if a.is_void() || b.is_void() { return None }
  if signedness_is_significant
    && a.is_integer() && b.is_integer() && !a.is_float() && !b.is_float()
    && a.is_signed() != b.is_signed() && a.rank() == b.rank()
  {
    return None;
  }
  Some(if a.rank() >= b.rank() { a } else { b })
}

/// `convert(expr, from, to, kind, wrap)` (§4.1). Lowers `expr` (already of
/// type `from`) to an expression of type `to`, inserting whatever
/// promote/demote/truncate/extend/wrap ops are required, and reports a
/// diagnostic through `diag` for unsound implicit conversions. `diag` takes
/// a message; the caller supplies the span.
pub fn convert(
  expr: Expr,
  from: Type,
  to: Type,
  kind: ConvertKind,
  wrap: bool,
  features: crate::Features,
  mut diag: impl FnMut(&str),
) -> Expr {
  if from.is_void() && to.is_void() {
    unreachable!("void -> void conversion requested");
  }
  if to.is_void() {
    return Expr::Drop(Box::new(expr));
  }
  if from.is_void() {
    diag("cannot use a void expression as a value");
    return Expr::Unreachable;
  }
  if kind == ConvertKind::Implicit && !is_assignable(from, to) {
    diag("not assignable");
  }

  let mut e = expr;
  if from.is_float() && to.is_float() {
    e = match (from.kind, to.kind) {
      (TypeKind::F64, TypeKind::F32) => Expr::Convert(Cvtop::DemoteF64ToF32, Box::new(e)),
      (TypeKind::F32, TypeKind::F64) => Expr::Convert(Cvtop::PromoteF32ToF64, Box::new(e)),
      _ => e,
    };
  } else if from.is_float() && to.is_integer() {
    let signed = to.is_signed();
    e = match (from.kind, to.is_long()) {
      (TypeKind::F32, false) => Expr::Convert(Cvtop::TruncF32ToI32 { signed }, Box::new(e)),
      (TypeKind::F64, false) => Expr::Convert(Cvtop::TruncF64ToI32 { signed }, Box::new(e)),
      (TypeKind::F32, true) => Expr::Convert(Cvtop::TruncF32ToI64 { signed }, Box::new(e)),
      (TypeKind::F64, true) => Expr::Convert(Cvtop::TruncF64ToI64 { signed }, Box::new(e)),
      _ => unreachable!(),
    };
  } else if from.is_integer() && to.is_float() {
    let signed = from.is_signed();
    e = match (from.is_long(), to.kind) {
      (false, TypeKind::F32) => Expr::Convert(Cvtop::ConvertI32ToF32 { signed }, Box::new(e)),
      (false, TypeKind::F64) => Expr::Convert(Cvtop::ConvertI32ToF64 { signed }, Box::new(e)),
      (true, TypeKind::F32) => Expr::Convert(Cvtop::ConvertI64ToF32 { signed }, Box::new(e)),
      (true, TypeKind::F64) => Expr::Convert(Cvtop::ConvertI64ToF64 { signed }, Box::new(e)),
      _ => unreachable!(),
    };
  } else if from.is_integer() && to.is_integer() {
    if from.is_long() && !to.is_long() {
      e = Expr::Convert(Cvtop::WrapI64ToI32, Box::new(e));
    } else if !from.is_long() && to.is_long() {
      // Re-wrap a narrower-than-32 source before extending so garbage bits
      // above the logical width do not leak into the upper 32 bits (§4.1).
      if from.is_short() {
        e = ensure_small_integer_wrap(e, from, features);
      }
      e = Expr::Convert(Cvtop::ExtendI32ToI64 { signed: from.is_signed() }, Box::new(e));
    }
  }

  if wrap && to.is_short() {
    e = ensure_small_integer_wrap(e, to, features);
  }
  e
}

fn is_assignable(from: Type, to: Type) -> bool {
  if from.kind == to.kind { return true }
  if from.is_reference() || to.is_reference() { return false }
  if from.is_void() || to.is_void() { return false }
  // Widening is always assignable; narrowing requires an explicit cast.
  from.rank() <= to.rank() && from.is_float() == to.is_float()
}

/// `ensureSmallIntegerWrap(expr, type)` (§4.1). Clears garbage bits of a
/// logical 8/16/1-bit value living in a 32-bit native slot.
#[must_use]
pub fn ensure_small_integer_wrap(expr: Expr, ty: Type, features: crate::Features) -> Expr {
  use crate::ir::{Binop, Cvtop};
  if features.contains(crate::Features::SIGN_EXTENSION) && ty.is_signed() {
    let cvt = match ty.kind {
      TypeKind::I8 => Cvtop::Extend8SI32,
      TypeKind::I16 => Cvtop::Extend16SI32,
      _ => return expr,
    };
    return Expr::Convert(cvt, Box::new(expr));
  }
  match ty.kind {
    TypeKind::Bool => Expr::Binary(Binop::AndI32, Box::new(expr), Box::new(Expr::I32Const(1))),
    TypeKind::U8 => Expr::Binary(Binop::AndI32, Box::new(expr), Box::new(Expr::I32Const(0xff))),
    TypeKind::U16 => Expr::Binary(Binop::AndI32, Box::new(expr), Box::new(Expr::I32Const(0xffff))),
    TypeKind::I8 => shift_wrap(expr, 24),
    TypeKind::I16 => shift_wrap(expr, 16),
    _ => expr,
  }
}

fn shift_wrap(expr: Expr, bits: i32) -> Expr {
  use crate::ir::Binop;
  let shl = Expr::Binary(Binop::ShlI32, Box::new(expr), Box::new(Expr::I32Const(bits)));
  Expr::Binary(Binop::ShrSI32, Box::new(shl), Box::new(Expr::I32Const(bits)))
}

/// `makeIsTrueish(expr, type)` (§4.1). `already_wrapped` lets the caller
/// (via `Flow::local_is_wrapped`/`Flow::can_overflow`) skip a redundant wrap
/// for short-integer operands known to already hold a canonical value.
#[must_use]
pub fn make_is_trueish(expr: Expr, ty: Type, already_wrapped: bool, features: crate::Features) -> Expr {
  use crate::ir::{Binop, Unop};
  if ty.is_short() && !already_wrapped {
    let wrapped = ensure_small_integer_wrap(expr, ty, features);
    return Expr::Unary(Unop::EqzI32, Box::new(Expr::Unary(Unop::EqzI32, Box::new(wrapped))));
  }
  match ty.native_type(32) {
    NativeType::I32 if ty.is_short() => expr,
    NativeType::I32 => expr,
    NativeType::I64 => Expr::Binary(Binop::NeI64, Box::new(expr), Box::new(Expr::I64Const(0))),
    NativeType::F32 => Expr::Binary(Binop::NeF32, Box::new(expr), Box::new(Expr::F32Const(0.0))),
    NativeType::F64 => Expr::Binary(Binop::NeF64, Box::new(expr), Box::new(Expr::F64Const(0.0))),
    NativeType::None => expr,
  }
}

/// `makeIsFalseish(expr, type)` — the logical negation of
/// [`make_is_trueish`], built the same way rather than wrapping it in a
/// `not`, so that e.g. the 64-bit/float cases emit a single comparison.
#[must_use]
pub fn make_is_falseish(expr: Expr, ty: Type, already_wrapped: bool, features: crate::Features) -> Expr {
  use crate::ir::{Binop, Unop};
  if ty.is_short() && !already_wrapped {
    let wrapped = ensure_small_integer_wrap(expr, ty, features);
    return Expr::Unary(Unop::EqzI32, Box::new(wrapped));
  }
  match ty.native_type(32) {
    NativeType::I32 => Expr::Unary(Unop::EqzI32, Box::new(expr)),
    NativeType::I64 => Expr::Binary(Binop::EqI64, Box::new(expr), Box::new(Expr::I64Const(0))),
    NativeType::F32 => Expr::Binary(Binop::EqF32, Box::new(expr), Box::new(Expr::F32Const(0.0))),
    NativeType::F64 => Expr::Binary(Binop::EqF64, Box::new(expr), Box::new(Expr::F64Const(0.0))),
    NativeType::None => expr,
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn common_compatible_widens_to_larger_rank() {
    let i32_ = Type::new(TypeKind::I32);
    let i64_ = Type::new(TypeKind::I64);
    assert_eq!(common_compatible(i32_, i64_, true), Some(i64_));
    assert_eq!(common_compatible(i64_, i32_, true), Some(i64_));
  }

  #[test]
  fn common_compatible_rejects_signedness_mismatch_same_rank() {
    let i32_ = Type::new(TypeKind::I32);
    let u32_ = Type::new(TypeKind::U32);
    assert_eq!(common_compatible(i32_, u32_, true), None);
    assert!(common_compatible(i32_, u32_, false).is_some());
  }

  #[test]
  fn wrap_i8_without_sign_extension_uses_shift_pair() {
    let features = crate::Features::empty();
    let e = ensure_small_integer_wrap(Expr::GetLocal(crate::ir::LocalId(0)), Type::new(TypeKind::I8), features);
    match e {
      Expr::Binary(crate::ir::Binop::ShrSI32, lhs, _) => {
        assert!(matches!(*lhs, Expr::Binary(crate::ir::Binop::ShlI32, ..)));
      }
      _ => panic!("expected shift pair, got {e:?}"),
    }
  }

  #[test]
  fn wrap_i8_with_sign_extension_uses_extend8s() {
    let features = crate::Features::SIGN_EXTENSION;
    let e = ensure_small_integer_wrap(Expr::GetLocal(crate::ir::LocalId(0)), Type::new(TypeKind::I8), features);
    assert!(matches!(e, Expr::Convert(Cvtop::Extend8SI32, _)));
  }
}

//! Declaration lowering (C6). Each `ensure_*_compiled` entry point is
//! idempotent — memoised by `ElementFlags::COMPILED` — so it is safe to call
//! from wherever a declaration is first referenced: the top-level driver
//! (C5), a call site (C9), or a function-table entry (C4).

use smallvec::SmallVec;

use crate::diagnostics::DiagnosticCode;
use crate::flow::{Flow, FlowFlags};
use crate::ir::{self, Expr, NativeType};
use crate::types::element::{
  ClassId, ElementFlags, EnumId, Function, FunctionId, GlobalId, Local, Signature,
};
use crate::types::ty::Type;
use crate::Compiler;

/// Build the IR-level signature for a source-level [`Signature`], folding
/// `this` in as the leading parameter when present (§3 "Function").
fn ir_signature(compiler: &Compiler, sig: &Signature) -> ir::Signature {
  let pointer_size = compiler.pointer_size();
  let mut params: SmallVec<[NativeType; 4]> = SmallVec::new();
  if let Some(this_ty) = sig.this_type {
    params.push(this_ty.native_type(pointer_size));
  }
  params.extend(sig.params.iter().map(|t| t.native_type(pointer_size)));
  ir::Signature { params, result: sig.return_type.native_type(pointer_size) }
}

/// `ensureFunctionCompiled(f)` (§4.6 "Functions"). Declares `f`'s IR function
/// before lowering its body so that recursive/mutually recursive calls
/// resolve, pushes the root `Flow` statement lowering relies on (see the
/// module doc on [`crate::stmt`]), and — for `main` — wraps the compiled
/// body with the `~started` guard that boots the synthetic start function.
pub fn ensure_function_compiled(compiler: &mut Compiler, f: FunctionId) {
  if compiler.functions.get(f).is_compiled() { return }
  compiler.functions.get_mut(f).flags |= ElementFlags::COMPILED;

  let func = compiler.functions.get(f).clone();

  if func.flags.contains(ElementFlags::AMBIENT) {
    if func.body.is_some() {
      compiler.diagnostics.warn(DiagnosticCode::OperationNotSupported, "ambient function declared with a body; the body is ignored", None);
    }
    compile_ambient_function(compiler, f, &func);
    return;
  }
  if func.body.is_none() {
    compiler.diagnostics.error(DiagnosticCode::OperationNotSupported, "function is missing a body", None);
  }

  let sig_ir = ir_signature(compiler, &func.signature);
  let ty = compiler.module.intern_type(sig_ir);
  let name_str = compiler.interner.resolve(func.name).to_owned();
  let func_id = compiler.module.declare_function(ty, name_str.clone());
  compiler.functions.get_mut(f).compiled_ir = Some(func_id);

  let prev_function = compiler.current_function;
  compiler.current_function = Some(f);

  let body_label = compiler.interner.intern(&format!("{name_str}|body"));
  let mut root = func.flow.clone();
  root.return_label = Some(body_label);
  compiler.flow_stack.push(root);
  compiler.push_label(body_label);

  let mut index = u32::from(func.signature.has_this());
  for (i, &pname) in func.param_names.iter().enumerate() {
    let local = Local { name: pname, ty: func.signature.params[i], flags: ElementFlags::empty(), index: Some(index), constant_value: None };
    compiler.flow().declare_local(pname, local);
    index += 1;
  }

  let mut body = Vec::new();
  for stmt in &func.body.clone().unwrap_or_default() {
    crate::stmt::compile_statement(compiler, stmt, &mut body);
  }

  if func.flags.contains(ElementFlags::CONSTRUCTOR) && !compiler.flow().flags.contains(FlowFlags::ALLOCATES) {
    prepend_constructor_prologue(compiler, &func, &mut body);
  }

  compiler.pop_label();
  compiler.flow_stack.pop().expect("root flow pushed above");
  compiler.current_function = prev_function;
  compiler.functions.get_mut(f).body = None;

  if func.flags.contains(ElementFlags::MAIN) {
    body = wrap_main_body(compiler, body);
  }

  let extra_locals: Vec<NativeType> = compiler.functions.get(f).extra_locals.iter()
    .map(|t| t.native_type(compiler.pointer_size())).collect();
  compiler.module.define_function(func_id, ir::FunctionBody { locals: extra_locals, body });
}

/// `this` is never pre-allocated for a plain constructor call, only for one
/// reached through a derived class's `super(...)` (§4.6 "Constructors").
fn prepend_constructor_prologue(compiler: &mut Compiler, func: &Function, body: &mut Vec<Expr>) {
  let owner = compiler.function_prototypes.get(func.prototype).owner
    .expect("a CONSTRUCTOR-flagged function must have an owning class");
  let this_local = ir::LocalId(0);
  // The constructor's own parameters are declared right after `this`
  // (see the `index` walk in `ensure_function_compiled`); promoted
  // `constructor(public x: T)` fields read from there.
  let ctor_param_base = u32::from(func.signature.has_this());
  let prologue = crate::expr::make_conditional_allocate(compiler, owner, this_local, ctor_param_base);
  body.insert(0, Expr::TeeLocal(this_local, Box::new(prologue)));
}

/// `main`'s body runs behind a one-shot guard so that a module with both a
/// user `main` and top-level side effects still runs those side effects
/// exactly once, on first call (§4.6 "Functions").
fn wrap_main_body(compiler: &mut Compiler, mut body: Vec<Expr>) -> Vec<Expr> {
  let started = ensure_started_global(compiler);
  let start_fn = compiler.start_function.expect("the driver creates the synthetic start function before any declaration is lowered");
  let start_ir = compiler.functions.get(start_fn).compiled_ir
    .expect("the driver declares the synthetic start function's IR id up front");
  let guard = Expr::If {
    ty: NativeType::None,
    cond: Box::new(Expr::Unary(crate::ir::Unop::EqzI32, Box::new(Expr::GetGlobal(started)))),
    then: vec![
      Expr::Call { func: start_ir, args: Vec::new() },
      Expr::SetGlobal(started, Box::new(Expr::I32Const(1))),
    ],
    els: Vec::new(),
  };
  let mut out = vec![guard];
  out.append(&mut body);
  out
}

/// Lazily create the `~started` global, a single instance per module (§5).
fn ensure_started_global(compiler: &mut Compiler) -> ir::GlobalId {
  if let Some(id) = compiler.started_global { return id }
  let id = compiler.module.add_global(NativeType::I32, true, Expr::I32Const(0), Some("~started".into()));
  compiler.started_global = Some(id);
  id
}

fn compile_ambient_function(compiler: &mut Compiler, f: FunctionId, func: &Function) {
  let (module_sym, name_sym) = compiler.function_prototypes.get(func.prototype).import
    .expect("an ambient function must carry an import module/name pair");
  let module = compiler.interner.resolve(module_sym).to_owned();
  let name = compiler.interner.resolve(name_sym).to_owned();
  let sig_ir = ir_signature(compiler, &func.signature);
  let ty = compiler.module.intern_type(sig_ir);
  let func_id = compiler.module.add_import(&module, &name, ty);
  compiler.functions.get_mut(f).compiled_ir = Some(func_id);
}

/// `ensureGlobalCompiled(g)` (§4.6 "Globals"). Returns the global's type, so
/// callers that only need to typecheck a reference do not also need to look
/// it up a second time.
///
/// Ambient globals become imports in the spec's own toolchain; the IR this
/// workspace builds into (`crate::ir::Module`) has no global-import vector
/// (only function imports), so an ambient global instead falls back to an
/// ordinary zero-initialised mutable global, with a diagnostic noting the
/// gap. Likewise, a global whose initialiser does not precompute to a
/// constant would normally be scheduled into the start function; this
/// workspace's `Global` element carries no raw initialiser `Node` (only
/// `inlined_value`, set once the value *has* precomputed), so that path
/// degrades the same way.
pub fn ensure_global_compiled(compiler: &mut Compiler, g: GlobalId) -> Type {
  let global = compiler.globals.get(g).clone();
  if global.flags.contains(ElementFlags::COMPILED) { return global.ty }
  compiler.globals.get_mut(g).flags |= ElementFlags::COMPILED;

  // A constant whose initializer precomputed to a literal is never emitted
  // as an IR global at all; reads substitute `inlined_value` directly
  // (`expr.rs::compile_identifier`), so there is nothing left to do here.
  if global.inlined_value.is_some() { return global.ty }

  if global.flags.contains(ElementFlags::AMBIENT) {
    if let Some((module_sym, name_sym)) = global.import {
      let module = compiler.interner.resolve(module_sym);
      let name = compiler.interner.resolve(name_sym);
      compiler.diagnostics.warn(
        DiagnosticCode::OperationNotSupported,
        format!("imported global `{module}.{name}` is not representable as a Wasm global import here; falling back to a zero-initialised global"),
        None,
      );
    }
  } else {
    compiler.diagnostics.warn(
      DiagnosticCode::NonConstantInitializer,
      "global initialiser does not precompute to a constant; module-level side effects on globals are not supported in this workspace",
      None,
    );
  }

  let pointer_size = compiler.pointer_size();
  let native = global.ty.native_type(pointer_size);
  let mutable = !global.flags.contains(ElementFlags::CONST);
  let init = global.ty.native_zero(pointer_size);
  let name = compiler.interner.resolve(global.name).to_owned();
  let id = compiler.module.add_global(native, mutable, init, Some(name));
  compiler.globals.get_mut(g).compiled_ir = Some(id);
  global.ty
}

/// `ensureEnumCompiled(e)` (§4.6 "Enums"). Every member is resolved to a
/// plain `i32`; a missing initialiser is `previous + 1` (`0` for the first
/// member). Since `EnumValue` carries the already-evaluated `i32` rather
/// than a raw initialiser `Node`, the "previous value itself had to be
/// emitted into the start function" error case from the spec's wording can
/// never arise here — every member value is known at this point.
///
/// A `const enum`'s members fold to `inlined_value` literals and are never
/// materialised as IR globals at all (§8 "Const-enum propagation"); a
/// regular enum's members each become their own immutable global, exactly
/// like a non-const [`Global`].
pub fn ensure_enum_compiled(compiler: &mut Compiler, e: EnumId) {
  if compiler.enums.get(e).flags.contains(ElementFlags::COMPILED) { return }
  compiler.enums.get_mut(e).flags |= ElementFlags::COMPILED;

  let is_const = compiler.enums.get(e).flags.contains(ElementFlags::CONST);
  let enum_name = compiler.interner.resolve(compiler.enums.get(e).name).to_owned();
  let member_count = compiler.enums.get(e).members.len();
  let mut previous: i32 = -1;
  for i in 0..member_count {
    let member = compiler.enums.get(e).members[i].clone();
    let value = member.value.unwrap_or_else(|| previous.wrapping_add(1));
    previous = value;
    if is_const {
      compiler.enums.get_mut(e).members[i].inlined_value = Some(Expr::I32Const(value));
      continue
    }
    let member_name = compiler.interner.resolve(member.name).to_owned();
    let id = compiler.module.add_global(NativeType::I32, false, Expr::I32Const(value), Some(format!("{enum_name}.{member_name}")));
    compiler.enums.get_mut(e).members[i].compiled_ir = Some(id);
  }
}

/// `compileClass(c)` (§4.6 "Classes"): statics, then the constructor, then
/// instance methods and operator overloads. Fields carry no code of their
/// own — their layout was precomputed by the resolver — so they are only
/// marked compiled.
pub fn compile_class(compiler: &mut Compiler, c: ClassId) {
  if compiler.classes.get(c).flags.contains(ElementFlags::COMPILED) { return }
  compiler.classes.get_mut(c).flags |= ElementFlags::COMPILED;

  for field_id in compiler.classes.get(c).fields.clone() {
    compiler.fields.get_mut(field_id).flags |= ElementFlags::COMPILED;
  }

  let methods = compiler.classes.get(c).methods.clone();
  let (statics, instance): (Vec<FunctionId>, Vec<FunctionId>) = methods.into_iter()
    .partition(|&m| compiler.functions.get(m).flags.contains(ElementFlags::STATIC));

  for m in statics { ensure_function_compiled(compiler, m); }
  if let Some(ctor) = compiler.classes.get(c).constructor {
    ensure_function_compiled(compiler, ctor);
  }
  for m in instance { ensure_function_compiled(compiler, m); }
  for (_, f) in compiler.classes.get(c).operators.clone() { ensure_function_compiled(compiler, f); }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::types::element::{DecoratorFlags, Enum, EnumValue, FunctionPrototype, Global};
  use crate::types::ty::TypeKind;
  use crate::CompilerOptions;

  fn push_fn(compiler: &mut Compiler, name: &str, body: Vec<crate::types::program::Stmt>, return_type: Type) -> FunctionId {
    let sym = compiler.interner.intern(name);
    let proto = compiler.function_prototypes.push(FunctionPrototype {
      name: sym, flags: ElementFlags::empty(), decorators: DecoratorFlags::empty(),
      operator: None, owner: None, import: None, instances: Vec::new(),
    });
    compiler.functions.push(Function {
      prototype: proto,
      signature: Signature { params: SmallVec::new(), required: 0, return_type, this_type: None },
      flags: ElementFlags::empty(),
      name: sym,
      param_names: Vec::new(),
      extra_locals: Vec::new(),
      flow: Flow::new(return_type),
      trampoline: None,
      table_index: -1,
      next_inline_id: 0,
      compiled_ir: None,
      optional_initializers: Vec::new(),
      body: Some(body),
    })
  }

  #[test]
  fn compiling_a_function_assigns_compiled_ir_and_sets_the_flag() {
    let mut compiler = Compiler::new(CompilerOptions::default());
    let f = push_fn(&mut compiler, "f", vec![crate::types::program::Stmt::Return(Some(crate::types::program::Node::IntLiteral(1)))], Type::new(TypeKind::I32));
    ensure_function_compiled(&mut compiler, f);
    assert!(compiler.functions.get(f).is_compiled());
    assert!(compiler.functions.get(f).compiled_ir.is_some());
  }

  #[test]
  fn compiling_a_function_twice_is_a_no_op() {
    let mut compiler = Compiler::new(CompilerOptions::default());
    let f = push_fn(&mut compiler, "f", Vec::new(), Type::new(TypeKind::Void));
    ensure_function_compiled(&mut compiler, f);
    let first = compiler.functions.get(f).compiled_ir;
    ensure_function_compiled(&mut compiler, f);
    assert_eq!(compiler.functions.get(f).compiled_ir, first);
  }

  #[test]
  fn constant_global_initialiser_is_used_directly() {
    let mut compiler = Compiler::new(CompilerOptions::default());
    let name = compiler.interner.intern("X");
    let g = compiler.globals.push(Global {
      name, ty: Type::new(TypeKind::I32), flags: ElementFlags::CONST,
      import: None, compiled_ir: None, inlined_value: Some(Expr::I32Const(42)),
    });
    let ty = ensure_global_compiled(&mut compiler, g);
    assert_eq!(ty.kind, TypeKind::I32);
    assert!(compiler.globals.get(g).flags.contains(ElementFlags::COMPILED));
    assert!(compiler.globals.get(g).compiled_ir.is_none(), "an inlined constant is never emitted as an IR global");
    assert!(compiler.module.globals.is_empty());
  }

  #[test]
  fn enum_members_default_to_previous_plus_one() {
    let mut compiler = Compiler::new(CompilerOptions::default());
    let name = compiler.interner.intern("Color");
    let red = compiler.interner.intern("Red");
    let green = compiler.interner.intern("Green");
    let blue = compiler.interner.intern("Blue");
    let e = compiler.enums.push(Enum {
      name,
      flags: ElementFlags::empty(),
      members: vec![
        EnumValue { name: red, flags: ElementFlags::empty(), value: Some(5), compiled_ir: None, inlined_value: None },
        EnumValue { name: green, flags: ElementFlags::empty(), value: None, compiled_ir: None, inlined_value: None },
        EnumValue { name: blue, flags: ElementFlags::empty(), value: None, compiled_ir: None, inlined_value: None },
      ],
    });
    ensure_enum_compiled(&mut compiler, e);
    let members = &compiler.enums.get(e).members;
    let value_of = |id: GlobalId| match compiler.module.globals[id.0 as usize].2 { Expr::I32Const(v) => v, _ => panic!("expected i32 const") };
    assert_eq!(value_of(members[0].compiled_ir.unwrap()), 5);
    assert_eq!(value_of(members[1].compiled_ir.unwrap()), 6);
    assert_eq!(value_of(members[2].compiled_ir.unwrap()), 7);
  }

  #[test]
  fn enum_member_missing_initializer_defaults_to_zero_when_first() {
    let mut compiler = Compiler::new(CompilerOptions::default());
    let name = compiler.interner.intern("E");
    let a = compiler.interner.intern("A");
    let e = compiler.enums.push(Enum {
      name, flags: ElementFlags::empty(),
      members: vec![EnumValue { name: a, flags: ElementFlags::empty(), value: None, compiled_ir: None, inlined_value: None }],
    });
    ensure_enum_compiled(&mut compiler, e);
    let id = compiler.enums.get(e).members[0].compiled_ir.unwrap();
    assert!(matches!(compiler.module.globals[id.0 as usize].2, Expr::I32Const(0)));
  }

  #[test]
  fn const_enum_members_fold_to_inlined_literals_with_no_ir_global() {
    let mut compiler = Compiler::new(CompilerOptions::default());
    let name = compiler.interner.intern("E");
    let a = compiler.interner.intern("A");
    let b = compiler.interner.intern("B");
    let c = compiler.interner.intern("C");
    let e = compiler.enums.push(Enum {
      name, flags: ElementFlags::CONST,
      members: vec![
        EnumValue { name: a, flags: ElementFlags::empty(), value: Some(0), compiled_ir: None, inlined_value: None },
        EnumValue { name: b, flags: ElementFlags::empty(), value: Some(1), compiled_ir: None, inlined_value: None },
        EnumValue { name: c, flags: ElementFlags::empty(), value: Some(1), compiled_ir: None, inlined_value: None },
      ],
    });
    ensure_enum_compiled(&mut compiler, e);
    let members = &compiler.enums.get(e).members;
    for m in members { assert!(m.compiled_ir.is_none(), "a const enum member is never emitted as an IR global"); }
    assert!(matches!(members[2].inlined_value, Some(Expr::I32Const(1))));
    assert!(compiler.module.globals.is_empty());
  }
}

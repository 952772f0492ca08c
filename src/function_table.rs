//! Function table & trampolines (C4). Indirect-call target indexing, and
//! synthesis of trampoline wrappers that fill in omitted optional
//! arguments (§4.4).

use crate::ir::{Binop, Expr, Label, LocalId, NativeType};
use crate::types::element::{ElementFlags, Function, FunctionId};
use crate::Compiler;

/// `ensureFunctionTableEntry(f)` (§4.4). If `f` has optional parameters and
/// is not itself already a trampoline, the table entry names the
/// trampoline rather than `f` directly (§3 Invariants: "Every
/// function-table slot names a compiled function; if the function has
/// optional parameters it is a trampoline.").
pub fn ensure_function_table_entry(compiler: &mut Compiler, f: FunctionId) -> u32 {
  let func = compiler.functions.get(f);
  let target = if func.signature.has_optional() && !func.is_trampoline() {
    ensure_trampoline(compiler, f)
  } else {
    f
  };
  crate::decls::ensure_function_compiled(compiler, target);
  let func_ir = compiler.functions.get(target).compiled_ir.expect("just compiled");
  if compiler.functions.get(target).table_index >= 0 {
    return u32::try_from(compiler.functions.get(target).table_index).unwrap();
  }
  let idx = compiler.module.add_table_entry(func_ir);
  compiler.functions.get_mut(target).table_index = i32::try_from(idx).unwrap();
  idx
}

/// Lazily synthesise the trampoline for `f`, a single instance per
/// original function (§3 "Function": "an optional trampoline reference").
pub fn ensure_trampoline(compiler: &mut Compiler, f: FunctionId) -> FunctionId {
  if let Some(t) = compiler.functions.get(f).trampoline {
    return t;
  }
  debug_assert!(!compiler.functions.get(f).is_trampoline(), "cannot trampoline a trampoline");

  let orig = compiler.functions.get(f).clone();
  let sig = orig.signature.clone();
  let min_args = sig.required;
  let num_optional = sig.params.len() - min_args;
  let pointer_size = compiler.pointer_size();

  let mut locals = Vec::new();
  let this_local = if sig.has_this() {
    let l = LocalId(u32::try_from(locals.len()).unwrap());
    locals.push(sig.this_type.unwrap().native_type(pointer_size));
    Some(l)
  } else {
    None
  };
  let param_locals: Vec<LocalId> = sig.params.iter().map(|t| {
    let l = LocalId(u32::try_from(locals.len()).unwrap());
    locals.push(t.native_type(pointer_size));
    l
  }).collect();

  let name_str = format!("{}|trampoline", compiler.interner.resolve(orig.name));
  let trampoline_name = compiler.interner.intern(&name_str);
  let trampoline = Function {
    prototype: orig.prototype,
    signature: all_required_signature(&sig),
    flags: (orig.flags & !ElementFlags::COMPILED) | ElementFlags::TRAMPOLINE,
    name: trampoline_name,
    param_names: orig.param_names.clone(),
    extra_locals: Vec::new(),
    flow: crate::flow::Flow::new(sig.return_type),
    trampoline: None,
    table_index: -1,
    next_inline_id: 0,
    compiled_ir: None,
    optional_initializers: Vec::new(),
    body: None,
  };
  let trampoline_id = compiler.functions.push(trampoline);
  compiler.functions.get_mut(f).trampoline = Some(trampoline_id);

  // Compile the optional initialisers in the trampoline's own scope (§4.4:
  // "compiled in the trampoline's function scope so they may introduce
  // locals and reference `this`").
  compiler.current_function = Some(trampoline_id);
  let mut scope = crate::flow::Flow::new(sig.return_type);
  for (i, name) in orig.param_names.iter().enumerate().take(min_args) {
    scope.declare_local(*name, crate::types::element::Local {
      name: *name, ty: sig.params[i], flags: ElementFlags::empty(), index: Some(param_locals[i].0), constant_value: None,
    });
  }
  compiler.flow_stack.push(scope);
  let optional_types = &sig.params[min_args..];
  let optional_locals = &param_locals[min_args..];
  let initializers: Vec<Expr> = orig.optional_initializers.iter().zip(optional_types)
    .map(|(node, ty)| crate::expr::compile_expression(compiler, node, Some(*ty), crate::types::ty::ConvertKind::Implicit, true))
    .collect();
  compiler.flow_stack.pop();
  compiler.current_function = None;

  let argc = crate::call::ensure_argc_global(compiler);
  let dispatch = build_dispatch(min_args, num_optional, optional_locals, initializers, argc);

  let mut forwarded: Vec<Expr> = this_local.into_iter().map(Expr::GetLocal).collect();
  forwarded.extend(param_locals.iter().map(|&l| Expr::GetLocal(l)));
  crate::decls::ensure_function_compiled(compiler, f);
  let orig_ir = compiler.functions.get(f).compiled_ir.unwrap();
  let is_import = orig.flags.contains(ElementFlags::MODULE_IMPORT);
  let call = if is_import { Expr::CallImport { func: orig_ir, args: forwarded } } else { Expr::Call { func: orig_ir, args: forwarded } };

  let result_ty = sig.return_type.native_type(pointer_size);
  let body = vec![dispatch, call];
  let params: smallvec::SmallVec<[NativeType; 4]> = locals.iter().copied().collect();
  let ty = compiler.module.intern_type(crate::ir::Signature { params, result: result_ty });
  let func_name = compiler.interner.resolve(compiler.functions.get(trampoline_id).name).to_owned();
  let func_id = compiler.module.declare_function(ty, func_name);
  compiler.module.define_function(func_id, crate::ir::FunctionBody { locals: Vec::new(), body });
  let t = compiler.functions.get_mut(trampoline_id);
  t.compiled_ir = Some(func_id);
  t.flags |= ElementFlags::COMPILED;

  trampoline_id
}

fn build_dispatch(
  min_args: usize,
  num_optional: usize,
  optional_locals: &[LocalId],
  initializers: Vec<Expr>,
  argc: crate::ir::GlobalId,
) -> Expr {
  let index = Expr::Binary(
    Binop::SubI32,
    Box::new(Expr::GetGlobal(argc)),
    Box::new(Expr::I32Const(i32::try_from(min_args).unwrap())),
  );
  let targets: Vec<Label> = (0..=num_optional).map(|s| Label(u32::try_from(s + 1).unwrap())).collect();
  let switch = Expr::BrTable { targets, default: Label(0), index: Box::new(index) };
  let out_of_range = Expr::Block { ty: NativeType::None, body: vec![switch] };
  let mut body = Expr::Block { ty: NativeType::None, body: vec![out_of_range, Expr::Unreachable] };
  for (i, init) in initializers.into_iter().enumerate() {
    body = Expr::Block {
      ty: NativeType::None,
      body: vec![body, Expr::SetLocal(optional_locals[i], Box::new(init))],
    };
  }
  body
}

use crate::types::element::Signature;

/// A trampoline's own signature always treats every operand as required:
/// it is the caller that decides (via `~argc`) how many were "really"
/// supplied, not the Wasm-level arity.
fn all_required_signature(sig: &Signature) -> Signature {
  Signature { params: sig.params.clone(), required: sig.params.len(), return_type: sig.return_type, this_type: sig.this_type }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn dispatch_targets_count_matches_optional_count_plus_one() {
    let argc = crate::ir::GlobalId(0);
    let locals = [LocalId(1)];
    let dispatch = build_dispatch(1, 1, &locals, vec![Expr::I32Const(2)], argc);
    match dispatch {
      Expr::Block { body, .. } => {
        assert_eq!(body.len(), 2);
      }
      _ => panic!("expected wrapping block"),
    }
  }
}

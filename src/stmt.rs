//! Statement lowering (C7, §4.7). Each arm appends its emitted `Expr`(s) to
//! the caller-supplied `out` vector rather than returning a single `Expr`,
//! since a statement can expand to more than one top-level instruction (a
//! `let` is a `set_local` instruction distinct from any expression that
//! follows it in the same block).
//!
//! Contract this module relies on (upheld by whichever scope pushes the
//! root `Flow` for a function body — `decls.rs` for an ordinary call,
//! `expr_call.rs` for an inlined one): `compiler.flow().return_label` is
//! always `Some`, and that label is on `compiler.label_stack`, for the
//! entire duration of compiling that body. A `return` statement is just a
//! `Br` to it; there is no separate function-return IR node (§ GLOSSARY
//! "Native type" — bodies are `Vec<Expr>`, not statement lists with a
//! dedicated `return`).

use crate::diagnostics::DiagnosticCode;
use crate::flow::FlowFlags;
use crate::ir::{Binop, Expr, Label, NativeType};
use crate::types::element::{ElementFlags, Local};
use crate::types::program::{Node, Stmt};
use crate::types::ty::{make_is_falseish, make_is_trueish, ConvertKind, Type, TypeKind};
use crate::Compiler;

/// `compileStatement(stmt)` (§4.7). Appends to `out` rather than returning,
/// so callers (a function body, a block, a loop) share one growing buffer.
pub fn compile_statement(compiler: &mut Compiler, stmt: &Stmt, out: &mut Vec<Expr>) {
  match stmt {
    Stmt::Expr(node) => {
      let e = crate::expr::compile_expression(compiler, node, None, ConvertKind::Implicit, true);
      out.push(if compiler.current_type.is_void() { e } else { Expr::Drop(Box::new(e)) });
    }
    Stmt::Block(stmts) => compile_block(compiler, stmts, out),
    Stmt::If { cond, then, els } => compile_if(compiler, cond, then, els.as_deref(), out),
    Stmt::While { cond, body } => compile_while(compiler, cond, body, out),
    Stmt::DoWhile { body, cond } => compile_do_while(compiler, body, cond, out),
    Stmt::For { init, cond, update, body } => compile_for(compiler, init.as_deref(), cond.as_ref(), update.as_ref(), body, out),
    Stmt::Switch { discriminant, cases, default } => compile_switch(compiler, discriminant, cases, default.as_deref(), out),
    Stmt::Return(value) => compile_return(compiler, value.as_ref(), out),
    Stmt::Break(_label) => compile_break(compiler, out),
    Stmt::Continue(_label) => compile_continue(compiler, out),
    Stmt::Throw(value) => compile_throw(compiler, value.as_ref(), out),
    Stmt::Try => {
      compiler.diagnostics.unsupported("try/catch is not supported (§1 Non-goals: exceptions)", None);
    }
    Stmt::Variable { name, ty, is_const, init } => compile_variable(compiler, *name, *ty, *is_const, init.as_ref(), out),
  }
}

fn compile_block(compiler: &mut Compiler, stmts: &[Stmt], out: &mut Vec<Expr>) {
  compiler.fork_flow();
  for s in stmts { compile_statement(compiler, s, out); }
  let child = compiler.free_flow();
  compiler.flow().inherit(&child);
}

fn compile_if(compiler: &mut Compiler, cond: &Node, then: &Stmt, els: Option<&Stmt>, out: &mut Vec<Expr>) {
  let cond_raw = crate::expr::compile_expression(compiler, cond, None, ConvertKind::Implicit, true);
  let cond_ty = compiler.current_type;
  let cond_expr = make_is_trueish(cond_raw, cond_ty, false, compiler.options.features);

  compiler.fork_flow();
  let mut then_body = Vec::new();
  compile_statement(compiler, then, &mut then_body);
  let then_flow = compiler.free_flow();

  match els {
    Some(els_stmt) => {
      compiler.fork_flow();
      let mut else_body = Vec::new();
      compile_statement(compiler, els_stmt, &mut else_body);
      let else_flow = compiler.free_flow();
      compiler.flow().inherit_mutual(&then_flow, &else_flow);
      out.push(Expr::If { ty: NativeType::None, cond: Box::new(cond_expr), then: then_body, els: else_body });
    }
    None => {
      compiler.flow().inherit_conditional(&then_flow);
      out.push(Expr::If { ty: NativeType::None, cond: Box::new(cond_expr), then: then_body, els: Vec::new() });
    }
  }
}

/// Mint a fresh `(break, continue)` label pair and push both (break
/// outermost, continue innermost) matching the `block { loop { ... } }`
/// shape every loop lowers to (§4.7).
fn new_loop_labels(compiler: &mut Compiler) -> (crate::symbol::Symbol, crate::symbol::Symbol) {
  let id = compiler.break_context_counter;
  compiler.break_context_counter += 1;
  let b = compiler.interner.intern(&format!("break|{id}"));
  let c = compiler.interner.intern(&format!("continue|{id}"));
  compiler.push_label(b);
  compiler.push_label(c);
  (b, c)
}

fn compile_while(compiler: &mut Compiler, cond: &Node, body: &Stmt, out: &mut Vec<Expr>) {
  compiler.fork_flow();
  let (break_label, continue_label) = new_loop_labels(compiler);
  compiler.flow().break_label = Some(break_label);
  compiler.flow().continue_label = Some(continue_label);

  let cond_raw = crate::expr::compile_expression(compiler, cond, None, ConvertKind::Implicit, true);
  let cond_ty = compiler.current_type;
  let exit = make_is_falseish(cond_raw, cond_ty, false, compiler.options.features);
  let break_depth = compiler.label_depth(break_label).unwrap();
  let mut loop_body = vec![Expr::BrIf { depth: Label(break_depth), cond: Box::new(exit), value: None }];
  compile_statement(compiler, body, &mut loop_body);
  let continue_depth = compiler.label_depth(continue_label).unwrap();
  loop_body.push(Expr::Br { depth: Label(continue_depth), value: None });

  compiler.pop_label();
  compiler.pop_label();
  let child = compiler.free_flow();
  compiler.flow().inherit_conditional(&child);

  out.push(Expr::Block { ty: NativeType::None, body: vec![Expr::Loop { ty: NativeType::None, body: loop_body }] });
}

fn compile_do_while(compiler: &mut Compiler, body: &Stmt, cond: &Node, out: &mut Vec<Expr>) {
  compiler.fork_flow();
  let (break_label, continue_label) = new_loop_labels(compiler);
  compiler.flow().break_label = Some(break_label);
  compiler.flow().continue_label = Some(continue_label);

  let mut loop_body = Vec::new();
  compile_statement(compiler, body, &mut loop_body);
  // A terminating body (always returns or throws) never reaches the
  // condition check at all; emitting it would be dead code (§8 "Do-while
  // always-terminating body").
  let terminating = compiler.flow().flags.intersects(FlowFlags::RETURNS | FlowFlags::THROWS);
  if !terminating {
    let cond_raw = crate::expr::compile_expression(compiler, cond, None, ConvertKind::Implicit, true);
    let cond_ty = compiler.current_type;
    let cond_expr = make_is_trueish(cond_raw, cond_ty, false, compiler.options.features);
    let continue_depth = compiler.label_depth(continue_label).unwrap();
    loop_body.push(Expr::BrIf { depth: Label(continue_depth), cond: Box::new(cond_expr), value: None });
  }

  compiler.pop_label();
  compiler.pop_label();
  let child = compiler.free_flow();
  compiler.flow().inherit_conditional(&child);

  out.push(Expr::Block { ty: NativeType::None, body: vec![Expr::Loop { ty: NativeType::None, body: loop_body }] });
}

fn compile_for(compiler: &mut Compiler, init: Option<&Stmt>, cond: Option<&Node>, update: Option<&Node>, body: &Stmt, out: &mut Vec<Expr>) {
  compiler.fork_flow();
  if let Some(init_stmt) = init { compile_statement(compiler, init_stmt, out); }

  let (break_label, continue_label) = new_loop_labels(compiler);
  compiler.flow().break_label = Some(break_label);
  compiler.flow().continue_label = Some(continue_label);

  let break_depth = compiler.label_depth(break_label).unwrap();
  let mut loop_body = Vec::new();
  if let Some(cond_node) = cond {
    let cond_raw = crate::expr::compile_expression(compiler, cond_node, None, ConvertKind::Implicit, true);
    let cond_ty = compiler.current_type;
    let exit = make_is_falseish(cond_raw, cond_ty, false, compiler.options.features);
    loop_body.push(Expr::BrIf { depth: Label(break_depth), cond: Box::new(exit), value: None });
  }
  compile_statement(compiler, body, &mut loop_body);
  if let Some(update_node) = update {
    let e = crate::expr::compile_expression(compiler, update_node, None, ConvertKind::Implicit, true);
    loop_body.push(if compiler.current_type.is_void() { e } else { Expr::Drop(Box::new(e)) });
  }
  let continue_depth = compiler.label_depth(continue_label).unwrap();
  loop_body.push(Expr::Br { depth: Label(continue_depth), value: None });

  compiler.pop_label();
  compiler.pop_label();
  let loop_flow = compiler.free_flow();
  compiler.flow().inherit_conditional(&loop_flow);
  out.push(Expr::Block { ty: NativeType::None, body: vec![Expr::Loop { ty: NativeType::None, body: loop_body }] });
}

/// `switch` (§4.7). Cases nest inside chained labelled blocks, innermost
/// case first: the dispatch (`discriminant == label_i` tested in order)
/// lives inside the innermost block and `br_if`s out to whichever case's
/// block matched, and falling out of a case's own block lands directly on
/// the next case's body — true Wasm/JS fall-through, not a re-test. A
/// `break` targets the outermost block directly, skipping every remaining
/// case.
fn compile_switch(compiler: &mut Compiler, discriminant: &Node, cases: &[crate::types::program::SwitchCase], default: Option<&[Stmt]>, out: &mut Vec<Expr>) {
  compiler.fork_flow();
  let id = compiler.break_context_counter;
  compiler.break_context_counter += 1;

  let break_label = compiler.interner.intern(&format!("switch-break|{id}"));
  compiler.flow().break_label = Some(break_label);
  compiler.push_label(break_label);

  let has_default = default.is_some();
  let default_label = has_default.then(|| {
    let l = compiler.interner.intern(&format!("switch-default|{id}"));
    compiler.push_label(l);
    l
  });
  let no_match_label = default_label.unwrap_or(break_label);

  // Push case labels innermost-last so `case_labels[0]` ends up at depth 0,
  // `case_labels[1]` at depth 1, and so on — each case's block nests inside
  // the next one's.
  let n = cases.len();
  let mut case_labels = vec![break_label; n];
  for i in (0..n).rev() {
    let l = compiler.interner.intern(&format!("switch-case|{id}|{i}"));
    compiler.push_label(l);
    case_labels[i] = l;
  }

  let dexpr = crate::expr::compile_expression(compiler, discriminant, None, ConvertKind::Implicit, true);
  let dty = compiler.current_type;
  let pointer_size = compiler.pointer_size();
  let native = dty.native_type(pointer_size);
  let eq_op = if native == NativeType::I64 { Binop::EqI64 } else { Binop::EqI32 };
  let temp = crate::expr::acquire_temp_local(compiler, dty);
  let mut dispatch = vec![Expr::SetLocal(temp, Box::new(dexpr))];
  for (i, case) in cases.iter().enumerate() {
    let label_expr = crate::expr::compile_expression(compiler, &case.label, Some(dty), ConvertKind::Implicit, true);
    let cond = Expr::Binary(eq_op, Box::new(Expr::GetLocal(temp)), Box::new(label_expr));
    let depth = compiler.label_depth(case_labels[i]).unwrap();
    dispatch.push(Expr::BrIf { depth: Label(depth), cond: Box::new(cond), value: None });
  }
  let no_match_depth = compiler.label_depth(no_match_label).unwrap();
  dispatch.push(Expr::Br { depth: Label(no_match_depth), value: None });

  let mut case_bodies: Vec<Vec<Expr>> = Vec::with_capacity(n);
  for case in cases {
    let mut body = Vec::new();
    for s in &case.body { compile_statement(compiler, s, &mut body); }
    case_bodies.push(body);
  }
  let mut default_body = Vec::new();
  if let Some(stmts) = default {
    for s in stmts { compile_statement(compiler, s, &mut default_body); }
  }

  for _ in 0..n { compiler.pop_label(); }
  if has_default { compiler.pop_label(); }
  compiler.pop_label();
  let child = compiler.free_flow();
  compiler.flow().inherit_conditional(&child);

  // Fold outward from the innermost (case 0) block: each case's body is
  // appended just after its own block closes, which is exactly where the
  // next case's block begins — so falling out of one case's block runs
  // straight into the next case's body.
  let mut block = Expr::Block { ty: NativeType::None, body: dispatch };
  for case_body in case_bodies {
    block = Expr::Block { ty: NativeType::None, body: vec![block].into_iter().chain(case_body).collect() };
  }
  if has_default {
    block = Expr::Block { ty: NativeType::None, body: vec![block].into_iter().chain(default_body).collect() };
  }
  out.push(block);
}

fn compile_return(compiler: &mut Compiler, value: Option<&Node>, out: &mut Vec<Expr>) {
  let return_ty = compiler.flow().return_type;
  let label = compiler.flow().return_label.expect("every function-body flow must set return_label before statements are compiled");
  let depth = compiler.label_depth(label).expect("return label must be on the active label stack");
  let v = value.map(|n| crate::expr::compile_expression(compiler, n, Some(return_ty), ConvertKind::Implicit, true));
  out.push(Expr::Br { depth: Label(depth), value: v.map(Box::new) });
  compiler.flow().flags |= crate::flow::FlowFlags::RETURNS;
}

fn compile_break(compiler: &mut Compiler, out: &mut Vec<Expr>) {
  let Some(label) = compiler.flow().break_label else {
    compiler.diagnostics.error(DiagnosticCode::BreakOutsideLoop, "`break` outside any loop or switch", None);
    return;
  };
  let depth = compiler.label_depth(label).expect("break label must be active while in scope");
  out.push(Expr::Br { depth: Label(depth), value: None });
  compiler.flow().flags |= crate::flow::FlowFlags::BREAKS;
}

fn compile_continue(compiler: &mut Compiler, out: &mut Vec<Expr>) {
  let Some(label) = compiler.flow().continue_label else {
    compiler.diagnostics.error(DiagnosticCode::BreakOutsideLoop, "`continue` outside any loop", None);
    return;
  };
  let depth = compiler.label_depth(label).expect("continue label must be active while in scope");
  out.push(Expr::Br { depth: Label(depth), value: None });
  compiler.flow().flags |= crate::flow::FlowFlags::CONTINUES;
}

/// `throw` (§1/§9 "no exceptions: throws lower to `abort`").
fn compile_throw(compiler: &mut Compiler, value: Option<&Node>, out: &mut Vec<Expr>) {
  let message = value.and_then(|n| if let Node::StringLiteral(s) = n { Some(s.as_str()) } else { None });
  out.push(crate::builtins::abort(compiler, message));
  compiler.flow().flags |= crate::flow::FlowFlags::THROWS;
}

fn compile_variable(compiler: &mut Compiler, name: crate::symbol::Symbol, ty: Option<Type>, is_const: bool, init: Option<&Node>, out: &mut Vec<Expr>) {
  let pointer_size = compiler.pointer_size();

  if is_const {
    if let (Some(t), Some(init_node)) = (ty, init) {
      if let Some(folded) = crate::call::try_fold_constant(init_node, t, pointer_size) {
        compiler.flow().declare_local(name, Local { name, ty: t, flags: ElementFlags::CONST, index: None, constant_value: Some(folded) });
        return;
      }
    }
  }

  match init {
    Some(init_node) => {
      let value_expr = crate::expr::compile_expression(compiler, init_node, ty, ConvertKind::Implicit, true);
      let actual_ty = ty.unwrap_or(compiler.current_type);
      let wrapped = !compiler.flow().can_overflow(&value_expr, actual_ty);
      let local = crate::expr::acquire_temp_local(compiler, actual_ty);
      out.push(Expr::SetLocal(local, Box::new(value_expr)));
      compiler.flow().set_local_wrapped(local.0, wrapped);
      let flags = if is_const { ElementFlags::CONST } else { ElementFlags::empty() };
      compiler.flow().declare_local(name, Local { name, ty: actual_ty, flags, index: Some(local.0), constant_value: None });
    }
    None => {
      let actual_ty = ty.expect("an uninitialised variable must carry a declared type");
      let local = crate::expr::acquire_temp_local(compiler, actual_ty);
      out.push(Expr::SetLocal(local, Box::new(actual_ty.native_zero(pointer_size))));
      compiler.flow().declare_local(name, Local { name, ty: actual_ty, flags: ElementFlags::empty(), index: Some(local.0), constant_value: None });
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::CompilerOptions;

  fn with_function_flow(compiler: &mut Compiler) -> crate::symbol::Symbol {
    let label = compiler.interner.intern("f|body");
    let mut flow = crate::flow::Flow::new(Type::new(TypeKind::I32));
    flow.return_label = Some(label);
    compiler.flow_stack.push(flow);
    compiler.push_label(label);
    label
  }

  #[test]
  fn return_branches_to_the_function_label() {
    let mut compiler = Compiler::new(CompilerOptions::default());
    with_function_flow(&mut compiler);
    let mut out = Vec::new();
    compile_return(&mut compiler, Some(&Node::IntLiteral(1)), &mut out);
    assert!(matches!(out[0], Expr::Br { depth: Label(0), .. }));
  }

  #[test]
  fn while_loop_wraps_a_block_around_a_loop() {
    let mut compiler = Compiler::new(CompilerOptions::default());
    with_function_flow(&mut compiler);
    let mut out = Vec::new();
    compile_while(&mut compiler, &Node::BoolLiteral(true), &Stmt::Block(Vec::new()), &mut out);
    match &out[0] {
      Expr::Block { body, .. } => assert!(matches!(body[0], Expr::Loop { .. })),
      _ => panic!("expected a wrapping block"),
    }
  }

  #[test]
  fn do_while_with_a_terminating_body_elides_the_trailing_break_if() {
    let mut compiler = Compiler::new(CompilerOptions::default());
    with_function_flow(&mut compiler);
    let mut out = Vec::new();
    let body = Stmt::Return(Some(Node::IntLiteral(1)));
    compile_do_while(&mut compiler, &body, &Node::BoolLiteral(true), &mut out);
    match &out[0] {
      Expr::Block { body, .. } => match &body[0] {
        Expr::Loop { body: loop_body, .. } => {
          assert_eq!(loop_body.len(), 1, "no trailing BrIf after a terminating body");
          assert!(matches!(loop_body[0], Expr::Br { .. }));
        }
        _ => panic!("expected a loop"),
      },
      _ => panic!("expected a wrapping block"),
    }
  }

  #[test]
  fn do_while_with_a_non_terminating_body_keeps_the_trailing_break_if() {
    let mut compiler = Compiler::new(CompilerOptions::default());
    with_function_flow(&mut compiler);
    let mut out = Vec::new();
    compile_do_while(&mut compiler, &Stmt::Block(Vec::new()), &Node::BoolLiteral(true), &mut out);
    match &out[0] {
      Expr::Block { body, .. } => match &body[0] {
        Expr::Loop { body: loop_body, .. } => assert!(matches!(loop_body.last(), Some(Expr::BrIf { .. }))),
        _ => panic!("expected a loop"),
      },
      _ => panic!("expected a wrapping block"),
    }
  }

  #[test]
  fn switch_case_bodies_nest_innermost_first_so_falling_out_reaches_the_next_case() {
    let mut compiler = Compiler::new(CompilerOptions::default());
    with_function_flow(&mut compiler);
    let mut out = Vec::new();
    let cases = vec![
      crate::types::program::SwitchCase { label: Node::IntLiteral(0), body: vec![Stmt::Break(None)] },
      crate::types::program::SwitchCase { label: Node::IntLiteral(1), body: vec![Stmt::Break(None)] },
    ];
    compile_switch(&mut compiler, &Node::IntLiteral(0), &cases, None, &mut out);
    // Unwrap two levels: case 1's block nests case 0's block inside it, with
    // case 0's body trailing right after — the fall-through shape.
    let Expr::Block { body: outer, .. } = &out[0] else { panic!("expected the break-labelled block") };
    let Expr::Block { body: case0_block, .. } = &outer[0] else { panic!("expected case 1's block nesting case 0's") };
    assert!(matches!(case0_block[0], Expr::Block { .. }), "innermost block holds the dispatch");
    assert!(matches!(case0_block[1], Expr::Br { .. }), "case 0's body trails right after its own block");
  }

  #[test]
  fn switch_dispatches_to_default_when_no_case_matches() {
    let mut compiler = Compiler::new(CompilerOptions::default());
    with_function_flow(&mut compiler);
    let mut out = Vec::new();
    let cases = vec![crate::types::program::SwitchCase { label: Node::IntLiteral(0), body: vec![Stmt::Break(None)] }];
    let default = vec![Stmt::Break(None)];
    compile_switch(&mut compiler, &Node::IntLiteral(5), &cases, Some(&default), &mut out);
    let Expr::Block { body: break_block, .. } = &out[0] else { panic!("expected the break-labelled block") };
    assert!(matches!(break_block.last(), Some(Expr::Br { .. })), "default body trails after the default block");
  }

  #[test]
  fn break_outside_a_loop_is_an_error() {
    let mut compiler = Compiler::new(CompilerOptions::default());
    with_function_flow(&mut compiler);
    let mut out = Vec::new();
    let before = compiler.diagnostics.all().len();
    compile_break(&mut compiler, &mut out);
    assert!(compiler.diagnostics.all().len() > before);
  }
}

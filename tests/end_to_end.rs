//! End-to-end scenarios (spec.md §8 "Literal end-to-end scenarios"),
//! exercised through [`wasmc_core::Compiler::compile`] against the
//! hand-built fixtures in `support.rs`.

mod support;

use wasmc_core::ir::Export;
use wasmc_core::types::element::ElementFlags;
use wasmc_core::types::program::{Node, Stmt, TopLevel};
use wasmc_core::{Compiler, CompilerOptions};

#[test]
fn an_exported_function_with_no_body_side_effects_appears_in_the_module_exports() {
  let mut compiler = Compiler::new(CompilerOptions::default());
  let body = vec![Stmt::Return(Some(Node::IntLiteral(1)))];
  let f = support::push_function(&mut compiler, "answer", ElementFlags::EXPORT, body, support::i32_type());
  let program = support::single_source_program(vec![TopLevel::Function(f)]);

  compiler.compile(program);

  assert!(!compiler.diagnostics.has_errors());
  let exported = compiler.module.exports.iter().any(|e| matches!(e, Export::Function { name, .. } if name == "answer"));
  assert!(exported, "expected `answer` among the module's function exports");
}

#[test]
fn a_program_with_no_user_main_routes_top_level_statements_through_the_synthetic_start_function() {
  let mut compiler = Compiler::new(CompilerOptions::default());
  let stmt = TopLevel::Statement(Stmt::Expr(Node::IntLiteral(42)));
  let program = support::single_source_program(vec![stmt]);

  compiler.compile(program);

  assert!(!compiler.diagnostics.has_errors());
  let start = compiler.module.start.expect("no user `main`, the synthetic start function must become the module start");
  let (_, body) = &compiler.module.functions[start.0 as usize - compiler.module.imports.len()];
  assert!(!body.body.is_empty(), "the top-level statement must have lowered into the start function's body");
}

#[test]
fn compiling_a_function_twice_through_the_driver_still_yields_one_export() {
  let mut compiler = Compiler::new(CompilerOptions::default());
  let body = vec![Stmt::Return(Some(Node::IntLiteral(1)))];
  let f = support::push_function(&mut compiler, "once", ElementFlags::EXPORT, body, support::i32_type());
  let program = support::single_source_program(vec![TopLevel::Function(f)]);

  compiler.compile(program);

  let count = compiler.module.exports.iter().filter(|e| matches!(e, Export::Function { name, .. } if name == "once")).count();
  assert_eq!(count, 1, "idempotence of element compilation: one export, not one per lowering path");
}

//! Mock resolver-output fixtures (SPEC_FULL.md "Supplemented features").
//! The real parser/resolver are out-of-scope external collaborators (§1);
//! these helpers hand-build the small `Program`/`Element` graphs an
//! integration test needs to exercise the driver end to end.

use smallvec::SmallVec;
use wasmc_core::flow::Flow;
use wasmc_core::types::element::{
  DecoratorFlags, ElementFlags, Function, FunctionId, FunctionPrototype, Signature,
};
use wasmc_core::types::program::{Program, Source, Stmt, TopLevel};
use wasmc_core::types::ty::{Type, TypeKind};
use wasmc_core::Compiler;

/// Push a non-exported, no-parameter function returning `return_type`, with
/// the given body, and return its id.
pub fn push_function(compiler: &mut Compiler, name: &str, flags: ElementFlags, body: Vec<Stmt>, return_type: Type) -> FunctionId {
  let sym = compiler.interner.intern(name);
  let proto = compiler.function_prototypes.push(FunctionPrototype {
    name: sym, flags: ElementFlags::empty(), decorators: DecoratorFlags::empty(),
    operator: None, owner: None, import: None, instances: Vec::new(),
  });
  let f = compiler.functions.push(Function {
    prototype: proto,
    signature: Signature { params: SmallVec::new(), required: 0, return_type, this_type: None },
    flags,
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
  });
  compiler.function_prototypes.get_mut(proto).instances.push(f);
  f
}

/// Wrap `items` as the sole source of a single-entry-source `Program`.
#[must_use]
pub fn single_source_program(items: Vec<TopLevel>) -> Program {
  Program {
    sources: vec![Source { path: "main.ts".into(), top_level: items }],
    entry_sources: vec![0],
  }
}

#[must_use]
pub fn i32_type() -> Type { Type::new(TypeKind::I32) }

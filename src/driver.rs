//! Top-level driver (C5, §4.5): the single entry point tying every other
//! module together. Creates the synthetic start function, walks the
//! program's sources (entry sources eagerly, imported sources transitively),
//! finalises memory/table/exports, and emits `iterateRoots` if anything
//! registered a GC hook.

use hashbrown::HashSet;
use smallvec::SmallVec;

use crate::diagnostics::DiagnosticCode;
use crate::flow::Flow;
use crate::ir::{self, Export, Expr, LocalId, NativeType};
use crate::memory::MemoryLayout;
use crate::types::element::{
  ClassId, DecoratorFlags, ElementFlags, ElementId, EnumId, Field, Function,
  FunctionId, FunctionPrototype, GlobalId, Signature,
};
use crate::types::program::{Program, TopLevel};
use crate::types::ty::{Type, TypeKind};
use crate::Compiler;

/// The architectural ceiling on Wasm linear memory (4 GiB / 64 KiB pages).
/// Neither target models a larger address space in this workspace, so both
/// share it (§6 `target`).
const MAX_MEMORY_PAGES: u32 = 1 << 16;

impl Compiler {
  /// `compile(program)` (§4.5), the single entry point. Consumes `program`;
  /// inspect [`Compiler::diagnostics`] and [`Compiler::module`] afterwards.
  pub fn compile(&mut self, program: Program) {
    self.create_start_function();

    let mut visited = HashSet::new();
    for entry in program.entry_sources.clone() {
      compile_source(self, &program, entry, true, &mut visited);
    }

    self.finish_start_function();
    self.seal_memory();
    self.materialize_table();
    translate_exports(self, &program);

    if self.any_gc_hook_registered {
      let iterate = crate::builtins::emit_iterate_roots(self);
      self.module.exports.push(Export::Function { name: "iterateRoots".into(), func: iterate });
    }
  }

  /// Reserve the synthetic start function's `FuncId` up front (§4.5, §4.6
  /// "Functions"), before any declaration is lowered, so that `main`'s
  /// `~started` guard always has a stable call target regardless of when
  /// the start body is finalised.
  fn create_start_function(&mut self) {
    let name = self.interner.intern("start");
    let proto = self.function_prototypes.push(FunctionPrototype {
      name, flags: ElementFlags::empty(), decorators: DecoratorFlags::empty(),
      operator: None, owner: None, import: None, instances: Vec::new(),
    });
    let void = Type::new(TypeKind::Void);
    let sig = Signature { params: SmallVec::new(), required: 0, return_type: void, this_type: None };
    let f = self.functions.push(Function {
      prototype: proto, signature: sig, flags: ElementFlags::empty(), name,
      param_names: Vec::new(), extra_locals: Vec::new(), flow: Flow::new(void),
      trampoline: None, table_index: -1, next_inline_id: 0, compiled_ir: None,
      optional_initializers: Vec::new(), body: None,
    });

    let ty = self.module.intern_type(ir::Signature { params: SmallVec::new(), result: NativeType::None });
    let func_id = self.module.declare_function(ty, "start".into());
    self.functions.get_mut(f).compiled_ir = Some(func_id);
    self.start_function = Some(f);

    let return_label = self.interner.intern("start|body");
    let mut root = Flow::new(void);
    root.return_label = Some(return_label);
    self.current_function = Some(f);
    self.flow_stack.push(root);
    self.push_label(return_label);
  }

  /// Drain [`Compiler::pending_start_inits`] into the start function's IR
  /// body and decide whether it becomes the module's `start` (only when no
  /// user `main` exists — otherwise `main`'s guard calls it instead, per
  /// [`crate::decls::ensure_function_compiled`]).
  fn finish_start_function(&mut self) {
    self.pop_label();
    self.flow_stack.pop().expect("root flow pushed by create_start_function");
    self.current_function = None;

    let f = self.start_function.expect("create_start_function runs before any declaration is lowered");
    let body = std::mem::take(&mut self.pending_start_inits);
    let has_user_main = self.functions.iter().any(|(_, func)| func.flags.contains(ElementFlags::MAIN));
    let func_id = self.functions.get(f).compiled_ir.expect("assigned in create_start_function");

    let pointer_size = self.pointer_size();
    let extra_locals: Vec<NativeType> = self.functions.get(f).extra_locals.iter()
      .map(|t| t.native_type(pointer_size)).collect();
    self.module.define_function(func_id, ir::FunctionBody { locals: extra_locals, body });
    self.functions.get_mut(f).flags |= ElementFlags::COMPILED;

    if !has_user_main {
      self.module.start = Some(func_id);
    }
  }

  /// Static memory is aligned and sealed, `HEAP_BASE` is exported (§4.5).
  fn seal_memory(&mut self) {
    let initial_pages = self.memory.initial_pages().max(1);
    let fresh = MemoryLayout::new(self.options.memory_base, self.pointer_size());
    let memory = std::mem::replace(&mut self.memory, fresh);
    memory.seal(&mut self.module, true);
    self.module.memory_pages = (initial_pages, Some(MAX_MEMORY_PAGES));
    self.module.memory_imported = self.options.import_memory;
    if !self.options.import_memory {
      self.module.exports.push(Export::Memory { name: "memory".into() });
    }
  }

  /// The function table is materialised; memory and table may be imported
  /// or exported per options (§4.5).
  fn materialize_table(&mut self) {
    self.module.table_size = u32::try_from(self.module.table.len()).unwrap();
    self.module.table_imported = self.options.import_table;
    if !self.options.import_table && !self.module.table.is_empty() {
      self.module.exports.push(Export::Table { name: "table".into() });
    }
  }
}

/// Recursively lower one source's top-level items. `is_entry` gates
/// tree-shaking for `Function`/`Class` declarations (§4.5 "tree-shaking
/// policy"); `Global`/`Enum` always compile eagerly since nothing in this
/// workspace re-checks a reference against a not-yet-compiled declaration.
fn compile_source(compiler: &mut Compiler, program: &Program, index: usize, is_entry: bool, visited: &mut HashSet<usize>) {
  if !visited.insert(index) { return }
  let Some(source) = program.sources.get(index) else { return };
  for item in source.top_level.clone() {
    match item {
      TopLevel::Function(f) => compile_element(compiler, ElementId::Function(f), is_entry),
      TopLevel::Global(g) => compile_element(compiler, ElementId::Global(g), is_entry),
      TopLevel::Class(c) => compile_element(compiler, ElementId::Class(c), is_entry),
      TopLevel::Enum(e) => compile_element(compiler, ElementId::Enum(e), is_entry),
      TopLevel::Namespace(n) => compile_element(compiler, ElementId::Namespace(n), is_entry),
      TopLevel::Import { source_path } => {
        if let Some(target) = program.sources.iter().position(|s| s.path == source_path) {
          compile_source(compiler, program, target, false, visited);
        }
      }
      TopLevel::Statement(stmt) => {
        let mut buf = std::mem::take(&mut compiler.pending_start_inits);
        crate::stmt::compile_statement(compiler, &stmt, &mut buf);
        compiler.pending_start_inits = buf;
      }
    }
  }
}

/// Lower one element, honouring the tree-shaking gate on `Function`/`Class`
/// and recursing through prototypes/namespaces. Idempotent: every
/// `ensure_*_compiled`/`compile_class` call it bottoms out in is itself
/// memoised, so visiting an element twice (e.g. once via its own top-level
/// entry and once via an enclosing namespace's member list) is harmless.
fn compile_element(compiler: &mut Compiler, id: ElementId, is_entry: bool) {
  match id {
    ElementId::Function(f) => {
      let exported = compiler.functions.get(f).flags.contains(ElementFlags::EXPORT);
      if compiler.options.no_tree_shaking || (exported && is_entry) {
        crate::decls::ensure_function_compiled(compiler, f);
      }
    }
    ElementId::FunctionPrototype(p) => {
      for f in compiler.function_prototypes.get(p).instances.clone() {
        compile_element(compiler, ElementId::Function(f), is_entry);
      }
    }
    ElementId::Global(g) => { crate::decls::ensure_global_compiled(compiler, g); }
    ElementId::Class(c) => {
      let prototype = compiler.classes.get(c).prototype;
      let exported = compiler.class_prototypes.get(prototype).flags.contains(ElementFlags::EXPORT);
      if compiler.options.no_tree_shaking || (exported && is_entry) {
        crate::decls::compile_class(compiler, c);
      }
    }
    ElementId::ClassPrototype(p) => {
      for c in compiler.class_prototypes.get(p).instances.clone() {
        compile_element(compiler, ElementId::Class(c), is_entry);
      }
    }
    ElementId::Enum(e) => crate::decls::ensure_enum_compiled(compiler, e),
    ElementId::Namespace(n) => {
      for m in compiler.namespaces.get(n).members.clone() {
        compile_element(compiler, m, is_entry);
      }
    }
    // Properties and fields compile lazily, reached only through their
    // getter/setter call sites (`expr_assign.rs`) or their owning class.
    ElementId::Property(_) | ElementId::Field(_) => {}
    // A member compiles as part of its owning enum; there is no separate
    // per-member compilation step.
    ElementId::EnumValue(e, _) => crate::decls::ensure_enum_compiled(compiler, e),
  }
}

/// Translate every exported top-level declaration reachable from an entry
/// source into an [`Export`] (§4.5 "Exports"), after all declarations have
/// been lowered.
fn translate_exports(compiler: &mut Compiler, program: &Program) {
  for &entry in &program.entry_sources {
    let Some(source) = program.sources.get(entry) else { continue };
    for item in source.top_level.clone() {
      match item {
        TopLevel::Function(f) if compiler.functions.get(f).flags.contains(ElementFlags::EXPORT) => {
          export_element(compiler, ElementId::Function(f));
        }
        TopLevel::Global(g) if compiler.globals.get(g).flags.contains(ElementFlags::EXPORT) => {
          export_element(compiler, ElementId::Global(g));
        }
        TopLevel::Class(c) => {
          let prototype = compiler.classes.get(c).prototype;
          if compiler.class_prototypes.get(prototype).flags.contains(ElementFlags::EXPORT) {
            export_element(compiler, ElementId::Class(c));
          }
        }
        TopLevel::Enum(e) if compiler.enums.get(e).flags.contains(ElementFlags::EXPORT) => {
          export_element(compiler, ElementId::Enum(e));
        }
        TopLevel::Namespace(n) if compiler.namespaces.get(n).flags.contains(ElementFlags::EXPORT) => {
          export_element(compiler, ElementId::Namespace(n));
        }
        _ => {}
      }
    }
  }
}

fn export_element(compiler: &mut Compiler, id: ElementId) {
  match id {
    ElementId::Function(f) => export_function(compiler, f),
    ElementId::FunctionPrototype(p) => {
      for f in compiler.function_prototypes.get(p).instances.clone() { export_function(compiler, f); }
    }
    ElementId::Global(g) => export_global(compiler, g),
    ElementId::Class(c) => export_class(compiler, c),
    ElementId::ClassPrototype(p) => {
      for c in compiler.class_prototypes.get(p).instances.clone() { export_class(compiler, c); }
    }
    ElementId::Enum(e) => export_enum(compiler, e),
    ElementId::Namespace(n) => {
      for m in compiler.namespaces.get(n).members.clone() { export_element(compiler, m); }
    }
    ElementId::Property(_) | ElementId::Field(_) | ElementId::EnumValue(_, _) => {
      compiler.diagnostics.unsupported("a standalone property/field/enum-member export has no direct Wasm export form in this workspace", None);
    }
  }
}

fn export_function(compiler: &mut Compiler, f: FunctionId) {
  crate::decls::ensure_function_compiled(compiler, f);
  let func = compiler.functions.get(f);
  let Some(func_ir) = func.compiled_ir else { return };
  let name = compiler.interner.resolve(func.name).to_owned();
  compiler.module.exports.push(Export::Function { name, func: func_ir });
}

fn export_global(compiler: &mut Compiler, g: GlobalId) {
  let global = compiler.globals.get(g).clone();
  if !global.flags.contains(ElementFlags::CONST) && !compiler.options.features.contains(crate::Features::MUTABLE_GLOBAL) {
    compiler.diagnostics.error(
      DiagnosticCode::OperationNotSupported,
      "exporting a mutable global requires the mutableGlobals feature",
      None,
    );
    return;
  }
  crate::decls::ensure_global_compiled(compiler, g);
  let Some(id) = compiler.globals.get(g).compiled_ir else {
    // An inlined constant has no IR global to export; the value is only
    // ever visible to Wasm-side readers through whatever reads it inline.
    compiler.diagnostics.unsupported("an inlined-constant global export is not representable in this workspace", None);
    return;
  };
  let name = compiler.interner.resolve(global.name).to_owned();
  compiler.module.exports.push(Export::Global { name, global: id });
}

fn export_enum(compiler: &mut Compiler, e: EnumId) {
  crate::decls::ensure_enum_compiled(compiler, e);
  let enum_elem = compiler.enums.get(e).clone();
  let enum_name = compiler.interner.resolve(enum_elem.name).to_owned();
  for member in &enum_elem.members {
    if let Some(id) = member.compiled_ir {
      let name = format!("{enum_name}.{}", compiler.interner.resolve(member.name));
      compiler.module.exports.push(Export::Global { name, global: id });
    }
  }
}

/// Class prototypes expand to one export set per concrete instance, with
/// the type arguments suffixed to the name (§4.5 "Exports"). This workspace
/// resolves generics upstream into distinct [`ClassId`]s without retaining
/// the resolved type-argument names alongside each instance, so the suffix
/// here is an instantiation index rather than the real argument list.
fn export_class(compiler: &mut Compiler, c: ClassId) {
  crate::decls::compile_class(compiler, c);
  let class = compiler.classes.get(c).clone();
  let prototype = compiler.class_prototypes.get(class.prototype).clone();
  let base_name = compiler.interner.resolve(prototype.name).to_owned();
  let suffix = if prototype.instances.len() > 1 {
    let idx = prototype.instances.iter().position(|&i| i == c).unwrap_or(0);
    format!("<{idx}>")
  } else {
    String::new()
  };
  let prefix = format!("{base_name}{suffix}");

  for m in &class.methods {
    let func = compiler.functions.get(*m).clone();
    if func.flags.contains(ElementFlags::PRIVATE) { continue }
    crate::decls::ensure_function_compiled(compiler, *m);
    let Some(func_ir) = compiler.functions.get(*m).compiled_ir else { continue };
    let method_name = compiler.interner.resolve(func.name).to_owned();
    compiler.module.exports.push(Export::Function { name: format!("{prefix}.{method_name}"), func: func_ir });
  }

  for field_id in &class.fields {
    let field = compiler.fields.get(*field_id).clone();
    if field.flags.contains(ElementFlags::PRIVATE) { continue }
    export_field_accessors(compiler, &field, &prefix);
  }
}

/// A field export synthesises a getter/setter pair: a direct load/store at
/// the field's precomputed offset (§4.5 "Exports"). No setter is emitted for
/// a `readonly` field.
fn export_field_accessors(compiler: &mut Compiler, field: &Field, prefix: &str) {
  let pointer_size = compiler.pointer_size();
  let native = field.ty.native_type(pointer_size);
  let ptr_native = compiler.pointer_type().native_type(pointer_size);
  let field_name = compiler.interner.resolve(field.name).to_owned();
  let width = crate::expr::width_of(field.ty, pointer_size);
  let offset = field.offset;

  let getter_ty = compiler.module.intern_type(ir::Signature { params: SmallVec::from_slice(&[ptr_native]), result: native });
  let getter_id = compiler.module.declare_function(getter_ty, format!("{prefix}.{field_name}:get"));
  let load = Expr::Load {
    width, signed: field.ty.is_signed(), native,
    mem: ir::MemArg { offset, align: 0 },
    addr: Box::new(Expr::GetLocal(LocalId(0))),
  };
  compiler.module.define_function(getter_id, ir::FunctionBody { locals: Vec::new(), body: vec![load] });
  compiler.module.exports.push(Export::Function { name: format!("{prefix}.{field_name}"), func: getter_id });

  if field.flags.contains(ElementFlags::READONLY) { return }

  let setter_ty = compiler.module.intern_type(ir::Signature { params: SmallVec::from_slice(&[ptr_native, native]), result: NativeType::None });
  let setter_id = compiler.module.declare_function(setter_ty, format!("{prefix}.{field_name}:set"));
  let store = Expr::Store {
    width: Some(width),
    mem: ir::MemArg { offset, align: 0 },
    addr: Box::new(Expr::GetLocal(LocalId(0))),
    value: Box::new(Expr::GetLocal(LocalId(1))),
  };
  compiler.module.define_function(setter_id, ir::FunctionBody { locals: Vec::new(), body: vec![store] });
  compiler.module.exports.push(Export::Function { name: format!("{prefix}.{field_name}="), func: setter_id });
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::types::element::{Class, ClassPrototype};
  use crate::types::program::{Source, Stmt};
  use crate::CompilerOptions;

  #[test]
  fn compiling_an_empty_program_defines_the_start_function_as_module_start() {
    let mut compiler = Compiler::new(CompilerOptions::default());
    let program = Program { sources: vec![Source { path: "a.ts".into(), top_level: Vec::new() }], entry_sources: vec![0] };
    compiler.compile(program);
    assert!(compiler.module.start.is_some());
    assert!(!compiler.module.functions.is_empty());
  }

  #[test]
  fn a_top_level_statement_is_compiled_into_the_start_function_body() {
    let mut compiler = Compiler::new(CompilerOptions::default());
    let stmt = Stmt::Expr(crate::types::program::Node::IntLiteral(1));
    let program = Program {
      sources: vec![Source { path: "a.ts".into(), top_level: vec![TopLevel::Statement(stmt)] }],
      entry_sources: vec![0],
    };
    compiler.compile(program);
    let start = compiler.module.start.expect("no user main, start function becomes the module start");
    let (_, body) = &compiler.module.functions[start.0 as usize - compiler.module.imports.len()];
    assert!(!body.body.is_empty());
  }

  #[test]
  fn exporting_a_class_skips_private_methods() {
    let mut compiler = Compiler::new(CompilerOptions::default());
    let class_name = compiler.interner.intern("Point");
    let public_name = compiler.interner.intern("publicMethod");
    let private_name = compiler.interner.intern("privateHelper");

    let class_proto = compiler.class_prototypes.push(ClassPrototype {
      name: class_name, flags: ElementFlags::EXPORT, decorators: DecoratorFlags::empty(), instances: Vec::new(),
    });

    let void = Type::new(TypeKind::Void);
    let sig = Signature { params: SmallVec::new(), required: 0, return_type: void, this_type: Some(Type::new(TypeKind::Reference(ClassId::new(0)))) };

    let make_method = |compiler: &mut Compiler, name: crate::symbol::Symbol, flags: ElementFlags| {
      let proto = compiler.function_prototypes.push(FunctionPrototype {
        name, flags: ElementFlags::empty(), decorators: DecoratorFlags::empty(), operator: None, owner: None, import: None, instances: Vec::new(),
      });
      compiler.functions.push(Function {
        prototype: proto, signature: sig.clone(), flags, name, param_names: Vec::new(), extra_locals: Vec::new(),
        flow: Flow::new(void), trampoline: None, table_index: -1, next_inline_id: 0, compiled_ir: None,
        optional_initializers: Vec::new(), body: Some(Vec::new()),
      })
    };
    let public_method = make_method(&mut compiler, public_name, ElementFlags::empty());
    let private_method = make_method(&mut compiler, private_name, ElementFlags::PRIVATE);

    let class = compiler.classes.push(Class {
      prototype: class_proto, base: None, fields: Vec::new(), constructor: None,
      methods: vec![public_method, private_method], operators: Vec::new(), size: 8,
      flags: ElementFlags::empty(), gc_hook: None,
    });
    compiler.class_prototypes.get_mut(class_proto).instances.push(class);

    export_class(&mut compiler, class);
    let names: Vec<&str> = compiler.module.exports.iter().filter_map(|e| match e {
      Export::Function { name, .. } => Some(name.as_str()),
      _ => None,
    }).collect();
    assert!(names.iter().any(|n| n.contains("publicMethod")));
    assert!(!names.iter().any(|n| n.contains("privateHelper")));
  }
}

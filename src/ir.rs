//! A small, explicit WebAssembly IR — the "IR builder" external collaborator
//! named in §1/§6. The real toolchain's builder lives in a sibling crate and
//! is consumed, not implemented, by the core; this module gives the core
//! something concrete to emit into (and gives the test suite something
//! concrete to assert shapes against), modelled on the node vocabulary of
//! [misalcedo's `wasm-ast`](https://docs.rs/wasm-ast) `Instruction` enum.

use smallvec::SmallVec;

/// The four Wasm value types the core ever produces directly, plus `None`
/// for statements/void expressions (§ GLOSSARY "Native type").
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum NativeType {
  I32,
  I64,
  F32,
  F64,
  /// No value (a statement, or the `void` pseudo-type).
  None,
}

/// Reference into the function-type pool (§6 "a single function-type pool
/// deduplicated by `(result, params)` signature string").
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct TypeId(pub u32);

/// A local (or global) variable index within the function currently being
/// built.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct LocalId(pub u32);

/// A global variable index in the module.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct GlobalId(pub u32);

/// A function index: either a defined function or an import, assigned in
/// declaration order (imports first, matching the Wasm binary convention
/// the emitted module shape follows — §6).
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct FuncId(pub u32);

/// A branch target: `0` is the innermost enclosing block/loop/if.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Label(pub u32);

/// A binary numeric operator, tagged by the native type it operates over.
/// Signedness is folded into the variant (`DivS`/`DivU`) the way the Wasm
/// instruction set itself does, rather than being a side flag.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Binop {
  AddI32, SubI32, MulI32, DivSI32, DivUI32, RemSI32, RemUI32,
  AndI32, OrI32, XorI32, ShlI32, ShrSI32, ShrUI32, RotlI32, RotrI32,
  EqI32, NeI32, LtSI32, LtUI32, LeSI32, LeUI32, GtSI32, GtUI32, GeSI32, GeUI32,
  AddI64, SubI64, MulI64, DivSI64, DivUI64, RemSI64, RemUI64,
  AndI64, OrI64, XorI64, ShlI64, ShrSI64, ShrUI64, RotlI64, RotrI64,
  EqI64, NeI64, LtSI64, LtUI64, LeSI64, LeUI64, GtSI64, GtUI64, GeSI64, GeUI64,
  AddF32, SubF32, MulF32, DivF32, MinF32, MaxF32, CopysignF32,
  EqF32, NeF32, LtF32, LeF32, GtF32, GeF32,
  AddF64, SubF64, MulF64, DivF64, MinF64, MaxF64, CopysignF64,
  EqF64, NeF64, LtF64, LeF64, GtF64, GeF64,
}

/// A unary numeric operator.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Unop {
  EqzI32, EqzI64,
  ClzI32, CtzI32, PopcntI32,
  ClzI64, CtzI64, PopcntI64,
  NegF32, AbsF32, SqrtF32, CeilF32, FloorF32, TruncF32, NearestF32,
  NegF64, AbsF64, SqrtF64, CeilF64, FloorF64, TruncF64, NearestF64,
}

/// A numeric conversion operator (promote/demote/truncate/extend/wrap/
/// reinterpret) — the lowering target of [`crate::types::ty::convert`].
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Cvtop {
  WrapI64ToI32,
  ExtendI32ToI64 { signed: bool },
  /// Sign- or zero-extend an 8/16/32-bit value already held in an `i32`/`i64`
  /// slot, using the Wasm `extend8_s`/`extend16_s`/`extend32_s` family
  /// (requires the `SIGN_EXTENSION` feature — §4.1 "Ensure-wrap").
  Extend8SI32, Extend16SI32, Extend8SI64, Extend16SI64, Extend32SI64,
  TruncF32ToI32 { signed: bool }, TruncF64ToI32 { signed: bool },
  TruncF32ToI64 { signed: bool }, TruncF64ToI64 { signed: bool },
  ConvertI32ToF32 { signed: bool }, ConvertI64ToF32 { signed: bool },
  ConvertI32ToF64 { signed: bool }, ConvertI64ToF64 { signed: bool },
  DemoteF64ToF32, PromoteF32ToF64,
  ReinterpretF32AsI32, ReinterpretI32AsF32,
  ReinterpretF64AsI64, ReinterpretI64AsF64,
}

/// Number of bytes loaded/stored, for the truncating memory accesses
/// (`i32.load8_s`, `i64.store32`, ...).
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Width { W8, W16, W32, W64 }

/// A memory access's static offset/alignment pair, mirroring the Wasm
/// `memarg` immediate.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub struct MemArg {
  pub offset: u32,
  pub align: u32,
}

/// One node of the expression tree the core builds. A function body is a
/// `Vec<Expr>` (implicitly sequenced, Wasm-style) terminated by the
/// function's final-value expression.
#[derive(Clone, Debug)]
pub enum Expr {
  I32Const(i32),
  I64Const(i64),
  F32Const(f32),
  F64Const(f64),
  Unreachable,
  Nop,
  Drop(Box<Expr>),
  GetLocal(LocalId),
  SetLocal(LocalId, Box<Expr>),
  TeeLocal(LocalId, Box<Expr>),
  GetGlobal(GlobalId),
  SetGlobal(GlobalId, Box<Expr>),
  Load { width: Width, signed: bool, native: NativeType, mem: MemArg, addr: Box<Expr> },
  Store { width: Option<Width>, mem: MemArg, addr: Box<Expr>, value: Box<Expr> },
  Unary(Unop, Box<Expr>),
  Binary(Binop, Box<Expr>, Box<Expr>),
  Convert(Cvtop, Box<Expr>),
  /// A labelled sequence; its value is the value of the last child (or
  /// `None`-typed if `ty` is [`NativeType::None`]).
  Block { ty: NativeType, body: Vec<Expr> },
  Loop { ty: NativeType, body: Vec<Expr> },
  If { ty: NativeType, cond: Box<Expr>, then: Vec<Expr>, els: Vec<Expr> },
  /// Unconditional branch to the `depth`-th enclosing label, counting
  /// outward from 0, optionally carrying a value.
  Br { depth: Label, value: Option<Box<Expr>> },
  BrIf { depth: Label, cond: Box<Expr>, value: Option<Box<Expr>> },
  /// A dense jump table plus default, used for `switch` lowering (§4.7).
  BrTable { targets: Vec<Label>, default: Label, index: Box<Expr> },
  Call { func: FuncId, args: Vec<Expr> },
  /// A call to an imported function (§6 distinguishes `call` from
  /// `call_import` at the source level; both compile to Wasm `call` but the
  /// core tracks the distinction for mangling/diagnostics purposes).
  CallImport { func: FuncId, args: Vec<Expr> },
  CallIndirect { ty: TypeId, table_index: Box<Expr>, args: Vec<Expr> },
  MemorySize,
  MemoryGrow(Box<Expr>),
}

impl Expr {
  /// A zero-argument, zero-result block — used as a structural placeholder
  /// (e.g. an elided dead `if`-arm).
  #[must_use] pub fn nop() -> Self { Expr::Nop }
}

/// A function signature, deduplicated in the module's type pool (§6).
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub struct Signature {
  pub params: SmallVec<[NativeType; 4]>,
  pub result: NativeType,
}

/// A function body under construction or finalised. `locals` records the
/// additional (non-parameter) locals declared by the function, in the order
/// they were acquired by `Function::get_temp_local` (§5 "Temporary locals").
#[derive(Clone, Debug, Default)]
pub struct FunctionBody {
  pub locals: Vec<NativeType>,
  pub body: Vec<Expr>,
}

/// A function import: `module.element`, signature-typed (§6 "Imports
/// mangling").
#[derive(Clone, Debug)]
pub struct FunctionImport {
  pub module: String,
  pub name: String,
  pub ty: TypeId,
}

/// A static memory segment, written at module-finalisation time once all
/// offsets are known (§4.3).
#[derive(Clone, Debug)]
pub struct MemorySegment {
  pub offset: u32,
  pub data: Vec<u8>,
}

/// One exported member of the finished module.
#[derive(Clone, Debug)]
pub enum Export {
  Function { name: String, func: FuncId },
  Global { name: String, global: GlobalId },
  Memory { name: String },
  Table { name: String },
}

/// The module under construction. Finalised once by
/// [`crate::driver::Compiler::compile`] (§4.5, §3 "Module" lifecycle).
#[derive(Default, Debug)]
pub struct Module {
  pub types: Vec<Signature>,
  pub imports: Vec<FunctionImport>,
  pub functions: Vec<(TypeId, FunctionBody)>,
  pub func_names: Vec<String>,
  pub globals: Vec<(NativeType, bool /* mutable */, Expr /* initializer */)>,
  pub global_names: Vec<Option<String>>,
  pub memory_pages: (u32, Option<u32>),
  pub memory_imported: bool,
  pub segments: Vec<MemorySegment>,
  pub table_size: u32,
  pub table_imported: bool,
  pub table: Vec<FuncId>,
  pub exports: Vec<Export>,
  pub start: Option<FuncId>,
}

impl Module {
  /// Intern a function signature, returning its (possibly newly assigned)
  /// [`TypeId`] (§6 "deduplicated by `(result, params)` signature string").
  pub fn intern_type(&mut self, sig: Signature) -> TypeId {
    if let Some(i) = self.types.iter().position(|s| *s == sig) {
      return TypeId(u32::try_from(i).unwrap());
    }
    self.types.push(sig);
    TypeId(u32::try_from(self.types.len() - 1).unwrap())
  }

  /// Add a function import, returning its [`FuncId`]. Imports occupy the
  /// low indices of the function index space.
  pub fn add_import(&mut self, module: &str, name: &str, ty: TypeId) -> FuncId {
    self.imports.push(FunctionImport { module: module.into(), name: name.into(), ty });
    FuncId(u32::try_from(self.imports.len() - 1).unwrap())
  }

  /// Reserve a function slot, to be filled in later by
  /// [`Module::define_function`] (needed because recursive/mutually
  /// recursive functions must be assigned an id before their body is
  /// compiled).
  pub fn declare_function(&mut self, ty: TypeId, name: String) -> FuncId {
    let idx = self.imports.len() + self.functions.len();
    self.functions.push((ty, FunctionBody::default()));
    self.func_names.push(name);
    FuncId(u32::try_from(idx).unwrap())
  }

  /// Fill in a previously declared function's body.
  pub fn define_function(&mut self, f: FuncId, body: FunctionBody) {
    self.functions[f.0 as usize - self.imports.len()].1 = body;
  }

  /// Append a global, returning its [`GlobalId`].
  pub fn add_global(&mut self, ty: NativeType, mutable: bool, init: Expr, name: Option<String>) -> GlobalId {
    self.globals.push((ty, mutable, init));
    self.global_names.push(name);
    GlobalId(u32::try_from(self.globals.len() - 1).unwrap())
  }

  /// Append a static memory segment at the given final offset (§4.3).
  pub fn add_segment(&mut self, offset: u32, data: Vec<u8>) {
    self.segments.push(MemorySegment { offset, data });
  }

  /// Ensure `f` occupies a function-table slot, returning its index. Callers
  /// in [`crate::function_table`] are responsible for trampoline routing;
  /// this just records the raw table entry.
  pub fn add_table_entry(&mut self, f: FuncId) -> u32 {
    if let Some(i) = self.table.iter().position(|&g| g == f) {
      return u32::try_from(i).unwrap();
    }
    self.table.push(f);
    u32::try_from(self.table.len() - 1).unwrap()
  }
}

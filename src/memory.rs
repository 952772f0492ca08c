//! Memory layout (C3). The static-segment allocator, string/array
//! canonicalisation, and the `HEAP_BASE` global (§4.3).

use byteorder::{ByteOrder, LittleEndian};
use hashbrown::HashMap;

use crate::ir::{Expr, GlobalId, MemorySegment, Module, NativeType};

const WASM_PAGE_SIZE: u32 = 64 * 1024;

/// Owns the append-only sequence of static memory segments and the strings
/// already canonicalised into one of them (§4.3, §8 "String
/// canonicalisation").
#[derive(Debug)]
pub struct MemoryLayout {
  /// One past the end of the last-placed segment; monotonically
  /// non-decreasing (§3 Invariants, §8 "Memory monotonicity").
  offset: u32,
  pending: Vec<(u32, Vec<u8>)>,
  strings: HashMap<String, u32>,
  pointer_size: u32,
}

impl MemoryLayout {
  /// `memoryBase` is clamped to a minimum of 8: the first eight bytes are
  /// reserved as a null sentinel so that a null reference (address 0)
  /// never aliases real data (§4.3).
  #[must_use] pub fn new(memory_base: u32, pointer_size: u32) -> Self {
    Self { offset: memory_base.max(8), pending: Vec::new(), strings: HashMap::new(), pointer_size }
  }

  #[must_use] pub fn offset(&self) -> u32 { self.offset }

  /// Append a segment of `data`, aligned to `align` bytes (a power of two),
  /// and return its final start offset. Offsets are final as soon as
  /// assigned (§3 "Memory segment" lifecycle).
  pub fn add_segment(&mut self, align: u32, data: Vec<u8>) -> u32 {
    debug_assert!(align.is_power_of_two());
    let start = align_to(self.offset, align);
    self.offset = start + u32::try_from(data.len()).expect("segment too large");
    self.pending.push((start, data));
    start
  }

  /// `ensureStaticString(s)` (§4.3, §8): canonicalise by content. Layout is
  /// `[length: i32][utf16 code units]`, matching the source language's
  /// native string representation; `gc_header` prepends one word (the GC
  /// hook index) before the length field when the class carries a GC
  /// header, and the returned pointer still targets the body, not the
  /// header (§4.3 "The returned pointer targets the non-header body.").
  pub fn ensure_static_string(&mut self, s: &str, gc_header: Option<i32>) -> u32 {
    if let Some(&ptr) = self.strings.get(s) { return ptr }
    let units: Vec<u16> = s.encode_utf16().collect();
    let mut buf = Vec::with_capacity(4 + units.len() * 2 + if gc_header.is_some() { 4 } else { 0 });
    if let Some(hook) = gc_header {
      let mut w = [0u8; 4];
      LittleEndian::write_i32(&mut w, hook);
      buf.extend_from_slice(&w);
    }
    let mut len_bytes = [0u8; 4];
    LittleEndian::write_i32(&mut len_bytes, i32::try_from(units.len()).unwrap());
    buf.extend_from_slice(&len_bytes);
    for u in &units {
      let mut ub = [0u8; 2];
      LittleEndian::write_u16(&mut ub, *u);
      buf.extend_from_slice(&ub);
    }
    let header_start = self.add_segment(4, buf);
    let body_ptr = header_start + if gc_header.is_some() { 4 } else { 0 };
    self.strings.insert(s.to_owned(), body_ptr);
    body_ptr
  }

  /// A static array (§4.3): two segments, a backing buffer (rounded up to
  /// the next power of two of `header_size + length * element_size`) and a
  /// header that points into it. `write_element` is called once per
  /// element in order, writing its native-width bytes via
  /// `writeI8/16/32/64`/`writeF32/64` dispatched on `element_size`.
  pub fn add_static_array(
    &mut self,
    element_size: u32,
    length: u32,
    header_size: u32,
    mut write_elements: impl FnMut(&mut Vec<u8>),
  ) -> (u32, u32) {
    let buffer_len = (header_size + length * element_size).next_power_of_two();
    let mut buf = Vec::with_capacity(buffer_len as usize);
    write_elements(&mut buf);
    buf.resize(buffer_len as usize, 0);
    let buffer_start = self.add_segment(element_size.max(4), buf);
    // The header itself is emitted by the caller (it needs the class's
    // layout, which this module does not know about); we only hand back
    // where the backing buffer landed.
    (buffer_start, buffer_len)
  }

  /// Number of initial linear-memory pages needed to cover everything
  /// placed so far (§4.3).
  #[must_use] pub fn initial_pages(&self) -> u32 { self.offset.div_ceil(WASM_PAGE_SIZE) }

  /// Flush all pending segments and the `HEAP_BASE` global into the
  /// module, aligned to the pointer size (§4.5 "Static memory is aligned
  /// and sealed, `HEAP_BASE` is exported").
  pub fn seal(mut self, module: &mut Module, export_heap_base: bool) -> GlobalId {
    self.offset = align_to(self.offset, self.pointer_size / 8);
    for (start, data) in self.pending.drain(..) {
      module.segments.push(MemorySegment { offset: start, data });
    }
    let native = if self.pointer_size == 64 { NativeType::I64 } else { NativeType::I32 };
    let init = if self.pointer_size == 64 { Expr::I64Const(i64::from(self.offset)) } else { Expr::I32Const(i32::try_from(self.offset).unwrap()) };
    let id = module.add_global(native, false, init, Some("HEAP_BASE".into()));
    if export_heap_base {
      module.exports.push(crate::ir::Export::Global { name: "HEAP_BASE".into(), global: id });
    }
    id
  }
}

/// `max(pos rounded up to the next multiple of align, pos)`. `align` must
/// be a power of two (mirrors `mmcc::codegen::align_to`, generalised from a
/// compile-time constant to a value since Wasm segment alignment varies
/// per element size rather than being fixed at 16 bytes).
#[must_use]
pub fn align_to(pos: u32, align: u32) -> u32 {
  debug_assert!(align.is_power_of_two());
  (pos + align - 1) & !(align - 1)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn memory_base_is_clamped_to_eight() {
    let layout = MemoryLayout::new(0, 32);
    assert_eq!(layout.offset(), 8);
  }

  #[test]
  fn segments_are_monotonically_placed() {
    let mut layout = MemoryLayout::new(8, 32);
    let a = layout.add_segment(4, vec![1, 2, 3, 4]);
    let b = layout.add_segment(4, vec![5, 6, 7, 8]);
    assert_eq!(a, 8);
    assert_eq!(b, 12);
    assert!(layout.offset() >= b + 4);
  }

  #[test]
  fn string_canonicalisation_dedups_by_content() {
    let mut layout = MemoryLayout::new(8, 32);
    let a = layout.ensure_static_string("hello", None);
    let before = layout.offset();
    let b = layout.ensure_static_string("hello", None);
    assert_eq!(a, b);
    assert_eq!(layout.offset(), before);
  }
}

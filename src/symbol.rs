//! Interned strings. Every identifier in a resolved program — element names,
//! import module/name pairs, mangled export names — flows through here so
//! that equality and hashing are a single integer comparison.

use std::collections::HashMap;

/// An interned string. Cheap to copy, compare, and hash.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Debug)]
pub struct Symbol(u32);

impl Symbol {
  /// Convert to a dense `usize` index, for use as a map key into arrays
  /// indexed by symbol (see [`init_dense_symbol_map`]).
  #[must_use] pub fn into_usize(self) -> usize { self.0 as usize }
}

/// The interner owns the backing storage for all [`Symbol`]s produced during
/// a compilation. There is one interner per [`Compiler`](crate::Compiler).
#[derive(Default)]
pub struct Interner {
  strings: Vec<Box<str>>,
  map: HashMap<Box<str>, Symbol>,
}

impl Interner {
  /// Create an empty interner.
  #[must_use] pub fn new() -> Self { Self::default() }

  /// Intern a string, returning its (possibly newly assigned) [`Symbol`].
  pub fn intern(&mut self, s: &str) -> Symbol {
    if let Some(&sym) = self.map.get(s) { return sym }
    let sym = Symbol(u32::try_from(self.strings.len()).expect("too many symbols"));
    self.strings.push(s.into());
    self.map.insert(s.into(), sym);
    sym
  }

  /// Recover the string backing a symbol previously produced by this interner.
  #[must_use] pub fn resolve(&self, sym: Symbol) -> &str { &self.strings[sym.into_usize()] }
}

/// Build a dense lookup table from symbol index to `V`, for symbols produced
/// by a one-shot scan over a small fixed set of keywords (used by the
/// `make_prims!`-style enums in [`types::element`](crate::types::element)).
/// Entries not present in `pairs` map to `None`.
#[must_use]
pub fn init_dense_symbol_map<V: Copy>(pairs: &[(Symbol, V)]) -> Box<[Option<V>]> {
  let len = pairs.iter().map(|(s, _)| s.into_usize() + 1).max().unwrap_or(0);
  let mut map = vec![None; len].into_boxed_slice();
  for &(s, v) in pairs { map[s.into_usize()] = Some(v); }
  map
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn interning_is_idempotent() {
    let mut i = Interner::new();
    let a = i.intern("foo");
    let b = i.intern("bar");
    let c = i.intern("foo");
    assert_eq!(a, c);
    assert_ne!(a, b);
    assert_eq!(i.resolve(a), "foo");
  }
}

//! Data-model types consumed and produced by the lowering components.

pub mod element;
pub mod program;
pub mod ty;

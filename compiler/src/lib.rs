// hkc — Helicity Kernel Compiler
//
// Library root. Converts an amplitude model's call graphs into numeric
// kernel source for each target dialect.

pub mod diag;
pub mod dialect;
pub mod emit;
pub mod graph;
pub mod model;
pub mod pipeline;
pub mod scaffold;
pub mod signature;
pub mod synth;

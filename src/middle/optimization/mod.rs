//! Optimizations on the lowered tree, run to a fixpoint by
//! [`crate::middle::lowering::lower_program`]

pub mod peephole;

use crate::middle::ty::TypeArena;

/// Knobs shared by every stage of a compilation session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Platform alignment every struct member and union member size is
    /// rounded up to
    pub alignment: u64,
    pub pointer_size: u64,
    /// Upper bound on analysis waves, even while the error count still
    /// changes
    pub max_waves: usize,
    /// Upper bound on passes per lowering stage
    pub max_lowering_iterations: usize,
    /// Bytes reserved for the interpreter stack before it first grows
    pub initial_stack_size: usize,
    pub max_steps: u64,
    pub warn_unused: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            alignment: 8,
            pointer_size: 8,
            max_waves: 64,
            max_lowering_iterations: 32,
            initial_stack_size: 4096,
            max_steps: 1_000_000,
            warn_unused: true,
        }
    }
}

impl Config {
    pub fn type_arena(&self) -> TypeArena {
        TypeArena::new(self.alignment, self.pointer_size)
    }
}

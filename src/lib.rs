//! Compiler core for a C-like systems language: wave based semantic
//! analysis, control flow lowering and peephole optimization, compilation
//! to the XIL register IR, and an interpreter that executes XIL modules.

pub mod backend;
pub mod config;
pub mod demos;
pub mod diagnostics;
pub mod frontend;
pub mod index;
pub mod middle;
pub mod session;

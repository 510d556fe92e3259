//! Execution of compiled XIL modules

pub mod interpreter;

pub mod analysis;
pub mod lowering;
pub mod optimization;
pub mod primitive;
pub mod scope;
pub mod ty;
pub mod xil;

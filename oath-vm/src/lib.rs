#![forbid(unsafe_code)]

pub mod artifact;
pub mod instr;

pub use artifact::*;
pub use instr::*;

pub mod check;
pub mod common;
pub mod disasm;
pub mod patch;
pub mod plan;

//! Prompt assembly.

pub mod assembler;

pub use assembler::{PromptInputs, PromptSpec, assemble, exchange_record};

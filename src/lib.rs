// src/lib.rs — Library root for shotsmith

pub mod cli;
pub mod compiler;
pub mod core;
pub mod evaluator;
pub mod infra;
pub mod llm;
pub mod provider;
pub mod util;

// src/core/mod.rs — Core iteration engine

pub mod cancel;
pub mod cost;
pub mod orchestrator;
pub mod safety;
pub mod sink;
pub mod types;

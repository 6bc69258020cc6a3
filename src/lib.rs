// src/lib.rs — Library root for habitus

pub mod cli;
pub mod context;
pub mod events;
pub mod experiments;
pub mod graph;
pub mod infra;
pub mod patterns;
pub mod storage;

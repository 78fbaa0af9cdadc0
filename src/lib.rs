pub mod gpu;
pub mod proc;

// Composition
pub mod pipeline;
pub mod graph;
pub mod config;

pub mod cli;

pub use graph::{NodeId, ProcGraph};
pub use pipeline::Pipeline;

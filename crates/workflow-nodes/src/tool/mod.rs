//! Tool nodes
//!
//! The tool executor and the deterministic simulator backing it.

mod executor;
mod schemas;
mod simulator;

pub use executor::ToolExecutor;
pub use schemas::{tool_schema, tool_names, ParamKind, ParamSpec, ToolPreset, ToolSchema};
pub use simulator::{ToolSimulator, MODE_LATENCIES};

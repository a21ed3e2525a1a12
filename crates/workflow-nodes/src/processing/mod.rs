//! Processing nodes
//!
//! Nodes that send their inputs through a model: structured reasoning and
//! template-driven formatting.

mod formatter;
mod reasoning;

pub use formatter::{clean_reply, FormatterExecutor, FormatterPreset, FORMATTER_TEMPERATURE};
pub use reasoning::{check_schema, parse_reply, ReasoningExecutor, ReasoningStyle};

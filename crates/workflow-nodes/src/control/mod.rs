//! Control nodes
//!
//! Branch decisions and the restricted expression language they evaluate.

mod branch;
pub mod expression;

pub use branch::{match_decision, BranchExecutor, BranchMode};
pub use expression::{Expression, ExpressionError};

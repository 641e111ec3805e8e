//! Query-side building blocks.
//!
//! - [`MatchExp`] - boolean trees of path conditions
//! - [`AttributeQuery`] - projection specs
//! - [`MatchCompiler`] - match expressions to parameterized SQL fragments
//! - [`Planner`] - projections to a single-statement join plan plus deferred
//!   secondary queries
//! - [`builder`] - dialects, parameters, joins and SELECT assembly

pub mod attribute_query;
pub mod builder;
pub mod match_compiler;
pub mod match_exp;
pub mod planner;

pub use attribute_query::{AttributeQuery, ALL_VALUES};
pub use match_compiler::MatchCompiler;
pub use match_exp::{Condition, MatchExp, Operand, Operator};
pub use planner::{Deferred, PlanNode, Planner};

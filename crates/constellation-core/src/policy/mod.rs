pub mod engine;
pub mod glob;

pub use engine::{Decision, PolicyEngine};
pub use glob::{glob_match, GlobPattern};

//! Agent-side runtime: rule registry, checksum diffing, safe attribute
//! extraction, and the management facade that ties a configuration
//! reload to selective reapplication of interception.

pub mod diff;
pub mod extract;
pub mod management;
pub mod registry;

pub use diff::RuleDiff;
pub use extract::{AccessorError, AccessorEvaluator, Inspect, JsonTarget};
pub use management::{Management, Weaver};
pub use registry::RuleRegistry;

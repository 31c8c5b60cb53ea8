//! Usage search: predicates, join planning and SQL rendering

pub mod composer;
pub mod plan;
pub mod predicates;

pub use composer::QueryComposer;
pub use plan::{Clause, JoinFlags, JoinKind, JoinSpec, PoolTable, QueryPlan};
pub use predicates::{PrimaryRank, TextCombine, UsageQuery};

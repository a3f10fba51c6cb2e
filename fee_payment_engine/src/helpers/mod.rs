mod account_matcher;
mod allocation_planner;
mod student_locks;

pub use account_matcher::{AccountMatcher, MatchOutcome, DEFAULT_REFERENCE_PREFIXES, MAX_SUGGESTIONS};
pub use allocation_planner::{allocation_order, plan_allocation, AllocationPlan, PlannedAllocation};
pub use student_locks::{StudentGuard, StudentLocks};

//! Pure allocation arithmetic. The store applies the resulting plan inside a single transaction.
use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::db_types::{FeeAssignment, Money};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlannedAllocation {
    pub fee_assignment_id: i64,
    pub amount: Money,
    /// `amount_paid` on the assignment when the plan was made. The store refuses to apply the plan if it has moved.
    pub previous_paid: Money,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocationPlan {
    pub allocations: Vec<PlannedAllocation>,
    /// What is left after every outstanding assignment has been cleared
    pub remainder: Money,
}

impl AllocationPlan {
    pub fn total_applied(&self) -> Money {
        self.allocations.iter().map(|a| a.amount).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.allocations.is_empty() && self.remainder.is_zero()
    }
}

/// The allocation ordering: earliest due date first, assignments without a due date last, ties broken by creation
/// order (row id).
pub fn allocation_order(a: &FeeAssignment, b: &FeeAssignment) -> Ordering {
    match (a.due_date, b.due_date) {
        (Some(x), Some(y)) => x.cmp(&y),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
    .then(a.id.cmp(&b.id))
}

/// Distributes `amount` across the outstanding assignments in allocation order, applying `min(remaining, balance)` to
/// each. Whatever is left over is returned as the plan's remainder.
///
/// Assignments that are already settled are skipped. A non-positive amount produces an empty plan.
pub fn plan_allocation(assignments: &[FeeAssignment], amount: Money) -> AllocationPlan {
    if !amount.is_positive() {
        return AllocationPlan::default();
    }
    let mut outstanding = assignments.iter().filter(|a| a.is_outstanding()).collect::<Vec<_>>();
    outstanding.sort_by(|a, b| allocation_order(a, b));
    let mut remaining = amount;
    let mut allocations = Vec::with_capacity(outstanding.len());
    for assignment in outstanding {
        if remaining.is_zero() {
            break;
        }
        let applied = remaining.min(assignment.balance());
        remaining -= applied;
        allocations.push(PlannedAllocation {
            fee_assignment_id: assignment.id,
            amount: applied,
            previous_paid: assignment.amount_paid,
        });
    }
    AllocationPlan { allocations, remainder: remaining }
}

use serde::{Deserialize, Serialize};

use crate::db_types::{AllocationRecord, AllocationType, Money, Payment, Student};

/// The outcome of the apply-once allocation primitive.
///
/// Both variants carry the full allocation result, so a duplicate delivery or a repeated manual resolution can report
/// exactly what the first (and only) allocation did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ApplyOnce {
    Applied(AllocationResult),
    AlreadyApplied(AllocationResult),
}

impl ApplyOnce {
    pub fn result(&self) -> &AllocationResult {
        match self {
            ApplyOnce::Applied(r) | ApplyOnce::AlreadyApplied(r) => r,
        }
    }

    pub fn into_result(self) -> AllocationResult {
        match self {
            ApplyOnce::Applied(r) | ApplyOnce::AlreadyApplied(r) => r,
        }
    }

    pub fn is_new(&self) -> bool {
        matches!(self, ApplyOnce::Applied(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocationResult {
    pub payment: Payment,
    pub student: Student,
    /// The FEE records, followed by the CREDIT record if there was an overpayment
    pub records: Vec<AllocationRecord>,
    pub credit_generated: Money,
    pub outstanding_balance: Money,
}

impl AllocationResult {
    pub fn total_recorded(&self) -> Money {
        self.records.iter().map(|r| r.amount).sum()
    }

    pub fn applied_to_fees(&self) -> Money {
        self.records.iter().filter(|r| r.allocation_type == AllocationType::Fee).map(|r| r.amount).sum()
    }
}

/// The result of applying a student's existing credit to their outstanding fees.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreditApplication {
    pub student: Student,
    pub records: Vec<AllocationRecord>,
    pub applied: Money,
    pub outstanding_balance: Money,
}

impl CreditApplication {
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    /// Zero-based page index
    pub page: u32,
    pub size: u32,
}

impl Pagination {
    pub const MAX_PAGE_SIZE: u32 = 200;

    pub fn new(page: u32, size: u32) -> Self {
        Self { page, size: size.clamp(1, Self::MAX_PAGE_SIZE) }
    }

    pub fn limit(&self) -> i64 {
        i64::from(self.size)
    }

    pub fn offset(&self) -> i64 {
        i64::from(self.page) * i64::from(self.size)
    }
}

impl Default for Pagination {
    fn default() -> Self {
        Self::new(0, 50)
    }
}

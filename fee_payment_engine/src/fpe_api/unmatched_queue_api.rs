use std::fmt::Debug;

use log::*;

use crate::{
    db::traits::{Pagination, StudentApiError, StudentManagement},
    db_types::{Payment, PaymentStatus},
    fpe_api::payment_objects::{Page, UnmatchedPayment},
};

/// Read access to the payments that need an operator: the unmatched queue and the failed listing.
///
/// Resolution itself goes through [`crate::PaymentFlowApi::resolve_unmatched`], since it allocates funds.
pub struct UnmatchedQueueApi<B> {
    db: B,
}

impl<B> Debug for UnmatchedQueueApi<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "UnmatchedQueueApi")
    }
}

impl<B> UnmatchedQueueApi<B>
where B: StudentManagement
{
    pub fn new(db: B) -> Self {
        Self { db }
    }

    /// Unmatched payments, oldest first, with the reason and any candidate students.
    pub async fn list_unmatched(&self, page: Pagination) -> Result<Page<UnmatchedPayment>, StudentApiError> {
        let total = self.db.count_payments_by_status(PaymentStatus::Unmatched).await?;
        let payments = self.db.fetch_payments_by_status(PaymentStatus::Unmatched, page).await?;
        trace!("🧾️ Fetched {} of {total} unmatched payments", payments.len());
        let items = payments.into_iter().map(UnmatchedPayment::from).collect();
        Ok(Page::new(items, total, page))
    }

    /// Failed payments, oldest first, for manual remediation.
    pub async fn list_failed(&self, page: Pagination) -> Result<Page<Payment>, StudentApiError> {
        let total = self.db.count_payments_by_status(PaymentStatus::Failed).await?;
        let payments = self.db.fetch_payments_by_status(PaymentStatus::Failed, page).await?;
        trace!("🧾️ Fetched {} of {total} failed payments", payments.len());
        Ok(Page::new(payments, total, page))
    }
}

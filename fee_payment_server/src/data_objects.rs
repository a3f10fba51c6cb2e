use std::fmt::Display;

use fee_payment_engine::Pagination;
use serde::{Deserialize, Serialize};

/// The acknowledgment envelope the provider expects from every webhook, whatever happened internally.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderAck {
    #[serde(rename = "ResultCode")]
    pub result_code: i32,
    #[serde(rename = "ResultDesc")]
    pub result_desc: String,
}

impl ProviderAck {
    pub fn accepted() -> Self {
        Self { result_code: 0, result_desc: "Accepted".to_string() }
    }

    pub fn rejected<S: Display>(reason: S) -> Self {
        Self { result_code: 1, result_desc: format!("Rejected. {reason}") }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct PageParams {
    pub page: Option<u32>,
    pub size: Option<u32>,
}

impl From<PageParams> for Pagination {
    fn from(params: PageParams) -> Self {
        let default = Pagination::default();
        Pagination::new(params.page.unwrap_or(default.page), params.size.unwrap_or(default.size))
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ResolveRequest {
    pub student_id: i64,
}

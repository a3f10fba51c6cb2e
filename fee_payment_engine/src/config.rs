use fpg_common::DEFAULT_CURRENCY_CODE;
use serde::{Deserialize, Serialize};

use crate::helpers::DEFAULT_REFERENCE_PREFIXES;

/// Engine behaviour that deployments may tune. Built once at startup and handed to [`crate::PaymentFlowApi`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// The school's billing currency. Payments in any other currency are failed, never converted.
    pub currency: String,
    /// Prefixes stripped from account references (and admission numbers) before the normalized comparison
    pub reference_prefixes: Vec<String>,
    /// Apply a student's existing credit as soon as a new fee assignment is created for them
    pub auto_apply_credit: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            currency: DEFAULT_CURRENCY_CODE.to_string(),
            reference_prefixes: DEFAULT_REFERENCE_PREFIXES.iter().map(|p| p.to_string()).collect(),
            auto_apply_credit: true,
        }
    }
}

impl EngineConfig {
    pub fn with_currency<S: Into<String>>(mut self, currency: S) -> Self {
        self.currency = currency.into();
        self
    }

    pub fn with_reference_prefixes(mut self, prefixes: Vec<String>) -> Self {
        self.reference_prefixes = prefixes;
        self
    }

    pub fn with_auto_apply_credit(mut self, auto_apply: bool) -> Self {
        self.auto_apply_credit = auto_apply;
        self
    }
}

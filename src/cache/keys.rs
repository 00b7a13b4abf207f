//! Storage keys for pending-receipt snapshots

use std::fmt;

/// Slot holding the most recently submitted snapshot, whatever its reference.
pub const CURRENT_PAYMENT_KEY: &str = "current_payment";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentKey {
    pub reference: String,
}

impl PaymentKey {
    pub fn new(reference: impl Into<String>) -> Self {
        Self {
            reference: reference.into(),
        }
    }
}

impl fmt::Display for PaymentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "payment_{}", self.reference)
    }
}

/// Prefix a logical key with the store namespace, e.g. `edupay:payment_ref`.
pub fn namespaced(prefix: &str, key: &str) -> String {
    if prefix.is_empty() {
        key.to_string()
    } else {
        format!("{}:{}", prefix, key)
    }
}

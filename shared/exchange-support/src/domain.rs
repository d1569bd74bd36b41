//! Generic domain value types shared by any binary built on the compliance core
//!
//! Telephony-specific value objects (`PhoneNumber`, `ListSource`,
//! `SuppressReason`, ...) live in `dnc_exchange_core::domain` — they are core
//! business concepts, not ambient infrastructure, so they do not belong here.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Generic account/tenant identifier used by the (out-of-scope) façade layer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AccountId(pub String);

impl AccountId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Request context for distributed tracing, threaded through from the
/// (out-of-scope) façade into every core operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestContext {
    pub trace_id: String,
    pub span_id: String,
    pub account_id: Option<AccountId>,
    pub request_id: String,
}

impl RequestContext {
    pub fn new() -> Self {
        Self {
            trace_id: Uuid::new_v4().to_string(),
            span_id: Uuid::new_v4().to_string()[..16].to_string(),
            account_id: None,
            request_id: Uuid::new_v4().to_string(),
        }
    }

    pub fn with_account(mut self, account_id: AccountId) -> Self {
        self.account_id = Some(account_id);
        self
    }
}

impl Default for RequestContext {
    fn default() -> Self {
        Self::new()
    }
}

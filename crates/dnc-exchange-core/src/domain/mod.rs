//! Value objects (C1): normalized phone numbers, list sources, and
//! suppression reasons. These are pure, ground-truth functions consumed by
//! every higher layer; they hold no state and perform no I/O.

mod phone;
mod reason;
mod source;

pub use phone::PhoneNumber;
pub use reason::{RiskLevel, SuppressReason};
pub use source::ListSource;

//! Ground-truth validation of generated insight payloads.
//!
//! Catches fabricated or internally inconsistent claims before a
//! response reaches a user and discounts the claimed confidence in
//! proportion to finding severity.

pub mod validator;

pub use validator::{
    ActionClaim, InsightClaim, InsightPayload, OrgFacts, ResponseValidator,
};

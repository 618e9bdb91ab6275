//! Read-only SQL policy: table allow-list and statement validation.

pub mod allowlist;
pub mod sql_validator;

pub use allowlist::Allowlist;
pub use sql_validator::{Rule, SqlValidator, ValidationResult};

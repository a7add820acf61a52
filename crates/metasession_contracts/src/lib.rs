#![forbid(unsafe_code)]

pub mod common;
pub mod event;

pub use common::{ContractViolation, MonotonicTimeNs, SchemaVersion, Validate};

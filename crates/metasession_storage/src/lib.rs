#![forbid(unsafe_code)]

pub mod journal;
pub mod repo;
pub mod store;

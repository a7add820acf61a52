#![forbid(unsafe_code)]

pub mod admission;
pub mod admission_worker;
